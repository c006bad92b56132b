//! One evaluation run: fetch, derive, evaluate, report.

pub mod clock;
pub mod context;
pub mod issues;
pub mod market_data;
pub mod report;

pub use clock::{Clock, FixedClock, SystemClock};
pub use context::{EvaluationContext, EvaluationPrice, UnderlyingState};
pub use issues::{
    Issue, IssueCategory, IssueCollector, IssueCounts, IssueParams, IssueSummary, IssueType,
    ProcessingStatus, Severity,
};
pub use market_data::{
    fetch_all, FetchRequest, FetchedUnderlying, InMemoryMarketData, MarketDataProvider, Quote,
};
pub use report::{generate_report, LifecycleStatus, Report};
