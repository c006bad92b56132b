//! Warning/error accumulator for one evaluation run.
//!
//! Data problems are recorded here instead of being returned as errors, so a
//! missing price for one underlying degrades the report without aborting it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluation::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    MarketData,
    Configuration,
    Calculation,
    Persistence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// No usable evaluation price for an underlying.
    MissingPrice,
    /// Zero, negative or unavailable reference fixing.
    MissingStrike,
    FetchFailed,
    FetchTimeout,
    EmptyHistory,
    /// Live quote unavailable, last close used.
    StaleCurrentPrice,
    /// Observation close borrowed from an earlier date.
    StaleObservationPrice,
    MissingObservationPrice,
    MissingObservationData,
    /// Every underlying is missing data.
    BasketUnavailable,
    CannotCalculate,
    /// Stored locks that the observation history no longer produces.
    LockDrift,
    PersistenceFailed,
    GeneralWarning,
    GeneralError,
}

impl IssueType {
    pub fn severity(&self) -> Severity {
        match self {
            IssueType::MissingPrice
            | IssueType::MissingStrike
            | IssueType::FetchFailed
            | IssueType::FetchTimeout
            | IssueType::EmptyHistory
            | IssueType::StaleCurrentPrice
            | IssueType::StaleObservationPrice
            | IssueType::LockDrift
            | IssueType::PersistenceFailed
            | IssueType::GeneralWarning => Severity::Warning,
            IssueType::MissingObservationPrice
            | IssueType::MissingObservationData
            | IssueType::BasketUnavailable
            | IssueType::CannotCalculate
            | IssueType::GeneralError => Severity::Error,
        }
    }

    pub fn category(&self) -> IssueCategory {
        match self {
            IssueType::MissingPrice
            | IssueType::FetchFailed
            | IssueType::FetchTimeout
            | IssueType::EmptyHistory
            | IssueType::StaleCurrentPrice
            | IssueType::StaleObservationPrice
            | IssueType::MissingObservationPrice => IssueCategory::MarketData,
            IssueType::MissingStrike => IssueCategory::Configuration,
            IssueType::MissingObservationData
            | IssueType::BasketUnavailable
            | IssueType::CannotCalculate
            | IssueType::GeneralWarning
            | IssueType::GeneralError => IssueCategory::Calculation,
            IssueType::LockDrift | IssueType::PersistenceFailed => IssueCategory::Persistence,
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            IssueType::MissingPrice => "no evaluation price available",
            IssueType::MissingStrike => "reference fixing missing or not positive",
            IssueType::FetchFailed => "market data request failed",
            IssueType::FetchTimeout => "market data request timed out",
            IssueType::EmptyHistory => "no historical closes in the requested window",
            IssueType::StaleCurrentPrice => "live quote unavailable, using last close",
            IssueType::StaleObservationPrice => "no close on observation date, using earlier close",
            IssueType::MissingObservationPrice => "no close near observation date",
            IssueType::MissingObservationData => "observation cannot be evaluated",
            IssueType::BasketUnavailable => "basket performance unavailable",
            IssueType::CannotCalculate => "redemption cannot be calculated",
            IssueType::LockDrift => "stored autocall lock not reproduced by history",
            IssueType::PersistenceFailed => "lock persistence failed",
            IssueType::GeneralWarning => "warning",
            IssueType::GeneralError => "error",
        }
    }
}

/// Optional details attached to an issue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueParams {
    pub ticker: Option<String>,
    pub message: Option<String>,
    pub context: BTreeMap<String, String>,
}

impl IssueParams {
    pub fn ticker(ticker: impl Into<String>) -> Self {
        IssueParams {
            ticker: Some(ticker.into()),
            ..Default::default()
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub category: IssueCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub context: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
    pub errors: usize,
    pub warnings: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub processing_status: ProcessingStatus,
    pub issues: Vec<Issue>,
    pub counts: IssueCounts,
    pub duration_ms: u64,
}

pub struct IssueCollector<'c> {
    clock: &'c dyn Clock,
    started_at: DateTime<Utc>,
    issues: Vec<Issue>,
}

impl<'c> IssueCollector<'c> {
    pub fn new(clock: &'c dyn Clock) -> Self {
        IssueCollector {
            clock,
            started_at: clock.now(),
            issues: Vec::new(),
        }
    }

    pub fn add_issue(&mut self, issue_type: IssueType, params: IssueParams) {
        self.push(issue_type, issue_type.severity(), params);
    }

    pub fn add_warning(&mut self, message: impl Into<String>, context: BTreeMap<String, String>) {
        let params = IssueParams {
            ticker: None,
            message: Some(message.into()),
            context,
        };
        self.push(IssueType::GeneralWarning, Severity::Warning, params);
    }

    pub fn add_error(&mut self, message: impl Into<String>, context: BTreeMap<String, String>) {
        let params = IssueParams {
            ticker: None,
            message: Some(message.into()),
            context,
        };
        self.push(IssueType::GeneralError, Severity::Error, params);
    }

    fn push(&mut self, issue_type: IssueType, severity: Severity, params: IssueParams) {
        let message = params
            .message
            .unwrap_or_else(|| issue_type.default_message().to_string());
        match severity {
            Severity::Warning => log::warn!("{message} ({:?})", params.ticker),
            Severity::Error => log::error!("{message} ({:?})", params.ticker),
        }
        self.issues.push(Issue {
            issue_type,
            severity,
            category: issue_type.category(),
            message,
            ticker: params.ticker,
            context: params.context,
            timestamp: self.clock.now(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Warning)
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Appends another collector's issues after this one's.
    pub fn merge(&mut self, other: IssueCollector<'_>) {
        self.issues.extend(other.issues);
    }

    pub fn summary(&self) -> IssueSummary {
        let errors = self
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count();
        let warnings = self.issues.len() - errors;
        let processing_status = if errors > 0 {
            ProcessingStatus::Error
        } else if warnings > 0 {
            ProcessingStatus::Warning
        } else {
            ProcessingStatus::Success
        };
        let elapsed = self.clock.now() - self.started_at;
        IssueSummary {
            processing_status,
            issues: self.issues.clone(),
            counts: IssueCounts {
                errors,
                warnings,
                total: self.issues.len(),
            },
            duration_ms: elapsed.num_milliseconds().max(0) as u64,
        }
    }
}
