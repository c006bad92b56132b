//! Built-in product templates, each one a payoff tree.

use std::collections::BTreeMap;

use rust_decimal_macros::dec;
use serde::Serialize;

use crate::error::PayoffError;
use crate::payoff::ast::{CmpOp, LevelField, Operand, PayoffNode, Predicate, RedemptionKind};
use crate::product::{ObservationKind, ProductParameters};
use crate::PayoffResult;

/// Template name under which a product supplies its own tree.
pub const CUSTOM_TEMPLATE: &str = "custom";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TemplateSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    pub required_params: &'static [&'static str],
    /// Reads the basket upper-barrier touch scan.
    pub needs_basket_touch: bool,
    /// Reads per-underlying upper-barrier touch flags.
    pub needs_underlying_touch: bool,
    #[serde(skip)]
    pub build: fn() -> Vec<PayoffNode>,
}

impl TemplateSpec {
    pub fn check_parameters(&self, parameters: &ProductParameters) -> PayoffResult<()> {
        for name in self.required_params {
            parameters.require(name)?;
        }
        Ok(())
    }
}

/// A tree ready to evaluate, with the history scans it depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProgram {
    pub template: String,
    pub nodes: Vec<PayoffNode>,
    pub needs_basket_touch: bool,
    pub needs_underlying_touch: bool,
}

pub struct TemplateRegistry {
    templates: BTreeMap<&'static str, TemplateSpec>,
    aliases: BTreeMap<&'static str, &'static str>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        let mut registry = TemplateRegistry {
            templates: BTreeMap::new(),
            aliases: BTreeMap::new(),
        };
        for spec in builtin_templates() {
            registry.register(spec);
        }
        registry
    }
}

impl TemplateRegistry {
    pub fn register(&mut self, spec: TemplateSpec) {
        for alias in spec.aliases {
            self.aliases.insert(*alias, spec.name);
        }
        self.templates.insert(spec.name, spec);
    }

    pub fn specs(&self) -> impl Iterator<Item = &TemplateSpec> {
        self.templates.values()
    }

    pub fn resolve(&self, name: &str) -> PayoffResult<&TemplateSpec> {
        let key = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let canonical = self.aliases.get(key.as_str()).copied().unwrap_or(key.as_str());
        self.templates
            .get(canonical)
            .ok_or_else(|| PayoffError::UnknownTemplate(name.to_string()))
    }

    /// Returns the tree for `template`, or the product's own tree when the
    /// template is `custom`.
    pub fn program(
        &self,
        template: &str,
        custom: Option<&[PayoffNode]>,
        parameters: &ProductParameters,
    ) -> PayoffResult<ResolvedProgram> {
        if template.trim().eq_ignore_ascii_case(CUSTOM_TEMPLATE) {
            let nodes = custom.ok_or_else(|| {
                PayoffError::invalid("payoff", "custom template needs a payoff tree")
            })?;
            return Ok(ResolvedProgram {
                template: CUSTOM_TEMPLATE.to_string(),
                nodes: nodes.to_vec(),
                needs_basket_touch: parameters.upper_barrier.is_some(),
                needs_underlying_touch: parameters.upper_barrier.is_some(),
            });
        }
        let spec = self.resolve(template)?;
        spec.check_parameters(parameters)?;
        Ok(ResolvedProgram {
            template: spec.name.to_string(),
            nodes: (spec.build)(),
            needs_basket_touch: spec.needs_basket_touch,
            needs_underlying_touch: spec.needs_underlying_touch,
        })
    }
}

fn builtin_templates() -> [TemplateSpec; 5] {
    [
        TemplateSpec {
            name: "gearing_barrier",
            aliases: &["reverse_convertible"],
            description: "Geared loss below the capital protection barrier, fixed coupon",
            required_params: &["capital_protection_barrier", "coupon"],
            needs_basket_touch: false,
            needs_underlying_touch: false,
            build: gearing_barrier,
        },
        TemplateSpec {
            name: "rebate_with_floor",
            aliases: &["shark_note"],
            description: "Fixed rebate once the upper barrier is touched, floored otherwise",
            required_params: &["upper_barrier", "rebate", "floor"],
            needs_basket_touch: true,
            needs_underlying_touch: false,
            build: rebate_with_floor,
        },
        TemplateSpec {
            name: "capped_average",
            aliases: &["orion"],
            description: "Average of performances, capped where the upper barrier was touched",
            required_params: &["upper_barrier"],
            needs_basket_touch: false,
            needs_underlying_touch: true,
            build: capped_average,
        },
        TemplateSpec {
            name: "best_of_exclusion",
            aliases: &["himalaya"],
            description: "Best remaining underlying locked in at each observation",
            required_params: &[],
            needs_basket_touch: false,
            needs_underlying_touch: false,
            build: best_of_exclusion,
        },
        TemplateSpec {
            name: "memory_autocall",
            aliases: &["phoenix"],
            description: "Memory coupons with per-underlying autocall locks",
            required_params: &[
                "capital_protection_barrier",
                "coupon_barrier",
                "coupon",
                "autocall_level",
            ],
            needs_basket_touch: false,
            needs_underlying_touch: false,
            build: memory_autocall,
        },
    ]
}

fn hundred_plus(operand: Operand) -> Operand {
    Operand::call("add", vec![Operand::constant(dec!(100)), operand])
}

/// Gearing below barrier, or capital plus coupon.
fn geared_maturity(with_coupon: bool) -> PayoffNode {
    let barrier = Operand::param("capital_protection_barrier");
    let loss = Operand::call(
        "mul",
        vec![Operand::BasketPerformance, Operand::var("gearing")],
    );
    let (protected, geared, protected_formula, geared_formula) = if with_coupon {
        (
            hundred_plus(Operand::param("coupon")),
            Operand::call(
                "add",
                vec![Operand::constant(dec!(100)), loss, Operand::param("coupon")],
            ),
            "100 + {coupon}",
            "100 + {basket_performance} x {gearing} + {coupon}",
        )
    } else {
        (
            Operand::constant(dec!(100)),
            hundred_plus(loss),
            "100",
            "100 + {basket_performance} x {gearing}",
        )
    };
    PayoffNode::Condition {
        when: Predicate::AtOrAboveBarrier {
            performance: Operand::BasketPerformance,
            level: barrier,
        },
        then: vec![PayoffNode::result(
            protected,
            RedemptionKind::CapitalProtected,
            protected_formula,
        )],
        otherwise: vec![PayoffNode::result(
            geared,
            RedemptionKind::GearedLoss,
            geared_formula,
        )],
    }
}

fn gearing_barrier() -> Vec<PayoffNode> {
    vec![
        PayoffNode::bind(
            "gearing",
            Operand::call("gearing", vec![Operand::param("capital_protection_barrier")]),
        ),
        geared_maturity(true),
    ]
}

fn rebate_with_floor() -> Vec<PayoffNode> {
    let participated = hundred_plus(Operand::call(
        "div",
        vec![
            Operand::call(
                "mul",
                vec![Operand::BasketPerformance, Operand::param("participation")],
            ),
            Operand::constant(dec!(100)),
        ],
    ));
    vec![PayoffNode::Condition {
        when: Predicate::UpperBarrierTouched,
        then: vec![PayoffNode::result(
            hundred_plus(Operand::param("rebate")),
            RedemptionKind::Rebate,
            "100 + {rebate}",
        )],
        otherwise: vec![
            PayoffNode::bind("participated", participated),
            PayoffNode::Condition {
                when: Predicate::Compare {
                    lhs: Operand::var("participated"),
                    op: CmpOp::Ge,
                    rhs: Operand::param("floor"),
                },
                then: vec![PayoffNode::result(
                    Operand::var("participated"),
                    RedemptionKind::Participation,
                    "100 + {basket_performance} x {participation} / 100",
                )],
                otherwise: vec![PayoffNode::result(
                    Operand::param("floor"),
                    RedemptionKind::Floored,
                    "{floor}",
                )],
            },
        ],
    }]
}

fn capped_average() -> Vec<PayoffNode> {
    vec![
        PayoffNode::bind(
            "cap",
            Operand::call("barrier_threshold", vec![Operand::param("upper_barrier")]),
        ),
        PayoffNode::bind(
            "capped",
            Operand::call(
                "cap_touched",
                vec![
                    Operand::UnderlyingPerformances,
                    Operand::UnderlyingTouched,
                    Operand::var("cap"),
                ],
            ),
        ),
        PayoffNode::bind(
            "average",
            Operand::call("array_average", vec![Operand::var("capped")]),
        ),
        PayoffNode::Condition {
            when: Predicate::HasParam("floor".into()),
            then: vec![PayoffNode::result(
                Operand::call(
                    "max",
                    vec![
                        Operand::var("average"),
                        Operand::call("barrier_threshold", vec![Operand::param("floor")]),
                    ],
                ),
                RedemptionKind::CappedAverage,
                "max({average}, {floor} - 100)",
            )],
            otherwise: vec![PayoffNode::result(
                Operand::var("average"),
                RedemptionKind::CappedAverage,
                "{average}",
            )],
        },
    ]
}

fn best_of_exclusion() -> Vec<PayoffNode> {
    vec![
        PayoffNode::bind("selected", Operand::call("list", vec![])),
        PayoffNode::ForEachObservation {
            kinds: vec![],
            body: vec![PayoffNode::Push {
                list: "selected".into(),
                value: Operand::call("best_of_remaining", vec![Operand::ObservationPerformances]),
            }],
        },
        PayoffNode::bind(
            "average",
            Operand::call("array_average", vec![Operand::var("selected")]),
        ),
        PayoffNode::result(
            Operand::var("average"),
            RedemptionKind::BestOfSelection,
            "{average}",
        ),
    ]
}

fn memory_autocall() -> Vec<PayoffNode> {
    use ObservationKind::{Autocall, Coupon, CouponAutocall, Final};

    vec![
        PayoffNode::bind(
            "gearing",
            Operand::call("gearing", vec![Operand::param("capital_protection_barrier")]),
        ),
        PayoffNode::ForEachObservation {
            kinds: vec![Coupon, Autocall, CouponAutocall, Final],
            body: vec![
                PayoffNode::bind("coupon_paid", Operand::constant(dec!(0))),
                PayoffNode::Condition {
                    when: Predicate::ObservationIs(vec![Coupon, CouponAutocall, Final]),
                    then: vec![PayoffNode::MemoryCoupon {
                        performance: Operand::ObservationBasketPerformance,
                        barrier_level: Operand::ObservationLevel(LevelField::CouponBarrier),
                        coupon: Operand::param("coupon"),
                    }],
                    otherwise: vec![],
                },
                PayoffNode::Condition {
                    when: Predicate::ObservationIs(vec![Autocall, CouponAutocall, Final]),
                    then: vec![
                        PayoffNode::AutocallLock {
                            level: Operand::ObservationLevel(LevelField::AutocallLevel),
                        },
                        PayoffNode::Condition {
                            when: Predicate::AllLocked,
                            then: vec![PayoffNode::result(
                                hundred_plus(Operand::var("coupon_paid")),
                                RedemptionKind::Autocalled,
                                "100 + {coupon_paid}",
                            )],
                            otherwise: vec![],
                        },
                    ],
                    otherwise: vec![],
                },
            ],
        },
        geared_maturity(false),
    ]
}
