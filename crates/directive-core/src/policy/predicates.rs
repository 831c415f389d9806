//! Risk predicates: named plugins a rule book entry can bind to.
//!
//! A predicate returns `Ok(Some(reason))` when it holds. A reading present with the wrong
//! type is an `EvalError`; absent readings never make a predicate hold.

use crate::error::EvalResult;
use crate::policy::compliance::{LegalComplianceEvaluator, Verdict};
use crate::policy::rule::RuleInput;
use crate::shared::Section;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait RiskPredicate: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, input: &RuleInput<'_>) -> EvalResult<Option<String>>;
}

fn socio_number(input: &RuleInput<'_>, domain: &str, key: &str) -> EvalResult<Option<f64>> {
    input.context.number(Section::Socioeconomic, domain, key)
}

fn env_number(input: &RuleInput<'_>, domain: &str, key: &str) -> EvalResult<Option<f64>> {
    input.context.number(Section::Environmental, domain, key)
}

fn above(value: Option<f64>, limit: f64) -> bool {
    value.is_some_and(|v| v > limit)
}

fn below(value: Option<f64>, limit: f64) -> bool {
    value.is_some_and(|v| v < limit)
}

/// Global catastrophe risk, or high crime with a contracting economy.
pub struct HumanityPredicate;

impl RiskPredicate for HumanityPredicate {
    fn name(&self) -> &str {
        "humanity"
    }

    fn check(&self, input: &RuleInput<'_>) -> EvalResult<Option<String>> {
        if input.flags.global_catastrophe_risk {
            return Ok(Some("context indicates global catastrophe risk".into()));
        }
        let crime_rate = socio_number(input, "crime", "crime_rate")?;
        let gdp_growth = socio_number(input, "economic_data", "gdp_growth")?;
        if above(crime_rate, 70.0) && below(gdp_growth, -1.0) {
            return Ok(Some(
                "high crime rate with economic contraction indicates societal collapse".into(),
            ));
        }
        Ok(None)
    }
}

/// Human safety risk, high violence, or very poor school ratings.
pub struct HumanLifePredicate;

impl RiskPredicate for HumanLifePredicate {
    fn name(&self) -> &str {
        "human_life"
    }

    fn check(&self, input: &RuleInput<'_>) -> EvalResult<Option<String>> {
        if input.flags.human_safety_risk {
            return Ok(Some("context indicates human safety risk".into()));
        }
        if above(socio_number(input, "crime", "violence_level")?, 5.0) {
            return Ok(Some("violence level threatens human safety".into()));
        }
        if below(socio_number(input, "school_ratings", "average_rating")?, 2.0) {
            return Ok(Some("school quality threatens human well-being".into()));
        }
        Ok(None)
    }
}

/// Environmental damage risk plus the socioeconomic strain indicators.
pub struct EnvironmentPredicate;

impl RiskPredicate for EnvironmentPredicate {
    fn name(&self) -> &str {
        "environment"
    }

    fn check(&self, input: &RuleInput<'_>) -> EvalResult<Option<String>> {
        if input.flags.environmental_damage_risk {
            return Ok(Some("context indicates environmental damage risk".into()));
        }

        let ctx = input.context;
        let depletion = ctx
            .flag(Section::Socioeconomic, "economic_data", "resource_depletion")?
            .unwrap_or(false);
        let falling_market = ctx
            .text(Section::Socioeconomic, "property_values", "market_trend")?
            .is_some_and(|t| t.eq_ignore_ascii_case("decreasing"));
        let crime_rate = socio_number(input, "crime", "crime_rate")?;

        let strain = [
            (depletion, "resource depletion"),
            (falling_market, "decreasing property values"),
            (above(crime_rate, 60.0), "high crime rate"),
            (above(env_number(input, "deforestation", "level")?, 70.0), "deforestation"),
            (above(env_number(input, "industrial_pollution", "level")?, 80.0), "industrial pollution"),
            (above(env_number(input, "urban_sprawl", "rate")?, 5.0), "urban sprawl"),
        ];
        if let Some((_, what)) = strain.iter().find(|(hit, _)| *hit) {
            return Ok(Some(format!("{} indicates environmental strain", what)));
        }

        if above(env_number(input, "air_quality", "aqi")?, 150.0) && above(crime_rate, 50.0) {
            return Ok(Some(
                "poor air quality with high crime indicates combined environmental and social stress"
                    .into(),
            ));
        }
        Ok(None)
    }
}

/// Legal check first, then ethical check.
pub struct LegalEthicalPredicate {
    evaluator: Arc<dyn LegalComplianceEvaluator>,
}

impl LegalEthicalPredicate {
    pub fn new(evaluator: Arc<dyn LegalComplianceEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl RiskPredicate for LegalEthicalPredicate {
    fn name(&self) -> &str {
        "legal_ethical"
    }

    fn check(&self, input: &RuleInput<'_>) -> EvalResult<Option<String>> {
        if let Verdict::Breach(reason) = self.evaluator.check_legal(input.order)? {
            return Ok(Some(reason));
        }
        if let Verdict::Breach(reason) = self.evaluator.check_ethical(input.order)? {
            return Ok(Some(reason));
        }
        Ok(None)
    }
}

type CheckFn = dyn Fn(&RuleInput<'_>) -> EvalResult<Option<String>> + Send + Sync;

/// Closure-backed predicate for embedding applications.
pub struct FnPredicate {
    name: String,
    check: Box<CheckFn>,
}

impl FnPredicate {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&RuleInput<'_>) -> EvalResult<Option<String>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }
}

impl RiskPredicate for FnPredicate {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, input: &RuleInput<'_>) -> EvalResult<Option<String>> {
        (self.check)(input)
    }
}

/// Name → predicate lookup used when compiling a rule book.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: HashMap<String, Arc<dyn RiskPredicate>>,
}

impl fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in law predicates.
    pub fn with_builtins(compliance: Arc<dyn LegalComplianceEvaluator>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HumanityPredicate));
        registry.register(Arc::new(HumanLifePredicate));
        registry.register(Arc::new(EnvironmentPredicate));
        registry.register(Arc::new(LegalEthicalPredicate::new(compliance)));
        registry
    }

    /// Registers under `predicate.name()`, replacing any previous entry.
    pub fn register(&mut self, predicate: Arc<dyn RiskPredicate>) {
        self.predicates.insert(predicate.name().to_string(), predicate);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RiskPredicate>> {
        self.predicates.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.predicates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::policy::compliance::KeywordComplianceEvaluator;
    use crate::policy::rulebook::ComplianceTerms;
    use crate::shared::{EvaluationContext, Order, RiskFlags};

    fn check(p: &dyn RiskPredicate, ctx: &EvaluationContext, flags: RiskFlags) -> EvalResult<Option<String>> {
        let order = Order::new("open website example.com");
        let text = order.normalized();
        p.check(&RuleInput {
            order: &order,
            text: &text,
            flags: &flags,
            context: ctx,
        })
    }

    #[test]
    fn test_humanity_compound_predicate() {
        let ctx = EvaluationContext::new()
            .socio("crime", "crime_rate", 75.0)
            .socio("economic_data", "gdp_growth", -0.5);
        assert_eq!(check(&HumanityPredicate, &ctx, RiskFlags::default()), Ok(None));

        let ctx = ctx.socio("economic_data", "gdp_growth", -3.0);
        assert!(check(&HumanityPredicate, &ctx, RiskFlags::default()).unwrap().is_some());

        let flags = RiskFlags {
            global_catastrophe_risk: true,
            ..RiskFlags::default()
        };
        assert!(check(&HumanityPredicate, &EvaluationContext::new(), flags).unwrap().is_some());
    }

    #[test]
    fn test_human_life_ignores_absent_school_rating() {
        assert_eq!(
            check(&HumanLifePredicate, &EvaluationContext::new(), RiskFlags::default()),
            Ok(None)
        );
        let ctx = EvaluationContext::new().socio("school_ratings", "average_rating", 1.5);
        assert!(check(&HumanLifePredicate, &ctx, RiskFlags::default()).unwrap().is_some());
    }

    #[test]
    fn test_environment_strain_indicators() {
        let ctx = EvaluationContext::new().socio("economic_data", "resource_depletion", true);
        let reason = check(&EnvironmentPredicate, &ctx, RiskFlags::default()).unwrap().unwrap();
        assert!(reason.contains("resource depletion"));

        let ctx = EvaluationContext::new()
            .env("air_quality", "aqi", 160.0)
            .socio("crime", "crime_rate", 55.0);
        assert!(check(&EnvironmentPredicate, &ctx, RiskFlags::default()).unwrap().is_some());

        let calm = EvaluationContext::new()
            .env("air_quality", "aqi", 160.0)
            .socio("crime", "crime_rate", 10.0);
        assert_eq!(check(&EnvironmentPredicate, &calm, RiskFlags::default()), Ok(None));
    }

    #[test]
    fn test_wrong_type_reading_is_an_error() {
        let ctx = EvaluationContext::new().socio("crime", "crime_rate", "very high");
        let err = check(&HumanityPredicate, &ctx, RiskFlags::default()).unwrap_err();
        assert!(matches!(err, EvalError::MalformedReading { ref key, .. } if key == "crime_rate"));
    }

    #[test]
    fn test_legal_before_ethical() {
        let evaluator = KeywordComplianceEvaluator::new(&ComplianceTerms {
            illegal: vec!["steal".into()],
            unethical: vec!["deceive".into()],
        })
        .unwrap();
        let p = LegalEthicalPredicate::new(Arc::new(evaluator));
        let order = Order::new("deceive them and steal it");
        let text = order.normalized();
        let reason = p
            .check(&RuleInput {
                order: &order,
                text: &text,
                flags: &RiskFlags::default(),
                context: &EvaluationContext::new(),
            })
            .unwrap()
            .unwrap();
        assert!(reason.contains("illegal"));
    }

    #[test]
    fn test_registry_builtins() {
        let registry = PredicateRegistry::with_builtins(Arc::new(KeywordComplianceEvaluator::permissive()));
        assert_eq!(
            registry.names(),
            vec!["environment", "human_life", "humanity", "legal_ethical"]
        );
        assert!(registry.get("astrology").is_none());
    }
}
