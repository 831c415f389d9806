//! RiskSynthesizer: raw per-domain readings → boolean risk flags.
//!
//! Pure and total. A missing domain, a missing reading, or a reading of the wrong type
//! contributes nothing. Flags are OR-combined across every threshold that fires.

use crate::shared::{EvaluationContext, RiskFlags, Section};

/// Which flag a threshold raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskKind {
    HumanSafety,
    EnvironmentalDamage,
    GlobalCatastrophe,
    Societal,
}

/// Comparison applied to one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    Above(f64),
    Below(f64),
    IsTrue,
    TextEquals(&'static str),
}

/// `section.domain.key <check>`: one clause of a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub section: Section,
    pub domain: &'static str,
    pub key: &'static str,
    pub check: Check,
}

impl Clause {
    const fn env(domain: &'static str, key: &'static str, check: Check) -> Self {
        Self {
            section: Section::Environmental,
            domain,
            key,
            check,
        }
    }

    const fn socio(domain: &'static str, key: &'static str, check: Check) -> Self {
        Self {
            section: Section::Socioeconomic,
            domain,
            key,
            check,
        }
    }

    fn holds(&self, ctx: &EvaluationContext) -> bool {
        match &self.check {
            Check::Above(limit) => number(ctx, self).is_some_and(|v| v > *limit),
            Check::Below(limit) => number(ctx, self).is_some_and(|v| v < *limit),
            Check::IsTrue => ctx
                .flag(self.section, self.domain, self.key)
                .ok()
                .flatten()
                .unwrap_or(false),
            Check::TextEquals(expected) => ctx
                .text(self.section, self.domain, self.key)
                .ok()
                .flatten()
                .is_some_and(|v| v.eq_ignore_ascii_case(expected)),
        }
    }
}

fn number(ctx: &EvaluationContext, clause: &Clause) -> Option<f64> {
    ctx.number(clause.section, clause.domain, clause.key).ok().flatten()
}

/// A fixed rule: every clause must hold (compound predicates are AND-ed).
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub raises: RiskKind,
    pub all_of: Vec<Clause>,
}

impl Threshold {
    fn single(raises: RiskKind, clause: Clause) -> Self {
        Self {
            raises,
            all_of: vec![clause],
        }
    }

    fn holds(&self, ctx: &EvaluationContext) -> bool {
        !self.all_of.is_empty() && self.all_of.iter().all(|c| c.holds(ctx))
    }
}

/// Threshold table plus the cross-domain combination rule.
#[derive(Debug, Clone)]
pub struct RiskSynthesizer {
    thresholds: Vec<Threshold>,
    /// Environmental damage together with societal risk escalates to catastrophe.
    combine_into_catastrophe: bool,
}

impl Default for RiskSynthesizer {
    fn default() -> Self {
        use Check::*;
        use RiskKind::*;

        let thresholds = vec![
            // Human safety
            Threshold::single(HumanSafety, Clause::env("radiation", "radiation_level", Above(100.0))),
            Threshold::single(HumanSafety, Clause::env("fauna", "species_count", Below(10.0))),
            // Catastrophe
            Threshold::single(GlobalCatastrophe, Clause::env("seismic", "seismic_activity", Above(7.0))),
            // Environmental damage
            Threshold::single(EnvironmentalDamage, Clause::env("air_quality", "aqi", Above(150.0))),
            Threshold::single(EnvironmentalDamage, Clause::env("soil_quality", "soil_health", Below(30.0))),
            Threshold::single(EnvironmentalDamage, Clause::env("water_quality", "water_quality_index", Below(50.0))),
            Threshold::single(EnvironmentalDamage, Clause::env("weather", "temperature", Above(40.0))),
            Threshold::single(EnvironmentalDamage, Clause::env("deforestation", "level", Above(70.0))),
            Threshold::single(EnvironmentalDamage, Clause::env("industrial_pollution", "level", Above(80.0))),
            Threshold::single(EnvironmentalDamage, Clause::env("urban_sprawl", "rate", Above(5.0))),
            Threshold::single(EnvironmentalDamage, Clause::env("erosion", "level", Above(7.0))),
            Threshold::single(EnvironmentalDamage, Clause::env("invasive_species", "species_present", IsTrue)),
            Threshold::single(EnvironmentalDamage, Clause::env("biodiversity", "biodiversity_index", Below(0.3))),
            Threshold::single(EnvironmentalDamage, Clause::env("ocean_health", "ocean_health_index", Below(0.3))),
            Threshold::single(EnvironmentalDamage, Clause::env("specific_resources", "resource_level", Below(20.0))),
            // Societal
            Threshold {
                raises: Societal,
                all_of: vec![
                    Clause::socio("crime", "crime_rate", Above(70.0)),
                    Clause::socio("economic_data", "gdp_growth", Below(-1.0)),
                ],
            },
            Threshold::single(Societal, Clause::socio("property_values", "market_trend", TextEquals("decreasing"))),
            Threshold::single(Societal, Clause::socio("public_health", "health_index", Below(0.4))),
            Threshold::single(Societal, Clause::socio("education_levels", "education_index", Below(0.4))),
            Threshold::single(Societal, Clause::socio("infrastructure_quality", "infrastructure_index", Below(0.4))),
            Threshold::single(Societal, Clause::socio("food_security", "food_security_index", Below(0.4))),
            Threshold::single(Societal, Clause::socio("social_inequality", "inequality_index", Above(0.6))),
            Threshold::single(Societal, Clause::socio("political_stability", "stability_index", Below(0.4))),
            Threshold::single(Societal, Clause::socio("cultural_factors", "cultural_index", Below(0.4))),
            Threshold::single(Societal, Clause::socio("technology_access", "technology_index", Below(0.4))),
        ];

        Self {
            thresholds,
            combine_into_catastrophe: true,
        }
    }
}

impl RiskSynthesizer {
    /// Synthesizer with a caller-supplied table (no built-in thresholds).
    pub fn with_thresholds(thresholds: Vec<Threshold>) -> Self {
        Self {
            thresholds,
            combine_into_catastrophe: false,
        }
    }

    pub fn combine_into_catastrophe(mut self, enabled: bool) -> Self {
        self.combine_into_catastrophe = enabled;
        self
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn synthesize(&self, ctx: &EvaluationContext) -> RiskFlags {
        let mut flags = RiskFlags::default();
        for threshold in self.thresholds.iter().filter(|t| t.holds(ctx)) {
            match threshold.raises {
                RiskKind::HumanSafety => flags.human_safety_risk = true,
                RiskKind::EnvironmentalDamage => flags.environmental_damage_risk = true,
                RiskKind::GlobalCatastrophe => flags.global_catastrophe_risk = true,
                RiskKind::Societal => flags.societal_risk = true,
            }
        }
        if self.combine_into_catastrophe && flags.environmental_damage_risk && flags.societal_risk {
            flags.global_catastrophe_risk = true;
        }
        flags
    }
}

/// Synthesizes with the built-in threshold table.
pub fn synthesize(ctx: &EvaluationContext) -> RiskFlags {
    RiskSynthesizer::default().synthesize(ctx)
}
