//! Savings scenarios scaled by data trustworthiness
//!
//! The validation factor (ledger total / calculated total) selects a bucket
//! which, together with the fleet's size class, decides how much of each
//! strategy's literature-derived savings the engine is willing to claim.
//! Caps are absolute: no bucket or size class can push a strategy past its
//! ceiling.

use crate::calculator::{round_co2, round_currency, round_to};
use crate::config::ScenarioConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agreement between the billing ledger and calculated cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationBucket {
    /// Within 1.5x
    Excellent,
    /// Within 5x
    Moderate,
    /// Within 50x
    Limited,
    /// Beyond 50x
    Poor,
    /// No ledger total, or nothing calculated to compare against
    Unknown,
}

impl ValidationBucket {
    /// Bucket a ratio symmetrically, so 2x over and 2x under agree equally
    pub fn from_factor(factor: f64) -> Self {
        if !factor.is_finite() || factor <= 0.0 {
            return ValidationBucket::Poor;
        }
        let spread = factor.max(1.0 / factor);
        if spread <= 1.5 {
            ValidationBucket::Excellent
        } else if spread <= 5.0 {
            ValidationBucket::Moderate
        } else if spread <= 50.0 {
            ValidationBucket::Limited
        } else {
            ValidationBucket::Poor
        }
    }

    /// Share of a strategy's base savings claimed in this bucket
    pub fn multiplier(&self) -> f64 {
        match self {
            ValidationBucket::Excellent => 1.0,
            ValidationBucket::Moderate => 0.75,
            ValidationBucket::Limited => 0.5,
            ValidationBucket::Poor => 0.25,
            ValidationBucket::Unknown => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationBucket::Excellent => "excellent",
            ValidationBucket::Moderate => "moderate",
            ValidationBucket::Limited => "limited",
            ValidationBucket::Poor => "poor",
            ValidationBucket::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ValidationBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger total divided by calculated total for the same window
///
/// The calculated side only counts unit-price costs. Costs allocated from
/// billing samples come from the same books as the ledger and cannot
/// corroborate it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationFactor {
    pub ledger_total: Option<f64>,
    pub calculated_total: f64,
    pub factor: Option<f64>,
    pub bucket: ValidationBucket,
    /// Resources whose estimated cost was left out of `calculated_total`
    #[serde(default)]
    pub estimates_excluded: usize,
}

impl ValidationFactor {
    pub fn compute(ledger_total: Option<f64>, calculated_total: f64) -> Self {
        let factor = match ledger_total {
            Some(ledger) if ledger.is_finite() && ledger >= 0.0 && calculated_total > 0.0 => {
                Some(ledger / calculated_total)
            }
            _ => None,
        };
        let bucket = factor
            .map(ValidationBucket::from_factor)
            .unwrap_or(ValidationBucket::Unknown);

        Self {
            ledger_total,
            calculated_total,
            factor,
            bucket,
            estimates_excluded: 0,
        }
    }

    /// Record how many estimated costs were kept out of the comparison
    pub fn excluding_estimates(mut self, count: usize) -> Self {
        self.estimates_excluded = count;
        self
    }
}

/// How aggressive a strategy's savings assumption is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTier {
    Conservative,
    Moderate,
    Aggressive,
}

impl StrategyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTier::Conservative => "conservative",
            StrategyTier::Moderate => "moderate",
            StrategyTier::Aggressive => "aggressive",
        }
    }
}

/// Optimization strategies the calculator evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Rightsizing,
    OffHoursScheduling,
    WorkloadConsolidation,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::Rightsizing,
        Strategy::OffHoursScheduling,
        Strategy::WorkloadConsolidation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Rightsizing => "rightsizing",
            Strategy::OffHoursScheduling => "off_hours_scheduling",
            Strategy::WorkloadConsolidation => "workload_consolidation",
        }
    }

    pub fn tier(&self) -> StrategyTier {
        match self {
            Strategy::Rightsizing => StrategyTier::Conservative,
            Strategy::OffHoursScheduling => StrategyTier::Moderate,
            Strategy::WorkloadConsolidation => StrategyTier::Aggressive,
        }
    }

    /// Typical savings before any cap or discount (percent)
    pub fn base_savings_pct(&self) -> f64 {
        match self {
            Strategy::Rightsizing => 15.0,
            Strategy::OffHoursScheduling => 20.0,
            Strategy::WorkloadConsolidation => 30.0,
        }
    }
}

/// Whether the fleet is large enough for percentages to mean anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Production,
    Development,
}

impl SizeClass {
    pub fn multiplier(&self) -> f64 {
        match self {
            SizeClass::Production => 1.0,
            SizeClass::Development => 0.2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Production => "production",
            SizeClass::Development => "development",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Claimed at full bucket strength
    Reported,
    /// Claimed, but reduced for weak validation or a small fleet
    Discounted,
    /// Not claimed; savings shown as zero
    Suppressed,
}

/// A bounded savings estimate for one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub tier: StrategyTier,
    pub cost_savings_pct: f64,
    pub co2_savings_pct: f64,
    pub cost_savings: f64,
    pub co2_savings_kg: f64,
    pub uncertainty_low_pct: f64,
    pub uncertainty_high_pct: f64,
    pub cap_pct: f64,
    pub bucket: ValidationBucket,
    pub size_class: SizeClass,
    pub status: ScenarioStatus,
    pub statistically_unreliable: bool,
    pub methodology: String,
}

impl Scenario {
    /// Round for presentation: percentages and CO2 to 3 places, currency to 2
    pub fn rounded(mut self) -> Self {
        self.cost_savings_pct = round_to(self.cost_savings_pct, 3);
        self.co2_savings_pct = round_to(self.co2_savings_pct, 3);
        self.uncertainty_low_pct = round_to(self.uncertainty_low_pct, 3);
        self.uncertainty_high_pct = round_to(self.uncertainty_high_pct, 3);
        self.cost_savings = round_currency(self.cost_savings);
        self.co2_savings_kg = round_co2(self.co2_savings_kg);
        self
    }
}

/// Aggregate figures the scenarios are computed from
#[derive(Debug, Clone, Copy)]
pub struct ScenarioInput {
    pub total_cost: f64,
    pub total_co2_kg: f64,
    pub resources_included: usize,
    pub validation: ValidationFactor,
}

#[derive(Debug, Clone)]
pub struct ScenarioCalculator {
    config: ScenarioConfig,
}

impl ScenarioCalculator {
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }

    pub fn size_class(&self, input: &ScenarioInput) -> SizeClass {
        if input.resources_included < self.config.min_resources
            || input.total_cost < self.config.min_total_cost
        {
            SizeClass::Development
        } else {
            SizeClass::Production
        }
    }

    fn cap_for(&self, tier: StrategyTier) -> f64 {
        match tier {
            StrategyTier::Conservative => self.config.conservative_cap_pct,
            StrategyTier::Moderate | StrategyTier::Aggressive => self.config.elevated_cap_pct,
        }
    }

    /// Evaluate every strategy against the aggregate input
    pub fn calculate(&self, input: &ScenarioInput) -> Vec<Scenario> {
        let bucket = input.validation.bucket;
        let size_class = self.size_class(input);
        let status = match (bucket, size_class) {
            (ValidationBucket::Poor, SizeClass::Development) => ScenarioStatus::Suppressed,
            (ValidationBucket::Poor | ValidationBucket::Unknown, _) | (_, SizeClass::Development) => {
                ScenarioStatus::Discounted
            }
            _ => ScenarioStatus::Reported,
        };

        Strategy::ALL
            .iter()
            .map(|strategy| self.scenario(*strategy, input, bucket, size_class, status))
            .collect()
    }

    fn scenario(
        &self,
        strategy: Strategy,
        input: &ScenarioInput,
        bucket: ValidationBucket,
        size_class: SizeClass,
        status: ScenarioStatus,
    ) -> Scenario {
        let tier = strategy.tier();
        let cap = self.cap_for(tier);

        let pct = if status == ScenarioStatus::Suppressed {
            0.0
        } else {
            strategy.base_savings_pct().min(cap) * bucket.multiplier() * size_class.multiplier()
        };

        let half_width = self.config.uncertainty_half_width_pct;

        Scenario {
            name: strategy.name().to_string(),
            tier,
            cost_savings_pct: pct,
            // CO2 follows cost for the same scenario
            co2_savings_pct: pct,
            cost_savings: input.total_cost * pct / 100.0,
            co2_savings_kg: input.total_co2_kg * pct / 100.0,
            uncertainty_low_pct: (pct - half_width).max(0.0),
            uncertainty_high_pct: (pct + half_width).min(100.0),
            cap_pct: cap,
            bucket,
            size_class,
            status,
            statistically_unreliable: size_class == SizeClass::Development,
            methodology: methodology_tag(strategy, cap, bucket, size_class, &input.validation),
        }
    }
}

/// `<strategy>:<tier>-cap<cap>:<bucket>:<size>`, plus `:estimates-excluded`
/// when estimated costs were kept out of validation
fn methodology_tag(
    strategy: Strategy,
    cap: f64,
    bucket: ValidationBucket,
    size_class: SizeClass,
    validation: &ValidationFactor,
) -> String {
    let mut tag = format!(
        "{}:{}-cap{}:{}:{}",
        strategy.name(),
        strategy.tier().as_str(),
        cap,
        bucket.as_str(),
        size_class.as_str()
    );
    if validation.estimates_excluded > 0 {
        tag.push_str(":estimates-excluded");
    }
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(factor: f64, resources: usize, total_cost: f64) -> ScenarioInput {
        ScenarioInput {
            total_cost,
            total_co2_kg: total_cost * 2.0,
            resources_included: resources,
            validation: ValidationFactor::compute(Some(total_cost * factor), total_cost),
        }
    }

    fn by_name<'a>(scenarios: &'a [Scenario], name: &str) -> &'a Scenario {
        scenarios.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn test_bucket_thresholds() {
        assert_eq!(ValidationBucket::from_factor(1.0), ValidationBucket::Excellent);
        assert_eq!(ValidationBucket::from_factor(1.5), ValidationBucket::Excellent);
        assert_eq!(ValidationBucket::from_factor(0.7), ValidationBucket::Excellent);
        assert_eq!(ValidationBucket::from_factor(4.0), ValidationBucket::Moderate);
        assert_eq!(ValidationBucket::from_factor(0.25), ValidationBucket::Moderate);
        assert_eq!(ValidationBucket::from_factor(50.0), ValidationBucket::Limited);
        assert_eq!(ValidationBucket::from_factor(80.0), ValidationBucket::Poor);
        assert_eq!(ValidationBucket::from_factor(0.0), ValidationBucket::Poor);
    }

    #[test]
    fn test_estimates_recorded_in_methodology() {
        let calculator = ScenarioCalculator::new(ScenarioConfig::default());
        let validation = ValidationFactor::compute(Some(40.0), 0.0).excluding_estimates(6);
        assert_eq!(validation.bucket, ValidationBucket::Unknown);

        let scenarios = calculator.calculate(&ScenarioInput {
            total_cost: 40.0,
            total_co2_kg: 1.0,
            resources_included: 6,
            validation,
        });
        let rightsizing = by_name(&scenarios, "rightsizing");
        assert_eq!(rightsizing.status, ScenarioStatus::Discounted);
        assert_eq!(
            rightsizing.methodology,
            "rightsizing:conservative-cap15:unknown:production:estimates-excluded"
        );
    }

    #[test]
    fn test_validation_without_ledger_is_unknown() {
        let v = ValidationFactor::compute(None, 120.0);
        assert_eq!(v.bucket, ValidationBucket::Unknown);
        assert!(v.factor.is_none());

        let v = ValidationFactor::compute(Some(100.0), 0.0);
        assert_eq!(v.bucket, ValidationBucket::Unknown);
    }

    #[test]
    fn test_excellent_production_fleet_claims_full_cap() {
        let calculator = ScenarioCalculator::new(ScenarioConfig::default());
        let scenarios = calculator.calculate(&input(1.1, 6, 500.0));

        let rightsizing = by_name(&scenarios, "rightsizing");
        assert_eq!(rightsizing.bucket, ValidationBucket::Excellent);
        assert_eq!(rightsizing.status, ScenarioStatus::Reported);
        assert!((rightsizing.cost_savings_pct - 15.0).abs() < 1e-9);
        assert!((rightsizing.cost_savings - 75.0).abs() < 1e-9);
        assert_eq!(rightsizing.methodology, "rightsizing:conservative-cap15:excellent:production");
    }

    #[test]
    fn test_poor_validation_degrades_scenarios() {
        let calculator = ScenarioCalculator::new(ScenarioConfig::default());
        let good = calculator.calculate(&input(1.1, 6, 500.0));
        let poor = calculator.calculate(&input(80.0, 6, 500.0));

        for (g, p) in good.iter().zip(poor.iter()) {
            assert_eq!(p.bucket, ValidationBucket::Poor);
            assert_eq!(p.status, ScenarioStatus::Discounted);
            assert!(p.cost_savings_pct < g.cost_savings_pct);
        }
        assert!((by_name(&poor, "rightsizing").cost_savings_pct - 3.75).abs() < 1e-9);
    }

    #[test]
    fn test_caps_never_exceeded() {
        let calculator = ScenarioCalculator::new(ScenarioConfig::default());
        for factor in [1e-9, 0.01, 0.5, 1.0, 1.49, 3.0, 49.0, 1e9] {
            for scenario in calculator.calculate(&input(factor, 50, 10_000.0)) {
                assert!(scenario.cost_savings_pct <= scenario.cap_pct + 1e-9);
                assert_eq!(scenario.co2_savings_pct, scenario.cost_savings_pct);
            }
        }
    }

    #[test]
    fn test_development_fleet_is_discounted_and_flagged() {
        let calculator = ScenarioCalculator::new(ScenarioConfig::default());
        let scenarios = calculator.calculate(&input(1.0, 2, 500.0));

        let rightsizing = by_name(&scenarios, "rightsizing");
        assert_eq!(rightsizing.size_class, SizeClass::Development);
        assert_eq!(rightsizing.status, ScenarioStatus::Discounted);
        assert!(rightsizing.statistically_unreliable);
        assert!((rightsizing.cost_savings_pct - 3.0).abs() < 1e-9);

        // Small spend also counts as development
        let cheap = calculator.calculate(&input(1.0, 20, 4.0));
        assert!(cheap.iter().all(|s| s.size_class == SizeClass::Development));
    }

    #[test]
    fn test_poor_development_fleet_is_suppressed() {
        let calculator = ScenarioCalculator::new(ScenarioConfig::default());
        let scenarios = calculator.calculate(&input(200.0, 2, 3.0));

        for scenario in &scenarios {
            assert_eq!(scenario.status, ScenarioStatus::Suppressed);
            assert_eq!(scenario.cost_savings_pct, 0.0);
            assert_eq!(scenario.cost_savings, 0.0);
            assert_eq!(scenario.co2_savings_kg, 0.0);
        }
    }

    #[test]
    fn test_uncertainty_band_fixed_width() {
        let calculator = ScenarioCalculator::new(ScenarioConfig::default());
        let scenarios = calculator.calculate(&input(1.0, 10, 100.0));
        let consolidation = by_name(&scenarios, "workload_consolidation");

        assert!((consolidation.cost_savings_pct - 25.0).abs() < 1e-9);
        assert!((consolidation.uncertainty_low_pct - 22.5).abs() < 1e-9);
        assert!((consolidation.uncertainty_high_pct - 27.5).abs() < 1e-9);

        // Unknown bucket on a development fleet: 15 * 0.5 * 0.2 = 1.5
        let unvalidated = calculator.calculate(&ScenarioInput {
            total_cost: 1.0,
            total_co2_kg: 0.5,
            resources_included: 1,
            validation: ValidationFactor::compute(None, 1.0),
        });
        let low = by_name(&unvalidated, "rightsizing");
        assert_eq!(low.status, ScenarioStatus::Discounted);
        assert!((low.cost_savings_pct - 1.5).abs() < 1e-9);
        assert_eq!(low.uncertainty_low_pct, 0.0);
        assert!((low.uncertainty_high_pct - 4.0).abs() < 1e-9);
    }
}
