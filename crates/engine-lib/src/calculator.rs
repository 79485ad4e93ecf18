//! Power, carbon and cost calculation
//!
//! Pure functions, no I/O. Rounding is never applied here except through
//! the explicit `round_*` helpers, which the orchestrator calls once when a
//! report is assembled.

use crate::error::{EngineError, Result};
use crate::figure::{Figure, ReasonCode};
use crate::models::{CarbonSample, PowerProfile, RuntimeInterval};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Share of average power a server draws regardless of utilization
pub const IDLE_FRACTION: f64 = 0.3;

const MS_PER_HOUR: i64 = 3_600_000;

/// Effective power draw in watts at a utilization percentage
pub fn effective_power(profile: &PowerProfile, utilization_pct: f64) -> Result<f64> {
    if !utilization_pct.is_finite() || !(0.0..=100.0).contains(&utilization_pct) {
        return Err(EngineError::InvalidInput(format!(
            "utilization {} is outside 0-100",
            utilization_pct
        )));
    }
    if !profile.avg_watts.is_finite() || profile.avg_watts < 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "power profile for {} has invalid average draw {}",
            profile.resource_type, profile.avg_watts
        )));
    }

    Ok(profile.avg_watts * (IDLE_FRACTION + (1.0 - IDLE_FRACTION) * utilization_pct / 100.0))
}

/// Energy in kWh drawn at `power_w` for `hours`
pub fn energy_kwh(power_w: f64, hours: f64) -> f64 {
    power_w / 1000.0 * hours
}

/// Emissions in kg CO2
pub fn co2_kg(effective_power_w: f64, carbon_g_per_kwh: f64, hours: f64) -> f64 {
    (effective_power_w / 1000.0) * carbon_g_per_kwh * hours / 1000.0
}

pub fn cost(hourly_price: f64, hours: f64) -> f64 {
    hourly_price * hours
}

/// Runtime-weighted carbon intensity over a resource's intervals.
///
/// Samples are matched to the hour they start. Hours the feed did not
/// cover use the mean of all samples. Returns `None` when there are no
/// samples at all; with samples but zero runtime, the mean is returned.
pub fn runtime_weighted_intensity(
    samples: &[CarbonSample],
    intervals: &[RuntimeInterval],
) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let mean = samples.iter().map(|s| s.intensity_g_per_kwh).sum::<f64>() / samples.len() as f64;
    let by_hour: HashMap<i64, f64> = samples
        .iter()
        .map(|s| {
            (
                s.timestamp.timestamp_millis().div_euclid(MS_PER_HOUR),
                s.intensity_g_per_kwh,
            )
        })
        .collect();

    let mut weighted = 0.0;
    let mut total_ms = 0i64;

    for interval in intervals {
        let start = interval.start.timestamp_millis();
        let end = interval.end.timestamp_millis();
        if end <= start {
            continue;
        }

        for hour in start.div_euclid(MS_PER_HOUR)..=(end - 1).div_euclid(MS_PER_HOUR) {
            let slot_start = (hour * MS_PER_HOUR).max(start);
            let slot_end = ((hour + 1) * MS_PER_HOUR).min(end);
            let overlap = slot_end - slot_start;
            let intensity = by_hour.get(&hour).copied().unwrap_or(mean);
            weighted += intensity * overlap as f64;
            total_ms += overlap;
        }
    }

    if total_ms == 0 {
        Some(mean)
    } else {
        Some(weighted / total_ms as f64)
    }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

pub fn round_currency(value: f64) -> f64 {
    round_to(value, 2)
}

pub fn round_co2(value: f64) -> f64 {
    round_to(value, 3)
}

/// Inputs to a footprint calculation, each with its provenance
#[derive(Debug, Clone, Copy)]
pub struct FootprintInputs {
    pub runtime_hours: Figure,
    pub utilization_pct: Figure,
    pub carbon_intensity_g_per_kwh: Figure,
    pub hourly_price: Figure,
}

/// Calculated figures for one resource
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub effective_power_w: Figure,
    pub energy_kwh: Figure,
    pub co2_kg: Figure,
    pub cost: Figure,
}

/// Combines runtime, utilization, power, carbon and price into figures
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerCarbonCalculator;

impl PowerCarbonCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Compute all figures for one resource.
    ///
    /// Provenance flows through: a defaulted input yields defaulted
    /// outputs, a missing input (or a missing power profile) yields
    /// unavailable outputs. Fails only when utilization or the power
    /// profile is out of range.
    pub fn compute(
        &self,
        profile: Option<&PowerProfile>,
        inputs: &FootprintInputs,
    ) -> Result<Footprint> {
        let utilization = inputs.utilization_pct;
        let effective_power_w = match (profile, utilization.value()) {
            (Some(profile), Some(pct)) => {
                let watts = effective_power(profile, pct)?;
                utilization.map(|_| watts)
            }
            (Some(_), None) => utilization,
            (None, _) => Figure::unavailable(ReasonCode::SourceUnavailable),
        };

        let energy = Figure::derive(&[effective_power_w, inputs.runtime_hours], |v| {
            energy_kwh(v[0], v[1])
        });
        let co2 = Figure::derive(
            &[
                effective_power_w,
                inputs.carbon_intensity_g_per_kwh,
                inputs.runtime_hours,
            ],
            |v| co2_kg(v[0], v[1], v[2]),
        );
        let cost_figure = Figure::derive(&[inputs.hourly_price, inputs.runtime_hours], |v| {
            cost(v[0], v[1])
        });

        Ok(Footprint {
            effective_power_w,
            energy_kwh: energy,
            co2_kg: co2,
            cost: cost_figure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn profile(avg: f64) -> PowerProfile {
        PowerProfile {
            resource_type: "m5.large".to_string(),
            min_watts: avg * 0.5,
            avg_watts: avg,
            max_watts: avg * 1.5,
        }
    }

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    fn sample(hour: i64, intensity: f64) -> CarbonSample {
        CarbonSample {
            region: "eu-west-1".to_string(),
            timestamp: at(hour),
            intensity_g_per_kwh: intensity,
        }
    }

    fn interval(start: DateTime<Utc>, end: DateTime<Utc>) -> RuntimeInterval {
        RuntimeInterval {
            resource_id: "i-1".to_string(),
            start,
            end,
        }
    }

    #[test]
    fn test_effective_power_bounds() {
        let p = profile(200.0);
        assert!((effective_power(&p, 0.0).unwrap() - 200.0 * IDLE_FRACTION).abs() < 1e-9);
        assert!((effective_power(&p, 100.0).unwrap() - 200.0).abs() < 1e-9);
        assert!((effective_power(&p, 50.0).unwrap() - 130.0).abs() < 1e-9);
    }

    #[test]
    fn test_effective_power_rejects_out_of_range() {
        let p = profile(200.0);
        assert!(matches!(effective_power(&p, -1.0), Err(EngineError::InvalidInput(_))));
        assert!(matches!(effective_power(&p, 100.5), Err(EngineError::InvalidInput(_))));
        assert!(matches!(effective_power(&p, f64::NAN), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_co2_and_cost() {
        // 100 W for 10 h at 400 g/kWh = 1 kWh * 400 g = 0.4 kg
        assert!((co2_kg(100.0, 400.0, 10.0) - 0.4).abs() < 1e-12);
        assert!((cost(0.096, 10.0) - 0.96).abs() < 1e-12);
        assert!((energy_kwh(100.0, 10.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_monotonic_in_hours() {
        let mut last_co2 = 0.0;
        let mut last_cost = 0.0;
        for step in 0..100 {
            let hours = step as f64 * 0.37;
            let c = co2_kg(130.0, 320.0, hours);
            let p = cost(0.192, hours);
            assert!(c >= last_co2);
            assert!(p >= last_cost);
            last_co2 = c;
            last_cost = p;
        }
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round_currency(1.005_1), 1.01);
        assert_eq!(round_currency(2.344), 2.34);
        assert_eq!(round_co2(0.123_46), 0.123);
        assert_eq!(round_to(7.0, 0), 7.0);
    }

    #[test]
    fn test_weighted_intensity_uses_matching_hours() {
        let samples = vec![sample(0, 100.0), sample(1, 300.0)];
        // Only runs during hour 1
        let intensity =
            runtime_weighted_intensity(&samples, &[interval(at(1), at(2))]).unwrap();
        assert!((intensity - 300.0).abs() < 1e-9);

        // Half an hour in each
        let half = Duration::minutes(30);
        let intensity =
            runtime_weighted_intensity(&samples, &[interval(at(0) + half, at(1) + half)]).unwrap();
        assert!((intensity - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_intensity_fills_gaps_with_mean() {
        let samples = vec![sample(0, 100.0), sample(1, 300.0)];
        let intensity =
            runtime_weighted_intensity(&samples, &[interval(at(5), at(6))]).unwrap();
        assert!((intensity - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_intensity_without_samples() {
        assert!(runtime_weighted_intensity(&[], &[interval(at(0), at(1))]).is_none());
        let mean = runtime_weighted_intensity(&[sample(0, 250.0)], &[]).unwrap();
        assert_eq!(mean, 250.0);
    }

    #[test]
    fn test_compute_propagates_provenance() {
        let p = profile(200.0);
        let calculator = PowerCarbonCalculator::new();
        let inputs = FootprintInputs {
            runtime_hours: Figure::measured(10.0),
            utilization_pct: Figure::defaulted(50.0),
            carbon_intensity_g_per_kwh: Figure::measured(400.0),
            hourly_price: Figure::measured(0.1),
        };

        let footprint = calculator.compute(Some(&p), &inputs).unwrap();
        assert_eq!(footprint.effective_power_w, Figure::defaulted(130.0));
        assert!(footprint.co2_kg.is_defaulted());
        assert!((footprint.co2_kg.value().unwrap() - 0.52).abs() < 1e-9);
        assert_eq!(footprint.cost, Figure::measured(1.0));
    }

    #[test]
    fn test_compute_missing_profile() {
        let calculator = PowerCarbonCalculator::new();
        let inputs = FootprintInputs {
            runtime_hours: Figure::measured(10.0),
            utilization_pct: Figure::measured(40.0),
            carbon_intensity_g_per_kwh: Figure::measured(400.0),
            hourly_price: Figure::measured(0.1),
        };

        let footprint = calculator.compute(None, &inputs).unwrap();
        assert!(footprint.co2_kg.is_unavailable());
        assert!(footprint.energy_kwh.is_unavailable());
        // Cost does not depend on the power profile
        assert_eq!(footprint.cost, Figure::measured(1.0));
    }

    #[test]
    fn test_compute_rejects_invalid_utilization() {
        let p = profile(200.0);
        let inputs = FootprintInputs {
            runtime_hours: Figure::measured(1.0),
            utilization_pct: Figure::measured(140.0),
            carbon_intensity_g_per_kwh: Figure::measured(400.0),
            hourly_price: Figure::measured(0.1),
        };
        assert!(PowerCarbonCalculator::new().compute(Some(&p), &inputs).is_err());
    }
}
