//! Plausibility ranges and population-level outlier rejection.
//!
//! Range checks are absolute: a price outside its fuel's band is discarded,
//! never clamped. The median test is relative to one region's observations
//! for one fuel and only bites once the population is large enough to trust.

use crate::config::ValidationPolicy;
use crate::models::{Fuel, FuelPriceObservation};
use std::collections::BTreeSet;

/// Weight of a domestic LPG cylinder in kilograms.
pub const CYLINDER_KG: f64 = 14.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        price.is_finite() && price >= self.min && price <= self.max
    }
}

pub fn expected_range(fuel: Fuel) -> PriceRange {
    match fuel {
        Fuel::Lpg => PriceRange { min: 100.0, max: 2500.0 },
        Fuel::Cng => PriceRange { min: 10.0, max: 300.0 },
        Fuel::Petrol | Fuel::Diesel => PriceRange { min: 30.0, max: 300.0 },
    }
}

/// `Some(price)` when the price is plausible for the fuel, otherwise `None`.
pub fn validate(fuel: Fuel, price: Option<f64>) -> Option<f64> {
    price.filter(|p| expected_range(fuel).contains(*p))
}

/// Range-checked price of one extracted observation.
pub fn accept_observation(observation: Option<FuelPriceObservation>) -> Option<f64> {
    observation.and_then(|o| validate(o.fuel, Some(o.price)))
}

pub fn price_to_kg(cylinder_price: f64) -> f64 {
    cylinder_price / CYLINDER_KG
}

pub fn price_from_kg(per_kg: f64) -> f64 {
    per_kg * CYLINDER_KG
}

/// Converts an LPG per-kg quote into a cylinder price when that is plausible.
pub fn cylinder_from_kg_quote(fuel: Fuel, price: f64) -> Option<f64> {
    if fuel != Fuel::Lpg || price >= expected_range(Fuel::Lpg).min {
        return None;
    }
    let converted = price_from_kg(price);
    expected_range(Fuel::Lpg)
        .contains(converted)
        .then_some(converted)
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut xs: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if xs.is_empty() {
        return None;
    }
    xs.sort_by(f64::total_cmp);
    let mid = xs.len() / 2;
    if xs.len() % 2 == 1 {
        Some(xs[mid])
    } else {
        Some((xs[mid - 1] + xs[mid]) / 2.0)
    }
}

/// Relative deviation from the median above which a price is suspect.
pub fn deviation_threshold(fuel: Fuel, policy: &ValidationPolicy) -> f64 {
    match fuel {
        Fuel::Lpg => policy.lpg_deviation,
        Fuel::Cng => policy.cng_deviation,
        Fuel::Petrol | Fuel::Diesel => policy.litre_deviation,
    }
}

/// Relative difference between a listing value and a detail page that marks
/// the listing as untrustworthy. Litre fuels are not cross-checked.
pub fn mismatch_threshold(fuel: Fuel, policy: &ValidationPolicy) -> Option<f64> {
    match fuel {
        Fuel::Lpg => Some(policy.lpg_mismatch),
        Fuel::Cng => Some(policy.cng_mismatch),
        Fuel::Petrol | Fuel::Diesel => None,
    }
}

pub fn is_suspect(fuel: Fuel, price: f64, median: Option<f64>, policy: &ValidationPolicy) -> bool {
    let Some(med) = median else { return false };
    if !price.is_finite() || !med.is_finite() || med <= 0.0 {
        return false;
    }
    (price - med).abs() / med > deviation_threshold(fuel, policy)
}

pub fn relative_difference(a: f64, b: f64) -> f64 {
    let denom = a.max(b);
    if denom <= 0.0 { 0.0 } else { (a - b).abs() / denom }
}

/// Population statistics for one fuel across one region.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierReport {
    pub median: Option<f64>,
    pub valid_count: usize,
    pub coverage: f64,
    /// Whether the sample is large enough for suspects to be rejected.
    pub applied: bool,
    /// Keys deviating too far from the median, whether or not `applied`.
    pub suspects: BTreeSet<String>,
}

impl OutlierReport {
    pub fn low_coverage(&self, policy: &ValidationPolicy) -> bool {
        self.coverage < policy.min_coverage
    }
}

/// Computes the median over range-valid prices and flags the ones that
/// deviate too far. Rejection is gated on sample size and coverage of
/// `known_localities`; flagging is not.
pub fn classify_outliers<'a, I>(
    fuel: Fuel,
    observations: I,
    known_localities: usize,
    policy: &ValidationPolicy,
) -> OutlierReport
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let valid: Vec<(&str, f64)> = observations
        .into_iter()
        .filter(|(_, p)| expected_range(fuel).contains(*p))
        .collect();

    let prices: Vec<f64> = valid.iter().map(|(_, p)| *p).collect();
    let med = median(&prices);
    let coverage = if known_localities == 0 {
        0.0
    } else {
        valid.len() as f64 / known_localities as f64
    };
    let applied = valid.len() >= policy.min_sample && coverage >= policy.min_coverage;

    let suspects = valid
        .iter()
        .filter(|(_, p)| is_suspect(fuel, *p, med, policy))
        .map(|(k, _)| k.to_string())
        .collect();

    OutlierReport {
        median: med,
        valid_count: valid.len(),
        coverage,
        applied,
        suspects,
    }
}
