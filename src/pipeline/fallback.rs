//! Which localities to re-fetch individually, per fuel, within the fetch caps.

use super::assemble::RegionBatch;
use crate::config::ValidationPolicy;
use crate::models::Fuel;
use crate::validation::OutlierReport;

#[derive(Debug, Clone, PartialEq)]
pub struct RefetchPlan {
    pub fuel: Fuel,
    /// Normalized locality keys, highest priority first.
    pub keys: Vec<String>,
    /// Whole region re-fetched rather than only the bad localities.
    pub full: bool,
}

/// Missing or invalid localities before median outliers. Outliers are
/// targeted even below the rejection gate. `known` is already ordered
/// seeded-first, so each group keeps that order.
pub fn prioritized_targets(fuel: Fuel, batch: &RegionBatch, report: &OutlierReport) -> Vec<String> {
    let mut keys: Vec<String> = batch.missing(fuel).map(|l| l.key.clone()).collect();
    keys.extend(
        batch
            .known
            .iter()
            .filter(|l| report.suspects.contains(&l.key) && !keys.contains(&l.key))
            .map(|l| l.key.clone())
            .collect::<Vec<_>>(),
    );
    keys
}

/// Whether `fuel` needs any individual page fetches at all.
pub fn needs_refetch(fuel: Fuel, batch: &RegionBatch, report: &OutlierReport, policy: &ValidationPolicy) -> bool {
    !batch.is_empty() && (report.low_coverage(policy) || !prioritized_targets(fuel, batch, report).is_empty())
}

/// Localities whose listing value gets compared against their detail page.
/// Only gas fuels are cross-checked.
pub fn cross_check_keys(fuel: Fuel, batch: &RegionBatch, policy: &ValidationPolicy) -> Vec<String> {
    if !fuel.is_gas() {
        return Vec::new();
    }
    batch
        .known
        .iter()
        .filter(|l| l.slug.is_some() && batch.price(fuel, &l.key).is_some())
        .take(policy.cross_check_sample)
        .map(|l| l.key.clone())
        .collect()
}

/// Low coverage or a failed cross-check escalates to a full re-fetch.
pub fn plan_refetch(
    fuel: Fuel,
    batch: &RegionBatch,
    report: &OutlierReport,
    mismatch: bool,
    policy: &ValidationPolicy,
) -> RefetchPlan {
    let full = report.low_coverage(policy) || mismatch;
    let keys = if full {
        batch
            .known
            .iter()
            .take(policy.max_full_fetches)
            .map(|l| l.key.clone())
            .collect()
    } else {
        let mut targets = prioritized_targets(fuel, batch, report);
        targets.truncate(policy.max_targeted_fetches);
        targets
    };
    RefetchPlan { fuel, keys, full }
}

/// Trim plans, in order, to `budget` detail fetches for the whole region.
/// Returns how many planned fetches were dropped.
pub fn apply_region_budget(plans: &mut [RefetchPlan], budget: usize) -> usize {
    let mut remaining = budget;
    let mut dropped = 0;
    for plan in plans.iter_mut() {
        let keep = plan.keys.len().min(remaining);
        dropped += plan.keys.len() - keep;
        plan.keys.truncate(keep);
        remaining -= keep;
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PriceMap, SeedLocality, TableEntry};
    use std::collections::BTreeMap;

    fn petrol_batch(prices: &[(&str, f64)], seeds: &[&str]) -> RegionBatch {
        let map: PriceMap = prices
            .iter()
            .map(|(k, p)| {
                (
                    k.to_string(),
                    TableEntry {
                        display_name: k.to_string(),
                        price: *p,
                        slug: None,
                    },
                )
            })
            .collect();
        let seeds: Vec<SeedLocality> = seeds
            .iter()
            .map(|s| SeedLocality {
                region: "KA".into(),
                name: s.to_string(),
                slug: s.to_string(),
            })
            .collect();
        RegionBatch::new("KA", BTreeMap::from([(Fuel::Petrol, map)]), &BTreeMap::new(), seeds.iter())
    }

    fn clustered(n: usize) -> Vec<(String, f64)> {
        (0..n).map(|i| (format!("town {i:02}"), 100.0 + (i % 3) as f64)).collect()
    }

    #[test]
    fn test_missing_before_outliers_seeded_first() {
        let mut rows = clustered(12);
        rows.push(("spiky".into(), 200.0));
        rows.push(("broken".into(), 1.0));
        let refs: Vec<(&str, f64)> = rows.iter().map(|(k, p)| (k.as_str(), *p)).collect();
        let batch = petrol_batch(&refs, &["zeta"]);
        let policy = ValidationPolicy::default();
        let report = batch.report(Fuel::Petrol, &policy);
        assert!(report.applied);

        let targets = prioritized_targets(Fuel::Petrol, &batch, &report);
        assert_eq!(targets, vec!["zeta", "broken", "spiky"]);

        let plan = plan_refetch(Fuel::Petrol, &batch, &report, false, &policy);
        assert!(!plan.full);
        assert_eq!(plan.keys, targets);
    }

    #[test]
    fn test_outliers_targeted_below_sample_gate() {
        let batch = petrol_batch(&[("a", 100.0), ("b", 101.0), ("c", 300.0)], &[]);
        let policy = ValidationPolicy::default();
        let report = batch.report(Fuel::Petrol, &policy);
        assert!(!report.applied);
        assert_eq!(prioritized_targets(Fuel::Petrol, &batch, &report), vec!["c"]);
        assert!(needs_refetch(Fuel::Petrol, &batch, &report, &policy));

        let plan = plan_refetch(Fuel::Petrol, &batch, &report, false, &policy);
        assert!(!plan.full);
        assert_eq!(plan.keys, vec!["c"]);
    }

    #[test]
    fn test_region_budget_spans_fuels() {
        let plan = |fuel, n: usize| RefetchPlan {
            fuel,
            keys: (0..n).map(|i| format!("town {i}")).collect(),
            full: true,
        };
        let mut plans = vec![plan(Fuel::Diesel, 4), plan(Fuel::Lpg, 5), plan(Fuel::Cng, 3)];
        assert_eq!(apply_region_budget(&mut plans, 7), 5);
        let kept: Vec<usize> = plans.iter().map(|p| p.keys.len()).collect();
        assert_eq!(kept, vec![4, 3, 0]);

        assert_eq!(apply_region_budget(&mut plans, 100), 0);
    }

    #[test]
    fn test_caps() {
        let policy = ValidationPolicy {
            max_targeted_fetches: 3,
            max_full_fetches: 5,
            ..ValidationPolicy::default()
        };
        let names: Vec<String> = (0..8).map(|i| format!("seed {i}")).collect();
        let seeds: Vec<&str> = names.iter().map(String::as_str).collect();
        let batch = petrol_batch(&[("only", 100.0)], &seeds);
        let report = batch.report(Fuel::Petrol, &policy);

        let targeted = plan_refetch(Fuel::Petrol, &batch, &report, false, &ValidationPolicy { min_coverage: 0.0, ..policy.clone() });
        assert!(!targeted.full);
        assert_eq!(targeted.keys.len(), 3);

        let full = plan_refetch(Fuel::Petrol, &batch, &report, false, &policy);
        assert!(full.full);
        assert_eq!(full.keys.len(), 5);
    }

    #[test]
    fn test_mismatch_forces_full() {
        let batch = petrol_batch(&[("a", 100.0), ("b", 101.0)], &[]);
        let policy = ValidationPolicy::default();
        let report = batch.report(Fuel::Petrol, &policy);
        let plan = plan_refetch(Fuel::Petrol, &batch, &report, true, &policy);
        assert!(plan.full);
        assert_eq!(plan.keys, vec!["a", "b"]);
        assert!(cross_check_keys(Fuel::Petrol, &batch, &policy).len() <= policy.cross_check_sample);
    }
}
