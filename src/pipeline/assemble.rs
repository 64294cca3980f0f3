//! Per-region working set and snapshot assembly.

use crate::config::ValidationPolicy;
use crate::models::{DailySnapshot, Fuel, FuelPrices, KnownLocality, PriceMap, SeedLocality, TableEntry};
use crate::scraper::parsers::{normalize_key, slugify};
use crate::validation::{classify_outliers, is_suspect, validate, OutlierReport};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Everything known about one region's localities during a run.
#[derive(Debug, Clone)]
pub struct RegionBatch {
    pub region: String,
    /// Seeded localities first, then the ones found only in tables.
    pub known: Vec<KnownLocality>,
    maps: BTreeMap<Fuel, PriceMap>,
    index: HashMap<String, usize>,
}

impl RegionBatch {
    /// Localities come from the petrol table (or every table when petrol is
    /// empty) plus the region's seed list.
    pub fn new<'a>(
        region: &str,
        maps: BTreeMap<Fuel, PriceMap>,
        link_slugs: &BTreeMap<String, String>,
        seeds: impl IntoIterator<Item = &'a SeedLocality>,
    ) -> Self {
        let mut batch = Self {
            region: region.to_string(),
            known: Vec::new(),
            maps,
            index: HashMap::new(),
        };

        for seed in seeds {
            let key = normalize_key(&seed.name);
            if key.is_empty() || batch.index.contains_key(&key) {
                continue;
            }
            let name = batch.table_name(&key).unwrap_or_else(|| seed.name.clone());
            let slug = batch
                .table_slug(&key, link_slugs)
                .or_else(|| Some(seed.slug.clone()));
            batch.push(KnownLocality {
                key,
                name,
                slug,
                seeded: true,
            });
        }

        for key in batch.table_keys() {
            if batch.index.contains_key(&key) {
                continue;
            }
            let name = batch.table_name(&key).unwrap_or_else(|| key.clone());
            let slug = batch
                .table_slug(&key, link_slugs)
                .or_else(|| slugify(&name));
            batch.push(KnownLocality {
                key,
                name,
                slug,
                seeded: false,
            });
        }

        batch
    }

    fn push(&mut self, locality: KnownLocality) {
        self.index.insert(locality.key.clone(), self.known.len());
        self.known.push(locality);
    }

    fn table_keys(&self) -> Vec<String> {
        match self.maps.get(&Fuel::Petrol) {
            Some(petrol) if !petrol.is_empty() => petrol.keys().cloned().collect(),
            _ => {
                let mut keys: Vec<String> = self.maps.values().flat_map(|m| m.keys().cloned()).collect();
                keys.sort();
                keys.dedup();
                keys
            }
        }
    }

    fn table_name(&self, key: &str) -> Option<String> {
        Fuel::ALL
            .iter()
            .find_map(|f| self.maps.get(f)?.get(key))
            .map(|e| e.display_name.clone())
    }

    fn table_slug(&self, key: &str, link_slugs: &BTreeMap<String, String>) -> Option<String> {
        self.maps
            .get(&Fuel::Petrol)
            .and_then(|m| m.get(key))
            .and_then(|e| e.slug.clone())
            .or_else(|| link_slugs.get(key).cloned())
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn locality(&self, key: &str) -> Option<&KnownLocality> {
        self.index.get(key).map(|i| &self.known[*i])
    }

    /// Range-valid price for a known locality.
    pub fn price(&self, fuel: Fuel, key: &str) -> Option<f64> {
        validate(fuel, self.maps.get(&fuel)?.get(key).map(|e| e.price))
    }

    pub fn set_price(&mut self, fuel: Fuel, key: &str, price: f64) {
        let Some(loc) = self.locality(key).cloned() else { return };
        self.maps.entry(fuel).or_default().insert(
            key.to_string(),
            TableEntry {
                display_name: loc.name,
                price,
                slug: loc.slug,
            },
        );
    }

    /// Replace listing values with valid ones from a supplemental table.
    pub fn apply_override(&mut self, fuel: Fuel, table: &PriceMap) -> usize {
        let keys: Vec<String> = self.known.iter().map(|l| l.key.clone()).collect();
        let mut applied = 0;
        for key in keys {
            if let Some(price) = table.get(&key).and_then(|e| validate(fuel, Some(e.price))) {
                self.set_price(fuel, &key, price);
                applied += 1;
            }
        }
        applied
    }

    /// Keys of known localities without a valid price for `fuel`.
    pub fn missing(&self, fuel: Fuel) -> impl Iterator<Item = &KnownLocality> {
        self.known.iter().filter(move |l| self.price(fuel, &l.key).is_none())
    }

    pub fn report(&self, fuel: Fuel, policy: &ValidationPolicy) -> OutlierReport {
        let observations: Vec<(&str, f64)> = self
            .known
            .iter()
            .filter_map(|l| Some((l.key.as_str(), self.price(fuel, &l.key)?)))
            .collect();
        classify_outliers(fuel, observations, self.known.len(), policy)
    }
}

/// Inputs for turning a finished batch into snapshots.
pub struct Assembly<'a> {
    pub date: NaiveDate,
    pub reports: &'a BTreeMap<Fuel, OutlierReport>,
    pub backfill: &'a BTreeMap<Fuel, BTreeMap<String, f64>>,
    pub unavailable: &'a [Fuel],
    pub policy: &'a ValidationPolicy,
}

impl Assembly<'_> {
    fn final_price(&self, batch: &RegionBatch, fuel: Fuel, key: &str) -> Option<f64> {
        if self.unavailable.contains(&fuel) {
            return None;
        }
        let price = batch
            .price(fuel, key)
            .or_else(|| validate(fuel, self.backfill.get(&fuel)?.get(key).copied()))?;

        match self.reports.get(&fuel) {
            Some(report) if report.applied && is_suspect(fuel, price, report.median, self.policy) => None,
            _ => Some(price),
        }
    }

    /// One snapshot per known locality; all-empty ones are dropped.
    pub fn snapshots(&self, batch: &RegionBatch) -> Vec<DailySnapshot> {
        batch
            .known
            .iter()
            .filter_map(|loc| {
                let mut prices = FuelPrices::default();
                for fuel in Fuel::ALL {
                    prices.set(fuel, self.final_price(batch, fuel, &loc.key));
                }
                (!prices.is_empty()).then(|| DailySnapshot {
                    region: batch.region.clone(),
                    locality: loc.name.clone(),
                    date: self.date,
                    prices,
                })
            })
            .collect()
    }
}
