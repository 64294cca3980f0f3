use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Fuel ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fuel {
    Petrol,
    Diesel,
    Lpg,
    Cng,
}

/// How a fuel is quoted on the source pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceUnit {
    PerLitre,
    /// 14.2 kg domestic cylinder
    PerCylinder,
    PerKg,
}

impl Fuel {
    pub const ALL: [Fuel; 4] = [Fuel::Petrol, Fuel::Diesel, Fuel::Lpg, Fuel::Cng];

    /// Lowercase name, also the URL prefix on the source site.
    pub fn as_str(self) -> &'static str {
        match self {
            Fuel::Petrol => "petrol",
            Fuel::Diesel => "diesel",
            Fuel::Lpg => "lpg",
            Fuel::Cng => "cng",
        }
    }

    pub fn unit(self) -> PriceUnit {
        match self {
            Fuel::Petrol | Fuel::Diesel => PriceUnit::PerLitre,
            Fuel::Lpg => PriceUnit::PerCylinder,
            Fuel::Cng => PriceUnit::PerKg,
        }
    }

    /// Gas fuels are priced by mass and vary more between localities.
    pub fn is_gas(self) -> bool {
        matches!(self, Fuel::Lpg | Fuel::Cng)
    }

    /// Snapshot table column holding this fuel's price.
    pub fn column(self) -> &'static str {
        match self {
            Fuel::Petrol => "petrol_price",
            Fuel::Diesel => "diesel_price",
            Fuel::Lpg => "lpg_price",
            Fuel::Cng => "cng_price",
        }
    }
}

impl fmt::Display for Fuel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Regions & localities ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Region {
    pub code: String,
    pub display_name: String,
}

/// A region found on the index page, with its petrol listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionListing {
    pub code: String,
    pub display_name: String,
    pub listing_url: String,
}

impl RegionListing {
    pub fn region(&self) -> Region {
        Region {
            code: self.code.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Hand-curated locality with a known detail-page slug.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedLocality {
    pub region: String,
    pub name: String,
    pub slug: String,
}

/// One locality the region pass knows about, from a listing table or the seed list.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownLocality {
    pub key: String,
    pub name: String,
    pub slug: Option<String>,
    pub seeded: bool,
}

// ── Extraction results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    pub display_name: String,
    pub price: f64,
    pub slug: Option<String>,
}

/// Normalized locality key → entry, for one fuel in one region.
pub type PriceMap = BTreeMap<String, TableEntry>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuelPriceObservation {
    pub fuel: Fuel,
    pub price: f64,
    pub source_updated_on: Option<NaiveDate>,
}

/// Outcome of reading one locality's detail page.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalityPrice {
    pub price: Option<f64>,
    pub source_updated_on: Option<NaiveDate>,
}

impl LocalityPrice {
    pub fn observation(&self, fuel: Fuel) -> Option<FuelPriceObservation> {
        self.price.map(|price| FuelPriceObservation {
            fuel,
            price,
            source_updated_on: self.source_updated_on,
        })
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FuelPrices {
    pub petrol: Option<f64>,
    pub diesel: Option<f64>,
    pub lpg: Option<f64>,
    pub cng: Option<f64>,
}

impl FuelPrices {
    pub fn get(&self, fuel: Fuel) -> Option<f64> {
        match fuel {
            Fuel::Petrol => self.petrol,
            Fuel::Diesel => self.diesel,
            Fuel::Lpg => self.lpg,
            Fuel::Cng => self.cng,
        }
    }

    pub fn set(&mut self, fuel: Fuel, price: Option<f64>) {
        match fuel {
            Fuel::Petrol => self.petrol = price,
            Fuel::Diesel => self.diesel = price,
            Fuel::Lpg => self.lpg = price,
            Fuel::Cng => self.cng = price,
        }
    }

    pub fn is_empty(&self) -> bool {
        Fuel::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub region: String,
    pub locality: String,
    pub date: NaiveDate,
    pub prices: FuelPrices,
}

// ── Lookup ────────────────────────────────────────────────────────────────────

/// Result of matching a free-text locality name against the latest snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalityLookup {
    Resolved {
        snapshot: DailySnapshot,
    },
    Ambiguous {
        candidates: Vec<DailySnapshot>,
    },
    NotFound,
}

// ── Run summaries ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    pub reason: String,
}

impl RunError {
    pub fn region(region: &str, reason: impl Into<String>) -> Self {
        Self {
            region: Some(region.to_string()),
            locality: None,
            reason: reason.into(),
        }
    }

    pub fn locality(region: &str, locality: &str, reason: impl Into<String>) -> Self {
        Self {
            region: Some(region.to_string()),
            locality: Some(locality.to_string()),
            reason: reason.into(),
        }
    }

    pub fn global(reason: impl Into<String>) -> Self {
        Self {
            region: None,
            locality: None,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub regions_processed: usize,
    pub localities: usize,
    pub fetched: usize,
    /// Detail pages read by the re-fetch fallback, cross-checks excluded.
    pub detail_fetches: usize,
    pub upserts: usize,
    /// Set when discovery failed and the seed list was scraped instead.
    pub degraded_to_seed_list: bool,
    pub errors: Vec<RunError>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedRunSummary {
    pub fetched: usize,
    pub upserts: usize,
    pub errors: Vec<RunError>,
}
