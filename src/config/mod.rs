use crate::models::Fuel;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub validation: ValidationPolicy,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// Max snapshots per upsert batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// A secondary region-wide table whose prices win over the listing page.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SupplementalTable {
    pub region: String,
    pub fuel: Fuel,
    /// Path relative to `scraper.base_url`, or an absolute URL.
    pub path: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Regions (or seed localities) processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Parallel detail-page fetches inside one region's fallback pass.
    #[serde(default = "default_fallback_concurrency")]
    pub fallback_concurrency: usize,

    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,

    /// CSV of `region,name,slug` rows.
    #[serde(default = "default_seed_path")]
    pub seed_path: PathBuf,

    /// Regions per hourly shard when `update --shard` is used.
    #[serde(default = "default_shard_size")]
    pub shard_size: usize,

    /// Offset of the regions' civil calendar from UTC.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,

    /// Fuels never sold in a region; always stored as absent.
    #[serde(default = "default_unavailable_fuels")]
    pub unavailable_fuels: BTreeMap<String, Vec<Fuel>>,

    #[serde(default = "default_supplemental_tables")]
    pub supplemental_tables: Vec<SupplementalTable>,
}

/// Thresholds for range checks, outlier rejection and fallback budgets.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ValidationPolicy {
    /// Valid observations required before median outliers are rejected.
    #[serde(default = "default_min_sample")]
    pub min_sample: usize,

    /// Fraction of known localities a fuel must cover.
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,

    #[serde(default = "default_litre_deviation")]
    pub litre_deviation: f64,
    #[serde(default = "default_lpg_deviation")]
    pub lpg_deviation: f64,
    #[serde(default = "default_cng_deviation")]
    pub cng_deviation: f64,

    #[serde(default = "default_cross_check_sample")]
    pub cross_check_sample: usize,
    #[serde(default = "default_lpg_mismatch")]
    pub lpg_mismatch: f64,
    #[serde(default = "default_cng_mismatch")]
    pub cng_mismatch: f64,

    #[serde(default = "default_max_targeted_fetches")]
    pub max_targeted_fetches: usize,
    #[serde(default = "default_max_full_fetches")]
    pub max_full_fetches: usize,
    /// Detail fetches per region per run, across all fuels.
    #[serde(default = "default_max_region_fetches")]
    pub max_region_fetches: usize,

    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.goodreturns.in".to_string()
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_request_delay_ms() -> u64 {
    150
}
fn default_jitter_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    2
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
        .to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/fuel.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    500
}
fn default_concurrency() -> usize {
    3
}
fn default_fallback_concurrency() -> usize {
    2
}
fn default_inter_batch_delay_ms() -> u64 {
    300
}
fn default_seed_path() -> PathBuf {
    PathBuf::from("config/seed_localities.csv")
}
fn default_shard_size() -> usize {
    2
}
fn default_utc_offset_minutes() -> i32 {
    330
}
fn default_unavailable_fuels() -> BTreeMap<String, Vec<Fuel>> {
    BTreeMap::from([("LD".to_string(), vec![Fuel::Lpg, Fuel::Cng])])
}
fn default_supplemental_tables() -> Vec<SupplementalTable> {
    vec![
        SupplementalTable {
            region: "KL".to_string(),
            fuel: Fuel::Lpg,
            path: "lpg-price-in-kerala-s18.html".to_string(),
        },
        SupplementalTable {
            region: "KL".to_string(),
            fuel: Fuel::Cng,
            path: "cng-price-in-kerala-s18.html".to_string(),
        },
    ]
}
fn default_min_sample() -> usize {
    10
}
fn default_min_coverage() -> f64 {
    0.25
}
fn default_litre_deviation() -> f64 {
    0.25
}
fn default_lpg_deviation() -> f64 {
    0.35
}
fn default_cng_deviation() -> f64 {
    0.5
}
fn default_cross_check_sample() -> usize {
    2
}
fn default_lpg_mismatch() -> f64 {
    0.25
}
fn default_cng_mismatch() -> f64 {
    0.35
}
fn default_max_targeted_fetches() -> usize {
    25
}
fn default_max_full_fetches() -> usize {
    80
}
fn default_max_region_fetches() -> usize {
    120
}
fn default_lookback_days() -> u32 {
    120
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
            batch_size: default_batch_size(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fallback_concurrency: default_fallback_concurrency(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            seed_path: default_seed_path(),
            shard_size: default_shard_size(),
            utc_offset_minutes: default_utc_offset_minutes(),
            unavailable_fuels: default_unavailable_fuels(),
            supplemental_tables: default_supplemental_tables(),
        }
    }
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_sample: default_min_sample(),
            min_coverage: default_min_coverage(),
            litre_deviation: default_litre_deviation(),
            lpg_deviation: default_lpg_deviation(),
            cng_deviation: default_cng_deviation(),
            cross_check_sample: default_cross_check_sample(),
            lpg_mismatch: default_lpg_mismatch(),
            cng_mismatch: default_cng_mismatch(),
            max_targeted_fetches: default_max_targeted_fetches(),
            max_full_fetches: default_max_full_fetches(),
            max_region_fetches: default_max_region_fetches(),
            lookback_days: default_lookback_days(),
        }
    }
}

impl PipelineConfig {
    pub fn is_unavailable(&self, region: &str, fuel: Fuel) -> bool {
        self.unavailable_fuels
            .iter()
            .any(|(code, fuels)| code.eq_ignore_ascii_case(region) && fuels.contains(&fuel))
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("FUEL").separator("__"))
            .build()?;

        let app_cfg = match cfg.try_deserialize::<AppConfig>() {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid configuration ({}), falling back to defaults", e);
                AppConfig::default()
            }
        };
        Ok(app_cfg)
    }
}
