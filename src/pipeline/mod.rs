//! Pipeline orchestrator: ties scraper → validation → storage together.
//!
//! ## Run modes
//!
//! `scrape_and_upsert_all_regions()`: full run.
//!   1. Discover regions from the petrol index (optionally only some codes)
//!   2. Per region, in parallel: read the four listing tables, check coverage
//!      and outliers, re-fetch bad localities individually, backfill from
//!      history, then replace the region's snapshots for today
//!   Idempotent: re-running the same day converges on the same rows.
//!
//! `scrape_and_upsert_seed_list()`: reads only the detail pages of the curated
//!   seed localities. Cheaper and narrower; also the fallback when discovery fails.

pub mod assemble;
pub mod fallback;

use crate::config::{AppConfig, PipelineConfig, ValidationPolicy};
use crate::loader::SeedList;
use crate::models::{
    DailySnapshot, Fuel, FuelPrices, LocalityPrice, PriceMap, Region, RegionListing, RunError, RunSummary,
    SeedLocality, SeedRunSummary,
};
use crate::scraper::discovery::region_codes;
use crate::scraper::parsers::normalize_key;
use crate::scraper::{FuelSource, HttpClient};
use crate::storage::SnapshotStore;
use crate::utils::region_today;
use crate::validation::{accept_observation, mismatch_threshold, relative_difference, validate};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use self::assemble::{Assembly, RegionBatch};
use self::fallback::RefetchPlan;

type SupplementalTables = BTreeMap<(String, Fuel), PriceMap>;

#[derive(Clone)]
pub struct Pipeline {
    source: FuelSource,
    store: Arc<dyn SnapshotStore>,
    seeds: Arc<SeedList>,
    settings: Arc<PipelineConfig>,
    policy: Arc<ValidationPolicy>,
    batch_size: usize,
    run_date: Option<NaiveDate>,
}

#[derive(Debug, Default)]
struct RegionOutcome {
    localities: usize,
    fetched: usize,
    detail_fetches: usize,
    upserts: usize,
    errors: Vec<RunError>,
}

/// One (locality, fuel) detail page to read.
struct DetailTask {
    fuel: Fuel,
    key: String,
    name: String,
    slug: String,
}

impl Pipeline {
    pub fn new(source: FuelSource, store: Arc<dyn SnapshotStore>, seeds: SeedList, config: &AppConfig) -> Self {
        Self {
            source,
            store,
            seeds: Arc::new(seeds),
            settings: Arc::new(config.pipeline.clone()),
            policy: Arc::new(config.validation.clone()),
            batch_size: config.storage.batch_size,
            run_date: None,
        }
    }

    /// Live HTTP source and the seed list from disk.
    pub fn from_config(config: &AppConfig, store: Arc<dyn SnapshotStore>) -> Result<Self> {
        let client = HttpClient::new(&config.scraper).context("Failed to build HTTP client")?;
        let source = FuelSource::new(Arc::new(client), &config.scraper.base_url);
        let seeds = SeedList::load(&config.pipeline.seed_path)?;
        Ok(Self::new(source, store, seeds, config))
    }

    /// Pin the snapshot date instead of using the region's current day.
    pub fn with_run_date(mut self, date: NaiveDate) -> Self {
        self.run_date = Some(date);
        self
    }

    fn today(&self) -> NaiveDate {
        self.run_date
            .unwrap_or_else(|| region_today(self.settings.utc_offset_minutes))
    }

    fn unavailable_fuels(&self, region: &str) -> Vec<Fuel> {
        Fuel::ALL
            .into_iter()
            .filter(|f| self.settings.is_unavailable(region, *f))
            .collect()
    }

    /// Best effort: an unreachable index yields no codes.
    pub async fn discover_region_codes(&self) -> Vec<String> {
        match self.source.discover_regions().await {
            Ok(regions) => region_codes(&regions),
            Err(e) => {
                warn!("Region discovery failed: {}", e);
                Vec::new()
            }
        }
    }

    // ── Full run ──────────────────────────────────────────────────────────────

    pub async fn scrape_and_upsert_all_regions(
        &self,
        concurrency: usize,
        inter_batch_delay: Duration,
        only_codes: Option<&[String]>,
    ) -> RunSummary {
        let discovered = match self.source.discover_regions().await {
            Ok(regions) if !regions.is_empty() => regions,
            Ok(_) => {
                return self
                    .degrade("region index listed no regions", concurrency, inter_batch_delay)
                    .await;
            }
            Err(e) => {
                let reason = format!("region discovery unavailable: {e}");
                return self.degrade(&reason, concurrency, inter_batch_delay).await;
            }
        };

        let filter: BTreeSet<String> = only_codes
            .unwrap_or_default()
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| c.len() == 2 && c.chars().all(|ch| ch.is_ascii_uppercase()))
            .collect();

        let mut seen = BTreeSet::new();
        let selected: Vec<RegionListing> = discovered
            .into_iter()
            .filter(|r| filter.is_empty() || filter.contains(&r.code))
            .filter(|r| seen.insert(r.code.clone()))
            .collect();

        let mut summary = RunSummary {
            regions_processed: selected.len(),
            ..RunSummary::default()
        };
        if selected.is_empty() {
            info!("No regions selected; nothing to do");
            return summary;
        }

        let regions: Vec<Region> = selected.iter().map(RegionListing::region).collect();
        if let Err(e) = self.store.upsert_regions(&regions) {
            summary.errors.push(RunError::global(format!("upsert regions: {e:#}")));
        }

        info!("=== Scraping {} regions (concurrency {}) ===", selected.len(), concurrency);
        let sem = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::new();

        for listing in selected {
            let pipeline = self.clone();
            let sem = Arc::clone(&sem);
            let code = listing.code.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await?;
                let outcome = pipeline.process_region(&listing).await;
                if !inter_batch_delay.is_zero() {
                    sleep(inter_batch_delay).await;
                }
                Ok::<RegionOutcome, anyhow::Error>(outcome)
            });

            handles.push((code, handle));
        }

        for (code, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => {
                    summary.localities += outcome.localities;
                    summary.fetched += outcome.fetched;
                    summary.detail_fetches += outcome.detail_fetches;
                    summary.upserts += outcome.upserts;
                    summary.errors.extend(outcome.errors);
                }
                Ok(Err(e)) => {
                    warn!("{}: {:#}", code, e);
                    summary.errors.push(RunError::region(&code, format!("{e:#}")));
                }
                Err(e) => {
                    error!("Task panic for {}: {}", code, e);
                    summary.errors.push(RunError::region(&code, format!("task failed: {e}")));
                }
            }
        }

        info!(
            "=== Done: {} regions | {} localities | {} detail fetches | {} upserts | {} errors ===",
            summary.regions_processed,
            summary.localities,
            summary.detail_fetches,
            summary.upserts,
            summary.errors.len()
        );
        summary
    }

    async fn degrade(&self, reason: &str, concurrency: usize, inter_batch_delay: Duration) -> RunSummary {
        warn!("{}; falling back to the seed list", reason);
        let seed = self.scrape_and_upsert_seed_list(concurrency, inter_batch_delay).await;
        let mut errors = vec![RunError::global(reason)];
        errors.extend(seed.errors);
        RunSummary {
            regions_processed: self.seeds.regions().len(),
            localities: self.seeds.len(),
            fetched: seed.fetched,
            detail_fetches: 0,
            upserts: seed.upserts,
            degraded_to_seed_list: true,
            errors,
        }
    }

    async fn process_region(&self, listing: &RegionListing) -> RegionOutcome {
        let code = listing.code.as_str();
        let today = self.today();
        let mut errors = Vec::new();
        debug!("{}: fetching listings for {}", code, listing.display_name);

        let (petrol, diesel, lpg, cng) = tokio::join!(
            self.source.fetch_listing(listing, Fuel::Petrol),
            self.source.fetch_listing(listing, Fuel::Diesel),
            self.source.fetch_listing(listing, Fuel::Lpg),
            self.source.fetch_listing(listing, Fuel::Cng),
        );

        let mut maps = BTreeMap::new();
        let mut link_slugs = BTreeMap::new();
        for (fuel, result) in [
            (Fuel::Petrol, petrol),
            (Fuel::Diesel, diesel),
            (Fuel::Lpg, lpg),
            (Fuel::Cng, cng),
        ] {
            match result {
                Ok(page) => {
                    if fuel == Fuel::Petrol {
                        link_slugs = page.link_slugs;
                    }
                    maps.insert(fuel, page.prices);
                }
                Err(e) => {
                    warn!("{}: {} listing failed: {}", code, fuel, e);
                    errors.push(RunError::region(code, format!("{fuel} listing: {e}")));
                }
            }
        }

        let mut batch = RegionBatch::new(code, maps, &link_slugs, self.seeds.for_region(code));
        if batch.is_empty() {
            errors.push(RunError::region(code, "no localities found"));
            return RegionOutcome {
                errors,
                ..RegionOutcome::default()
            };
        }

        let tables = self.supplemental_tables(&[code.to_string()], &mut errors).await;
        for ((_, fuel), table) in &tables {
            let n = batch.apply_override(*fuel, table);
            debug!("{}: {} {} prices from supplemental table", code, n, fuel);
        }

        let unavailable = self.unavailable_fuels(code);
        let mut plans = Vec::new();
        for fuel in Fuel::ALL {
            if unavailable.contains(&fuel) {
                continue;
            }
            let report = batch.report(fuel, &self.policy);
            if !fallback::needs_refetch(fuel, &batch, &report, &self.policy) {
                continue;
            }
            let mismatch = self.cross_check(&batch, fuel).await;
            let plan = fallback::plan_refetch(fuel, &batch, &report, mismatch, &self.policy);
            info!(
                "{}: {} coverage {:.0}% ({} valid) → {} re-fetch of {} localities",
                code,
                fuel,
                report.coverage * 100.0,
                report.valid_count,
                if plan.full { "full" } else { "targeted" },
                plan.keys.len()
            );
            if !plan.keys.is_empty() {
                plans.push(plan);
            }
        }
        let dropped = fallback::apply_region_budget(&mut plans, self.policy.max_region_fetches);
        if dropped > 0 {
            warn!(
                "{}: re-fetch budget of {} reached; {} detail pages skipped",
                code, self.policy.max_region_fetches, dropped
            );
        }
        let detail_fetches = self.refetch(&mut batch, &plans, &mut errors).await;

        let mut reports = BTreeMap::new();
        let mut backfill = BTreeMap::new();
        for fuel in Fuel::ALL {
            reports.insert(fuel, batch.report(fuel, &self.policy));
            if unavailable.contains(&fuel) || batch.missing(fuel).next().is_none() {
                continue;
            }
            match self
                .store
                .last_known_valid_prices(code, fuel, self.policy.lookback_days, today)
            {
                Ok(history) => {
                    backfill.insert(fuel, history);
                }
                Err(e) => errors.push(RunError::region(code, format!("{fuel} history lookup: {e:#}"))),
            }
        }

        let snapshots = Assembly {
            date: today,
            reports: &reports,
            backfill: &backfill,
            unavailable: &unavailable,
            policy: &self.policy,
        }
        .snapshots(&batch);

        let upserts = self.persist_region(code, today, &snapshots, &mut errors);
        info!(
            "{}: {} localities, {} detail fetches, {} snapshots, {} upserts",
            code,
            batch.known.len(),
            detail_fetches,
            snapshots.len(),
            upserts
        );

        RegionOutcome {
            localities: batch.known.len(),
            fetched: snapshots.len(),
            detail_fetches,
            upserts,
            errors,
        }
    }

    /// Compare a few listing values with their detail pages; true on a
    /// material disagreement. Litre fuels are never cross-checked.
    async fn cross_check(&self, batch: &RegionBatch, fuel: Fuel) -> bool {
        let Some(threshold) = mismatch_threshold(fuel, &self.policy) else {
            return false;
        };
        for key in fallback::cross_check_keys(fuel, batch, &self.policy) {
            let (Some(loc), Some(listed)) = (batch.locality(&key), batch.price(fuel, &key)) else {
                continue;
            };
            let Some(slug) = loc.slug.as_deref() else { continue };

            match self
                .source
                .fetch_locality_price(&batch.region, &loc.name, slug, fuel)
                .await
            {
                Ok(detail) => {
                    let Some(found) = accept_observation(detail.observation(fuel)) else { continue };
                    let diff = relative_difference(found, listed);
                    if diff > threshold {
                        warn!(
                            "{}: {} listing for {} is {:.2}, detail page says {:.2}",
                            batch.region, fuel, loc.name, listed, found
                        );
                        return true;
                    }
                }
                Err(e) => debug!("{}: cross-check for {} failed: {}", batch.region, loc.name, e),
            }
        }
        false
    }

    /// Fetch the planned detail pages in a bounded pool and merge valid prices.
    async fn refetch(&self, batch: &mut RegionBatch, plans: &[RefetchPlan], errors: &mut Vec<RunError>) -> usize {
        let mut tasks = Vec::new();
        for plan in plans {
            for key in &plan.keys {
                let Some(loc) = batch.locality(key) else { continue };
                let Some(slug) = loc.slug.clone() else { continue };
                tasks.push(DetailTask {
                    fuel: plan.fuel,
                    key: key.clone(),
                    name: loc.name.clone(),
                    slug,
                });
            }
        }
        if tasks.is_empty() {
            return 0;
        }

        let sem = Arc::new(Semaphore::new(self.settings.fallback_concurrency.max(1)));
        let mut handles = Vec::new();
        for task in tasks {
            let source = self.source.clone();
            let sem = Arc::clone(&sem);
            let region = batch.region.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await?;
                let result = source
                    .fetch_locality_price(&region, &task.name, &task.slug, task.fuel)
                    .await;
                Ok::<_, anyhow::Error>((task, result))
            }));
        }

        let fetched = handles.len();
        for handle in handles {
            match handle.await {
                Ok(Ok((task, Ok(found)))) => match accept_observation(found.observation(task.fuel)) {
                    Some(price) => batch.set_price(task.fuel, &task.key, price),
                    None => debug!("{}/{}: no valid {} on detail page", batch.region, task.name, task.fuel),
                },
                Ok(Ok((task, Err(e)))) => errors.push(RunError::locality(
                    &batch.region,
                    &task.name,
                    format!("{} detail page: {e}", task.fuel),
                )),
                Ok(Err(e)) => errors.push(RunError::region(&batch.region, format!("{e:#}"))),
                Err(e) => {
                    error!("Detail task panic in {}: {}", batch.region, e);
                    errors.push(RunError::region(&batch.region, format!("detail task failed: {e}")));
                }
            }
        }
        fetched
    }

    /// Replace roster, clear the day, write the new set in batches.
    fn persist_region(
        &self,
        code: &str,
        date: NaiveDate,
        snapshots: &[DailySnapshot],
        errors: &mut Vec<RunError>,
    ) -> usize {
        if snapshots.is_empty() {
            errors.push(RunError::region(code, "no valid prices; existing snapshots kept"));
            return 0;
        }

        let names: Vec<String> = snapshots.iter().map(|s| s.locality.clone()).collect();
        if let Err(e) = self.store.replace_locality_roster(code, &names) {
            errors.push(RunError::region(code, format!("replace roster: {e:#}")));
        }
        if let Err(e) = self.store.delete_snapshots(code, date) {
            errors.push(RunError::region(code, format!("delete {date}: {e:#}")));
        }

        let mut upserts = 0;
        for chunk in snapshots.chunks(self.batch_size.max(1)) {
            match self.store.upsert_snapshots(chunk) {
                Ok(n) => upserts += n,
                Err(e) => {
                    warn!("{}: batch upsert failed ({:#}); retrying row by row", code, e);
                    for s in chunk {
                        match self.store.upsert_snapshot(s) {
                            Ok(()) => upserts += 1,
                            Err(e) => errors.push(RunError::locality(code, &s.locality, format!("upsert: {e:#}"))),
                        }
                    }
                }
            }
        }
        upserts
    }

    async fn supplemental_tables(&self, regions: &[String], errors: &mut Vec<RunError>) -> SupplementalTables {
        let mut tables = SupplementalTables::new();
        for table in &self.settings.supplemental_tables {
            let region = table.region.to_uppercase();
            if !regions.contains(&region) {
                continue;
            }
            match self.source.fetch_simple_table(&table.path, table.fuel).await {
                Ok(map) => {
                    debug!("{}: supplemental {} table has {} rows", region, table.fuel, map.len());
                    tables.insert((region, table.fuel), map);
                }
                Err(e) => {
                    warn!("{}: supplemental {} table failed: {}", region, table.fuel, e);
                    errors.push(RunError::region(&region, format!("{} supplemental table: {e}", table.fuel)));
                }
            }
        }
        tables
    }

    // ── Seed-list run ─────────────────────────────────────────────────────────

    pub async fn scrape_and_upsert_seed_list(&self, concurrency: usize, inter_batch_delay: Duration) -> SeedRunSummary {
        let mut summary = SeedRunSummary::default();
        if self.seeds.is_empty() {
            warn!("Seed list is empty; nothing to scrape");
            return summary;
        }

        let today = self.today();
        let tables = Arc::new(self.supplemental_tables(&self.seeds.regions(), &mut summary.errors).await);

        info!("=== Scraping {} seed localities (concurrency {}) ===", self.seeds.len(), concurrency);
        let sem = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::new();

        for seed in self.seeds.entries().iter().cloned() {
            let pipeline = self.clone();
            let sem = Arc::clone(&sem);
            let tables = Arc::clone(&tables);
            let task_seed = seed.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await?;
                let snapshot = pipeline.seed_snapshot(&task_seed, today, &tables).await;
                if !inter_batch_delay.is_zero() {
                    sleep(inter_batch_delay).await;
                }
                Ok::<_, anyhow::Error>(snapshot)
            });

            handles.push((seed, handle));
        }

        for (seed, handle) in handles {
            match handle.await {
                Ok(Ok(Ok(snapshot))) => {
                    summary.fetched += 1;
                    match self.store.upsert_snapshot(&snapshot) {
                        Ok(()) => summary.upserts += 1,
                        Err(e) => summary
                            .errors
                            .push(RunError::locality(&seed.region, &seed.name, format!("upsert: {e:#}"))),
                    }
                }
                Ok(Ok(Err(reason))) => summary
                    .errors
                    .push(RunError::locality(&seed.region, &seed.name, reason)),
                Ok(Err(e)) => summary
                    .errors
                    .push(RunError::locality(&seed.region, &seed.name, format!("{e:#}"))),
                Err(e) => {
                    error!("Task panic for {}/{}: {}", seed.region, seed.name, e);
                    summary
                        .errors
                        .push(RunError::locality(&seed.region, &seed.name, format!("task failed: {e}")));
                }
            }
        }

        info!(
            "=== Done: {} fetched | {} upserts | {} errors ===",
            summary.fetched,
            summary.upserts,
            summary.errors.len()
        );
        summary
    }

    /// All four detail pages of one seed locality. Dated by the page's own
    /// "updated on" date when that is later than today.
    async fn seed_snapshot(
        &self,
        seed: &SeedLocality,
        today: NaiveDate,
        tables: &SupplementalTables,
    ) -> Result<DailySnapshot, String> {
        let fetch = move |fuel| {
            self.source
                .fetch_locality_price(&seed.region, &seed.name, &seed.slug, fuel)
        };
        let (petrol, diesel, lpg, cng) = tokio::join!(
            fetch(Fuel::Petrol),
            fetch(Fuel::Diesel),
            fetch(Fuel::Lpg),
            fetch(Fuel::Cng),
        );

        let key = normalize_key(&seed.name);
        let mut prices = FuelPrices::default();
        let mut page_date = None;
        let mut first_error = None;

        for (fuel, result) in [
            (Fuel::Petrol, petrol),
            (Fuel::Diesel, diesel),
            (Fuel::Lpg, lpg),
            (Fuel::Cng, cng),
        ] {
            let found = result.unwrap_or_else(|e| {
                debug!("{}/{}: {} page failed: {}", seed.region, seed.name, fuel, e);
                first_error.get_or_insert_with(|| e.to_string());
                LocalityPrice::default()
            });

            if self.settings.is_unavailable(&seed.region, fuel) {
                continue;
            }
            let listed = tables
                .get(&(seed.region.clone(), fuel))
                .and_then(|t| t.get(&key))
                .and_then(|e| validate(fuel, Some(e.price)));
            let observation = found.observation(fuel);
            page_date = page_date.or(observation.and_then(|o| o.source_updated_on));
            prices.set(fuel, listed.or_else(|| accept_observation(observation)));
        }

        if prices.is_empty() {
            return Err(first_error.unwrap_or_else(|| "no data".to_string()));
        }

        Ok(DailySnapshot {
            region: seed.region.clone(),
            locality: seed.name.clone(),
            date: page_date.map_or(today, |d| d.max(today)),
            prices,
        })
    }
}
