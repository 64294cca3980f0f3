//! CSV loader for the curated seed list: localities with known detail-page slugs.
//!
//! Format: `region,name,slug` with a header row. Blank or malformed rows are
//! skipped with a warning.

use crate::models::SeedLocality;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedList {
    entries: Vec<SeedLocality>,
}

impl SeedList {
    pub fn new(entries: Vec<SeedLocality>) -> Self {
        Self { entries }
    }

    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut entries = Vec::new();
        let mut seen = BTreeSet::new();

        for (i, result) in reader.deserialize::<SeedLocality>().enumerate() {
            let mut seed = match result {
                Ok(s) => s,
                Err(e) => {
                    warn!("Seed row {}: {}", i + 1, e);
                    continue;
                }
            };
            seed.region = seed.region.to_uppercase();
            if seed.region.is_empty() || seed.name.is_empty() || seed.slug.is_empty() {
                warn!("Seed row {}: empty field, skipped", i + 1);
                continue;
            }
            if !seen.insert((seed.region.clone(), seed.name.to_lowercase())) {
                continue;
            }
            entries.push(seed);
        }

        Ok(Self { entries })
    }

    /// Load from disk. A missing file is an empty list, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Seed list {:?} not found; continuing without seeds", path);
            return Ok(Self::default());
        }
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open seed list {:?}", path))?;
        let list = Self::parse(file).with_context(|| format!("Failed to parse seed list {:?}", path))?;
        info!("Seed list: {} localities across {} regions", list.len(), list.regions().len());
        Ok(list)
    }

    pub fn entries(&self) -> &[SeedLocality] {
        &self.entries
    }

    pub fn for_region<'a>(&'a self, region: &'a str) -> impl Iterator<Item = &'a SeedLocality> + 'a {
        self.entries
            .iter()
            .filter(move |s| s.region.eq_ignore_ascii_case(region))
    }

    pub fn regions(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|s| s.region.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
