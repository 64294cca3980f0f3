//! Region discovery from the petrol index page.

use super::parsers::{collapse_whitespace, normalize_region_name};
use crate::models::RegionListing;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

/// Display names (normalized) as the source spells them → region code.
const REGION_NAMES: &[(&str, &str)] = &[
    ("andaman nicobar", "AN"),
    ("andaman nicobar islands", "AN"),
    ("andaman nicobar island", "AN"),
    ("andaman and nicobar", "AN"),
    ("andaman and nicobar islands", "AN"),
    ("andhra pradesh", "AP"),
    ("arunachal pradesh", "AR"),
    ("assam", "AS"),
    ("bihar", "BR"),
    ("chandigarh", "CH"),
    ("chhattisgarh", "CG"),
    ("chhatisgarh", "CG"),
    ("dadra and nagar haveli and daman and diu", "DN"),
    ("delhi", "DL"),
    ("goa", "GA"),
    ("gujarat", "GJ"),
    ("haryana", "HR"),
    ("himachal pradesh", "HP"),
    ("jammu kashmir", "JK"),
    ("jammu and kashmir", "JK"),
    ("jharkhand", "JH"),
    ("karnataka", "KA"),
    ("kerala", "KL"),
    ("ladakh", "LA"),
    ("lakshadweep", "LD"),
    ("madhya pradesh", "MP"),
    ("maharashtra", "MH"),
    ("manipur", "MN"),
    ("meghalaya", "ML"),
    ("mizoram", "MZ"),
    ("nagaland", "NL"),
    ("odisha", "OD"),
    ("orissa", "OD"),
    ("pondicherry", "PY"),
    ("puducherry", "PY"),
    ("punjab", "PB"),
    ("rajasthan", "RJ"),
    ("sikkim", "SK"),
    ("tamil nadu", "TN"),
    ("telangana", "TS"),
    ("tripura", "TR"),
    ("uttar pradesh", "UP"),
    ("uttarakhand", "UK"),
    ("uttaranchal", "UK"),
    ("west bengal", "WB"),
];

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='petrol-price-in-']").expect("anchor selector"));

static REGION_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)petrol-price-in-.*-s\d+\.html").expect("region href regex"));

/// Region code for a display name, if it is one we track.
pub fn region_code_for(name: &str) -> Option<&'static str> {
    let norm = normalize_region_name(name);
    REGION_NAMES
        .iter()
        .find(|(n, _)| *n == norm)
        .map(|(_, code)| *code)
}

/// Every normalized region name with its code, for cross-region checks.
pub fn known_region_names() -> impl Iterator<Item = (&'static str, &'static str)> {
    REGION_NAMES.iter().copied()
}

/// Enumerate regions linked from the index page, in page order, unique by URL.
pub fn parse_region_index(html: &str, base_url: &str) -> Vec<RegionListing> {
    let doc = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut regions = Vec::new();

    for a in doc.select(&ANCHOR) {
        let Some(href) = a.value().attr("href") else { continue };
        if !REGION_HREF.is_match(href) {
            continue;
        }
        let text = collapse_whitespace(&a.text().collect::<String>());
        if text.is_empty() {
            continue;
        }
        let Some(code) = region_code_for(&text) else {
            debug!("Skipping unrecognised region anchor {:?}", text);
            continue;
        };
        let Some(listing_url) = absolute_url(base.as_ref(), href) else { continue };
        if !seen.insert(listing_url.clone()) {
            continue;
        }
        regions.push(RegionListing {
            code: code.to_string(),
            display_name: text,
            listing_url,
        });
    }

    regions
}

fn absolute_url(base: Option<&Url>, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    base?.join(href).ok().map(|u| u.to_string())
}

/// Sorted, de-duplicated region codes.
pub fn region_codes(regions: &[RegionListing]) -> Vec<String> {
    let mut codes: Vec<String> = regions
        .iter()
        .map(|r| r.code.to_uppercase())
        .filter(|c| c.len() == 2 && c.chars().all(|ch| ch.is_ascii_uppercase()))
        .collect();
    codes.sort();
    codes.dedup();
    codes
}
