//! Raw table rows → typed [`TableEntry`] values.
//!
//! Cells arrive as loose strings; everything past this module works on
//! validated prices keyed by normalized locality name.

use super::discovery::{known_region_names, region_code_for};
use super::parsers::{collapse_whitespace, has_letter, has_rupee, mentions_per_kg, normalize_key, normalize_region_name, parse_price};
use crate::models::{Fuel, TableEntry};
use crate::validation::{cylinder_from_kg_quote, expected_range};

// ── Region context ────────────────────────────────────────────────────────────

/// The region a listing page is expected to describe.
#[derive(Debug, Clone, Default)]
pub struct RegionContext {
    target_norm: String,
    target_code: Option<&'static str>,
}

impl RegionContext {
    pub fn new(display_name: Option<&str>) -> Self {
        let target_norm = display_name.map(normalize_region_name).unwrap_or_default();
        let target_code = display_name.and_then(region_code_for);
        Self {
            target_norm,
            target_code,
        }
    }

    pub fn is_set(&self) -> bool {
        !self.target_norm.is_empty()
    }

    /// Heading or caption text names the target region.
    pub fn names_target(&self, ctx_norm: &str) -> bool {
        self.is_set() && contains_phrase(ctx_norm, &self.target_norm)
    }

    /// Heading or caption text names some other known region.
    pub fn mentions_other_region(&self, ctx_norm: &str) -> bool {
        if !self.is_set() || ctx_norm.is_empty() {
            return false;
        }
        known_region_names()
            .filter(|(_, code)| Some(*code) != self.target_code)
            .filter(|(name, _)| *name != self.target_norm)
            .any(|(name, _)| contains_phrase(ctx_norm, name))
    }

    /// A locality cell that is really another region's name (cross-links).
    pub fn is_other_region_name(&self, name: &str) -> bool {
        if !self.is_set() {
            return false;
        }
        match region_code_for(name) {
            Some(code) => Some(code) != self.target_code && normalize_region_name(name) != self.target_norm,
            None => false,
        }
    }
}

/// Word-bounded containment on normalized text.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

/// Aggregate tables list metros across the country and leak foreign prices.
pub fn is_aggregate_heading(ctx: &str) -> bool {
    let t = ctx.to_lowercase();
    ["major cities", "metro cities", "top cities", "india"]
        .iter()
        .any(|p| t.contains(p))
}

/// Column-title rows such as "City | Petrol Price".
pub fn is_header_row(parts: &[String]) -> bool {
    let joined = parts.join(" ").to_lowercase();
    let names_column = ["city", "district", "town"].iter().any(|w| joined.contains(w));
    names_column && joined.contains("price")
}

fn is_column_word(s: &str) -> bool {
    normalize_key(s)
        .split(' ')
        .any(|w| matches!(w, "city" | "district" | "town" | "price"))
}

// ── Prices ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Candidate {
    price: f64,
    rupee: bool,
}

/// Largest range-valid number among the cells, ₹-marked cells first.
/// `unit_ctx` is surrounding text used to spot LPG quoted per kilogram.
pub fn best_price(parts: &[String], fuel: Fuel, unit_ctx: &str) -> Option<f64> {
    let range = expected_range(fuel);
    let per_kg_ctx = mentions_per_kg(unit_ctx);

    let candidates: Vec<Candidate> = parts
        .iter()
        .filter_map(|p| {
            let n = parse_price(p)?;
            let price = if per_kg_ctx || mentions_per_kg(p) {
                cylinder_from_kg_quote(fuel, n).unwrap_or(n)
            } else {
                n
            };
            range.contains(price).then_some(Candidate {
                price,
                rupee: has_rupee(p),
            })
        })
        .collect();

    let any_rupee = candidates.iter().any(|c| c.rupee);
    candidates
        .iter()
        .filter(|c| !any_rupee || c.rupee)
        .map(|c| c.price)
        .max_by(f64::total_cmp)
}

fn clean_cells(cells: &[String]) -> Vec<String> {
    cells
        .iter()
        .map(|c| collapse_whitespace(c))
        .filter(|c| !c.is_empty())
        .collect()
}

// ── Rows ──────────────────────────────────────────────────────────────────────

/// Generic row: first alphabetic non-header cell is the locality, best numeric cell the price.
pub fn row_to_entry(
    cells: &[String],
    fuel: Fuel,
    region: &RegionContext,
    unit_ctx: &str,
) -> Option<(String, TableEntry)> {
    let parts = clean_cells(cells);
    if parts.len() < 2 || is_header_row(&parts) {
        return None;
    }

    let name = parts.iter().find(|p| has_letter(p) && !is_column_word(p))?;
    if region.is_other_region_name(name) {
        return None;
    }
    let key = normalize_key(name);
    if key.is_empty() {
        return None;
    }

    let row_ctx = format!("{} {}", unit_ctx, parts.join(" "));
    let price = best_price(&parts, fuel, &row_ctx)?;

    Some((
        key,
        TableEntry {
            display_name: name.clone(),
            price,
            slug: None,
        },
    ))
}

/// Row of an anchor table: the locality comes from the link, not the cells.
pub fn link_row_to_entry(
    name: &str,
    slug: Option<String>,
    cells: &[String],
    fuel: Fuel,
    unit_ctx: &str,
) -> Option<(String, TableEntry)> {
    let name = collapse_whitespace(name);
    let key = normalize_key(&name);
    if key.is_empty() {
        return None;
    }
    let parts = clean_cells(cells);
    let row_ctx = format!("{} {}", unit_ctx, parts.join(" "));
    let price = best_price(&parts, fuel, &row_ctx)?;

    Some((
        key,
        TableEntry {
            display_name: name,
            price,
            slug,
        },
    ))
}

/// Two-column "name | price" row from a supplemental table.
pub fn simple_row_to_entry(cells: &[String], fuel: Fuel) -> Option<(String, TableEntry)> {
    let parts = clean_cells(cells);
    if parts.len() < 2 || is_header_row(&parts) {
        return None;
    }
    let key = normalize_key(&parts[0]);
    if key.is_empty() || !has_letter(&parts[0]) {
        return None;
    }
    let price = best_price(&parts[1..2], fuel, &parts.join(" "))?;
    Some((
        key,
        TableEntry {
            display_name: parts[0].clone(),
            price,
            slug: None,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_best_price_prefers_rupee_and_largest() {
        let row = cells(&["Kochi", "₹ 105.20", "0.12", "104.90"]);
        assert_eq!(best_price(&row, Fuel::Petrol, ""), Some(105.2));

        let row = cells(&["Kochi", "104.90", "106.10"]);
        assert_eq!(best_price(&row, Fuel::Petrol, ""), Some(106.1));
    }

    #[test]
    fn test_best_price_drops_out_of_range() {
        let row = cells(&["Kochi", "₹ 5.00", "₹ 9,999"]);
        assert_eq!(best_price(&row, Fuel::Petrol, ""), None);
    }

    #[test]
    fn test_best_price_converts_lpg_per_kg() {
        let row = cells(&["Kochi", "₹ 60.00"]);
        let got = best_price(&row, Fuel::Lpg, "Price per kg").unwrap();
        assert!((got - 852.0).abs() < 1e-9);
        // No unit text: left as is, and 60 is out of the cylinder band.
        assert_eq!(best_price(&row, Fuel::Lpg, ""), None);
    }

    #[test]
    fn test_row_to_entry_generic() {
        let region = RegionContext::new(Some("Kerala"));
        let (key, e) = row_to_entry(&cells(&["  Kottayam ", "₹ 106.01"]), Fuel::Petrol, &region, "").unwrap();
        assert_eq!(key, "kottayam");
        assert_eq!(e.display_name, "Kottayam");
        assert_eq!(e.price, 106.01);

        assert!(row_to_entry(&cells(&["City", "Price"]), Fuel::Petrol, &region, "").is_none());
        assert!(row_to_entry(&cells(&["Tamil Nadu", "₹ 100.80"]), Fuel::Petrol, &region, "").is_none());
    }

    #[test]
    fn test_region_context() {
        let region = RegionContext::new(Some("Orissa"));
        assert!(region.names_target("petrol price in orissa today"));
        // Same code under a different spelling is not "another region".
        assert!(!region.mentions_other_region("odisha district wise prices"));
        assert!(region.mentions_other_region("petrol price in goa"));
        assert!(!region.mentions_other_region("goalpara prices"));
    }

    #[test]
    fn test_aggregate_heading() {
        assert!(is_aggregate_heading("Petrol Price in Major Cities"));
        assert!(is_aggregate_heading("Petrol price across India"));
        assert!(!is_aggregate_heading("Petrol price in Kerala districts"));
    }

    #[test]
    fn test_simple_row() {
        let (key, e) = simple_row_to_entry(&cells(&["Ernakulam", "₹ 910.50"]), Fuel::Lpg).unwrap();
        assert_eq!(key, "ernakulam");
        assert_eq!(e.price, 910.5);
        assert!(simple_row_to_entry(&cells(&["City", "LPG Price"]), Fuel::Lpg).is_none());
    }
}
