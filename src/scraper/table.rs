//! Region listing pages → locality price maps.
//!
//! Listing pages carry several tables: the region's own locality table, a
//! nationwide "major cities" table, and sometimes neighbouring regions. Each
//! strategy below scores tables by their heading so the region's own table
//! wins. Strategies run in order and the first non-empty map is kept.

use super::cleaner::{is_aggregate_heading, link_row_to_entry, row_to_entry, simple_row_to_entry, RegionContext};
use super::parsers::{collapse_whitespace, normalize_key, normalize_region_name};
use crate::models::{Fuel, PriceMap};
use crate::validation::expected_range;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

mod selectors {
    use super::*;

    pub static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").expect("table"));
    pub static CAPTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("caption").expect("caption"));
    pub static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("tr"));
    pub static BODY_ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tbody tr").expect("tbody tr"));
    pub static HEAD_ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("thead tr").expect("thead tr"));
    pub static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td, th").expect("td, th"));
    pub static PRICE_LINK: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href*='-price-in-']").expect("price link"));
    pub static SIMPLE_ROW: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("table.tbldata01 tbody tr, table.table tr, table.fuel_table tr").expect("simple rows")
    });
    pub static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").expect("body"));
}

static LOCALITY_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(petrol|diesel|lpg|cng)-price-in-([^./]+)\.html").expect("locality href")
});

static REGION_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)-price-in-.*-s\d+\.html").expect("region href"));

static TEXT_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z .\-]{1,40}?)\s*₹\s*([0-9]{1,4}(?:,[0-9]{3})*(?:\.\d+)?)").expect("text price")
});

/// What one listing page yields for one fuel.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub prices: PriceMap,
    /// Normalized locality key → detail-page slug, from every locality link on the page.
    pub link_slugs: BTreeMap<String, String>,
}

struct ListingDoc<'a> {
    doc: &'a Html,
    fuel: Fuel,
    region: RegionContext,
}

type TableStrategy = fn(&ListingDoc<'_>) -> Option<PriceMap>;

const STRATEGIES: &[(&str, TableStrategy)] = &[
    ("anchor-table", anchor_table),
    ("header-table", header_matched_table),
    ("unscored-tables", unscored_tables),
];

pub fn parse_listing(html: &str, fuel: Fuel, region_name: Option<&str>) -> ListingPage {
    let doc = Html::parse_document(html);
    let page = ListingDoc {
        doc: &doc,
        fuel,
        region: RegionContext::new(region_name),
    };

    let prices = STRATEGIES
        .iter()
        .find_map(|(name, strategy)| {
            let map = strategy(&page).filter(|m| !m.is_empty())?;
            debug!("{} listing: {} localities via {}", fuel, map.len(), name);
            Some(map)
        })
        .unwrap_or_default();

    ListingPage {
        prices,
        link_slugs: page.link_slugs(),
    }
}

// ── Strategies ────────────────────────────────────────────────────────────────

fn anchor_table(page: &ListingDoc<'_>) -> Option<PriceMap> {
    let scored = page.doc.select(&selectors::TABLE).filter_map(|table| {
        let links = table
            .select(&selectors::PRICE_LINK)
            .filter(|a| page.locality_link(*a).is_some())
            .count();
        if links == 0 {
            return None;
        }
        let ctx = table_context(table);
        Some((table, links as i64 + context_score(&page.region, &ctx)))
    });
    let (table, _) = pick_best(scored)?;

    let unit_ctx = header_text(table);
    let mut map = PriceMap::new();
    for tr in table.select(&selectors::ROW) {
        let Some((name, slug)) = tr
            .select(&selectors::PRICE_LINK)
            .find_map(|a| page.locality_link(a))
        else {
            continue;
        };
        if let Some((key, entry)) = link_row_to_entry(&name, Some(slug), &row_cells(tr), page.fuel, &unit_ctx) {
            map.entry(key).or_insert(entry);
        }
    }
    Some(map)
}

fn header_matched_table(page: &ListingDoc<'_>) -> Option<PriceMap> {
    let scored = page.doc.select(&selectors::TABLE).filter_map(|table| {
        if !header_names_columns(&header_text(table)) {
            return None;
        }
        let ctx = table_context(table);
        let body_rows = table.select(&selectors::BODY_ROW).count();
        let rows = if body_rows > 0 { body_rows } else { table.select(&selectors::ROW).count() };
        Some((table, context_score(&page.region, &ctx) + rows.min(30) as i64))
    });
    let (table, _) = pick_best(scored)?;

    let mut map = PriceMap::new();
    page.collect_rows(table, &mut map);
    Some(map)
}

fn unscored_tables(page: &ListingDoc<'_>) -> Option<PriceMap> {
    let mut map = PriceMap::new();
    for table in page.doc.select(&selectors::TABLE) {
        if !header_names_columns(&header_text(table)) {
            continue;
        }
        let ctx = table_context(table);
        if is_aggregate_heading(&ctx) || page.region.mentions_other_region(&normalize_region_name(&ctx)) {
            continue;
        }
        page.collect_rows(table, &mut map);
    }
    Some(map)
}

impl ListingDoc<'_> {
    /// `(display name, slug)` for a link to one locality's detail page.
    fn locality_link(&self, a: ElementRef<'_>) -> Option<(String, String)> {
        let href = a.value().attr("href")?;
        if REGION_HREF.is_match(href) {
            return None;
        }
        let slug = LOCALITY_HREF.captures(href)?.get(2)?.as_str().to_string();
        let name = collapse_whitespace(&a.text().collect::<String>());
        if name.is_empty() || self.region.is_other_region_name(&name) {
            return None;
        }
        Some((name, slug))
    }

    fn collect_rows(&self, table: ElementRef<'_>, map: &mut PriceMap) {
        let unit_ctx = header_text(table);
        for tr in table.select(&selectors::ROW) {
            if let Some((key, entry)) = row_to_entry(&row_cells(tr), self.fuel, &self.region, &unit_ctx) {
                map.entry(key).or_insert(entry);
            }
        }
    }

    fn link_slugs(&self) -> BTreeMap<String, String> {
        let mut slugs = BTreeMap::new();
        for a in self.doc.select(&selectors::PRICE_LINK) {
            if let Some((name, slug)) = self.locality_link(a) {
                let key = normalize_key(&name);
                if !key.is_empty() {
                    slugs.entry(key).or_insert(slug);
                }
            }
        }
        slugs
    }
}

// ── Table helpers ─────────────────────────────────────────────────────────────

/// Highest-scoring table with a positive score; earlier tables win ties.
fn pick_best<'a>(scored: impl Iterator<Item = (ElementRef<'a>, i64)>) -> Option<(ElementRef<'a>, i64)> {
    let mut best: Option<(ElementRef<'a>, i64)> = None;
    for (table, score) in scored {
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((table, score));
        }
    }
    best.filter(|(_, s)| *s > 0)
}

fn context_score(region: &RegionContext, ctx: &str) -> i64 {
    let ctx_norm = normalize_region_name(ctx);
    let mut score = 0;
    if region.names_target(&ctx_norm) {
        score += 50;
    }
    if region.mentions_other_region(&ctx_norm) {
        score -= 200;
    }
    if is_aggregate_heading(ctx) {
        score -= 1000;
    }
    score
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn row_cells(tr: ElementRef<'_>) -> Vec<String> {
    tr.select(&selectors::CELL).map(element_text).collect()
}

/// Caption plus nearest preceding heading.
fn table_context(table: ElementRef<'_>) -> String {
    let caption = table
        .select(&selectors::CAPTION)
        .next()
        .map(element_text)
        .unwrap_or_default();
    format!("{} {}", caption, find_heading(table)).trim().to_string()
}

fn is_heading(el: &ElementRef<'_>) -> bool {
    matches!(el.value().name(), "h1" | "h2" | "h3" | "h4")
}

fn preceding_heading(el: ElementRef<'_>) -> Option<String> {
    el.prev_siblings()
        .filter_map(ElementRef::wrap)
        .find(is_heading)
        .map(element_text)
        .filter(|t| !t.is_empty())
}

fn find_heading(table: ElementRef<'_>) -> String {
    preceding_heading(table)
        .or_else(|| table.parent().and_then(ElementRef::wrap).and_then(preceding_heading))
        .or_else(|| {
            table
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|e| matches!(e.value().name(), "section" | "div"))
                .and_then(preceding_heading)
        })
        .unwrap_or_default()
}

/// Lowercased text of the first header row.
fn header_text(table: ElementRef<'_>) -> String {
    let row = table
        .select(&selectors::HEAD_ROW)
        .next()
        .or_else(|| table.select(&selectors::ROW).next());
    row.map(|tr| row_cells(tr).join(" ").to_lowercase())
        .unwrap_or_default()
}

fn header_names_columns(header: &str) -> bool {
    header.contains("price") && ["city", "district", "town"].iter().any(|w| header.contains(w))
}

// ── Supplemental tables ───────────────────────────────────────────────────────

/// Plain two-column region table (name, price), with a ₹-anchored text scan
/// when the page has no recognisable table.
pub fn parse_simple_table(html: &str, fuel: Fuel) -> PriceMap {
    let doc = Html::parse_document(html);
    let mut map = PriceMap::new();

    for tr in doc.select(&selectors::SIMPLE_ROW) {
        let cells: Vec<String> = tr.select(&selectors::CELL).map(element_text).collect();
        if let Some((key, entry)) = simple_row_to_entry(&cells, fuel) {
            map.insert(key, entry);
        }
    }

    if map.is_empty() {
        let range = expected_range(fuel);
        let body = doc
            .select(&selectors::BODY)
            .next()
            .map(element_text)
            .unwrap_or_default();
        for caps in TEXT_PRICE.captures_iter(&body) {
            let (Some(name), Some(amount)) = (caps.get(1), caps.get(2)) else { continue };
            let Ok(price) = amount.as_str().replace(',', "").parse::<f64>() else { continue };
            let key = normalize_key(name.as_str());
            if key.is_empty() || !range.contains(price) {
                continue;
            }
            map.insert(
                key,
                crate::models::TableEntry {
                    display_name: name.as_str().trim().to_string(),
                    price,
                    slug: None,
                },
            );
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANCHOR_PAGE: &str = r#"
        <html><body>
          <h2>Petrol Price in Major Cities</h2>
          <table>
            <tr><th>City</th><th>Price</th></tr>
            <tr><td><a href="/petrol-price-in-new-delhi.html">New Delhi</a></td><td>₹ 94.77</td></tr>
            <tr><td><a href="/petrol-price-in-mumbai.html">Mumbai</a></td><td>₹ 103.50</td></tr>
            <tr><td><a href="/petrol-price-in-chennai.html">Chennai</a></td><td>₹ 100.90</td></tr>
            <tr><td><a href="/petrol-price-in-kolkata.html">Kolkata</a></td><td>₹ 105.41</td></tr>
          </table>
          <h2>Petrol Price in Kerala Districts</h2>
          <table>
            <tr><th>City</th><th>Price</th><th>Change</th></tr>
            <tr><td><a href="/petrol-price-in-ernakulam.html">Ernakulam</a></td><td>₹ 105.64</td><td>0.12</td></tr>
            <tr><td><a href="/petrol-price-in-kottayam.html">Kottayam</a></td><td>₹ 106.01</td><td>-0.05</td></tr>
            <tr><td><a href="/petrol-price-in-tamil-nadu-s31.html">Tamil Nadu</a></td><td>₹ 100.80</td><td>0</td></tr>
            <tr><td><a href="/petrol-price-in-idukki.html">Idukki</a></td><td>₹ 2.00</td><td>0</td></tr>
          </table>
          <h3>Petrol Price in Goa</h3>
          <table>
            <tr><td><a href="/petrol-price-in-panaji.html">Panaji</a></td><td>₹ 96.52</td></tr>
            <tr><td><a href="/petrol-price-in-margao.html">Margao</a></td><td>₹ 96.18</td></tr>
            <tr><td><a href="/petrol-price-in-vasco.html">Vasco</a></td><td>₹ 96.30</td></tr>
          </table>
        </body></html>
    "#;

    const HEADER_PAGE: &str = r#"
        <html><body>
          <div>
            <h2>LPG cylinder price in Karnataka</h2>
            <table>
              <thead><tr><th>District</th><th>LPG Price (14.2 kg)</th></tr></thead>
              <tbody>
                <tr><td>Bengaluru</td><td>₹ 855.50</td></tr>
                <tr><td>Mysuru</td><td>₹ 857.00</td></tr>
                <tr><td>Total</td><td>-</td></tr>
              </tbody>
            </table>
          </div>
          <div>
            <h2>LPG price in Top Cities</h2>
            <table>
              <thead><tr><th>City</th><th>Price</th></tr></thead>
              <tbody><tr><td>Delhi</td><td>₹ 803.00</td></tr></tbody>
            </table>
          </div>
        </body></html>
    "#;

    const UNSCORED_PAGE: &str = r#"
        <html><body>
          <h2>CNG price in Maharashtra</h2>
          <table>
            <tr><td>City</td><td>Price</td></tr>
            <tr><td>Mumbai</td><td>₹ 0.50</td></tr>
            <tr><td>Thane</td><td>₹ 1.00</td></tr>
          </table>
          <h4>More towns</h4>
          <table>
            <tr><td>Town</td><td>CNG Price per kg</td></tr>
            <tr><td>Pune</td><td>₹ 92.00</td></tr>
            <tr><td>Nashik</td><td>₹ 91.50</td></tr>
          </table>
          <h4>CNG price in Gujarat</h4>
          <table>
            <tr><td>City</td><td>Price</td></tr>
            <tr><td>Surat</td><td>₹ 76.59</td></tr>
          </table>
        </body></html>
    "#;

    #[test]
    fn test_anchor_table_picks_region_table() {
        let page = parse_listing(ANCHOR_PAGE, Fuel::Petrol, Some("Kerala"));
        let keys: Vec<&str> = page.prices.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ernakulam", "kottayam"]);

        let e = &page.prices["kottayam"];
        assert_eq!(e.price, 106.01);
        assert_eq!(e.slug.as_deref(), Some("kottayam"));
        assert_eq!(e.display_name, "Kottayam");
    }

    #[test]
    fn test_link_slugs_cover_every_locality_link() {
        let page = parse_listing(ANCHOR_PAGE, Fuel::Petrol, Some("Kerala"));
        assert_eq!(page.link_slugs.get("idukki").map(String::as_str), Some("idukki"));
        assert_eq!(page.link_slugs.get("new delhi").map(String::as_str), Some("new-delhi"));
        assert!(!page.link_slugs.contains_key("tamil nadu"));
    }

    #[test]
    fn test_header_matched_table() {
        let page = parse_listing(HEADER_PAGE, Fuel::Lpg, Some("Karnataka"));
        let keys: Vec<&str> = page.prices.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["bengaluru", "mysuru"]);
        assert_eq!(page.prices["bengaluru"].price, 855.5);
        assert!(page.prices["bengaluru"].slug.is_none());
    }

    #[test]
    fn test_unscored_fallback_when_best_table_is_empty() {
        let page = parse_listing(UNSCORED_PAGE, Fuel::Cng, Some("Maharashtra"));
        let keys: Vec<&str> = page.prices.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["nashik", "pune"]);
    }

    #[test]
    fn test_empty_page_yields_empty_map() {
        let page = parse_listing("<html><body><p>Access denied</p></body></html>", Fuel::Diesel, Some("Kerala"));
        assert!(page.prices.is_empty());
        assert!(page.link_slugs.is_empty());
    }

    #[test]
    fn test_simple_table() {
        let html = r#"<table class="tbldata01"><tbody>
            <tr><td>City</td><td>LPG Price</td></tr>
            <tr><td>Ernakulam</td><td>₹ 910.50</td></tr>
            <tr><td>Kollam</td><td>₹ 912.00</td></tr>
        </tbody></table>"#;
        let map = parse_simple_table(html, Fuel::Lpg);
        assert_eq!(map.len(), 2);
        assert_eq!(map["kollam"].price, 912.0);
    }

    #[test]
    fn test_simple_table_text_fallback() {
        let html = "<html><body><p>Ernakulam ₹ 910.50 Kollam ₹ 9.00</p></body></html>";
        let map = parse_simple_table(html, Fuel::Lpg);
        assert_eq!(map.len(), 1);
        assert_eq!(map["ernakulam"].price, 910.5);
    }
}
