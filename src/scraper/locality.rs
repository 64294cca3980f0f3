//! Single-locality detail pages → one price and its "updated on" date.
//!
//! Strategies are tried in order; each returns a range-valid price or
//! nothing. When all of them fail the page yields no price rather than a
//! number lifted from tickers, ads or unrelated tables.

use super::parsers::{collapse_whitespace, mentions_cylinder, mentions_litre, mentions_per_kg, parse_price, parse_updated_date};
use crate::models::{Fuel, LocalityPrice, PriceUnit};
use crate::validation::{cylinder_from_kg_quote, expected_range};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

mod selectors {
    use super::*;

    pub static CONTAINER_PRICE: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse(".gd-fuel-priceblock-container .gd-fuel-price").expect("container price")
    });
    pub static BLOCK_PRICE: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".gd-fuel-priceblock .gd-fuel-price").expect("block price"));
    pub static UPDATED_DATE: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".gd-fuel-updated-date").expect("updated date"));
    pub static INTRO: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("#gr_top_intro_content").expect("intro"));
    pub static BOLD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("b").expect("b"));
    pub static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").expect("body"));
}

const AMOUNT: &str = r"([0-9]{1,4}(?:,[0-9]{3})*(?:\.\d+)?)";

fn pattern(src: &str) -> Regex {
    Regex::new(&src.replace("AMOUNT", AMOUNT)).expect("text-scan pattern")
}

/// Fuel-labelled patterns first, unit-suffix patterns after.
static LPG_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        pattern(r"(?i)lpg\s+price[^₹]{0,220}₹\s*AMOUNT"),
        pattern(r"(?i)₹\s*AMOUNT[^0-9]{0,60}14\.2"),
        pattern(r"(?i)14\.2[^₹]{0,60}₹\s*AMOUNT"),
    ]
});
static CNG_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        pattern(r"(?i)cng\s+price[^₹]{0,220}₹\s*AMOUNT"),
        pattern(r"(?i)₹\s*AMOUNT[^0-9]{0,60}kg"),
    ]
});
static PETROL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        pattern(r"(?i)petrol\s+price[^₹]{0,220}₹\s*AMOUNT"),
        pattern(r"(?i)₹\s*AMOUNT[^0-9]{0,60}ltr"),
    ]
});
static DIESEL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        pattern(r"(?i)diesel\s+price[^₹]{0,220}₹\s*AMOUNT"),
        pattern(r"(?i)₹\s*AMOUNT[^0-9]{0,60}ltr"),
    ]
});

fn text_patterns(fuel: Fuel) -> &'static [Regex] {
    match fuel {
        Fuel::Petrol => &PETROL_PATTERNS,
        Fuel::Diesel => &DIESEL_PATTERNS,
        Fuel::Lpg => &LPG_PATTERNS,
        Fuel::Cng => &CNG_PATTERNS,
    }
}

type PriceStrategy = fn(&Html, Fuel) -> Option<f64>;

const STRATEGIES: &[PriceStrategy] = &[price_block, intro_bold, text_scan];

pub fn parse_locality_page(html: &str, fuel: Fuel) -> LocalityPrice {
    let doc = Html::parse_document(html);
    LocalityPrice {
        price: STRATEGIES.iter().find_map(|strategy| strategy(&doc, fuel)),
        source_updated_on: updated_on(&doc, fuel),
    }
}

/// Range-check a parsed amount, converting an LPG per-kg quote when `ctx` says so.
fn accept(fuel: Fuel, price: f64, ctx: &str) -> Option<f64> {
    if mentions_per_kg(ctx) {
        if let Some(converted) = cylinder_from_kg_quote(fuel, price) {
            return Some(converted);
        }
    }
    expected_range(fuel).contains(price).then_some(price)
}

fn text_of(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn unit_matches(fuel: Fuel, text: &str) -> bool {
    match fuel.unit() {
        PriceUnit::PerLitre => mentions_litre(text),
        PriceUnit::PerKg => mentions_per_kg(text),
        PriceUnit::PerCylinder => mentions_cylinder(text),
    }
}

/// Price blocks on the page, container layout preferred.
fn price_blocks(doc: &Html) -> Vec<ElementRef<'_>> {
    let container: Vec<_> = doc.select(&selectors::CONTAINER_PRICE).collect();
    if !container.is_empty() {
        return container;
    }
    doc.select(&selectors::BLOCK_PRICE).collect()
}

/// The block whose unit label fits the fuel, else the first one.
fn chosen_block(doc: &Html, fuel: Fuel) -> Option<ElementRef<'_>> {
    let blocks = price_blocks(doc);
    blocks
        .iter()
        .copied()
        .find(|el| unit_matches(fuel, &text_of(*el)))
        .or_else(|| blocks.first().copied())
}

// ── Strategies ────────────────────────────────────────────────────────────────

fn price_block(doc: &Html, fuel: Fuel) -> Option<f64> {
    let text = text_of(chosen_block(doc, fuel)?);
    accept(fuel, parse_price(&text)?, &text)
}

fn intro_bold(doc: &Html, fuel: Fuel) -> Option<f64> {
    let intro = doc.select(&selectors::INTRO).next()?;
    let bold = text_of(intro.select(&selectors::BOLD).next()?);
    accept(fuel, parse_price(&bold)?, &text_of(intro))
}

fn text_scan(doc: &Html, fuel: Fuel) -> Option<f64> {
    let body = text_of(doc.select(&selectors::BODY).next()?);
    text_patterns(fuel).iter().find_map(|re| {
        let caps = re.captures(&body)?;
        let amount: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
        accept(fuel, amount, caps.get(0)?.as_str())
    })
}

/// "Updated on" date beside the chosen block, else the first one on the page.
fn updated_on(doc: &Html, fuel: Fuel) -> Option<NaiveDate> {
    let from_block = chosen_block(doc, fuel)
        .and_then(|el| {
            el.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().classes().any(|c| c == "gd-fuel-priceblock"))
        })
        .and_then(|block| block.select(&selectors::UPDATED_DATE).next())
        .and_then(|el| parse_updated_date(&text_of(el)));

    from_block.or_else(|| {
        doc.select(&selectors::UPDATED_DATE)
            .next()
            .and_then(|el| parse_updated_date(&text_of(el)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    const BLOCK_PAGE: &str = r#"
        <html><body>
          <div class="ticker">Sensex ₹ 81,200.55</div>
          <div class="gd-fuel-priceblock-container">
            <div class="gd-fuel-priceblock">
              <div class="gd-fuel-price">₹ 76.50/kg</div>
              <div class="gd-fuel-updated-date">Updated on 12th December, 2025</div>
            </div>
            <div class="gd-fuel-priceblock">
              <div class="gd-fuel-price">₹ 853.00/14.2 Kg</div>
              <div class="gd-fuel-updated-date">13th Dec, 2025</div>
            </div>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_price_block_matches_unit() {
        let lpg = parse_locality_page(BLOCK_PAGE, Fuel::Lpg);
        assert_eq!(lpg.price, Some(853.0));
        assert_eq!(lpg.source_updated_on, date(2025, 12, 13));

        let cng = parse_locality_page(BLOCK_PAGE, Fuel::Cng);
        assert_eq!(cng.price, Some(76.5));
        assert_eq!(cng.source_updated_on, date(2025, 12, 12));
    }

    #[test]
    fn test_price_block_converts_lpg_per_kg() {
        let html = r#"<div class="gd-fuel-priceblock">
            <div class="gd-fuel-price">₹ 60.00 / kg</div>
            <div class="gd-fuel-updated-date">1st Jan, 2026</div>
        </div>"#;
        let got = parse_locality_page(html, Fuel::Lpg);
        assert!((got.price.unwrap() - 852.0).abs() < 1e-9);
        assert_eq!(got.source_updated_on, date(2026, 1, 1));
    }

    #[test]
    fn test_intro_bold_fallback() {
        let html = r#"<html><body>
            <div id="gr_top_intro_content">Today's petrol price in Gadchiroli is at ₹<b>105.06</b> per litre.</div>
            <div class="gd-fuel-updated-date">14th Dec, 2025</div>
        </body></html>"#;
        let got = parse_locality_page(html, Fuel::Petrol);
        assert_eq!(got.price, Some(105.06));
        assert_eq!(got.source_updated_on, date(2025, 12, 14));
    }

    #[test]
    fn test_text_scan_fallback() {
        let html = r#"<html><body>
            <p>Markets: Nifty ₹ 24,100.20 up</p>
            <p>The diesel price in Kochi today is ₹ 94.53 per litre.</p>
        </body></html>"#;
        let got = parse_locality_page(html, Fuel::Diesel);
        assert_eq!(got.price, Some(94.53));
        assert_eq!(got.source_updated_on, None);
    }

    #[test]
    fn test_text_scan_unit_suffix() {
        let html = "<html><body><p>Rate: ₹ 89.90 / kg</p></body></html>";
        assert_eq!(parse_locality_page(html, Fuel::Cng).price, Some(89.9));
    }

    #[test]
    fn test_unrelated_content_yields_nothing() {
        let html = r#"<html><body>
            <div class="ticker">Sensex ₹ 81,200.55</div>
            <table><tr><td>Gold</td><td>₹ 7,210</td></tr></table>
        </body></html>"#;
        let got = parse_locality_page(html, Fuel::Petrol);
        assert_eq!(got, LocalityPrice::default());
    }

    #[test]
    fn test_out_of_range_block_falls_through() {
        let html = r#"<html><body>
            <div class="gd-fuel-priceblock"><div class="gd-fuel-price">₹ 0.00/Ltr</div></div>
            <div id="gr_top_intro_content">Petrol costs ₹<b>101.20</b> per litre.</div>
        </body></html>"#;
        assert_eq!(parse_locality_page(html, Fuel::Petrol).price, Some(101.2));
    }
}
