//! Text-level helpers shared by the listing and detail page extractors.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

static RUPEE_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"₹\s*(-?\d[\d,]*(?:\.\d+)?)").expect("rupee regex"));

static PLAIN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("number regex"));

static UPDATED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2})(?:st|nd|rd|th)?\s+([A-Za-z]+),?\s+(\d{4})").expect("date regex")
});

static KG_UNIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bkg\b").expect("kg regex"));

static LITRE_UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:ltr|litre|liter)\b").expect("litre regex"));

// ── Numbers ───────────────────────────────────────────────────────────────────

/// Parse a price, preferring a ₹-marked amount over the first bare number.
/// "₹ 1,103.00 / 14.2 kg" → 1103.0 | "94.72" → 94.72
pub fn parse_price(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let raw = RUPEE_AMOUNT
        .captures(s)
        .and_then(|c| c.get(1))
        .or_else(|| PLAIN_NUMBER.find(s))?
        .as_str();
    let n: f64 = raw.replace(',', "").parse().ok()?;
    n.is_finite().then_some(n)
}

pub fn has_rupee(s: &str) -> bool {
    s.contains('₹')
}

// ── Units ─────────────────────────────────────────────────────────────────────

/// Text quotes a per-kilogram price rather than a 14.2 kg cylinder.
pub fn mentions_per_kg(s: &str) -> bool {
    let t = s.to_lowercase();
    KG_UNIT.is_match(&t) && !t.contains("14.2")
}

pub fn mentions_cylinder(s: &str) -> bool {
    let t = s.to_lowercase();
    t.contains("14.2") && t.contains("kg")
}

pub fn mentions_litre(s: &str) -> bool {
    LITRE_UNIT.is_match(&s.to_lowercase())
}

// ── Dates ─────────────────────────────────────────────────────────────────────

fn month_number(name: &str) -> Option<u32> {
    let m = match name.to_lowercase().as_str() {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(m)
}

/// Parse an "updated on" label: "13th Dec, 2025" | "12th December, 2025".
pub fn parse_updated_date(s: &str) -> Option<NaiveDate> {
    let collapsed = collapse_whitespace(s);
    let caps = UPDATED_DATE.captures(&collapsed)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month = month_number(caps.get(2)?.as_str())?;
    let year: i32 = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

// ── Names ─────────────────────────────────────────────────────────────────────

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matching key for a locality: lowercase, runs of non-alphanumerics → one space.
pub fn normalize_key(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    collapse_whitespace(&mapped)
}

/// Like [`normalize_key`] but folds `&` into "and" first, for region names.
pub fn normalize_region_name(s: &str) -> String {
    normalize_key(&s.replace('&', " and "))
}

/// Detail-page slug guessed from a display name: "Navi Mumbai" → "navi-mumbai".
pub fn slugify(s: &str) -> Option<String> {
    let mut slug = String::with_capacity(s.len());
    for c in s.to_lowercase().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() { None } else { Some(slug) }
}

pub fn has_letter(s: &str) -> bool {
    s.chars().any(char::is_alphabetic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("₹ 1,103.00 / 14.2 kg"), Some(1103.0));
        assert_eq!(parse_price("94.72"), Some(94.72));
        assert_eq!(parse_price("Rs 14.2 kg ₹ 853.50"), Some(853.5));
        assert_eq!(parse_price("—"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn test_parse_updated_date_variants() {
        let a = parse_updated_date("13th Dec, 2025");
        let b = parse_updated_date("12th December, 2025");
        assert_eq!(a, NaiveDate::from_ymd_opt(2025, 12, 13));
        assert_eq!(b, NaiveDate::from_ymd_opt(2025, 12, 12));
        assert_eq!(
            parse_updated_date("Updated on:  1st   Sept 2024"),
            NaiveDate::from_ymd_opt(2024, 9, 1)
        );
    }

    #[test]
    fn test_parse_updated_date_rejects_junk() {
        assert_eq!(parse_updated_date(""), None);
        assert_eq!(parse_updated_date("yesterday"), None);
        assert_eq!(parse_updated_date("13th Smarch, 2025"), None);
        assert_eq!(parse_updated_date("31st Feb, 2025"), None);
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  Port-Blair "), "port blair");
        assert_eq!(normalize_key("Thiruvananthapuram (Trivandrum)"), "thiruvananthapuram trivandrum");
        assert_eq!(normalize_region_name("Andaman & Nicobar"), "andaman and nicobar");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Navi Mumbai").as_deref(), Some("navi-mumbai"));
        assert_eq!(slugify(" --Port  Blair-- ").as_deref(), Some("port-blair"));
        assert_eq!(slugify("***"), None);
    }

    #[test]
    fn test_unit_detection() {
        assert!(mentions_per_kg("₹ 76.50 / kg"));
        assert!(!mentions_per_kg("₹ 853 / 14.2 kg"));
        assert!(mentions_cylinder("₹ 853 / 14.2 Kg"));
        assert!(mentions_litre("₹ 94.72 / Ltr"));
        assert!(!mentions_litre("₹ 76.50 / kg"));
    }
}
