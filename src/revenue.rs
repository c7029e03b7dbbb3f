//! Revenue string normalization.
//!
//! Self-reported revenue arrives as free text ("$1,200/mo", "$12k/yr",
//! "MRR $500"). [`parse_revenue`] reduces it to a monthly figure so records
//! can be compared and aggregated. The stored string is never rewritten;
//! callers derive the number on demand.

use regex::Regex;
use std::sync::LazyLock;

/// First number, optionally followed by a standalone `k`/`m`/`b` magnitude.
/// The integer part may be omitted (`.5k`).
///
/// The trailing `\b` keeps words like "monthly" or "MRR" from being read as
/// a magnitude: after `m` in "monthly" there is no word boundary, so the
/// optional group backs off to empty.
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)((?:\d[\d,]*)?\.?\d+)\s*([kmb])?\b").expect("valid amount regex")
});

static ANNUAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:yr|year|annual|annum)\b").expect("valid annual regex"));

/// Parse a revenue string into a non-negative monthly estimate.
///
/// Total: empty, missing, or digit-free input yields `0.0`.
pub fn parse_revenue(revenue: Option<&str>) -> f64 {
    let Some(revenue) = revenue.filter(|r| !r.trim().is_empty()) else {
        return 0.0;
    };

    let Some(caps) = AMOUNT.captures(revenue) else {
        return 0.0;
    };

    let digits = caps[1].replace(',', "");
    let Ok(mut amount) = digits.parse::<f64>() else {
        return 0.0;
    };

    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();
    amount *= match unit.as_str() {
        "k" => 1_000.0,
        "m" => 1_000_000.0,
        "b" => 1_000_000_000.0,
        _ => 1.0,
    };

    if ANNUAL.is_match(revenue) {
        amount /= 12.0;
    }

    if amount.is_finite() {
        amount.max(0.0)
    } else {
        0.0
    }
}
