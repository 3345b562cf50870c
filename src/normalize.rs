// Per-field normalization rules. Pure functions, no I/O, no state;
// every supplier decoder funnels through these so the canonical model
// means the same thing regardless of which upstream produced it.

use crate::model::Leg;
use serde_json::Value;

// Duration arrives either as a bare minute count or as "H:MM".
//
// Upstream quirk: some gateways send an already-total minute value in the
// hour slot ("195:0"). An hour component above 24 is therefore treated as
// the total itself, not multiplied out. Pinned by tests; do not change
// without supplier confirmation.
pub fn parse_duration_minutes(raw: &Value) -> Option<u32> {
    match raw {
        Value::Number(n) => n.as_u64().map(|v| v as u32),
        Value::String(s) => parse_duration_str(s),
        _ => None,
    }
}

pub fn parse_duration_str(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    match trimmed.split_once(':') {
        Some((hours, minutes)) => {
            let hours: u32 = hours.trim().parse().ok()?;
            let minutes: u32 = minutes.trim().parse().ok()?;
            if hours > 24 {
                Some(hours)
            } else {
                Some(hours * 60 + minutes)
            }
        }
        None => trimmed.parse().ok(),
    }
}

// Case-insensitive lookup against the fixed cabin table. Unrecognized
// tokens are title-cased and passed through, never rejected.
pub fn canonical_cabin(raw: &str) -> String {
    match raw.trim().to_lowercase().as_str() {
        "y" | "economy" => "Economy".to_string(),
        "w" | "premium_economy" | "premium economy" => "Premium Economy".to_string(),
        "c" | "j" | "business" => "Business".to_string(),
        "f" | "first" => "First".to_string(),
        other => title_case(other),
    }
}

fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// Baggage allowances come back with a trailing passenger-type qualifier
// ("30 KG/ADT"). Strip it and collapse empties to None.
pub fn clean_luggage(raw: &str) -> Option<String> {
    let mut cleaned = raw.trim();
    if let Some(idx) = cleaned.rfind('/') {
        let suffix = &cleaned[idx + 1..];
        if !suffix.is_empty()
            && suffix.len() <= 3
            && suffix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            cleaned = cleaned[..idx].trim_end();
        }
    }
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

// Refundability token deny-list. Absence means non-refundable.
pub fn infer_refundable(raw: Option<&str>) -> bool {
    match raw {
        None => false,
        Some(s) => {
            let token = s.trim().to_lowercase();
            !token.is_empty() && !matches!(token.as_str(), "-" | "no" | "false" | "0")
        }
    }
}

// taxes = total - base, never negative. Suppliers occasionally report a
// base fare above the payable total after their own discounting.
pub fn derive_taxes(total: f64, base_fare: f64) -> f64 {
    (total - base_fare).max(0.0)
}

// Minimum strictly-positive capacity across every segment of every leg.
// 0 means unknown/unavailable, not infinite.
pub fn seats_available(legs: &[Leg]) -> u32 {
    legs.iter()
        .flat_map(|leg| leg.segments.iter())
        .map(|segment| segment.capacity)
        .filter(|&capacity| capacity > 0)
        .min()
        .unwrap_or(0)
}

pub fn currency_symbol(code: &str) -> String {
    match code.to_uppercase().as_str() {
        "USD" => "$",
        "EUR" => "€",
        "GBP" => "£",
        "JPY" => "¥",
        "HUF" => "Ft",
        "INR" => "₹",
        other => return other.to_string(),
    }
    .to_string()
}

pub fn currency_decimal_places(code: &str) -> u8 {
    match code.to_uppercase().as_str() {
        "JPY" | "KRW" | "VND" => 0,
        "KWD" | "BHD" | "OMR" => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("3:30", Some(210); "#1 hours and minutes")]
    #[test_case("0:45", Some(45); "#2 under an hour")]
    #[test_case("195:0", Some(195); "#3 hour slot already holds total minutes")]
    #[test_case("24:10", Some(1450); "#4 boundary hour is still multiplied")]
    #[test_case("120", Some(120); "#5 bare integer string passes through")]
    #[test_case("abc", None; "#6 garbage yields none")]
    #[test_case("", None; "#7 empty yields none")]
    fn duration_parsing(raw: &str, expected: Option<u32>) {
        assert_eq!(parse_duration_str(raw), expected);
    }

    #[test]
    fn duration_accepts_bare_json_integer() {
        assert_eq!(
            parse_duration_minutes(&serde_json::json!(185)),
            Some(185)
        );
        assert_eq!(parse_duration_minutes(&serde_json::json!("2:05")), Some(125));
        assert_eq!(parse_duration_minutes(&serde_json::json!(null)), None);
        assert_eq!(parse_duration_minutes(&serde_json::json!(-5)), None);
    }

    #[test_case("Y", "Economy"; "#1 iata code")]
    #[test_case("economy", "Economy"; "#2 lowercase word")]
    #[test_case(" Economy ", "Economy"; "#3 padded canonical")]
    #[test_case("premium_economy", "Premium Economy"; "#4 underscore token")]
    #[test_case("W", "Premium Economy"; "#5 premium iata code")]
    #[test_case("j", "Business"; "#6 business j class")]
    #[test_case("C", "Business"; "#7 business c class")]
    #[test_case("FIRST", "First"; "#8 shouting first")]
    #[test_case("suite class", "Suite Class"; "#9 unknown is title cased")]
    fn cabin_canonicalization(raw: &str, expected: &str) {
        assert_eq!(canonical_cabin(raw), expected);
    }

    #[test]
    fn cabin_canonicalization_is_idempotent() {
        for canonical in ["Economy", "Premium Economy", "Business", "First"] {
            assert_eq!(canonical_cabin(canonical), canonical);
        }
    }

    #[test_case("30 KG/ADT ", Some("30 KG"); "#1 strips passenger qualifier")]
    #[test_case("2 PC/CHD", Some("2 PC"); "#2 piece allowance")]
    #[test_case("23 KG", Some("23 KG"); "#3 no qualifier untouched")]
    #[test_case("   ", None; "#4 whitespace only")]
    #[test_case("", None; "#5 empty")]
    #[test_case("/ADT", None; "#6 qualifier only collapses to none")]
    fn luggage_cleanup(raw: &str, expected: Option<&str>) {
        assert_eq!(clean_luggage(raw).as_deref(), expected);
    }

    #[test_case(Some("-"), false; "#1 dash means non refundable")]
    #[test_case(Some("no"), false; "#2 no")]
    #[test_case(Some("FALSE"), false; "#3 case insensitive false")]
    #[test_case(Some("0"), false; "#4 zero")]
    #[test_case(Some("yes"), true; "#5 yes")]
    #[test_case(Some("refundable with fee"), true; "#6 any other text")]
    #[test_case(Some("  "), false; "#7 blank")]
    #[test_case(None, false; "#8 missing defaults to non refundable")]
    fn refundability_inference(raw: Option<&str>, expected: bool) {
        assert_eq!(infer_refundable(raw), expected);
    }

    #[test]
    fn taxes_never_negative() {
        assert_eq!(derive_taxes(500.0, 520.0), 0.0);
        assert_eq!(derive_taxes(500.0, 420.0), 80.0);
    }

    #[test]
    fn currency_presentation_metadata() {
        assert_eq!(currency_symbol("EUR"), "€");
        assert_eq!(currency_symbol("XYZ"), "XYZ");
        assert_eq!(currency_decimal_places("JPY"), 0);
        assert_eq!(currency_decimal_places("KWD"), 3);
        assert_eq!(currency_decimal_places("EUR"), 2);
    }
}
