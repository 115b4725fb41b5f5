//! Deterministic item normalization.
//!
//! These rules run on every item regardless of whether the model
//! normalization pass ran, so the output contract never depends on model
//! behaviour. Each rule is a small pure function over lowercase tokens.
//!
//! ## Rule Order
//!
//! 1. Lowercase the name and split it on whitespace
//! 2. Pull an amount + unit out of the name (`44dgr`, `44d gr`, `1.5 lb`),
//!    correcting OCR letter/digit confusions inside the amount only
//! 3. Pull a count out of the name (`2x`, `x2`, `2 x`)
//! 4. Pull a `by <unit>` / `per <unit>` phrase out of the name
//! 5. Strip trailing numeric codes (3+ digits) and stray punctuation
//! 6. Canonicalise the unit and pick the quantity
//!
//! Applying the rules to their own output changes nothing.

use crate::error::ItemViolation;
use crate::output::{LooseNumber, RawItem, ReceiptItem};
use crate::units::Unit;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// An amount as OCR prints it: digits, possibly misread as `o d q` (0) or
/// `i l |` (1), with at most one decimal separator. At least one real digit
/// is required on top of this pattern.
static RE_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9odqil|]+(?:[.,][0-9odqil|]+)?$").unwrap());

static RE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:([0-9]+)[x×]|[x×]([0-9]+))$").unwrap());

static RE_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());

static RE_TRAILING_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{3,}$").unwrap());

static UNIT_SUFFIXES: Lazy<Vec<(&'static str, Unit)>> = Lazy::new(Unit::suffix_spellings);

/// Normalize one raw item into the canonical record.
pub fn normalize_item(raw: &RawItem) -> Result<ReceiptItem, ItemViolation> {
    let price = parse_price(&raw.price)?;
    let raw_quantity = parse_quantity(raw.quantity.as_ref())?;
    let raw_unit = Unit::canonicalize(raw.unit.as_deref().unwrap_or(""))?;
    let parts = parse_name(&raw.name);

    if parts.name.is_empty() && !raw.name.trim().is_empty() {
        warn!("Item name '{}' is empty after normalization", raw.name);
    }

    // a measure in the unit the extractor reported wins over the others
    let measure = parts
        .measures
        .iter()
        .find(|(_, unit)| !raw_unit.is_none() && *unit == raw_unit)
        .or_else(|| parts.measures.first())
        .copied();

    let (quantity, unit) = if let Some((amount, unit)) = measure {
        let total = amount * parts.count.unwrap_or(1.0);
        if !total.is_finite() {
            return Err(ItemViolation::InvalidQuantity(format!(
                "{amount} x {}",
                parts.count.unwrap_or(1.0)
            )));
        }
        (total, unit)
    } else if !raw_unit.is_none() {
        (raw_quantity.unwrap_or(1.0), raw_unit)
    } else if let Some(unit) = parts.by_unit {
        (raw_quantity.unwrap_or(1.0), unit)
    } else {
        (parts.count.or(raw_quantity).unwrap_or(1.0), Unit::None)
    };

    Ok(ReceiptItem {
        name: parts.name,
        price,
        quantity,
        unit,
    })
}

/// Normalize every item, stopping at the first violation (with its index).
pub fn normalize_all(items: &[RawItem]) -> Result<Vec<ReceiptItem>, (usize, ItemViolation)> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| normalize_item(item).map_err(|v| (i, v)))
        .collect()
}

fn parse_price(price: &LooseNumber) -> Result<f64, ItemViolation> {
    let value = price
        .to_f64()
        .ok_or_else(|| ItemViolation::InvalidPrice(price.as_written()))?;
    if value < 0.0 {
        return Err(ItemViolation::NegativePrice(value));
    }
    // -0.0 serialises as "-0"
    Ok(value.abs())
}

/// Missing, zero or negative quantities mean "not stated".
fn parse_quantity(quantity: Option<&LooseNumber>) -> Result<Option<f64>, ItemViolation> {
    match quantity {
        None => Ok(None),
        Some(LooseNumber::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(q) => {
            let value = q
                .to_f64()
                .ok_or_else(|| ItemViolation::InvalidQuantity(q.as_written()))?;
            Ok((value > 0.0).then_some(value))
        }
    }
}

/// What the name carried besides the product words.
#[derive(Debug, Default, PartialEq)]
struct NameParts {
    name: String,
    /// Every amount+unit found, in name order.
    measures: Vec<(f64, Unit)>,
    count: Option<f64>,
    by_unit: Option<Unit>,
}

fn parse_name(raw: &str) -> NameParts {
    let lowered = raw.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    let mut parts = NameParts::default();
    let mut kept: Vec<&str> = Vec::with_capacity(tokens.len());

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        let next = tokens.get(i + 1).copied();

        if let Some(measure) = split_measure(token) {
            parts.measures.push(measure);
            i += 1;
            continue;
        }
        if let (Some(amount), Some(unit)) = (parse_amount(token), next.and_then(Unit::from_token)) {
            parts.measures.push((amount, unit));
            i += 2;
            continue;
        }

        // Only the first count counts; later ones are dropped from the name.
        if RE_COUNT.is_match(token) {
            parts.count = parts.count.or_else(|| parse_count(token));
            i += 1;
            continue;
        }
        if RE_INTEGER.is_match(token) && matches!(next, Some("x") | Some("×")) {
            parts.count = parts.count.or_else(|| valid_count(token));
            i += 2;
            continue;
        }

        if matches!(token, "by" | "per") {
            if let Some(unit) = next.and_then(Unit::from_token) {
                parts.by_unit.get_or_insert(unit);
                i += 2;
                continue;
            }
        }

        kept.push(token);
        i += 1;
    }

    while let Some(last) = kept.last() {
        if RE_TRAILING_CODE.is_match(last) || is_punctuation(last) {
            kept.pop();
        } else {
            break;
        }
    }
    while kept.first().is_some_and(|first| is_punctuation(first)) {
        kept.remove(0);
    }

    parts.name = kept.join(" ");
    parts
}

/// `44dgr` → (440, gr); `1.5lb.` → (1.5, lb). `None` if the token is not amount+unit.
fn split_measure(token: &str) -> Option<(f64, Unit)> {
    let t = token.strip_suffix('.').unwrap_or(token);
    UNIT_SUFFIXES.iter().find_map(|(spelling, unit)| {
        let prefix = t.strip_suffix(spelling)?;
        if prefix.is_empty() {
            return None;
        }
        parse_amount(prefix).map(|amount| (amount, *unit))
    })
}

/// Read an OCR'd amount, fixing letters that stand in for digits.
fn parse_amount(token: &str) -> Option<f64> {
    if !RE_AMOUNT.is_match(token) || !token.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let fixed: String = token
        .chars()
        .map(|c| match c {
            'o' | 'd' | 'q' => '0',
            'i' | 'l' | '|' => '1',
            ',' => '.',
            c => c,
        })
        .collect();
    fixed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_count(token: &str) -> Option<f64> {
    let caps = RE_COUNT.captures(token)?;
    let digits = caps.get(1).or_else(|| caps.get(2))?;
    valid_count(digits.as_str())
}

fn valid_count(digits: &str) -> Option<f64> {
    digits
        .parse::<f64>()
        .ok()
        .filter(|c| c.is_finite() && *c > 0.0)
}

fn is_punctuation(token: &str) -> bool {
    token.chars().all(|c| c.is_ascii_punctuation())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, price: f64, quantity: Option<f64>, unit: &str) -> RawItem {
        RawItem::new(name, price, quantity, unit)
    }

    fn norm(item: RawItem) -> ReceiptItem {
        normalize_item(&item).unwrap()
    }

    #[test]
    fn ocr_digit_confusion_in_single_token() {
        let out = norm(raw("Bread Lvovskiy 44DGR", 3.69, Some(1.0), ""));
        assert_eq!(out, ReceiptItem::new("bread lvovskiy", 3.69, 440.0, Unit::Gr));
    }

    #[test]
    fn ocr_digit_confusion_across_two_tokens() {
        let out = norm(raw("bread lvovskiy 44D GR", 3.69, None, ""));
        assert_eq!(out, ReceiptItem::new("bread lvovskiy", 3.69, 440.0, Unit::Gr));
    }

    #[test]
    fn discrete_item_unchanged() {
        let out = norm(raw("milk", 3.49, Some(1.0), ""));
        assert_eq!(out, ReceiptItem::new("milk", 3.49, 1.0, Unit::None));
    }

    #[test]
    fn discrete_default_when_quantity_missing() {
        let out = norm(raw("Milk", 3.49, None, ""));
        assert_eq!(out.quantity, 1.0);
        assert_eq!(out.unit, Unit::None);
    }

    #[test]
    fn unit_field_is_canonicalised() {
        for spelling in ["LBS", "Lb.", "lbs"] {
            let out = norm(raw("Pickles", 4.12, Some(1.5), spelling));
            assert_eq!(out, ReceiptItem::new("pickles", 4.12, 1.5, Unit::Lb));
        }
        assert_eq!(norm(raw("x", 1.0, Some(2.0), "KG")).unit, Unit::Kg);
        assert_eq!(norm(raw("x", 1.0, Some(2.0), "OZ")).unit, Unit::Oz);
        assert_eq!(norm(raw("x", 1.0, Some(2.0), "ML")).unit, Unit::Ml);
        assert_eq!(norm(raw("x", 1.0, Some(2.0), "CT")).unit, Unit::Ct);
    }

    #[test]
    fn by_unit_without_amount() {
        let out = norm(raw("Salads Mushroom Carrot by LB", 6.22, None, ""));
        assert_eq!(
            out,
            ReceiptItem::new("salads mushroom carrot", 6.22, 1.0, Unit::Lb)
        );
        let out = norm(raw("Candy per oz", 3.0, None, ""));
        assert_eq!(out, ReceiptItem::new("candy", 3.0, 1.0, Unit::Oz));
    }

    #[test]
    fn by_unit_keeps_stated_quantity() {
        let out = norm(raw("bananas by lb", 1.27, Some(2.3), ""));
        assert_eq!(out, ReceiptItem::new("bananas", 1.27, 2.3, Unit::Lb));
    }

    #[test]
    fn count_prefix_becomes_quantity() {
        let out = norm(raw("2x Bread", 5.98, Some(1.0), ""));
        assert_eq!(out, ReceiptItem::new("bread", 5.98, 2.0, Unit::None));
        let out = norm(raw("Soda x3", 2.97, None, ""));
        assert_eq!(out.quantity, 3.0);
        let out = norm(raw("4 x yogurt", 4.0, None, ""));
        assert_eq!(out, ReceiptItem::new("yogurt", 4.0, 4.0, Unit::None));
    }

    #[test]
    fn count_times_measure_is_total_amount() {
        let out = norm(raw("2x Coffee 500G", 17.0, None, ""));
        assert_eq!(out, ReceiptItem::new("coffee", 17.0, 1000.0, Unit::G));
    }

    #[test]
    fn embedded_measure_forms() {
        let out = norm(raw("Coca-Cola 12 OZ", 1.99, Some(1.0), ""));
        assert_eq!(out, ReceiptItem::new("coca-cola", 1.99, 12.0, Unit::Oz));
        let out = norm(raw("coffee 500g", 8.5, None, ""));
        assert_eq!(out, ReceiptItem::new("coffee", 8.5, 500.0, Unit::G));
        let out = norm(raw("olive oil 0,5l", 7.0, None, ""));
        assert_eq!(out, ReceiptItem::new("olive oil", 7.0, 0.5, Unit::L));
        let out = norm(raw("pickles 1.5lbs.", 4.12, None, ""));
        assert_eq!(out, ReceiptItem::new("pickles", 4.12, 1.5, Unit::Lb));
    }

    #[test]
    fn embedded_measure_overrides_raw_pair() {
        let out = norm(raw("bread 440gr", 3.69, Some(1.0), "gr"));
        assert_eq!(out, ReceiptItem::new("bread", 3.69, 440.0, Unit::Gr));
    }

    #[test]
    fn words_that_look_like_units_stay() {
        let out = norm(raw("Gold Oil", 9.99, None, ""));
        assert_eq!(out.name, "gold oil");
        assert_eq!(out.unit, Unit::None);
        let out = norm(raw("7up", 1.5, None, ""));
        assert_eq!(out.name, "7up");
    }

    #[test]
    fn trailing_codes_are_stripped() {
        let out = norm(raw("Egg Challah 1501", 4.99, Some(1.0), ""));
        assert_eq!(out.name, "egg challah");
        let out = norm(raw("Apples 4131 *", 2.0, None, ""));
        assert_eq!(out.name, "apples");
        let out = norm(raw("Mix 12", 2.0, None, ""));
        assert_eq!(out.name, "mix 12");
    }

    #[test]
    fn name_can_become_empty() {
        let out = norm(raw("440GR", 3.69, None, ""));
        assert_eq!(out, ReceiptItem::new("", 3.69, 440.0, Unit::Gr));
    }

    #[test]
    fn unknown_unit_is_a_violation() {
        let err = normalize_item(&raw("Milk", 3.49, Some(1.0), "gal")).unwrap_err();
        assert_eq!(err, ItemViolation::UnknownUnit("gal".into()));
    }

    #[test]
    fn bad_prices_are_violations() {
        let err = normalize_item(&raw("Milk", -3.49, None, "")).unwrap_err();
        assert_eq!(err, ItemViolation::NegativePrice(-3.49));

        let item = RawItem {
            name: "Milk".into(),
            price: LooseNumber::Text("free".into()),
            quantity: None,
            unit: None,
        };
        assert_eq!(
            normalize_item(&item).unwrap_err(),
            ItemViolation::InvalidPrice("free".into())
        );
    }

    #[test]
    fn string_prices_are_read() {
        let item = RawItem {
            name: "Milk".into(),
            price: LooseNumber::Text("$3.49".into()),
            quantity: Some(LooseNumber::Text("1".into())),
            unit: None,
        };
        assert_eq!(norm(item), ReceiptItem::new("milk", 3.49, 1.0, Unit::None));
    }

    #[test]
    fn zero_quantity_means_not_stated() {
        let out = norm(raw("milk", 3.49, Some(0.0), ""));
        assert_eq!(out.quantity, 1.0);
    }

    #[test]
    fn unit_tokens_never_left_in_name() {
        let inputs = [
            "Bread Lvovskiy 44DGR",
            "pickles 1.5 LB",
            "Salads by lb",
            "soda 12oz",
            "milk 1 l",
            "eggs 12 ct",
            "Salmon 1.25 LB 0.57 KG",
            "grapes 2.1lb 0.95kg",
        ];
        for name in inputs {
            let out = norm(raw(name, 1.0, None, ""));
            let tokens: Vec<&str> = out.name.split_whitespace().collect();
            for token in &tokens {
                assert!(
                    split_measure(token).is_none(),
                    "{name:?} left measure {token:?} in {:?}",
                    out.name
                );
            }
            for pair in tokens.windows(2) {
                assert!(
                    parse_amount(pair[0]).is_none() || Unit::from_token(pair[1]).is_none(),
                    "{name:?} left measure {pair:?} in {:?}",
                    out.name
                );
            }
            assert!(!out.unit.is_none(), "{name:?} lost its unit");
        }
    }

    #[test]
    fn rules_are_idempotent() {
        let inputs = vec![
            raw("Bread Lvovskiy 44DGR", 3.69, None, ""),
            raw("Milk", 3.49, Some(1.0), ""),
            raw("Pickles", 4.12, Some(1.5), "LBS"),
            raw("Salads Mushroom Carrot by LB", 6.22, None, ""),
            raw("2x Bread (Wheat)", 2.99, None, ""),
            raw("Egg Challah 1501", 4.99, None, ""),
            raw("2x Coffee 500G", 17.0, None, ""),
            raw("Salmon 1.25 LB 0.57 KG", 12.99, None, ""),
            raw("Salmon 1.25 LB 0.57 KG", 12.99, Some(0.57), "kg"),
            raw("2x Bread x3", 5.98, None, ""),
        ];
        for input in inputs {
            let once = norm(input);
            let twice = norm(RawItem::from(once.clone()));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn every_measure_leaves_the_name() {
        let out = norm(raw("Salmon 1.25 LB 0.57 KG", 12.99, None, ""));
        assert_eq!(out, ReceiptItem::new("salmon", 12.99, 1.25, Unit::Lb));
    }

    #[test]
    fn measure_matching_raw_unit_is_preferred() {
        let out = norm(raw("Salmon 1.25 LB 0.57 KG", 12.99, Some(0.57), "KG"));
        assert_eq!(out, ReceiptItem::new("salmon", 12.99, 0.57, Unit::Kg));
    }

    #[test]
    fn later_counts_are_dropped() {
        let out = norm(raw("2x Bread x3", 5.98, None, ""));
        assert_eq!(out, ReceiptItem::new("bread", 5.98, 2.0, Unit::None));
    }

    #[test]
    fn overflowing_count_is_not_a_count() {
        let name = format!("{}x bread", "9".repeat(400));
        let out = norm(raw(&name, 1.0, None, ""));
        assert_eq!(out, ReceiptItem::new("bread", 1.0, 1.0, Unit::None));
        assert!(out.quantity.is_finite());
    }

    #[test]
    fn overflowing_total_is_invalid_quantity() {
        // ~1e20 packs of ~1e300 g each
        let name = format!("{}x coffee {}g", "9".repeat(20), "9".repeat(300));
        let err = normalize_item(&raw(&name, 1.0, None, "")).unwrap_err();
        assert!(matches!(err, ItemViolation::InvalidQuantity(_)));
    }

    #[test]
    fn normalize_all_preserves_order_and_reports_index() {
        let items = vec![
            raw("b", 1.0, None, ""),
            raw("a", 2.0, None, ""),
            raw("c", 3.0, None, ""),
        ];
        let out = normalize_all(&items).unwrap();
        let names: Vec<_> = out.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["b", "a", "c"]);

        let bad = vec![raw("ok", 1.0, None, ""), raw("bad", 1.0, None, "furlong")];
        let (index, violation) = normalize_all(&bad).unwrap_err();
        assert_eq!(index, 1);
        assert_eq!(violation, ItemViolation::UnknownUnit("furlong".into()));
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(normalize_all(&[]).unwrap().is_empty());
    }

    #[test]
    fn amount_parsing() {
        assert_eq!(parse_amount("44d"), Some(440.0));
        assert_eq!(parse_amount("l.5"), Some(1.5));
        assert_eq!(parse_amount("1,5"), Some(1.5));
        assert_eq!(parse_amount("oil"), None);
        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount("1.2.3"), None);
    }
}
