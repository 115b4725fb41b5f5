//! Canonical units of measure and their receipt spellings.
//!
//! Receipts print the same unit a dozen ways (`LBS`, `Lb.`, `lbs`, `pound`).
//! Downstream consumers only ever see the canonical lowercase abbreviation;
//! discrete items carry [`Unit::None`], which serialises as `""`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ItemViolation;

/// A canonical unit of measure, or [`Unit::None`] for discrete items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Unit {
    Lb,
    Kg,
    Gr,
    G,
    Oz,
    Ml,
    L,
    Ea,
    Ct,
    /// Discrete item, no unit. Serialises as the empty string.
    #[default]
    None,
}

/// Every accepted spelling (lowercase, without a trailing dot) and its unit.
///
/// `gr` and `g` are kept apart on purpose: both appear on receipts and the
/// item contract lists them as distinct abbreviations.
const SYNONYMS: &[(&str, Unit)] = &[
    ("lb", Unit::Lb),
    ("lbs", Unit::Lb),
    ("pound", Unit::Lb),
    ("pounds", Unit::Lb),
    ("kg", Unit::Kg),
    ("kgs", Unit::Kg),
    ("kilo", Unit::Kg),
    ("kilos", Unit::Kg),
    ("kilogram", Unit::Kg),
    ("kilograms", Unit::Kg),
    ("gr", Unit::Gr),
    ("grs", Unit::Gr),
    ("g", Unit::G),
    ("gm", Unit::G),
    ("gram", Unit::G),
    ("grams", Unit::G),
    ("oz", Unit::Oz),
    ("ozs", Unit::Oz),
    ("ounce", Unit::Oz),
    ("ounces", Unit::Oz),
    ("ml", Unit::Ml),
    ("mls", Unit::Ml),
    ("milliliter", Unit::Ml),
    ("milliliters", Unit::Ml),
    ("millilitre", Unit::Ml),
    ("millilitres", Unit::Ml),
    ("l", Unit::L),
    ("lt", Unit::L),
    ("ltr", Unit::L),
    ("liter", Unit::L),
    ("liters", Unit::L),
    ("litre", Unit::L),
    ("litres", Unit::L),
    ("ea", Unit::Ea),
    ("each", Unit::Ea),
    ("ct", Unit::Ct),
    ("cnt", Unit::Ct),
    ("count", Unit::Ct),
];

impl Unit {
    /// All measurable units, in a stable order.
    pub const ALL: [Unit; 9] = [
        Unit::Lb,
        Unit::Kg,
        Unit::Gr,
        Unit::G,
        Unit::Oz,
        Unit::Ml,
        Unit::L,
        Unit::Ea,
        Unit::Ct,
    ];

    /// Canonical abbreviation; `""` for [`Unit::None`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Lb => "lb",
            Unit::Kg => "kg",
            Unit::Gr => "gr",
            Unit::G => "g",
            Unit::Oz => "oz",
            Unit::Ml => "ml",
            Unit::L => "l",
            Unit::Ea => "ea",
            Unit::Ct => "ct",
            Unit::None => "",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Unit::None)
    }

    /// Look up a receipt spelling. Case-insensitive; one trailing `.` is ignored.
    ///
    /// Returns `None` for anything that is not a known unit (including the
    /// empty string; use [`Unit::canonicalize`] for field values).
    pub fn from_token(token: &str) -> Option<Unit> {
        let t = token.trim().to_lowercase();
        let t = t.strip_suffix('.').unwrap_or(&t);
        SYNONYMS
            .iter()
            .find(|(spelling, _)| *spelling == t)
            .map(|(_, unit)| *unit)
    }

    /// Canonicalise a `unit` field value: blank → [`Unit::None`], a known
    /// spelling → its unit, anything else → [`ItemViolation::UnknownUnit`].
    pub fn canonicalize(value: &str) -> Result<Unit, ItemViolation> {
        if value.trim().is_empty() {
            return Ok(Unit::None);
        }
        Unit::from_token(value).ok_or_else(|| ItemViolation::UnknownUnit(value.trim().to_string()))
    }

    /// Longest spellings first, so `44dgr` splits as `44d` + `gr`, not `44dg` + `r`.
    pub(crate) fn suffix_spellings() -> Vec<(&'static str, Unit)> {
        let mut v: Vec<_> = SYNONYMS.to_vec();
        v.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        v
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = ItemViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::canonicalize(s)
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Unit::canonicalize(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pound_spellings_collapse_to_lb() {
        for s in ["LBS", "Lb.", "lbs", "lb", "LB", "pounds", "Lbs."] {
            assert_eq!(Unit::canonicalize(s), Ok(Unit::Lb), "spelling {s:?}");
        }
    }

    #[test]
    fn uppercase_abbreviations_canonicalize() {
        assert_eq!(Unit::canonicalize("KG"), Ok(Unit::Kg));
        assert_eq!(Unit::canonicalize("GR"), Ok(Unit::Gr));
        assert_eq!(Unit::canonicalize("OZ"), Ok(Unit::Oz));
        assert_eq!(Unit::canonicalize("ML"), Ok(Unit::Ml));
        assert_eq!(Unit::canonicalize("CT"), Ok(Unit::Ct));
        assert_eq!(Unit::canonicalize("G"), Ok(Unit::G));
        assert_eq!(Unit::canonicalize("L"), Ok(Unit::L));
        assert_eq!(Unit::canonicalize("Each"), Ok(Unit::Ea));
    }

    #[test]
    fn blank_is_discrete() {
        assert_eq!(Unit::canonicalize(""), Ok(Unit::None));
        assert_eq!(Unit::canonicalize("   "), Ok(Unit::None));
    }

    #[test]
    fn unknown_unit_is_rejected() {
        assert_eq!(
            Unit::canonicalize("gal"),
            Err(ItemViolation::UnknownUnit("gal".into()))
        );
    }

    #[test]
    fn canonical_forms_are_fixed_points() {
        for unit in Unit::ALL {
            assert_eq!(Unit::canonicalize(unit.as_str()), Ok(unit));
        }
    }

    #[test]
    fn serde_uses_canonical_strings() {
        assert_eq!(serde_json::to_string(&Unit::Gr).unwrap(), "\"gr\"");
        assert_eq!(serde_json::to_string(&Unit::None).unwrap(), "\"\"");
        let u: Unit = serde_json::from_str("\"LBS\"").unwrap();
        assert_eq!(u, Unit::Lb);
        let u: Unit = serde_json::from_str("null").unwrap();
        assert_eq!(u, Unit::None);
    }

    #[test]
    fn suffixes_longest_first() {
        let s = Unit::suffix_spellings();
        assert!(s.windows(2).all(|w| w[0].0.len() >= w[1].0.len()));
    }
}
