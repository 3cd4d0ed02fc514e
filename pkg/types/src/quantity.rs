use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// A resource quantity (CPU, memory, GPU count, ...) stored canonically
/// as milli-units, so `"1000m"` and `"1"` compare equal.
///
/// Supported forms: plain decimals (`"4"`, `"1.5"`), the `m` milli
/// suffix, decimal suffixes `k M G T P`, and binary suffixes
/// `Ki Mi Gi Ti Pi`. Precision below one milli-unit is truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Quantity {
    millis: i128,
}

impl Quantity {
    /// The additive identity.
    pub fn zero() -> Self {
        Quantity { millis: 0 }
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Construct from whole units.
    pub fn from_units(units: i64) -> Self {
        Quantity {
            millis: units as i128 * 1000,
        }
    }

    /// Construct from milli-units (e.g. CPU millicores).
    pub fn from_millis(millis: i64) -> Self {
        Quantity {
            millis: millis as i128,
        }
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity {
            millis: self.millis.saturating_add(other.millis),
        }
    }

    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity {
            millis: self.millis.saturating_sub(other.millis),
        }
    }
}

impl Add for Quantity {
    type Output = Quantity;
    fn add(self, other: Quantity) -> Quantity {
        self.saturating_add(other)
    }
}

impl Sub for Quantity {
    type Output = Quantity;
    fn sub(self, other: Quantity) -> Quantity {
        self.saturating_sub(other)
    }
}

/// Multiplier applied to a parsed mantissa, in whole units.
fn suffix_multiplier(suffix: &str) -> Option<i128> {
    match suffix {
        "" => Some(1),
        "k" => Some(1_000),
        "M" => Some(1_000_000),
        "G" => Some(1_000_000_000),
        "T" => Some(1_000_000_000_000),
        "P" => Some(1_000_000_000_000_000),
        "Ki" => Some(1 << 10),
        "Mi" => Some(1 << 20),
        "Gi" => Some(1 << 30),
        "Ti" => Some(1 << 40),
        "Pi" => Some(1 << 50),
        _ => None,
    }
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("empty quantity");
        }

        // Split mantissa from suffix at the first non-numeric char.
        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
            .unwrap_or(s.len());
        let (mantissa, suffix) = s.split_at(split);

        // Milli suffix scales down instead of up.
        let (milli, suffix) = if suffix == "m" {
            (true, "")
        } else {
            (false, suffix)
        };

        let multiplier = suffix_multiplier(suffix)
            .ok_or_else(|| anyhow::anyhow!("invalid quantity suffix '{}' in '{}'", suffix, s))?;

        let negative = mantissa.starts_with('-');
        let mantissa = mantissa.strip_prefix('-').unwrap_or(mantissa);

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            anyhow::bail!("invalid quantity '{}'", s);
        }

        let int_val: i128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid quantity '{}'", s))?
        };

        // Fraction digits contribute frac/10^len of a unit.
        let mut frac_val: i128 = 0;
        let mut frac_denom: i128 = 1;
        for c in frac_part.chars() {
            let d = c
                .to_digit(10)
                .ok_or_else(|| anyhow::anyhow!("invalid quantity '{}'", s))?;
            frac_val = frac_val
                .checked_mul(10)
                .and_then(|v| v.checked_add(d as i128))
                .ok_or_else(|| anyhow::anyhow!("quantity '{}' out of range", s))?;
            frac_denom = frac_denom
                .checked_mul(10)
                .ok_or_else(|| anyhow::anyhow!("quantity '{}' out of range", s))?;
        }

        // Checked throughout: a well-formed string with an extreme
        // mantissa must surface as a parse error, not wrap.
        let scale = if milli { 1 } else { 1000 };
        let whole = int_val
            .checked_mul(scale)
            .and_then(|v| v.checked_mul(multiplier));
        let frac = frac_val
            .checked_mul(scale)
            .and_then(|v| v.checked_mul(multiplier))
            .map(|v| v / frac_denom);
        let mut millis = match (whole, frac) {
            (Some(w), Some(f)) => w
                .checked_add(f)
                .ok_or_else(|| anyhow::anyhow!("quantity '{}' out of range", s))?,
            _ => anyhow::bail!("quantity '{}' out of range", s),
        };
        if negative {
            millis = -millis;
        }

        Ok(Quantity { millis })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 == 0 {
            write!(f, "{}", self.millis / 1000)
        } else {
            write!(f, "{}m", self.millis)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a quantity string like \"4\", \"500m\" or \"2Gi\", or an integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
        v.parse().map_err(de::Error::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        let units = i64::try_from(v)
            .map_err(|_| de::Error::custom(format!("quantity {} out of range", v)))?;
        Ok(Quantity::from_units(units))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        Ok(Quantity::from_units(v))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Quantity, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

/// Sparse map of resource-name → quantity. A missing key means zero.
pub type ResourceList = BTreeMap<String, Quantity>;

/// Look up a resource, treating absence as zero.
pub fn get_or_zero(list: &ResourceList, name: &str) -> Quantity {
    list.get(name).copied().unwrap_or_else(Quantity::zero)
}

/// Accumulate `src` into `dst` entry by entry.
pub fn add_list(dst: &mut ResourceList, src: &ResourceList) {
    for (name, q) in src {
        let entry = dst.entry(name.clone()).or_insert_with(Quantity::zero);
        *entry = entry.saturating_add(*q);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn parse_plain_and_milli() {
        assert_eq!(q("4"), Quantity::from_units(4));
        assert_eq!(q("500m"), Quantity::from_millis(500));
        assert_eq!(q("0"), Quantity::zero());
    }

    #[test]
    fn milli_equals_unit_scale() {
        // "1000m" CPU equals "1" CPU
        assert_eq!(q("1000m"), q("1"));
        assert_eq!(q("1500m"), q("1.5"));
    }

    #[test]
    fn binary_and_decimal_suffixes() {
        assert_eq!(q("1Ki"), Quantity::from_units(1024));
        assert_eq!(q("1k"), Quantity::from_units(1000));
        assert_eq!(q("2Gi"), Quantity::from_units(2 * (1 << 30)));
        assert_eq!(q("1.5Gi"), Quantity::from_units(3 * (1 << 29)));
    }

    #[test]
    fn ordering() {
        assert!(q("500m") < q("1"));
        assert!(q("2Gi") > q("1G"));
        assert_eq!(q("1").cmp(&q("1000m")), std::cmp::Ordering::Equal);
    }

    #[test]
    fn display_round_trips() {
        for s in ["4", "1500m", "0", "1073741824"] {
            let parsed = q(s);
            assert_eq!(parsed, q(&parsed.to_string()));
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(Quantity::from_str("").is_err());
        assert!(Quantity::from_str("abc").is_err());
        assert!(Quantity::from_str("1X").is_err());
    }

    #[test]
    fn extreme_mantissas_error_instead_of_wrapping() {
        // Well-formed but beyond what milli-unit i128 can hold.
        assert!(Quantity::from_str(&"9".repeat(38)).is_err());
        assert!(Quantity::from_str(&format!("{}P", "9".repeat(30))).is_err());
        assert!(Quantity::from_str(&format!("1.{}", "1".repeat(40))).is_err());
        assert!(Quantity::from_str(&format!("-{}Pi", "9".repeat(25))).is_err());

        // Largest tracked scales still parse.
        assert!(Quantity::from_str("999P").is_ok());
        assert!(Quantity::from_str("999Pi").is_ok());
    }

    #[test]
    fn serde_as_string() {
        let v: Quantity = serde_json::from_str("\"250m\"").unwrap();
        assert_eq!(v, Quantity::from_millis(250));
        let v: Quantity = serde_json::from_str("3").unwrap();
        assert_eq!(v, Quantity::from_units(3));
        assert_eq!(serde_json::to_string(&q("1500m")).unwrap(), "\"1500m\"");

        // Integers above i64 range are rejected, not wrapped.
        let over = u64::MAX.to_string();
        assert!(serde_json::from_str::<Quantity>(&over).is_err());
    }

    #[test]
    fn sparse_list_treats_missing_as_zero() {
        let mut list = ResourceList::new();
        assert_eq!(get_or_zero(&list, "cpu"), Quantity::zero());
        list.insert("cpu".into(), q("2"));

        let mut sum = ResourceList::new();
        add_list(&mut sum, &list);
        add_list(&mut sum, &list);
        assert_eq!(get_or_zero(&sum, "cpu"), q("4"));
        assert_eq!(get_or_zero(&sum, "memory"), Quantity::zero());
    }
}
