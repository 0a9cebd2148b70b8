use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Dotted numeric modpack version, e.g. `1.2.10`.
///
/// Missing components count as 0, so `1.2` and `1.2.0` are equal.
/// Comparison is lexicographic on the integer components, which makes
/// `1.2.10` greater than `1.2.9`. Non-numeric suffixes on a component
/// (`10-beta`) are stripped before parsing; a component with no leading
/// digits parses as 0.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    components: Vec<u64>,
    raw: String,
}

impl Version {
    pub const ZERO: &'static str = "0.0.0";

    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim().trim_matches('"');
        let components = trimmed
            .split('.')
            .map(parse_component)
            .collect::<Vec<u64>>();
        Self {
            components,
            raw: trimmed.to_string(),
        }
    }

    pub fn zero() -> Self {
        Self::parse(Self::ZERO)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn component(&self, idx: usize) -> u64 {
        self.components.get(idx).copied().unwrap_or(0)
    }
}

/// Keep digits up to the first non-digit character; empty means 0.
fn parse_component(component: &str) -> u64 {
    let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for idx in 0..len {
            match self.component(idx).cmp(&other.component(idx)) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl From<&str> for Version {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::zero()
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Version::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_components_are_zero() {
        assert_eq!(Version::parse("1.2"), Version::parse("1.2.0"));
        assert_eq!(Version::parse("1"), Version::parse("1.0.0.0"));
    }

    #[test]
    fn numeric_not_string_ordering() {
        assert!(Version::parse("1.2.10") > Version::parse("1.2.9"));
        assert!(Version::parse("0.10.0") > Version::parse("0.9.9"));
    }

    #[test]
    fn suffixes_are_stripped() {
        assert_eq!(Version::parse("1.2.3-beta"), Version::parse("1.2.3"));
        // A component with no leading digits is 0 after the strip.
        assert_eq!(Version::parse("1.rc1.0"), Version::parse("1.0.0"));
    }

    #[test]
    fn quotes_are_tolerated() {
        assert_eq!(Version::parse("\"1.5.0\""), Version::parse("1.5.0"));
        assert_eq!(Version::parse("\"1.5.0\"").as_str(), "1.5.0");
    }

    #[test]
    fn zero_is_the_floor() {
        assert!(Version::zero() < Version::parse("0.0.1"));
        assert_eq!(Version::zero(), Version::parse(""));
    }

    #[test]
    fn serde_round_trip_is_identity() {
        let v = Version::parse("2.4.1");
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"2.4.1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
