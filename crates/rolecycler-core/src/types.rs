use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque platform identifier of a member (e.g. a Discord user snowflake).
///
/// The engine never interprets the value beyond equality and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub u64);

impl MemberId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MemberId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl FromStr for MemberId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Identifies one rotation domain (one managed group, e.g. a guild).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub u64);

impl DomainId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DomainId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl FromStr for DomainId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn ids_serialise_as_plain_integers() {
        assert_eq!(serde_json::to_string(&MemberId(42)).unwrap(), "42");
        let d: DomainId = serde_json::from_str("7").unwrap();
        assert_eq!(d, DomainId(7));
    }

    #[test]
    fn member_id_works_as_json_map_key() {
        let mut m = BTreeMap::new();
        m.insert(MemberId(3), 1u32);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"3":1}"#);
        let back: BTreeMap<MemberId, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn parse_from_text() {
        assert_eq!(" 123 ".parse::<MemberId>().unwrap(), MemberId(123));
        assert!("abc".parse::<DomainId>().is_err());
    }
}
