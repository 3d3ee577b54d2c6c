//! Tier identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One level of the summarization hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TierLevel {
    /// Full text.
    L1,
    /// First compression of the tier-1 summary.
    L2,
    /// Second compression.
    L3,
}

impl TierLevel {
    /// All tiers, most detailed first.
    pub const ALL: [TierLevel; 3] = [TierLevel::L1, TierLevel::L2, TierLevel::L3];

    /// Numeric tier id (1..=3).
    pub fn number(self) -> u8 {
        match self {
            TierLevel::L1 => 1,
            TierLevel::L2 => 2,
            TierLevel::L3 => 3,
        }
    }

    /// Parse a numeric tier id.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(TierLevel::L1),
            2 => Some(TierLevel::L2),
            3 => Some(TierLevel::L3),
            _ => None,
        }
    }

    /// Name the router uses for this tier's server.
    pub fn server_name(self) -> &'static str {
        match self {
            TierLevel::L1 => "server1",
            TierLevel::L2 => "server2",
            TierLevel::L3 => "server3",
        }
    }

    /// Tier whose summary this tier is built from. Tier 1 reads documents.
    pub fn source(self) -> Option<Self> {
        match self {
            TierLevel::L1 => None,
            TierLevel::L2 => Some(TierLevel::L1),
            TierLevel::L3 => Some(TierLevel::L2),
        }
    }

    /// Tier that consumes this tier's summary.
    pub fn next(self) -> Option<Self> {
        match self {
            TierLevel::L1 => Some(TierLevel::L2),
            TierLevel::L2 => Some(TierLevel::L3),
            TierLevel::L3 => None,
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.number())
    }
}

impl From<TierLevel> for u8 {
    fn from(tier: TierLevel) -> Self {
        tier.number()
    }
}

impl TryFrom<u8> for TierLevel {
    type Error = String;

    fn try_from(n: u8) -> std::result::Result<Self, Self::Error> {
        TierLevel::from_number(n).ok_or_else(|| format!("invalid tier {n}, expected 1..=3"))
    }
}

impl FromStr for TierLevel {
    type Err = String;

    /// Accepts `1`, `L1`, `l1` or `server1`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let digits = trimmed
            .strip_prefix("server")
            .or_else(|| trimmed.strip_prefix('l'))
            .unwrap_or(&trimmed);
        digits
            .parse::<u8>()
            .ok()
            .and_then(TierLevel::from_number)
            .ok_or_else(|| format!("unknown tier: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_variants() {
        assert_eq!("2".parse::<TierLevel>(), Ok(TierLevel::L2));
        assert_eq!("L3".parse::<TierLevel>(), Ok(TierLevel::L3));
        assert_eq!("server1".parse::<TierLevel>(), Ok(TierLevel::L1));
        assert!("server4".parse::<TierLevel>().is_err());
        assert!("".parse::<TierLevel>().is_err());
    }

    #[test]
    fn test_source_chain() {
        assert_eq!(TierLevel::L1.source(), None);
        assert_eq!(TierLevel::L3.source(), Some(TierLevel::L2));
        assert_eq!(TierLevel::L1.next(), Some(TierLevel::L2));
        assert_eq!(TierLevel::L3.next(), None);
    }

    #[test]
    fn test_serde_as_number() {
        let json = serde_json::to_string(&TierLevel::L2).unwrap();
        assert_eq!(json, "2");
        let back: TierLevel = serde_json::from_str("3").unwrap();
        assert_eq!(back, TierLevel::L3);
        assert!(serde_json::from_str::<TierLevel>("7").is_err());
    }
}
