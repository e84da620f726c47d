use serde::{Deserialize, Deserializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Largest value a job's `priority` column (smallint) can hold.
pub const MAXIMUM_PRIORITY: i16 = i16::MAX;

/// The least urgent priority a worker (and its buffer lane) will accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PriorityThreshold {
    /// Accepts jobs of any priority.
    Any,
    /// Accepts jobs whose priority is numerically less than or equal to the value.
    AtMost(i16),
}

impl PriorityThreshold {
    /// Numeric ceiling used for ordering lanes and sizing poll requests.
    pub fn ceiling(&self) -> i16 {
        match self {
            PriorityThreshold::Any => MAXIMUM_PRIORITY,
            PriorityThreshold::AtMost(value) => *value,
        }
    }

    pub fn accepts(&self, priority: i16) -> bool {
        match self {
            PriorityThreshold::Any => true,
            PriorityThreshold::AtMost(value) => priority <= *value,
        }
    }

    /// Column representation in the `lockers` table (`NULL` for any priority).
    pub fn as_option(&self) -> Option<i16> {
        match self {
            PriorityThreshold::Any => None,
            PriorityThreshold::AtMost(value) => Some(*value),
        }
    }
}

impl Ord for PriorityThreshold {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = |t: &PriorityThreshold| (t.ceiling(), matches!(t, PriorityThreshold::Any));
        rank(self).cmp(&rank(other))
    }
}

impl PartialOrd for PriorityThreshold {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PriorityThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityThreshold::Any => f.write_str("any"),
            PriorityThreshold::AtMost(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid priority threshold: {0}")]
pub struct InvalidPriorityThreshold(pub String);

impl FromStr for PriorityThreshold {
    type Err = InvalidPriorityThreshold;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("any") {
            return Ok(PriorityThreshold::Any);
        }
        trimmed
            .parse::<i16>()
            .map(PriorityThreshold::AtMost)
            .map_err(|_| InvalidPriorityThreshold(value.to_string()))
    }
}

impl<'de> Deserialize<'de> for PriorityThreshold {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => i16::try_from(value)
                .map(PriorityThreshold::AtMost)
                .map_err(|_| serde::de::Error::custom(InvalidPriorityThreshold(value.to_string()))),
            Raw::Text(value) => value.parse().map_err(serde::de::Error::custom),
        }
    }
}
