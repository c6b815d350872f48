//! Binary market outcome.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the two sides of a binary market.
///
/// The upstream feed reports sides by index (0 / 1); that mapping lives in
/// [`Outcome::from_index`] and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    SideA,
    SideB,
}

impl Outcome {
    pub const ALL: [Outcome; 2] = [Outcome::SideA, Outcome::SideB];

    pub fn index(self) -> usize {
        match self {
            Outcome::SideA => 0,
            Outcome::SideB => 1,
        }
    }

    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Outcome::SideA),
            1 => Some(Outcome::SideB),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Outcome::SideA => Outcome::SideB,
            Outcome::SideB => Outcome::SideA,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::SideA => "SIDE_A",
            Outcome::SideB => "SIDE_B",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SIDE_A" => Ok(Outcome::SideA),
            "SIDE_B" => Ok(Outcome::SideB),
            other => anyhow::bail!("Unknown outcome: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_mapping() {
        assert_eq!(Outcome::from_index(0), Some(Outcome::SideA));
        assert_eq!(Outcome::from_index(1), Some(Outcome::SideB));
        assert_eq!(Outcome::from_index(2), None);
        assert_eq!(Outcome::SideB.index(), 1);
        assert_eq!(Outcome::SideA.opposite(), Outcome::SideB);
    }

    #[test]
    fn test_string_round_trip() {
        assert_eq!("side_b".parse::<Outcome>().unwrap(), Outcome::SideB);
        assert_eq!(Outcome::SideA.to_string(), "SIDE_A");
        assert!("YES".parse::<Outcome>().is_err());
    }
}
