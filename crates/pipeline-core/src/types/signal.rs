//! Directional signal types shared by every pipeline stage.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Same as [`Direction::sign`] for the f64 scoring paths.
    pub fn sign_f64(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// Parse the database representation.
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recommendation produced by the analysis and decision stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    #[default]
    Hold,
    Long,
    Short,
}

impl Recommendation {
    /// Directional component, `None` for hold.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Recommendation::Hold => None,
            Recommendation::Long => Some(Direction::Long),
            Recommendation::Short => Some(Direction::Short),
        }
    }

    pub fn is_hold(self) -> bool {
        matches!(self, Recommendation::Hold)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Hold => "hold",
            Recommendation::Long => "long",
            Recommendation::Short => "short",
        }
    }

    /// Accepts the loose vocabulary upstream providers use ("buy", "SELL",
    /// "bullish", ...). Anything unrecognised is a hold.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" | "bullish" => Recommendation::Long,
            "short" | "sell" | "bearish" => Recommendation::Short,
            _ => Recommendation::Hold,
        }
    }
}

impl From<Direction> for Recommendation {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => Recommendation::Long,
            Direction::Short => Recommendation::Short,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
