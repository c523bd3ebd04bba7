//! Take-profit tiers and ladders.

use super::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A take-profit tier at a fixed percentage offset from a reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TpTier {
    Tp1,
    Tp2,
    Tp3,
    Tp4,
    Tp5,
}

impl TpTier {
    /// All tiers, lowest first.
    pub const ALL: [TpTier; 5] = [
        TpTier::Tp1,
        TpTier::Tp2,
        TpTier::Tp3,
        TpTier::Tp4,
        TpTier::Tp5,
    ];

    /// Percentage offset from the reference price (1.5, 3.0, 5.0, 8.0, 12.0).
    pub fn offset_pct(self) -> Decimal {
        match self {
            TpTier::Tp1 => Decimal::new(15, 1),
            TpTier::Tp2 => Decimal::new(30, 1),
            TpTier::Tp3 => Decimal::new(50, 1),
            TpTier::Tp4 => Decimal::new(80, 1),
            TpTier::Tp5 => Decimal::new(120, 1),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TpTier::Tp1 => "TP1",
            TpTier::Tp2 => "TP2",
            TpTier::Tp3 => "TP3",
            TpTier::Tp4 => "TP4",
            TpTier::Tp5 => "TP5",
        }
    }

    /// Database label for an optional tier ("NONE" when unset).
    pub fn label(tier: Option<TpTier>) -> &'static str {
        tier.map(TpTier::as_str).unwrap_or("NONE")
    }

    pub fn from_label(value: &str) -> Option<TpTier> {
        TpTier::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for TpTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-tier take-profit ladder anchored on a reference price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpLadder {
    pub reference_price: Decimal,
    pub direction: Direction,
    /// Prices for TP1..TP5, in tier order.
    pub levels: [Decimal; 5],
}

impl TpLadder {
    /// Build the standard symmetric ladder: ±1.5/3/5/8/12% from `reference_price`.
    pub fn from_reference(reference_price: Decimal, direction: Direction) -> Self {
        let hundred = Decimal::ONE_HUNDRED;
        let levels = TpTier::ALL.map(|tier| {
            reference_price * (Decimal::ONE + direction.sign() * tier.offset_pct() / hundred)
        });
        Self {
            reference_price,
            direction,
            levels,
        }
    }

    pub fn price(&self, tier: TpTier) -> Decimal {
        self.levels[tier.index()]
    }

    /// The highest tier reached at `price`: for longs the highest tier priced
    /// at or below it, for shorts the highest tier priced at or above it.
    pub fn highest_crossed(&self, price: Decimal) -> Option<TpTier> {
        TpTier::ALL.into_iter().rev().find(|tier| {
            let level = self.price(*tier);
            match self.direction {
                Direction::Long => level <= price,
                Direction::Short => level >= price,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_ladder_levels() {
        let ladder = TpLadder::from_reference(Decimal::new(100, 0), Direction::Long);
        let expected = [
            Decimal::new(1015, 1),
            Decimal::new(103, 0),
            Decimal::new(105, 0),
            Decimal::new(108, 0),
            Decimal::new(112, 0),
        ];
        assert_eq!(ladder.levels, expected);
    }

    #[test]
    fn test_short_ladder_levels() {
        let ladder = TpLadder::from_reference(Decimal::new(100, 0), Direction::Short);
        assert_eq!(ladder.price(TpTier::Tp1), Decimal::new(985, 1));
        assert_eq!(ladder.price(TpTier::Tp5), Decimal::new(88, 0));
    }

    #[test]
    fn test_highest_crossed() {
        let long = TpLadder::from_reference(Decimal::new(100, 0), Direction::Long);
        assert_eq!(long.highest_crossed(Decimal::new(101, 0)), None);
        assert_eq!(long.highest_crossed(Decimal::new(103, 0)), Some(TpTier::Tp2));
        assert_eq!(long.highest_crossed(Decimal::new(1016, 1)), Some(TpTier::Tp1));
        assert_eq!(long.highest_crossed(Decimal::new(150, 0)), Some(TpTier::Tp5));

        let short = TpLadder::from_reference(Decimal::new(100, 0), Direction::Short);
        assert_eq!(short.highest_crossed(Decimal::new(99, 0)), None);
        assert_eq!(short.highest_crossed(Decimal::new(95, 0)), Some(TpTier::Tp3));
    }

    #[test]
    fn test_tier_labels() {
        assert_eq!(TpTier::label(None), "NONE");
        assert_eq!(TpTier::from_label("TP4"), Some(TpTier::Tp4));
        assert_eq!(TpTier::from_label("NONE"), None);
    }
}
