//! Risk Manager
//!
//! Per-position risk engines: a trailing stop that tightens as take-profit
//! tiers are crossed, and adaptive take-profit targets driven by a market
//! regime classification.

pub mod adaptive_tp;
pub mod trailing_stop;
pub mod trailing_stop_repo;

use thiserror::Error;
use uuid::Uuid;

pub use adaptive_tp::{AdaptiveTpManager, AdaptiveTpRecord, LadderAdjustment, Regime, RegimeChange, TargetLadder};
pub use trailing_stop::{trailing_percentage, StopAdvance, TrailingStatus, TrailingStopManager, TrailingStopRecord};
pub use trailing_stop_repo::TrailingStopRepository;

/// Errors callers of the risk engines need to branch on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RiskError {
    #[error("position {0} already has an active record")]
    AlreadyActive(Uuid),

    #[error("no active record for position {0}")]
    NotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("status {0} is not terminal")]
    NotTerminal(String),
}
