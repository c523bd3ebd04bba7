//! Core domain types for the signal pipeline.

pub mod analysis;
pub mod decision;
pub mod ladder;
pub mod market;
pub mod order;
pub mod signal;

pub use analysis::*;
pub use decision::*;
pub use ladder::*;
pub use market::*;
pub use order::*;
pub use signal::*;
