//! Signal Pipeline: staged trading signals with position risk management
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the workspace crates. For actual functionality, use them directly:
//!
//! - `pipeline-core`: Domain types, provider contracts, configuration, record store
//! - `trading-engine`: Admission gate, contradiction resolution, order execution
//! - `risk-manager`: Trailing stops, adaptive take-profit targets
//! - `scheduler`: Cycle and monitor loops, control surface, `signal-scheduler` binary

// Re-export for benchmarks
pub use pipeline_core as core;
pub use risk_manager as risk;
pub use scheduler as orchestration;
pub use trading_engine as trading;
