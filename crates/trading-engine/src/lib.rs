//! Trading Engine
//!
//! Decides which symbols move through the pipeline, reconciles disagreeing
//! signals, and places the resulting orders.

pub mod admission;
pub mod executor;
pub mod resolution;

pub use admission::{AdmissionGate, EscalationSignal, EscalationVerdict};
pub use executor::{ExecutionMetrics, ExecutionReport, ExecutionStatus, ExecutorConfig, OrderExecutor};
pub use resolution::{
    AuxiliarySignals, Candidate, CandidateOption, Contradiction, ContradictionResolver,
    Resolution, ResolutionError,
};
