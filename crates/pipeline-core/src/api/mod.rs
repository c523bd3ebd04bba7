//! API clients for external services.

pub mod http;

pub use http::{HttpAnalysisProvider, HttpDecisionProvider, HttpMarketData, JsonClient};
