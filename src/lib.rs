// Core modules
pub mod api;
pub mod clock;
pub mod config;
pub mod execution;
pub mod gateway;
pub mod models;
pub mod risk;

// Re-export commonly used types
pub use api::{Exchange, ExchangeError};
pub use models::*;
