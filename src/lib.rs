pub mod api;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod rpc;

pub use crate::core::types::*;
