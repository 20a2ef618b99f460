pub mod activation;
pub mod activations;
pub mod broker;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod fqn;
pub mod invoker_registry;
pub mod params;
pub mod storage;
pub mod store;

use std::sync::Arc;
use trace_err::*;
use tracing::{debug, error, info, instrument, trace, warn};

// Re-export for consistency
pub use async_trait::async_trait;
pub use bytes::Bytes;
pub use error::Error;
