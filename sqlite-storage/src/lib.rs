mod migrate;
mod storage;

use trace_err::*;
use tracing::info;

pub use storage::{Config, Error, new};
