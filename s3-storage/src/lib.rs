mod storage;

use tracing::{info, warn};

pub use storage::{Config, Error, new};
