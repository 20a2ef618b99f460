mod broker;

use tracing::{debug, info};

pub use broker::{Config, Error, new};
