use super::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

mod log_level_serde {
    use super::*;

    pub fn serialize<S>(level: &Option<Level>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match level {
            Some(level) => serializer.serialize_some(level.as_str()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Level>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| Level::from_str(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum EntityStorage {
    #[serde(rename = "memory")]
    Memory,

    #[cfg(feature = "sqlite-storage")]
    #[serde(rename = "sqlite")]
    Sqlite(Option<whisk_sqlite_storage::Config>),
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum BlobStorage {
    #[serde(rename = "memory")]
    Memory(Option<whisk_controller::storage::blob_mem::Config>),

    #[cfg(feature = "s3-storage")]
    #[serde(rename = "s3")]
    S3(Option<whisk_s3_storage::Config>),
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum Broker {
    #[serde(rename = "memory")]
    Memory(Option<whisk_controller::broker::mem::Config>),

    #[cfg(feature = "redis-broker")]
    #[serde(rename = "redis")]
    Redis(Option<whisk_redis_broker::Config>),
}

/// A namespace guaranteed to exist at startup, with fixed credentials so
/// clients can be configured out of band.
#[derive(Serialize, Deserialize, Debug)]
pub struct ProvisionedNamespace {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub description: Option<String>,
    pub auth_uuid: uuid::Uuid,
    pub auth_key: String,
}

impl ProvisionedNamespace {
    pub fn to_entity(&self) -> whisk_controller::entity::Namespace {
        whisk_controller::entity::Namespace {
            name: self.name.clone(),
            uuid: uuid::Uuid::new_v4(),
            owner: self.owner.clone(),
            description: self.description.clone(),
            limits: whisk_controller::params::Map::new(),
            auth_uuid: self.auth_uuid,
            auth_key: self.auth_key.clone(),
        }
    }
}

fn default_listen() -> String {
    // Honour a bare PORT for container platforms
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);
    format!("0.0.0.0:{port}")
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Config {
    // Logging level
    #[serde(default, with = "log_level_serde")]
    pub log_level: Option<Level>,

    #[serde(default = "default_listen")]
    pub listen: String,

    // Flattened controller settings
    #[serde(flatten, default)]
    pub controller: whisk_controller::config::Config,

    // Entity Storage Configuration
    #[serde(default)]
    pub entity_storage: Option<EntityStorage>,

    // Blob Storage Configuration
    #[serde(default)]
    pub blob_storage: Option<BlobStorage>,

    // Message Broker Configuration
    #[serde(default)]
    pub broker: Option<Broker>,

    // Namespaces provisioned at startup
    #[serde(default)]
    pub namespaces: Vec<ProvisionedNamespace>,

    #[serde(skip)]
    pub upgrade_storage: bool,
}

fn options() -> getopts::Options {
    let mut opts = getopts::Options::new();
    opts.optflag("h", "help", "print this help menu")
        .optflag("v", "version", "print the version information")
        .optflag(
            "u",
            "upgrade-store",
            "upgrade the entity store to the current schema",
        )
        .optopt("c", "config", "use a custom configuration file", "FILE");
    opts
}

pub fn config_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "whisk", env!("CARGO_PKG_NAME")).map_or_else(
        || std::path::Path::new("/etc/opt").join(env!("CARGO_PKG_NAME")),
        |proj_dirs| proj_dirs.config_local_dir().to_path_buf(),
    )
}

pub fn init() -> Option<(Config, String)> {
    // Parse cmdline
    let opts = options();
    let args: Vec<String> = std::env::args().collect();
    let flags = opts
        .parse(&args[1..])
        .expect("Failed to parse command line args");
    if flags.opt_present("h") {
        let brief = format!(
            "{} {} - {}\n\nUsage: {} [options]",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_DESCRIPTION"),
            args[0]
        );
        print!("{}", opts.usage(&brief));
        return None;
    }
    if flags.opt_present("v") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return None;
    }

    let mut b = ::config::Config::builder();

    // Add config file
    let config_source: String;
    if let Some(source) = flags.opt_str("config") {
        config_source = format!("Using configuration file '{source}' specified on command line");
        b = b.add_source(::config::File::with_name(&source))
    } else if let Ok(source) = std::env::var("WHISK_CONTROLLER_CONFIG_FILE") {
        config_source = format!(
            "Using configuration file '{source}' specified by WHISK_CONTROLLER_CONFIG_FILE environment variable"
        );
        b = b.add_source(::config::File::with_name(&source))
    } else {
        let path = config_dir().join(format!("{}.yaml", env!("CARGO_PKG_NAME")));
        config_source = format!("Using configuration file '{}'", path.display());
        b = b.add_source(::config::File::from(path).required(false))
    }

    // Pull in environment vars
    b = b.add_source(::config::Environment::with_prefix("WHISK_CONTROLLER"));

    let mut config: Config = b
        .build()
        .expect("Failed to read configuration")
        .try_deserialize()
        .expect("Failed to parse configuration");

    config.upgrade_storage = flags.opt_present("u");

    // And parse...
    Some((config, config_source))
}
