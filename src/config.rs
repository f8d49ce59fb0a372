//! # Configuration Management
//!
//! Process-wide configuration for the presence protocol core.
//!
//! Two layers live here:
//! - [`GlobalConfig`]: set-once knobs (panic handler, credential search shard
//!   count, handle table ceilings). Each setter succeeds only for the first
//!   call, and only if no component has read the value yet. Reads lock in the
//!   default, so a late setter can never disagree with what a handle table was
//!   already sized with.
//! - [`PresenceConfig`]: serde-backed configuration loaded from TOML files or
//!   environment variables, validated, and then applied to [`GlobalConfig`].
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (`PRESENCE_PROTOCOL_*`)
//! - Direct calls to the [`GlobalConfig`] setters

use crate::core::handle_map::HandleClass;
use crate::error::{constants, PresenceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn, Level};

/// Default number of credential search shards (sequential search)
pub const DEFAULT_NUM_SHARDS: u8 = 1;

/// Upper bound accepted for the shard count
pub const MAX_NUM_SHARDS: u8 = 64;

/// Default ceiling for every handle table
pub const DEFAULT_MAX_HANDLES: u32 = u32::MAX;

/// Reason passed to the panic handler when a usage contract is violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanicReason {
    /// A consuming projection was called on the wrong variant, e.g.
    /// `into_v0()` on a V1 result or `into_legible()` on an advertisement
    /// with no matching credentials.
    EnumCastFailed,
    /// A live, owned handle no longer resolves in its handle table.
    InvalidStackDataStructure,
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanicReason::EnumCastFailed => {
                f.write_str("contract violation: consumed result is not of the requested kind")
            }
            PanicReason::InvalidStackDataStructure => {
                f.write_str("contract violation: owned handle is missing from its table")
            }
        }
    }
}

/// Panic handler invoked on contract violations.
///
/// If the handler returns, the process aborts.
pub type PanicHandler = fn(PanicReason);

static PANIC_HANDLER: OnceLock<PanicHandler> = OnceLock::new();
static NUM_SHARDS: OnceLock<u8> = OnceLock::new();
static MAX_NUM_CREDENTIAL_SLABS: OnceLock<u32> = OnceLock::new();
static MAX_NUM_CREDENTIAL_BOOKS: OnceLock<u32> = OnceLock::new();
static MAX_NUM_DESERIALIZED_V0_ADVERTISEMENTS: OnceLock<u32> = OnceLock::new();
static MAX_NUM_DESERIALIZED_V1_ADVERTISEMENTS: OnceLock<u32> = OnceLock::new();
static MAX_NUM_V0_ADVERTISEMENT_BUILDERS: OnceLock<u32> = OnceLock::new();
static MAX_NUM_V1_ADVERTISEMENT_BUILDERS: OnceLock<u32> = OnceLock::new();

/// Report a contract violation and never return.
///
/// Calls the registered panic handler and aborts if it returns; without a
/// handler this panics with a message naming `reason`.
pub(crate) fn contract_violation(reason: PanicReason) -> ! {
    if let Some(handler) = PANIC_HANDLER.get() {
        handler(reason);
        std::process::abort();
    }
    panic!("{reason}");
}

fn set_once<T>(cell: &OnceLock<T>, value: T, name: &'static str) -> bool {
    let accepted = cell.set(value).is_ok();
    if !accepted {
        warn!(setting = name, "{}", constants::ERR_CONFIG_ALREADY_APPLIED);
    }
    accepted
}

/// Set-once, process-wide configuration
pub struct GlobalConfig;

impl GlobalConfig {
    /// Register the handler called on contract violations.
    ///
    /// Returns `false` if a handler was already registered.
    pub fn set_panic_handler(handler: PanicHandler) -> bool {
        set_once(&PANIC_HANDLER, handler, "panic_handler")
    }

    /// Set the number of partitions the credential search fans out over.
    ///
    /// Returns `false` if the value is zero, above [`MAX_NUM_SHARDS`], or was
    /// already set or observed.
    pub fn set_num_shards(num_shards: u8) -> bool {
        if num_shards == 0 || num_shards > MAX_NUM_SHARDS {
            warn!(num_shards, "Rejected shard count");
            return false;
        }
        set_once(&NUM_SHARDS, num_shards, "num_shards")
    }

    pub fn set_max_num_credential_slabs(max: u32) -> bool {
        set_once(&MAX_NUM_CREDENTIAL_SLABS, max, "max_num_credential_slabs")
    }

    pub fn set_max_num_credential_books(max: u32) -> bool {
        set_once(&MAX_NUM_CREDENTIAL_BOOKS, max, "max_num_credential_books")
    }

    /// Ceiling on simultaneously live legible V0 advertisements (V0 payloads)
    pub fn set_max_num_deserialized_v0_advertisements(max: u32) -> bool {
        set_once(
            &MAX_NUM_DESERIALIZED_V0_ADVERTISEMENTS,
            max,
            "max_num_deserialized_v0_advertisements",
        )
    }

    /// Ceiling on simultaneously live V1 advertisements (legible section sets)
    pub fn set_max_num_deserialized_v1_advertisements(max: u32) -> bool {
        set_once(
            &MAX_NUM_DESERIALIZED_V1_ADVERTISEMENTS,
            max,
            "max_num_deserialized_v1_advertisements",
        )
    }

    pub fn set_max_num_v0_advertisement_builders(max: u32) -> bool {
        set_once(
            &MAX_NUM_V0_ADVERTISEMENT_BUILDERS,
            max,
            "max_num_v0_advertisement_builders",
        )
    }

    pub fn set_max_num_v1_advertisement_builders(max: u32) -> bool {
        set_once(
            &MAX_NUM_V1_ADVERTISEMENT_BUILDERS,
            max,
            "max_num_v1_advertisement_builders",
        )
    }

    /// Current shard count; locks in the default if unset
    pub fn num_shards() -> u8 {
        *NUM_SHARDS.get_or_init(|| DEFAULT_NUM_SHARDS)
    }

    /// Ceiling for the given handle table; locks in the default if unset
    pub fn max_handles(class: HandleClass) -> u32 {
        let cell = match class {
            HandleClass::CredentialSlab => &MAX_NUM_CREDENTIAL_SLABS,
            HandleClass::CredentialBook => &MAX_NUM_CREDENTIAL_BOOKS,
            HandleClass::V0Payload => &MAX_NUM_DESERIALIZED_V0_ADVERTISEMENTS,
            HandleClass::LegibleV1Sections => &MAX_NUM_DESERIALIZED_V1_ADVERTISEMENTS,
            HandleClass::V0AdvertisementBuilder => &MAX_NUM_V0_ADVERTISEMENT_BUILDERS,
            HandleClass::V1AdvertisementBuilder => &MAX_NUM_V1_ADVERTISEMENT_BUILDERS,
        };
        *cell.get_or_init(|| DEFAULT_MAX_HANDLES)
    }

    /// Number of live handles in every table
    pub fn current_handle_allocations() -> CurrentHandleAllocations {
        CurrentHandleAllocations {
            cred_slab: crate::credential::slab::live_handles(),
            cred_book: crate::credential::book::live_handles(),
            v0_payload: crate::deserializer::v0::live_handles(),
            legible_v1_sections: crate::deserializer::v1::live_handles(),
            v0_advertisement_builder: crate::builder::v0::live_handles(),
            v1_advertisement_builder: crate::builder::v1::live_handles(),
        }
    }
}

/// Snapshot of live handle counts per resource class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentHandleAllocations {
    pub cred_slab: u32,
    pub cred_book: u32,
    pub v0_payload: u32,
    pub legible_v1_sections: u32,
    pub v0_advertisement_builder: u32,
    pub v1_advertisement_builder: u32,
}

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PresenceConfig {
    /// Shard count and handle table ceilings
    #[serde(default)]
    pub core: CoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PresenceConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| PresenceError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = env_parse::<u8>("PRESENCE_PROTOCOL_NUM_SHARDS") {
            config.core.num_shards = val;
        }
        if let Some(val) = env_parse::<u32>("PRESENCE_PROTOCOL_MAX_NUM_CREDENTIAL_SLABS") {
            config.core.max_num_credential_slabs = val;
        }
        if let Some(val) = env_parse::<u32>("PRESENCE_PROTOCOL_MAX_NUM_CREDENTIAL_BOOKS") {
            config.core.max_num_credential_books = val;
        }
        if let Some(val) = env_parse::<u32>("PRESENCE_PROTOCOL_MAX_NUM_DESERIALIZED_V0_ADVERTISEMENTS")
        {
            config.core.max_num_deserialized_v0_advertisements = val;
        }
        if let Some(val) = env_parse::<u32>("PRESENCE_PROTOCOL_MAX_NUM_DESERIALIZED_V1_ADVERTISEMENTS")
        {
            config.core.max_num_deserialized_v1_advertisements = val;
        }
        if let Some(val) = env_parse::<u32>("PRESENCE_PROTOCOL_MAX_NUM_V0_ADVERTISEMENT_BUILDERS") {
            config.core.max_num_v0_advertisement_builders = val;
        }
        if let Some(val) = env_parse::<u32>("PRESENCE_PROTOCOL_MAX_NUM_V1_ADVERTISEMENT_BUILDERS") {
            config.core.max_num_v1_advertisement_builders = val;
        }
        if let Ok(level) = std::env::var("PRESENCE_PROTOCOL_LOG_LEVEL") {
            if let Ok(level) = level.parse::<Level>() {
                config.logging.log_level = level;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.core.validate();
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PresenceError::ConfigError(format!(
                "{}:\n  - {}",
                constants::ERR_CONFIG_INVALID,
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse::<T>().ok()
}

/// Shard count and handle table ceilings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Partitions used by the credential search
    pub num_shards: u8,
    pub max_num_credential_slabs: u32,
    pub max_num_credential_books: u32,
    pub max_num_deserialized_v0_advertisements: u32,
    pub max_num_deserialized_v1_advertisements: u32,
    pub max_num_v0_advertisement_builders: u32,
    pub max_num_v1_advertisement_builders: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            num_shards: DEFAULT_NUM_SHARDS,
            max_num_credential_slabs: DEFAULT_MAX_HANDLES,
            max_num_credential_books: DEFAULT_MAX_HANDLES,
            max_num_deserialized_v0_advertisements: DEFAULT_MAX_HANDLES,
            max_num_deserialized_v1_advertisements: DEFAULT_MAX_HANDLES,
            max_num_v0_advertisement_builders: DEFAULT_MAX_HANDLES,
            max_num_v1_advertisement_builders: DEFAULT_MAX_HANDLES,
        }
    }
}

impl CoreConfig {
    /// Validate core configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.num_shards == 0 {
            errors.push("Shard count must be greater than 0".to_string());
        } else if self.num_shards > MAX_NUM_SHARDS {
            errors.push(format!(
                "Shard count too large: {} (maximum: {MAX_NUM_SHARDS})",
                self.num_shards
            ));
        }

        let ceilings = [
            ("max_num_credential_slabs", self.max_num_credential_slabs),
            ("max_num_credential_books", self.max_num_credential_books),
            (
                "max_num_deserialized_v0_advertisements",
                self.max_num_deserialized_v0_advertisements,
            ),
            (
                "max_num_deserialized_v1_advertisements",
                self.max_num_deserialized_v1_advertisements,
            ),
            (
                "max_num_v0_advertisement_builders",
                self.max_num_v0_advertisement_builders,
            ),
            (
                "max_num_v1_advertisement_builders",
                self.max_num_v1_advertisement_builders,
            ),
        ];
        for (name, value) in ceilings {
            if value == 0 {
                errors.push(format!("{name} must be greater than 0"));
            }
        }

        errors
    }

    /// Install these values into [`GlobalConfig`].
    ///
    /// Every knob is attempted; the error lists the ones that were already set
    /// or observed and therefore kept their previous value.
    pub fn apply(&self) -> Result<()> {
        let results = [
            ("num_shards", GlobalConfig::set_num_shards(self.num_shards)),
            (
                "max_num_credential_slabs",
                GlobalConfig::set_max_num_credential_slabs(self.max_num_credential_slabs),
            ),
            (
                "max_num_credential_books",
                GlobalConfig::set_max_num_credential_books(self.max_num_credential_books),
            ),
            (
                "max_num_deserialized_v0_advertisements",
                GlobalConfig::set_max_num_deserialized_v0_advertisements(
                    self.max_num_deserialized_v0_advertisements,
                ),
            ),
            (
                "max_num_deserialized_v1_advertisements",
                GlobalConfig::set_max_num_deserialized_v1_advertisements(
                    self.max_num_deserialized_v1_advertisements,
                ),
            ),
            (
                "max_num_v0_advertisement_builders",
                GlobalConfig::set_max_num_v0_advertisement_builders(
                    self.max_num_v0_advertisement_builders,
                ),
            ),
            (
                "max_num_v1_advertisement_builders",
                GlobalConfig::set_max_num_v1_advertisement_builders(
                    self.max_num_v1_advertisement_builders,
                ),
            ),
        ];

        let rejected: Vec<&str> = results
            .iter()
            .filter(|(_, accepted)| !accepted)
            .map(|(name, _)| *name)
            .collect();

        if rejected.is_empty() {
            info!(num_shards = self.num_shards, "Global configuration applied");
            Ok(())
        } else {
            Err(PresenceError::ConfigError(format!(
                "{}: {}",
                constants::ERR_CONFIG_ALREADY_APPLIED,
                rejected.join(", ")
            )))
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("presence-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
