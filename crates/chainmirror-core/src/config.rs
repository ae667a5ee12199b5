//! Service and global configuration.
//!
//! Two JSON documents drive a run:
//! - the **global** config lists networks, database environments, and log settings;
//! - the **service** config selects one network + contract + database environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::MirrorError;
use crate::normalize::{Normalizer, DEFAULT_DISPLAY_DECIMALS, DEFAULT_SCALE_DECIMALS};

// ─── Global config ────────────────────────────────────────────────────────────

/// RPC endpoints of one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP endpoint (informational).
    #[serde(default)]
    pub rpc: Option<String>,
    /// WebSocket endpoint used for queries and live subscriptions.
    pub wss: String,
}

/// One database environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// `sqlite:…` or `mysql://…` URL.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Log every statement at debug level.
    #[serde(default)]
    pub debug: bool,
}

fn default_max_connections() -> u32 {
    5
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

/// Top-level `global.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub networks: HashMap<String, NetworkConfig>,
    #[serde(default)]
    pub databases: HashMap<String, DatabaseConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

impl GlobalConfig {
    pub fn from_file(path: &Path) -> Result<Self, MirrorError> {
        read_json(path)
    }
}

// ─── Service config ───────────────────────────────────────────────────────────

/// Database selection for a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDatabase {
    #[serde(alias = "enviroment")]
    pub environment: String,
    pub table_name: String,
    #[serde(default = "default_cursor_table")]
    pub cursor_table: String,
}

fn default_cursor_table() -> String {
    "service_sync".to_string()
}

/// The mirrored contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    pub name: String,
    pub address: String,
    pub deploy_tx: String,
    #[serde(alias = "pathToAbi")]
    pub abi_path: PathBuf,
    /// Comma-separated whitelist of event kinds.
    pub wanted_events: String,
    /// Comma-separated argument names that get fixed-decimal formatting.
    #[serde(default)]
    pub format_ether: String,
    pub coin_name: String,
    #[serde(default = "default_display_decimals")]
    pub display_decimals: usize,
    #[serde(default = "default_scale_decimals")]
    pub scale_decimals: u8,
}

fn default_display_decimals() -> usize {
    DEFAULT_DISPLAY_DECIMALS
}

fn default_scale_decimals() -> u8 {
    DEFAULT_SCALE_DECIMALS
}

/// A `<service>.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub network_name: String,
    pub database: ServiceDatabase,
    pub contract: ContractConfig,
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> Result<Self, MirrorError> {
        read_json(path)
    }

    /// Cursor key: `"<network>:<contract name>"`.
    pub fn service_id(&self) -> String {
        format!("{}:{}", self.network_name, self.contract.name)
    }

    /// Whitelisted event kinds, in configured order.
    pub fn whitelist(&self) -> Whitelist {
        Whitelist::parse(&self.contract.wanted_events)
    }

    /// Argument names that get fixed-decimal formatting.
    pub fn decimal_args(&self) -> Vec<String> {
        split_list(&self.contract.format_ether)
    }

    /// Build the normalizer for this service.
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.decimal_args())
            .with_scale_decimals(self.contract.scale_decimals)
            .with_display_decimals(self.contract.display_decimals)
    }

    /// Check the parts of the config that do not depend on the global config.
    pub fn validate(&self) -> Result<(), MirrorError> {
        if self.whitelist().is_empty() {
            return Err(MirrorError::Config("contract.wantedEvents is empty".into()));
        }
        if self.contract.deploy_tx.trim().is_empty() {
            return Err(MirrorError::Config("contract.deployTx is empty".into()));
        }
        if self.contract.scale_decimals > 77 {
            return Err(MirrorError::Config(format!(
                "contract.scaleDecimals {} exceeds 77",
                self.contract.scale_decimals
            )));
        }
        validate_identifier("database.tableName", &self.database.table_name)?;
        validate_identifier("database.cursorTable", &self.database.cursor_table)?;
        Ok(())
    }
}

// ─── Whitelist ────────────────────────────────────────────────────────────────

/// The set of event kinds this service mirrors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    kinds: Vec<String>,
}

impl Whitelist {
    /// Parse a comma-separated list; entries are trimmed and empties dropped.
    pub fn parse(list: &str) -> Self {
        let mut kinds = Vec::new();
        for kind in split_list(list) {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Self { kinds }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.iter().any(|k| k == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.kinds.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Whitelist {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            kinds: iter.into_iter().map(Into::into).collect(),
        }
    }
}

// ─── Resolved settings ────────────────────────────────────────────────────────

/// Service config resolved against the global config.
#[derive(Debug, Clone)]
pub struct Settings {
    pub service: ServiceConfig,
    pub network: NetworkConfig,
    pub database: DatabaseConfig,
    pub log: LogConfig,
    /// ABI path resolved relative to the service config file.
    pub abi_path: PathBuf,
}

impl Settings {
    /// Load both documents, resolve the network and database environment,
    /// and validate the result.
    pub fn load(service_path: &Path, global_path: &Path) -> Result<Self, MirrorError> {
        let service = ServiceConfig::from_file(service_path)?;
        let global = GlobalConfig::from_file(global_path)?;
        let base_dir = service_path.parent().unwrap_or_else(|| Path::new("."));
        Self::resolve(service, global, base_dir)
    }

    pub fn resolve(
        service: ServiceConfig,
        global: GlobalConfig,
        base_dir: &Path,
    ) -> Result<Self, MirrorError> {
        service.validate()?;

        let network = global
            .networks
            .get(&service.network_name)
            .cloned()
            .ok_or_else(|| {
                MirrorError::Config(format!(
                    "selected network \"{}\" does not exist",
                    service.network_name
                ))
            })?;
        let database = global
            .databases
            .get(&service.database.environment)
            .cloned()
            .ok_or_else(|| {
                MirrorError::Config(format!(
                    "selected database environment \"{}\" does not exist",
                    service.database.environment
                ))
            })?;

        let abi_path = if service.contract.abi_path.is_absolute() {
            service.contract.abi_path.clone()
        } else {
            base_dir.join(&service.contract.abi_path)
        };

        Ok(Self {
            service,
            network,
            database,
            log: global.log,
            abi_path,
        })
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, MirrorError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        MirrorError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| MirrorError::Config(format!("invalid JSON in {}: {e}", path.display())))
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_identifier(field: &str, value: &str) -> Result<(), MirrorError> {
    let ok = !value.is_empty() && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(MirrorError::Config(format!(
            "{field} \"{value}\" is not a plain SQL identifier"
        )))
    }
}
