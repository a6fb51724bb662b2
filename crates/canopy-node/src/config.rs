//! Node configuration from environment variables.

use crate::error::{Error, Result};
use canopy_tree::{NewMember, RegistrarConfig, DEFAULT_MAX_PLACEMENT_ATTEMPTS};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default seconds between background repair passes.
pub const DEFAULT_REPAIR_INTERVAL_SECS: u64 = 300;

/// Configuration for a Canopy node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Data directory for storage
    pub data_dir: PathBuf,

    /// Admin socket path (for canopy-admin CLI)
    pub admin_socket: PathBuf,

    /// Time between background repair passes (`None` disables them)
    pub repair_interval: Option<Duration>,

    pub registrar: RegistrarConfig,

    /// Profile used when the directory has no root yet
    pub root: NewMember,
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(
            lookup("CANOPY_DATA_DIR").unwrap_or_else(|| "./canopy-data".to_string()),
        );

        let admin_socket = lookup("CANOPY_ADMIN_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("admin.sock"));

        let repair_secs: u64 =
            parse(&lookup, "CANOPY_REPAIR_INTERVAL_SECS", DEFAULT_REPAIR_INTERVAL_SECS)?;
        let repair_interval = (repair_secs > 0).then(|| Duration::from_secs(repair_secs));

        let max_placement_attempts: u32 = parse(
            &lookup,
            "CANOPY_MAX_PLACEMENT_ATTEMPTS",
            DEFAULT_MAX_PLACEMENT_ATTEMPTS,
        )?;
        if max_placement_attempts == 0 {
            return Err(Error::Config(
                "CANOPY_MAX_PLACEMENT_ATTEMPTS must be at least 1".into(),
            ));
        }

        let root = NewMember::new(
            lookup("CANOPY_ROOT_NAME").unwrap_or_else(|| "Company Root".to_string()),
            lookup("CANOPY_ROOT_EMAIL").unwrap_or_else(|| "root@company.com".to_string()),
            lookup("CANOPY_ROOT_MOBILE").unwrap_or_else(|| "0000000000".to_string()),
        );

        Ok(Self {
            data_dir,
            admin_socket,
            repair_interval,
            registrar: RegistrarConfig {
                max_placement_attempts,
            },
            root,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
