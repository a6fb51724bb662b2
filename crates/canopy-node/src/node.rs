//! Canopy Node - the main application entry point.
//!
//! Architecture:
//! - Single daemon process with one RocksDB store, used as both member
//!   directory and code sequence
//! - One registrar shared by every connection
//! - Unix admin socket for local ops (canopy-admin CLI)
//! - Background repair pass on a fixed interval

use crate::admin_socket::AdminSocket;
use crate::config::NodeConfig;
use crate::error::Result;
use canopy_store::Storage;
use canopy_tree::{MemberDirectory, Registrar};
use std::sync::Arc;
use std::time::Duration;

/// Registrar over the node's store.
pub type NodeRegistrar = Registrar<Storage, Storage>;

/// A Canopy node instance.
pub struct CanopyNode {
    registrar: Arc<NodeRegistrar>,
    config: NodeConfig,
}

impl CanopyNode {
    /// Open the store and make sure the tree has a root.
    pub async fn new(config: NodeConfig) -> Result<Self> {
        // Ensure data directory exists
        std::fs::create_dir_all(&config.data_dir)?;

        let storage = Arc::new(Storage::open(config.data_dir.join("tree"))?);
        let registrar = Arc::new(Registrar::with_config(
            Arc::clone(&storage),
            Arc::clone(&storage),
            config.registrar.clone(),
        ));

        match storage.find_root().map_err(canopy_tree::Error::from)? {
            Some(root) => {
                tracing::info!(
                    "Opened tree at {:?}: root {}, {} member(s)",
                    config.data_dir,
                    root.code,
                    storage.member_count()?
                );
            }
            None => {
                registrar.bootstrap_root(config.root.clone()).await?;
            }
        }

        Ok(Self { registrar, config })
    }

    /// Get the shared registrar.
    pub fn registrar(&self) -> Arc<NodeRegistrar> {
        Arc::clone(&self.registrar)
    }

    /// Run the node (repair task and admin socket).
    pub async fn run(self) -> Result<()> {
        tracing::info!("Canopy node starting");
        tracing::info!("  Admin: {:?}", self.config.admin_socket);
        tracing::info!("  Data: {:?}", self.config.data_dir);

        if let Some(interval) = self.config.repair_interval {
            tracing::info!("  Repair every {}s", interval.as_secs());
            tokio::spawn(repair_loop(self.registrar(), interval));
        }

        let admin_socket = AdminSocket::new(self.registrar(), &self.config.admin_socket);
        admin_socket.run().await
    }
}

/// Recount the tree on a fixed interval, fixing stale counts left by partial writes.
async fn repair_loop(registrar: Arc<NodeRegistrar>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match registrar.repair().await {
            Ok(summary) if summary.corrected.is_empty() => {
                tracing::debug!("Repair pass: {} member(s), all counts exact", summary.examined);
            }
            Ok(summary) => {
                tracing::warn!(
                    "Repair pass corrected {} count(s) across {} member(s)",
                    summary.corrected.len(),
                    summary.examined
                );
            }
            Err(e) => {
                tracing::error!("Repair pass failed: {}", e);
            }
        }
    }
}
