//! Canopy Node
//!
//! Daemon that owns a referral tree on disk and accepts registrations over a
//! local admin socket.
//!
//! # Example
//!
//! ```no_run
//! use canopy_node::{CanopyNode, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let node = CanopyNode::new(config).await?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin_socket;
mod config;
mod error;
mod node;

pub use config::{NodeConfig, DEFAULT_REPAIR_INTERVAL_SECS};
pub use error::{Error, Result};
pub use node::{CanopyNode, NodeRegistrar};
