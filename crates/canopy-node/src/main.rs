//! Canopy Node binary
//!
//! Serves the referral tree over the admin socket.

use canopy_node::{CanopyNode, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canopy_node=info,canopy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Canopy Node");

    let config = NodeConfig::from_env()?;

    // Create and run node
    let node = CanopyNode::new(config).await?;
    node.run().await?;

    Ok(())
}
