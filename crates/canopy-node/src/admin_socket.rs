//! Unix socket server for admin commands.
//!
//! One JSON object per line in each direction. Provides the local IPC
//! interface used by the canopy-admin CLI.

use crate::error::Result;
use crate::node::NodeRegistrar;
use canopy_tree::{
    AuditReport, DownlineSummary, Member, MemberCode, MemberId, NewMember, Outcome, RepairSummary,
    Registration, Side,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Admin command sent over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Register a member under a sponsor
    Register {
        sponsor: String,
        side: Side,
        name: String,
        email: String,
        mobile: String,
    },
    /// Direct children and counts of a member (code or id)
    Downline { member: String },
    /// Full record of a member (code or id)
    Profile { member: String },
    /// Find a member by code
    Lookup { code: String },
    /// Recount the tree
    Audit,
    /// Rewrite stale counts
    Repair,
    /// Ping (health check)
    Ping,
}

/// Response from admin command.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Registered { registration: Registration },
    Downline { summary: DownlineSummary },
    Member { member: Member },
    NotFound { message: String },
    Audit { report: AuditReport },
    Repaired { summary: RepairSummary },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<Outcome>,
    },
    Pong,
}

impl AdminResponse {
    fn error(e: canopy_tree::Error) -> Self {
        AdminResponse::Error {
            outcome: Some(e.outcome()),
            error: e.to_string(),
        }
    }
}

/// Admin socket server.
pub struct AdminSocket {
    registrar: Arc<NodeRegistrar>,
    socket_path: PathBuf,
}

impl AdminSocket {
    /// Create a new admin socket server.
    pub fn new(registrar: Arc<NodeRegistrar>, socket_path: impl AsRef<Path>) -> Self {
        Self {
            registrar,
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Run the admin socket server.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Bind the socket, replacing a stale socket file.
    pub fn bind(&self) -> Result<UnixListener> {
        let _ = std::fs::remove_file(&self.socket_path);
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Admin socket listening on {:?}", self.socket_path);
        Ok(listener)
    }

    /// Accept connections until the listener fails.
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let registrar = Arc::clone(&self.registrar);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, registrar).await {
                            tracing::error!("Admin connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept admin connection: {}", e);
                }
            }
        }
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn handle_connection(stream: UnixStream, registrar: Arc<NodeRegistrar>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => execute_command(cmd, &registrar).await,
            Err(e) => AdminResponse::Error {
                error: format!("Invalid command: {}", e),
                outcome: None,
            },
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

/// Resolve a member by code first, then by id.
fn resolve_member(registrar: &NodeRegistrar, key: &str) -> canopy_tree::Result<Option<Member>> {
    if let Some(member) = registrar.lookup(&MemberCode::from(key))? {
        return Ok(Some(member));
    }
    match registrar.profile(&MemberId(key.to_string())) {
        Ok(member) => Ok(Some(member)),
        Err(canopy_tree::Error::UnknownMember(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn execute_command(cmd: AdminCommand, registrar: &NodeRegistrar) -> AdminResponse {
    match cmd {
        AdminCommand::Register {
            sponsor,
            side,
            name,
            email,
            mobile,
        } => {
            let fields = NewMember::new(name, email, mobile);
            match registrar
                .register_member(&MemberCode::from(sponsor.as_str()), side, fields)
                .await
            {
                Ok(registration) => AdminResponse::Registered { registration },
                Err(e) => {
                    tracing::warn!("Registration under {} failed: {}", sponsor, e);
                    AdminResponse::error(e)
                }
            }
        }

        AdminCommand::Downline { member } => match resolve_member(registrar, &member) {
            Ok(Some(found)) => match registrar.downline_summary(&found.id) {
                Ok(summary) => AdminResponse::Downline { summary },
                Err(e) => AdminResponse::error(e),
            },
            Ok(None) => not_found(&member),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Profile { member } => match resolve_member(registrar, &member) {
            Ok(Some(member)) => AdminResponse::Member { member },
            Ok(None) => not_found(&member),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Lookup { code } => match registrar.lookup(&MemberCode::from(code.as_str())) {
            Ok(Some(member)) => AdminResponse::Member { member },
            Ok(None) => not_found(&code),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Audit => match registrar.audit().await {
            Ok(report) => AdminResponse::Audit { report },
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Repair => match registrar.repair().await {
            Ok(summary) => {
                tracing::info!(
                    "Admin repair: {} member(s) examined, {} count(s) corrected",
                    summary.examined,
                    summary.corrected.len()
                );
                AdminResponse::Repaired { summary }
            }
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Ping => AdminResponse::Pong,
    }
}

fn not_found(key: &str) -> AdminResponse {
    AdminResponse::NotFound {
        message: format!("No member {}", key),
    }
}
