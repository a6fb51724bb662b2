//! canopy-admin CLI tool
//!
//! Registers members and inspects the tree held by a running canopy-node.
//!
//! Usage:
//!   canopy-admin register <sponsor_code> <left|right> <name> <email> <mobile>
//!   canopy-admin downline <code_or_id>
//!   canopy-admin profile <code_or_id>
//!   canopy-admin lookup <code>
//!   canopy-admin audit
//!   canopy-admin repair
//!   canopy-admin ping

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

/// Admin command sent over the socket.
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum AdminCommand {
    Register {
        sponsor: String,
        side: String,
        name: String,
        email: String,
        mobile: String,
    },
    Downline { member: String },
    Profile { member: String },
    Lookup { code: String },
    Audit,
    Repair,
    Ping,
}

/// Response from admin command.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AdminResponse {
    Registered { registration: Value },
    Downline { summary: Value },
    Member { member: Value },
    NotFound { message: String },
    Audit { report: Value },
    Repaired { summary: Value },
    Error {
        error: String,
        #[serde(default)]
        outcome: Option<String>,
    },
    Pong,
}

fn print_usage() {
    eprintln!("canopy-admin - Register members and inspect the Canopy tree");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  canopy-admin register <sponsor> <side> <name> <email> <mobile>");
    eprintln!("                                      Register a member (side: left|right)");
    eprintln!("  canopy-admin downline <code|id>     Show direct children and counts");
    eprintln!("  canopy-admin profile <code|id>      Show a member record");
    eprintln!("  canopy-admin lookup <code>          Find a member by code");
    eprintln!("  canopy-admin audit                  Recount the tree and report faults");
    eprintln!("  canopy-admin repair                 Rewrite stale counts");
    eprintln!("  canopy-admin ping                   Check if daemon is running");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CANOPY_SOCKET  Path to admin socket (default: ./canopy-data/admin.sock)");
}

fn get_socket_path() -> PathBuf {
    std::env::var("CANOPY_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./canopy-data/admin.sock"))
}

fn send_command(cmd: AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = get_socket_path();

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to canopy-node at {:?}: {}\n\
             Is the canopy-node running?",
            socket_path, e
        )
    })?;

    // Send command
    let cmd_json = serde_json::to_string(&cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    // Read response
    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

/// Build a command from CLI arguments (without the program name).
fn parse_command(args: &[String]) -> Result<AdminCommand, String> {
    let Some(name) = args.first() else {
        return Err("missing command".into());
    };
    let arg = |i: usize, what: &str| {
        args.get(i)
            .cloned()
            .ok_or_else(|| format!("{} requires a {} argument", name, what))
    };

    let cmd = match name.as_str() {
        "register" => {
            if args.len() < 6 {
                return Err(
                    "register requires <sponsor> <side> <name> <email> <mobile>".into(),
                );
            }
            AdminCommand::Register {
                sponsor: arg(1, "sponsor")?,
                side: arg(2, "side")?.to_ascii_lowercase(),
                name: arg(3, "name")?,
                email: arg(4, "email")?,
                mobile: arg(5, "mobile")?,
            }
        }
        "downline" => AdminCommand::Downline {
            member: arg(1, "member")?,
        },
        "profile" => AdminCommand::Profile {
            member: arg(1, "member")?,
        },
        "lookup" => AdminCommand::Lookup {
            code: arg(1, "code")?,
        },
        "audit" => AdminCommand::Audit,
        "repair" => AdminCommand::Repair,
        "ping" => AdminCommand::Ping,
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(cmd)
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", value),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() {
        print_usage();
        std::process::exit(1);
    }
    if matches!(args[0].as_str(), "-h" | "--help" | "help") {
        print_usage();
        std::process::exit(0);
    }

    let cmd = match parse_command(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    match send_command(cmd) {
        Ok(response) => match response {
            AdminResponse::Registered { registration } => print_json(&registration),
            AdminResponse::Downline { summary } => print_json(&summary),
            AdminResponse::Member { member } => print_json(&member),
            AdminResponse::NotFound { message } => {
                eprintln!("{}", message);
                std::process::exit(1);
            }
            AdminResponse::Audit { report } => {
                print_json(&report);
                let clean = report["count_mismatches"].as_array().map_or(true, Vec::is_empty)
                    && report["link_faults"].as_array().map_or(true, Vec::is_empty);
                if !clean {
                    std::process::exit(2);
                }
            }
            AdminResponse::Repaired { summary } => print_json(&summary),
            AdminResponse::Error { error, outcome } => {
                eprintln!("Error: {}", error);
                if let Some(outcome) = outcome {
                    eprintln!("Outcome: {}", outcome);
                }
                std::process::exit(1);
            }
            AdminResponse::Pong => {
                println!("pong - canopy-node is running");
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
