//! Command-line surface
//!
//! Thin wrappers only: `create` and `fork` manage the on-disk database
//! descriptor, `user` edits its access list, `access` talks to a running
//! server over TCP, and `run` starts one.

use crate::server;
use clap::{Parser, Subcommand};
use ron_replica::{Replica, ReplicaConfigBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Boxed errors are enough for the CLI layer; the library crates carry
/// the typed ones.
pub type CliError = Box<dyn std::error::Error + Send + Sync>;
pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Parser)]
#[command(name = "ronda")]
#[command(about = "Causal op-based replication server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new database descriptor
    Create {
        /// Path of the database descriptor file
        #[arg(long, default_value = "ronda.json")]
        db: PathBuf,
        /// Database name peers must address in their handshake
        #[arg(long)]
        name: String,
        /// This replica's origin word (session subtree root)
        #[arg(long, default_value = "R")]
        id: String,
    },
    /// Derive a child replica descriptor from an existing one
    Fork {
        /// Path of the parent descriptor
        #[arg(long, default_value = "ronda.json")]
        db: PathBuf,
        /// Path of the new child descriptor
        #[arg(long)]
        out: PathBuf,
        /// Suffix appended to the parent origin
        #[arg(long)]
        suffix: String,
    },
    /// Read one object's state from a running server
    Access {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:3402")]
        connect: String,
        /// Database name
        #[arg(long)]
        name: String,
        /// Object reference, e.g. "*lww#doc"
        object: String,
    },
    /// Run the replication server
    Run {
        /// Path of the database descriptor file
        #[arg(long, default_value = "ronda.json")]
        db: PathBuf,
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:3402")]
        listen: String,
    },
    /// Manage the database access list
    User {
        /// Path of the database descriptor file
        #[arg(long, default_value = "ronda.json")]
        db: PathBuf,
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
pub enum UserAction {
    /// Add a user to the access list
    Add { name: String },
    /// List users
    List,
}

/// The on-disk database descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbDescriptor {
    pub name: String,
    pub origin: String,
    #[serde(default)]
    pub users: Vec<String>,
}

impl DbDescriptor {
    pub fn load(path: &Path) -> CliResult<DbDescriptor> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("cannot parse {}: {}", path.display(), e).into())
    }

    pub fn save(&self, path: &Path) -> CliResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| format!("cannot serialize descriptor: {}", e))?;
        std::fs::write(path, text)
            .map_err(|e| format!("cannot write {}: {}", path.display(), e).into())
    }
}

pub async fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Create { db, name, id } => {
            if db.exists() {
                return Err(format!("{} already exists", db.display()).into());
            }
            let descriptor = DbDescriptor {
                name,
                origin: id,
                users: Vec::new(),
            };
            descriptor.save(&db)?;
            println!("created {}", db.display());
            Ok(())
        }

        Commands::Fork { db, out, suffix } => {
            let parent = DbDescriptor::load(&db)?;
            let child = DbDescriptor {
                name: parent.name.clone(),
                origin: format!("{}{}", parent.origin, suffix),
                users: parent.users.clone(),
            };
            child.save(&out)?;
            println!("forked {} -> {}", parent.origin, child.origin);
            Ok(())
        }

        Commands::Access {
            connect,
            name,
            object,
        } => {
            let patch = fetch_object(&connect, &name, &object).await?;
            println!("{}", patch);
            Ok(())
        }

        Commands::Run { db, listen } => {
            let descriptor = DbDescriptor::load(&db)?;
            let config = ReplicaConfigBuilder::new()
                .db_name(&descriptor.name)
                .origin(&descriptor.origin)
                .build();
            let replica = Replica::new(config, ron_replica::MemStore::new());
            server::serve(replica, &listen).await
        }

        Commands::User { db, action } => {
            let mut descriptor = DbDescriptor::load(&db)?;
            match action {
                UserAction::Add { name } => {
                    if !descriptor.users.contains(&name) {
                        descriptor.users.push(name);
                        descriptor.save(&db)?;
                    }
                    Ok(())
                }
                UserAction::List => {
                    for user in &descriptor.users {
                        println!("{}", user);
                    }
                    Ok(())
                }
            }
        }
    }
}

/// Handshake, subscribe, read one patch, disconnect.
async fn fetch_object(addr: &str, db_name: &str, object: &str) -> CliResult<String> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| format!("cannot connect to {}: {}", addr, e))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(format!("*db#{}@0-!\n", db_name).as_bytes())
        .await?;
    let handshake = lines
        .next_line()
        .await?
        .ok_or("server closed before handshake")?;
    if handshake.contains("~~~~~~~~~~") {
        return Err(format!("handshake rejected: {}", handshake).into());
    }

    write_half
        .write_all(format!("{}?\n", object).as_bytes())
        .await?;
    let patch = lines
        .next_line()
        .await?
        .ok_or("server closed before the patch")?;
    Ok(patch)
}
