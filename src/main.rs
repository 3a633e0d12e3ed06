//! crdtkv - Command-line client for crdtkv clusters
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use crdtkv_client::{Client, ClientConfig, CrdtLocation, CrdtType, Credentials, NodeId, TlsClientConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crdtkv")]
#[command(about = "Command-line client for crdtkv data type clusters")]
#[command(version)]
struct Cli {
    /// Node address (host:port), repeatable or comma separated
    #[arg(short, long = "node", value_delimiter = ',')]
    nodes: Vec<NodeId>,

    /// YAML configuration file (defaults to $CRDTKV_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User name for authentication
    #[arg(short, long)]
    user: Option<String>,

    /// Password for authentication
    #[arg(short, long, env = "CRDTKV_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Retries on other nodes after a network failure
    #[arg(long)]
    retries: Option<u32>,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (for mTLS)
    #[arg(long)]
    client_cert: Option<PathBuf>,

    /// Path to client private key (for mTLS)
    #[arg(long)]
    client_key: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    /// Server name for TLS SNI (defaults to node hostname)
    #[arg(long)]
    server_name: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    /// Any TLS option turns TLS on.
    fn tls_requested(&self) -> bool {
        self.tls
            || self.insecure
            || self.ca_cert.is_some()
            || self.client_cert.is_some()
            || self.client_key.is_some()
            || self.server_name.is_some()
    }
}

/// Bucket type, bucket and key of a data type.
#[derive(Args, Clone)]
pub struct Target {
    /// Bucket type
    pub bucket_type: String,
    /// Bucket
    pub bucket: String,
    /// Key
    pub key: String,
}

impl Target {
    pub fn location(&self) -> CrdtLocation {
        CrdtLocation::new(&self.bucket_type, &self.bucket, &self.key)
    }
}

/// Kind of a map field, for removals.
#[derive(Clone, Copy, ValueEnum)]
pub enum FieldKind {
    Counter,
    Flag,
    Register,
    Set,
    Map,
}

impl From<FieldKind> for CrdtType {
    fn from(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Counter => CrdtType::Counter,
            FieldKind::Flag => CrdtType::Flag,
            FieldKind::Register => CrdtType::Register,
            FieldKind::Set => CrdtType::Set,
            FieldKind::Map => CrdtType::Map,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Ping a node
    Ping,

    /// Get server info
    Info,

    /// Fetch a data type and print its value
    Fetch {
        #[command(flatten)]
        target: Target,

        /// Read quorum
        #[arg(long)]
        r: Option<u32>,

        /// Primary read quorum
        #[arg(long)]
        pr: Option<u32>,
    },

    /// Increment (or decrement) a counter
    Incr {
        #[command(flatten)]
        target: Target,

        /// Amount to add
        #[arg(allow_hyphen_values = true, default_value = "1")]
        delta: i64,
    },

    /// Add members to a set
    SetAdd {
        #[command(flatten)]
        target: Target,

        /// Members to add
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Remove members from a set
    SetRemove {
        #[command(flatten)]
        target: Target,

        /// Members to remove
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Add elements to a HyperLogLog
    HllAdd {
        #[command(flatten)]
        target: Target,

        /// Elements to add
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Increment a counter inside a map (dotted path for nested maps)
    MapIncr {
        #[command(flatten)]
        target: Target,

        /// Field path, e.g. stats.logins
        path: String,

        /// Amount to add
        #[arg(allow_hyphen_values = true, default_value = "1")]
        delta: i64,
    },

    /// Assign a register inside a map
    MapRegister {
        #[command(flatten)]
        target: Target,

        /// Field path
        path: String,

        /// New value
        value: String,
    },

    /// Enable or disable a flag inside a map
    MapFlag {
        #[command(flatten)]
        target: Target,

        /// Field path
        path: String,

        /// true or false
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },

    /// Add members to a set inside a map
    MapSetAdd {
        #[command(flatten)]
        target: Target,

        /// Field path
        path: String,

        /// Members to add
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Remove a field from a map
    MapRemove {
        #[command(flatten)]
        target: Target,

        /// Field path
        path: String,

        /// Kind of the field
        #[arg(value_enum)]
        kind: FieldKind,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };
    let nodes: Vec<String> = config.nodes.iter().map(ToString::to_string).collect();
    let client = Client::new(config)?;

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, &nodes.join(","))?;
        }
        Some(cmd) => match commands::execute(&client, cmd) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

/// Layers command-line options over the file and environment configuration.
fn build_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match cli.config {
        Some(ref path) => {
            let mut config = ClientConfig::from_file(path)?;
            config.apply_env_overrides()?;
            tracing::debug!("Loaded config from {}", path.display());
            config
        }
        None => ClientConfig::load()?,
    };

    if !cli.nodes.is_empty() {
        config.nodes = cli.nodes.clone();
    }
    if let Some(retries) = cli.retries {
        config.max_retries = retries;
    }

    match (&cli.user, &cli.password) {
        (Some(user), Some(password)) => {
            config.credentials = Some(Credentials::new(user, password));
        }
        (Some(user), None) => {
            config.credentials = Some(Credentials::new(user, ""));
        }
        _ => {}
    }

    if cli.tls_requested() {
        let mut tls = config.tls.take().unwrap_or_else(TlsClientConfig::new);
        if let Some(ref path) = cli.ca_cert {
            tls.ca_cert_path = Some(path.clone());
        }
        match (&cli.client_cert, &cli.client_key) {
            (Some(cert), Some(key)) => {
                tls = tls.with_client_cert(cert, key);
            }
            (None, None) => {}
            _ => return Err("--client-cert and --client-key must be used together".into()),
        }
        if cli.insecure {
            tls.insecure = true;
        }
        if let Some(ref name) = cli.server_name {
            tls.server_name = Some(name.clone());
        }
        config.tls = Some(tls);
    }

    config.validate()?;
    Ok(config)
}
