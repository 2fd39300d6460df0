use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "keybaseca",
    version,
    about = "Team SSH certificate authority: signs short-lived user certificates for team members"
)]
pub struct Cli {
    /// CA config file (default: ~/.kssh/keybaseca.toml)
    #[arg(long, env = "KEYBASECA_CONFIG", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "KEYBASECA_LOG", default_value = "info", global = true)]
    pub log_level: String,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to file (in addition to stderr)
    #[arg(long, env = "KEYBASECA_LOG_FILE", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(kssh_ca::config::default_config_path)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate the CA signing key and print its public half
    Generate {
        /// Replace an existing key (invalidates every issued certificate)
        #[arg(long)]
        overwrite_existing_key: bool,
    },
    /// Serve signing requests until interrupted
    Service,
    /// Print the CA private key for offline backup (asks for confirmation)
    Backup,
    /// Print the audit ledger
    Audit {
        /// Only show certificates signed for this user
        #[arg(long, value_name = "USER")]
        user: Option<String>,
    },
    /// Add an identity to a team on the local directory channel
    AddMember {
        /// Team name, e.g. acme.ssh.staging
        team: String,
        /// Identity to add, e.g. alice or the bot name
        identity: String,
    },
}
