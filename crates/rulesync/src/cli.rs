//! Clap derive structures for the `rulesync` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// rulesync -- edit traffic rules on remote appliances
#[derive(Debug, Parser)]
#[command(
    name = "rulesync",
    version,
    about = "Keep traffic rules on remote appliances in sync from the command line",
    long_about = "Edit, check and watch the traffic rules hosted by one or more\n\
        load-balancing appliances. Every command talks to the device's\n\
        management API; `watch` keeps a live mirror of all configured devices.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Device profile to use
    #[arg(
        long,
        short = 'd',
        visible_alias = "device",
        env = "RULESYNC_PROFILE",
        global = true
    )]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "RULESYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format (defaults to the config's `defaults.output`)
    #[arg(long, short = 'o', env = "RULESYNC_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "RULESYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides the profile)
    #[arg(long, env = "RULESYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List configured devices
    #[command(alias = "dev")]
    Devices(DevicesArgs),

    /// Refresh the device and list its rules
    #[command(alias = "ls")]
    Rules,

    /// Print the text of a rule
    Show(ShowArgs),

    /// Check a rule file against the device without storing it
    Check(CheckArgs),

    /// Create a rule or replace its text from a file
    Push(PushArgs),

    /// Rename a rule
    #[command(alias = "mv")]
    Rename(RenameArgs),

    /// Delete a rule
    #[command(alias = "rm")]
    Delete(DeleteArgs),

    /// Mirror every configured device and log model events until Ctrl-C
    Watch,

    /// Manage CLI configuration and device profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Rule commands ────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Connect to each device and report its sync state
    #[arg(long, short = 'r')]
    pub refresh: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Rule name
    pub rule: String,

    /// Keep foreign-format marker lines
    #[arg(long)]
    pub raw: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// File with rule text (`-` for stdin)
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct PushArgs {
    /// Rule name
    pub rule: String,

    /// File with rule text (`-` for stdin)
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct RenameArgs {
    /// Current rule name
    pub old: String,

    /// New rule name
    pub new: String,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Rule name
    pub rule: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the current configuration (secrets masked)
    Show,

    /// Add a device profile
    AddDevice(AddDeviceArgs),

    /// Remove a device profile
    RemoveDevice {
        /// Profile name
        name: String,
    },

    /// Store a device password in the system keyring
    SetPassword {
        /// Profile name (defaults to the selected profile)
        name: Option<String>,
    },

    /// Set the default device profile
    Use {
        /// Profile name
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct AddDeviceArgs {
    /// Profile name
    pub name: String,

    /// Hostname or address of the admin interface
    #[arg(long)]
    pub host: String,

    /// Admin port
    #[arg(long, default_value_t = rulesync_config::DEFAULT_PORT)]
    pub port: u16,

    /// Admin username
    #[arg(long, short = 'u')]
    pub username: String,

    /// Environment variable that holds the password
    #[arg(long)]
    pub password_env: Option<String>,

    /// Prompt for the password and store it in the system keyring
    #[arg(long, conflicts_with = "password_env")]
    pub keyring: bool,

    /// PEM CA certificate for this device
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Register the device without connecting to it
    #[arg(long)]
    pub offline: bool,

    /// Make this the default profile
    #[arg(long)]
    pub default: bool,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
