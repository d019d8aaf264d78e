//! Clap derive structures for the `ulgate` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ulgate -- IoT protocol gateway
#[derive(Debug, Parser)]
#[command(
    name = "ulgate",
    version,
    about = "Bridge Ultra Light and JSON devices to an NGSI-v2 context broker",
    long_about = "Receives device measurements over HTTP, MQTT and AMQP, forwards them\n\
        to an NGSI-v2 context broker, and delivers broker-issued commands back\n\
        to the devices.",
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
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "ULGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, env = "ULGATE_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway and serve until interrupted
    Run,

    /// Inspect and validate configuration
    #[command(alias = "cfg")]
    Config(ConfigArgs),

    /// Decode a device payload and print the measurement groups as JSON
    Decode(DecodeArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Load and validate the configuration
    Check,

    /// Display the resolved configuration (secrets masked)
    Show,

    /// Print the configuration file path
    Path,
}

// ── Decode ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Payload encoding
    #[arg(long, short = 'e', default_value = "ul")]
    pub encoding: EncodingArg,

    /// Attribute name for single-value payloads
    #[arg(long)]
    pub attr: Option<String>,

    /// Raw payload, e.g. 't|21#h|40'
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EncodingArg {
    /// Ultra Light `name|value` pairs
    #[value(alias = "ultralight")]
    Ul,
    /// JSON object or array of objects
    Json,
    /// Ultra Light framing with vendor compact values
    Compact,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
