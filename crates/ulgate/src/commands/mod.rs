//! Subcommand handlers.

pub mod config_cmd;
pub mod decode;
pub mod run;

use std::path::PathBuf;

use ulgate_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The file `--config` names, or the platform default.
fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(ulgate_config::config_path)
}

fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(ulgate_config::load_config(global.config.as_deref())?)
}
