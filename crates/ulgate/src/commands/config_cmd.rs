//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", super::config_path(global).display());
            Ok(())
        }

        ConfigCommand::Check => {
            let config = super::load_config(global)?;
            config.validate()?;
            println!(
                "configuration OK: {} group(s), {} device(s)",
                config.groups.len(),
                config.devices.len()
            );
            Ok(())
        }

        ConfigCommand::Show => {
            let config = super::load_config(global)?;
            print!("{}", config.redacted().to_toml()?);
            Ok(())
        }
    }
}
