//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod rules;
pub mod util;
pub mod watch;

use rulesync_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::session::Session;

/// Dispatch a command that needs the loaded config.
pub async fn dispatch(cmd: Command, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(&args, cfg, global).await,
        Command::Watch => watch::handle(cfg, global).await,

        // Everything else works on one device
        cmd => {
            let session = Session::open(global, cfg).await?;
            let result = rules::handle(cmd, &session, cfg, global).await;
            session.close().await;
            result
        }
    }
}
