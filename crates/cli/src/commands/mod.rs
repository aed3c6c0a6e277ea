//! Command handlers, one module per subcommand.

mod daemon;
mod debug;
mod stop;

use crate::cli::{Cli, Commands, DaemonAction};
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let format = cli.format;
	match cli.command {
		Commands::Debug(args) => debug::run(args, cli.config.as_deref(), format).await,
		Commands::Stop(args) => stop::run(&args.device, format).await,
		Commands::Daemon(args) => match args.action {
			DaemonAction::Start { foreground } => daemon::start(foreground, format).await,
			DaemonAction::Stop => daemon::stop(format).await,
			DaemonAction::Status => daemon::status(format).await,
		},
	}
}
