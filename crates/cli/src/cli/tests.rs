use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn parse_debug_command() {
	let cli = Cli::try_parse_from(["devbridge", "debug", "emulator-5554", "org.demo"]).unwrap();

	assert_eq!(cli.command.name(), "debug");
	match cli.command {
		Commands::Debug(args) => {
			assert_eq!(args.device, "emulator-5554");
			assert_eq!(args.app, "org.demo");
			assert_eq!(args.platform, None);

			let options = args.options();
			assert!(options.client);
			assert!(options.chrome);
			assert!(!options.debug_brk);
			assert!(options.conflict().is_none());
		}
		_ => panic!("Expected Debug command"),
	}
}

#[test]
fn parse_debug_flags() {
	let cli = Cli::try_parse_from([
		"devbridge",
		"debug",
		"00008030-001A",
		"org.demo",
		"--platform",
		"ios",
		"--debug-brk",
		"--no-client",
		"--inspector",
		"--devtools-commit",
		"abc123",
		"--justlaunch",
	])
	.unwrap();

	match cli.command {
		Commands::Debug(args) => {
			assert_eq!(args.platform.map(Platform::from), Some(Platform::Ios));
			let options = args.options();
			assert!(options.debug_brk);
			assert!(!options.client);
			assert!(options.inspector);
			assert!(!options.chrome);
			assert!(options.justlaunch);
			assert_eq!(options.dev_tools_commit.as_deref(), Some("abc123"));
		}
		_ => panic!("Expected Debug command"),
	}
}

#[test]
fn conflicting_flags_parse_but_conflict() {
	let cli = Cli::try_parse_from(["devbridge", "debug", "emu", "org.demo", "--debug-brk", "--start"]).unwrap();
	let Commands::Debug(args) = cli.command else {
		panic!("Expected Debug command");
	};
	assert!(args.options().conflict().is_some());
}

#[test]
fn parse_global_flags_after_subcommand() {
	let cli = Cli::try_parse_from([
		"devbridge",
		"stop",
		"emu",
		"-vv",
		"-f",
		"json",
		"--config",
		"/etc/devbridge.json",
	])
	.unwrap();

	assert_eq!(cli.verbose, 2);
	assert_eq!(cli.format, OutputFormat::Json);
	assert_eq!(cli.config, Some(PathBuf::from("/etc/devbridge.json")));
	assert!(matches!(cli.command, Commands::Stop(StopArgs { ref device }) if device == "emu"));
}

#[test]
fn parse_daemon_actions() {
	let cli = Cli::try_parse_from(["devbridge", "daemon", "start", "--foreground"]).unwrap();
	assert_eq!(cli.command.name(), "daemon start");
	assert!(matches!(
		cli.command,
		Commands::Daemon(DaemonArgs {
			action: DaemonAction::Start { foreground: true }
		})
	));

	let cli = Cli::try_parse_from(["devbridge", "daemon", "status"]).unwrap();
	assert_eq!(cli.command.name(), "daemon status");
}

#[test]
fn unknown_platform_is_rejected() {
	assert!(Cli::try_parse_from(["devbridge", "debug", "emu", "org.demo", "--platform", "tizen"]).is_err());
}
