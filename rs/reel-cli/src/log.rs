use clap::Parser;

/// Logging configuration, shared by every subcommand.
#[derive(Parser, Clone, Debug, Default)]
pub struct Log {
	/// Increase verbosity; repeat for more.
	#[arg(long, short, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Silence all output except errors.
	#[arg(long, short, conflicts_with = "verbose")]
	pub quiet: bool,
}

impl Log {
	pub fn init(&self) {
		let level = if self.quiet {
			"error"
		} else {
			match self.verbose {
				0 => "info",
				1 => "debug",
				_ => "trace",
			}
		};

		let filter = tracing_subscriber::EnvFilter::try_from_default_env()
			.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("reel={level},reel_cli={level}")));

		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_writer(std::io::stderr)
			.init();
	}
}
