mod log;
mod summary;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reel::fetch::HttpFetch;
use reel::{Config, HlsParser, ManifestEvent, MetadataFrame, PlayerInterface, Severity};
use url::Url;

use log::Log;

#[derive(Parser, Clone)]
pub struct Cli {
	#[command(flatten)]
	log: Log,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Clone)]
pub enum Command {
	/// Parse a presentation and print its normalized model.
	Inspect {
		/// The master (or media) playlist URL.
		url: Url,

		/// Print the model as JSON instead of a table.
		#[arg(long)]
		json: bool,

		/// Index partial segments, as a low-latency player would.
		#[arg(long)]
		low_latency: bool,
	},

	/// Parse a live presentation and keep refreshing it, printing each
	/// update, until interrupted.
	Follow {
		/// The master (or media) playlist URL.
		url: Url,

		/// Index partial segments, as a low-latency player would.
		#[arg(long)]
		low_latency: bool,
	},
}

/// Routes parser callbacks to the terminal.
struct CliPlayer {
	low_latency: bool,
}

impl PlayerInterface for CliPlayer {
	fn on_event(&self, event: ManifestEvent) {
		tracing::info!(?event, "session event");
	}

	fn on_error(&self, severity: Severity, error: &reel::Error) {
		tracing::warn!(?severity, %error, "parser error");
	}

	fn on_manifest_updated(&self) {
		tracing::debug!("manifest updated");
	}

	fn update_duration(&self, duration: f64) {
		tracing::info!(duration, "presentation duration changed");
	}

	fn disable_stream(&self, stream_id: u32) {
		tracing::warn!(stream_id, "stream disabled");
	}

	fn on_metadata(&self, kind: &str, start_time: f64, end_time: Option<f64>, frames: &[MetadataFrame]) {
		tracing::info!(kind, start_time, ?end_time, count = frames.len(), "timed metadata");
	}

	fn is_low_latency_mode(&self) -> bool {
		self.low_latency
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	cli.log.init();

	match cli.command {
		Command::Inspect { url, json, low_latency } => inspect(url, json, low_latency).await,
		Command::Follow { url, low_latency } => follow(url, low_latency).await,
	}
}

async fn inspect(url: Url, json: bool, low_latency: bool) -> anyhow::Result<()> {
	let player = Arc::new(CliPlayer { low_latency });
	let fetch = Arc::new(HttpFetch::new());
	let mut parser = HlsParser::new(Config::default(), fetch, player);

	let manifest = parser.parse(url).await.context("failed to parse presentation")?;
	let summary = summary::Summary::of(&manifest);

	if json {
		println!("{}", serde_json::to_string_pretty(&summary)?);
	} else {
		summary.print();
	}

	parser.stop();
	Ok(())
}

async fn follow(url: Url, low_latency: bool) -> anyhow::Result<()> {
	let player = Arc::new(CliPlayer { low_latency });
	let fetch = Arc::new(HttpFetch::new());
	let mut parser = HlsParser::new(Config::default(), fetch, player);

	let manifest = parser.parse(url).await.context("failed to parse presentation")?;
	summary::Summary::of(&manifest).print();

	if !parser.is_live() {
		tracing::info!("presentation is VOD, nothing to follow");
		return Ok(());
	}

	tokio::select! {
		result = parser.service() => result.context("update loop failed")?,
		_ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
	}

	summary::Summary::of(&manifest).print();
	parser.stop();
	Ok(())
}
