//! One-shot completion query against a playground completion server.
//!
//! Reads the given source files, asks for completions at `--line`/`--ch` in
//! the first one, and prints each completion as a JSON line.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kplay_completion::{ChannelConfig, CompletionClient, File, Project, TcpConnector};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "kplay-complete")]
#[command(about = "Ask a playground completion server for completions")]
struct Args {
	/// Completion server address
	#[arg(short, long, value_name = "HOST:PORT")]
	addr: String,

	/// Channel configuration (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,

	/// Cursor line, 0-based
	#[arg(long)]
	line: u32,

	/// Cursor column, 0-based
	#[arg(long)]
	ch: u32,

	/// Source files; the cursor is in the first
	#[arg(required = true, value_name = "FILE")]
	files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let default_level = if args.verbose { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	let config = match &args.config {
		Some(path) => ChannelConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => ChannelConfig::default(),
	};

	let project = Project::new(read_files(&args.files)?);
	info!(addr = %args.addr, files = project.files.len(), line = args.line, ch = args.ch, "requesting completions");

	let client = CompletionClient::spawn(TcpConnector::new(args.addr), config);
	let completions = client.complete(project, args.line, args.ch).await;
	client.close();
	info!(count = completions.len(), "completions received");

	for completion in &completions {
		println!("{}", serde_json::to_string(completion)?);
	}
	Ok(())
}

fn read_files(paths: &[PathBuf]) -> anyhow::Result<Vec<File>> {
	paths
		.iter()
		.map(|path| {
			let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
			let name = path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
			Ok(File::new(name, text))
		})
		.collect()
}
