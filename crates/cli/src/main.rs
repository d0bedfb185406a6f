mod output;
mod targets;

use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser};
use tracing_subscriber::EnvFilter;

use brique_lib::{BuildContext, Config};

use crate::output::{format_duration, print_error, print_success};

/// Identifier namespacing the container images of this repository.
const ROOT: &str = "github.com/brique-build/brique";

/// brique - build this repository
#[derive(Parser)]
#[command(name = "b")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Show progress details and image build output
  #[arg(short, long)]
  verbose: bool,

  /// Only show errors
  #[arg(short, long, conflicts_with = "verbose")]
  quiet: bool,

  /// Run every tool in a container, even when installed locally
  #[arg(short = 'c', long)]
  containers: bool,

  /// Build for all platforms (linux, darwin, windows)
  #[arg(long)]
  cross: bool,

  /// Build platforms in parallel
  #[arg(long)]
  parallel: bool,

  /// Container engine to run tools with
  #[arg(long, value_name = "ENGINE")]
  engine: Option<String>,

  /// Targets to run, the first registered one when empty
  targets: Vec<String>,
}

impl Cli {
  fn config(&self) -> Config {
    let mut config = Config::from_env();
    config.verbose |= self.verbose;
    config.force_containers |= self.containers;
    config.cross |= self.cross;
    config.parallel |= self.parallel;
    if let Some(engine) = &self.engine {
      config.engine = engine.clone();
    }
    config
  }

  fn filter(&self) -> EnvFilter {
    if self.verbose {
      EnvFilter::new("debug")
    } else if self.quiet {
      EnvFilter::new("error")
    } else {
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
  }
}

fn main() -> ExitCode {
  let cli = match parse() {
    Ok(cli) => cli,
    Err(e) => e.exit(),
  };

  tracing_subscriber::fmt()
    .with_env_filter(cli.filter())
    .with_writer(std::io::stderr)
    .with_target(false)
    .without_time()
    .init();

  let start = Instant::now();
  match run(&cli) {
    Ok(()) => {
      if !cli.quiet {
        print_success(&format!("done in {}", format_duration(start.elapsed())));
      }
      ExitCode::SUCCESS
    }
    Err(e) => {
      print_error(&e.to_string());
      ExitCode::FAILURE
    }
  }
}

/// Parse the command line, listing the registered targets in the help text.
fn parse() -> Result<Cli, clap::Error> {
  let listing = BuildContext::new(Config::default());
  let usage = match listing.register_all(targets::all()) {
    Ok(()) => listing.usage(),
    Err(_) => String::new(),
  };
  let command = Cli::command().after_help(format!("Targets:\n{usage}"));
  Cli::from_arg_matches(&command.get_matches())
}

fn run(cli: &Cli) -> Result<()> {
  let ctx = BuildContext::new(cli.config());
  ctx.init(ROOT)?;
  ctx.register_all(targets::all())?;
  ctx.run(cli.targets.as_slice())?;
  Ok(())
}
