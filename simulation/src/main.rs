//! Ferry - delay-tolerant network simulator
//!
//! Runs a scenario file or the built-in random-walk demo and prints the run
//! summary.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use ferry_core::Settings;
use ferry_logging::{FerrySubscriberBuilder, LogConfig};
use ferry_simulation::{DEFAULT_SCENARIO, RunSummary, Scenario, ScenarioConfig};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "ferry",
    about = "Delay-tolerant network simulation with learned replication",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log JSON lines instead of pretty output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file
    Run {
        /// Path to the scenario TOML file
        scenario: PathBuf,

        /// Directory to write report files into
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many ticks
        #[arg(short, long)]
        ticks: Option<u64>,
    },

    /// Run the built-in random-walk scenario
    Demo {
        /// Router to use: prophet or adaptive
        #[arg(short, long, default_value = "adaptive")]
        router: String,

        /// Number of hosts
        #[arg(long, default_value = "20")]
        hosts: u32,

        /// Virtual time to run for
        #[arg(short, long, default_value = "2000")]
        end_time: f64,

        /// Seed for mobility and message generation
        #[arg(short, long, default_value = "1")]
        seed: u32,

        /// Directory to write report files into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Commands {
    fn output(&self) -> Option<&Path> {
        match self {
            Self::Run { output, .. } | Self::Demo { output, .. } => output.as_deref(),
        }
    }
}

/// Logging for one invocation; a report directory also gets the JSONL run log
fn log_config(verbose: bool, output: Option<&Path>) -> LogConfig {
    match output {
        Some(dir) => {
            let mut config = LogConfig::simulation(dir.to_path_buf());
            if verbose {
                config.default_level = "debug".to_string();
            }
            config
        }
        None if verbose => LogConfig::development(),
        None => LogConfig::default(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = FerrySubscriberBuilder::new()
        .with_config(log_config(cli.verbose, cli.command.output()))
        .with_pretty_console(!cli.json)
        .init()
        .context("Failed to install logging")?;

    match cli.command {
        Commands::Run {
            scenario,
            output,
            ticks,
        } => {
            let config = ScenarioConfig::load(&scenario)
                .with_context(|| format!("Failed to load scenario {}", scenario.display()))?;
            run(config, ticks, output)
        }
        Commands::Demo {
            router,
            hosts,
            end_time,
            seed,
            output,
        } => {
            let mut settings = Settings::from_toml_str(DEFAULT_SCENARIO)?;
            settings.set("Scenario.router", router.as_str())?;
            settings.set("Scenario.hosts", hosts)?;
            settings.set("Scenario.endTime", end_time)?;
            settings.set("Scenario.seed", seed)?;
            let config = ScenarioConfig::from_settings(&settings).context("Invalid demo settings")?;
            run(config, None, output)
        }
    }
}

fn run(config: ScenarioConfig, ticks: Option<u64>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let name = config.name.clone();
    let mut scenario = Scenario::build(config).context("Failed to build the world")?;
    scenario
        .run(ticks)
        .with_context(|| format!("Scenario {name} aborted"))?;

    if let Some(dir) = output {
        // Report failures never invalidate the run itself
        match scenario.report().persist(&dir) {
            Ok(files) => info!(dir = %dir.display(), files = files.len(), "Reports written"),
            Err(e) => warn!(error = %e, "Failed to write reports"),
        }
    }

    print_summary(&name, scenario.ticks(), &scenario.report().summary());
    Ok(())
}

fn print_summary(name: &str, ticks: u64, summary: &RunSummary) {
    println!("\n=== {name} ===");
    println!("Ticks:                 {ticks}");
    println!("Messages created:      {}", summary.created);
    println!("Messages delivered:    {}", summary.delivered);
    println!("Delivery ratio:        {:.3}", summary.delivery_ratio);
    println!("Copies:                {}", summary.copies);
    println!("Copies per message:    {:.2}", summary.average_copies_per_message);
    println!("Average latency:       {:.1}", summary.average_latency);
    println!("Replication decisions: {}", summary.copy_actions);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dir_gets_run_log() {
        let cli = Cli::parse_from(["ferry", "demo", "--output", "out/run1"]);
        let config = log_config(cli.verbose, cli.command.output());
        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("out/run1"));
        assert_eq!(config.default_level, "info");
    }

    #[test]
    fn test_verbose_levels() {
        let cli = Cli::parse_from(["ferry", "run", "scenario.toml", "-o", "out", "--verbose"]);
        let config = log_config(cli.verbose, cli.command.output());
        assert!(config.file.is_some());
        assert_eq!(config.default_level, "debug");

        let cli = Cli::parse_from(["ferry", "demo", "--verbose"]);
        let config = log_config(cli.verbose, cli.command.output());
        assert!(config.file.is_none());
        assert_eq!(config.default_level, "debug");

        let config = log_config(false, None);
        assert!(config.file.is_none());
        assert_eq!(config.default_level, "info");
    }
}
