use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use chanlist::config::Config;
use chanlist::mention::SearchPlan;
use chanlist::scenario::{self, Scenario, StepReport, SuggestRequest};

#[derive(Parser, Debug)]
#[command(
    name = "chanlist",
    about = "Replay channel list scenarios and mention lookups against an in-process chat SDK"
)]
struct Args {
    /// Configuration file (defaults apply when it does not exist)
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scenario and print the channel list after every step
    Replay {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Print one JSON object per step instead of text
        #[arg(long)]
        json: bool,
    },
    /// Run one mention lookup against a channel from a scenario
    Suggest {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Channel url
        #[arg(long)]
        channel: String,

        /// Composer text
        #[arg(long)]
        text: String,

        /// Caret position in characters (defaults to end of text)
        #[arg(long)]
        cursor: Option<usize>,

        /// Mentions already committed in the message
        #[arg(long, default_value_t = 0)]
        mentioned: usize,
    },
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    Scenario::from_path(path)
        .with_context(|| format!("Failed to load scenario '{}'", path.display()))
}

fn print_report(report: &StepReport) {
    let mut line = format!(
        "[{}] {:<28} [{}]",
        report.step,
        report.label,
        report.channels.join(", ")
    );
    if let Some(error) = &report.error {
        line.push_str(&format!("  error: {error}"));
    }
    println!("{line}");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;

    match args.command {
        Command::Replay { scenario: path, json } => {
            let scenario = load_scenario(&path)?;
            let reports = scenario::replay(&scenario, config.collection_params())
                .await
                .context("Scenario replay failed")?;
            for report in &reports {
                if json {
                    println!("{}", serde_json::to_string(report)?);
                } else {
                    print_report(report);
                }
            }
        }
        Command::Suggest {
            scenario: path,
            channel,
            text,
            cursor,
            mentioned,
        } => {
            let scenario = load_scenario(&path)?;
            let outcome = scenario::suggest(
                &scenario,
                config.mention_config(),
                SuggestRequest {
                    channel_url: &channel,
                    text: &text,
                    cursor,
                    mentioned_count: mentioned,
                },
            )
            .await
            .context("Mention lookup failed")?;

            match &outcome.plan {
                SearchPlan::Inactive => println!("No mention being typed"),
                SearchPlan::Limited => println!("Mention limit reached"),
                SearchPlan::Query {
                    search_string,
                    range,
                } => {
                    println!(
                        "Search \"{}\" (replace {}..{}): {} match(es)",
                        search_string,
                        range.start,
                        range.end,
                        outcome.members.len()
                    );
                    for member in &outcome.members {
                        println!("  {} ({})", member.nickname, member.user_id);
                    }
                }
            }
        }
    }

    Ok(())
}
