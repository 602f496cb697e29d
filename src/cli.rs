use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::json;

use crate::broadcast::{broadcast_output_shape, is_broadcastable};
use crate::config::StatsConfig;
use crate::error::OsResult;
use crate::model::{Category, Target};
use crate::stats::StatsStore;

#[derive(Debug, Parser)]
#[command(name = "opscan")]
#[command(about = "Cross-backend operator scan statistics and broadcast checks")]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace) when RUST_LOG is unset.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the per-target unit test summary.
    Summary(SummaryArgs),
    /// Record one operator under a category for a target.
    Record(RecordArgs),
    /// Delete the stats file.
    Reset(StatsPathArgs),
    /// Check whether two shapes broadcast along an axis.
    CheckBroadcast(CheckBroadcastArgs),
}

#[derive(Debug, Args)]
pub struct StatsPathArgs {
    /// Stats file; defaults to $OPSCAN_STATS_PATH or ./statics_data.
    #[arg(long)]
    pub stats: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    #[command(flatten)]
    pub path: StatsPathArgs,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    #[command(flatten)]
    pub path: StatsPathArgs,

    /// all_test_ops, success_ops, out_diff_ops or not_supported_ops.
    #[arg(long)]
    pub category: Category,

    /// Host, X86, ARM, OpenCL or Metal (case-insensitive).
    #[arg(long)]
    pub target: Target,

    #[arg(long)]
    pub op: String,

    /// Lock the stats file for the whole read-modify-write cycle.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct CheckBroadcastArgs {
    #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
    pub x: Vec<i64>,

    #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
    pub y: Vec<i64>,

    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub axis: i64,

    #[arg(long)]
    pub json: bool,
}

fn stats_store(path: &StatsPathArgs, strict: bool) -> StatsStore {
    let config = StatsConfig::from_env().with_overrides(path.stats.clone(), strict);
    StatsStore::from_config(&config)
}

/// Executes `command`, writing its human or JSON output to `out`.
pub fn run(command: Command, out: &mut impl Write) -> OsResult<()> {
    match command {
        Command::Summary(args) => {
            let store = stats_store(&args.path, false);
            let summary = store.summarize()?;
            if args.json {
                writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
            } else {
                write!(out, "{summary}")?;
            }
        }
        Command::Record(args) => {
            let store = stats_store(&args.path, args.strict);
            store.record(args.category, args.target, &args.op)?;
            tracing::info!(
                path = %store.path().display(),
                category = %args.category,
                target = %args.target,
                op = %args.op,
                "recorded"
            );
        }
        Command::Reset(args) => {
            let store = stats_store(&args, false);
            let removed = store.reset()?;
            writeln!(
                out,
                "{} {}",
                if removed { "removed" } else { "no stats file at" },
                store.path().display()
            )?;
        }
        Command::CheckBroadcast(args) => {
            let legal = is_broadcastable(&args.x, &args.y, args.axis);
            if args.json {
                let payload = json!({
                    "x": args.x,
                    "y": args.y,
                    "axis": args.axis,
                    "broadcastable": legal,
                    "output_shape": broadcast_output_shape(&args.x, &args.y, args.axis),
                });
                writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;
            } else {
                writeln!(out, "{legal}")?;
            }
        }
    }
    Ok(())
}
