//! qreplay-report - summarizes a qreplay metrics file per time bin.

use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, error};
use tracing_subscriber::EnvFilter;

use qreplay_core::report::MetricsReport;

#[derive(Parser)]
#[command(name = "qreplay-report", about = "Summarize replay metrics per time bin", version)]
struct Args {
    /// Metrics file written by qreplay.
    file: PathBuf,

    /// Bin width in seconds.
    #[arg(short, long, default_value = "60")]
    bin_size: u64,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("qreplay_report={}", level).parse().unwrap())
        .add_directive(format!("qreplay_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let report = match MetricsReport::from_path(&args.file, args.bin_size) {
        Ok(report) => report,
        Err(e) => {
            error!("{}: {}", args.file.display(), e);
            std::process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("failed to serialize report: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        print!("{}", report);
    }
}
