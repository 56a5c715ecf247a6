//! holders - native handle lifetime tooling
//!
//! A small command line front end over `holders-core`:
//! - `--demo` walks a pool / allocation / stream lifetime against a
//!   recording driver and prints every release call
//! - `--probe` checks that the native driver library can be loaded

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use holders_core::{
    init, CudaDriver, HolderContext, HoldersConfig, RecordingDriver, Stream, UsageReport,
};
use tracing::info;

fn print_help() {
    println!("holders - native handle lifetime tooling v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  holders [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help           Print this help message");
    println!("  -v, --version        Print version information");
    println!("      --config <PATH>  Load configuration from a JSON file");
    println!("      --demo           Run the pool/allocation lifetime demo");
    println!("      --json           Print the usage report as JSON");
    println!("      --probe          Check that the native driver library loads");
}

struct Options {
    config: Option<PathBuf>,
    demo: bool,
    json: bool,
    probe: bool,
}

fn parse_args(args: &[String]) -> Result<Option<Options>> {
    let mut options = Options {
        config: None,
        demo: false,
        json: false,
        probe: false,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                println!("holders {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "--config" => {
                let path = iter.next().context("--config requires a path")?;
                options.config = Some(PathBuf::from(path));
            }
            "--demo" => options.demo = true,
            "--json" => options.json = true,
            "--probe" => options.probe = true,
            other => bail!(
                "unrecognized argument '{}'\nRun 'holders --help' for usage information.",
                other
            ),
        }
    }
    Ok(Some(options))
}

fn print_report(report: &UsageReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json().context("Failed to serialize usage report")?);
    } else {
        println!("{report}");
    }
    Ok(())
}

/// Pool 0x1000 owns allocation 0x2000, freed on static stream 0x10.
fn run_demo(config: &HoldersConfig, json: bool) -> Result<()> {
    let driver = Arc::new(RecordingDriver::new());
    let ctx = HolderContext::with_policy(driver.clone(), config.failure_policy);

    let pool = ctx.mem_pool(0x1000usize);
    let stream = ctx.capture_static::<Stream>(0x10usize);
    let ptr = ctx.deviceptr(0x2000usize, &pool, &stream);
    println!("captured {pool}, {ptr} (freed on {stream})");

    drop(stream);
    drop(ptr);
    println!("after dropping the allocation:");
    for call in driver.calls() {
        println!("  {call}");
    }

    drop(pool);
    println!("after dropping the pool:");
    for call in driver.calls() {
        println!("  {call}");
    }

    print_report(&ctx.usage_report(), json)
}

fn run_probe(config: &HoldersConfig) -> Result<()> {
    let driver = CudaDriver::load_from(config.driver_library())
        .with_context(|| format!("Probe of {:?} failed", config.driver_library()))?;
    println!("native driver loaded from {}", driver.path().display());
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(options) = parse_args(&args)? else {
        return Ok(());
    };

    let config = match &options.config {
        Some(path) => HoldersConfig::from_file(path)?,
        None => HoldersConfig::default(),
    };
    init(&config.log_filter)?;

    if options.probe {
        run_probe(&config)?;
    }
    if options.demo {
        run_demo(&config, options.json)?;
    }
    if !options.probe && !options.demo {
        info!("Nothing to do");
        print_help();
    }
    Ok(())
}
