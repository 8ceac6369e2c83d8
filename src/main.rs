use anyhow::{Context, Result};
use clap::Parser;
use proxy_freeze_check::{
    proxy::{timeout_from_secs, CheckerConfig, ProxyChecker, ProxyParser},
    report,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Proxy checker with TLS freeze detection
#[derive(Parser)]
#[command(name = "proxy-freeze-check")]
#[command(about = "Checks authenticated HTTP proxies and detects TLS freeze throttling")]
#[command(after_help = "Examples:
  proxy-freeze-check proxy-list.txt
  proxy-freeze-check proxy-list.txt -c 10 -v
  proxy-freeze-check proxy-list.txt -o working.txt --timeout 60")]
struct Cli {
    /// File with proxy list (format: host:port:username:password)
    input: PathBuf,

    /// Output file for working proxies
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of concurrent checks
    #[arg(short, long, default_value = "5")]
    concurrency: usize,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    timeout_connect: f64,

    /// Total timeout per proxy in seconds
    #[arg(long, default_value = "30")]
    timeout: f64,

    /// Show details for working proxies too
    #[arg(short, long)]
    verbose: bool,

    /// Also save proxies that showed a TLS freeze
    #[arg(long)]
    include_frozen: bool,

    /// Write the full results as JSON
    #[arg(long)]
    json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let loaded = ProxyParser::load_file(&cli.input)?;
    if loaded.proxies.is_empty() {
        println!("No proxies to check");
        return Ok(ExitCode::FAILURE);
    }

    let connect_timeout = timeout_from_secs(cli.timeout_connect).context("--timeout-connect")?;
    let total_timeout = timeout_from_secs(cli.timeout).context("--timeout")?;
    let config = CheckerConfig::new()
        .with_concurrency(cli.concurrency)
        .with_connect_timeout(connect_timeout)
        .with_total_timeout(total_timeout);
    let policy = config.stall_policy.clone();

    println!("Loaded {} proxies for checking", loaded.proxies.len());
    println!(
        "Parameters: concurrency={}, timeout={}s",
        cli.concurrency, cli.timeout
    );
    println!(
        "Freeze window: {}-{} KB, stall timeout {}s",
        policy.freeze_window.start() / 1024,
        policy.freeze_window.end() / 1024,
        policy.stall_timeout.as_secs()
    );
    println!("{}", "-".repeat(50));
    info!(count = loaded.proxies.len(), input = %cli.input.display(), "starting checks");

    let checker = ProxyChecker::with_config(config);
    let verbose = cli.verbose;
    let results = checker
        .check_proxies_with(loaded.proxies, |result| report::print_result(result, verbose))
        .await;

    report::print_summary(&report::Summary::from_results(&results));

    if let Some(output) = &cli.output {
        let working = report::working_proxies(&results, cli.include_frozen);
        ProxyParser::save_to_file(&working, output)?;
        println!("\nWorking proxies saved to: {}", output.display());
    }

    if let Some(json) = &cli.json {
        report::write_json(&results, json)?;
        println!("Full report saved to: {}", json.display());
    }

    Ok(ExitCode::SUCCESS)
}
