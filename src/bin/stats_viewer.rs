//! # Stats Viewer CLI
//!
//! Command-line tool for inspecting and resetting the DNS statistics database.
//!
//! Usage:
//!   stats_viewer show [--unit hours|days] [--format pretty|json]
//!   stats_viewer info
//!   stats_viewer reset

use clap::{Parser, Subcommand};
use dns_stats::{CountPair, RotationConfig, StatsConfig, StatsEngine, StatsReport, TimeUnit};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stats_viewer")]
#[command(about = "Inspect rolling DNS query statistics", long_about = None)]
struct Cli {
    /// Path to the statistics database
    #[arg(short, long, default_value = "./var/data/stats.db")]
    db: PathBuf,

    /// Retention interval in days (1, 7, 30 or 90)
    #[arg(long, default_value_t = 1)]
    days: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show aggregated statistics
    Show {
        /// Series granularity: hours or days
        #[arg(short, long, default_value = "hours")]
        unit: TimeUnit,

        /// Output format: pretty, json
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },

    /// Show retention settings
    Info,

    /// Delete all stored statistics
    Reset,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let config = StatsConfig {
        db_path: cli.db,
        interval_days: cli.days,
        rotation: RotationConfig {
            enabled: false,
            ..Default::default()
        },
    };
    config.validate()?;

    let engine = StatsEngine::open(config)?;

    match cli.command {
        Commands::Show { unit, format } => {
            let report = engine.query(unit);
            let report = match report {
                Ok(report) => report,
                Err(e) => {
                    engine.close();
                    return Err(e.into());
                }
            };

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&report)?),
                _ => print_report(&report),
            }
        }

        Commands::Info => {
            println!("Interval:     {} days", engine.interval_days());
            println!("Window:       {} hours", engine.limit_hours());
            if let Some(id) = engine.current_unit_id() {
                println!("Current unit: {}", id);
            }
        }

        Commands::Reset => {
            engine.clear();
            println!("Statistics cleared");
        }
    }

    engine.close();
    Ok(())
}

fn print_report(report: &StatsReport) {
    println!("📊 DNS Statistics ({})\n", report.time_units.as_str());
    println!("DNS queries:            {}", report.num_dns_queries);
    println!("Blocked by filters:     {}", report.num_blocked_filtering);
    println!("Safe browsing:          {}", report.num_replaced_safebrowsing);
    println!("Safe search:            {}", report.num_replaced_safesearch);
    println!("Parental control:       {}", report.num_replaced_parental);
    println!("Avg processing time:    {:.3} ms", report.avg_processing_time * 1000.0);

    println!("\nQueries per {}:", report.time_units.as_str().trim_end_matches('s'));
    let series: Vec<String> = report.dns_queries.iter().map(|n| n.to_string()).collect();
    println!("  {}", series.join(" "));

    print_top("Top queried domains", &report.top_queried_domains);
    print_top("Top blocked domains", &report.top_blocked_domains);
    print_top("Top clients", &report.top_clients);
}

fn print_top(title: &str, pairs: &[CountPair]) {
    println!("\n{}:", title);
    if pairs.is_empty() {
        println!("  (none)");
        return;
    }
    for pair in pairs.iter().take(10) {
        println!("  {:<40} {:>10}", pair.name, pair.count);
    }
}
