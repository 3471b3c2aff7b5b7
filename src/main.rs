mod collector;
mod db;
mod extract;
mod fetcher;
mod model;
mod settings;
mod sink;

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use collector::{CollectConfig, CollectionRun, ErrorPolicy, RunStatus};
use fetcher::{ApiFetcher, PageSource};
use model::InterestRow;
use sink::{Sink, SqliteSink, SupabaseSink};

#[derive(Parser)]
#[command(
    name = "parliament_interests",
    about = "Harvest UK Parliament register of financial interests"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SinkKind {
    /// Local SQLite table (PARLIAMENT_DB_PATH)
    Sqlite,
    /// Remote Supabase table (PARLIAMENT_SUPABASE_URL / _KEY)
    Supabase,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnError {
    /// Stop fetching and keep what was gathered
    Abort,
    /// Step over the failed page and carry on
    Skip,
}

impl From<OnError> for ErrorPolicy {
    fn from(value: OnError) -> Self {
        match value {
            OnError::Abort => ErrorPolicy::Abort,
            OnError::Skip => ErrorPolicy::Skip,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the API how many records it holds
    Probe {
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
    /// Page through the API, extract amounts/companies and upsert the result
    Collect {
        /// Records per request (1-100)
        #[arg(short = 'p', long, default_value = "100")]
        page_size: u64,
        /// Stop after this many page requests (retries and skipped pages count)
        #[arg(short = 'b', long)]
        max_batches: Option<u64>,
        /// Stop after this many raw records
        #[arg(short = 'n', long)]
        max_records: Option<u64>,
        /// Pause between pages
        #[arg(long, default_value = "3000")]
        delay_ms: u64,
        /// Cooldown after a 429
        #[arg(long, default_value = "30")]
        backoff_secs: u64,
        /// Double the cooldown on each consecutive 429
        #[arg(long)]
        exponential_backoff: bool,
        /// Consecutive 429s tolerated before giving up
        #[arg(long, default_value = "5")]
        max_retries: u32,
        /// Consecutive failed pages tolerated with --on-error skip
        #[arg(long, default_value = "3")]
        max_errors: u32,
        #[arg(long, value_enum, default_value = "abort")]
        on_error: OnError,
        /// Skip the initial total-count request
        #[arg(long)]
        no_probe: bool,
        /// Abort if the total count cannot be determined
        #[arg(long, conflicts_with = "no_probe")]
        require_total: bool,
        #[arg(short, long, value_enum, default_value = "sqlite")]
        sink: SinkKind,
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show what the local store holds
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = settings::Settings::load()?;

    let result = match cli.command {
        Commands::Probe { timeout_secs } => {
            let fetcher = ApiFetcher::new(&settings.api_url, Duration::from_secs(timeout_secs))?;
            let total = fetcher.probe().await?;
            println!("Total records available: {}", total);
            Ok(())
        }
        Commands::Collect {
            page_size,
            max_batches,
            max_records,
            delay_ms,
            backoff_secs,
            exponential_backoff,
            max_retries,
            max_errors,
            on_error,
            no_probe,
            require_total,
            sink,
            timeout_secs,
            quiet,
        } => {
            let config = CollectConfig {
                page_size,
                max_batches,
                max_records,
                delay: Duration::from_millis(delay_ms),
                backoff: Duration::from_secs(backoff_secs),
                exponential_backoff,
                max_retries,
                max_errors,
                on_error: on_error.into(),
                probe: !no_probe,
                require_total,
                show_progress: !quiet,
            };
            let fetcher = ApiFetcher::new(&settings.api_url, Duration::from_secs(timeout_secs))?;

            info!("Collecting from {}", settings.api_url);
            let run = collector::run(&fetcher, &config).await;
            print_summary(&run);

            if run.records.is_empty() {
                println!("No data collected");
                return Ok(());
            }

            let rows: Vec<InterestRow> = run.records.records().iter().map(|r| r.to_row()).collect();
            let written = match sink {
                SinkKind::Sqlite => {
                    let sink = SqliteSink::open(&settings.db_path)?;
                    write(&sink, &rows, &settings).await?
                }
                SinkKind::Supabase => {
                    let sink = SupabaseSink::new(
                        settings.supabase_url.as_deref(),
                        settings.supabase_key.as_deref(),
                        &settings.supabase_table,
                    )?;
                    write(&sink, &rows, &settings).await?
                }
            };
            println!("Saved {} records.", written);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Records:      {}", s.total);
            println!("Members:      {}", s.members);
            println!("Categories:   {}", s.categories);
            println!("With amounts: {}", s.with_amounts);
            println!(
                "Last run:     {}",
                s.last_collected.as_deref().unwrap_or("-")
            );
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn write<S: Sink>(
    sink: &S,
    rows: &[InterestRow],
    settings: &settings::Settings,
) -> anyhow::Result<usize> {
    sink::deliver(sink, rows, &settings.fallback_dir).await
}

fn print_summary(run: &CollectionRun) {
    println!();
    match &run.status {
        RunStatus::Complete => println!("Collection complete ({})", run.outcome()),
        RunStatus::Partial(reason) => println!("Collection partial: {}", reason),
        RunStatus::Aborted(reason) => println!("Collection aborted: {}", reason),
    }
    println!(
        "Fetched {} records in {} pages of {} ({} requests); {} unique",
        run.fetched,
        run.batches,
        run.page_size,
        run.requests,
        run.records.len()
    );
    if let Some(total) = run.total {
        println!("Advertised total: {}", total);
    }
    if !run.errors.is_empty() {
        println!("Errors ({}):", run.errors.len());
        for e in &run.errors {
            println!("  {}", e);
        }
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_error_flag_maps_to_policy() {
        let cli = Cli::try_parse_from(["parliament_interests", "collect", "--on-error", "skip"]).unwrap();
        match cli.command {
            Commands::Collect { on_error, .. } => {
                assert_eq!(ErrorPolicy::from(on_error), ErrorPolicy::Skip)
            }
            _ => panic!("expected collect"),
        }
    }

    #[test]
    fn on_error_defaults_to_abort() {
        let cli = Cli::try_parse_from(["parliament_interests", "collect"]).unwrap();
        match cli.command {
            Commands::Collect { on_error, .. } => {
                assert_eq!(ErrorPolicy::from(on_error), ErrorPolicy::Abort)
            }
            _ => panic!("expected collect"),
        }
    }
}
