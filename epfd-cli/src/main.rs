//! epfd CLI: one subcommand per pipeline stage.
//!
//! Commands:
//! - `fetch`: pull one source into the raw snapshots
//! - `build-features`: reconcile snapshots and write the feature table
//! - `migrate`, `load-features`, `dq`, `save-forecast`: relational store
//! - `train`, `forecast`, `backtest`: quantile models
//! - `run`: fetch → build → migrate → load → dq → train → forecast → save
//! - `serve`: forecast read API

mod serve;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use epfd_core::domain::{Resolution, Source};
use epfd_runner::{
    run_backtest, run_feature_stage, run_fetch, run_forecast, run_load_features, run_migrate,
    run_pipeline, run_quality_checks, run_save_forecast, run_training, FetchOptions,
    FetchSummary, PipelineConfig, RunOptions,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "epfd", about = "Day-ahead electricity price forecasting pipeline")]
struct Cli {
    /// Path to the TOML config. Defaults apply when the file is absent.
    #[arg(long, global = true, default_value = "epfd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResolutionArg {
    Hour,
    Quarterhour,
}

impl From<ResolutionArg> for Resolution {
    fn from(r: ResolutionArg) -> Self {
        match r {
            ResolutionArg::Hour => Resolution::Hour,
            ResolutionArg::Quarterhour => Resolution::QuarterHour,
        }
    }
}

#[derive(clap::Args, Clone)]
struct WindowArgs {
    /// Window start (YYYY-MM-DD or RFC 3339, UTC).
    #[arg(long)]
    start: Option<String>,

    /// Window end, exclusive (YYYY-MM-DD or RFC 3339, UTC).
    #[arg(long)]
    end: Option<String>,

    /// Native resolution for SMARD requests.
    #[arg(long, value_enum)]
    resolution: Option<ResolutionArg>,

    /// Only fetch the trailing N years.
    #[arg(long)]
    limit_years: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one source (opsd, smard, entsoe) into the raw snapshots.
    Fetch {
        source: Source,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// Reconcile snapshots and write the hourly feature table.
    BuildFeatures,
    /// Apply pending database migrations.
    Migrate,
    /// Upsert the feature table into the database.
    LoadFeatures,
    /// Run the data-quality checks against the database.
    Dq,
    /// Walk-forward validate and train one model per quantile.
    Train,
    /// Forecast the configured horizon and export the fan CSV.
    Forecast,
    /// Upsert the exported forecast into the database.
    SaveForecast,
    /// Score the trained models on the trailing holdout window.
    Backtest,
    /// Run every stage in order, stopping at the first failure.
    Run {
        /// Sources to fetch first. Repeatable.
        #[arg(long = "source", default_values = ["opsd", "smard", "entsoe"])]
        sources: Vec<Source>,

        /// Skip fetching and build from existing snapshots.
        #[arg(long, default_value_t = false)]
        skip_fetch: bool,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// Serve stored forecasts and on-demand predictions over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = PipelineConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Fetch { source, window } => {
            let summary = run_fetch(&config, source, &window.options()?)?;
            print_fetch(&summary);
        }
        Commands::BuildFeatures => {
            let summary = run_feature_stage(&config)?;
            println!(
                "Feature table: {} rows ({} on grid, {} warm-up, {} incomplete)",
                summary.meta.row_count,
                summary.report.grid_rows,
                summary.report.warmup_rows,
                summary.report.incomplete_rows
            );
            if let (Some(first), Some(last)) = (summary.meta.first_ts, summary.meta.last_ts) {
                println!("Range:         {first} to {last}");
            }
            for (quantity, origins) in &summary.origins {
                let parts: Vec<String> = origins.iter().map(|(s, n)| format!("{s}={n}")).collect();
                println!("  {:<6} {}", quantity.key(), parts.join(" "));
            }
        }
        Commands::Migrate => {
            let applied = run_migrate(&config)?;
            if applied.is_empty() {
                println!("Database is up to date.");
            }
            for name in applied {
                println!("Applied: {name}");
            }
        }
        Commands::LoadFeatures => {
            let n = run_load_features(&config)?;
            println!("Upserted {n} feature rows into {}", config.paths.database.display());
        }
        Commands::Dq => {
            let report = run_quality_checks(&config, Utc::now())?;
            println!(
                "Data quality OK: {} rows since {}, {} duplicate timestamps",
                report.recent_rows, report.window_start, report.duplicate_timestamps
            );
        }
        Commands::Train => {
            let outcome = run_training(&config)?;
            let r = &outcome.report;
            println!("Trained {} quantiles on {} rows ({} to {})", r.quantiles.len(), r.rows, r.first_ts, r.last_ts);
            println!("{:<6} {:>10} {:>10} {:>10}", "q", "MAE", "RMSE", "Pinball");
            for (id, v) in &r.quantiles {
                println!("{:<6} {:>10.3} {:>10.3} {:>10.3}", id, v.mae, v.rmse, v.pinball);
            }
            println!("Metrics: {}", outcome.metrics_path.display());
        }
        Commands::Forecast => {
            let outcome = run_forecast(&config)?;
            println!("Forecast: {} hours -> {}", outcome.rows.len(), outcome.csv_path.display());
            if outcome.hours_with_crossings > 0 {
                println!(
                    "WARNING: quantile crossings in {} of {} hours",
                    outcome.hours_with_crossings,
                    outcome.rows.len()
                );
            }
        }
        Commands::SaveForecast => {
            let n = run_save_forecast(&config)?;
            println!("Upserted {n} forecast hours into {}", config.paths.database.display());
        }
        Commands::Backtest => {
            let report = run_backtest(&config)?;
            println!("Backtest: trailing {} days, {} rows", report.test_days, report.rows);
            if let Some(iv) = &report.interval {
                println!(
                    "Coverage [{}, {}]: {:.1}% (expected {:.1}%), mean width {:.2}",
                    iv.lower.id(),
                    iv.upper.id(),
                    iv.coverage * 100.0,
                    iv.expected_coverage * 100.0,
                    iv.mean_width
                );
            }
            if let Some(mae) = report.mae_p50 {
                println!("MAE p50: {mae:.3}");
            }
            for point in &report.calibration {
                println!("  {} observed {:.3}", point.quantile.id(), point.observed);
            }
            println!("Report: {}", config.paths.backtest_path().display());
        }
        Commands::Run {
            sources,
            skip_fetch,
            window,
        } => {
            let opts = RunOptions {
                sources: if skip_fetch { Vec::new() } else { sources },
                fetch: window.options()?,
                now: Utc::now(),
            };
            let summary = run_pipeline(&config, &opts)?;
            for f in &summary.fetched {
                print_fetch(f);
            }
            println!();
            println!("=== Pipeline complete ===");
            println!("Feature rows:   {}", summary.features.meta.row_count);
            println!("Loaded rows:    {}", summary.features_loaded);
            println!("Recent rows:    {}", summary.quality.recent_rows);
            println!("Quantiles:      {}", summary.training.report.quantiles.len());
            println!("Forecast hours: {}", summary.forecast.rows.len());
            println!("Saved hours:    {}", summary.predictions_saved);
        }
        Commands::Serve { addr } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(serve::serve(config, addr))?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl WindowArgs {
    fn options(&self) -> Result<FetchOptions> {
        let start = self.start.as_deref().map(parse_instant).transpose()?;
        let end = self.end.as_deref().map(parse_instant).transpose()?;
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                bail!("--start must be before --end");
            }
        }
        Ok(FetchOptions {
            start,
            end,
            resolution: self.resolution.map(Resolution::from),
            limit_years: self.limit_years,
        })
    }
}

/// `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 instant.
fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}' (expected YYYY-MM-DD or RFC 3339)"))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

fn print_fetch(summary: &FetchSummary) {
    println!(
        "{}: {} hourly points fetched, {} new rows",
        summary.source,
        summary.points,
        summary.rows_added()
    );
    for w in &summary.writes {
        println!(
            "  {:<6}{} {} -> {} rows",
            w.quantity.key(),
            if w.raw { " (raw)" } else { "" },
            w.before,
            w.after
        );
    }
}
