use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use greetcam_core::stats::{self, DailyStats};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "greetcam", about = "greetcam webcam greeter CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show greeting statistics for a day
    Stats {
        /// Day to show, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Statistics directory (default: $GREETCAM_STATS_DIR or the XDG data dir)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Print the raw JSON record
        #[arg(long)]
        json: bool,
    },
    /// List days with recorded greetings
    Days {
        /// Statistics directory (default: $GREETCAM_STATS_DIR or the XDG data dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.greetcam.Greetcam1",
    default_service = "org.greetcam.Greetcam1",
    default_path = "/org/greetcam/Greetcam1"
)]
trait Greetcam {
    async fn status(&self) -> zbus::Result<String>;
    async fn today_stats(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stats { date, dir, json } => {
            let dir = stats_dir(dir);
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let record = stats::read_day(&dir, date)
                .with_context(|| format!("reading stats for {date}"))?
                .unwrap_or_else(|| DailyStats::empty(date));
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_day(&record);
            }
        }
        Commands::Days { dir } => {
            let dir = stats_dir(dir);
            let days = stats::list_days(&dir)?;
            if days.is_empty() {
                println!("No greetings recorded in {}", dir.display());
            }
            for date in days {
                match stats::read_day(&dir, date) {
                    Ok(Some(record)) => println!("{date}  {:>6}", record.total_greetings),
                    Ok(None) => {}
                    Err(e) => println!("{date}  unreadable ({e})"),
                }
            }
        }
        Commands::Status => {
            let connection = zbus::Connection::session()
                .await
                .context("connecting to the session bus")?;
            let proxy = GreetcamProxy::new(&connection).await?;
            let status = proxy
                .status()
                .await
                .context("greetcamd not reachable over D-Bus")?;
            let value: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

fn stats_dir(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| std::env::var("GREETCAM_STATS_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(greetcam_core::default_stats_dir)
}

fn print_day(record: &DailyStats) {
    println!("{}: {} greeting(s)", record.date, record.total_greetings);
    for (face_id, count) in &record.per_face_counts {
        println!("  face {face_id:>5}: {count}");
    }
}
