//! RuVector Leakwatch - memory leak detection for long-running processes

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ruvector_leakwatch::leaks::history;
use ruvector_leakwatch::{
    EngineConfig, LeakEngine, LeakMonitor, LogNotifier, Severity, Suspect, SysinfoSampler,
};

#[derive(Parser)]
#[command(name = "ruvector-leakwatch")]
#[command(about = "Detect memory leaks in long-running processes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor processes until Ctrl+C
    Watch {
        /// Config file (defaults to the user config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the sampling interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Free memory to project against (defaults to available RAM)
        #[arg(long)]
        headroom_mb: Option<f64>,

        /// Print the suspect table every N samples (0 disables)
        #[arg(short, long, default_value = "10")]
        summary_every: u64,
    },

    /// Show resolved leak episodes
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            config,
            interval,
            headroom_mb,
            summary_every,
        } => {
            let config_path = config.unwrap_or_else(EngineConfig::default_path);
            let mut config = EngineConfig::load_or_default(&config_path);
            if let Some(secs) = interval {
                config.sample_interval_secs = secs;
            }

            let history_path = history::default_path();
            let episodes = history::load_json(&history_path).unwrap_or_else(|e| {
                warn!("Ignoring unreadable leak history {}: {}", history_path.display(), e);
                Vec::new()
            });

            let engine = Arc::new(LeakEngine::with_history(config, episodes)?);
            engine.on_alert(LogNotifier);

            info!(
                "Watching for memory leaks every {}s (Ctrl+C to stop)",
                engine.config().sample_interval_secs
            );

            let monitor = LeakMonitor::new(Arc::clone(&engine), SysinfoSampler::default());
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Cannot listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            // Fixed headroom from the command line, else what the last tick read
            let headroom = || headroom_mb.or_else(|| monitor.last_available_memory_mb()).unwrap_or(0.0);

            let ticks = monitor
                .run_with(shutdown, |tick, engine| {
                    if summary_every > 0 && tick % summary_every == 0 {
                        print_summary(engine, headroom());
                    }
                })
                .await;

            print_summary(&engine, headroom());

            history::save_json(&history_path, &engine.history_snapshot())?;
            info!(
                "Stopped after {} samples; history saved to {}",
                ticks,
                history_path.display()
            );
        }

        Commands::History { limit } => {
            let episodes = history::load_json(&history::default_path())?;
            if episodes.is_empty() {
                println!("No leak episodes recorded.");
                return Ok(());
            }

            println!("\nLeak History (most recent first)\n");
            println!("┌──────────────────────┬──────────────────┬──────────┬───────────┬──────────────────┐");
            println!("│ Process              │ Detected         │ Duration │ Leaked    │ Resolution       │");
            println!("├──────────────────────┼──────────────────┼──────────┼───────────┼──────────────────┤");
            for episode in episodes.iter().rev().take(limit) {
                println!(
                    "│ {:20} │ {:16} │ {:>6} m │ {:>6.0} MB │ {:16} │",
                    truncate(&episode.process_name, 20),
                    episode.detected_at.format("%Y-%m-%d %H:%M").to_string(),
                    episode.duration().num_minutes(),
                    episode.total_leaked_mb,
                    episode.resolution.to_string()
                );
            }
            println!("└──────────────────────┴──────────────────┴──────────┴───────────┴──────────────────┘");
        }

        Commands::Config { init } => {
            let path = EngineConfig::default_path();
            if init {
                EngineConfig::default().save(&path)?;
                println!("Wrote default configuration to {}", path.display());
            }
            let config = EngineConfig::load_or_default(&path);
            println!("Current Configuration ({}):", path.display());
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn print_summary(engine: &LeakEngine, headroom_mb: f64) {
    let stats = engine.stats();
    let suspects = engine.list_suspects();
    let (confirmed, growing): (Vec<Suspect>, Vec<Suspect>) =
        suspects.into_iter().partition(|s| s.severity > Severity::Low);

    println!("\n🔍 Memory Leak Detection\n");
    println!(
        "Tracking {} processes ({} samples, {} rejected)\n",
        stats.tracked_processes, stats.samples_accepted, stats.samples_rejected
    );

    if !confirmed.is_empty() {
        println!("⚠️  DETECTED MEMORY LEAKS:\n");
        println!("┌──────────────────────┬───────────┬───────────┬──────────┬────────────┬──────────┐");
        println!("│ Process              │ Current   │ Growth/hr │ Growth % │ Confidence │ Severity │");
        println!("├──────────────────────┼───────────┼───────────┼──────────┼────────────┼──────────┤");

        for leak in &confirmed {
            let severity_icon = match leak.severity {
                Severity::Critical => "🔴 Crit",
                Severity::High => "🟠 High",
                Severity::Medium => "🟡 Med",
                Severity::Low => "🟢 Low",
            };

            println!(
                "│ {:20} │ {:>7.0} MB │ {:>+7.0} MB │ {:>+7.0}% │ {:>9.0}% │ {:8} │",
                truncate(&leak.process_name, 20),
                leak.current_mb,
                leak.growth_rate_mb_per_hour,
                leak.growth_percent(),
                leak.confidence * 100.0,
                severity_icon
            );
        }

        println!("└──────────────────────┴───────────┴───────────┴──────────┴────────────┴──────────┘");

        println!("\n💡 Recommendations:");
        for leak in confirmed.iter().take(3) {
            println!("   • {}", leak.recommendation());
        }

        println!(
            "\n⏱  Time to memory pressure ({:.0} MB free): {}",
            headroom_mb,
            engine.estimate_time_to_pressure(headroom_mb)
        );
    } else if !growing.is_empty() {
        println!("No confirmed leaks detected, but monitoring these growing processes:\n");
        println!("┌──────────────────────┬───────────┬───────────┬──────────────┐");
        println!("│ Process              │ Current   │ Growth/hr │ Cycle        │");
        println!("├──────────────────────┼───────────┼───────────┼──────────────┤");

        for proc in growing.iter().take(5) {
            let cycle = proc
                .periodicity_hours
                .map(|h| format!("{:.1} h", h))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "│ {:20} │ {:>7.0} MB │ {:>+7.1} MB │ {:>12} │",
                truncate(&proc.process_name, 20),
                proc.current_mb,
                proc.growth_rate_mb_per_hour,
                cycle
            );
        }

        println!("└──────────────────────┴───────────┴───────────┴──────────────┘");
    } else {
        println!("✅ No memory leaks detected");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        format!("{:width$}", s, width = max)
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    }
}
