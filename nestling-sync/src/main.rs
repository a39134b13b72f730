//! nestling-sync - command-line harness for the sync core
//!
//! Developer tool for exercising the client core against a deployed
//! backend: apply stage updates, inspect the displayed week, trigger a
//! force-sync, or watch sync events as they arrive. Pages in the real
//! application use the same `SyncContext` surface this binary does.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use nestling_common::config::SyncConfig;
use nestling_common::events::EventKind;
use nestling_common::stage::StageType;
use nestling_sync::SyncContext;

#[derive(Parser)]
#[command(name = "nestling-sync", about = "Pregnancy tracker sync core harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the currently displayed week and due date
    Show,
    /// Apply a stage update (server-first, local fallback)
    Update {
        /// Stage representation: week, month, or trimester
        #[arg(long)]
        stage_type: String,
        /// Numeric stage value
        #[arg(long)]
        value: String,
    },
    /// Broadcast a refresh signal to every open view and tab
    ForceSync,
    /// Follow sync events until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::load();
    info!(base_url = %config.base_url, data_dir = %config.data_dir.display(), "Starting sync core");

    let ctx = SyncContext::new(config)?;
    ctx.start();

    match cli.command {
        Command::Show => {
            let view = ctx.mount_view();
            // Give the initial server refresh a moment; cache answers
            // immediately if the backend is down.
            tokio::time::sleep(std::time::Duration::from_millis(750)).await;
            match view.displayed() {
                Some(cached) => println!(
                    "week {} (due {}, {:?})",
                    cached.record.current_week, cached.record.due_date, cached.provenance
                ),
                None => println!("week {} (no data yet)", view.displayed_week()),
            }
            view.unmount();
        }
        Command::Update { stage_type, value } => {
            let stage_type: StageType = stage_type.parse()?;
            let record = ctx.update_stage(stage_type, &value).await?;
            println!("week {} (due {})", record.current_week, record.due_date);
        }
        Command::ForceSync => {
            ctx.force_sync_all();
            println!("refresh signal broadcast");
        }
        Command::Watch => {
            for kind in [
                EventKind::PregnancyUpdated,
                EventKind::DevelopmentUpdated,
                EventKind::ForceSync,
            ] {
                ctx.subscribe(kind, |event| {
                    println!("{}", serde_json::to_string(event).unwrap_or_default());
                });
            }
            println!("watching sync events (ctrl-c to stop)");
            tokio::signal::ctrl_c().await?;
        }
    }

    ctx.shutdown();
    Ok(())
}
