use anyhow::{Context, Result};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod actions;
mod config;
mod dbus_interface;
mod engine;
mod source;

use actions::{CommandAction, EventLog, GreetingAction};
use config::Config;
use source::JsonLinesSource;

/// How long Ctrl-C waits for the engine to finish its frame and flush stats.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("greetcamd starting");

    let config = Config::load()?;
    tracing::info!(
        stats_dir = %config.stats_dir.display(),
        cooldown_secs = config.cooldown_secs,
        max_missed_frames = config.max_missed_frames,
        sequential = config.sequential_greetings,
        variants = config.greeting_variants.len(),
        "configuration loaded"
    );

    let source = match &config.input {
        Some(path) => JsonLinesSource::open(path)?,
        None => JsonLinesSource::stdin(),
    };
    let actions = build_actions(&config)?;
    let event_log = match &config.events_log {
        Some(path) => Some(
            EventLog::open(path)
                .with_context(|| format!("failed to open events log {}", path.display()))?,
        ),
        None => None,
    };

    let mut handle = engine::spawn_engine(&config, Box::new(source), actions, event_log)?;

    // Held for the lifetime of the daemon; dropping it unregisters the service.
    let _dbus = if config.dbus_enabled {
        match dbus_interface::serve(handle.status()).await {
            Ok(connection) => Some(connection),
            Err(e) => {
                tracing::warn!(error = %e, "D-Bus unavailable; running without status service");
                None
            }
        }
    } else {
        tracing::info!("D-Bus disabled via GREETCAM_DBUS_ENABLED=0");
        None
    };

    tracing::info!("greetcamd ready");

    tokio::select! {
        result = handle.wait() => {
            result?;
            tracing::info!("detection input closed");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("greetcamd shutting down");
            handle.stop();
            match tokio::time::timeout(SHUTDOWN_GRACE, handle.wait()).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!("engine still waiting for input; exiting without final flush")
                }
            }
        }
    }

    Ok(())
}

fn build_actions(config: &Config) -> Result<Vec<Box<dyn GreetingAction>>> {
    let runtime = tokio::runtime::Handle::current();
    let mut actions: Vec<Box<dyn GreetingAction>> = Vec::new();

    let audio = CommandAction::new("audio", config.audio_command.clone(), runtime.clone())?;
    actions.push(Box::new(audio.exclusive()));

    if let Some(argv) = &config.photo_command {
        actions.push(Box::new(CommandAction::new("photo", argv.clone(), runtime)?));
    }
    Ok(actions)
}
