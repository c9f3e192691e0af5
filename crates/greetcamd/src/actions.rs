//! Greeting side effects: audio playback, photo capture and the event log.
//!
//! Actions only *start* their work; completion is reaped on the tokio runtime
//! so the frame loop never waits on a player or camera tool.

use greetcam_core::GreetingEvent;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("{action}: previous run still in progress")]
    Busy { action: String },
    #[error("{action}: failed to start {program}: {source}")]
    Spawn {
        action: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{action}: command is empty")]
    EmptyCommand { action: String },
}

/// An external effect triggered once per greet decision.
pub trait GreetingAction: Send {
    fn name(&self) -> &str;

    /// Start the effect for `event`. Returns once it is running, not when it ends.
    fn start(&self, event: &GreetingEvent) -> Result<(), ActionError>;
}

/// Runs a configured command line per greeting.
///
/// Arguments may contain `{clip}`, `{face_id}`, `{variant}`, `{count}`,
/// `{timestamp}`, `{x}`, `{y}`, `{w}` and `{h}`.
pub struct CommandAction {
    name: String,
    argv: Vec<String>,
    /// Refuse to start while the previous run is still going.
    exclusive: bool,
    running: Arc<AtomicBool>,
    runtime: Handle,
}

impl CommandAction {
    pub fn new(name: &str, argv: Vec<String>, runtime: Handle) -> Result<Self, ActionError> {
        if argv.is_empty() {
            return Err(ActionError::EmptyCommand {
                action: name.to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            argv,
            exclusive: false,
            running: Arc::new(AtomicBool::new(false)),
            runtime,
        })
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

impl GreetingAction for CommandAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, event: &GreetingEvent) -> Result<(), ActionError> {
        if self.exclusive && self.running.swap(true, Ordering::SeqCst) {
            return Err(ActionError::Busy {
                action: self.name.clone(),
            });
        }

        let args: Vec<String> = self.argv.iter().map(|a| render(a, event)).collect();
        let program = args[0].clone();

        let _guard = self.runtime.enter();
        let spawned = tokio::process::Command::new(&program)
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                if self.exclusive {
                    self.running.store(false, Ordering::SeqCst);
                }
                return Err(ActionError::Spawn {
                    action: self.name.clone(),
                    program,
                    source,
                });
            }
        };

        tracing::debug!(
            action = %self.name,
            program = %program,
            face_id = event.face_id,
            "action started"
        );

        let name = self.name.clone();
        let running = self.exclusive.then(|| Arc::clone(&self.running));
        self.runtime.spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    tracing::debug!(action = %name, "action finished");
                }
                Ok(status) => {
                    tracing::warn!(action = %name, %status, "action exited unsuccessfully");
                }
                Err(e) => {
                    tracing::warn!(action = %name, error = %e, "failed to wait for action");
                }
            }
            if let Some(running) = running {
                running.store(false, Ordering::SeqCst);
            }
        });
        Ok(())
    }
}

fn render(arg: &str, event: &GreetingEvent) -> String {
    if !arg.contains('{') {
        return arg.to_string();
    }
    arg.replace("{clip}", &event.clip)
        .replace("{face_id}", &event.face_id.to_string())
        .replace("{variant}", &event.variant.to_string())
        .replace("{count}", &event.greeting_count.to_string())
        .replace(
            "{timestamp}",
            &event.timestamp.format("%Y%m%d_%H%M%S").to_string(),
        )
        .replace("{x}", &event.bbox.x.round().to_string())
        .replace("{y}", &event.bbox.y.round().to_string())
        .replace("{w}", &event.bbox.width.round().to_string())
        .replace("{h}", &event.bbox.height.round().to_string())
}

/// Appends greeting events as JSON lines.
pub struct EventLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EventLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_event(&mut self, event: &GreetingEvent) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}
