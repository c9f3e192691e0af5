use crate::engine::StatusSnapshot;
use tokio::sync::watch;
use zbus::interface;

pub const BUS_NAME: &str = "org.greetcam.Greetcam1";
pub const OBJECT_PATH: &str = "/org/greetcam/Greetcam1";

/// Read-only D-Bus view of the greeter daemon.
///
/// Bus name: org.greetcam.Greetcam1
/// Object path: /org/greetcam/Greetcam1
pub struct GreetcamService {
    status: watch::Receiver<StatusSnapshot>,
}

impl GreetcamService {
    pub fn new(status: watch::Receiver<StatusSnapshot>) -> Self {
        Self { status }
    }

    fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }
}

#[interface(name = "org.greetcam.Greetcam1")]
impl GreetcamService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let s = self.snapshot();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "frames_processed": s.frames_processed,
            "live_faces": s.live_faces,
            "next_face_id": s.next_face_id,
            "greetings_decided": s.greetings_decided,
            "action_failures": s.action_failures,
            "stats_write_failures": s.stats_write_failures,
            "date": s.today.date,
            "today_total": s.today.total_greetings,
        })
        .to_string())
    }

    /// Return today's statistics record.
    async fn today_stats(&self) -> zbus::fdo::Result<String> {
        tracing::debug!("today_stats requested");
        serde_json::to_string(&self.snapshot().today)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

/// Register the service on the session bus. The returned connection must be
/// kept alive for the service to stay reachable.
pub async fn serve(status: watch::Receiver<StatusSnapshot>) -> zbus::Result<zbus::Connection> {
    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, GreetcamService::new(status))?
        .build()
        .await?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus service registered");
    Ok(connection)
}
