use crate::engine::EngineControl;
use zbus::interface;

pub const BUS_NAME: &str = "org.freedesktop.Warden1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Warden1";

/// D-Bus control interface for the Warden access daemon.
///
/// Bus name: org.freedesktop.Warden1
/// Object path: /org/freedesktop/Warden1
pub struct WardenService {
    engine: EngineControl,
}

impl WardenService {
    pub fn new(engine: EngineControl) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.freedesktop.Warden1")]
impl WardenService {
    /// Return pipeline state, counters and the most recent decision as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        status_json(&self.engine).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Request the pipeline to stop after the current frame.
    async fn stop(&self) -> bool {
        let first = self.engine.stop();
        tracing::info!(first, "stop requested over D-Bus");
        first
    }
}

fn status_json(engine: &EngineControl) -> serde_json::Result<String> {
    let status = engine.status();
    let mut value = serde_json::to_value(&status)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("version".into(), env!("CARGO_PKG_VERSION").into());
    }
    serde_json::to_string(&value)
}
