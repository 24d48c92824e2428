//! JSON capture of inbound traffic.
//!
//! [`JsonExporter`] streams values into a file as one JSON array without
//! buffering the whole session in memory; [`JsonRpcExportPlugin`] feeds it
//! every inbound request. The array is closed exactly once, on finalize,
//! and late writes after that are ignored.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use ethmux_common::protocol::JsonRpcRequest;
use ethmux_common::Result;

use crate::orchestrator::Orchestrator;
use crate::plugin::{Plugin, PluginAction};

pub struct JsonExporter {
    path: PathBuf,
    state: Mutex<ExportState>,
}

struct ExportState {
    /// None once the array has been closed
    file: Option<File>,
    wrote_any: bool,
}

impl JsonExporter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)?;
        file.write_all(b"[")?;
        Ok(Self {
            path,
            state: Mutex::new(ExportState {
                file: Some(file),
                wrote_any: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one value to the array.
    pub fn write_entry(&self, value: &Value) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let wrote_any = state.wrote_any;
        let Some(file) = state.file.as_mut() else {
            warn!(path = %self.path.display(), "export already finalized; entry dropped");
            return Ok(());
        };
        if wrote_any {
            file.write_all(b",")?;
        }
        file.write_all(b"\n    ")?;
        serde_json::to_writer(&mut *file, value)?;
        state.wrote_any = true;
        Ok(())
    }

    /// Closes the array and the file. Safe to call more than once.
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut file) = state.file.take() {
            file.write_all(b"\n]\n")?;
            file.flush()?;
            info!(path = %self.path.display(), "JSON export finalized");
        }
        Ok(())
    }
}

impl Drop for JsonExporter {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

/// Records every inbound request into a [`JsonExporter`] file, leaving the
/// request itself untouched.
pub struct JsonRpcExportPlugin {
    exporter: JsonExporter,
}

impl JsonRpcExportPlugin {
    pub fn new(exporter: JsonExporter) -> Self {
        Self { exporter }
    }
}

#[async_trait]
impl Plugin for JsonRpcExportPlugin {
    fn name(&self) -> String {
        "JsonRpcExportPlugin".to_string()
    }

    async fn before_post(
        &self,
        _orchestrator: &Orchestrator,
        request: &JsonRpcRequest,
    ) -> PluginAction {
        match serde_json::to_value(request) {
            Ok(value) => {
                if let Err(e) = self.exporter.write_entry(&value) {
                    warn!(error = %e, "could not export request");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize request for export"),
        }
        PluginAction::Unchanged
    }

    async fn finalize(&self, _orchestrator: &Orchestrator) {
        if let Err(e) = self.exporter.finalize() {
            warn!(error = %e, "could not finalize the JSON export");
        }
    }
}
