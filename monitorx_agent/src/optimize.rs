//! The "optimize" action: purge temporary files under one directory, best-effort.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::hub::{BroadcastHub, OPTIMIZATION_COMPLETE};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReport {
    pub success: bool,
    pub files_removed: u64,
    pub files_skipped: u64,
    pub bytes_freed: u64,
}

fn purge_dir(dir: &Path, report: &mut OptimizeReport) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!("skipping {}: {e}", dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(ft) = entry.file_type() else {
            report.files_skipped += 1;
            continue;
        };
        if ft.is_dir() {
            purge_dir(&path, report);
        } else if ft.is_file() {
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(&path) {
                Ok(()) => {
                    report.files_removed += 1;
                    report.bytes_freed += len;
                }
                Err(e) => {
                    debug!("could not remove {}: {e}", path.display());
                    report.files_skipped += 1;
                }
            }
        }
        // symlinks and special files are left alone
    }
}

/// Remove every regular file below `root`, keeping the directory tree.
pub fn purge(root: &Path) -> OptimizeReport {
    let mut report = OptimizeReport::default();
    if let Err(e) = fs::read_dir(root) {
        warn!("cannot read {}: {e}", root.display());
        return report;
    }
    report.success = true;
    purge_dir(root, &mut report);
    report
}

/// Run the purge off the runtime, then tell every subscriber how it went.
pub async fn run(dir: PathBuf, hub: &BroadcastHub) -> OptimizeReport {
    let shown = dir.display().to_string();
    let report = tokio::task::spawn_blocking(move || purge(&dir))
        .await
        .unwrap_or_else(|e| {
            warn!("optimize task failed: {e}");
            OptimizeReport::default()
        });
    info!(
        dir = %shown,
        removed = report.files_removed,
        skipped = report.files_skipped,
        bytes = report.bytes_freed,
        "optimize finished"
    );
    let payload = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);
    hub.notify(OPTIMIZATION_COMPLETE, payload);
    report
}
