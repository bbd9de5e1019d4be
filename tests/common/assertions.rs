//! Custom test assertions for integration tests

use serde_json::Value;
use shift_archiver::{ArchiveStream, Record};
use std::path::Path;
use std::time::Duration;

/// Wait until `stream` reports done, driven by its state-change events
///
/// # Returns
/// `false` if `timeout` elapsed first
pub async fn wait_for_done<T: Record>(stream: &ArchiveStream<T>, timeout: Duration) -> bool {
    let (tx, mut rx) = tokio::sync::watch::channel(());
    let listener = stream.on_state_change().add_listener(move |_| {
        tx.send_replace(());
    });

    let finished = tokio::time::timeout(timeout, async {
        while !stream.is_done() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .is_ok();

    stream.on_state_change().remove_listener(listener);
    finished
}

/// Parse every line of an archive file
pub async fn read_archive(path: &Path) -> Vec<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
    text.lines()
        .map(|line| {
            serde_json::from_str(line).unwrap_or_else(|e| panic!("invalid line {line:?}: {e}"))
        })
        .collect()
}

/// Ids of archived records, in file order
pub fn ids(records: &[Value]) -> Vec<&str> {
    records
        .iter()
        .map(|record| record["id"].as_str().unwrap_or_default())
        .collect()
}
