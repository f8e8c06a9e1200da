//! Tauri command for named calls

use serde_json::Value;
use std::sync::Arc;
use tauri::State;

use super::Bridge;
use crate::error::ErrorDetails;

/// Route a named call from the frontend; register with
/// `.manage(Arc<Bridge>)` and `invoke_handler(tauri::generate_handler![storage_call])`.
#[tauri::command]
pub async fn storage_call(
    bridge: State<'_, Arc<Bridge>>,
    method: String,
    arguments: Value,
) -> Result<Value, ErrorDetails> {
    bridge
        .call(&method, arguments)
        .await
        .map_err(|e| e.details())
}
