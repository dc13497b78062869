//! Tracing-only sinks used when no endpoint is configured.

use async_trait::async_trait;

use super::{NotifySink, TaskRequest, TaskSink};
use crate::Result;

/// Writes notifications to the log instead of a chat service.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifySink;

#[async_trait]
impl NotifySink for LogNotifySink {
    async fn notify(&self, target: &str, message: &str) -> Result<String> {
        let id = uuid::Uuid::now_v7().to_string();
        tracing::info!(target_chat = target, message_id = %id, "{message}");
        Ok(id)
    }
}

/// Writes task requests to the log instead of a tracker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTaskSink;

#[async_trait]
impl TaskSink for LogTaskSink {
    async fn create_task(&self, request: &TaskRequest) -> Result<String> {
        let id = uuid::Uuid::now_v7().to_string();
        tracing::info!(
            task_id = %id,
            doc_token = %request.doc_token,
            change_type = %request.change_type,
            project = request.target.as_deref().unwrap_or("-"),
            "Task: {}",
            request.title
        );
        Ok(id)
    }
}
