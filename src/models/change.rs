//! Change classification results and the change-event audit record.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::DocMetadata;

/// Classification of a metadata delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// First observation of the document.
    NewDocument,
    /// Modification time moved forward.
    TimeUpdated,
    /// Modifying user differs without a forward time move.
    UserChanged,
    /// Nothing changed.
    None,
}

impl ChangeType {
    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NewDocument => "new_document",
            Self::TimeUpdated => "time_updated",
            Self::UserChanged => "user_changed",
            Self::None => "none",
        }
    }

    /// Parses a change type name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "new_document" => Some(Self::NewDocument),
            "time_updated" => Some(Self::TimeUpdated),
            "user_changed" => Some(Self::UserChanged),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one comparison by the change detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDetectionResult {
    /// Whether a change was detected.
    pub has_changed: bool,
    /// Change classification.
    pub change_type: ChangeType,
    /// Set when the change falls inside the debounce window.
    pub debounced: bool,
    /// Previously known modifying user.
    pub previous_user: Option<String>,
    /// Previously known modification time.
    pub previous_time: Option<i64>,
    /// Current modifying user.
    pub current_user: String,
    /// Current modification time.
    pub current_time: i64,
    /// Human-readable explanation.
    pub reason: String,
    /// When the comparison ran (ms since epoch).
    pub changed_at: i64,
}

impl ChangeDetectionResult {
    /// Returns true when side effects should run.
    #[must_use]
    pub const fn is_actionable(&self) -> bool {
        self.has_changed && !self.debounced
    }
}

/// Immutable record of one confirmed, non-debounced change.
///
/// Every field except `id`, `doc_token`, and `change_type` may be absent when
/// events are assembled by hand, so evaluators must tolerate partial records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Unique event ID.
    pub id: String,
    /// Document token.
    pub doc_token: String,
    /// Modifying user before the change.
    #[serde(default)]
    pub previous_modified_user: Option<String>,
    /// Modification time before the change.
    #[serde(default)]
    pub previous_modified_time: Option<i64>,
    /// Modifying user after the change.
    #[serde(default)]
    pub new_modified_user: Option<String>,
    /// Modification time after the change.
    #[serde(default)]
    pub new_modified_time: Option<i64>,
    /// Change classification.
    pub change_type: ChangeType,
    /// When the change was detected (ms since epoch).
    #[serde(default)]
    pub change_detected_at: i64,
    /// Whether the change was debounced.
    #[serde(default)]
    pub debounced: bool,
    /// Whether the default notification was delivered.
    #[serde(default)]
    pub notification_sent: bool,
    /// Free-form context (title, revisions, diff summary).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ChangeEvent {
    /// Creates an event with only the required fields set.
    #[must_use]
    pub fn new(doc_token: impl Into<String>, change_type: ChangeType, detected_at: i64) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            doc_token: doc_token.into(),
            previous_modified_user: None,
            previous_modified_time: None,
            new_modified_user: None,
            new_modified_time: None,
            change_type,
            change_detected_at: detected_at,
            debounced: false,
            notification_sent: false,
            metadata: serde_json::Value::Null,
        }
    }

    /// Builds an event from a detection result and the metadata it was computed from.
    #[must_use]
    pub fn from_detection(metadata: &DocMetadata, result: &ChangeDetectionResult) -> Self {
        Self {
            previous_modified_user: result.previous_user.clone(),
            previous_modified_time: result.previous_time,
            new_modified_user: Some(result.current_user.clone()),
            new_modified_time: Some(result.current_time),
            debounced: result.debounced,
            metadata: serde_json::json!({
                "title": metadata.title,
                "doc_type": metadata.doc_type.as_str(),
                "reason": result.reason,
            }),
            ..Self::new(&metadata.doc_token, result.change_type, result.changed_at)
        }
    }

    /// Sets the modifying user after the change.
    #[must_use]
    pub fn with_new_user(mut self, user: impl Into<String>) -> Self {
        self.new_modified_user = Some(user.into());
        self
    }

    /// Sets the modification time after the change.
    #[must_use]
    pub const fn with_new_time(mut self, time: i64) -> Self {
        self.new_modified_time = Some(time);
        self
    }

    /// Sets a metadata key, promoting `metadata` to an object if needed.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        self
    }

    /// Returns the document title recorded in `metadata`, if any.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocType;

    #[test]
    fn test_change_type_serde_names() {
        let json = serde_json::to_string(&ChangeType::UserChanged).unwrap();
        assert_eq!(json, "\"user_changed\"");
        assert_eq!(ChangeType::parse("TIME_UPDATED"), Some(ChangeType::TimeUpdated));
        assert_eq!(ChangeType::parse("renamed"), None);
    }

    #[test]
    fn test_event_from_detection() {
        let metadata = DocMetadata {
            doc_token: "doc1".to_string(),
            title: "Roadmap".to_string(),
            owner_id: "owner".to_string(),
            created_time: 0,
            last_modified_user: "u2".to_string(),
            last_modified_time: 2000,
            doc_type: DocType::Docx,
        };
        let result = ChangeDetectionResult {
            has_changed: true,
            change_type: ChangeType::UserChanged,
            debounced: false,
            previous_user: Some("u1".to_string()),
            previous_time: Some(1000),
            current_user: "u2".to_string(),
            current_time: 2000,
            reason: "user changed".to_string(),
            changed_at: 9000,
        };

        let event = ChangeEvent::from_detection(&metadata, &result);
        assert_eq!(event.doc_token, "doc1");
        assert_eq!(event.new_modified_user.as_deref(), Some("u2"));
        assert_eq!(event.previous_modified_time, Some(1000));
        assert_eq!(event.change_detected_at, 9000);
        assert_eq!(event.title(), Some("Roadmap"));
    }

    #[test]
    fn test_partial_event_deserializes() {
        let event: ChangeEvent =
            serde_json::from_str(r#"{"id":"e1","doc_token":"d","change_type":"time_updated"}"#)
                .unwrap();
        assert!(event.new_modified_user.is_none());
        assert!(event.metadata.is_null());
    }

    #[test]
    fn test_with_metadata_promotes_null() {
        let event = ChangeEvent::new("d", ChangeType::TimeUpdated, 1)
            .with_metadata("revision", serde_json::json!(3));
        assert_eq!(event.metadata["revision"], 3);
    }
}
