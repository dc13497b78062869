//! Change rules: typed conditions and actions validated at construction.
//!
//! Conditions and actions are closed variants. Loosely-typed input from
//! configuration or the command layer arrives as [`RawCondition`] /
//! [`RawAction`] and is converted with `TryFrom`, which rejects unknown kinds
//! and missing targets with [`Error::InvalidRule`].

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ChangeEvent, ChangeType};
use crate::{Error, Result};

/// Half-open hour window `[start_hour, end_hour)` in local time.
///
/// When `start_hour > end_hour` the window wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "HourWindowRepr")]
pub struct HourWindow {
    start_hour: u8,
    end_hour: u8,
}

impl HourWindow {
    /// Creates a window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] if `start_hour > 23`, `end_hour > 24`,
    /// or the window is empty (`start_hour == end_hour`).
    pub fn new(start_hour: u8, end_hour: u8) -> Result<Self> {
        if start_hour > 23 || end_hour > 24 {
            return Err(Error::InvalidRule(format!(
                "time_range hours out of range: {start_hour}-{end_hour}"
            )));
        }
        if start_hour == end_hour {
            return Err(Error::InvalidRule(format!(
                "time_range window is empty: {start_hour}-{end_hour}"
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    /// Parses `"HH-HH"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] if the text is not two hours joined by `-`.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidRule(format!("time_range must look like \"9-17\": {s}"));
        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse::<u8>().map_err(|_| invalid())?;
        let end = end.trim().parse::<u8>().map_err(|_| invalid())?;
        Self::new(start, end)
    }

    /// First hour inside the window.
    #[must_use]
    pub const fn start_hour(&self) -> u8 {
        self.start_hour
    }

    /// First hour after the window.
    #[must_use]
    pub const fn end_hour(&self) -> u8 {
        self.end_hour
    }

    /// Returns true if `hour` (0-23) falls inside the window.
    #[must_use]
    pub fn contains(&self, hour: u32) -> bool {
        let start = u32::from(self.start_hour);
        let end = u32::from(self.end_hour);
        if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

impl fmt::Display for HourWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.start_hour, self.end_hour)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HourWindowRepr {
    Text(String),
    Bounds { start_hour: u8, end_hour: u8 },
}

impl TryFrom<HourWindowRepr> for HourWindow {
    type Error = Error;

    fn try_from(repr: HourWindowRepr) -> Result<Self> {
        match repr {
            HourWindowRepr::Text(text) => Self::parse(&text),
            HourWindowRepr::Bounds {
                start_hour,
                end_hour,
            } => Self::new(start_hour, end_hour),
        }
    }
}

/// Predicate evaluated against a change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Always matches.
    Any,
    /// Matches when the new modifying user equals the value.
    ModifiedByUser(String),
    /// Matches when the event's local hour is inside the window.
    TimeRange(HourWindow),
    /// Matches when the event's change type equals the value.
    ChangeType(ChangeType),
}

impl RuleCondition {
    /// Returns the condition kind name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::ModifiedByUser(_) => "modified_by_user",
            Self::TimeRange(_) => "time_range",
            Self::ChangeType(_) => "change_type",
        }
    }

    /// Checks invariants not enforced by the type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] for an empty user or a `none` change type.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ModifiedByUser(user) if user.trim().is_empty() => Err(Error::InvalidRule(
                "modified_by_user condition requires a user".to_string(),
            )),
            Self::ChangeType(ChangeType::None) => Err(Error::InvalidRule(
                "change_type condition cannot match \"none\"".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Evaluates the condition.
    ///
    /// `local_hour` is the event's hour in the engine's configured offset;
    /// `None` (no timestamp) never satisfies a time window.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent, local_hour: Option<u32>) -> bool {
        match self {
            Self::Any => true,
            Self::ModifiedByUser(user) => event.new_modified_user.as_deref() == Some(user.as_str()),
            Self::TimeRange(window) => local_hour.is_some_and(|hour| window.contains(hour)),
            Self::ChangeType(change_type) => event.change_type == *change_type,
        }
    }
}

/// Side effect executed when a rule's condition matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Send a message to a chat target.
    Notify {
        /// Chat or channel.
        target: String,
    },
    /// POST the change payload to a URL.
    Webhook {
        /// `http(s)` URL.
        target: String,
    },
    /// Create an external task.
    CreateTask {
        /// Project or assignee hint.
        #[serde(default)]
        target: Option<String>,
        /// Title template with `{placeholder}` substitution.
        #[serde(default)]
        template: Option<String>,
    },
    /// Buffer the change for a batched summary.
    Aggregate {
        /// Summary recipient; defaults to the document token.
        #[serde(default)]
        target: Option<String>,
    },
}

impl RuleAction {
    /// Returns the action kind name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Notify { .. } => "notify",
            Self::Webhook { .. } => "webhook",
            Self::CreateTask { .. } => "create_task",
            Self::Aggregate { .. } => "aggregate",
        }
    }

    /// Checks required targets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] when a `notify`/`webhook` target is empty
    /// or a webhook target is not an `http(s)` URL.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Notify { target } if target.trim().is_empty() => Err(Error::InvalidRule(
                "notify action requires a target".to_string(),
            )),
            Self::Webhook { target } if target.trim().is_empty() => Err(Error::InvalidRule(
                "webhook action requires a target".to_string(),
            )),
            Self::Webhook { target }
                if !(target.starts_with("http://") || target.starts_with("https://")) =>
            {
                Err(Error::InvalidRule(format!(
                    "webhook target must be an http(s) URL: {target}"
                )))
            },
            _ => Ok(()),
        }
    }
}

/// Untyped condition input: `{type, value?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCondition {
    /// Condition kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific value.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl RawCondition {
    /// Creates raw condition input.
    #[must_use]
    pub fn new(kind: impl Into<String>, value: Option<serde_json::Value>) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }

    fn string_value(&self) -> Result<String> {
        self.value
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::InvalidRule(format!("{} condition requires a string value", self.kind))
            })
    }
}

impl TryFrom<RawCondition> for RuleCondition {
    type Error = Error;

    fn try_from(raw: RawCondition) -> Result<Self> {
        let condition = match raw.kind.as_str() {
            "any" => Self::Any,
            "modified_by_user" => Self::ModifiedByUser(raw.string_value()?),
            "time_range" => match &raw.value {
                Some(serde_json::Value::String(text)) => Self::TimeRange(HourWindow::parse(text)?),
                Some(value @ serde_json::Value::Object(_)) => {
                    let window = serde_json::from_value::<HourWindow>(value.clone())
                        .map_err(|e| Error::InvalidRule(format!("time_range: {e}")))?;
                    Self::TimeRange(window)
                },
                _ => {
                    return Err(Error::InvalidRule(
                        "time_range condition requires \"HH-HH\" or {start_hour, end_hour}"
                            .to_string(),
                    ));
                },
            },
            "change_type" => {
                let name = raw.string_value()?;
                let change_type = ChangeType::parse(&name).ok_or_else(|| {
                    Error::InvalidRule(format!("unknown change type: {name}"))
                })?;
                Self::ChangeType(change_type)
            },
            other => {
                return Err(Error::InvalidRule(format!(
                    "unknown condition type: {other}"
                )));
            },
        };
        condition.validate()?;
        Ok(condition)
    }
}

/// Untyped action input: `{type, target?, template?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAction {
    /// Action kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Destination.
    #[serde(default)]
    pub target: Option<String>,
    /// Message or task template.
    #[serde(default)]
    pub template: Option<String>,
}

impl RawAction {
    /// Creates raw action input.
    #[must_use]
    pub fn new(kind: impl Into<String>, target: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            target,
            template: None,
        }
    }

    /// Sets the template.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

impl TryFrom<RawAction> for RuleAction {
    type Error = Error;

    fn try_from(raw: RawAction) -> Result<Self> {
        let target = raw.target.filter(|t| !t.trim().is_empty());
        let action = match raw.kind.as_str() {
            "notify" => Self::Notify {
                target: target.ok_or_else(|| {
                    Error::InvalidRule("notify action requires a target".to_string())
                })?,
            },
            "webhook" => Self::Webhook {
                target: target.ok_or_else(|| {
                    Error::InvalidRule("webhook action requires a target".to_string())
                })?,
            },
            "create_task" => Self::CreateTask {
                target,
                template: raw.template,
            },
            "aggregate" => Self::Aggregate { target },
            other => {
                return Err(Error::InvalidRule(format!("unknown action type: {other}")));
            },
        };
        action.validate()?;
        Ok(action)
    }
}

/// A stored automation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRule {
    /// Unique rule ID.
    pub id: String,
    /// Document the rule applies to.
    pub doc_token: String,
    /// Display name.
    pub name: String,
    /// Match predicate.
    pub condition: RuleCondition,
    /// Side effect.
    pub action: RuleAction,
    /// Disabled rules are skipped during evaluation.
    pub enabled: bool,
    /// Creation time (ms since epoch).
    pub created_at: i64,
    /// Last update time (ms since epoch).
    pub updated_at: i64,
}

/// Partial update for a rule. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    /// New name.
    pub name: Option<String>,
    /// New condition.
    pub condition: Option<RuleCondition>,
    /// New action.
    pub action: Option<RuleAction>,
    /// New enabled flag.
    pub enabled: Option<bool>,
}

impl RuleUpdate {
    /// Returns true when nothing would change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.condition.is_none()
            && self.action.is_none()
            && self.enabled.is_none()
    }
}

/// Outcome of evaluating one rule against one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleExecutionResult {
    /// Rule ID.
    pub rule_id: String,
    /// Whether the condition matched.
    pub condition_matched: bool,
    /// Whether the action completed successfully.
    pub action_executed: bool,
    /// Wall time spent on this rule.
    pub execution_time_ms: u64,
    /// Action failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(9, 17, 9 => true; "start is inclusive")]
    #[test_case(9, 17, 16 => true; "inside")]
    #[test_case(9, 17, 17 => false; "end is exclusive")]
    #[test_case(9, 17, 3 => false; "before")]
    #[test_case(22, 6, 23 => true; "wrapped late")]
    #[test_case(22, 6, 2 => true; "wrapped early")]
    #[test_case(22, 6, 6 => false; "wrapped end exclusive")]
    #[test_case(22, 6, 12 => false; "wrapped outside")]
    #[test_case(0, 24, 23 => true; "whole day")]
    fn test_hour_window_contains(start: u8, end: u8, hour: u32) -> bool {
        HourWindow::new(start, end).unwrap().contains(hour)
    }

    #[test]
    fn test_hour_window_rejects_empty_and_out_of_range() {
        assert!(HourWindow::new(5, 5).is_err());
        assert!(HourWindow::new(24, 3).is_err());
        assert!(HourWindow::new(3, 25).is_err());
        assert!(HourWindow::parse("nine-five").is_err());
        assert_eq!(HourWindow::parse("09-17").unwrap().to_string(), "09-17");
    }

    #[test]
    fn test_raw_condition_conversion() {
        let cond = RuleCondition::try_from(RawCondition::new(
            "modified_by_user",
            Some(serde_json::json!("U2")),
        ))
        .unwrap();
        assert_eq!(cond, RuleCondition::ModifiedByUser("U2".to_string()));

        let cond = RuleCondition::try_from(RawCondition::new(
            "time_range",
            Some(serde_json::json!({"start_hour": 9, "end_hour": 17})),
        ))
        .unwrap();
        assert_eq!(cond, RuleCondition::TimeRange(HourWindow::new(9, 17).unwrap()));

        let cond =
            RuleCondition::try_from(RawCondition::new("time_range", Some(serde_json::json!("22-6"))))
                .unwrap();
        assert_eq!(cond.kind(), "time_range");
    }

    #[test]
    fn test_raw_condition_rejections() {
        let err = RuleCondition::try_from(RawCondition::new("sentiment", None)).unwrap_err();
        assert!(err.to_string().contains("unknown condition type: sentiment"));

        assert!(RuleCondition::try_from(RawCondition::new("modified_by_user", None)).is_err());
        assert!(
            RuleCondition::try_from(RawCondition::new(
                "change_type",
                Some(serde_json::json!("renamed"))
            ))
            .is_err()
        );
        assert!(
            RuleCondition::try_from(RawCondition::new("time_range", Some(serde_json::json!(5))))
                .is_err()
        );
    }

    #[test]
    fn test_raw_action_conversion() {
        let action = RuleAction::try_from(RawAction::new("notify", Some("C1".to_string()))).unwrap();
        assert_eq!(
            action,
            RuleAction::Notify {
                target: "C1".to_string()
            }
        );

        let action = RuleAction::try_from(RawAction::new("create_task", None).with_template("Review {title}"))
            .unwrap();
        assert_eq!(action.kind(), "create_task");

        let action = RuleAction::try_from(RawAction::new("aggregate", Some(String::new()))).unwrap();
        assert_eq!(action, RuleAction::Aggregate { target: None });
    }

    #[test_case("notify", None, "notify action requires a target"; "notify without target")]
    #[test_case("webhook", Some("  "), "webhook action requires a target"; "webhook blank target")]
    #[test_case("webhook", Some("ftp://x"), "must be an http(s) URL"; "webhook bad scheme")]
    #[test_case("email", Some("a@b"), "unknown action type: email"; "unknown kind")]
    fn test_raw_action_rejections(kind: &str, target: Option<&str>, expected: &str) {
        let err = RuleAction::try_from(RawAction::new(kind, target.map(str::to_string))).unwrap_err();
        assert!(matches!(err, Error::InvalidRule(_)));
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[test]
    fn test_condition_serde_shape() {
        let json = serde_json::to_value(RuleCondition::ModifiedByUser("U2".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "modified_by_user", "value": "U2"}));

        let any: RuleCondition = serde_json::from_value(serde_json::json!({"type": "any"})).unwrap();
        assert_eq!(any, RuleCondition::Any);

        let window: RuleCondition =
            serde_json::from_value(serde_json::json!({"type": "time_range", "value": "9-17"})).unwrap();
        assert_eq!(window, RuleCondition::TimeRange(HourWindow::new(9, 17).unwrap()));
    }

    #[test]
    fn test_condition_matching() {
        let event = ChangeEvent::new("doc", ChangeType::UserChanged, 0).with_new_user("U2");
        assert!(RuleCondition::Any.matches(&event, None));
        assert!(RuleCondition::ModifiedByUser("U2".to_string()).matches(&event, None));
        assert!(!RuleCondition::ModifiedByUser("U3".to_string()).matches(&event, None));
        assert!(RuleCondition::ChangeType(ChangeType::UserChanged).matches(&event, None));

        let window = RuleCondition::TimeRange(HourWindow::new(9, 17).unwrap());
        assert!(window.matches(&event, Some(10)));
        assert!(!window.matches(&event, None));
    }

    #[test]
    fn test_condition_on_incomplete_event() {
        let event = ChangeEvent::new("doc", ChangeType::TimeUpdated, 0);
        assert!(!RuleCondition::ModifiedByUser("U2".to_string()).matches(&event, Some(3)));
    }
}
