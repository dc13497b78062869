//! Change rules: CRUD and evaluation against change events.
//!
//! Conditions and actions are closed enums validated when a rule is created
//! or updated, so evaluation never meets an unknown kind. Evaluation isolates
//! failures per rule: a failing action is recorded in that rule's
//! [`RuleExecutionResult::error`] and the remaining rules still run.
//!
//! # Task templates
//!
//! `create_task` titles substitute these placeholders:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{doc_token}` | document token |
//! | `{user}` | new modifying user, or `unknown` |
//! | `{change_type}` | `time_updated`, `user_changed`, ... |
//! | `{time}` | detection time in the engine's offset |
//! | `{title}` | document title, or the token |

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Timelike};
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::connectors::{ActionSinks, TaskRequest};
use crate::models::{
    ChangeEvent, ChangeRule, RawAction, RawCondition, RuleAction, RuleCondition,
    RuleExecutionResult, RuleUpdate,
};
use crate::storage::RuleStore;
use crate::{Error, Result, duration_to_millis};

/// Task title used when a `create_task` action has no template.
pub const DEFAULT_TASK_TEMPLATE: &str = "Review {change_type} on {title} by {user}";

/// Rules engine bound to one owner.
#[derive(Clone)]
pub struct RulesEngine {
    store: Arc<dyn RuleStore>,
    owner_id: String,
    sinks: ActionSinks,
    clock: Arc<dyn Clock>,
    utc_offset: FixedOffset,
}

impl RulesEngine {
    /// Creates an engine using the host's current UTC offset for `time_range`.
    #[must_use]
    pub fn new(
        store: Arc<dyn RuleStore>,
        owner_id: impl Into<String>,
        sinks: ActionSinks,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
            sinks,
            clock,
            utc_offset: *chrono::Local::now().offset(),
        }
    }

    /// Sets the offset used to compute an event's local hour.
    #[must_use]
    pub const fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    /// Returns the same engine scoped to another owner.
    #[must_use]
    pub fn for_owner(&self, owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            ..self.clone()
        }
    }

    /// Returns the owner this engine reads and writes rules for.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Creates and stores a rule.
    ///
    /// An empty `name` is replaced with a description of the rule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty token,
    /// [`Error::InvalidRule`] if the condition or action is invalid, or a
    /// store error.
    pub fn create_rule(
        &self,
        doc_token: &str,
        name: &str,
        condition: RuleCondition,
        action: RuleAction,
    ) -> Result<ChangeRule> {
        if doc_token.trim().is_empty() {
            return Err(Error::InvalidInput("doc_token must not be empty".to_string()));
        }
        condition.validate()?;
        action.validate()?;

        let now = self.clock.now_ms();
        let name = if name.trim().is_empty() {
            format!("when {} then {}", condition.kind(), action.kind())
        } else {
            name.trim().to_string()
        };
        let rule = ChangeRule {
            id: uuid::Uuid::now_v7().to_string(),
            doc_token: doc_token.to_string(),
            name,
            condition,
            action,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_rule(&self.owner_id, &rule)?;
        debug!(rule_id = %rule.id, doc_token, "Rule created");
        Ok(rule)
    }

    /// Creates a rule from untyped `{type, value}` / `{type, target, template}` input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] with the conversion reason, or any
    /// error from [`Self::create_rule`].
    pub fn create_rule_from_raw(
        &self,
        doc_token: &str,
        name: &str,
        condition: RawCondition,
        action: RawAction,
    ) -> Result<ChangeRule> {
        self.create_rule(
            doc_token,
            name,
            RuleCondition::try_from(condition)?,
            RuleAction::try_from(action)?,
        )
    }

    /// Gets a rule by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_rule(&self, rule_id: &str) -> Result<Option<ChangeRule>> {
        self.store.get_rule(&self.owner_id, rule_id)
    }

    /// Lists a document's rules in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_rules_for_doc(&self, doc_token: &str) -> Result<Vec<ChangeRule>> {
        self.store.list_rules(&self.owner_id, Some(doc_token))
    }

    /// Lists every rule of the owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_all_rules(&self) -> Result<Vec<ChangeRule>> {
        self.store.list_rules(&self.owner_id, None)
    }

    /// Applies a partial update.
    ///
    /// # Returns
    ///
    /// The updated rule, or `None` if no rule has that ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] if a new condition or action is invalid,
    /// or a store error.
    pub fn update_rule(&self, rule_id: &str, update: RuleUpdate) -> Result<Option<ChangeRule>> {
        let Some(mut rule) = self.get_rule(rule_id)? else {
            return Ok(None);
        };
        if update.is_empty() {
            return Ok(Some(rule));
        }

        if let Some(condition) = update.condition {
            condition.validate()?;
            rule.condition = condition;
        }
        if let Some(action) = update.action {
            action.validate()?;
            rule.action = action;
        }
        if let Some(name) = update.name.filter(|n| !n.trim().is_empty()) {
            rule.name = name.trim().to_string();
        }
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }
        rule.updated_at = self.clock.now_ms();

        if !self.store.update_rule(&self.owner_id, &rule)? {
            return Ok(None);
        }
        debug!(rule_id, "Rule updated");
        Ok(Some(rule))
    }

    /// Deletes a rule. Returns whether one was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn delete_rule(&self, rule_id: &str) -> Result<bool> {
        self.store.delete_rule(&self.owner_id, rule_id)
    }

    /// Evaluates every enabled rule of the event's document.
    ///
    /// Never fails: an event without a document token, or a store error while
    /// loading rules, is logged and yields no results. Action failures are
    /// captured per rule.
    #[instrument(
        name = "docwatch.rules.evaluate",
        skip(self, change),
        fields(doc_token = %change.doc_token, change_type = %change.change_type)
    )]
    pub async fn evaluate_change_against_rules(
        &self,
        change: &ChangeEvent,
    ) -> Vec<RuleExecutionResult> {
        if change.doc_token.trim().is_empty() {
            warn!(event_id = %change.id, "Change event has no document token");
            record_evaluation("invalid_event");
            return Vec::new();
        }

        let rules = match self.store.list_rules(&self.owner_id, Some(&change.doc_token)) {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "Failed to load rules");
                record_evaluation("store_error");
                return Vec::new();
            },
        };

        let local_hour = self.local_hour(change.change_detected_at);
        let mut results = Vec::with_capacity(rules.len());
        for rule in rules.iter().filter(|r| r.enabled) {
            results.push(self.evaluate_rule(rule, change, local_hour).await);
        }

        debug!(
            evaluated = results.len(),
            matched = results.iter().filter(|r| r.condition_matched).count(),
            "Rules evaluated"
        );
        results
    }

    async fn evaluate_rule(
        &self,
        rule: &ChangeRule,
        change: &ChangeEvent,
        local_hour: Option<u32>,
    ) -> RuleExecutionResult {
        let start = Instant::now();
        if !rule.condition.matches(change, local_hour) {
            record_evaluation("no_match");
            return RuleExecutionResult {
                rule_id: rule.id.clone(),
                condition_matched: false,
                action_executed: false,
                execution_time_ms: duration_to_millis(start.elapsed()),
                error: None,
            };
        }

        let error = match self.execute_action(rule, change).await {
            Ok(()) => {
                record_evaluation("executed");
                None
            },
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    action = rule.action.kind(),
                    error = %e,
                    "Rule action failed"
                );
                record_evaluation("failed");
                Some(e.to_string())
            },
        };

        RuleExecutionResult {
            rule_id: rule.id.clone(),
            condition_matched: true,
            action_executed: error.is_none(),
            execution_time_ms: duration_to_millis(start.elapsed()),
            error,
        }
    }

    async fn execute_action(&self, rule: &ChangeRule, change: &ChangeEvent) -> Result<()> {
        match &rule.action {
            RuleAction::Notify { target } => {
                let message = self.format_rule_message(rule, change);
                self.sinks.notify.notify(target, &message).await?;
            },
            RuleAction::Webhook { target } => {
                let delivery = self.sinks.webhook.deliver(target, change).await?;
                if !delivery.success {
                    return Err(Error::failed(
                        "webhook",
                        delivery
                            .error
                            .unwrap_or_else(|| "delivery failed".to_string()),
                    ));
                }
            },
            RuleAction::CreateTask { target, template } => {
                let template = template.as_deref().unwrap_or(DEFAULT_TASK_TEMPLATE);
                let request = TaskRequest {
                    target: target.clone(),
                    title: self.render_template(template, change),
                    doc_token: change.doc_token.clone(),
                    change_type: change.change_type,
                    event_id: change.id.clone(),
                };
                self.sinks.task.create_task(&request).await?;
            },
            RuleAction::Aggregate { target } => {
                let target = target.as_deref().unwrap_or(change.doc_token.as_str());
                self.sinks.aggregate.add(target, change).await?;
            },
        }
        Ok(())
    }

    /// Substitutes task template placeholders in a single pass.
    ///
    /// Substituted values are never rescanned, and unknown `{...}` text is
    /// kept verbatim.
    #[must_use]
    pub fn render_template(&self, template: &str, change: &ChangeEvent) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open..];
            let Some(close) = after.find('}') else {
                out.push_str(after);
                return out;
            };
            let value = match &after[1..close] {
                "doc_token" => Some(change.doc_token.clone()),
                "user" => Some(
                    change
                        .new_modified_user
                        .as_deref()
                        .unwrap_or("unknown")
                        .to_string(),
                ),
                "change_type" => Some(change.change_type.as_str().to_string()),
                "time" => Some(self.format_time(change.change_detected_at)),
                "title" => Some(display_name(change).to_string()),
                _ => None,
            };
            match value {
                Some(value) => {
                    out.push_str(&value);
                    rest = &after[close + 1..];
                },
                None => {
                    out.push('{');
                    rest = &after[1..];
                },
            }
        }
        out.push_str(rest);
        out
    }

    fn format_rule_message(&self, rule: &ChangeRule, change: &ChangeEvent) -> String {
        format!(
            "[{}] {} ({}) {} by {} at {}",
            rule.name,
            display_name(change),
            change.doc_token,
            change.change_type,
            change.new_modified_user.as_deref().unwrap_or("unknown"),
            self.format_time(change.change_detected_at)
        )
    }

    fn local_time(&self, at_ms: i64) -> Option<DateTime<FixedOffset>> {
        // Zero means the event carries no detection time.
        (at_ms > 0)
            .then(|| DateTime::from_timestamp_millis(at_ms))
            .flatten()
            .map(|utc| utc.with_timezone(&self.utc_offset))
    }

    fn local_hour(&self, at_ms: i64) -> Option<u32> {
        self.local_time(at_ms).map(|t| t.hour())
    }

    fn format_time(&self, at_ms: i64) -> String {
        self.local_time(at_ms).map_or_else(
            || "unknown time".to_string(),
            |t| t.format("%Y-%m-%d %H:%M").to_string(),
        )
    }

    /// Probes the backing store.
    #[must_use]
    pub fn health_check(&self) -> bool {
        let healthy = self.store.health_check();
        if !healthy {
            warn!("Rule store health check failed");
        }
        healthy
    }
}

impl std::fmt::Debug for RulesEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulesEngine")
            .field("owner_id", &self.owner_id)
            .field("utc_offset", &self.utc_offset)
            .finish_non_exhaustive()
    }
}

fn display_name(change: &ChangeEvent) -> &str {
    change
        .title()
        .filter(|t| !t.is_empty())
        .unwrap_or(change.doc_token.as_str())
}

fn record_evaluation(result: &'static str) {
    metrics::counter!("docwatch_rule_evaluations_total", "result" => result).increment(1);
}
