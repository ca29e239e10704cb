//! Audit trail for control-plane mutations.
//!
//! Table create/replace/delete, interface attach/detach and control plane
//! start/stop each produce one [`AuditRecord`]. [`audit_log!`] writes it to
//! the `audit` tracing target together with its JSON form, at info when the
//! action went through and at warn when it was refused.
//!
//! The dataplane never audits; it only counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of change a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    ResourceCreate,
    ResourceModify,
    ResourceDelete,
    /// Interface binding changes.
    NetworkConfig,
    SystemLifecycle,
}

impl AuditCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::ResourceCreate => "RESOURCE_CREATE",
            AuditCategory::ResourceModify => "RESOURCE_MODIFY",
            AuditCategory::ResourceDelete => "RESOURCE_DELETE",
            AuditCategory::NetworkConfig => "NETWORK_CONFIG",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
    /// Refused because of existing state (table still bound, slot taken).
    Denied,
}

impl AuditOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::InProgress => "in_progress",
            AuditOutcome::Denied => "denied",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audited control-plane action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Component that acted ("TableManager", "BindingRegistry", "ControlPlane").
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    /// Table index or interface index the action touched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// A record stamped now, `InProgress` until an outcome is set.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Marks the record failed with `error`.
    pub fn with_error(self, error: impl Into<String>) -> Self {
        self.rejected(AuditOutcome::Failure, error)
    }

    /// Marks the record denied with `reason`.
    pub fn denied(self, reason: impl Into<String>) -> Self {
        self.rejected(AuditOutcome::Denied, reason)
    }

    fn rejected(mut self, outcome: AuditOutcome, error: impl Into<String>) -> Self {
        self.outcome = outcome;
        self.error = Some(error.into());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }

    /// Writes the record to the `audit` target. Use [`audit_log!`].
    #[doc(hidden)]
    pub fn emit(&self) {
        let json = self.to_json();
        match self.outcome {
            AuditOutcome::Success => tracing::info!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                action = %self.action,
                object_id = self.object_id.as_deref().unwrap_or(""),
                audit_json = %json,
                "AUDIT: {} {} {}",
                self.category,
                self.action,
                self.outcome
            ),
            AuditOutcome::InProgress => tracing::debug!(
                target: "audit",
                category = self.category.as_str(),
                action = %self.action,
                audit_json = %json,
                "AUDIT: {} {} {}",
                self.category,
                self.action,
                self.outcome
            ),
            AuditOutcome::Failure | AuditOutcome::Denied => tracing::warn!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                action = %self.action,
                object_id = self.object_id.as_deref().unwrap_or(""),
                error = self.error.as_deref().unwrap_or(""),
                audit_json = %json,
                "AUDIT: {} {} {}",
                self.category,
                self.action,
                self.outcome
            ),
        }
    }
}

/// Emits an [`AuditRecord`] at a level derived from its outcome.
///
/// ```ignore
/// audit_log!(AuditRecord::new(AuditCategory::ResourceDelete, "TableManager", "delete_table")
///     .with_outcome(AuditOutcome::Success)
///     .with_object_id("3"));
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        $crate::audit::AuditRecord::emit(&$record)
    };
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `log_level` when set. `json` selects one JSON object
/// per line; otherwise the human-readable format is used.
pub fn init_logging(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let layer = fmt::layer().with_target(true).with_thread_ids(true);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_defaults_to_in_progress() {
        let record = AuditRecord::new(AuditCategory::ResourceCreate, "TableManager", "add_replace");
        assert_eq!(record.outcome, AuditOutcome::InProgress);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_with_error_marks_failure() {
        let record = AuditRecord::new(AuditCategory::ResourceModify, "TableManager", "add_replace")
            .with_error("address family mismatch");
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("address family mismatch"));
    }

    #[test]
    fn test_denied_keeps_reason() {
        let record = AuditRecord::new(AuditCategory::ResourceDelete, "TableManager", "delete_table")
            .denied("table 0 still bound");
        assert_eq!(record.outcome, AuditOutcome::Denied);
        assert_eq!(record.error.as_deref(), Some("table 0 still bound"));
    }

    #[test]
    fn test_json_skips_empty_fields() {
        let json = AuditRecord::new(AuditCategory::NetworkConfig, "BindingRegistry", "attach")
            .with_outcome(AuditOutcome::Success)
            .with_object_id("1")
            .to_json();
        assert!(json.contains(r#""category":"NETWORK_CONFIG""#));
        assert!(json.contains(r#""outcome":"success""#));
        assert!(json.contains(r#""object_id":"1""#));
        assert!(!json.contains("object_type"));
        assert!(!json.contains("details"));
    }

    #[test]
    fn test_outcome_names_match_serde() {
        let json = serde_json::to_string(&AuditOutcome::InProgress).unwrap();
        assert_eq!(json, format!("\"{}\"", AuditOutcome::InProgress));
    }
}
