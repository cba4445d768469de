//! Server-asserted busy/free indicator and the gate that keeps user
//! mutations from piling up while the backend is processing.
//!
//! The gate only guards mutations started by the user. Polling never
//! consults it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusyState {
    #[default]
    Free,
    Busy,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusIndicator {
    pub state: BusyState,
    pub actor: Option<String>,
    pub elapsed_secs: f64,
}

impl StatusIndicator {
    pub fn free() -> Self {
        Self::default()
    }

    pub fn busy(actor: Option<String>, elapsed_secs: f64) -> Self {
        Self {
            state: BusyState::Busy,
            actor,
            elapsed_secs,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state == BusyState::Busy
    }

    /// Validate a raw `status` object from a server response.
    ///
    /// Expected shape: `{"status": "busy"|"free", "actor": ..., "elapsed": ...}`.
    /// Anything missing or malformed yields a free indicator.
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(obj) = value.and_then(Value::as_object) else {
            return Self::free();
        };
        let state = match obj.get("status").and_then(Value::as_str) {
            Some("busy") => BusyState::Busy,
            _ => BusyState::Free,
        };
        Self {
            state,
            actor: obj
                .get("actor")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from),
            elapsed_secs: obj
                .get("elapsed")
                .and_then(Value::as_f64)
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    SendMessage,
    EditPost,
}

impl MutationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SendMessage => "send message",
            Self::EditPost => "edit post",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refusal produced when the backend reports itself busy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{action} blocked: request in progress by {actor} ({elapsed_secs} s)")]
pub struct BusyNotice {
    pub action: MutationKind,
    pub actor: String,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default)]
pub struct StatusGate {
    indicator: Option<StatusIndicator>,
}

impl StatusGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current indicator; an uninitialized gate reads as free.
    pub fn indicator(&self) -> StatusIndicator {
        self.indicator.clone().unwrap_or_default()
    }

    /// Take the status reported by the server.
    pub fn adopt(&mut self, indicator: StatusIndicator) {
        self.indicator = Some(indicator);
    }

    /// Check whether `action` may start. A missing indicator is
    /// reinitialized to free first.
    pub fn try_acquire(&mut self, action: MutationKind) -> Result<(), BusyNotice> {
        let indicator = self.indicator.get_or_insert_with(StatusIndicator::free);
        if indicator.is_busy() {
            return Err(BusyNotice {
                action,
                actor: indicator
                    .actor
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                elapsed_secs: indicator.elapsed_secs,
            });
        }
        Ok(())
    }

    /// Optimistic local release after a mutation round trip, success or
    /// failure. The next poll response overwrites it with the server's view.
    pub fn release(&mut self) {
        self.indicator = Some(StatusIndicator::free());
    }

    pub fn reset(&mut self) {
        self.indicator = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_status_reads_as_free() {
        assert_eq!(StatusIndicator::from_value(None), StatusIndicator::free());
        assert_eq!(
            StatusIndicator::from_value(Some(&json!("busy"))),
            StatusIndicator::free()
        );
        assert_eq!(
            StatusIndicator::from_value(Some(&json!({"status": 1}))),
            StatusIndicator::free()
        );
    }

    #[test]
    fn busy_status_keeps_actor_and_elapsed() {
        let indicator = StatusIndicator::from_value(Some(&json!({
            "status": "busy", "actor": "llm", "elapsed": 12
        })));
        assert!(indicator.is_busy());
        assert_eq!(indicator.actor.as_deref(), Some("llm"));
        assert_eq!(indicator.elapsed_secs, 12.0);
    }

    #[test]
    fn busy_gate_refuses_with_notice() {
        let mut gate = StatusGate::new();
        gate.adopt(StatusIndicator::busy(None, 3.0));
        let notice = gate
            .try_acquire(MutationKind::SendMessage)
            .expect_err("busy gate must refuse");
        assert_eq!(notice.actor, "unknown");
        assert_eq!(
            notice.to_string(),
            "send message blocked: request in progress by unknown (3 s)"
        );
    }

    #[test]
    fn uninitialized_gate_is_free_and_release_resets() {
        let mut gate = StatusGate::new();
        assert!(gate.try_acquire(MutationKind::EditPost).is_ok());
        assert_eq!(gate.indicator(), StatusIndicator::free());

        gate.adopt(StatusIndicator::busy(Some("agent".to_string()), 1.0));
        gate.release();
        assert!(gate.try_acquire(MutationKind::EditPost).is_ok());
    }
}
