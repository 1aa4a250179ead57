// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Status condition machine for SecretTemplate reconciles.

use kube::runtime::controller::Action;

use crate::error::Result;
use crate::types::{Condition, ConditionType, SecretReference, SecretTemplateStatus};

const FRIENDLY_MSG_LIMIT: usize = 80;

/// Tracks the status of one reconcile pass. Exactly one of Reconciling,
/// ReconcileSucceeded or ReconcileFailed is True at any time.
pub struct ReconcileStatus {
    status: SecretTemplateStatus,
}

impl ReconcileStatus {
    pub fn new(status: SecretTemplateStatus) -> Self {
        Self { status }
    }

    pub fn into_inner(self) -> SecretTemplateStatus {
        self.status
    }

    pub fn is_reconcile_succeeded(&self) -> bool {
        self.status.conditions.iter().any(|c| {
            c.condition_type == ConditionType::ReconcileSucceeded && c.is_true()
        })
    }

    /// Enter the Reconciling state, stamping the generation this pass observed.
    pub fn set_reconciling(&mut self, generation: Option<i64>) {
        self.status.observed_generation = generation;
        self.set_condition(ConditionType::Reconciling, None);
        self.status.friendly_description = Some("Reconciling".to_string());
    }

    pub fn set_secret_name(&mut self, name: &str) {
        self.status.secret = Some(SecretReference {
            name: name.to_string(),
        });
    }

    /// Record the outcome of a reconcile. Terminal errors are recorded as
    /// failures but reported upward as a non-requeueing success.
    pub fn complete(&mut self, outcome: Result<Action>) -> Result<Action> {
        match outcome {
            Ok(action) => {
                self.set_condition(ConditionType::ReconcileSucceeded, None);
                self.status.friendly_description = Some("Reconcile succeeded".to_string());
                Ok(action)
            }
            Err(err) => {
                let message = err.to_string();
                self.set_condition(ConditionType::ReconcileFailed, Some(message.clone()));
                self.status.friendly_description =
                    Some(format!("Reconcile failed: {}", friendly_err_msg(&message)));
                if err.is_terminal() {
                    Ok(Action::await_change())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Replace the condition set so only the given condition is active.
    fn set_condition(&mut self, condition_type: ConditionType, message: Option<String>) {
        self.status.conditions = vec![Condition {
            condition_type,
            status: "True".to_string(),
            reason: None,
            message,
        }];
    }
}

/// First line of the error, capped at 80 characters, with a trailing marker
/// when anything was cut off.
fn friendly_err_msg(err_msg: &str) -> String {
    let mut msg = err_msg;
    let mut truncated = false;

    if let Some(idx) = msg.find('\n') {
        msg = &msg[..idx];
        truncated = true;
    }
    if msg.len() > FRIENDLY_MSG_LIMIT {
        let mut end = FRIENDLY_MSG_LIMIT;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        msg = &msg[..end];
        truncated = true;
    }

    let mut out = msg.to_string();
    if truncated {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplatedSecretError;

    fn path_err(segment: &str) -> TemplatedSecretError {
        TemplatedSecretError::PathNotFound(segment.to_string())
    }

    #[test]
    fn test_is_reconcile_succeeded() {
        let mut status = ReconcileStatus::new(SecretTemplateStatus::default());
        assert!(!status.is_reconcile_succeeded());

        status.set_reconciling(Some(1));
        assert!(!status.is_reconcile_succeeded());

        status.complete(Ok(Action::await_change())).unwrap();
        assert!(status.is_reconcile_succeeded());
    }

    #[test]
    fn test_set_reconciling() {
        let mut status = ReconcileStatus::new(SecretTemplateStatus {
            conditions: vec![Condition {
                condition_type: ConditionType::ReconcileSucceeded,
                status: "True".to_string(),
                reason: None,
                message: None,
            }],
            ..Default::default()
        });

        status.set_reconciling(Some(42));

        let inner = status.into_inner();
        assert_eq!(inner.observed_generation, Some(42));
        assert_eq!(inner.conditions.len(), 1);
        assert_eq!(inner.conditions[0].condition_type, ConditionType::Reconciling);
        assert!(inner.conditions[0].is_true());
        assert_eq!(inner.friendly_description.as_deref(), Some("Reconciling"));
    }

    #[test]
    fn test_complete_success() {
        let mut status = ReconcileStatus::new(SecretTemplateStatus::default());
        status.set_reconciling(Some(1));

        let result = status.complete(Ok(Action::requeue(std::time::Duration::from_secs(10))));
        assert!(result.is_ok());

        let inner = status.into_inner();
        assert_eq!(inner.conditions.len(), 1);
        assert_eq!(
            inner.conditions[0].condition_type,
            ConditionType::ReconcileSucceeded
        );
        assert_eq!(inner.conditions[0].message, None);
        assert_eq!(
            inner.friendly_description.as_deref(),
            Some("Reconcile succeeded")
        );
    }

    #[test]
    fn test_complete_failure_passes_error_through() {
        let mut status = ReconcileStatus::new(SecretTemplateStatus::default());
        status.set_reconciling(Some(1));

        let err = status.complete(Err(path_err("missing"))).unwrap_err();
        assert_eq!(err.to_string(), "missing is not found");

        let inner = status.into_inner();
        assert_eq!(inner.conditions.len(), 1);
        assert_eq!(inner.conditions[0].condition_type, ConditionType::ReconcileFailed);
        assert_eq!(
            inner.conditions[0].message.as_deref(),
            Some("missing is not found")
        );
        assert_eq!(
            inner.friendly_description.as_deref(),
            Some("Reconcile failed: missing is not found")
        );
    }

    #[test]
    fn test_complete_terminal_failure_does_not_requeue() {
        let mut status = ReconcileStatus::new(SecretTemplateStatus::default());
        status.set_reconciling(Some(1));

        let terminal = TemplatedSecretError::terminal(path_err("gone"));
        let result = status.complete(Err(terminal));
        assert!(result.is_ok());

        let inner = status.into_inner();
        assert_eq!(inner.conditions[0].condition_type, ConditionType::ReconcileFailed);
        assert_eq!(inner.conditions[0].message.as_deref(), Some("gone is not found"));
    }

    #[test]
    fn test_friendly_msg_short() {
        assert_eq!(friendly_err_msg("short error"), "short error");
    }

    #[test]
    fn test_friendly_msg_multiline() {
        assert_eq!(
            friendly_err_msg("first line\nsecond line\nthird line"),
            "first line..."
        );
    }

    #[test]
    fn test_friendly_msg_truncates_at_80() {
        let long = "This is a very long error message that exceeds the 80 character limit and should be truncated";
        let friendly = friendly_err_msg(long);
        assert!(friendly.starts_with("This is a very long error message that exceeds the 80"));
        assert!(friendly.ends_with("..."));
        assert_eq!(friendly.len(), 83);
    }
}
