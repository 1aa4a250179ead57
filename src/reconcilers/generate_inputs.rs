// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Change detection for the inputs a Secret was generated from.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::constants::annotations::GENERATE_INPUTS;

/// Snapshot of the resolved inputs, serialized into an annotation on the
/// owned Secret so an unchanged reconcile can skip the write.
pub struct GenerateInputs {
    inputs: Value,
}

impl GenerateInputs {
    pub fn with_inputs(inputs: Value) -> Self {
        Self { inputs }
    }

    /// Record the current inputs on the Secret's annotations.
    pub fn add(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.insert(GENERATE_INPUTS.to_string(), self.serialized());
    }

    /// Whether the recorded inputs differ from the current ones. An absent
    /// annotation always counts as changed.
    pub fn is_changed(&self, annotations: &BTreeMap<String, String>) -> bool {
        annotations.get(GENERATE_INPUTS) != Some(&self.serialized())
    }

    fn serialized(&self) -> String {
        // BTreeMap-backed Values serialize deterministically.
        self.inputs.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_annotation_counts_as_changed() {
        let inputs = GenerateInputs::with_inputs(json!({"key": "value"}));
        assert!(inputs.is_changed(&BTreeMap::new()));
    }

    #[test]
    fn test_different_recorded_inputs_count_as_changed() {
        let inputs = GenerateInputs::with_inputs(json!({"key": "new-value"}));

        let mut annotations = BTreeMap::new();
        annotations.insert(
            GENERATE_INPUTS.to_string(),
            r#"{"key":"old-value"}"#.to_string(),
        );

        assert!(inputs.is_changed(&annotations));
    }

    #[test]
    fn test_same_recorded_inputs_count_as_unchanged() {
        let snapshot = json!({"key": "same-value"});

        let mut annotations = BTreeMap::new();
        GenerateInputs::with_inputs(snapshot.clone()).add(&mut annotations);

        assert!(!GenerateInputs::with_inputs(snapshot).is_changed(&annotations));
    }

    #[test]
    fn test_complex_inputs_roundtrip() {
        let snapshot = json!({
            "string": "value",
            "number": 42,
            "nested": {"array": ["a", "b", "c"]}
        });

        let mut annotations = BTreeMap::new();
        GenerateInputs::with_inputs(snapshot.clone()).add(&mut annotations);

        assert!(!GenerateInputs::with_inputs(snapshot).is_changed(&annotations));
    }
}
