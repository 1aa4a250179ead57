// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Evaluation of a JSONPath template against a resolved-input tree.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

use crate::error::{Result, TemplatedSecretError};
use crate::expand::jsonpath::Expression;
use crate::types::JsonPathTemplate;

/// The Secret content produced by evaluating a template. Metadata is merged
/// into the owned Secret by the reconciler.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SecretShape {
    pub data: BTreeMap<String, Vec<u8>>,
    pub string_data: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub type_: Option<String>,
}

/// Evaluate every field of the template. Failures carry a prefix naming the
/// field class they occurred under.
pub fn evaluate_template(
    template: Option<&JsonPathTemplate>,
    values: &Value,
) -> Result<SecretShape> {
    let template = template.ok_or(TemplatedSecretError::NilTemplate)?;

    let data = evaluate_bytes(&template.data, values)
        .map_err(|e| TemplatedSecretError::templating("data", e))?;
    let string_data = evaluate_strings(&template.string_data, values)
        .map_err(|e| TemplatedSecretError::templating("stringData", e))?;
    let annotations = evaluate_strings(&template.metadata.annotations, values)
        .map_err(|e| TemplatedSecretError::templating("annotations", e))?;
    let labels = evaluate_strings(&template.metadata.labels, values)
        .map_err(|e| TemplatedSecretError::templating("labels", e))?;

    let type_ = match &template.type_ {
        Some(expr) => Some(
            Expression::new(expr)
                .evaluate(values)
                .map_err(|e| TemplatedSecretError::templating("type", e))?,
        ),
        None => None,
    };

    Ok(SecretShape {
        data,
        string_data,
        labels,
        annotations,
        type_,
    })
}

/// Evaluate a data mapping into raw bytes. Expressions reading an input
/// Secret's `data` are redirected to the decoded sibling; everything else is
/// treated as base64 and decoded.
fn evaluate_bytes(
    mapping: &BTreeMap<String, String>,
    values: &Value,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut out = BTreeMap::new();
    for (key, expression) in mapping {
        let rendered = Expression::new(expression).evaluate(values)?;

        if let Some(decoded) = redirect_to_decoded(expression, values) {
            out.insert(key.clone(), decoded.into_bytes());
            continue;
        }

        let decoded = BASE64
            .decode(rendered.as_bytes())
            .map_err(TemplatedSecretError::DataDecode)?;
        out.insert(key.clone(), decoded);
    }
    Ok(out)
}

/// Evaluate a string mapping. Expressions reading an input Secret's `data`
/// are redirected to the decoded sibling; the rendered value is otherwise
/// used as-is.
fn evaluate_strings(
    mapping: &BTreeMap<String, String>,
    values: &Value,
) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (key, expression) in mapping {
        let rendered = Expression::new(expression).evaluate(values)?;

        let value = redirect_to_decoded(expression, values).unwrap_or(rendered);
        out.insert(key.clone(), value);
    }
    Ok(out)
}

/// Rewrite the first `.data.` in the expression to `.decodedData.` and
/// evaluate it. Returns None when no such sibling exists, for example when
/// the input is not a Secret.
fn redirect_to_decoded(expression: &str, values: &Value) -> Option<String> {
    if !expression.contains(".data.") {
        return None;
    }
    let redirected = expression.replacen(".data.", ".decodedData.", 1);
    Expression::new(&redirected).evaluate(values).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secret_input() -> Value {
        // A resolved Secret input keeps data base64-encoded with a decoded sibling.
        json!({
            "creds": {
                "apiVersion": "v1",
                "kind": "Secret",
                "data": {"inputKey1": "dmFsdWUx", "inputKey2": "dmFsdWUy"},
                "decodedData": {"inputKey1": "value1", "inputKey2": "value2"}
            },
            "map": {
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "data": {"inputKey1": "value1", "type": "Opaque"}
            }
        })
    }

    fn template(json: serde_json::Value) -> JsonPathTemplate {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_nil_template_is_an_error() {
        let err = evaluate_template(None, &secret_input()).unwrap_err();
        assert_eq!(err.to_string(), "JSONPathTemplate is nil");
    }

    #[test]
    fn test_data_from_secret_input_uses_decoded_bytes() {
        let tpl = template(json!({
            "data": {
                "key1": "$( .creds.data.inputKey1 )",
                "key2": "$( .creds.data.inputKey2 )"
            }
        }));

        let shape = evaluate_template(Some(&tpl), &secret_input()).unwrap();
        assert_eq!(shape.data.get("key1").unwrap(), b"value1");
        assert_eq!(shape.data.get("key2").unwrap(), b"value2");
    }

    #[test]
    fn test_data_without_data_path_decodes_base64() {
        let values = json!({"raw": {"token": "dmFsdWUx"}});
        let tpl = template(json!({"data": {"key1": "$( .raw.token )"}}));

        let shape = evaluate_template(Some(&tpl), &values).unwrap();
        assert_eq!(shape.data.get("key1").unwrap(), b"value1");
    }

    #[test]
    fn test_data_with_invalid_base64_fails() {
        let values = json!({"raw": {"token": "not base64!"}});
        let tpl = template(json!({"data": {"key1": "$( .raw.token )"}}));

        let err = evaluate_template(Some(&tpl), &values).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("templating data: failed decoding base64 from a Secret"));
    }

    #[test]
    fn test_data_missing_path_reports_field_class() {
        let tpl = template(json!({"data": {"key1": "$( .creds.data.doesntExist1 )"}}));

        let err = evaluate_template(Some(&tpl), &secret_input()).unwrap_err();
        assert_eq!(err.to_string(), "templating data: doesntExist1 is not found");
    }

    #[test]
    fn test_string_data_from_configmap_is_spliced() {
        let tpl = template(json!({
            "stringData": {"key1": "prefix-$(.map.data.inputKey1)-suffix"}
        }));

        let shape = evaluate_template(Some(&tpl), &secret_input()).unwrap();
        assert_eq!(shape.string_data.get("key1").unwrap(), "prefix-value1-suffix");
    }

    #[test]
    fn test_string_data_from_secret_input_is_decoded() {
        let tpl = template(json!({
            "stringData": {"key1": "$( .creds.data.inputKey1 )"}
        }));

        let shape = evaluate_template(Some(&tpl), &secret_input()).unwrap();
        assert_eq!(shape.string_data.get("key1").unwrap(), "value1");
    }

    #[test]
    fn test_string_data_missing_path_reports_field_class() {
        let tpl = template(json!({
            "stringData": {"key1": "prefix-$(.map.data.doesntExist)-suffix"}
        }));

        let err = evaluate_template(Some(&tpl), &secret_input()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "templating stringData: doesntExist is not found"
        );
    }

    #[test]
    fn test_annotations_and_labels_evaluate() {
        let tpl = template(json!({
            "metadata": {
                "labels": {"label1": "prefix-$(.map.data.inputKey1)"},
                "annotations": {"annotation1": "$(.map.data.inputKey1)-suffix"}
            }
        }));

        let shape = evaluate_template(Some(&tpl), &secret_input()).unwrap();
        assert_eq!(shape.labels.get("label1").unwrap(), "prefix-value1");
        assert_eq!(shape.annotations.get("annotation1").unwrap(), "value1-suffix");
    }

    #[test]
    fn test_annotations_missing_path_reports_field_class() {
        let tpl = template(json!({
            "metadata": {"annotations": {"key1": "$(.map.data.doesntExist)"}}
        }));

        let err = evaluate_template(Some(&tpl), &secret_input()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "templating annotations: doesntExist is not found"
        );
    }

    #[test]
    fn test_labels_missing_path_reports_field_class() {
        let tpl = template(json!({
            "metadata": {"labels": {"key1": "$(.map.data.doesntExist)"}}
        }));

        let err = evaluate_template(Some(&tpl), &secret_input()).unwrap_err();
        assert_eq!(err.to_string(), "templating labels: doesntExist is not found");
    }

    #[test]
    fn test_type_evaluates_expression() {
        let tpl = template(json!({"type": "$(.map.data.type)"}));

        let shape = evaluate_template(Some(&tpl), &secret_input()).unwrap();
        assert_eq!(shape.type_.as_deref(), Some("Opaque"));
    }

    #[test]
    fn test_type_literal_passes_through() {
        let tpl = template(json!({"type": "kubernetes.io/tls"}));

        let shape = evaluate_template(Some(&tpl), &secret_input()).unwrap();
        assert_eq!(shape.type_.as_deref(), Some("kubernetes.io/tls"));
    }

    #[test]
    fn test_type_missing_path_reports_field_class() {
        let tpl = template(json!({"type": "$(.map.data.doesntExist)"}));

        let err = evaluate_template(Some(&tpl), &secret_input()).unwrap_err();
        assert_eq!(err.to_string(), "templating type: doesntExist is not found");
    }
}
