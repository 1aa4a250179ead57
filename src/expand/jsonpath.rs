// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Expansion of `$( <jsonpath> )` substitutions embedded in template strings.

use crate::error::{Result, TemplatedSecretError};
use serde_json::Value;
use serde_json_path::JsonPath;

/// A template string containing zero or more `$( <jsonpath> )` substitutions.
/// Literal text around substitutions is preserved verbatim.
#[derive(Debug, Clone, Copy)]
pub struct Expression<'a> {
    raw: &'a str,
}

impl<'a> Expression<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self { raw }
    }

    /// Evaluate every substitution against the resolved-input tree and splice
    /// the results back into the surrounding literal text.
    pub fn evaluate(&self, values: &Value) -> Result<String> {
        let mut out = String::with_capacity(self.raw.len());
        let mut rest = self.raw;

        while let Some(start) = rest.find("$(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = matching_paren(after).ok_or_else(|| TemplatedSecretError::PathParse {
                expression: self.raw.to_string(),
                reason: "unterminated $( substitution".to_string(),
            })?;

            out.push_str(&query_one(after[..end].trim(), values)?);
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

/// Byte offset of the `)` closing a substitution, counting nested parens.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    return Some(idx);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Evaluate a single JSONPath query, requiring exactly one match.
fn query_one(expr: &str, values: &Value) -> Result<String> {
    let path =
        JsonPath::parse(&normalize(expr)).map_err(|e| TemplatedSecretError::PathParse {
            expression: expr.to_string(),
            reason: e.to_string(),
        })?;

    let nodes = path.query(values);
    match nodes.len() {
        0 => Err(TemplatedSecretError::PathNotFound(
            last_segment(expr).to_string(),
        )),
        1 => Ok(render(nodes.first().unwrap())),
        _ => Err(TemplatedSecretError::PathNotSingular(expr.to_string())),
    }
}

/// Accept the relative `.a.b` form used in templates by rooting it at `$`.
fn normalize(expr: &str) -> String {
    if expr.starts_with('$') {
        expr.to_string()
    } else if expr.starts_with('.') {
        format!("${expr}")
    } else {
        format!("$.{expr}")
    }
}

/// The final path segment, used in not-found error messages.
fn last_segment(expr: &str) -> &str {
    expr.trim_end_matches(']')
        .rsplit(['.', '['])
        .find(|s| !s.is_empty())
        .unwrap_or(expr)
}

/// Strings render raw; everything else renders as its JSON form.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values() -> Value {
        json!({
            "creds": {
                "data": {"user": "YWRtaW4=", "port": 5432},
                "decodedData": {"user": "admin"}
            },
            "first": {"data": {"secretName": "dyn"}}
        })
    }

    #[test]
    fn test_literal_text_passes_through() {
        let result = Expression::new("no substitutions here").evaluate(&values()).unwrap();
        assert_eq!(result, "no substitutions here");
    }

    #[test]
    fn test_single_substitution() {
        let result = Expression::new("$( .creds.data.user )").evaluate(&values()).unwrap();
        assert_eq!(result, "YWRtaW4=");
    }

    #[test]
    fn test_substitution_with_prefix_and_suffix() {
        let result = Expression::new("prefix-$(.first.data.secretName)-suffix")
            .evaluate(&values())
            .unwrap();
        assert_eq!(result, "prefix-dyn-suffix");
    }

    #[test]
    fn test_multiple_substitutions() {
        let result = Expression::new("$(.creds.decodedData.user):$(.creds.data.port)")
            .evaluate(&values())
            .unwrap();
        assert_eq!(result, "admin:5432");
    }

    #[test]
    fn test_number_renders_as_json() {
        let result = Expression::new("$( .creds.data.port )").evaluate(&values()).unwrap();
        assert_eq!(result, "5432");
    }

    #[test]
    fn test_map_renders_as_json() {
        let result = Expression::new("$( .first.data )").evaluate(&values()).unwrap();
        assert_eq!(result, r#"{"secretName":"dyn"}"#);
    }

    #[test]
    fn test_missing_key_reports_final_segment() {
        let err = Expression::new("$( .creds.data.doesntExist1 )")
            .evaluate(&values())
            .unwrap_err();
        assert_eq!(err.to_string(), "doesntExist1 is not found");
    }

    #[test]
    fn test_missing_key_in_mixed_expression() {
        let err = Expression::new("prefix-$(.first.data.doesntExist)-suffix")
            .evaluate(&values())
            .unwrap_err();
        assert_eq!(err.to_string(), "doesntExist is not found");
    }

    #[test]
    fn test_unterminated_substitution() {
        let err = Expression::new("$( .creds.data.user").evaluate(&values()).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_rooted_expression_accepted() {
        let result = Expression::new("$( $.creds.decodedData.user )")
            .evaluate(&values())
            .unwrap();
        assert_eq!(result, "admin");
    }

    #[test]
    fn test_wildcard_with_multiple_matches_rejected() {
        let err = Expression::new("$( .creds.data.* )").evaluate(&values()).unwrap_err();
        assert!(matches!(err, TemplatedSecretError::PathNotSingular(_)));
    }
}
