//! Declarative assertion evaluation
//!
//! Each assertion is `(expr, operator, expected)`. The expression resolves
//! against the flattened variable map extended with `res.*` accessors; the
//! expected side is interpolated before comparison. Assertions evaluate
//! independently: one failure or evaluation error never skips the rest.

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::collection::AssertionDef;
use crate::scripting::bridge::{json_path, ResponseView};
use crate::vars::interpolate::{interpolate_str, value_to_string};

/// Outcome of a single assertion
#[derive(Debug, Clone, Serialize)]
pub struct AssertionResult {
    pub expr: String,
    pub operator: String,
    pub expected: String,
    pub actual: Option<String>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Evaluate every enabled assertion against the variable map and response.
pub fn evaluate_assertions(
    defs: &[AssertionDef],
    flat: &IndexMap<String, JsonValue>,
    response: Option<&ResponseView>,
) -> Vec<AssertionResult> {
    defs.iter()
        .filter(|def| def.enabled)
        .map(|def| evaluate_one(def, flat, response))
        .collect()
}

fn evaluate_one(
    def: &AssertionDef,
    flat: &IndexMap<String, JsonValue>,
    response: Option<&ResponseView>,
) -> AssertionResult {
    let expected = interpolate_str(&def.value, flat);
    let actual = resolve_expr(&def.expr, flat, response);
    let actual_text = actual.as_ref().map(value_to_string);

    match check(&def.operator, actual.as_ref(), &expected) {
        Ok(passed) => AssertionResult {
            expr: def.expr.clone(),
            operator: def.operator.clone(),
            expected,
            actual: actual_text,
            passed,
            error: None,
        },
        Err(message) => AssertionResult {
            expr: def.expr.clone(),
            operator: def.operator.clone(),
            expected,
            actual: actual_text,
            passed: false,
            error: Some(message),
        },
    }
}

/// Resolve an assertion expression to a value.
///
/// `res.status`, `res.statusText`, `res.responseTime`, `res.headers.<name>`
/// and `res.body[.path]` read from the response; anything else is a
/// variable lookup in the flattened map.
pub fn resolve_expr(
    expr: &str,
    flat: &IndexMap<String, JsonValue>,
    response: Option<&ResponseView>,
) -> Option<JsonValue> {
    let expr = expr.trim();

    if let Some(rest) = expr.strip_prefix("res.") {
        let response = response?;
        return match rest {
            "status" => Some(JsonValue::from(response.status)),
            "statusText" => Some(JsonValue::String(response.status_text.clone())),
            "responseTime" => Some(JsonValue::from(response.elapsed_ms)),
            "body" => Some(
                response
                    .body_json()
                    .unwrap_or_else(|| JsonValue::String(response.body_text.clone())),
            ),
            _ => {
                if let Some(header_name) = rest.strip_prefix("headers.") {
                    return response
                        .header(header_name)
                        .map(|value| JsonValue::String(value.to_string()));
                }
                if let Some(path) = rest.strip_prefix("body.") {
                    return json_path(&response.body_json()?, path).cloned();
                }
                None
            }
        };
    }

    flat.get(expr).cloned()
}

fn check(
    operator: &str,
    actual: Option<&JsonValue>,
    expected: &str,
) -> std::result::Result<bool, String> {
    match operator {
        "eq" => Ok(loose_eq(actual, expected)),
        "neq" => Ok(!loose_eq(actual, expected)),
        "gt" | "gte" | "lt" | "lte" => {
            let left = as_number(actual)
                .ok_or_else(|| format!("actual value is not a number: {:?}", text_of(actual)))?;
            let right = expected
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("expected value is not a number: {expected:?}"))?;
            Ok(match operator {
                "gt" => left > right,
                "gte" => left >= right,
                "lt" => left < right,
                _ => left <= right,
            })
        }
        "in" => Ok(expected
            .split(',')
            .any(|candidate| candidate.trim() == text_of(actual))),
        "notIn" => Ok(!expected
            .split(',')
            .any(|candidate| candidate.trim() == text_of(actual))),
        "contains" => Ok(text_of(actual).contains(expected)),
        "notContains" => Ok(!text_of(actual).contains(expected)),
        "startsWith" => Ok(text_of(actual).starts_with(expected)),
        "endsWith" => Ok(text_of(actual).ends_with(expected)),
        "matches" | "notMatches" => {
            let re = Regex::new(expected).map_err(|e| format!("invalid regex: {e}"))?;
            let matched = re.is_match(&text_of(actual));
            Ok(if operator == "matches" { matched } else { !matched })
        }
        "length" => {
            let length = length_of(actual)
                .ok_or_else(|| "actual value has no length".to_string())?;
            let wanted = expected
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("expected length is not a number: {expected:?}"))?;
            Ok(length == wanted)
        }
        "isNull" => Ok(matches!(actual, Some(JsonValue::Null))),
        "isNotNull" => Ok(matches!(actual, Some(value) if !value.is_null())),
        "isEmpty" => Ok(length_of(actual).map(|len| len == 0).unwrap_or(actual.is_none())),
        "isNotEmpty" => Ok(length_of(actual).map(|len| len > 0).unwrap_or(false)),
        "isTrue" => Ok(is_bool(actual, true)),
        "isFalse" => Ok(is_bool(actual, false)),
        "isNumber" => Ok(as_number(actual).is_some()),
        "isString" => Ok(matches!(actual, Some(JsonValue::String(_)))),
        "isBoolean" => Ok(matches!(actual, Some(JsonValue::Bool(_)))
            || matches!(text_of(actual).as_str(), "true" | "false")),
        "isJson" => Ok(match actual {
            Some(JsonValue::Object(_)) | Some(JsonValue::Array(_)) => true,
            Some(JsonValue::String(s)) => serde_json::from_str::<JsonValue>(s).is_ok(),
            _ => false,
        }),
        other => Err(format!("Unknown operator: {other}")),
    }
}

/// Equality that compares numerically when both sides are numbers and as
/// strings otherwise, so `res.status eq 200` works against a numeric
/// status and `env eq prod` against a string variable.
fn loose_eq(actual: Option<&JsonValue>, expected: &str) -> bool {
    if let (Some(left), Ok(right)) = (as_number(actual), expected.trim().parse::<f64>()) {
        return left == right;
    }
    text_of(actual) == expected
}

fn text_of(actual: Option<&JsonValue>) -> String {
    actual.map(value_to_string).unwrap_or_default()
}

fn as_number(actual: Option<&JsonValue>) -> Option<f64> {
    match actual? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn length_of(actual: Option<&JsonValue>) -> Option<usize> {
    match actual? {
        JsonValue::String(s) => Some(s.chars().count()),
        JsonValue::Array(a) => Some(a.len()),
        JsonValue::Object(o) => Some(o.len()),
        _ => None,
    }
}

fn is_bool(actual: Option<&JsonValue>, wanted: bool) -> bool {
    match actual {
        Some(JsonValue::Bool(b)) => *b == wanted,
        Some(JsonValue::String(s)) => s == if wanted { "true" } else { "false" },
        _ => false,
    }
}
