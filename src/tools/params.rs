//! Declared parameter schema and the schema-to-value coercion table.
//!
//! Models send loosely typed arguments ("3.14" for a number, "1,2,3" for a
//! vector, "Cube" for an enum). Every declared parameter is coerced into a
//! tagged [`ParamValue`] before a call is queued, so tool bodies only ever
//! see values of their declared type.

use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Resolved parameter mapping handed to a tool body.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Semantic type tag of a declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    /// Fixed-width numeric vector (2 for xy, 3 for xyz, 4 for xyzw/rgba).
    Vector { dims: usize },
    /// One of a closed set of names, matched case-insensitively.
    Enum { variants: Vec<String> },
    /// Arbitrary structured JSON value.
    Json,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::Vector { dims } => write!(f, "vector{dims}"),
            Self::Enum { variants } => write!(f, "one of [{}]", variants.join(", ")),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Tagged parameter value after coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(String),
    Vector(Vec<f64>),
    Enum(String),
    Json(Value),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Plain JSON rendering, used for tool-result feedback and scripts.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => json!(n),
            Self::Number(n) => json!(n),
            Self::Str(s) | Self::Enum(s) => Value::String(s.clone()),
            Self::Vector(items) => json!(items),
            Self::Json(v) => v.clone(),
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            default,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// JSON-schema fragment for this parameter.
    pub fn json_schema(&self) -> Value {
        let mut schema = match &self.param_type {
            ParamType::String => json!({ "type": "string" }),
            ParamType::Integer => json!({ "type": "integer" }),
            ParamType::Number => json!({ "type": "number" }),
            ParamType::Boolean => json!({ "type": "boolean" }),
            ParamType::Vector { dims } => json!({
                "type": "array",
                "items": { "type": "number" },
                "minItems": dims,
                "maxItems": dims
            }),
            ParamType::Enum { variants } => json!({ "type": "string", "enum": variants }),
            ParamType::Json => json!({}),
        };
        if let Value::Object(map) = &mut schema {
            if !self.description.is_empty() {
                map.insert("description".into(), Value::String(self.description.clone()));
            }
            if let Some(default) = &self.default {
                map.insert("default".into(), default.clone());
            }
        }
        schema
    }
}

/// JSON-schema object describing an ordered parameter list.
pub fn parameters_schema(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for spec in params {
        properties.insert(spec.name.clone(), spec.json_schema());
        if spec.required {
            required.push(Value::String(spec.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

/// Resolve raw call arguments against a declared parameter list.
///
/// Declared parameters are coerced, defaulted, or reported missing. Keys the
/// declaration does not mention are passed through as [`ParamValue::Json`].
pub fn resolve_params(
    tool: &str,
    specs: &[ParamSpec],
    raw: &Map<String, Value>,
) -> Result<ParamMap, ToolError> {
    let mut resolved = ParamMap::new();
    for spec in specs {
        match raw.get(&spec.name).filter(|value| !value.is_null()) {
            Some(value) => {
                resolved.insert(spec.name.clone(), coerce(&spec.name, &spec.param_type, value)?);
            }
            None if spec.required => {
                return Err(ToolError::MissingParameter {
                    tool: tool.to_string(),
                    param: spec.name.clone(),
                });
            }
            None => {
                if let Some(default) = &spec.default {
                    resolved.insert(
                        spec.name.clone(),
                        coerce(&spec.name, &spec.param_type, default)?,
                    );
                }
            }
        }
    }
    for (key, value) in raw {
        if !resolved.contains_key(key) && !specs.iter().any(|spec| &spec.name == key) {
            resolved.insert(key.clone(), ParamValue::Json(value.clone()));
        }
    }
    Ok(resolved)
}

/// Parse the serialized argument string a model attached to a tool call.
pub fn parse_arguments(arguments: &str) -> Result<Map<String, Value>, ToolError> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
    }
}

/// Coerce one raw value into the declared semantic type.
pub fn coerce(param: &str, param_type: &ParamType, value: &Value) -> Result<ParamValue, ToolError> {
    let invalid = || ToolError::InvalidParameter {
        param: param.to_string(),
        expected: param_type.to_string(),
        found: preview(value),
    };
    match param_type {
        ParamType::String => match value {
            Value::String(s) => Ok(ParamValue::Str(s.clone())),
            Value::Number(n) => Ok(ParamValue::Str(n.to_string())),
            Value::Bool(b) => Ok(ParamValue::Str(b.to_string())),
            _ => Err(invalid()),
        },
        ParamType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(ParamValue::Int)
                .ok_or_else(invalid),
            Value::String(s) => s.trim().parse::<i64>().map(ParamValue::Int).map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        ParamType::Number => match value {
            Value::Number(n) => n.as_f64().map(ParamValue::Number).ok_or_else(invalid),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(ParamValue::Number)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        },
        ParamType::Boolean => match value {
            Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(ParamValue::Bool(true)),
                "false" | "no" | "0" => Ok(ParamValue::Bool(false)),
                _ => Err(invalid()),
            },
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(ParamValue::Bool(false)),
                Some(1) => Ok(ParamValue::Bool(true)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        },
        ParamType::Vector { dims } => {
            let components = vector_components(value).ok_or_else(invalid)?;
            if components.len() != *dims {
                return Err(invalid());
            }
            Ok(ParamValue::Vector(components))
        }
        ParamType::Enum { variants } => {
            let Value::String(name) = value else {
                return Err(invalid());
            };
            variants
                .iter()
                .find(|variant| variant.eq_ignore_ascii_case(name.trim()))
                .map(|variant| ParamValue::Enum(variant.clone()))
                .ok_or_else(invalid)
        }
        ParamType::Json => match value {
            // Structured values sometimes arrive double-encoded.
            Value::String(s) if looks_like_json(s) => serde_json::from_str(s)
                .map(ParamValue::Json)
                .or_else(|_| Ok(ParamValue::Json(value.clone()))),
            other => Ok(ParamValue::Json(other.clone())),
        },
    }
}

/// Accepts `[1,2,3]`, `{"x":1,"y":2,"z":3}`, `"1,2,3"`, `"(1, 2, 3)"` and `"1 2 3"`.
fn vector_components(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Array(items) => items.iter().map(number_like).collect(),
        Value::Object(map) => {
            let mut out = Vec::new();
            for key in ["x", "y", "z", "w"] {
                match map.get(key) {
                    Some(v) => out.push(number_like(v)?),
                    None => break,
                }
            }
            (out.len() == map.len()).then_some(out)
        }
        Value::String(s) => {
            let inner = s
                .trim()
                .trim_start_matches(['(', '['])
                .trim_end_matches([')', ']']);
            let parts: Vec<&str> = if inner.contains(',') {
                inner.split(',').collect()
            } else {
                inner.split_whitespace().collect()
            };
            parts
                .iter()
                .map(|part| part.trim().parse::<f64>().ok().filter(|f| f.is_finite()))
                .collect()
        }
        _ => None,
    }
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn looks_like_json(s: &str) -> bool {
    let t = s.trim_start();
    t.starts_with('{') || t.starts_with('[')
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn preview(value: &Value) -> String {
    crate::textutil::clip_chars(&value.to_string(), 60, "...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn numeric_string_coerces_to_number() {
        let specs = [ParamSpec::required("size", ParamType::Number)];
        let out = resolve_params("scale", &specs, &raw(json!({ "size": "3.14" }))).unwrap();
        assert_eq!(out["size"], ParamValue::Number(3.14));
    }

    #[test]
    fn missing_required_parameter_is_reported() {
        let specs = [ParamSpec::required("size", ParamType::Number)];
        let err = resolve_params("scale", &specs, &Map::new()).unwrap_err();
        assert_eq!(
            err,
            ToolError::MissingParameter {
                tool: "scale".into(),
                param: "size".into()
            }
        );
    }

    #[test]
    fn optional_parameter_falls_back_to_default() {
        let specs = [ParamSpec::optional(
            "count",
            ParamType::Integer,
            Some(json!(10)),
        )];
        let out = resolve_params("spawn", &specs, &Map::new()).unwrap();
        assert_eq!(out["count"], ParamValue::Int(10));
    }

    #[test]
    fn optional_without_default_is_absent() {
        let specs = [ParamSpec::optional("label", ParamType::String, None)];
        let out = resolve_params("spawn", &specs, &Map::new()).unwrap();
        assert!(!out.contains_key("label"));
    }

    #[test]
    fn enum_matches_case_insensitively() {
        let kind = ParamType::Enum {
            variants: vec!["Cube".into(), "Sphere".into()],
        };
        assert_eq!(
            coerce("kind", &kind, &json!("cube")).unwrap(),
            ParamValue::Enum("Cube".into())
        );
        assert!(coerce("kind", &kind, &json!("cone")).is_err());
    }

    #[test]
    fn vectors_parse_from_delimited_strings_arrays_and_objects() {
        let v3 = ParamType::Vector { dims: 3 };
        let expected = ParamValue::Vector(vec![1.0, 2.5, -3.0]);
        assert_eq!(coerce("p", &v3, &json!("1, 2.5, -3")).unwrap(), expected);
        assert_eq!(coerce("p", &v3, &json!("(1,2.5,-3)")).unwrap(), expected);
        assert_eq!(coerce("p", &v3, &json!("1 2.5 -3")).unwrap(), expected);
        assert_eq!(coerce("p", &v3, &json!([1, "2.5", -3])).unwrap(), expected);
        assert_eq!(
            coerce("p", &v3, &json!({"x": 1, "y": 2.5, "z": -3})).unwrap(),
            expected
        );
        assert!(coerce("p", &v3, &json!("1,2")).is_err());
    }

    #[test]
    fn integer_rejects_fractional_values() {
        assert!(coerce("n", &ParamType::Integer, &json!(2.5)).is_err());
        assert_eq!(
            coerce("n", &ParamType::Integer, &json!(" 7 ")).unwrap(),
            ParamValue::Int(7)
        );
    }

    #[test]
    fn boolean_accepts_common_spellings() {
        assert_eq!(
            coerce("b", &ParamType::Boolean, &json!("YES")).unwrap(),
            ParamValue::Bool(true)
        );
        assert_eq!(
            coerce("b", &ParamType::Boolean, &json!(0)).unwrap(),
            ParamValue::Bool(false)
        );
    }

    #[test]
    fn json_parameter_decodes_double_encoded_objects() {
        let out = coerce("cfg", &ParamType::Json, &json!("{\"a\":1}")).unwrap();
        assert_eq!(out, ParamValue::Json(json!({"a": 1})));
    }

    #[test]
    fn undeclared_arguments_pass_through() {
        let out = resolve_params("t", &[], &raw(json!({ "extra": [1, 2] }))).unwrap();
        assert_eq!(out["extra"], ParamValue::Json(json!([1, 2])));
    }

    #[test]
    fn invalid_value_reports_expected_type() {
        let err = coerce("size", &ParamType::Number, &json!("big")).unwrap_err();
        assert!(err.to_string().contains("expected number"), "got: {err}");
        assert!(err.is_validation());
    }

    #[test]
    fn parse_arguments_requires_an_object() {
        assert!(parse_arguments("").unwrap().is_empty());
        assert!(parse_arguments("[1]").is_err());
        assert!(parse_arguments("{oops").is_err());
        assert_eq!(parse_arguments("{\"a\":1}").unwrap()["a"], json!(1));
    }

    #[test]
    fn schema_lists_required_parameters() {
        let schema = parameters_schema(&[
            ParamSpec::required("path", ParamType::String).describe("file path"),
            ParamSpec::optional("limit", ParamType::Integer, Some(json!(5))),
        ]);
        assert_eq!(schema["required"], json!(["path"]));
        assert_eq!(schema["properties"]["path"]["description"], "file path");
        assert_eq!(schema["properties"]["limit"]["default"], 5);
    }
}
