//! Request parameters.
//!
//! # Design
//! `Params` is backed by a `BTreeMap`, so two maps with the same content
//! iterate, serialize and hash identically no matter what order the caller
//! inserted keys in. The canonical form is compact JSON with sorted keys. It
//! is the input to fingerprint hashing and the body of non-GET requests.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use url::Url;

use crate::error::ApiError;

/// A single parameter value.
///
/// Non-finite floats have no JSON number form. They serialize as
/// `{"$float": "NaN" | "inf" | "-inf"}`, which no other value produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl ParamValue {
    /// Scalar rendering used in query strings. `None` for lists.
    fn as_query_value(&self) -> Option<String> {
        match self {
            ParamValue::String(s) => Some(s.clone()),
            ParamValue::Int(i) => Some(i.to_string()),
            ParamValue::Float(f) => Some(f.to_string()),
            ParamValue::Bool(b) => Some(b.to_string()),
            ParamValue::List(_) => None,
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParamValue::String(s) => serializer.serialize_str(s),
            ParamValue::Int(i) => serializer.serialize_i64(*i),
            ParamValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            ParamValue::Float(f) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$float", &f.to_string())?;
                map.end()
            }
            ParamValue::Bool(b) => serializer.serialize_bool(*b),
            ParamValue::List(items) => items.serialize(serializer),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        ParamValue::List(v)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(v: Vec<&str>) -> Self {
        ParamValue::List(v.into_iter().map(str::to_string).collect())
    }
}

/// Order-independent parameter map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Compact JSON with keys in sorted order.
    pub fn canonical_json(&self) -> String {
        // A map of strings, numbers, bools and string lists always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| String::from("{}"))
    }

    /// JSON request body, `None` when there are no parameters.
    pub fn to_json_body(&self) -> Result<Option<Vec<u8>>, ApiError> {
        if self.is_empty() {
            return Ok(None);
        }
        serde_json::to_vec(&self.0)
            .map(Some)
            .map_err(|e| ApiError::Serialization(e.to_string()))
    }

    /// Append the parameters to `url`'s query, keeping existing items.
    ///
    /// Lists are expanded into repeated `key[]=value` pairs.
    pub fn append_to_query(&self, url: &mut Url) {
        if self.is_empty() {
            return;
        }
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &self.0 {
            match value {
                ParamValue::List(items) => {
                    let list_key = format!("{key}[]");
                    for item in items {
                        pairs.append_pair(&list_key, item);
                    }
                }
                scalar => {
                    if let Some(rendered) = scalar.as_query_value() {
                        pairs.append_pair(key, &rendered);
                    }
                }
            }
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Params(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Params
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl TryFrom<serde_json::Value> for Params {
    type Error = ApiError;

    /// Convert a JSON object. Nested objects and nulls are rejected; array
    /// elements are rendered as strings.
    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        let Value::Object(map) = value else {
            return Err(ApiError::Serialization(
                "parameters must be a JSON object".to_string(),
            ));
        };
        let mut params = Params::new();
        for (key, value) in map {
            let converted = match value {
                Value::String(s) => ParamValue::String(s),
                Value::Bool(b) => ParamValue::Bool(b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => ParamValue::Int(i),
                    None => ParamValue::Float(n.as_f64().unwrap_or_default()),
                },
                Value::Array(items) => {
                    let mut list = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(s) => list.push(s),
                            Value::Number(n) => list.push(n.to_string()),
                            Value::Bool(b) => list.push(b.to_string()),
                            other => {
                                return Err(ApiError::Serialization(format!(
                                    "unsupported list element for {key}: {other}"
                                )))
                            }
                        }
                    }
                    ParamValue::List(list)
                }
                other => {
                    return Err(ApiError::Serialization(format!(
                        "unsupported value for {key}: {other}"
                    )))
                }
            };
            params.insert(key, converted);
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_ignores_insertion_order() {
        let a = Params::new().with("a", 1).with("b", 2);
        let b = Params::new().with("b", 2).with("a", 1);
        assert_eq!(a.canonical_json(), b.canonical_json());
        assert_eq!(a.canonical_json(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn non_finite_floats_stay_distinct() {
        let rendered: Vec<String> = [f64::NAN, f64::INFINITY, f64::NEG_INFINITY]
            .into_iter()
            .map(|f| Params::new().with("x", f).canonical_json())
            .collect();
        assert_eq!(rendered[0], r#"{"x":{"$float":"NaN"}}"#);
        assert_eq!(rendered[1], r#"{"x":{"$float":"inf"}}"#);
        assert_eq!(rendered[2], r#"{"x":{"$float":"-inf"}}"#);
        assert_ne!(rendered[0], Params::new().with("x", "NaN").canonical_json());
        assert_eq!(Params::new().with("x", 1.5).canonical_json(), r#"{"x":1.5}"#);
    }

    #[test]
    fn empty_params_serialize_to_empty_object_and_no_body() {
        let params = Params::new();
        assert_eq!(params.canonical_json(), "{}");
        assert_eq!(params.to_json_body().unwrap(), None);
    }

    #[test]
    fn query_keeps_existing_items_and_expands_lists() {
        let mut url = Url::parse("http://localhost/movie?apikey=k").unwrap();
        let params = Params::new()
            .with("t", "Hero")
            .with("page", 2)
            .with("genre", vec!["Drama", "Crime"]);
        params.append_to_query(&mut url);
        assert_eq!(
            url.as_str(),
            "http://localhost/movie?apikey=k&genre%5B%5D=Drama&genre%5B%5D=Crime&page=2&t=Hero"
        );
    }

    #[test]
    fn plus_signs_are_percent_encoded_in_queries() {
        let mut url = Url::parse("http://localhost/search").unwrap();
        Params::new().with("q", "a+b").append_to_query(&mut url);
        assert_eq!(url.query(), Some("q=a%2Bb"));
    }

    #[test]
    fn empty_params_leave_url_untouched() {
        let mut url = Url::parse("http://localhost/movies").unwrap();
        Params::new().append_to_query(&mut url);
        assert_eq!(url.as_str(), "http://localhost/movies");
    }

    #[test]
    fn converts_from_json_object() {
        let value = serde_json::json!({"t": "Hero", "y": 2002, "full": true, "tags": ["a", 1]});
        let params = Params::try_from(value).unwrap();
        assert_eq!(params.get("t"), Some(&ParamValue::String("Hero".into())));
        assert_eq!(params.get("y"), Some(&ParamValue::Int(2002)));
        assert_eq!(params.get("full"), Some(&ParamValue::Bool(true)));
        assert_eq!(
            params.get("tags"),
            Some(&ParamValue::List(vec!["a".into(), "1".into()]))
        );
    }

    #[test]
    fn rejects_non_object_json() {
        let err = Params::try_from(serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, ApiError::Serialization(_)));
        let err = Params::try_from(serde_json::json!({"nested": {"a": 1}})).unwrap_err();
        assert!(matches!(err, ApiError::Serialization(_)));
    }
}
