// ABOUTME: Data context a template renders against, exposed to scripts as `this`
// ABOUTME: Holds plain values and host functions, and forks a fresh copy for every render

use std::future::Future;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::error::{Result, TemplateError};
use crate::script::{self, Value};

#[derive(Debug, Clone, Default)]
pub struct DataContext {
    fields: IndexMap<String, Value>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let JsonValue::Object(map) = json else {
            return Err(TemplateError::InvalidData(format!(
                "expected a JSON object, got {}",
                json_kind(json)
            )));
        };
        Ok(Self {
            fields: map
                .iter()
                .map(|(key, value)| (key.clone(), Value::from_json(value)))
                .collect(),
        })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Expose a synchronous host function to scripts.
    pub fn insert_function<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> script::Result<Value> + 'static,
    {
        let name = name.into();
        self.fields.insert(name.clone(), Value::function(name, f));
        self
    }

    /// Expose an asynchronous host function. Scripts must `await` it and
    /// can only do so from `render_async`.
    pub fn insert_async_function<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = script::Result<Value>> + 'static,
    {
        let name = name.into();
        self.fields.insert(name.clone(), Value::async_function(name, f));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON view. Functions are left out.
    pub fn to_json(&self) -> JsonValue {
        Value::object(self.fields.clone()).to_json()
    }

    /// Top-level copy handed to one execution. Nested arrays and objects
    /// stay shared with this context.
    pub(crate) fn fork(&self) -> Value {
        Value::object(self.fields.clone())
    }
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
