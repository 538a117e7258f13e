// ABOUTME: Runtime values of the template script language and their coercion rules
// ABOUTME: Converts between script values and serde_json values at the host boundary

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::ast::FunctionDef;
use super::builtins::Builtin;
use super::error::{Result, ScriptError};
use super::interpreter::Scope;

pub type NativeFn = Rc<dyn Fn(Value, Vec<Value>) -> Result<Value>>;
pub type AsyncNativeFn = Rc<dyn Fn(Value, Vec<Value>) -> LocalBoxFuture<'static, Result<Value>>>;

pub type Array = Rc<RefCell<Vec<Value>>>;
pub type Object = Rc<RefCell<IndexMap<String, Value>>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Array),
    Object(Object),
    Function(Rc<Function>),
}

pub enum Function {
    /// A closure defined by script code.
    Script {
        def: Rc<FunctionDef>,
        scope: Scope,
        /// Captured `this` for arrow functions.
        this: Option<Value>,
    },
    Native {
        name: String,
        call: NativeFn,
    },
    /// Host function returning a future; only callable under `await`.
    AsyncNative {
        name: String,
        call: AsyncNativeFn,
    },
    Builtin(Builtin),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Self::Script { def, .. } => def.name.as_deref().unwrap_or(""),
            Self::Native { name, .. } | Self::AsyncNative { name, .. } => name,
            Self::Builtin(builtin) => builtin.name(),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script { .. } => write!(f, "Function::Script({})", self.name()),
            Self::Native { .. } => write!(f, "Function::Native({})", self.name()),
            Self::AsyncNative { .. } => write!(f, "Function::AsyncNative({})", self.name()),
            Self::Builtin(builtin) => write!(f, "Function::Builtin({:?})", builtin),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Self::Object(map) => f.debug_map().entries(map.borrow().iter()).finish(),
            Self::Function(function) => write!(f, "{:?}", function),
        }
    }
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: IndexMap<String, Value>) -> Self {
        Self::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn empty_object() -> Self {
        Self::object(IndexMap::new())
    }

    /// Wrap a synchronous host function. It receives the call arguments.
    pub fn function<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + 'static,
    {
        Self::native(name, move |_this, args| f(args))
    }

    /// Wrap an asynchronous host function. Scripts must `await` its result.
    pub fn async_function<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self::Function(Rc::new(Function::AsyncNative {
            name: name.into(),
            call: Rc::new(move |_this, args| f(args).boxed_local()),
        }))
    }

    pub(crate) fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Result<Value> + 'static,
    {
        Self::Function(Rc::new(Function::Native {
            name: name.into(),
            call: Rc::new(f),
        }))
    }

    pub(crate) fn builtin(builtin: Builtin) -> Self {
        Self::Function(Rc::new(Function::Builtin(builtin)))
    }

    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Self::Str(s.clone()),
            JsonValue::Array(items) => Self::array(items.iter().map(Self::from_json).collect()),
            JsonValue::Object(map) => Self::object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// JSON view of the value. Functions and `undefined` are dropped from
    /// objects and become `null` inside arrays. A value that contains itself
    /// converts to `null` as a whole.
    pub fn to_json(&self) -> JsonValue {
        self.try_to_json().unwrap_or(JsonValue::Null)
    }

    /// Like [`Value::to_json`], failing on circular structures.
    pub fn try_to_json(&self) -> Result<JsonValue> {
        self.json_view(&mut Vec::new())
    }

    fn json_view(&self, ancestors: &mut Vec<usize>) -> Result<JsonValue> {
        let json = match self {
            Self::Undefined | Self::Null | Self::Function(_) => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Str(s) => JsonValue::String(s.clone()),
            Self::Array(items) => {
                enter_container(ancestors, Rc::as_ptr(items) as usize)?;
                let converted = items
                    .borrow()
                    .iter()
                    .map(|item| item.json_view(ancestors))
                    .collect::<Result<Vec<_>>>()?;
                ancestors.pop();
                JsonValue::Array(converted)
            }
            Self::Object(map) => {
                enter_container(ancestors, Rc::as_ptr(map) as usize)?;
                let mut converted = serde_json::Map::new();
                for (key, value) in map.borrow().iter() {
                    if !matches!(value, Value::Undefined | Value::Function(_)) {
                        converted.insert(key.clone(), value.json_view(ancestors)?);
                    }
                }
                ancestors.pop();
                JsonValue::Object(converted)
            }
        };
        Ok(json)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Function(_) => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null | Self::Array(_) | Self::Object(_) => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Function(_) => "function",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Str(s) => parse_numeric(s),
            Self::Array(_) => parse_numeric(&self.to_string()),
            Self::Object(_) | Self::Function(_) => f64::NAN,
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==` semantics.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Self::Number(_), Self::Str(_)) | (Self::Str(_), Self::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Self::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Self::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            (Self::Array(_) | Self::Object(_), Self::Number(_) | Self::Str(_))
            | (Self::Number(_) | Self::Str(_), Self::Array(_) | Self::Object(_)) => {
                let (object, primitive) = if matches!(self, Self::Array(_) | Self::Object(_)) {
                    (self, other)
                } else {
                    (other, self)
                };
                Value::Str(object.to_string()).loose_equals(primitive)
            }
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::Str(s) => write!(f, "{}", s),
            Self::Array(items) => {
                let address = Rc::as_ptr(items) as usize;
                // A self-containing array prints as empty where it recurs.
                if JOINING.with(|joining| joining.borrow().contains(&address)) {
                    return Ok(());
                }
                JOINING.with(|joining| joining.borrow_mut().push(address));
                let joined = join_values(&items.borrow(), ",");
                JOINING.with(|joining| joining.borrow_mut().pop());
                write!(f, "{}", joined)
            }
            Self::Object(_) => write!(f, "[object Object]"),
            Self::Function(function) => {
                write!(f, "function {}() {{ [native code] }}", function.name())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Self::from_json(&value)
    }
}

thread_local! {
    static JOINING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn enter_container(ancestors: &mut Vec<usize>, address: usize) -> Result<()> {
    if ancestors.contains(&address) {
        return Err(ScriptError::thrown("Converting circular structure to JSON"));
    }
    ancestors.push(address);
    Ok(())
}

/// Join values the way `Array.prototype.join` does: `undefined` and `null`
/// render as empty strings.
pub fn join_values(items: &[Value], separator: &str) -> String {
    items
        .iter()
        .map(|item| {
            if item.is_nullish() {
                String::new()
            } else {
                item.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(separator)
}

/// Render a number the way script code prints it: integers without a
/// fraction, exponent form outside `[1e-6, 1e21)`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => formatted,
        };
    }
    if n.fract() == 0.0 && abs < 9.0e15 {
        return format!("{}", n as i64);
    }
    format!("{}", n)
}

fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

/// String to number conversion used by `Number(...)` and arithmetic.
pub fn parse_numeric(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16)
            .map(|value| value as f64)
            .unwrap_or(f64::NAN);
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_coercions() {
        assert_eq!(Value::from("  42 ").to_number(), 42.0);
        assert!(Value::from("4x").to_number().is_nan());
        assert_eq!(Value::Null.to_number(), 0.0);
        assert!(!Value::from("").is_truthy());
        assert!(Value::empty_object().is_truthy());
        assert_eq!(Value::array(vec![1.0.into(), Value::Null, "a".into()]).to_string(), "1,,a");
    }

    #[test]
    fn test_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::from("1").loose_equals(&Value::Number(1.0)));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));

        let object = Value::empty_object();
        assert!(object.strict_equals(&object.clone()));
        assert!(!object.strict_equals(&Value::empty_object()));
    }

    #[test]
    fn test_json_boundary() {
        let data = json!({"user": {"name": "Ada", "tags": ["a", 1, null]}, "n": 2.5});
        let value = Value::from_json(&data);
        assert_eq!(value.to_json(), data);

        let mut entries = IndexMap::new();
        entries.insert("skip".to_string(), Value::Undefined);
        entries.insert("keep".to_string(), Value::Number(1.0));
        assert_eq!(Value::object(entries).to_json(), json!({"keep": 1}));
    }

    #[test]
    fn test_circular_values() {
        let items = Value::array(vec![1.0.into()]);
        if let Value::Array(inner) = &items {
            inner.borrow_mut().push(items.clone());
        }
        assert_eq!(items.to_string(), "1,");
        assert_eq!(
            items.try_to_json().unwrap_err().message(),
            "Converting circular structure to JSON"
        );
        assert_eq!(items.to_json(), JsonValue::Null);

        let shared = Value::array(vec![2.0.into()]);
        let twice = Value::array(vec![shared.clone(), shared]);
        assert_eq!(twice.to_string(), "2,2");
        assert_eq!(twice.to_json(), json!([[2], [2]]));
    }
}
