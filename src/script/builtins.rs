// ABOUTME: Built-in globals and methods available to template scripts
// ABOUTME: Covers string, array and number methods plus Math, JSON, Object and conversion helpers

use std::rc::Rc;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use super::error::{Result, ScriptError};
use super::value::{format_number, join_values, Value};

static TRAILING_LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\r\n|\n|\r|\u{2028}|\u{2029})[\t ]*$").unwrap());

/// Longest string a script may build, in bytes.
pub const MAX_STRING_LENGTH: usize = (1 << 29) - 24;

/// Refuse to build a string of `len` bytes past [`MAX_STRING_LENGTH`].
pub fn check_string_length(len: usize) -> Result<()> {
    if len > MAX_STRING_LENGTH {
        return Err(ScriptError::thrown("Invalid string length"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    // Shared by strings and arrays
    Includes,
    IndexOf,
    Slice,
    Concat,
    ToString,
    // Strings
    ToUpperCase,
    ToLowerCase,
    Trim,
    TrimStart,
    TrimEnd,
    StartsWith,
    EndsWith,
    Substring,
    Split,
    Replace,
    ReplaceAll,
    Repeat,
    PadStart,
    PadEnd,
    CharAt,
    // Arrays
    Push,
    Pop,
    Shift,
    Unshift,
    Join,
    Reverse,
    Map,
    Filter,
    ForEach,
    Find,
    FindIndex,
    Any,
    Every,
    Reduce,
    // Numbers
    ToFixed,
    // Globals
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ObjectAssign,
    ArrayIsArray,
    JsonStringify,
    JsonParse,
    MathFloor,
    MathCeil,
    MathRound,
    MathTrunc,
    MathAbs,
    MathMax,
    MathMin,
    MathPow,
    MathSqrt,
    MathSign,
    StringFn,
    NumberFn,
    BooleanFn,
    ParseInt,
    ParseFloat,
    IsNaN,
    NumberIsInteger,
    NumberIsFinite,
    NumberIsNaN,
    ConsoleLog,
    LineBreakRemover,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Self::Includes => "includes",
            Self::IndexOf => "indexOf",
            Self::Slice => "slice",
            Self::Concat => "concat",
            Self::ToString => "toString",
            Self::ToUpperCase => "toUpperCase",
            Self::ToLowerCase => "toLowerCase",
            Self::Trim => "trim",
            Self::TrimStart => "trimStart",
            Self::TrimEnd => "trimEnd",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Substring => "substring",
            Self::Split => "split",
            Self::Replace => "replace",
            Self::ReplaceAll => "replaceAll",
            Self::Repeat => "repeat",
            Self::PadStart => "padStart",
            Self::PadEnd => "padEnd",
            Self::CharAt => "charAt",
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Shift => "shift",
            Self::Unshift => "unshift",
            Self::Join => "join",
            Self::Reverse => "reverse",
            Self::Map => "map",
            Self::Filter => "filter",
            Self::ForEach => "forEach",
            Self::Find => "find",
            Self::FindIndex => "findIndex",
            Self::Any => "some",
            Self::Every => "every",
            Self::Reduce => "reduce",
            Self::ToFixed => "toFixed",
            Self::ObjectKeys => "keys",
            Self::ObjectValues => "values",
            Self::ObjectEntries => "entries",
            Self::ObjectAssign => "assign",
            Self::ArrayIsArray => "isArray",
            Self::JsonStringify => "stringify",
            Self::JsonParse => "parse",
            Self::MathFloor => "floor",
            Self::MathCeil => "ceil",
            Self::MathRound => "round",
            Self::MathTrunc => "trunc",
            Self::MathAbs => "abs",
            Self::MathMax => "max",
            Self::MathMin => "min",
            Self::MathPow => "pow",
            Self::MathSqrt => "sqrt",
            Self::MathSign => "sign",
            Self::StringFn => "String",
            Self::NumberFn => "Number",
            Self::BooleanFn => "Boolean",
            Self::ParseInt => "parseInt",
            Self::ParseFloat => "parseFloat",
            Self::IsNaN | Self::NumberIsNaN => "isNaN",
            Self::NumberIsInteger => "isInteger",
            Self::NumberIsFinite => "isFinite",
            Self::ConsoleLog => "log",
            Self::LineBreakRemover => "lineBreakRemover",
        }
    }

    /// Array methods that call back into script code; the interpreter
    /// runs these itself.
    pub fn takes_callback(self) -> bool {
        matches!(
            self,
            Self::Map
                | Self::Filter
                | Self::ForEach
                | Self::Find
                | Self::FindIndex
                | Self::Any
                | Self::Every
                | Self::Reduce
        )
    }
}

/// Method named `key` on a primitive or array receiver.
pub fn method(receiver: &Value, key: &str) -> Option<Builtin> {
    let builtin = match (receiver, key) {
        (Value::Str(_) | Value::Array(_), "includes") => Builtin::Includes,
        (Value::Str(_) | Value::Array(_), "indexOf") => Builtin::IndexOf,
        (Value::Str(_) | Value::Array(_), "slice") => Builtin::Slice,
        (Value::Str(_) | Value::Array(_), "concat") => Builtin::Concat,
        (Value::Str(_) | Value::Array(_) | Value::Number(_) | Value::Bool(_), "toString") => {
            Builtin::ToString
        }
        (Value::Str(_), "toUpperCase") => Builtin::ToUpperCase,
        (Value::Str(_), "toLowerCase") => Builtin::ToLowerCase,
        (Value::Str(_), "trim") => Builtin::Trim,
        (Value::Str(_), "trimStart") => Builtin::TrimStart,
        (Value::Str(_), "trimEnd") => Builtin::TrimEnd,
        (Value::Str(_), "startsWith") => Builtin::StartsWith,
        (Value::Str(_), "endsWith") => Builtin::EndsWith,
        (Value::Str(_), "substring") => Builtin::Substring,
        (Value::Str(_), "split") => Builtin::Split,
        (Value::Str(_), "replace") => Builtin::Replace,
        (Value::Str(_), "replaceAll") => Builtin::ReplaceAll,
        (Value::Str(_), "repeat") => Builtin::Repeat,
        (Value::Str(_), "padStart") => Builtin::PadStart,
        (Value::Str(_), "padEnd") => Builtin::PadEnd,
        (Value::Str(_), "charAt") => Builtin::CharAt,
        (Value::Array(_), "push") => Builtin::Push,
        (Value::Array(_), "pop") => Builtin::Pop,
        (Value::Array(_), "shift") => Builtin::Shift,
        (Value::Array(_), "unshift") => Builtin::Unshift,
        (Value::Array(_), "join") => Builtin::Join,
        (Value::Array(_), "reverse") => Builtin::Reverse,
        (Value::Array(_), "map") => Builtin::Map,
        (Value::Array(_), "filter") => Builtin::Filter,
        (Value::Array(_), "forEach") => Builtin::ForEach,
        (Value::Array(_), "find") => Builtin::Find,
        (Value::Array(_), "findIndex") => Builtin::FindIndex,
        (Value::Array(_), "some") => Builtin::Any,
        (Value::Array(_), "every") => Builtin::Every,
        (Value::Array(_), "reduce") => Builtin::Reduce,
        (Value::Number(_), "toFixed") => Builtin::ToFixed,
        _ => return None,
    };
    Some(builtin)
}

/// Property of a builtin function object, such as `Number.MAX_SAFE_INTEGER`.
pub fn static_member(builtin: Builtin, key: &str) -> Option<Value> {
    if builtin != Builtin::NumberFn {
        return None;
    }
    let value = match key {
        "MAX_SAFE_INTEGER" => Value::Number(9_007_199_254_740_991.0),
        "MIN_SAFE_INTEGER" => Value::Number(-9_007_199_254_740_991.0),
        "EPSILON" => Value::Number(f64::EPSILON),
        "MAX_VALUE" => Value::Number(f64::MAX),
        "MIN_VALUE" => Value::Number(5e-324),
        "POSITIVE_INFINITY" => Value::Number(f64::INFINITY),
        "NEGATIVE_INFINITY" => Value::Number(f64::NEG_INFINITY),
        "NaN" => Value::Number(f64::NAN),
        "isInteger" => Value::builtin(Builtin::NumberIsInteger),
        "isFinite" => Value::builtin(Builtin::NumberIsFinite),
        "isNaN" => Value::builtin(Builtin::NumberIsNaN),
        "parseInt" => Value::builtin(Builtin::ParseInt),
        "parseFloat" => Value::builtin(Builtin::ParseFloat),
        _ => return None,
    };
    Some(value)
}

/// Global bindings consulted after lexical scopes and the data context.
pub fn globals() -> IndexMap<String, Value> {
    fn namespace(members: &[Builtin]) -> Value {
        Value::object(
            members
                .iter()
                .map(|builtin| (builtin.name().to_string(), Value::builtin(*builtin)))
                .collect(),
        )
    }

    let mut globals = IndexMap::new();

    let math = namespace(&[
        Builtin::MathFloor,
        Builtin::MathCeil,
        Builtin::MathRound,
        Builtin::MathTrunc,
        Builtin::MathAbs,
        Builtin::MathMax,
        Builtin::MathMin,
        Builtin::MathPow,
        Builtin::MathSqrt,
        Builtin::MathSign,
    ]);
    if let Value::Object(map) = &math {
        map.borrow_mut()
            .insert("PI".to_string(), Value::Number(std::f64::consts::PI));
    }
    globals.insert("Math".to_string(), math);
    globals.insert(
        "JSON".to_string(),
        namespace(&[Builtin::JsonStringify, Builtin::JsonParse]),
    );
    globals.insert(
        "Object".to_string(),
        namespace(&[
            Builtin::ObjectKeys,
            Builtin::ObjectValues,
            Builtin::ObjectEntries,
            Builtin::ObjectAssign,
        ]),
    );
    globals.insert("Array".to_string(), namespace(&[Builtin::ArrayIsArray]));
    globals.insert("console".to_string(), namespace(&[Builtin::ConsoleLog]));

    for builtin in [
        Builtin::StringFn,
        Builtin::NumberFn,
        Builtin::BooleanFn,
        Builtin::ParseInt,
        Builtin::ParseFloat,
        Builtin::IsNaN,
        Builtin::LineBreakRemover,
    ] {
        globals.insert(builtin.name().to_string(), Value::builtin(builtin));
    }
    globals.insert("NaN".to_string(), Value::Number(f64::NAN));
    globals.insert("Infinity".to_string(), Value::Number(f64::INFINITY));

    globals
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn arg_string(args: &[Value], index: usize) -> String {
    arg(args, index).to_string()
}

/// Integer argument, `default` when missing or undefined.
fn arg_integer(args: &[Value], index: usize, default: i64) -> i64 {
    match args.get(index) {
        None | Some(Value::Undefined) => default,
        Some(value) => {
            let n = value.to_number();
            if n.is_nan() {
                0
            } else {
                n.trunc() as i64
            }
        }
    }
}

/// Resolve a relative index (negative counts from the end) against `len`.
fn relative_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    if index < 0 {
        (len + index).max(0) as usize
    } else {
        index.min(len) as usize
    }
}

/// Clamp a char position argument to `0..=len`.
fn char_position(chars: &[char], position: i64) -> usize {
    position.clamp(0, chars.len() as i64) as usize
}

fn tail(chars: &[char], from: usize) -> String {
    chars[from..].iter().collect()
}

fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// Expand `$$`, `$&`, `` $` `` and `$'` in a replacement string.
fn expand_replacement(replacement: &str, matched: &str, before: &str, after: &str) -> String {
    let mut out = String::new();
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let expansion = match chars.peek() {
            Some('$') => "$",
            Some('&') => matched,
            Some('`') => before,
            Some('\'') => after,
            _ => {
                out.push('$');
                continue;
            }
        };
        out.push_str(expansion);
        chars.next();
    }
    out
}

/// Integer and fraction digits of `n` in `radix`. Fractions stop once
/// exact or after 52 digits.
fn number_to_radix(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() {
        return format_number(n);
    }
    let base = f64::from(radix);
    let digit = |d: f64| std::char::from_digit(d as u32, radix).unwrap_or('0');

    let mut integer = n.abs().trunc();
    let mut fraction = n.abs() - integer;
    let mut digits = Vec::new();
    while integer >= 1.0 {
        digits.push(digit(integer % base));
        integer = (integer / base).trunc();
    }
    if digits.is_empty() {
        digits.push('0');
    }
    if n < 0.0 {
        digits.push('-');
    }
    let mut out: String = digits.into_iter().rev().collect();

    if fraction > 0.0 {
        out.push('.');
        for _ in 0..52 {
            fraction *= base;
            let d = fraction.trunc();
            out.push(digit(d));
            fraction -= d;
            if fraction == 0.0 {
                break;
            }
        }
    }
    out
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

/// Call a builtin that needs no script callbacks.
pub fn call(builtin: Builtin, this: &Value, args: &[Value]) -> Result<Value> {
    match this {
        Value::Str(s) => {
            if let Some(result) = call_string(builtin, s, args)? {
                return Ok(result);
            }
        }
        Value::Array(_) => {
            if let Some(result) = call_array(builtin, this, args)? {
                return Ok(result);
            }
        }
        _ => {}
    }

    let result = match builtin {
        Builtin::ToString => match (this, args.first()) {
            (Value::Number(n), Some(radix)) if !matches!(radix, Value::Undefined) => {
                let radix = radix.to_number().trunc();
                if !(2.0..=36.0).contains(&radix) {
                    return Err(ScriptError::thrown(
                        "toString() radix must be between 2 and 36",
                    ));
                }
                Value::Str(number_to_radix(*n, radix as u32))
            }
            _ => Value::Str(this.to_string()),
        },
        Builtin::ToFixed => {
            let digits = arg_integer(args, 0, 0).clamp(0, 100) as usize;
            Value::Str(format!("{:.*}", digits, this.to_number()))
        }
        Builtin::ObjectKeys => Value::array(
            own_entries(&arg(args, 0))
                .into_iter()
                .map(|(key, _)| Value::Str(key))
                .collect(),
        ),
        Builtin::ObjectValues => Value::array(
            own_entries(&arg(args, 0))
                .into_iter()
                .map(|(_, value)| value)
                .collect(),
        ),
        Builtin::ObjectEntries => Value::array(
            own_entries(&arg(args, 0))
                .into_iter()
                .map(|(key, value)| Value::array(vec![Value::Str(key), value]))
                .collect(),
        ),
        Builtin::ObjectAssign => {
            let target = arg(args, 0);
            let Value::Object(map) = &target else {
                return Err(ScriptError::thrown(
                    "Cannot convert undefined or null to object",
                ));
            };
            for source in args.iter().skip(1) {
                for (key, value) in own_entries(source) {
                    map.borrow_mut().insert(key, value);
                }
            }
            target
        }
        Builtin::ArrayIsArray => Value::Bool(matches!(arg(args, 0), Value::Array(_))),
        Builtin::JsonStringify => json_stringify(args)?,
        Builtin::JsonParse => {
            let text = arg_string(args, 0);
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| ScriptError::thrown(format!("Unexpected token in JSON: {}", e)))?;
            Value::from_json(&json)
        }
        Builtin::MathFloor => Value::Number(arg(args, 0).to_number().floor()),
        Builtin::MathCeil => Value::Number(arg(args, 0).to_number().ceil()),
        Builtin::MathRound => Value::Number((arg(args, 0).to_number() + 0.5).floor()),
        Builtin::MathTrunc => Value::Number(arg(args, 0).to_number().trunc()),
        Builtin::MathAbs => Value::Number(arg(args, 0).to_number().abs()),
        Builtin::MathSqrt => Value::Number(arg(args, 0).to_number().sqrt()),
        Builtin::MathSign => {
            let n = arg(args, 0).to_number();
            Value::Number(if n == 0.0 || n.is_nan() { n } else { n.signum() })
        }
        Builtin::MathPow => {
            Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number()))
        }
        Builtin::MathMax => Value::Number(args.iter().map(Value::to_number).fold(
            f64::NEG_INFINITY,
            |acc, n| if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.max(n) },
        )),
        Builtin::MathMin => Value::Number(args.iter().map(Value::to_number).fold(
            f64::INFINITY,
            |acc, n| if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.min(n) },
        )),
        Builtin::StringFn => Value::Str(args.first().map(Value::to_string).unwrap_or_default()),
        Builtin::NumberFn => Value::Number(args.first().map_or(0.0, Value::to_number)),
        Builtin::BooleanFn => Value::Bool(arg(args, 0).is_truthy()),
        Builtin::ParseInt => Value::Number(parse_int(&arg_string(args, 0), arg_integer(args, 1, 0))),
        Builtin::ParseFloat => Value::Number(parse_float(&arg_string(args, 0))),
        Builtin::IsNaN => Value::Bool(arg(args, 0).to_number().is_nan()),
        Builtin::NumberIsInteger => Value::Bool(
            matches!(arg(args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0),
        ),
        Builtin::NumberIsFinite => {
            Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite()))
        }
        Builtin::NumberIsNaN => Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_nan())),
        Builtin::ConsoleLog => {
            let line = args
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            tracing::info!(target: "vemtl::console", "{}", line);
            Value::Undefined
        }
        Builtin::LineBreakRemover => line_break_remover(&arg(args, 0))?,
        other => {
            return Err(ScriptError::thrown(format!(
                "{}.{} is not a function",
                this.type_of(),
                other.name()
            )))
        }
    };
    Ok(result)
}

fn call_string(builtin: Builtin, s: &str, args: &[Value]) -> Result<Option<Value>> {
    let chars: Vec<char> = s.chars().collect();
    let result = match builtin {
        Builtin::ToUpperCase => Value::Str(s.to_uppercase()),
        Builtin::ToLowerCase => Value::Str(s.to_lowercase()),
        Builtin::Trim => Value::Str(s.trim().to_string()),
        Builtin::TrimStart => Value::Str(s.trim_start().to_string()),
        Builtin::TrimEnd => Value::Str(s.trim_end().to_string()),
        Builtin::Includes => {
            let from = char_position(&chars, arg_integer(args, 1, 0));
            Value::Bool(tail(&chars, from).contains(&arg_string(args, 0)))
        }
        Builtin::StartsWith => {
            let from = char_position(&chars, arg_integer(args, 1, 0));
            Value::Bool(tail(&chars, from).starts_with(&arg_string(args, 0)))
        }
        Builtin::EndsWith => {
            let end = char_position(&chars, arg_integer(args, 1, chars.len() as i64));
            let head: String = chars[..end].iter().collect();
            Value::Bool(head.ends_with(&arg_string(args, 0)))
        }
        Builtin::IndexOf => {
            let needle = arg_string(args, 0);
            let from = char_position(&chars, arg_integer(args, 1, 0));
            let rest = tail(&chars, from);
            Value::Number(match rest.find(&needle) {
                Some(byte_index) => (from + rest[..byte_index].chars().count()) as f64,
                None => -1.0,
            })
        }
        Builtin::Slice => {
            let start = relative_index(arg_integer(args, 0, 0), chars.len());
            let end = relative_index(arg_integer(args, 1, chars.len() as i64), chars.len());
            Value::Str(chars.get(start..end.max(start)).unwrap_or_default().iter().collect())
        }
        Builtin::Substring => {
            let clamp = |n: i64| n.clamp(0, chars.len() as i64) as usize;
            let a = clamp(arg_integer(args, 0, 0));
            let b = clamp(arg_integer(args, 1, chars.len() as i64));
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            Value::Str(chars[start..end].iter().collect())
        }
        Builtin::Split => {
            let limit = match args.get(1) {
                None | Some(Value::Undefined) => u32::MAX as usize,
                Some(value) => to_uint32(value.to_number()) as usize,
            };
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::Str(s.to_string())],
                Some(separator) => {
                    let separator = separator.to_string();
                    if separator.is_empty() {
                        chars
                            .iter()
                            .take(limit)
                            .map(|c| Value::Str(c.to_string()))
                            .collect()
                    } else {
                        s.split(separator.as_str())
                            .take(limit)
                            .map(|part| Value::Str(part.to_string()))
                            .collect()
                    }
                }
            };
            Value::array(parts.into_iter().take(limit).collect())
        }
        Builtin::Replace | Builtin::ReplaceAll => {
            if matches!(args.get(1), Some(Value::Function(_))) {
                return Err(ScriptError::thrown(format!(
                    "{} does not support a replacer function",
                    builtin.name()
                )));
            }
            let needle = arg_string(args, 0);
            let replacement = arg_string(args, 1);
            let mut out = String::new();
            let mut last = 0;
            for (index, matched) in s.match_indices(needle.as_str()) {
                out.push_str(&s[last..index]);
                let after = &s[index + matched.len()..];
                let expanded = expand_replacement(&replacement, matched, &s[..index], after);
                check_string_length(out.len() + expanded.len() + after.len())?;
                out.push_str(&expanded);
                last = index + matched.len();
                if builtin == Builtin::Replace {
                    break;
                }
            }
            out.push_str(&s[last..]);
            Value::Str(out)
        }
        Builtin::Repeat => {
            let count = match args.first() {
                None | Some(Value::Undefined) => 0.0,
                Some(value) => value.to_number(),
            };
            let count = if count.is_nan() { 0.0 } else { count.trunc() };
            if count < 0.0 || count.is_infinite() {
                return Err(ScriptError::thrown(format!(
                    "Invalid count value: {}",
                    format_number(count)
                )));
            }
            if !s.is_empty() {
                check_string_length((s.len() as f64 * count).min(usize::MAX as f64) as usize)?;
            }
            Value::Str(s.repeat(count as usize))
        }
        Builtin::PadStart | Builtin::PadEnd => {
            let target = arg_integer(args, 0, 0).max(0) as usize;
            let fill = match args.get(1) {
                None | Some(Value::Undefined) => " ".to_string(),
                Some(value) => value.to_string(),
            };
            if target <= chars.len() || fill.is_empty() {
                Value::Str(s.to_string())
            } else {
                check_string_length(
                    (target - chars.len())
                        .saturating_mul(fill.len())
                        .saturating_add(s.len()),
                )?;
                let padding: String = fill.chars().cycle().take(target - chars.len()).collect();
                if builtin == Builtin::PadStart {
                    Value::Str(format!("{}{}", padding, s))
                } else {
                    Value::Str(format!("{}{}", s, padding))
                }
            }
        }
        Builtin::CharAt => {
            let index = arg_integer(args, 0, 0);
            Value::Str(
                usize::try_from(index)
                    .ok()
                    .and_then(|i| chars.get(i))
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            )
        }
        Builtin::Concat => {
            let mut joined = s.to_string();
            for value in args {
                let part = value.to_string();
                check_string_length(joined.len() + part.len())?;
                joined.push_str(&part);
            }
            Value::Str(joined)
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn call_array(builtin: Builtin, this: &Value, args: &[Value]) -> Result<Option<Value>> {
    let Value::Array(items) = this else {
        return Ok(None);
    };
    let result = match builtin {
        Builtin::Push => {
            let mut items = items.borrow_mut();
            items.extend(args.iter().cloned());
            Value::Number(items.len() as f64)
        }
        Builtin::Pop => items.borrow_mut().pop().unwrap_or_default(),
        Builtin::Shift => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }
        }
        Builtin::Unshift => {
            let mut items = items.borrow_mut();
            for (offset, value) in args.iter().enumerate() {
                items.insert(offset, value.clone());
            }
            Value::Number(items.len() as f64)
        }
        Builtin::Join => {
            let separator = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(value) => value.to_string(),
            };
            Value::Str(join_values(&items.borrow(), &separator))
        }
        Builtin::Includes => {
            let needle = arg(args, 0);
            let items = items.borrow();
            let from = relative_index(arg_integer(args, 1, 0), items.len());
            Value::Bool(items[from..].iter().any(|item| same_value_zero(item, &needle)))
        }
        Builtin::IndexOf => {
            let needle = arg(args, 0);
            let items = items.borrow();
            let from = relative_index(arg_integer(args, 1, 0), items.len());
            Value::Number(
                items[from..]
                    .iter()
                    .position(|item| item.strict_equals(&needle))
                    .map_or(-1.0, |index| (from + index) as f64),
            )
        }
        Builtin::Slice => {
            let items = items.borrow();
            let start = relative_index(arg_integer(args, 0, 0), items.len());
            let end = relative_index(arg_integer(args, 1, items.len() as i64), items.len());
            Value::array(items.get(start..end.max(start)).unwrap_or_default().to_vec())
        }
        Builtin::Concat => {
            let mut joined = items.borrow().clone();
            for value in args {
                match value {
                    Value::Array(other) => joined.extend(other.borrow().iter().cloned()),
                    other => joined.push(other.clone()),
                }
            }
            Value::array(joined)
        }
        Builtin::Reverse => {
            items.borrow_mut().reverse();
            this.clone()
        }
        Builtin::ToString => Value::Str(this.to_string()),
        _ => return Ok(None),
    };
    Ok(Some(result))
}

/// Keys and values of an object or array, in order.
pub fn own_entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(map) => map
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(index, value)| (index.to_string(), value.clone()))
            .collect(),
        Value::Str(s) => s
            .chars()
            .enumerate()
            .map(|(index, c)| (index.to_string(), Value::Str(c.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

fn json_stringify(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    if matches!(value, Value::Undefined | Value::Function(_)) {
        return Ok(Value::Undefined);
    }
    if !arg(args, 1).is_nullish() {
        return Err(ScriptError::thrown(
            "JSON.stringify does not support a replacer",
        ));
    }
    let json = value.try_to_json()?;
    let indent = match args.get(2) {
        Some(Value::Number(n)) if *n >= 1.0 => " ".repeat((*n as usize).min(10)),
        Some(Value::Str(s)) => s.chars().take(10).collect(),
        _ => String::new(),
    };

    let text = if indent.is_empty() {
        serde_json::to_string(&json)
    } else {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        serde::Serialize::serialize(&json, &mut serializer)
            .map(|_| String::from_utf8_lossy(&out).into_owned())
    };
    text.map(Value::Str)
        .map_err(|e| ScriptError::thrown(e.to_string()))
}

fn parse_int(text: &str, radix: i64) -> f64 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (radix, digits) = match radix {
        0 | 16 if digits.starts_with("0x") || digits.starts_with("0X") => (16, &digits[2..]),
        0 => (10, digits),
        r if (2..=36).contains(&r) => (r as u32, digits),
        _ => return f64::NAN,
    };

    let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    let magnitude = valid
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, digit| acc * f64::from(radix) + f64::from(digit));
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn parse_float(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exponent = false;
    let bytes = trimmed.as_bytes();
    while end < bytes.len() {
        let c = bytes[end] as char;
        let accept = match c {
            '0'..='9' => true,
            '+' | '-' => end == 0 || matches!(bytes[end - 1], b'e' | b'E'),
            '.' if !seen_dot && !seen_exponent => {
                seen_dot = true;
                true
            }
            'e' | 'E' if !seen_exponent && end > 0 => {
                seen_exponent = true;
                true
            }
            _ => false,
        };
        if !accept {
            break;
        }
        end += 1;
    }

    // Back off a dangling exponent or sign.
    let mut candidate = &trimmed[..end];
    while !candidate.is_empty() {
        if let Ok(value) = candidate.parse::<f64>() {
            return value;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    if trimmed.starts_with("Infinity") {
        return f64::INFINITY;
    }
    f64::NAN
}

/// Build the `removeLastLineBreak` helper bound to the program's output
/// buffer. It strips one trailing line break (plus spaces and tabs) from the
/// second-to-last chunk and does nothing with fewer than two chunks.
fn line_break_remover(buffer: &Value) -> Result<Value> {
    let Value::Array(chunks) = buffer else {
        return Err(ScriptError::thrown(
            "lineBreakRemover expects the output buffer array",
        ));
    };
    let chunks = Rc::clone(chunks);
    Ok(Value::native("removeLastLineBreak", move |_this, _args| {
        let mut chunks = chunks.borrow_mut();
        if chunks.len() < 2 {
            return Ok(Value::Undefined);
        }
        let index = chunks.len() - 2;
        let trimmed = TRAILING_LINE_BREAK
            .replace(&chunks[index].to_string(), "")
            .into_owned();
        chunks[index] = Value::Str(trimmed);
        Ok(Value::Undefined)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::Function;

    fn s(value: &str) -> Value {
        Value::from(value)
    }

    #[test]
    fn test_string_methods() {
        let text = s("  Hello World  ");
        assert_eq!(call(Builtin::Trim, &text, &[]).unwrap().to_string(), "Hello World");
        assert_eq!(
            call(Builtin::Slice, &s("template"), &[Value::Number(-4.0)])
                .unwrap()
                .to_string(),
            "late"
        );
        assert_eq!(
            call(Builtin::PadStart, &s("7"), &[Value::Number(3.0), s("0")])
                .unwrap()
                .to_string(),
            "007"
        );
        assert_eq!(
            call(Builtin::Split, &s("a,b,c"), &[s(",")]).unwrap().to_string(),
            "a,b,c"
        );
        assert_eq!(
            call(Builtin::IndexOf, &s("héllo"), &[s("l")]).unwrap().to_number(),
            2.0
        );
    }

    #[test]
    fn test_array_methods() {
        let list = Value::array(vec![Value::Number(1.0), Value::Undefined, s("x")]);
        assert_eq!(call(Builtin::Join, &list, &[s("-")]).unwrap().to_string(), "1--x");
        assert_eq!(
            call(Builtin::Push, &list, &[Value::Null]).unwrap().to_number(),
            4.0
        );
        assert!(call(Builtin::Pop, &list, &[]).unwrap().is_nullish());
        assert!(call(Builtin::Includes, &list, &[s("x")]).unwrap().is_truthy());
    }

    #[test]
    fn test_numeric_helpers() {
        assert_eq!(parse_int("42px", 10), 42.0);
        assert_eq!(parse_int("0x1f", 0), 31.0);
        assert!(parse_int("px", 10).is_nan());
        assert_eq!(parse_float("3.25e2xyz"), 325.0);
        assert_eq!(parse_float("1e"), 1.0);
        assert_eq!(
            call(Builtin::ToFixed, &Value::Number(2.5), &[Value::Number(2.0)])
                .unwrap()
                .to_string(),
            "2.50"
        );
        assert_eq!(
            call(Builtin::MathRound, &Value::Undefined, &[Value::Number(-2.5)])
                .unwrap()
                .to_number(),
            -2.0
        );
    }

    #[test]
    fn test_json_stringify_indent() {
        let mut entries = IndexMap::new();
        entries.insert("a".to_string(), Value::Number(1.0));
        let value = Value::object(entries);
        assert_eq!(
            call(Builtin::JsonStringify, &Value::Undefined, &[value.clone()])
                .unwrap()
                .to_string(),
            "{\"a\":1}"
        );
        assert_eq!(
            call(
                Builtin::JsonStringify,
                &Value::Undefined,
                &[value, Value::Null, Value::Number(2.0)]
            )
            .unwrap()
            .to_string(),
            "{\n  \"a\": 1\n}"
        );
    }

    fn text(builtin: Builtin, this: &Value, args: &[Value]) -> String {
        call(builtin, this, args).unwrap().to_string()
    }

    #[test]
    fn test_string_method_arguments() {
        let n = Value::Number;
        assert_eq!(text(Builtin::Split, &s("a-b-c"), &[s("-"), n(2.0)]), "a,b");
        assert_eq!(text(Builtin::Split, &s("abc"), &[s(""), n(0.0)]), "");
        assert_eq!(text(Builtin::Replace, &s("abc"), &[s("b"), s("$&$&")]), "abbc");
        assert_eq!(text(Builtin::Replace, &s("abc"), &[s("b"), s("[$`|$'|$$]")]), "a[a|c|$]c");
        assert_eq!(text(Builtin::ReplaceAll, &s("a.b.c"), &[s("."), s("($&)")]), "a(.)b(.)c");
        assert_eq!(text(Builtin::Replace, &s("abc"), &[s("b"), s("$1")]), "a$1c");
        assert_eq!(text(Builtin::IndexOf, &s("abcabc"), &[s("b"), n(2.0)]), "4");
        assert_eq!(text(Builtin::Includes, &s("abc"), &[s("a"), n(1.0)]), "false");
        assert_eq!(text(Builtin::StartsWith, &s("abc"), &[s("bc"), n(1.0)]), "true");
        assert_eq!(text(Builtin::EndsWith, &s("abc"), &[s("ab"), n(2.0)]), "true");

        let replacer = Value::builtin(Builtin::MathRound);
        let error = call(Builtin::Replace, &s("abc"), &[s("b"), replacer]).unwrap_err();
        assert_eq!(error.message(), "replace does not support a replacer function");
    }

    #[test]
    fn test_array_search_from_index() {
        let n = Value::Number;
        let list = Value::array(vec![n(1.0), n(2.0), n(1.0)]);
        assert_eq!(text(Builtin::IndexOf, &list, &[n(1.0), n(1.0)]), "2");
        assert_eq!(text(Builtin::IndexOf, &list, &[n(1.0), n(-1.0)]), "2");
        assert_eq!(text(Builtin::Includes, &list, &[n(2.0), n(2.0)]), "false");
    }

    #[test]
    fn test_number_radix_and_statics() {
        let n = Value::Number;
        assert_eq!(text(Builtin::ToString, &n(255.0), &[n(16.0)]), "ff");
        assert_eq!(text(Builtin::ToString, &n(-5.0), &[n(2.0)]), "-101");
        assert_eq!(text(Builtin::ToString, &n(0.5), &[n(2.0)]), "0.1");
        assert_eq!(text(Builtin::ToString, &n(35.0), &[n(36.0)]), "z");
        assert_eq!(text(Builtin::ToString, &n(12.0), &[Value::Undefined]), "12");
        let error = call(Builtin::ToString, &n(1.0), &[n(1.0)]).unwrap_err();
        assert_eq!(error.message(), "toString() radix must be between 2 and 36");

        assert_eq!(text(Builtin::ParseInt, &Value::Undefined, &[s("0x1f")]), "31");
        assert_eq!(text(Builtin::ParseInt, &Value::Undefined, &[s("017")]), "17");

        let max = static_member(Builtin::NumberFn, "MAX_SAFE_INTEGER").unwrap();
        assert_eq!(max.to_string(), "9007199254740991");
        assert!(static_member(Builtin::NumberFn, "nope").is_none());
        assert!(static_member(Builtin::MathRound, "MAX_SAFE_INTEGER").is_none());
        assert_eq!(text(Builtin::NumberIsInteger, &Value::Undefined, &[n(3.0)]), "true");
        assert_eq!(text(Builtin::NumberIsInteger, &Value::Undefined, &[s("3")]), "false");
        assert_eq!(text(Builtin::NumberIsNaN, &Value::Undefined, &[s("x")]), "false");
        assert_eq!(text(Builtin::NumberIsFinite, &Value::Undefined, &[n(f64::INFINITY)]), "false");
    }

    #[test]
    fn test_string_length_limits() {
        let n = Value::Number;
        let error = call(Builtin::Repeat, &s("ab"), &[n(1e15)]).unwrap_err();
        assert_eq!(error.message(), "Invalid string length");
        let error = call(Builtin::Repeat, &s("ab"), &[n(f64::INFINITY)]).unwrap_err();
        assert_eq!(error.message(), "Invalid count value: Infinity");
        assert_eq!(text(Builtin::Repeat, &s(""), &[n(1e15)]), "");
        assert_eq!(text(Builtin::Repeat, &s("ab"), &[n(2.0)]), "abab");
        let error = call(Builtin::PadStart, &s("a"), &[n(1e12), s("x")]).unwrap_err();
        assert_eq!(error.message(), "Invalid string length");
    }

    fn invoke(function: &Value) {
        let Value::Function(function) = function else {
            panic!("expected function");
        };
        let Function::Native { call, .. } = function.as_ref() else {
            panic!("expected native function");
        };
        call(Value::Undefined, Vec::new()).unwrap();
    }

    #[test]
    fn test_line_break_remover() {
        let buffer = Value::array(vec![s("first\n  "), s("second")]);
        let remover = call(Builtin::LineBreakRemover, &Value::Undefined, &[buffer.clone()]).unwrap();
        invoke(&remover);
        assert_eq!(buffer.to_string(), "first,second");

        let single = Value::array(vec![s("only\n")]);
        invoke(&line_break_remover(&single).unwrap());
        assert_eq!(single.to_string(), "only\n");
    }
}
