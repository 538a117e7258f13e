// ABOUTME: Extracts <# DATA:TYPE [ name = literal ] #> declarations from template comments
// ABOUTME: Declarations describe the data a template expects and never reach the generated program

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;

static DATA_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<#\s*DATA:(\w+)\s*\[\s*([\w$.]+)\s*=\s*(.*?)\s*\]\s*#>").unwrap()
});

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDeclaration {
    pub data_type: String,
    pub value: JsonValue,
}

fn literal_value(literal: &str) -> JsonValue {
    if let Ok(value) = serde_json::from_str(literal) {
        return value;
    }
    let unquoted = literal
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .unwrap_or(literal);
    JsonValue::String(unquoted.to_string())
}

/// Declarations found in `source`, keyed by name. A later declaration of
/// the same name replaces the earlier one in place.
pub fn data_declarations(source: &str) -> IndexMap<String, DataDeclaration> {
    DATA_DECLARATION
        .captures_iter(source)
        .map(|captures| {
            (
                captures[2].to_string(),
                DataDeclaration {
                    data_type: captures[1].to_string(),
                    value: literal_value(&captures[3]),
                },
            )
        })
        .collect()
}
