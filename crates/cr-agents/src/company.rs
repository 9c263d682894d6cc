//! The CompanyInfo record and the industry vocabulary it draws from.

use std::path::Path;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cr_core::{Error, PropertySchema, Result, StructuredOutput, ToolDefinition, ToolParameters};

pub const COMPANY_INFO_TOOL: &str = "CompanyInfo";

/// Field names of [`CompanyInfo`], in wire order.
pub const COMPANY_INFO_KEYS: &[&str] = &[
    "company_name",
    "furigana",
    "corporate_number",
    "location",
    "representative_name",
    "officer_names",
    "company_url",
    "service_url",
    "industry",
    "establishment_date",
    "capital",
    "number_of_employees",
    "phone_number",
    "source_urls",
];

/// Public profile of one company.
///
/// Deserialisation applies the extraction coercions: integer fields accept
/// numeric strings with thousands separators and default to 0 when null or
/// absent, `phone_number` defaults to the empty string. List fields are
/// strict: a bare string is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub company_name: String,
    pub furigana: String,
    #[serde(deserialize_with = "string_or_number")]
    pub corporate_number: String,
    pub location: String,
    pub representative_name: String,
    pub officer_names: Vec<String>,
    pub company_url: String,
    pub service_url: String,
    pub industry: String,
    pub establishment_date: String,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub capital: i64,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub number_of_employees: i64,
    #[serde(default, deserialize_with = "nullable_string")]
    pub phone_number: String,
    pub source_urls: Vec<String>,
}

impl CompanyInfo {
    /// Forced-tool schema. A non-empty vocabulary turns `industry` into an enum.
    pub fn tool_definition(industries: &Industries) -> ToolDefinition {
        let industry = if industries.is_empty() {
            PropertySchema::string("Industry of the company")
        } else {
            PropertySchema::enum_string(
                "Industry of the company, chosen from the allowed list",
                industries.names().to_vec(),
            )
        };

        ToolDefinition::new(COMPANY_INFO_TOOL, "Structured public profile of a company")
            .with_parameters(
                ToolParameters::new()
                    .add_property("company_name", PropertySchema::string("Registered company name"), true)
                    .add_property("furigana", PropertySchema::string("Phonetic reading of the company name"), true)
                    .add_property("corporate_number", PropertySchema::string("Corporate registration number"), true)
                    .add_property("location", PropertySchema::string("Head office address"), true)
                    .add_property("representative_name", PropertySchema::string("Name of the representative"), true)
                    .add_property(
                        "officer_names",
                        PropertySchema::array("Names of the officers", PropertySchema::string("Officer name")),
                        true,
                    )
                    .add_property("company_url", PropertySchema::string("Corporate website URL"), true)
                    .add_property("service_url", PropertySchema::string("Main service URL"), true)
                    .add_property("industry", industry, true)
                    .add_property("establishment_date", PropertySchema::string("Date of establishment"), true)
                    .add_property("capital", PropertySchema::integer("Capital, as an integer amount"), true)
                    .add_property(
                        "number_of_employees",
                        PropertySchema::integer("Number of employees").with_default(Value::from(0)),
                        true,
                    )
                    .add_property(
                        "phone_number",
                        PropertySchema::string("Main phone number").with_default(Value::from("")),
                        true,
                    )
                    .add_property(
                        "source_urls",
                        PropertySchema::array(
                            "URLs the information was taken from",
                            PropertySchema::string("URL"),
                        ),
                        true,
                    ),
            )
    }

    /// Parse one record or a list of records. A bare object becomes a
    /// one-element list.
    pub fn parse_list(value: Value) -> Result<Vec<CompanyInfo>> {
        match value {
            Value::Array(items) => items.into_iter().map(CompanyInfo::from_arguments).collect(),
            object @ Value::Object(_) => Ok(vec![CompanyInfo::from_arguments(object)?]),
            other => Err(Error::validation(format!(
                "expected a company record or a list of records, got {}",
                type_name(&other)
            ))),
        }
    }
}

impl StructuredOutput for CompanyInfo {
    fn from_arguments(arguments: Value) -> Result<Self> {
        serde_json::from_value(arguments).map_err(|e| Error::validation(e.to_string()))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Parse an integer that may carry thousands separators. Only null or a
/// missing field defaults to 0; a blank string is rejected like any other
/// non-numeric text.
pub fn parse_integer(text: &str) -> std::result::Result<i64, String> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '，' | '_'))
        .collect();
    cleaned
        .parse::<i64>()
        .map_err(|_| format!("invalid integer value {text:?}"))
}

fn lenient_integer<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawNumber>::deserialize(deserializer)? {
        None => Ok(0),
        Some(RawNumber::Int(n)) => Ok(n),
        Some(RawNumber::Float(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        Some(RawNumber::Float(f)) => Err(de::Error::custom(format!("invalid integer value {f}"))),
        Some(RawNumber::Text(text)) => parse_integer(&text).map_err(de::Error::custom),
    }
}

fn nullable_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match RawNumber::deserialize(deserializer)? {
        RawNumber::Int(n) => Ok(n.to_string()),
        RawNumber::Float(f) => Ok(f.to_string()),
        RawNumber::Text(text) => Ok(text),
    }
}

/// Controlled vocabulary for the `industry` field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Industries {
    names: Vec<String>,
}

impl Industries {
    /// One name per line. Markdown headings, blank lines and list markers
    /// are skipped.
    pub fn parse(text: &str) -> Self {
        let mut names: Vec<String> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let name = line
                .trim_start_matches(['-', '*', '+'])
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches('.')
                .trim();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        Self { names }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read industries from {}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&text))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Prompt line telling the model where `industry` must come from.
    pub fn instruction(&self) -> String {
        if self.is_empty() {
            "For the \"industry\" key, use a short, conventional industry name.".to_string()
        } else {
            format!(
                "For the \"industry\" key, always choose one of the following names: {}.",
                self.names.join(", ")
            )
        }
    }
}
