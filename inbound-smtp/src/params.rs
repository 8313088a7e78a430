//! Typed parameter extraction for custom commands.
//!
//! A [`Schema`] names each parameter a command accepts together with its
//! [`Kind`] and whether it is [`Requirement::Required`]. Parameters are written
//! as `NAME=value`, `NAME="a phrase"` or a bare `NAME` flag, in any order:
//!
//! ```text
//! CUSTOM: SERVER_NAME="Test Server" NEW SERVER_VERSION=5 VALIDATE=true
//! ```
//!
//! Every required parameter is located in the raw line first. Optional
//! parameters are only searched for once the required ones have been cut out,
//! so they can never consume a required parameter's text. Whatever is left
//! over afterwards must be nothing but the command name.

use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use inbound_common::status::Status;
use regex::Regex;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// A value without whitespace
    String,
    /// A double quoted value that may contain whitespace
    Phrase,
    /// Decimal digits
    Number,
    /// `true` or `false`
    Boolean,
    /// A bare flag without a value
    None,
}

impl Kind {
    fn fragment(self) -> &'static str {
        match self {
            Self::String => r#" ?= ?([^\s"]+)"#,
            Self::Phrase => r#" ?= ?"([\s\w]+)""#,
            Self::Number => r" ?= ?([0-9]+)",
            Self::Boolean => r" ?= ?(true|false)\b",
            Self::None => r"(?:\s|$)",
        }
    }

    fn value(self, text: Option<&str>) -> Option<Value> {
        match (self, text) {
            (Self::String, Some(text)) => Some(Value::String(text.to_string())),
            (Self::Phrase, Some(text)) => Some(Value::Phrase(text.to_string())),
            (Self::Number, Some(text)) => text.parse().ok().map(Value::Number),
            (Self::Boolean, Some(text)) => Some(Value::Boolean(text.eq_ignore_ascii_case("true"))),
            (Self::None, _) => Some(Value::Flag),
            (_, None) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Requirement {
    Required,
    Optional,
}

/// How a single parameter is matched, written as `kind:REQUIREMENT`
/// (e.g. `number:OPTIONAL`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Spec {
    pub kind: Kind,
    pub requirement: Requirement,
}

impl FromStr for Spec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, requirement) = s
            .split_once(':')
            .ok_or_else(|| format!("Expected 'kind:REQUIREMENT', got '{s}'"))?;

        let kind = match kind {
            "string" => Kind::String,
            "phrase" => Kind::Phrase,
            "number" => Kind::Number,
            "boolean" => Kind::Boolean,
            "none" => Kind::None,
            other => return Err(format!("Unknown parameter kind '{other}'")),
        };

        let requirement = match requirement {
            "REQUIRED" => Requirement::Required,
            "OPTIONAL" => Requirement::Optional,
            other => return Err(format!("Unknown parameter requirement '{other}'")),
        };

        Ok(Self { kind, requirement })
    }
}

/// A typed parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Phrase(String),
    Number(i64),
    Boolean(bool),
    Flag,
}

/// The declared parameters of a custom command, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    params: Vec<(String, Spec)>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, spec: Spec) -> Self {
        self.params.push((name.into(), spec));
        self
    }

    /// Add a parameter from its `kind:REQUIREMENT` text form.
    ///
    /// # Errors
    /// If the text form is not understood
    pub fn with_spec(self, name: impl Into<String>, spec: &str) -> Result<Self, String> {
        Ok(self.with(name, spec.parse()?))
    }

    #[must_use]
    pub fn params(&self) -> &[(String, Spec)] {
        &self.params
    }

    /// Build the matcher for `command` lines.
    ///
    /// # Errors
    /// If a parameter pattern fails to compile
    pub fn compile(&self, command: &str) -> Result<Matcher, regex::Error> {
        let patterns = self
            .params
            .iter()
            .map(|(name, spec)| {
                Regex::new(&format!(
                    r"(?i)\b({}){}",
                    regex::escape(name),
                    spec.kind.fragment()
                ))
                .map(|regex| Pattern {
                    name: name.clone(),
                    spec: *spec,
                    regex,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Matcher {
            command: command.to_ascii_uppercase(),
            patterns,
        })
    }
}

#[derive(Debug, Clone)]
struct Pattern {
    name: String,
    spec: Spec,
    regex: Regex,
}

/// A parameter as found in a command line.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub spec: Spec,
    /// The matched text, including the name
    pub raw: String,
    /// `None` when the parameter was absent, or present with a value that
    /// could not be converted
    pub value: Option<Value>,
}

/// The outcome of a successful parse, keyed by parameter name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parameters(Vec<Parameter>);

impl Parameters {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.0.iter().find(|param| param.name == name)
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(|param| param.value.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.0.iter()
    }
}

/// Why a command line did not satisfy its schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub status: Status,
    pub message: String,
}

impl Display for ParseError {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} {}", self.status, self.message)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone)]
pub struct Matcher {
    command: String,
    patterns: Vec<Pattern>,
}

impl Matcher {
    fn error(&self, reason: &str) -> ParseError {
        ParseError {
            status: Status::InvalidParameters,
            message: format!("Command '{}' Parameters is invalid, {reason}", self.command),
        }
    }

    fn find(pattern: &Pattern, text: &str) -> Option<Parameter> {
        pattern.regex.captures(text).map(|captures| Parameter {
            name: pattern.name.clone(),
            spec: pattern.spec,
            raw: captures
                .get(0)
                .map_or_else(String::new, |m| m.as_str().to_string()),
            value: pattern
                .spec
                .kind
                .value(captures.get(2).map(|m| m.as_str())),
        })
    }

    /// The command name as it starts `raw`, with its colon if there is one.
    fn prefix<'a>(&self, raw: &'a str) -> Option<&'a str> {
        let name = raw
            .get(..self.command.len())
            .filter(|head| head.eq_ignore_ascii_case(&self.command))?;

        match raw[name.len()..].chars().next() {
            Some(':') => raw.get(..=name.len()),
            None => Some(name),
            Some(next) if next.is_whitespace() => Some(name),
            Some(_) => None,
        }
    }

    /// Extract the schema's parameters from `raw`.
    ///
    /// # Errors
    /// When the line does not start with the command name, a required
    /// parameter is missing or has no usable value, or unrecognised text
    /// remains once every parameter has been removed
    pub fn parse(&self, raw: &str) -> Result<Parameters, ParseError> {
        let Some(prefix) = self.prefix(raw) else {
            return Err(self.error("no matches"));
        };

        let (required, optional): (Vec<_>, Vec<_>) = self
            .patterns
            .iter()
            .partition(|pattern| pattern.spec.requirement == Requirement::Required);

        let mut found = required
            .iter()
            .map(|pattern| Self::find(pattern, raw).ok_or_else(|| self.error("no matches")))
            .collect::<Result<Vec<_>, _>>()?;

        let mut remaining = found
            .iter()
            .fold(raw.to_string(), |text, param| text.replacen(&param.raw, "", 1));

        for pattern in optional {
            match Self::find(pattern, &remaining) {
                Some(param) => {
                    remaining = remaining.replacen(&param.raw, "", 1);
                    found.push(param);
                }
                None => found.push(Parameter {
                    name: pattern.name.clone(),
                    spec: pattern.spec,
                    raw: String::new(),
                    value: None,
                }),
            }
        }

        if !remaining.trim().eq_ignore_ascii_case(prefix) {
            return Err(self.error("command is invalid"));
        }

        if found
            .iter()
            .any(|param| param.spec.requirement == Requirement::Required && param.value.is_none())
        {
            return Err(self.error("required parameters are missing"));
        }

        Ok(Parameters(found))
    }
}

#[cfg(test)]
mod tests {
    use inbound_common::status::Status;
    use pretty_assertions::assert_eq;

    use super::{Kind, Requirement, Schema, Spec, Value};

    fn schema() -> Schema {
        Schema::new()
            .with_spec("SERVER_NAME", "phrase:REQUIRED")
            .and_then(|s| s.with_spec("SERVER_VERSION", "number:REQUIRED"))
            .and_then(|s| s.with_spec("VALIDATE", "boolean:OPTIONAL"))
            .and_then(|s| s.with_spec("NEW", "none:OPTIONAL"))
            .and_then(|s| s.with_spec("TEST", "string:OPTIONAL"))
            .unwrap()
    }

    #[test]
    fn spec_from_str() {
        assert_eq!(
            "number:OPTIONAL".parse::<Spec>(),
            Ok(Spec {
                kind: Kind::Number,
                requirement: Requirement::Optional
            })
        );
        assert!("number".parse::<Spec>().is_err());
        assert!("float:REQUIRED".parse::<Spec>().is_err());
        assert!("string:MAYBE".parse::<Spec>().is_err());
    }

    #[test]
    fn full_line() {
        let matcher = schema().compile("CUSTOM").unwrap();
        let parsed = matcher
            .parse(r#"CUSTOM: SERVER_NAME="Test Server" NEW SERVER_VERSION=5 VALIDATE=true TEST=BOSS"#)
            .unwrap();

        assert_eq!(
            parsed.value("SERVER_NAME"),
            Some(&Value::Phrase("Test Server".to_string()))
        );
        assert_eq!(parsed.value("SERVER_VERSION"), Some(&Value::Number(5)));
        assert_eq!(parsed.value("VALIDATE"), Some(&Value::Boolean(true)));
        assert_eq!(parsed.value("NEW"), Some(&Value::Flag));
        assert_eq!(parsed.value("TEST"), Some(&Value::String("BOSS".to_string())));
    }

    #[test]
    fn optional_parameters_may_be_absent() {
        let matcher = schema().compile("custom").unwrap();
        let parsed = matcher
            .parse(r#"custom:SERVER_VERSION = 12 server_name="x""#)
            .unwrap();

        assert_eq!(parsed.value("SERVER_VERSION"), Some(&Value::Number(12)));
        assert_eq!(parsed.value("VALIDATE"), None);
        assert_eq!(parsed.value("NEW"), None);
        assert!(parsed.get("TEST").is_some_and(|param| param.raw.is_empty()));
    }

    #[test]
    fn missing_required_parameter() {
        let matcher = schema().compile("CUSTOM").unwrap();
        let err = matcher.parse("CUSTOM: SERVER_VERSION=5").unwrap_err();

        assert_eq!(err.status, Status::InvalidParameters);
        assert_eq!(
            err.message,
            "Command 'CUSTOM' Parameters is invalid, no matches"
        );
    }

    #[test]
    fn leftover_text() {
        let matcher = schema().compile("CUSTOM").unwrap();
        let err = matcher
            .parse(r#"CUSTOM: SERVER_NAME="a" SERVER_VERSION=5 UNKNOWN=1"#)
            .unwrap_err();

        assert_eq!(
            err.message,
            "Command 'CUSTOM' Parameters is invalid, command is invalid"
        );
    }

    #[test]
    fn wrong_command() {
        let matcher = schema().compile("CUSTOM").unwrap();
        assert!(matcher.parse(r#"OTHER: SERVER_NAME="a" SERVER_VERSION=5"#).is_err());
    }

    #[test]
    fn unconvertible_required_value() {
        let matcher = Schema::new()
            .with_spec("COUNT", "number:REQUIRED")
            .unwrap()
            .compile("COUNT")
            .unwrap();

        let err = matcher.parse("COUNT: COUNT=99999999999999999999").unwrap_err();
        assert_eq!(
            err.message,
            "Command 'COUNT' Parameters is invalid, required parameters are missing"
        );
    }

    #[test]
    fn no_parameters() {
        let matcher = Schema::new().compile("PING").unwrap();
        assert!(matcher.parse("PING:").is_ok());
        assert!(matcher.parse("ping: ").is_ok());
        assert!(matcher.parse("PING").is_ok());
        assert!(matcher.parse("PING: extra").is_err());
        assert!(matcher.parse("PINGS").is_err());
    }
}
