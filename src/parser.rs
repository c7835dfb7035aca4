//! Line format for on-disk logs.
//!
//! Each event is a single line shaped like
//!
//! ```text
//! <sffloat value="1.5" timestamp="1712345678901" sensorName="tracker/head/x"/>
//! ```
//!
//! The hub only talks to the format through the [`LineParser`] trait so that
//! the disk reader and writer can be driven by another encoding in tests or
//! by embedders.

use crate::event::{Event, Timestamp, TypeTag, Value};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Failure to decode a single line.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The line does not have the expected element shape.
    #[error("line does not match the event format: {0}")]
    Malformed(String),
    /// The element name is not a known type tag.
    #[error("unknown type tag '{0}'")]
    UnknownType(String),
    /// The value attribute could not be read as the declared type.
    #[error("cannot read '{value}' as {tag}: {reason}")]
    BadValue {
        /// Declared type.
        tag: TypeTag,
        /// Raw attribute text.
        value: String,
        /// What went wrong.
        reason: String,
    },
}

/// Encoding between events and log lines.
pub trait LineParser: Send + Sync {
    /// Decode a full line.
    fn parse(&self, line: &str) -> Result<Event, ParseError>;

    /// Encode an event as a single line without the terminator.
    fn format(&self, event: &Event) -> String;

    /// Extract only the timestamp, as cheaply as possible.
    ///
    /// Returns `None` for header lines, root tags and anything else that is
    /// not an event.
    fn quick_parse_timestamp(&self, line: &str) -> Option<Timestamp>;
}

/// Parser for the tagged XML-like line format.
#[derive(Debug, Default, Clone, Copy)]
pub struct XioParser;

// Literal patterns, verified by the tests below.
#[allow(clippy::expect_used)]
fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^\s*<(\w+)\s+value="([^"]*)"\s+timestamp="(-?\d+)"\s+sensor[Nn]ame="([^"]*)"\s*/?>\s*$"#,
        )
        .expect("event line pattern")
    })
}

#[allow(clippy::expect_used)]
fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\stimestamp="(\d+)""#).expect("timestamp pattern"))
}

impl XioParser {
    /// Create the parser.
    pub fn new() -> Self {
        Self
    }
}

impl LineParser for XioParser {
    fn parse(&self, line: &str) -> Result<Event, ParseError> {
        let caps = line_regex()
            .captures(line)
            .ok_or_else(|| ParseError::Malformed(truncate(line)))?;
        let tag_name = &caps[1];
        let tag: TypeTag = tag_name
            .parse()
            .map_err(|_| ParseError::UnknownType(tag_name.to_string()))?;
        let time: Timestamp = caps[3]
            .parse()
            .map_err(|_| ParseError::Malformed(truncate(line)))?;
        let value = parse_value(tag, &caps[2])?;
        Ok(Event::with_scope(value, &unescape(&caps[4]), time))
    }

    fn format(&self, event: &Event) -> String {
        format!(
            r#"<{} value="{}" timestamp="{}" sensorName="{}"/>"#,
            event.type_tag(),
            format_value(&event.value),
            event.time,
            escape(&event.scope())
        )
    }

    fn quick_parse_timestamp(&self, line: &str) -> Option<Timestamp> {
        timestamp_regex()
            .captures(line)
            .and_then(|caps| caps[1].parse().ok())
    }
}

fn truncate(line: &str) -> String {
    line.chars().take(80).collect()
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            other => out.push(other),
        }
    }
    out
}

// Marks an empty string element, so `[""]` and `[]` stay distinct.
const EMPTY_ELEMENT: &str = "&#0;";

// Array elements additionally protect the ", " separator.
fn escape_element(s: &str) -> String {
    if s.is_empty() {
        return EMPTY_ELEMENT.to_string();
    }
    escape(s).replace(',', "&#44;")
}

fn unescape_element(s: &str) -> String {
    if s == EMPTY_ELEMENT {
        String::new()
    } else {
        unescape(s)
    }
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#10;", "\n")
        .replace("&#13;", "\r")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

fn format_floats(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_list<T>(items: &[T], f: impl Fn(&T) -> String) -> String {
    format!("[{}]", items.iter().map(f).collect::<Vec<_>>().join(", "))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::String(v) => escape(v),
        Value::Vec2f(v) => format_floats(v),
        Value::Vec3f(v) => format_floats(v),
        Value::Rotation(v) => format_floats(v),
        Value::IntArray(v) => format_list(v, |x| x.to_string()),
        Value::FloatArray(v) => format_list(v, |x| x.to_string()),
        Value::DoubleArray(v) => format_list(v, |x| x.to_string()),
        Value::BoolArray(v) => format_list(v, |x| x.to_string()),
        Value::StringArray(v) => format_list(v, |x| escape_element(x)),
        Value::Vec2fArray(v) => format_list(v, |x| format_floats(x)),
        Value::Vec3fArray(v) => format_list(v, |x| format_floats(x)),
        Value::RotationArray(v) => format_list(v, |x| format_floats(x)),
    }
}

fn bad(tag: TypeTag, value: &str, reason: impl ToString) -> ParseError {
    ParseError::BadValue {
        tag,
        value: truncate(value),
        reason: reason.to_string(),
    }
}

fn parse_scalar<T: std::str::FromStr>(tag: TypeTag, raw: &str) -> Result<T, ParseError>
where
    T::Err: ToString,
{
    raw.trim().parse::<T>().map_err(|e| bad(tag, raw, e))
}

fn parse_bool(tag: TypeTag, raw: &str) -> Result<bool, ParseError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(bad(tag, raw, "expected true or false")),
    }
}

fn parse_floats<const N: usize>(tag: TypeTag, raw: &str) -> Result<[f32; N], ParseError> {
    let mut out = [0.0f32; N];
    let mut parts = raw.split_whitespace();
    for slot in out.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| bad(tag, raw, format!("expected {N} components")))?;
        *slot = parse_scalar(tag, part)?;
    }
    if parts.next().is_some() {
        return Err(bad(tag, raw, format!("expected {N} components")));
    }
    Ok(out)
}

fn parse_list<T>(
    tag: TypeTag,
    raw: &str,
    f: impl Fn(&str) -> Result<T, ParseError>,
) -> Result<Vec<T>, ParseError> {
    let inner = raw
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| bad(tag, raw, "expected a bracketed list"))?;
    // Only string elements may consist of whitespace.
    if inner.is_empty() || (tag != TypeTag::MfString && inner.trim().is_empty()) {
        return Ok(Vec::new());
    }
    inner.split(", ").map(f).collect()
}

fn parse_value(tag: TypeTag, raw: &str) -> Result<Value, ParseError> {
    Ok(match tag {
        TypeTag::SfInt32 => Value::Int(parse_scalar(tag, raw)?),
        TypeTag::SfLong => Value::Long(parse_scalar(tag, raw)?),
        TypeTag::SfFloat => Value::Float(parse_scalar(tag, raw)?),
        TypeTag::SfDouble => Value::Double(parse_scalar(tag, raw)?),
        TypeTag::SfBool => Value::Bool(parse_bool(tag, raw)?),
        TypeTag::SfString => Value::String(unescape(raw)),
        TypeTag::SfVec2f => Value::Vec2f(parse_floats(tag, raw)?),
        TypeTag::SfVec3f => Value::Vec3f(parse_floats(tag, raw)?),
        TypeTag::SfRotation => Value::Rotation(parse_floats(tag, raw)?),
        TypeTag::MfInt32 => Value::IntArray(parse_list(tag, raw, |s| parse_scalar(tag, s))?),
        TypeTag::MfFloat => Value::FloatArray(parse_list(tag, raw, |s| parse_scalar(tag, s))?),
        TypeTag::MfDouble => Value::DoubleArray(parse_list(tag, raw, |s| parse_scalar(tag, s))?),
        TypeTag::MfBool => Value::BoolArray(parse_list(tag, raw, |s| parse_bool(tag, s))?),
        TypeTag::MfString => Value::StringArray(parse_list(tag, raw, |s| Ok(unescape_element(s)))?),
        TypeTag::MfVec2f => Value::Vec2fArray(parse_list(tag, raw, |s| parse_floats(tag, s))?),
        TypeTag::MfVec3f => Value::Vec3fArray(parse_list(tag, raw, |s| parse_floats(tag, s))?),
        TypeTag::MfRotation => {
            Value::RotationArray(parse_list(tag, raw, |s| parse_floats(tag, s))?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Value> {
        vec![
            Value::Int(-42),
            Value::Long(9_000_000_000),
            Value::Float(1.25),
            Value::Double(-0.000_123_456_789),
            Value::Bool(true),
            Value::String("hello \"world\" <tag> & co,\nline two".into()),
            Value::Vec2f([1.0, -2.5]),
            Value::Vec3f([0.1, 0.2, 0.3]),
            Value::Rotation([0.0, 1.0, 0.0, 3.14159]),
            Value::IntArray(vec![1, 2, 3]),
            Value::FloatArray(vec![0.5, 1.5]),
            Value::DoubleArray(vec![1e-9, 2.0]),
            Value::BoolArray(vec![true, false, true]),
            Value::StringArray(vec!["a, b".into(), "c".into(), String::new()]),
            Value::Vec2fArray(vec![[1.0, 2.0], [3.0, 4.0]]),
            Value::Vec3fArray(vec![[1.0, 2.0, 3.0]]),
            Value::RotationArray(vec![[0.0, 0.0, 1.0, 0.5], [1.0, 0.0, 0.0, 1.5]]),
            Value::IntArray(Vec::new()),
            Value::StringArray(vec![String::new()]),
            Value::StringArray(vec![" ".into()]),
            Value::StringArray(Vec::new()),
            Value::StringArray(vec!["&#0;".into(), "  padded ".into()]),
        ]
    }

    #[test]
    fn formatted_events_parse_back_identically() {
        let parser = XioParser::new();
        for (i, value) in samples().into_iter().enumerate() {
            let event = Event::new(value, "tracker/head", format!("slot{i}"), 1000 + i as i64);
            let line = parser.format(&event);
            assert!(!line.contains('\n'), "line must stay single-line: {line}");
            let parsed = parser.parse(&line).unwrap();
            assert_eq!(parsed, event, "line was {line}");
        }
    }

    #[test]
    fn single_empty_string_element_is_not_an_empty_list() {
        let parser = XioParser::new();
        let empty = parser.format(&Event::new(Value::StringArray(Vec::new()), "ns", "l", 1));
        let blank = parser.format(&Event::new(Value::StringArray(vec![String::new()]), "ns", "l", 1));
        assert_ne!(empty, blank);
        assert_eq!(parser.parse(&blank).unwrap().value, Value::StringArray(vec![String::new()]));
        assert_eq!(parser.parse(&empty).unwrap().value, Value::StringArray(Vec::new()));
    }

    #[test]
    fn parses_a_hand_written_line() {
        let parser = XioParser::new();
        let event = parser
            .parse(r#"<sfvec3f value="1 2 3" timestamp="1234" sensorname="a/b/pos"/>"#)
            .unwrap();
        assert_eq!(event.value, Value::Vec3f([1.0, 2.0, 3.0]));
        assert_eq!(event.namespace, "a/b");
        assert_eq!(event.label, "pos");
        assert_eq!(event.time, 1234);
    }

    #[test]
    fn quick_timestamp_ignores_non_event_lines() {
        let parser = XioParser::new();
        assert_eq!(parser.quick_parse_timestamp(r#"<?xml version="1.0"?>"#), None);
        assert_eq!(parser.quick_parse_timestamp("<replay>"), None);
        assert_eq!(parser.quick_parse_timestamp("garbage"), None);
        assert_eq!(
            parser.quick_parse_timestamp(r#"<sfint32 value="1" timestamp="77" sensorName="x"/>"#),
            Some(77)
        );
    }

    #[test]
    fn malformed_lines_are_errors() {
        let parser = XioParser::new();
        assert!(matches!(parser.parse("<replay>"), Err(ParseError::Malformed(_))));
        assert!(matches!(
            parser.parse(r#"<sfmatrix value="1" timestamp="1" sensorName="x"/>"#),
            Err(ParseError::UnknownType(_))
        ));
        assert!(matches!(
            parser.parse(r#"<sfint32 value="one" timestamp="1" sensorName="x"/>"#),
            Err(ParseError::BadValue { .. })
        ));
        assert!(matches!(
            parser.parse(r#"<sfvec2f value="1 2 3" timestamp="1" sensorName="x"/>"#),
            Err(ParseError::BadValue { .. })
        ));
    }
}
