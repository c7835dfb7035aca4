//! Record format of the SocketPort input.
//!
//! A record is one line of `", "`-separated tokens:
//!
//! ```text
//! 844236213, 42, 3.5, hello, true
//! ```
//!
//! The first token is the decimal Adler-32 checksum of everything after the
//! first `", "` (line terminator excluded, all other whitespace included).
//! The remaining tokens are decoded positionally against a [`WireSchema`].
//! Vectors and rotations take 2, 3 or 4 consecutive float tokens; string and
//! vector arrays start with an element count.

use crate::error::{HubError, HubResult};
use crate::event::{Event, Timestamp, TypeTag, Value};
use crate::schema::{SlotDef, SlotSchema};
use std::fmt::Write as _;
use std::str::FromStr;
use thiserror::Error;

const SEPARATOR: &str = ", ";

/// A record that violates the wire format.
///
/// The token variants carry a diagnostic dump of every token of the line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The checksum token does not match the payload.
    #[error("checksum {actual} does not match {expected} given in the line")]
    Checksum {
        /// Checksum given by the sender.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },
    /// A token could not be read as its declared type.
    #[error("Token {index} is of wrong type.\n{dump}")]
    BadToken {
        /// Index of the offending token.
        index: usize,
        /// Token listing with the offender marked.
        dump: String,
    },
    /// The line ended before every field was decoded.
    #[error("Too few tokens in the line.\n{dump}")]
    TooFewTokens {
        /// Token listing.
        dump: String,
    },
    /// No line terminator within the accepted line length.
    #[error("line exceeds {limit} bytes without a terminator")]
    LineTooLong {
        /// Longest accepted line in bytes.
        limit: usize,
    },
}

/// Ordered field list of a SocketPort record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSchema {
    fields: Vec<SlotDef>,
}

impl WireSchema {
    /// Check that every field has a wire encoding.
    pub fn new(fields: Vec<SlotDef>) -> HubResult<Self> {
        if let Some(field) = fields.iter().find(|f| !is_supported(f.type_tag)) {
            return Err(HubError::Schema(format!(
                "slot '{}' has type {} which the socket protocol cannot carry",
                field.scope(),
                field.type_tag
            )));
        }
        Ok(Self { fields })
    }

    /// Fields of a loaded slot schema, in declaration order.
    pub fn from_schema(schema: &SlotSchema) -> HubResult<Self> {
        Self::new(schema.slots().to_vec())
    }

    /// Declared fields.
    pub fn fields(&self) -> &[SlotDef] {
        &self.fields
    }
}

fn is_supported(tag: TypeTag) -> bool {
    matches!(
        tag,
        TypeTag::SfInt32
            | TypeTag::SfLong
            | TypeTag::SfFloat
            | TypeTag::SfString
            | TypeTag::SfBool
            | TypeTag::MfString
            | TypeTag::SfVec2f
            | TypeTag::SfVec3f
            | TypeTag::SfRotation
            | TypeTag::MfVec2f
            | TypeTag::MfVec3f
            | TypeTag::MfRotation
    )
}

/// Adler-32 of a record payload.
pub fn checksum(payload: &str) -> u32 {
    adler2::adler32_slice(payload.as_bytes())
}

/// Prefix `payload` with its checksum, producing a record line without terminator.
pub fn frame(payload: &str) -> String {
    format!("{}{SEPARATOR}{payload}", checksum(payload))
}

enum Fault {
    WrongType(usize),
    TooFew,
}

struct Tokens<'a> {
    tokens: Vec<&'a str>,
    next: usize,
}

impl<'a> Tokens<'a> {
    fn take(&mut self) -> Result<(usize, &'a str), Fault> {
        let index = self.next;
        let token = self.tokens.get(index).copied().ok_or(Fault::TooFew)?;
        self.next += 1;
        Ok((index, token))
    }

    fn parse<T: FromStr>(&mut self) -> Result<T, Fault> {
        let (index, token) = self.take()?;
        token.parse().map_err(|_| Fault::WrongType(index))
    }

    fn floats<const N: usize>(&mut self) -> Result<[f32; N], Fault> {
        let mut out = [0.0; N];
        for slot in &mut out {
            *slot = self.parse()?;
        }
        Ok(out)
    }

    fn count(&mut self) -> Result<usize, Fault> {
        self.parse()
    }

    fn repeat<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T, Fault>) -> Result<Vec<T>, Fault> {
        let n = self.count()?;
        // The count is untrusted; every element needs at least one token.
        let mut out = Vec::with_capacity(n.min(self.tokens.len()));
        for _ in 0..n {
            out.push(item(self)?);
        }
        Ok(out)
    }

    fn value(&mut self, tag: TypeTag) -> Result<Value, Fault> {
        Ok(match tag {
            TypeTag::SfInt32 => Value::Int(self.parse()?),
            TypeTag::SfLong => Value::Long(self.parse()?),
            TypeTag::SfFloat => Value::Float(self.parse()?),
            TypeTag::SfString => Value::String(self.take()?.1.to_string()),
            TypeTag::SfBool => Value::Bool(self.take()?.1.eq_ignore_ascii_case("true")),
            TypeTag::MfString => {
                Value::StringArray(self.repeat(|t| t.take().map(|(_, s)| s.to_string()))?)
            }
            TypeTag::SfVec2f => Value::Vec2f(self.floats()?),
            TypeTag::SfVec3f => Value::Vec3f(self.floats()?),
            TypeTag::SfRotation => Value::Rotation(self.floats()?),
            TypeTag::MfVec2f => Value::Vec2fArray(self.repeat(Self::floats)?),
            TypeTag::MfVec3f => Value::Vec3fArray(self.repeat(Self::floats)?),
            TypeTag::MfRotation => Value::RotationArray(self.repeat(Self::floats)?),
            // Rejected when the schema is built.
            _ => return Err(Fault::WrongType(self.next)),
        })
    }

    fn dump(&self, marked: Option<usize>) -> String {
        let mut out = String::new();
        for (i, token) in self.tokens.iter().enumerate() {
            let marker = if Some(i) == marked { "> " } else { "  " };
            let _ = writeln!(out, "{i:3}: {marker}{token}");
        }
        out
    }
}

/// Decode one record into one event per schema field, all stamped `now`.
///
/// Nothing is returned unless the whole line decodes.
pub fn decode_line(line: &str, schema: &WireSchema, now: Timestamp) -> Result<Vec<Event>, WireError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut tokens = Tokens {
        tokens: line.split(SEPARATOR).collect(),
        next: 0,
    };

    let expected = match tokens.parse::<u32>() {
        Ok(value) => value,
        Err(Fault::WrongType(index)) => {
            return Err(WireError::BadToken {
                index,
                dump: tokens.dump(Some(index)),
            })
        }
        Err(Fault::TooFew) => {
            return Err(WireError::TooFewTokens {
                dump: tokens.dump(None),
            })
        }
    };
    let payload = line
        .find(SEPARATOR)
        .map_or("", |idx| &line[idx + SEPARATOR.len()..]);
    let actual = checksum(payload);
    if actual != expected {
        return Err(WireError::Checksum { expected, actual });
    }

    let mut events = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        match tokens.value(field.type_tag) {
            Ok(value) => events.push(Event::new(
                value,
                field.namespace.clone(),
                field.label.clone(),
                now,
            )),
            Err(Fault::WrongType(index)) => {
                return Err(WireError::BadToken {
                    index,
                    dump: tokens.dump(Some(index)),
                })
            }
            Err(Fault::TooFew) => {
                return Err(WireError::TooFewTokens {
                    dump: tokens.dump(None),
                })
            }
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(tags: &[TypeTag]) -> WireSchema {
        let fields = tags
            .iter()
            .enumerate()
            .map(|(i, tag)| SlotDef::new("glove", format!("f{i}"), *tag))
            .collect();
        WireSchema::new(fields).unwrap()
    }

    #[test]
    fn checksum_vectors() {
        assert_eq!(checksum("Wikipedia"), 300_286_872);
        assert_eq!(checksum("42, 3.5, hello, true"), 844_236_213);
        assert_eq!(checksum("7, 1.5 2.5, 3"), 271_909_452);
        assert_eq!(checksum("1, 2, 3"), 80_019_759);
        assert_eq!(frame("1, 2, 3"), "80019759, 1, 2, 3");
    }

    #[test]
    fn decodes_scalars() {
        let s = schema(&[TypeTag::SfInt32, TypeTag::SfFloat, TypeTag::SfString, TypeTag::SfBool]);
        let events = decode_line("844236213, 42, 3.5, hello, true\r\n", &s, 99).unwrap();
        let values: Vec<&Value> = events.iter().map(|e| &e.value).collect();
        assert_eq!(
            values,
            vec![
                &Value::Int(42),
                &Value::Float(3.5),
                &Value::String("hello".into()),
                &Value::Bool(true)
            ]
        );
        assert!(events.iter().all(|e| e.time == 99 && e.namespace == "glove"));
        assert_eq!(events[2].label, "f2");
    }

    #[test]
    fn vector_takes_consecutive_tokens() {
        let s = schema(&[TypeTag::SfInt32, TypeTag::SfVec2f]);
        let events = decode_line("80019759, 1, 2, 3", &s, 0).unwrap();
        assert_eq!(events[1].value, Value::Vec2f([2.0, 3.0]));
    }

    #[test]
    fn counted_arrays() {
        let s = schema(&[TypeTag::MfString, TypeTag::MfVec3f, TypeTag::SfLong]);
        let line = frame("2, a, b, 1, 0.5, 1.5, 2.5, 12345678901");
        let events = decode_line(&line, &s, 0).unwrap();
        assert_eq!(events[0].value, Value::StringArray(vec!["a".into(), "b".into()]));
        assert_eq!(events[1].value, Value::Vec3fArray(vec![[0.5, 1.5, 2.5]]));
        assert_eq!(events[2].value, Value::Long(12_345_678_901));
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let s = schema(&[TypeTag::SfInt32, TypeTag::SfVec2f]);
        let err = decode_line("80019758, 1, 2, 3", &s, 0).unwrap_err();
        assert_eq!(
            err,
            WireError::Checksum {
                expected: 80_019_758,
                actual: 80_019_759
            }
        );
        // Trailing whitespace is part of the payload.
        assert!(matches!(
            decode_line("80019759, 1, 2, 3 ", &s, 0),
            Err(WireError::Checksum { .. })
        ));
    }

    #[test]
    fn wrong_type_marks_offending_token() {
        let s = schema(&[TypeTag::SfInt32, TypeTag::SfInt32, TypeTag::SfInt32]);
        let err = decode_line(&frame("1, x, 3"), &s, 0).unwrap_err();
        match err {
            WireError::BadToken { index, dump } => {
                assert_eq!(index, 2);
                assert!(dump.contains("  2: > x"));
                assert!(dump.contains("  1:   1"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err_text(&s, "1, x, 3").contains("Token 2 is of wrong type."));
    }

    fn err_text(s: &WireSchema, payload: &str) -> String {
        decode_line(&frame(payload), s, 0).unwrap_err().to_string()
    }

    #[test]
    fn too_few_tokens() {
        let s = schema(&[TypeTag::SfInt32, TypeTag::SfRotation]);
        let err = decode_line(&frame("1, 0, 0, 1"), &s, 0).unwrap_err();
        assert!(matches!(err, WireError::TooFewTokens { .. }));
        assert!(err.to_string().starts_with("Too few tokens in the line."));
    }

    #[test]
    fn unsupported_schema_types_fail_early() {
        let fields = vec![SlotDef::new("", "d", TypeTag::SfDouble)];
        assert!(matches!(WireSchema::new(fields), Err(HubError::Schema(_))));
    }
}
