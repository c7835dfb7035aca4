//! The event record flowing through the hub.
//!
//! An [`Event`] is one timestamped value addressed by a scope
//! (`namespace/label`). Values are typed by [`TypeTag`], which doubles as the
//! element name of the on-disk line format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Type of an event value.
///
/// The string form (`sfint32`, `mfvec3f`, ...) is used both in log lines and
/// in slot schema files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    /// 32-bit signed integer.
    SfInt32,
    /// 64-bit signed integer.
    SfLong,
    /// 32-bit float.
    SfFloat,
    /// 64-bit float.
    SfDouble,
    /// Boolean.
    SfBool,
    /// UTF-8 string.
    SfString,
    /// Two floats.
    SfVec2f,
    /// Three floats.
    SfVec3f,
    /// Axis-angle rotation, four floats.
    SfRotation,
    /// Array of 32-bit integers.
    MfInt32,
    /// Array of 32-bit floats.
    MfFloat,
    /// Array of 64-bit floats.
    MfDouble,
    /// Array of booleans.
    MfBool,
    /// Array of strings.
    MfString,
    /// Array of 2-vectors.
    MfVec2f,
    /// Array of 3-vectors.
    MfVec3f,
    /// Array of rotations.
    MfRotation,
}

impl TypeTag {
    /// All supported tags.
    pub const ALL: [TypeTag; 17] = [
        TypeTag::SfInt32,
        TypeTag::SfLong,
        TypeTag::SfFloat,
        TypeTag::SfDouble,
        TypeTag::SfBool,
        TypeTag::SfString,
        TypeTag::SfVec2f,
        TypeTag::SfVec3f,
        TypeTag::SfRotation,
        TypeTag::MfInt32,
        TypeTag::MfFloat,
        TypeTag::MfDouble,
        TypeTag::MfBool,
        TypeTag::MfString,
        TypeTag::MfVec2f,
        TypeTag::MfVec3f,
        TypeTag::MfRotation,
    ];

    /// Name used in log lines and schema files.
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::SfInt32 => "sfint32",
            TypeTag::SfLong => "sflong",
            TypeTag::SfFloat => "sffloat",
            TypeTag::SfDouble => "sfdouble",
            TypeTag::SfBool => "sfbool",
            TypeTag::SfString => "sfstring",
            TypeTag::SfVec2f => "sfvec2f",
            TypeTag::SfVec3f => "sfvec3f",
            TypeTag::SfRotation => "sfrotation",
            TypeTag::MfInt32 => "mfint32",
            TypeTag::MfFloat => "mffloat",
            TypeTag::MfDouble => "mfdouble",
            TypeTag::MfBool => "mfbool",
            TypeTag::MfString => "mfstring",
            TypeTag::MfVec2f => "mfvec2f",
            TypeTag::MfVec3f => "mfvec3f",
            TypeTag::MfRotation => "mfrotation",
        }
    }

    /// Neutral value for a freshly created slot.
    pub fn initial_value(self) -> Value {
        match self {
            TypeTag::SfInt32 => Value::Int(0),
            TypeTag::SfLong => Value::Long(0),
            TypeTag::SfFloat => Value::Float(0.0),
            TypeTag::SfDouble => Value::Double(0.0),
            TypeTag::SfBool => Value::Bool(false),
            TypeTag::SfString => Value::String(String::new()),
            TypeTag::SfVec2f => Value::Vec2f([0.0; 2]),
            TypeTag::SfVec3f => Value::Vec3f([0.0; 3]),
            TypeTag::SfRotation => Value::Rotation([0.0, 0.0, 1.0, 0.0]),
            TypeTag::MfInt32 => Value::IntArray(Vec::new()),
            TypeTag::MfFloat => Value::FloatArray(Vec::new()),
            TypeTag::MfDouble => Value::DoubleArray(Vec::new()),
            TypeTag::MfBool => Value::BoolArray(Vec::new()),
            TypeTag::MfString => Value::StringArray(Vec::new()),
            TypeTag::MfVec2f => Value::Vec2fArray(Vec::new()),
            TypeTag::MfVec3f => Value::Vec3fArray(Vec::new()),
            TypeTag::MfRotation => Value::RotationArray(Vec::new()),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        TypeTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == lower)
            .ok_or_else(|| format!("unknown type tag '{s}'"))
    }
}

/// A typed event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `sfint32`
    Int(i32),
    /// `sflong`
    Long(i64),
    /// `sffloat`
    Float(f32),
    /// `sfdouble`
    Double(f64),
    /// `sfbool`
    Bool(bool),
    /// `sfstring`
    String(String),
    /// `sfvec2f`
    Vec2f([f32; 2]),
    /// `sfvec3f`
    Vec3f([f32; 3]),
    /// `sfrotation`
    Rotation([f32; 4]),
    /// `mfint32`
    IntArray(Vec<i32>),
    /// `mffloat`
    FloatArray(Vec<f32>),
    /// `mfdouble`
    DoubleArray(Vec<f64>),
    /// `mfbool`
    BoolArray(Vec<bool>),
    /// `mfstring`
    StringArray(Vec<String>),
    /// `mfvec2f`
    Vec2fArray(Vec<[f32; 2]>),
    /// `mfvec3f`
    Vec3fArray(Vec<[f32; 3]>),
    /// `mfrotation`
    RotationArray(Vec<[f32; 4]>),
}

impl Value {
    /// The tag matching this payload.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Int(_) => TypeTag::SfInt32,
            Value::Long(_) => TypeTag::SfLong,
            Value::Float(_) => TypeTag::SfFloat,
            Value::Double(_) => TypeTag::SfDouble,
            Value::Bool(_) => TypeTag::SfBool,
            Value::String(_) => TypeTag::SfString,
            Value::Vec2f(_) => TypeTag::SfVec2f,
            Value::Vec3f(_) => TypeTag::SfVec3f,
            Value::Rotation(_) => TypeTag::SfRotation,
            Value::IntArray(_) => TypeTag::MfInt32,
            Value::FloatArray(_) => TypeTag::MfFloat,
            Value::DoubleArray(_) => TypeTag::MfDouble,
            Value::BoolArray(_) => TypeTag::MfBool,
            Value::StringArray(_) => TypeTag::MfString,
            Value::Vec2fArray(_) => TypeTag::MfVec2f,
            Value::Vec3fArray(_) => TypeTag::MfVec3f,
            Value::RotationArray(_) => TypeTag::MfRotation,
        }
    }
}

/// One timestamped, scoped value.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Payload.
    pub value: Value,
    /// Namespace part of the scope; may be empty.
    pub namespace: String,
    /// Label part of the scope.
    pub label: String,
    /// Recording (or arrival) time in milliseconds.
    pub time: Timestamp,
}

impl Event {
    /// Build an event from its parts.
    pub fn new(
        value: Value,
        namespace: impl Into<String>,
        label: impl Into<String>,
        time: Timestamp,
    ) -> Self {
        Self {
            value,
            namespace: namespace.into(),
            label: label.into(),
            time,
        }
    }

    /// Build an event from a `namespace/label` scope string.
    pub fn with_scope(value: Value, scope: &str, time: Timestamp) -> Self {
        let (namespace, label) = split_scope(scope);
        Self::new(value, namespace, label, time)
    }

    /// Type of the payload.
    pub fn type_tag(&self) -> TypeTag {
        self.value.type_tag()
    }

    /// `namespace/label`, or just the label when there is no namespace.
    pub fn scope(&self) -> String {
        join_scope(&self.namespace, &self.label)
    }
}

/// Split a scope at its last `/`.
pub fn split_scope(scope: &str) -> (&str, &str) {
    match scope.rfind('/') {
        Some(idx) => (&scope[..idx], &scope[idx + 1..]),
        None => ("", scope),
    }
}

/// Join namespace and label into a scope.
pub fn join_scope(namespace: &str, label: &str) -> String {
    if namespace.is_empty() {
        label.to_string()
    } else {
        format!("{namespace}/{label}")
    }
}
