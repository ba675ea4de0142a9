//! Values that cross the external-function boundary

use super::AbiError;
use std::fmt;

/// Discriminator carried by every value in a call frame and every slot of a
/// function descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int32 = 1,
    Float64 = 2,
    String = 3,
    /// Reserved by the guest. No decode path exists for it.
    Array = 4,
}

impl TypeTag {
    pub const ALL: [TypeTag; 4] = [
        TypeTag::Int32,
        TypeTag::Float64,
        TypeTag::String,
        TypeTag::Array,
    ];

    pub fn from_wire(raw: i64) -> Result<Self, AbiError> {
        match raw {
            1 => Ok(TypeTag::Int32),
            2 => Ok(TypeTag::Float64),
            3 => Ok(TypeTag::String),
            4 => Ok(TypeTag::Array),
            other => Err(AbiError::InvalidTag(other)),
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// Number of 64-bit payload words following the tag word in a frame.
    pub fn payload_words(self) -> usize {
        match self {
            TypeTag::Int32 | TypeTag::Float64 => 1,
            TypeTag::String => 2,
            TypeTag::Array => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Int32 => "int",
            TypeTag::Float64 => "real",
            TypeTag::String => "string",
            TypeTag::Array => "array",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded argument
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Float64(f64),
    String(String),
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Int32(_) => TypeTag::Int32,
            Value::Float64(_) => TypeTag::Float64,
            Value::String(_) => TypeTag::String,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl TryFrom<Value> for i32 {
    type Error = AbiError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Int32(v) => Ok(v),
            other => Err(AbiError::TypeMismatch {
                expected: TypeTag::Int32,
                got: other.tag(),
            }),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = AbiError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Float64(v) => Ok(v),
            other => Err(AbiError::TypeMismatch {
                expected: TypeTag::Float64,
                got: other.tag(),
            }),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = AbiError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(AbiError::TypeMismatch {
                expected: TypeTag::String,
                got: other.tag(),
            }),
        }
    }
}

/// Host types that can appear as a typed external-function parameter.
///
/// The associated tag is what gets written into the function descriptor, so
/// the guest checks call sites against it.
pub trait ArgType: TryFrom<Value, Error = AbiError> + 'static {
    const TAG: TypeTag;
}

impl ArgType for i32 {
    const TAG: TypeTag = TypeTag::Int32;
}

impl ArgType for f64 {
    const TAG: TypeTag = TypeTag::Float64;
}

impl ArgType for String {
    const TAG: TypeTag = TypeTag::String;
}

/// Ordered argument and return tags of one external function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub args: Vec<TypeTag>,
    pub rets: Vec<TypeTag>,
}

impl Signature {
    pub fn new(args: impl Into<Vec<TypeTag>>, rets: impl Into<Vec<TypeTag>>) -> Self {
        Self {
            args: args.into(),
            rets: rets.into(),
        }
    }

    pub fn uses_array(&self) -> bool {
        self.args
            .iter()
            .chain(self.rets.iter())
            .any(|tag| *tag == TypeTag::Array)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |tags: &[TypeTag]| {
            tags.iter()
                .map(|t| t.name())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.args), join(&self.rets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags() {
        for tag in TypeTag::ALL {
            assert_eq!(TypeTag::from_wire(tag.to_wire() as i64), Ok(tag));
        }
        assert_eq!(TypeTag::from_wire(0), Err(AbiError::InvalidTag(0)));
        assert_eq!(TypeTag::from_wire(5), Err(AbiError::InvalidTag(5)));
        assert_eq!(TypeTag::from_wire(-1), Err(AbiError::InvalidTag(-1)));
    }

    #[test]
    fn typed_conversion_does_not_coerce() {
        assert_eq!(i32::try_from(Value::Int32(7)), Ok(7));
        assert_eq!(
            i32::try_from(Value::Float64(7.0)),
            Err(AbiError::TypeMismatch {
                expected: TypeTag::Int32,
                got: TypeTag::Float64
            })
        );
        assert!(String::try_from(Value::Int32(1)).is_err());
        assert_eq!(f64::try_from(Value::Float64(0.25)), Ok(0.25));
    }

    #[test]
    fn signature_display() {
        let sig = Signature::new([TypeTag::String, TypeTag::Int32], []);
        assert_eq!(sig.to_string(), "(string, int) -> ()");
        assert!(!sig.uses_array());
        assert!(Signature::new([], [TypeTag::Array]).uses_array());
    }
}
