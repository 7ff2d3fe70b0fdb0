//! AMF value types
//!
//! A single tagged representation for every value the AMF0 codec can carry.
//! Object-like values keep their properties in an ordered list rather than a
//! map: command extras are replayed onto a downloader command line in the
//! order the client sent them, so insertion order is part of the data.

/// A single property of an object-like value.
///
/// Top-level command arguments past the command object are positional and
/// carry no name; members of decoded objects always do.
#[derive(Debug, Clone, PartialEq)]
pub struct AmfProperty {
    pub name: Option<String>,
    pub value: AmfValue,
}

impl AmfProperty {
    pub fn named(name: impl Into<String>, value: AmfValue) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }

    pub fn anonymous(value: AmfValue) -> Self {
        Self { name: None, value }
    }
}

/// Unified AMF value representation
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// Null value (0x05)
    Null,

    /// Undefined value (0x06)
    Undefined,

    /// Boolean value (0x01)
    Boolean(bool),

    /// IEEE 754 double-precision floating point (0x00)
    Number(f64),

    /// UTF-8 string (0x02 / 0x0C)
    String(String),

    /// Dense array (0x0A)
    Array(Vec<AmfValue>),

    /// Key-value object with insertion order preserved (0x03)
    Object(Vec<(String, AmfValue)>),

    /// Associative array with a length hint (0x08)
    EcmaArray(Vec<(String, AmfValue)>),

    /// Typed object with class name (0x10)
    TypedObject {
        class_name: String,
        properties: Vec<(String, AmfValue)>,
    },

    /// Date value as milliseconds since Unix epoch (0x0B)
    Date(f64),

    /// XML document (0x0F)
    Xml(String),
}

impl AmfValue {
    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value's properties as an ordered slice
    pub fn as_object(&self) -> Option<&[(String, AmfValue)]> {
        match self {
            AmfValue::Object(p) => Some(p),
            AmfValue::EcmaArray(p) => Some(p),
            AmfValue::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    /// Try to get this value as an array reference
    pub fn as_array(&self) -> Option<&Vec<AmfValue>> {
        match self {
            AmfValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Get a property from an object value by name (first match wins)
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Get a string property from an object value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get a number property from an object value
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl<V: Into<AmfValue>> From<Vec<V>> for AmfValue {
    fn from(v: Vec<V>) -> Self {
        AmfValue::Array(v.into_iter().map(|x| x.into()).collect())
    }
}
