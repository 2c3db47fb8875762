//! PDF object model.
//!
//! Dictionaries keep insertion order so that rewritten objects (catalog,
//! pages, AcroForm) come out with their keys where the producer put them.

use indexmap::IndexMap;

/// Dictionary payload of a PDF dictionary or stream.
pub type Dictionary = IndexMap<String, Object>;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array, escapes decoded)
    String(Vec<u8>),
    /// Name (without the leading /)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary
    Dictionary(Dictionary),
    /// Stream (dictionary + raw, still-encoded data)
    Stream {
        /// Stream dictionary
        dict: Dictionary,
        /// Stream data
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Human-readable type name, without data.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Mutable dictionary access. Works for both Dictionary and Stream objects.
    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to string (bytes).
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Value of the `/Type` entry of a dictionary or stream.
    pub fn dict_type(&self) -> Option<&str> {
        self.as_dict()?.get("Type")?.as_name()
    }

    /// Look up a key in a dictionary or stream dictionary.
    pub fn get(&self, key: &str) -> Option<&Object> {
        self.as_dict()?.get(key)
    }

    /// Collect every indirect reference reachable inside this object
    /// (not following the references themselves).
    pub fn references(&self) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        collect_references(self, &mut out);
        out
    }
}

fn collect_references(obj: &Object, out: &mut Vec<ObjectRef>) {
    match obj {
        Object::Reference(r) => out.push(*r),
        Object::Array(items) => items.iter().for_each(|o| collect_references(o, out)),
        Object::Dictionary(dict) | Object::Stream { dict, .. } => {
            dict.values().for_each(|o| collect_references(o, out))
        },
        _ => {},
    }
}

/// Build a dictionary from `(key, value)` pairs.
pub fn dict<const N: usize>(entries: [(&str, Object); N]) -> Dictionary {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Shorthand for a name object.
pub fn name(value: &str) -> Object {
    Object::Name(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_accessors() {
        assert_eq!(Object::Integer(42).as_integer(), Some(42));
        assert_eq!(name("Type").as_name(), Some("Type"));
        assert!(Object::Null.is_null());
        assert_eq!(Object::String(b"Hi".to_vec()).as_string(), Some(&b"Hi"[..]));
        assert_eq!(
            Object::Reference(ObjectRef::new(3, 0)).as_reference(),
            Some(ObjectRef::new(3, 0))
        );
    }

    #[test]
    fn test_dict_type_and_get() {
        let obj = Object::Dictionary(dict([("Type", name("Sig")), ("V", Object::Integer(1))]));
        assert_eq!(obj.dict_type(), Some("Sig"));
        assert_eq!(obj.get("V"), Some(&Object::Integer(1)));
        assert!(obj.get("Missing").is_none());
    }

    #[test]
    fn test_dictionary_equality_ignores_order() {
        let a = Object::Dictionary(dict([("A", Object::Integer(1)), ("B", Object::Integer(2))]));
        let b = Object::Dictionary(dict([("B", Object::Integer(2)), ("A", Object::Integer(1))]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_references() {
        let obj = Object::Dictionary(dict([
            ("Kids", Object::Array(vec![Object::Reference(ObjectRef::new(4, 0))])),
            ("Parent", Object::Reference(ObjectRef::new(2, 0))),
        ]));
        let refs = obj.references();
        assert!(refs.contains(&ObjectRef::new(4, 0)));
        assert!(refs.contains(&ObjectRef::new(2, 0)));
    }

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new(12, 0).to_string(), "12 0 R");
    }
}
