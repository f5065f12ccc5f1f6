//! Tagged property values and their declared kinds.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Rust type carried by [`Value::Object`].
#[derive(Clone, Copy)]
pub struct ObjectType {
    id: TypeId,
    name: &'static str,
}

impl ObjectType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> TypeId {
        self.id
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ObjectType {}

impl Hash for ObjectType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Object(ObjectType),
}

impl ValueKind {
    pub fn object<T: Any>() -> Self {
        ValueKind::Object(ObjectType::of::<T>())
    }

    /// Reference-semantics kinds accept `Null` and default to it.
    pub fn is_reference(&self) -> bool {
        matches!(self, ValueKind::Text | ValueKind::Object(_))
    }

    /// Default used when a property is registered without an explicit one.
    pub fn zero(&self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Text | ValueKind::Object(_) => Value::Null,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => self.is_reference(),
            (ValueKind::Bool, Value::Bool(_))
            | (ValueKind::Int, Value::Int(_))
            | (ValueKind::Float, Value::Float(_))
            | (ValueKind::Text, Value::Text(_)) => true,
            (ValueKind::Object(expected), Value::Object(object)) => {
                (**object).type_id() == expected.id
            }
            _ => false,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => f.write_str("bool"),
            ValueKind::Int => f.write_str("int"),
            ValueKind::Float => f.write_str("float"),
            ValueKind::Text => f.write_str("text"),
            ValueKind::Object(object) => f.write_str(object.name()),
        }
    }
}

/// A property value.
///
/// Objects are shared and compare by reference, like the host objects they stand for.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Object(Rc<dyn Any>),
}

impl Value {
    pub fn object<T: Any>(value: T) -> Self {
        Value::Object(Rc::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Object(object) => object.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Short name of the runtime variant, used in error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Object(_) => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // bitwise, so a stored NaN equals itself
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::Object(object) => write!(f, "Object({:p})", Rc::as_ptr(object)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Object(_) => f.write_str("<object>"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Brush(u8);

    #[test]
    fn value_kinds_default_to_zero_or_null() {
        assert_eq!(ValueKind::Bool.zero(), Value::Bool(false));
        assert_eq!(ValueKind::Int.zero(), Value::Int(0));
        assert_eq!(ValueKind::Float.zero(), Value::Float(0.0));
        assert_eq!(ValueKind::Text.zero(), Value::Null);
        assert_eq!(ValueKind::object::<Brush>().zero(), Value::Null);
    }

    #[test]
    fn null_is_only_accepted_by_reference_kinds() {
        assert!(ValueKind::Text.accepts(&Value::Null));
        assert!(ValueKind::object::<Brush>().accepts(&Value::Null));
        assert!(!ValueKind::Int.accepts(&Value::Null));
        assert!(!ValueKind::Bool.accepts(&Value::Null));
    }

    #[test]
    fn object_kind_checks_the_inner_type() {
        let kind = ValueKind::object::<Brush>();
        assert!(kind.accepts(&Value::object(Brush(3))));
        assert!(!kind.accepts(&Value::object(7u8)));
        assert!(!kind.accepts(&Value::from("brush")));
    }

    #[test]
    fn objects_compare_by_reference() {
        let a = Value::object(Brush(1));
        let b = Value::object(Brush(1));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<Brush>().map(|b| b.0), Some(1));
    }

    #[test]
    fn floats_compare_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(0.5), Value::from(0.5));
        assert_ne!(Value::Float(1.0), Value::Float(2.0));
    }

    #[test]
    fn mixed_variants_are_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Null, Value::Text(String::new()));
    }
}
