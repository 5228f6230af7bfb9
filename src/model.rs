//! The entities a stream can produce: primitive field types, class
//! descriptors, arrays, enum constants, and objects.

use crate::error::Error;
use bitflags::bitflags;
use num_enum::TryFromPrimitive;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

bitflags! {
    /// `ObjectStreamConstants` flag bits carried by a class descriptor.
    pub struct ClassDescFlags: u8 {
        const SC_WRITE_METHOD = 0x01;
        const SC_SERIALIZABLE = 0x02;
        const SC_EXTERNALIZABLE = 0x04;
        const SC_BLOCK_DATA = 0x08;
        const SC_ENUM = 0x10;
    }
}

/// A field's wire type tag. Primitive tags carry no signature; `Object`
/// and `Array` fields carry a type-signature string alongside this tag
/// (see [`FieldDesc::type_signature`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum FieldType {
    Byte = b'B',
    Char = b'C',
    Double = b'D',
    Float = b'F',
    Int = b'I',
    Long = b'J',
    Short = b'S',
    Boolean = b'Z',
    Array = b'[',
    Object = b'L',
}

impl FieldType {
    pub fn is_primitive(self) -> bool {
        !matches!(self, FieldType::Array | FieldType::Object)
    }
}

/// One declared field of a class descriptor: a type tag, a name, and
/// (only for `Object`/`Array` fields) the Java-encoded type signature.
#[derive(Clone, Debug)]
pub struct FieldDesc {
    pub name: String,
    pub type_tag: FieldType,
    pub type_signature: Option<String>,
}

/// A parsed `TC_CLASSDESC` / `TC_PROXYCLASSDESC` record. Immutable once
/// built; assigned a handle at the first byte of the record so recursive
/// back-references (a class that references itself through a field)
/// resolve correctly.
#[derive(Debug)]
pub struct ClassDesc {
    pub name: String,
    pub serial_version_uid: i64,
    pub flags: ClassDescFlags,
    pub fields: Vec<FieldDesc>,
    pub annotations: Vec<Value>,
    pub super_class: Option<Rc<ClassDesc>>,
    /// Non-empty only for a `TC_PROXYCLASSDESC`.
    pub interfaces: Vec<String>,
    pub is_proxy: bool,
}

impl ClassDesc {
    /// Ancestor chain from the most ancestral class down to (and
    /// including) `self`, the order fields are read in: each ancestor's
    /// declared fields before its subclass's.
    pub fn super_chain(self: &Rc<Self>) -> Vec<Rc<ClassDesc>> {
        let mut chain = vec![Rc::clone(self)];
        let mut current = Rc::clone(self);
        while let Some(parent) = current.super_class.clone() {
            chain.push(Rc::clone(&parent));
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// The element type tag of an array class descriptor's name (e.g.
    /// `[B` -> `Byte`, `[[I` -> `Array`, `[Ljava.lang.String;` -> `Object`).
    pub fn array_element_tag(&self, offset: u64) -> Result<FieldType, Error> {
        let tag_byte = self
            .name
            .as_bytes()
            .get(1)
            .copied()
            .ok_or_else(|| Error::malformed(offset, Some(&self.name), "array class name too short"))?;
        FieldType::try_from(tag_byte)
            .map_err(|_| Error::malformed(offset, Some(&self.name), "unknown array element tag"))
    }
}

/// Ordered, typed array contents. Byte arrays are an opaque byte
/// sequence rather than a list of signed integers.
#[derive(Clone, Debug)]
pub enum ArrayElements {
    Boolean(Vec<bool>),
    Byte(Vec<u8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    /// Object-array elements, or nested arrays (each element then being
    /// a `Value::Array`).
    Object(Vec<Value>),
}

impl ArrayElements {
    pub fn len(&self) -> usize {
        match self {
            ArrayElements::Boolean(v) => v.len(),
            ArrayElements::Byte(v) => v.len(),
            ArrayElements::Char(v) => v.len(),
            ArrayElements::Short(v) => v.len(),
            ArrayElements::Int(v) => v.len(),
            ArrayElements::Long(v) => v.len(),
            ArrayElements::Float(v) => v.len(),
            ArrayElements::Double(v) => v.len(),
            ArrayElements::Object(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct ArrayData {
    pub class_desc: Rc<ClassDesc>,
    pub element_type: FieldType,
    pub elements: ArrayElements,
}

#[derive(Debug)]
pub struct EnumConstant {
    pub class_desc: Rc<ClassDesc>,
    pub constant_name: String,
}

/// The transformer-chosen shape attached to an [`Instance`] once its
/// fields (and, for serializable classes with `SC_WRITE_METHOD`, its
/// annotations) have been fully read. `Record` is the default
/// transformer's fallback for unrecognized classes; the others are what
/// [`crate::transform::DefaultTransformer`] produces for recognized
/// collection types; `Custom` lets a caller-supplied transformer attach
/// an arbitrary shape.
pub enum Representation {
    Record,
    Sequence(Vec<Value>),
    Set(Vec<Value>),
    Mapping(Vec<(Value, Value)>),
    Custom(Box<dyn Any>),
}

impl fmt::Debug for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Record => write!(f, "Record"),
            Representation::Sequence(v) => f.debug_tuple("Sequence").field(v).finish(),
            Representation::Set(v) => f.debug_tuple("Set").field(v).finish(),
            Representation::Mapping(v) => f.debug_tuple("Mapping").field(v).finish(),
            Representation::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A parsed object entity: its owning class descriptor, per-ancestor
/// field data and annotations (super-chain order, most-ancestral first),
/// and the representation a transformer built from them.
#[derive(Debug)]
pub struct Instance {
    pub class_desc: Rc<ClassDesc>,
    pub fields: Vec<(Rc<ClassDesc>, HashMap<String, Value>)>,
    pub annotations: Vec<(Rc<ClassDesc>, Vec<Value>)>,
    pub representation: Representation,
}

impl Instance {
    pub fn new(class_desc: Rc<ClassDesc>) -> Self {
        Self {
            class_desc,
            fields: Vec::new(),
            annotations: Vec::new(),
            representation: Representation::Record,
        }
    }

    /// Field value declared directly by `ancestor`, if any.
    pub fn field_in(&self, ancestor: &str, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(c, _)| c.name == ancestor)
            .and_then(|(_, m)| m.get(name))
    }

    /// Annotations written by `ancestor`'s `writeObject`/externalizable
    /// payload, if any.
    pub fn annotations_in(&self, ancestor: &str) -> Option<&[Value]> {
        self.annotations
            .iter()
            .find(|(c, _)| c.name == ancestor)
            .map(|(_, a)| a.as_slice())
    }
}

/// The single value type returned from a content-position read. Entities
/// that can be referenced by a later `TC_REFERENCE` are held behind `Rc`
/// (objects and arrays additionally behind `RefCell`, since they may be
/// referenced by a field inside their own graph before being fully
/// populated). Declared primitive fields decode into the matching scalar
/// variant (`Boolean`/`Byte`/`Char`/`Short`/`Int`/`Long`/`Float`/`Double`)
/// rather than a raw byte block; `Block` is reserved for genuine
/// `TC_BLOCKDATA`/`TC_BLOCKDATA_LONG` payloads whose shape isn't known
/// ahead of time (annotation capacity markers, custom externalizable
/// content).
#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Raw `BLOCKDATA`/`BLOCKDATA_LONG` payload; never itself handle-bearing.
    Block(Rc<[u8]>),
    String(Rc<str>),
    Class(Rc<ClassDesc>),
    Array(Rc<RefCell<ArrayData>>),
    Enum(Rc<EnumConstant>),
    Object(Rc<RefCell<Instance>>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Rc::from(s.into()))
    }

    pub fn block(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Block(Rc::from(bytes.into().into_boxed_slice()))
    }

    /// Identity comparison for handle-bearing entities; value comparison
    /// for the rest. The sense a back-reference is required to resolve to
    /// "the same identity" as the entity originally assigned the handle.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Block(a), Value::Block(b)) => Rc::ptr_eq(a, b),
            (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Enum(a), Value::Enum(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Build a synthetic `java.util.ArrayList`-shaped object: no declared
    /// fields, annotations holding a capacity placeholder followed by the
    /// elements, matching the layout [`crate::transform::DefaultTransformer`]
    /// expects on the read side. Meant for constructing a graph to hand to
    /// [`crate::writer::Writer`].
    pub fn sequence(elements: Vec<Value>) -> Value {
        synthetic_collection("java.util.ArrayList", elements.clone(), Representation::Sequence(elements))
    }

    /// Same shape as [`Value::sequence`], named as a `java.util.HashSet`.
    pub fn set(elements: Vec<Value>) -> Value {
        synthetic_collection("java.util.HashSet", elements.clone(), Representation::Set(elements))
    }

    /// Build a synthetic `java.util.HashMap`-shaped object: annotations
    /// holding a capacity/load-factor placeholder followed by alternating
    /// key/value pairs.
    pub fn mapping(pairs: Vec<(Value, Value)>) -> Value {
        let class_desc = synthetic_class_desc("java.util.HashMap");
        let mut annotations = vec![Value::block(vec![0u8; 8])];
        for (k, v) in &pairs {
            annotations.push(k.clone());
            annotations.push(v.clone());
        }
        let mut instance = Instance::new(Rc::clone(&class_desc));
        instance.representation = Representation::Mapping(pairs);
        instance.annotations.push((class_desc, annotations));
        Value::Object(Rc::new(RefCell::new(instance)))
    }
}

fn synthetic_collection(name: &str, elements: Vec<Value>, representation: Representation) -> Value {
    let class_desc = synthetic_class_desc(name);
    let mut annotations = vec![Value::block(vec![0u8; 4])];
    annotations.extend(elements);
    let mut instance = Instance::new(Rc::clone(&class_desc));
    instance.representation = representation;
    instance.annotations.push((class_desc, annotations));
    Value::Object(Rc::new(RefCell::new(instance)))
}

fn synthetic_class_desc(name: &str) -> Rc<ClassDesc> {
    Rc::new(ClassDesc {
        name: name.to_string(),
        serial_version_uid: 0,
        flags: ClassDescFlags::SC_SERIALIZABLE | ClassDescFlags::SC_WRITE_METHOD,
        fields: Vec::new(),
        annotations: Vec::new(),
        super_class: None,
        interfaces: Vec::new(),
        is_proxy: false,
    })
}

impl fmt::Debug for Value {
    /// Deliberately shallow: an `Object`/`Array` only prints its class
    /// name/length rather than recursing into its fields, since a
    /// self-referential graph would otherwise recurse forever.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::Byte(b) => write!(f, "Byte({})", b),
            Value::Char(c) => write!(f, "Char({})", c),
            Value::Short(s) => write!(f, "Short({})", s),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Long(l) => write!(f, "Long({})", l),
            Value::Float(fl) => write!(f, "Float({})", fl),
            Value::Double(d) => write!(f, "Double({})", d),
            Value::Block(b) => write!(f, "Block({} bytes)", b.len()),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Class(c) => write!(f, "Class({})", c.name),
            Value::Array(a) => {
                let a = a.borrow();
                write!(f, "Array({:?}, len={})", a.element_type, a.elements.len())
            }
            Value::Enum(e) => write!(f, "Enum({}::{})", e.class_desc.name, e.constant_name),
            Value::Object(o) => match o.try_borrow() {
                Ok(o) => write!(f, "Object({})", o.class_desc.name),
                Err(_) => write!(f, "Object(<being constructed>)"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_class_desc(name: &str) -> Rc<ClassDesc> {
        Rc::new(ClassDesc {
            name: name.to_string(),
            serial_version_uid: 0,
            flags: ClassDescFlags::SC_SERIALIZABLE,
            fields: Vec::new(),
            annotations: Vec::new(),
            super_class: None,
            interfaces: Vec::new(),
            is_proxy: false,
        })
    }

    #[test]
    fn super_chain_orders_ancestor_first() {
        let base = leaf_class_desc("SuperAaaa");
        let mut child = leaf_class_desc("TestConcrete");
        Rc::get_mut(&mut child).unwrap().super_class = Some(Rc::clone(&base));
        let chain = child.super_chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name, "SuperAaaa");
        assert_eq!(chain[1].name, "TestConcrete");
    }

    #[test]
    fn array_element_tag_reads_second_byte() {
        let desc = leaf_class_desc("[B");
        assert_eq!(desc.array_element_tag(0).unwrap(), FieldType::Byte);
        let nested = leaf_class_desc("[[I");
        assert_eq!(nested.array_element_tag(0).unwrap(), FieldType::Array);
    }

    #[test]
    fn value_ptr_eq_distinguishes_identity() {
        let a = Value::string("x");
        let b = Value::string("x");
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }
}
