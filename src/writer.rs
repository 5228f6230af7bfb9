//! Limited writer: emits the magic/version preamble, then serializes
//! scalar/string/collection graphs (and previously parsed generic
//! records, replayed from their captured field/annotation data) back
//! into the wire format. Does not emulate a class's `writeObject`/
//! `writeExternal` override; externalizable instances are rejected.

use crate::error::Error;
use crate::handle::BASE_WIRE_HANDLE;
use crate::model::{ArrayData, ArrayElements, ClassDesc, ClassDescFlags, EnumConstant, FieldDesc, FieldType, Instance, Value};
use crate::tags::{
    STREAM_MAGIC, STREAM_VERSION, TC_ARRAY, TC_BLOCKDATA, TC_BLOCKDATALONG, TC_CLASS, TC_CLASSDESC, TC_ENDBLOCKDATA,
    TC_ENUM, TC_NULL, TC_OBJECT, TC_PROXYCLASSDESC, TC_REFERENCE, TC_STRING,
};
use byteorder::{BigEndian, WriteBytesExt};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

fn value_identity(value: &Value) -> Option<usize> {
    match value {
        Value::Null
        | Value::Boolean(_)
        | Value::Byte(_)
        | Value::Char(_)
        | Value::Short(_)
        | Value::Int(_)
        | Value::Long(_)
        | Value::Float(_)
        | Value::Double(_)
        | Value::Block(_) => None,
        Value::String(s) => Some(Rc::as_ptr(s) as *const () as usize),
        Value::Class(c) => Some(Rc::as_ptr(c) as usize),
        Value::Array(a) => Some(Rc::as_ptr(a) as usize),
        Value::Enum(e) => Some(Rc::as_ptr(e) as usize),
        Value::Object(o) => Some(Rc::as_ptr(o) as usize),
    }
}

/// Mirror of [`crate::parser::GraphParser`] for the write direction. Not
/// `Clone`; a stream's handle tables are inherently stateful.
pub struct Writer<W: Write> {
    out: W,
    value_handles: HashMap<usize, u32>,
    class_handles: HashMap<usize, u32>,
    next_handle: u32,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            value_handles: HashMap::new(),
            class_handles: HashMap::new(),
            next_handle: BASE_WIRE_HANDLE,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn write_preamble(&mut self) -> Result<(), Error> {
        self.out.write_u16::<BigEndian>(STREAM_MAGIC)?;
        self.out.write_u16::<BigEndian>(STREAM_VERSION)?;
        Ok(())
    }

    fn claim_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn write_utf_short(&mut self, s: &str) -> Result<(), Error> {
        let encoded = cesu8::to_java_cesu8(s);
        self.out.write_u16::<BigEndian>(encoded.len() as u16)?;
        self.out.write_all(&encoded)?;
        Ok(())
    }

    /// Write one content-value-grammar position, the reverse of
    /// [`crate::parser::GraphParser`]'s read side: the public entry point
    /// for a top-level value.
    pub fn write_value(&mut self, value: &Value) -> Result<(), Error> {
        if let Some(key) = value_identity(value) {
            if let Some(&handle) = self.value_handles.get(&key) {
                self.out.write_u8(TC_REFERENCE)?;
                self.out.write_u32::<BigEndian>(handle)?;
                return Ok(());
            }
        }
        match value {
            Value::Null => Ok(self.out.write_u8(TC_NULL)?),
            Value::Boolean(_)
            | Value::Byte(_)
            | Value::Char(_)
            | Value::Short(_)
            | Value::Int(_)
            | Value::Long(_)
            | Value::Float(_)
            | Value::Double(_) => Err(Error::unsupported(
                None,
                "a bare primitive scalar is not a legal top-level content value; primitives are only ever field values",
            )),
            Value::Block(bytes) => self.write_block(bytes),
            Value::String(s) => self.write_string(s),
            Value::Class(class_desc) => self.write_class_value(class_desc),
            Value::Array(array) => self.write_array_value(array),
            Value::Enum(e) => self.write_enum_value(e),
            Value::Object(instance) => self.write_object_value(instance),
        }
    }

    fn write_block(&mut self, bytes: &Rc<[u8]>) -> Result<(), Error> {
        if bytes.len() <= u8::MAX as usize {
            self.out.write_u8(TC_BLOCKDATA)?;
            self.out.write_u8(bytes.len() as u8)?;
        } else {
            self.out.write_u8(TC_BLOCKDATALONG)?;
            self.out.write_u32::<BigEndian>(bytes.len() as u32)?;
        }
        self.out.write_all(bytes)?;
        Ok(())
    }

    fn write_string(&mut self, s: &Rc<str>) -> Result<(), Error> {
        let handle = self.claim_handle();
        self.value_handles.insert(Rc::as_ptr(s) as *const () as usize, handle);
        let encoded = cesu8::to_java_cesu8(s.as_ref());
        if encoded.len() <= u16::MAX as usize {
            self.out.write_u8(TC_STRING)?;
            self.out.write_u16::<BigEndian>(encoded.len() as u16)?;
        } else {
            self.out.write_u8(crate::tags::TC_LONGSTRING)?;
            self.out.write_u64::<BigEndian>(encoded.len() as u64)?;
        }
        self.out.write_all(&encoded)?;
        Ok(())
    }

    fn write_class_value(&mut self, class_desc: &Rc<ClassDesc>) -> Result<(), Error> {
        let handle = self.claim_handle();
        self.value_handles.insert(Rc::as_ptr(class_desc) as usize, handle);
        self.out.write_u8(TC_CLASS)?;
        self.write_class_desc(class_desc)
    }

    /// The `classDesc` production: `TC_NULL`, a back-reference, or a full
    /// `TC_CLASSDESC`/`TC_PROXYCLASSDESC` body. Tracked by its own handle
    /// namespace (a class descriptor's handle is distinct from the
    /// `newClass` handle wrapping it).
    fn write_class_desc(&mut self, class_desc: &Rc<ClassDesc>) -> Result<(), Error> {
        let key = Rc::as_ptr(class_desc) as usize;
        if let Some(&handle) = self.class_handles.get(&key) {
            self.out.write_u8(TC_REFERENCE)?;
            self.out.write_u32::<BigEndian>(handle)?;
            return Ok(());
        }
        if class_desc.is_proxy {
            self.out.write_u8(TC_PROXYCLASSDESC)?;
            self.out.write_u32::<BigEndian>(class_desc.interfaces.len() as u32)?;
            for interface in &class_desc.interfaces {
                self.write_utf_short(interface)?;
            }
            let handle = self.claim_handle();
            self.class_handles.insert(key, handle);
            self.write_annotation_values(&class_desc.annotations)?;
            self.write_super_class_desc(&class_desc.super_class)
        } else {
            self.out.write_u8(TC_CLASSDESC)?;
            self.write_utf_short(&class_desc.name)?;
            self.out.write_i64::<BigEndian>(class_desc.serial_version_uid)?;
            let handle = self.claim_handle();
            self.class_handles.insert(key, handle);
            self.out.write_u8(class_desc.flags.bits())?;
            self.out.write_u16::<BigEndian>(class_desc.fields.len() as u16)?;
            for field in &class_desc.fields {
                self.write_field_desc(field)?;
            }
            self.write_annotation_values(&class_desc.annotations)?;
            self.write_super_class_desc(&class_desc.super_class)
        }
    }

    fn write_super_class_desc(&mut self, super_class: &Option<Rc<ClassDesc>>) -> Result<(), Error> {
        match super_class {
            None => Ok(self.out.write_u8(TC_NULL)?),
            Some(parent) => self.write_class_desc(parent),
        }
    }

    fn write_field_desc(&mut self, field: &FieldDesc) -> Result<(), Error> {
        self.out.write_u8(field.type_tag as u8)?;
        self.write_utf_short(&field.name)?;
        if let Some(signature) = &field.type_signature {
            self.out.write_u8(TC_STRING)?;
            self.write_utf_short(signature)?;
        }
        Ok(())
    }

    fn write_annotation_values(&mut self, values: &[Value]) -> Result<(), Error> {
        for value in values {
            self.write_value(value)?;
        }
        Ok(self.out.write_u8(TC_ENDBLOCKDATA)?)
    }

    fn write_array_value(&mut self, array: &Rc<RefCell<ArrayData>>) -> Result<(), Error> {
        let handle = self.claim_handle();
        self.value_handles.insert(Rc::as_ptr(array) as usize, handle);
        self.out.write_u8(TC_ARRAY)?;
        let data = array.borrow();
        self.write_class_desc(&data.class_desc)?;
        self.out.write_i32::<BigEndian>(data.elements.len() as i32)?;
        match &data.elements {
            ArrayElements::Boolean(items) => {
                for b in items {
                    self.out.write_u8(if *b { 1 } else { 0 })?;
                }
            }
            ArrayElements::Byte(items) => self.out.write_all(items)?,
            ArrayElements::Char(items) => {
                for c in items {
                    self.out.write_u16::<BigEndian>(*c)?;
                }
            }
            ArrayElements::Short(items) => {
                for s in items {
                    self.out.write_i16::<BigEndian>(*s)?;
                }
            }
            ArrayElements::Int(items) => {
                for i in items {
                    self.out.write_i32::<BigEndian>(*i)?;
                }
            }
            ArrayElements::Long(items) => {
                for l in items {
                    self.out.write_i64::<BigEndian>(*l)?;
                }
            }
            ArrayElements::Float(items) => {
                for f in items {
                    self.out.write_f32::<BigEndian>(*f)?;
                }
            }
            ArrayElements::Double(items) => {
                for d in items {
                    self.out.write_f64::<BigEndian>(*d)?;
                }
            }
            ArrayElements::Object(items) => {
                for v in items {
                    self.write_value(v)?;
                }
            }
        }
        Ok(())
    }

    fn write_enum_value(&mut self, constant: &Rc<EnumConstant>) -> Result<(), Error> {
        let handle = self.claim_handle();
        self.value_handles.insert(Rc::as_ptr(constant) as usize, handle);
        self.out.write_u8(TC_ENUM)?;
        self.write_class_desc(&constant.class_desc)?;
        self.write_value(&Value::string(constant.constant_name.clone()))
    }

    fn write_object_value(&mut self, instance: &Rc<RefCell<Instance>>) -> Result<(), Error> {
        let handle = self.claim_handle();
        self.value_handles.insert(Rc::as_ptr(instance) as usize, handle);
        self.out.write_u8(TC_OBJECT)?;
        let data = instance.borrow();
        self.write_class_desc(&data.class_desc)?;
        for ancestor in data.class_desc.super_chain() {
            if ancestor.flags.contains(ClassDescFlags::SC_SERIALIZABLE) {
                let field_values = data.fields.iter().find(|(c, _)| c.name == ancestor.name).map(|(_, m)| m);
                for field in &ancestor.fields {
                    let value = field_values
                        .and_then(|m| m.get(&field.name))
                        .ok_or_else(|| Error::unsupported(Some(&ancestor.name), format!("no captured value for field {}", field.name)))?;
                    self.write_field_value(field.type_tag, value)?;
                }
                if ancestor.flags.contains(ClassDescFlags::SC_WRITE_METHOD) {
                    let annotations = data
                        .annotations
                        .iter()
                        .find(|(c, _)| c.name == ancestor.name)
                        .map(|(_, a)| a.as_slice())
                        .unwrap_or(&[]);
                    self.write_annotation_values(annotations)?;
                }
            } else if ancestor.flags.contains(ClassDescFlags::SC_EXTERNALIZABLE) {
                return Err(Error::unsupported(
                    Some(&ancestor.name),
                    "writer does not emulate writeExternal output",
                ));
            }
        }
        Ok(())
    }

    fn write_field_value(&mut self, tag: FieldType, value: &Value) -> Result<(), Error> {
        match (tag, value) {
            (FieldType::Object, _) | (FieldType::Array, _) => self.write_value(value),
            (FieldType::Boolean, Value::Boolean(b)) => Ok(self.out.write_u8(if *b { 1 } else { 0 })?),
            (FieldType::Byte, Value::Byte(b)) => Ok(self.out.write_i8(*b)?),
            (FieldType::Char, Value::Char(c)) => Ok(self.out.write_u16::<BigEndian>(*c)?),
            (FieldType::Short, Value::Short(s)) => Ok(self.out.write_i16::<BigEndian>(*s)?),
            (FieldType::Int, Value::Int(i)) => Ok(self.out.write_i32::<BigEndian>(*i)?),
            (FieldType::Long, Value::Long(l)) => Ok(self.out.write_i64::<BigEndian>(*l)?),
            (FieldType::Float, Value::Float(f)) => Ok(self.out.write_f32::<BigEndian>(*f)?),
            (FieldType::Double, Value::Double(d)) => Ok(self.out.write_f64::<BigEndian>(*d)?),
            (tag, other) => Err(Error::unsupported(
                None,
                format!("value {:?} does not match the {:?} field it's declared for", other, tag),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::GraphParser;
    use crate::reader::SliceBitReader;
    use crate::transform::TransformerRegistry;

    #[test]
    fn round_trips_a_flat_string() {
        let value = Value::string("hello");
        let mut writer = Writer::new(Vec::new());
        writer.write_preamble().unwrap();
        writer.write_value(&value).unwrap();
        let bytes = writer.into_inner();

        let registry = TransformerRegistry::new();
        let mut parser = GraphParser::from_reader(SliceBitReader::new(&bytes), &registry);
        let parsed = parser.parse_one().unwrap();
        assert_eq!(parsed.as_str(), Some("hello"));
    }

    #[test]
    fn round_trips_a_sequence() {
        let value = Value::sequence(vec![Value::string("a"), Value::string("b")]);
        let mut writer = Writer::new(Vec::new());
        writer.write_preamble().unwrap();
        writer.write_value(&value).unwrap();
        let bytes = writer.into_inner();

        let registry = TransformerRegistry::new();
        let mut parser = GraphParser::from_reader(SliceBitReader::new(&bytes), &registry);
        let parsed = parser.parse_one().unwrap();
        match parsed {
            Value::Object(instance) => match &instance.borrow().representation {
                crate::model::Representation::Sequence(items) => {
                    assert_eq!(items.len(), 2);
                    assert_eq!(items[0].as_str(), Some("a"));
                    assert_eq!(items[1].as_str(), Some("b"));
                }
                other => panic!("expected Sequence, got {:?}", other),
            },
            other => panic!("expected Object, got {:?}", other),
        }
    }

    #[test]
    fn back_reference_round_trips_identity() {
        let shared = Value::string("shared");
        let value = Value::sequence(vec![shared.clone(), shared]);
        let mut writer = Writer::new(Vec::new());
        writer.write_preamble().unwrap();
        writer.write_value(&value).unwrap();
        let bytes = writer.into_inner();

        let registry = TransformerRegistry::new();
        let mut parser = GraphParser::from_reader(SliceBitReader::new(&bytes), &registry);
        let parsed = parser.parse_one().unwrap();
        match parsed {
            Value::Object(instance) => match &instance.borrow().representation {
                crate::model::Representation::Sequence(items) => assert!(items[0].ptr_eq(&items[1])),
                other => panic!("expected Sequence, got {:?}", other),
            },
            other => panic!("expected Object, got {:?}", other),
        }
    }
}
