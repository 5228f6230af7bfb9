//! Resolves `TC_CLASSDESC` / `TC_PROXYCLASSDESC` / `TC_CLASS` /
//! `TC_REFERENCE` / `TC_NULL` content positions into a [`ClassDesc`].

use crate::error::Error;
use crate::handle::HandleTable;
use crate::model::{ClassDesc, ClassDescFlags, FieldDesc, FieldType, Value};
use crate::parser::{read_content_value, ReadContext};
use crate::reader::BitReader;
use crate::tags::{
    TC_CLASSDESC, TC_ENDBLOCKDATA, TC_LONGSTRING, TC_NULL, TC_PROXYCLASSDESC, TC_REFERENCE, TC_STRING,
};
use std::rc::Rc;

/// Reads class descriptors and the `TC_CLASS`/null/reference positions
/// that can stand in for one. Needs mutable access to the same handle
/// table [`crate::parser::GraphParser`] uses for content values, since a
/// class descriptor is itself a handle-bearing entity.
pub struct ClassDescriptorResolver;

impl ClassDescriptorResolver {
    /// Resolve whatever class-descriptor-shaped tag appears next:
    /// `TC_NULL`, `TC_REFERENCE`, `TC_CLASSDESC`, or `TC_PROXYCLASSDESC`.
    /// Returns `None` only for `TC_NULL` (a field or superclass slot that
    /// legitimately has no class descriptor).
    pub(crate) fn resolve(
        reader: &mut dyn BitReader,
        handles: &mut HandleTable,
        ctx: &mut ReadContext,
    ) -> Result<Option<Rc<ClassDesc>>, Error> {
        let offset = reader.position();
        let tag = reader.read_u8()?;
        match tag {
            TC_NULL => Ok(None),
            TC_REFERENCE => {
                let handle = reader.read_u32()?;
                match handles.get(handle, offset)? {
                    Value::Class(desc) => Ok(Some(desc)),
                    _ => Err(Error::malformed(
                        offset,
                        None,
                        "TC_REFERENCE to a class descriptor did not resolve to one",
                    )),
                }
            }
            TC_CLASSDESC => Ok(Some(Self::read_classdesc(reader, handles, ctx, offset)?)),
            TC_PROXYCLASSDESC => Ok(Some(Self::read_proxy_classdesc(reader, handles, ctx)?)),
            other => Err(Error::malformed(
                offset,
                None,
                format!("expected a class descriptor tag, found 0x{:02x}", other),
            )),
        }
    }

    fn read_classdesc(
        reader: &mut dyn BitReader,
        handles: &mut HandleTable,
        ctx: &mut ReadContext,
        offset: u64,
    ) -> Result<Rc<ClassDesc>, Error> {
        let name = reader.read_utf_short()?;
        let serial_version_uid = reader.read_i64()?;

        // Reserve the handle before reading fields: a field's type
        // signature can reference this same class descriptor.
        let placeholder = Rc::new(ClassDesc {
            name: name.clone(),
            serial_version_uid,
            flags: ClassDescFlags::empty(),
            fields: Vec::new(),
            annotations: Vec::new(),
            super_class: None,
            interfaces: Vec::new(),
            is_proxy: false,
        });
        handles.assign(Value::Class(Rc::clone(&placeholder)));

        let flag_bits = reader.read_u8()?;
        let flags = ClassDescFlags::from_bits(flag_bits)
            .ok_or_else(|| Error::malformed(offset, Some(&name), "unknown class descriptor flag bits"))?;

        let field_count = reader.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Self::read_field_desc(reader, &name)?);
        }

        let annotations = read_annotations(reader, handles, ctx)?;
        let super_class = Self::resolve(reader, handles, ctx)?;

        let resolved = Rc::new(ClassDesc {
            name,
            serial_version_uid,
            flags,
            fields,
            annotations,
            super_class,
            interfaces: Vec::new(),
            is_proxy: false,
        });
        handles.replace_last(Value::Class(Rc::clone(&resolved)));
        Ok(resolved)
    }

    fn read_proxy_classdesc(
        reader: &mut dyn BitReader,
        handles: &mut HandleTable,
        ctx: &mut ReadContext,
    ) -> Result<Rc<ClassDesc>, Error> {
        let count = reader.read_u32()?;
        let mut interfaces = Vec::with_capacity(count as usize);
        for _ in 0..count {
            interfaces.push(reader.read_utf_short()?);
        }
        let name = interfaces
            .first()
            .cloned()
            .unwrap_or_else(|| "<dynamic proxy>".to_string());

        let placeholder = Rc::new(ClassDesc {
            name: name.clone(),
            serial_version_uid: 0,
            flags: ClassDescFlags::empty(),
            fields: Vec::new(),
            annotations: Vec::new(),
            super_class: None,
            interfaces: interfaces.clone(),
            is_proxy: true,
        });
        handles.assign(Value::Class(Rc::clone(&placeholder)));

        let annotations = read_annotations(reader, handles, ctx)?;
        let super_class = Self::resolve(reader, handles, ctx)?;

        let resolved = Rc::new(ClassDesc {
            name,
            serial_version_uid: 0,
            flags: ClassDescFlags::empty(),
            fields: Vec::new(),
            annotations,
            super_class,
            interfaces,
            is_proxy: true,
        });
        handles.replace_last(Value::Class(Rc::clone(&resolved)));
        Ok(resolved)
    }

    fn read_field_desc(reader: &mut dyn BitReader, class_name: &str) -> Result<FieldDesc, Error> {
        let offset = reader.position();
        let tag_byte = reader.read_u8()?;
        let type_tag = FieldType::try_from(tag_byte).map_err(|_| {
            Error::malformed(offset, Some(class_name), format!("unknown field type tag 0x{:02x}", tag_byte))
        })?;
        let name = reader.read_utf_short()?;
        let type_signature = if type_tag.is_primitive() {
            None
        } else {
            Some(Self::read_type_string(reader)?)
        };
        Ok(FieldDesc {
            name,
            type_tag,
            type_signature,
        })
    }

    /// An `Object`/`Array` field's type signature is itself a
    /// string-shaped content position (`TC_STRING`/`TC_LONGSTRING`/
    /// `TC_REFERENCE`), not a bare UTF string.
    fn read_type_string(reader: &mut dyn BitReader) -> Result<String, Error> {
        let offset = reader.position();
        let tag = reader.read_u8()?;
        match tag {
            TC_STRING => reader.read_utf_short(),
            TC_LONGSTRING => reader.read_utf_long(),
            other => Err(Error::malformed(
                offset,
                None,
                format!("expected a type-signature string, found tag 0x{:02x}", other),
            )),
        }
    }
}

/// Read the annotation sequence a class descriptor (or proxy descriptor)
/// writes between its fields and its superclass, terminated by
/// `TC_ENDBLOCKDATA`. An annotation slot is any content value, not just a
/// nested class descriptor, so this delegates straight into the same
/// content-value grammar [`crate::parser::GraphParser`] walks for
/// instance-level annotations; at the class-descriptor position it's
/// empty for the common case, non-empty only for classes with custom
/// static initializer data.
fn read_annotations(reader: &mut dyn BitReader, handles: &mut HandleTable, ctx: &mut ReadContext) -> Result<Vec<Value>, Error> {
    let mut values = Vec::new();
    loop {
        let offset = reader.position();
        match reader.peek_u8()? {
            None => return Err(Error::truncated(offset, ctx.current_class())),
            Some(TC_ENDBLOCKDATA) => {
                reader.read_u8()?;
                return Ok(values);
            }
            Some(_) => values.push(read_content_value(reader, handles, ctx)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserOptions;
    use crate::reader::SliceBitReader;
    use crate::transform::TransformerRegistry;

    fn context<'a>(registry: &'a TransformerRegistry, options: &'a ParserOptions, class_stack: &'a mut Vec<String>) -> ReadContext<'a> {
        ReadContext::new(registry, options, class_stack)
    }

    #[test]
    fn resolves_null_as_none() {
        let data = [0x70u8];
        let mut reader = SliceBitReader::new(&data);
        let mut handles = HandleTable::new();
        let registry = TransformerRegistry::new();
        let options = ParserOptions::new();
        let mut class_stack = Vec::new();
        let mut ctx = context(&registry, &options, &mut class_stack);
        let resolved = ClassDescriptorResolver::resolve(&mut reader, &mut handles, &mut ctx).unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn reads_a_classdesc_with_one_primitive_field() {
        // name "A" (len 1), uid 0, flags SC_SERIALIZABLE, 1 field (I count),
        // no annotations (TC_ENDBLOCKDATA), null superclass.
        let mut data = vec![0x72u8, 0x00, 0x01, b'A'];
        data.extend_from_slice(&0i64.to_be_bytes());
        data.push(0x02); // SC_SERIALIZABLE
        data.extend_from_slice(&1u16.to_be_bytes());
        data.push(b'I');
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(b"ct");
        data.push(0x78); // TC_ENDBLOCKDATA
        data.push(0x70); // TC_NULL superclass

        let mut reader = SliceBitReader::new(&data);
        let mut handles = HandleTable::new();
        let registry = TransformerRegistry::new();
        let options = ParserOptions::new();
        let mut class_stack = Vec::new();
        let mut ctx = context(&registry, &options, &mut class_stack);
        let desc = ClassDescriptorResolver::resolve(&mut reader, &mut handles, &mut ctx).unwrap().unwrap();
        assert_eq!(desc.name, "A");
        assert_eq!(desc.fields.len(), 1);
        assert_eq!(desc.fields[0].name, "ct");
        assert_eq!(desc.fields[0].type_tag, FieldType::Int);
        assert!(desc.super_class.is_none());
        assert_eq!(handles.len(), 1);
    }

    #[test]
    fn reference_resolves_to_previously_assigned_classdesc() {
        let mut handles = HandleTable::new();
        let placeholder = Rc::new(ClassDesc {
            name: "A".to_string(),
            serial_version_uid: 0,
            flags: ClassDescFlags::SC_SERIALIZABLE,
            fields: Vec::new(),
            annotations: Vec::new(),
            super_class: None,
            interfaces: Vec::new(),
            is_proxy: false,
        });
        let handle = handles.assign(Value::Class(Rc::clone(&placeholder)));
        let mut data = vec![0x71u8];
        data.extend_from_slice(&handle.to_be_bytes());
        let mut reader = SliceBitReader::new(&data);
        let registry = TransformerRegistry::new();
        let options = ParserOptions::new();
        let mut class_stack = Vec::new();
        let mut ctx = context(&registry, &options, &mut class_stack);
        let resolved = ClassDescriptorResolver::resolve(&mut reader, &mut handles, &mut ctx).unwrap().unwrap();
        assert!(Rc::ptr_eq(&resolved, &placeholder));
    }

    #[test]
    fn annotation_section_accepts_a_bare_string_value() {
        // name "A" (len 1), uid 0, SC_SERIALIZABLE, 0 fields, one bare
        // TC_STRING annotation, TC_ENDBLOCKDATA, null superclass.
        let mut data = vec![0x72u8, 0x00, 0x01, b'A'];
        data.extend_from_slice(&0i64.to_be_bytes());
        data.push(0x02);
        data.extend_from_slice(&0u16.to_be_bytes());
        data.push(TC_STRING);
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(b"note");
        data.push(0x78); // TC_ENDBLOCKDATA
        data.push(0x70); // TC_NULL superclass

        let mut reader = SliceBitReader::new(&data);
        let mut handles = HandleTable::new();
        let registry = TransformerRegistry::new();
        let options = ParserOptions::new();
        let mut class_stack = Vec::new();
        let mut ctx = context(&registry, &options, &mut class_stack);
        let desc = ClassDescriptorResolver::resolve(&mut reader, &mut handles, &mut ctx).unwrap().unwrap();
        assert_eq!(desc.annotations.len(), 1);
        assert_eq!(desc.annotations[0].as_str(), Some("note"));
    }
}
