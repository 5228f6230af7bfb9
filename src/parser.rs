//! Top-level content-value grammar: the state machine that ties the
//! handle table, class-descriptor resolver, field decoder, and
//! transformer registry together into a full stream walk.

use crate::class_desc::ClassDescriptorResolver;
use crate::error::Error;
use crate::field::FieldDecoder;
use crate::handle::HandleTable;
use crate::model::{ArrayData, ArrayElements, ClassDesc, ClassDescFlags, EnumConstant, FieldType, Instance, Value};
use crate::reader::BitReader;
use crate::tags::{
    STREAM_MAGIC, STREAM_VERSION, TC_ARRAY, TC_BLOCKDATA, TC_BLOCKDATALONG, TC_CLASS, TC_ENDBLOCKDATA, TC_ENUM,
    TC_EXCEPTION, TC_LONGSTRING, TC_NULL, TC_OBJECT, TC_REFERENCE, TC_RESET, TC_STRING,
};
use crate::transform::TransformerRegistry;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Resource limits a caller can opt into; both default to unbounded,
/// matching the protocol itself (which places no ceiling on either).
#[derive(Clone, Debug, Default)]
pub struct ParserOptions {
    max_handles: Option<usize>,
    max_length: Option<u64>,
}

impl ParserOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`Error::Unsupported`] rather than grow the handle table
    /// past `max` entries. Useful when parsing untrusted input, where an
    /// attacker-controlled stream could otherwise force unbounded memory
    /// growth purely through back-reference bookkeeping.
    pub fn with_max_handles(mut self, max: usize) -> Self {
        self.max_handles = Some(max);
        self
    }

    /// Fail with [`Error::Unsupported`] rather than allocate an array or
    /// string longer than `max` elements/bytes.
    pub fn with_max_length(mut self, max: u64) -> Self {
        self.max_length = Some(max);
        self
    }
}

/// The bits of parser state a content-value read needs besides the reader
/// and handle table: which transformers are installed, which resource
/// limits apply, and the stack of enclosing class names (for error
/// context). Threaded explicitly through the free functions below so that
/// [`crate::class_desc::ClassDescriptorResolver`]'s own annotation reader
/// can call back into the same content-value grammar [`GraphParser`] uses,
/// rather than duplicating a restricted subset of it.
pub(crate) struct ReadContext<'a> {
    registry: &'a TransformerRegistry,
    options: &'a ParserOptions,
    class_stack: &'a mut Vec<String>,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(registry: &'a TransformerRegistry, options: &'a ParserOptions, class_stack: &'a mut Vec<String>) -> Self {
        Self {
            registry,
            options,
            class_stack,
        }
    }

    pub(crate) fn current_class(&self) -> Option<&str> {
        self.class_stack.last().map(String::as_str)
    }
}

fn check_handle_budget(handles: &HandleTable, ctx: &ReadContext) -> Result<(), Error> {
    if let Some(max) = ctx.options.max_handles {
        if handles.len() >= max {
            return Err(Error::unsupported(ctx.current_class(), "handle table exceeded the configured maximum"));
        }
    }
    Ok(())
}

fn check_length_budget(ctx: &ReadContext, len: u64) -> Result<(), Error> {
    if let Some(max) = ctx.options.max_length {
        if len > max {
            return Err(Error::unsupported(ctx.current_class(), "length exceeded the configured maximum"));
        }
    }
    Ok(())
}

/// The content-value grammar: every position a field, array element,
/// class-descriptor annotation, or top-level stream entry can hold.
pub(crate) fn read_content_value(reader: &mut dyn BitReader, handles: &mut HandleTable, ctx: &mut ReadContext) -> Result<Value, Error> {
    let offset = reader.position();
    let tag = reader.read_u8()?;
    match tag {
        TC_NULL => Ok(Value::Null),
        TC_REFERENCE => {
            let handle = reader.read_u32()?;
            handles.get(handle, offset)
        }
        TC_STRING => {
            check_handle_budget(handles, ctx)?;
            let s = reader.read_utf_short()?;
            let value = Value::string(s);
            handles.assign(value.clone());
            Ok(value)
        }
        TC_LONGSTRING => {
            check_handle_budget(handles, ctx)?;
            let s = reader.read_utf_long()?;
            let value = Value::string(s);
            handles.assign(value.clone());
            Ok(value)
        }
        TC_CLASS => {
            check_handle_budget(handles, ctx)?;
            let class_desc = ClassDescriptorResolver::resolve(reader, handles, ctx)?
                .ok_or_else(|| Error::malformed(offset, None, "TC_CLASS named a null class descriptor"))?;
            // `newClass` assigns its own handle in addition to the
            // nested class descriptor's handle.
            let value = Value::Class(class_desc);
            handles.assign(value.clone());
            Ok(value)
        }
        TC_ARRAY => read_array(reader, handles, ctx, offset),
        TC_ENUM => read_enum(reader, handles, ctx, offset),
        TC_OBJECT => read_object(reader, handles, ctx, offset),
        TC_BLOCKDATA => {
            let len = reader.read_u8()? as u64;
            read_block_data(reader, ctx, len)
        }
        TC_BLOCKDATALONG => {
            let len = reader.read_u32()? as u64;
            read_block_data(reader, ctx, len)
        }
        TC_EXCEPTION => Err(Error::unsupported(
            ctx.current_class(),
            "in-band TC_EXCEPTION: the writer failed mid-stream",
        )),
        other => Err(Error::malformed(
            offset,
            ctx.current_class(),
            format!("unexpected content tag 0x{:02x}", other),
        )),
    }
}

fn read_block_data(reader: &mut dyn BitReader, ctx: &ReadContext, len: u64) -> Result<Value, Error> {
    check_length_budget(ctx, len)?;
    let bytes = reader.read_bytes(len)?;
    Ok(Value::block(bytes))
}

/// Content values and raw block data up to `TC_ENDBLOCKDATA`: the shape
/// of a serializable class's `writeObject` output, and of an
/// externalizable class's block-data-framed payload.
pub(crate) fn read_annotations(reader: &mut dyn BitReader, handles: &mut HandleTable, ctx: &mut ReadContext) -> Result<Vec<Value>, Error> {
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

fn read_array(reader: &mut dyn BitReader, handles: &mut HandleTable, ctx: &mut ReadContext, offset: u64) -> Result<Value, Error> {
    check_handle_budget(handles, ctx)?;
    let class_desc = ClassDescriptorResolver::resolve(reader, handles, ctx)?
        .ok_or_else(|| Error::malformed(offset, None, "array class descriptor must not be null"))?;
    let element_type = class_desc.array_element_tag(offset)?;

    let placeholder = Rc::new(RefCell::new(ArrayData {
        class_desc: Rc::clone(&class_desc),
        element_type,
        elements: ArrayElements::Object(Vec::new()),
    }));
    handles.assign(Value::Array(Rc::clone(&placeholder)));

    let length = reader.read_i32()?;
    if length < 0 {
        return Err(Error::malformed(offset, Some(&class_desc.name), "negative array length"));
    }
    check_length_budget(ctx, length as u64)?;
    let length = length as usize;

    let elements = match element_type {
        FieldType::Boolean => {
            let mut v = Vec::with_capacity(length);
            for _ in 0..length {
                v.push(reader.read_u8()? != 0);
            }
            ArrayElements::Boolean(v)
        }
        FieldType::Byte => ArrayElements::Byte(reader.read_bytes(length as u64)?),
        FieldType::Char => {
            let mut v = Vec::with_capacity(length);
            for _ in 0..length {
                v.push(reader.read_u16()?);
            }
            ArrayElements::Char(v)
        }
        FieldType::Short => {
            let mut v = Vec::with_capacity(length);
            for _ in 0..length {
                v.push(reader.read_i16()?);
            }
            ArrayElements::Short(v)
        }
        FieldType::Int => {
            let mut v = Vec::with_capacity(length);
            for _ in 0..length {
                v.push(reader.read_i32()?);
            }
            ArrayElements::Int(v)
        }
        FieldType::Long => {
            let mut v = Vec::with_capacity(length);
            for _ in 0..length {
                v.push(reader.read_i64()?);
            }
            ArrayElements::Long(v)
        }
        FieldType::Float => {
            let mut v = Vec::with_capacity(length);
            for _ in 0..length {
                v.push(reader.read_f32()?);
            }
            ArrayElements::Float(v)
        }
        FieldType::Double => {
            let mut v = Vec::with_capacity(length);
            for _ in 0..length {
                v.push(reader.read_f64()?);
            }
            ArrayElements::Double(v)
        }
        FieldType::Object | FieldType::Array => {
            let mut v = Vec::with_capacity(length);
            for _ in 0..length {
                v.push(read_content_value(reader, handles, ctx)?);
            }
            ArrayElements::Object(v)
        }
    };

    placeholder.borrow_mut().elements = elements;
    Ok(Value::Array(placeholder))
}

fn read_enum(reader: &mut dyn BitReader, handles: &mut HandleTable, ctx: &mut ReadContext, offset: u64) -> Result<Value, Error> {
    check_handle_budget(handles, ctx)?;
    let class_desc = ClassDescriptorResolver::resolve(reader, handles, ctx)?
        .ok_or_else(|| Error::malformed(offset, None, "enum class descriptor must not be null"))?;

    // The handle for the enum constant is assigned before its name is
    // read (the name is itself a handle-bearing string), so reserve it
    // with a placeholder first.
    handles.assign(Value::Enum(Rc::new(EnumConstant {
        class_desc: Rc::clone(&class_desc),
        constant_name: String::new(),
    })));

    let name_value = read_content_value(reader, handles, ctx)?;
    let constant_name = name_value
        .as_str()
        .ok_or_else(|| Error::malformed(offset, Some(&class_desc.name), "enum constant name was not a string"))?
        .to_string();

    let resolved = Rc::new(EnumConstant {
        class_desc,
        constant_name,
    });
    handles.replace_last(Value::Enum(Rc::clone(&resolved)));
    Ok(Value::Enum(resolved))
}

fn read_object(reader: &mut dyn BitReader, handles: &mut HandleTable, ctx: &mut ReadContext, offset: u64) -> Result<Value, Error> {
    check_handle_budget(handles, ctx)?;
    let class_desc = ClassDescriptorResolver::resolve(reader, handles, ctx)?
        .ok_or_else(|| Error::malformed(offset, None, "object class descriptor must not be null"))?;

    let (instance, transformer) = ctx.registry.create(&class_desc);
    handles.assign(Value::Object(Rc::clone(&instance)));

    ctx.class_stack.push(class_desc.name.clone());
    let outcome = read_class_data(reader, handles, ctx, &instance, &class_desc);
    ctx.class_stack.pop();
    outcome?;

    transformer.load_from_instance(&instance)?;
    Ok(Value::Object(instance))
}

/// Walk `class_desc`'s super-chain ancestor-first, reading each
/// ancestor's declared fields and/or custom payload.
fn read_class_data(
    reader: &mut dyn BitReader,
    handles: &mut HandleTable,
    ctx: &mut ReadContext,
    instance: &Rc<RefCell<Instance>>,
    class_desc: &Rc<ClassDesc>,
) -> Result<(), Error> {
    for ancestor in class_desc.super_chain() {
        if ancestor.flags.contains(ClassDescFlags::SC_SERIALIZABLE) {
            let mut field_values = HashMap::with_capacity(ancestor.fields.len());
            for field in &ancestor.fields {
                let value = FieldDecoder::read_field(reader, handles, ctx, field)?;
                field_values.insert(field.name.clone(), value);
            }
            instance.borrow_mut().fields.push((Rc::clone(&ancestor), field_values));

            if ancestor.flags.contains(ClassDescFlags::SC_WRITE_METHOD) {
                let annotations = read_annotations(reader, handles, ctx)?;
                instance.borrow_mut().annotations.push((Rc::clone(&ancestor), annotations));
            }
        } else if ancestor.flags.contains(ClassDescFlags::SC_EXTERNALIZABLE) {
            if ancestor.flags.contains(ClassDescFlags::SC_BLOCK_DATA) {
                let consumed = ctx.registry.load_from_blockdata(instance, &ancestor, reader)?;
                if !consumed {
                    return Err(Error::TransformerFailed {
                        class_name: ancestor.name.clone(),
                        reason: "no transformer consumed the block-data payload".to_string(),
                    });
                }
            } else {
                match ctx.registry.custom_write_object(reader, &ancestor.name)? {
                    Some(synthetic) => {
                        instance.borrow_mut().annotations.push((synthetic, Vec::new()));
                    }
                    None => {
                        return Err(Error::unsupported(
                            Some(&ancestor.name),
                            "protocol-v1 externalizable content has no transformer to describe its layout",
                        ))
                    }
                }
            }
        }
    }
    Ok(())
}

/// Drives a single logical stream (one preamble, any number of top-level
/// content values) over a [`BitReader`]. Not `Clone`; a stream's handle
/// table and reader position are inherently stateful.
pub struct GraphParser<'a, R: BitReader> {
    reader: R,
    handles: HandleTable,
    registry: &'a TransformerRegistry,
    options: ParserOptions,
    class_stack: Vec<String>,
    preamble_checked: bool,
}

impl<'a, R: BitReader> GraphParser<'a, R> {
    pub fn from_reader(reader: R, registry: &'a TransformerRegistry) -> Self {
        Self::with_options(reader, registry, ParserOptions::default())
    }

    pub fn with_options(reader: R, registry: &'a TransformerRegistry, options: ParserOptions) -> Self {
        Self {
            reader,
            handles: HandleTable::new(),
            registry,
            options,
            class_stack: Vec::new(),
            preamble_checked: false,
        }
    }

    fn check_preamble(&mut self) -> Result<(), Error> {
        if self.preamble_checked {
            return Ok(());
        }
        let offset = self.reader.position();
        let magic = self.reader.read_u16()?;
        if magic != STREAM_MAGIC {
            return Err(Error::malformed(offset, None, format!("bad stream magic 0x{:04x}", magic)));
        }
        let version_offset = self.reader.position();
        let version = self.reader.read_u16()?;
        if version != STREAM_VERSION {
            return Err(Error::malformed(
                version_offset,
                None,
                format!("unsupported stream version 0x{:04x}", version),
            ));
        }
        self.preamble_checked = true;
        Ok(())
    }

    /// Parse and return the next top-level content value, consuming the
    /// stream preamble first if this is the first call.
    pub fn parse_one(&mut self) -> Result<Value, Error> {
        self.check_preamble()?;
        loop {
            match self.reader.peek_u8()? {
                Some(TC_RESET) => {
                    self.reader.read_u8()?;
                    self.handles.reset();
                }
                _ => {
                    let mut ctx = ReadContext::new(self.registry, &self.options, &mut self.class_stack);
                    return read_content_value(&mut self.reader, &mut self.handles, &mut ctx);
                }
            }
        }
    }

    /// Parse every remaining top-level content value up to a clean end of
    /// stream. A bare `TC_RESET` between values (or trailing at the end of
    /// the stream) is consumed here rather than in the content-value
    /// grammar itself: reset only ever occurs between top-level values,
    /// never while a field, array, or object is mid-construction, so it
    /// must not force another value to follow it.
    pub fn parse_all(&mut self) -> Result<Vec<Value>, Error> {
        self.check_preamble()?;
        let mut values = Vec::new();
        loop {
            match self.reader.peek_u8()? {
                None => return Ok(values),
                Some(TC_RESET) => {
                    self.reader.read_u8()?;
                    self.handles.reset();
                }
                Some(_) => {
                    let mut ctx = ReadContext::new(self.registry, &self.options, &mut self.class_stack);
                    values.push(read_content_value(&mut self.reader, &mut self.handles, &mut ctx)?);
                }
            }
        }
    }

    /// Discard the handle table as if a `TC_RESET` had just been read.
    /// Values already returned to the caller are unaffected: they carry
    /// their own `Rc`s, independent of this table.
    pub fn reset(&mut self) {
        self.handles.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SliceBitReader;

    fn parse_bytes<'a>(data: &'a [u8], registry: &'a TransformerRegistry) -> GraphParser<'a, SliceBitReader<'a>> {
        GraphParser::from_reader(SliceBitReader::new(data), registry)
    }

    #[test]
    fn rejects_bad_magic() {
        let registry = TransformerRegistry::new();
        let data = [0x00, 0x00, 0x00, 0x05];
        let mut parser = parse_bytes(&data, &registry);
        assert!(matches!(parser.parse_one(), Err(Error::MalformedStream { .. })));
    }

    #[test]
    fn parses_boolean_false_primitive_block() {
        // AC ED 00 05 77 01 00 : BLOCKDATA, length 1, byte 0x00.
        let registry = TransformerRegistry::new();
        let data = [0xAC, 0xED, 0x00, 0x05, 0x77, 0x01, 0x00];
        let mut parser = parse_bytes(&data, &registry);
        let value = parser.parse_one().unwrap();
        match value {
            Value::Block(b) => assert_eq!(&*b, &[0x00]),
            other => panic!("expected Block, got {:?}", other),
        }
    }

    #[test]
    fn reset_clears_handle_table() {
        let registry = TransformerRegistry::new();
        // AC ED 00 05 74 00 01 61 79 : short string "a", then TC_RESET.
        let data = [0xAC, 0xED, 0x00, 0x05, 0x74, 0x00, 0x01, b'a', 0x79];
        let mut parser = parse_bytes(&data, &registry);
        let values = parser.parse_all().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(parser.handles.len(), 0);
    }
}
