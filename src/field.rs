//! Decodes one declared field's value, dispatching primitive reads
//! directly into a typed `Value` variant and `Object`/`Array` fields back
//! into the graph parser's content-value grammar.

use crate::error::Error;
use crate::handle::HandleTable;
use crate::model::{FieldDesc, FieldType, Value};
use crate::parser::{read_content_value, ReadContext};
use crate::reader::BitReader;

pub struct FieldDecoder;

impl FieldDecoder {
    pub fn read_field(
        reader: &mut dyn BitReader,
        handles: &mut HandleTable,
        ctx: &mut ReadContext,
        field: &FieldDesc,
    ) -> Result<Value, Error> {
        match field.type_tag {
            // Java's `boolean` has only two valid wire values (0/1), but a
            // malformed or hostile stream could still send any byte; treat
            // any non-zero byte as true rather than rejecting it.
            FieldType::Boolean => Ok(Value::Boolean(reader.read_u8()? != 0)),
            FieldType::Byte => Ok(Value::Byte(reader.read_i8()?)),
            FieldType::Char => Ok(Value::Char(reader.read_u16()?)),
            FieldType::Short => Ok(Value::Short(reader.read_i16()?)),
            FieldType::Int => Ok(Value::Int(reader.read_i32()?)),
            FieldType::Long => Ok(Value::Long(reader.read_i64()?)),
            FieldType::Float => Ok(Value::Float(reader.read_f32()?)),
            FieldType::Double => Ok(Value::Double(reader.read_f64()?)),
            FieldType::Object | FieldType::Array => read_content_value(reader, handles, ctx),
        }
    }
}
