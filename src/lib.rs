//! Reader (and, behind the `writer` feature, a limited writer) for the
//! Sun/Oracle Java Object Serialization Stream Protocol: byte-level
//! parsing of primitives, strings, classes, arrays, enums, and nested
//! objects, including back-references, custom `writeObject` payloads, and
//! `Externalizable` data.
//!
//! ```no_run
//! use javaobj::{parse_all, TransformerRegistry};
//!
//! # fn run(bytes: &[u8]) -> Result<(), javaobj::Error> {
//! let registry = TransformerRegistry::new();
//! let values = parse_all(bytes, &registry)?;
//! for value in values {
//!     println!("{:?}", value);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod class_desc;
pub mod error;
mod field;
mod handle;
mod model;
mod parser;
mod reader;
mod tags;
pub mod transform;
#[cfg(feature = "writer")]
pub mod writer;

pub use error::Error;
pub use handle::BASE_WIRE_HANDLE;
pub use model::{ArrayData, ArrayElements, ClassDesc, ClassDescFlags, EnumConstant, FieldDesc, FieldType, Instance, Representation, Value};
pub use parser::{GraphParser, ParserOptions};
pub use reader::{BitReader, SliceBitReader, StreamBitReader};
pub use transform::{DefaultTransformer, Transformer, TransformerRegistry};
#[cfg(feature = "writer")]
pub use writer::Writer;

use std::io::Read;

/// Parse the next top-level value from `source`, checking the stream
/// preamble if this is the first value read from it. One-shot
/// convenience wrapper around [`GraphParser::parse_one`] for a `Read`
/// source; build a [`GraphParser`] directly to parse more than one value
/// from the same stream.
pub fn parse_one(source: impl Read, registry: &TransformerRegistry) -> Result<Value, Error> {
    let mut parser = GraphParser::from_reader(StreamBitReader::new(source), registry);
    parser.parse_one()
}

/// Parse every top-level value in `source` up to a clean end of stream.
pub fn parse_all(source: impl Read, registry: &TransformerRegistry) -> Result<Vec<Value>, Error> {
    let mut parser = GraphParser::from_reader(StreamBitReader::new(source), registry);
    parser.parse_all()
}
