use std::io;
use thiserror::Error;

/// Byte offset into the stream at which an error was detected.
pub type Offset = u64;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad magic/version, unknown content tag, unexpected tag at a
    /// position, malformed modified-UTF-8, or a field-type mismatch.
    #[error("malformed stream at offset {offset}: {reason}{}", context_suffix(.class_name))]
    MalformedStream {
        offset: Offset,
        reason: String,
        class_name: Option<String>,
    },

    /// The byte source ended in the middle of a record.
    #[error("truncated stream at offset {offset}{}", context_suffix(.class_name))]
    Truncated {
        offset: Offset,
        class_name: Option<String>,
    },

    /// `TC_REFERENCE` pointed at a handle that was never assigned.
    #[error("unknown handle 0x{handle:x} referenced at offset {offset}")]
    UnknownHandle { handle: u32, offset: Offset },

    /// A feature the decoder does not implement: protocol-v1 external
    /// content without a transformer hook, an unexpected class-descriptor
    /// flag combination, or a resource limit configured via
    /// [`crate::ParserOptions`] being exceeded.
    #[error("unsupported: {reason}{}", context_suffix(.class_name))]
    Unsupported {
        reason: String,
        class_name: Option<String>,
    },

    /// A transformer declined to load block-data, or otherwise reported a
    /// structural failure while building its representation.
    #[error("transformer for class {class_name} failed: {reason}")]
    TransformerFailed { class_name: String, reason: String },

    /// The caller requested numeric-array acceleration but this build has
    /// no such facility wired in (it lives outside this crate).
    #[error("numeric array acceleration requested but not available")]
    NumericArrayUnavailable,

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn context_suffix(class_name: &Option<String>) -> String {
    match class_name {
        Some(name) => format!(" (in {})", name),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn malformed(offset: Offset, class_name: Option<&str>, reason: impl Into<String>) -> Self {
        Error::MalformedStream {
            offset,
            reason: reason.into(),
            class_name: class_name.map(str::to_owned),
        }
    }

    pub(crate) fn truncated(offset: Offset, class_name: Option<&str>) -> Self {
        Error::Truncated {
            offset,
            class_name: class_name.map(str::to_owned),
        }
    }

    pub(crate) fn unsupported(offset_class: Option<&str>, reason: impl Into<String>) -> Self {
        Error::Unsupported {
            reason: reason.into(),
            class_name: offset_class.map(str::to_owned),
        }
    }
}
