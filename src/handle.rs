//! Append-only indexed store of every referenceable entity produced by a
//! stream, indexed from [`BASE_WIRE_HANDLE`].

use crate::error::Error;
use crate::model::Value;

/// The first handle assigned in any stream (or after a `TC_RESET`).
pub const BASE_WIRE_HANDLE: u32 = 0x7E_0000;

#[derive(Default)]
pub struct HandleTable {
    entries: Vec<Value>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` and return the handle assigned to it. Handles are
    /// assigned in call order, starting at [`BASE_WIRE_HANDLE`].
    pub fn assign(&mut self, value: Value) -> u32 {
        let handle = BASE_WIRE_HANDLE + self.entries.len() as u32;
        self.entries.push(value);
        handle
    }

    /// Resolve a previously assigned handle. Fails with
    /// [`Error::UnknownHandle`] if `handle` is below the base or was
    /// never assigned (including after a reset).
    pub fn get(&self, handle: u32, offset: u64) -> Result<Value, Error> {
        if handle < BASE_WIRE_HANDLE {
            return Err(Error::UnknownHandle { handle, offset });
        }
        let index = (handle - BASE_WIRE_HANDLE) as usize;
        self.entries
            .get(index)
            .cloned()
            .ok_or(Error::UnknownHandle { handle, offset })
    }

    /// Overwrite the most recently assigned entry. Used when a handle had
    /// to be reserved with a placeholder value before the entity it
    /// belongs to (a class descriptor, an enum constant) was fully read,
    /// so a self-referential field within it still resolves to the right
    /// handle number.
    pub fn replace_last(&mut self, value: Value) {
        if let Some(last) = self.entries.last_mut() {
            *last = value;
        }
    }

    /// Clear the table; the next `assign` call again yields
    /// [`BASE_WIRE_HANDLE`]. Values already handed out to a caller remain
    /// valid — they are reference-counted independently of this table.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
