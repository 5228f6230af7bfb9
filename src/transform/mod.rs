//! Caller-supplied policy for turning a recognized class descriptor into
//! a caller-preferred representation, including custom-payload parsing.
//! Dispatched dynamically, so an arbitrary number of transformers can be
//! installed without the parser knowing their concrete types.

mod default;

pub use default::DefaultTransformer;

use crate::error::Error;
use crate::model::{ClassDesc, Instance};
use crate::reader::BitReader;
use std::cell::RefCell;
use std::rc::Rc;

/// A transformer decides, for a given class descriptor, whether it owns
/// instance creation; if it does, it also owns finalizing the
/// representation once fields (and, for externalizable classes, custom
/// block-data) have been read.
///
/// All methods are dispatched dynamically (`Rc<dyn Transformer>`), so a
/// [`crate::GraphParser`] is not generic over the set of installed
/// transformers.
pub trait Transformer {
    /// Try to create an instance for `class_desc`. Returning `None` lets
    /// the next transformer in line (ultimately [`DefaultTransformer`])
    /// try instead. The handle for the returned instance is assigned by
    /// the caller immediately, before any field is read, so a
    /// self-referential field resolves to this same instance.
    fn create_instance(&self, class_desc: &Rc<ClassDesc>) -> Option<Rc<RefCell<Instance>>>;

    /// Consume an `Externalizable` class's block-data payload for
    /// `class_desc`. Returning `Ok(false)` is a structural failure
    /// (surfaced as [`Error::TransformerFailed`]); the default
    /// implementation always does so, since externalizable decoding is
    /// inherently class-specific.
    fn load_from_blockdata(
        &self,
        _instance: &Rc<RefCell<Instance>>,
        _class_desc: &Rc<ClassDesc>,
        _reader: &mut dyn BitReader,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    /// Called once, after the instance's full super-chain has been read,
    /// so the transformer can finalize `instance.representation` from
    /// the now-complete field/annotation data.
    fn load_from_instance(&self, _instance: &Rc<RefCell<Instance>>) -> Result<(), Error> {
        Ok(())
    }

    /// Hook for protocol-version-1 external content: a class whose
    /// `Externalizable` data was written without `SC_BLOCK_DATA` has no
    /// generic decoding, so the only way to read it is a transformer that
    /// knows the Java `writeObject` override's exact field layout and
    /// synthesizes a [`ClassDesc`] describing it. Returning `Ok(None)`
    /// leaves the class unsupported.
    fn load_custom_write_object(
        &self,
        _reader: &mut dyn BitReader,
        _class_name: &str,
    ) -> Result<Option<Rc<ClassDesc>>, Error> {
        Ok(None)
    }
}

/// Ordered list of user transformers, consulted before the always-present
/// [`DefaultTransformer`].
pub struct TransformerRegistry {
    user_transformers: Vec<Rc<dyn Transformer>>,
    default_transformer: Rc<DefaultTransformer>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self {
            user_transformers: Vec::new(),
            default_transformer: Rc::new(DefaultTransformer::new()),
        }
    }

    pub fn with_transformer(mut self, transformer: Rc<dyn Transformer>) -> Self {
        self.user_transformers.push(transformer);
        self
    }

    /// Create an instance for `class_desc`, returning it along with the
    /// transformer that owns it. Always succeeds: the default
    /// transformer's fallback is a generic record.
    pub fn create(&self, class_desc: &Rc<ClassDesc>) -> (Rc<RefCell<Instance>>, Rc<dyn Transformer>) {
        for transformer in &self.user_transformers {
            if let Some(instance) = transformer.create_instance(class_desc) {
                log::trace!("transformer claimed instance of {}", class_desc.name);
                return (instance, Rc::clone(transformer));
            }
        }
        log::trace!(
            "no user transformer claimed {}, falling back to default transformer",
            class_desc.name
        );
        let instance = self
            .default_transformer
            .create_instance(class_desc)
            .expect("default transformer always produces an instance");
        (instance, Rc::clone(&self.default_transformer) as Rc<dyn Transformer>)
    }

    /// Try each user transformer's block-data hook in order; `Ok(false)`
    /// if none of them claimed it.
    pub fn load_from_blockdata(
        &self,
        instance: &Rc<RefCell<Instance>>,
        class_desc: &Rc<ClassDesc>,
        reader: &mut dyn BitReader,
    ) -> Result<bool, Error> {
        for transformer in &self.user_transformers {
            if transformer.load_from_blockdata(instance, class_desc, reader)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Try each user transformer's custom-`writeObject` hook in order.
    pub fn custom_write_object(
        &self,
        reader: &mut dyn BitReader,
        class_name: &str,
    ) -> Result<Option<Rc<ClassDesc>>, Error> {
        for transformer in &self.user_transformers {
            if let Some(class_desc) = transformer.load_custom_write_object(reader, class_name)? {
                return Ok(Some(class_desc));
            }
        }
        Ok(None)
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
