//! Ships conversions for the common standard-library collection classes;
//! anything else becomes a generic record.

use super::Transformer;
use crate::error::Error;
use crate::model::{ClassDesc, Instance, Representation, Value};
use std::cell::RefCell;
use std::rc::Rc;

const MAPPING_CLASSES: &[&str] = &[
    "java.util.HashMap",
    "java.util.Hashtable",
    "java.util.LinkedHashMap",
    "java.util.TreeMap",
];

const SEQUENCE_CLASSES: &[&str] = &[
    "java.util.ArrayList",
    "java.util.LinkedList",
    "java.util.Vector",
    "java.util.concurrent.ConcurrentLinkedQueue",
    "java.util.ArrayDeque",
];

const SET_CLASSES: &[&str] = &[
    "java.util.HashSet",
    "java.util.LinkedHashSet",
    "java.util.TreeSet",
];

#[derive(Default)]
pub struct DefaultTransformer {
    _private: (),
}

impl DefaultTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The annotation list for a recognized collection always opens with one
/// block-data entry (capacity/load-factor/size, in whatever layout the
/// Java class wrote it); its bytes are skipped rather than decoded
/// before reading the pairs/elements that follow.
fn drop_leading_block(annotations: &[Value]) -> &[Value] {
    match annotations.first() {
        Some(Value::Block(_)) => &annotations[1..],
        _ => annotations,
    }
}

fn build_mapping(annotations: &[Value]) -> Vec<(Value, Value)> {
    let rest = drop_leading_block(annotations);
    let mut pairs = Vec::with_capacity(rest.len() / 2);
    let mut iter = rest.iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((key.clone(), value.clone()));
    }
    pairs
}

fn build_elements(annotations: &[Value]) -> Vec<Value> {
    drop_leading_block(annotations).to_vec()
}

impl Transformer for DefaultTransformer {
    fn create_instance(&self, class_desc: &Rc<ClassDesc>) -> Option<Rc<RefCell<Instance>>> {
        Some(Rc::new(RefCell::new(Instance::new(Rc::clone(class_desc)))))
    }

    fn load_from_instance(&self, instance: &Rc<RefCell<Instance>>) -> Result<(), Error> {
        let mut instance = instance.borrow_mut();
        let class_name = instance.class_desc.name.clone();

        let representation = if MAPPING_CLASSES.contains(&class_name.as_str()) {
            let annotations = instance.annotations_in(&class_name).unwrap_or(&[]);
            Some(Representation::Mapping(build_mapping(annotations)))
        } else if SEQUENCE_CLASSES.contains(&class_name.as_str()) {
            let annotations = instance.annotations_in(&class_name).unwrap_or(&[]);
            Some(Representation::Sequence(build_elements(annotations)))
        } else if SET_CLASSES.contains(&class_name.as_str()) {
            let annotations = instance.annotations_in(&class_name).unwrap_or(&[]);
            Some(Representation::Set(build_elements(annotations)))
        } else {
            None
        };

        if let Some(representation) = representation {
            log::trace!("default transformer recognized {} as a collection", class_name);
            instance.representation = representation;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassDescFlags;

    fn class_desc(name: &str) -> Rc<ClassDesc> {
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

    #[test]
    fn recognizes_hash_map_as_mapping() {
        let transformer = DefaultTransformer::new();
        let class_desc = class_desc("java.util.HashMap");
        let instance = transformer.create_instance(&class_desc).unwrap();
        instance.borrow_mut().annotations.push((
            Rc::clone(&class_desc),
            vec![
                Value::block(vec![0u8; 8]),
                Value::string("k1"),
                Value::Null,
                Value::string("k2"),
                Value::string("value2"),
            ],
        ));
        transformer.load_from_instance(&instance).unwrap();
        match &instance.borrow().representation {
            Representation::Mapping(pairs) => {
                assert_eq!(pairs.len(), 2);
                assert_eq!(pairs[0].0.as_str(), Some("k1"));
                assert!(matches!(pairs[0].1, Value::Null));
                assert_eq!(pairs[1].0.as_str(), Some("k2"));
                assert_eq!(pairs[1].1.as_str(), Some("value2"));
            }
            other => panic!("expected Mapping, got {:?}", other),
        }
    }

    #[test]
    fn unrecognized_class_stays_a_record() {
        let transformer = DefaultTransformer::new();
        let class_desc = class_desc("com.example.Widget");
        let instance = transformer.create_instance(&class_desc).unwrap();
        transformer.load_from_instance(&instance).unwrap();
        assert!(matches!(instance.borrow().representation, Representation::Record));
    }
}
