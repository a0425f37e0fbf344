//! PDF dictionary implementation

use indexmap::IndexMap;
use crate::error::{PDFError, PDFResult};
use super::object::{write_name, ObjectId, PDFValue};

/// PDF dictionary object.
///
/// Keys are raw name bytes and keep insertion order, so a dictionary serializes the way it was
/// read or built. A dictionary is owned by exactly one value; merging either consumes the other
/// dictionary or clones it explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: IndexMap<Vec<u8>, PDFValue>,
}

impl Dictionary {
    /// Create new dictionary
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Dictionary with a `/Type` entry
    pub fn with_type(type_name: &str) -> Self {
        let mut dict = Self::new();
        dict.set("Type", PDFValue::name(type_name));
        dict
    }

    /// Get value by key
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<&PDFValue> {
        self.entries.get(key.as_ref())
    }

    /// Get mutable value by key
    pub fn get_mut(&mut self, key: impl AsRef<[u8]>) -> Option<&mut PDFValue> {
        self.entries.get_mut(key.as_ref())
    }

    /// Check whether a key is present
    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> bool {
        self.entries.contains_key(key.as_ref())
    }

    /// Get integer value
    pub fn get_integer(&self, key: impl AsRef<[u8]>) -> Option<i64> {
        self.get(key).and_then(PDFValue::as_i64)
    }

    /// Get numeric value
    pub fn get_number(&self, key: impl AsRef<[u8]>) -> Option<f64> {
        self.get(key).and_then(PDFValue::as_f64)
    }

    /// Get boolean value
    pub fn get_bool(&self, key: impl AsRef<[u8]>) -> Option<bool> {
        self.get(key).and_then(PDFValue::as_bool)
    }

    /// Get name value
    pub fn get_name(&self, key: impl AsRef<[u8]>) -> Option<&[u8]> {
        self.get(key).and_then(PDFValue::as_name)
    }

    /// Get string bytes
    pub fn get_string(&self, key: impl AsRef<[u8]>) -> Option<&[u8]> {
        self.get(key).and_then(PDFValue::as_string)
    }

    /// Get array value
    pub fn get_array(&self, key: impl AsRef<[u8]>) -> Option<&[PDFValue]> {
        self.get(key).and_then(PDFValue::as_array)
    }

    /// Get nested dictionary
    pub fn get_dict(&self, key: impl AsRef<[u8]>) -> Option<&Dictionary> {
        match self.get(key) {
            Some(PDFValue::Dictionary(d)) => Some(d),
            _ => None,
        }
    }

    /// Get reference value
    pub fn get_reference(&self, key: impl AsRef<[u8]>) -> Option<ObjectId> {
        self.get(key).and_then(PDFValue::as_reference)
    }

    /// Get a required integer entry
    pub fn require_integer(&self, key: &str) -> PDFResult<i64> {
        match self.get(key) {
            Some(PDFValue::Number(n)) => Ok(*n as i64),
            Some(other) => Err(PDFError::invalid_dict_value(
                key,
                format!("expected number, found {}", other.type_name()),
            )),
            None => Err(PDFError::MissingDictionaryEntry(key.to_string())),
        }
    }

    /// Check the `/Type` entry
    pub fn has_type(&self, type_name: &str) -> bool {
        self.get_name("Type") == Some(type_name.as_bytes())
    }

    /// Set value
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl Into<PDFValue>) {
        self.entries.insert(key.as_ref().to_vec(), value.into());
    }

    /// Set reference value
    pub fn set_reference(&mut self, key: impl AsRef<[u8]>, id: ObjectId) {
        self.set(key, PDFValue::Reference(id));
    }

    /// Remove an entry, keeping the order of the others
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Option<PDFValue> {
        self.entries.shift_remove(key.as_ref())
    }

    /// Move every entry of `other` into this dictionary; `other` wins on conflicts
    pub fn merge(&mut self, other: Dictionary) {
        for (key, value) in other.entries {
            self.entries.insert(key, value);
        }
    }

    /// Copy entries of `other` whose keys are absent here
    pub fn merge_missing(&mut self, other: &Dictionary) {
        for (key, value) in &other.entries {
            if !self.entries.contains_key(key) {
                self.entries.insert(key.clone(), value.clone());
            }
        }
    }

    /// New dictionary holding this one's entries overlaid with `other`'s
    pub fn merged(&self, other: &Dictionary) -> Dictionary {
        let mut result = self.clone();
        result.merge(other.clone());
        result
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &PDFValue)> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v))
    }

    /// Iterate over values mutably in order
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut PDFValue> {
        self.entries.values_mut()
    }

    /// Write dictionary to output
    pub fn write_to(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(b"<<");
        for (key, value) in &self.entries {
            write_name(output, key);
            output.push(b' ');
            value.write_to(output);
        }
        output.extend_from_slice(b">>");
    }
}

impl FromIterator<(Vec<u8>, PDFValue)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, PDFValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
