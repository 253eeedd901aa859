use std::fmt;

use tether_ffi::{ConstTypePtr, VariantType};

use super::{builtin_handle, call_builtin, call_builtin_ptrs, Array, SIZE_HASH};
use crate::abi::abi;
use crate::convert::ToVariant;
use crate::error::HostResult;
use crate::variant::Variant;

const HAS_HASH: i64 = 3680194679;
const ERASE_HASH: i64 = 1776646889;
const KEYS_HASH: i64 = 4144163970;

builtin_handle! {
    /// Engine dictionary (insertion-ordered, variant keys and values).
    Dictionary, VariantType::Dictionary
}

impl Dictionary {
    /// Empty dictionary. Panics before the ABI is loaded.
    pub fn new() -> Dictionary {
        Self::construct_with(abi(), 0, &[]).unwrap_or_else(|err| panic!("cannot create dictionary: {err}"))
    }

    pub fn len(&self) -> HostResult<usize> {
        let size: i64 = call_builtin(&self.managed, Self::TYPE, "size", SIZE_HASH, &())?;
        Ok(size.max(0) as usize)
    }

    pub fn is_empty(&self) -> HostResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy of the value under `key`, if present.
    pub fn get(&self, key: &Variant) -> HostResult<Option<Variant>> {
        let this = self.as_type_ptr()?;
        let key = key.as_ptr()?;
        let slot = unsafe {
            (self.managed.abi().containers.dictionary_operator_index_const)(this, key)
        };
        if slot.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { Variant::from_borrowed(slot) }))
    }

    /// Insert or replace.
    pub fn insert(&self, key: &Variant, value: &Variant) -> HostResult<()> {
        let this = self.as_mut_type_ptr()?;
        let (key, value) = (key.as_ptr()?, value.as_ptr()?);
        let abi = self.managed.abi();
        unsafe {
            let slot = (abi.containers.dictionary_operator_index)(this, key);
            (abi.variants.variant_destroy)(slot);
            (abi.variants.variant_new_copy)(slot, value);
        }
        Ok(())
    }

    /// Convert both sides and insert.
    pub fn set<K, V>(&self, key: &K, value: &V) -> HostResult<()>
    where
        K: ToVariant + ?Sized,
        V: ToVariant + ?Sized,
    {
        self.insert(&key.to_variant()?, &value.to_variant()?)
    }

    pub fn contains_key(&self, key: &Variant) -> HostResult<bool> {
        let key = key.as_ptr()? as ConstTypePtr;
        call_builtin_ptrs(&self.managed, Self::TYPE, "has", HAS_HASH, &[key])
    }

    /// Returns whether the key was present.
    pub fn remove(&self, key: &Variant) -> HostResult<bool> {
        let key = key.as_ptr()? as ConstTypePtr;
        call_builtin_ptrs(&self.managed, Self::TYPE, "erase", ERASE_HASH, &[key])
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> HostResult<Array> {
        call_builtin(&self.managed, Self::TYPE, "keys", KEYS_HASH, &())
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Dictionary::new()
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_variant().and_then(|v| v.stringify()) {
            Ok(text) => write!(f, "Dictionary({text})"),
            Err(_) => f.write_str("Dictionary(<freed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::install;

    #[test]
    fn two_entries_keep_insertion_order() {
        install();
        let dict = Dictionary::new();
        dict.set("a", &1i64).unwrap();
        dict.set("b", &2i64).unwrap();
        assert_eq!(dict.len().unwrap(), 2);
        let b = dict.get(&"b".to_variant().unwrap()).unwrap().unwrap();
        assert_eq!(b.to::<i64>().unwrap(), 2);
        assert!(dict.get(&"c".to_variant().unwrap()).unwrap().is_none());
        let keys: Vec<String> = dict
            .keys()
            .unwrap()
            .to_vec()
            .unwrap()
            .iter()
            .map(|k| k.to::<String>().unwrap())
            .collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(dict.to_variant().unwrap().stringify().unwrap(), r#"{ "a": 1, "b": 2 }"#);
    }

    #[test]
    fn replace_and_remove() {
        install();
        let dict = Dictionary::new();
        let key = "k".to_variant().unwrap();
        dict.set("k", &1i64).unwrap();
        dict.set("k", &5i64).unwrap();
        assert_eq!(dict.len().unwrap(), 1);
        assert_eq!(dict.get(&key).unwrap().unwrap().to::<i64>().unwrap(), 5);
        assert!(dict.contains_key(&key).unwrap());
        assert!(dict.remove(&key).unwrap());
        assert!(!dict.remove(&key).unwrap());
        assert!(dict.is_empty().unwrap());
    }
}
