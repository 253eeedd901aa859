use std::fmt;

use tether_ffi::{ConstTypePtr, VariantType};

use super::{builtin_handle, call_builtin, call_builtin_ptrs, SIZE_HASH};
use crate::abi::abi;
use crate::convert::ToVariant;
use crate::error::{HostResult, TypeError};
use crate::variant::Variant;

const APPEND_HASH: i64 = 3316032543;
const HAS_HASH: i64 = 3680194679;
const CLEAR_HASH: i64 = 3218959716;

builtin_handle! {
    /// Engine array of variants. Copies share storage, as in the engine;
    /// use `Variant::duplicate` for an independent copy.
    Array, VariantType::Array
}

impl Array {
    /// Empty array. Panics before the ABI is loaded.
    pub fn new() -> Array {
        Self::construct_with(abi(), 0, &[]).unwrap_or_else(|err| panic!("cannot create array: {err}"))
    }

    pub fn from_variants(items: &[Variant]) -> HostResult<Array> {
        let array = Array::new();
        for item in items {
            array.push(item)?;
        }
        Ok(array)
    }

    pub fn len(&self) -> HostResult<usize> {
        let size: i64 = call_builtin(&self.managed, Self::TYPE, "size", SIZE_HASH, &())?;
        Ok(size.max(0) as usize)
    }

    pub fn is_empty(&self) -> HostResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy of the element at `index`.
    pub fn get(&self, index: usize) -> HostResult<Variant> {
        let this = self.as_type_ptr()?;
        let slot = unsafe {
            (self.managed.abi().containers.array_operator_index_const)(this, index as i64)
        };
        if slot.is_null() {
            return Err(TypeError::OutOfBounds.into());
        }
        Ok(unsafe { Variant::from_borrowed(slot) })
    }

    /// Replace the element at `index` with a copy of `value`.
    pub fn set(&self, index: usize, value: &Variant) -> HostResult<()> {
        let this = self.as_mut_type_ptr()?;
        let value = value.as_ptr()?;
        let abi = self.managed.abi();
        let slot = unsafe { (abi.containers.array_operator_index)(this, index as i64) };
        if slot.is_null() {
            return Err(TypeError::OutOfBounds.into());
        }
        unsafe {
            (abi.variants.variant_destroy)(slot);
            (abi.variants.variant_new_copy)(slot, value);
        }
        Ok(())
    }

    pub fn push(&self, value: &Variant) -> HostResult<()> {
        let value = value.as_ptr()? as ConstTypePtr;
        call_builtin_ptrs(&self.managed, Self::TYPE, "append", APPEND_HASH, &[value])
    }

    /// Convert and append.
    pub fn push_value<T: ToVariant + ?Sized>(&self, value: &T) -> HostResult<()> {
        self.push(&value.to_variant()?)
    }

    pub fn contains(&self, value: &Variant) -> HostResult<bool> {
        let value = value.as_ptr()? as ConstTypePtr;
        call_builtin_ptrs(&self.managed, Self::TYPE, "has", HAS_HASH, &[value])
    }

    pub fn clear(&self) -> HostResult<()> {
        call_builtin(&self.managed, Self::TYPE, "clear", CLEAR_HASH, &())
    }

    pub fn to_vec(&self) -> HostResult<Vec<Variant>> {
        (0..self.len()?).map(|i| self.get(i)).collect()
    }
}

impl Default for Array {
    fn default() -> Self {
        Array::new()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_variant().and_then(|v| v.stringify()) {
            Ok(text) => write!(f, "Array({text})"),
            Err(_) => f.write_str("Array(<freed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::FromVariant;
    use crate::error::HostError;
    use crate::test_support::install;

    fn int(v: i64) -> Variant {
        v.to_variant().unwrap()
    }

    #[test]
    fn array_of_three_ints() {
        install();
        let array = Array::from_variants(&[int(10), int(20), int(30)]).unwrap();
        assert_eq!(array.len().unwrap(), 3);
        assert_eq!(array.get(1).unwrap().to::<i64>().unwrap(), 20);
        assert_eq!(array.get(3).unwrap_err(), HostError::Type(TypeError::OutOfBounds));
        let v = array.to_variant().unwrap();
        assert_eq!(v.stringify().unwrap(), "[10, 20, 30]");
        let total: i64 = Array::from_variant(&v)
            .unwrap()
            .to_vec()
            .unwrap()
            .iter()
            .map(|item| item.to::<i64>().unwrap())
            .sum();
        assert_eq!(total, 60);
    }

    #[test]
    fn set_contains_and_clear() {
        install();
        let array = Array::new();
        assert!(array.is_empty().unwrap());
        array.push_value("a").unwrap();
        array.push_value(&2i64).unwrap();
        array.set(0, &int(7)).unwrap();
        assert!(array.contains(&int(7)).unwrap());
        assert!(!array.contains(&int(8)).unwrap());
        assert_eq!(array.set(5, &int(1)).unwrap_err(), HostError::Type(TypeError::OutOfBounds));
        array.clear().unwrap();
        assert_eq!(array.len().unwrap(), 0);
    }

    #[test]
    fn copies_share_storage() {
        install();
        let a = Array::new();
        let b = a.clone();
        b.push(&int(1)).unwrap();
        assert_eq!(a.len().unwrap(), 1);
    }
}
