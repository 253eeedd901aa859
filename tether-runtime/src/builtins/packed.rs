// Packed arrays: contiguous engine arrays of one element type, accessed
// in place through the per-type index entries.

use std::fmt;
use std::ptr;

use tether_ffi::{ConstTypePtr, PackedIndexConstFn, PackedIndexFn, TypePtr, VariantType};

use super::{builtin_handle, call_builtin, GString, SIZE_HASH};
use crate::abi::{abi, Abi};
use crate::convert::{Marshal, ToVariant};
use crate::error::{HostResult, TypeError};
use crate::math::{Color, Vector2, Vector3};

const RESIZE_HASH: i64 = 848867239;

/// An element type with a packed array counterpart.
pub trait PackedElement: Sized {
    const ARRAY_TYPE: VariantType;
    /// Hash of the array type's `push_back`.
    const PUSH_BACK_HASH: i64;

    /// What `push_back` takes: the widened engine scalar for numbers.
    type Pushed: Marshal;

    fn index_fn(abi: &Abi) -> PackedIndexFn;
    fn index_const_fn(abi: &Abi) -> PackedIndexConstFn;

    fn pushed(&self) -> HostResult<Self::Pushed>;

    /// # Safety
    /// `ptr` must point at a live element.
    unsafe fn read_element(ptr: ConstTypePtr) -> HostResult<Self>;

    /// # Safety
    /// `ptr` must point at a live element slot.
    unsafe fn write_element(ptr: TypePtr, value: &Self) -> HostResult<()>;
}

macro_rules! plain_element {
    ($($ty:ty => $array:ident, $hash:expr, $pushed:ty, $index:ident, $index_const:ident;)*) => {$(
        impl PackedElement for $ty {
            const ARRAY_TYPE: VariantType = VariantType::$array;
            const PUSH_BACK_HASH: i64 = $hash;
            type Pushed = $pushed;

            fn index_fn(abi: &Abi) -> PackedIndexFn {
                abi.containers.$index
            }

            fn index_const_fn(abi: &Abi) -> PackedIndexConstFn {
                abi.containers.$index_const
            }

            fn pushed(&self) -> HostResult<$pushed> {
                Ok(<$pushed>::from(*self))
            }

            unsafe fn read_element(ptr: ConstTypePtr) -> HostResult<Self> {
                Ok(unsafe { ptr::read_unaligned(ptr as *const $ty) })
            }

            unsafe fn write_element(ptr: TypePtr, value: &Self) -> HostResult<()> {
                unsafe { ptr::write_unaligned(ptr as *mut $ty, *value) };
                Ok(())
            }
        }
    )*};
}

plain_element! {
    u8 => PackedByteArray, 694024632, i64, packed_byte_array_operator_index, packed_byte_array_operator_index_const;
    i32 => PackedInt32Array, 694024632, i64, packed_int32_array_operator_index, packed_int32_array_operator_index_const;
    i64 => PackedInt64Array, 694024632, i64, packed_int64_array_operator_index, packed_int64_array_operator_index_const;
    f32 => PackedFloat32Array, 4094791666, f64, packed_float32_array_operator_index, packed_float32_array_operator_index_const;
    f64 => PackedFloat64Array, 4094791666, f64, packed_float64_array_operator_index, packed_float64_array_operator_index_const;
    Vector2 => PackedVector2Array, 4188891560, Vector2, packed_vector2_array_operator_index, packed_vector2_array_operator_index_const;
    Vector3 => PackedVector3Array, 3295363524, Vector3, packed_vector3_array_operator_index, packed_vector3_array_operator_index_const;
    Color => PackedColorArray, 1007858200, Color, packed_color_array_operator_index, packed_color_array_operator_index_const;
}

impl PackedElement for GString {
    const ARRAY_TYPE: VariantType = VariantType::PackedStringArray;
    const PUSH_BACK_HASH: i64 = 816187996;
    type Pushed = GString;

    fn index_fn(abi: &Abi) -> PackedIndexFn {
        abi.containers.packed_string_array_operator_index
    }

    fn index_const_fn(abi: &Abi) -> PackedIndexConstFn {
        abi.containers.packed_string_array_operator_index_const
    }

    fn pushed(&self) -> HostResult<GString> {
        self.try_clone()
    }

    unsafe fn read_element(ptr: ConstTypePtr) -> HostResult<Self> {
        unsafe { GString::from_borrowed(ptr) }
    }

    unsafe fn write_element(ptr: TypePtr, value: &Self) -> HostResult<()> {
        let abi = value.managed().abi();
        let src = value.as_type_ptr()?;
        let copy = abi.constructor(VariantType::String, 1).ok_or(TypeError::Invalid)?;
        if let Some(dtor) = abi.destructor(VariantType::String) {
            unsafe { dtor(ptr) };
        }
        unsafe { copy(ptr, [src].as_ptr()) };
        Ok(())
    }
}

builtin_handle! {
    /// Engine array of one element type. Returned arrays are owned by the
    /// caller, like every other handle the engine hands back.
    PackedArray<T: PackedElement>, T::ARRAY_TYPE
}

pub type PackedByteArray = PackedArray<u8>;
pub type PackedInt32Array = PackedArray<i32>;
pub type PackedInt64Array = PackedArray<i64>;
pub type PackedFloat32Array = PackedArray<f32>;
pub type PackedFloat64Array = PackedArray<f64>;
pub type PackedStringArray = PackedArray<GString>;
pub type PackedVector2Array = PackedArray<Vector2>;
pub type PackedVector3Array = PackedArray<Vector3>;
pub type PackedColorArray = PackedArray<Color>;

impl<T: PackedElement> PackedArray<T> {
    /// Empty array. Panics before the ABI is loaded.
    pub fn new() -> Self {
        Self::construct_with(abi(), 0, &[]).unwrap_or_else(|err| panic!("cannot create packed array: {err}"))
    }

    pub fn from_slice(items: &[T]) -> HostResult<Self> {
        let array = Self::new();
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

    pub fn get(&self, index: usize) -> HostResult<T> {
        let this = self.as_type_ptr()?;
        let slot = unsafe { T::index_const_fn(self.managed.abi())(this, index as i64) };
        if slot.is_null() {
            return Err(TypeError::OutOfBounds.into());
        }
        unsafe { T::read_element(slot) }
    }

    pub fn set(&self, index: usize, value: &T) -> HostResult<()> {
        let this = self.as_mut_type_ptr()?;
        let slot = unsafe { T::index_fn(self.managed.abi())(this, index as i64) };
        if slot.is_null() {
            return Err(TypeError::OutOfBounds.into());
        }
        unsafe { T::write_element(slot, value) }
    }

    pub fn push(&self, value: &T) -> HostResult<()> {
        let ok: bool = call_builtin(
            &self.managed,
            Self::TYPE,
            "push_back",
            T::PUSH_BACK_HASH,
            &(value.pushed()?,),
        )?;
        if ok { Ok(()) } else { Err(TypeError::Invalid.into()) }
    }

    /// New elements are default-initialized.
    pub fn resize(&self, len: usize) -> HostResult<()> {
        let status: i64 = call_builtin(&self.managed, Self::TYPE, "resize", RESIZE_HASH, &(len as i64,))?;
        if status == 0 { Ok(()) } else { Err(TypeError::Invalid.into()) }
    }

    pub fn to_vec(&self) -> HostResult<Vec<T>> {
        (0..self.len()?).map(|i| self.get(i)).collect()
    }
}

impl<T: PackedElement> Default for PackedArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PackedElement> fmt::Debug for PackedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_variant().and_then(|v| v.stringify()) {
            Ok(text) => write!(f, "{:?}({text})", T::ARRAY_TYPE),
            Err(_) => write!(f, "{:?}(<freed>)", T::ARRAY_TYPE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::FromVariant;
    use crate::error::HostError;
    use crate::test_support::install;

    #[test]
    fn scalar_arrays_read_and_write_in_place() {
        install();
        let bytes = PackedByteArray::from_slice(&[1, 2, 3]).unwrap();
        assert_eq!(bytes.len().unwrap(), 3);
        bytes.set(1, &200).unwrap();
        assert_eq!(bytes.to_vec().unwrap(), vec![1, 200, 3]);
        assert_eq!(bytes.get(3).unwrap_err(), HostError::Type(TypeError::OutOfBounds));

        let floats = PackedFloat32Array::from_slice(&[0.5, 1.5]).unwrap();
        floats.resize(4).unwrap();
        assert_eq!(floats.to_vec().unwrap(), vec![0.5, 1.5, 0.0, 0.0]);
    }

    #[test]
    fn vector_and_color_arrays() {
        install();
        let points = PackedVector2Array::from_slice(&[Vector2::new(1.0, 2.0)]).unwrap();
        points.push(&Vector2::new(3.0, 4.0)).unwrap();
        assert_eq!(points.get(1).unwrap(), Vector2::new(3.0, 4.0));
        let colors = PackedColorArray::from_slice(&[Color::WHITE]).unwrap();
        assert_eq!(colors.get(0).unwrap(), Color::WHITE);
        let v = colors.to_variant().unwrap();
        assert_eq!(v.get_type().unwrap(), VariantType::PackedColorArray);
    }

    #[test]
    fn string_arrays_copy_elements() {
        install();
        let words = PackedStringArray::from_slice(&[
            GString::from_str("alpha").unwrap(),
            GString::from_str("beta").unwrap(),
        ])
        .unwrap();
        words.set(0, &GString::from_str("gamma").unwrap()).unwrap();
        let texts: Vec<String> = words.to_vec().unwrap().iter().map(|s| s.text().unwrap()).collect();
        assert_eq!(texts, ["gamma", "beta"]);
        let back = PackedStringArray::from_variant(&words.to_variant().unwrap()).unwrap();
        assert_eq!(back.len().unwrap(), 2);
    }
}
