// Managed wrappers for the engine's handle-backed builtin types.
//
// Each wrapper owns one packed handle through a `Managed`, freed with the
// cached builtin destructor and copied with the cached copy constructor
// (index 1). Builtin methods are called through cached pointer-call entries
// resolved by (type, name, hash).

mod array;
mod callable;
mod dictionary;
mod packed;
mod string;

pub use array::Array;
pub use callable::{Callable, Signal};
pub use dictionary::Dictionary;
pub use packed::{
    PackedArray, PackedByteArray, PackedColorArray, PackedElement, PackedFloat32Array,
    PackedFloat64Array, PackedInt32Array, PackedInt64Array, PackedStringArray,
    PackedVector2Array, PackedVector3Array,
};
pub use string::{GString, NodePath, StringName};

use tether_ffi::{ConstTypePtr, VariantType};

use crate::convert::PtrMarshal;
use crate::error::{HostError, HostResult};
use crate::frame::CallFrame;
use crate::scope::Managed;
use crate::signature::ArgList;

/// Compatibility hash shared by every `int size() const` builtin method.
pub(crate) const SIZE_HASH: i64 = 3173160232;

/// Pointer-call a builtin method on the value stored in `managed`.
pub(crate) fn call_builtin<A: ArgList, R: PtrMarshal>(
    managed: &Managed,
    ty: VariantType,
    method: &'static str,
    hash: i64,
    args: &A,
) -> HostResult<R> {
    let mut frame = CallFrame::new();
    let mut keep = Vec::new();
    args.lower_into(&mut frame, &mut keep)?;
    let argv = frame.args_array();
    invoke(managed, ty, method, hash, frame, argv, A::COUNT)
}

/// Like [`call_builtin`], for arguments already living in engine storage.
pub(crate) fn call_builtin_ptrs<R: PtrMarshal>(
    managed: &Managed,
    ty: VariantType,
    method: &'static str,
    hash: i64,
    args: &[ConstTypePtr],
) -> HostResult<R> {
    invoke(managed, ty, method, hash, CallFrame::new(), args.as_ptr(), args.len())
}

fn invoke<R: PtrMarshal>(
    managed: &Managed,
    ty: VariantType,
    method: &'static str,
    hash: i64,
    mut frame: CallFrame<'static>,
    argv: *const ConstTypePtr,
    argc: usize,
) -> HostResult<R> {
    let base = managed.storage_ptr()?;
    let func = managed
        .abi()
        .builtin_method(ty, method, hash)
        .ok_or_else(HostError::invalid_method)?;
    frame.reserve_return::<R::Storage>();
    unsafe {
        func(base, argv, frame.return_ptr(), argc as i32);
        let result = R::from_return(frame.read_return::<R::Storage>());
        frame.free();
        result
    }
}

/// Generates the shared surface of a handle-backed builtin: construction,
/// ownership transitions, and the conversion traits.
macro_rules! builtin_handle {
    (
        $(#[$meta:meta])*
        $name:ident $(<$g:ident: $bound:ident>)?, $ty:expr
    ) => {
        $(#[$meta])*
        pub struct $name $(<$g: $bound>)? {
            managed: $crate::scope::Managed,
            $(_marker: ::std::marker::PhantomData<$g>,)?
        }

        impl $(<$g: $bound>)? $name $(<$g>)? {
            pub const TYPE: ::tether_ffi::VariantType = $ty;

            fn wrap(managed: $crate::scope::Managed) -> Self {
                $name { managed, $(_marker: ::std::marker::PhantomData::<$g>,)? }
            }

            /// Let the engine construct into fresh storage, then take ownership.
            pub(crate) fn with_uninit(
                abi: &'static $crate::abi::Abi,
                construct: impl FnOnce(*mut ::tether_ffi::PackedHandle),
            ) -> Self {
                let mut handle = ::tether_ffi::PackedHandle::ZEROED;
                construct(&mut handle);
                unsafe { Self::from_owned(abi, handle) }
            }

            /// Adopt a handle the engine transferred to us.
            ///
            /// # Safety
            /// `handle` must be a constructed value of this type nobody else frees.
            pub unsafe fn from_owned(
                abi: &'static $crate::abi::Abi,
                handle: ::tether_ffi::PackedHandle,
            ) -> Self {
                Self::wrap($crate::scope::Managed::new_in_current(
                    abi,
                    $crate::scope::RawHandle::Packed(handle),
                    $crate::scope::Release::Builtin($ty),
                ))
            }

            /// Copy a value the engine keeps owning.
            ///
            /// # Safety
            /// `src` must point at a constructed value of this type.
            pub unsafe fn from_borrowed(src: ::tether_ffi::ConstTypePtr) -> $crate::error::HostResult<Self> {
                let abi = $crate::abi::try_abi()?;
                Self::construct_with(abi, 1, &[src])
            }

            /// Run constructor overload `index` over raw argument pointers.
            pub(crate) fn construct_with(
                abi: &'static $crate::abi::Abi,
                index: i32,
                args: &[::tether_ffi::ConstTypePtr],
            ) -> $crate::error::HostResult<Self> {
                let ctor = abi
                    .constructor($ty, index)
                    .ok_or($crate::error::HostError::Construction($ty))?;
                Ok(Self::with_uninit(abi, |dst| unsafe {
                    ctor(dst as ::tether_ffi::UninitTypePtr, args.as_ptr())
                }))
            }

            /// The handle bytes, if still live.
            pub fn raw(&self) -> $crate::error::HostResult<::tether_ffi::PackedHandle> {
                self.managed
                    .get_raw()?
                    .as_packed()
                    .ok_or($crate::error::HostError::InvalidCast)
            }

            pub fn as_type_ptr(&self) -> $crate::error::HostResult<::tether_ffi::ConstTypePtr> {
                Ok(self.managed.storage_ptr()? as ::tether_ffi::ConstTypePtr)
            }

            pub fn as_mut_type_ptr(&self) -> $crate::error::HostResult<::tether_ffi::TypePtr> {
                self.managed.storage_ptr()
            }

            pub fn managed(&self) -> &$crate::scope::Managed {
                &self.managed
            }

            pub fn try_clone(&self) -> $crate::error::HostResult<Self> {
                let src = self.as_type_ptr()?;
                Self::construct_with(self.managed.abi(), 1, &[src])
            }

            /// Free now. Equivalent to dropping, but reports lifetime errors.
            pub fn free(self) -> $crate::error::HostResult<()> {
                self.managed.end()
            }

            /// Give the engine ownership; the wrapper is dead afterwards.
            pub fn transfer_to_engine(&self) -> $crate::error::HostResult<::tether_ffi::PackedHandle> {
                self.managed
                    .transfer_to_engine()?
                    .as_packed()
                    .ok_or($crate::error::HostError::InvalidCast)
            }

            pub fn persist(&self) -> $crate::error::HostResult<()> {
                self.managed.persist()
            }

            pub fn detach(self) -> $crate::error::HostResult<$crate::scope::DetachedHandle> {
                self.managed.detach()
            }

            pub fn attach(detached: $crate::scope::DetachedHandle) -> $crate::error::HostResult<Self> {
                match detached.raw() {
                    $crate::scope::RawHandle::Packed(_) => Ok(Self::wrap(detached.attach())),
                    _ => Err($crate::error::HostError::InvalidCast),
                }
            }
        }

        impl $(<$g: $bound>)? Clone for $name $(<$g>)? {
            /// Panics if the value was already freed.
            fn clone(&self) -> Self {
                self.try_clone()
                    .unwrap_or_else(|err| panic!("cannot clone {}: {err}", stringify!($name)))
            }
        }

        impl $(<$g: $bound>)? $crate::convert::VariantRepr for $name $(<$g>)? {
            const TYPE: ::tether_ffi::VariantType = $ty;
        }

        impl $(<$g: $bound>)? $crate::convert::ToVariant for $name $(<$g>)? {
            fn to_variant(&self) -> $crate::error::HostResult<$crate::variant::Variant> {
                $crate::convert::variant_from_storage($ty, &self.raw()?)
            }
        }

        impl $(<$g: $bound>)? $crate::convert::FromVariant for $name $(<$g>)? {
            fn from_variant(variant: &$crate::variant::Variant) -> $crate::error::HostResult<Self> {
                let handle: ::tether_ffi::PackedHandle =
                    $crate::convert::storage_from_variant(variant, $ty)?;
                Ok(unsafe { Self::from_owned(variant.managed().abi(), handle) })
            }
        }

        impl $(<$g: $bound>)? $crate::convert::PtrMarshal for $name $(<$g>)? {
            type Storage = ::tether_ffi::PackedHandle;

            fn to_storage(
                &self,
            ) -> $crate::error::HostResult<$crate::convert::Lowered<::tether_ffi::PackedHandle>> {
                Ok($crate::convert::Lowered::plain(self.raw()?))
            }

            unsafe fn from_return(storage: ::tether_ffi::PackedHandle) -> $crate::error::HostResult<Self> {
                Ok(unsafe { Self::from_owned($crate::abi::try_abi()?, storage) })
            }

            unsafe fn from_arg(ptr: ::tether_ffi::ConstTypePtr) -> $crate::error::HostResult<Self> {
                unsafe { Self::from_borrowed(ptr) }
            }

            unsafe fn write_return(self, ret: ::tether_ffi::TypePtr) -> $crate::error::HostResult<()> {
                let handle = $crate::convert::transfer_or_copy(self.transfer_to_engine(), || {
                    self.try_clone()?.transfer_to_engine()
                })?;
                unsafe { ::std::ptr::write_unaligned(ret as *mut ::tether_ffi::PackedHandle, handle) };
                Ok(())
            }
        }
    };
}

pub(crate) use builtin_handle;
