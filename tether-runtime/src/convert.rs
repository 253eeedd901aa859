// Type mapping between Rust values and engine values.
//
// `VariantRepr` is the compile-time type table: every type that crosses the
// ABI names exactly one variant tag. `ToVariant` / `FromVariant` convert
// through the engine's per-type variant constructors, and `PtrMarshal`
// describes the bytes a value occupies in a pointer-call slot.

use std::mem::MaybeUninit;
use std::ptr;

use tether_ffi::{
    ConstTypePtr, ConstVariantPtr, TypePtr, UninitTypePtr, VariantHandle, VariantType,
    ARGUMENT_METADATA_INT_IS_INT16, ARGUMENT_METADATA_INT_IS_INT32, ARGUMENT_METADATA_INT_IS_INT64,
    ARGUMENT_METADATA_INT_IS_INT8, ARGUMENT_METADATA_INT_IS_UINT16, ARGUMENT_METADATA_INT_IS_UINT32,
    ARGUMENT_METADATA_INT_IS_UINT64, ARGUMENT_METADATA_INT_IS_UINT8, ARGUMENT_METADATA_NONE,
    ARGUMENT_METADATA_REAL_IS_DOUBLE, ARGUMENT_METADATA_REAL_IS_FLOAT,
};

use crate::abi::try_abi;
use crate::builtins::GString;
use crate::error::{HostError, HostResult, LifetimeError};
use crate::math::*;
use crate::scope::Managed;
use crate::variant::Variant;

/// Compile-time description of how a type appears to the engine.
pub trait VariantRepr {
    const TYPE: VariantType;
    /// One of the `ARGUMENT_METADATA_*` constants.
    const METADATA: u32 = ARGUMENT_METADATA_NONE;
    /// True only for `()`, the "no return value" type.
    const IS_VOID: bool = false;

    /// Engine class name for object types; empty otherwise.
    fn class_name() -> &'static str {
        ""
    }
}

pub trait ToVariant {
    fn to_variant(&self) -> HostResult<Variant>;
}

pub trait FromVariant: Sized {
    fn from_variant(variant: &Variant) -> HostResult<Self>;
}

/// A value lowered into pointer-call storage.
///
/// `keep` holds any temporary engine handle the storage refers to, so it
/// stays alive until the call completes.
pub struct Lowered<S> {
    pub storage: S,
    keep: Option<Managed>,
}

impl<S> Lowered<S> {
    pub fn plain(storage: S) -> Self {
        Lowered { storage, keep: None }
    }

    pub fn kept(storage: S, temp: Managed) -> Self {
        Lowered { storage, keep: Some(temp) }
    }

    pub fn into_parts(self) -> (S, Option<Managed>) {
        (self.storage, self.keep)
    }
}

/// Pointer-call representation of a type.
pub trait PtrMarshal: Sized {
    /// Bytes of the value in an argument or return slot.
    type Storage: Copy;

    /// Lower for an outgoing call.
    fn to_storage(&self) -> HostResult<Lowered<Self::Storage>>;

    /// Lift a value the engine wrote into a return slot. Handles in it are
    /// owned by the caller from now on.
    ///
    /// # Safety
    /// `storage` must have been produced by the engine for this type.
    unsafe fn from_return(storage: Self::Storage) -> HostResult<Self>;

    /// Lift an argument of an incoming call. The engine keeps ownership of
    /// whatever `ptr` points at.
    ///
    /// # Safety
    /// `ptr` must point at a valid value of this type's storage.
    unsafe fn from_arg(ptr: ConstTypePtr) -> HostResult<Self>;

    /// Construct the value into the uninitialized return slot of an
    /// incoming call. Handle ownership moves to the engine; a handle pinned
    /// to user state is copied instead.
    ///
    /// # Safety
    /// `ret` must point at writable storage for this type.
    unsafe fn write_return(self, ret: TypePtr) -> HostResult<()>;
}

/// Everything a method parameter or return type needs.
pub trait Marshal: VariantRepr + ToVariant + FromVariant + PtrMarshal {}

impl<T> Marshal for T where T: VariantRepr + ToVariant + FromVariant + PtrMarshal {}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Build a variant of type `ty` from pointer-call storage.
pub(crate) fn variant_from_storage<S>(ty: VariantType, storage: &S) -> HostResult<Variant> {
    let abi = try_abi()?;
    let ctor = abi.from_type_constructor(ty)?;
    let src = storage as *const S as TypePtr;
    Ok(Variant::with_uninit(abi, |dst| unsafe { ctor(dst, src) }))
}

/// Extract pointer-call storage of type `ty` from a variant holding exactly
/// that type. The result owns a fresh handle for handle types.
pub(crate) fn storage_from_variant<S: Copy>(variant: &Variant, ty: VariantType) -> HostResult<S> {
    let found = variant.get_type()?;
    if found != ty {
        return Err(HostError::Conversion { expected: ty, found });
    }
    let ctor = variant.managed().abi().to_type_constructor(ty)?;
    let src = variant.as_mut_ptr()?;
    let mut out = MaybeUninit::<S>::uninit();
    unsafe {
        ctor(out.as_mut_ptr() as UninitTypePtr, src);
        Ok(out.assume_init())
    }
}

/// Hand a handle to the engine, copying it instead when it is pinned.
pub(crate) fn transfer_or_copy<H>(
    transfer: HostResult<H>,
    copy: impl FnOnce() -> HostResult<H>,
) -> HostResult<H> {
    match transfer {
        Err(HostError::Lifetime(LifetimeError::Pinned)) => copy(),
        other => other,
    }
}

fn mismatch(ty: VariantType) -> HostError {
    HostError::Conversion { expected: ty, found: ty }
}

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

impl VariantRepr for () {
    const TYPE: VariantType = VariantType::Nil;
    const IS_VOID: bool = true;
}

impl ToVariant for () {
    fn to_variant(&self) -> HostResult<Variant> {
        try_abi()?;
        Ok(Variant::nil())
    }
}

impl FromVariant for () {
    fn from_variant(_: &Variant) -> HostResult<Self> {
        Ok(())
    }
}

impl PtrMarshal for () {
    type Storage = ();

    fn to_storage(&self) -> HostResult<Lowered<()>> {
        Ok(Lowered::plain(()))
    }

    unsafe fn from_return(_: ()) -> HostResult<Self> {
        Ok(())
    }

    unsafe fn from_arg(_: ConstTypePtr) -> HostResult<Self> {
        Ok(())
    }

    unsafe fn write_return(self, _: TypePtr) -> HostResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Plain data
// ---------------------------------------------------------------------------

/// Shared pointer-call plumbing for types whose storage is plain bytes.
macro_rules! plain_ptr_marshal {
    ($ty:ty, $storage:ty, |$v:ident| $lower:expr, |$s:ident| $lift:expr) => {
        impl PtrMarshal for $ty {
            type Storage = $storage;

            fn to_storage(&self) -> HostResult<Lowered<$storage>> {
                let $v = *self;
                Ok(Lowered::plain($lower))
            }

            unsafe fn from_return($s: $storage) -> HostResult<Self> {
                $lift
            }

            unsafe fn from_arg(ptr: ConstTypePtr) -> HostResult<Self> {
                unsafe { Self::from_return(ptr::read_unaligned(ptr as *const $storage)) }
            }

            unsafe fn write_return(self, ret: TypePtr) -> HostResult<()> {
                let lowered = self.to_storage()?;
                unsafe { ptr::write_unaligned(ret as *mut $storage, lowered.storage) };
                Ok(())
            }
        }
    };
}

impl VariantRepr for bool {
    const TYPE: VariantType = VariantType::Bool;
}

impl ToVariant for bool {
    fn to_variant(&self) -> HostResult<Variant> {
        variant_from_storage(VariantType::Bool, self)
    }
}

impl FromVariant for bool {
    fn from_variant(variant: &Variant) -> HostResult<Self> {
        storage_from_variant(variant, VariantType::Bool)
    }
}

plain_ptr_marshal!(bool, bool, |v| v, |s| Ok(s));

macro_rules! int_marshal {
    ($($ty:ty => $meta:expr),* $(,)?) => {$(
        impl VariantRepr for $ty {
            const TYPE: VariantType = VariantType::Int;
            const METADATA: u32 = $meta;
        }

        impl ToVariant for $ty {
            fn to_variant(&self) -> HostResult<Variant> {
                let wide = i64::try_from(*self).map_err(|_| mismatch(VariantType::Int))?;
                variant_from_storage(VariantType::Int, &wide)
            }
        }

        impl FromVariant for $ty {
            fn from_variant(variant: &Variant) -> HostResult<Self> {
                let wide: i64 = storage_from_variant(variant, VariantType::Int)?;
                <$ty>::try_from(wide).map_err(|_| mismatch(VariantType::Int))
            }
        }

        plain_ptr_marshal!(
            $ty,
            i64,
            |v| i64::try_from(v).map_err(|_| mismatch(VariantType::Int))?,
            |s| <$ty>::try_from(s).map_err(|_| mismatch(VariantType::Int))
        );
    )*};
}

int_marshal! {
    i8 => ARGUMENT_METADATA_INT_IS_INT8,
    i16 => ARGUMENT_METADATA_INT_IS_INT16,
    i32 => ARGUMENT_METADATA_INT_IS_INT32,
    i64 => ARGUMENT_METADATA_INT_IS_INT64,
    u8 => ARGUMENT_METADATA_INT_IS_UINT8,
    u16 => ARGUMENT_METADATA_INT_IS_UINT16,
    u32 => ARGUMENT_METADATA_INT_IS_UINT32,
    u64 => ARGUMENT_METADATA_INT_IS_UINT64,
}

macro_rules! float_marshal {
    ($($ty:ty => $meta:expr),* $(,)?) => {$(
        impl VariantRepr for $ty {
            const TYPE: VariantType = VariantType::Float;
            const METADATA: u32 = $meta;
        }

        impl ToVariant for $ty {
            fn to_variant(&self) -> HostResult<Variant> {
                variant_from_storage(VariantType::Float, &(*self as f64))
            }
        }

        impl FromVariant for $ty {
            /// Integers widen to floats; nothing else converts implicitly.
            fn from_variant(variant: &Variant) -> HostResult<Self> {
                if variant.get_type()? == VariantType::Int {
                    let int: i64 = storage_from_variant(variant, VariantType::Int)?;
                    return Ok(int as $ty);
                }
                let wide: f64 = storage_from_variant(variant, VariantType::Float)?;
                Ok(wide as $ty)
            }
        }

        plain_ptr_marshal!($ty, f64, |v| v as f64, |s| Ok(s as $ty));
    )*};
}

float_marshal! {
    f32 => ARGUMENT_METADATA_REAL_IS_FLOAT,
    f64 => ARGUMENT_METADATA_REAL_IS_DOUBLE,
}

/// Math and other plain-data builtins: storage is the value itself.
macro_rules! pod_marshal {
    ($($ty:ty => $tag:ident),* $(,)?) => {$(
        impl VariantRepr for $ty {
            const TYPE: VariantType = VariantType::$tag;
        }

        impl ToVariant for $ty {
            fn to_variant(&self) -> HostResult<Variant> {
                variant_from_storage(VariantType::$tag, self)
            }
        }

        impl FromVariant for $ty {
            fn from_variant(variant: &Variant) -> HostResult<Self> {
                storage_from_variant(variant, VariantType::$tag)
            }
        }

        plain_ptr_marshal!($ty, $ty, |v| v, |s| Ok(s));
    )*};
}

pod_marshal! {
    Vector2 => Vector2,
    Vector2i => Vector2i,
    Rect2 => Rect2,
    Rect2i => Rect2i,
    Vector3 => Vector3,
    Vector3i => Vector3i,
    Transform2D => Transform2D,
    Vector4 => Vector4,
    Vector4i => Vector4i,
    Plane => Plane,
    Quaternion => Quaternion,
    Aabb => Aabb,
    Basis => Basis,
    Transform3D => Transform3D,
    Projection => Projection,
    Color => Color,
    Rid => Rid,
}

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

impl VariantRepr for Variant {
    /// Nil stands for "any type" in registration records.
    const TYPE: VariantType = VariantType::Nil;
}

impl ToVariant for Variant {
    fn to_variant(&self) -> HostResult<Variant> {
        self.try_clone()
    }
}

impl FromVariant for Variant {
    fn from_variant(variant: &Variant) -> HostResult<Self> {
        variant.try_clone()
    }
}

impl PtrMarshal for Variant {
    type Storage = VariantHandle;

    fn to_storage(&self) -> HostResult<Lowered<VariantHandle>> {
        let raw = self.managed().get_raw()?;
        raw.as_variant().map(Lowered::plain).ok_or(HostError::InvalidCast)
    }

    unsafe fn from_return(storage: VariantHandle) -> HostResult<Self> {
        Ok(unsafe { Variant::from_owned(try_abi()?, storage) })
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> HostResult<Self> {
        try_abi()?;
        Ok(unsafe { Variant::from_borrowed(ptr as ConstVariantPtr) })
    }

    unsafe fn write_return(self, ret: TypePtr) -> HostResult<()> {
        let abi = self.managed().abi();
        let slot = ret as *mut VariantHandle;
        let handle = transfer_or_copy(self.transfer_to_engine(), || {
            let src = self.as_ptr()?;
            let mut copy = VariantHandle::ZEROED;
            unsafe { (abi.variants.variant_new_copy)(&mut copy, src) };
            Ok(copy)
        })?;
        unsafe { ptr::write_unaligned(slot, handle) };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rust strings (through engine strings)
// ---------------------------------------------------------------------------

impl VariantRepr for String {
    const TYPE: VariantType = VariantType::String;
}

impl ToVariant for String {
    fn to_variant(&self) -> HostResult<Variant> {
        self.as_str().to_variant()
    }
}

impl ToVariant for str {
    fn to_variant(&self) -> HostResult<Variant> {
        GString::from_str(self)?.to_variant()
    }
}

impl FromVariant for String {
    fn from_variant(variant: &Variant) -> HostResult<Self> {
        GString::from_variant(variant)?.text()
    }
}

impl PtrMarshal for String {
    type Storage = <GString as PtrMarshal>::Storage;

    fn to_storage(&self) -> HostResult<Lowered<Self::Storage>> {
        let temp = GString::from_str(self)?;
        let storage = temp.raw()?;
        Ok(Lowered::kept(storage, temp.into_managed()))
    }

    unsafe fn from_return(storage: Self::Storage) -> HostResult<Self> {
        unsafe { GString::from_return(storage)? }.text()
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> HostResult<Self> {
        unsafe { GString::from_arg(ptr)? }.text()
    }

    unsafe fn write_return(self, ret: TypePtr) -> HostResult<()> {
        unsafe { GString::from_str(&self)?.write_return(ret) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::install;

    #[test]
    fn type_table_is_fixed_at_compile_time() {
        assert_eq!(<i32 as VariantRepr>::TYPE, VariantType::Int);
        assert_eq!(<i32 as VariantRepr>::METADATA, ARGUMENT_METADATA_INT_IS_INT32);
        assert_eq!(<f32 as VariantRepr>::TYPE, VariantType::Float);
        assert_eq!(<Vector3 as VariantRepr>::TYPE, VariantType::Vector3);
        assert_eq!(<String as VariantRepr>::TYPE, VariantType::String);
        assert_eq!(<Variant as VariantRepr>::TYPE, VariantType::Nil);
        assert!(<() as VariantRepr>::IS_VOID);
        assert!(!<Variant as VariantRepr>::IS_VOID);
    }

    #[test]
    fn primitives_round_trip_through_variants() {
        install();
        assert!(true.to_variant().unwrap().to::<bool>().unwrap());
        assert_eq!((-7i8).to_variant().unwrap().to::<i8>().unwrap(), -7);
        assert_eq!(2.5f32.to_variant().unwrap().to::<f32>().unwrap(), 2.5);
        assert_eq!("héllo".to_variant().unwrap().to::<String>().unwrap(), "héllo");
        let color = Color::rgb(0.25, 0.5, 1.0);
        assert_eq!(color.to_variant().unwrap().to::<Color>().unwrap(), color);
    }

    #[test]
    fn narrowing_out_of_range_is_a_conversion_error() {
        install();
        let big = 300i64.to_variant().unwrap();
        assert!(matches!(big.to::<u8>(), Err(HostError::Conversion { .. })));
        assert!(matches!(u64::MAX.to_variant(), Err(HostError::Conversion { .. })));
    }

    #[test]
    fn ints_widen_to_floats_but_not_back() {
        install();
        assert_eq!(3i64.to_variant().unwrap().to::<f64>().unwrap(), 3.0);
        let err = 3.0f64.to_variant().unwrap().to::<i64>().unwrap_err();
        assert_eq!(err, HostError::Conversion { expected: VariantType::Int, found: VariantType::Float });
    }

    #[test]
    fn plain_ptr_storage_round_trips() {
        let lowered = 41u16.to_storage().unwrap();
        assert_eq!(lowered.storage, 41i64);
        let mut slot = 0i64;
        unsafe { 9u16.write_return(&mut slot as *mut i64 as TypePtr).unwrap() };
        assert_eq!(slot, 9);
        let lifted = unsafe { u16::from_arg(&slot as *const i64 as ConstTypePtr) }.unwrap();
        assert_eq!(lifted, 9);
        let v = Vector2::new(1.0, 2.0);
        assert_eq!(unsafe { Vector2::from_return(v.to_storage().unwrap().storage) }.unwrap(), v);
    }

    #[test]
    fn rust_strings_keep_their_temporary_alive() {
        install();
        let lowered = String::from("temp").to_storage().unwrap();
        let (storage, keep) = lowered.into_parts();
        let keep = keep.expect("string lowering keeps an engine string");
        assert!(keep.is_live());
        let back = unsafe { String::from_arg(&storage as *const _ as ConstTypePtr) }.unwrap();
        assert_eq!(back, "temp");
        drop(keep);
    }

    #[test]
    fn variant_return_transfers_unless_pinned() {
        install();
        let v = 5i64.to_variant().unwrap();
        let mut slot = VariantHandle::ZEROED;
        unsafe { v.try_clone().unwrap().write_return(&mut slot as *mut _ as TypePtr).unwrap() };
        let adopted = unsafe { Variant::from_return(slot) }.unwrap();
        assert_eq!(adopted.to::<i64>().unwrap(), 5);

        let pinned = 6i64.to_variant().unwrap();
        pinned.persist().unwrap();
        let mut slot = VariantHandle::ZEROED;
        let copy = pinned.try_clone().unwrap();
        copy.persist().unwrap();
        unsafe { copy.write_return(&mut slot as *mut _ as TypePtr).unwrap() };
        let adopted = unsafe { Variant::from_return(slot) }.unwrap();
        assert_eq!(adopted.to::<i64>().unwrap(), 6);
        assert!(pinned.managed().is_live());
    }
}
