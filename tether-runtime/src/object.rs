// Engine objects: typed references, owned wrappers, casting, and reference
// counting.

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr;

use tether_ffi::{ConstTypePtr, InstanceId, ObjectHandle, TypePtr, VariantType};

use crate::abi::{try_abi, Abi, NameArg};
use crate::builtins::StringName;
use crate::convert::{
    storage_from_variant, variant_from_storage, FromVariant, Lowered, PtrMarshal, ToVariant,
    VariantRepr,
};
use crate::error::{HostError, HostResult, LifetimeError};
use crate::method_bind::MethodBind;
use crate::scope::{Managed, RawHandle, Release};
use crate::variant::Variant;

/// Hash shared by `init_ref`, `reference` and `unreference` (all `bool ()`).
const REFCOUNT_OP_HASH: i64 = 2240911060;
const GET_REFERENCE_COUNT_HASH: i64 = 3905245786;

/// Implemented for every engine class, and for every registered user class.
pub trait EngineClass: 'static {
    const CLASS_NAME: &'static str;
}

/// The immediate parent class. Enables `Deref` from `ObjRef<Child>` to
/// `ObjRef<Parent>`, so inherited methods resolve through the chain.
/// Root classes do not implement it.
pub trait HasParent: EngineClass {
    type Parent: EngineClass;
}

// ---------------------------------------------------------------------------
// Raw reference counting
// ---------------------------------------------------------------------------

fn refcount_op(abi: &'static Abi, handle: ObjectHandle, method: &'static str) -> HostResult<bool> {
    MethodBind::get_in(abi, "RefCounted", method, REFCOUNT_OP_HASH)?.ptrcall_with(handle, &())
}

/// Whether the engine considers `handle` a ref-counted object.
pub(crate) fn is_refcounted(abi: &Abi, handle: ObjectHandle) -> bool {
    match abi.class_tag("RefCounted") {
        Some(tag) => !unsafe { (abi.objects.object_cast_to)(handle, tag) }.is_null(),
        None => false,
    }
}

/// Drop one reference. Returns true when it was the last one and the caller
/// must destroy the object.
///
/// # Safety
/// `handle` must be a live ref-counted object.
pub(crate) unsafe fn unreference_raw(abi: &'static Abi, handle: ObjectHandle) -> bool {
    refcount_op(abi, handle, "unreference").unwrap_or(false)
}

// ---------------------------------------------------------------------------
// ObjRef
// ---------------------------------------------------------------------------

/// A typed, non-owning reference to an engine object.
///
/// Carries the instance id observed when it was created; every checked use
/// verifies that the id still resolves to the same handle, so a reference
/// to a destroyed object fails with [`LifetimeError::StaleObject`] instead of
/// touching freed memory.
#[repr(C)]
pub struct ObjRef<T: EngineClass> {
    handle: ObjectHandle,
    id: InstanceId,
    _marker: PhantomData<*const T>,
}

// Handles are identifiers; using them is still restricted to the engine thread.
unsafe impl<T: EngineClass> Send for ObjRef<T> {}

impl<T: EngineClass> Clone for ObjRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: EngineClass> Copy for ObjRef<T> {}

impl<T: EngineClass> PartialEq for ObjRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.id == other.id
    }
}

impl<T: EngineClass> Eq for ObjRef<T> {}

impl<T: EngineClass> Hash for ObjRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: EngineClass> ObjRef<T> {
    /// Wrap a raw handle, recording its current instance id.
    ///
    /// # Safety
    /// `handle` must be null or a live object of class `T` (or a subclass).
    pub unsafe fn from_raw(handle: ObjectHandle) -> HostResult<Self> {
        if handle.is_null() {
            return Err(HostError::NullObject);
        }
        let abi = try_abi()?;
        let id = unsafe { (abi.objects.object_get_instance_id)(handle) };
        Ok(unsafe { Self::from_raw_parts(handle, id) })
    }

    /// # Safety
    /// `id` must be the instance id of `handle`, which must be of class `T`.
    pub unsafe fn from_raw_parts(handle: ObjectHandle, id: InstanceId) -> Self {
        ObjRef { handle, id, _marker: PhantomData }
    }

    /// Resolve an instance id, checking that the object is a `T`.
    pub fn from_instance_id(id: InstanceId) -> HostResult<Self> {
        let abi = try_abi()?;
        let handle = unsafe { (abi.objects.object_get_instance_from_id)(id) };
        if handle.is_null() {
            return Err(LifetimeError::StaleObject.into());
        }
        if !cast_ok(abi, handle, T::CLASS_NAME) {
            return Err(HostError::InvalidCast);
        }
        Ok(ObjRef { handle, id, _marker: PhantomData })
    }

    #[inline]
    pub fn raw(&self) -> ObjectHandle {
        self.handle
    }

    #[inline]
    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    /// Whether the object this reference was created for still exists.
    pub fn is_valid(&self) -> bool {
        let Ok(abi) = try_abi() else { return false };
        unsafe { (abi.objects.object_get_instance_from_id)(self.id) == self.handle }
    }

    /// The handle, if the object is still alive.
    pub fn checked_handle(&self) -> HostResult<ObjectHandle> {
        if self.is_valid() {
            Ok(self.handle)
        } else {
            Err(LifetimeError::StaleObject.into())
        }
    }

    /// Engine-checked downcast (or cross-cast); `None` when the object is not
    /// a `U` or no longer exists.
    pub fn cast<U: EngineClass>(self) -> Option<ObjRef<U>> {
        self.try_cast().ok()
    }

    pub fn try_cast<U: EngineClass>(self) -> HostResult<ObjRef<U>> {
        let handle = self.checked_handle()?;
        let abi = try_abi()?;
        if cast_ok(abi, handle, U::CLASS_NAME) {
            Ok(ObjRef { handle, id: self.id, _marker: PhantomData })
        } else {
            Err(HostError::InvalidCast)
        }
    }

    pub fn is_a<U: EngineClass>(&self) -> bool {
        self.cast::<U>().is_some()
    }

    /// Most-derived class name, as the engine reports it.
    pub fn class_name(&self) -> HostResult<String> {
        let handle = self.checked_handle()?;
        let abi = try_abi()?;
        let mut known = false;
        let name = StringName::with_uninit(abi, |dst| unsafe {
            known = (abi.objects.object_get_class_name)(handle, abi.library, dst);
        });
        if !known {
            return Err(HostError::NullObject);
        }
        name.text()
    }

    /// Dynamic call by method name (`Object.call` semantics).
    pub fn call(&self, method: &str, args: &[Variant]) -> HostResult<Variant> {
        self.checked_handle()?;
        self.to_variant()?.call(method, args)
    }
}

fn cast_ok(abi: &Abi, handle: ObjectHandle, class: &'static str) -> bool {
    match abi.class_tag(class) {
        Some(tag) => unsafe { (abi.objects.object_cast_to)(handle, tag) == handle },
        None => false,
    }
}

impl<T: HasParent> ObjRef<T> {
    /// Infallible upcast; same handle, same id.
    #[inline]
    pub fn upcast(self) -> ObjRef<T::Parent> {
        ObjRef { handle: self.handle, id: self.id, _marker: PhantomData }
    }
}

impl<T: HasParent> Deref for ObjRef<T> {
    type Target = ObjRef<T::Parent>;

    #[inline]
    fn deref(&self) -> &ObjRef<T::Parent> {
        // SAFETY: #[repr(C)] and the type parameter only appears in PhantomData.
        unsafe { &*(self as *const ObjRef<T> as *const ObjRef<T::Parent>) }
    }
}

impl<T: EngineClass> fmt::Debug for ObjRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjRef")
            .field("class", &T::CLASS_NAME)
            .field("id", &self.id.0)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl<T: EngineClass> VariantRepr for ObjRef<T> {
    const TYPE: VariantType = VariantType::Object;

    fn class_name() -> &'static str {
        T::CLASS_NAME
    }
}

impl<T: EngineClass> ToVariant for ObjRef<T> {
    fn to_variant(&self) -> HostResult<Variant> {
        variant_from_storage(VariantType::Object, &self.checked_handle()?)
    }
}

impl<T: EngineClass> FromVariant for ObjRef<T> {
    fn from_variant(variant: &Variant) -> HostResult<Self> {
        let handle: ObjectHandle = storage_from_variant(variant, VariantType::Object)?;
        let untyped = unsafe { ObjRef::<T>::from_raw(handle)? };
        untyped.try_cast()
    }
}

impl<T: EngineClass> PtrMarshal for ObjRef<T> {
    type Storage = ObjectHandle;

    fn to_storage(&self) -> HostResult<Lowered<ObjectHandle>> {
        Ok(Lowered::plain(self.checked_handle()?))
    }

    unsafe fn from_return(storage: ObjectHandle) -> HostResult<Self> {
        unsafe { Self::from_raw(storage) }
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> HostResult<Self> {
        unsafe { Self::from_raw(ptr::read_unaligned(ptr as *const ObjectHandle)) }
    }

    unsafe fn write_return(self, ret: TypePtr) -> HostResult<()> {
        let handle = self.checked_handle()?;
        unsafe { ptr::write_unaligned(ret as *mut ObjectHandle, handle) };
        Ok(())
    }
}

/// Nullable object parameters and returns.
impl<T: EngineClass> VariantRepr for Option<ObjRef<T>> {
    const TYPE: VariantType = VariantType::Object;

    fn class_name() -> &'static str {
        T::CLASS_NAME
    }
}

impl<T: EngineClass> ToVariant for Option<ObjRef<T>> {
    fn to_variant(&self) -> HostResult<Variant> {
        match self {
            Some(obj) => obj.to_variant(),
            None => variant_from_storage(VariantType::Object, &ObjectHandle::null()),
        }
    }
}

impl<T: EngineClass> FromVariant for Option<ObjRef<T>> {
    fn from_variant(variant: &Variant) -> HostResult<Self> {
        if variant.is_nil() {
            return Ok(None);
        }
        match ObjRef::from_variant(variant) {
            Err(HostError::NullObject) => Ok(None),
            other => other.map(Some),
        }
    }
}

impl<T: EngineClass> PtrMarshal for Option<ObjRef<T>> {
    type Storage = ObjectHandle;

    fn to_storage(&self) -> HostResult<Lowered<ObjectHandle>> {
        match self {
            Some(obj) => obj.to_storage(),
            None => Ok(Lowered::plain(ObjectHandle::null())),
        }
    }

    unsafe fn from_return(storage: ObjectHandle) -> HostResult<Self> {
        if storage.is_null() {
            Ok(None)
        } else {
            unsafe { ObjRef::from_return(storage).map(Some) }
        }
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> HostResult<Self> {
        unsafe { Self::from_return(ptr::read_unaligned(ptr as *const ObjectHandle)) }
    }

    unsafe fn write_return(self, ret: TypePtr) -> HostResult<()> {
        match self {
            Some(obj) => unsafe { obj.write_return(ret) },
            None => {
                unsafe { ptr::write_unaligned(ret as *mut ObjectHandle, ObjectHandle::null()) };
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Obj
// ---------------------------------------------------------------------------

/// Whether the library owns the object behind an [`Obj`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The engine transferred ownership; the wrapper releases it.
    Owned,
    /// The engine keeps ownership; the wrapper only tracks validity.
    Borrowed,
}

/// A managed engine object tied to a lifetime scope.
///
/// An owned, ref-counted object holds one engine reference, released by
/// unreference (destroying on last) when the wrapper ends. An owned plain
/// object is destroyed. Extra library references come from [`retain`] and
/// go back through [`release`]; any still held when the wrapper ends are
/// released with it.
///
/// [`retain`]: Obj::retain
/// [`release`]: Obj::release
pub struct Obj<T: EngineClass> {
    obj: ObjRef<T>,
    managed: Managed,
    ownership: Ownership,
    refcounted: bool,
    retained: Cell<u32>,
}

impl<T: EngineClass> Obj<T> {
    fn wrap(obj: ObjRef<T>, ownership: Ownership) -> HostResult<Self> {
        let abi = try_abi()?;
        let refcounted = is_refcounted(abi, obj.handle);
        let release = match ownership {
            Ownership::Owned => Release::Object { refcounted, id: obj.id },
            Ownership::Borrowed => Release::Borrowed,
        };
        let managed = Managed::new_in_current(abi, RawHandle::Object(obj.handle), release);
        Ok(Obj { obj, managed, ownership, refcounted, retained: Cell::new(0) })
    }

    /// Adopt an object whose ownership the engine handed over.
    ///
    /// # Safety
    /// `handle` must be a live `T` the library now owns (holding one
    /// reference, if ref-counted).
    pub unsafe fn from_owned(handle: ObjectHandle) -> HostResult<Self> {
        Self::wrap(unsafe { ObjRef::from_raw(handle)? }, Ownership::Owned)
    }

    /// Track an object the engine keeps owning.
    pub fn borrowed(obj: ObjRef<T>) -> HostResult<Self> {
        obj.checked_handle()?;
        Self::wrap(obj, Ownership::Borrowed)
    }

    /// Instantiate `T` through the class database. Ref-counted instances
    /// start with the wrapper's single reference.
    pub fn construct() -> HostResult<Self> {
        let abi = try_abi()?;
        let name = NameArg::new(abi, T::CLASS_NAME);
        let handle = unsafe { (abi.class_db.classdb_construct_object)(name.as_ptr()) };
        drop(name);
        if handle.is_null() {
            return Err(HostError::NullObject);
        }
        if is_refcounted(abi, handle) {
            refcount_op(abi, handle, "init_ref")?;
        }
        unsafe { Self::from_owned(handle) }
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_refcounted(&self) -> bool {
        self.refcounted
    }

    pub fn obj_ref(&self) -> ObjRef<T> {
        self.obj
    }

    pub fn managed(&self) -> &Managed {
        &self.managed
    }

    /// Handle of a live object wrapped by a live wrapper.
    pub fn handle(&self) -> HostResult<ObjectHandle> {
        self.managed.get_raw()?;
        self.obj.checked_handle()
    }

    /// Take one more library reference.
    pub fn retain(&self) -> HostResult<()> {
        let handle = self.refcounted_handle()?;
        refcount_op(self.managed.abi(), handle, "reference")?;
        self.retained.set(self.retained.get() + 1);
        Ok(())
    }

    /// Give back a reference taken by [`retain`](Self::retain). Returns
    /// whether the engine destroyed the object. Without a retained reference
    /// this fails and the engine is not called.
    pub fn release(&self) -> HostResult<bool> {
        if self.retained.get() == 0 {
            return Err(LifetimeError::NoLibraryReference.into());
        }
        let handle = self.refcounted_handle()?;
        self.retained.set(self.retained.get() - 1);
        Ok(self.drop_reference(handle))
    }

    pub fn library_references(&self) -> u32 {
        self.retained.get()
    }

    /// The engine's reference count.
    pub fn reference_count(&self) -> HostResult<i64> {
        let handle = self.refcounted_handle()?;
        MethodBind::get_in(self.managed.abi(), "RefCounted", "get_reference_count", GET_REFERENCE_COUNT_HASH)?
            .ptrcall_with(handle, &())
    }

    fn refcounted_handle(&self) -> HostResult<ObjectHandle> {
        let handle = self.handle()?;
        if !self.refcounted {
            return Err(HostError::InvalidCast);
        }
        Ok(handle)
    }

    fn drop_reference(&self, handle: ObjectHandle) -> bool {
        let abi = self.managed.abi();
        let last = unsafe { unreference_raw(abi, handle) };
        if last {
            unsafe { (abi.objects.object_destroy)(handle) };
        }
        last
    }

    fn into_parts(self) -> (ObjRef<T>, Managed, Ownership, bool, u32) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so every field is read exactly once.
        unsafe {
            (
                this.obj,
                ptr::read(&this.managed),
                this.ownership,
                this.refcounted,
                this.retained.get(),
            )
        }
    }

    /// Engine-checked cast; gives the wrapper back unchanged on failure.
    pub fn cast<U: EngineClass>(self) -> Result<Obj<U>, Self> {
        match self.obj.cast::<U>() {
            Some(target) => {
                let (_, managed, ownership, refcounted, retained) = self.into_parts();
                Ok(Obj { obj: target, managed, ownership, refcounted, retained: Cell::new(retained) })
            }
            None => Err(self),
        }
    }

    /// Free now: release library references, then the wrapper's own.
    pub fn free(self) -> HostResult<()> {
        self.release_retained();
        let (_, managed, ..) = self.into_parts();
        managed.end()
    }

    /// Hand the wrapper's reference to the engine. Library references taken
    /// with `retain` are released first.
    pub fn transfer_to_engine(self) -> HostResult<ObjectHandle> {
        self.release_retained();
        let (_, managed, ..) = self.into_parts();
        let raw = managed.transfer_to_engine()?;
        raw.as_object().ok_or(HostError::InvalidCast)
    }

    /// Move to the root scope so the object outlives the current one.
    pub fn persist(&self) -> HostResult<()> {
        self.managed.persist()
    }

    fn release_retained(&self) {
        if self.retained.get() == 0 || !self.managed.is_live() {
            return;
        }
        if let Ok(handle) = self.obj.checked_handle() {
            while self.retained.get() > 0 {
                self.retained.set(self.retained.get() - 1);
                if self.drop_reference(handle) {
                    self.retained.set(0);
                }
            }
        }
    }
}

impl<T: HasParent> Obj<T> {
    pub fn upcast(self) -> Obj<T::Parent> {
        let (obj, managed, ownership, refcounted, retained) = self.into_parts();
        Obj { obj: obj.upcast(), managed, ownership, refcounted, retained: Cell::new(retained) }
    }
}

impl<T: EngineClass> Drop for Obj<T> {
    fn drop(&mut self) {
        self.release_retained();
    }
}

impl<T: EngineClass> Deref for Obj<T> {
    type Target = ObjRef<T>;

    fn deref(&self) -> &ObjRef<T> {
        &self.obj
    }
}

impl<T: EngineClass> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("class", &T::CLASS_NAME)
            .field("id", &self.obj.id.0)
            .field("ownership", &self.ownership)
            .field("live", &self.managed.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::LifetimeScope;
    use crate::test_support::{install, spawn_object, NodeClass, ObjectClass, RefCountedClass, ResourceClass};

    #[test]
    fn stale_reference_is_detected() {
        install();
        let (handle, id) = spawn_object("Object");
        let obj = unsafe { ObjRef::<ObjectClass>::from_raw(handle) }.unwrap();
        assert_eq!(obj.instance_id(), id);
        assert!(obj.is_valid());
        tether_test_host::destroy(id);
        assert!(!obj.is_valid());
        assert_eq!(obj.checked_handle(), Err(HostError::Lifetime(LifetimeError::StaleObject)));
        assert!(obj.cast::<ObjectClass>().is_none());
    }

    #[test]
    fn casts_follow_the_engine_hierarchy() {
        install();
        let (handle, id) = spawn_object("Node");
        let obj = unsafe { ObjRef::<ObjectClass>::from_raw(handle) }.unwrap();
        let node = obj.cast::<NodeClass>().expect("a Node is a Node");
        assert_eq!(node.raw(), handle);
        assert!(obj.cast::<RefCountedClass>().is_none());
        assert_eq!(obj.try_cast::<ResourceClass>().unwrap_err(), HostError::InvalidCast);
        assert_eq!(node.upcast(), obj);
        assert_eq!(node.class_name().unwrap(), "Node");
        assert_eq!(ObjRef::<NodeClass>::from_instance_id(id).unwrap(), node);
        assert_eq!(ObjRef::<RefCountedClass>::from_instance_id(id).unwrap_err(), HostError::InvalidCast);
        tether_test_host::destroy(id);
    }

    #[test]
    fn child_reference_derefs_to_parent() {
        install();
        let (handle, id) = spawn_object("Node");
        let node = unsafe { ObjRef::<NodeClass>::from_raw(handle) }.unwrap();
        let as_object: &ObjRef<ObjectClass> = &node;
        assert_eq!(as_object.instance_id(), id);
        tether_test_host::destroy(id);
    }

    #[test]
    fn owned_plain_object_is_destroyed_with_its_scope() {
        install();
        let scope = LifetimeScope::new();
        let node = Obj::<NodeClass>::construct().unwrap();
        let id = node.instance_id();
        assert_eq!(node.ownership(), Ownership::Owned);
        assert!(!node.is_refcounted());
        let escaped = node;
        scope.end();
        assert!(!tether_test_host::is_live(id));
        assert_eq!(escaped.handle(), Err(HostError::Lifetime(LifetimeError::UseAfterFree)));
    }

    #[test]
    fn borrowed_object_survives_its_wrapper() {
        install();
        let (handle, id) = spawn_object("Node");
        let obj = unsafe { ObjRef::<NodeClass>::from_raw(handle) }.unwrap();
        let borrowed = Obj::borrowed(obj).unwrap();
        drop(borrowed);
        assert!(tether_test_host::is_live(id));
        tether_test_host::destroy(id);
    }

    #[test]
    fn retain_release_balances_and_rejects_extra_release() {
        install();
        let obj = Obj::<RefCountedClass>::construct().unwrap();
        let id = obj.instance_id();
        assert_eq!(obj.reference_count().unwrap(), 1);
        obj.retain().unwrap();
        assert_eq!(obj.reference_count().unwrap(), 2);
        assert!(!obj.release().unwrap());
        assert_eq!(obj.reference_count().unwrap(), 1);
        assert_eq!(obj.release(), Err(HostError::Lifetime(LifetimeError::NoLibraryReference)));
        assert_eq!(obj.reference_count().unwrap(), 1);
        drop(obj);
        assert!(!tether_test_host::is_live(id));
    }

    #[test]
    fn last_release_of_a_borrowed_refcounted_destroys_it_once() {
        install();
        let (handle, id) = spawn_object("RefCounted");
        let obj = Obj::borrowed(unsafe { ObjRef::<RefCountedClass>::from_raw(handle) }.unwrap()).unwrap();
        obj.retain().unwrap();
        obj.retain().unwrap();
        assert!(!obj.release().unwrap());
        assert!(tether_test_host::is_live(id));
        assert!(obj.release().unwrap());
        assert!(!tether_test_host::is_live(id));
        assert_eq!(tether_test_host::destroy_log().iter().filter(|d| **d == id).count(), 1);
        assert_eq!(obj.release(), Err(HostError::Lifetime(LifetimeError::NoLibraryReference)));
    }

    #[test]
    fn outstanding_retains_are_released_with_the_wrapper() {
        install();
        let obj = Obj::<RefCountedClass>::construct().unwrap();
        let id = obj.instance_id();
        obj.retain().unwrap();
        obj.retain().unwrap();
        drop(obj);
        assert!(!tether_test_host::is_live(id));
        assert_eq!(tether_test_host::destroy_log().iter().filter(|d| **d == id).count(), 1);
    }

    #[test]
    fn engine_reference_keeps_object_after_wrapper_ends() {
        install();
        let obj = Obj::<RefCountedClass>::construct().unwrap();
        let id = obj.instance_id();
        let extra = obj.obj_ref();
        tether_test_host::reference(id);
        drop(obj);
        assert!(extra.is_valid());
        tether_test_host::unreference(id);
        assert!(!extra.is_valid());
    }

    #[test]
    fn failed_cast_returns_the_wrapper() {
        install();
        let node = Obj::<NodeClass>::construct().unwrap();
        let node = node.cast::<RefCountedClass>().unwrap_err();
        let object = node.upcast();
        let node = object.cast::<NodeClass>().unwrap();
        assert!(node.managed().is_live());
        node.free().unwrap();
    }

    #[test]
    fn retain_on_plain_object_is_rejected() {
        install();
        let node = Obj::<NodeClass>::construct().unwrap();
        assert_eq!(node.retain(), Err(HostError::InvalidCast));
    }

    #[test]
    fn object_variants_round_trip_and_type_check() {
        install();
        let node = Obj::<NodeClass>::construct().unwrap();
        let v = node.to_variant().unwrap();
        assert_eq!(v.get_type().unwrap(), VariantType::Object);
        let back: ObjRef<NodeClass> = v.to().unwrap();
        assert_eq!(back, node.obj_ref());
        assert_eq!(v.to::<ObjRef<RefCountedClass>>().unwrap_err(), HostError::InvalidCast);
        assert_eq!(v.object_instance_id().unwrap(), node.instance_id());
        let none = Option::<ObjRef<NodeClass>>::None.to_variant().unwrap();
        assert_eq!(none.to::<Option<ObjRef<NodeClass>>>().unwrap(), None);
    }
}
