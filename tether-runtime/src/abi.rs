// Global ABI storage. Resolved once during library init, read-only afterwards
// apart from the per-key caches, and torn down at the last deinitialize.

use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::hash::Hash;
use std::ops::Deref;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::RwLock;

use tether_ffi::{
    AbiTable, ClassTag, GetProcAddress, LibraryToken, MethodBindHandle, ObjectHandle, PackedHandle,
    PtrBuiltinMethod, PtrConstructor, PtrDestructor, PtrOperatorEvaluator, StringNamePtr,
    StringPtr, TypeFromVariantFn, VariantFromTypeFn, VariantOperator, VariantType,
};

use crate::error::{AbiError, HostError, HostResult};
use crate::{read_or_recover, write_or_recover};

// ---------------------------------------------------------------------------
// Caches
// ---------------------------------------------------------------------------

/// Write-once-per-key map. The resolver closure runs without the lock held.
struct Cache<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Copy, V: Copy> Cache<K, V> {
    fn new() -> Self {
        Cache { map: RwLock::new(HashMap::new()) }
    }

    fn get_or_insert_with(&self, key: K, resolve: impl FnOnce() -> V) -> V {
        if let Some(value) = read_or_recover(&self.map).get(&key) {
            return *value;
        }
        let value = resolve();
        *write_or_recover(&self.map).entry(key).or_insert(value)
    }

    /// Like `get_or_insert_with`, but a `None` answer is not remembered.
    fn get_or_try_insert_with(&self, key: K, resolve: impl FnOnce() -> Option<V>) -> Option<V> {
        if let Some(value) = read_or_recover(&self.map).get(&key) {
            return Some(*value);
        }
        let value = resolve()?;
        Some(*write_or_recover(&self.map).entry(key).or_insert(value))
    }

    fn retain(&self, keep: impl FnMut(&K, &mut V) -> bool) {
        write_or_recover(&self.map).retain(keep);
    }

    fn len(&self) -> usize {
        read_or_recover(&self.map).len()
    }
}

// ---------------------------------------------------------------------------
// Abi
// ---------------------------------------------------------------------------

/// The resolved entry-point table plus the lookups the runtime memoizes.
/// Dereferences to [`AbiTable`] so entries read as `abi.variants.variant_call`.
pub struct Abi {
    table: AbiTable,
    method_binds: Cache<(&'static str, &'static str, i64), MethodBindHandle>,
    class_tags: Cache<&'static str, ClassTag>,
    operators: Cache<(VariantOperator, VariantType, VariantType), Option<PtrOperatorEvaluator>>,
    builtin_methods: Cache<(VariantType, &'static str, i64), Option<PtrBuiltinMethod>>,
    constructors: Cache<(VariantType, i32), Option<PtrConstructor>>,
    destructors: Cache<VariantType, Option<PtrDestructor>>,
    from_type: Cache<VariantType, Option<VariantFromTypeFn>>,
    to_type: Cache<VariantType, Option<TypeFromVariantFn>>,
    singletons: Cache<&'static str, ObjectHandle>,
}

impl Deref for Abi {
    type Target = AbiTable;

    #[inline]
    fn deref(&self) -> &AbiTable {
        &self.table
    }
}

impl Abi {
    fn new(table: AbiTable) -> Self {
        Abi {
            table,
            method_binds: Cache::new(),
            class_tags: Cache::new(),
            operators: Cache::new(),
            builtin_methods: Cache::new(),
            constructors: Cache::new(),
            destructors: Cache::new(),
            from_type: Cache::new(),
            to_type: Cache::new(),
            singletons: Cache::new(),
        }
    }

    pub fn table(&self) -> &AbiTable {
        &self.table
    }

    /// Unwrap an optional entry, reporting its name when the engine lacks it.
    pub fn optional<T>(entry: Option<T>, name: &'static CStr) -> HostResult<T> {
        entry.ok_or(HostError::Abi(AbiError::Unavailable(name)))
    }

    /// Method bind for `class.method`, cached per (class, method, hash).
    pub fn method_bind(
        &self,
        class: &'static str,
        method: &'static str,
        hash: i64,
    ) -> HostResult<MethodBindHandle> {
        self.method_binds
            .get_or_try_insert_with((class, method, hash), || {
                let class_name = NameArg::new(self, class);
                let method_name = NameArg::new(self, method);
                let bind = unsafe {
                    (self.class_db.classdb_get_method_bind)(
                        class_name.as_ptr(),
                        method_name.as_ptr(),
                        hash,
                    )
                };
                (!bind.is_null()).then_some(bind)
            })
            .ok_or_else(HostError::invalid_method)
    }

    /// Cast tag of an engine class, cached per name.
    pub fn class_tag(&self, class: &'static str) -> Option<ClassTag> {
        self.class_tags
            .get_or_try_insert_with(class, || self.lookup_class_tag(class))
    }

    /// Uncached tag lookup; `None` when the engine does not know the class.
    pub fn lookup_class_tag(&self, class: &str) -> Option<ClassTag> {
        let name = NameArg::new(self, class);
        let tag = unsafe { (self.class_db.classdb_get_class_tag)(name.as_ptr()) };
        (!tag.is_null()).then_some(tag)
    }

    /// Drop cached tags and method binds of a class that was unregistered.
    pub fn forget_class(&self, class: &str) {
        self.class_tags.retain(|name, _| *name != class);
        self.method_binds.retain(|(owner, _, _), _| *owner != class);
    }

    pub fn operator_evaluator(
        &self,
        op: VariantOperator,
        left: VariantType,
        right: VariantType,
    ) -> Option<PtrOperatorEvaluator> {
        self.operators.get_or_insert_with((op, left, right), || unsafe {
            (self.variants.variant_get_ptr_operator_evaluator)(op, left, right)
        })
    }

    pub fn builtin_method(
        &self,
        ty: VariantType,
        method: &'static str,
        hash: i64,
    ) -> Option<PtrBuiltinMethod> {
        self.builtin_methods.get_or_insert_with((ty, method, hash), || {
            let name = NameArg::new(self, method);
            unsafe { (self.variants.variant_get_ptr_builtin_method)(ty, name.as_ptr(), hash) }
        })
    }

    /// Builtin constructor. Index 0 is the default constructor, 1 the copy
    /// constructor; higher indices are type specific.
    pub fn constructor(&self, ty: VariantType, index: i32) -> Option<PtrConstructor> {
        self.constructors.get_or_insert_with((ty, index), || unsafe {
            (self.variants.variant_get_ptr_constructor)(ty, index)
        })
    }

    /// Builtin destructor; `None` for types without engine-side storage.
    pub fn destructor(&self, ty: VariantType) -> Option<PtrDestructor> {
        self.destructors.get_or_insert_with(ty, || unsafe {
            (self.variants.variant_get_ptr_destructor)(ty)
        })
    }

    pub fn from_type_constructor(&self, ty: VariantType) -> HostResult<VariantFromTypeFn> {
        self.from_type
            .get_or_insert_with(ty, || unsafe {
                (self.variants.get_variant_from_type_constructor)(ty)
            })
            .ok_or(HostError::Construction(ty))
    }

    pub fn to_type_constructor(&self, ty: VariantType) -> HostResult<TypeFromVariantFn> {
        self.to_type
            .get_or_insert_with(ty, || unsafe {
                (self.variants.get_variant_to_type_constructor)(ty)
            })
            .ok_or(HostError::Construction(ty))
    }

    /// Engine singleton by name. Singletons are never released.
    pub fn singleton(&self, name: &'static str) -> HostResult<ObjectHandle> {
        self.singletons
            .get_or_try_insert_with(name, || {
                let name = NameArg::new(self, name);
                let obj = unsafe { (self.objects.global_get_singleton)(name.as_ptr()) };
                (!obj.is_null()).then_some(obj)
            })
            .ok_or(HostError::NullObject)
    }

    /// Number of memoized method binds (diagnostics).
    pub fn cached_method_binds(&self) -> usize {
        self.method_binds.len()
    }
}

// ---------------------------------------------------------------------------
// Global storage
// ---------------------------------------------------------------------------

static ABI: AtomicPtr<Abi> = AtomicPtr::new(ptr::null_mut());

/// Resolve every entry through `get_proc_address` and publish the table.
/// A second call while a table is live returns the existing one.
///
/// # Safety
/// `get_proc_address` must be the engine's resolver and `library` the token
/// it handed to the entry point.
pub unsafe fn init_abi(
    get_proc_address: GetProcAddress,
    library: LibraryToken,
) -> HostResult<&'static Abi> {
    let current = ABI.load(Ordering::Acquire);
    if !current.is_null() {
        return Ok(unsafe { &*current });
    }
    let table = unsafe { AbiTable::load(get_proc_address, library)? };
    let fresh = Box::into_raw(Box::new(Abi::new(table)));
    match ABI.compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => Ok(unsafe { &*fresh }),
        Err(existing) => {
            drop(unsafe { Box::from_raw(fresh) });
            Ok(unsafe { &*existing })
        }
    }
}

/// Access the global ABI. Panics if called before [`init_abi`].
#[inline]
pub fn abi() -> &'static Abi {
    try_abi().expect("tether ABI not initialized")
}

#[inline]
pub fn try_abi() -> HostResult<&'static Abi> {
    let current = ABI.load(Ordering::Acquire);
    if current.is_null() {
        Err(HostError::Abi(AbiError::NotInitialized))
    } else {
        // SAFETY: published by init_abi and only freed by release_abi.
        Ok(unsafe { &*current })
    }
}

#[inline]
pub fn is_abi_initialized() -> bool {
    !ABI.load(Ordering::Acquire).is_null()
}

/// Tear down the global table. Idempotent; returns whether a table was live.
///
/// # Safety
/// No reference obtained from [`abi`] may be used afterwards, and no managed
/// handle may still be live.
pub unsafe fn release_abi() -> bool {
    let current = ABI.swap(ptr::null_mut(), Ordering::AcqRel);
    if current.is_null() {
        return false;
    }
    drop(unsafe { Box::from_raw(current) });
    true
}

// ---------------------------------------------------------------------------
// Temporary engine strings for lookups
// ---------------------------------------------------------------------------

/// A string name constructed for the duration of one engine call.
pub struct NameArg<'a> {
    handle: PackedHandle,
    abi: &'a Abi,
}

impl<'a> NameArg<'a> {
    pub fn new(abi: &'a Abi, text: &str) -> Self {
        let mut handle = PackedHandle::ZEROED;
        unsafe {
            (abi.strings.string_name_new_with_utf8_chars_and_len)(
                &mut handle,
                text.as_ptr() as *const c_char,
                text.len() as i64,
            );
        }
        NameArg { handle, abi }
    }

    #[inline]
    pub fn as_ptr(&self) -> StringNamePtr {
        &self.handle
    }
}

impl Drop for NameArg<'_> {
    fn drop(&mut self) {
        if let Some(dtor) = self.abi.destructor(VariantType::StringName) {
            unsafe { dtor(self.handle.as_mut_type_ptr()) };
        }
    }
}

/// A string constructed for the duration of one engine call.
pub struct StringArg<'a> {
    handle: PackedHandle,
    abi: &'a Abi,
}

impl<'a> StringArg<'a> {
    pub fn new(abi: &'a Abi, text: &str) -> Self {
        let mut handle = PackedHandle::ZEROED;
        unsafe {
            (abi.strings.string_new_with_utf8_chars_and_len)(
                &mut handle,
                text.as_ptr() as *const c_char,
                text.len() as i64,
            );
        }
        StringArg { handle, abi }
    }

    #[inline]
    pub fn as_ptr(&self) -> StringPtr {
        &self.handle
    }
}

impl Drop for StringArg<'_> {
    fn drop(&mut self) {
        if let Some(dtor) = self.abi.destructor(VariantType::String) {
            unsafe { dtor(self.handle.as_mut_type_ptr()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::install;

    #[test]
    fn abi_loads_from_resolver() {
        let abi = install();
        assert!(is_abi_initialized());
        assert!(abi.unavailable().is_empty());
        assert!(std::ptr::eq(abi, super::abi()));
    }

    #[test]
    fn missing_required_entry_is_reported_by_name() {
        let result = unsafe {
            AbiTable::load(
                tether_test_host::get_proc_address_without_variant_call,
                tether_test_host::library_token(),
            )
        };
        let err = HostError::from(result.err().expect("load must fail"));
        assert_eq!(err, HostError::Abi(AbiError::MissingFunction(c"variant_call")));
    }

    #[test]
    fn optional_entries_may_be_absent() {
        let table = unsafe {
            AbiTable::load(
                tether_test_host::get_proc_address_baseline,
                tether_test_host::library_token(),
            )
        }
        .expect("baseline engine provides every required entry");
        assert!(table.logging.print_info.is_none());
        assert!(table.editor_plugins.add.is_none());
        assert!(table.unavailable().contains(&c"variant_get_object_instance_id"));
        let err = Abi::optional(table.editor_plugins.add, c"editor_add_plugin").unwrap_err();
        assert_eq!(err, HostError::Abi(AbiError::Unavailable(c"editor_add_plugin")));
    }

    #[test]
    fn method_binds_are_cached_and_unknown_methods_fail() {
        let abi = install();
        let first = abi.method_bind("RefCounted", "get_reference_count", 3905245786).unwrap();
        let second = abi.method_bind("RefCounted", "get_reference_count", 3905245786).unwrap();
        assert_eq!(first, second);
        let missing = abi.method_bind("RefCounted", "no_such_method", 0);
        assert!(matches!(missing, Err(HostError::Call(_))));
    }

    #[test]
    fn class_tags_resolve_known_classes_only() {
        let abi = install();
        assert!(abi.class_tag("Node").is_some());
        assert!(abi.lookup_class_tag("NoSuchClass").is_none());
    }
}
