// Class registry: user classes registered with the engine, their live
// instances, and the callbacks the engine uses to reach them.
//
// Each registered class is an `Arc<ClassRecord>`. The engine holds one
// strong count through `class_userdata` until the class is unregistered;
// method and virtual userdata point into the record's descriptor vectors,
// which never change after registration. Instances are boxed
// `InstanceStorage` values whose address the engine keeps as the class
// instance pointer.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::AssertUnwindSafe;
use std::ptr;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tether_ffi::{
    CallError, CallErrorKind, ClassCreationInfo, ClassInstancePtr, ClassMethodInfo, ConstTypePtr,
    ConstVariantPtr, InstanceId, ObjectHandle, PropertyInfo, StringNamePtr, StringPtr, TypePtr,
    UninitStringPtr, UninitTypePtr, UninitVariantPtr, VariantType, PROPERTY_USAGE_DEFAULT,
    PROPERTY_USAGE_NIL_IS_VARIANT,
};

use crate::abi::{try_abi, Abi, NameArg, StringArg};
use crate::builtins::{GString, StringName};
use crate::class_builder::{
    ClassDescriptor, ConstantDescriptor, Factory, HostClass, MethodDescriptor, NotifyFn, PropertyEntry,
    SignalDescriptor, TextFn, VirtualDescriptor,
};
use crate::convert::PtrMarshal;
use crate::error::{HostError, HostResult, LifetimeError, RegistrationError};
use crate::ffi_guard::ffi_boundary;
use crate::logging::{LOG_ERROR, LOG_INFO, LOG_WARNING};
use crate::object::{Obj, ObjRef};
use crate::scope::LifetimeScope;
use crate::signature::ParamSpec;
use crate::variant::{arg_ptrs, Variant};
use crate::{lock_or_recover, read_or_recover, tlog, write_or_recover};

// ---------------------------------------------------------------------------
// Inventory-based auto-registration
// ---------------------------------------------------------------------------

/// Submitted by `#[hostclass]`.
pub struct ClassRegistration {
    pub name: &'static str,
    pub describe: fn() -> ClassDescriptor,
}
inventory::collect!(ClassRegistration);

/// Submitted by `#[hostclass_impl]`: adds the members of one impl block.
pub struct ImplRegistration {
    pub class: &'static str,
    pub extend: fn(ClassDescriptor) -> ClassDescriptor,
}
inventory::collect!(ImplRegistration);

/// Register every submitted class, parents before children. Returns the
/// number of classes registered.
pub fn register_all_from_inventory() -> HostResult<usize> {
    let mut pending: Vec<ClassDescriptor> = inventory::iter::<ClassRegistration>
        .into_iter()
        .map(|reg| (reg.describe)())
        .collect();

    let mut impl_count = 0usize;
    for ext in inventory::iter::<ImplRegistration> {
        match pending.iter().position(|desc| desc.name == ext.class) {
            Some(index) => {
                let desc = pending.remove(index);
                pending.insert(index, (ext.extend)(desc));
                impl_count += 1;
            }
            None => tlog!(LOG_WARNING, "[tether] impl block for unknown class {}", ext.class),
        }
    }

    let mut registered = 0usize;
    while !pending.is_empty() {
        // A class whose parent is still pending waits; a cycle falls through
        // to register_class, which reports the unknown parent.
        let index = pending
            .iter()
            .position(|desc| !pending.iter().any(|other| other.name == desc.parent))
            .unwrap_or(0);
        register_class(pending.remove(index))?;
        registered += 1;
    }

    tlog!(
        LOG_INFO,
        "[tether] register_all_from_inventory: {} classes, {} impl blocks",
        registered,
        impl_count,
    );
    Ok(registered)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Rust data attached to one engine object.
pub(crate) struct InstanceStorage {
    id: InstanceId,
    to_text: TextFn,
    notification: NotifyFn,
    data: RefCell<Box<dyn Any>>,
}

impl InstanceStorage {
    pub(crate) fn with_ref<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> HostResult<R> {
        let data = self.data.try_borrow().map_err(|_| LifetimeError::InstanceBusy)?;
        let this = (**data).downcast_ref::<T>().ok_or(HostError::InvalidCast)?;
        Ok(f(this))
    }

    pub(crate) fn with_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> HostResult<R> {
        let mut data = self.data.try_borrow_mut().map_err(|_| LifetimeError::InstanceBusy)?;
        let this = (**data).downcast_mut::<T>().ok_or(HostError::InvalidCast)?;
        Ok(f(this))
    }
}

#[derive(Clone, Copy)]
struct InstancePtr(*mut InstanceStorage);

// SAFETY: instance storage is only touched on the engine thread.
unsafe impl Send for InstancePtr {}

struct ClassRecord {
    name: &'static str,
    parent: &'static str,
    /// Engine class actually instantiated for this class.
    native_base: &'static str,
    factory: Factory,
    to_text: TextFn,
    notification: NotifyFn,
    methods: Vec<MethodDescriptor>,
    virtuals: Vec<VirtualDescriptor>,
    instances: Mutex<HashMap<InstanceId, InstancePtr>>,
}

// SAFETY: invokers are Send + Sync; the instance map holds plain addresses.
unsafe impl Sync for ClassRecord {}
unsafe impl Send for ClassRecord {}

impl ClassRecord {
    fn instantiate(&self) -> HostResult<ObjectHandle> {
        let abi = try_abi()?;
        let base = NameArg::new(abi, self.native_base);
        let object = unsafe { (abi.class_db.classdb_construct_object)(base.as_ptr()) };
        if object.is_null() {
            return Err(HostError::Construction(VariantType::Object));
        }
        let id = unsafe { (abi.objects.object_get_instance_id)(object) };
        let storage = Box::into_raw(Box::new(InstanceStorage {
            id,
            to_text: self.to_text,
            notification: self.notification,
            data: RefCell::new((self.factory)(object, id)),
        }));
        let class = NameArg::new(abi, self.name);
        unsafe { (abi.objects.object_set_instance)(object, class.as_ptr(), storage as ClassInstancePtr) };
        lock_or_recover(&self.instances).insert(id, InstancePtr(storage));
        Ok(object)
    }

    fn virtual_named(&self, name: &str) -> Option<&VirtualDescriptor> {
        self.virtuals.iter().find(|v| v.name == name)
    }
}

struct Registry {
    classes: HashMap<&'static str, Arc<ClassRecord>>,
    /// Registration order; unregistration walks it backwards.
    order: Vec<&'static str>,
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(Registry { classes: HashMap::new(), order: Vec::new() }))
}

fn record_of(class: &str) -> HostResult<Arc<ClassRecord>> {
    read_or_recover(registry())
        .classes
        .get(class)
        .cloned()
        .ok_or_else(|| RegistrationError::NotRegistered(class.to_string()).into())
}

pub fn is_registered(class: &str) -> bool {
    read_or_recover(registry()).classes.contains_key(class)
}

/// Registered class names, in registration order.
pub fn registered_classes() -> Vec<&'static str> {
    read_or_recover(registry()).order.clone()
}

/// Live instances of a registered class.
pub fn live_instances(class: &str) -> usize {
    record_of(class).map_or(0, |record| lock_or_recover(&record.instances).len())
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Engine strings that must stay alive for one registration call. Boxed so
/// the pointers handed out stay put while the vectors grow.
struct Interned {
    abi: &'static Abi,
    names: Vec<Box<NameArg<'static>>>,
    strings: Vec<Box<StringArg<'static>>>,
}

impl Interned {
    fn new(abi: &'static Abi) -> Self {
        Interned { abi, names: Vec::new(), strings: Vec::new() }
    }

    fn name(&mut self, text: &str) -> StringNamePtr {
        let arg = Box::new(NameArg::new(self.abi, text));
        let ptr = arg.as_ptr();
        self.names.push(arg);
        ptr
    }

    fn string(&mut self, text: &str) -> StringPtr {
        let arg = Box::new(StringArg::new(self.abi, text));
        let ptr = arg.as_ptr();
        self.strings.push(arg);
        ptr
    }

    fn property_info(
        &mut self,
        name: &str,
        spec: &ParamSpec,
        hint: u32,
        hint_string: &str,
        usage: u32,
    ) -> PropertyInfo {
        let usage = if spec.ty == VariantType::Nil { usage | PROPERTY_USAGE_NIL_IS_VARIANT } else { usage };
        PropertyInfo {
            type_: spec.ty,
            name: self.name(name),
            class_name: self.name(spec.class_name),
            hint,
            hint_string: self.string(hint_string),
            usage,
        }
    }

    fn param_info(&mut self, name: &str, spec: &ParamSpec) -> PropertyInfo {
        self.property_info(name, spec, 0, "", PROPERTY_USAGE_DEFAULT)
    }
}

/// Register one class and all its members with the engine.
///
/// The parent must be an engine class or an already registered user class.
/// Members go in a fixed order: methods, properties, constants, signals.
pub fn register_class(desc: ClassDescriptor) -> HostResult<()> {
    let abi = try_abi()?;
    let native_base = {
        let registry = read_or_recover(registry());
        if registry.classes.contains_key(desc.name) || abi.lookup_class_tag(desc.name).is_some() {
            return Err(RegistrationError::AlreadyRegistered(desc.name.to_string()).into());
        }
        match registry.classes.get(desc.parent) {
            Some(parent) => parent.native_base,
            None if abi.lookup_class_tag(desc.parent).is_some() => desc.parent,
            None => {
                return Err(RegistrationError::UnknownParent {
                    class: desc.name.to_string(),
                    parent: desc.parent.to_string(),
                }
                .into());
            }
        }
    };

    let ClassDescriptor {
        name,
        parent,
        is_virtual,
        is_abstract,
        is_exposed,
        factory,
        to_text,
        notification,
        methods,
        virtuals,
        properties,
        constants,
        signals,
    } = desc;
    let record = Arc::new(ClassRecord {
        name,
        parent,
        native_base,
        factory,
        to_text,
        notification,
        methods,
        virtuals,
        instances: Mutex::new(HashMap::new()),
    });

    let scope = LifetimeScope::new();
    let mut interned = Interned::new(abi);
    let class_name = interned.name(name);
    let parent_name = interned.name(parent);
    let userdata = Arc::into_raw(Arc::clone(&record)) as *mut c_void;
    let info = ClassCreationInfo {
        is_virtual,
        is_abstract,
        is_exposed,
        to_string_func: Some(instance_to_string),
        notification_func: Some(instance_notification),
        create_instance_func: if is_abstract { None } else { Some(create_instance) },
        free_instance_func: Some(free_instance),
        get_virtual_call_data_func: Some(get_virtual_call_data),
        call_virtual_with_data_func: Some(call_virtual_with_data),
        class_userdata: userdata,
    };
    unsafe { (abi.class_db.register_class)(abi.library, class_name, parent_name, &info) };

    let members = register_members(
        abi,
        &mut interned,
        class_name,
        &record,
        &properties,
        &constants,
        &signals,
    );
    drop(scope);

    if let Err(err) = members {
        unsafe {
            (abi.class_db.unregister_class)(abi.library, class_name);
            drop(Arc::from_raw(userdata as *const ClassRecord));
        }
        return Err(err);
    }

    {
        let mut registry = write_or_recover(registry());
        registry.classes.insert(name, Arc::clone(&record));
        registry.order.push(name);
    }
    tlog!(
        LOG_INFO,
        "[tether] registered {} extends {}: {} methods, {} virtuals, {} properties, {} constants, {} signals",
        name,
        parent,
        record.methods.len(),
        record.virtuals.len(),
        properties.len(),
        constants.len(),
        signals.len(),
    );
    Ok(())
}

fn arg_name(name: &str, index: usize) -> String {
    if name.is_empty() { format!("arg{index}") } else { name.to_string() }
}

fn register_members(
    abi: &'static Abi,
    interned: &mut Interned,
    class_name: StringNamePtr,
    record: &ClassRecord,
    properties: &[PropertyEntry],
    constants: &[ConstantDescriptor],
    signals: &[SignalDescriptor],
) -> HostResult<()> {
    register_methods(abi, interned, class_name, record)?;
    register_properties(abi, interned, record, class_name, properties)?;
    for constant in constants {
        let enum_name = interned.name(constant.enum_name);
        let constant_name = interned.name(constant.name);
        unsafe {
            (abi.class_db.register_class_integer_constant)(
                abi.library,
                class_name,
                enum_name,
                constant_name,
                constant.value,
                constant.bitfield,
            )
        };
    }
    for signal in signals {
        let args: Vec<PropertyInfo> = signal
            .params
            .iter()
            .enumerate()
            .map(|(i, (arg, spec))| interned.param_info(&arg_name(arg, i), spec))
            .collect();
        let signal_name = interned.name(signal.name);
        unsafe {
            (abi.class_db.register_class_signal)(abi.library, class_name, signal_name, args.as_ptr(), args.len() as i64)
        };
    }
    Ok(())
}

fn register_methods(
    abi: &'static Abi,
    interned: &mut Interned,
    class_name: StringNamePtr,
    record: &ClassRecord,
) -> HostResult<()> {
    for method in &record.methods {
        let args: Vec<PropertyInfo> = method
            .params
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let name = method.arg_names.get(i).copied().unwrap_or("");
                interned.param_info(&arg_name(name, i), spec)
            })
            .collect();
        let metadata: Vec<u32> = method.params.iter().map(|spec| spec.metadata).collect();
        let ret = method.ret.map(|spec| interned.param_info("", &spec));
        let defaults = method.defaults.iter().map(|make| make()).collect::<HostResult<Vec<Variant>>>()?;
        let default_ptrs: Vec<ConstVariantPtr> = arg_ptrs(&defaults)?;

        let info = ClassMethodInfo {
            name: interned.name(method.name),
            method_userdata: method as *const MethodDescriptor as *mut c_void,
            call_func: Some(method_call),
            ptrcall_func: Some(method_ptrcall),
            method_flags: method.flags,
            has_return_value: ret.is_some(),
            return_value_info: ret.as_ref().map_or(ptr::null(), |info| info as *const PropertyInfo),
            return_value_metadata: method.ret.map_or(0, |spec| spec.metadata),
            argument_count: args.len() as u32,
            arguments_info: args.as_ptr(),
            arguments_metadata: metadata.as_ptr(),
            default_argument_count: default_ptrs.len() as u32,
            default_arguments: default_ptrs.as_ptr(),
        };
        unsafe { (abi.class_db.register_class_method)(abi.library, class_name, &info) };
    }
    Ok(())
}

fn register_properties(
    abi: &'static Abi,
    interned: &mut Interned,
    record: &ClassRecord,
    class_name: StringNamePtr,
    properties: &[PropertyEntry],
) -> HostResult<()> {
    let has_method = |name: &str| name.is_empty() || record.methods.iter().any(|m| m.name == name);
    for entry in properties {
        match entry {
            PropertyEntry::Group { name, prefix } => {
                let (name, prefix) = (interned.string(name), interned.string(prefix));
                unsafe { (abi.class_db.register_class_property_group)(abi.library, class_name, name, prefix) };
            }
            PropertyEntry::Subgroup { name, prefix } => {
                let (name, prefix) = (interned.string(name), interned.string(prefix));
                unsafe {
                    (abi.class_db.register_class_property_subgroup)(abi.library, class_name, name, prefix)
                };
            }
            PropertyEntry::Property(property) => {
                for accessor in [property.setter, property.getter] {
                    if !has_method(accessor) {
                        tlog!(
                            LOG_WARNING,
                            "[tether] property {}.{} uses unregistered accessor {}",
                            record.name,
                            property.name,
                            accessor,
                        );
                    }
                }
                let info = interned.property_info(
                    property.name,
                    &property.spec,
                    property.hint,
                    property.hint_string,
                    property.usage,
                );
                let setter = interned.name(property.setter);
                let getter = interned.name(property.getter);
                unsafe {
                    match property.index {
                        Some(index) => (abi.class_db.register_class_property_indexed)(
                            abi.library,
                            class_name,
                            &info,
                            setter,
                            getter,
                            index,
                        ),
                        None => (abi.class_db.register_class_property)(
                            abi.library,
                            class_name,
                            &info,
                            setter,
                            getter,
                        ),
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unregistration
// ---------------------------------------------------------------------------

/// Unregister a class: detach and drop its live instances, forget cached
/// lookups, and release the engine's hold on the record. Instances stay
/// alive in the engine as plain objects of the native base class.
pub fn unregister_class(class: &str) -> HostResult<()> {
    let abi = try_abi()?;
    let record = {
        let registry = read_or_recover(registry());
        let record = registry
            .classes
            .get(class)
            .cloned()
            .ok_or_else(|| RegistrationError::NotRegistered(class.to_string()))?;
        if let Some(child) = registry.classes.values().find(|other| other.parent == class) {
            return Err(RegistrationError::StillInUse {
                class: class.to_string(),
                child: child.name.to_string(),
            }
            .into());
        }
        record
    };

    let instances: Vec<(InstanceId, InstancePtr)> = lock_or_recover(&record.instances).drain().collect();
    {
        let class_name = NameArg::new(abi, record.name);
        for (id, _) in &instances {
            let object = unsafe { (abi.objects.object_get_instance_from_id)(*id) };
            if !object.is_null() {
                unsafe { (abi.objects.object_set_instance)(object, class_name.as_ptr(), ptr::null_mut()) };
            }
        }
        unsafe { (abi.class_db.unregister_class)(abi.library, class_name.as_ptr()) };
    }

    {
        let mut registry = write_or_recover(registry());
        registry.classes.remove(class);
        registry.order.retain(|name| *name != class);
    }
    abi.forget_class(class);

    // User drop code may call back into the engine; no lock is held here.
    let dropped = instances.len();
    for (_, instance) in instances {
        drop(unsafe { Box::from_raw(instance.0) });
    }
    // The count handed to the engine as class userdata.
    unsafe { drop(Arc::from_raw(Arc::as_ptr(&record))) };

    tlog!(LOG_INFO, "[tether] unregistered {} ({} live instances dropped)", record.name, dropped);
    Ok(())
}

/// Unregister every class, most recently registered first. Returns the
/// number unregistered; failures are logged and skipped.
pub fn unregister_all() -> usize {
    let order = registered_classes();
    let mut count = 0;
    for class in order.iter().rev() {
        match unregister_class(class) {
            Ok(()) => count += 1,
            Err(err) => tlog!(LOG_ERROR, "[tether] cannot unregister {class}: {err}"),
        }
    }
    count
}

// ---------------------------------------------------------------------------
// Access from Rust
// ---------------------------------------------------------------------------

fn instance_storage<T: HostClass>(obj: &ObjRef<T>) -> HostResult<*const InstanceStorage> {
    obj.checked_handle()?;
    let record = record_of(T::CLASS_NAME)?;
    let instances = lock_or_recover(&record.instances);
    instances
        .get(&obj.instance_id())
        .map(|ptr| ptr.0 as *const InstanceStorage)
        .ok_or(HostError::NullObject)
}

impl<T: HostClass> ObjRef<T> {
    /// Borrow the Rust data of a user-class instance.
    pub fn bind<R>(&self, f: impl FnOnce(&T) -> R) -> HostResult<R> {
        let storage = instance_storage(self)?;
        unsafe { &*storage }.with_ref(f)
    }

    pub fn bind_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> HostResult<R> {
        let storage = instance_storage(self)?;
        unsafe { &*storage }.with_mut(f)
    }
}

impl<T: HostClass> Obj<T> {
    pub fn bind<R>(&self, f: impl FnOnce(&T) -> R) -> HostResult<R> {
        self.handle()?;
        self.obj_ref().bind(f)
    }

    pub fn bind_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> HostResult<R> {
        self.handle()?;
        self.obj_ref().bind_mut(f)
    }
}

// ---------------------------------------------------------------------------
// Engine callbacks
// ---------------------------------------------------------------------------

unsafe fn storage<'a>(instance: ClassInstancePtr) -> Option<&'a InstanceStorage> {
    unsafe { (instance as *const InstanceStorage).as_ref() }
}

fn call_error_of(method: &str, err: HostError) -> CallError {
    match err {
        HostError::Call(record) => record,
        other => {
            tlog!(LOG_ERROR, "[tether] {method}: {other}");
            CallError { error: CallErrorKind::InvalidMethod, argument: 0, expected: 0 }
        }
    }
}

unsafe extern "C" fn create_instance(class_userdata: *mut c_void) -> ObjectHandle {
    ffi_boundary(
        ObjectHandle::null(),
        AssertUnwindSafe(|| {
            let record = unsafe { &*(class_userdata as *const ClassRecord) };
            let _scope = LifetimeScope::new();
            record.instantiate().unwrap_or_else(|err| {
                tlog!(LOG_ERROR, "[tether] cannot create {}: {err}", record.name);
                ObjectHandle::null()
            })
        }),
    )
}

unsafe extern "C" fn free_instance(class_userdata: *mut c_void, instance: ClassInstancePtr) {
    ffi_boundary(
        (),
        AssertUnwindSafe(|| {
            if instance.is_null() {
                return;
            }
            let record = unsafe { &*(class_userdata as *const ClassRecord) };
            let storage = unsafe { Box::from_raw(instance as *mut InstanceStorage) };
            lock_or_recover(&record.instances).remove(&storage.id);
            if storage.data.try_borrow_mut().is_err() {
                // Destroyed from inside one of its own calls; the running
                // call still references the data.
                tlog!(LOG_ERROR, "[tether] {} destroyed while in use; leaking its data", record.name);
                std::mem::forget(storage);
                return;
            }
            let _scope = LifetimeScope::new();
            drop(storage);
        }),
    )
}

unsafe extern "C" fn get_virtual_call_data(class_userdata: *mut c_void, name: StringNamePtr) -> *mut c_void {
    ffi_boundary(
        ptr::null_mut(),
        AssertUnwindSafe(|| {
            let record = unsafe { &*(class_userdata as *const ClassRecord) };
            let _scope = LifetimeScope::new();
            let name = match unsafe { StringName::from_borrowed(name as ConstTypePtr) }.and_then(|n| n.text()) {
                Ok(name) => name,
                Err(err) => {
                    tlog!(LOG_ERROR, "[tether] unreadable virtual name for {}: {err}", record.name);
                    return ptr::null_mut();
                }
            };
            record
                .virtual_named(&name)
                .map_or(ptr::null_mut(), |entry| entry as *const VirtualDescriptor as *mut c_void)
        }),
    )
}

unsafe extern "C" fn call_virtual_with_data(
    instance: ClassInstancePtr,
    _name: StringNamePtr,
    virtual_userdata: *mut c_void,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    ffi_boundary(
        (),
        AssertUnwindSafe(|| {
            let Some(entry) = (unsafe { (virtual_userdata as *const VirtualDescriptor).as_ref() }) else {
                return;
            };
            let _scope = LifetimeScope::new();
            if let Err(err) = (entry.call)(unsafe { storage(instance) }, args, ret) {
                tlog!(LOG_ERROR, "[tether] virtual {} failed: {err}", entry.name);
                unsafe { write_default_return(entry.ret, ret) };
            }
        }),
    )
}

unsafe extern "C" fn method_call(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    argc: i64,
    ret: UninitVariantPtr,
    error: *mut CallError,
) {
    let method = unsafe { &*(method_userdata as *const MethodDescriptor) };
    let outcome = ffi_boundary(
        Err(HostError::invalid_method()),
        AssertUnwindSafe(|| {
            let _scope = LifetimeScope::new();
            let args: Vec<Variant> = (0..argc.max(0) as usize)
                .map(|i| unsafe { Variant::from_borrowed(*args.add(i)) })
                .collect();
            let value = (method.varcall)(unsafe { storage(instance) }, &args)?;
            unsafe { value.write_return(ret as TypePtr) }
        }),
    );
    let status = match outcome {
        Ok(()) => CallError::OK,
        Err(err) => {
            if let Ok(abi) = try_abi() {
                unsafe { (abi.variants.variant_new_nil)(ret) };
            }
            call_error_of(method.name, err)
        }
    };
    if !error.is_null() {
        unsafe { *error = status };
    }
}

unsafe extern "C" fn method_ptrcall(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    ffi_boundary(
        (),
        AssertUnwindSafe(|| {
            let method = unsafe { &*(method_userdata as *const MethodDescriptor) };
            let _scope = LifetimeScope::new();
            if let Err(err) = (method.ptrcall)(unsafe { storage(instance) }, args, ret) {
                tlog!(LOG_ERROR, "[tether] {} failed: {err}", method.name);
                unsafe { write_default_return(method.ret, ret) };
            }
        }),
    )
}

/// Fill a return slot a failed call never wrote with the default value of
/// its declared type. Void returns leave the slot alone.
///
/// # Safety
/// `ret` must be null or writable storage for `spec`'s type.
unsafe fn write_default_return(spec: Option<ParamSpec>, ret: TypePtr) {
    let Some(spec) = spec else { return };
    let Ok(abi) = try_abi() else { return };
    if ret.is_null() {
        return;
    }
    match spec.ty {
        VariantType::Nil => unsafe { (abi.variants.variant_new_nil)(ret as UninitVariantPtr) },
        VariantType::Object => unsafe { ptr::write_unaligned(ret as *mut ObjectHandle, ObjectHandle::null()) },
        ty => {
            let written = Variant::construct(ty, &[]).and_then(|default| {
                let to_type = abi.to_type_constructor(ty)?;
                unsafe { to_type(ret as UninitTypePtr, default.as_mut_ptr()?) };
                Ok(())
            });
            if let Err(err) = written {
                tlog!(LOG_ERROR, "[tether] cannot fill {} return slot: {err}", Variant::type_name(ty));
            }
        }
    }
}

unsafe extern "C" fn instance_to_string(instance: ClassInstancePtr, is_valid: *mut bool, out: UninitStringPtr) {
    let written = ffi_boundary(
        false,
        AssertUnwindSafe(|| {
            let Some(storage) = (unsafe { storage(instance) }) else { return false };
            let text = match storage.data.try_borrow() {
                Ok(data) => (storage.to_text)(&**data),
                Err(_) => None,
            };
            let Some(text) = text else { return false };
            let _scope = LifetimeScope::new();
            match GString::from_str(&text).and_then(|s| unsafe { s.write_return(out as TypePtr) }) {
                Ok(()) => true,
                Err(err) => {
                    tlog!(LOG_ERROR, "[tether] to_string failed: {err}");
                    false
                }
            }
        }),
    );
    if !is_valid.is_null() {
        unsafe { *is_valid = written };
    }
}

unsafe extern "C" fn instance_notification(instance: ClassInstancePtr, what: i32, _reversed: bool) {
    ffi_boundary(
        (),
        AssertUnwindSafe(|| {
            let Some(storage) = (unsafe { storage(instance) }) else { return };
            let _scope = LifetimeScope::new();
            match storage.data.try_borrow_mut() {
                Ok(mut data) => (storage.notification)(&mut **data, what),
                Err(_) => tlog!(LOG_WARNING, "[tether] notification {what} dropped: instance busy"),
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::class_builder::{default_arg, ClassBuilder};
    use crate::convert::ToVariant;
    use crate::frame::CallFrame;
    use crate::method_bind::MethodBind;
    use crate::object::{EngineClass, HasParent};
    use crate::test_support::{install, NodeClass, RefCountedClass};
    use tether_ffi::{PackedHandle, PROPERTY_HINT_RANGE};

    // -- a counter with methods and properties ------------------------------

    struct Counter {
        count: i64,
        last_notification: i32,
    }

    impl EngineClass for Counter {
        const CLASS_NAME: &'static str = "RegistryCounter";
    }

    impl HasParent for Counter {
        type Parent = NodeClass;
    }

    impl HostClass for Counter {
        fn create(_base: ObjRef<Self>) -> Self {
            Counter { count: 0, last_notification: 0 }
        }

        fn to_text(&self) -> Option<String> {
            Some(format!("Counter({})", self.count))
        }

        fn on_notification(&mut self, what: i32) {
            self.last_notification = what;
        }

        fn describe(class: ClassBuilder<Self>) -> ClassBuilder<Self> {
            class
                .method_mut("add", |this: &mut Counter, (n,): (i64,)| {
                    this.count += n;
                    this.count
                })
                .arg_names(&["amount"])
                .default_args(vec![default_arg(1i64)])
                .method("get_count", |this: &Counter, (): ()| this.count)
                .method_mut("set_count", |this: &mut Counter, (n,): (i64,)| this.count = n)
                .static_method("twice", |(n,): (i64,)| n * 2)
                .group("Counting", "")
                .property::<i64>("count", "set_count", "get_count")
                .hint(PROPERTY_HINT_RANGE, "0,1000")
                .enum_constant("Mode", "MODE_UP", 0)
                .enum_constant("Mode", "MODE_DOWN", 1)
                .signal::<(i64,)>("counted", &["total"])
        }
    }

    #[test]
    fn methods_dispatch_through_both_call_paths() {
        install();
        register_class(ClassBuilder::<Counter>::described().build()).unwrap();
        assert!(is_registered("RegistryCounter"));
        let info = tether_test_host::class_info("RegistryCounter").expect("engine knows the class");
        assert_eq!(info.parent, "Node");
        assert_eq!(info.methods, ["add", "get_count", "set_count", "twice"]);
        assert_eq!(info.properties, ["group:Counting", "count"]);
        assert_eq!(info.constants, [("Mode".to_string(), "MODE_UP".to_string(), 0, false), (
            "Mode".to_string(),
            "MODE_DOWN".to_string(),
            1,
            false
        )]);
        assert_eq!(info.signals, [("counted".to_string(), 1)]);

        let counter = Obj::<Counter>::construct().unwrap();
        let handle = counter.handle().unwrap();
        let add = MethodBind::get("RegistryCounter", "add", 0).unwrap();
        assert_eq!(add.ptrcall_with::<(i64,), i64>(handle, &(5,)).unwrap(), 5);
        // The engine fills in the registered default.
        assert_eq!(add.call(handle, &[]).unwrap().to::<i64>().unwrap(), 6);
        let err = add.call(handle, &["x".to_variant().unwrap()]).unwrap_err();
        assert_eq!(err, HostError::Call(CallError::invalid_argument(0, VariantType::Int as i32)));

        assert_eq!(counter.bind(|c| c.count).unwrap(), 6);
        counter.bind_mut(|c| c.count = 40).unwrap();
        let object = counter.obj_ref().to_variant().unwrap();
        assert_eq!(object.get_named("count").unwrap().to::<i64>().unwrap(), 40);
        assert_eq!(object.stringify().unwrap(), "Counter(40)");
        assert_eq!(counter.obj_ref().class_name().unwrap(), "RegistryCounter");

        tether_test_host::notify(counter.obj_ref().instance_id(), 13);
        assert_eq!(counter.bind(|c| c.last_notification).unwrap(), 13);

        drop(counter);
        assert_eq!(live_instances("RegistryCounter"), 0);
        unregister_class("RegistryCounter").unwrap();
        assert!(!is_registered("RegistryCounter"));
        assert!(tether_test_host::class_info("RegistryCounter").is_none());
    }

    // -- virtual dispatch across unregistration -------------------------------

    struct Ticker {
        elapsed: f64,
    }

    impl EngineClass for Ticker {
        const CLASS_NAME: &'static str = "RegistryTicker";
    }

    impl HasParent for Ticker {
        type Parent = NodeClass;
    }

    impl HostClass for Ticker {
        fn create(_base: ObjRef<Self>) -> Self {
            Ticker { elapsed: 0.0 }
        }
    }

    fn tick(id: InstanceId, delta: f64) -> bool {
        let arg = &delta as *const f64 as ConstTypePtr;
        tether_test_host::call_virtual(id, "_process", &[arg], ptr::null_mut())
    }

    #[test]
    fn virtual_overrides_resolve_once_and_vanish_on_unregister() {
        install();
        let desc = ClassBuilder::<Ticker>::new()
            .virtual_method("_process", |this: &mut Ticker, (delta,): (f64,)| this.elapsed += delta)
            .build();
        register_class(desc).unwrap();

        let ticker = Obj::<Ticker>::construct().unwrap();
        let id = ticker.obj_ref().instance_id();
        assert!(tick(id, 0.25));
        assert!(tick(id, 0.5));
        assert_eq!(ticker.bind(|t| t.elapsed).unwrap(), 0.75);
        assert_eq!(tether_test_host::virtual_lookups("RegistryTicker", "_process"), 1);
        // Not overridden: the engine default runs.
        let arg = 0i64;
        assert!(!tether_test_host::call_virtual(id, "_ready", &[&arg as *const i64 as ConstTypePtr], ptr::null_mut()));

        unregister_class("RegistryTicker").unwrap();
        assert!(tether_test_host::is_live(id));
        assert!(!tick(id, 1.0));
        assert!(ticker.bind(|t| t.elapsed).is_err());
        drop(ticker);
        assert!(!tether_test_host::is_live(id));
    }

    // -- registration errors ------------------------------------------------

    struct Base;
    struct Derived;

    impl EngineClass for Base {
        const CLASS_NAME: &'static str = "RegistryBase";
    }
    impl HasParent for Base {
        type Parent = RefCountedClass;
    }
    impl HostClass for Base {
        fn create(_base: ObjRef<Self>) -> Self {
            Base
        }
    }

    impl EngineClass for Derived {
        const CLASS_NAME: &'static str = "RegistryDerived";
    }
    impl HasParent for Derived {
        type Parent = Base;
    }
    impl HostClass for Derived {
        fn create(_base: ObjRef<Self>) -> Self {
            Derived
        }
    }

    struct Missing;
    struct Orphan;

    impl EngineClass for Missing {
        const CLASS_NAME: &'static str = "NoSuchEngineClass";
    }
    impl EngineClass for Orphan {
        const CLASS_NAME: &'static str = "RegistryOrphan";
    }
    impl HasParent for Orphan {
        type Parent = Missing;
    }
    impl HostClass for Orphan {
        fn create(_base: ObjRef<Self>) -> Self {
            Orphan
        }
    }

    #[test]
    fn registration_errors() {
        install();
        register_class(ClassBuilder::<Base>::new().build()).unwrap();
        let again = register_class(ClassBuilder::<Base>::new().build()).unwrap_err();
        assert_eq!(again, RegistrationError::AlreadyRegistered("RegistryBase".into()).into());

        let orphan = register_class(ClassBuilder::<Orphan>::new().build()).unwrap_err();
        assert_eq!(
            orphan,
            RegistrationError::UnknownParent {
                class: "RegistryOrphan".into(),
                parent: "NoSuchEngineClass".into(),
            }
            .into()
        );

        register_class(ClassBuilder::<Derived>::new().build()).unwrap();
        let derived = Obj::<Derived>::construct().unwrap();
        assert!(derived.is_refcounted());
        assert!(derived.obj_ref().is_a::<RefCountedClass>());
        drop(derived);

        let busy = unregister_class("RegistryBase").unwrap_err();
        assert_eq!(
            busy,
            RegistrationError::StillInUse { class: "RegistryBase".into(), child: "RegistryDerived".into() }
                .into()
        );
        unregister_class("RegistryDerived").unwrap();
        unregister_class("RegistryBase").unwrap();
        assert_eq!(
            unregister_class("RegistryBase").unwrap_err(),
            RegistrationError::NotRegistered("RegistryBase".into()).into()
        );
    }

    // -- instance lifetime --------------------------------------------------

    static TRACKED_DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Tracked;

    impl Drop for Tracked {
        fn drop(&mut self) {
            TRACKED_DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl EngineClass for Tracked {
        const CLASS_NAME: &'static str = "RegistryTracked";
    }
    impl HasParent for Tracked {
        type Parent = NodeClass;
    }
    impl HostClass for Tracked {
        fn create(_base: ObjRef<Self>) -> Self {
            Tracked
        }
    }

    #[test]
    fn instances_drop_with_their_object_or_their_class() {
        install();
        register_class(ClassBuilder::<Tracked>::new().build()).unwrap();
        let first = Obj::<Tracked>::construct().unwrap();
        let second = Obj::<Tracked>::construct().unwrap();
        let second_id = second.obj_ref().instance_id();
        second.persist().unwrap();
        assert_eq!(live_instances("RegistryTracked"), 2);

        first.free().unwrap();
        assert_eq!(TRACKED_DROPS.load(Ordering::SeqCst), 1);

        unregister_class("RegistryTracked").unwrap();
        assert_eq!(TRACKED_DROPS.load(Ordering::SeqCst), 2);
        assert!(tether_test_host::is_live(second_id));
        tether_test_host::destroy(second_id);
        assert_eq!(TRACKED_DROPS.load(Ordering::SeqCst), 2);
    }

    // -- re-entrant calls ---------------------------------------------------

    struct Echo {
        base: ObjRef<Echo>,
    }

    impl EngineClass for Echo {
        const CLASS_NAME: &'static str = "RegistryEcho";
    }
    impl HasParent for Echo {
        type Parent = NodeClass;
    }
    impl HostClass for Echo {
        fn create(base: ObjRef<Self>) -> Self {
            Echo { base }
        }
    }

    #[test]
    fn reentrant_call_into_a_busy_instance_fails_cleanly() {
        install();
        let desc = ClassBuilder::<Echo>::new()
            .method("ping", |_: &Echo, (): ()| 1i64)
            .method_mut("ping_self", |this: &mut Echo, (): ()| this.base.call("ping", &[]).is_err())
            .method("ping_shared", |this: &Echo, (): ()| this.base.call("ping", &[]).is_ok())
            .build();
        register_class(desc).unwrap();
        let echo = Obj::<Echo>::construct().unwrap();
        let object = echo.obj_ref();
        // A shared borrow allows nested shared borrows; an exclusive one does not.
        assert!(object.call("ping_shared", &[]).unwrap().to::<bool>().unwrap());
        assert!(object.call("ping_self", &[]).unwrap().to::<bool>().unwrap());
        assert!(
            tether_test_host::log_messages()
                .iter()
                .any(|m| m.contains("instance is borrowed by a running call"))
        );
        drop(echo);
        unregister_class("RegistryEcho").unwrap();
    }

    struct Gauge {
        level: i64,
    }

    impl EngineClass for Gauge {
        const CLASS_NAME: &'static str = "RegistryGauge";
    }
    impl HasParent for Gauge {
        type Parent = NodeClass;
    }
    impl HostClass for Gauge {
        fn create(_base: ObjRef<Self>) -> Self {
            Gauge { level: 5 }
        }
    }

    #[test]
    fn busy_instance_leaves_default_values_in_return_slots() {
        install();
        let desc = ClassBuilder::<Gauge>::new()
            .method_mut("level", |this: &mut Gauge, (): ()| this.level)
            .method_mut("label", |this: &mut Gauge, (): ()| format!("level {}", this.level))
            .virtual_method("_get_level", |this: &mut Gauge, (): ()| this.level)
            .build();
        register_class(desc).unwrap();
        let gauge = Obj::<Gauge>::construct().unwrap();
        let handle = gauge.handle().unwrap();
        let id = gauge.obj_ref().instance_id();

        let level = MethodBind::get("RegistryGauge", "level", 0).unwrap();
        let mut frame = CallFrame::new();
        unsafe { frame.reserve_return::<i64>().write(77) };
        gauge.bind_mut(|_| unsafe { level.ptrcall(handle, &mut frame) }).unwrap();
        assert_eq!(unsafe { frame.read_return::<i64>() }, 0);
        frame.free();

        let label = MethodBind::get("RegistryGauge", "label", 0).unwrap();
        let mut frame = CallFrame::new();
        frame.reserve_return::<PackedHandle>();
        gauge.bind_mut(|_| unsafe { label.ptrcall(handle, &mut frame) }).unwrap();
        let text = unsafe { GString::from_owned(crate::abi::abi(), frame.read_return::<PackedHandle>()) };
        frame.free();
        assert_eq!(text.text().unwrap(), "");

        let mut slot = 77i64;
        let ret = &mut slot as *mut i64 as TypePtr;
        assert!(gauge.bind_mut(|_| tether_test_host::call_virtual(id, "_get_level", &[], ret)).unwrap());
        assert_eq!(slot, 0);
        assert!(tether_test_host::call_virtual(id, "_get_level", &[], ret));
        assert_eq!(slot, 5);

        drop(gauge);
        unregister_class("RegistryGauge").unwrap();
    }

    // -- inventory ----------------------------------------------------------

    struct Listed;
    struct ListedChild;

    impl EngineClass for Listed {
        const CLASS_NAME: &'static str = "InventoryListed";
    }
    impl HasParent for Listed {
        type Parent = NodeClass;
    }
    impl HostClass for Listed {
        fn create(_base: ObjRef<Self>) -> Self {
            Listed
        }
    }

    impl EngineClass for ListedChild {
        const CLASS_NAME: &'static str = "InventoryListedChild";
    }
    impl HasParent for ListedChild {
        type Parent = Listed;
    }
    impl HostClass for ListedChild {
        fn create(_base: ObjRef<Self>) -> Self {
            ListedChild
        }
    }

    fn describe_listed() -> ClassDescriptor {
        ClassBuilder::<Listed>::new().build()
    }

    fn describe_listed_child() -> ClassDescriptor {
        ClassBuilder::<ListedChild>::new().build()
    }

    fn extend_listed(desc: ClassDescriptor) -> ClassDescriptor {
        ClassBuilder::<Listed>::extend(desc).static_method("answer", |(): ()| 42i64).build()
    }

    // Child first, to check that parents still register first.
    inventory::submit! {
        ClassRegistration { name: "InventoryListedChild", describe: describe_listed_child }
    }
    inventory::submit! {
        ClassRegistration { name: "InventoryListed", describe: describe_listed }
    }
    inventory::submit! {
        ImplRegistration { class: "InventoryListed", extend: extend_listed }
    }

    #[test]
    fn inventory_registers_parents_first_and_merges_impl_blocks() {
        install();
        assert_eq!(register_all_from_inventory().unwrap(), 2);
        let order: Vec<_> = registered_classes()
            .into_iter()
            .filter(|name| name.starts_with("Inventory"))
            .collect();
        assert_eq!(order, ["InventoryListed", "InventoryListedChild"]);
        let info = tether_test_host::class_info("InventoryListed").unwrap();
        assert_eq!(info.methods, ["answer"]);

        unregister_class("InventoryListedChild").unwrap();
        unregister_class("InventoryListed").unwrap();
    }
}
