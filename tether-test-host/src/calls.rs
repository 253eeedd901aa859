//! Everything that reaches into an object: engine methods, extension
//! methods through the library's callbacks, properties, virtual overrides,
//! notifications, signals and object destruction.
//!
//! The engine lock is never held while a library callback runs; callbacks
//! are free to call back into the host.

use tether_ffi::{
    CallError, CallErrorKind, CallVirtualWithDataFn, ConstTypePtr, ConstVariantPtr, InstanceId, ObjectHandle,
    PackedHandle, TypePtr, VariantHandle, METHOD_FLAG_STATIC,
};

use crate::engine::{engine, log_line, Bind, NativeMethod, RawPtr};
use crate::value::{handle_of, read_storage, write_storage, Handle, Target, Value, Var};
use crate::variant_ops::check_args;

fn invalid_method() -> CallError {
    CallError { error: CallErrorKind::InvalidMethod, argument: 0, expected: 0 }
}

fn instance_is_null() -> CallError {
    CallError { error: CallErrorKind::InstanceIsNull, argument: 0, expected: 0 }
}

pub(crate) fn is_live(id: InstanceId) -> bool {
    engine().objects.contains_key(&id)
}

// ---------------------------------------------------------------------------
// Lifetime
// ---------------------------------------------------------------------------

/// Construct an object by class name. Extension classes are created by
/// their library; abstract and unknown classes give null.
pub(crate) fn construct_object(class: &str) -> ObjectHandle {
    let create = {
        let mut engine = engine();
        match engine.classes.get(class) {
            Some(ext) if ext.is_abstract => return ObjectHandle::null(),
            Some(ext) => ext.create.map(|create| (create, ext.userdata)),
            None => {
                if !engine.is_instantiable(class) {
                    return ObjectHandle::null();
                }
                return engine.spawn_native(class).map_or(ObjectHandle::null(), handle_of);
            }
        }
    };
    match create {
        Some((create, userdata)) => unsafe { create(userdata.0) },
        None => ObjectHandle::null(),
    }
}

/// Destroy a live object, handing its instance back to the library.
/// Returns false for stale ids.
pub(crate) fn destroy(id: InstanceId) -> bool {
    let release = {
        let mut engine = engine();
        let Some(record) = engine.objects.remove(&id) else { return false };
        engine.destroyed.push(id);
        engine.singletons.retain(|_, singleton| *singleton != id);
        engine
            .classes
            .get(&record.class)
            .and_then(|ext| ext.free.map(|free| (free, ext.userdata)))
            .filter(|_| !record.instance.is_null())
            .map(|(free, userdata)| (free, userdata, record.instance))
    };
    if let Some((free, userdata, instance)) = release {
        unsafe { free(userdata.0, instance.0) };
    }
    true
}

// ---------------------------------------------------------------------------
// Method calls
// ---------------------------------------------------------------------------

enum Resolved {
    Native(&'static NativeMethod),
    Extension(String),
}

fn resolve(id: InstanceId, method: &str) -> Result<Resolved, CallError> {
    let engine = engine();
    let record = engine.objects.get(&id).ok_or_else(instance_is_null)?;
    if let Some(owner) = engine.ext_method_owner(&record.class, method) {
        return Ok(Resolved::Extension(owner));
    }
    engine.native_method(&record.class, method).map(Resolved::Native).ok_or_else(invalid_method)
}

/// Dynamic call of `method` on an object, by name.
pub(crate) fn call_method(id: InstanceId, method: &str, args: &[Value]) -> Result<Value, CallError> {
    match resolve(id, method)? {
        Resolved::Native(native) => call_native(native, id, args),
        Resolved::Extension(owner) => call_extension(&owner, method, id, args),
    }
}

pub(crate) fn has_method(id: InstanceId, method: &str) -> bool {
    resolve(id, method).is_ok()
}

/// Dynamic call through a method bind.
pub(crate) fn call_bind(bind: &Bind, id: InstanceId, args: &[Value]) -> Result<Value, CallError> {
    match bind {
        Bind::Native(native) => call_native(native, id, args),
        Bind::Extension { class, method } => call_extension(class, method, id, args),
    }
}

/// Pointer call through a method bind. Arguments and return use the
/// declared types' storage.
///
/// # Safety
/// `args` must hold one valid pointer per parameter and `ret` must be
/// storage for the return type.
pub(crate) unsafe fn ptrcall_bind(bind: &Bind, id: InstanceId, args: *const ConstTypePtr, ret: TypePtr) {
    match bind {
        Bind::Native(native) => {
            let values: Vec<Value> = native
                .params
                .iter()
                .enumerate()
                .map(|(i, ty)| unsafe { read_storage(*ty, *args.add(i)) })
                .collect();
            let result = {
                let mut engine = engine();
                let Some(record) = engine.objects.get_mut(&id) else {
                    log_line(format!("error: ptrcall {} on a freed object", native.name));
                    return;
                };
                (native.run)(record, &values)
            };
            if native.ret != tether_ffi::VariantType::Nil {
                unsafe { write_storage(result, ret) };
            }
        }
        Bind::Extension { class, method } => {
            let target = {
                let engine = engine();
                let instance = engine.objects.get(&id).map_or(RawPtr::NULL, |record| record.instance);
                engine
                    .ext_method(class, method)
                    .and_then(|m| m.ptrcall.map(|ptrcall| (ptrcall, m.userdata, instance, m.flags)))
            };
            match target {
                Some((ptrcall, userdata, instance, flags))
                    if !instance.is_null() || flags & METHOD_FLAG_STATIC != 0 =>
                unsafe { ptrcall(userdata.0, instance.0, args, ret) },
                _ => log_line(format!("error: ptrcall {class}.{method} without an instance")),
            }
        }
    }
}

fn call_native(native: &'static NativeMethod, id: InstanceId, args: &[Value]) -> Result<Value, CallError> {
    let args = check_args(native.params, args)?;
    let mut engine = engine();
    let record = engine.objects.get_mut(&id).ok_or_else(instance_is_null)?;
    Ok((native.run)(record, &args))
}

fn call_extension(owner: &str, method: &str, id: InstanceId, args: &[Value]) -> Result<Value, CallError> {
    let (call, userdata, instance, argc, defaults, flags) = {
        let engine = engine();
        let m = engine.ext_method(owner, method).ok_or_else(invalid_method)?;
        let instance = engine.objects.get(&id).map_or(RawPtr::NULL, |record| record.instance);
        (m.call, m.userdata, instance, m.arg_types.len(), m.defaults.clone(), m.flags)
    };
    let call = call.ok_or_else(invalid_method)?;
    if instance.is_null() && flags & METHOD_FLAG_STATIC == 0 {
        return Err(instance_is_null());
    }

    let mut vars: Vec<Var> = args.iter().cloned().map(Var::new).collect();
    let missing = argc.saturating_sub(vars.len());
    if missing > 0 && missing <= defaults.len() {
        vars.extend(defaults[defaults.len() - missing..].iter().cloned());
    }
    let ptrs: Vec<ConstVariantPtr> = vars.iter().map(|v| &v.0 as *const VariantHandle).collect();
    let mut ret = VariantHandle::ZEROED;
    let mut error = CallError::OK;
    unsafe { call(userdata.0, instance.0, ptrs.as_ptr(), ptrs.len() as i64, &mut ret, &mut error) };
    let ret = unsafe { Var::adopt(ret) };
    if error.is_ok() { Ok(ret.value().clone()) } else { Err(error) }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn property(id: InstanceId, name: &str) -> Option<(String, String, Option<i64>)> {
    let engine = engine();
    let record = engine.objects.get(&id)?;
    engine.property(&record.class, name)
}

pub(crate) fn get_property(id: InstanceId, name: &str) -> Option<Value> {
    let (getter, _, index) = property(id, name)?;
    let args: Vec<Value> = index.map(Value::Int).into_iter().collect();
    call_method(id, &getter, &args).ok()
}

pub(crate) fn set_property(id: InstanceId, name: &str, value: &Value) -> bool {
    let Some((_, setter, index)) = property(id, name) else { return false };
    let mut args: Vec<Value> = index.map(Value::Int).into_iter().collect();
    args.push(value.clone());
    call_method(id, &setter, &args).is_ok()
}

pub(crate) fn has_property(id: InstanceId, name: &str) -> bool {
    property(id, name).is_some()
}

// ---------------------------------------------------------------------------
// Virtual overrides and notifications
// ---------------------------------------------------------------------------

/// Call the library's override of `name`, searching from the object's
/// class upwards. Returns false when nothing overrides it.
pub(crate) fn call_virtual(id: InstanceId, name: &str, args: &[ConstTypePtr], ret: TypePtr) -> bool {
    let (classes, instance) = {
        let engine = engine();
        let Some(record) = engine.objects.get(&id) else { return false };
        if record.instance.is_null() {
            return false;
        }
        let classes: Vec<String> =
            engine.chain(&record.class).into_iter().filter(|class| engine.classes.contains_key(class)).collect();
        (classes, record.instance)
    };
    let name_handle = Handle::new(Value::StringName(name.to_string()));
    for class in &classes {
        if let Some((data, call)) = resolve_virtual(class, name, &name_handle.0) {
            unsafe { call(instance.0, &name_handle.0, data.0, args.as_ptr(), ret) };
            return true;
        }
    }
    false
}

/// Virtual call data of `class.name`, asking the library once per name.
fn resolve_virtual(class: &str, name: &str, name_handle: &PackedHandle) -> Option<(RawPtr, CallVirtualWithDataFn)> {
    let (cached, get, userdata, call) = {
        let engine = engine();
        let ext = engine.classes.get(class)?;
        (ext.virtuals.get(name).copied(), ext.get_virtual, ext.userdata, ext.call_virtual?)
    };
    let data = match cached {
        Some(data) => data,
        None => {
            let data = RawPtr(match get {
                Some(get) => unsafe { get(userdata.0, name_handle) },
                None => std::ptr::null_mut(),
            });
            let mut engine = engine();
            if let Some(ext) = engine.classes.get_mut(class) {
                ext.virtuals.insert(name.to_string(), data);
                *ext.lookups.entry(name.to_string()).or_default() += 1;
            }
            data
        }
    };
    (!data.is_null()).then_some((data, call))
}

pub(crate) fn notify(id: InstanceId, what: i32) {
    let target = {
        let engine = engine();
        engine.objects.get(&id).and_then(|record| {
            let notification = engine.classes.get(&record.class)?.notification?;
            (!record.instance.is_null()).then_some((notification, record.instance))
        })
    };
    if let Some((notification, instance)) = target {
        unsafe { notification(instance.0, what, false) };
    }
}

/// Text of an object: the library's `to_string` if it provides one,
/// otherwise `<Class#id>`.
pub(crate) fn object_text(id: InstanceId) -> String {
    if !id.is_valid() {
        return "<null>".to_string();
    }
    let (class, to_string, instance) = {
        let engine = engine();
        let Some(record) = engine.objects.get(&id) else { return "<Freed Object>".to_string() };
        let to_string = engine.classes.get(&record.class).and_then(|ext| ext.to_string);
        (record.class.clone(), to_string, record.instance)
    };
    if let (Some(to_string), false) = (to_string, instance.is_null()) {
        let mut valid = false;
        let mut out = PackedHandle::ZEROED;
        unsafe { to_string(instance.0, &mut valid, &mut out) };
        let out = Handle(out);
        if valid {
            return out.value().text().unwrap_or_default().to_string();
        }
    }
    format!("<{class}#{}>", id.0)
}

// ---------------------------------------------------------------------------
// Callables and signals
// ---------------------------------------------------------------------------

/// Dynamic calls on a callable value.
pub(crate) fn call_callable(callable: &Target, method: &str, args: &[Value]) -> Option<Result<Value, CallError>> {
    match method {
        "call" => Some(call_method(callable.object, &callable.name, args)),
        "is_valid" => Some(Ok(Value::Bool(is_live(callable.object) && has_method(callable.object, &callable.name)))),
        _ => None,
    }
}

/// Dynamic calls on a signal value; connections live on the emitting
/// object, so every copy of the signal sees them.
pub(crate) fn call_signal(signal: &Target, method: &str, args: &[Value]) -> Option<Result<Value, CallError>> {
    let result = match method {
        "connect" | "disconnect" | "is_connected" => {
            let target = match args {
                [Value::Callable(target)] => target.clone(),
                [_] => {
                    return Some(Err(CallError::invalid_argument(0, tether_ffi::VariantType::Callable as i32)));
                }
                _ => return Some(Err(CallError::arity(args.len(), 1))),
            };
            let mut engine = engine();
            let Some(record) = engine.objects.get_mut(&signal.object) else { return Some(Err(instance_is_null())) };
            let position = record.connections.iter().position(|(name, t)| *name == signal.name && *t == target);
            match (method, position) {
                ("connect", None) => {
                    record.connections.push((signal.name.clone(), target));
                    Ok(Value::Int(0))
                }
                // Already connected.
                ("connect", Some(_)) => Ok(Value::Int(22)),
                ("disconnect", Some(i)) => {
                    record.connections.remove(i);
                    Ok(Value::Nil)
                }
                ("disconnect", None) => Ok(Value::Nil),
                (_, found) => Ok(Value::Bool(found.is_some())),
            }
        }
        "emit" => {
            let targets: Vec<Target> = {
                let engine = engine();
                let Some(record) = engine.objects.get(&signal.object) else { return Some(Err(instance_is_null())) };
                record
                    .connections
                    .iter()
                    .filter(|(name, _)| *name == signal.name)
                    .map(|(_, target)| target.clone())
                    .collect()
            };
            for target in targets {
                if let Err(err) = call_method(target.object, &target.name, args) {
                    log_line(format!("error: signal {} -> {}: {:?}", signal.name, target.name, err.error));
                }
            }
            Ok(Value::Nil)
        }
        _ => return None,
    };
    Some(result)
}

pub(crate) const CALLABLE_METHODS: &[&str] = &["call", "is_valid"];
pub(crate) const SIGNAL_METHODS: &[&str] = &["connect", "disconnect", "is_connected", "emit"];
