//! Engine state: live objects, native and extension classes, class tags,
//! method binds and the message log.
//!
//! All of it sits behind one global mutex because objects may be destroyed
//! from any thread. Entry points copy what they need out of the state and
//! release the lock before calling back into the library.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{LazyLock, Mutex, MutexGuard};

use tether_ffi::{
    CallVirtualWithDataFn, ClassTag, CreateInstanceFn, FreeInstanceFn, GetVirtualCallDataFn, InstanceId,
    MethodBindHandle, MethodCallFn, MethodPtrCallFn, NotificationFn, ObjectHandle, ToStringFn, VariantType,
};

use crate::value::{handle_of, id_of, lock, Target, Value, Var};

/// A library-owned pointer kept in engine state.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawPtr(pub *mut c_void);

// SAFETY: the engine stores these addresses and hands them back to the
// library; it never dereferences them.
unsafe impl Send for RawPtr {}

impl RawPtr {
    pub(crate) const NULL: RawPtr = RawPtr(std::ptr::null_mut());

    pub(crate) fn is_null(self) -> bool {
        self.0.is_null()
    }
}

// ---------------------------------------------------------------------------
// Native classes and methods
// ---------------------------------------------------------------------------

pub(crate) struct NativeClass {
    pub name: &'static str,
    pub parent: Option<&'static str>,
    pub instantiable: bool,
}

pub(crate) const NATIVE_CLASSES: &[NativeClass] = &[
    NativeClass { name: "Object", parent: None, instantiable: true },
    NativeClass { name: "RefCounted", parent: Some("Object"), instantiable: true },
    NativeClass { name: "Node", parent: Some("Object"), instantiable: true },
    NativeClass { name: "Resource", parent: Some("RefCounted"), instantiable: true },
    NativeClass { name: "EditorPlugin", parent: Some("Node"), instantiable: true },
    NativeClass { name: "Engine", parent: Some("Object"), instantiable: false },
    NativeClass { name: "OS", parent: Some("Object"), instantiable: false },
];

pub(crate) const SINGLETONS: &[&str] = &["Engine", "OS"];

fn native_class(name: &str) -> Option<&'static NativeClass> {
    NATIVE_CLASSES.iter().find(|class| class.name == name)
}

/// A method implemented by the engine itself.
pub(crate) struct NativeMethod {
    pub class: &'static str,
    pub name: &'static str,
    pub hash: i64,
    pub params: &'static [VariantType],
    /// `Nil` for methods without a return value.
    pub ret: VariantType,
    pub run: fn(&mut ObjectRecord, &[Value]) -> Value,
}

pub(crate) static NATIVE_METHODS: [NativeMethod; 8] = [
    NativeMethod {
        class: "Object",
        name: "get_class",
        hash: 201670096,
        params: &[],
        ret: VariantType::String,
        run: |record, _| Value::String(record.class.clone()),
    },
    NativeMethod {
        class: "Object",
        name: "get_instance_id",
        hash: 3905245786,
        params: &[],
        ret: VariantType::Int,
        run: |record, _| Value::Int(record.id.0 as i64),
    },
    NativeMethod {
        class: "Node",
        name: "get_name",
        hash: 2002593661,
        params: &[],
        ret: VariantType::String,
        run: |record, _| Value::String(record.name.clone()),
    },
    NativeMethod {
        class: "Node",
        name: "set_name",
        hash: 3304788590,
        params: &[VariantType::String],
        ret: VariantType::Nil,
        run: |record, args| {
            record.name = args.first().and_then(Value::text).unwrap_or_default().to_string();
            Value::Nil
        },
    },
    NativeMethod {
        class: "RefCounted",
        name: "init_ref",
        hash: 2240911060,
        params: &[],
        ret: VariantType::Bool,
        run: |record, _| {
            record.refcount = 1;
            Value::Bool(true)
        },
    },
    NativeMethod {
        class: "RefCounted",
        name: "reference",
        hash: 2240911060,
        params: &[],
        ret: VariantType::Bool,
        run: |record, _| {
            record.refcount += 1;
            Value::Bool(true)
        },
    },
    NativeMethod {
        class: "RefCounted",
        name: "unreference",
        hash: 2240911060,
        params: &[],
        ret: VariantType::Bool,
        run: |record, _| {
            record.refcount -= 1;
            Value::Bool(record.refcount <= 0)
        },
    },
    NativeMethod {
        class: "RefCounted",
        name: "get_reference_count",
        hash: 3905245786,
        params: &[],
        ret: VariantType::Int,
        run: |record, _| Value::Int(record.refcount),
    },
];

/// Engine-side properties: (class, property, getter, setter).
pub(crate) const NATIVE_PROPERTIES: &[(&str, &str, &str, &str)] = &[("Node", "name", "get_name", "set_name")];

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

pub(crate) struct ObjectRecord {
    pub id: InstanceId,
    /// Most-derived class: the extension class while an instance is
    /// attached, the native class otherwise.
    pub class: String,
    pub native: &'static str,
    pub instance: RawPtr,
    pub refcount: i64,
    pub name: String,
    /// Signal name and connected target, in connection order.
    pub connections: Vec<(String, Target)>,
}

// ---------------------------------------------------------------------------
// Extension classes
// ---------------------------------------------------------------------------

pub(crate) struct ExtMethod {
    pub name: String,
    pub userdata: RawPtr,
    pub call: Option<MethodCallFn>,
    pub ptrcall: Option<MethodPtrCallFn>,
    pub flags: u32,
    pub arg_types: Vec<VariantType>,
    /// Values for the trailing parameters.
    pub defaults: Vec<Var>,
}

pub(crate) enum ExtProperty {
    Group(String),
    Subgroup(String),
    Property { name: String, setter: String, getter: String, index: Option<i64> },
}

pub(crate) struct ExtClass {
    pub parent: String,
    pub native: &'static str,
    pub is_abstract: bool,
    pub userdata: RawPtr,
    pub create: Option<CreateInstanceFn>,
    pub free: Option<FreeInstanceFn>,
    pub to_string: Option<ToStringFn>,
    pub notification: Option<NotificationFn>,
    pub get_virtual: Option<GetVirtualCallDataFn>,
    pub call_virtual: Option<CallVirtualWithDataFn>,
    pub methods: Vec<ExtMethod>,
    pub properties: Vec<ExtProperty>,
    pub constants: Vec<(String, String, i64, bool)>,
    pub signals: Vec<(String, usize)>,
    /// Resolved virtual call data per name, misses included.
    pub virtuals: HashMap<String, RawPtr>,
    pub lookups: HashMap<String, usize>,
}

/// What a method bind handle points at.
pub(crate) enum Bind {
    Native(&'static NativeMethod),
    Extension { class: String, method: String },
}

/// Registration data of an extension class, as the engine recorded it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassInfo {
    pub parent: String,
    pub methods: Vec<String>,
    /// Property names in order, with groups as `group:Name` and subgroups
    /// as `subgroup:Name`.
    pub properties: Vec<String>,
    /// (enum, constant, value, bitfield)
    pub constants: Vec<(String, String, i64, bool)>,
    /// (signal, argument count)
    pub signals: Vec<(String, usize)>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

const TAG_BASE: u64 = 0x7a00_0000;

pub(crate) struct Engine {
    next_id: u64,
    pub objects: HashMap<InstanceId, ObjectRecord>,
    pub destroyed: Vec<InstanceId>,
    pub singletons: HashMap<&'static str, InstanceId>,
    pub classes: HashMap<String, ExtClass>,
    pub class_order: Vec<String>,
    tags: HashMap<String, ClassTag>,
    next_tag: u64,
    binds: HashMap<(String, String, i64), Box<Bind>>,
    pub plugins: Vec<String>,
}

static ENGINE: LazyLock<Mutex<Engine>> = LazyLock::new(|| Mutex::new(Engine::new()));
static LOG: Mutex<Vec<String>> = Mutex::new(Vec::new());

pub(crate) fn engine() -> MutexGuard<'static, Engine> {
    lock(&ENGINE)
}

pub(crate) fn log_line(line: String) {
    lock(&LOG).push(line);
}

pub(crate) fn log_snapshot() -> Vec<String> {
    lock(&LOG).clone()
}

impl Engine {
    fn new() -> Engine {
        let mut engine = Engine {
            next_id: 1,
            objects: HashMap::new(),
            destroyed: Vec::new(),
            singletons: HashMap::new(),
            classes: HashMap::new(),
            class_order: Vec::new(),
            tags: HashMap::new(),
            next_tag: 1,
            binds: HashMap::new(),
            plugins: Vec::new(),
        };
        for class in NATIVE_CLASSES {
            engine.add_tag(class.name);
        }
        engine
    }

    /// Create an object of a native class. Extension classes are created
    /// through their library.
    pub(crate) fn spawn_native(&mut self, class: &str) -> Option<InstanceId> {
        let native = native_class(class)?;
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        self.objects.insert(
            id,
            ObjectRecord {
                id,
                class: native.name.to_string(),
                native: native.name,
                instance: RawPtr::NULL,
                refcount: 0,
                name: String::new(),
                connections: Vec::new(),
            },
        );
        Some(id)
    }

    pub(crate) fn singleton(&mut self, name: &str) -> ObjectHandle {
        let Some(name) = SINGLETONS.iter().copied().find(|s| *s == name) else {
            return ObjectHandle::null();
        };
        let id = match self.singletons.get(name) {
            Some(id) => *id,
            None => {
                let Some(id) = self.spawn_native(name) else { return ObjectHandle::null() };
                self.singletons.insert(name, id);
                id
            }
        };
        handle_of(id)
    }

    /// Id of a live object, or `None` for null and stale handles.
    pub(crate) fn live(&self, handle: ObjectHandle) -> Option<InstanceId> {
        let id = id_of(handle);
        self.objects.contains_key(&id).then_some(id)
    }

    pub(crate) fn parent_of(&self, class: &str) -> Option<String> {
        match self.classes.get(class) {
            Some(ext) => Some(ext.parent.clone()),
            None => native_class(class).and_then(|native| native.parent).map(str::to_string),
        }
    }

    pub(crate) fn class_exists(&self, class: &str) -> bool {
        self.classes.contains_key(class) || native_class(class).is_some()
    }

    /// `class` followed by its ancestors.
    pub(crate) fn chain(&self, class: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if !self.class_exists(&name) || chain.contains(&name) {
                break;
            }
            current = self.parent_of(&name);
            chain.push(name);
        }
        chain
    }

    pub(crate) fn is_a(&self, class: &str, ancestor: &str) -> bool {
        self.chain(class).iter().any(|name| name == ancestor)
    }

    pub(crate) fn native_of(&self, class: &str) -> Option<&'static str> {
        match self.classes.get(class) {
            Some(ext) => Some(ext.native),
            None => native_class(class).map(|native| native.name),
        }
    }

    pub(crate) fn is_instantiable(&self, class: &str) -> bool {
        native_class(class).is_some_and(|native| native.instantiable)
    }

    // -- class tags ----------------------------------------------------------

    pub(crate) fn add_tag(&mut self, class: &str) {
        let tag = ClassTag::from_addr(TAG_BASE + self.next_tag * 8);
        self.next_tag += 1;
        self.tags.insert(class.to_string(), tag);
    }

    pub(crate) fn remove_tag(&mut self, class: &str) {
        self.tags.remove(class);
    }

    pub(crate) fn tag_of(&self, class: &str) -> ClassTag {
        self.tags.get(class).copied().unwrap_or(ClassTag::null())
    }

    pub(crate) fn class_of_tag(&self, tag: ClassTag) -> Option<&str> {
        self.tags.iter().find(|(_, t)| t.to_addr() == tag.to_addr()).map(|(name, _)| name.as_str())
    }

    // -- methods -------------------------------------------------------------

    /// The extension class that declares `method`, searching from `class`
    /// upwards.
    pub(crate) fn ext_method_owner(&self, class: &str, method: &str) -> Option<String> {
        self.chain(class).into_iter().find(|name| {
            self.classes
                .get(name)
                .is_some_and(|ext| ext.methods.iter().any(|m| m.name == method))
        })
    }

    pub(crate) fn ext_method(&self, owner: &str, method: &str) -> Option<&ExtMethod> {
        self.classes.get(owner)?.methods.iter().find(|m| m.name == method)
    }

    pub(crate) fn native_method(&self, class: &str, method: &str) -> Option<&'static NativeMethod> {
        let chain = self.chain(class);
        NATIVE_METHODS
            .iter()
            .find(|native| native.name == method && chain.iter().any(|name| name == native.class))
    }

    /// Intern a bind for `class.method`. Native methods must match their
    /// hash; extension methods accept any hash.
    pub(crate) fn method_bind(&mut self, class: &str, method: &str, hash: i64) -> MethodBindHandle {
        let key = (class.to_string(), method.to_string(), hash);
        if let Some(bind) = self.binds.get(&key) {
            return MethodBindHandle(&**bind as *const Bind as *const c_void);
        }
        let bind = if let Some(owner) = self.ext_method_owner(class, method) {
            Bind::Extension { class: owner, method: method.to_string() }
        } else {
            match self.native_method(class, method) {
                Some(native) if native.hash == hash => Bind::Native(native),
                _ => return MethodBindHandle::null(),
            }
        };
        let bind = Box::new(bind);
        let handle = MethodBindHandle(&*bind as *const Bind as *const c_void);
        self.binds.insert(key, bind);
        handle
    }

    /// Getter, setter and index of a property, searching the class chain.
    pub(crate) fn property(&self, class: &str, property: &str) -> Option<(String, String, Option<i64>)> {
        for name in self.chain(class) {
            if let Some(ext) = self.classes.get(&name) {
                let found = ext.properties.iter().find_map(|p| match p {
                    ExtProperty::Property { name, setter, getter, index } if name == property => {
                        Some((getter.clone(), setter.clone(), *index))
                    }
                    _ => None,
                });
                if found.is_some() {
                    return found;
                }
            }
            if let Some((_, _, getter, setter)) =
                NATIVE_PROPERTIES.iter().find(|(owner, prop, _, _)| *owner == name && *prop == property)
            {
                return Some((getter.to_string(), setter.to_string(), None));
            }
        }
        None
    }

    pub(crate) fn class_info(&self, class: &str) -> Option<ClassInfo> {
        let ext = self.classes.get(class)?;
        Some(ClassInfo {
            parent: ext.parent.clone(),
            methods: ext.methods.iter().map(|m| m.name.clone()).collect(),
            properties: ext
                .properties
                .iter()
                .map(|p| match p {
                    ExtProperty::Group(name) => format!("group:{name}"),
                    ExtProperty::Subgroup(name) => format!("subgroup:{name}"),
                    ExtProperty::Property { name, .. } => name.clone(),
                })
                .collect(),
            constants: ext.constants.clone(),
            signals: ext.signals.clone(),
        })
    }
}

/// Resolve a bind handle previously returned by [`Engine::method_bind`].
///
/// # Safety
/// `handle` must be null or come from `method_bind`; binds are never freed.
pub(crate) unsafe fn bind_ref<'a>(handle: MethodBindHandle) -> Option<&'a Bind> {
    unsafe { (handle.0 as *const Bind).as_ref() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_hierarchy_answers_is_a() {
        let engine = Engine::new();
        assert!(engine.is_a("Resource", "Object"));
        assert!(engine.is_a("EditorPlugin", "Node"));
        assert!(!engine.is_a("Node", "RefCounted"));
        assert_eq!(engine.chain("Resource"), ["Resource", "RefCounted", "Object"]);
        assert!(engine.chain("Nope").is_empty());
    }

    #[test]
    fn native_binds_require_the_matching_hash() {
        let mut engine = Engine::new();
        assert!(!engine.method_bind("Node", "set_name", 3304788590).is_null());
        assert!(engine.method_bind("Node", "set_name", 1).is_null());
        assert!(engine.method_bind("RefCounted", "no_such_method", 0).is_null());
        let first = engine.method_bind("Resource", "reference", 2240911060);
        assert_eq!(first.0, engine.method_bind("Resource", "reference", 2240911060).0);
    }

    #[test]
    fn singletons_are_created_once() {
        let mut engine = Engine::new();
        let first = engine.singleton("OS");
        assert!(!first.is_null());
        assert_eq!(first.to_addr(), engine.singleton("OS").to_addr());
        assert!(engine.singleton("Nope").is_null());
        let id = engine.live(first).unwrap();
        assert_eq!(engine.objects[&id].class, "OS");
    }
}
