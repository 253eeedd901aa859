//! Host-side representation of engine values and of the handles that point
//! at them.
//!
//! A variant handle is `[tag, box pointer, 0]` and a packed handle is
//! `[box pointer, tag]`; both own a heap `Value`. Copying a handle through a
//! constructor boxes a clone, so arrays and dictionaries share storage (their
//! payload is an `Arc`) while packed arrays and strings are copied.

use std::collections::hash_map::DefaultHasher;
use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

use tether_ffi::{InstanceId, ObjectHandle, PackedHandle, VariantHandle, VariantType};

pub(crate) type Shared<T> = Arc<Mutex<T>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Bound object plus member name, the payload of callables and signals.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Target {
    pub object: InstanceId,
    pub name: String,
}

#[derive(Clone, Debug)]
pub(crate) enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringName(String),
    NodePath(String),
    /// Math types and RIDs, stored as their raw bytes.
    Pod(VariantType, Vec<u8>),
    Object(InstanceId),
    Callable(Target),
    Signal(Target),
    Dictionary(Shared<Vec<(Var, Box<Var>)>>),
    Array(Shared<Vec<Var>>),
    Packed(VariantType, PackedData),
}

impl Value {
    pub(crate) fn ty(&self) -> VariantType {
        match self {
            Value::Nil => VariantType::Nil,
            Value::Bool(_) => VariantType::Bool,
            Value::Int(_) => VariantType::Int,
            Value::Float(_) => VariantType::Float,
            Value::String(_) => VariantType::String,
            Value::StringName(_) => VariantType::StringName,
            Value::NodePath(_) => VariantType::NodePath,
            Value::Pod(ty, _) | Value::Packed(ty, _) => *ty,
            Value::Object(_) => VariantType::Object,
            Value::Callable(_) => VariantType::Callable,
            Value::Signal(_) => VariantType::Signal,
            Value::Dictionary(_) => VariantType::Dictionary,
            Value::Array(_) => VariantType::Array,
        }
    }

    /// Text of a string-like value.
    pub(crate) fn text(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::StringName(s) | Value::NodePath(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub(crate) fn new_array(items: Vec<Var>) -> Value {
        Value::Array(shared(items))
    }

    pub(crate) fn new_dictionary() -> Value {
        Value::Dictionary(shared(Vec::new()))
    }
}

static NIL: Value = Value::Nil;

// ---------------------------------------------------------------------------
// Owned handles
// ---------------------------------------------------------------------------

/// An owned variant slot. `repr(transparent)` so array elements and
/// dictionary values can be handed out as `VariantPtr`s.
#[repr(transparent)]
pub(crate) struct Var(pub VariantHandle);

impl Var {
    pub(crate) fn new(value: Value) -> Var {
        let tag = value.ty() as u64;
        let boxed = Box::into_raw(Box::new(value)) as usize as u64;
        Var(VariantHandle { words: [tag, boxed, 0] })
    }

    pub(crate) fn nil() -> Var {
        Var::new(Value::Nil)
    }

    pub(crate) fn value(&self) -> &Value {
        unsafe { var_ref(&self.0) }
    }

    /// Replace the payload, keeping the tag word in sync.
    pub(crate) fn set(&mut self, value: Value) {
        *self = Var::new(value);
    }

    pub(crate) fn into_raw(self) -> VariantHandle {
        let handle = self.0;
        mem::forget(self);
        handle
    }

    /// Move into uninitialized storage.
    ///
    /// # Safety
    /// `dst` must be writable.
    pub(crate) unsafe fn write_to(self, dst: *mut VariantHandle) {
        if !dst.is_null() {
            unsafe { ptr::write_unaligned(dst, self.into_raw()) };
        }
    }

    /// Adopt a handle the library constructed or handed over.
    ///
    /// # Safety
    /// `handle` must be a constructed variant nobody else frees.
    pub(crate) unsafe fn adopt(handle: VariantHandle) -> Var {
        Var(handle)
    }
}

impl Clone for Var {
    fn clone(&self) -> Var {
        Var::new(self.value().clone())
    }
}

impl Drop for Var {
    fn drop(&mut self) {
        let boxed = self.0.words[1] as usize as *mut Value;
        if !boxed.is_null() {
            drop(unsafe { Box::from_raw(boxed) });
        }
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var({:?})", self.value())
    }
}

/// An owned two-word handle (strings, names, containers, callables).
#[repr(transparent)]
pub(crate) struct Handle(pub PackedHandle);

impl Handle {
    pub(crate) fn new(value: Value) -> Handle {
        let tag = value.ty() as u64;
        let boxed = Box::into_raw(Box::new(value)) as usize as u64;
        Handle(PackedHandle { words: [boxed, tag] })
    }

    pub(crate) fn value(&self) -> &Value {
        unsafe { handle_ref(&self.0) }
    }

    pub(crate) fn into_raw(self) -> PackedHandle {
        let handle = self.0;
        mem::forget(self);
        handle
    }
}

impl Clone for Handle {
    fn clone(&self) -> Handle {
        Handle::new(self.value().clone())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let boxed = self.0.words[0] as usize as *mut Value;
        if !boxed.is_null() {
            drop(unsafe { Box::from_raw(boxed) });
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:?})", self.value())
    }
}

/// The value behind a variant pointer. Null pointers and unconstructed
/// (zeroed) slots read as nil.
///
/// # Safety
/// `ptr` must be null or point at a variant handle built by this host.
pub(crate) unsafe fn var_ref<'a>(ptr: *const VariantHandle) -> &'a Value {
    if ptr.is_null() {
        return &NIL;
    }
    let boxed = unsafe { (*ptr).words[1] } as usize as *const Value;
    if boxed.is_null() { &NIL } else { unsafe { &*boxed } }
}

/// # Safety
/// As for [`var_ref`]; the slot must be constructed and not aliased.
pub(crate) unsafe fn var_mut<'a>(ptr: *mut VariantHandle) -> Option<&'a mut Value> {
    if ptr.is_null() {
        return None;
    }
    let boxed = unsafe { (*ptr).words[1] } as usize as *mut Value;
    if boxed.is_null() { None } else { Some(unsafe { &mut *boxed }) }
}

/// # Safety
/// `ptr` must be null or point at a packed handle built by this host.
pub(crate) unsafe fn handle_ref<'a>(ptr: *const PackedHandle) -> &'a Value {
    if ptr.is_null() {
        return &NIL;
    }
    let boxed = unsafe { (*ptr).words[0] } as usize as *const Value;
    if boxed.is_null() { &NIL } else { unsafe { &*boxed } }
}

/// # Safety
/// As for [`handle_ref`].
pub(crate) unsafe fn handle_mut<'a>(ptr: *mut PackedHandle) -> Option<&'a mut Value> {
    if ptr.is_null() {
        return None;
    }
    let boxed = unsafe { (*ptr).words[0] } as usize as *mut Value;
    if boxed.is_null() { None } else { Some(unsafe { &mut *boxed }) }
}

/// Text behind a string or string-name pointer; empty for anything else.
///
/// # Safety
/// As for [`handle_ref`].
pub(crate) unsafe fn text_at(ptr: *const PackedHandle) -> String {
    unsafe { handle_ref(ptr) }.text().unwrap_or_default().to_string()
}

// ---------------------------------------------------------------------------
// Object handles
// ---------------------------------------------------------------------------

const OBJECT_BASE: u64 = 0x1000_0000;
const OBJECT_STRIDE: u64 = 16;

/// Handles are derived from ids, so a handle is never reused by a later
/// object.
pub(crate) fn handle_of(id: InstanceId) -> ObjectHandle {
    if id.is_valid() {
        ObjectHandle::from_addr(OBJECT_BASE + id.0 * OBJECT_STRIDE)
    } else {
        ObjectHandle::null()
    }
}

pub(crate) fn id_of(handle: ObjectHandle) -> InstanceId {
    let addr = handle.to_addr();
    if addr <= OBJECT_BASE || (addr - OBJECT_BASE) % OBJECT_STRIDE != 0 {
        return InstanceId::NONE;
    }
    InstanceId((addr - OBJECT_BASE) / OBJECT_STRIDE)
}

// ---------------------------------------------------------------------------
// Plain-data layout
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Component {
    F32,
    I32,
    U64,
}

impl Component {
    fn size(self) -> usize {
        match self {
            Component::F32 | Component::I32 => 4,
            Component::U64 => 8,
        }
    }
}

pub(crate) fn pod_layout(ty: VariantType) -> Option<(Component, usize)> {
    use Component::*;
    let layout = match ty {
        VariantType::Vector2 => (F32, 2),
        VariantType::Vector2i => (I32, 2),
        VariantType::Rect2 => (F32, 4),
        VariantType::Rect2i => (I32, 4),
        VariantType::Vector3 => (F32, 3),
        VariantType::Vector3i => (I32, 3),
        VariantType::Transform2D => (F32, 6),
        VariantType::Vector4 => (F32, 4),
        VariantType::Vector4i => (I32, 4),
        VariantType::Plane => (F32, 4),
        VariantType::Quaternion => (F32, 4),
        VariantType::Aabb => (F32, 6),
        VariantType::Basis => (F32, 9),
        VariantType::Transform3D => (F32, 12),
        VariantType::Projection => (F32, 16),
        VariantType::Color => (F32, 4),
        VariantType::Rid => (U64, 1),
        _ => return None,
    };
    Some(layout)
}

pub(crate) fn pod_size(ty: VariantType) -> usize {
    pod_layout(ty).map_or(0, |(component, count)| component.size() * count)
}

/// Components of a plain-data value as numbers.
pub(crate) fn components(ty: VariantType, bytes: &[u8]) -> Vec<f64> {
    let Some((component, count)) = pod_layout(ty) else { return Vec::new() };
    (0..count)
        .filter_map(|i| {
            let at = i * component.size();
            let raw = bytes.get(at..at + component.size())?;
            Some(match component {
                Component::F32 => f32::from_le_bytes(raw.try_into().ok()?) as f64,
                Component::I32 => i32::from_le_bytes(raw.try_into().ok()?) as f64,
                Component::U64 => u64::from_le_bytes(raw.try_into().ok()?) as f64,
            })
        })
        .collect()
}

pub(crate) fn from_components(ty: VariantType, values: &[f64]) -> Vec<u8> {
    let mut bytes = vec![0u8; pod_size(ty)];
    if let Some((component, _)) = pod_layout(ty) {
        for (i, value) in values.iter().enumerate() {
            let at = i * component.size();
            let Some(slot) = bytes.get_mut(at..at + component.size()) else { break };
            match component {
                Component::F32 => slot.copy_from_slice(&(*value as f32).to_le_bytes()),
                Component::I32 => slot.copy_from_slice(&(*value as i32).to_le_bytes()),
                Component::U64 => slot.copy_from_slice(&(*value as u64).to_le_bytes()),
            }
        }
    }
    bytes
}

/// Index of a named member (`x`, `y`, `r`, ...) of a plain-data type.
pub(crate) fn member_index(ty: VariantType, name: &str) -> Option<usize> {
    let names: &[&str] = match ty {
        VariantType::Vector2 | VariantType::Vector2i => &["x", "y"],
        VariantType::Vector3 | VariantType::Vector3i => &["x", "y", "z"],
        VariantType::Vector4 | VariantType::Vector4i | VariantType::Quaternion => &["x", "y", "z", "w"],
        VariantType::Plane => &["x", "y", "z", "d"],
        VariantType::Color => &["r", "g", "b", "a"],
        _ => &[],
    };
    names.iter().position(|member| *member == name)
}

/// A single component as a variant value.
pub(crate) fn component_value(ty: VariantType, value: f64) -> Value {
    match pod_layout(ty) {
        Some((Component::F32, _)) => Value::Float(value),
        _ => Value::Int(value as i64),
    }
}

// ---------------------------------------------------------------------------
// Packed arrays
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub(crate) enum PackedData {
    Plain { elem: usize, bytes: Vec<u8> },
    Strings(Vec<Handle>),
}

/// Element size of a packed array type; `None` for string arrays.
pub(crate) fn packed_elem_size(ty: VariantType) -> Option<usize> {
    match ty {
        VariantType::PackedByteArray => Some(1),
        VariantType::PackedInt32Array | VariantType::PackedFloat32Array => Some(4),
        VariantType::PackedInt64Array | VariantType::PackedFloat64Array => Some(8),
        VariantType::PackedVector2Array => Some(8),
        VariantType::PackedVector3Array => Some(12),
        VariantType::PackedColorArray | VariantType::PackedVector4Array => Some(16),
        _ => None,
    }
}

/// The value type `push_back` takes and `get` produces for a packed type.
pub(crate) fn packed_item_type(ty: VariantType) -> VariantType {
    match ty {
        VariantType::PackedByteArray | VariantType::PackedInt32Array | VariantType::PackedInt64Array => {
            VariantType::Int
        }
        VariantType::PackedFloat32Array | VariantType::PackedFloat64Array => VariantType::Float,
        VariantType::PackedVector2Array => VariantType::Vector2,
        VariantType::PackedVector3Array => VariantType::Vector3,
        VariantType::PackedColorArray => VariantType::Color,
        VariantType::PackedVector4Array => VariantType::Vector4,
        _ => VariantType::String,
    }
}

impl PackedData {
    pub(crate) fn empty(ty: VariantType) -> PackedData {
        match packed_elem_size(ty) {
            Some(elem) => PackedData::Plain { elem, bytes: Vec::new() },
            None => PackedData::Strings(Vec::new()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            PackedData::Plain { elem, bytes } => bytes.len() / elem,
            PackedData::Strings(items) => items.len(),
        }
    }

    pub(crate) fn get(&self, ty: VariantType, index: usize) -> Option<Value> {
        match self {
            PackedData::Plain { elem, bytes } => {
                let raw = bytes.get(index * elem..(index + 1) * elem)?;
                Some(decode_element(ty, raw))
            }
            PackedData::Strings(items) => items.get(index).map(|item| item.value().clone()),
        }
    }

    /// Store `value` at `index`; false when out of range or mistyped.
    pub(crate) fn set(&mut self, ty: VariantType, index: usize, value: &Value) -> bool {
        match self {
            PackedData::Plain { elem, bytes } => {
                let Some(encoded) = encode_element(ty, value) else { return false };
                match bytes.get_mut(index * *elem..(index + 1) * *elem) {
                    Some(slot) => {
                        slot.copy_from_slice(&encoded);
                        true
                    }
                    None => false,
                }
            }
            PackedData::Strings(items) => match (items.get_mut(index), value) {
                (Some(slot), Value::String(s) | Value::StringName(s)) => {
                    *slot = Handle::new(Value::String(s.clone()));
                    true
                }
                _ => false,
            },
        }
    }

    pub(crate) fn push(&mut self, ty: VariantType, value: &Value) -> bool {
        match self {
            PackedData::Plain { bytes, .. } => match encode_element(ty, value) {
                Some(encoded) => {
                    bytes.extend_from_slice(&encoded);
                    true
                }
                None => false,
            },
            PackedData::Strings(items) => match value.text() {
                Some(text) => {
                    items.push(Handle::new(Value::String(text.to_string())));
                    true
                }
                None => false,
            },
        }
    }

    /// New elements are zeroed (empty strings for string arrays).
    pub(crate) fn resize(&mut self, len: usize) {
        match self {
            PackedData::Plain { elem, bytes } => bytes.resize(len * *elem, 0),
            PackedData::Strings(items) => {
                items.truncate(len);
                while items.len() < len {
                    items.push(Handle::new(Value::String(String::new())));
                }
            }
        }
    }

    /// Address of element `index`, for in-place access by the library.
    pub(crate) fn element_ptr(&mut self, index: usize) -> *mut c_void {
        match self {
            PackedData::Plain { elem, bytes } if index < bytes.len() / *elem => {
                unsafe { bytes.as_mut_ptr().add(index * *elem) as *mut c_void }
            }
            PackedData::Strings(items) if index < items.len() => {
                &mut items[index] as *mut Handle as *mut c_void
            }
            _ => ptr::null_mut(),
        }
    }

    pub(crate) fn values(&self, ty: VariantType) -> Vec<Value> {
        (0..self.len()).filter_map(|i| self.get(ty, i)).collect()
    }
}

fn decode_element(ty: VariantType, raw: &[u8]) -> Value {
    let bytes8 = |raw: &[u8]| -> [u8; 8] { raw.try_into().unwrap_or([0; 8]) };
    let bytes4 = |raw: &[u8]| -> [u8; 4] { raw.try_into().unwrap_or([0; 4]) };
    match ty {
        VariantType::PackedByteArray => Value::Int(raw.first().copied().unwrap_or(0) as i64),
        VariantType::PackedInt32Array => Value::Int(i32::from_le_bytes(bytes4(raw)) as i64),
        VariantType::PackedInt64Array => Value::Int(i64::from_le_bytes(bytes8(raw))),
        VariantType::PackedFloat32Array => Value::Float(f32::from_le_bytes(bytes4(raw)) as f64),
        VariantType::PackedFloat64Array => Value::Float(f64::from_le_bytes(bytes8(raw))),
        other => Value::Pod(packed_item_type(other), raw.to_vec()),
    }
}

fn encode_element(ty: VariantType, value: &Value) -> Option<Vec<u8>> {
    let int = || match value {
        Value::Int(i) => Some(*i),
        Value::Float(f) => Some(*f as i64),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    };
    Some(match ty {
        VariantType::PackedByteArray => vec![int()? as u8],
        VariantType::PackedInt32Array => (int()? as i32).to_le_bytes().to_vec(),
        VariantType::PackedInt64Array => int()?.to_le_bytes().to_vec(),
        VariantType::PackedFloat32Array => (value.number()? as f32).to_le_bytes().to_vec(),
        VariantType::PackedFloat64Array => value.number()?.to_le_bytes().to_vec(),
        other => match value {
            Value::Pod(item, bytes) if *item == packed_item_type(other) => bytes.clone(),
            _ => return None,
        },
    })
}

// ---------------------------------------------------------------------------
// Pointer-call storage
// ---------------------------------------------------------------------------

/// Lift a value of type `ty` from its pointer-call storage. Handle types
/// are copied, so the caller keeps ownership of what `src` points at.
///
/// # Safety
/// `src` must point at valid storage for `ty`.
pub(crate) unsafe fn read_storage(ty: VariantType, src: *const c_void) -> Value {
    if src.is_null() {
        return Value::Nil;
    }
    unsafe {
        match ty {
            VariantType::Nil => var_ref(src as *const VariantHandle).clone(),
            VariantType::Bool => Value::Bool(*(src as *const u8) != 0),
            VariantType::Int => Value::Int(ptr::read_unaligned(src as *const i64)),
            VariantType::Float => Value::Float(ptr::read_unaligned(src as *const f64)),
            VariantType::Object => Value::Object(id_of(ptr::read_unaligned(src as *const ObjectHandle))),
            t if t.is_packed_handle() => handle_ref(src as *const PackedHandle).clone(),
            t => {
                let len = pod_size(t);
                Value::Pod(t, std::slice::from_raw_parts(src as *const u8, len).to_vec())
            }
        }
    }
}

/// Construct `value` into uninitialized storage of its own type. `Nil`
/// writes nothing; use [`Var::write_to`] for variant slots.
///
/// # Safety
/// `dst` must be writable storage for the value's type.
pub(crate) unsafe fn write_storage(value: Value, dst: *mut c_void) {
    if dst.is_null() {
        return;
    }
    unsafe {
        match value {
            Value::Nil => {}
            Value::Bool(b) => *(dst as *mut u8) = b as u8,
            Value::Int(i) => ptr::write_unaligned(dst as *mut i64, i),
            Value::Float(f) => ptr::write_unaligned(dst as *mut f64, f),
            Value::Object(id) => ptr::write_unaligned(dst as *mut ObjectHandle, handle_of(id)),
            Value::Pod(_, bytes) => ptr::copy_nonoverlapping(bytes.as_ptr(), dst as *mut u8, bytes.len()),
            other => ptr::write_unaligned(dst as *mut PackedHandle, Handle::new(other).into_raw()),
        }
    }
}

// ---------------------------------------------------------------------------
// Equality, hashing, copying
// ---------------------------------------------------------------------------

/// Value equality. With `exact`, NaN equals NaN and string types must
/// match, as hashed containers require.
pub(crate) fn equals(a: &Value, b: &Value, exact: bool) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y || (exact && x.is_nan() && y.is_nan()),
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            !exact && a.number() == b.number()
        }
        (Value::String(x) | Value::StringName(x), Value::String(y) | Value::StringName(y)) => {
            x == y && (!exact || a.ty() == b.ty())
        }
        (Value::NodePath(x), Value::NodePath(y)) => x == y,
        (Value::Pod(tx, x), Value::Pod(ty, y)) => tx == ty && x == y,
        (Value::Object(x), Value::Object(y)) => x == y,
        (Value::Callable(x), Value::Callable(y)) | (Value::Signal(x), Value::Signal(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (snapshot(x), snapshot(y));
            x.len() == y.len() && x.iter().zip(&y).all(|(l, r)| equals(l, r, exact))
        }
        (Value::Dictionary(x), Value::Dictionary(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (entries(x), entries(y));
            x.len() == y.len()
                && x.iter().all(|(key, value)| {
                    y.iter().any(|(k, v)| equals(key, k, true) && equals(value, v, exact))
                })
        }
        (Value::Packed(tx, x), Value::Packed(ty, y)) => {
            tx == ty && {
                let (x, y) = (x.values(*tx), y.values(*ty));
                x.len() == y.len() && x.iter().zip(&y).all(|(l, r)| equals(l, r, exact))
            }
        }
        _ => false,
    }
}

/// Copy of an array's elements, taken so no lock is held while they are
/// inspected.
pub(crate) fn snapshot(items: &Shared<Vec<Var>>) -> Vec<Value> {
    lock(items).iter().map(|item| item.value().clone()).collect()
}

pub(crate) fn entries(dict: &Shared<Vec<(Var, Box<Var>)>>) -> Vec<(Value, Value)> {
    lock(dict)
        .iter()
        .map(|(key, value)| (key.value().clone(), value.value().clone()))
        .collect()
}

/// Position of `key` in a dictionary's entries.
pub(crate) fn find_key(entries: &[(Var, Box<Var>)], key: &Value) -> Option<usize> {
    entries.iter().position(|(k, _)| {
        let k = k.value();
        equals(k, key, true) || (k.text().is_some() && k.text() == key.text())
    })
}

pub(crate) fn hash_value(value: &Value, depth: i64) -> i64 {
    let mut hasher = DefaultHasher::new();
    feed(value, depth, &mut hasher);
    hasher.finish() as i64
}

fn feed(value: &Value, depth: i64, h: &mut DefaultHasher) {
    (value.ty() as u32).hash(h);
    match value {
        Value::Nil => {}
        Value::Bool(b) => b.hash(h),
        Value::Int(i) => i.hash(h),
        Value::Float(f) => float_bits(*f).hash(h),
        Value::String(s) | Value::StringName(s) | Value::NodePath(s) => s.hash(h),
        Value::Pod(_, bytes) => bytes.hash(h),
        Value::Object(id) => id.hash(h),
        Value::Callable(t) | Value::Signal(t) => {
            t.object.hash(h);
            t.name.hash(h);
        }
        Value::Array(items) => {
            let items = snapshot(items);
            items.len().hash(h);
            if depth > 0 {
                items.iter().for_each(|item| feed(item, depth - 1, h));
            }
        }
        Value::Dictionary(dict) => {
            let entries = entries(dict);
            entries.len().hash(h);
            if depth > 0 {
                // Order-independent, like equality.
                let combined = entries.iter().fold(0i64, |acc, (key, value)| {
                    acc.wrapping_add(hash_value(key, depth - 1) ^ hash_value(value, depth - 1).rotate_left(17))
                });
                combined.hash(h);
            }
        }
        Value::Packed(ty, data) => {
            data.len().hash(h);
            data.values(*ty).iter().for_each(|item| feed(item, 0, h));
        }
    }
}

fn float_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else if f == 0.0 {
        0
    } else {
        f.to_bits()
    }
}

/// Copy a value. Arrays and dictionaries get fresh storage; with `deep`,
/// nested containers are copied as well instead of shared.
pub(crate) fn duplicate(value: &Value, deep: bool) -> Value {
    let copy = |item: &Var| {
        if deep { Var::new(duplicate(item.value(), true)) } else { item.clone() }
    };
    match value {
        Value::Array(items) => {
            let copied: Vec<Var> = lock(items).iter().map(copy).collect();
            Value::new_array(copied)
        }
        Value::Dictionary(dict) => {
            let copied: Vec<(Var, Box<Var>)> = lock(dict)
                .iter()
                .map(|(key, value)| (copy(key), Box::new(copy(value))))
                .collect();
            Value::Dictionary(shared(copied))
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_handles_map_back_to_ids() {
        let id = InstanceId(42);
        assert_eq!(id_of(handle_of(id)), id);
        assert!(handle_of(InstanceId::NONE).is_null());
        assert_eq!(id_of(ObjectHandle::from_addr(7)), InstanceId::NONE);
    }

    #[test]
    fn storage_round_trips_handles_as_copies() {
        let mut slot = PackedHandle::ZEROED;
        unsafe { write_storage(Value::String("abc".into()), &mut slot as *mut _ as *mut c_void) };
        let owned = Handle(slot);
        let lifted = unsafe { read_storage(VariantType::String, &owned.0 as *const _ as *const c_void) };
        assert!(equals(&lifted, &Value::String("abc".into()), true));
    }

    #[test]
    fn packed_elements_encode_per_type() {
        let mut data = PackedData::empty(VariantType::PackedInt32Array);
        assert!(data.push(VariantType::PackedInt32Array, &Value::Int(-3)));
        assert!(!data.push(VariantType::PackedInt32Array, &Value::String("x".into())));
        data.resize(3);
        let values = data.values(VariantType::PackedInt32Array);
        assert_eq!(values.len(), 3);
        assert!(equals(&values[0], &Value::Int(-3), true));
        assert!(equals(&values[2], &Value::Int(0), true));
    }

    #[test]
    fn dictionaries_compare_without_order() {
        let a = Value::new_dictionary();
        let b = Value::new_dictionary();
        if let (Value::Dictionary(x), Value::Dictionary(y)) = (&a, &b) {
            lock(x).push((Var::new(Value::Int(1)), Box::new(Var::new(Value::Int(10)))));
            lock(x).push((Var::new(Value::Int(2)), Box::new(Var::new(Value::Int(20)))));
            lock(y).push((Var::new(Value::Int(2)), Box::new(Var::new(Value::Int(20)))));
            lock(y).push((Var::new(Value::Int(1)), Box::new(Var::new(Value::Int(10)))));
        }
        assert!(equals(&a, &b, false));
        assert_eq!(hash_value(&a, 4), hash_value(&b, 4));
    }

    #[test]
    fn deep_duplicate_detaches_nested_arrays() {
        let inner = Value::new_array(vec![Var::new(Value::Int(1))]);
        let outer = Value::new_array(vec![Var::new(inner.clone())]);
        let shallow = duplicate(&outer, false);
        let deep = duplicate(&outer, true);
        if let Value::Array(items) = &inner {
            lock(items).push(Var::new(Value::Int(2)));
        }
        let nested_len = |v: &Value| match v {
            Value::Array(items) => match &snapshot(items)[0] {
                Value::Array(nested) => lock(nested).len(),
                _ => 0,
            },
            _ => 0,
        };
        assert_eq!(nested_len(&shallow), 2);
        assert_eq!(nested_len(&deep), 1);
    }
}
