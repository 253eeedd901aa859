// tether-runtime: safe Rust API over the engine's extension ABI.
// All unsafe calls through the ABI table are confined to this crate. The
// bindings, the macros and user code interact only with the safe types
// exported here.

pub mod abi;
pub mod error;
pub mod logging;
pub mod ffi_guard;
pub mod frame;
pub mod scope;
pub mod math;
pub mod convert;
pub mod variant;
pub mod signature;
pub mod method_bind;
pub mod builtins;
pub mod object;
pub mod singleton;
pub mod memory;
pub mod class_builder;
pub mod class_registry;
pub mod editor;

#[cfg(test)]
mod test_support;

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Re-export the primary public API surface.
pub use abi::{abi, init_abi, is_abi_initialized, release_abi, try_abi, Abi};
pub use error::{
    check_access, check_call, AbiError, HostError, HostResult, LifetimeError, RegistrationError,
    TypeError,
};
pub use logging::{LOG_ERROR, LOG_INFO, LOG_WARNING};
pub use ffi_guard::ffi_boundary;
pub use frame::{new_frame, CallFrame};
pub use scope::{DetachedHandle, LifetimeScope, Managed};
pub use convert::{FromVariant, Marshal, PtrMarshal, ToVariant, VariantRepr};
pub use variant::Variant;
pub use signature::{ArgList, ParamSpec};
pub use method_bind::MethodBind;
pub use builtins::{
    Array, Callable, Dictionary, GString, NodePath, PackedByteArray, PackedColorArray,
    PackedFloat32Array, PackedFloat64Array, PackedInt32Array, PackedInt64Array,
    PackedStringArray, PackedVector2Array, PackedVector3Array, Signal, StringName,
};
pub use math::{
    Aabb, Basis, Color, Plane, Projection, Quaternion, Rect2, Rect2i, Rid, Transform2D,
    Transform3D, Vector2, Vector2i, Vector3, Vector3i, Vector4, Vector4i,
};
pub use object::{EngineClass, HasParent, Obj, ObjRef, Ownership};
pub use singleton::{singleton, singleton_of};
pub use memory::EngineBuffer;
pub use class_builder::{default_arg, ClassBuilder, ClassDescriptor, DefaultArg, HostClass};
pub use class_registry::{
    is_registered, live_instances, register_all_from_inventory, register_class,
    registered_classes, unregister_all, unregister_class, ClassRegistration, ImplRegistration,
};
pub use editor::{editor_plugins, register_editor_plugin, unregister_editor_plugins};

// Re-export for the macros, which cannot name the runtime's dependencies
// from user crates.
pub use inventory;

// Re-export FFI types needed by bindings and generated code.
pub use tether_ffi::{
    CallError, CallErrorKind, ConstTypePtr, InitLevel, InstanceId, ObjectHandle, TypePtr,
    VariantType,
};

/// Lock a mutex, recovering from poisoning. A panic caught at the FFI
/// boundary must not wedge every later engine call.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn read_or_recover<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write_or_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
