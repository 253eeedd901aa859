// Prelude: one-import access to the most commonly used tether types.
//
// Usage: `use tether::prelude::*;`

// Core runtime types
pub use tether_runtime::{
    EngineClass, HasParent, HostClass, HostError, HostResult, LifetimeScope, Obj, ObjRef,
    Ownership, Variant, FromVariant, ToVariant, singleton, singleton_of, tlog,
    LOG_ERROR, LOG_INFO, LOG_WARNING,
};

// Builtin value types
pub use tether_runtime::{
    Array, Callable, Dictionary, GString, NodePath, Signal, StringName,
    PackedByteArray, PackedFloat32Array, PackedFloat64Array, PackedInt32Array,
    PackedInt64Array, PackedStringArray, PackedVector2Array, PackedVector3Array,
    PackedColorArray,
};

// Math types
pub use tether_runtime::{
    Aabb, Basis, Color, Plane, Projection, Quaternion, Rect2, Rect2i, Rid, Transform2D,
    Transform3D, Vector2, Vector2i, Vector3, Vector3i, Vector4, Vector4i,
};

// FFI enums users meet in signatures
pub use tether_runtime::{InitLevel, VariantType};

// Proc macros
pub use tether_macros::{hostclass, hostclass_impl};

// Library configuration
pub use crate::ExtensionLibrary;

// Engine classes (feature-gated)
#[cfg(feature = "core")]
pub use tether_bindings::{
    Node, NodeExt, Object, ObjectExt, RefCounted, RefCountedExt, Resource,
};
#[cfg(feature = "editor")]
pub use tether_bindings::EditorPlugin;
#[cfg(feature = "editor")]
pub use tether_runtime::register_editor_plugin;
