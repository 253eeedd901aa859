use std::ffi::{c_char, c_void};

use crate::error::CallError;
use crate::handles::*;
use crate::types::InitLevel;

/// Any entry point, before it is cast to its real signature.
pub type InterfaceFunction = unsafe extern "C" fn();

/// Resolver handed to the library entry point. Returns `None` for names the
/// running engine does not provide.
pub type GetProcAddress =
    unsafe extern "C" fn(name: *const c_char, library: LibraryToken) -> Option<InterfaceFunction>;

/// Per-level hook stored in [`Initialization`].
pub type InitializeFn = unsafe extern "C" fn(userdata: *mut c_void, level: InitLevel);

/// Signature of the exported library entry point. Returns non-zero on success.
pub type EntryPointFn = unsafe extern "C" fn(
    get_proc_address: Option<GetProcAddress>,
    library: LibraryToken,
    r_initialization: *mut Initialization,
) -> u8;

/// Record filled by the library entry point and read by the engine.
#[repr(C)]
pub struct Initialization {
    /// Lowest level at which the engine must call `initialize`.
    pub minimum_initialization_level: InitLevel,
    pub userdata: *mut c_void,
    pub initialize: Option<InitializeFn>,
    pub deinitialize: Option<InitializeFn>,
}

impl Default for Initialization {
    fn default() -> Self {
        Initialization {
            minimum_initialization_level: InitLevel::Core,
            userdata: std::ptr::null_mut(),
            initialize: None,
            deinitialize: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Class instance callbacks (engine → library)
// ---------------------------------------------------------------------------

/// Factory: construct the engine base object, attach a new instance, return the object.
pub type CreateInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void) -> ObjectHandle;

/// Drop the instance attached to a destroyed object.
pub type FreeInstanceFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, instance: ClassInstancePtr);

/// Virtual-method resolver. Returns null if the class does not override `name`.
/// The engine calls it once per (class, name) and caches the answer.
pub type GetVirtualCallDataFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: StringNamePtr) -> *mut c_void;

/// Invoke a virtual override previously resolved by [`GetVirtualCallDataFn`].
pub type CallVirtualWithDataFn = unsafe extern "C" fn(
    instance: ClassInstancePtr,
    name: StringNamePtr,
    virtual_userdata: *mut c_void,
    args: *const ConstTypePtr,
    ret: TypePtr,
);

/// Write a custom string representation of the instance into `out`.
pub type ToStringFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, is_valid: *mut bool, out: UninitStringPtr);

/// Forward an engine notification to the instance.
pub type NotificationFn = unsafe extern "C" fn(instance: ClassInstancePtr, what: i32, reversed: bool);

/// Variant-call entry of a registered method.
pub type MethodCallFn = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    argc: i64,
    ret: UninitVariantPtr,
    error: *mut CallError,
);

/// Pointer-call entry of a registered method.
pub type MethodPtrCallFn = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
);

// ---------------------------------------------------------------------------
// Builtin-type function pointers (obtained from the variant group)
// ---------------------------------------------------------------------------

pub type VariantFromTypeFn = unsafe extern "C" fn(dst: UninitVariantPtr, src: TypePtr);
pub type TypeFromVariantFn = unsafe extern "C" fn(dst: UninitTypePtr, src: VariantPtr);
pub type PtrOperatorEvaluator =
    unsafe extern "C" fn(left: ConstTypePtr, right: ConstTypePtr, ret: TypePtr);
pub type PtrBuiltinMethod =
    unsafe extern "C" fn(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: i32);
pub type PtrConstructor = unsafe extern "C" fn(base: UninitTypePtr, args: *const ConstTypePtr);
pub type PtrDestructor = unsafe extern "C" fn(base: TypePtr);
