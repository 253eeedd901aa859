use std::ffi::c_void;

/// Opaque single-word handle to an engine object or resource. Rust never
/// dereferences it; it is an engine-side identifier.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectHandle(pub *mut c_void);

/// Two-word handle used by strings, names, node paths, arrays, dictionaries,
/// packed arrays, callables and signals. The words are engine-private.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct PackedHandle {
    pub words: [u64; 2],
}

/// Three-word variant storage (type tag + payload). The words are engine-private.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct VariantHandle {
    pub words: [u64; 3],
}

/// Identifies a specific method of a specific engine class.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MethodBindHandle(pub *const c_void);

/// Identifies an engine class for casting.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClassTag(pub *mut c_void);

/// Token the engine hands to the entry point; passed back on every
/// registration call so the engine knows which library is talking.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LibraryToken(pub *mut c_void);

/// Stable integer id of an engine object. Zero means "no object".
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

// Raw pointer aliases used in entry-point signatures. The "uninit" variants
// point at storage the callee must construct into without destroying first.
pub type TypePtr = *mut c_void;
pub type ConstTypePtr = *const c_void;
pub type UninitTypePtr = *mut c_void;
pub type VariantPtr = *mut VariantHandle;
pub type ConstVariantPtr = *const VariantHandle;
pub type UninitVariantPtr = *mut VariantHandle;
pub type StringNamePtr = *const PackedHandle;
pub type UninitStringNamePtr = *mut PackedHandle;
pub type StringPtr = *const PackedHandle;
pub type UninitStringPtr = *mut PackedHandle;
/// User instance data attached to an engine object of an extension class.
pub type ClassInstancePtr = *mut c_void;

macro_rules! impl_pointer_handle {
    ($($ty:ident),* $(,)?) => {$(
        impl $ty {
            #[inline]
            pub const fn null() -> Self {
                $ty(std::ptr::null_mut())
            }

            #[inline]
            pub fn is_null(self) -> bool {
                self.0.is_null()
            }

            /// Numeric address, for use as a map key.
            #[inline]
            pub fn to_addr(self) -> u64 {
                self.0 as usize as u64
            }

            #[inline]
            pub fn from_addr(addr: u64) -> Self {
                $ty(addr as usize as *mut c_void)
            }
        }

        // Handles are raw identifiers. They can be sent across threads
        // (but must only be *used* on the engine thread).
        // Sync is needed for caching them in process-wide statics.
        unsafe impl Send for $ty {}
        unsafe impl Sync for $ty {}
    )*};
}

impl_pointer_handle!(ObjectHandle, ClassTag, LibraryToken);

impl MethodBindHandle {
    #[inline]
    pub const fn null() -> Self {
        MethodBindHandle(std::ptr::null())
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

unsafe impl Send for MethodBindHandle {}
unsafe impl Sync for MethodBindHandle {}

impl PackedHandle {
    /// All-zero storage, the state of a handle that has not been constructed.
    pub const ZEROED: PackedHandle = PackedHandle { words: [0; 2] };

    #[inline]
    pub fn as_type_ptr(&self) -> ConstTypePtr {
        self as *const PackedHandle as ConstTypePtr
    }

    #[inline]
    pub fn as_mut_type_ptr(&mut self) -> TypePtr {
        self as *mut PackedHandle as TypePtr
    }
}

impl VariantHandle {
    /// All-zero storage. Engines encode nil as tag 0, but the runtime never
    /// relies on that and always constructs through the ABI.
    pub const ZEROED: VariantHandle = VariantHandle { words: [0; 3] };
}

impl InstanceId {
    pub const NONE: InstanceId = InstanceId(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}
