use std::ffi::{c_char, c_void, CStr};
use std::fmt;

use crate::callbacks::*;
use crate::error::CallError;
use crate::handles::*;
use crate::registration::*;
use crate::types::{VariantOperator, VariantType};

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// A required entry point was not provided by the engine's resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissingFunction(pub &'static CStr);

impl fmt::Display for MissingFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine does not provide required entry `{}`", self.0.to_string_lossy())
    }
}

impl std::error::Error for MissingFunction {}

/// Declares one sub-table. Each field names the stable resolver symbol it is
/// loaded from. Fields in the `optional` block are versioned additions and
/// are stored as `Option`.
macro_rules! abi_group {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $field:ident: $ty:ty = $sym:literal,
            )*
        }
        $(
            optional {
                $(
                    $(#[$ofmeta:meta])*
                    $ofield:ident: $oty:ty = $osym:literal,
                )*
            }
        )?
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Clone, Copy)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
            $($(
                $(#[$ofmeta])*
                pub $ofield: Option<$oty>,
            )*)?
        }

        impl $name {
            /// Resolver names this group cannot work without.
            pub const REQUIRED: &'static [&'static CStr] = &[$($sym),*];
            /// Resolver names introduced after the baseline; may be absent.
            pub const OPTIONAL: &'static [&'static CStr] = &[$($($osym),*)?];

            /// Resolve every entry of this group.
            ///
            /// # Safety
            /// `resolve` must return pointers whose real signatures match the
            /// declared field types.
            pub unsafe fn load(
                resolve: &mut dyn FnMut(&'static CStr) -> Option<InterfaceFunction>,
            ) -> Result<Self, MissingFunction> {
                Ok($name {
                    $(
                        $field: match resolve($sym) {
                            // SAFETY: signature match is the caller's contract.
                            Some(f) => unsafe { std::mem::transmute::<InterfaceFunction, $ty>(f) },
                            None => return Err(MissingFunction($sym)),
                        },
                    )*
                    $($(
                        $ofield: resolve($osym)
                            .map(|f| unsafe { std::mem::transmute::<InterfaceFunction, $oty>(f) }),
                    )*)?
                })
            }

            /// Names of optional entries the engine did not provide.
            pub fn unavailable(&self) -> Vec<&'static CStr> {
                #[allow(unused_mut)]
                let mut out = Vec::new();
                $($(
                    if self.$ofield.is_none() {
                        out.push($osym);
                    }
                )*)?
                out
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Main ABI table
// ---------------------------------------------------------------------------

/// Every engine entry point the runtime uses, resolved once at library init.
/// Nested groups mirror the engine's subsystems.
#[derive(Clone, Copy)]
pub struct AbiTable {
    pub library: LibraryToken,
    pub memory: MemoryApi,
    pub logging: LoggingApi,
    pub variants: VariantApi,
    pub strings: StringApi,
    pub containers: ContainerApi,
    pub objects: ObjectApi,
    pub class_db: ClassDbApi,
    pub editor_plugins: EditorPluginApi,
}

unsafe impl Send for AbiTable {}
unsafe impl Sync for AbiTable {}

impl AbiTable {
    /// Walk every group's field list and resolve it through `get_proc_address`.
    ///
    /// # Safety
    /// `get_proc_address` must be the engine's resolver and `library` the token
    /// passed to the entry point.
    pub unsafe fn load(
        get_proc_address: GetProcAddress,
        library: LibraryToken,
    ) -> Result<AbiTable, MissingFunction> {
        let mut resolve =
            |name: &'static CStr| unsafe { get_proc_address(name.as_ptr(), library) };
        unsafe {
            Ok(AbiTable {
                library,
                memory: MemoryApi::load(&mut resolve)?,
                logging: LoggingApi::load(&mut resolve)?,
                variants: VariantApi::load(&mut resolve)?,
                strings: StringApi::load(&mut resolve)?,
                containers: ContainerApi::load(&mut resolve)?,
                objects: ObjectApi::load(&mut resolve)?,
                class_db: ClassDbApi::load(&mut resolve)?,
                editor_plugins: EditorPluginApi::load(&mut resolve)?,
            })
        }
    }

    /// All optional entries missing from this engine build.
    pub fn unavailable(&self) -> Vec<&'static CStr> {
        let mut out = self.logging.unavailable();
        out.extend(self.variants.unavailable());
        out.extend(self.editor_plugins.unavailable());
        out
    }
}

// ---------------------------------------------------------------------------
// MemoryApi
// ---------------------------------------------------------------------------

abi_group! {
    /// Engine allocator.
    pub struct MemoryApi {
        mem_alloc: unsafe extern "C" fn(bytes: usize) -> *mut c_void = c"mem_alloc",
        mem_realloc: unsafe extern "C" fn(ptr: *mut c_void, bytes: usize) -> *mut c_void = c"mem_realloc",
        mem_free: unsafe extern "C" fn(ptr: *mut c_void) = c"mem_free",
    }
}

// ---------------------------------------------------------------------------
// LoggingApi
// ---------------------------------------------------------------------------

/// Shared shape of the engine's error/warning printers. Strings are
/// NUL-terminated UTF-8.
pub type PrintFn = unsafe extern "C" fn(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    editor_notify: bool,
);

/// Printer variant carrying a short description plus a detailed message.
pub type PrintWithMessageFn = unsafe extern "C" fn(
    description: *const c_char,
    message: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    editor_notify: bool,
);

abi_group! {
    /// Bridges to the engine's output log.
    pub struct LoggingApi {
        print_error: PrintFn = c"print_error",
        print_warning: PrintFn = c"print_warning",
        print_script_error: PrintFn = c"print_script_error",
    }
    optional {
        /// Plain informational message.
        print_info: unsafe extern "C" fn(message: *const c_char, file: *const c_char, line: i32) = c"print_info",
        print_error_with_message: PrintWithMessageFn = c"print_error_with_message",
        print_warning_with_message: PrintWithMessageFn = c"print_warning_with_message",
    }
}

// ---------------------------------------------------------------------------
// VariantApi
// ---------------------------------------------------------------------------

abi_group! {
    /// Dynamic value protocol.
    pub struct VariantApi {
        variant_new_copy: unsafe extern "C" fn(dst: UninitVariantPtr, src: ConstVariantPtr) = c"variant_new_copy",
        variant_new_nil: unsafe extern "C" fn(dst: UninitVariantPtr) = c"variant_new_nil",
        variant_destroy: unsafe extern "C" fn(this: VariantPtr) = c"variant_destroy",

        variant_call: unsafe extern "C" fn(
            this: VariantPtr,
            method: StringNamePtr,
            args: *const ConstVariantPtr,
            argc: i64,
            ret: UninitVariantPtr,
            error: *mut CallError,
        ) = c"variant_call",
        variant_call_static: unsafe extern "C" fn(
            type_: VariantType,
            method: StringNamePtr,
            args: *const ConstVariantPtr,
            argc: i64,
            ret: UninitVariantPtr,
            error: *mut CallError,
        ) = c"variant_call_static",
        variant_evaluate: unsafe extern "C" fn(
            op: VariantOperator,
            a: ConstVariantPtr,
            b: ConstVariantPtr,
            ret: UninitVariantPtr,
            valid: *mut bool,
        ) = c"variant_evaluate",

        variant_set: unsafe extern "C" fn(this: VariantPtr, key: ConstVariantPtr, value: ConstVariantPtr, valid: *mut bool) = c"variant_set",
        variant_set_named: unsafe extern "C" fn(this: VariantPtr, name: StringNamePtr, value: ConstVariantPtr, valid: *mut bool) = c"variant_set_named",
        variant_set_keyed: unsafe extern "C" fn(this: VariantPtr, key: ConstVariantPtr, value: ConstVariantPtr, valid: *mut bool) = c"variant_set_keyed",
        variant_set_indexed: unsafe extern "C" fn(this: VariantPtr, index: i64, value: ConstVariantPtr, valid: *mut bool, oob: *mut bool) = c"variant_set_indexed",
        variant_get: unsafe extern "C" fn(this: ConstVariantPtr, key: ConstVariantPtr, ret: UninitVariantPtr, valid: *mut bool) = c"variant_get",
        variant_get_named: unsafe extern "C" fn(this: ConstVariantPtr, name: StringNamePtr, ret: UninitVariantPtr, valid: *mut bool) = c"variant_get_named",
        variant_get_keyed: unsafe extern "C" fn(this: ConstVariantPtr, key: ConstVariantPtr, ret: UninitVariantPtr, valid: *mut bool) = c"variant_get_keyed",
        variant_get_indexed: unsafe extern "C" fn(this: ConstVariantPtr, index: i64, ret: UninitVariantPtr, valid: *mut bool, oob: *mut bool) = c"variant_get_indexed",

        variant_iter_init: unsafe extern "C" fn(this: ConstVariantPtr, iter: UninitVariantPtr, valid: *mut bool) -> bool = c"variant_iter_init",
        variant_iter_next: unsafe extern "C" fn(this: ConstVariantPtr, iter: VariantPtr, valid: *mut bool) -> bool = c"variant_iter_next",
        variant_iter_get: unsafe extern "C" fn(this: ConstVariantPtr, iter: VariantPtr, ret: UninitVariantPtr, valid: *mut bool) = c"variant_iter_get",

        variant_hash: unsafe extern "C" fn(this: ConstVariantPtr) -> i64 = c"variant_hash",
        variant_recursive_hash: unsafe extern "C" fn(this: ConstVariantPtr, recursion_count: i64) -> i64 = c"variant_recursive_hash",
        variant_hash_compare: unsafe extern "C" fn(this: ConstVariantPtr, other: ConstVariantPtr) -> bool = c"variant_hash_compare",
        variant_booleanize: unsafe extern "C" fn(this: ConstVariantPtr) -> bool = c"variant_booleanize",
        variant_duplicate: unsafe extern "C" fn(this: ConstVariantPtr, ret: UninitVariantPtr, deep: bool) = c"variant_duplicate",
        variant_stringify: unsafe extern "C" fn(this: ConstVariantPtr, ret: UninitStringPtr) = c"variant_stringify",

        variant_get_type: unsafe extern "C" fn(this: ConstVariantPtr) -> VariantType = c"variant_get_type",
        variant_has_method: unsafe extern "C" fn(this: ConstVariantPtr, method: StringNamePtr) -> bool = c"variant_has_method",
        variant_has_member: unsafe extern "C" fn(type_: VariantType, member: StringNamePtr) -> bool = c"variant_has_member",
        variant_has_key: unsafe extern "C" fn(this: ConstVariantPtr, key: ConstVariantPtr, valid: *mut bool) -> bool = c"variant_has_key",
        variant_get_type_name: unsafe extern "C" fn(type_: VariantType, ret: UninitStringPtr) = c"variant_get_type_name",
        variant_can_convert: unsafe extern "C" fn(from: VariantType, to: VariantType) -> bool = c"variant_can_convert",
        variant_can_convert_strict: unsafe extern "C" fn(from: VariantType, to: VariantType) -> bool = c"variant_can_convert_strict",

        get_variant_from_type_constructor: unsafe extern "C" fn(type_: VariantType) -> Option<VariantFromTypeFn> = c"get_variant_from_type_constructor",
        get_variant_to_type_constructor: unsafe extern "C" fn(type_: VariantType) -> Option<TypeFromVariantFn> = c"get_variant_to_type_constructor",
        variant_get_ptr_operator_evaluator: unsafe extern "C" fn(
            op: VariantOperator,
            a: VariantType,
            b: VariantType,
        ) -> Option<PtrOperatorEvaluator> = c"variant_get_ptr_operator_evaluator",
        variant_get_ptr_builtin_method: unsafe extern "C" fn(
            type_: VariantType,
            method: StringNamePtr,
            hash: i64,
        ) -> Option<PtrBuiltinMethod> = c"variant_get_ptr_builtin_method",
        variant_get_ptr_constructor: unsafe extern "C" fn(type_: VariantType, index: i32) -> Option<PtrConstructor> = c"variant_get_ptr_constructor",
        variant_get_ptr_destructor: unsafe extern "C" fn(type_: VariantType) -> Option<PtrDestructor> = c"variant_get_ptr_destructor",
        variant_construct: unsafe extern "C" fn(
            type_: VariantType,
            base: UninitVariantPtr,
            args: *const ConstVariantPtr,
            argc: i32,
            error: *mut CallError,
        ) = c"variant_construct",
    }
    optional {
        /// Instance id of an object variant without materializing the object.
        variant_get_object_instance_id: unsafe extern "C" fn(this: ConstVariantPtr) -> InstanceId = c"variant_get_object_instance_id",
    }
}

// ---------------------------------------------------------------------------
// StringApi
// ---------------------------------------------------------------------------

abi_group! {
    /// String and string-name construction / extraction (UTF-8).
    pub struct StringApi {
        string_new_with_utf8_chars_and_len: unsafe extern "C" fn(
            dst: UninitStringPtr,
            contents: *const c_char,
            size: i64,
        ) = c"string_new_with_utf8_chars_and_len",
        /// Writes at most `max_write_length` bytes; returns the full UTF-8 length.
        string_to_utf8_chars: unsafe extern "C" fn(
            this: StringPtr,
            text: *mut c_char,
            max_write_length: i64,
        ) -> i64 = c"string_to_utf8_chars",
        string_name_new_with_utf8_chars_and_len: unsafe extern "C" fn(
            dst: UninitStringNamePtr,
            contents: *const c_char,
            size: i64,
        ) = c"string_name_new_with_utf8_chars_and_len",
    }
}

// ---------------------------------------------------------------------------
// ContainerApi
// ---------------------------------------------------------------------------

/// Element access into a packed array; null when out of range.
pub type PackedIndexFn = unsafe extern "C" fn(this: TypePtr, index: i64) -> TypePtr;
pub type PackedIndexConstFn = unsafe extern "C" fn(this: ConstTypePtr, index: i64) -> ConstTypePtr;

abi_group! {
    /// Arrays, dictionaries and packed arrays.
    pub struct ContainerApi {
        array_operator_index: unsafe extern "C" fn(this: TypePtr, index: i64) -> VariantPtr = c"array_operator_index",
        array_operator_index_const: unsafe extern "C" fn(this: ConstTypePtr, index: i64) -> VariantPtr = c"array_operator_index_const",
        /// Returns the value slot for `key`, inserting nil if absent.
        dictionary_operator_index: unsafe extern "C" fn(this: TypePtr, key: ConstVariantPtr) -> VariantPtr = c"dictionary_operator_index",
        /// Returns the value slot for `key`, or null if absent.
        dictionary_operator_index_const: unsafe extern "C" fn(this: ConstTypePtr, key: ConstVariantPtr) -> VariantPtr = c"dictionary_operator_index_const",

        packed_byte_array_operator_index: PackedIndexFn = c"packed_byte_array_operator_index",
        packed_byte_array_operator_index_const: PackedIndexConstFn = c"packed_byte_array_operator_index_const",
        packed_int32_array_operator_index: PackedIndexFn = c"packed_int32_array_operator_index",
        packed_int32_array_operator_index_const: PackedIndexConstFn = c"packed_int32_array_operator_index_const",
        packed_int64_array_operator_index: PackedIndexFn = c"packed_int64_array_operator_index",
        packed_int64_array_operator_index_const: PackedIndexConstFn = c"packed_int64_array_operator_index_const",
        packed_float32_array_operator_index: PackedIndexFn = c"packed_float32_array_operator_index",
        packed_float32_array_operator_index_const: PackedIndexConstFn = c"packed_float32_array_operator_index_const",
        packed_float64_array_operator_index: PackedIndexFn = c"packed_float64_array_operator_index",
        packed_float64_array_operator_index_const: PackedIndexConstFn = c"packed_float64_array_operator_index_const",
        packed_string_array_operator_index: PackedIndexFn = c"packed_string_array_operator_index",
        packed_string_array_operator_index_const: PackedIndexConstFn = c"packed_string_array_operator_index_const",
        packed_vector2_array_operator_index: PackedIndexFn = c"packed_vector2_array_operator_index",
        packed_vector2_array_operator_index_const: PackedIndexConstFn = c"packed_vector2_array_operator_index_const",
        packed_vector3_array_operator_index: PackedIndexFn = c"packed_vector3_array_operator_index",
        packed_vector3_array_operator_index_const: PackedIndexConstFn = c"packed_vector3_array_operator_index_const",
        packed_color_array_operator_index: PackedIndexFn = c"packed_color_array_operator_index",
        packed_color_array_operator_index_const: PackedIndexConstFn = c"packed_color_array_operator_index_const",
    }
}

// ---------------------------------------------------------------------------
// ObjectApi
// ---------------------------------------------------------------------------

abi_group! {
    /// Object lifetime, identity and method dispatch.
    pub struct ObjectApi {
        global_get_singleton: unsafe extern "C" fn(name: StringNamePtr) -> ObjectHandle = c"global_get_singleton",
        object_destroy: unsafe extern "C" fn(obj: ObjectHandle) = c"object_destroy",
        object_set_instance: unsafe extern "C" fn(
            obj: ObjectHandle,
            class_name: StringNamePtr,
            instance: ClassInstancePtr,
        ) = c"object_set_instance",
        object_get_class_name: unsafe extern "C" fn(
            obj: ObjectHandle,
            library: LibraryToken,
            ret: UninitStringNamePtr,
        ) -> bool = c"object_get_class_name",
        /// Null if `obj` is not an instance of the tagged class.
        object_cast_to: unsafe extern "C" fn(obj: ObjectHandle, tag: ClassTag) -> ObjectHandle = c"object_cast_to",
        /// Null if no live object has this id.
        object_get_instance_from_id: unsafe extern "C" fn(id: InstanceId) -> ObjectHandle = c"object_get_instance_from_id",
        object_get_instance_id: unsafe extern "C" fn(obj: ObjectHandle) -> InstanceId = c"object_get_instance_id",
        object_method_bind_call: unsafe extern "C" fn(
            method: MethodBindHandle,
            obj: ObjectHandle,
            args: *const ConstVariantPtr,
            argc: i64,
            ret: UninitVariantPtr,
            error: *mut CallError,
        ) = c"object_method_bind_call",
        object_method_bind_ptrcall: unsafe extern "C" fn(
            method: MethodBindHandle,
            obj: ObjectHandle,
            args: *const ConstTypePtr,
            ret: TypePtr,
        ) = c"object_method_bind_ptrcall",
    }
}

// ---------------------------------------------------------------------------
// ClassDbApi
// ---------------------------------------------------------------------------

abi_group! {
    /// Class database: construction, lookup and extension-class registration.
    pub struct ClassDbApi {
        classdb_construct_object: unsafe extern "C" fn(class_name: StringNamePtr) -> ObjectHandle = c"classdb_construct_object",
        classdb_get_method_bind: unsafe extern "C" fn(
            class_name: StringNamePtr,
            method_name: StringNamePtr,
            hash: i64,
        ) -> MethodBindHandle = c"classdb_get_method_bind",
        classdb_get_class_tag: unsafe extern "C" fn(class_name: StringNamePtr) -> ClassTag = c"classdb_get_class_tag",

        register_class: unsafe extern "C" fn(
            library: LibraryToken,
            class_name: StringNamePtr,
            parent_class_name: StringNamePtr,
            info: *const ClassCreationInfo,
        ) = c"classdb_register_extension_class",
        register_class_method: unsafe extern "C" fn(
            library: LibraryToken,
            class_name: StringNamePtr,
            info: *const ClassMethodInfo,
        ) = c"classdb_register_extension_class_method",
        register_class_integer_constant: unsafe extern "C" fn(
            library: LibraryToken,
            class_name: StringNamePtr,
            enum_name: StringNamePtr,
            constant_name: StringNamePtr,
            value: i64,
            is_bitfield: bool,
        ) = c"classdb_register_extension_class_integer_constant",
        register_class_property: unsafe extern "C" fn(
            library: LibraryToken,
            class_name: StringNamePtr,
            info: *const PropertyInfo,
            setter: StringNamePtr,
            getter: StringNamePtr,
        ) = c"classdb_register_extension_class_property",
        register_class_property_indexed: unsafe extern "C" fn(
            library: LibraryToken,
            class_name: StringNamePtr,
            info: *const PropertyInfo,
            setter: StringNamePtr,
            getter: StringNamePtr,
            index: i64,
        ) = c"classdb_register_extension_class_property_indexed",
        register_class_property_group: unsafe extern "C" fn(
            library: LibraryToken,
            class_name: StringNamePtr,
            group_name: StringPtr,
            prefix: StringPtr,
        ) = c"classdb_register_extension_class_property_group",
        register_class_property_subgroup: unsafe extern "C" fn(
            library: LibraryToken,
            class_name: StringNamePtr,
            subgroup_name: StringPtr,
            prefix: StringPtr,
        ) = c"classdb_register_extension_class_property_subgroup",
        register_class_signal: unsafe extern "C" fn(
            library: LibraryToken,
            class_name: StringNamePtr,
            signal_name: StringNamePtr,
            argument_info: *const PropertyInfo,
            argument_count: i64,
        ) = c"classdb_register_extension_class_signal",
        unregister_class: unsafe extern "C" fn(
            library: LibraryToken,
            class_name: StringNamePtr,
        ) = c"classdb_unregister_extension_class",
    }
}

// ---------------------------------------------------------------------------
// EditorPluginApi
// ---------------------------------------------------------------------------

abi_group! {
    /// Editor plugin registration by class name. Absent in non-editor builds.
    pub struct EditorPluginApi {}
    optional {
        add: unsafe extern "C" fn(class_name: StringNamePtr) = c"editor_add_plugin",
        remove: unsafe extern "C" fn(class_name: StringNamePtr) = c"editor_remove_plugin",
    }
}
