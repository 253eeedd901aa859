// Class-registration records passed to the class database entries.
// All pointers inside these records only need to stay valid for the duration
// of the registration call; the engine copies what it keeps.

use std::ffi::c_void;

use crate::callbacks::*;
use crate::handles::*;
use crate::types::VariantType;

/// Describes one property, argument, return value or signal parameter.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PropertyInfo {
    pub type_: VariantType,
    pub name: StringNamePtr,
    /// Class name for object-typed entries; empty name otherwise.
    pub class_name: StringNamePtr,
    /// One of the `PROPERTY_HINT_*` constants.
    pub hint: u32,
    pub hint_string: StringPtr,
    /// Bit set of `PROPERTY_USAGE_*` constants.
    pub usage: u32,
}

/// Describes one method of an extension class.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ClassMethodInfo {
    pub name: StringNamePtr,
    pub method_userdata: *mut c_void,
    pub call_func: Option<MethodCallFn>,
    pub ptrcall_func: Option<MethodPtrCallFn>,
    /// Bit set of `METHOD_FLAG_*` constants.
    pub method_flags: u32,
    pub has_return_value: bool,
    pub return_value_info: *const PropertyInfo,
    pub return_value_metadata: u32,
    pub argument_count: u32,
    pub arguments_info: *const PropertyInfo,
    pub arguments_metadata: *const u32,
    /// Defaults apply to the trailing `default_argument_count` arguments.
    pub default_argument_count: u32,
    pub default_arguments: *const ConstVariantPtr,
}

/// Describes an extension class.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ClassCreationInfo {
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_exposed: bool,
    pub to_string_func: Option<ToStringFn>,
    pub notification_func: Option<NotificationFn>,
    pub create_instance_func: Option<CreateInstanceFn>,
    pub free_instance_func: Option<FreeInstanceFn>,
    pub get_virtual_call_data_func: Option<GetVirtualCallDataFn>,
    pub call_virtual_with_data_func: Option<CallVirtualWithDataFn>,
    pub class_userdata: *mut c_void,
}

impl Default for ClassCreationInfo {
    fn default() -> Self {
        ClassCreationInfo {
            is_virtual: false,
            is_abstract: false,
            is_exposed: true,
            to_string_func: None,
            notification_func: None,
            create_instance_func: None,
            free_instance_func: None,
            get_virtual_call_data_func: None,
            call_virtual_with_data_func: None,
            class_userdata: std::ptr::null_mut(),
        }
    }
}
