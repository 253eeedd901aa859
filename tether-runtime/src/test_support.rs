// Shared fixtures for the runtime's unit tests: loads the ABI from the
// simulated engine and declares marker types for its built-in classes.

use tether_ffi::{InstanceId, ObjectHandle};

use crate::abi::{init_abi, Abi, NameArg};
use crate::object::{EngineClass, HasParent};

/// Load the ABI from the test host. Every test calls this first; the table
/// is shared by all tests of the binary.
pub(crate) fn install() -> &'static Abi {
    unsafe { init_abi(tether_test_host::get_proc_address, tether_test_host::library_token()) }
        .expect("test host provides a complete ABI")
}

/// Construct an engine object without any wrapper; the caller destroys it.
pub(crate) fn spawn_object(class: &str) -> (ObjectHandle, InstanceId) {
    let abi = install();
    let name = NameArg::new(abi, class);
    let handle = unsafe { (abi.class_db.classdb_construct_object)(name.as_ptr()) };
    assert!(!handle.is_null(), "test host cannot construct {class}");
    let id = unsafe { (abi.objects.object_get_instance_id)(handle) };
    (handle, id)
}

macro_rules! engine_class {
    ($marker:ident, $name:literal) => {
        pub(crate) struct $marker;
        impl EngineClass for $marker {
            const CLASS_NAME: &'static str = $name;
        }
    };
    ($marker:ident, $name:literal, $parent:ident) => {
        engine_class!($marker, $name);
        impl HasParent for $marker {
            type Parent = $parent;
        }
    };
}

engine_class!(ObjectClass, "Object");
engine_class!(RefCountedClass, "RefCounted", ObjectClass);
engine_class!(NodeClass, "Node", ObjectClass);
engine_class!(ResourceClass, "Resource", RefCountedClass);
engine_class!(EditorPluginClass, "EditorPlugin", NodeClass);
