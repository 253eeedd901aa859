// tether-bindings: engine class wrappers.
//
// Every class gets a marker type (`EngineClass` + `HasParent`) and, when it
// declares methods of its own, an `<Class>Ext` trait implemented for
// `ObjRef<Class>`. Inherited methods resolve through the `ObjRef` deref
// chain, so `ObjRef<Player>` reaches `NodeExt` and `ObjectExt` unchanged.
//
// Each method follows the same shape: look up the cached method bind, open
// a frame, push the arguments, reserve the return slot, pointer-call, lift
// the return into the current lifetime scope, free the frame.

#[cfg(feature = "core")]
pub mod object;
#[cfg(feature = "core")]
pub mod ref_counted;
#[cfg(feature = "core")]
pub mod node;
#[cfg(feature = "core")]
pub mod resource;
#[cfg(feature = "editor")]
pub mod editor_plugin;

#[cfg(feature = "core")]
pub use object::{Object, ObjectExt};
#[cfg(feature = "core")]
pub use ref_counted::{RefCounted, RefCountedExt};
#[cfg(feature = "core")]
pub use node::{Node, NodeExt};
#[cfg(feature = "core")]
pub use resource::Resource;
#[cfg(feature = "editor")]
pub use editor_plugin::EditorPlugin;

#[cfg(test)]
pub(crate) mod test_support {
    use tether_runtime::{init_abi, Abi};

    pub(crate) fn install() -> &'static Abi {
        unsafe { init_abi(tether_test_host::get_proc_address, tether_test_host::library_token()) }
            .expect("test host provides a complete ABI")
    }
}
