//! tether-test-host: a simulated engine for tether's tests.
//!
//! Implements every entry point the runtime resolves, in-process, on top of
//! a small object model: a handful of native classes (`Object`,
//! `RefCounted`, `Node`, `Resource`, `EditorPlugin`), two singletons, a
//! class database that accepts extension classes, and a variant model with
//! strings, containers, packed arrays, callables and signals.
//!
//! Tests hand [`get_proc_address`] and [`library_token`] to the runtime the
//! same way a real engine hands them to a library's entry point, and use the
//! hooks below to observe or drive the engine side.

mod calls;
mod engine;
mod entries;
mod value;
mod variant_ops;

use std::ptr;

use tether_ffi::{ConstTypePtr, EntryPointFn, GetProcAddress, InitLevel, Initialization, InstanceId, LibraryToken, TypePtr};

pub use engine::ClassInfo;
pub use entries::{get_proc_address, get_proc_address_baseline, get_proc_address_without_variant_call};

use crate::engine::{engine, log_line, log_snapshot};
use crate::value::Value;

/// Token the host hands to the library it loads.
pub fn library_token() -> LibraryToken {
    LibraryToken::from_addr(0x7e7e_0000)
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Whether an object with this id is alive.
pub fn is_live(id: InstanceId) -> bool {
    calls::is_live(id)
}

/// Destroy an object from the engine side, as a scene teardown would.
/// Returns `false` if it was already gone.
pub fn destroy(id: InstanceId) -> bool {
    calls::destroy(id)
}

/// Every destroyed id, in destruction order.
pub fn destroy_log() -> Vec<InstanceId> {
    engine().destroyed.clone()
}

pub fn live_object_count() -> usize {
    engine().objects.len()
}

/// Take an engine-side reference on a refcounted object.
pub fn reference(id: InstanceId) {
    if let Err(err) = calls::call_method(id, "reference", &[]) {
        log_line(format!("error: reference on #{} failed: {err:?}", id.0));
    }
}

/// Drop an engine-side reference; the object is destroyed when the count
/// reaches zero.
pub fn unreference(id: InstanceId) {
    match calls::call_method(id, "unreference", &[]) {
        Ok(Value::Bool(true)) => {
            calls::destroy(id);
        }
        Ok(_) => {}
        Err(err) => log_line(format!("error: unreference on #{} failed: {err:?}", id.0)),
    }
}

/// Send a notification to an object's extension instance.
pub fn notify(id: InstanceId, what: i32) {
    calls::notify(id, what);
}

/// Invoke a virtual the way the engine does, by name with pointer-call
/// arguments. Returns `false` if no class in the object's chain implements it.
pub fn call_virtual(id: InstanceId, name: &str, args: &[ConstTypePtr], ret: TypePtr) -> bool {
    calls::call_virtual(id, name, args, ret)
}

/// How often the engine asked `class` for the virtual `name`. Lookups are
/// cached, so this stays at one after the first call.
pub fn virtual_lookups(class: &str, name: &str) -> usize {
    engine()
        .classes
        .get(class)
        .and_then(|ext| ext.lookups.get(name).copied())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Class database
// ---------------------------------------------------------------------------

/// What the engine recorded about an extension class.
pub fn class_info(class: &str) -> Option<ClassInfo> {
    engine().class_info(class)
}

/// Extension classes in registration order.
pub fn registered_classes() -> Vec<String> {
    engine().class_order.clone()
}

pub fn editor_plugins() -> Vec<String> {
    engine().plugins.clone()
}

/// How many times the library destroyed variant storage no entry had
/// constructed into.
pub fn unconstructed_variant_destroys() -> usize {
    entries::unconstructed_destroys()
}

/// Every line printed through the logging entries, prefixed with its
/// severity (`"error: "`, `"warning: "`, `"script error: "`, `"info: "`).
pub fn log_messages() -> Vec<String> {
    log_snapshot()
}

// ---------------------------------------------------------------------------
// Library loading
// ---------------------------------------------------------------------------

/// A library whose entry point has run. Levels are initialized explicitly
/// and unwound on drop.
pub struct LoadedLibrary {
    init: Initialization,
    initialized: Vec<InitLevel>,
}

impl LoadedLibrary {
    /// Run `entry` with `resolver`. Returns `None` when the entry point
    /// reports failure.
    pub fn open(entry: EntryPointFn, resolver: GetProcAddress) -> Option<LoadedLibrary> {
        let mut init = Initialization::default();
        let ok = unsafe { entry(Some(resolver), library_token(), &mut init) };
        (ok != 0).then_some(LoadedLibrary { init, initialized: Vec::new() })
    }

    pub fn minimum_level(&self) -> InitLevel {
        self.init.minimum_initialization_level
    }

    /// Advance through every level up to `up_to`, skipping those below the
    /// library's minimum.
    pub fn initialize(&mut self, up_to: InitLevel) {
        for level in InitLevel::ALL {
            if level > up_to || level < self.init.minimum_initialization_level || self.initialized.contains(&level) {
                continue;
            }
            if let Some(initialize) = self.init.initialize {
                unsafe { initialize(self.init.userdata, level) };
            }
            self.initialized.push(level);
        }
    }

    /// Unwind the initialized levels, highest first.
    pub fn deinitialize(&mut self) {
        while let Some(level) = self.initialized.pop() {
            if let Some(deinitialize) = self.init.deinitialize {
                unsafe { deinitialize(self.init.userdata, level) };
            }
        }
    }

    pub fn initialized_levels(&self) -> &[InitLevel] {
        &self.initialized
    }
}

impl Drop for LoadedLibrary {
    fn drop(&mut self) {
        self.deinitialize();
        self.init.userdata = ptr::null_mut();
    }
}
