// tether: User-facing library crate. Users depend on this and use
// `tether::entry!()` to export the library entry point from their own
// cdylib crate.
//
//! ## Feature Flags
//!
//! | Feature  | Effect                                                    |
//! |----------|-----------------------------------------------------------|
//! | `core`   | Engine class wrappers (`Object`, `Node`, `RefCounted`, ...) |
//! | `editor` | `EditorPlugin` wrapper and editor plugin registration     |

// Lets the proc macros' `::tether::...` paths resolve inside this crate too.
extern crate self as tether;

// Re-exports for proc macro path resolution and user access.
pub use tether_ffi as ffi;
pub use tether_runtime as runtime;
pub use tether_bindings as bindings;
pub use tether_macros::{hostclass, hostclass_impl};

// For proc macro generated inventory::submit! invocations.
#[doc(hidden)]
pub extern crate inventory as __inventory;

pub mod prelude;

// Re-export glam for convenience.
pub use glam;

use std::panic::AssertUnwindSafe;
use std::ptr;

use ffi::{GetProcAddress, InitLevel, Initialization, LibraryToken};
use runtime::{ffi_boundary, tlog, LifetimeScope, LOG_ERROR, LOG_INFO, LOG_WARNING};

// ---------------------------------------------------------------------------
// Library configuration
// ---------------------------------------------------------------------------

/// Configuration of an extension library, implemented on a marker type
/// handed to [`entry!`].
///
/// ```ignore
/// struct MyGame;
///
/// impl tether::ExtensionLibrary for MyGame {
///     fn on_level_init(level: InitLevel) {
///         if level == InitLevel::Scene {
///             tlog!(LOG_INFO, "scene classes ready");
///         }
///     }
/// }
///
/// tether::entry!(MyGame);
/// ```
pub trait ExtensionLibrary: 'static {
    /// Lowest level the engine must initialize the library at.
    fn min_level() -> InitLevel {
        InitLevel::Scene
    }

    /// Level at which every `#[hostclass]` is registered (and, on the way
    /// down, unregistered). Never lower than [`min_level`](Self::min_level).
    fn registration_level() -> InitLevel {
        InitLevel::Scene
    }

    /// Registered classes to add as editor plugins at the `Editor` level.
    fn editor_plugins() -> &'static [&'static str] {
        &[]
    }

    /// Runs after the library's own work for `level`.
    fn on_level_init(_level: InitLevel) {}

    /// Runs before the library's own teardown for `level`.
    fn on_level_deinit(_level: InitLevel) {}
}

/// Configuration used by a bare `entry!()`.
pub struct DefaultLibrary;

impl ExtensionLibrary for DefaultLibrary {}

fn registration_level<L: ExtensionLibrary>() -> InitLevel {
    L::registration_level().max(L::min_level())
}

// ---------------------------------------------------------------------------
// Entry point and level hooks (called from entry!() generated code)
// ---------------------------------------------------------------------------

/// Body of the exported entry point: load the ABI table through the
/// engine's resolver and fill in the initialization record. Returns 0 when
/// a required entry is missing; nothing has been registered at that point.
///
/// # Safety
/// Must be called by the engine with its resolver, the library token, and a
/// writable initialization record.
#[doc(hidden)]
pub unsafe extern "C" fn __library_init<L: ExtensionLibrary>(
    get_proc_address: Option<GetProcAddress>,
    library: LibraryToken,
    r_initialization: *mut Initialization,
) -> u8 {
    ffi_boundary(
        0,
        AssertUnwindSafe(|| {
            let Some(get_proc_address) = get_proc_address else { return 0 };
            if r_initialization.is_null() {
                return 0;
            }
            // Before the table exists there is nowhere to report a failure.
            if unsafe { runtime::init_abi(get_proc_address, library) }.is_err() {
                return 0;
            }
            unsafe {
                ptr::write(
                    r_initialization,
                    Initialization {
                        minimum_initialization_level: L::min_level(),
                        userdata: ptr::null_mut(),
                        initialize: Some(initialize_level::<L>),
                        deinitialize: Some(deinitialize_level::<L>),
                    },
                )
            };
            tlog!(LOG_INFO, "[tether] library loaded (minimum level {})", L::min_level().name());
            1
        }),
    )
}

unsafe extern "C" fn initialize_level<L: ExtensionLibrary>(_userdata: *mut std::ffi::c_void, level: InitLevel) {
    ffi_boundary((), AssertUnwindSafe(|| on_initialize::<L>(level)))
}

unsafe extern "C" fn deinitialize_level<L: ExtensionLibrary>(_userdata: *mut std::ffi::c_void, level: InitLevel) {
    ffi_boundary((), AssertUnwindSafe(|| on_deinitialize::<L>(level)))
}

fn on_initialize<L: ExtensionLibrary>(level: InitLevel) {
    if level == registration_level::<L>() {
        let _scope = LifetimeScope::new();
        match runtime::register_all_from_inventory() {
            Ok(count) => tlog!(LOG_INFO, "[tether] registered {count} classes at {}", level.name()),
            Err(err) => tlog!(LOG_ERROR, "[tether] class registration failed: {err}"),
        }
    }
    #[cfg(feature = "editor")]
    if level == InitLevel::Editor {
        for class in L::editor_plugins() {
            if let Err(err) = runtime::register_editor_plugin(class) {
                tlog!(LOG_ERROR, "[tether] editor plugin {class}: {err}");
            }
        }
    }
    L::on_level_init(level);
}

fn on_deinitialize<L: ExtensionLibrary>(level: InitLevel) {
    L::on_level_deinit(level);
    #[cfg(feature = "editor")]
    if level == InitLevel::Editor {
        runtime::unregister_editor_plugins();
    }
    if level == registration_level::<L>() {
        let count = runtime::unregister_all();
        tlog!(LOG_INFO, "[tether] unregistered {count} classes at {}", level.name());
    }
    if level == L::min_level() {
        shutdown();
    }
}

/// Final teardown once the lowest level is gone: free what the process
/// scope still owns, then drop the ABI table. Safe to repeat.
///
/// Handles still owned on other threads keep the table alive; those threads
/// should be joined before the engine unloads the library.
fn shutdown() {
    LifetimeScope::end_process_scope();
    let outstanding = LifetimeScope::outstanding_handles();
    if outstanding > 0 {
        tlog!(LOG_WARNING, "[tether] {outstanding} handles still live on other threads; keeping the ABI table");
        return;
    }
    tlog!(LOG_INFO, "[tether] library shut down");
    // SAFETY: every class is unregistered, no handle is live on any thread,
    // and the engine makes no further calls into the library.
    unsafe { runtime::release_abi() };
}

/// Exports the library entry point `tether_library_init`.
///
/// Place this at the top of your cdylib crate's `lib.rs`:
/// ```ignore
/// tether::entry!();          // default configuration
/// tether::entry!(MyLibrary); // MyLibrary: tether::ExtensionLibrary
/// ```
#[macro_export]
macro_rules! entry {
    () => {
        $crate::entry!($crate::DefaultLibrary);
    };
    ($library:ty) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn tether_library_init(
            get_proc_address: ::std::option::Option<$crate::ffi::GetProcAddress>,
            library: $crate::ffi::LibraryToken,
            r_initialization: *mut $crate::ffi::Initialization,
        ) -> u8 {
            unsafe { $crate::__library_init::<$library>(get_proc_address, library, r_initialization) }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Mutex};
    use std::thread;

    use super::*;
    use crate::prelude::*;
    use tether_test_host::LoadedLibrary;

    // Loading and unloading swap the global ABI table; one library at a time.
    static LOADED: Mutex<()> = Mutex::new(());

    #[hostclass(parent = Node)]
    struct Counter {
        #[base]
        base: ObjRef<Counter>,

        #[export(default = 1)]
        step: i64,

        count: i64,
    }

    #[hostclass_impl]
    impl Counter {
        #[func]
        fn increment(&mut self) -> i64 {
            self.count += self.step;
            self.count
        }

        #[func(Override)]
        fn _ready(&mut self) {
            self.count = 100;
        }

        #[signal]
        fn overflowed(limit: i64) {}

        #[constant]
        const LIMIT: i64 = 1000;
    }

    struct Minimal;

    impl ExtensionLibrary for Minimal {
        fn min_level() -> InitLevel {
            InitLevel::Core
        }

        fn registration_level() -> InitLevel {
            InitLevel::Servers
        }
    }

    fn open<L: ExtensionLibrary>() -> LoadedLibrary {
        LoadedLibrary::open(__library_init::<L>, tether_test_host::get_proc_address)
            .expect("entry point accepts the test host")
    }

    #[test]
    fn classes_live_between_registration_and_teardown() {
        let _guard = LOADED.lock().unwrap_or_else(|e| e.into_inner());
        let mut library = open::<DefaultLibrary>();
        assert_eq!(library.minimum_level(), InitLevel::Scene);

        library.initialize(InitLevel::Scene);
        assert!(tether_test_host::registered_classes().contains(&"Counter".to_string()));
        let info = tether_test_host::class_info("Counter").unwrap();
        assert_eq!(info.parent, "Node");
        assert!(info.methods.iter().any(|m| m == "increment"));
        assert!(info.methods.iter().any(|m| m == "set_step"));
        assert_eq!(info.properties, ["step"]);
        assert_eq!(info.signals, [("overflowed".to_string(), 1)]);
        assert!(info.constants.iter().any(|(_, name, value, _)| name == "LIMIT" && *value == 1000));

        {
            let scope = LifetimeScope::new();
            let counter = Obj::<Counter>::construct().unwrap();
            assert_eq!(counter.obj_ref().call("increment", &[]).unwrap().to::<i64>().unwrap(), 1);
            assert_eq!(counter.bind(|c| c.count).unwrap(), 1);
            counter.obj_ref().set_name("Ticker").unwrap();
            assert_eq!(counter.obj_ref().get_name().unwrap(), "Ticker");
            counter.free().unwrap();
            scope.end();
        }

        library.deinitialize();
        assert!(tether_test_host::registered_classes().is_empty());
        assert!(!runtime::is_abi_initialized());
    }

    #[test]
    fn registration_level_is_configurable() {
        let _guard = LOADED.lock().unwrap_or_else(|e| e.into_inner());
        let mut library = open::<Minimal>();
        assert_eq!(library.minimum_level(), InitLevel::Core);

        library.initialize(InitLevel::Core);
        assert!(tether_test_host::registered_classes().is_empty());
        library.initialize(InitLevel::Servers);
        assert!(runtime::is_registered("Counter"));

        drop(library);
        assert!(!runtime::is_registered("Counter"));
        assert!(!runtime::is_abi_initialized());
    }

    #[test]
    fn handles_on_another_thread_keep_the_abi_loaded() {
        let _guard = LOADED.lock().unwrap_or_else(|e| e.into_inner());
        let mut library = open::<DefaultLibrary>();
        library.initialize(InitLevel::Scene);

        let (held_tx, held_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let worker = thread::spawn(move || {
            let value = Variant::from_value(&7i64).unwrap();
            held_tx.send(()).unwrap();
            go_rx.recv().unwrap();
            let read = value.to::<i64>().unwrap();
            drop(value);
            read
        });
        held_rx.recv().unwrap();

        library.deinitialize();
        assert!(runtime::is_abi_initialized());
        assert!(
            tether_test_host::log_messages()
                .iter()
                .any(|m| m.contains("still live on other threads"))
        );

        go_tx.send(()).unwrap();
        assert_eq!(worker.join().unwrap(), 7);
        assert_eq!(LifetimeScope::outstanding_handles(), 0);
        // The engine unloads the library once the worker is gone.
        assert!(unsafe { runtime::release_abi() });
    }

    #[test]
    fn missing_resolver_fails_the_entry_point() {
        let _guard = LOADED.lock().unwrap_or_else(|e| e.into_inner());
        let mut init = Initialization::default();
        let ok = unsafe { __library_init::<DefaultLibrary>(None, tether_test_host::library_token(), &mut init) };
        assert_eq!(ok, 0);
        assert!(init.initialize.is_none());
    }
}
