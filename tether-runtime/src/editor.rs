// Editor plugin registration. The entries are optional: engine builds
// without an editor do not export them, and registering a plugin there
// reports the missing entry instead of failing the whole library.

use std::sync::Mutex;

use tether_ffi::StringNamePtr;

use crate::abi::{try_abi, Abi, NameArg};
use crate::class_registry::is_registered;
use crate::error::{HostResult, RegistrationError};
use crate::logging::{LOG_INFO, LOG_WARNING};
use crate::{lock_or_recover, tlog};

static PLUGINS: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Register a user class deriving from `EditorPlugin` with the editor.
/// The class must already be registered.
pub fn register_editor_plugin(class: &str) -> HostResult<()> {
    let abi = try_abi()?;
    let add = Abi::optional(abi.editor_plugins.add, c"editor_add_plugin")?;
    if !is_registered(class) {
        return Err(RegistrationError::NotRegistered(class.to_string()).into());
    }
    let mut plugins = lock_or_recover(&PLUGINS);
    if plugins.iter().any(|name| name == class) {
        return Err(RegistrationError::AlreadyRegistered(class.to_string()).into());
    }
    call_with_name(abi, class, add);
    plugins.push(class.to_string());
    tlog!(LOG_INFO, "[tether] editor plugin {class} added");
    Ok(())
}

/// Remove every registered editor plugin, last added first. Returns how
/// many were removed.
pub fn unregister_editor_plugins() -> usize {
    let plugins: Vec<String> = lock_or_recover(&PLUGINS).drain(..).collect();
    if plugins.is_empty() {
        return 0;
    }
    let found = try_abi().and_then(|abi| {
        let remove = Abi::optional(abi.editor_plugins.remove, c"editor_remove_plugin")?;
        Ok((abi, remove))
    });
    let (abi, remove) = match found {
        Ok(found) => found,
        Err(err) => {
            tlog!(LOG_WARNING, "[tether] cannot remove {} editor plugins: {err}", plugins.len());
            return 0;
        }
    };
    for class in plugins.iter().rev() {
        call_with_name(abi, class, remove);
    }
    plugins.len()
}

/// Plugins currently registered, in registration order.
pub fn editor_plugins() -> Vec<String> {
    lock_or_recover(&PLUGINS).clone()
}

fn call_with_name(abi: &Abi, class: &str, entry: unsafe extern "C" fn(StringNamePtr)) {
    let name = NameArg::new(abi, class);
    unsafe { entry(name.as_ptr()) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_builder::{ClassBuilder, HostClass};
    use crate::class_registry::{register_class, unregister_class};
    use crate::error::{AbiError, HostError};
    use crate::object::{EngineClass, HasParent, ObjRef};
    use crate::test_support::{install, EditorPluginClass};

    struct Inspector;

    impl EngineClass for Inspector {
        const CLASS_NAME: &'static str = "EditorTestInspector";
    }
    impl HasParent for Inspector {
        type Parent = EditorPluginClass;
    }
    impl HostClass for Inspector {
        fn create(_base: ObjRef<Self>) -> Self {
            Inspector
        }
    }

    #[test]
    fn plugins_are_added_once_and_removed_in_reverse() {
        install();
        assert_eq!(
            register_editor_plugin("EditorTestInspector").unwrap_err(),
            RegistrationError::NotRegistered("EditorTestInspector".into()).into()
        );
        register_class(ClassBuilder::<Inspector>::new().build()).unwrap();
        register_editor_plugin("EditorTestInspector").unwrap();
        assert!(register_editor_plugin("EditorTestInspector").is_err());
        assert_eq!(tether_test_host::editor_plugins(), ["EditorTestInspector"]);
        assert_eq!(editor_plugins(), ["EditorTestInspector"]);

        assert_eq!(unregister_editor_plugins(), 1);
        assert!(tether_test_host::editor_plugins().is_empty());
        assert_eq!(unregister_editor_plugins(), 0);
        unregister_class("EditorTestInspector").unwrap();
    }

    #[test]
    fn missing_entry_is_reported_by_name() {
        let err = Abi::optional(None::<unsafe extern "C" fn(StringNamePtr)>, c"editor_add_plugin").unwrap_err();
        assert_eq!(err, HostError::Abi(AbiError::Unavailable(c"editor_add_plugin")));
    }
}
