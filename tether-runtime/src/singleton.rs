// Engine singletons, looked up by name once and cached for the life of the
// ABI table. The engine owns them; the library never releases them.

use crate::abi::try_abi;
use crate::error::HostResult;
use crate::object::{EngineClass, ObjRef};

/// The singleton registered under `name`, checked to be a `T`.
pub fn singleton<T: EngineClass>(name: &'static str) -> HostResult<ObjRef<T>> {
    let handle = try_abi()?.singleton(name)?;
    unsafe { ObjRef::<T>::from_raw(handle)? }.try_cast()
}

/// Singleton whose registered name is its class name.
pub fn singleton_of<T: EngineClass>() -> HostResult<ObjRef<T>> {
    singleton::<T>(T::CLASS_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use crate::test_support::{install, NodeClass, ObjectClass};

    #[test]
    fn singletons_resolve_once_and_stay_valid() {
        install();
        let first = singleton::<ObjectClass>("Engine").unwrap();
        let second = singleton::<ObjectClass>("Engine").unwrap();
        assert_eq!(first, second);
        assert!(first.is_valid());
        assert_eq!(first.class_name().unwrap(), "Engine");
    }

    #[test]
    fn unknown_or_mistyped_singletons_fail() {
        install();
        assert_eq!(singleton::<ObjectClass>("Nope").unwrap_err(), HostError::NullObject);
        assert_eq!(singleton::<NodeClass>("OS").unwrap_err(), HostError::InvalidCast);
    }
}
