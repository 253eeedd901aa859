// RefCounted. `init_ref`, `reference` and `unreference` are driven by the
// runtime's `Obj` wrapper and are not exposed here.

use tether_runtime::{EngineClass, HasParent, HostResult, MethodBind, ObjRef};

use crate::object::Object;

pub struct RefCounted;

impl EngineClass for RefCounted {
    const CLASS_NAME: &'static str = "RefCounted";
}

impl HasParent for RefCounted {
    type Parent = Object;
}

pub trait RefCountedExt {
    fn get_reference_count(&self) -> HostResult<i64>;
}

impl RefCountedExt for ObjRef<RefCounted> {
    fn get_reference_count(&self) -> HostResult<i64> {
        let bind = MethodBind::get(RefCounted::CLASS_NAME, "get_reference_count", 3905245786)?;
        bind.ptrcall_with(self.checked_handle()?, &())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectExt;
    use crate::test_support::install;
    use tether_runtime::Obj;

    #[test]
    fn retain_and_release_show_in_the_engine_count() {
        install();
        let obj = Obj::<RefCounted>::construct().unwrap();
        let r = obj.obj_ref();
        assert_eq!(r.get_reference_count().unwrap(), 1);
        obj.retain().unwrap();
        assert_eq!(r.get_reference_count().unwrap(), 2);
        assert!(!obj.release().unwrap());
        assert_eq!(r.get_reference_count().unwrap(), 1);
        // Inherited through the deref chain.
        assert_eq!(r.get_class().unwrap(), "RefCounted");
        drop(obj);
        assert!(!r.is_valid());
    }
}
