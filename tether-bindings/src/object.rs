// Object: the root of the engine class hierarchy.

use tether_runtime::{EngineClass, HostResult, MethodBind, ObjRef};

pub struct Object;

impl EngineClass for Object {
    const CLASS_NAME: &'static str = "Object";
}

pub trait ObjectExt {
    /// The engine-side class name (`Object.get_class`).
    fn get_class(&self) -> HostResult<String>;

    fn get_instance_id(&self) -> HostResult<i64>;
}

impl ObjectExt for ObjRef<Object> {
    fn get_class(&self) -> HostResult<String> {
        let bind = MethodBind::get(Object::CLASS_NAME, "get_class", 201670096)?;
        bind.ptrcall_with(self.checked_handle()?, &())
    }

    fn get_instance_id(&self) -> HostResult<i64> {
        let bind = MethodBind::get(Object::CLASS_NAME, "get_instance_id", 3905245786)?;
        bind.ptrcall_with(self.checked_handle()?, &())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::install;
    use tether_runtime::{Obj, Variant};

    #[test]
    fn class_and_id_match_the_runtime_view() {
        install();
        let obj = Obj::<Object>::construct().unwrap();
        let r = obj.obj_ref();
        assert_eq!(r.get_class().unwrap(), "Object");
        assert_eq!(r.get_instance_id().unwrap(), r.instance_id().0 as i64);
        obj.free().unwrap();
    }

    #[test]
    fn stale_references_fail_before_the_call() {
        install();
        let obj = Obj::<Object>::construct().unwrap();
        let r = obj.obj_ref();
        obj.free().unwrap();
        assert!(r.get_class().is_err());
    }

    #[test]
    fn dynamic_calls_reach_the_same_method() {
        install();
        let obj = Obj::<Object>::construct().unwrap();
        let class: Variant = obj.obj_ref().call("get_class", &[]).unwrap();
        assert_eq!(class.to::<String>().unwrap(), "Object");
        obj.free().unwrap();
    }
}
