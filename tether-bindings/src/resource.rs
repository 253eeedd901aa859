use tether_runtime::{EngineClass, HasParent};

use crate::ref_counted::RefCounted;

pub struct Resource;

impl EngineClass for Resource {
    const CLASS_NAME: &'static str = "Resource";
}

impl HasParent for Resource {
    type Parent = RefCounted;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ref_counted::RefCountedExt;
    use crate::test_support::install;
    use tether_runtime::Obj;

    #[test]
    fn resources_are_refcounted_through_their_parent() {
        install();
        let res = Obj::<Resource>::construct().unwrap();
        assert!(res.is_refcounted());
        assert_eq!(res.obj_ref().get_reference_count().unwrap(), 1);
        let id = res.obj_ref().instance_id();
        drop(res);
        assert!(!tether_test_host::is_live(id));
    }
}
