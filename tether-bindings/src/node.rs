use tether_runtime::{EngineClass, HasParent, HostResult, MethodBind, ObjRef};

use crate::object::Object;

pub struct Node;

impl EngineClass for Node {
    const CLASS_NAME: &'static str = "Node";
}

impl HasParent for Node {
    type Parent = Object;
}

pub trait NodeExt {
    fn get_name(&self) -> HostResult<String>;

    fn set_name(&self, name: &str) -> HostResult<()>;
}

impl NodeExt for ObjRef<Node> {
    fn get_name(&self) -> HostResult<String> {
        let bind = MethodBind::get(Node::CLASS_NAME, "get_name", 2002593661)?;
        bind.ptrcall_with(self.checked_handle()?, &())
    }

    fn set_name(&self, name: &str) -> HostResult<()> {
        let bind = MethodBind::get(Node::CLASS_NAME, "set_name", 3304788590)?;
        bind.ptrcall_with(self.checked_handle()?, &(name.to_string(),))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectExt;
    use crate::test_support::install;
    use tether_runtime::{LifetimeScope, Obj};

    #[test]
    fn name_round_trips_through_pointer_calls() {
        install();
        let node = Obj::<Node>::construct().unwrap();
        let r = node.obj_ref();
        r.set_name("Player").unwrap();
        assert_eq!(r.get_name().unwrap(), "Player");
        assert_eq!(r.upcast().get_class().unwrap(), "Node");
        node.free().unwrap();
    }

    #[test]
    fn argument_temporaries_end_with_the_call() {
        install();
        let node = Obj::<Node>::construct().unwrap();
        let scope = LifetimeScope::new();
        let before = scope.live_handles();
        node.obj_ref().set_name("Enemy").unwrap();
        assert_eq!(scope.live_handles(), before);
        scope.end();
        node.free().unwrap();
    }

    #[test]
    fn casts_are_checked_by_the_engine() {
        install();
        let node = Obj::<Node>::construct().unwrap();
        let as_object = node.obj_ref().upcast();
        assert!(as_object.cast::<Node>().is_some());
        assert!(as_object.cast::<crate::RefCounted>().is_none());
        node.free().unwrap();
    }
}
