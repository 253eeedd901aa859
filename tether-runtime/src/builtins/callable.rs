use std::fmt;

use tether_ffi::{ConstTypePtr, InstanceId, ObjectHandle, VariantType};

use super::{builtin_handle, call_builtin, StringName};
use crate::convert::ToVariant;
use crate::error::HostResult;
use crate::object::{EngineClass, ObjRef};
use crate::variant::Variant;

const GET_OBJECT_ID_HASH: i64 = 3173160232;
const GET_NAME_HASH: i64 = 1825232092;

builtin_handle! {
    /// A bound method: object plus method name.
    Callable, VariantType::Callable
}

builtin_handle! {
    /// A named signal of an object.
    Signal, VariantType::Signal
}

impl Callable {
    pub fn new<T: EngineClass>(object: &ObjRef<T>, method: &str) -> HostResult<Callable> {
        let handle = object.checked_handle()?;
        let name = StringName::from_str(method)?;
        let abi = name.managed().abi();
        let args = [&handle as *const ObjectHandle as ConstTypePtr, name.as_type_ptr()?];
        Self::construct_with(abi, 2, &args)
    }

    pub fn object_id(&self) -> HostResult<InstanceId> {
        let id: u64 = call_builtin(&self.managed, Self::TYPE, "get_object_id", GET_OBJECT_ID_HASH, &())?;
        Ok(InstanceId(id))
    }

    pub fn method_name(&self) -> HostResult<String> {
        let name: StringName = call_builtin(&self.managed, Self::TYPE, "get_method", GET_NAME_HASH, &())?;
        name.text()
    }

    /// Invoke with variant arguments.
    pub fn call(&self, args: &[Variant]) -> HostResult<Variant> {
        self.to_variant()?.call("call", args)
    }
}

impl Signal {
    pub fn new<T: EngineClass>(object: &ObjRef<T>, signal: &str) -> HostResult<Signal> {
        let handle = object.checked_handle()?;
        let name = StringName::from_str(signal)?;
        let abi = name.managed().abi();
        let args = [&handle as *const ObjectHandle as ConstTypePtr, name.as_type_ptr()?];
        Self::construct_with(abi, 2, &args)
    }

    pub fn name(&self) -> HostResult<String> {
        let name: StringName = call_builtin(&self.managed, Self::TYPE, "get_name", GET_NAME_HASH, &())?;
        name.text()
    }

    pub fn object_id(&self) -> HostResult<InstanceId> {
        let id: u64 = call_builtin(&self.managed, Self::TYPE, "get_object_id", GET_OBJECT_ID_HASH, &())?;
        Ok(InstanceId(id))
    }

    pub fn connect(&self, target: &Callable) -> HostResult<()> {
        self.to_variant()?.call("connect", &[target.to_variant()?])?;
        Ok(())
    }

    /// Call every connected callable with `args`.
    pub fn emit(&self, args: &[Variant]) -> HostResult<()> {
        self.to_variant()?.call("emit", args)?;
        Ok(())
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("object", &self.object_id().ok())
            .field("method", &self.method_name().ok())
            .finish()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("object", &self.object_id().ok())
            .field("name", &self.name().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{install, spawn_object, NodeClass};

    #[test]
    fn callable_invokes_the_bound_method() {
        install();
        let (handle, id) = spawn_object("Node");
        let node = unsafe { ObjRef::<NodeClass>::from_raw(handle) }.unwrap();
        let set_name = Callable::new(&node, "set_name").unwrap();
        assert_eq!(set_name.object_id().unwrap(), id);
        assert_eq!(set_name.method_name().unwrap(), "set_name");
        set_name.call(&["Bound".to_variant().unwrap()]).unwrap();
        let name = node.call("get_name", &[]).unwrap();
        assert_eq!(name.to::<String>().unwrap(), "Bound");
        tether_test_host::destroy(id);
    }

    #[test]
    fn signal_emission_reaches_connected_callables() {
        install();
        let (handle, id) = spawn_object("Node");
        let node = unsafe { ObjRef::<NodeClass>::from_raw(handle) }.unwrap();
        let signal = Signal::new(&node, "renamed").unwrap();
        assert_eq!(signal.name().unwrap(), "renamed");
        signal.connect(&Callable::new(&node, "set_name").unwrap()).unwrap();
        signal.emit(&["FromSignal".to_variant().unwrap()]).unwrap();
        assert_eq!(node.call("get_name", &[]).unwrap().to::<String>().unwrap(), "FromSignal");
        tether_test_host::destroy(id);
    }
}
