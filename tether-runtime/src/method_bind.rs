// Method binds: the engine's handle for one method of one class, invoked
// either through variants (with an error channel) or through a call frame.

use std::fmt;

use tether_ffi::{CallError, MethodBindHandle, ObjectHandle, TypePtr};

use crate::abi::{try_abi, Abi};
use crate::convert::PtrMarshal;
use crate::error::{check_call, HostResult};
use crate::frame::CallFrame;
use crate::signature::ArgList;
use crate::variant::{arg_ptrs, Variant};

#[derive(Clone, Copy)]
pub struct MethodBind {
    handle: MethodBindHandle,
    abi: &'static Abi,
}

impl MethodBind {
    /// Look up (or reuse the cached) bind for `class.method` with the
    /// engine's compatibility hash.
    pub fn get(class: &'static str, method: &'static str, hash: i64) -> HostResult<MethodBind> {
        let abi = try_abi()?;
        Self::get_in(abi, class, method, hash)
    }

    pub(crate) fn get_in(
        abi: &'static Abi,
        class: &'static str,
        method: &'static str,
        hash: i64,
    ) -> HostResult<MethodBind> {
        Ok(MethodBind { handle: abi.method_bind(class, method, hash)?, abi })
    }

    pub fn handle(&self) -> MethodBindHandle {
        self.handle
    }

    /// Variant-call. Engine call errors come back as `HostError::Call`.
    pub fn call(&self, obj: ObjectHandle, args: &[Variant]) -> HostResult<Variant> {
        let ptrs = arg_ptrs(args)?;
        let mut error = CallError::OK;
        let abi = self.abi;
        let ret = Variant::with_uninit(abi, |dst| unsafe {
            (abi.objects.object_method_bind_call)(
                self.handle,
                obj,
                ptrs.as_ptr(),
                ptrs.len() as i64,
                dst,
                &mut error,
            )
        });
        check_call(error)?;
        Ok(ret)
    }

    /// Pointer-call with a prepared frame. There is no error channel: the
    /// caller must have pushed exactly the arguments the method expects.
    ///
    /// # Safety
    /// Argument and return slots must match the method's signature, and
    /// `obj` must be a live instance of the bind's class.
    pub unsafe fn ptrcall(&self, obj: ObjectHandle, frame: &mut CallFrame<'_>) {
        let args = frame.args_array();
        let ret = frame.return_ptr() as TypePtr;
        unsafe { (self.abi.objects.object_method_bind_ptrcall)(self.handle, obj, args, ret) };
    }

    /// The full pointer-call sequence: open a frame, push the arguments,
    /// reserve the return slot, call, lift the result, free the frame.
    pub fn ptrcall_with<A: ArgList, R: PtrMarshal>(&self, obj: ObjectHandle, args: &A) -> HostResult<R> {
        let mut frame = CallFrame::new();
        let mut keep = Vec::new();
        args.lower_into(&mut frame, &mut keep)?;
        frame.reserve_return::<R::Storage>();
        unsafe {
            self.ptrcall(obj, &mut frame);
            let result = R::from_return(frame.read_return::<R::Storage>());
            frame.free();
            result
        }
    }
}

impl PartialEq for MethodBind {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for MethodBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MethodBind").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ToVariant;
    use crate::error::HostError;
    use crate::test_support::{install, spawn_object};
    use tether_ffi::CallErrorKind;

    const GET_NAME: i64 = 2002593661;
    const SET_NAME: i64 = 3304788590;

    #[test]
    fn ptrcall_and_varcall_reach_the_same_method() {
        install();
        let (node, _) = spawn_object("Node");
        let set = MethodBind::get("Node", "set_name", SET_NAME).unwrap();
        let get = MethodBind::get("Node", "get_name", GET_NAME).unwrap();

        set.call(node, &["Player".to_variant().unwrap()]).unwrap();
        let name: String = get.ptrcall_with(node, &()).unwrap();
        assert_eq!(name, "Player");

        set.ptrcall_with::<_, ()>(node, &(String::from("Enemy"),)).unwrap();
        assert_eq!(get.call(node, &[]).unwrap().to::<String>().unwrap(), "Enemy");
    }

    #[test]
    fn varcall_maps_engine_errors() {
        install();
        let (node, _) = spawn_object("Node");
        let set = MethodBind::get("Node", "set_name", SET_NAME).unwrap();
        let err = set.call(node, &[]).unwrap_err();
        assert!(matches!(err, HostError::Call(e) if e.error == CallErrorKind::TooFewArguments));
        let err = set.call(node, &[5i64.to_variant().unwrap()]).unwrap_err();
        assert!(matches!(err, HostError::Call(e) if e.error == CallErrorKind::InvalidArgument && e.argument == 0));
    }

    #[test]
    fn wrong_hash_is_an_invalid_method() {
        install();
        assert_eq!(MethodBind::get("Node", "get_name", 1).unwrap_err(), HostError::invalid_method());
    }
}
