// Argument lists of arity 0..=8, in both call directions.
//
// Outgoing: values are lowered into a call frame. Incoming: raw argument
// pointers (pointer-call) or variants (variant-call) are lifted back into
// Rust values, with per-argument error reporting for variant-calls.

use std::ffi::c_void;

use tether_ffi::{CallError, ConstTypePtr, VariantType};

use crate::convert::{Marshal, PtrMarshal, VariantRepr};
use crate::error::{HostError, HostResult};
use crate::frame::CallFrame;
use crate::scope::Managed;
use crate::variant::Variant;

/// Type information of one parameter or return value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub ty: VariantType,
    pub metadata: u32,
    pub class_name: &'static str,
}

impl ParamSpec {
    pub fn of<T: VariantRepr>() -> Self {
        ParamSpec {
            ty: T::TYPE,
            metadata: T::METADATA,
            class_name: T::class_name(),
        }
    }
}

/// A tuple of method arguments.
pub trait ArgList: Sized {
    const COUNT: usize;

    fn param_specs() -> Vec<ParamSpec>;

    /// Push every argument; temporaries the slots refer to land in `keep`.
    fn lower_into(&self, frame: &mut CallFrame<'_>, keep: &mut Vec<Managed>) -> HostResult<()>;

    /// # Safety
    /// `args` must hold `COUNT` pointers to valid values of the parameter types.
    unsafe fn lift_ptr(args: *const ConstTypePtr) -> HostResult<Self>;

    /// Lift from variant-call arguments. Defaults have already been filled
    /// in by the engine, so the count must match exactly.
    fn lift_variants(args: &[Variant]) -> Result<Self, CallError>;

    fn to_variants(&self) -> HostResult<Vec<Variant>>;
}

fn push_lowered<T: PtrMarshal>(
    value: &T,
    frame: &mut CallFrame<'_>,
    keep: &mut Vec<Managed>,
) -> HostResult<*const c_void> {
    let (storage, temp) = value.to_storage()?.into_parts();
    keep.extend(temp);
    Ok(frame.push_arg(storage))
}

fn lift_variant<T: Marshal>(args: &[Variant], index: usize) -> Result<T, CallError> {
    T::from_variant(&args[index]).map_err(|err| match err {
        HostError::Call(call) => call,
        _ => CallError::invalid_argument(index as i32, T::TYPE as i32),
    })
}

macro_rules! impl_arg_list {
    ($count:expr; $($name:ident : $index:tt),*) => {
        impl<$($name: Marshal),*> ArgList for ($($name,)*) {
            const COUNT: usize = $count;

            fn param_specs() -> Vec<ParamSpec> {
                vec![$(ParamSpec::of::<$name>()),*]
            }

            #[allow(unused_variables)]
            fn lower_into(&self, frame: &mut CallFrame<'_>, keep: &mut Vec<Managed>) -> HostResult<()> {
                $(push_lowered(&self.$index, frame, keep)?;)*
                Ok(())
            }

            #[allow(unused_variables)]
            unsafe fn lift_ptr(args: *const ConstTypePtr) -> HostResult<Self> {
                Ok(($(unsafe { $name::from_arg(*args.add($index))? },)*))
            }

            #[allow(unused_variables)]
            fn lift_variants(args: &[Variant]) -> Result<Self, CallError> {
                if args.len() != $count {
                    return Err(CallError::arity(args.len(), $count));
                }
                Ok(($(lift_variant::<$name>(args, $index)?,)*))
            }

            fn to_variants(&self) -> HostResult<Vec<Variant>> {
                Ok(vec![$(self.$index.to_variant()?),*])
            }
        }
    };
}

impl_arg_list!(0;);
impl_arg_list!(1; A0: 0);
impl_arg_list!(2; A0: 0, A1: 1);
impl_arg_list!(3; A0: 0, A1: 1, A2: 2);
impl_arg_list!(4; A0: 0, A1: 1, A2: 2, A3: 3);
impl_arg_list!(5; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_arg_list!(6; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
impl_arg_list!(7; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
impl_arg_list!(8; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ToVariant;
    use crate::math::Vector2;
    use crate::test_support::install;
    use tether_ffi::CallErrorKind;

    #[test]
    fn specs_follow_the_type_table() {
        let specs = <(i32, f64, Vector2)>::param_specs();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].ty, VariantType::Int);
        assert_eq!(specs[1].ty, VariantType::Float);
        assert_eq!(specs[2].ty, VariantType::Vector2);
        assert_eq!(<()>::COUNT, 0);
    }

    #[test]
    fn lowered_arguments_lift_back() {
        let mut frame = CallFrame::new();
        let mut keep = Vec::new();
        (7i64, true, 0.5f32).lower_into(&mut frame, &mut keep).unwrap();
        assert_eq!(frame.arg_count(), 3);
        assert!(keep.is_empty());
        let lifted = unsafe { <(i64, bool, f32)>::lift_ptr(frame.args_array()) }.unwrap();
        assert_eq!(lifted, (7, true, 0.5));
    }

    #[test]
    fn variant_lifting_reports_arity_and_argument_errors() {
        install();
        let args = vec![1i64.to_variant().unwrap()];
        let err = <(i64, i64)>::lift_variants(&args).unwrap_err();
        assert_eq!(err.error, CallErrorKind::TooFewArguments);
        assert_eq!(err.expected, 2);

        let args = vec![1i64.to_variant().unwrap(), "x".to_variant().unwrap()];
        let err = <(i64, i64)>::lift_variants(&args).unwrap_err();
        assert_eq!(err, CallError::invalid_argument(1, VariantType::Int as i32));

        let args = vec![4i64.to_variant().unwrap(), 2.5f64.to_variant().unwrap()];
        assert_eq!(<(i64, f64)>::lift_variants(&args).unwrap(), (4, 2.5));
    }
}
