/// Error kinds reported by variant-calls across the ABI.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallErrorKind {
    Ok = 0,
    InvalidMethod = 1,
    InvalidArgument = 2,
    TooManyArguments = 3,
    TooFewArguments = 4,
    InstanceIsNull = 5,
    MethodNotConst = 6,
}

/// Call-error record written by the engine (or by us, for reverse calls)
/// through the out-parameter of every variant-call.
///
/// `argument` is the index of the offending argument for `InvalidArgument`;
/// `expected` is the expected variant type tag for `InvalidArgument` and the
/// expected argument count for the arity errors.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallError {
    pub error: CallErrorKind,
    pub argument: i32,
    pub expected: i32,
}

impl CallError {
    pub const OK: CallError = CallError {
        error: CallErrorKind::Ok,
        argument: 0,
        expected: 0,
    };

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error == CallErrorKind::Ok
    }

    pub fn invalid_argument(argument: i32, expected: i32) -> Self {
        CallError {
            error: CallErrorKind::InvalidArgument,
            argument,
            expected,
        }
    }

    pub fn arity(given: usize, expected: usize) -> Self {
        let error = if given > expected {
            CallErrorKind::TooManyArguments
        } else {
            CallErrorKind::TooFewArguments
        };
        CallError {
            error,
            argument: 0,
            expected: expected as i32,
        }
    }
}

impl Default for CallError {
    fn default() -> Self {
        CallError::OK
    }
}
