// Error types for the tether runtime.

use std::ffi::CStr;
use std::fmt;

use tether_ffi::{CallError, CallErrorKind, MissingFunction, VariantType};

/// Failure of a reflective access on a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeError {
    /// The key, name or operation does not apply to this value.
    Invalid,
    /// The index is outside the container.
    OutOfBounds,
}

/// Violation of the managed-handle lifetime discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeError {
    /// The handle was freed (by its scope, by `end`, or by transfer).
    UseAfterFree,
    /// `end` was called on a handle that is already dead.
    AlreadyEnded,
    /// The handle is pinned to user state and cannot change owner.
    Pinned,
    /// The engine destroyed the object this reference points at.
    StaleObject,
    /// `release` on an object the library holds no reference to.
    NoLibraryReference,
    /// The user instance is already borrowed by a call further up the stack.
    InstanceBusy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    AlreadyRegistered(String),
    NotRegistered(String),
    UnknownParent { class: String, parent: String },
    /// Another registered class still extends this one.
    StillInUse { class: String, child: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiError {
    /// An optional (versioned) entry the running engine does not provide.
    Unavailable(&'static CStr),
    /// A required entry is missing; the library cannot initialize.
    MissingFunction(&'static CStr),
    NotInitialized,
}

/// Rich error type for tether operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Invocation error reported by the engine's call-error record.
    Call(CallError),
    Type(TypeError),
    Lifetime(LifetimeError),
    Registration(RegistrationError),
    Abi(AbiError),
    /// The engine refused to construct a value of this type from the arguments.
    Construction(VariantType),
    InvalidCast,
    NullObject,
    Conversion { expected: VariantType, found: VariantType },
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::Invalid => write!(f, "invalid key or operation for this value"),
            TypeError::OutOfBounds => write!(f, "index out of bounds"),
        }
    }
}

impl fmt::Display for LifetimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifetimeError::UseAfterFree => write!(f, "handle used after it was freed"),
            LifetimeError::AlreadyEnded => write!(f, "handle already ended"),
            LifetimeError::Pinned => write!(f, "handle is pinned to user state"),
            LifetimeError::StaleObject => write!(f, "object has been destroyed by the engine"),
            LifetimeError::NoLibraryReference => {
                write!(f, "library holds no reference to this object")
            }
            LifetimeError::InstanceBusy => write!(f, "instance is borrowed by a running call"),
        }
    }
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::AlreadyRegistered(name) => {
                write!(f, "class already registered: {name}")
            }
            RegistrationError::NotRegistered(name) => write!(f, "class not registered: {name}"),
            RegistrationError::UnknownParent { class, parent } => {
                write!(f, "class {class} extends unknown class {parent}")
            }
            RegistrationError::StillInUse { class, child } => {
                write!(f, "class {class} is still extended by {child}")
            }
        }
    }
}

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiError::Unavailable(name) => {
                write!(f, "engine entry unavailable: {}", name.to_string_lossy())
            }
            AbiError::MissingFunction(name) => {
                write!(f, "required engine entry missing: {}", name.to_string_lossy())
            }
            AbiError::NotInitialized => write!(f, "engine ABI not initialized"),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::Call(err) => match err.error {
                CallErrorKind::Ok => write!(f, "call succeeded"),
                CallErrorKind::InvalidMethod => write!(f, "invalid method"),
                CallErrorKind::InvalidArgument => write!(
                    f,
                    "invalid argument {}: expected {}",
                    err.argument,
                    VariantType::from_u32(err.expected as u32)
                        .map(|t| format!("{t:?}"))
                        .unwrap_or_else(|| err.expected.to_string()),
                ),
                CallErrorKind::TooManyArguments => {
                    write!(f, "too many arguments: expected {}", err.expected)
                }
                CallErrorKind::TooFewArguments => {
                    write!(f, "too few arguments: expected {}", err.expected)
                }
                CallErrorKind::InstanceIsNull => write!(f, "instance is null"),
                CallErrorKind::MethodNotConst => write!(f, "method is not const"),
            },
            HostError::Type(err) => write!(f, "type error: {err}"),
            HostError::Lifetime(err) => write!(f, "lifetime error: {err}"),
            HostError::Registration(err) => write!(f, "registration error: {err}"),
            HostError::Abi(err) => write!(f, "{err}"),
            HostError::Construction(ty) => write!(f, "cannot construct {ty:?} from arguments"),
            HostError::InvalidCast => write!(f, "invalid cast"),
            HostError::NullObject => write!(f, "null object"),
            HostError::Conversion { expected, found } => {
                write!(f, "cannot convert {found:?} to {expected:?}")
            }
        }
    }
}

impl std::error::Error for HostError {}

/// Convenience alias used throughout the runtime and generated code.
pub type HostResult<T> = Result<T, HostError>;

impl HostError {
    /// The call error the engine reports for an unknown method.
    pub fn invalid_method() -> Self {
        HostError::Call(CallError {
            error: CallErrorKind::InvalidMethod,
            argument: 0,
            expected: 0,
        })
    }
}

impl From<TypeError> for HostError {
    fn from(err: TypeError) -> Self {
        HostError::Type(err)
    }
}

impl From<LifetimeError> for HostError {
    fn from(err: LifetimeError) -> Self {
        HostError::Lifetime(err)
    }
}

impl From<RegistrationError> for HostError {
    fn from(err: RegistrationError) -> Self {
        HostError::Registration(err)
    }
}

impl From<AbiError> for HostError {
    fn from(err: AbiError) -> Self {
        HostError::Abi(err)
    }
}

impl From<MissingFunction> for HostError {
    fn from(err: MissingFunction) -> Self {
        HostError::Abi(AbiError::MissingFunction(err.0))
    }
}

/// Convert an engine call-error record to a `HostResult<()>`.
/// `Ok` maps to `Ok(())`; every other kind is carried verbatim.
pub fn check_call(err: CallError) -> HostResult<()> {
    if err.is_ok() { Ok(()) } else { Err(HostError::Call(err)) }
}

/// Map the `valid` / `out_of_bounds` out-parameters of an indexed access.
pub fn check_access(valid: bool, out_of_bounds: bool) -> HostResult<()> {
    match (valid, out_of_bounds) {
        (_, true) => Err(HostError::Type(TypeError::OutOfBounds)),
        (true, false) => Ok(()),
        (false, false) => Err(HostError::Type(TypeError::Invalid)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_call_ok_returns_ok() {
        assert!(check_call(CallError::OK).is_ok());
    }

    #[test]
    fn check_call_carries_record_verbatim() {
        let record = CallError::invalid_argument(1, VariantType::Int as i32);
        assert_eq!(check_call(record), Err(HostError::Call(record)));
        let record = CallError::arity(3, 1);
        assert_eq!(record.error, CallErrorKind::TooManyArguments);
        assert_eq!(check_call(record), Err(HostError::Call(record)));
    }

    #[test]
    fn out_of_bounds_wins_over_invalid() {
        assert_eq!(check_access(true, false), Ok(()));
        assert_eq!(check_access(false, true), Err(HostError::Type(TypeError::OutOfBounds)));
        assert_eq!(check_access(false, false), Err(HostError::Type(TypeError::Invalid)));
    }

    #[test]
    fn display_formats_are_human_readable() {
        let err = HostError::Call(CallError::invalid_argument(0, VariantType::Float as i32));
        assert_eq!(err.to_string(), "invalid argument 0: expected Float");
        let err = HostError::from(RegistrationError::AlreadyRegistered("Player".into()));
        assert_eq!(err.to_string(), "registration error: class already registered: Player");
        let err = HostError::from(MissingFunction(c"variant_call"));
        assert_eq!(err.to_string(), "required engine entry missing: variant_call");
    }
}
