// FFI boundary guard: wraps Rust callbacks to catch panics before they
// cross the FFI boundary (which is undefined behavior).

use crate::abi::is_abi_initialized;
use crate::logging::{emit, LOG_ERROR};

/// Execute `f` and catch any panic, returning `default` on failure.
///
/// Every `extern "C"` function the engine calls wraps its body in this
/// guard. If the ABI is loaded, the panic message goes to the engine's
/// error printer.
pub fn ffi_boundary<F, R>(default: R, f: F) -> R
where
    F: FnOnce() -> R + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(f) {
        Ok(value) => value,
        Err(payload) => {
            if is_abi_initialized() {
                emit(LOG_ERROR, &panic_message(&payload), module_path!(), file!(), line!());
            }
            default
        }
    }
}

/// Extract a human-readable message from a panic payload.
fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("[tether] Rust panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("[tether] Rust panic: {s}")
    } else {
        "[tether] Rust panic (unknown payload)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffi_boundary_returns_value_on_success() {
        let result = ffi_boundary(0i32, || 42);
        assert_eq!(result, 42);
    }

    #[test]
    fn ffi_boundary_returns_default_on_panic() {
        let result = ffi_boundary(-1i32, || {
            panic!("test panic");
        });
        assert_eq!(result, -1);
    }

    #[test]
    fn panic_reaches_engine_log() {
        crate::test_support::install();
        let result = ffi_boundary(false, || -> bool {
            panic!("{}", "formatted boundary panic");
        });
        assert!(!result);
        assert!(
            tether_test_host::log_messages()
                .iter()
                .any(|m| m == "error: [tether] Rust panic: formatted boundary panic")
        );
    }
}
