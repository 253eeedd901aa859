// Logging bridge to the engine's output log.

use std::ffi::CString;

use crate::abi::try_abi;

/// Log level constants for the `tlog!` macro.
pub const LOG_INFO: u8 = 0;
pub const LOG_WARNING: u8 = 1;
pub const LOG_ERROR: u8 = 2;
/// Reported through the engine's script-error printer.
pub const LOG_SCRIPT_ERROR: u8 = 3;

/// Log a message through the engine's printers.
///
/// Usage:
/// ```ignore
/// tlog!(LOG_INFO, "registered {} classes", count);
/// tlog!(LOG_WARNING, "something suspicious");
/// tlog!(LOG_ERROR, "fatal: {err}");
/// ```
///
/// Messages logged before the ABI is loaded are dropped, as are `LOG_INFO`
/// messages on engines without the optional `print_info` entry.
#[macro_export]
macro_rules! tlog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logging::emit($level, &format!($($arg)*), module_path!(), file!(), line!());
    }};
}

fn c_text(text: &str) -> CString {
    // Interior NULs would truncate the message; the engine only takes C strings.
    CString::new(text.replace('\0', " ")).unwrap_or_default()
}

#[doc(hidden)]
pub fn emit(level: u8, message: &str, function: &str, file: &str, line: u32) {
    let Ok(abi) = try_abi() else { return };
    let logging = &abi.logging;
    let message = c_text(message);
    let function = c_text(function);
    let file = c_text(file);
    let line = line as i32;
    unsafe {
        match level {
            LOG_INFO => {
                if let Some(print_info) = logging.print_info {
                    print_info(message.as_ptr(), file.as_ptr(), line);
                }
            }
            LOG_WARNING => (logging.print_warning)(
                message.as_ptr(),
                function.as_ptr(),
                file.as_ptr(),
                line,
                false,
            ),
            LOG_SCRIPT_ERROR => (logging.print_script_error)(
                message.as_ptr(),
                function.as_ptr(),
                file.as_ptr(),
                line,
                false,
            ),
            _ => (logging.print_error)(
                message.as_ptr(),
                function.as_ptr(),
                file.as_ptr(),
                line,
                true,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::install;

    #[test]
    fn messages_reach_the_engine_printers() {
        install();
        crate::tlog!(LOG_WARNING, "suspicious value {}", 41 + 1);
        crate::tlog!(LOG_ERROR, "broken\0thing");
        crate::tlog!(LOG_INFO, "plain info");
        let log = tether_test_host::log_messages();
        assert!(log.iter().any(|m| m == "warning: suspicious value 42"));
        assert!(log.iter().any(|m| m == "error: broken thing"));
        assert!(log.iter().any(|m| m == "info: plain info"));
    }
}
