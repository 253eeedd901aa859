use std::ffi::c_char;
use std::fmt;

use tether_ffi::VariantType;

use super::{builtin_handle, call_builtin, SIZE_HASH};
use crate::abi::try_abi;
use crate::convert::ToVariant;
use crate::error::{HostError, HostResult};
use crate::memory::EngineBuffer;
use crate::scope::Managed;

const TO_UPPER_HASH: i64 = 3942272618;
const BEGINS_WITH_HASH: i64 = 2566493496;

/// Most strings fit here; longer ones go through an engine buffer.
const STACK_TEXT: usize = 256;

builtin_handle! {
    /// Engine string.
    GString, VariantType::String
}

builtin_handle! {
    /// Interned engine name, compared by identity.
    StringName, VariantType::StringName
}

builtin_handle! {
    NodePath, VariantType::NodePath
}

impl GString {
    pub fn from_str(text: &str) -> HostResult<GString> {
        let abi = try_abi()?;
        Ok(Self::with_uninit(abi, |dst| unsafe {
            (abi.strings.string_new_with_utf8_chars_and_len)(
                dst,
                text.as_ptr() as *const c_char,
                text.len() as i64,
            )
        }))
    }

    /// The contents as UTF-8.
    pub fn text(&self) -> HostResult<String> {
        let this = self.raw()?;
        let to_utf8 = self.managed.abi().strings.string_to_utf8_chars;
        let mut stack = [0u8; STACK_TEXT];
        let len = unsafe { to_utf8(&this, stack.as_mut_ptr() as *mut c_char, STACK_TEXT as i64) };
        let len = usize::try_from(len).map_err(|_| HostError::NullObject)?;
        if len <= STACK_TEXT {
            return Ok(String::from_utf8_lossy(&stack[..len]).into_owned());
        }
        let mut heap = EngineBuffer::zeroed(self.managed.abi(), len).ok_or(HostError::NullObject)?;
        unsafe { to_utf8(&this, heap.as_mut_ptr() as *mut c_char, len as i64) };
        Ok(String::from_utf8_lossy(heap.as_slice()).into_owned())
    }

    /// Length in characters, as the engine counts them.
    pub fn length(&self) -> HostResult<i64> {
        call_builtin(&self.managed, Self::TYPE, "length", SIZE_HASH, &())
    }

    pub fn to_upper(&self) -> HostResult<GString> {
        call_builtin(&self.managed, Self::TYPE, "to_upper", TO_UPPER_HASH, &())
    }

    pub fn begins_with(&self, prefix: &str) -> HostResult<bool> {
        call_builtin(&self.managed, Self::TYPE, "begins_with", BEGINS_WITH_HASH, &(prefix.to_owned(),))
    }

    /// Keep the string alive as a pointer-call temporary.
    pub(crate) fn into_managed(self) -> Managed {
        self.managed
    }
}

impl fmt::Display for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<freed>"),
        }
    }
}

impl fmt::Debug for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GString({:?})", self.text().ok())
    }
}

impl StringName {
    pub fn from_str(text: &str) -> HostResult<StringName> {
        let abi = try_abi()?;
        Ok(Self::with_uninit(abi, |dst| unsafe {
            (abi.strings.string_name_new_with_utf8_chars_and_len)(
                dst,
                text.as_ptr() as *const c_char,
                text.len() as i64,
            )
        }))
    }

    pub fn text(&self) -> HostResult<String> {
        // String overload 2 converts from a name.
        GString::construct_with(self.managed.abi(), 2, &[self.as_type_ptr()?])?.text()
    }
}

impl fmt::Display for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text().unwrap_or_else(|_| "<freed>".into()))
    }
}

impl fmt::Debug for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringName({:?})", self.text().ok())
    }
}

impl NodePath {
    pub fn from_str(path: &str) -> HostResult<NodePath> {
        let text = GString::from_str(path)?;
        Self::construct_with(text.managed.abi(), 2, &[text.as_type_ptr()?])
    }

    pub fn text(&self) -> HostResult<String> {
        self.to_variant()?.stringify()
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({:?})", self.text().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{FromVariant, PtrMarshal};
    use crate::error::LifetimeError;
    use crate::scope::LifetimeScope;
    use crate::test_support::install;
    use tether_ffi::{PackedHandle, TypePtr};

    #[test]
    fn strings_round_trip_short_and_long() {
        install();
        assert_eq!(GString::from_str("short").unwrap().text().unwrap(), "short");
        let long = "x".repeat(STACK_TEXT * 3 + 7);
        assert_eq!(GString::from_str(&long).unwrap().text().unwrap(), long);
        assert_eq!(GString::from_str("").unwrap().text().unwrap(), "");
    }

    #[test]
    fn builtin_methods_go_through_cached_entries() {
        install();
        let s = GString::from_str("tether").unwrap();
        assert_eq!(s.length().unwrap(), 6);
        assert_eq!(s.to_upper().unwrap().text().unwrap(), "TETHER");
        assert!(s.begins_with("teth").unwrap());
        assert!(!s.begins_with("rope").unwrap());
    }

    #[test]
    fn names_and_paths_convert_to_text() {
        install();
        let name = StringName::from_str("_ready").unwrap();
        assert_eq!(name.text().unwrap(), "_ready");
        let path = NodePath::from_str("Root/Player").unwrap();
        assert_eq!(path.text().unwrap(), "Root/Player");
        let v = path.to_variant().unwrap();
        assert_eq!(v.get_type().unwrap(), VariantType::NodePath);
        assert_eq!(NodePath::from_variant(&v).unwrap().text().unwrap(), "Root/Player");
    }

    #[test]
    fn string_transferred_before_scope_end_survives() {
        install();
        let scope = LifetimeScope::new();
        let s = GString::from_str("handed over").unwrap();
        let raw = s.transfer_to_engine().unwrap();
        scope.end();
        assert_eq!(s.text().unwrap_err(), HostError::Lifetime(LifetimeError::UseAfterFree));
        // The engine now owns `raw`; adopt it back to read and free it.
        let adopted = unsafe { GString::from_owned(try_abi().unwrap(), raw) };
        assert_eq!(adopted.text().unwrap(), "handed over");
    }

    #[test]
    fn pinned_string_is_copied_into_return_slots() {
        install();
        let s = GString::from_str("kept").unwrap();
        s.persist().unwrap();
        let dup = s.clone();
        dup.persist().unwrap();
        let mut slot = PackedHandle::ZEROED;
        unsafe { dup.write_return(&mut slot as *mut PackedHandle as TypePtr).unwrap() };
        let returned = unsafe { GString::from_return(slot) }.unwrap();
        assert_eq!(returned.text().unwrap(), "kept");
        assert_eq!(s.text().unwrap(), "kept");
    }
}
