// Compile-time contract tests: ensure handle sizes match the engine header.
// These const assertions fail at compile time if sizes drift.

use std::mem::{align_of, size_of};

use crate::error::CallError;
use crate::handles::*;
use crate::types::{InitLevel, VariantOperator, VariantType};

const _: () = assert!(size_of::<ObjectHandle>() == 8);
const _: () = assert!(size_of::<ClassTag>() == 8);
const _: () = assert!(size_of::<LibraryToken>() == 8);
const _: () = assert!(size_of::<MethodBindHandle>() == 8);
const _: () = assert!(size_of::<InstanceId>() == 8);
const _: () = assert!(size_of::<PackedHandle>() == 16);
const _: () = assert!(size_of::<VariantHandle>() == 24);
const _: () = assert!(align_of::<VariantHandle>() == 8);
const _: () = assert!(size_of::<CallError>() == 12);
const _: () = assert!(size_of::<VariantType>() == 4);
const _: () = assert!(size_of::<VariantOperator>() == 4);
const _: () = assert!(size_of::<InitLevel>() == 4);

// Nullable entry points must stay pointer-sized.
const _: () = assert!(size_of::<Option<crate::callbacks::InterfaceFunction>>() == 8);
const _: () = assert!(size_of::<Option<crate::callbacks::PtrConstructor>>() == 8);

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::ffi::CStr;

    use crate::api_table::*;
    use crate::types::*;

    #[test]
    fn variant_type_round_trips_through_raw_tag() {
        for ty in VariantType::ALL {
            assert_eq!(VariantType::from_u32(ty as u32), Some(ty));
        }
        assert_eq!(VariantType::from_u32(VARIANT_MAX as u32), None);
    }

    #[test]
    fn packed_handle_classification() {
        assert!(VariantType::String.is_packed_handle());
        assert!(VariantType::PackedColorArray.is_packed_array());
        assert!(!VariantType::Array.is_packed_array());
        assert!(VariantType::Vector3.is_pod());
        assert!(!VariantType::Object.is_pod());
        assert!(!VariantType::Dictionary.is_pod());
    }

    #[test]
    fn resolver_names_are_unique() {
        let groups: [&[&CStr]; 8] = [
            MemoryApi::REQUIRED,
            LoggingApi::REQUIRED,
            VariantApi::REQUIRED,
            StringApi::REQUIRED,
            ContainerApi::REQUIRED,
            ObjectApi::REQUIRED,
            ClassDbApi::REQUIRED,
            EditorPluginApi::REQUIRED,
        ];
        let optional: [&[&CStr]; 3] = [
            LoggingApi::OPTIONAL,
            VariantApi::OPTIONAL,
            EditorPluginApi::OPTIONAL,
        ];
        let mut seen = HashSet::new();
        for name in groups.iter().chain(optional.iter()).flat_map(|g| g.iter()) {
            assert!(seen.insert(*name), "duplicate entry {name:?}");
        }
        assert!(EditorPluginApi::REQUIRED.is_empty());
        assert_eq!(EditorPluginApi::OPTIONAL.len(), 2);
    }

    #[test]
    fn missing_function_names_the_entry() {
        let err = MissingFunction(c"variant_call");
        assert_eq!(
            err.to_string(),
            "engine does not provide required entry `variant_call`"
        );
    }
}
