// Extension ABI flag constants.
//
// Mirrors the method, property-usage, property-hint and argument-metadata
// enumerations published in the engine's extension interface header. Shared
// by tether-ffi (registration records) and tether-runtime (descriptors).

// ---------------------------------------------------------------------------
// Method flags (METHOD_FLAG_*), u32
// ---------------------------------------------------------------------------

/// Plain instance method.
pub const METHOD_FLAG_NORMAL: u32 = 1;
/// Method is only available in the editor.
pub const METHOD_FLAG_EDITOR: u32 = 2;
/// Method does not mutate the receiver.
pub const METHOD_FLAG_CONST: u32 = 4;
/// Method may be overridden by extension classes and scripts.
pub const METHOD_FLAG_VIRTUAL: u32 = 8;
/// Method accepts a variable number of arguments.
pub const METHOD_FLAG_VARARG: u32 = 16;
/// Method has no receiver.
pub const METHOD_FLAG_STATIC: u32 = 32;
/// Flags applied when a descriptor does not specify any.
pub const METHOD_FLAGS_DEFAULT: u32 = METHOD_FLAG_NORMAL;

// ---------------------------------------------------------------------------
// Property usage flags (PROPERTY_USAGE_*), u32
// ---------------------------------------------------------------------------

/// Property is not stored, shown or otherwise used.
pub const PROPERTY_USAGE_NONE: u32 = 0;
/// Property is serialized.
pub const PROPERTY_USAGE_STORAGE: u32 = 1 << 1;
/// Property is shown in the inspector.
pub const PROPERTY_USAGE_EDITOR: u32 = 1 << 2;
/// Property is inspected in the remote debugger.
pub const PROPERTY_USAGE_INTERNAL: u32 = 1 << 3;
/// Property has a checkbox in the inspector to enable it.
pub const PROPERTY_USAGE_CHECKABLE: u32 = 1 << 4;
/// Checkable property is currently checked.
pub const PROPERTY_USAGE_CHECKED: u32 = 1 << 5;
/// Property begins an inspector group (used by group registrations).
pub const PROPERTY_USAGE_GROUP: u32 = 1 << 6;
/// Property begins an inspector category.
pub const PROPERTY_USAGE_CATEGORY: u32 = 1 << 7;
/// Property begins an inspector subgroup (used by subgroup registrations).
pub const PROPERTY_USAGE_SUBGROUP: u32 = 1 << 8;
/// Integer property is treated as a bit field in the inspector.
pub const PROPERTY_USAGE_CLASS_IS_BITFIELD: u32 = 1 << 9;
/// Property is not saved with the instance when equal to the default.
pub const PROPERTY_USAGE_NO_INSTANCE_STATE: u32 = 1 << 10;
/// Property can be reverted.
pub const PROPERTY_USAGE_RESTART_IF_CHANGED: u32 = 1 << 11;
/// Property is read from scripts.
pub const PROPERTY_USAGE_SCRIPT_VARIABLE: u32 = 1 << 12;
/// Property is stored even when equal to the default.
pub const PROPERTY_USAGE_STORE_IF_NULL: u32 = 1 << 13;
/// Inspector refreshes when this property changes.
pub const PROPERTY_USAGE_UPDATE_ALL_IF_MODIFIED: u32 = 1 << 14;
/// Integer property holds an enum value.
pub const PROPERTY_USAGE_CLASS_IS_ENUM: u32 = 1 << 16;
/// Property may be nil in addition to its declared type.
pub const PROPERTY_USAGE_NIL_IS_VARIANT: u32 = 1 << 17;
/// Property is read-only in the inspector.
pub const PROPERTY_USAGE_READ_ONLY: u32 = 1 << 28;
/// Default usage for exported properties: stored and editable.
pub const PROPERTY_USAGE_DEFAULT: u32 = PROPERTY_USAGE_STORAGE | PROPERTY_USAGE_EDITOR;

// ---------------------------------------------------------------------------
// Property hints (PROPERTY_HINT_*), u32
// ---------------------------------------------------------------------------

/// No hint.
pub const PROPERTY_HINT_NONE: u32 = 0;
/// Hint string "min,max[,step][,or_greater][,or_less]".
pub const PROPERTY_HINT_RANGE: u32 = 1;
/// Hint string lists enum names: "A,B,C" or "A:0,B:4".
pub const PROPERTY_HINT_ENUM: u32 = 2;
/// Enum hint that allows arbitrary values.
pub const PROPERTY_HINT_ENUM_SUGGESTION: u32 = 3;
/// Exponential easing curve.
pub const PROPERTY_HINT_EXP_EASING: u32 = 4;
/// Hint string "unit" for a link toggle between vector components.
pub const PROPERTY_HINT_LINK: u32 = 5;
/// Integer bit flags with names in the hint string.
pub const PROPERTY_HINT_FLAGS: u32 = 6;
/// String property holds a file path, hint string is a filter.
pub const PROPERTY_HINT_FILE: u32 = 13;
/// String property holds a directory path.
pub const PROPERTY_HINT_DIR: u32 = 14;
/// Object property holds a resource of the class named in the hint string.
pub const PROPERTY_HINT_RESOURCE_TYPE: u32 = 17;
/// String property is edited with a multiline editor.
pub const PROPERTY_HINT_MULTILINE_TEXT: u32 = 18;
/// Placeholder text shown for empty strings.
pub const PROPERTY_HINT_PLACEHOLDER_TEXT: u32 = 20;
/// Object property holds a node of the class named in the hint string.
pub const PROPERTY_HINT_NODE_TYPE: u32 = 34;
/// Array property elements are typed by the hint string.
pub const PROPERTY_HINT_ARRAY_TYPE: u32 = 31;

// ---------------------------------------------------------------------------
// Argument metadata (ARGUMENT_METADATA_*), u32
// ---------------------------------------------------------------------------

/// No additional metadata; the variant type is authoritative.
pub const ARGUMENT_METADATA_NONE: u32 = 0;
/// Integer is a signed 8-bit value.
pub const ARGUMENT_METADATA_INT_IS_INT8: u32 = 1;
/// Integer is a signed 16-bit value.
pub const ARGUMENT_METADATA_INT_IS_INT16: u32 = 2;
/// Integer is a signed 32-bit value.
pub const ARGUMENT_METADATA_INT_IS_INT32: u32 = 3;
/// Integer is a signed 64-bit value.
pub const ARGUMENT_METADATA_INT_IS_INT64: u32 = 4;
/// Integer is an unsigned 8-bit value.
pub const ARGUMENT_METADATA_INT_IS_UINT8: u32 = 5;
/// Integer is an unsigned 16-bit value.
pub const ARGUMENT_METADATA_INT_IS_UINT16: u32 = 6;
/// Integer is an unsigned 32-bit value.
pub const ARGUMENT_METADATA_INT_IS_UINT32: u32 = 7;
/// Integer is an unsigned 64-bit value.
pub const ARGUMENT_METADATA_INT_IS_UINT64: u32 = 8;
/// Float is a 32-bit value.
pub const ARGUMENT_METADATA_REAL_IS_FLOAT: u32 = 9;
/// Float is a 64-bit value.
pub const ARGUMENT_METADATA_REAL_IS_DOUBLE: u32 = 10;

// ---------------------------------------------------------------------------
// Combined masks
// ---------------------------------------------------------------------------

/// Method flags that an extension class method may legally carry.
pub const METHOD_FLAGS_REGISTRABLE: u32 = METHOD_FLAG_NORMAL
    | METHOD_FLAG_EDITOR
    | METHOD_FLAG_CONST
    | METHOD_FLAG_VIRTUAL
    | METHOD_FLAG_VARARG
    | METHOD_FLAG_STATIC;

/// Usage flags that mark a pseudo-property (group, subgroup or category header).
pub const PROPERTY_USAGE_HEADER_MASK: u32 =
    PROPERTY_USAGE_GROUP | PROPERTY_USAGE_SUBGROUP | PROPERTY_USAGE_CATEGORY;
