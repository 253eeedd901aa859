// Enumerations shared with the engine: variant type tags, operators and
// initialization levels. Discriminants match the engine header exactly.

/// Variant type tag.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantType {
    Nil = 0,

    // atomic types
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,

    // math types
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,

    // misc types
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,

    // typed arrays
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

/// Number of variant types; also the size of per-type lookup tables.
pub const VARIANT_MAX: usize = 39;

impl VariantType {
    pub const ALL: [VariantType; VARIANT_MAX] = [
        VariantType::Nil,
        VariantType::Bool,
        VariantType::Int,
        VariantType::Float,
        VariantType::String,
        VariantType::Vector2,
        VariantType::Vector2i,
        VariantType::Rect2,
        VariantType::Rect2i,
        VariantType::Vector3,
        VariantType::Vector3i,
        VariantType::Transform2D,
        VariantType::Vector4,
        VariantType::Vector4i,
        VariantType::Plane,
        VariantType::Quaternion,
        VariantType::Aabb,
        VariantType::Basis,
        VariantType::Transform3D,
        VariantType::Projection,
        VariantType::Color,
        VariantType::StringName,
        VariantType::NodePath,
        VariantType::Rid,
        VariantType::Object,
        VariantType::Callable,
        VariantType::Signal,
        VariantType::Dictionary,
        VariantType::Array,
        VariantType::PackedByteArray,
        VariantType::PackedInt32Array,
        VariantType::PackedInt64Array,
        VariantType::PackedFloat32Array,
        VariantType::PackedFloat64Array,
        VariantType::PackedStringArray,
        VariantType::PackedVector2Array,
        VariantType::PackedVector3Array,
        VariantType::PackedColorArray,
        VariantType::PackedVector4Array,
    ];

    /// Decode a raw tag. Returns `None` for values outside the table.
    pub fn from_u32(raw: u32) -> Option<VariantType> {
        Self::ALL.get(raw as usize).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Types whose ptrcall storage is a two-word packed handle.
    pub fn is_packed_handle(self) -> bool {
        matches!(
            self,
            VariantType::String
                | VariantType::StringName
                | VariantType::NodePath
                | VariantType::Callable
                | VariantType::Signal
                | VariantType::Dictionary
                | VariantType::Array
        ) || self.is_packed_array()
    }

    pub fn is_packed_array(self) -> bool {
        (VariantType::PackedByteArray as u32..=VariantType::PackedVector4Array as u32)
            .contains(&(self as u32))
    }

    /// Types that carry no engine-side allocation and can be copied bytewise.
    pub fn is_pod(self) -> bool {
        !self.is_packed_handle() && !matches!(self, VariantType::Object)
    }
}

/// Operators understood by the engine's evaluator.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariantOperator {
    // comparison
    Equal = 0,
    NotEqual = 1,
    Less = 2,
    LessEqual = 3,
    Greater = 4,
    GreaterEqual = 5,

    // mathematic
    Add = 6,
    Subtract = 7,
    Multiply = 8,
    Divide = 9,
    Negate = 10,
    Positive = 11,
    Module = 12,
    Power = 13,

    // bitwise
    ShiftLeft = 14,
    ShiftRight = 15,
    BitAnd = 16,
    BitOr = 17,
    BitXor = 18,
    BitNegate = 19,

    // logic
    And = 20,
    Or = 21,
    Xor = 22,
    Not = 23,

    // containment
    In = 24,
}

pub const VARIANT_OP_MAX: usize = 25;

impl VariantOperator {
    /// Unary operators ignore their right-hand operand.
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            VariantOperator::Negate
                | VariantOperator::Positive
                | VariantOperator::BitNegate
                | VariantOperator::Not
        )
    }
}

/// Initialization levels, advanced from lowest to highest at startup and
/// unwound in reverse at shutdown.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InitLevel {
    Core = 0,
    Servers = 1,
    Scene = 2,
    Editor = 3,
}

impl InitLevel {
    pub const ALL: [InitLevel; 4] = [
        InitLevel::Core,
        InitLevel::Servers,
        InitLevel::Scene,
        InitLevel::Editor,
    ];

    pub fn from_u32(raw: u32) -> Option<InitLevel> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            InitLevel::Core => "core",
            InitLevel::Servers => "servers",
            InitLevel::Scene => "scene",
            InitLevel::Editor => "editor",
        }
    }
}
