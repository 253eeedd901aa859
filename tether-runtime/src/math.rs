// Engine value types with fixed byte layouts. These cross the ABI by value,
// so every struct is #[repr(C)] with 32-bit components and a size checked at
// compile time. Conversions to/from glam types where a counterpart exists.

use std::mem::size_of;

use glam::{Affine2, Affine3A, IVec2, IVec3, IVec4, Mat3, Mat4, Quat, Vec2, Vec3, Vec3A, Vec4};

// ---------------------------------------------------------------------------
// Vectors
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Vector2i {
    pub x: i32,
    pub y: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Vector3i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Vector4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Vector4i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub w: i32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };
    pub const ONE: Vector2 = Vector2 { x: 1.0, y: 1.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }
}

impl Vector2i {
    pub const fn new(x: i32, y: i32) -> Self {
        Vector2i { x, y }
    }
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Vector3 = Vector3 { x: 1.0, y: 1.0, z: 1.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 { x, y, z }
    }
}

impl Vector3i {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Vector3i { x, y, z }
    }
}

impl Vector4 {
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Vector4 { x, y, z, w }
    }
}

impl Vector4i {
    pub const fn new(x: i32, y: i32, z: i32, w: i32) -> Self {
        Vector4i { x, y, z, w }
    }
}

macro_rules! glam_vector {
    ($ours:ident <=> $glam:ident { $($f:ident),+ }) => {
        impl From<$ours> for $glam {
            #[inline]
            fn from(v: $ours) -> $glam {
                $glam::new($(v.$f),+)
            }
        }

        impl From<$glam> for $ours {
            #[inline]
            fn from(v: $glam) -> $ours {
                $ours { $($f: v.$f),+ }
            }
        }
    };
}

glam_vector!(Vector2 <=> Vec2 { x, y });
glam_vector!(Vector2i <=> IVec2 { x, y });
glam_vector!(Vector3 <=> Vec3 { x, y, z });
glam_vector!(Vector3i <=> IVec3 { x, y, z });
glam_vector!(Vector4 <=> Vec4 { x, y, z, w });
glam_vector!(Vector4i <=> IVec4 { x, y, z, w });

// ---------------------------------------------------------------------------
// Rectangles and boxes
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Rect2 {
    pub position: Vector2,
    pub size: Vector2,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect2i {
    pub position: Vector2i,
    pub size: Vector2i,
}

/// Axis-aligned bounding box.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Aabb {
    pub position: Vector3,
    pub size: Vector3,
}

impl Rect2 {
    pub const fn new(position: Vector2, size: Vector2) -> Self {
        Rect2 { position, size }
    }

    pub fn end(&self) -> Vector2 {
        Vector2::new(self.position.x + self.size.x, self.position.y + self.size.y)
    }

    pub fn contains_point(&self, p: Vector2) -> bool {
        let end = self.end();
        p.x >= self.position.x && p.y >= self.position.y && p.x < end.x && p.y < end.y
    }
}

impl Aabb {
    pub const fn new(position: Vector3, size: Vector3) -> Self {
        Aabb { position, size }
    }

    pub fn end(&self) -> Vector3 {
        (Vec3::from(self.position) + Vec3::from(self.size)).into()
    }
}

// ---------------------------------------------------------------------------
// Plane / Quaternion
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Plane {
    pub normal: Vector3,
    pub d: f32,
}

impl Plane {
    pub const fn new(normal: Vector3, d: f32) -> Self {
        Plane { normal, d }
    }

    /// Signed distance from the plane to `p`.
    pub fn distance_to(&self, p: Vector3) -> f32 {
        Vec3::from(self.normal).dot(p.into()) - self.d
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Quaternion> for Quat {
    fn from(q: Quaternion) -> Quat {
        Quat::from_xyzw(q.x, q.y, q.z, q.w)
    }
}

impl From<Quat> for Quaternion {
    fn from(q: Quat) -> Quaternion {
        Quaternion { x: q.x, y: q.y, z: q.z, w: q.w }
    }
}

// ---------------------------------------------------------------------------
// Matrices and transforms
// ---------------------------------------------------------------------------

/// 3x3 matrix stored as rows.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Basis {
    pub rows: [Vector3; 3],
}

impl Basis {
    pub const IDENTITY: Basis = Basis {
        rows: [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ],
    };
}

impl Default for Basis {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// glam matrices are column-major; the engine stores rows.
impl From<Basis> for Mat3 {
    fn from(b: Basis) -> Mat3 {
        Mat3::from_cols(b.rows[0].into(), b.rows[1].into(), b.rows[2].into()).transpose()
    }
}

impl From<Mat3> for Basis {
    fn from(m: Mat3) -> Basis {
        let t = m.transpose();
        Basis { rows: [t.x_axis.into(), t.y_axis.into(), t.z_axis.into()] }
    }
}

/// 2D affine transform: two basis columns plus origin.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform2D {
    pub x: Vector2,
    pub y: Vector2,
    pub origin: Vector2,
}

impl Transform2D {
    pub const IDENTITY: Transform2D = Transform2D {
        x: Vector2::new(1.0, 0.0),
        y: Vector2::new(0.0, 1.0),
        origin: Vector2::ZERO,
    };
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Transform2D> for Affine2 {
    fn from(t: Transform2D) -> Affine2 {
        Affine2::from_cols(t.x.into(), t.y.into(), t.origin.into())
    }
}

impl From<Affine2> for Transform2D {
    fn from(a: Affine2) -> Transform2D {
        Transform2D {
            x: a.matrix2.x_axis.into(),
            y: a.matrix2.y_axis.into(),
            origin: a.translation.into(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Transform3D {
    pub basis: Basis,
    pub origin: Vector3,
}

impl Transform3D {
    pub const IDENTITY: Transform3D = Transform3D { basis: Basis::IDENTITY, origin: Vector3::ZERO };
}

impl From<Transform3D> for Affine3A {
    fn from(t: Transform3D) -> Affine3A {
        Affine3A::from_mat3_translation(t.basis.into(), t.origin.into())
    }
}

impl From<Affine3A> for Transform3D {
    fn from(a: Affine3A) -> Transform3D {
        let m = Mat3::from(a.matrix3);
        Transform3D {
            basis: m.into(),
            origin: Vec3::from(Vec3A::from(a.translation)).into(),
        }
    }
}

/// 4x4 projection matrix stored as columns.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub columns: [Vector4; 4],
}

impl Projection {
    pub const IDENTITY: Projection = Projection {
        columns: [
            Vector4::new(1.0, 0.0, 0.0, 0.0),
            Vector4::new(0.0, 1.0, 0.0, 0.0),
            Vector4::new(0.0, 0.0, 1.0, 0.0),
            Vector4::new(0.0, 0.0, 0.0, 1.0),
        ],
    };
}

impl Default for Projection {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Projection> for Mat4 {
    fn from(p: Projection) -> Mat4 {
        Mat4::from_cols(
            p.columns[0].into(),
            p.columns[1].into(),
            p.columns[2].into(),
            p.columns[3].into(),
        )
    }
}

impl From<Mat4> for Projection {
    fn from(m: Mat4) -> Projection {
        Projection {
            columns: [m.x_axis.into(), m.y_axis.into(), m.z_axis.into(), m.w_axis.into()],
        }
    }
}

// ---------------------------------------------------------------------------
// Color / Rid
// ---------------------------------------------------------------------------

/// Float RGBA color.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };
    pub const WHITE: Color = Color { r: 1.0, g: 1.0, b: 1.0, a: 1.0 };
    pub const TRANSPARENT: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Color { r, g, b, a: 1.0 }
    }
}

impl From<Color> for Vec4 {
    fn from(c: Color) -> Vec4 {
        Vec4::new(c.r, c.g, c.b, c.a)
    }
}

impl From<Vec4> for Color {
    fn from(v: Vec4) -> Color {
        Color { r: v.x, g: v.y, b: v.z, a: v.w }
    }
}

/// Opaque engine resource id.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Rid(pub u64);

impl Rid {
    pub const INVALID: Rid = Rid(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

// ---------------------------------------------------------------------------
// Layout contract
// ---------------------------------------------------------------------------

const _: () = assert!(size_of::<Vector2>() == 8);
const _: () = assert!(size_of::<Vector2i>() == 8);
const _: () = assert!(size_of::<Rect2>() == 16);
const _: () = assert!(size_of::<Rect2i>() == 16);
const _: () = assert!(size_of::<Vector3>() == 12);
const _: () = assert!(size_of::<Vector3i>() == 12);
const _: () = assert!(size_of::<Transform2D>() == 24);
const _: () = assert!(size_of::<Vector4>() == 16);
const _: () = assert!(size_of::<Vector4i>() == 16);
const _: () = assert!(size_of::<Plane>() == 16);
const _: () = assert!(size_of::<Quaternion>() == 16);
const _: () = assert!(size_of::<Aabb>() == 24);
const _: () = assert!(size_of::<Basis>() == 36);
const _: () = assert!(size_of::<Transform3D>() == 48);
const _: () = assert!(size_of::<Projection>() == 64);
const _: () = assert!(size_of::<Color>() == 16);
const _: () = assert!(size_of::<Rid>() == 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_rows_map_to_glam_columns() {
        let basis = Basis {
            rows: [
                Vector3::new(1.0, 2.0, 3.0),
                Vector3::new(4.0, 5.0, 6.0),
                Vector3::new(7.0, 8.0, 9.0),
            ],
        };
        let m = Mat3::from(basis);
        assert_eq!(m.row(0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(m.col(0), Vec3::new(1.0, 4.0, 7.0));
        assert_eq!(Basis::from(m), basis);
    }

    #[test]
    fn transform3d_round_trips_through_affine() {
        let t = Transform3D {
            basis: Basis::from(Mat3::from_rotation_z(0.5)),
            origin: Vector3::new(1.0, -2.0, 3.5),
        };
        let back = Transform3D::from(Affine3A::from(t));
        assert_eq!(back.origin, t.origin);
        for (a, b) in back.basis.rows.iter().zip(t.basis.rows.iter()) {
            assert!((Vec3::from(*a) - Vec3::from(*b)).length() < 1e-6);
        }
    }

    #[test]
    fn transform2d_applies_origin() {
        let t = Transform2D { origin: Vector2::new(3.0, 4.0), ..Transform2D::IDENTITY };
        let p = Affine2::from(t).transform_point2(Vec2::new(1.0, 1.0));
        assert_eq!(p, Vec2::new(4.0, 5.0));
    }

    #[test]
    fn rect_contains_is_half_open() {
        let r = Rect2::new(Vector2::ZERO, Vector2::new(2.0, 2.0));
        assert!(r.contains_point(Vector2::new(0.0, 1.9)));
        assert!(!r.contains_point(Vector2::new(2.0, 1.0)));
    }
}
