//! Math type aliases and helper functions.
//!
//! All synchronization-side math is f32: the engine only ever carries
//! world transforms through to the renderer, it never inverts or
//! decomposes them.

pub use nalgebra;

/// 2D vector (f32).
pub type Vec2 = nalgebra::Vector2<f32>;

/// 3D vector (f32).
pub type Vec3 = nalgebra::Vector3<f32>;

/// 4D vector (f32).
pub type Vec4 = nalgebra::Vector4<f32>;

/// 4x4 matrix (f32).
pub type Mat4 = nalgebra::Matrix4<f32>;

/// Build a 4x4 matrix translating by `translation`.
pub fn mat4_from_translation(translation: Vec3) -> Mat4 {
    Mat4::new_translation(&translation)
}

/// Build a 4x4 matrix with a uniform scale and a translation.
pub fn mat4_from_scale_translation(scale: f32, translation: Vec3) -> Mat4 {
    let mut m = Mat4::new_scaling(scale);
    m[(0, 3)] = translation.x;
    m[(1, 3)] = translation.y;
    m[(2, 3)] = translation.z;
    m
}

/// Component-wise approximate equality for matrices.
pub fn mat4_approx_eq(a: &Mat4, b: &Mat4, epsilon: f32) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= epsilon)
}
