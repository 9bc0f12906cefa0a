//! Light transforms for the single-map shadow techniques: a perspective spot light for
//! exponential shadow maps and the six faces of an omnidirectional point-light cube map.

use glam::{Mat4, Vec3};

use crate::cascades::BIAS_MATRIX;

/// Spot light rendering a single exponential shadow map.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotShadow {
    pub view: Mat4,
    pub proj: Mat4,
    /// `BIAS_MATRIX * proj * view`.
    pub light_matrix: Mat4,
    /// `1 / (far - near)`, used to store linear depth in the exponential map.
    pub linear_depth_scale: f32,
}

impl SpotShadow {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        let view = Mat4::look_at_rh(position, target, Vec3::Y);
        let proj = Mat4::perspective_rh_gl(fov_y_radians, 1.0, near, far);
        Self { view, proj, light_matrix: BIAS_MATRIX * proj * view, linear_depth_scale: 1.0 / (far - near) }
    }
}

/// Look direction and up vector of each cube face, in +X, -X, +Y, -Y, +Z, -Z order.
pub const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

pub fn point_light_face_views(position: Vec3) -> [Mat4; 6] {
    CUBE_FACES.map(|(direction, up)| Mat4::look_at_rh(position, position + direction, up))
}

/// Square 90 degree projection shared by every cube face.
pub fn point_light_projection(near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_2, 1.0, near, far)
}
