use glam::{Mat4, Vec4};

use crate::cascades::{Cascade, MAX_CASCADES};

/// Remaps OpenGL clip depth `[-1, 1]` to the `[0, 1]` range wgpu rasterizes.
pub const OPENGL_TO_WGPU: Mat4 = Mat4::from_cols(
    Vec4::new(1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, 1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 0.5, 0.0),
    Vec4::new(0.0, 0.0, 0.5, 1.0),
);

/// Per-frame cascade data for the depth and shading passes. Unused slots stay zeroed.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CascadeUniform {
    pub view: [[[f32; 4]; 4]; MAX_CASCADES],
    pub proj: [[[f32; 4]; 4]; MAX_CASCADES],
    pub shadow: [[[f32; 4]; 4]; MAX_CASCADES],
    /// `OPENGL_TO_WGPU * proj * view`, for rasterizing each layer.
    pub depth_view_proj: [[[f32; 4]; 4]; MAX_CASCADES],
    /// x: split near, y: split far, z: light-space near, w: light-space far.
    pub planes: [[f32; 4]; MAX_CASCADES],
    /// x: cascade count, y: shadowing factor (expC), z/w: unused.
    pub params: [f32; 4],
}

impl CascadeUniform {
    pub fn from_cascades(cascades: &[Cascade], shadowing_factor: f32) -> Self {
        let mut uniform: Self = bytemuck::Zeroable::zeroed();
        let count = cascades.len().min(MAX_CASCADES);
        for (idx, cascade) in cascades.iter().take(count).enumerate() {
            uniform.view[idx] = cascade.view.to_cols_array_2d();
            uniform.proj[idx] = cascade.proj.to_cols_array_2d();
            uniform.shadow[idx] = cascade.shadow.to_cols_array_2d();
            uniform.depth_view_proj[idx] = (OPENGL_TO_WGPU * cascade.view_proj()).to_cols_array_2d();
            uniform.planes[idx] =
                [cascade.split_near, cascade.split_far, cascade.light_space_near, cascade.light_space_far];
        }
        uniform.params = [count as f32, shadowing_factor, 0.0, 0.0];
        uniform
    }

    pub fn cascade_count(&self) -> usize {
        self.params[0] as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera3d::Camera3D;
    use crate::cascades::{compute_cascades, CascadeSettings};
    use glam::Vec3;

    #[test]
    fn packs_cascades_and_zeroes_the_rest() {
        let camera = Camera3D::new(Vec3::new(4.0, 2.0, 4.0), Vec3::ZERO, 0.9, 1.6, 0.1, 18.0);
        let light = Vec3::new(-1.4, -0.37, 0.63).normalize();
        let cascades = compute_cascades(&camera, light, &CascadeSettings::default()).expect("cascades");
        let uniform = CascadeUniform::from_cascades(&cascades, 120.0);
        assert_eq!(uniform.cascade_count(), 4);
        assert_eq!(uniform.params[1], 120.0);
        assert_eq!(uniform.shadow[2], cascades[2].shadow.to_cols_array_2d());
        assert_eq!(uniform.planes[3][1], 18.0);
        assert_eq!(uniform.view[4], [[0.0; 4]; 4]);
    }

    #[test]
    fn depth_matrix_maps_light_near_far_to_unit_range() {
        let camera = Camera3D::new(Vec3::new(4.0, 2.0, 4.0), Vec3::ZERO, 0.9, 1.6, 0.1, 18.0);
        let light = Vec3::new(-1.4, -0.37, 0.63).normalize();
        let cascades = compute_cascades(&camera, light, &CascadeSettings::default()).expect("cascades");
        let cascade = &cascades[0];
        let matrix = OPENGL_TO_WGPU * cascade.proj;
        let near = matrix.project_point3(Vec3::new(0.0, 0.0, -cascade.light_space_near));
        let far = matrix.project_point3(Vec3::new(0.0, 0.0, -cascade.light_space_far));
        assert!(near.z.abs() < 1e-4, "near depth {}", near.z);
        assert!((far.z - 1.0).abs() < 1e-4, "far depth {}", far.z);
    }
}
