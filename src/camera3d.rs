use glam::{Mat4, Vec3};

const DEFAULT_UP: Vec3 = Vec3::Y;
const PARALLEL_UP_TOLERANCE: f32 = 1e-6;

/// World-space corners of a frustum slice, each quad ordered
/// top-left, top-right, bottom-left, bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrustumCorners {
    pub near: [Vec3; 4],
    pub far: [Vec3; 4],
}

impl FrustumCorners {
    pub const TOP_LEFT: usize = 0;
    pub const TOP_RIGHT: usize = 1;
    pub const BOTTOM_LEFT: usize = 2;
    pub const BOTTOM_RIGHT: usize = 3;

    /// Near corners followed by far corners.
    pub fn to_array(&self) -> [Vec3; 8] {
        [
            self.near[0],
            self.near[1],
            self.near[2],
            self.near[3],
            self.far[0],
            self.far[1],
            self.far[2],
            self.far[3],
        ]
    }

    pub fn centroid(&self) -> Vec3 {
        let sum = self.to_array().iter().fold(Vec3::ZERO, |acc, corner| acc + *corner);
        sum / 8.0
    }

    pub fn near_top_width(&self) -> f32 {
        self.near[Self::TOP_LEFT].distance(self.near[Self::TOP_RIGHT])
    }
}

/// Anything that can describe a perspective view volume for an arbitrary clip range.
pub trait FrustumProvider {
    fn near_clip(&self) -> f32;
    fn far_clip(&self) -> f32;
    fn aspect_ratio(&self) -> f32;
    /// Corners of the frustum clipped to `[near, far]` instead of the provider's own planes.
    fn clip_corners(&self, near: f32, far: f32) -> FrustumCorners;
}

/// Perspective camera looking from `position` towards `target`.
#[derive(Debug, Clone)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, aspect, near, far }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.view_up())
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y_radians, self.aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// `up`, or world Z when the camera looks along `up` and the basis would collapse.
    pub fn view_up(&self) -> Vec3 {
        let forward = self.forward();
        if forward.cross(self.up).length_squared() > PARALLEL_UP_TOLERANCE {
            return self.up;
        }
        if forward.cross(Vec3::Z).length_squared() > PARALLEL_UP_TOLERANCE {
            Vec3::Z
        } else {
            Vec3::X
        }
    }

    fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let forward = self.forward();
        let right = forward.cross(self.view_up()).normalize_or_zero();
        let up = right.cross(forward);
        (forward, right, up)
    }

    fn clip_quad(&self, distance: f32) -> [Vec3; 4] {
        let (forward, right, up) = self.basis();
        let half_height = distance * (self.fov_y_radians * 0.5).tan();
        let half_width = half_height * self.aspect.max(0.0001);
        let center = self.position + forward * distance;
        let top = up * half_height;
        let side = right * half_width;
        [center + top - side, center + top + side, center - top - side, center - top + side]
    }
}

impl FrustumProvider for Camera3D {
    fn near_clip(&self) -> f32 {
        self.near
    }

    fn far_clip(&self) -> f32 {
        self.far
    }

    fn aspect_ratio(&self) -> f32 {
        self.aspect
    }

    fn clip_corners(&self, near: f32, far: f32) -> FrustumCorners {
        FrustumCorners { near: self.clip_quad(near), far: self.clip_quad(far) }
    }
}
