//! Cascaded shadow map splitting.
//!
//! The camera's clip range is cut into `split_count` contiguous slices using the
//! practical split scheme (a blend of uniform and logarithmic spacing). Each slice
//! gets a light view looking at its centroid and a tight orthographic projection
//! around its eight corners.

use glam::{Mat4, Vec3, Vec4};
use smallvec::SmallVec;
use thiserror::Error;

use crate::camera3d::{FrustumCorners, FrustumProvider};

pub const MAX_CASCADES: usize = 8;
pub const DEFAULT_NEAR_PADDING: f32 = 10.0;
pub const DEFAULT_FAR_PADDING: f32 = 20.0;

const UNIT_LENGTH_TOLERANCE: f32 = 1e-3;
const PARALLEL_UP_TOLERANCE: f32 = 1e-6;
const MIN_LIGHT_EXTENT: f32 = 1e-5;

/// Remaps clip space `[-1, 1]` to texture space `[0, 1]` on every axis.
pub const BIAS_MATRIX: Mat4 = Mat4::from_cols(
    Vec4::new(0.5, 0.0, 0.0, 0.0),
    Vec4::new(0.0, 0.5, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 0.5, 0.0),
    Vec4::new(0.5, 0.5, 0.5, 1.0),
);

pub type CascadeList = SmallVec<[Cascade; 4]>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CascadeError {
    #[error("split count must be at least 1")]
    ZeroSplitCount,
    #[error("split count {0} exceeds the maximum of {max}", max = MAX_CASCADES)]
    TooManySplits(u32),
    #[error("invalid clip range: near {near} / far {far} (need 0 < near < far)")]
    InvalidClipRange { near: f32, far: f32 },
    #[error("split lambda {0} is outside [0, 1]")]
    InvalidSplitLambda(f32),
    #[error("light direction {0} is not a unit vector")]
    NonUnitLightDirection(Vec3),
    #[error("light direction {0} is parallel to the world up axis")]
    LightParallelToUp(Vec3),
    #[error("padding near {near} / far {far} must be finite and non-negative")]
    InvalidPadding { near: f32, far: f32 },
    #[error("cascade {index} has an empty or non-finite light-space footprint")]
    DegenerateFrustum { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeSettings {
    pub split_count: u32,
    pub split_lambda: f32,
    /// Added in front of the tightest light-space depth so nearby occluders are not clipped.
    pub near_padding: f32,
    /// Added behind the farthest light-space depth.
    pub far_padding: f32,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            split_count: 4,
            split_lambda: 0.5,
            near_padding: DEFAULT_NEAR_PADDING,
            far_padding: DEFAULT_FAR_PADDING,
        }
    }
}

impl CascadeSettings {
    pub fn validate(&self) -> Result<(), CascadeError> {
        if self.split_count == 0 {
            return Err(CascadeError::ZeroSplitCount);
        }
        if self.split_count as usize > MAX_CASCADES {
            return Err(CascadeError::TooManySplits(self.split_count));
        }
        if !(0.0..=1.0).contains(&self.split_lambda) {
            return Err(CascadeError::InvalidSplitLambda(self.split_lambda));
        }
        let padding_ok = |value: f32| value.is_finite() && value >= 0.0;
        if !padding_ok(self.near_padding) || !padding_ok(self.far_padding) {
            return Err(CascadeError::InvalidPadding { near: self.near_padding, far: self.far_padding });
        }
        Ok(())
    }
}

/// One slice of the camera frustum with everything needed to render and sample its shadow map layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Cascade {
    pub split_near: f32,
    pub split_far: f32,
    pub view: Mat4,
    pub proj: Mat4,
    /// `BIAS_MATRIX * proj * view`: world position to shadow texture coordinates and depth.
    pub shadow: Mat4,
    pub light_space_near: f32,
    pub light_space_far: f32,
    /// Light-space bounds of the slice corners, before padding.
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
}

impl Cascade {
    /// Fits a light view and orthographic projection around the `[split_near, split_far]` slice.
    pub fn fit(
        corners: &FrustumCorners,
        light_dir: Vec3,
        split_near: f32,
        split_far: f32,
        near_padding: f32,
        far_padding: f32,
    ) -> Self {
        let centroid = corners.centroid();
        let distance = (split_far - split_near).max(corners.near_top_width());
        let view = Mat4::look_at_rh(centroid - light_dir * distance, centroid, Vec3::Y);

        let mut bounds_min = Vec3::splat(f32::MAX);
        let mut bounds_max = Vec3::splat(f32::MIN);
        for corner in corners.to_array() {
            let light_space = view.transform_point3(corner);
            bounds_min = bounds_min.min(light_space);
            bounds_max = bounds_max.max(light_space);
        }

        // view space looks down -Z, so the closest corner has the largest z
        let light_space_near = -bounds_max.z - near_padding;
        let light_space_far = -bounds_min.z + far_padding;
        let proj = Mat4::orthographic_rh_gl(
            bounds_min.x,
            bounds_max.x,
            bounds_min.y,
            bounds_max.y,
            light_space_near,
            light_space_far,
        );

        Self {
            split_near,
            split_far,
            view,
            proj,
            shadow: BIAS_MATRIX * proj * view,
            light_space_near,
            light_space_far,
            bounds_min,
            bounds_max,
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view
    }

    pub fn contains_depth(&self, view_depth: f32) -> bool {
        view_depth >= self.split_near && view_depth <= self.split_far
    }

    /// False when the slice collapsed to a line or point in light space, or a matrix blew up.
    pub fn is_well_formed(&self) -> bool {
        let extent = self.bounds_max - self.bounds_min;
        extent.x.is_finite()
            && extent.y.is_finite()
            && extent.x > MIN_LIGHT_EXTENT
            && extent.y > MIN_LIGHT_EXTENT
            && self.proj.is_finite()
            && self.shadow.is_finite()
    }
}

/// Boundary `index` of `count` slices over `[near, far]`. Index 0 is `near` and index `count`
/// is `far`, exactly.
pub fn split_distance(index: u32, count: u32, near: f32, far: f32, lambda: f32) -> f32 {
    if index == 0 {
        return near;
    }
    if index >= count {
        return far;
    }
    let ratio = index as f32 / count as f32;
    let uniform = near + ratio * (far - near);
    let logarithmic = near * (far / near).powf(ratio);
    uniform + (logarithmic - uniform) * lambda
}

/// All `count + 1` split boundaries; cascade `i` covers `[planes[i], planes[i + 1]]`.
pub fn split_planes(count: u32, near: f32, far: f32, lambda: f32) -> SmallVec<[f32; 5]> {
    (0..=count).map(|index| split_distance(index, count, near, far, lambda)).collect()
}

pub fn validate_inputs<C: FrustumProvider + ?Sized>(
    camera: &C,
    light_dir: Vec3,
    settings: &CascadeSettings,
) -> Result<(), CascadeError> {
    settings.validate()?;
    let (near, far) = (camera.near_clip(), camera.far_clip());
    if !near.is_finite() || !far.is_finite() || near <= 0.0 || near >= far {
        return Err(CascadeError::InvalidClipRange { near, far });
    }
    if !light_dir.is_finite() || (light_dir.length() - 1.0).abs() > UNIT_LENGTH_TOLERANCE {
        return Err(CascadeError::NonUnitLightDirection(light_dir));
    }
    if light_dir.cross(Vec3::Y).length_squared() < PARALLEL_UP_TOLERANCE {
        return Err(CascadeError::LightParallelToUp(light_dir));
    }
    Ok(())
}

/// Computes the cascades for `camera` lit along `light_dir`, ordered near to far.
pub fn compute_cascades<C: FrustumProvider + ?Sized>(
    camera: &C,
    light_dir: Vec3,
    settings: &CascadeSettings,
) -> Result<CascadeList, CascadeError> {
    validate_inputs(camera, light_dir, settings)?;
    let planes = split_planes(settings.split_count, camera.near_clip(), camera.far_clip(), settings.split_lambda);
    planes
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            let (split_near, split_far) = (pair[0], pair[1]);
            let corners = camera.clip_corners(split_near, split_far);
            let cascade =
                Cascade::fit(&corners, light_dir, split_near, split_far, settings.near_padding, settings.far_padding);
            if cascade.is_well_formed() {
                Ok(cascade)
            } else {
                Err(CascadeError::DegenerateFrustum { index })
            }
        })
        .collect()
}

/// Recomputes cascades every frame and remembers the previous count so callers know when
/// layered GPU storage has to be reallocated.
#[derive(Debug, Clone, Default)]
pub struct CascadeSplitter {
    settings: CascadeSettings,
    cascades: CascadeList,
    previous_count: usize,
}

impl CascadeSplitter {
    pub fn new(settings: CascadeSettings) -> Result<Self, CascadeError> {
        settings.validate()?;
        Ok(Self { settings, cascades: CascadeList::new(), previous_count: 0 })
    }

    pub fn settings(&self) -> &CascadeSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: CascadeSettings) -> Result<(), CascadeError> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn set_split_lambda(&mut self, lambda: f32) -> Result<(), CascadeError> {
        self.set_settings(CascadeSettings { split_lambda: lambda, ..self.settings })
    }

    pub fn set_split_count(&mut self, count: u32) -> Result<(), CascadeError> {
        self.set_settings(CascadeSettings { split_count: count, ..self.settings })
    }

    /// Replaces the cached cascades. On error the previous output is left untouched.
    pub fn update<C: FrustumProvider + ?Sized>(
        &mut self,
        camera: &C,
        light_dir: Vec3,
    ) -> Result<&[Cascade], CascadeError> {
        let cascades = compute_cascades(camera, light_dir, &self.settings)?;
        Ok(self.commit(cascades))
    }

    /// Stores cascades computed elsewhere with the current settings, e.g. once GPU storage
    /// for them is known to exist.
    pub fn commit(&mut self, cascades: CascadeList) -> &[Cascade] {
        self.previous_count = self.cascades.len();
        self.cascades = cascades;
        &self.cascades
    }

    pub fn cascades(&self) -> &[Cascade] {
        &self.cascades
    }

    /// True when the last `update` produced a different number of cascades than the one before.
    pub fn count_changed(&self) -> bool {
        self.previous_count != self.cascades.len()
    }

    /// Index of the cascade whose split range contains `view_depth`.
    pub fn cascade_for_depth(&self, view_depth: f32) -> Option<usize> {
        self.cascades.iter().position(|cascade| cascade.contains_depth(view_depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera3d::Camera3D;

    fn camera(near: f32, far: f32) -> Camera3D {
        Camera3D::new(Vec3::new(0.0, 3.0, 8.0), Vec3::ZERO, 50.0_f32.to_radians(), 1.6, near, far)
    }

    fn light() -> Vec3 {
        Vec3::new(-1.4, -0.37, 0.63).normalize()
    }

    #[test]
    fn split_distance_hits_both_ends_exactly() {
        for lambda in [0.0, 0.3, 1.0] {
            assert_eq!(split_distance(0, 4, 0.1, 18.0, lambda), 0.1);
            assert_eq!(split_distance(4, 4, 0.1, 18.0, lambda), 18.0);
        }
    }

    #[test]
    fn single_split_covers_whole_range() {
        let cascades = compute_cascades(&camera(0.5, 40.0), light(), &CascadeSettings {
            split_count: 1,
            ..CascadeSettings::default()
        })
        .expect("cascades");
        assert_eq!(cascades.len(), 1);
        assert_eq!(cascades[0].split_near, 0.5);
        assert_eq!(cascades[0].split_far, 40.0);
    }

    #[test]
    fn padding_is_applied_to_light_space_planes() {
        let settings = CascadeSettings { near_padding: 3.0, far_padding: 7.0, ..CascadeSettings::default() };
        let cascades = compute_cascades(&camera(0.1, 18.0), light(), &settings).expect("cascades");
        for cascade in &cascades {
            assert_eq!(cascade.light_space_near, -cascade.bounds_max.z - 3.0);
            assert_eq!(cascade.light_space_far, -cascade.bounds_min.z + 7.0);
            assert!(cascade.light_space_near < cascade.light_space_far);
        }
    }

    #[test]
    fn splitter_tracks_count_changes() {
        let mut splitter = CascadeSplitter::new(CascadeSettings::default()).expect("splitter");
        let camera = camera(0.1, 18.0);
        splitter.update(&camera, light()).expect("first update");
        assert!(splitter.count_changed());
        splitter.update(&camera, light()).expect("second update");
        assert!(!splitter.count_changed());
        splitter.set_split_count(2).expect("count");
        splitter.update(&camera, light()).expect("third update");
        assert!(splitter.count_changed());
        assert_eq!(splitter.cascades().len(), 2);
    }

    #[test]
    fn failed_update_keeps_previous_cascades() {
        let mut splitter = CascadeSplitter::new(CascadeSettings::default()).expect("splitter");
        splitter.update(&camera(0.1, 18.0), light()).expect("update");
        let before = splitter.cascades().to_vec();
        let err = splitter.update(&camera(5.0, 1.0), light()).unwrap_err();
        assert!(matches!(err, CascadeError::InvalidClipRange { .. }));
        assert_eq!(splitter.cascades(), before.as_slice());
    }

    #[test]
    fn cascade_for_depth_selects_matching_slice() {
        let mut splitter = CascadeSplitter::new(CascadeSettings::default()).expect("splitter");
        splitter.update(&camera(0.1, 18.0), light()).expect("update");
        assert_eq!(splitter.cascade_for_depth(0.2), Some(0));
        assert_eq!(splitter.cascade_for_depth(17.5), Some(3));
        assert_eq!(splitter.cascade_for_depth(25.0), None);
    }

    /// Provider whose slices all collapse onto a single point.
    struct PointFrustum;

    impl FrustumProvider for PointFrustum {
        fn near_clip(&self) -> f32 {
            0.1
        }

        fn far_clip(&self) -> f32 {
            18.0
        }

        fn aspect_ratio(&self) -> f32 {
            1.0
        }

        fn clip_corners(&self, _near: f32, _far: f32) -> FrustumCorners {
            FrustumCorners { near: [Vec3::new(0.0, 0.0, -5.0); 4], far: [Vec3::new(0.0, 0.0, -5.0); 4] }
        }
    }

    #[test]
    fn collapsed_slices_are_rejected() {
        let err = compute_cascades(&PointFrustum, light(), &CascadeSettings::default()).unwrap_err();
        assert_eq!(err, CascadeError::DegenerateFrustum { index: 0 });
    }

    #[test]
    fn camera_on_its_target_is_rejected() {
        let camera = Camera3D::new(Vec3::ONE, Vec3::ONE, 0.9, 1.6, 0.1, 18.0);
        let err = compute_cascades(&camera, light(), &CascadeSettings::default()).unwrap_err();
        assert!(matches!(err, CascadeError::DegenerateFrustum { .. }), "unexpected error: {err}");
    }

    #[test]
    fn settings_reject_out_of_range_values() {
        let base = CascadeSettings::default();
        assert_eq!(CascadeSettings { split_count: 0, ..base }.validate(), Err(CascadeError::ZeroSplitCount));
        assert_eq!(CascadeSettings { split_count: 9, ..base }.validate(), Err(CascadeError::TooManySplits(9)));
        assert_eq!(
            CascadeSettings { split_lambda: 1.5, ..base }.validate(),
            Err(CascadeError::InvalidSplitLambda(1.5))
        );
        assert!(matches!(
            CascadeSettings { far_padding: -1.0, ..base }.validate(),
            Err(CascadeError::InvalidPadding { .. })
        ));
    }
}
