use anyhow::{Context, Result};
use glam::Vec3;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::camera3d::Camera3D;
use crate::cascades::{CascadeSettings, DEFAULT_FAR_PADDING, DEFAULT_NEAR_PADDING};

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "CameraConfig::default_fov_y_degrees")]
    pub fov_y_degrees: f32,
    #[serde(default = "CameraConfig::default_aspect")]
    pub aspect: f32,
    #[serde(default = "CameraConfig::default_near")]
    pub near: f32,
    #[serde(default = "CameraConfig::default_far")]
    pub far: f32,
    #[serde(default = "CameraConfig::default_position")]
    pub position: [f32; 3],
    #[serde(default)]
    pub target: [f32; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightConfig {
    #[serde(default = "LightConfig::default_direction")]
    pub direction: [f32; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShadowConfig {
    #[serde(default = "ShadowConfig::default_cascade_count")]
    pub cascade_count: u32,
    #[serde(default = "ShadowConfig::default_resolution")]
    pub resolution: u32,
    #[serde(default = "ShadowConfig::default_split_lambda")]
    pub split_lambda: f32,
    #[serde(default = "ShadowConfig::default_near_padding")]
    pub near_padding: f32,
    #[serde(default = "ShadowConfig::default_far_padding")]
    pub far_padding: f32,
    #[serde(default = "ShadowConfig::default_shadowing_factor")]
    pub shadowing_factor: f32,
    #[serde(default = "ShadowConfig::default_blur_kernel")]
    pub blur_kernel: u32,
    #[serde(default = "ShadowConfig::default_filtering")]
    pub filtering: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "WatchConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub light: LightConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfigOverrides {
    pub cascade_count: Option<u32>,
    pub split_lambda: Option<f32>,
    pub resolution: Option<u32>,
    pub blur_kernel: Option<u32>,
}

impl CameraConfig {
    const fn default_fov_y_degrees() -> f32 {
        50.0
    }

    const fn default_aspect() -> f32 {
        1.6
    }

    const fn default_near() -> f32 {
        0.1
    }

    const fn default_far() -> f32 {
        18.0
    }

    const fn default_position() -> [f32; 3] {
        [0.0, 4.0, 12.0]
    }

    pub fn to_camera(&self) -> Camera3D {
        Camera3D::new(
            Vec3::from_array(self.position),
            Vec3::from_array(self.target),
            self.fov_y_degrees.to_radians(),
            self.aspect,
            self.near,
            self.far,
        )
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: Self::default_fov_y_degrees(),
            aspect: Self::default_aspect(),
            near: Self::default_near(),
            far: Self::default_far(),
            position: Self::default_position(),
            target: [0.0; 3],
        }
    }
}

impl LightConfig {
    const fn default_direction() -> [f32; 3] {
        [-1.4, -0.37, 0.63]
    }

    /// Direction as a unit vector; authors are free to write it unnormalized.
    pub fn direction(&self) -> Vec3 {
        Vec3::from_array(self.direction).normalize_or_zero()
    }
}

impl Default for LightConfig {
    fn default() -> Self {
        Self { direction: Self::default_direction() }
    }
}

impl ShadowConfig {
    const fn default_cascade_count() -> u32 {
        4
    }

    const fn default_resolution() -> u32 {
        2048
    }

    const fn default_split_lambda() -> f32 {
        0.5
    }

    const fn default_near_padding() -> f32 {
        DEFAULT_NEAR_PADDING
    }

    const fn default_far_padding() -> f32 {
        DEFAULT_FAR_PADDING
    }

    const fn default_shadowing_factor() -> f32 {
        120.0
    }

    const fn default_blur_kernel() -> u32 {
        7
    }

    const fn default_filtering() -> bool {
        true
    }

    pub fn cascade_settings(&self) -> CascadeSettings {
        CascadeSettings {
            split_count: self.cascade_count,
            split_lambda: self.split_lambda,
            near_padding: self.near_padding,
            far_padding: self.far_padding,
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            cascade_count: Self::default_cascade_count(),
            resolution: Self::default_resolution(),
            split_lambda: Self::default_split_lambda(),
            near_padding: Self::default_near_padding(),
            far_padding: Self::default_far_padding(),
            shadowing_factor: Self::default_shadowing_factor(),
            blur_kernel: Self::default_blur_kernel(),
            filtering: Self::default_filtering(),
        }
    }
}

impl WatchConfig {
    const fn default_poll_interval_ms() -> u64 {
        500
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { poll_interval_ms: Self::default_poll_interval_ms() }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(count) = overrides.cascade_count {
            self.shadow.cascade_count = count;
        }
        if let Some(lambda) = overrides.split_lambda {
            self.shadow.split_lambda = lambda;
        }
        if let Some(resolution) = overrides.resolution {
            self.shadow.resolution = resolution;
        }
        if let Some(kernel) = overrides.blur_kernel {
            self.shadow.blur_kernel = kernel;
        }
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.cascade_count.is_none()
            && self.split_lambda.is_none()
            && self.resolution.is_none()
            && self.blur_kernel.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.cascade_count.is_some() {
            fields.push("cascades");
        }
        if self.split_lambda.is_some() {
            fields.push("lambda");
        }
        if self.resolution.is_some() {
            fields.push("resolution");
        }
        if self.blur_kernel.is_some() {
            fields.push("kernel");
        }
        fields
    }
}
