mod blur_pass;
mod cascade_uniform;
mod shadow_map_array;

pub use blur_pass::{BlurParams, ShadowBlurPass, BLUR_SHADER_SOURCE};
pub use cascade_uniform::{CascadeUniform, OPENGL_TO_WGPU};
pub use shadow_map_array::{
    check_format_usages, check_limits, ShadowMapArray, ShadowMapError, ShadowMapTargets, SHADOW_DEPTH_FORMAT,
    SHADOW_MOMENT_FORMAT, SHADOW_MOMENT_USAGE,
};

use anyhow::{Context, Result};
use glam::Vec3;

use crate::blur::BlurKernel;
use crate::camera3d::FrustumProvider;
use crate::cascades::{compute_cascades, Cascade, CascadeSettings, CascadeSplitter};
use crate::config::ShadowConfig;

/// What a frame needs to know after `ShadowRenderer::prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowFrameInfo {
    pub cascade_count: usize,
    /// The layered storage was recreated; views and bind groups from earlier frames are invalid.
    pub reallocated: bool,
    pub generation: u64,
}

/// Owns the cascade state, the layered shadow storage, the blur pass and the cascade uniform buffer.
pub struct ShadowRenderer {
    splitter: CascadeSplitter,
    maps: ShadowMapArray,
    blur: ShadowBlurPass,
    uniform_buffer: wgpu::Buffer,
    resolution: u32,
    shadowing_factor: f32,
    filtering: bool,
}

impl ShadowRenderer {
    pub fn new(adapter: &wgpu::Adapter, device: &wgpu::Device, config: &ShadowConfig) -> Result<Self> {
        let splitter = CascadeSplitter::new(config.cascade_settings()).context("Invalid cascade settings")?;
        let kernel = BlurKernel::from_width(config.blur_kernel).context("Invalid shadow blur kernel")?;
        let blur = ShadowBlurPass::new(device, kernel)?;
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Cascade Uniform Buffer"),
            size: std::mem::size_of::<CascadeUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(Self {
            splitter,
            maps: ShadowMapArray::new(adapter),
            blur,
            uniform_buffer,
            resolution: config.resolution,
            shadowing_factor: config.shadowing_factor,
            filtering: config.filtering,
        })
    }

    pub fn cascades(&self) -> &[Cascade] {
        self.splitter.cascades()
    }

    pub fn maps(&self) -> &ShadowMapArray {
        &self.maps
    }

    pub fn uniform_buffer(&self) -> &wgpu::Buffer {
        &self.uniform_buffer
    }

    pub fn blur_pass_mut(&mut self) -> &mut ShadowBlurPass {
        &mut self.blur
    }

    pub fn set_filtering(&mut self, enabled: bool) {
        self.filtering = enabled;
    }

    pub fn set_shadowing_factor(&mut self, factor: f32) {
        self.shadowing_factor = factor;
    }

    pub fn set_cascade_settings(&mut self, settings: CascadeSettings) -> Result<()> {
        self.splitter.set_settings(settings).context("Invalid cascade settings")
    }

    /// Requests a new resolution. Takes effect on the next `prepare`; if the allocation fails
    /// there, the previous resolution and storage are kept.
    pub fn set_resolution(&mut self, resolution: u32) {
        self.resolution = resolution;
    }

    /// Recomputes cascades, makes sure the layered storage fits them and uploads the uniform block.
    /// Cascades are only committed once storage for them exists; on error the previous frame's
    /// cascades, storage and uniform block stay in place.
    pub fn prepare<C: FrustumProvider + ?Sized>(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        camera: &C,
        light_dir: Vec3,
    ) -> Result<ShadowFrameInfo> {
        let cascades =
            compute_cascades(camera, light_dir, self.splitter.settings()).context("Cascade update failed")?;
        let cascade_count = cascades.len();
        let layers = cascade_count as u32;
        let reallocated = match self.maps.ensure_capacity(device, self.resolution, layers) {
            Ok(reallocated) => reallocated,
            Err(err) => {
                let current = self.maps.targets().map(|targets| targets.resolution());
                match current {
                    Some(previous) if self.maps.matches(previous, layers) => {
                        log::warn!("[shadows] keeping {previous}px shadow maps: {err}");
                        self.resolution = previous;
                        false
                    }
                    _ => return Err(err).context("Shadow map allocation failed"),
                }
            }
        };
        let committed = self.splitter.commit(cascades);
        let uniform = CascadeUniform::from_cascades(committed, self.shadowing_factor);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
        Ok(ShadowFrameInfo { cascade_count, reallocated, generation: self.maps.generation() })
    }

    /// Blurs every cascade layer in place when filtering is enabled.
    pub fn filter(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<()> {
        if !self.filtering {
            return Ok(());
        }
        self.blur.encode(device, queue, encoder, &self.maps)
    }
}
