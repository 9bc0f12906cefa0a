use anyhow::{Context, Result};

use super::shadow_map_array::{ShadowMapArray, ShadowMapTargets};
use crate::blur::{BlurAxis, BlurKernel, MAX_KERNEL_RADIUS};

const WORKGROUP_SIZE: u32 = 8;
pub const BLUR_SHADER_SOURCE: &str = include_str!("../../assets/shaders/separable_blur.wgsl");

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurParams {
    pub direction: [i32; 2],
    pub radius: u32,
    pub layer_count: u32,
    pub weights: [[f32; 4]; 2],
}

impl BlurParams {
    pub fn new(kernel: BlurKernel, axis: BlurAxis, layer_count: u32) -> Self {
        let half = kernel.half_weights();
        let mut weights = [[0.0f32; 4]; 2];
        for (offset, weight) in half.iter().enumerate().take(MAX_KERNEL_RADIUS + 1) {
            weights[offset / 4][offset % 4] = *weight;
        }
        Self { direction: axis.direction(), radius: kernel.radius() as u32, layer_count, weights }
    }
}

struct BlurBindGroups {
    generation: u64,
    horizontal: wgpu::BindGroup,
    vertical: wgpu::BindGroup,
}

/// GPU separable blur over every layer of the shadow map array: horizontal into the ping
/// buffer, vertical back into the shadow map array itself.
pub struct ShadowBlurPass {
    kernel: BlurKernel,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipeline: wgpu::ComputePipeline,
    horizontal_params: wgpu::Buffer,
    vertical_params: wgpu::Buffer,
    bind_groups: Option<BlurBindGroups>,
}

impl ShadowBlurPass {
    pub fn new(device: &wgpu::Device, kernel: BlurKernel) -> Result<Self> {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shadow Blur BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: super::shadow_map_array::SHADOW_MOMENT_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Shadow Blur Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = build_pipeline(device, &pipeline_layout, BLUR_SHADER_SOURCE)
            .context("Built-in shadow blur shader failed to compile")?;
        let params_buffer = |label: &'static str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: std::mem::size_of::<BlurParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        Ok(Self {
            kernel,
            layout,
            horizontal_params: params_buffer("Shadow Blur Horizontal Params"),
            vertical_params: params_buffer("Shadow Blur Vertical Params"),
            pipeline_layout,
            pipeline,
            bind_groups: None,
        })
    }

    pub fn kernel(&self) -> BlurKernel {
        self.kernel
    }

    /// Recompiles the blur shader from `source`. A shader that fails validation is reported and
    /// the previous pipeline stays active.
    pub fn reload_shader(&mut self, device: &wgpu::Device, source: &str) -> Result<()> {
        let pipeline = build_pipeline(device, &self.pipeline_layout, source)?;
        self.pipeline = pipeline;
        log::info!("[blur] shadow blur shader reloaded");
        Ok(())
    }

    /// Records both blur passes for every layer of `array` into `encoder`.
    pub fn encode(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        array: &ShadowMapArray,
    ) -> Result<()> {
        let targets = array.targets().context("Shadow map array has not been allocated")?;
        let stale = self.bind_groups.as_ref().map_or(true, |groups| groups.generation != array.generation());
        if stale {
            self.bind_groups = Some(self.build_bind_groups(device, targets, array.generation()));
        }
        let layers = targets.layers();
        queue.write_buffer(
            &self.horizontal_params,
            0,
            bytemuck::bytes_of(&BlurParams::new(self.kernel, BlurAxis::Horizontal, layers)),
        );
        queue.write_buffer(
            &self.vertical_params,
            0,
            bytemuck::bytes_of(&BlurParams::new(self.kernel, BlurAxis::Vertical, layers)),
        );

        let groups = self.bind_groups.as_ref().context("Shadow blur bind groups missing")?;
        let workgroups = targets.resolution().div_ceil(WORKGROUP_SIZE);
        for (label, bind_group) in
            [("Shadow Blur Horizontal", &groups.horizontal), ("Shadow Blur Vertical", &groups.vertical)]
        {
            let mut pass = encoder
                .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some(label), timestamp_writes: None });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(workgroups, workgroups, layers);
        }
        Ok(())
    }

    fn build_bind_groups(&self, device: &wgpu::Device, targets: &ShadowMapTargets, generation: u64) -> BlurBindGroups {
        let bind = |label: &'static str,
                    source: &wgpu::TextureView,
                    target: &wgpu::TextureView,
                    params: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(source) },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(target) },
                    wgpu::BindGroupEntry { binding: 2, resource: params.as_entire_binding() },
                ],
            })
        };
        BlurBindGroups {
            generation,
            horizontal: bind(
                "Shadow Blur Horizontal BG",
                targets.moments_view(),
                targets.blur_ping_view(),
                &self.horizontal_params,
            ),
            vertical: bind(
                "Shadow Blur Vertical BG",
                targets.blur_ping_view(),
                targets.moments_view(),
                &self.vertical_params,
            ),
        }
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    source: &str,
) -> Result<wgpu::ComputePipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Shadow Blur Shader"),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("Shadow Blur Pipeline"),
        layout: Some(layout),
        module: &shader,
        entry_point: Some("cs_blur"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        log::error!("[blur] shadow blur shader rejected: {err}");
        anyhow::bail!("shadow blur shader failed validation: {err}");
    }
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_pack_half_weights_in_order() {
        let params = BlurParams::new(BlurKernel::Gaussian15x15, BlurAxis::Vertical, 4);
        let half = BlurKernel::Gaussian15x15.half_weights();
        assert_eq!(params.direction, [0, 1]);
        assert_eq!(params.radius, 7);
        assert_eq!(params.layer_count, 4);
        assert_eq!(params.weights[0], [half[0], half[1], half[2], half[3]]);
        assert_eq!(params.weights[1], [half[4], half[5], half[6], half[7]]);
    }

    #[test]
    fn params_match_wgsl_uniform_size() {
        assert_eq!(std::mem::size_of::<BlurParams>(), 48);
    }

    #[test]
    fn narrow_kernel_leaves_upper_weights_zero() {
        let params = BlurParams::new(BlurKernel::Gaussian3x3, BlurAxis::Horizontal, 1);
        assert_eq!(params.direction, [1, 0]);
        assert_eq!(params.weights[1], [0.0; 4]);
        assert_eq!(params.weights[0][2], 0.0);
    }
}
