use thiserror::Error;

pub const SHADOW_MOMENT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const SHADOW_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Depth pass renders into it, the blur reads and writes it, copies upload and read back layers.
pub const SHADOW_MOMENT_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::STORAGE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShadowMapError {
    #[error("shadow map resolution and layer count must be non-zero (got {resolution}x{layers})")]
    EmptyExtent { resolution: u32, layers: u32 },
    #[error("shadow map resolution {requested} exceeds the device limit of {limit}")]
    ResolutionTooLarge { requested: u32, limit: u32 },
    #[error("shadow map layer count {requested} exceeds the device limit of {limit}")]
    TooManyLayers { requested: u32, limit: u32 },
    #[error("adapter does not support {missing:?} on {format:?} shadow maps")]
    UnsupportedFormat { format: wgpu::TextureFormat, missing: wgpu::TextureUsages },
    #[error("failed to allocate {resolution}x{resolution}x{layers} shadow map array: {reason}")]
    AllocationFailed { resolution: u32, layers: u32, reason: String },
}

/// Layered shadow storage plus the blur ping buffer, always allocated together.
pub struct ShadowMapTargets {
    resolution: u32,
    layers: u32,
    moments: wgpu::Texture,
    moments_view: wgpu::TextureView,
    moment_layer_views: Vec<wgpu::TextureView>,
    _depth: wgpu::Texture,
    depth_layer_views: Vec<wgpu::TextureView>,
    _blur_ping: wgpu::Texture,
    blur_ping_view: wgpu::TextureView,
}

impl ShadowMapTargets {
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn moments_texture(&self) -> &wgpu::Texture {
        &self.moments
    }

    /// Array view over every cascade, used for sampling and as the vertical blur output.
    pub fn moments_view(&self) -> &wgpu::TextureView {
        &self.moments_view
    }

    /// Single-layer color target for rendering cascade `layer`.
    pub fn moment_layer_view(&self, layer: usize) -> Option<&wgpu::TextureView> {
        self.moment_layer_views.get(layer)
    }

    pub fn depth_layer_view(&self, layer: usize) -> Option<&wgpu::TextureView> {
        self.depth_layer_views.get(layer)
    }

    pub fn blur_ping_view(&self) -> &wgpu::TextureView {
        &self.blur_ping_view
    }
}

/// Owner of the cascade shadow map array. Reallocation is explicit and idempotent.
pub struct ShadowMapArray {
    targets: Option<ShadowMapTargets>,
    generation: u64,
    moment_usages: wgpu::TextureUsages,
}

impl ShadowMapArray {
    pub fn new(adapter: &wgpu::Adapter) -> Self {
        Self::with_moment_usages(adapter.get_texture_format_features(SHADOW_MOMENT_FORMAT).allowed_usages)
    }

    /// `allowed` is what the adapter permits on [`SHADOW_MOMENT_FORMAT`].
    pub fn with_moment_usages(allowed: wgpu::TextureUsages) -> Self {
        Self { targets: None, generation: 0, moment_usages: allowed }
    }

    pub fn targets(&self) -> Option<&ShadowMapTargets> {
        self.targets.as_ref()
    }

    /// Bumped on every reallocation; bind groups built against an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn matches(&self, resolution: u32, layers: u32) -> bool {
        self.targets.as_ref().is_some_and(|targets| targets.resolution == resolution && targets.layers == layers)
    }

    /// Makes sure storage for `layers` cascades at `resolution` exists. Returns `Ok(true)` when a
    /// new allocation replaced the old one. On error the previous allocation stays in place.
    pub fn ensure_capacity(
        &mut self,
        device: &wgpu::Device,
        resolution: u32,
        layers: u32,
    ) -> Result<bool, ShadowMapError> {
        if self.matches(resolution, layers) {
            return Ok(false);
        }
        check_format_usages(self.moment_usages)?;
        check_limits(&device.limits(), resolution, layers)?;
        let targets = allocate_targets(device, resolution, layers)?;
        log::info!(
            "[shadows] allocated {resolution}x{resolution} shadow map array with {layers} layer(s) (generation {})",
            self.generation + 1
        );
        self.targets = Some(targets);
        self.generation += 1;
        Ok(true)
    }

    pub fn release(&mut self) {
        if self.targets.take().is_some() {
            self.generation += 1;
        }
    }
}

pub fn check_format_usages(allowed: wgpu::TextureUsages) -> Result<(), ShadowMapError> {
    let missing = SHADOW_MOMENT_USAGE.difference(allowed);
    if !missing.is_empty() {
        return Err(ShadowMapError::UnsupportedFormat { format: SHADOW_MOMENT_FORMAT, missing });
    }
    Ok(())
}

pub fn check_limits(limits: &wgpu::Limits, resolution: u32, layers: u32) -> Result<(), ShadowMapError> {
    if resolution == 0 || layers == 0 {
        return Err(ShadowMapError::EmptyExtent { resolution, layers });
    }
    if resolution > limits.max_texture_dimension_2d {
        return Err(ShadowMapError::ResolutionTooLarge {
            requested: resolution,
            limit: limits.max_texture_dimension_2d,
        });
    }
    if layers > limits.max_texture_array_layers {
        return Err(ShadowMapError::TooManyLayers { requested: layers, limit: limits.max_texture_array_layers });
    }
    Ok(())
}

fn allocate_targets(device: &wgpu::Device, resolution: u32, layers: u32) -> Result<ShadowMapTargets, ShadowMapError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let extent = wgpu::Extent3d { width: resolution, height: resolution, depth_or_array_layers: layers };
    let moments = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Shadow Moment Array"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SHADOW_MOMENT_FORMAT,
        usage: SHADOW_MOMENT_USAGE,
        view_formats: &[],
    });
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Shadow Depth Array"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SHADOW_DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let blur_ping = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Shadow Blur Ping Array"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SHADOW_MOMENT_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    let array_view = |texture: &wgpu::Texture, label: &'static str| {
        texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            base_array_layer: 0,
            array_layer_count: Some(layers),
            ..Default::default()
        })
    };
    let layer_views = |texture: &wgpu::Texture, label: &'static str| -> Vec<wgpu::TextureView> {
        (0..layers)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(label),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect()
    };

    let moments_view = array_view(&moments, "Shadow Moment Array View");
    let moment_layer_views = layer_views(&moments, "Shadow Moment Cascade Layer");
    let depth_layer_views = layer_views(&depth, "Shadow Depth Cascade Layer");
    let blur_ping_view = array_view(&blur_ping, "Shadow Blur Ping View");

    // scopes pop in reverse push order
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    if let Some(err) = oom.or(validation) {
        log::warn!("[shadows] shadow map allocation failed: {err}");
        return Err(ShadowMapError::AllocationFailed { resolution, layers, reason: err.to_string() });
    }

    Ok(ShadowMapTargets {
        resolution,
        layers,
        moments,
        moments_view,
        moment_layer_views,
        _depth: depth,
        depth_layer_views,
        _blur_ping: blur_ping,
        blur_ping_view,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_limits_rejects_empty_and_oversized_requests() {
        let limits = wgpu::Limits::downlevel_defaults();
        assert_eq!(check_limits(&limits, 0, 4), Err(ShadowMapError::EmptyExtent { resolution: 0, layers: 4 }));
        assert_eq!(check_limits(&limits, 1024, 0), Err(ShadowMapError::EmptyExtent { resolution: 1024, layers: 0 }));
        assert!(matches!(
            check_limits(&limits, limits.max_texture_dimension_2d + 1, 4),
            Err(ShadowMapError::ResolutionTooLarge { .. })
        ));
        assert!(matches!(
            check_limits(&limits, 512, limits.max_texture_array_layers + 1),
            Err(ShadowMapError::TooManyLayers { .. })
        ));
        assert_eq!(check_limits(&limits, 2048, 4), Ok(()));
    }

    #[test]
    fn format_check_names_the_missing_usages() {
        assert_eq!(check_format_usages(SHADOW_MOMENT_USAGE | wgpu::TextureUsages::COPY_DST), Ok(()));
        let downlevel = wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING;
        assert_eq!(
            check_format_usages(downlevel),
            Err(ShadowMapError::UnsupportedFormat {
                format: SHADOW_MOMENT_FORMAT,
                missing: wgpu::TextureUsages::RENDER_ATTACHMENT,
            })
        );
    }

    #[test]
    fn empty_array_matches_nothing() {
        let array = ShadowMapArray::with_moment_usages(SHADOW_MOMENT_USAGE);
        assert!(!array.matches(2048, 4));
        assert_eq!(array.generation(), 0);
        assert!(array.targets().is_none());
    }
}
