//! Fixed-function raster state shared by the passes.

/// Face culling, depth and color write state, plus an optional viewport.
///
/// Pipelines are built from a raster state, so a pass using a state other
/// than [`RasterState::AMBIENT`] bakes it into its pipelines and declares it
/// while recording through
/// [`FrameContext::with_raster_state`](crate::rendering::pass::FrameContext::with_raster_state).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub cull_mode: Option<wgpu::Face>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub color_writes: wgpu::ColorWrites,
    /// Width and height of the viewport, or `None` for the full target.
    pub viewport: Option<(u32, u32)>,
}

/// Keeps track of the current raster state during frame recording.
#[derive(Clone, Debug)]
pub struct RasterStateTracker {
    current: RasterState,
}

impl RasterState {
    /// The state every pass expects to find when it starts.
    pub const AMBIENT: Self = Self {
        cull_mode: Some(wgpu::Face::Back),
        depth_test: true,
        depth_write: true,
        color_writes: wgpu::ColorWrites::ALL,
        viewport: None,
    };

    /// Depth-only rendering with front faces culled, used for shadow maps.
    pub const SHADOW: Self = Self {
        cull_mode: Some(wgpu::Face::Front),
        color_writes: wgpu::ColorWrites::empty(),
        ..Self::AMBIENT
    };

    /// Conservative rasterization state for voxelization: no culling, no
    /// depth and no color output.
    pub const VOXELIZATION: Self = Self {
        cull_mode: None,
        depth_test: false,
        depth_write: false,
        color_writes: wgpu::ColorWrites::empty(),
        viewport: None,
    };

    /// Full-screen triangles: nothing to cull and no depth.
    pub const FULLSCREEN: Self = Self {
        cull_mode: None,
        depth_test: false,
        depth_write: false,
        ..Self::AMBIENT
    };

    pub fn with_viewport(self, width: u32, height: u32) -> Self {
        Self {
            viewport: Some((width, height)),
            ..self
        }
    }

    pub fn primitive_state(&self) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: self.cull_mode,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        }
    }

    /// Returns the depth stencil state for a depth attachment with the given
    /// format, or `None` if the state neither tests nor writes depth.
    pub fn depth_stencil_state(
        &self,
        format: wgpu::TextureFormat,
        bias: wgpu::DepthBiasState,
    ) -> Option<wgpu::DepthStencilState> {
        (self.depth_test || self.depth_write).then(|| wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth_write,
            depth_compare: if self.depth_test {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias,
        })
    }

    /// Returns the color target state for an attachment with the given
    /// format, without blending.
    pub fn color_target(&self, format: wgpu::TextureFormat) -> Option<wgpu::ColorTargetState> {
        Some(wgpu::ColorTargetState {
            format,
            blend: None,
            write_mask: self.color_writes,
        })
    }

    /// Sets the viewport of the given render pass if the state has one.
    pub fn apply_viewport(&self, render_pass: &mut wgpu::RenderPass<'_>) {
        if let Some((width, height)) = self.viewport {
            render_pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        }
    }
}

impl Default for RasterState {
    fn default() -> Self {
        Self::AMBIENT
    }
}

impl RasterStateTracker {
    pub fn new() -> Self {
        Self {
            current: RasterState::AMBIENT,
        }
    }

    pub fn current(&self) -> &RasterState {
        &self.current
    }

    /// Makes `state` current and returns the state it replaced, to be
    /// swapped back in once recording with `state` is done.
    pub fn swap(&mut self, state: RasterState) -> RasterState {
        std::mem::replace(&mut self.current, state)
    }

    /// Resets the state to [`RasterState::AMBIENT`] and returns whether it
    /// was different.
    pub fn reset_to_ambient(&mut self) -> bool {
        let was_changed = self.current != RasterState::AMBIENT;
        self.current = RasterState::AMBIENT;
        was_changed
    }
}

impl Default for RasterStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapping_back_restores_ambient_state() {
        let mut tracker = RasterStateTracker::new();
        let previous = tracker.swap(RasterState::VOXELIZATION.with_viewport(64, 64));

        assert_eq!(tracker.current().viewport, Some((64, 64)));
        assert!(!tracker.current().depth_test);

        tracker.swap(previous);
        assert_eq!(*tracker.current(), RasterState::AMBIENT);
    }

    #[test]
    fn leaked_state_is_detected_and_reset() {
        let mut tracker = RasterStateTracker::new();
        assert!(!tracker.reset_to_ambient());
        tracker.swap(RasterState::FULLSCREEN);
        assert!(tracker.reset_to_ambient());
        assert_eq!(*tracker.current(), RasterState::AMBIENT);
    }

    #[test]
    fn voxelization_state_disables_depth_and_color() {
        let state = RasterState::VOXELIZATION;
        assert!(
            state
                .depth_stencil_state(wgpu::TextureFormat::Depth32Float, Default::default())
                .is_none()
        );
        assert!(state.color_target(wgpu::TextureFormat::R8Unorm).unwrap().write_mask.is_empty());
        assert!(state.primitive_state().cull_mode.is_none());
    }

    #[test]
    fn shadow_state_culls_front_faces_and_writes_depth() {
        let state = RasterState::SHADOW;
        assert_eq!(state.primitive_state().cull_mode, Some(wgpu::Face::Front));
        let depth = state
            .depth_stencil_state(wgpu::TextureFormat::Depth32Float, Default::default())
            .unwrap();
        assert!(depth.depth_write_enabled);
        assert_eq!(depth.depth_compare, wgpu::CompareFunction::Less);
    }
}
