//! Bookkeeping of which lighting channels may be composited in a frame.

use crate::{gpu::texture::RenderTexture, rendering::pass::RenderPassID};
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// The lighting terms combined by the lighting application pass.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct LightingChannels: u32 {
        const INDIRECT = 1 << 0;
        const AMBIENT  = 1 << 1;
        const SPECULAR = 1 << 2;
        const DIRECT   = 1 << 3;
    }
}

/// One render texture per lighting channel.
#[derive(Clone, Debug)]
pub struct LightingTextures {
    pub indirect: Arc<RenderTexture>,
    pub ambient: Arc<RenderTexture>,
    pub specular: Arc<RenderTexture>,
    pub direct: Arc<RenderTexture>,
}

/// Tracks, for the current frame, at which resolution each lighting channel
/// was produced and whether it was brought back to full resolution.
#[derive(Clone, Debug, Default)]
pub struct LightingFrameState {
    downsampled: bool,
    produced_full_res: LightingChannels,
    produced_low_res: LightingChannels,
    upsampled: LightingChannels,
    upsampled_by: Option<RenderPassID>,
    direct_from_lighting_pass: bool,
}

impl LightingTextures {
    /// Texture of each channel in the order indirect, ambient, specular,
    /// direct.
    pub fn all(&self) -> [&Arc<RenderTexture>; 4] {
        [&self.indirect, &self.ambient, &self.specular, &self.direct]
    }
}

impl LightingFrameState {
    /// Starts the bookkeeping for a frame. `downsampled` tells whether the
    /// cone tracing input has reduced resolution.
    pub fn new(downsampled: bool) -> Self {
        Self {
            downsampled,
            ..Default::default()
        }
    }

    pub fn is_downsampled(&self) -> bool {
        self.downsampled
    }

    /// Records channels written at the cone tracing resolution.
    pub fn record_cone_traced(&mut self, channels: LightingChannels) {
        if self.downsampled {
            self.produced_low_res |= channels;
        } else {
            self.produced_full_res |= channels;
        }
    }

    /// Records the direct channel written at full resolution by the direct
    /// lighting pass.
    pub fn record_direct_lighting(&mut self) {
        self.produced_full_res |= LightingChannels::DIRECT;
        self.direct_from_lighting_pass = true;
    }

    /// Records that the given pass brought every low-resolution channel to
    /// full resolution.
    pub fn record_upsampled(&mut self, pass: RenderPassID) {
        self.upsampled |= self.produced_low_res;
        self.upsampled_by = Some(pass);
    }

    /// Channels produced at reduced resolution this frame.
    pub fn low_res_channels(&self) -> LightingChannels {
        self.produced_low_res
    }

    /// The pass that upsampled the low-resolution channels, if any.
    pub fn upsampled_by(&self) -> Option<RenderPassID> {
        self.upsampled_by
    }

    /// Whether the direct channel comes from the direct lighting pass rather
    /// than from cone tracing.
    pub fn direct_from_lighting_pass(&self) -> bool {
        self.direct_from_lighting_pass
    }

    /// Channels that may be composited this frame. A full-resolution channel
    /// is valid once produced. A low-resolution channel is valid only if no
    /// downsampling occurred or an upsampling pass ran for it.
    pub fn applicable_channels(&self) -> LightingChannels {
        let valid_low_res = if self.downsampled {
            self.produced_low_res & self.upsampled
        } else {
            self.produced_low_res
        };
        self.produced_full_res | valid_low_res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONE_TRACED: LightingChannels = LightingChannels::INDIRECT
        .union(LightingChannels::AMBIENT)
        .union(LightingChannels::SPECULAR);

    #[test]
    fn nothing_is_applicable_before_any_pass_runs() {
        assert!(LightingFrameState::new(true).applicable_channels().is_empty());
        assert!(LightingFrameState::new(false).applicable_channels().is_empty());
    }

    #[test]
    fn full_resolution_cone_tracing_is_applicable_without_upsampling() {
        let mut state = LightingFrameState::new(false);
        state.record_cone_traced(CONE_TRACED);
        assert_eq!(state.applicable_channels(), CONE_TRACED);
    }

    #[test]
    fn downsampled_channels_require_upsampling() {
        let mut state = LightingFrameState::new(true);
        state.record_cone_traced(CONE_TRACED);
        state.record_direct_lighting();

        assert_eq!(state.applicable_channels(), LightingChannels::DIRECT);
        assert_eq!(state.low_res_channels(), CONE_TRACED);

        state.record_upsampled(RenderPassID::BilateralUpsampling);
        assert_eq!(state.applicable_channels(), CONE_TRACED | LightingChannels::DIRECT);
        assert_eq!(state.upsampled_by(), Some(RenderPassID::BilateralUpsampling));
    }

    #[test]
    fn cone_traced_direct_light_follows_low_resolution_rules() {
        let mut state = LightingFrameState::new(true);
        state.record_cone_traced(CONE_TRACED | LightingChannels::DIRECT);
        assert!(!state.direct_from_lighting_pass());
        assert!(state.applicable_channels().is_empty());

        state.record_upsampled(RenderPassID::BilinearUpsampling);
        assert!(state.applicable_channels().contains(LightingChannels::DIRECT));
    }

    #[test]
    fn channels_produced_after_upsampling_are_not_applicable() {
        let mut state = LightingFrameState::new(true);
        state.record_cone_traced(LightingChannels::INDIRECT);
        state.record_upsampled(RenderPassID::BilinearUpsampling);
        state.record_cone_traced(LightingChannels::SPECULAR);

        assert_eq!(state.applicable_channels(), LightingChannels::INDIRECT);
    }
}
