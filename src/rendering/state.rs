//! Lifecycle of the renderer.

use anyhow::{Result, bail};
use std::fmt;

/// The lifecycle state of a [`Renderer`](crate::rendering::Renderer).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RendererState {
    /// Passes exist but hold no GPU resources.
    #[default]
    Constructed,
    /// Every pass has been set up for a scene.
    Initialized,
    /// At least one frame has been rendered.
    Running,
    /// Passes have been torn down. Nothing further is allowed.
    Destroyed,
}

/// Something requested of the renderer that may change its state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RendererEvent {
    Initialize,
    Render,
    Destroy,
}

impl RendererState {
    /// Returns the state following `event`.
    ///
    /// # Errors
    /// Returns an error if the event is not allowed in the current state.
    pub fn after(self, event: RendererEvent) -> Result<Self> {
        match (self, event) {
            (_, RendererEvent::Destroy) => Ok(Self::Destroyed),
            (Self::Constructed, RendererEvent::Initialize) => Ok(Self::Initialized),
            (Self::Initialized | Self::Running, RendererEvent::Render) => Ok(Self::Running),
            (state, event) => bail!("Renderer can not {event} when {state}"),
        }
    }

    /// Applies `event` to the state.
    ///
    /// # Errors
    /// Returns an error, leaving the state unchanged, if the event is not
    /// allowed in the current state.
    pub fn transition(&mut self, event: RendererEvent) -> Result<()> {
        *self = self.after(event)?;
        Ok(())
    }

    /// Whether the renderer still accepts scene modifications.
    pub fn is_alive(self) -> bool {
        self != Self::Destroyed
    }
}

impl fmt::Display for RendererState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Constructed => "constructed",
                Self::Initialized => "initialized",
                Self::Running => "running",
                Self::Destroyed => "destroyed",
            }
        )
    }
}

impl fmt::Display for RendererEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Initialize => "initialize",
                Self::Render => "render",
                Self::Destroy => "be destroyed",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_lifecycle_works() {
        let mut state = RendererState::default();
        state.transition(RendererEvent::Initialize).unwrap();
        assert_eq!(state, RendererState::Initialized);
        state.transition(RendererEvent::Render).unwrap();
        assert_eq!(state, RendererState::Running);
        state.transition(RendererEvent::Render).unwrap();
        assert_eq!(state, RendererState::Running);
        state.transition(RendererEvent::Destroy).unwrap();
        assert_eq!(state, RendererState::Destroyed);
    }

    #[test]
    fn rendering_before_initialization_fails() {
        let mut state = RendererState::Constructed;
        assert!(state.transition(RendererEvent::Render).is_err());
        assert_eq!(state, RendererState::Constructed);
    }

    #[test]
    fn initializing_twice_fails() {
        for state in [RendererState::Initialized, RendererState::Running] {
            assert!(state.after(RendererEvent::Initialize).is_err());
        }
    }

    #[test]
    fn destroyed_renderer_rejects_everything_but_destroy() {
        let state = RendererState::Destroyed;
        assert!(state.after(RendererEvent::Initialize).is_err());
        assert!(state.after(RendererEvent::Render).is_err());
        assert_eq!(state.after(RendererEvent::Destroy).unwrap(), RendererState::Destroyed);
        assert!(!state.is_alive());
    }

    #[test]
    fn any_state_can_be_destroyed() {
        for state in [
            RendererState::Constructed,
            RendererState::Initialized,
            RendererState::Running,
        ] {
            assert_eq!(state.after(RendererEvent::Destroy).unwrap(), RendererState::Destroyed);
        }
    }
}
