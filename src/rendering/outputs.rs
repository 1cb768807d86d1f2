//! Registry through which passes hand their outputs to later passes.

use crate::rendering::pass::RenderPassID;
use anyhow::{Result, anyhow, bail};
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

/// Data a pass publishes during setup for the passes depending on it.
pub trait PassOutput: Any + Send + Sync {
    /// Human-readable name of the output.
    const NAME: &'static str;
    /// The pass publishing the output.
    const PRODUCER: RenderPassID;
}

/// Typed storage of the published pass outputs. Each output type can be
/// published once.
#[derive(Debug, Default)]
pub struct PassOutputs {
    outputs: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl PassOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the given output.
    ///
    /// # Errors
    /// Returns an error if an output of the same type has already been
    /// published.
    pub fn publish<T: PassOutput>(&mut self, output: T) -> Result<Arc<T>> {
        if self.contains::<T>() {
            bail!("{} output published more than once", T::NAME);
        }
        let output = Arc::new(output);
        self.outputs.insert(
            TypeId::of::<T>(),
            Arc::clone(&output) as Arc<dyn Any + Send + Sync>,
        );
        Ok(output)
    }

    /// Returns the published output of the given type.
    ///
    /// # Errors
    /// Returns an error naming the producing pass if the output has not been
    /// published.
    pub fn get<T: PassOutput>(&self) -> Result<Arc<T>> {
        let output = self.outputs.get(&TypeId::of::<T>()).ok_or_else(|| {
            anyhow!(
                "Missing {} output (expected from the {} pass)",
                T::NAME,
                T::PRODUCER
            )
        })?;
        Arc::clone(output)
            .downcast::<T>()
            .map_err(|_| anyhow!("{} output has unexpected type", T::NAME))
    }

    pub fn contains<T: PassOutput>(&self) -> bool {
        self.outputs.contains_key(&TypeId::of::<T>())
    }

    /// Removes every output, releasing the references the registry holds.
    pub fn clear(&mut self) {
        self.outputs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct ShadowResolution(u32);

    impl PassOutput for ShadowResolution {
        const NAME: &'static str = "shadow resolution";
        const PRODUCER: RenderPassID = RenderPassID::Shadow;
    }

    #[derive(Debug)]
    struct WorkingSize;

    impl PassOutput for WorkingSize {
        const NAME: &'static str = "working size";
        const PRODUCER: RenderPassID = RenderPassID::Downsample;
    }

    #[test]
    fn published_output_can_be_retrieved() {
        let mut outputs = PassOutputs::new();
        outputs.publish(ShadowResolution(1024)).unwrap();
        assert_eq!(*outputs.get::<ShadowResolution>().unwrap(), ShadowResolution(1024));
        assert!(outputs.contains::<ShadowResolution>());
    }

    #[test]
    fn missing_output_error_names_producer() {
        let outputs = PassOutputs::new();
        let error = outputs.get::<WorkingSize>().unwrap_err().to_string();
        assert!(error.contains("Missing working size output"));
        assert!(error.contains(&RenderPassID::Downsample.to_string()));
    }

    #[test]
    fn publishing_twice_fails() {
        let mut outputs = PassOutputs::new();
        outputs.publish(ShadowResolution(1)).unwrap();
        assert!(outputs.publish(ShadowResolution(2)).is_err());
    }
}
