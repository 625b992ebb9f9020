//! Host resource sampling.
//!
//! Sampling CPU, memory and disk is platform specific and lives outside
//! this crate. Deployments inject a [`ResourceSampler`]; each reading is
//! optional so one failed probe does not hide the others.

use crate::model::SystemResources;

/// Source of host resource readings.
pub trait ResourceSampler: Send + Sync {
    /// Take a sample. Fields that could not be read are `None`.
    fn sample(&self) -> SystemResources;
}

/// A sampler for hosts where no readings are available.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsampled;

impl ResourceSampler for Unsampled {
    fn sample(&self) -> SystemResources {
        SystemResources::default()
    }
}
