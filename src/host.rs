//! Host telephony core interface.
//!
//! Drivers never register themselves directly; they ask the host to run
//! the registration on a later turn of its event loop.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::drivers::{PN_PHONE_INFO, PN_SS};

/// A telephony feature a driver provides to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    CallBarring,
    DeviceInfo,
}

impl Feature {
    /// Human readable driver name.
    pub fn name(&self) -> &'static str {
        match self {
            Feature::CallBarring => "call barring",
            Feature::DeviceInfo => "devinfo",
        }
    }

    /// ISI resource backing the feature.
    pub fn resource(&self) -> u8 {
        match self {
            Feature::CallBarring => PN_SS,
            Feature::DeviceInfo => PN_PHONE_INFO,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deferred job posted to the host.
pub type HostJob = Box<dyn FnOnce() + Send + 'static>;

/// What the drivers need from the host core.
pub trait HostCore: Send + Sync {
    /// Make `feature` available to the rest of the system.
    fn register(&self, feature: Feature);

    /// Run `job` once, on a later turn of the host's event loop.
    fn run_once_on_next_turn(&self, job: HostJob);
}

/// [`HostCore`] that records registrations and defers jobs onto tokio.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    registered: Mutex<Vec<Feature>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Features registered so far, in registration order.
    pub fn registered(&self) -> Vec<Feature> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_registered(&self, feature: Feature) -> bool {
        self.registered().contains(&feature)
    }
}

impl HostCore for FeatureRegistry {
    fn register(&self, feature: Feature) {
        tracing::debug!("Registering {} feature", feature);
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(feature);
    }

    fn run_once_on_next_turn(&self, job: HostJob) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { job() });
            }
            Err(e) => tracing::error!("No runtime to defer host job onto: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_feature_resources() {
        assert_eq!(Feature::CallBarring.resource(), 0x06);
        assert_eq!(Feature::DeviceInfo.resource(), 0x1B);
        assert_eq!(Feature::DeviceInfo.to_string(), "devinfo");
    }

    #[test]
    fn test_register_records_order() {
        let registry = FeatureRegistry::new();
        registry.register(Feature::DeviceInfo);
        registry.register(Feature::CallBarring);

        assert_eq!(
            registry.registered(),
            vec![Feature::DeviceInfo, Feature::CallBarring]
        );
        assert!(registry.is_registered(Feature::CallBarring));
    }

    #[tokio::test]
    async fn test_job_runs_on_later_turn() {
        let registry = FeatureRegistry::new();
        let ran = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let flag = ran.clone();
        registry.run_once_on_next_turn(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            let _ = done_tx.send(());
        }));

        assert!(!ran.load(Ordering::SeqCst));
        done_rx.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
