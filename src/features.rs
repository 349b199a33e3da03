use std::sync::atomic::{AtomicU32, Ordering};

use crate::backend::Module;
use crate::types::Features;

/// Lock-free set of enabled features.
///
/// Written from any thread through the session API and read once per cycle
/// by the acquisition loop. Besides the enabled set it tracks which features
/// already have their middleware module running in the current pipeline, so
/// the loop can initialise newly enabled ones at the top of a cycle.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    enabled: AtomicU32,
    initialized: AtomicU32,
    pending: AtomicU32,
}

impl FeatureRegistry {
    pub fn new(initial: Features) -> Self {
        let registry = Self::default();
        registry.enable(initial);
        registry
    }

    /// Enable one or more features. Idempotent.
    pub fn enable(&self, features: Features) {
        let before = Features::from_bits_truncate(
            self.enabled.fetch_or(features.bits(), Ordering::AcqRel),
        );
        let newly = features - before;
        if newly.is_empty() {
            return;
        }
        let initialized = Features::from_bits_truncate(self.initialized.load(Ordering::Acquire));
        let needs_init = newly - initialized;
        if !needs_init.is_empty() {
            self.pending.fetch_or(needs_init.bits(), Ordering::AcqRel);
        }
        log::debug!("Features enabled: {:?}", newly);
    }

    /// Disable one or more features. Modules stay initialised until the
    /// pipeline closes.
    pub fn disable(&self, features: Features) {
        self.enabled.fetch_and(!features.bits(), Ordering::AcqRel);
        self.pending.fetch_and(!features.bits(), Ordering::AcqRel);
        log::debug!("Features disabled: {:?}", features);
    }

    pub fn is_enabled(&self, features: Features) -> bool {
        self.snapshot().contains(features)
    }

    pub fn snapshot(&self) -> Features {
        Features::from_bits_truncate(self.enabled.load(Ordering::Acquire))
    }

    /// Take the features that were enabled since their module was last
    /// initialised. Only enabled features are returned.
    pub(crate) fn take_pending(&self) -> Features {
        let pending = Features::from_bits_truncate(self.pending.swap(0, Ordering::AcqRel));
        pending & self.snapshot()
    }

    pub(crate) fn mark_initialized(&self, features: Features) {
        self.initialized.fetch_or(features.bits(), Ordering::AcqRel);
    }

    #[cfg(test)]
    pub(crate) fn initialized(&self) -> Features {
        Features::from_bits_truncate(self.initialized.load(Ordering::Acquire))
    }

    /// Forget initialised modules after the pipeline closed. Every enabled
    /// feature becomes pending again.
    pub(crate) fn reset_initialized(&self) {
        self.initialized.store(0, Ordering::Release);
        self.pending
            .store(self.enabled.load(Ordering::Acquire), Ordering::Release);
    }
}

/// Middleware modules backing a set of features, in initialisation order.
pub fn modules_for(features: Features) -> Vec<Module> {
    let table = [
        (Features::CAMERA_STREAMING, Module::Streams),
        (Features::SCAN_3D, Module::Scan3D),
        (Features::HEAD_TRACKING, Module::Face),
        (Features::HAND_CURSOR, Module::HandCursor),
        (Features::SEGMENTATION_3D, Module::Segmentation),
        (Features::BLOB_TRACKING, Module::Blob),
    ];
    table
        .into_iter()
        .filter(|(f, _)| features.contains(*f))
        .map(|(_, m)| m)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_is_idempotent() {
        let reg = FeatureRegistry::default();
        reg.enable(Features::HEAD_TRACKING);
        reg.enable(Features::HEAD_TRACKING);
        assert_eq!(reg.snapshot(), Features::HEAD_TRACKING);
        assert_eq!(reg.take_pending(), Features::HEAD_TRACKING);
        assert!(reg.take_pending().is_empty());
    }

    #[test]
    fn disable_clears_only_that_bit() {
        let reg = FeatureRegistry::new(Features::CAMERA_STREAMING | Features::SCAN_3D);
        reg.disable(Features::SCAN_3D);
        assert!(reg.is_enabled(Features::CAMERA_STREAMING));
        assert!(!reg.is_enabled(Features::SCAN_3D));
    }

    #[test]
    fn initialized_features_are_not_pending_again() {
        let reg = FeatureRegistry::new(Features::SCAN_3D);
        let pending = reg.take_pending();
        reg.mark_initialized(pending);

        reg.disable(Features::SCAN_3D);
        reg.enable(Features::SCAN_3D);
        assert!(reg.take_pending().is_empty());

        reg.reset_initialized();
        assert_eq!(reg.take_pending(), Features::SCAN_3D);
    }

    #[test]
    fn disabled_features_drop_out_of_pending() {
        let reg = FeatureRegistry::new(Features::HAND_CURSOR | Features::BLOB_TRACKING);
        reg.disable(Features::BLOB_TRACKING);
        assert_eq!(reg.take_pending(), Features::HAND_CURSOR);
    }

    #[test]
    fn modules_follow_features() {
        let modules = modules_for(Features::CAMERA_STREAMING | Features::HEAD_TRACKING);
        assert_eq!(modules, vec![Module::Streams, Module::Face]);
        assert!(modules_for(Features::empty()).is_empty());
    }
}
