//! Host seams: interface liveness and the feature arc.
//!
//! The binding registry and the path resolver consult the host for two
//! things it owns: which software interfaces exist, and whether the tunterm
//! bypass feature is enabled on an interface's ip4-unicast arc. Both are
//! traits so the daemon can plug in the real host while tests use the
//! in-memory [`InterfaceMap`] and [`FeatureFlags`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use tunterm_types::SwIfIndex;

/// Feature arc the bypass feature hangs off.
pub const TUNTERM_FEATURE_ARC: &str = "ip4-unicast";

/// Feature that steers VXLAN traffic into the redirect stage.
pub const TUNTERM_FEATURE: &str = "tunterm-ip4-vxlan-bypass";

/// Read access to the host's software interface table.
pub trait InterfaceTable: Send + Sync {
    /// True when `sw_if_index` names an existing interface.
    fn is_live(&self, sw_if_index: SwIfIndex) -> bool;

    /// Interface name, if the interface exists.
    fn name(&self, sw_if_index: SwIfIndex) -> Option<String>;

    /// Every live interface, in index order.
    fn interfaces(&self) -> Vec<SwIfIndex>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("feature {feature} on interface {sw_if_index}: {reason}")]
pub struct FeatureError {
    pub feature: &'static str,
    pub sw_if_index: SwIfIndex,
    pub reason: String,
}

/// Enable/disable control of the tunterm bypass feature.
pub trait FeatureArc: Send + Sync {
    fn is_enabled(&self, sw_if_index: SwIfIndex) -> bool;

    fn enable_disable(&self, sw_if_index: SwIfIndex, enable: bool) -> Result<(), FeatureError>;
}

/// In-memory interface table keyed by index.
#[derive(Debug, Default)]
pub struct InterfaceMap {
    by_index: Mutex<BTreeMap<SwIfIndex, String>>,
}

impl InterfaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sw_if_index: SwIfIndex, name: impl Into<String>) {
        if let Ok(mut map) = self.by_index.lock() {
            map.insert(sw_if_index, name.into());
        }
    }

    pub fn remove(&self, sw_if_index: SwIfIndex) {
        if let Ok(mut map) = self.by_index.lock() {
            map.remove(&sw_if_index);
        }
    }

    /// Looks an interface up by name.
    pub fn index_of(&self, name: &str) -> Option<SwIfIndex> {
        let map = self.by_index.lock().ok()?;
        map.iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(idx, _)| *idx)
    }
}

impl InterfaceTable for InterfaceMap {
    fn is_live(&self, sw_if_index: SwIfIndex) -> bool {
        self.by_index
            .lock()
            .map(|map| map.contains_key(&sw_if_index))
            .unwrap_or(false)
    }

    fn name(&self, sw_if_index: SwIfIndex) -> Option<String> {
        self.by_index.lock().ok()?.get(&sw_if_index).cloned()
    }

    fn interfaces(&self) -> Vec<SwIfIndex> {
        self.by_index
            .lock()
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// In-memory feature arc that records every transition it performs.
#[derive(Debug, Default)]
pub struct FeatureFlags {
    enabled: Mutex<BTreeSet<SwIfIndex>>,
    transitions: Mutex<Vec<(SwIfIndex, bool)>>,
    failing: Mutex<BTreeSet<SwIfIndex>>,
}

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every enable (`true`) / disable (`false`) call, in order.
    pub fn transitions(&self) -> Vec<(SwIfIndex, bool)> {
        self.transitions
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Makes every subsequent toggle on `sw_if_index` fail.
    pub fn fail_on(&self, sw_if_index: SwIfIndex) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(sw_if_index);
        }
    }
}

impl FeatureArc for FeatureFlags {
    fn is_enabled(&self, sw_if_index: SwIfIndex) -> bool {
        self.enabled
            .lock()
            .map(|e| e.contains(&sw_if_index))
            .unwrap_or(false)
    }

    fn enable_disable(&self, sw_if_index: SwIfIndex, enable: bool) -> Result<(), FeatureError> {
        let error = |reason: &str| FeatureError {
            feature: TUNTERM_FEATURE,
            sw_if_index,
            reason: reason.to_string(),
        };

        let failing = self.failing.lock().map_err(|_| error("lock poisoned"))?;
        if failing.contains(&sw_if_index) {
            return Err(error("rejected by host"));
        }
        drop(failing);

        let mut enabled = self.enabled.lock().map_err(|_| error("lock poisoned"))?;
        if enable {
            enabled.insert(sw_if_index);
        } else {
            enabled.remove(&sw_if_index);
        }
        self.transitions
            .lock()
            .map_err(|_| error("lock poisoned"))?
            .push((sw_if_index, enable));
        Ok(())
    }
}
