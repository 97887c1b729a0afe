//! Device selection criteria (SPEC_FULL.md §3).

use crate::models::{DeviceKind, DeviceState, Serial};
use std::collections::{HashMap, HashSet};

/// What a caller is asking `DeviceManager::allocate` for. Matching is
/// conjunctive: every set field must be satisfied.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub serial_includes: HashSet<Serial>,
    pub serial_excludes: HashSet<Serial>,
    pub null_device_requested: bool,
    pub stub_emulator_requested: bool,
    pub tcp_device_requested: bool,
    pub min_battery: Option<u32>,
    pub product_type: Option<String>,
    pub extra_properties: HashMap<String, String>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serial(mut self, serial: impl Into<Serial>) -> Self {
        self.serial_includes.insert(serial.into());
        self
    }

    pub fn excluding_serial(mut self, serial: impl Into<Serial>) -> Self {
        self.serial_excludes.insert(serial.into());
        self
    }

    pub fn requesting_null_device(mut self) -> Self {
        self.null_device_requested = true;
        self
    }

    pub fn requesting_stub_emulator(mut self) -> Self {
        self.stub_emulator_requested = true;
        self
    }

    pub fn requesting_tcp_device(mut self) -> Self {
        self.tcp_device_requested = true;
        self
    }

    pub fn with_min_battery(mut self, level: u32) -> Self {
        self.min_battery = Some(level);
        self
    }

    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_properties.insert(key.into(), value.into());
        self
    }

    /// Which [`DeviceKind`] this selector requests synthesize via a
    /// placeholder factory, if any. A stub-emulator request synthesizes a
    /// device of kind `Emulator` (it stands in for a real one), not `Stub`.
    pub fn requested_placeholder_kind(&self) -> Option<DeviceKind> {
        if self.null_device_requested {
            Some(DeviceKind::NullPlaceholder)
        } else if self.stub_emulator_requested {
            Some(DeviceKind::Emulator)
        } else if self.tcp_device_requested {
            Some(DeviceKind::TcpNetworked)
        } else {
            None
        }
    }

    /// Whether `serial` satisfies the include/exclude membership rules.
    /// Empty `serial_includes` means "any except excludes".
    pub fn matches_serial(&self, serial: &str) -> bool {
        if self.serial_excludes.contains(serial) {
            return false;
        }
        self.serial_includes.is_empty() || self.serial_includes.contains(serial)
    }

    /// Full match against a candidate device's attributes. `properties` is
    /// the candidate's cached `getprop` snapshot, used for `extra_properties`.
    pub fn matches(
        &self,
        serial: &str,
        kind: DeviceKind,
        battery: Option<u32>,
        product_type: Option<&str>,
        properties: &HashMap<String, String>,
    ) -> bool {
        if !self.matches_serial(serial) {
            return false;
        }

        if let Some(requested) = self.requested_placeholder_kind() {
            if kind != requested {
                return false;
            }
        }

        if let Some(min) = self.min_battery {
            match battery {
                Some(level) if level >= min => {}
                _ => return false,
            }
        }

        if let Some(wanted) = &self.product_type {
            if product_type != Some(wanted.as_str()) {
                return false;
            }
        }

        for (key, expected) in &self.extra_properties {
            if properties.get(key).map(|v| v.as_str()) != Some(expected.as_str()) {
                return false;
            }
        }

        true
    }

    /// Whether `kind`/`state` combination is even eligible to be scanned
    /// (a device must be Available to satisfy any Allocate).
    pub fn eligible_allocation_state(state: DeviceState) -> bool {
        state == DeviceState::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_matches_anything_not_excluded() {
        let selector = Selector::new().excluding_serial("bad1");
        assert!(selector.matches("good1", DeviceKind::Physical, None, None, &HashMap::new()));
        assert!(!selector.matches("bad1", DeviceKind::Physical, None, None, &HashMap::new()));
    }

    #[test]
    fn serial_include_is_exact_membership() {
        let selector = Selector::new().with_serial("emulator-5554");
        assert!(selector.matches_serial("emulator-5554"));
        assert!(!selector.matches_serial("emulator-5556"));
    }

    #[test]
    fn min_battery_rejects_unreadable_or_low() {
        let selector = Selector::new().with_min_battery(50);
        assert!(selector.matches("s1", DeviceKind::Physical, Some(80), None, &HashMap::new()));
        assert!(!selector.matches("s1", DeviceKind::Physical, Some(10), None, &HashMap::new()));
        assert!(!selector.matches("s1", DeviceKind::Physical, None, None, &HashMap::new()));
    }

    #[test]
    fn extra_properties_must_all_match() {
        let selector = Selector::new().with_property("ro.build.type", "userdebug");
        let mut props = HashMap::new();
        props.insert("ro.build.type".to_string(), "userdebug".to_string());
        assert!(selector.matches("s1", DeviceKind::Physical, None, None, &props));
        props.insert("ro.build.type".to_string(), "user".to_string());
        assert!(!selector.matches("s1", DeviceKind::Physical, None, None, &props));
    }

    #[test]
    fn placeholder_kind_request_filters_out_other_kinds() {
        let selector = Selector::new().requesting_null_device();
        assert_eq!(selector.requested_placeholder_kind(), Some(DeviceKind::NullPlaceholder));
        assert!(!selector.matches("s1", DeviceKind::Physical, None, None, &HashMap::new()));
        assert!(selector.matches("s1", DeviceKind::NullPlaceholder, None, None, &HashMap::new()));
    }

    #[test]
    fn stub_emulator_request_synthesizes_emulator_kind() {
        let selector = Selector::new().requesting_stub_emulator();
        assert_eq!(selector.requested_placeholder_kind(), Some(DeviceKind::Emulator));
    }
}
