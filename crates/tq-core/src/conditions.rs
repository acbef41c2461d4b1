//! Platform conditions that gate uploads.
//!
//! An upload may start only when the network is reachable and the device is
//! either charging or above the low-battery threshold.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Power state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryState {
    pub charging: bool,
    /// Charge in `0.0..=1.0`.
    pub level: f64,
}

impl BatteryState {
    /// Mains powered, no battery to protect.
    pub const MAINS: BatteryState = BatteryState {
        charging: true,
        level: 1.0,
    };
}

/// Source of platform conditions.
pub trait ConditionsProvider: Send + Sync {
    fn is_network_reachable(&self) -> bool;
    fn battery_state(&self) -> BatteryState;
}

/// One evaluation of the upload conditions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConditionsCheck {
    pub network_reachable: bool,
    pub battery: BatteryState,
    pub allowed: bool,
}

impl ConditionsCheck {
    pub fn evaluate(provider: &dyn ConditionsProvider, low_battery_threshold: f64) -> Self {
        let network_reachable = provider.is_network_reachable();
        let battery = provider.battery_state();
        let power_ok = battery.charging || battery.level > low_battery_threshold;
        ConditionsCheck {
            network_reachable,
            battery,
            allowed: network_reachable && power_ok,
        }
    }

    /// Short description of what is blocking uploads, if anything.
    pub fn blocker(&self) -> Option<&'static str> {
        if !self.network_reachable {
            Some("network unreachable")
        } else if !self.allowed {
            Some("battery low")
        } else {
            None
        }
    }
}

/// Fixed answers, adjustable at runtime.
///
/// For servers that are always online and on mains, and for tests.
#[derive(Debug)]
pub struct StaticConditions {
    reachable: AtomicBool,
    charging: AtomicBool,
    level_bits: AtomicU64,
}

impl StaticConditions {
    pub fn new(reachable: bool, battery: BatteryState) -> Self {
        StaticConditions {
            reachable: AtomicBool::new(reachable),
            charging: AtomicBool::new(battery.charging),
            level_bits: AtomicU64::new(battery.level.to_bits()),
        }
    }

    /// Online and on mains.
    pub fn always() -> Self {
        Self::new(true, BatteryState::MAINS)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    pub fn set_battery(&self, battery: BatteryState) {
        self.charging.store(battery.charging, Ordering::Release);
        self.level_bits
            .store(battery.level.to_bits(), Ordering::Release);
    }
}

impl Default for StaticConditions {
    fn default() -> Self {
        Self::always()
    }
}

impl ConditionsProvider for StaticConditions {
    fn is_network_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    fn battery_state(&self) -> BatteryState {
        BatteryState {
            charging: self.charging.load(Ordering::Acquire),
            level: f64::from_bits(self.level_bits.load(Ordering::Acquire)),
        }
    }
}

/// Linux conditions read from sysfs.
///
/// - Battery: the first `power_supply` entry of type `Battery`; `status` of
///   `Charging` or `Full` counts as charging, `capacity` is a percentage.
///   An online `Mains` supply also counts as charging.
/// - Network: any interface other than `lo` whose `operstate` is `up`.
///
/// A missing sysfs tree reads as reachable and on mains, leaving the
/// transport to report real failures.
#[derive(Debug, Clone)]
pub struct SysfsConditions {
    root: PathBuf,
}

impl SysfsConditions {
    pub fn new() -> Self {
        Self::with_root("/sys/class")
    }

    /// Read from an alternate `class` directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        SysfsConditions { root: root.into() }
    }
}

impl Default for SysfsConditions {
    fn default() -> Self {
        Self::new()
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let v = raw.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

impl ConditionsProvider for SysfsConditions {
    fn is_network_reachable(&self) -> bool {
        let Ok(entries) = std::fs::read_dir(self.root.join("net")) else {
            return true;
        };

        entries.flatten().any(|entry| {
            entry.file_name() != "lo"
                && read_trimmed(&entry.path().join("operstate")).as_deref() == Some("up")
        })
    }

    fn battery_state(&self) -> BatteryState {
        let Ok(entries) = std::fs::read_dir(self.root.join("power_supply")) else {
            return BatteryState::MAINS;
        };

        let mut mains_online = false;
        let mut battery = None;
        let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        dirs.sort();

        for dir in dirs {
            match read_trimmed(&dir.join("type")).as_deref() {
                Some("Mains") | Some("USB") => {
                    if read_trimmed(&dir.join("online")).as_deref() == Some("1") {
                        mains_online = true;
                    }
                }
                Some("Battery") if battery.is_none() => {
                    let status = read_trimmed(&dir.join("status"));
                    let charging = matches!(status.as_deref(), Some("Charging") | Some("Full"));
                    let level = read_trimmed(&dir.join("capacity"))
                        .and_then(|c| c.parse::<f64>().ok())
                        .map(|pct| (pct / 100.0).clamp(0.0, 1.0))
                        .unwrap_or(1.0);
                    battery = Some(BatteryState { charging, level });
                }
                _ => {}
            }
        }

        match battery {
            Some(state) => BatteryState {
                charging: state.charging || mains_online,
                level: state.level,
            },
            None => BatteryState::MAINS,
        }
    }
}
