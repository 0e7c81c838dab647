//! Chaos injector (§4.8). Per-tool fault injection, mutable only through an
//! admin endpoint. The probability is evaluated exactly once per call.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaosMode {
    Timeout,
    Error500,
    Jitter,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChaosSetting {
    pub mode: ChaosMode,
    pub probability_percent: u8,
}

/// What happened when the coin was flipped for a given call.
#[derive(Debug, Clone)]
pub enum ChaosOutcome {
    /// No injection this call; proceed normally.
    Proceed,
    /// Delay `after` then fail with `chaos_timeout`.
    Timeout { after: Duration },
    /// Fail immediately with `chaos_500`.
    Error500,
    /// Delay `for_` then proceed with the real call.
    Jitter { for_: Duration },
}

const TIMEOUT_DELAY: Duration = Duration::from_secs(10);
const JITTER_MIN_SECS: u64 = 1;
const JITTER_MAX_SECS: u64 = 6;

/// Read-mostly map of per-tool chaos settings guarded by an rw-lock;
/// updates are single-writer (§5).
pub struct ChaosInjector {
    settings: RwLock<HashMap<String, ChaosSetting>>,
}

impl ChaosInjector {
    pub fn new() -> Self {
        Self {
            settings: RwLock::new(HashMap::new()),
        }
    }

    pub fn configure(&self, tool: impl Into<String>, setting: ChaosSetting) {
        self.settings
            .write()
            .expect("chaos settings lock poisoned")
            .insert(tool.into(), setting);
    }

    pub fn clear(&self, tool: &str) {
        self.settings
            .write()
            .expect("chaos settings lock poisoned")
            .remove(tool);
    }

    pub fn get(&self, tool: &str) -> Option<ChaosSetting> {
        self.settings
            .read()
            .expect("chaos settings lock poisoned")
            .get(tool)
            .copied()
    }

    pub fn list(&self) -> HashMap<String, ChaosSetting> {
        self.settings
            .read()
            .expect("chaos settings lock poisoned")
            .clone()
    }

    /// Flips the biased coin for `tool` once and decides the outcome.
    pub fn roll(&self, tool: &str) -> ChaosOutcome {
        let Some(setting) = self.get(tool) else {
            return ChaosOutcome::Proceed;
        };
        let roll = rand::rng().random_range(0..100);
        if roll >= setting.probability_percent as u32 {
            return ChaosOutcome::Proceed;
        }
        match setting.mode {
            ChaosMode::Timeout => ChaosOutcome::Timeout { after: TIMEOUT_DELAY },
            ChaosMode::Error500 => ChaosOutcome::Error500,
            ChaosMode::Jitter => {
                let secs = rand::rng().random_range(JITTER_MIN_SECS..=JITTER_MAX_SECS);
                ChaosOutcome::Jitter {
                    for_: Duration::from_secs(secs),
                }
            }
        }
    }
}

impl Default for ChaosInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_tool_always_proceeds() {
        let injector = ChaosInjector::new();
        assert!(matches!(injector.roll("search"), ChaosOutcome::Proceed));
    }

    #[test]
    fn hundred_percent_probability_always_injects() {
        let injector = ChaosInjector::new();
        injector.configure(
            "search",
            ChaosSetting {
                mode: ChaosMode::Error500,
                probability_percent: 100,
            },
        );
        assert!(matches!(injector.roll("search"), ChaosOutcome::Error500));
    }

    #[test]
    fn zero_percent_probability_never_injects() {
        let injector = ChaosInjector::new();
        injector.configure(
            "search",
            ChaosSetting {
                mode: ChaosMode::Timeout,
                probability_percent: 0,
            },
        );
        for _ in 0..50 {
            assert!(matches!(injector.roll("search"), ChaosOutcome::Proceed));
        }
    }

    #[test]
    fn clear_removes_configured_setting() {
        let injector = ChaosInjector::new();
        injector.configure(
            "chat",
            ChaosSetting {
                mode: ChaosMode::Jitter,
                probability_percent: 100,
            },
        );
        injector.clear("chat");
        assert!(injector.get("chat").is_none());
    }
}
