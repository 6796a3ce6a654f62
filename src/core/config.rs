//! Unwind generation configuration.
//!
//! The only knob is the diagnostic fake procedure splitting mode: the code
//! generator lays hot and cold code out contiguously, and the root is
//! reported as one undivided hot span so the host's split-aware commit path
//! can be exercised without a real cold allocation. It is honoured in debug
//! builds only, and only when the unit actually has a cold region.

use std::env;

/// Environment variable enabling fake procedure splitting.
pub const FAKE_SPLITTING_ENV: &str = "TPDE_FAKE_PROCEDURE_SPLITTING";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnwindConfig {
    pub fake_procedure_splitting: bool,
}

impl UnwindConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fake_procedure_splitting(mut self, enabled: bool) -> Self {
        self.fake_procedure_splitting = enabled;
        self
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        let fake_procedure_splitting = env::var(FAKE_SPLITTING_ENV)
            .map(|value| parse_flag(&value))
            .unwrap_or(false);

        if fake_procedure_splitting && !cfg!(debug_assertions) {
            log::warn!("{FAKE_SPLITTING_ENV} is ignored in release builds");
        }

        Self { fake_procedure_splitting }
    }

    /// Whether the fake splitting path applies to a unit.
    pub fn fake_splitting_active(&self, has_cold_region: bool) -> bool {
        cfg!(debug_assertions) && self.fake_procedure_splitting && has_cold_region
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
