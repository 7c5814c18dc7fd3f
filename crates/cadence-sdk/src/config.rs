// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Whole-runtime configuration, loadable from JSON.

use anyhow::{Context, Result};
use cadence_control::{BudgetConfig, LifecycleConfig};
use cadence_core::ConfigError;
use cadence_telemetry::TelemetryConfig;
use cadence_workers::DispatcherConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete runtime configuration. Missing sections and fields take their
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Frame budget and rebalancing policy.
    pub budget: BudgetConfig,
    /// Worker pool.
    pub dispatcher: DispatcherConfig,
    /// Lifecycle and shutdown.
    pub lifecycle: LifecycleConfig,
    /// Logging and telemetry sink.
    pub telemetry: TelemetryConfig,
}

impl RuntimeConfig {
    /// Load the configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load the configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Save the configuration to a JSON file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.budget.validate()?;
        if self.dispatcher.worker_count == 0 {
            return Err(ConfigError::NotPositive {
                field: "worker_count",
                value: 0.0,
            });
        }
        if self.dispatcher.max_pending == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_pending",
                value: 0.0,
            });
        }
        Ok(())
    }
}
