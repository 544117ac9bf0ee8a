// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error reports uploaded to the control plane, spooled locally when the
//! upload fails.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error_type: String,
    pub error_message: String,
    pub error_details: Map<String, Value>,
    pub timestamp: DateTime<Local>,
}

impl ErrorReport {
    /// Build a report, augmenting details with the agent version and an
    /// optional stack string.
    pub fn new(
        error_type: impl Into<String>,
        message: impl Into<String>,
        details: Option<Map<String, Value>>,
        stack_trace: Option<String>,
    ) -> Self {
        let mut error_details = details.unwrap_or_default();
        if let Some(stack) = stack_trace {
            error_details.insert("stack_trace".to_string(), Value::String(stack));
        }
        error_details
            .insert("agent_version".to_string(), Value::String(crate::AGENT_VERSION.to_string()));
        ErrorReport {
            error_type: error_type.into(),
            error_message: message.into(),
            error_details,
            timestamp: Local::now(),
        }
    }

    /// Spool filename: `YYYYMMDD_HHMMSS_<type>_<8 hex>.json`.
    pub fn spool_filename(&self) -> String {
        let stamp = self.timestamp.format("%Y%m%d_%H%M%S");
        let kind = self.error_type.to_lowercase().replace(' ', "_");
        let short_id = &uuid::Uuid::new_v4().simple().to_string()[..8];
        format!("{stamp}_{kind}_{short_id}.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_carry_version_and_stack() {
        let report =
            ErrorReport::new("UpdateDownloadFailed", "boom", None, Some("trace".to_string()));
        assert_eq!(report.error_details["agent_version"], crate::AGENT_VERSION);
        assert_eq!(report.error_details["stack_trace"], "trace");
    }

    #[test]
    fn spool_filename_shape() {
        let report = ErrorReport::new("Update Failed", "boom", None, None);
        let name = report.spool_filename();
        assert!(name.ends_with(".json"));
        assert!(name.contains("_update_failed_"), "got {name}");
        // 15-char timestamp prefix: YYYYMMDD_HHMMSS
        assert_eq!(name.as_bytes()[8], b'_');
    }
}
