// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::conditions::{READY, TRUE};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    /// One of True, False or Unknown
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Insert or update the Ready condition. The transition time only moves when the status flips.
pub fn set_ready_condition(
    conditions: &mut Vec<Condition>,
    status: &str,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    let message = message.into();
    if let Some(c) = conditions.iter_mut().find(|c| c.condition_type == READY) {
        if c.status != status {
            c.status = status.to_string();
            c.last_transition_time = Some(now);
        }
        c.reason = Some(reason.to_string());
        c.message = Some(message);
    } else {
        conditions.push(Condition {
            condition_type: READY.to_string(),
            status: status.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message),
            last_transition_time: Some(now),
        });
    }
}

pub fn find_ready_condition(conditions: &[Condition]) -> Option<&Condition> {
    conditions.iter().find(|c| c.condition_type == READY)
}

pub fn is_ready(conditions: &[Condition]) -> bool {
    find_ready_condition(conditions).is_some_and(|c| c.status == TRUE)
}
