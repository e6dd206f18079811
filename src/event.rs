//! The ingestion record: one bot reacting to one message.

use crate::error::TelemetryError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Counted under this condition when the caller supplies none
pub const DEFAULT_CONDITION: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Message,
    Reaction,
    Webhook,
    None,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Message => "message",
            ResponseType::Reaction => "reaction",
            ResponseType::Webhook => "webhook",
            ResponseType::None => "none",
        }
    }
}

impl Default for ResponseType {
    fn default() -> Self {
        ResponseType::Message
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotTriggerEvent {
    pub trigger_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub bot_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_name: Option<String>,
    pub user_id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    pub message_id: String,
    #[serde(default)]
    pub response_time_ms: u64,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_success() -> bool {
    true
}

impl BotTriggerEvent {
    /// A successful trigger stamped with a fresh id and the current time
    pub fn new(
        bot_name: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        BotTriggerEvent {
            trigger_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            bot_name: bot_name.into(),
            condition_name: None,
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            guild_id: None,
            message_id: message_id.into(),
            response_time_ms: 0,
            success: true,
            response_type: ResponseType::Message,
            error_message: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_trigger_id(mut self, trigger_id: impl Into<String>) -> Self {
        self.trigger_id = trigger_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = timestamp_ms;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition_name = Some(condition.into());
        self
    }

    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn with_response(mut self, response_time_ms: u64, response_type: ResponseType) -> Self {
        self.response_time_ms = response_time_ms;
        self.response_type = response_type;
        self
    }

    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Effective condition name, `default` when unset or blank
    pub fn condition(&self) -> &str {
        match self.condition_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_CONDITION,
        }
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Reject events that must never reach the aggregation path
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.timestamp <= 0 || self.occurred_at().is_none() {
            return Err(TelemetryError::Validation(format!(
                "trigger {} has malformed timestamp {}",
                self.trigger_id, self.timestamp
            )));
        }

        let required = [
            ("triggerId", &self.trigger_id),
            ("botName", &self.bot_name),
            ("userId", &self.user_id),
            ("channelId", &self.channel_id),
            ("messageId", &self.message_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(TelemetryError::Validation(format!("{field} is required")));
            }
        }
        Ok(())
    }
}
