use serde::Deserialize;

use crate::dedup::DedupCache;

pub struct AppState {
    pub http: reqwest::Client,
    pub dedup: DedupCache,
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub lark_app_id: String,
    pub lark_app_secret: String,
    pub lark_notify_chat_id: Option<String>,
    pub attio_api_key: String,
}

/// Attio webhook envelope. Every field defaults so a partial payload
/// deserializes instead of bouncing the delivery.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttioWebhook {
    #[serde(default)]
    pub events: Vec<AttioEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttioEvent {
    #[serde(default)]
    pub id: AttioEventId,
    #[serde(default)]
    pub event_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttioEventId {
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub record_id: String,
}

#[derive(Debug, Clone)]
pub struct ContactFields {
    pub name: String,
    pub company: String,
    pub email: String,
}
