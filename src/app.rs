use std::{
    env,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::dedup::DedupCache;
use crate::extract::{company_field, display_email, display_name, CompanyField, NO_EMAIL, UNKNOWN};
use crate::types::{AppState, AttioEvent, AttioWebhook, ContactFields};

const LARK_TOKEN_URL: &str =
    "https://open.larksuite.com/open-apis/auth/v3/tenant_access_token/internal";
const LARK_MESSAGE_URL: &str =
    "https://open.larksuite.com/open-apis/im/v1/messages?receive_id_type=chat_id";
const ATTIO_API_BASE: &str = "https://api.attio.com/v2";
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant inside Lark chat. Reply naturally but concisely.";
const CHAT_MAX_TOKENS: u32 = 300;

/// Lark tenant tokens expire within hours, so a fresh one is fetched for
/// every send instead of being cached.
async fn get_tenant_token(state: &Arc<AppState>) -> Result<String, String> {
    let response = state
        .http
        .post(LARK_TOKEN_URL)
        .json(&json!({
            "app_id": state.lark_app_id,
            "app_secret": state.lark_app_secret,
        }))
        .send()
        .await
        .map_err(|err| format!("token request failed: {err}"))?;
    let payload = response
        .json::<Value>()
        .await
        .map_err(|err| format!("token parse failed: {err}"))?;
    match payload.get("tenant_access_token").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(format!("token response missing tenant_access_token: {payload}")),
    }
}

/// Sends a plain-text message to a Lark chat. A missing chat id is a no-op
/// with a warning; delivery failures are logged and dropped.
async fn send_lark_message(state: &Arc<AppState>, chat_id: Option<&str>, text: &str) {
    let Some(chat_id) = chat_id.map(str::trim).filter(|id| !id.is_empty()) else {
        eprintln!("[lark] send requested without a chat id, skipping");
        return;
    };

    if let Err(err) = deliver_lark_message(state, chat_id, text).await {
        eprintln!("[lark] send error: {err}");
    }
}

async fn deliver_lark_message(
    state: &Arc<AppState>,
    chat_id: &str,
    text: &str,
) -> Result<(), String> {
    let token = get_tenant_token(state).await?;

    // Lark wants the message content as a JSON-encoded string, not an object.
    let content = serde_json::to_string(&json!({ "text": text })).unwrap_or_default();
    let response = state
        .http
        .post(LARK_MESSAGE_URL)
        .bearer_auth(token)
        .json(&json!({
            "receive_id": chat_id,
            "msg_type": "text",
            "content": content,
        }))
        .send()
        .await
        .map_err(|err| format!("message send failed: {err}"))?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("message send returned {status}: {body}"));
    }
    Ok(())
}

async fn claude_reply(state: &Arc<AppState>, user_text: &str) -> Result<String, String> {
    if state.anthropic_api_key.trim().is_empty() {
        return Err("ANTHROPIC_API_KEY not configured".to_string());
    }
    let response = state
        .http
        .post(ANTHROPIC_MESSAGES_URL)
        .header("x-api-key", &state.anthropic_api_key)
        .header("anthropic-version", "2023-06-01")
        .json(&json!({
            "model": state.anthropic_model,
            "max_tokens": CHAT_MAX_TOKENS,
            "system": CHAT_SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": user_text }],
        }))
        .send()
        .await
        .map_err(|err| format!("anthropic request failed: {err}"))?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("anthropic returned {status}: {body}"));
    }
    let payload = response
        .json::<Value>()
        .await
        .map_err(|err| format!("anthropic parse failed: {err}"))?;
    let text = payload
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| blocks.first())
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    if text.is_empty() {
        return Err("anthropic response had empty content".to_string());
    }
    Ok(text)
}

/// Detached chat-bot flow: the inbound webhook has already been acknowledged
/// by the time this runs, so every failure here is log-and-stop.
async fn handle_lark_message(state: Arc<AppState>, body: Value) {
    let Some(message) = body.get("event").and_then(|event| event.get("message")) else {
        return;
    };
    let chat_id = message
        .get("chat_id")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    // The message content is itself a JSON string holding the text.
    let user_text = message
        .get("content")
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|content| {
            content
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();
    if user_text.trim().is_empty() {
        eprintln!("[lark] message event without text content, skipping");
        return;
    }

    eprintln!("[lark] received message: {user_text} | chat_id: {chat_id}");

    match claude_reply(&state, &user_text).await {
        Ok(reply) => send_lark_message(&state, Some(&chat_id), &reply).await,
        Err(err) => eprintln!("[claude] completion failed: {err}"),
    }
}

/// Fetches a record and returns its `data` object.
async fn fetch_attio_record(
    state: &Arc<AppState>,
    object: &str,
    record_id: &str,
) -> Result<Value, String> {
    let url = format!("{ATTIO_API_BASE}/objects/{object}/records/{record_id}");
    let response = state
        .http
        .get(&url)
        .bearer_auth(&state.attio_api_key)
        .send()
        .await
        .map_err(|err| format!("record fetch failed: {err}"))?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("record fetch returned {status}: {body}"));
    }
    let payload = response
        .json::<Value>()
        .await
        .map_err(|err| format!("record parse failed: {err}"))?;
    payload
        .get("data")
        .cloned()
        .ok_or_else(|| format!("record response missing data: {payload}"))
}

/// Resolves the three display fields from a record's `values`, including the
/// secondary fetch when the company field references another record. A failed
/// company lookup degrades to "Unknown" so the notification still goes out.
async fn resolve_contact_fields(state: &Arc<AppState>, values: &Value) -> ContactFields {
    let name = display_name(values).unwrap_or_else(|| UNKNOWN.to_string());
    let email = display_email(values).unwrap_or_else(|| NO_EMAIL.to_string());
    let company = match company_field(values) {
        CompanyField::Inline(value) => value,
        CompanyField::Reference { object, record_id } => {
            match fetch_attio_record(state, &object, &record_id).await {
                Ok(record) => display_name(record.get("values").unwrap_or(&Value::Null))
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                Err(err) => {
                    eprintln!("[attio] company lookup failed: {err}");
                    UNKNOWN.to_string()
                }
            }
        }
        CompanyField::Absent => UNKNOWN.to_string(),
    };
    ContactFields { name, company, email }
}

/// Detached CRM-notification flow for one deduplicated webhook event.
async fn handle_attio_event(state: Arc<AppState>, event: AttioEvent) {
    let record = match fetch_attio_record(&state, &event.id.object_id, &event.id.record_id).await
    {
        Ok(record) => record,
        Err(err) => {
            eprintln!("[attio] record {} fetch failed: {err}", event.id.record_id);
            return;
        }
    };

    let values = record.get("values").cloned().unwrap_or(Value::Null);
    let fields = resolve_contact_fields(&state, &values).await;

    let message = format!(
        "📇 New Contact Added to Attio\n\nName: {}\nCompany: {}\nEmail: {}",
        fields.name, fields.company, fields.email
    );
    send_lark_message(&state, state.lark_notify_chat_id.as_deref(), &message).await;
}

/// Runs every webhook event through the dedup cache with one shared `now`,
/// keeping only the events that should trigger a notification.
async fn accept_events(
    cache: &DedupCache,
    events: Vec<AttioEvent>,
    now: Instant,
) -> Vec<AttioEvent> {
    let mut accepted = Vec::new();
    for event in events {
        if event.id.record_id.is_empty() {
            eprintln!("[attio] event without a record id, skipping");
            continue;
        }
        if cache.check_and_mark(&event.id.record_id, now).await {
            eprintln!(
                "[attio] duplicate {} event for record {}, suppressed",
                event.event_type, event.id.record_id
            );
            continue;
        }
        accepted.push(event);
    }
    accepted
}

/// Main Lark webhook. Lark retries unless it gets a fast 200, so the
/// response never waits on (or reflects) downstream work.
async fn lark_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Value> {
    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => payload,
        Err(err) => {
            eprintln!("[lark] unreadable webhook body: {err}");
            return Json(json!({}));
        }
    };

    // URL verification handshake
    if payload.get("type").and_then(Value::as_str) == Some("url_verification") {
        let challenge = payload.get("challenge").and_then(Value::as_str).unwrap_or("");
        return Json(json!({ "challenge": challenge }));
    }

    if payload
        .get("event")
        .and_then(|event| event.get("message"))
        .is_some()
    {
        tokio::spawn(handle_lark_message(state, payload));
    }

    Json(json!({}))
}

async fn attio_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    let payload = match serde_json::from_slice::<AttioWebhook>(&body) {
        Ok(payload) => payload,
        Err(err) => {
            eprintln!("[attio] unreadable webhook body: {err}");
            AttioWebhook::default()
        }
    };

    let accepted = accept_events(&state.dedup, payload.events, Instant::now()).await;
    for event in accepted {
        eprintln!(
            "[attio] {} event for record {}",
            event.event_type, event.id.record_id
        );
        tokio::spawn(handle_attio_event(state.clone(), event));
    }

    StatusCode::OK
}

async fn health() -> impl IntoResponse {
    "Server running ✅"
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health).post(lark_webhook))
        .route("/attio-webhook", post(attio_webhook))
        .with_state(state)
}

pub async fn run() {
    let _ = dotenvy::dotenv();

    let port = env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);
    let window_ms = env::var("DEDUP_WINDOW_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5000);
    let notify_chat_id = env::var("LARK_NOTIFY_CHAT_ID")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if notify_chat_id.is_none() {
        eprintln!("[attio] LARK_NOTIFY_CHAT_ID not set, contact notifications are disabled");
    }

    let state = Arc::new(AppState {
        http: reqwest::Client::new(),
        dedup: DedupCache::new(Duration::from_millis(window_ms)),
        anthropic_api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
        anthropic_model: env::var("ANTHROPIC_MODEL")
            .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
        lark_app_id: env::var("LARK_APP_ID").unwrap_or_default(),
        lark_app_secret: env::var("LARK_APP_SECRET").unwrap_or_default(),
        lark_notify_chat_id: notify_chat_id,
        attio_api_key: env::var("ATTIO_API_KEY").unwrap_or_default(),
    });

    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    println!("server running on port {port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}
