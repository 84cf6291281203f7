pub mod channels;
pub mod config;
pub mod contacts;
pub mod conversations;
pub mod db;
pub mod error;
pub mod ingest;
pub mod messages;
pub mod query;
pub mod signature;
pub mod types;

pub use config::Config;
pub use error::{InboxError, InboxResult};

use self::channels::{build_registry, AdapterRegistry, ChannelAdapter};
use self::config::{load_config, resolve_database_url};
use self::db::DbKind;
use self::ingest::{process_payload, DeliveryOutcome};
use self::messages::{get_message_by_provider_id, record_outbound, IngestOutcome};
use self::query::Page;
use self::signature::{tokens_match, SIGNATURE_HEADER};
use self::types::{Channel, ConversationDetail, ConversationSummary, Message};

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::AnyPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const AUTH_HEADER: &str = "X-Channel-Inbox-Token";

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: AnyPool,
    pub http: reqwest::Client,
    pub db_kind: DbKind,
    pub adapters: Arc<AdapterRegistry>,
}

impl AppState {
    pub fn new(config: Config, pool: AnyPool, db_kind: DbKind) -> Self {
        let adapters = Arc::new(build_registry(&config.channels));
        Self {
            config,
            pool,
            http: reqwest::Client::new(),
            db_kind,
            adapters,
        }
    }

    fn adapter(&self, channel: Channel) -> InboxResult<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned().ok_or(InboxError::NotFound)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HubQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub channel: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListQuery {
    fn channel(&self) -> InboxResult<Option<Channel>> {
        self.channel
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(|c| c.parse::<Channel>().map_err(InboxError::BadRequest))
            .transpose()
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub provider_message_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub contacts: i64,
    pub conversations: i64,
    pub messages: i64,
}

/// Connects the configured store and ensures the schema exists.
pub async fn connect_store(config: &Config) -> anyhow::Result<(AnyPool, DbKind)> {
    sqlx::any::install_default_drivers();

    let db_url = resolve_database_url(config);
    let db_kind = db::db_kind_from_url(&db_url);
    let pool = AnyPool::connect(&db_url).await?;
    db::init_db(&pool, db_kind).await?;
    Ok((pool, db_kind))
}

pub async fn create_app() -> anyhow::Result<(AppState, Router)> {
    let config = load_config();
    let (pool, db_kind) = connect_store(&config).await?;
    let state = AppState::new(config, pool, db_kind);

    for channel in state.adapters.keys() {
        info!(%channel, "channel enabled");
    }

    let app = build_router(state.clone());
    Ok((state, app))
}

/// Webhook routes exist only for enabled channels; any other channel path
/// falls through to 404.
pub fn build_router(state: AppState) -> Router {
    let authed_routes = Router::new()
        .route("/v1/conversations", get(list_conversations))
        .route("/v1/conversations/:id", get(get_conversation))
        .route("/v1/conversations/:id/messages", post(send_message))
        .route("/v1/messages", get(list_messages))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let mut public_routes = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status));

    for (channel, adapter) in state.adapters.iter() {
        let channel = *channel;
        public_routes = public_routes.route(
            &adapter.config().route_path(channel),
            get(move |State(state): State<AppState>, Query(hub): Query<HubQuery>| {
                webhook_handshake(state, channel, hub)
            })
            .post(
                move |State(state): State<AppState>, headers: HeaderMap, body: Bytes| {
                    webhook_delivery(state, channel, headers, body)
                },
            ),
        );
    }

    Router::new()
        .merge(authed_routes)
        .merge(public_routes)
        .with_state(state)
}

async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.auth.token.as_deref().filter(|t| !t.is_empty()) else {
        warn!("read surface called with no auth token configured");
        return InboxError::Unauthorized.into_response();
    };
    let provided = req
        .headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !tokens_match(expected, provided) {
        return InboxError::Unauthorized.into_response();
    }
    next.run(req).await
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn status(State(state): State<AppState>) -> InboxResult<Json<StatusResponse>> {
    Ok(Json(StatusResponse {
        contacts: db::count_rows(&state.pool, "contacts").await?,
        conversations: db::count_rows(&state.pool, "conversations").await?,
        messages: db::count_rows(&state.pool, "messages").await?,
    }))
}

async fn webhook_handshake(state: AppState, channel: Channel, hub: HubQuery) -> Response {
    let adapter = match state.adapter(channel) {
        Ok(adapter) => adapter,
        Err(err) => return err.into_response(),
    };
    match adapter.verify_handshake(
        hub.mode.as_deref(),
        hub.verify_token.as_deref(),
        hub.challenge.as_deref(),
    ) {
        Some(challenge) => {
            info!(%channel, "webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        None => {
            warn!(%channel, mode = ?hub.mode, "webhook handshake rejected");
            InboxError::Forbidden.into_response()
        }
    }
}

async fn webhook_delivery(
    state: AppState,
    channel: Channel,
    headers: HeaderMap,
    body: Bytes,
) -> InboxResult<Json<Value>> {
    let adapter = state.adapter(channel)?;
    let timeout_ms = state.config.webhook.timeout_ms;

    let outcome = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        handle_delivery(&state, adapter.as_ref(), &headers, &body),
    )
    .await
    .map_err(|_| {
        warn!(%channel, timeout_ms, "webhook processing timed out");
        InboxError::Timeout(timeout_ms)
    })??;

    match outcome {
        DeliveryOutcome::Stored(message) => {
            debug!(%channel, message_id = %message.id, "delivery stored")
        }
        DeliveryOutcome::Duplicate => debug!(%channel, "delivery already ingested"),
        DeliveryOutcome::Ignored { receipts_applied } => {
            debug!(%channel, receipts_applied, "delivery ignored")
        }
    }
    Ok(Json(json!({ "success": true })))
}

/// Signature first, then parse, then persist. A body that fails the
/// signature check is never parsed.
async fn handle_delivery(
    state: &AppState,
    adapter: &dyn ChannelAdapter,
    headers: &HeaderMap,
    body: &[u8],
) -> InboxResult<DeliveryOutcome> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if !adapter.verify_signature(body, header) {
        warn!(
            channel = %adapter.channel(),
            has_header = header.is_some(),
            "rejected webhook with invalid signature"
        );
        return Err(InboxError::Unauthorized);
    }

    let payload: Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(err) => {
            debug!(channel = %adapter.channel(), "unparsable webhook body: {err}");
            return Ok(DeliveryOutcome::Ignored { receipts_applied: 0 });
        }
    };

    process_payload(&state.pool, state.db_kind, adapter, &payload).await
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> InboxResult<Json<Vec<ConversationSummary>>> {
    let channel = params.channel()?;
    let page = Page::bounded(params.limit, params.offset, state.config.query.page_size);
    let conversations =
        query::list_conversations(&state.pool, state.db_kind, channel, page).await?;
    Ok(Json(conversations))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> InboxResult<Json<ConversationDetail>> {
    let detail = query::get_conversation(&state.pool, state.db_kind, &id).await?;
    Ok(Json(detail))
}

async fn list_messages(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> InboxResult<Json<Vec<Message>>> {
    let channel = params.channel()?;
    let page = Page::bounded(params.limit, params.offset, state.config.query.page_size);
    let messages = query::list_recent_messages(&state.pool, state.db_kind, channel, page).await?;
    Ok(Json(messages))
}

/// Sends through the conversation's channel, then records the OUTBOUND
/// message. Nothing is stored when the provider rejects the send.
async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> InboxResult<Json<SendMessageResponse>> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(InboxError::BadRequest("text is required".to_string()));
    }

    let conversation = conversations::get_conversation_record(&state.pool, state.db_kind, &id)
        .await?
        .ok_or(InboxError::NotFound)?;
    let contact = contacts::get_contact(&state.pool, state.db_kind, &conversation.contact_id)
        .await?
        .ok_or(InboxError::NotFound)?;
    let adapter = state.adapter(conversation.channel)?;

    let provider_message_id = adapter
        .send_text(&state.http, &contact.external_id, text)
        .await?;
    let sender_id = adapter.config().business_id.clone().unwrap_or_default();

    let stored = record_outbound(
        &state.pool,
        state.db_kind,
        &conversation,
        &provider_message_id,
        &sender_id,
        &contact.external_id,
        text,
        Utc::now(),
    )
    .await?;
    let message_id = match stored {
        IngestOutcome::Created(message) => message.id,
        IngestOutcome::AlreadyExists => get_message_by_provider_id(
            &state.pool,
            state.db_kind,
            conversation.channel,
            &provider_message_id,
        )
        .await?
        .map(|message| message.id)
        .ok_or(InboxError::NotFound)?,
    };

    Ok(Json(SendMessageResponse {
        message_id,
        provider_message_id,
        status: "sent".to_string(),
    }))
}
