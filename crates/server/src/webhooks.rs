//! Telephony webhook and operational routes.
//!
//! - `GET|POST /answer`             new or redelivered call
//! - `GET|POST /process-recording`  one recorded caller turn
//! - `GET|POST /recording-status`   vendor recording lifecycle (log only)
//! - `GET /dead-letters?limit=N`    newest failed events
//! - `GET /`                        service info
//!
//! Vendors disagree on field names and on GET vs POST; both are accepted and
//! POST bodies are merged over the query string. A POST whose body is not a
//! form (no content type, JSON, garbage) is served from the query string alone.

use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use callflow_core::errors::ApplicationError;
use callflow_core::{DeadLetterEntry, SessionId};
use callflow_db::repositories::DEFAULT_DEAD_LETTER_PAGE;
use callflow_db::{DeadLetterRepository, RepositoryError};

use crate::orchestrator::{CallEvent, CallOrchestrator, CallReply};

#[derive(Clone)]
pub struct WebhookState {
    orchestrator: Arc<CallOrchestrator>,
    provider: &'static str,
}

impl WebhookState {
    pub fn new(orchestrator: Arc<CallOrchestrator>, provider: &'static str) -> Self {
        Self { orchestrator, provider }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookParams {
    #[serde(rename = "From", alias = "CallFrom")]
    pub from: Option<String>,
    #[serde(rename = "To", alias = "CallTo")]
    pub to: Option<String>,
    #[serde(rename = "CallSid", alias = "CallId", alias = "CallUUID")]
    pub call_id: Option<String>,
    #[serde(rename = "RecordingUrl", alias = "recording_url", alias = "RecordUrl")]
    pub recording_url: Option<String>,
    #[serde(rename = "RecordingStatus")]
    pub recording_status: Option<String>,
    #[serde(rename = "RecordingDuration")]
    pub recording_duration: Option<String>,
    pub session_id: Option<String>,
}

impl WebhookParams {
    /// Fields present in `other` win.
    fn merge(self, other: Self) -> Self {
        Self {
            from: other.from.or(self.from),
            to: other.to.or(self.to),
            call_id: other.call_id.or(self.call_id),
            recording_url: other.recording_url.or(self.recording_url),
            recording_status: other.recording_status.or(self.recording_status),
            recording_duration: other.recording_duration.or(self.recording_duration),
            session_id: other.session_id.or(self.session_id),
        }
    }

    fn into_event(self) -> CallEvent {
        CallEvent {
            call_id: present(self.call_id),
            caller_id: present(self.from).unwrap_or_default(),
            callee_id: present(self.to).unwrap_or_default(),
            session_id: present(self.session_id).map(SessionId),
            recording_url: present(self.recording_url),
            recording_status: present(self.recording_status),
            recording_duration: present(self.recording_duration),
        }
    }
}

fn form_or_default(form: Result<Form<WebhookParams>, FormRejection>) -> WebhookParams {
    match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            warn!(
                event_name = "webhook.form_ignored",
                status = rejection.status().as_u16(),
                reason = %rejection.body_text(),
                "POST body was not a usable form, reading the query string only"
            );
            WebhookParams::default()
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterPage {
    pub count: usize,
    pub entries: Vec<DeadLetterEntry>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/answer", get(answer_get).post(answer_post))
        .route("/process-recording", get(process_recording_get).post(process_recording_post))
        .route("/recording-status", get(recording_status_get).post(recording_status_post))
        .route("/dead-letters", get(list_dead_letters))
        .with_state(state)
}

fn vendor_response(reply: CallReply) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, reply.content_type)], reply.body).into_response()
}

async fn answer_get(
    State(state): State<WebhookState>,
    Query(query): Query<WebhookParams>,
) -> Response {
    vendor_response(state.orchestrator.answer(&query.into_event()).await)
}

async fn answer_post(
    State(state): State<WebhookState>,
    Query(query): Query<WebhookParams>,
    form: Result<Form<WebhookParams>, FormRejection>,
) -> Response {
    let params = query.merge(form_or_default(form));
    vendor_response(state.orchestrator.answer(&params.into_event()).await)
}

async fn process_recording_get(
    State(state): State<WebhookState>,
    Query(query): Query<WebhookParams>,
) -> Response {
    vendor_response(state.orchestrator.process_recording(&query.into_event()).await)
}

async fn process_recording_post(
    State(state): State<WebhookState>,
    Query(query): Query<WebhookParams>,
    form: Result<Form<WebhookParams>, FormRejection>,
) -> Response {
    let params = query.merge(form_or_default(form));
    vendor_response(state.orchestrator.process_recording(&params.into_event()).await)
}

async fn recording_status_get(
    State(state): State<WebhookState>,
    Query(query): Query<WebhookParams>,
) -> Response {
    vendor_response(state.orchestrator.recording_status(&query.into_event()).await)
}

async fn recording_status_post(
    State(state): State<WebhookState>,
    Query(query): Query<WebhookParams>,
    form: Result<Form<WebhookParams>, FormRejection>,
) -> Response {
    let params = query.merge(form_or_default(form));
    vendor_response(state.orchestrator.recording_status(&params.into_event()).await)
}

async fn list_dead_letters(
    State(state): State<WebhookState>,
    Query(query): Query<DeadLetterQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LETTER_PAGE);
    match state.orchestrator.dead_letters().list(limit).await {
        Ok(entries) => Json(DeadLetterPage { count: entries.len(), entries }).into_response(),
        Err(error) => {
            let status = match error {
                RepositoryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let interface = ApplicationError::Persistence(error.to_string())
                .into_interface("dead-letters");
            error!(
                event_name = "dead_letter.list_failed",
                correlation_id = interface.correlation_id(),
                error = %interface,
                "could not list dead letters"
            );
            (
                status,
                Json(json!({
                    "error": interface.user_message(),
                    "correlation_id": interface.correlation_id(),
                })),
            )
                .into_response()
        }
    }
}

async fn service_info(State(state): State<WebhookState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "callflow-server",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Automated phone interview service for real estate leads",
        "telephony_provider": state.provider,
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use callflow_db::SessionStore;

    use super::{router, WebhookParams, WebhookState};
    use crate::test_support::{harness, Harness, Script, CALLEE, CALLER};

    fn app(harness: &Harness) -> Router {
        router(WebhookState::new(harness.orchestrator.clone(), "exotel"))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        serde_json::from_slice(&bytes).expect("JSON body")
    }

    #[tokio::test]
    async fn post_answer_reads_form_fields() {
        let harness = harness(Script::default()).await;
        let body = format!(
            "CallSid=CA-POST&From={}&To={}",
            CALLER.replace('+', "%2B"),
            CALLEE.replace('+', "%2B")
        );

        let response = app(&harness)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/answer")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let session =
            harness.sessions.load_by_call("CA-POST").await.expect("load").expect("created");
        assert_eq!(session.caller_id, CALLER);
        assert_eq!(session.callee_id, CALLEE);
        harness.pool.close().await;
    }

    #[tokio::test]
    async fn post_without_form_body_falls_back_to_query() {
        let harness = harness(Script::default()).await;

        let response = app(&harness)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/answer?CallSid=CA-Q&From=%2B919876543210&To=%2B918000000001")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["Exoml"][0]["Play"]["url"], "https://audio.example.com/welcome.wav");
        let session = harness.sessions.load_by_call("CA-Q").await.expect("load").expect("created");
        assert_eq!(session.caller_id, CALLER);
        harness.pool.close().await;
    }

    #[tokio::test]
    async fn post_with_json_body_is_still_answered_from_query() {
        let harness = harness(Script::default()).await;

        let response = app(&harness)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/recording-status?session_id=unknown&RecordingStatus=completed")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"RecordingStatus":"failed"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "Exoml": [] }));
        harness.pool.close().await;
    }

    #[tokio::test]
    async fn get_recording_with_vendor_aliases_reaches_the_session() {
        let harness = harness(Script {
            transcripts: vec!["I am Asha"],
            extractions: vec![vec![("tenant_name", "Asha")]],
            ..Script::default()
        })
        .await;
        let app = app(&harness);
        app.clone()
            .oneshot(
                Request::builder()
                    .uri("/answer?CallUUID=CA-GET&From=%2B919876543210&To=%2B918000000001")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("answer");
        let session =
            harness.sessions.load_by_call("CA-GET").await.expect("load").expect("created");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/process-recording?session_id={}&RecordUrl=https%3A%2F%2Frec.example.com%2F1.wav",
                        session.session_id
                    ))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        let value = body_json(response).await;
        assert_eq!(value["Exoml"][0]["Play"]["url"], "https://audio.example.com/rent_or_buy_en.wav");
        harness.pool.close().await;
    }

    #[tokio::test]
    async fn recording_status_post_is_acknowledged() {
        let harness = harness(Script::default()).await;

        let response = app(&harness)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/recording-status?session_id=abc")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("RecordingStatus=completed&RecordingDuration=4"))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "Exoml": [] }));
        harness.pool.close().await;
    }

    #[tokio::test]
    async fn dead_letters_route_lists_recorded_failures() {
        let harness = harness(Script::default()).await;
        let app = app(&harness);
        app.clone()
            .oneshot(Request::builder().uri("/process-recording?CallSid=CA-DL").body(Body::empty()).expect("request"))
            .await
            .expect("recording without url");

        let response = app
            .oneshot(Request::builder().uri("/dead-letters?limit=5").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["count"], 1);
        assert_eq!(value["entries"][0]["call_id"], "CA-DL");
        assert_eq!(value["entries"][0]["error"], "Invalid or missing recording URL");
        harness.pool.close().await;
    }

    #[tokio::test]
    async fn dead_letters_route_reports_unavailable_store() {
        let harness = harness(Script::default()).await;
        harness.pool.close().await;

        let response = app(&harness)
            .oneshot(Request::builder().uri("/dead-letters").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let value = body_json(response).await;
        assert_eq!(value["correlation_id"], "dead-letters");
    }

    #[tokio::test]
    async fn dead_letters_route_reports_broken_schema_as_internal() {
        let harness = harness(Script::default()).await;
        sqlx::query("DROP TABLE dead_letter").execute(&harness.pool).await.expect("drop");

        let response = app(&harness)
            .oneshot(Request::builder().uri("/dead-letters").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        harness.pool.close().await;
    }

    #[tokio::test]
    async fn service_info_names_the_provider() {
        let harness = harness(Script::default()).await;

        let response = app(&harness)
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        let value = body_json(response).await;
        assert_eq!(value["service"], "callflow-server");
        assert_eq!(value["telephony_provider"], "exotel");
        harness.pool.close().await;
    }

    #[test]
    fn form_fields_override_query_and_blanks_are_dropped() {
        let query = WebhookParams {
            session_id: Some("from-query".to_string()),
            recording_url: Some("https://old.example.com/a.wav".to_string()),
            ..WebhookParams::default()
        };
        let form = WebhookParams {
            recording_url: Some("https://rec.example.com/b.wav".to_string()),
            from: Some("  ".to_string()),
            ..WebhookParams::default()
        };

        let event = query.merge(form).into_event();

        assert_eq!(event.session_id.map(|id| id.0), Some("from-query".to_string()));
        assert_eq!(event.recording_url.as_deref(), Some("https://rec.example.com/b.wav"));
        assert_eq!(event.caller_id, "");
    }
}
