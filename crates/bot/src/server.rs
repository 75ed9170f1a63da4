//! HTTP surface: the Events API webhook, short URL redirects and linked
//! object downloads.

use std::{path::Path, sync::Arc};

use anyhow::{Context as _, Result};
use axum::{
    Router,
    extract::{Path as UrlPath, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mime::{
    APPLICATION_JSON, APPLICATION_OCTET_STREAM, APPLICATION_PDF, IMAGE_GIF, IMAGE_JPEG, IMAGE_PNG,
    Mime, TEXT_CSV, TEXT_PLAIN_UTF_8,
};
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use plugin_core::{dates, services::RecordTable};

use crate::{
    dispatch::Dispatcher,
    event::{Admission, Gate},
    idempotency::{DUPLICATE_BODY, IdempotencyGuard},
    storage::FsObjectStore,
    tokenizer,
};

pub const OK_BODY: &str = r#"{"result": "ok"}"#;

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<Gate>,
    pub guard: IdempotencyGuard,
    pub dispatcher: Dispatcher,
    pub urls: Arc<dyn RecordTable>,
    pub objects: Arc<FsObjectStore>,
}

impl core::fmt::Debug for AppState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppState")
            .field("gate", &self.gate)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/slack/events", post(handle_event))
        .route("/healthz", get(|| async { "ok" }))
        .route("/objects/{uuid}/{name}", get(handle_object))
        .route("/{id}", get(handle_redirect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listen: &str, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        core::future::pending::<()>().await;
    }
    info!("Shutting down");
}

fn json_response(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, APPLICATION_JSON.as_ref())],
        body.into(),
    )
        .into_response()
}

fn internal_error(e: &anyhow::Error) -> Response {
    error!(error = %format!("{e:#}"), "Request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response()
}

/// Validate, deduplicate, parse and dispatch one webhook delivery.
pub async fn process_event(state: &AppState, payload: &str) -> Result<String> {
    let event = match state.gate.admit(payload)? {
        Admission::ShortCircuit(body) => return Ok(body),
        Admission::Proceed(event) => event,
    };

    if state.guard.admit(&event.event_id).await? {
        return Ok(DUPLICATE_BODY.to_owned());
    }

    let cmd = tokenizer::parse(&event);
    state.dispatcher.dispatch(&cmd).await?;
    debug!(event_id = %event.event_id, "Event processed");
    Ok(OK_BODY.to_owned())
}

async fn handle_event(State(state): State<AppState>, payload: String) -> Response {
    match process_event(&state, &payload).await {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => internal_error(&e),
    }
}

async fn handle_redirect(State(state): State<AppState>, UrlPath(id): UrlPath<String>) -> Response {
    let item = match state.urls.get_record(&id).await {
        Ok(Some(item)) => item,
        Ok(None) => {
            info!(id = %id, "No redirect for id");
            return json_response(
                StatusCode::BAD_REQUEST,
                format!(r#"{{"Error": "No redirect found for id [{id}]"}}"#),
            );
        }
        Err(e) => return internal_error(&e),
    };

    let location = item.url.as_deref().unwrap_or_default().trim();
    let Some(location_header) = Some(location)
        .filter(|l| !l.is_empty())
        .and_then(|l| HeaderValue::from_str(l).ok())
    else {
        info!(id = %id, "Record has no usable location");
        return json_response(
            StatusCode::BAD_REQUEST,
            format!(r#"{{"Error": "No redirect found for location [{location}]"}}"#),
        );
    };

    let expires = item
        .expires_at()
        .map_or_else(|_| item.ttl.to_string(), dates::http_date);
    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, location_header);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(&expires) {
        headers.insert("x-url-expires", value);
    }
    info!(id = %id, "Redirecting");
    (StatusCode::FOUND, headers, OK_BODY).into_response()
}

#[derive(Debug, Deserialize)]
struct ObjectQuery {
    expires: Option<i64>,
    sig: Option<String>,
}

async fn handle_object(
    State(state): State<AppState>,
    UrlPath((uuid, name)): UrlPath<(String, String)>,
    Query(query): Query<ObjectQuery>,
) -> Response {
    let key = format!("{uuid}/{name}");
    let (Some(expires), Some(sig)) = (query.expires, query.sig.as_deref()) else {
        debug!(key = %key, "Object link without signature");
        return StatusCode::FORBIDDEN.into_response();
    };
    if let Err(e) = state.objects.verify_link(&key, expires, sig) {
        debug!(key = %key, error = %e, "Object link rejected");
        return StatusCode::FORBIDDEN.into_response();
    }
    if expires <= OffsetDateTime::now_utc().unix_timestamp() {
        debug!(key = %key, "Object link expired");
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.objects.read_live(&key).await {
        Ok(Some(body)) => {
            let mime = guess_mime(Path::new(&name));
            ([(header::CONTENT_TYPE, mime.to_string())], body).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            debug!(key = %key, error = %e, "Object lookup failed");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

fn guess_mime(path: &Path) -> Mime {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => IMAGE_JPEG,
        Some("png") => IMAGE_PNG,
        Some("gif") => IMAGE_GIF,
        Some("pdf") => APPLICATION_PDF,
        Some("json") => APPLICATION_JSON,
        Some("csv") => TEXT_CSV,
        Some("txt" | "text" | "md" | "log") => TEXT_PLAIN_UTF_8,
        _ => APPLICATION_OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use plugin_core::{
        PluginSpec,
        factory::PluginFactory as _,
        services::{MemoryTable, ObjectStore as _, TableItem},
    };
    use plugin_help::Help;
    use plugin_hit::HitPlugin;
    use plugin_test::{MockChat, test_context};
    use rand::{SeedableRng as _, rngs::StdRng};
    use time::Duration;

    use super::*;

    struct Harness {
        state: AppState,
        chat: Arc<MockChat>,
        _dir: tempfile::TempDir,
    }

    async fn harness(chat: MockChat) -> Harness {
        let chat = Arc::new(chat);
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(Arc::clone(&chat));
        ctx.registry
            .register(PluginSpec::new("help", &["help"]), Arc::new(Help))
            .await;
        let hit = HitPlugin::new(Arc::new(Mutex::new(StdRng::seed_from_u64(1))));
        ctx.registry
            .register(PluginSpec::new("hit", &["hit"]), hit.build())
            .await;

        let state = AppState {
            gate: Arc::new(Gate {
                verification_token: "vt".to_owned(),
                channel: Some("C1".to_owned()),
            }),
            guard: IdempotencyGuard::new(Arc::new(MemoryTable::new())),
            urls: Arc::clone(&ctx.urls),
            objects: Arc::new(
                FsObjectStore::new(dir.path(), "https://api.test/", Duration::days(1), "k")
                    .unwrap(),
            ),
            dispatcher: Dispatcher::new(ctx),
        };
        Harness {
            state,
            chat,
            _dir: dir,
        }
    }

    fn mention(event_id: &str, text: &str) -> String {
        serde_json::json!({
            "token": "vt",
            "type": "event_callback",
            "event_id": event_id,
            "event": {
                "type": "app_mention",
                "user": "U061F7AUR00",
                "text": text,
                "channel": "C1",
                "event_ts": "1600128000.000100",
            },
        })
        .to_string()
    }

    #[tokio::test]
    async fn handshake_is_answered_without_dispatch() {
        let h = harness(MockChat::new()).await;
        let body = process_event(
            &h.state,
            r#"{"token":"vt","type":"url_verification","challenge":"abc123"}"#,
        )
        .await
        .unwrap();
        assert_eq!(body, r#"{"challenge": abc123}"#);
        assert!(h.chat.posted().is_empty());
    }

    #[tokio::test]
    async fn bad_token_is_rejected_without_dispatch() {
        let h = harness(MockChat::new()).await;
        let payload = mention("Ev1", "<@U0LAN0Z8900> help").replace("\"vt\"", "\"other\"");
        let body = process_event(&h.state, &payload).await.unwrap();
        assert!(body.starts_with(r#"{"message": "[REJECTED]"#));
        assert!(h.chat.posted().is_empty());
    }

    #[tokio::test]
    async fn hit_with_exact_pool_returns_everyone_in_order() {
        let members = ["U00000000A1", "U00000000A2", "U00000000A3", "U00000000A4", "U00000000A5"];
        let h = harness(MockChat::new().with_members(&members)).await;

        let body = process_event(&h.state, &mention("Ev1", "<@U0LAN0Z8900> hit 5"))
            .await
            .unwrap();
        assert_eq!(body, OK_BODY);

        let posted = h.chat.posted();
        assert_eq!(posted.len(), 1);
        let results = posted[0].1.sections.last().unwrap();
        let positions: Vec<usize> = members
            .iter()
            .map(|m| results.find(&format!("<@{m}>")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn redelivery_is_acknowledged_once() {
        let h = harness(MockChat::new().with_members(&["U00000000A1"])).await;
        let payload = mention("Ev1", "<@U0LAN0Z8900> hit");

        assert_eq!(process_event(&h.state, &payload).await.unwrap(), OK_BODY);
        assert_eq!(process_event(&h.state, &payload).await.unwrap(), DUPLICATE_BODY);
        assert_eq!(h.chat.posted().len(), 1);
    }

    #[tokio::test]
    async fn too_many_choices_is_reported_in_chat() {
        let h = harness(MockChat::new().with_members(&["U00000000A1", "U00000000A2"])).await;

        let body = process_event(&h.state, &mention("Ev1", "<@U0LAN0Z8900> hit 3"))
            .await
            .unwrap();
        assert_eq!(body, OK_BODY);

        let text = h.chat.posted()[0].1.fallback_text();
        assert!(text.contains("There are too many choices: 3/2"));
    }

    #[tokio::test]
    async fn malformed_payload_and_failed_notice_are_errors() {
        let h = harness(MockChat::new().failing_posts()).await;
        assert!(process_event(&h.state, "not json").await.is_err());
        assert!(
            process_event(&h.state, &mention("Ev2", "<@U0LAN0Z8900> help"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn redirect_responses() {
        let h = harness(MockChat::new()).await;
        let now = OffsetDateTime::now_utc();
        h.state
            .urls
            .put_record(TableItem::new("abcd1234", now, Duration::days(1)).unwrap().with_url("https://x.test/a"))
            .await
            .unwrap();
        h.state
            .urls
            .put_record(TableItem::new("blank123", now, Duration::days(1)).unwrap().with_url("  "))
            .await
            .unwrap();

        let found = handle_redirect(State(h.state.clone()), UrlPath("abcd1234".to_owned())).await;
        assert_eq!(found.status(), StatusCode::FOUND);
        assert_eq!(found.headers()[header::LOCATION], "https://x.test/a");
        assert!(
            found.headers()["x-url-expires"]
                .to_str()
                .unwrap()
                .ends_with(" GMT")
        );

        let missing = handle_redirect(State(h.state.clone()), UrlPath("nope".to_owned())).await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let blank = handle_redirect(State(h.state.clone()), UrlPath("blank123".to_owned())).await;
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    }

    async fn fetch_object(state: &AppState, name: &str, expires: i64, sig: &str) -> Response {
        handle_object(
            State(state.clone()),
            UrlPath(("u1".to_owned(), name.to_owned())),
            Query(ObjectQuery {
                expires: Some(expires),
                sig: Some(sig.to_owned()),
            }),
        )
        .await
    }

    #[tokio::test]
    async fn objects_are_served_until_their_link_expires() {
        let h = harness(MockChat::new()).await;
        let objects = &h.state.objects;
        objects
            .put_object("u1/a.png", b"png".to_vec())
            .await
            .unwrap();
        let later = OffsetDateTime::now_utc().unix_timestamp() + 60;

        let sig = objects.sign_link("u1/a.png", later).unwrap();
        let ok = fetch_object(&h.state, "a.png", later, &sig).await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[header::CONTENT_TYPE], "image/png");

        let stale = objects.sign_link("u1/a.png", 1).unwrap();
        let expired = fetch_object(&h.state, "a.png", 1, &stale).await;
        assert_eq!(expired.status(), StatusCode::FORBIDDEN);

        let other = objects.sign_link("u1/b.png", later).unwrap();
        let missing = fetch_object(&h.state, "b.png", later, &other).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn extending_a_link_expiry_is_forbidden() {
        let h = harness(MockChat::new()).await;
        let objects = &h.state.objects;
        objects
            .put_object("u1/a.png", b"png".to_vec())
            .await
            .unwrap();
        let link = objects
            .presign_get("u1/a.png", Duration::minutes(1))
            .await
            .unwrap();
        let url = reqwest::Url::parse(&link.url).unwrap();
        let sig = url
            .query_pairs()
            .find(|(k, _)| k == "sig")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let signed = link.expires_at.unix_timestamp();

        let ok = fetch_object(&h.state, "a.png", signed, &sig).await;
        assert_eq!(ok.status(), StatusCode::OK);

        let pushed = signed + 365 * 24 * 60 * 60;
        let forged = fetch_object(&h.state, "a.png", pushed, &sig).await;
        assert_eq!(forged.status(), StatusCode::FORBIDDEN);

        let unsigned = handle_object(
            State(h.state.clone()),
            UrlPath(("u1".to_owned(), "a.png".to_owned())),
            Query(ObjectQuery {
                expires: Some(signed),
                sig: None,
            }),
        )
        .await;
        assert_eq!(unsigned.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn mime_follows_extension() {
        assert_eq!(guess_mime(Path::new("a.JPG")), IMAGE_JPEG);
        assert_eq!(guess_mime(Path::new("a.bin")), APPLICATION_OCTET_STREAM);
    }
}
