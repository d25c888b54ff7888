//! Local status surface
//!
//! `GET /` renders a page for whoever is standing in front of the screen;
//! `GET /status` reports the same phase as JSON.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use suitestream_shared::state_machine::SessionPhase;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub fn build_router(phase: watch::Receiver<SessionPhase>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .with_state(phase)
}

/// Serve the status surface until the listener fails
pub async fn serve(addr: SocketAddr, phase: watch::Receiver<SessionPhase>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding status server to {}", addr))?;
    info!("[STATUS] Listening on http://{}", addr);
    axum::serve(listener, build_router(phase))
        .await
        .context("status server failed")
}

async fn index(State(phase): State<watch::Receiver<SessionPhase>>) -> Html<String> {
    let current = phase.borrow().clone();
    Html(render_page(&current))
}

async fn status(State(phase): State<watch::Receiver<SessionPhase>>) -> Json<SessionPhase> {
    let current = phase.borrow().clone();
    Json(current)
}

fn render_page(phase: &SessionPhase) -> String {
    match phase {
        SessionPhase::Connecting => page(
            "Suitestream Onboard",
            "#222",
            "#fff",
            "<h1>Connecting… please wait</h1>",
        ),
        SessionPhase::AwaitingRegistration { code } => page(
            "Enter Code",
            "#222",
            "#fff",
            &format!(
                "<h1>Your Verification Code:</h1>\n\
                 <div style=\"font-size:4rem;letter-spacing:0.2rem;margin:1rem 0;color:#0f0;\">{}</div>\n\
                 <p>Open your Control Panel<br>and enter this code to register.</p>",
                code
            ),
        ),
        SessionPhase::Connected => page(
            "Connected",
            "#000",
            "#0f0",
            "<h1>Device Connected ✅</h1>\n<p>Waiting for server commands…</p>",
        ),
    }
}

fn page(title: &str, background: &str, color: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body style=\"background:{background};color:{color};font-family:sans-serif;text-align:center;padding-top:20vh;\">\n\
         {body}\n</body>\n</html>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_index_follows_phase() {
        let (tx, rx) = watch::channel(SessionPhase::Connecting);
        let app = build_router(rx);

        let (status, html) = get_body(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Connecting… please wait"));

        tx.send_replace(SessionPhase::AwaitingRegistration {
            code: "482913".into(),
        });
        let (_, html) = get_body(app.clone(), "/").await;
        assert!(html.contains("482913"));
        assert!(html.contains("Your Verification Code"));

        tx.send_replace(SessionPhase::Connected);
        let (_, html) = get_body(app, "/").await;
        assert!(html.contains("Device Connected"));
    }

    #[tokio::test]
    async fn test_status_json() {
        let (tx, rx) = watch::channel(SessionPhase::Connecting);
        let app = build_router(rx);

        let (_, body) = get_body(app.clone(), "/status").await;
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value, json!({"phase": "connecting"}));

        tx.send_replace(SessionPhase::AwaitingRegistration {
            code: "ABC123".into(),
        });
        let (_, body) = get_body(app, "/status").await;
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            value,
            json!({"phase": "awaiting_registration", "code": "ABC123"})
        );
    }
}
