//! HTTP surface: a form page, a JSON endpoint, a viewer page and the
//! generated reports as static files.

use crate::error::ReportError;
use crate::pipeline::Pipeline;
use crate::report::html::escape;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub ticker: String,
    #[serde(default)]
    pub horizon: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub status: &'static str,
    pub ticker: String,
    pub report_url: String,
    pub viewer_url: String,
    pub outlook: &'static str,
    pub duration_secs: f64,
}

#[derive(Debug, Deserialize)]
pub struct ViewerParams {
    pub url: Option<String>,
    pub ticker: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub kind: &'static str,
    pub message: String,
}

pub fn status_for(err: &ReportError) -> StatusCode {
    match err {
        ReportError::InvalidTicker(_) | ReportError::InvalidHorizon(_) => StatusCode::BAD_REQUEST,
        ReportError::DataUnavailable { .. } => StatusCode::NOT_FOUND,
        ReportError::Forecast(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReportError::Render(_) | ReportError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn log_failure(ticker: &str, err: &ReportError) {
    match err {
        ReportError::Render(_) | ReportError::Internal(_) => {
            tracing::error!("{}: {} ({:#})", ticker, err.kind(), err)
        }
        _ => warn!("{}: {}", ticker, err),
    }
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let reports = ServeDir::new(pipeline.output_dir());
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/generate", post(generate_form))
        .route("/api/generate", post(generate_json))
        .route("/report/view", get(view_report))
        .nest_service("/reports", reports)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline })
}

pub async fn serve(pipeline: Arc<Pipeline>, bind: &str) -> Result<()> {
    std::fs::create_dir_all(pipeline.output_dir())
        .with_context(|| format!("Failed to create {:?}", pipeline.output_dir()))?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(pipeline))
        .await
        .context("HTTP server failed")?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8"><title>{title}</title>
<style>body {{ font-family: sans-serif; max-width: 640px; margin: 3rem auto; padding: 0 1rem; }} .error {{ color: #d93025; }} label {{ display: block; margin-top: 1rem; }}</style>
</head><body><h1>{title}</h1>{body}</body></html>"#,
        title = escape(title),
        body = body
    )
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let horizon = escape(state.pipeline.default_horizon());
    Html(page(
        "Stock Forecast Report",
        &format!(
            r#"<form method="post" action="/generate">
<label>Ticker <input name="ticker" required maxlength="12" placeholder="AAPL"></label>
<label>Horizon <input name="horizon" value="{horizon}" placeholder="15d, 2w, 1m, 1y"></label>
<p><button type="submit">Generate report</button></p>
</form>"#
        ),
    ))
}

fn report_url(file_name: &str) -> String {
    format!("/reports/{}", file_name)
}

fn viewer_url(report_url: &str, ticker: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("url", report_url)
        .append_pair("ticker", ticker)
        .finish();
    format!("/report/view?{}", query)
}

/// Only generated pages may be framed: `/reports/<file>.html`, one segment.
fn is_report_url(url: &str) -> bool {
    let Some(name) = url.strip_prefix("/reports/") else {
        return false;
    };
    name.ends_with(".html")
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

async fn view_report(Query(params): Query<ViewerParams>) -> Response {
    let ticker = params
        .ticker
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Unknown");
    let Some(url) = params.url.as_deref().filter(|u| is_report_url(u)) else {
        debug!("Rejected viewer URL {:?}", params.url);
        let body = r#"<p class="error">Invalid or missing report URL.</p><p><a href="/">Back</a></p>"#;
        return (StatusCode::BAD_REQUEST, Html(page("Report not found", body))).into_response();
    };

    let title = format!("{} Stock Forecast Report", ticker);
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8"><title>{title}</title>
<style>html, body {{ margin: 0; height: 100%; font-family: sans-serif; }} header {{ display: flex; justify-content: space-between; align-items: center; padding: 0.5rem 1rem; background: #1f2937; color: #fff; }} header a {{ color: #fff; margin-left: 1rem; }} iframe {{ border: 0; width: 100%; height: calc(100% - 3rem); }}</style>
</head><body>
<header><strong>{title}</strong><nav><a href="{url}" target="_blank" rel="noopener">Open in new tab</a><a href="/">New report</a></nav></header>
<iframe src="{url}" title="{title}"></iframe>
</body></html>"#,
        title = escape(&title),
        url = escape(url),
    ))
    .into_response()
}

async fn generate_form(State(state): State<AppState>, Form(req): Form<GenerateRequest>) -> Response {
    let horizon = req.horizon.as_deref().filter(|h| !h.trim().is_empty());
    match state.pipeline.run(&req.ticker, horizon).await {
        Ok(artifact) => {
            let url = report_url(&artifact.file_name);
            Html(page(
                &format!("{} report ready", artifact.ticker),
                &format!(
                    r#"<p>Outlook: <strong>{}</strong></p><p><a href="{}">Open the report</a> · <a href="{}">View in page</a></p><p><a href="/">Generate another</a></p>"#,
                    artifact.outlook.label(),
                    escape(&url),
                    escape(&viewer_url(&url, &artifact.ticker))
                ),
            ))
            .into_response()
        }
        Err(e) => {
            log_failure(&req.ticker, &e);
            let body = format!(
                r#"<p class="error">{}</p><p><a href="/">Back</a></p>"#,
                escape(&e.user_message())
            );
            (status_for(&e), Html(page("Report failed", &body))).into_response()
        }
    }
}

async fn generate_json(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            debug!("Rejected API request: {}", rejection.body_text());
            let body = ErrorResponse {
                status: "error",
                kind: "invalid_request",
                message: "Invalid request format. Expected JSON like {\"ticker\": \"AAPL\"}.".to_string(),
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };
    let started = Instant::now();
    match state.pipeline.run(&req.ticker, req.horizon.as_deref()).await {
        Ok(artifact) => {
            let report_url = report_url(&artifact.file_name);
            Json(GenerateResponse {
                status: "success",
                viewer_url: viewer_url(&report_url, &artifact.ticker),
                report_url,
                ticker: artifact.ticker,
                outlook: artifact.outlook.label(),
                duration_secs: started.elapsed().as_secs_f64(),
            })
            .into_response()
        }
        Err(e) => {
            log_failure(&req.ticker, &e);
            let body = ErrorResponse {
                status: "error",
                kind: e.kind(),
                message: e.user_message(),
            };
            (status_for(&e), Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::stub_pipeline;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    async fn body_string(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn app(dir: &std::path::Path) -> Router {
        router(Arc::new(stub_pipeline(dir, 730)))
    }

    #[tokio::test]
    async fn test_health_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app(dir.path())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains(r#"action="/generate""#));
    }

    #[tokio::test]
    async fn test_json_errors_map_to_status() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            (r#"{"ticker":"ZZZZINVALID"}"#, StatusCode::NOT_FOUND, "data_unavailable"),
            (r#"{"ticker":"<script>"}"#, StatusCode::BAD_REQUEST, "invalid_ticker"),
            (r#"{"ticker":"AAPL","horizon":"9y"}"#, StatusCode::BAD_REQUEST, "invalid_horizon"),
        ];
        for (body, status, kind) in cases {
            let resp = app(dir.path())
                .oneshot(
                    Request::post("/api/generate")
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), status, "{body}");
            let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
            assert_eq!(json["status"], "error");
            assert_eq!(json["kind"], kind);
        }
    }

    #[tokio::test]
    async fn test_malformed_json_gets_error_envelope() {
        let dir = tempfile::tempdir().unwrap();
        for (content_type, body) in [
            ("application/json", "ticker=AAPL"),
            ("application/json", r#"{"horizon":"1m"}"#),
            ("text/plain", r#"{"ticker":"AAPL"}"#),
        ] {
            let resp = app(dir.path())
                .oneshot(
                    Request::post("/api/generate")
                        .header(header::CONTENT_TYPE, content_type)
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
            let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
            assert_eq!(json["status"], "error");
            assert_eq!(json["kind"], "invalid_request");
            assert!(json["message"].as_str().unwrap().contains("Expected JSON"));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_form_generates_and_serves_report() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path())
            .oneshot(
                Request::post("/generate")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("ticker=aapl&horizon=30"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_string(resp).await;

        let start = html.find("/reports/").unwrap();
        let end = start + html[start..].find('"').unwrap();
        let url = &html[start..end];
        assert!(url.starts_with("/reports/AAPL_report_"));

        let resp = app(dir.path())
            .oneshot(Request::get(url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("AAPL Stock Forecast"));
    }

    #[tokio::test]
    async fn test_json_success_links_viewer() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path())
            .oneshot(
                Request::post("/api/generate")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"ticker":"AAPL","horizon":"30"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["status"], "success");
        let report = json["report_url"].as_str().unwrap().to_string();
        let viewer = json["viewer_url"].as_str().unwrap().to_string();
        assert!(viewer.starts_with("/report/view?url=%2Freports%2FAAPL_report_"));
        assert!(viewer.ends_with("&ticker=AAPL"));

        let resp = app(dir.path())
            .oneshot(Request::get(viewer.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_string(resp).await;
        assert!(html.contains(&format!(r#"<iframe src="{}""#, report)));
        assert!(html.contains("AAPL Stock Forecast Report"));
    }

    #[tokio::test]
    async fn test_viewer_rejects_foreign_urls() {
        let dir = tempfile::tempdir().unwrap();
        for uri in [
            "/report/view",
            "/report/view?url=https%3A%2F%2Fevil.example%2Fx.html&ticker=AAPL",
            "/report/view?url=%2Freports%2F..%2FCargo.toml",
            "/report/view?url=%2Freports%2F%22onload%3D%22x.html",
            "/report/view?url=%2Freports%2Fsub%2Fa.html",
            "/report/view?url=%2Freports%2F.AAPL_report.html.tmp",
        ] {
            let resp = app(dir.path())
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert!(!body_string(resp).await.contains("<iframe"), "{uri}");
        }

        let resp = app(dir.path())
            .oneshot(
                Request::get("/report/view?url=%2Freports%2FX_report_1.html&ticker=%3Cb%3E")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_string(resp).await;
        assert!(html.contains("&lt;b&gt; Stock Forecast Report"));
        assert!(!html.contains("<b>"));
    }

    #[tokio::test]
    async fn test_form_error_is_html() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path())
            .oneshot(
                Request::post("/generate")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("ticker=ZZZZINVALID&horizon="))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(body_string(resp).await.contains("No market data could be found for ZZZZINVALID"));
    }
}
