use axum::{
    Router,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::metrics::{Metrics, TEXT_MIME};

#[derive(Clone)]
pub struct AppState {
    pub metrics: Metrics,
}

pub fn build_router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .route("/healthz", get(healthz))
        .with_state(AppState { metrics })
}

async fn serve_metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, TEXT_MIME)],
        state.metrics.render(),
    )
        .into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::{Request, StatusCode}};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use tower::util::ServiceExt;

    async fn get_body(router: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_exposition() {
        let metrics = Metrics::new();
        metrics.set_node_power("n1", 80.0);
        let (status, content_type, body) = get_body(build_router(metrics), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(TEXT_MIME));
        assert!(body.contains("node_power_watts{node=\"n1\"} 80"));
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (status, _, body) = get_body(build_router(Metrics::new()), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let (status, _, _) = get_body(build_router(Metrics::new()), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
