use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tower::util::ServiceExt;

pub async fn request(app: &Router, method: Method, path: &str, headers: &[(&str, String)]) -> Response {
    let mut builder = Request::builder().method(method).uri(path);

    for (k, v) in headers {
        builder = builder.header(*k, v.as_str());
    }

    let req = builder.body(Body::empty()).expect("empty body");
    app.clone().oneshot(req).await.expect("oneshot response")
}

pub async fn get(app: &Router, path: &str) -> Response {
    request(app, Method::GET, path, &[]).await
}

pub async fn response_text(resp: Response) -> (StatusCode, HeaderMap, String) {
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body bytes");
    (status, headers, String::from_utf8(bytes.to_vec()).expect("utf8 body"))
}

pub async fn response_json(resp: Response) -> (StatusCode, HeaderMap, Value) {
    let (status, headers, text) = response_text(resp).await;

    let json = if text.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str::<Value>(&text).expect("parse json body")
    };

    (status, headers, json)
}

pub fn assert_json_error(body: &Value, code: &str) {
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], code);
    assert!(body.get("message").is_some());
}
