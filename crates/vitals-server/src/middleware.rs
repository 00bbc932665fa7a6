//! HTTP ingress chain. See [`crate::app::build_http_app`] for the order.

use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use vitals_common::{HASH_HEADER, REAL_IP_HEADER};

/// Upper bound for a buffered request body.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

fn reject(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, msg.into()).into_response()
}

async fn read_body(body: Body) -> Result<Bytes, Response> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| reject(StatusCode::BAD_REQUEST, format!("read body: {e}")))
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}

fn declares_empty_body(headers: &HeaderMap) -> bool {
    header_str(headers, header::CONTENT_LENGTH).is_some_and(|v| v.trim() == "0")
}

/// Replaces an RSA-encrypted request body with its plaintext.
pub async fn decrypt(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(decrypter) = &state.security.decrypter else {
        return next.run(req).await;
    };
    if declares_empty_body(req.headers()) {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let ciphertext = match read_body(body).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if ciphertext.is_empty() {
        return next.run(Request::from_parts(parts, Body::empty())).await;
    }
    let plaintext = match decrypter.decrypt(&ciphertext) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "request body decryption failed");
            return reject(StatusCode::BAD_REQUEST, "cannot decrypt body");
        }
    };
    set_content_length(&mut parts.headers, plaintext.len());
    next.run(Request::from_parts(parts, Body::from(plaintext))).await
}

/// Rejects bodies in any encoding other than gzip.
pub async fn allow_content_encoding(req: Request, next: Next) -> Response {
    if declares_empty_body(req.headers()) {
        return next.run(req).await;
    }
    let unsupported = req
        .headers()
        .get_all(header::CONTENT_ENCODING)
        .iter()
        .flat_map(|v| v.to_str().unwrap_or("?").split(','))
        .map(str::trim)
        .find(|enc| !enc.is_empty() && !enc.eq_ignore_ascii_case("gzip") && !enc.eq_ignore_ascii_case("identity"))
        .map(str::to_string);
    if let Some(enc) = unsupported {
        return reject(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("content encoding {enc:?} is not supported"),
        );
    }
    next.run(req).await
}

/// Inflates gzip request bodies and compresses successful responses for
/// clients that accept gzip.
pub async fn gzip(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let gzipper = &state.security.gzip;
    let is_gzipped = header_str(req.headers(), header::CONTENT_ENCODING)
        .is_some_and(|v| v.split(',').any(|e| e.trim().eq_ignore_ascii_case("gzip")));
    let accepts_gzip = header_str(req.headers(), header::ACCEPT_ENCODING)
        .is_some_and(|v| v.split(',').any(|e| e.trim().starts_with("gzip")));

    let req = if is_gzipped {
        let (mut parts, body) = req.into_parts();
        let compressed = match read_body(body).await {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        let inflated = if compressed.is_empty() {
            Vec::new()
        } else {
            match gzipper.decompress(&compressed) {
                Ok(data) => data,
                Err(e) => return reject(StatusCode::BAD_REQUEST, format!("invalid gzip body: {e}")),
            }
        };
        parts.headers.remove(header::CONTENT_ENCODING);
        set_content_length(&mut parts.headers, inflated.len());
        Request::from_parts(parts, Body::from(inflated))
    } else {
        req
    };

    let response = next.run(req).await;
    if !accepts_gzip || !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let plain = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => return reject(StatusCode::INTERNAL_SERVER_ERROR, format!("read response: {e}")),
    };
    if plain.is_empty() {
        return Response::from_parts(parts, Body::empty());
    }
    match gzipper.compress(&plain) {
        Ok(compressed) => {
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            set_content_length(&mut parts.headers, compressed.len());
            Response::from_parts(parts, Body::from(compressed))
        }
        Err(e) => {
            tracing::error!(error = %e, "response compression failed");
            Response::from_parts(parts, Body::from(plain))
        }
    }
}

/// Verifies `HashSHA256` over the decoded request body and signs the
/// response body.
pub async fn hmac(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(signer) = &state.security.signer else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let payload = match read_body(body).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if !payload.is_empty() {
        let Some(signature) = header_str(&parts.headers, HASH_HEADER) else {
            return reject(StatusCode::BAD_REQUEST, format!("missing {HASH_HEADER} header"));
        };
        if let Err(e) = signer.verify(&payload, signature) {
            tracing::warn!(error = %e, "request signature rejected");
            return reject(StatusCode::BAD_REQUEST, "signature mismatch");
        }
    }

    let response = next.run(Request::from_parts(parts, Body::from(payload))).await;
    let (mut parts, body) = response.into_parts();
    let out = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => return reject(StatusCode::INTERNAL_SERVER_ERROR, format!("read response: {e}")),
    };
    if !out.is_empty() {
        if let Ok(v) = HeaderValue::from_str(&signer.sign(&out)) {
            parts.headers.insert(HASH_HEADER, v);
        }
    }
    Response::from_parts(parts, Body::from(out))
}

/// Rejects agents whose `X-Real-IP` lies outside the trusted subnet.
pub async fn trusted_subnet(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let real_ip = header_str(req.headers(), REAL_IP_HEADER);
    if !state.security.is_trusted(real_ip) {
        return reject(
            StatusCode::FORBIDDEN,
            format!("address {} is not trusted", real_ip.unwrap_or("-")),
        );
    }
    next.run(req).await
}

/// Only JSON bodies reach the JSON endpoints.
pub async fn allow_json(req: Request, next: Next) -> Response {
    let is_json = header_str(req.headers(), header::CONTENT_TYPE)
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|ct| ct.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        return reject(StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/json");
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MetricService;
    use crate::state::Security;
    use axum::http::Request;
    use axum::middleware::{from_fn, from_fn_with_state};
    use axum::routing::post;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;
    use vitals_common::sign::Signer;
    use vitals_storage::memory::MemStorage;

    fn build_mock_state(security: Security) -> AppState {
        let service = Arc::new(MetricService::new(Arc::new(MemStorage::ephemeral())));
        AppState::new(service, security)
    }

    async fn echo(body: Bytes) -> Bytes {
        body
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, body)
    }

    #[tokio::test]
    async fn gzip_inflates_requests_and_compresses_responses() {
        let state = build_mock_state(Security::default());
        let app = Router::new()
            .route("/", post(echo))
            .layer(from_fn_with_state(state.clone(), gzip))
            .with_state(state.clone());

        let compressed = state.security.gzip.compress(b"hello").unwrap();
        let req = Request::post("/")
            .header(header::CONTENT_ENCODING, "gzip")
            .header(header::ACCEPT_ENCODING, "gzip, deflate")
            .body(Body::from(compressed))
            .unwrap();
        let (status, headers, body) = call(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_ENCODING], "gzip");
        assert_eq!(state.security.gzip.decompress(&body).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn gzip_rejects_corrupt_bodies() {
        let state = build_mock_state(Security::default());
        let app = Router::new()
            .route("/", post(echo))
            .layer(from_fn_with_state(state.clone(), gzip))
            .with_state(state);
        let req = Request::post("/")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from("not gzip"))
            .unwrap();
        let (status, _, _) = call(app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn content_encoding_filter() {
        let app = Router::new()
            .route("/", post(echo))
            .layer(from_fn(allow_content_encoding));

        let br = Request::post("/")
            .header(header::CONTENT_ENCODING, "br")
            .body(Body::from("x"))
            .unwrap();
        assert_eq!(call(app.clone(), br).await.0, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let empty = Request::post("/")
            .header(header::CONTENT_ENCODING, "br")
            .header(header::CONTENT_LENGTH, "0")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(app.clone(), empty).await.0, StatusCode::OK);

        let plain = Request::post("/").body(Body::from("x")).unwrap();
        assert_eq!(call(app, plain).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn hmac_verifies_requests_and_signs_responses() {
        let signer = Signer::new(b"secret").unwrap();
        let good = signer.sign(b"payload");
        let state = build_mock_state(Security {
            signer: Some(Signer::new(b"secret").unwrap()),
            ..Security::default()
        });
        let app = Router::new()
            .route("/", post(echo))
            .layer(from_fn_with_state(state.clone(), hmac))
            .with_state(state);

        let req = Request::post("/")
            .header(HASH_HEADER, good.as_str())
            .body(Body::from("payload"))
            .unwrap();
        let (status, headers, body) = call(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[HASH_HEADER], signer.sign(&body).as_str());

        let forged = Request::post("/")
            .header(HASH_HEADER, good.as_str())
            .body(Body::from("forged"))
            .unwrap();
        assert_eq!(call(app.clone(), forged).await.0, StatusCode::BAD_REQUEST);

        let unsigned = Request::post("/").body(Body::from("payload")).unwrap();
        assert_eq!(call(app.clone(), unsigned).await.0, StatusCode::BAD_REQUEST);

        let empty = Request::post("/").body(Body::empty()).unwrap();
        assert_eq!(call(app, empty).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn json_filter() {
        let app = Router::new().route("/", post(echo)).layer(from_fn(allow_json));
        let text = Request::post("/")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(call(app.clone(), text).await.0, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let json = Request::post("/")
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(call(app, json).await.0, StatusCode::OK);
    }
}
