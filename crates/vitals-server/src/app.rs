use crate::state::AppState;
use crate::{api, logging, middleware as mw};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

/// Router with the full ingress chain. Requests pass, outermost first:
/// logging, decrypt, content-encoding filter, gzip, HMAC, trusted subnet.
pub fn build_http_app(state: AppState) -> Router {
    let json_routes = Router::new()
        .route("/update/", post(api::update_json))
        .route("/updates/", post(api::update_batch))
        .route("/value/", post(api::value_json))
        .route_layer(middleware::from_fn(mw::allow_json));

    Router::new()
        .route("/", get(api::index))
        .route("/update/{kind}/{name}/{value}", post(api::update_path))
        .route("/value/{kind}/{name}", get(api::value_path))
        .route("/ping", get(api::ping))
        .merge(json_routes)
        .layer(middleware::from_fn_with_state(state.clone(), mw::trusted_subnet))
        .layer(middleware::from_fn_with_state(state.clone(), mw::hmac))
        .layer(middleware::from_fn_with_state(state.clone(), mw::gzip))
        .layer(middleware::from_fn(mw::allow_content_encoding))
        .layer(middleware::from_fn_with_state(state.clone(), mw::decrypt))
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}
