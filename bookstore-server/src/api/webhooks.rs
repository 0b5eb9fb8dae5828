//! Payment gateway callbacks
//!
//! No bearer auth: every callback is signature-checked by its gateway
//! adapter. Parameters come from the query string and/or the body (form or
//! JSON); JSON scalars are stringified so the signature covers the same
//! text the gateway signed.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::Value;
use shared::models::PaymentMethod;

use crate::context::RequestContext;
use crate::payments::signer::Params;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().nest("/api/v1/webhooks", routes())
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/vnpay", get(vnpay).post(vnpay))
        .route("/momo", get(momo).post(momo))
}

pub async fn vnpay(
    State(state): State<AppState>,
    ctx: RequestContext,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &ctx, PaymentMethod::Vnpay, query, &headers, &body).await
}

pub async fn momo(
    State(state): State<AppState>,
    ctx: RequestContext,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &ctx, PaymentMethod::Momo, query, &headers, &body).await
}

async fn handle(
    state: &AppState,
    ctx: &RequestContext,
    method: PaymentMethod,
    query: Option<String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response {
    let params = match collect_params(query.as_deref(), headers, body) {
        Ok(params) => params,
        Err(e) => {
            tracing::warn!(gateway = method.as_db(), error = %e, "Unreadable callback body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match state.payments.handle_callback(ctx, method, &params).await {
        Ok(reply) => {
            let status = if reply.accepted {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, Json(reply.body)).into_response()
        }
        Err(e) => {
            tracing::error!(gateway = method.as_db(), request_id = %ctx.request_id, error = %e, "Callback processing failed");
            shared::AppError::from(e).into_response()
        }
    }
}

fn collect_params(query: Option<&str>, headers: &HeaderMap, body: &[u8]) -> Result<Params, serde_json::Error> {
    let mut params = Params::new();
    if let Some(query) = query {
        params.extend(url::form_urlencoded::parse(query.as_bytes()).into_owned());
    }
    if body.is_empty() {
        return Ok(params);
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if is_json {
        let value: Value = serde_json::from_slice(body)?;
        if let Value::Object(map) = value {
            for (key, value) in map {
                let text = match value {
                    Value::String(s) => s,
                    Value::Null => continue,
                    other => other.to_string(),
                };
                params.insert(key, text);
            }
        }
    } else {
        params.extend(url::form_urlencoded::parse(body).into_owned());
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn json_numbers_are_stringified() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = br#"{"orderId":"TXN1","amount":150000,"resultCode":0,"extraData":null}"#;
        let params = collect_params(None, &headers, body).unwrap();
        assert_eq!(params["amount"], "150000");
        assert_eq!(params["resultCode"], "0");
        assert!(!params.contains_key("extraData"));
    }

    #[test]
    fn query_and_form_body_are_merged() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let params = collect_params(Some("vnp_TxnRef=TXN1"), &headers, b"vnp_Amount=100&vnp_OrderInfo=a%20b").unwrap();
        assert_eq!(params["vnp_TxnRef"], "TXN1");
        assert_eq!(params["vnp_Amount"], "100");
        assert_eq!(params["vnp_OrderInfo"], "a b");
    }
}
