use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use time::OffsetDateTime;

use super::{hub::FeedView, FeedHub, FeedState};

#[derive(Clone)]
struct FeedRoutes {
    hub: Arc<FeedHub>,
    auth_bearer_token: Option<Arc<str>>,
}

#[derive(serde::Deserialize)]
struct IncomingFeedValue {
    #[serde(default)]
    state: Value,
    unit: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    observed_at: Option<OffsetDateTime>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum IncomingBody {
    One(IncomingFeedValue),
    Many(Vec<IncomingFeedValue>),
}

impl IncomingBody {
    fn into_values(self) -> Vec<IncomingFeedValue> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(vs) => vs,
        }
    }
}

fn state_from_json(value: &Value) -> FeedState {
    match value {
        Value::Null => FeedState::Unknown,
        Value::String(s) => FeedState::from_raw(s.as_str()),
        Value::Number(n) => FeedState::Reported(n.to_string()),
        other => FeedState::Reported(other.to_string()),
    }
}

/// HTTP ingestion of feed values.
///
/// `POST /feeds/:feed_id` accepts `{"state": 1.5, "unit": "kWh"}` or a JSON
/// array of such objects, applied in order. `GET /feeds/:feed_id` returns the
/// latest value.
pub fn router(hub: Arc<FeedHub>, auth_bearer_token: Option<String>) -> Router {
    let routes = FeedRoutes {
        hub,
        auth_bearer_token: auth_bearer_token.map(Arc::from),
    };

    Router::new()
        .route("/feeds/:feed_id", post(ingest_feed_value).get(get_feed_value))
        .with_state(routes)
}

fn authorized(routes: &FeedRoutes, headers: &HeaderMap) -> bool {
    let Some(expected) = routes.auth_bearer_token.as_deref() else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

async fn ingest_feed_value(
    State(routes): State<FeedRoutes>,
    Path(feed_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<IncomingBody>,
) -> Result<StatusCode, StatusCode> {
    metrics::counter!("http_feed_requests_total").increment(1);

    if !authorized(&routes, &headers) {
        metrics::counter!("http_feed_unauthorized_total").increment(1);
        return Err(StatusCode::UNAUTHORIZED);
    }

    for incoming in body.into_values() {
        let state = state_from_json(&incoming.state);
        let observed_at = incoming.observed_at.unwrap_or_else(OffsetDateTime::now_utc);
        tracing::debug!(feed = %feed_id, ?state, "feed value received");
        routes.hub.update(&feed_id, state, incoming.unit, observed_at);
    }

    Ok(StatusCode::ACCEPTED)
}

async fn get_feed_value(
    State(routes): State<FeedRoutes>,
    Path(feed_id): Path<String>,
) -> Result<Json<FeedView>, StatusCode> {
    routes.hub.view(&feed_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_states_map_to_feed_states() {
        assert_eq!(state_from_json(&json!(1.5)), FeedState::Reported("1.5".into()));
        assert_eq!(state_from_json(&json!("unavailable")), FeedState::Unavailable);
        assert_eq!(state_from_json(&Value::Null), FeedState::Unknown);
        assert_eq!(state_from_json(&json!(true)), FeedState::Reported("true".into()));
    }

    #[test]
    fn body_accepts_single_object_or_array() {
        let one: IncomingBody = serde_json::from_value(json!({"state": 2, "unit": "kWh"})).unwrap();
        assert_eq!(one.into_values().len(), 1);

        let many: IncomingBody =
            serde_json::from_value(json!([{"state": 1}, {"state": 2}])).unwrap();
        assert_eq!(many.into_values().len(), 2);
    }
}
