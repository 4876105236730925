// Attendance endpoints. Discord ids travel as strings in both directions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::api_error::ApiResult;
use super::AppState;
use crate::core::attendance::{parse_event_date, AttendanceEvent, EventSummary};
use crate::core::errors::{BotError, BotResult};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/attendance/events", post(create_event))
        .route(
            "/api/attendance/events/{event_id}",
            get(get_event).delete(delete_event),
        )
        .route(
            "/api/attendance/users/{user_id}/active-event",
            get(get_active_event).put(set_active_event),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventBody {
    pub date: Option<String>,
    pub host_id: Option<String>,
    pub cohost_id: Option<String>,
}

/// A created event as the API reports it. The ids are the Discord ids the
/// caller sent, never the internal user rows.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub host_id: Option<String>,
    pub cohost_id: Option<String>,
}

impl EventResponse {
    fn new(event: &AttendanceEvent, host: Option<u64>, cohost: Option<u64>) -> Self {
        Self {
            id: event.id,
            date: event.date,
            host_id: host.map(|id| id.to_string()),
            cohost_id: cohost.map(|id| id.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEventBody {
    pub event_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEventResponse {
    pub event_id: i64,
}

fn parse_discord_id(raw: &str, field: &'static str) -> BotResult<u64> {
    raw.trim().parse::<u64>().map_err(|_| {
        BotError::validation("INVALID_ID", format!("`{}` is not a Discord id", raw))
            .with_context("field", field)
    })
}

fn parse_opt_discord_id(raw: Option<&str>, field: &'static str) -> BotResult<Option<u64>> {
    raw.map(|id| parse_discord_id(id, field)).transpose()
}

pub async fn create_event(
    State(state): State<AppState>,
    Json(body): Json<CreateEventBody>,
) -> ApiResult<(StatusCode, Json<EventResponse>)> {
    let date = match body.date.as_deref() {
        Some(raw) => parse_event_date(raw, None)?,
        None => Utc::now(),
    };
    let host = parse_opt_discord_id(body.host_id.as_deref(), "hostId")?;
    let cohost = parse_opt_discord_id(body.cohost_id.as_deref(), "cohostId")?;

    let event = state.attendance.create_event(date, host, cohost).await?;
    Ok((
        StatusCode::CREATED,
        Json(EventResponse::new(&event, host, cohost)),
    ))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> ApiResult<Json<EventSummary>> {
    let summary = state.attendance.get_event_summary(event_id).await?;
    Ok(Json(summary))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.attendance.delete_event(event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_active_event(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ActiveEventResponse>> {
    let discord_id = parse_discord_id(&user_id, "userId")?;
    let event_id = state
        .attendance
        .active_event(discord_id)
        .await?
        .ok_or_else(|| BotError::not_found("NO_ACTIVE_EVENT", "No event selected for this user."))?;
    Ok(Json(ActiveEventResponse { event_id }))
}

pub async fn set_active_event(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<ActiveEventBody>,
) -> ApiResult<Json<ActiveEventResponse>> {
    let discord_id = parse_discord_id(&user_id, "userId")?;
    let event = state.attendance.select_event(discord_id, body.event_id).await?;
    Ok(Json(ActiveEventResponse { event_id: event.id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attendance::AttendanceService;
    use crate::infra::attendance::SqliteAttendanceStore;
    use crate::infra::database::memory_pool;
    use std::sync::Arc;

    async fn state() -> AppState {
        let store = SqliteAttendanceStore::new(memory_pool().await);
        store.migrate().await.unwrap();
        AppState {
            attendance: Arc::new(AttendanceService::new(store)),
        }
    }

    #[tokio::test]
    async fn test_create_then_fetch_event() {
        let state = state().await;
        let body = CreateEventBody {
            date: Some("2026-03-14T19:00:00Z".into()),
            host_id: Some("123456789012345678".into()),
            cohost_id: None,
        };

        let (status, Json(event)) = create_event(State(state.clone()), Json(body))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(event.date.to_rfc3339(), "2026-03-14T19:00:00+00:00");
        assert_eq!(event.host_id.as_deref(), Some("123456789012345678"));
        assert_eq!(event.cohost_id, None);

        let created = serde_json::to_value(&event).unwrap();
        assert_eq!(created["hostId"], "123456789012345678");
        assert!(created["cohostId"].is_null());

        let Json(summary) = get_event(State(state), Path(event.id)).await.unwrap();
        assert_eq!(summary.host, Some(123456789012345678));
        assert!(summary.squads.is_empty());

        let fetched = serde_json::to_value(&summary).unwrap();
        assert_eq!(fetched["host"], "123456789012345678");
        assert_eq!(fetched["event"]["id"], event.id);
        assert!(fetched["event"].get("hostId").is_none());
    }

    #[tokio::test]
    async fn test_bad_host_id_is_400() {
        let body = CreateEventBody {
            host_id: Some("not-a-snowflake".into()),
            ..Default::default()
        };
        let err = create_event(State(state().await), Json(body))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.0.code, "INVALID_ID");
    }

    #[tokio::test]
    async fn test_unknown_event_is_404() {
        let state = state().await;
        let err = get_event(State(state.clone()), Path(999)).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = delete_event(State(state), Path(999)).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_returns_204() {
        let state = state().await;
        let (_, Json(event)) = create_event(State(state.clone()), Json(CreateEventBody::default()))
            .await
            .unwrap();
        let response = delete_event(State(state), Path(event.id))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_active_event_round_trip() {
        let state = state().await;
        let user = "223344556677889900".to_string();

        let err = get_active_event(State(state.clone()), Path(user.clone()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = set_active_event(
            State(state.clone()),
            Path(user.clone()),
            Json(ActiveEventBody { event_id: 42 }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let (_, Json(event)) = create_event(State(state.clone()), Json(CreateEventBody::default()))
            .await
            .unwrap();
        set_active_event(
            State(state.clone()),
            Path(user.clone()),
            Json(ActiveEventBody { event_id: event.id }),
        )
        .await
        .unwrap();

        let Json(active) = get_active_event(State(state), Path(user)).await.unwrap();
        assert_eq!(active.event_id, event.id);
    }
}
