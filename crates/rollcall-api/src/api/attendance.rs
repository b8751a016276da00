// Attendance HTTP routes
// Decision: the caller is whoever x-user-id names; event ids come from the path

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use rollcall_core::{AdmissionService, Attendance, Cancellation, Role, Roster, RsvpStatus};
use serde::Deserialize;
use uuid::Uuid;

use super::common::{ApiError, CurrentUser};

/// Optional body of a registration request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    /// Role to register with (default: attendee)
    #[serde(default)]
    pub role: Option<Role>,
}

/// App state for attendance routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AdmissionService>,
}

impl AppState {
    pub fn new(service: Arc<AdmissionService>) -> Self {
        Self { service }
    }
}

/// Create attendance routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/events/:event_id/attendance",
            get(get_status).post(register).delete(cancel),
        )
        .route("/v1/events/:event_id/roster", get(get_roster))
        .route("/v1/attendances/:attendance_id", get(get_attendance))
        .with_state(state)
}

/// POST /v1/events/:event_id/attendance - Register the caller
pub async fn register(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(event_id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<Attendance>), ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RegisterRequest::default()
    } else {
        serde_json::from_slice::<RegisterRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?
    };

    let role = request.role.unwrap_or(Role::Attendee);
    let attendance = state.service.register_as(user_id, event_id, role).await?;

    Ok((StatusCode::CREATED, Json(attendance)))
}

/// DELETE /v1/events/:event_id/attendance - Withdraw the caller
pub async fn cancel(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Cancellation>, ApiError> {
    let cancellation = state.service.cancel(user_id, event_id).await?;
    Ok(Json(cancellation))
}

/// GET /v1/events/:event_id/attendance - Where the caller stands
pub async fn get_status(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<RsvpStatus>, ApiError> {
    Ok(Json(state.service.status(user_id, event_id).await?))
}

/// GET /v1/events/:event_id/roster
pub async fn get_roster(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Roster>, ApiError> {
    Ok(Json(state.service.roster(event_id).await?))
}

/// GET /v1/attendances/:attendance_id
pub async fn get_attendance(
    State(state): State<AppState>,
    Path(attendance_id): Path<Uuid>,
) -> Result<Json<Attendance>, ApiError> {
    state
        .service
        .attendance(attendance_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("attendance not found: {attendance_id}")))
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::time::Duration;

    use axum::{body::Body, http::Request};
    use chrono::{Days, Utc};
    use http_body_util::BodyExt;
    use rollcall_core::worker::PromotionReceiver;
    use rollcall_core::{
        AdmissionConfig, AttendanceLedger, Event, InMemoryAttendanceLedger, InMemoryEventDirectory,
        PromotionQueue,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::api::common::USER_ID_HEADER;

    struct TestApp {
        router: Router,
        ledger: Arc<InMemoryAttendanceLedger>,
        directory: InMemoryEventDirectory,
        _receiver: PromotionReceiver,
    }

    fn test_app() -> TestApp {
        let ledger = Arc::new(InMemoryAttendanceLedger::new());
        let directory = InMemoryEventDirectory::new();
        let (queue, receiver) = PromotionQueue::new();
        let service = AdmissionService::new(
            ledger.clone(),
            Arc::new(directory.clone()),
            queue,
            AdmissionConfig::default().with_lock_timeout(Duration::from_millis(50)),
        );

        TestApp {
            router: routes(AppState::new(Arc::new(service))),
            ledger,
            directory,
            _receiver: receiver,
        }
    }

    impl TestApp {
        fn add_event(&self, days_from_today: u64, capacity: u32) -> Event {
            let event = Event::new("Jam", Utc::now().date_naive() + Days::new(days_from_today))
                .with_capacity(NonZeroU32::new(capacity).unwrap());
            self.directory.insert(event.clone());
            event
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            user_id: Option<Uuid>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(user_id) = user_id {
                builder = builder.header(USER_ID_HEADER, user_id.to_string());
            }
            let body = match body {
                Some(value) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(value.to_string())
                }
                None => Body::empty(),
            };

            let response = self
                .router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();

            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    #[tokio::test]
    async fn test_register_and_status() {
        let app = test_app();
        let event = app.add_event(3, 1);
        let uri = format!("/v1/events/{}/attendance", event.id);
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();

        let (status, body) = app.send("POST", &uri, Some(first), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "attending");
        assert_eq!(body["role"], "attendee");

        let (status, body) = app
            .send("POST", &uri, Some(second), Some(json!({"role": "speaker"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "waitlisted");
        assert_eq!(body["position"], 1);
        assert_eq!(body["role"], "speaker");

        let (status, body) = app.send("GET", &uri, Some(second), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "waitlisted", "position": 1}));

        let (_, body) = app.send("GET", &uri, Some(Uuid::now_v7()), None).await;
        assert_eq!(body, json!({"status": "not_registered"}));
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let app = test_app();
        let event = app.add_event(3, 5);
        let uri = format!("/v1/events/{}/attendance", event.id);
        let user_id = Uuid::now_v7();

        app.send("POST", &uri, Some(user_id), None).await;
        let (status, body) = app.send("POST", &uri, Some(user_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["retryable"], false);

        let (status, _) = app.send("POST", &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .send("POST", &uri, Some(Uuid::now_v7()), Some(json!({"role": "bouncer"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = format!("/v1/events/{}/attendance", Uuid::now_v7());
        let (status, _) = app.send("POST", &unknown, Some(user_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_past_event_is_unprocessable() {
        let app = test_app();
        let event = Event::new("Last month", Utc::now().date_naive() - Days::new(30));
        app.directory.insert(event.clone());

        let uri = format!("/v1/events/{}/attendance", event.id);
        let (status, _) = app.send("POST", &uri, Some(Uuid::now_v7()), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_malformed_user_header() {
        let app = test_app();
        let event = app.add_event(3, 5);

        let request = Request::builder()
            .method("GET")
            .uri(format!("/v1/events/{}/attendance", event.id))
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cancel() {
        let app = test_app();
        let event = app.add_event(3, 1);
        let uri = format!("/v1/events/{}/attendance", event.id);
        let holder = Uuid::now_v7();
        let waiting = Uuid::now_v7();

        app.send("POST", &uri, Some(holder), None).await;
        app.send("POST", &uri, Some(waiting), None).await;

        let (status, body) = app.send("DELETE", &uri, Some(waiting), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["promotion_scheduled"], false);
        assert_eq!(body["attendance"]["status"], "waitlisted");

        let (status, body) = app.send("DELETE", &uri, Some(holder), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["promotion_scheduled"], true);

        let (status, _) = app.send("DELETE", &uri, Some(holder), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_roster_and_attendance_lookup() {
        let app = test_app();
        let event = app.add_event(3, 1);
        let uri = format!("/v1/events/{}/attendance", event.id);

        let (_, registered) = app.send("POST", &uri, Some(Uuid::now_v7()), None).await;
        app.send("POST", &uri, Some(Uuid::now_v7()), None).await;

        let (status, roster) = app
            .send("GET", &format!("/v1/events/{}/roster", event.id), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(roster["attending_count"], 1);
        assert_eq!(roster["waitlist_len"], 1);
        assert_eq!(roster["remaining_slots"], 0);
        assert_eq!(roster["is_at_capacity"], true);

        let id = registered["id"].as_str().unwrap();
        let (status, body) = app
            .send("GET", &format!("/v1/attendances/{id}"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id);

        let (status, _) = app
            .send("GET", &format!("/v1/attendances/{}", Uuid::now_v7()), None, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_contended_event_is_retryable() {
        let app = test_app();
        let event = app.add_event(3, 5);
        let held = app
            .ledger
            .lock_event(event.id, Duration::from_secs(1))
            .await
            .unwrap();

        let request = Request::builder()
            .method("POST")
            .uri(format!("/v1/events/{}/attendance", event.id))
            .header(USER_ID_HEADER, Uuid::now_v7().to_string())
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()["retry-after"], "1");
        drop(held);
    }
}
