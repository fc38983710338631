//! End-to-end tests driving the axum router in process.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, NaiveDate, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use perch::auth::StaticTokenProvider;
use perch::config::Settings;
use perch::engine::Engine;
use perch::http::{router, AppState};

const ALICE: &str = "Bearer alice-token";
const BOB: &str = "Bearer bob-token";
const ADMIN: &str = "Bearer admin-token";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("perch_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn test_app(name: &str) -> Router {
    let settings = Arc::new(Settings::default());
    let engine = Arc::new(Engine::new(test_wal_path(name), settings).unwrap());
    let identity = Arc::new(
        StaticTokenProvider::from_spec("alice-token:alice,bob-token:bob,admin-token:root:admin")
            .unwrap(),
    );
    router(AppState { engine, identity })
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let request = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn tomorrow() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(1)
}

fn rfc3339(date: NaiveDate, h: u32, m: u32) -> String {
    date.and_hms_opt(h, m, 0).unwrap().and_utc().to_rfc3339()
}

/// Admin-creates office → room → seat, returning (room_id, seat_id).
async fn seed_catalog(app: &Router) -> (String, String) {
    let (status, office) = send(
        app,
        "POST",
        "/api/offices",
        Some(ADMIN),
        Some(json!({"name": "HQ", "location": "Berlin"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, room) = send(
        app,
        "POST",
        "/api/rooms",
        Some(ADMIN),
        Some(json!({"office_id": office["id"], "name": "Main"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, seat) = send(
        app,
        "POST",
        "/api/seats",
        Some(ADMIN),
        Some(json!({"room_id": room["id"], "number": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    (
        room["id"].as_str().unwrap().to_string(),
        seat["id"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn missing_or_bad_token_is_401() {
    let app = test_app("auth.wal");

    let (status, body) = send(&app, "GET", "/api/list-my-bookings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "GET",
        "/api/list-my-bookings",
        Some("Bearer wrong"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_admin_catalog_mutation_is_403() {
    let app = test_app("admin_403.wal");

    let (status, body) = send(
        &app,
        "POST",
        "/api/offices",
        Some(ALICE),
        Some(json!({"name": "HQ", "location": "Berlin"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());

    // Reads stay open to any authenticated user
    let (status, _) = send(&app, "GET", "/api/offices", Some(ALICE), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn booking_flow_create_conflict_cancel() {
    let app = test_app("booking_flow.wal");
    let (_, seat_id) = seed_catalog(&app).await;
    let d = tomorrow();

    let payload = json!({
        "seat_id": seat_id,
        "start_time": rfc3339(d, 10, 0),
        "end_time": rfc3339(d, 11, 0),
    });
    let (status, booking) = send(
        &app,
        "POST",
        "/api/create-booking",
        Some(ALICE),
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["user"], "alice");
    assert_eq!(booking["is_active"], true);
    let booking_id = booking["id"].as_str().unwrap().to_string();

    // Same window from another user → explicit conflict message
    let (status, body) = send(&app, "POST", "/api/create-booking", Some(BOB), Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Seat is already booked for this time period.");

    let (status, list) = send(&app, "GET", "/api/list-my-bookings", Some(ALICE), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    // A non-owner cancelling gets 404, not 403
    let cancel = json!({"booking_id": booking_id});
    let (status, _) = send(
        &app,
        "POST",
        "/api/cancel-booking",
        Some(BOB),
        Some(cancel.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        "POST",
        "/api/cancel-booking",
        Some(ALICE),
        Some(cancel.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Booking cancelled successfully.");

    // Cancelling again is 404 — inactive bookings drop out of the lookup
    let (status, _) = send(&app, "POST", "/api/cancel-booking", Some(ALICE), Some(cancel)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = send(&app, "GET", "/api/list-my-bookings", Some(ALICE), None).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn booking_in_the_past_is_400() {
    let app = test_app("booking_past.wal");
    let (_, seat_id) = seed_catalog(&app).await;
    let d = Utc::now().date_naive() - Duration::days(1);

    let (status, body) = send(
        &app,
        "POST",
        "/api/create-booking",
        Some(ALICE),
        Some(json!({
            "seat_id": seat_id,
            "start_time": rfc3339(d, 10, 0),
            "end_time": rfc3339(d, 11, 0),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot book in the past.");
}

#[tokio::test]
async fn malformed_timestamp_is_400() {
    let app = test_app("bad_ts.wal");
    let (_, seat_id) = seed_catalog(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/create-booking",
        Some(ALICE),
        Some(json!({
            "seat_id": seat_id,
            "start_time": "next tuesday",
            "end_time": "later",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("start_time"));
}

#[tokio::test]
async fn available_seats_shape_and_paging() {
    let app = test_app("avail.wal");
    let (room_id, seat_id) = seed_catalog(&app).await;
    let d = tomorrow();

    // Book 10:00-11:00, leaving 9 of the 10 working-hour slots
    let (status, _) = send(
        &app,
        "POST",
        "/api/create-booking",
        Some(ALICE),
        Some(json!({
            "seat_id": seat_id,
            "start_time": rfc3339(d, 10, 0),
            "end_time": rfc3339(d, 11, 0),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/api/available-seats?room_id={room_id}&date={d}");
    let (status, body) = send(&app, "GET", &uri, Some(BOB), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["date"], d.to_string());

    let pagination = &body["pagination"];
    assert_eq!(pagination["count"], 9);
    assert_eq!(pagination["next"], Value::Null);
    assert_eq!(pagination["previous"], Value::Null);

    let results = pagination["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["seat_id"], seat_id);
    let slots = results[0]["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 9);
    assert_eq!(slots[0], json!(["08:00", "09:00"]));
    assert!(!slots.iter().any(|s| s == &json!(["10:00", "11:00"])));

    // Explicit page_size splits the list
    let uri = format!("/api/available-seats?room_id={room_id}&date={d}&page_size=4");
    let (_, body) = send(&app, "GET", &uri, Some(BOB), None).await;
    assert_eq!(body["pagination"]["count"], 9);
    assert_eq!(body["pagination"]["next"], 2);
    assert_eq!(
        body["pagination"]["results"][0]["slots"]
            .as_array()
            .unwrap()
            .len(),
        4
    );

    let uri = format!("/api/available-seats?room_id={room_id}&date={d}&page_size=4&page=3");
    let (status, body) = send(&app, "GET", &uri, Some(BOB), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["previous"], 2);
    assert_eq!(
        body["pagination"]["results"][0]["slots"]
            .as_array()
            .unwrap()
            .len(),
        1
    );

    // Past the last page → 404, like the original paginator
    let uri = format!("/api/available-seats?room_id={room_id}&date={d}&page=99");
    let (status, _) = send(&app, "GET", &uri, Some(BOB), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn available_seats_query_validation() {
    let app = test_app("avail_bad.wal");
    let (room_id, _) = seed_catalog(&app).await;
    let d = tomorrow();

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/available-seats?date={d}"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "room_id parameter is required.");

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/available-seats?room_id={room_id}&date=08-10-2026"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid date format. Use YYYY-MM-DD.");

    let yesterday = Utc::now().date_naive() - Duration::days(1);
    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/available-seats?room_id={room_id}&date={yesterday}"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Selected date is in the past.");

    // Unknown room
    let (status, _) = send(
        &app,
        "GET",
        &format!(
            "/api/available-seats?room_id=01ARZ3NDEKTSV4RRFFQ69G5FAV&date={d}"
        ),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn room_without_active_seats_is_404() {
    let app = test_app("avail_no_seats.wal");
    let (room_id, seat_id) = seed_catalog(&app).await;
    let d = tomorrow();

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/seats/{seat_id}"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let uri = format!("/api/available-seats?room_id={room_id}&date={d}");
    let (status, _) = send(&app, "GET", &uri, Some(ALICE), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn booking_history_reports_cancelled_entries() {
    let app = test_app("history.wal");
    let (_, seat_id) = seed_catalog(&app).await;
    let d = tomorrow();

    let (_, booking) = send(
        &app,
        "POST",
        "/api/create-booking",
        Some(ALICE),
        Some(json!({
            "seat_id": seat_id,
            "start_time": rfc3339(d, 10, 0),
            "end_time": rfc3339(d, 11, 0),
        })),
    )
    .await;
    send(
        &app,
        "POST",
        "/api/cancel-booking",
        Some(ALICE),
        Some(json!({"booking_id": booking["id"]})),
    )
    .await;

    let uri = format!("/api/booking-history?seat_id={seat_id}&date={d}");
    let (status, history) = send(&app, "GET", &uri, Some(ALICE), None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["is_active"], false);

    // Another user sees nothing on the same seat/date
    let (_, history) = send(&app, "GET", &uri, Some(BOB), None).await;
    assert!(history.as_array().unwrap().is_empty());

    // Missing query parameters → 400
    let (status, _) = send(&app, "GET", "/api/booking-history", Some(ALICE), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleted_seat_rejects_new_bookings() {
    let app = test_app("deleted_seat.wal");
    let (_, seat_id) = seed_catalog(&app).await;
    let d = tomorrow();

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/seats/{seat_id}"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        "POST",
        "/api/create-booking",
        Some(ALICE),
        Some(json!({
            "seat_id": seat_id,
            "start_time": rfc3339(d, 10, 0),
            "end_time": rfc3339(d, 11, 0),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", &format!("/api/seats/{seat_id}"), Some(ALICE), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn catalog_crud_round_trip() {
    let app = test_app("catalog_crud.wal");

    let (_, office) = send(
        &app,
        "POST",
        "/api/offices",
        Some(ADMIN),
        Some(json!({"name": "HQ", "location": "Berlin"})),
    )
    .await;
    let office_id = office["id"].as_str().unwrap().to_string();

    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/api/offices/{office_id}"),
        Some(ADMIN),
        Some(json!({"name": "HQ West", "location": "Hamburg"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "HQ West");

    let (status, fetched) = send(
        &app,
        "GET",
        &format!("/api/offices/{office_id}"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["location"], "Hamburg");

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/offices/{office_id}"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/offices/{office_id}"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = send(&app, "GET", "/api/offices", Some(ALICE), None).await;
    assert!(list.as_array().unwrap().is_empty());
}
