use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::{header, request::Parts, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use ulid::Ulid;

use crate::auth::{Identity, IdentityProvider};
use crate::engine::{now_ms, Engine, EngineError};
use crate::limits::MAX_PAGE_SIZE;
use crate::model::{BookingInfo, Ms, OfficeInfo, RoomInfo, SeatInfo};
use crate::observability;
use crate::pagination;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub identity: Arc<dyn IdentityProvider>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/create-booking", post(create_booking))
        .route("/api/cancel-booking", post(cancel_booking))
        .route("/api/list-my-bookings", get(list_my_bookings))
        .route("/api/booking-history", get(booking_history))
        .route("/api/available-seats", get(available_seats))
        .route("/api/offices", get(list_offices).post(create_office))
        .route(
            "/api/offices/{id}",
            get(get_office).put(update_office).delete(delete_office),
        )
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route(
            "/api/rooms/{id}",
            get(get_room).put(update_room).delete(delete_room),
        )
        .route("/api/seats", get(list_seats).post(create_seat))
        .route(
            "/api/seats/{id}",
            get(get_seat).put(update_seat).delete(delete_seat),
        )
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::counter!(observability::REQUESTS_TOTAL, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

// ── Errors ───────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized,
    Forbidden,
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "invalid or missing bearer token".into(),
            ),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "admin privileges required".into()),
            ApiError::Engine(e) => match e {
                EngineError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
                EngineError::LimitExceeded(msg) => {
                    (StatusCode::BAD_REQUEST, format!("limit exceeded: {msg}"))
                }
                EngineError::Conflict(_) => (
                    StatusCode::BAD_REQUEST,
                    "Seat is already booked for this time period.".into(),
                ),
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not found".into()),
                EngineError::WalError(e) => {
                    tracing::error!("WAL error: {e}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
                }
            },
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ── Authentication extractors ────────────────────────────────────

pub struct AuthedUser(pub Identity);

impl axum::extract::FromRequestParts<AppState> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let token = header_value.strip_prefix("Bearer ").unwrap_or("");
        if token.is_empty() {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(ApiError::Unauthorized);
        }
        match state.identity.verify(token).await {
            Some(identity) => Ok(AuthedUser(identity)),
            None => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(ApiError::Unauthorized)
            }
        }
    }
}

/// Catalog mutations are admin-only; everyone else gets 403.
pub struct AdminUser(pub Identity);

impl axum::extract::FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthedUser(identity) = AuthedUser::from_request_parts(parts, state).await?;
        if !identity.is_admin {
            return Err(ApiError::Forbidden);
        }
        Ok(AdminUser(identity))
    }
}

// ── Time and parameter helpers ───────────────────────────────────

fn parse_instant(value: &str, field: &str) -> Result<Ms, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| ApiError::BadRequest(format!("invalid {field}: expected an RFC 3339 timestamp")))
}

fn fmt_instant(tz: Tz, at: Ms) -> String {
    DateTime::from_timestamp_millis(at)
        .map(|dt| dt.with_timezone(&tz).to_rfc3339())
        .unwrap_or_else(|| at.to_string())
}

fn fmt_hhmm(tz: Tz, at: Ms) -> String {
    DateTime::from_timestamp_millis(at)
        .map(|dt| dt.with_timezone(&tz).format("%H:%M").to_string())
        .unwrap_or_else(|| at.to_string())
}

fn required<'q>(q: &'q HashMap<String, String>, key: &str) -> Result<&'q str, ApiError> {
    q.get(key)
        .map(String::as_str)
        .ok_or_else(|| ApiError::BadRequest(format!("{key} parameter is required.")))
}

fn parse_ulid(raw: &str, field: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::BadRequest(format!("invalid {field}")))
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest("Invalid date format. Use YYYY-MM-DD.".into()))
}

// ── Booking endpoints ────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateBookingRequest {
    seat_id: Ulid,
    start_time: String,
    end_time: String,
}

#[derive(Serialize)]
struct BookingResponse {
    id: String,
    seat_id: String,
    user: String,
    start_time: String,
    end_time: String,
    created_at: String,
    is_active: bool,
}

fn booking_response(tz: Tz, b: &BookingInfo) -> BookingResponse {
    BookingResponse {
        id: b.id.to_string(),
        seat_id: b.seat_id.to_string(),
        user: b.user.clone(),
        start_time: fmt_instant(tz, b.start),
        end_time: fmt_instant(tz, b.end),
        created_at: fmt_instant(tz, b.created_at),
        is_active: b.is_active,
    }
}

async fn create_booking(
    State(state): State<AppState>,
    AuthedUser(identity): AuthedUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError> {
    let start = parse_instant(&req.start_time, "start_time")?;
    let end = parse_instant(&req.end_time, "end_time")?;
    let booking = state
        .engine
        .create_booking(&identity.user, req.seat_id, start, end)
        .await?;
    let tz = state.engine.settings.timezone;
    Ok((StatusCode::CREATED, Json(booking_response(tz, &booking))))
}

#[derive(Deserialize)]
struct CancelBookingRequest {
    booking_id: Ulid,
}

async fn cancel_booking(
    State(state): State<AppState>,
    AuthedUser(identity): AuthedUser,
    Json(req): Json<CancelBookingRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .engine
        .cancel_booking(&identity.user, req.booking_id)
        .await?;
    Ok(Json(json!({ "message": "Booking cancelled successfully." })))
}

async fn list_my_bookings(
    State(state): State<AppState>,
    AuthedUser(identity): AuthedUser,
) -> Result<Json<Vec<BookingResponse>>, ApiError> {
    let bookings = state.engine.list_bookings_for_user(&identity.user).await?;
    let tz = state.engine.settings.timezone;
    Ok(Json(bookings.iter().map(|b| booking_response(tz, b)).collect()))
}

async fn booking_history(
    State(state): State<AppState>,
    AuthedUser(identity): AuthedUser,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<Vec<BookingResponse>>, ApiError> {
    let seat_id = parse_ulid(required(&q, "seat_id")?, "seat_id")?;
    let date = parse_date(required(&q, "date")?)?;
    let bookings = state
        .engine
        .booking_history(&identity.user, seat_id, date)
        .await?;
    let tz = state.engine.settings.timezone;
    Ok(Json(bookings.iter().map(|b| booking_response(tz, b)).collect()))
}

// ── Availability ─────────────────────────────────────────────────

#[derive(Serialize)]
struct SeatSlotsResponse {
    seat_id: String,
    slots: Vec<[String; 2]>,
}

#[derive(Serialize)]
struct PaginationResponse {
    count: usize,
    next: Option<u32>,
    previous: Option<u32>,
    results: Vec<SeatSlotsResponse>,
}

#[derive(Serialize)]
struct AvailableSeatsResponse {
    date: String,
    pagination: PaginationResponse,
}

async fn available_seats(
    State(state): State<AppState>,
    AuthedUser(_identity): AuthedUser,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<AvailableSeatsResponse>, ApiError> {
    let room_id = parse_ulid(required(&q, "room_id")?, "room_id")?;
    let date = parse_date(required(&q, "date")?)?;
    let page: u32 = match q.get("page") {
        None => 1,
        Some(raw) => raw
            .parse()
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| ApiError::BadRequest("invalid page".into()))?,
    };
    let settings = &state.engine.settings;
    let page_size: usize = match q.get("page_size") {
        None => settings.page_size,
        Some(raw) => raw
            .parse()
            .ok()
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .ok_or_else(|| ApiError::BadRequest("invalid page_size".into()))?,
    };
    if date < settings.local_date(now_ms()) {
        return Err(ApiError::BadRequest("Selected date is in the past.".into()));
    }

    let per_seat = state.engine.available_seats_for_room(room_id, date).await?;
    if per_seat.is_empty() {
        return Err(ApiError::NotFound("no active seats in room".into()));
    }

    let rows: Vec<(Ulid, crate::model::Span)> = per_seat
        .iter()
        .flat_map(|s| s.slots.iter().map(|slot| (s.seat_id, *slot)))
        .collect();
    let page_obj = pagination::paginate(&rows, page, page_size)
        .map_err(|_| ApiError::NotFound("invalid page".into()))?;

    let tz = settings.timezone;
    let results = pagination::regroup(page_obj.items)
        .into_iter()
        .map(|(seat_id, slots)| SeatSlotsResponse {
            seat_id: seat_id.to_string(),
            slots: slots
                .iter()
                .map(|s| [fmt_hhmm(tz, s.start), fmt_hhmm(tz, s.end)])
                .collect(),
        })
        .collect();

    Ok(Json(AvailableSeatsResponse {
        date: date.to_string(),
        pagination: PaginationResponse {
            count: page_obj.count,
            next: page_obj.next,
            previous: page_obj.previous,
            results,
        },
    }))
}

// ── Catalog: offices ─────────────────────────────────────────────

#[derive(Deserialize)]
struct OfficePayload {
    name: String,
    location: String,
}

#[derive(Serialize)]
struct OfficeResponse {
    id: String,
    name: String,
    location: String,
    is_active: bool,
}

fn office_response(o: &OfficeInfo) -> OfficeResponse {
    OfficeResponse {
        id: o.id.to_string(),
        name: o.name.clone(),
        location: o.location.clone(),
        is_active: o.is_active,
    }
}

async fn list_offices(
    State(state): State<AppState>,
    AuthedUser(_identity): AuthedUser,
) -> Json<Vec<OfficeResponse>> {
    Json(state.engine.list_offices().iter().map(office_response).collect())
}

async fn create_office(
    State(state): State<AppState>,
    AdminUser(_identity): AdminUser,
    Json(payload): Json<OfficePayload>,
) -> Result<(StatusCode, Json<OfficeResponse>), ApiError> {
    let office = state
        .engine
        .create_office(payload.name, payload.location)
        .await?;
    Ok((StatusCode::CREATED, Json(office_response(&office))))
}

async fn get_office(
    State(state): State<AppState>,
    AuthedUser(_identity): AuthedUser,
    Path(id): Path<Ulid>,
) -> Result<Json<OfficeResponse>, ApiError> {
    Ok(Json(office_response(&state.engine.get_office(id)?)))
}

async fn update_office(
    State(state): State<AppState>,
    AdminUser(_identity): AdminUser,
    Path(id): Path<Ulid>,
    Json(payload): Json<OfficePayload>,
) -> Result<Json<OfficeResponse>, ApiError> {
    let office = state
        .engine
        .update_office(id, payload.name, payload.location)
        .await?;
    Ok(Json(office_response(&office)))
}

async fn delete_office(
    State(state): State<AppState>,
    AdminUser(_identity): AdminUser,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.engine.deactivate_office(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Catalog: rooms ───────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateRoomPayload {
    office_id: Ulid,
    name: String,
}

#[derive(Deserialize)]
struct UpdateRoomPayload {
    name: String,
}

#[derive(Serialize)]
struct RoomResponse {
    id: String,
    office_id: String,
    name: String,
    is_active: bool,
}

fn room_response(r: &RoomInfo) -> RoomResponse {
    RoomResponse {
        id: r.id.to_string(),
        office_id: r.office_id.to_string(),
        name: r.name.clone(),
        is_active: r.is_active,
    }
}

async fn list_rooms(
    State(state): State<AppState>,
    AuthedUser(_identity): AuthedUser,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<Vec<RoomResponse>>, ApiError> {
    let office_id = match q.get("office_id") {
        Some(raw) => Some(parse_ulid(raw, "office_id")?),
        None => None,
    };
    Ok(Json(
        state.engine.list_rooms(office_id).iter().map(room_response).collect(),
    ))
}

async fn create_room(
    State(state): State<AppState>,
    AdminUser(_identity): AdminUser,
    Json(payload): Json<CreateRoomPayload>,
) -> Result<(StatusCode, Json<RoomResponse>), ApiError> {
    let room = state
        .engine
        .create_room(payload.office_id, payload.name)
        .await?;
    Ok((StatusCode::CREATED, Json(room_response(&room))))
}

async fn get_room(
    State(state): State<AppState>,
    AuthedUser(_identity): AuthedUser,
    Path(id): Path<Ulid>,
) -> Result<Json<RoomResponse>, ApiError> {
    Ok(Json(room_response(&state.engine.get_room(id)?)))
}

async fn update_room(
    State(state): State<AppState>,
    AdminUser(_identity): AdminUser,
    Path(id): Path<Ulid>,
    Json(payload): Json<UpdateRoomPayload>,
) -> Result<Json<RoomResponse>, ApiError> {
    Ok(Json(room_response(
        &state.engine.update_room(id, payload.name).await?,
    )))
}

async fn delete_room(
    State(state): State<AppState>,
    AdminUser(_identity): AdminUser,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.engine.deactivate_room(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Catalog: seats ───────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateSeatPayload {
    room_id: Ulid,
    number: u32,
}

#[derive(Deserialize)]
struct UpdateSeatPayload {
    number: u32,
}

#[derive(Serialize)]
struct SeatResponse {
    id: String,
    room_id: String,
    number: u32,
    is_active: bool,
}

fn seat_response(s: &SeatInfo) -> SeatResponse {
    SeatResponse {
        id: s.id.to_string(),
        room_id: s.room_id.to_string(),
        number: s.number,
        is_active: s.is_active,
    }
}

async fn list_seats(
    State(state): State<AppState>,
    AuthedUser(_identity): AuthedUser,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<Vec<SeatResponse>>, ApiError> {
    let room_id = match q.get("room_id") {
        Some(raw) => Some(parse_ulid(raw, "room_id")?),
        None => None,
    };
    Ok(Json(
        state
            .engine
            .list_seats(room_id)
            .await
            .iter()
            .map(seat_response)
            .collect(),
    ))
}

async fn create_seat(
    State(state): State<AppState>,
    AdminUser(_identity): AdminUser,
    Json(payload): Json<CreateSeatPayload>,
) -> Result<(StatusCode, Json<SeatResponse>), ApiError> {
    let seat = state
        .engine
        .create_seat(payload.room_id, payload.number)
        .await?;
    Ok((StatusCode::CREATED, Json(seat_response(&seat))))
}

async fn get_seat(
    State(state): State<AppState>,
    AuthedUser(_identity): AuthedUser,
    Path(id): Path<Ulid>,
) -> Result<Json<SeatResponse>, ApiError> {
    Ok(Json(seat_response(&state.engine.get_seat(id).await?)))
}

async fn update_seat(
    State(state): State<AppState>,
    AdminUser(_identity): AdminUser,
    Path(id): Path<Ulid>,
    Json(payload): Json<UpdateSeatPayload>,
) -> Result<Json<SeatResponse>, ApiError> {
    Ok(Json(seat_response(
        &state.engine.update_seat(id, payload.number).await?,
    )))
}

async fn delete_seat(
    State(state): State<AppState>,
    AdminUser(_identity): AdminUser,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.engine.deactivate_seat(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
