use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    Extension,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::{auth::User, error::AppError};

use crate::{AdmitRequest, QueueActionRequest, QueueCellState, QueueEntry, QueueListQuery};

fn require_staff_for(user: &User, organization_id: Uuid) -> Result<(), AppError> {
    if !user.is_staff() {
        warn!("User {} without staff role attempted a queue operation", user.id);
        return Err(AppError::Forbidden("Queue operations require a staff role".to_string()));
    }
    if !user.can_access_organization(&organization_id.to_string()) {
        warn!("User {} denied access to organization {}", user.id, organization_id);
        return Err(AppError::Forbidden("Not allowed to access this organization's queue".to_string()));
    }
    Ok(())
}

/// Loads the entry and checks the caller may act on its organization.
async fn authorized_entry(state: &QueueCellState, user: &User, queue_id: Uuid) -> Result<QueueEntry, AppError> {
    let entry = state.engine.get_entry(queue_id).await?;
    require_staff_for(user, entry.organization_id)?;
    Ok(entry)
}

fn entry_response(entry: QueueEntry, message: &str) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": entry,
        "message": message
    }))
}

/// Admit an appointment into its organization's queue
pub async fn admit_patient(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Json(request): Json<AdmitRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_staff_for(&user, request.organization_id)?;
    info!("Admit request for appointment {} from user {}", request.appointment_id, user.id);

    let entry = state
        .engine
        .admit(request.appointment_id, request.organization_id)
        .await?;

    Ok((StatusCode::CREATED, entry_response(entry, "Patient added to queue")))
}

pub async fn list_queue(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Query(query): Query<QueueListQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff_for(&user, query.organization_id)?;

    let page = state
        .read_model
        .list_by_organization(query.organization_id, query.page, query.limit)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": page.entries,
        "pagination": page.pagination,
        "message": "Queue retrieved"
    })))
}

pub async fn get_queue_entry(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let entry = authorized_entry(&state, &user, queue_id).await?;
    Ok(entry_response(entry, "Queue entry retrieved"))
}

pub async fn remove_queue_entry(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    authorized_entry(&state, &user, queue_id).await?;
    info!("Remove request for queue entry {} from user {}", queue_id, user.id);

    let removed = state.engine.remove(queue_id).await?;
    Ok(entry_response(removed, "Queue entry removed"))
}

pub async fn start_consultation(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    authorized_entry(&state, &user, queue_id).await?;

    let entry = state.engine.start_consultation(queue_id).await?;
    Ok(entry_response(entry, "Consultation started"))
}

pub async fn complete_consultation(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    authorized_entry(&state, &user, queue_id).await?;

    let entry = state.engine.complete_consultation(queue_id).await?;
    Ok(entry_response(entry, "Consultation completed"))
}

pub async fn cancel_queue_entry(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    authorized_entry(&state, &user, queue_id).await?;

    let entry = state.engine.cancel(queue_id).await?;
    Ok(entry_response(entry, "Queue entry cancelled"))
}

/// Generic staff action endpoint (`call_next`, `start`, `complete`, `cancel`)
pub async fn apply_queue_action(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(queue_id): Path<Uuid>,
    Json(request): Json<QueueActionRequest>,
) -> Result<Json<Value>, AppError> {
    authorized_entry(&state, &user, queue_id).await?;
    info!("Queue action {:?} on entry {} from user {}", request.action, queue_id, user.id);

    let entry = state.engine.apply_action(queue_id, request.action).await?;
    Ok(entry_response(entry, "Queue action applied"))
}

pub async fn call_next_patient(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(organization_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff_for(&user, organization_id)?;

    let entry = state.engine.call_next(organization_id).await?;
    Ok(entry_response(entry, "Next patient called"))
}

pub async fn get_queue_stats(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(organization_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff_for(&user, organization_id)?;

    let stats = state.read_model.get_stats_by_organization(organization_id).await?;
    Ok(Json(json!({
        "success": true,
        "data": {
            "total": stats.total,
            "waiting": stats.waiting,
            "called": stats.called,
            "in_progress": stats.in_progress,
            "completed": stats.completed,
            "cancelled": stats.cancelled,
            "average_wait_minutes": stats.average_wait_minutes,
            "average_wait_time": stats.average_wait_display()
        },
        "message": "Queue statistics retrieved"
    })))
}

/// Today's queue entry for a patient; `data` is `null` when nothing is queued.
pub async fn get_patient_queue(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let is_self = user.id.eq_ignore_ascii_case(&patient_id.to_string());
    if !is_self && !user.is_staff() {
        return Err(AppError::Forbidden("Not allowed to view this patient's queue".to_string()));
    }

    let today = Utc::now().date_naive();
    let details = state.read_model.get_enriched_by_patient(patient_id, today).await?;

    if let Some(details) = &details {
        if !is_self {
            require_staff_for(&user, details.entry.organization_id)?;
        }
    }

    let message = if details.is_some() {
        "Queue entry retrieved"
    } else {
        "No queue entry for today"
    };

    Ok(Json(json!({
        "success": true,
        "data": details,
        "message": message
    })))
}

/// Live queue updates for one organization as server-sent events, one
/// `QueueUpdate` per event named after its kind.
pub async fn stream_queue_events(
    State(state): State<Arc<QueueCellState>>,
    Extension(user): Extension<User>,
    Path(organization_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_staff_for(&user, organization_id)?;
    info!("User {} subscribed to queue events of organization {}", user.id, organization_id);

    let receiver = state.notifications.subscribe(organization_id).await;
    let events = BroadcastStream::new(receiver).filter_map(move |update| match update {
        Ok(update) => match Event::default().event(update.kind.as_str()).json_data(&update) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Failed to encode queue update: {}", e);
                None
            }
        },
        Err(lagged) => {
            debug!("Queue event subscriber for {} lagged: {}", organization_id, lagged);
            None
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
