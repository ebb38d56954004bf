use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{
    admit_patient, apply_queue_action, call_next_patient, cancel_queue_entry,
    complete_consultation, get_patient_queue, get_queue_entry, get_queue_stats, list_queue,
    remove_queue_entry, start_consultation, stream_queue_events,
};
use crate::QueueCellState;

pub fn create_patient_queue_router(state: Arc<QueueCellState>) -> Router {
    let protected_routes = Router::new()
        .route("/queues", post(admit_patient).get(list_queue))
        .route("/queues/{queue_id}", get(get_queue_entry).delete(remove_queue_entry))
        .route("/queues/{queue_id}/start", post(start_consultation))
        .route("/queues/{queue_id}/complete", post(complete_consultation))
        .route("/queues/{queue_id}/cancel", post(cancel_queue_entry))
        .route("/queues/{queue_id}/actions", post(apply_queue_action))
        .route("/organizations/{organization_id}/queue/call-next", post(call_next_patient))
        .route("/organizations/{organization_id}/queue/stats", get(get_queue_stats))
        .route("/organizations/{organization_id}/queue/events", get(stream_queue_events))
        .route("/patients/{patient_id}/queue", get(get_patient_queue))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
