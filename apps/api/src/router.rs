use std::sync::Arc;

use axum::{routing::get, Router};

use patient_queue_cell::{create_patient_queue_router, QueueCellState};

pub fn create_router(queue_state: Arc<QueueCellState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Amae Clinic API is running!" }))
        .nest("/api/v1", create_patient_queue_router(queue_state))
}
