pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;

pub use error::*;
pub use models::*;
pub use router::create_patient_queue_router;
pub use services::*;
pub use state::QueueCellState;
