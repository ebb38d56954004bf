use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::time::timeout;
use tracing::error;
use uuid::Uuid;

use crate::{PatientQueueDetails, QueueEntry, QueueError, QueueStats};

/// Durable collection of queue entries, partitioned by organization.
///
/// Implementations perform no business validation beyond the
/// one-active-entry-per-appointment rule on `create`. The single bulk
/// operation, [`QueueStore::renumber_waiting`], must be atomic.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Fails with `Conflict` if the appointment already has an active entry.
    async fn create(&self, entry: &QueueEntry) -> Result<QueueEntry, QueueError>;

    async fn get_by_id(&self, id: Uuid) -> Result<QueueEntry, QueueError>;

    /// Entries ordered by `position` ascending.
    async fn get_by_organization(
        &self,
        organization_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<QueueEntry>, QueueError>;

    async fn count_by_organization(&self, organization_id: Uuid) -> Result<u64, QueueError>;

    async fn get_active_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<QueueEntry>, QueueError>;

    /// Highest position among waiting, called and in-progress entries.
    async fn get_max_active_position(&self, organization_id: Uuid) -> Result<Option<i32>, QueueError>;

    /// Waiting entry holding the highest position.
    async fn get_next_waiting(&self, organization_id: Uuid) -> Result<Option<QueueEntry>, QueueError>;

    /// Waiting entry with the earliest `created_at`.
    async fn get_longest_waiting(&self, organization_id: Uuid) -> Result<Option<QueueEntry>, QueueError>;

    /// Full overwrite by id.
    async fn update(&self, entry: &QueueEntry) -> Result<QueueEntry, QueueError>;

    async fn delete(&self, id: Uuid) -> Result<(), QueueError>;

    /// Atomically renumbers the organization's waiting entries to `1..=N`
    /// by `created_at`, recomputing their wait estimates. Called and
    /// in-progress entries are moved after them (`N+1..`) so no two active
    /// entries share a position. Returns the number of waiting entries.
    async fn renumber_waiting(
        &self,
        organization_id: Uuid,
        minutes_per_position: i32,
    ) -> Result<u64, QueueError>;

    async fn get_stats(&self, organization_id: Uuid) -> Result<QueueStats, QueueError>;

    /// The patient's queue entry for an appointment on `date`, joined with
    /// identity data. `Ok(None)` when there is none.
    async fn find_patient_queue_details(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<PatientQueueDetails>, QueueError>;
}

/// Runs one store call under `deadline`. Expiry surfaces as `Io` for
/// `operation`; persistence failures are logged here once.
pub(crate) async fn call_with_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    call: F,
) -> Result<T, QueueError>
where
    F: Future<Output = Result<T, QueueError>>,
{
    match timeout(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            if e.is_io() {
                error!(operation, error = %e, "Queue store call failed");
            }
            Err(e)
        }
        Err(elapsed) => {
            error!(
                operation,
                timeout_ms = deadline.as_millis() as u64,
                "Queue store call timed out"
            );
            Err(QueueError::io(operation, elapsed))
        }
    }
}
