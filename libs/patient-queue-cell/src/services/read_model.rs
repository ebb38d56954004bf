use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::services::store::{call_with_deadline, QueueStore};
use crate::{Pagination, PatientQueueDetails, QueuePage, QueueError, QueueStats};

/// Query path for dashboards and patient apps. Never mutates entries.
pub struct QueueReadModel {
    store: Arc<dyn QueueStore>,
    operation_timeout: Duration,
}

impl QueueReadModel {
    pub fn new(store: Arc<dyn QueueStore>, operation_timeout: Duration) -> Self {
        Self {
            store,
            operation_timeout,
        }
    }

    /// The patient's queue entry for an appointment on `date`.
    ///
    /// `Ok(None)` means the patient simply has nothing queued that day.
    #[instrument(skip(self))]
    pub async fn get_enriched_by_patient(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<PatientQueueDetails>, QueueError> {
        let details = call_with_deadline(
            "find_patient_queue_details",
            self.operation_timeout,
            self.store.find_patient_queue_details(patient_id, date),
        )
        .await?;
        if details.is_none() {
            debug!("No queue entry for patient {} on {}", patient_id, date);
        }
        Ok(details)
    }

    pub async fn get_stats_by_organization(&self, organization_id: Uuid) -> Result<QueueStats, QueueError> {
        call_with_deadline("get_stats", self.operation_timeout, self.store.get_stats(organization_id)).await
    }

    /// Position-ordered page. `page` and `limit` are normalized by
    /// [`Pagination::new`].
    #[instrument(skip(self))]
    pub async fn list_by_organization(
        &self,
        organization_id: Uuid,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<QueuePage, QueueError> {
        let total = call_with_deadline(
            "count_by_organization",
            self.operation_timeout,
            self.store.count_by_organization(organization_id),
        )
        .await?;
        let pagination = Pagination::new(page, limit, total);

        let entries = call_with_deadline(
            "get_by_organization",
            self.operation_timeout,
            self.store
                .get_by_organization(organization_id, pagination.limit, pagination.offset()),
        )
        .await?;

        Ok(QueuePage { entries, pagination })
    }
}
