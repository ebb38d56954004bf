use std::future::Future;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::services::locks::OrganizationLock;
use crate::services::notifications::QueueNotificationService;
use crate::services::store::{call_with_deadline, QueueStore};
use crate::{QueueAction, QueueEngineConfig, QueueEntry, QueueError, QueueEventKind, QueueStatus, QueueUpdate};

const COMPLETION_NOT_FOUND: &str = "queue entry not found for completion";

/// Business rules for the patient queue lifecycle.
///
/// Admission, call-next and every id-based transition run inside the
/// organization's lock, together with the renumbering they trigger, and
/// must finish within `section_timeout`. The store is the only state;
/// nothing is cached between calls.
pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
    lock: Arc<dyn OrganizationLock>,
    notifications: QueueNotificationService,
    config: QueueEngineConfig,
}

impl QueueEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        lock: Arc<dyn OrganizationLock>,
        notifications: QueueNotificationService,
        config: QueueEngineConfig,
    ) -> Self {
        Self {
            store,
            lock,
            notifications,
            config,
        }
    }

    pub fn store(&self) -> Arc<dyn QueueStore> {
        self.store.clone()
    }

    pub fn notifications(&self) -> &QueueNotificationService {
        &self.notifications
    }

    pub fn config(&self) -> &QueueEngineConfig {
        &self.config
    }

    /// Puts an appointment at the tail of its organization's queue.
    #[instrument(skip(self))]
    pub async fn admit(&self, appointment_id: Uuid, organization_id: Uuid) -> Result<QueueEntry, QueueError> {
        let entry = self
            .with_organization_lock(organization_id, self.admit_locked(appointment_id, organization_id))
            .await?;

        info!(
            queue_id = %entry.id,
            position = entry.position,
            "Admitted appointment {} to queue", appointment_id
        );
        self.notifications
            .publish(QueueUpdate::for_entry(QueueEventKind::Admitted, &entry))
            .await;
        Ok(entry)
    }

    async fn admit_locked(&self, appointment_id: Uuid, organization_id: Uuid) -> Result<QueueEntry, QueueError> {
        let existing = self
            .store_call("get_active_by_appointment", self.store.get_active_by_appointment(appointment_id))
            .await?;
        if let Some(existing) = existing {
            warn!(
                queue_id = %existing.id,
                status = %existing.status,
                "Appointment {} is already queued", appointment_id
            );
            return Err(QueueError::Conflict(format!(
                "appointment {} already has an active queue entry",
                appointment_id
            )));
        }

        let current_max = self
            .store_call("get_max_active_position", self.store.get_max_active_position(organization_id))
            .await?;
        let position = current_max.map(|max| max.max(0) + 1).unwrap_or(1);

        let entry = QueueEntry::new(appointment_id, organization_id, position, self.config.minutes_per_position);
        self.store_call("create", self.store.create(&entry)).await
    }

    /// Calls the patient who has been waiting longest.
    #[instrument(skip(self))]
    pub async fn call_next(&self, organization_id: Uuid) -> Result<QueueEntry, QueueError> {
        let entry = self
            .with_organization_lock(organization_id, self.call_next_locked(organization_id))
            .await?;

        info!(queue_id = %entry.id, position = entry.position, "Called next patient");
        self.notifications
            .publish(QueueUpdate::for_entry(QueueEventKind::Called, &entry))
            .await;
        Ok(entry)
    }

    async fn call_next_locked(&self, organization_id: Uuid) -> Result<QueueEntry, QueueError> {
        let mut entry = self
            .store_call("get_longest_waiting", self.store.get_longest_waiting(organization_id))
            .await?
            .ok_or_else(|| {
                debug!("No waiting entries for organization {}", organization_id);
                QueueError::EmptyQueue { organization_id }
            })?;

        Self::apply_transition(&mut entry, QueueStatus::Called)?;
        self.store_call("update", self.store.update(&entry)).await
    }

    #[instrument(skip(self))]
    pub async fn start_consultation(&self, queue_id: Uuid) -> Result<QueueEntry, QueueError> {
        self.transition(queue_id, QueueStatus::InProgress, None).await
    }

    #[instrument(skip(self))]
    pub async fn complete_consultation(&self, queue_id: Uuid) -> Result<QueueEntry, QueueError> {
        self.transition(queue_id, QueueStatus::Completed, Some(COMPLETION_NOT_FOUND))
            .await
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, queue_id: Uuid) -> Result<QueueEntry, QueueError> {
        self.transition(queue_id, QueueStatus::Cancelled, None).await
    }

    /// Administrative delete. Returns the entry as it was before removal.
    #[instrument(skip(self))]
    pub async fn remove(&self, queue_id: Uuid) -> Result<QueueEntry, QueueError> {
        let current = self.store_call("get_by_id", self.store.get_by_id(queue_id)).await?;
        let organization_id = current.organization_id;

        let removed = self
            .with_organization_lock(organization_id, self.remove_locked(queue_id))
            .await?;

        info!(organization_id = %organization_id, "Removed queue entry {}", queue_id);
        self.notifications
            .publish(QueueUpdate::for_entry(QueueEventKind::Removed, &removed))
            .await;
        Ok(removed)
    }

    async fn remove_locked(&self, queue_id: Uuid) -> Result<QueueEntry, QueueError> {
        let entry = self.store_call("get_by_id", self.store.get_by_id(queue_id)).await?;
        self.store_call("delete", self.store.delete(queue_id)).await?;
        self.renumber_after_mutation(entry.organization_id, "remove").await;
        Ok(entry)
    }

    /// Explicit renumbering; unlike the repair after a mutation, failures
    /// reach the caller.
    #[instrument(skip(self))]
    pub async fn renumber(&self, organization_id: Uuid) -> Result<u64, QueueError> {
        let minutes = self.config.minutes_per_position;
        let waiting = self
            .with_organization_lock(
                organization_id,
                self.store_call("renumber_waiting", self.store.renumber_waiting(organization_id, minutes)),
            )
            .await?;

        self.notifications
            .publish(QueueUpdate::positions_changed(organization_id))
            .await;
        Ok(waiting)
    }

    pub async fn get_entry(&self, queue_id: Uuid) -> Result<QueueEntry, QueueError> {
        self.store_call("get_by_id", self.store.get_by_id(queue_id)).await
    }

    pub async fn get_by_appointment(&self, appointment_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        self.store_call("get_active_by_appointment", self.store.get_active_by_appointment(appointment_id))
            .await
    }

    /// Dispatches a staff action addressed at a queue entry. `CallNext` acts
    /// on the entry's organization and may return a different entry.
    #[instrument(skip(self))]
    pub async fn apply_action(&self, queue_id: Uuid, action: QueueAction) -> Result<QueueEntry, QueueError> {
        match action {
            QueueAction::CallNext => {
                let entry = self.get_entry(queue_id).await?;
                self.call_next(entry.organization_id).await
            }
            QueueAction::Start => self.start_consultation(queue_id).await,
            QueueAction::Complete => self.complete_consultation(queue_id).await,
            QueueAction::Cancel => self.cancel(queue_id).await,
        }
    }

    async fn transition(
        &self,
        queue_id: Uuid,
        target: QueueStatus,
        not_found_context: Option<&'static str>,
    ) -> Result<QueueEntry, QueueError> {
        let with_context = |e: QueueError| match not_found_context {
            Some(message) => e.context(message),
            None => e,
        };

        let current = self
            .store_call("get_by_id", self.store.get_by_id(queue_id))
            .await
            .map_err(with_context)?;
        let organization_id = current.organization_id;

        let entry = self
            .with_organization_lock(organization_id, self.transition_locked(queue_id, target))
            .await
            .map_err(with_context)?;

        info!(
            organization_id = %organization_id,
            position = entry.position,
            "Queue entry {} is now {}", queue_id, target
        );
        self.notifications
            .publish(QueueUpdate::for_entry(Self::event_for(target), &entry))
            .await;
        Ok(entry)
    }

    async fn transition_locked(&self, queue_id: Uuid, target: QueueStatus) -> Result<QueueEntry, QueueError> {
        // Re-read under the lock; the entry may have moved since.
        let mut entry = self.store_call("get_by_id", self.store.get_by_id(queue_id)).await?;
        Self::apply_transition(&mut entry, target)?;

        let updated = self.store_call("update", self.store.update(&entry)).await?;
        if target.is_terminal() {
            self.renumber_after_mutation(updated.organization_id, target.as_str()).await;
        }
        Ok(updated)
    }

    fn apply_transition(entry: &mut QueueEntry, target: QueueStatus) -> Result<(), QueueError> {
        let from = entry.status;
        if entry.transition_to(target) {
            return Ok(());
        }

        warn!(queue_id = %entry.id, "Rejected queue transition from {} to {}", from, target);
        Err(QueueError::InvalidTransition { from, to: target })
    }

    /// Closes gaps left by a mutation. The mutation has already been
    /// persisted, so a failure here is logged and not returned.
    async fn renumber_after_mutation(&self, organization_id: Uuid, trigger: &str) {
        let minutes = self.config.minutes_per_position;
        match self
            .store_call("renumber_waiting", self.store.renumber_waiting(organization_id, minutes))
            .await
        {
            Ok(waiting) => {
                debug!(
                    organization_id = %organization_id,
                    "Renumbered {} waiting entries after {}", waiting, trigger
                );
                self.notifications
                    .publish(QueueUpdate::positions_changed(organization_id))
                    .await;
            }
            Err(e) => {
                error!(
                    organization_id = %organization_id,
                    operation = "renumber_waiting",
                    error = %e,
                    "Renumbering after {} failed; positions will be repaired on the next renumber", trigger
                );
            }
        }
    }

    fn event_for(target: QueueStatus) -> QueueEventKind {
        match target {
            QueueStatus::Called => QueueEventKind::Called,
            QueueStatus::InProgress => QueueEventKind::ConsultationStarted,
            QueueStatus::Completed => QueueEventKind::Completed,
            QueueStatus::Cancelled => QueueEventKind::Cancelled,
            QueueStatus::Waiting => QueueEventKind::PositionsChanged,
        }
    }

    async fn with_organization_lock<T, F>(&self, organization_id: Uuid, operation: F) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, QueueError>>,
    {
        let lease = self.lock.acquire(organization_id).await?;
        let result = match timeout(self.config.section_timeout, operation).await {
            Ok(result) => result,
            Err(elapsed) => {
                error!(
                    organization_id = %organization_id,
                    timeout_ms = self.config.section_timeout.as_millis() as u64,
                    "Locked queue section timed out"
                );
                Err(QueueError::io("locked_section", elapsed))
            }
        };

        if let Err(e) = self.lock.release(lease).await {
            warn!(organization_id = %organization_id, "Failed to release queue lock: {}", e);
        }
        result
    }

    async fn store_call<T, F>(&self, operation: &'static str, call: F) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, QueueError>>,
    {
        call_with_deadline(operation, self.config.operation_timeout, call).await
    }
}
