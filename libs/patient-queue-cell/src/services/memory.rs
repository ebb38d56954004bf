use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::services::store::QueueStore;
use crate::{
    call_order, estimate_wait_minutes, AppointmentRecord, PatientQueueDetails, QueueEntry,
    QueueError, QueueStats, QueueStatus,
};

/// Process-local queue store for single-instance deployments and tests.
///
/// Each operation runs under one lock acquisition, so `renumber_waiting`
/// is atomic with respect to every other store call.
#[derive(Default)]
pub struct InMemoryQueueStore {
    entries: RwLock<HashMap<Uuid, QueueEntry>>,
    appointments: RwLock<HashMap<Uuid, AppointmentRecord>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers appointment identity used by the enriched patient lookup.
    pub async fn register_appointment(&self, appointment: AppointmentRecord) {
        let mut appointments = self.appointments.write().await;
        appointments.insert(appointment.appointment_id, appointment);
    }

    pub async fn snapshot(&self, organization_id: Uuid) -> Vec<QueueEntry> {
        let entries = self.entries.read().await;
        let mut list: Vec<QueueEntry> = entries
            .values()
            .filter(|e| e.organization_id == organization_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| call_order(a, b)));
        list
    }
}

fn organization_entries(
    entries: &HashMap<Uuid, QueueEntry>,
    organization_id: Uuid,
) -> impl Iterator<Item = &QueueEntry> {
    entries.values().filter(move |e| e.organization_id == organization_id)
}

fn renumber_active(
    entries: &mut HashMap<Uuid, QueueEntry>,
    organization_id: Uuid,
    minutes_per_position: i32,
) -> u64 {
    let mut active: Vec<(bool, QueueEntry)> = organization_entries(entries, organization_id)
        .filter(|e| e.is_active())
        .map(|e| (e.status != QueueStatus::Waiting, e.clone()))
        .collect();
    // Waiting entries first, each group by arrival.
    active.sort_by(|(a_served, a), (b_served, b)| a_served.cmp(b_served).then_with(|| call_order(a, b)));

    let now = Utc::now();
    let mut waiting = 0;

    for (index, (served, entry)) in active.iter().enumerate() {
        let position = index as i32 + 1;
        let Some(stored) = entries.get_mut(&entry.id) else {
            continue;
        };

        let mut changed = stored.position != position;
        stored.position = position;

        if !served {
            waiting += 1;
            let estimate = estimate_wait_minutes(position, minutes_per_position);
            changed |= stored.estimated_wait_time != estimate;
            stored.estimated_wait_time = estimate;
        }

        if changed {
            stored.updated_at = now;
        }
    }

    waiting
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn create(&self, entry: &QueueEntry) -> Result<QueueEntry, QueueError> {
        let mut entries = self.entries.write().await;

        if entries.contains_key(&entry.id) {
            return Err(QueueError::Conflict(format!("queue entry {} already exists", entry.id)));
        }
        if entry.is_active() {
            if let Some(existing) = entries
                .values()
                .find(|e| e.appointment_id == entry.appointment_id && e.is_active())
            {
                return Err(QueueError::Conflict(format!(
                    "appointment {} already has active queue entry {}",
                    entry.appointment_id, existing.id
                )));
            }
        }

        entries.insert(entry.id, entry.clone());
        debug!("Stored queue entry {} at position {}", entry.id, entry.position);
        Ok(entry.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<QueueEntry, QueueError> {
        let entries = self.entries.read().await;
        entries
            .get(&id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    async fn get_by_organization(
        &self,
        organization_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let entries = self.entries.read().await;
        let mut list: Vec<QueueEntry> = organization_entries(&entries, organization_id).cloned().collect();
        list.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| call_order(a, b)));

        Ok(list
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_by_organization(&self, organization_id: Uuid) -> Result<u64, QueueError> {
        let entries = self.entries.read().await;
        Ok(organization_entries(&entries, organization_id).count() as u64)
    }

    async fn get_active_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .find(|e| e.appointment_id == appointment_id && e.is_active())
            .cloned())
    }

    async fn get_max_active_position(&self, organization_id: Uuid) -> Result<Option<i32>, QueueError> {
        let entries = self.entries.read().await;
        Ok(organization_entries(&entries, organization_id)
            .filter(|e| e.is_active())
            .map(|e| e.position)
            .max())
    }

    async fn get_next_waiting(&self, organization_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        let entries = self.entries.read().await;
        Ok(organization_entries(&entries, organization_id)
            .filter(|e| e.status == QueueStatus::Waiting)
            .max_by(|a, b| a.position.cmp(&b.position).then_with(|| call_order(b, a)))
            .cloned())
    }

    async fn get_longest_waiting(&self, organization_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        let entries = self.entries.read().await;
        Ok(organization_entries(&entries, organization_id)
            .filter(|e| e.status == QueueStatus::Waiting)
            .min_by(|a, b| call_order(a, b))
            .cloned())
    }

    async fn update(&self, entry: &QueueEntry) -> Result<QueueEntry, QueueError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&entry.id) {
            Some(stored) => {
                *stored = entry.clone();
                Ok(entry.clone())
            }
            None => Err(QueueError::NotFound(entry.id.to_string())),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), QueueError> {
        let mut entries = self.entries.write().await;
        entries
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    async fn renumber_waiting(
        &self,
        organization_id: Uuid,
        minutes_per_position: i32,
    ) -> Result<u64, QueueError> {
        let mut entries = self.entries.write().await;
        let waiting = renumber_active(&mut entries, organization_id, minutes_per_position);
        debug!("Renumbered {} waiting entries for organization {}", waiting, organization_id);
        Ok(waiting)
    }

    async fn get_stats(&self, organization_id: Uuid) -> Result<QueueStats, QueueError> {
        let entries = self.entries.read().await;
        Ok(QueueStats::from_entries(organization_entries(&entries, organization_id)))
    }

    async fn find_patient_queue_details(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<PatientQueueDetails>, QueueError> {
        let appointments = self.appointments.read().await;
        let entries = self.entries.read().await;

        let todays: HashMap<Uuid, &AppointmentRecord> = appointments
            .values()
            .filter(|a| a.patient_id == patient_id && a.date == date)
            .map(|a| (a.appointment_id, a))
            .collect();

        // Prefer the live entry; fall back to the most recent one of the day.
        let best = entries
            .values()
            .filter(|e| todays.contains_key(&e.appointment_id))
            .max_by(|a, b| {
                a.is_active()
                    .cmp(&b.is_active())
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });

        Ok(best.and_then(|entry| {
            todays
                .get(&entry.appointment_id)
                .map(|appointment| PatientQueueDetails::join(entry.clone(), appointment))
        }))
    }
}
