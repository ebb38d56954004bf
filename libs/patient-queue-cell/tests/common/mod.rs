#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveTime, Utc};
use uuid::Uuid;

use patient_queue_cell::*;

pub fn engine_config() -> QueueEngineConfig {
    QueueEngineConfig {
        minutes_per_position: 15,
        lock_timeout: Duration::from_secs(2),
        operation_timeout: Duration::from_secs(2),
        section_timeout: Duration::from_secs(6),
    }
}

pub struct Harness {
    pub store: Arc<InMemoryQueueStore>,
    pub lock: Arc<InProcessOrganizationLock>,
    pub engine: Arc<QueueEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(engine_config())
    }

    pub fn with_config(config: QueueEngineConfig) -> Self {
        let store = Arc::new(InMemoryQueueStore::new());
        let lock = Arc::new(InProcessOrganizationLock::new(config.lock_timeout));
        let engine = Arc::new(QueueEngine::new(
            store.clone(),
            lock.clone(),
            QueueNotificationService::new(),
            config,
        ));

        Self { store, lock, engine }
    }

    pub fn read_model(&self) -> QueueReadModel {
        QueueReadModel::new(self.store.clone(), self.engine.config().operation_timeout)
    }

    /// Admits `count` fresh appointments and returns the entries in order.
    pub async fn admit_many(&self, organization_id: Uuid, count: usize) -> Vec<QueueEntry> {
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(
                self.engine
                    .admit(Uuid::new_v4(), organization_id)
                    .await
                    .expect("admission should succeed"),
            );
        }
        entries
    }

    pub async fn position_of(&self, queue_id: Uuid) -> i32 {
        self.store.get_by_id(queue_id).await.expect("entry exists").position
    }
}

/// A waiting entry that arrived `minutes_ago`, stored as-is.
pub fn waiting_entry(organization_id: Uuid, position: i32, minutes_ago: i64) -> QueueEntry {
    let mut entry = QueueEntry::new(Uuid::new_v4(), organization_id, position, 15);
    entry.created_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
    entry.updated_at = entry.created_at;
    entry
}

pub fn appointment_for(entry: &QueueEntry, patient_id: Uuid) -> AppointmentRecord {
    AppointmentRecord {
        appointment_id: entry.appointment_id,
        patient_id,
        patient_name: "Siobhan Murphy".to_string(),
        doctor_id: Uuid::new_v4(),
        doctor_name: "Dr. Eoin Kelly".to_string(),
        date: Utc::now().date_naive(),
        start_time: NaiveTime::from_hms_opt(10, 15, 0).expect("valid time"),
        appointment_type: "general_consultation".to_string(),
        status: "confirmed".to_string(),
    }
}

pub fn active_positions(entries: &[QueueEntry]) -> Vec<i32> {
    let mut positions: Vec<i32> = entries
        .iter()
        .filter(|e| e.is_active())
        .map(|e| e.position)
        .collect();
    positions.sort_unstable();
    positions
}

pub fn waiting_positions(entries: &[QueueEntry]) -> Vec<i32> {
    let mut positions: Vec<i32> = entries
        .iter()
        .filter(|e| e.status == QueueStatus::Waiting)
        .map(|e| e.position)
        .collect();
    positions.sort_unstable();
    positions
}
