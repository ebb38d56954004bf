use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_config::{
    AppConfig, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MINUTES_PER_POSITION, DEFAULT_OPERATION_TIMEOUT_MS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Called,
    InProgress,
    Completed,
    Cancelled,
}

impl QueueStatus {
    pub const ACTIVE: [QueueStatus; 3] =
        [QueueStatus::Waiting, QueueStatus::Called, QueueStatus::InProgress];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Called => "called",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// `called` is optional: a clinic may start a consultation straight from
    /// the waiting room.
    pub fn can_transition_to(&self, target: QueueStatus) -> bool {
        use QueueStatus::*;
        match (self, target) {
            (Waiting, Called) => true,
            (Waiting, InProgress) => true,
            (Called, InProgress) => true,
            (InProgress, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "waiting" => Ok(QueueStatus::Waiting),
            "called" => Ok(QueueStatus::Called),
            "in_progress" => Ok(QueueStatus::InProgress),
            "completed" => Ok(QueueStatus::Completed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(format!("unknown queue status: {}", other)),
        }
    }
}

/// One patient's slot in an organization's waiting line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub organization_id: Uuid,
    pub position: i32,
    /// Minutes; advisory only.
    pub estimated_wait_time: i32,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(appointment_id: Uuid, organization_id: Uuid, position: i32, minutes_per_position: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            appointment_id,
            organization_id,
            position,
            estimated_wait_time: estimate_wait_minutes(position, minutes_per_position),
            status: QueueStatus::Waiting,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Applies `target` if the state machine allows it.
    pub fn transition_to(&mut self, target: QueueStatus) -> bool {
        if !self.status.can_transition_to(target) {
            return false;
        }
        self.status = target;
        self.updated_at = Utc::now();
        true
    }
}

pub fn estimate_wait_minutes(position: i32, minutes_per_position: i32) -> i32 {
    position.max(0).saturating_mul(minutes_per_position)
}

/// Call order among waiting entries: earliest arrival first, then display
/// position, then id so the order is total.
pub fn call_order(a: &QueueEntry, b: &QueueEntry) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then(a.position.cmp(&b.position))
        .then(a.id.cmp(&b.id))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub waiting: u64,
    pub called: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub cancelled: u64,
    /// Mean estimated wait of the entries still waiting.
    pub average_wait_minutes: f64,
}

impl QueueStats {
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a QueueEntry>,
    {
        let mut stats = QueueStats::default();
        let mut waiting_minutes: i64 = 0;

        for entry in entries {
            stats.total += 1;
            match entry.status {
                QueueStatus::Waiting => {
                    stats.waiting += 1;
                    waiting_minutes += i64::from(entry.estimated_wait_time);
                }
                QueueStatus::Called => stats.called += 1,
                QueueStatus::InProgress => stats.in_progress += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Cancelled => stats.cancelled += 1,
            }
        }

        if stats.waiting > 0 {
            let mean = waiting_minutes as f64 / stats.waiting as f64;
            stats.average_wait_minutes = (mean * 10.0).round() / 10.0;
        }

        stats
    }

    /// Dashboard rendering, e.g. `"15 min"`.
    pub fn average_wait_display(&self) -> String {
        if self.average_wait_minutes.fract() == 0.0 {
            format!("{} min", self.average_wait_minutes as i64)
        } else {
            format!("{:.1} min", self.average_wait_minutes)
        }
    }
}

/// Identity data for the appointment behind a queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub appointment_type: String,
    pub status: String,
}

/// Queue entry joined with patient, doctor and appointment identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientQueueDetails {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub appointment_type: String,
    pub appointment_status: String,
}

impl PatientQueueDetails {
    pub fn join(entry: QueueEntry, appointment: &AppointmentRecord) -> Self {
        Self {
            entry,
            patient_id: appointment.patient_id,
            patient_name: appointment.patient_name.clone(),
            doctor_id: appointment.doctor_id,
            doctor_name: appointment.doctor_name.clone(),
            appointment_date: appointment.date,
            appointment_time: appointment.start_time,
            appointment_type: appointment.appointment_type.clone(),
            appointment_status: appointment.status.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    #[serde(alias = "call")]
    CallNext,
    #[serde(alias = "start_consultation")]
    Start,
    #[serde(alias = "complete_consultation")]
    Complete,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitRequest {
    pub appointment_id: Uuid,
    pub organization_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueActionRequest {
    pub action: QueueAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueListQuery {
    pub organization_id: Uuid,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl Pagination {
    /// Normalizes caller input: page defaults to 1, limit to 10 and is
    /// clamped to `1..=100`.
    pub fn new(page: Option<u32>, limit: Option<u32>, total: u64) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .min(MAX_PAGE_LIMIT);
        let total_pages = total.div_ceil(u64::from(limit));

        Self { page, limit, total, total_pages }
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePage {
    pub entries: Vec<QueueEntry>,
    pub pagination: Pagination,
}

/// Most store calls any locked section makes (lookup, write, renumber).
pub const STORE_CALLS_PER_SECTION: u32 = 3;

#[derive(Debug, Clone)]
pub struct QueueEngineConfig {
    pub minutes_per_position: i32,
    pub lock_timeout: Duration,
    pub operation_timeout: Duration,
    /// Upper bound for everything done while an organization lock is held.
    pub section_timeout: Duration,
}

impl Default for QueueEngineConfig {
    fn default() -> Self {
        let operation_timeout = Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS);
        Self {
            minutes_per_position: DEFAULT_MINUTES_PER_POSITION,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            operation_timeout,
            section_timeout: operation_timeout * STORE_CALLS_PER_SECTION,
        }
    }
}

impl QueueEngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let operation_timeout = config.queue_operation_timeout();
        Self {
            minutes_per_position: config.queue_minutes_per_position.max(1),
            lock_timeout: config.queue_lock_timeout(),
            operation_timeout,
            section_timeout: operation_timeout * STORE_CALLS_PER_SECTION,
        }
    }

    /// Expiry for distributed lock leases. The section is abandoned before
    /// the lease lapses; the extra operation timeout covers the lock
    /// round-trips around it.
    pub fn lease_ttl(&self) -> Duration {
        self.section_timeout + self.operation_timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventKind {
    Admitted,
    /// "You are next."
    Called,
    ConsultationStarted,
    Completed,
    Cancelled,
    Removed,
    PositionsChanged,
}

impl QueueEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEventKind::Admitted => "admitted",
            QueueEventKind::Called => "called",
            QueueEventKind::ConsultationStarted => "consultation_started",
            QueueEventKind::Completed => "completed",
            QueueEventKind::Cancelled => "cancelled",
            QueueEventKind::Removed => "removed",
            QueueEventKind::PositionsChanged => "positions_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueUpdate {
    pub organization_id: Uuid,
    pub kind: QueueEventKind,
    pub queue_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub status: Option<QueueStatus>,
    pub position: Option<i32>,
    pub estimated_wait_time: Option<i32>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl QueueUpdate {
    pub fn for_entry(kind: QueueEventKind, entry: &QueueEntry) -> Self {
        Self {
            organization_id: entry.organization_id,
            kind,
            queue_id: Some(entry.id),
            appointment_id: Some(entry.appointment_id),
            status: Some(entry.status),
            position: Some(entry.position),
            estimated_wait_time: Some(entry.estimated_wait_time),
            message: Self::message_for(kind),
            timestamp: Utc::now(),
        }
    }

    pub fn positions_changed(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            kind: QueueEventKind::PositionsChanged,
            queue_id: None,
            appointment_id: None,
            status: None,
            position: None,
            estimated_wait_time: None,
            message: Self::message_for(QueueEventKind::PositionsChanged),
            timestamp: Utc::now(),
        }
    }

    fn message_for(kind: QueueEventKind) -> String {
        match kind {
            QueueEventKind::Admitted => "Patient added to the queue",
            QueueEventKind::Called => "You are next - please proceed to the consultation room",
            QueueEventKind::ConsultationStarted => "Consultation started",
            QueueEventKind::Completed => "Consultation completed",
            QueueEventKind::Cancelled => "Queue entry cancelled",
            QueueEventKind::Removed => "Queue entry removed",
            QueueEventKind::PositionsChanged => "Queue positions updated",
        }
        .to_string()
    }
}
