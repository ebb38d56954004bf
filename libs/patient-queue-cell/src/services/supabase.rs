use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{DatabaseError, SupabaseClient};

use crate::services::store::QueueStore;
use crate::{PatientQueueDetails, QueueEntry, QueueError, QueueStats};

const TABLE_PATH: &str = "/rest/v1/patient_queues";
const ACTIVE_FILTER: &str = "status=in.(waiting,called,in_progress)";

#[derive(Debug, Deserialize)]
struct PositionRow {
    position: i32,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

/// Queue store backed by the `patient_queues` table through PostgREST.
pub struct SupabaseQueueStore {
    supabase: SupabaseClient,
}

impl SupabaseQueueStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::with_service_role(config),
        }
    }

    async fn select(&self, operation: &'static str, query: String) -> Result<Vec<QueueEntry>, QueueError> {
        let path = format!("{}?{}", TABLE_PATH, query);
        self.supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| QueueError::from_database(operation, e))
    }

    async fn select_one(&self, operation: &'static str, query: String) -> Result<Option<QueueEntry>, QueueError> {
        Ok(self.select(operation, query).await?.into_iter().next())
    }

    async fn write(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        self.supabase
            .request_with_headers(method, path, None, body, Some(SupabaseClient::return_representation()))
            .await
            .map_err(|e| QueueError::from_database(operation, e))
    }

    fn encode(operation: &'static str, entry: &QueueEntry) -> Result<Value, QueueError> {
        serde_json::to_value(entry).map_err(|e| QueueError::io(operation, DatabaseError::Decode(e)))
    }
}

#[async_trait]
impl QueueStore for SupabaseQueueStore {
    async fn create(&self, entry: &QueueEntry) -> Result<QueueEntry, QueueError> {
        let body = Self::encode("create", entry)?;
        let rows = self.write("create", Method::POST, TABLE_PATH, Some(body)).await?;

        debug!("Inserted queue entry {} at position {}", entry.id, entry.position);
        rows.into_iter()
            .next()
            .ok_or_else(|| QueueError::io("create", "insert returned no rows"))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<QueueEntry, QueueError> {
        self.select_one("get_by_id", format!("id=eq.{}", id))
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    async fn get_by_organization(
        &self,
        organization_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        self.select(
            "get_by_organization",
            format!(
                "organization_id=eq.{}&order=position.asc,created_at.asc&limit={}&offset={}",
                organization_id, limit, offset
            ),
        )
        .await
    }

    async fn count_by_organization(&self, organization_id: Uuid) -> Result<u64, QueueError> {
        // Aggregate in the database; row responses are capped by max-rows.
        let path = format!("{}?organization_id=eq.{}&select=count", TABLE_PATH, organization_id);
        let rows: Vec<CountRow> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| QueueError::from_database("count_by_organization", e))?;
        Ok(rows.first().map(|row| row.count).unwrap_or(0))
    }

    async fn get_active_by_appointment(&self, appointment_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        self.select_one(
            "get_active_by_appointment",
            format!("appointment_id=eq.{}&{}&limit=1", appointment_id, ACTIVE_FILTER),
        )
        .await
    }

    async fn get_max_active_position(&self, organization_id: Uuid) -> Result<Option<i32>, QueueError> {
        let path = format!(
            "{}?organization_id=eq.{}&{}&select=position&order=position.desc&limit=1",
            TABLE_PATH, organization_id, ACTIVE_FILTER
        );
        let rows: Vec<PositionRow> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| QueueError::from_database("get_max_active_position", e))?;
        Ok(rows.first().map(|row| row.position))
    }

    async fn get_next_waiting(&self, organization_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        self.select_one(
            "get_next_waiting",
            format!(
                "organization_id=eq.{}&status=eq.waiting&order=position.desc&limit=1",
                organization_id
            ),
        )
        .await
    }

    async fn get_longest_waiting(&self, organization_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        self.select_one(
            "get_longest_waiting",
            format!(
                "organization_id=eq.{}&status=eq.waiting&order=created_at.asc,position.asc,id.asc&limit=1",
                organization_id
            ),
        )
        .await
    }

    async fn update(&self, entry: &QueueEntry) -> Result<QueueEntry, QueueError> {
        let body = Self::encode("update", entry)?;
        let path = format!("{}?id=eq.{}", TABLE_PATH, entry.id);

        self.write("update", Method::PATCH, &path, Some(body))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::NotFound(entry.id.to_string()))
    }

    async fn delete(&self, id: Uuid) -> Result<(), QueueError> {
        let path = format!("{}?id=eq.{}", TABLE_PATH, id);
        let rows = self.write("delete", Method::DELETE, &path, None).await?;

        if rows.is_empty() {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn renumber_waiting(&self, organization_id: Uuid, minutes_per_position: i32) -> Result<u64, QueueError> {
        let waiting: i64 = self
            .supabase
            .rpc(
                "renumber_waiting_queue",
                json!({
                    "p_organization_id": organization_id,
                    "p_minutes_per_position": minutes_per_position,
                }),
            )
            .await
            .map_err(|e| QueueError::from_database("renumber_waiting", e))?;

        debug!("Renumbered {} waiting entries for organization {}", waiting, organization_id);
        Ok(waiting.max(0) as u64)
    }

    async fn get_stats(&self, organization_id: Uuid) -> Result<QueueStats, QueueError> {
        let rows: Vec<QueueStats> = self
            .supabase
            .rpc("patient_queue_stats", json!({ "p_organization_id": organization_id }))
            .await
            .map_err(|e| QueueError::from_database("get_stats", e))?;

        Ok(rows.into_iter().next().unwrap_or_default())
    }

    async fn find_patient_queue_details(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<PatientQueueDetails>, QueueError> {
        let rows: Vec<PatientQueueDetails> = self
            .supabase
            .rpc(
                "patient_queue_details",
                json!({
                    "p_patient_id": patient_id,
                    "p_date": date,
                }),
            )
            .await
            .map_err(|e| QueueError::from_database("find_patient_queue_details", e))?;

        Ok(rows.into_iter().next())
    }
}
