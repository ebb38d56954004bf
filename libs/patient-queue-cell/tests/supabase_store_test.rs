use assert_matches::assert_matches;
use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use patient_queue_cell::*;
use shared_utils::test_utils::TestConfig;

const TABLE: &str = "/rest/v1/patient_queues";

fn store_for(server: &MockServer) -> SupabaseQueueStore {
    SupabaseQueueStore::new(&TestConfig::with_supabase_url(server.uri()).to_app_config())
}

fn row(entry: &QueueEntry) -> serde_json::Value {
    serde_json::to_value(entry).unwrap()
}

#[tokio::test]
async fn test_create_inserts_with_service_role() {
    let server = MockServer::start().await;
    let entry = QueueEntry::new(Uuid::new_v4(), Uuid::new_v4(), 3, 15);

    Mock::given(method("POST"))
        .and(path(TABLE))
        .and(header("apikey", "test-service-role-key"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({ "position": 3, "status": "waiting" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row(&entry)])))
        .expect(1)
        .mount(&server)
        .await;

    let created = store_for(&server).create(&entry).await.unwrap();

    assert_eq!(created, entry);
}

#[tokio::test]
async fn test_unique_violation_maps_to_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TABLE))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"uq_patient_queues_active_appointment\""
        })))
        .mount(&server)
        .await;

    let entry = QueueEntry::new(Uuid::new_v4(), Uuid::new_v4(), 1, 15);
    let result = store_for(&server).create(&entry).await;

    assert_matches!(result, Err(QueueError::Conflict(msg)) if msg.contains("23505"));
}

#[tokio::test]
async fn test_get_by_id_missing_row_is_not_found() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path(TABLE))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = store_for(&server).get_by_id(id).await;

    assert_matches!(result, Err(QueueError::NotFound(_)));
}

#[tokio::test]
async fn test_longest_waiting_orders_by_arrival() {
    let server = MockServer::start().await;
    let org = Uuid::new_v4();
    let entry = QueueEntry::new(Uuid::new_v4(), org, 4, 15);

    Mock::given(method("GET"))
        .and(path(TABLE))
        .and(query_param("organization_id", format!("eq.{}", org)))
        .and(query_param("status", "eq.waiting"))
        .and(query_param("order", "created_at.asc,position.asc,id.asc"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(&entry)])))
        .mount(&server)
        .await;

    let found = store_for(&server).get_longest_waiting(org).await.unwrap();

    assert_eq!(found.map(|e| e.id), Some(entry.id));
}

#[tokio::test]
async fn test_next_waiting_keeps_highest_position_lookup() {
    let server = MockServer::start().await;
    let org = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(TABLE))
        .and(query_param("order", "position.desc"))
        .and(query_param("status", "eq.waiting"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    assert!(store_for(&server).get_next_waiting(org).await.unwrap().is_none());
}

#[tokio::test]
async fn test_max_active_position_filters_active_statuses() {
    let server = MockServer::start().await;
    let org = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(TABLE))
        .and(query_param("status", "in.(waiting,called,in_progress)"))
        .and(query_param("select", "position"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "position": 7 }])))
        .mount(&server)
        .await;

    let max = store_for(&server).get_max_active_position(org).await.unwrap();

    assert_eq!(max, Some(7));
}

#[tokio::test]
async fn test_update_with_no_matching_row_is_not_found() {
    let server = MockServer::start().await;
    let entry = QueueEntry::new(Uuid::new_v4(), Uuid::new_v4(), 1, 15);

    Mock::given(method("PATCH"))
        .and(path(TABLE))
        .and(query_param("id", format!("eq.{}", entry.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = store_for(&server).update(&entry).await;

    assert_matches!(result, Err(QueueError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_returns_not_found_for_missing_row() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(TABLE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = store_for(&server).delete(Uuid::new_v4()).await;

    assert_matches!(result, Err(QueueError::NotFound(_)));
}

#[tokio::test]
async fn test_renumber_calls_database_function() {
    let server = MockServer::start().await;
    let org = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/renumber_waiting_queue"))
        .and(body_json(json!({
            "p_organization_id": org,
            "p_minutes_per_position": 15
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(4)))
        .expect(1)
        .mount(&server)
        .await;

    let waiting = store_for(&server).renumber_waiting(org, 15).await.unwrap();

    assert_eq!(waiting, 4);
}

#[tokio::test]
async fn test_server_error_is_io() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/renumber_waiting_queue"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let result = store_for(&server).renumber_waiting(Uuid::new_v4(), 15).await;

    assert_matches!(result, Err(QueueError::Io { operation: "renumber_waiting", .. }));
}

#[tokio::test]
async fn test_count_is_aggregated_by_the_database() {
    let server = MockServer::start().await;
    let org = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(TABLE))
        .and(query_param("organization_id", format!("eq.{}", org)))
        .and(query_param("select", "count"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Range", "0-0/1500")
                .set_body_json(json!([{ "count": 1500 }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let total = store_for(&server).count_by_organization(org).await.unwrap();

    assert_eq!(total, 1500);
}

#[tokio::test]
async fn test_stats_come_from_database_function() {
    let server = MockServer::start().await;
    let org = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/patient_queue_stats"))
        .and(body_json(json!({ "p_organization_id": org })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "total": 2400,
            "waiting": 3,
            "called": 1,
            "in_progress": 1,
            "completed": 2300,
            "cancelled": 95,
            "average_wait_minutes": 30.0
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let stats = store_for(&server).get_stats(org).await.unwrap();

    assert_eq!((stats.total, stats.waiting, stats.completed, stats.cancelled), (2400, 3, 2300, 95));
    assert_eq!(stats.average_wait_display(), "30 min");
}

#[tokio::test]
async fn test_stats_without_rows_are_zero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/patient_queue_stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let stats = store_for(&server).get_stats(Uuid::new_v4()).await.unwrap();

    assert_eq!(stats, QueueStats::default());
}

#[tokio::test]
async fn test_update_sends_snake_case_status() {
    let server = MockServer::start().await;
    let mut entry = QueueEntry::new(Uuid::new_v4(), Uuid::new_v4(), 1, 15);
    entry.status = QueueStatus::InProgress;

    Mock::given(method("PATCH"))
        .and(path(TABLE))
        .and(query_param("id", format!("eq.{}", entry.id)))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({ "status": "in_progress", "position": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(&entry)])))
        .expect(1)
        .mount(&server)
        .await;

    let updated = store_for(&server).update(&entry).await.unwrap();

    assert_eq!(updated.status, QueueStatus::InProgress);
}

#[tokio::test]
async fn test_patient_details_rpc() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
    let entry = QueueEntry::new(Uuid::new_v4(), Uuid::new_v4(), 2, 15);

    let mut details = row(&entry);
    details.as_object_mut().unwrap().extend(
        json!({
            "patient_id": patient_id,
            "patient_name": "Niamh Doyle",
            "doctor_id": Uuid::new_v4(),
            "doctor_name": "Dr. Ronan Byrne",
            "appointment_date": "2026-03-14",
            "appointment_time": "11:00:00",
            "appointment_type": "follow_up",
            "appointment_status": "confirmed"
        })
        .as_object()
        .unwrap()
        .clone(),
    );

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/patient_queue_details"))
        .and(body_json(json!({ "p_patient_id": patient_id, "p_date": "2026-03-14" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([details])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let found = store.find_patient_queue_details(patient_id, date).await.unwrap().unwrap();

    assert_eq!(found.entry.id, entry.id);
    assert_eq!(found.patient_name, "Niamh Doyle");
    assert_eq!(found.appointment_date, date);
}

#[tokio::test]
async fn test_patient_without_entry_gets_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/patient_queue_details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let found = store_for(&server)
        .find_patient_queue_details(Uuid::new_v4(), NaiveDate::from_ymd_opt(2026, 3, 14).unwrap())
        .await
        .unwrap();

    assert!(found.is_none());
}

#[tokio::test]
async fn test_patient_details_decode_database_row() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let queue_id = Uuid::new_v4();

    // Shape and formats as returned by PostgREST for the SQL function.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/patient_queue_details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": queue_id,
            "appointment_id": Uuid::new_v4(),
            "organization_id": Uuid::new_v4(),
            "position": 3,
            "estimated_wait_time": 45,
            "status": "called",
            "created_at": "2026-03-14T09:15:02.123456+00:00",
            "updated_at": "2026-03-14T09:40:11.5+00:00",
            "patient_id": patient_id,
            "patient_name": "Aoife Walsh",
            "doctor_id": Uuid::new_v4(),
            "doctor_name": "Cathal Brennan",
            "appointment_date": "2026-03-14",
            "appointment_time": "10:30:00",
            "appointment_type": "general_consultation",
            "appointment_status": "confirmed"
        }])))
        .mount(&server)
        .await;

    let found = store_for(&server)
        .find_patient_queue_details(patient_id, NaiveDate::from_ymd_opt(2026, 3, 14).unwrap())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.entry.id, queue_id);
    assert_eq!(found.entry.status, QueueStatus::Called);
    assert_eq!(found.entry.estimated_wait_time, 45);
    assert_eq!(found.appointment_time.to_string(), "10:30:00");
}

#[tokio::test]
async fn test_built_state_uses_supabase_and_surfaces_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TABLE))
        .and(body_partial_json(json!({ "position": 1, "status": "waiting" })))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"uq_patient_queues_active_appointment\""
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = TestConfig::with_supabase_url(server.uri()).to_arc();
    let state = QueueCellState::build(config).await.unwrap();

    let result = state.engine.admit(Uuid::new_v4(), Uuid::new_v4()).await;

    assert_matches!(result, Err(QueueError::Conflict(msg)) if msg.contains("uq_patient_queues_active_appointment"));
}
