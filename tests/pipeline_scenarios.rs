//! End-to-end conversations over a scripted database

mod support;

use std::sync::Arc;

use serde_json::{json, Value};

use fleet_query::agentic::LlmClient;
use fleet_query::{PipelineConfig, SqlParam};
use support::{ask, pipeline, ScriptedExecutor, ScriptedLlm};

fn config() -> PipelineConfig {
    PipelineConfig {
        rate_limit_rpm: 100,
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn test_plant_of_vehicle() {
    let executor = Arc::new(ScriptedExecutor::new().on(
        "hosp_master",
        &["plant_name", "address", "reg_no"],
        vec![vec![json!("Pune Plant"), json!("Chakan MIDC"), json!("ABC-123")]],
    ));
    let pipeline = pipeline(config(), executor.clone(), None).await;

    let reply = ask(&pipeline, "s1", "which plant does vehicle ABC-123 belong to?").await;

    let (sql, params) = executor.calls().pop().unwrap();
    assert!(sql.contains("vehicle_master"));
    assert!(sql.contains("hosp_master"));
    assert!(sql.contains("vm.reg_no = $1"));
    assert_eq!(params, vec![SqlParam::Text("ABC-123".into())]);
    assert!(reply.response.contains("Pune Plant"));
    assert_eq!(reply.rows.unwrap().len(), 1);
}

#[tokio::test]
async fn test_open_complaint_count() {
    let executor = Arc::new(ScriptedExecutor::new().on(
        "crm_complaint_dtls",
        &["complaint_count"],
        vec![vec![json!(17)]],
    ));
    let pipeline = pipeline(config(), executor.clone(), None).await;

    let reply = ask(&pipeline, "s1", "how many open complaints").await;

    assert!(executor.last_sql().unwrap().contains("active_status = 'Y'"));
    assert_eq!(reply.response, "Found 17 open complaints.");
}

#[tokio::test]
async fn test_ordinal_reference_with_empty_result() {
    let executor = Arc::new(ScriptedExecutor::new().on(
        "zone_master",
        &["reg_no", "zone_name"],
        vec![
            vec![json!("WB01A0001"), json!("North")],
            vec![json!("WB01A0002"), json!("North")],
            vec![json!("WB01A0003"), json!("North")],
        ],
    ));
    let pipeline = pipeline(config(), executor.clone(), None).await;

    let first = ask(&pipeline, "s1", "show vehicles in zone North").await;
    assert_eq!(first.rows.unwrap().len(), 3);

    let reply = ask(&pipeline, "s1", "what region is the 3rd vehicle in").await;

    let (sql, params) = executor.calls().pop().unwrap();
    assert!(sql.contains("district_master"));
    assert!(!sql.contains("zone_master"));
    assert_eq!(params, vec![SqlParam::Text("WB01A0003".into())]);
    assert_eq!(reply.response, "No region recorded for the 3rd vehicle, WB01A0003.");

    // the empty answer does not displace the vehicle list
    let session = pipeline.sessions().session("s1").await;
    let session = session.lock().await;
    assert_eq!(session.last_result().unwrap().rows.len(), 3);
    assert_eq!(session.turn_count(), 2);
}

fn vehicle_row(plant: &str, region: &str, status: &str) -> Vec<Value> {
    vec![
        json!("XYZ-001"),
        json!("V-17"),
        json!(plant),
        json!(region),
        json!("East"),
        json!(status),
    ]
}

const VEHICLE_COLUMNS: &[&str] = &[
    "reg_no",
    "vehicle_no",
    "plant_name",
    "region_name",
    "zone_name",
    "vehicle_status",
];

#[tokio::test]
async fn test_removed_device_becomes_notice() {
    let executor = Arc::new(ScriptedExecutor::new().on(
        "vehicle_master",
        VEHICLE_COLUMNS,
        vec![vehicle_row("Removed Facility", "Kolkata", "Device Removed")],
    ));
    let pipeline = pipeline(config(), executor.clone(), None).await;

    let reply = ask(&pipeline, "s1", "show details of vehicle XYZ-001").await;

    let sql = executor.last_sql().unwrap();
    assert!(sql.contains("Removed Facility"));
    assert!(sql.contains("vehicle_status"));
    assert_eq!(reply.response, "Vehicle XYZ-001's device has been removed.");
    assert_eq!(reply.rows.unwrap().len(), 0);
}

#[tokio::test]
async fn test_sensitive_values_masked_when_removed_rows_shown() {
    let executor = Arc::new(ScriptedExecutor::new().on(
        "vehicle_master",
        VEHICLE_COLUMNS,
        vec![vehicle_row("EON OFFICE", "EONINFOTECH", "Active")],
    ));
    let config = PipelineConfig {
        hide_removed_vehicles: false,
        ..config()
    };
    let pipeline = pipeline(config, executor, None).await;

    let reply = ask(&pipeline, "s1", "show details of vehicle XYZ-001").await;

    let rows = reply.rows.unwrap();
    assert_eq!(rows[0][2], json!("Removed Facility"));
    assert_eq!(rows[0][3], json!("Inactive Region"));
    assert!(!reply.response.to_uppercase().contains("EONINFOTECH"));
    assert!(!reply.response.to_uppercase().contains("EON OFFICE"));
}

#[tokio::test]
async fn test_plant_listing_keeps_removed_facility_row() {
    let executor = Arc::new(ScriptedExecutor::new().on(
        "hosp_master",
        &["plant_name", "plant_id"],
        vec![
            vec![json!("Removed Facility"), json!(3)],
            vec![json!("Wagholi"), json!(7)],
        ],
    ));
    let pipeline = pipeline(config(), executor.clone(), None).await;

    let reply = ask(&pipeline, "s1", "list plants").await;

    let sql = executor.last_sql().unwrap();
    assert!(sql.starts_with("SELECT DISTINCT CASE WHEN"), "{}", sql);
    assert!(sql.ends_with("ORDER BY plant_name"), "{}", sql);
    assert!(!sql.contains("vehicle_status"));
    assert!(!reply.response.contains("device has been removed"));
    assert!(reply.response.contains("Wagholi"));
    let rows = reply.rows.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], json!("Removed Facility"));
}

fn trips_pipeline_parts() -> (Arc<ScriptedExecutor>, Arc<dyn LlmClient>) {
    let rows: Vec<Vec<Value>> = (0..120)
        .map(|i| {
            vec![
                json!(format!("MH12AB{:04}", i)),
                json!("2024-03-01"),
                json!(i * 500),
            ]
        })
        .collect();
    let executor = Arc::new(ScriptedExecutor::new().on(
        "mega_trips",
        &["reg_no", "trip_date", "trip_distance"],
        rows,
    ));
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm {
        planner_reply: json!({
            "sql": "SELECT mt.reg_no, mt.trip_date, mt.trip_distance FROM mega_trips mt",
            "response": "Here are the trips:"
        })
        .to_string(),
    });
    (executor, llm)
}

#[tokio::test]
async fn test_large_result_is_truncated_for_display() {
    let (executor, llm) = trips_pipeline_parts();
    let pipeline = pipeline(config(), executor.clone(), Some(llm)).await;

    let reply = ask(&pipeline, "s1", "list all trips").await;

    assert!(reply.response.contains("Showing the first 20 of 120 rows."));
    assert_eq!(
        reply.response.lines().filter(|l| l.starts_with('|')).count(),
        22
    );
    assert!(reply
        .response
        .contains("Only the first 50 rows are kept for follow-up questions."));
    assert!(reply.follow_up.is_some());
    assert_eq!(reply.rows.unwrap().len(), 50);
    assert!(reply.sql.unwrap().contains("mega_trips"));
}

#[tokio::test]
async fn test_filter_over_previous_result_without_requery() {
    let (executor, llm) = trips_pipeline_parts();
    let pipeline = pipeline(config(), executor.clone(), Some(llm)).await;

    ask(&pipeline, "s1", "list all trips").await;
    let reply = ask(&pipeline, "s1", "which ones are under 10000?").await;

    assert_eq!(executor.calls().len(), 1);
    assert!(reply.sql.is_none());
    assert_eq!(reply.rows.unwrap().len(), 20);
    assert!(reply.response.contains("searched the first 50 of 120 rows"));
}
