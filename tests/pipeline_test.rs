//! End-to-end tests for the ingest path: intake -> normalize -> enrich -> sink/report.

use async_trait::async_trait;
use chrono::FixedOffset;
use greenhouse_gateway::control::{CommandDispatcher, CommandSource, CommandState};
use greenhouse_gateway::driver::{Driver, GatewayContext};
use greenhouse_gateway::enrich::{EnricherChain, DEFAULT_CONTEXT_FIELDS};
use greenhouse_gateway::error::AppResult;
use greenhouse_gateway::intake::IntakeQueue;
use greenhouse_gateway::normalize::{normalize, TIMESTAMP_FIELD};
use greenhouse_gateway::record::{FieldValue, RawPacket, Record};
use greenhouse_gateway::reporting::{Aggregator, Delivery, ReportTransport, ReportingBuffer};
use greenhouse_gateway::storage::{LatestSnapshot, SqliteSink};
use greenhouse_gateway::transport::{Channel, Publisher};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct CapturedReports(Mutex<Vec<Value>>);

#[async_trait]
impl ReportTransport for CapturedReports {
    async fn send(&self, document: &Value) -> AppResult<Delivery> {
        self.0.lock().unwrap().push(document.clone());
        Ok(Delivery::Delivered)
    }
}

#[derive(Default)]
struct CapturedPublishes(Mutex<Vec<(Channel, Value)>>);

#[async_trait]
impl Publisher for CapturedPublishes {
    async fn publish(&self, channel: Channel, document: &Value) -> AppResult<()> {
        self.0.lock().unwrap().push((channel, document.clone()));
        Ok(())
    }
}

struct IdleCommands;

#[async_trait]
impl CommandSource for IdleCommands {
    async fn load(&self) -> AppResult<CommandState> {
        Ok(CommandState::default())
    }
}

struct Harness {
    driver: Driver,
    sink: SqliteSink,
    snapshot_path: std::path::PathBuf,
    reports: Arc<CapturedReports>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let sink = SqliteSink::new(dir.path().join("db").join("greenhouse.db"));
    let snapshot_path = dir.path().join("runtime").join("latest_packet.json");
    let reports = Arc::new(CapturedReports::default());

    let context = GatewayContext {
        intake: IntakeQueue::new(100),
        summaries: IntakeQueue::new(10),
        enricher: EnricherChain::standard(FixedOffset::east_opt(0)),
        sink: Box::new(sink.clone()),
        snapshot: Some(LatestSnapshot::new(&snapshot_path)),
        reporting: ReportingBuffer::new(
            Aggregator::new(vec!["inside_temp_f".into()], vec!["grow_light_pwm".into()]),
            Duration::from_secs(300),
            reports.clone(),
        ),
        dispatcher: CommandDispatcher::new(IdleCommands),
        publisher: Arc::new(CapturedPublishes::default()),
    };

    Harness {
        driver: Driver::new(context, Duration::from_secs(1), Duration::from_secs(10)),
        sink,
        snapshot_path,
        reports,
        _dir: dir,
    }
}

fn read_snapshot(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn spring_morning_packet_is_persisted_and_reported() {
    let mut h = harness();
    let packet: RawPacket = [
        (TIMESTAMP_FIELD, FieldValue::from("2025-04-10T08:30:00Z")),
        ("inside_temp_f", FieldValue::Float(72.5)),
    ]
    .into_iter()
    .collect();
    h.driver.context().intake.offer(packet);

    let report = h.driver.tick(Instant::now()).await;
    assert_eq!(report.ingested, 1);
    assert_eq!(h.sink.row_count().await.unwrap(), 1);

    let snapshot = read_snapshot(&h.snapshot_path);
    assert_eq!(snapshot["season_state"], "spring");
    assert_eq!(snapshot["day_of_year"], 100);
    assert_eq!(snapshot["intent_window"], "morning");
    assert_eq!(snapshot["inside_temp_f"], 72.5);

    let conn = rusqlite::Connection::open(h.sink.path()).unwrap();
    let (season, window, temp, ts): (String, String, f64, String) = conn
        .query_row(
            "SELECT season_state, intent_window, inside_temp_f, timestamp_utc FROM samples",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(season, "spring");
    assert_eq!(window, "morning");
    assert_eq!(temp, 72.5);
    assert_eq!(ts, "2025-04-10T08:30:00Z");

    // The first sample goes out as-is: same enriched fields as the persisted record.
    let sent = h.reports.0.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["sample_count"], 1);
    assert_eq!(sent[0]["type"], "sample");

    let reported: BTreeSet<&String> = sent[0]
        .as_object()
        .unwrap()
        .keys()
        .filter(|k| !matches!(k.as_str(), "timestamp" | "sample_count" | "type"))
        .collect();
    let stored: BTreeSet<&String> = snapshot.as_object().unwrap().keys().collect();
    assert_eq!(reported, stored);
    for key in stored {
        assert_eq!(sent[0][key.as_str()], snapshot[key.as_str()], "field {key}");
    }
}

#[tokio::test]
async fn later_packets_are_held_for_the_window() {
    let mut h = harness();
    for temp in [70.0, 71.0, 73.0] {
        let packet: RawPacket = [("inside_temp_f", temp)].into_iter().collect();
        h.driver.context().intake.offer(packet);
    }

    let report = h.driver.tick(Instant::now()).await;
    assert_eq!(report.ingested, 3);
    assert_eq!(h.sink.row_count().await.unwrap(), 3);
    assert_eq!(h.reports.0.lock().unwrap().len(), 1);
    assert_eq!(h.driver.context().reporting.window_len(), 2);

    let snapshot = read_snapshot(&h.snapshot_path);
    assert_eq!(snapshot["inside_temp_f"], 73.0);
}

#[tokio::test]
async fn tick_drains_only_what_was_queued() {
    let mut h = harness();
    let producer = h.driver.context().intake.producer();
    for temp in [70.0, 71.0] {
        producer.offer([("inside_temp_f", temp)].into_iter().collect());
    }

    assert_eq!(h.driver.tick(Instant::now()).await.ingested, 2);
    assert_eq!(h.driver.tick(Instant::now()).await.ingested, 0);
    h.driver.shutdown().await.unwrap();
    assert!(!h.sink.is_open());
}

#[test]
fn enrichment_is_additive_and_complete_for_partial_packets() {
    let chain = EnricherChain::standard(FixedOffset::east_opt(-7 * 3600));
    let packets: Vec<RawPacket> = vec![
        Record::new(),
        [("inside_temp_f", 72.5)].into_iter().collect(),
        [
            ("inside_humidity_rh", FieldValue::Float(55.0)),
            ("firmware_version", FieldValue::from("1.4.2")),
            ("unknown_probe", FieldValue::Int(3)),
        ]
        .into_iter()
        .collect(),
        [(TIMESTAMP_FIELD, FieldValue::from("garbage"))].into_iter().collect(),
    ];

    for packet in packets {
        let canonical = normalize(&packet);
        let enriched = chain.enrich(&canonical);

        assert!(enriched.get(TIMESTAMP_FIELD).is_some_and(|v| !v.is_null()));
        for field in DEFAULT_CONTEXT_FIELDS {
            assert!(enriched.contains(field), "missing {field}");
        }
        for (field, value) in canonical.iter() {
            assert_eq!(enriched.get(field), Some(value), "field {field} changed");
        }
        assert!(!enriched.contains("unknown_probe"));
    }
}
