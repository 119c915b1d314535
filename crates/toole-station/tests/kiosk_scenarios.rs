//! End-to-end kiosk runs against simulated devices.
//!
//! Each test drives the loop by hand: `poll_sensor` with explicit
//! timestamps, then `next_worker_message` + `apply` for background results.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Utc};
use tokio::sync::{mpsc, Notify};

use toole_core::validation::UserIdentifier;
use toole_core::{BatchResult, CommitRow, Identification, TransactionType};
use toole_db::{Database, DbConfig, NewTool, UserRecord};
use toole_station::{
    CaptureOutcome, ChannelEmitter, DirectoryValidator, IdentificationClient,
    IdentificationError, IgnoreReason, ImageStore, Kiosk, KioskBuilder, KioskConfig, KioskEvent,
    Screen, SimulatedCamera, SimulatedCardReader, SimulatedSensor, SqliteGateway, StationResult,
    StorageGateway, SubmissionError, UserValidator, ValidationOutcome,
};

const TICK_MS: i64 = 100;
const UCID: &str = "30012345";

// =============================================================================
// Test Doubles
// =============================================================================

/// Answers with the next label in line; optionally waits for a go-ahead.
struct Classifier {
    labels: Mutex<Vec<&'static str>>,
    gate: Option<Arc<Notify>>,
}

impl Classifier {
    fn answering(labels: &[&'static str]) -> Arc<Self> {
        Arc::new(Classifier {
            labels: Mutex::new(labels.to_vec()),
            gate: None,
        })
    }

    fn gated(label: &'static str, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Classifier {
            labels: Mutex::new(vec![label]),
            gate: Some(gate),
        })
    }
}

#[async_trait]
impl IdentificationClient for Classifier {
    async fn identify(&self, _image: Vec<u8>) -> Result<Identification, IdentificationError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let label = self.labels.lock().unwrap().remove(0);
        Ok(Identification {
            prediction: label.to_string(),
            score: 0.91,
            all_probabilities: BTreeMap::from([(label.to_string(), 0.91)]),
            image_filename: None,
        })
    }
}

/// Never answers.
struct SilentClassifier;

#[async_trait]
impl IdentificationClient for SilentClassifier {
    async fn identify(&self, _image: Vec<u8>) -> Result<Identification, IdentificationError> {
        std::future::pending().await
    }
}

struct AllowEveryone;

#[async_trait]
impl UserValidator for AllowEveryone {
    async fn validate(&self, identifier: &UserIdentifier) -> StationResult<ValidationOutcome> {
        Ok(ValidationOutcome::Granted {
            user_id: identifier.as_str().to_string(),
            display_name: "Grace".into(),
        })
    }
}

#[derive(Default)]
struct RecordingGateway {
    batches: Mutex<Vec<Vec<CommitRow>>>,
}

#[async_trait]
impl StorageGateway for RecordingGateway {
    async fn commit_batch(&self, rows: &[CommitRow]) -> Result<BatchResult, SubmissionError> {
        self.batches.lock().unwrap().push(rows.to_vec());
        Ok(BatchResult::committed(rows.len()))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Station {
    kiosk: Kiosk,
    sensor: Arc<SimulatedSensor>,
    camera: Arc<SimulatedCamera>,
    events: mpsc::UnboundedReceiver<KioskEvent>,
    images: tempfile::TempDir,
    clock: DateTime<Utc>,
}

impl Station {
    fn new(
        classifier: Arc<dyn IdentificationClient>,
        validator: Arc<dyn UserValidator>,
        gateway: Arc<dyn StorageGateway>,
    ) -> Self {
        let images = tempfile::tempdir().unwrap();
        let sensor = Arc::new(SimulatedSensor::new(0));
        let camera = Arc::new(SimulatedCamera::default());
        let (emitter, events) = ChannelEmitter::new();

        let kiosk = KioskBuilder::new(KioskConfig::default())
            .with_sensor(sensor.clone())
            .with_camera(camera.clone())
            .with_card_reader(Arc::new(SimulatedCardReader::new()))
            .with_classifier(classifier)
            .with_validator(validator)
            .with_gateway(gateway)
            .with_images(ImageStore::new(images.path()))
            .with_emitter(Arc::new(emitter))
            .build()
            .unwrap();

        Station {
            kiosk,
            sensor,
            camera,
            events,
            images,
            clock: Utc::now(),
        }
    }

    /// Logs in, picks borrow with a due date and opens the capture screen.
    async fn start_borrowing(&mut self) {
        self.kiosk.card_scanned(UCID).unwrap();
        self.settle().await;
        assert_eq!(self.kiosk.screen(), Screen::InSession);

        self.kiosk.select_action(TransactionType::Borrow).unwrap();
        self.kiosk
            .set_return_date(Local::now().date_naive() + Duration::days(3))
            .unwrap();
        self.kiosk.begin_capture().unwrap();
    }

    /// Polls `ticks` times, 100 ms apart. Returns every detection outcome.
    fn poll(&mut self, ticks: usize) -> Vec<CaptureOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..ticks {
            self.clock += Duration::milliseconds(TICK_MS);
            if let Some(outcome) = self.kiosk.poll_sensor(self.clock).unwrap() {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Puts a tool on the scale and holds it long enough to fire.
    fn place_tool(&mut self, weight: i64) -> Vec<CaptureOutcome> {
        self.sensor.set_resting(weight);
        self.poll(30)
    }

    fn lift_tool(&mut self) {
        self.sensor.set_resting(0);
        self.poll(3);
    }

    /// Applies the next background result.
    async fn settle(&mut self) {
        let message = self.kiosk.next_worker_message().await.unwrap();
        self.kiosk.apply(message);
    }

    fn drain_events(&mut self) -> Vec<KioskEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn started(outcomes: &[CaptureOutcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| matches!(o, CaptureOutcome::Started(_)))
        .count()
}

async fn directory_with_hammer() -> Database {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.users()
        .upsert(&UserRecord {
            user_id: UCID.into(),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email: None,
            card_barcode: None,
            last_renewed: Some(Local::now().date_naive() - Duration::days(30)),
        })
        .await
        .unwrap();
    db.tools()
        .insert(&NewTool::new("Hammer", "hand tool", 4))
        .await
        .unwrap();
    db
}

// =============================================================================
// Detection
// =============================================================================

#[tokio::test]
async fn test_settled_placement_captures_once() {
    let mut station = Station::new(
        Classifier::answering(&["Hammer"]),
        Arc::new(AllowEveryone),
        Arc::new(RecordingGateway::default()),
    );
    station.start_borrowing().await;

    station
        .sensor
        .push_readings([Some(50), Some(1200), Some(1300), Some(1250)]);
    station.sensor.set_resting(1250);
    let outcomes = station.poll(30);

    assert_eq!(started(&outcomes), 1);
    let pending = station.kiosk.session().pending().unwrap();
    assert_eq!(pending.weight, 1250);
    assert_eq!(station.camera.captures(), 1);
    assert!(!station.kiosk.snapshot().pending_identified);

    station.settle().await;
    let pending = station.kiosk.session().pending().unwrap();
    assert_eq!(pending.tool_label.as_deref(), Some("Hammer"));
    assert!(!station.kiosk.is_processing());
    assert!(station.kiosk.snapshot().pending_identified);
}

#[tokio::test]
async fn test_tool_lifted_during_dwell_captures_nothing() {
    let mut station = Station::new(
        Classifier::answering(&[]),
        Arc::new(AllowEveryone),
        Arc::new(RecordingGateway::default()),
    );
    station.start_borrowing().await;

    station
        .sensor
        .push_readings([Some(50), Some(1200), Some(1300), Some(1250)]);
    station
        .sensor
        .push_readings(std::iter::repeat(Some(1250)).take(10));
    station.sensor.set_resting(50);
    let outcomes = station.poll(40);

    assert!(outcomes.is_empty());
    assert!(station.kiosk.session().pending().is_none());
    assert_eq!(station.camera.captures(), 0);
}

#[tokio::test]
async fn test_not_ready_samples_do_not_break_a_placement() {
    let mut station = Station::new(
        Classifier::answering(&["Hammer"]),
        Arc::new(AllowEveryone),
        Arc::new(RecordingGateway::default()),
    );
    station.start_borrowing().await;

    // Three failed reads per tick exhaust the default retries (1 + 2)
    station.sensor.push_readings([
        Some(1200),
        Some(1300),
        None,
        None,
        None,
        Some(1250),
    ]);
    station.sensor.set_resting(1250);

    assert_eq!(started(&station.poll(30)), 1);
}

// =============================================================================
// Capture concurrency
// =============================================================================

#[tokio::test]
async fn test_second_placement_while_processing_is_dropped() {
    let gate = Arc::new(Notify::new());
    let mut station = Station::new(
        Classifier::gated("Hammer", gate.clone()),
        Arc::new(AllowEveryone),
        Arc::new(RecordingGateway::default()),
    );
    station.start_borrowing().await;

    assert_eq!(started(&station.place_tool(1250)), 1);
    station.lift_tool();
    let second = station.place_tool(1400);

    assert_eq!(second, vec![CaptureOutcome::Ignored(IgnoreReason::Busy)]);
    assert_eq!(station.camera.captures(), 1);

    gate.notify_one();
    station.settle().await;
    assert!(!station.kiosk.is_processing());
}

#[tokio::test]
async fn test_late_result_after_manual_confirm_changes_nothing() {
    let gate = Arc::new(Notify::new());
    let mut station = Station::new(
        Classifier::gated("Hammer", gate.clone()),
        Arc::new(AllowEveryone),
        Arc::new(RecordingGateway::default()),
    );
    station.start_borrowing().await;
    station.place_tool(1250);

    station.kiosk.confirm_manual("Wrench").unwrap();
    let before = station.kiosk.session().confirmed().to_vec();

    gate.notify_one();
    station.settle().await;

    assert_eq!(station.kiosk.session().confirmed(), before.as_slice());
    assert!(station.kiosk.session().pending().is_none());
    assert!(!station.kiosk.is_processing());
    assert!(!station
        .drain_events()
        .iter()
        .any(|e| matches!(e, KioskEvent::IdentificationReady { .. })));
}

#[tokio::test]
async fn test_leaving_capture_releases_sensor_but_keeps_identification() {
    let gate = Arc::new(Notify::new());
    let mut station = Station::new(
        Classifier::gated("Hammer", gate.clone()),
        Arc::new(AllowEveryone),
        Arc::new(RecordingGateway::default()),
    );
    station.start_borrowing().await;
    assert!(station.sensor.is_powered());
    assert_eq!(station.sensor.acquisitions(), 1);

    station.place_tool(1250);
    station.kiosk.leave_capture();
    assert!(!station.sensor.is_powered());
    assert!(station.kiosk.poll_sensor(Utc::now()).unwrap().is_none());

    gate.notify_one();
    station.settle().await;

    let pending = station.kiosk.session().pending().unwrap();
    assert_eq!(pending.tool_label.as_deref(), Some("Hammer"));

    station.kiosk.begin_capture().unwrap();
    assert!(station.sensor.is_powered());
    assert_eq!(station.sensor.acquisitions(), 2);
}

#[tokio::test]
async fn test_camera_failure_leaves_no_pending_entry() {
    let mut station = Station::new(
        Classifier::answering(&[]),
        Arc::new(AllowEveryone),
        Arc::new(RecordingGateway::default()),
    );
    station.start_borrowing().await;
    station.camera.set_failing(true);

    let outcomes = station.place_tool(1250);

    assert!(matches!(outcomes.as_slice(), [CaptureOutcome::Failed(_)]));
    assert!(station.kiosk.session().pending().is_none());
    assert!(!station.kiosk.is_processing());
    assert!(station
        .drain_events()
        .iter()
        .any(|e| matches!(e, KioskEvent::CaptureFailed { .. })));
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn test_finalize_right_after_manual_confirm_archives_the_frame() {
    let gate = Arc::new(Notify::new());
    let gateway = Arc::new(RecordingGateway::default());
    let mut station = Station::new(
        Classifier::gated("Hammer", gate.clone()),
        Arc::new(AllowEveryone),
        gateway.clone(),
    );
    station.start_borrowing().await;
    station.kiosk.set_purpose(Some("lab 3".into())).unwrap();

    // Nothing has been awaited, so the capture worker has not saved yet
    assert_eq!(started(&station.place_tool(1250)), 1);
    station.kiosk.confirm_manual("Wrench").unwrap();
    station.kiosk.finalize().unwrap();

    assert!(station.kiosk.set_purpose(Some("other".into())).is_err());
    assert!(station
        .kiosk
        .set_return_date(Local::now().date_naive() + Duration::days(9))
        .is_err());
    assert_eq!(station.kiosk.session().purpose(), Some("lab 3"));

    station.settle().await;
    assert_eq!(station.kiosk.screen(), Screen::Welcome);

    let batches = gateway.batches.lock().unwrap();
    let row = &batches[0][0];
    assert_eq!(row.purpose.as_deref(), Some("lab 3"));
    let archived = std::path::Path::new(row.image_ref.as_str());
    assert!(archived.starts_with(station.images.path().join("No").join("Wrench")));
    assert!(archived.exists());
    assert!(std::fs::read_dir(station.images.path().join("temp"))
        .unwrap()
        .next()
        .is_none());
}

#[tokio::test]
async fn test_failed_batch_keeps_entries_until_retry_succeeds() {
    let db = directory_with_hammer().await;
    let mut station = Station::new(
        Classifier::answering(&["Hammer", "Wrench"]),
        Arc::new(DirectoryValidator::new(db.users())),
        Arc::new(SqliteGateway::new(db.transactions())),
    );
    station.start_borrowing().await;

    for label in ["Hammer", "Wrench"] {
        assert_eq!(started(&station.place_tool(1250)), 1);
        station.settle().await;
        station.kiosk.confirm(label).unwrap();
        station.lift_tool();
    }
    assert_eq!(station.kiosk.session().confirmed().len(), 2);

    // Wrench is not in the catalog yet
    station.kiosk.finalize().unwrap();
    assert_eq!(station.kiosk.screen(), Screen::Submitting);
    station.settle().await;

    assert_eq!(station.kiosk.screen(), Screen::InSession);
    assert_eq!(station.kiosk.session().confirmed().len(), 2);
    assert_eq!(db.transactions().count().await.unwrap(), 0);
    assert!(station.drain_events().iter().any(|e| matches!(
        e,
        KioskEvent::SubmitFailed {
            failure_index: Some(2),
            ..
        }
    )));

    db.tools()
        .insert(&NewTool::new("Wrench", "hand tool", 2))
        .await
        .unwrap();
    station.kiosk.finalize().unwrap();
    station.settle().await;

    assert_eq!(station.kiosk.screen(), Screen::Welcome);
    assert!(!station.kiosk.session().is_active());

    let stored = db.transactions().list_for_user(UCID).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].tool_name, "Hammer");
    assert_eq!(stored[1].tool_name, "Wrench");
    assert_eq!(stored[0].classification_correct, Some(true));
    assert!(std::path::Path::new(stored[0].image_path.as_deref().unwrap())
        .starts_with(station.images.path().join("Yes").join("Hammer")));
}

#[tokio::test(start_paused = true)]
async fn test_identification_timeout_then_manual_selection_commits() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut station = Station::new(
        Arc::new(SilentClassifier),
        Arc::new(AllowEveryone),
        gateway.clone(),
    );
    station.start_borrowing().await;
    station.place_tool(1250);
    let captured = station.kiosk.session().pending().unwrap().clone();

    station.settle().await;

    assert!(!station.kiosk.is_processing());
    assert_eq!(station.kiosk.session().pending(), Some(&captured));
    assert!(station.drain_events().iter().any(|e| matches!(
        e,
        KioskEvent::IdentificationFailed { message, .. } if message.contains("timed out")
    )));

    station.kiosk.confirm_manual("Hammer").unwrap();
    let entry = &station.kiosk.session().confirmed()[0];
    assert_eq!(entry.image_ref(), &captured.image_ref);
    assert_eq!(entry.classification_correct(), Some(false));

    station.kiosk.finalize().unwrap();
    station.settle().await;
    assert!(!station.kiosk.session().is_active());

    let batches = gateway.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let archived = std::path::Path::new(batches[0][0].image_ref.as_str());
    assert!(archived.starts_with(station.images.path().join("No").join("Hammer")));
    assert!(archived.exists());
}
