//! # Capture Coordinator
//!
//! Turns a detection into a pending entry and an identification request
//! without holding up the kiosk loop.
//!
//! ## Capture Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          on_detection(event)                            │
//! │                                                                         │
//! │  busy? ───────────────────────────────────────► Ignored(Busy)          │
//! │  pending entry open? ─────────────────────────► Ignored(PendingOpen)   │
//! │                                                                         │
//! │  camera.capture_frame()   (on the loop, fast)                           │
//! │     │ Err ────────────────────────────────────► Failed(CaptureError)   │
//! │     ▼                                              no pending entry    │
//! │  session.start_pending(tx, temp image)                                 │
//! │  in_flight = tx                       ┌──────────────────────────────┐ │
//! │  reserve temp image                   │                              │ │
//! │  spawn ──────────────────────────────►│ worker                       │ │
//! │     │                                 │  save temp image, release    │ │
//! │     ▼                                 │  timeout(identify(bytes))    │ │
//! │  Started(tx)                          │  send Identified{tx, result} │ │
//! │                                       └──────────────┬───────────────┘ │
//! │                                                      ▼                  │
//! │  on_identification(tx, result)   (back on the loop)                    │
//! │     in_flight == tx ─► cleared                                          │
//! │     Ok  + tx still pending ─► Ready        (label, confidence set)      │
//! │     Err + tx still pending ─► Failed       (entry and image kept)       │
//! │     tx no longer pending   ─► Stale        (session untouched)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A detection that arrives while a request is in flight is dropped, never
//! queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use toole_core::{
    CoreError, DetectionEvent, Identification, ImageRef, Session, TransactionId,
    TransactionIdGenerator,
};

use crate::error::{CaptureError, IdentificationError, StationError, StationResult};
use crate::hardware::Camera;
use crate::identify::IdentificationClient;
use crate::images::{ImageStore, TempReservation};
use crate::worker::WorkerMessage;

/// Why a detection did not start a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// An identification request is still outstanding.
    Busy,
    /// The previous capture has not been confirmed or rejected yet.
    PendingOpen,
    /// Nobody is logged in.
    NoSession,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Started(TransactionId),
    Ignored(IgnoreReason),
    Failed(CaptureError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdentificationOutcome {
    Ready(Identification),
    Failed(IdentificationError),
    /// The capture is no longer pending; nothing changed.
    Stale,
}

/// Owns the "processing" flag and dispatches identification work.
pub struct CaptureCoordinator {
    camera: Arc<dyn Camera>,
    classifier: Arc<dyn IdentificationClient>,
    images: ImageStore,
    ids: TransactionIdGenerator,
    timeout: Duration,
    worker_tx: mpsc::Sender<WorkerMessage>,
    in_flight: Option<TransactionId>,
}

impl CaptureCoordinator {
    pub fn new(
        camera: Arc<dyn Camera>,
        classifier: Arc<dyn IdentificationClient>,
        images: ImageStore,
        timeout: Duration,
        worker_tx: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        CaptureCoordinator {
            camera,
            classifier,
            images,
            ids: TransactionIdGenerator::new(),
            timeout,
            worker_tx,
            in_flight: None,
        }
    }

    /// True while an identification request is outstanding.
    pub fn is_processing(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<&TransactionId> {
        self.in_flight.as_ref()
    }

    /// Handles one detection event.
    pub fn on_detection(
        &mut self,
        event: DetectionEvent,
        session: &mut Session,
    ) -> StationResult<CaptureOutcome> {
        if let Some(busy) = &self.in_flight {
            debug!(in_flight = %busy, "Detection dropped while processing");
            return Ok(CaptureOutcome::Ignored(IgnoreReason::Busy));
        }
        if !session.is_active() {
            return Ok(CaptureOutcome::Ignored(IgnoreReason::NoSession));
        }
        if let Some(pending) = session.pending() {
            debug!(
                pending = %pending.transaction_id,
                "Detection dropped, previous capture still awaiting confirmation"
            );
            return Ok(CaptureOutcome::Ignored(IgnoreReason::PendingOpen));
        }

        let frame = match self.camera.capture_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Frame grab failed, capture abandoned");
                return Ok(CaptureOutcome::Failed(e));
            }
        };

        let transaction_id = self.ids.next(event.timestamp);
        let image_ref = self.images.temp_ref(&transaction_id);
        session.start_pending(
            transaction_id.clone(),
            image_ref.clone(),
            event.timestamp,
            event.weight_at_trigger,
        )?;

        info!(
            transaction_id = %transaction_id,
            weight = event.weight_at_trigger,
            "Capture started"
        );
        self.in_flight = Some(transaction_id.clone());
        let reservation = self.images.reserve_temp(&image_ref);
        self.dispatch(transaction_id.clone(), image_ref, Some((frame, reservation)));

        Ok(CaptureOutcome::Started(transaction_id))
    }

    /// Applies a finished identification to the session.
    pub fn on_identification(
        &mut self,
        transaction_id: &TransactionId,
        result: Result<Identification, IdentificationError>,
        session: &mut Session,
    ) -> IdentificationOutcome {
        if self.in_flight.as_ref() == Some(transaction_id) {
            self.in_flight = None;
        }

        match result {
            Ok(identification) => {
                match session.apply_identification(transaction_id, &identification) {
                    Ok(_) => {
                        info!(
                            transaction_id = %transaction_id,
                            prediction = %identification.prediction,
                            score = identification.score,
                            "Capture identified"
                        );
                        IdentificationOutcome::Ready(identification)
                    }
                    Err(e) => {
                        debug!(error = %e, "Ignoring late identification");
                        IdentificationOutcome::Stale
                    }
                }
            }
            Err(e) => {
                let still_pending = session
                    .pending()
                    .map(|p| &p.transaction_id == transaction_id)
                    .unwrap_or(false);
                if still_pending {
                    warn!(transaction_id = %transaction_id, error = %e, "Identification failed");
                    IdentificationOutcome::Failed(e)
                } else {
                    debug!(transaction_id = %transaction_id, "Ignoring late identification failure");
                    IdentificationOutcome::Stale
                }
            }
        }
    }

    /// Re-sends the pending capture's stored image to the classifier.
    pub fn retry(&mut self, session: &Session) -> StationResult<TransactionId> {
        if self.in_flight.is_some() {
            return Err(StationError::WrongState {
                action: "retry identification",
                state: "identification is in progress",
            });
        }
        let pending = session
            .pending()
            .ok_or(CoreError::NoPendingEntry { operation: "retry" })?;

        let transaction_id = pending.transaction_id.clone();
        info!(transaction_id = %transaction_id, "Retrying identification");
        self.in_flight = Some(transaction_id.clone());
        self.dispatch(transaction_id.clone(), pending.image_ref.clone(), None);
        Ok(transaction_id)
    }

    /// Spawns the identification worker. With no frame, the image is read
    /// back from disk. A fresh frame's reservation is released once it is
    /// saved.
    fn dispatch(
        &self,
        transaction_id: TransactionId,
        image_ref: ImageRef,
        frame: Option<(Vec<u8>, TempReservation)>,
    ) {
        let classifier = self.classifier.clone();
        let images = self.images.clone();
        let worker_tx = self.worker_tx.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let bytes = match frame {
                Some((bytes, reservation)) => {
                    if let Err(e) = images.save_temp(&image_ref, &bytes).await {
                        warn!(image = %image_ref, error = %e, "Could not save capture");
                    }
                    drop(reservation);
                    Ok(bytes)
                }
                None => images
                    .load(&image_ref)
                    .await
                    .map_err(|e| IdentificationError::ImageMissing(format!("{}: {}", image_ref, e))),
            };

            let result = match bytes {
                Ok(bytes) => match tokio::time::timeout(timeout, classifier.identify(bytes)).await {
                    Ok(result) => result,
                    Err(_) => Err(IdentificationError::Timeout(timeout.as_secs())),
                },
                Err(e) => Err(e),
            };

            let message = WorkerMessage::Identified {
                transaction_id,
                result,
            };
            if worker_tx.send(message).await.is_err() {
                debug!("Kiosk loop gone, dropping identification result");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedCamera;
    use crate::worker::WORKER_CHANNEL_CAPACITY;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use toole_core::TransactionType;

    struct Fixed(&'static str);

    #[async_trait]
    impl IdentificationClient for Fixed {
        async fn identify(&self, _image: Vec<u8>) -> Result<Identification, IdentificationError> {
            Ok(Identification {
                prediction: self.0.to_string(),
                score: 0.9,
                all_probabilities: BTreeMap::new(),
                image_filename: None,
            })
        }
    }

    struct Hanging;

    #[async_trait]
    impl IdentificationClient for Hanging {
        async fn identify(&self, _image: Vec<u8>) -> Result<Identification, IdentificationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(IdentificationError::Network("unreachable".into()))
        }
    }

    fn event() -> DetectionEvent {
        DetectionEvent {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
            weight_at_trigger: 1250,
        }
    }

    fn session() -> Session {
        let mut s = Session::new();
        s.begin("30012345");
        s.set_transaction_type(TransactionType::Borrow).unwrap();
        s
    }

    fn coordinator(
        classifier: Arc<dyn IdentificationClient>,
        camera: Arc<SimulatedCamera>,
        dir: &tempfile::TempDir,
    ) -> (CaptureCoordinator, mpsc::Receiver<WorkerMessage>) {
        let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        let coordinator = CaptureCoordinator::new(
            camera,
            classifier,
            ImageStore::new(dir.path()),
            Duration::from_secs(10),
            tx,
        );
        (coordinator, rx)
    }

    async fn next_identified(
        rx: &mut mpsc::Receiver<WorkerMessage>,
    ) -> (TransactionId, Result<Identification, IdentificationError>) {
        match rx.recv().await.unwrap() {
            WorkerMessage::Identified {
                transaction_id,
                result,
            } => (transaction_id, result),
            other => panic!("unexpected worker message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_detection_creates_pending_and_identifies() {
        let dir = tempfile::tempdir().unwrap();
        let (mut c, mut rx) = coordinator(
            Arc::new(Fixed("Hammer")),
            Arc::new(SimulatedCamera::default()),
            &dir,
        );
        let mut s = session();

        let tx = match c.on_detection(event(), &mut s).unwrap() {
            CaptureOutcome::Started(tx) => tx,
            other => panic!("expected start, got {:?}", other),
        };
        assert!(c.is_processing());
        assert_eq!(s.pending().unwrap().weight, 1250);

        let (done, result) = next_identified(&mut rx).await;
        assert_eq!(done, tx);
        let outcome = c.on_identification(&done, result, &mut s);

        assert!(matches!(outcome, IdentificationOutcome::Ready(ref i) if i.prediction == "Hammer"));
        assert!(!c.is_processing());
        assert_eq!(s.pending().unwrap().tool_label.as_deref(), Some("Hammer"));
        assert!(std::path::Path::new(s.pending().unwrap().image_ref.as_str()).exists());
    }

    #[tokio::test]
    async fn test_second_detection_while_processing_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(SimulatedCamera::default());
        let (mut c, _rx) = coordinator(Arc::new(Hanging), camera.clone(), &dir);
        let mut s = session();

        assert!(matches!(
            c.on_detection(event(), &mut s).unwrap(),
            CaptureOutcome::Started(_)
        ));
        assert_eq!(
            c.on_detection(event(), &mut s).unwrap(),
            CaptureOutcome::Ignored(IgnoreReason::Busy)
        );
        assert_eq!(camera.captures(), 1);
    }

    #[tokio::test]
    async fn test_camera_failure_creates_no_pending_entry() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(SimulatedCamera::default());
        camera.set_failing(true);
        let (mut c, _rx) = coordinator(Arc::new(Fixed("Hammer")), camera, &dir);
        let mut s = session();

        assert!(matches!(
            c.on_detection(event(), &mut s).unwrap(),
            CaptureOutcome::Failed(CaptureError::Unavailable(_))
        ));
        assert!(s.pending().is_none());
        assert!(!c.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_pending_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (mut c, mut rx) = coordinator(
            Arc::new(Hanging),
            Arc::new(SimulatedCamera::default()),
            &dir,
        );
        let mut s = session();
        c.on_detection(event(), &mut s).unwrap();
        let before = s.pending().cloned();

        let (tx, result) = next_identified(&mut rx).await;
        assert_eq!(result, Err(IdentificationError::Timeout(10)));

        let outcome = c.on_identification(&tx, result, &mut s);
        assert_eq!(outcome, IdentificationOutcome::Failed(IdentificationError::Timeout(10)));
        assert_eq!(s.pending().cloned(), before);
        assert!(!c.is_processing());
    }

    #[tokio::test]
    async fn test_result_after_manual_confirm_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let (mut c, mut rx) = coordinator(
            Arc::new(Fixed("Wrench")),
            Arc::new(SimulatedCamera::default()),
            &dir,
        );
        let mut s = session();
        c.on_detection(event(), &mut s).unwrap();

        s.confirm_manual("Hammer").unwrap();
        let (tx, result) = next_identified(&mut rx).await;

        assert_eq!(c.on_identification(&tx, result, &mut s), IdentificationOutcome::Stale);
        assert!(s.pending().is_none());
        assert_eq!(s.confirmed().len(), 1);
        assert_eq!(s.confirmed()[0].predicted_label(), None);
        assert!(!c.is_processing());
    }

    #[tokio::test]
    async fn test_retry_reads_image_back_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (mut c, mut rx) = coordinator(
            Arc::new(Fixed("Pliers")),
            Arc::new(SimulatedCamera::default()),
            &dir,
        );
        let mut s = session();

        assert!(c.retry(&s).is_err());

        c.on_detection(event(), &mut s).unwrap();
        assert!(matches!(c.retry(&s), Err(StationError::WrongState { .. })));

        let (tx, result) = next_identified(&mut rx).await;
        c.on_identification(&tx, result, &mut s);

        let again = c.retry(&s).unwrap();
        assert_eq!(again, tx);
        let (_, result) = next_identified(&mut rx).await;
        assert_eq!(result.unwrap().prediction, "Pliers");
    }
}
