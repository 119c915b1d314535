//! # Kiosk Loop
//!
//! The context object that ties the devices, the session and the background
//! workers together. It is the only place the [`Session`] is mutated.
//!
//! ## Screen Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Welcome ──card_scanned──► Validating ──granted──► InSession           │
//! │      ▲   (card reader on)       │                  │  select action    │
//! │      │                          │ denied           │  return date      │
//! │      │◄─────────────────────────┘                  ▼                   │
//! │      │                                          Capture                 │
//! │      │                               (sensor on, debouncer running)    │
//! │      │                                             │ leave_capture      │
//! │      │                                             ▼                    │
//! │      │◄── cancel ──────────────────────────── InSession                 │
//! │      │                                             │ finalize           │
//! │      │                                             ▼                    │
//! │      │◄── committed ──────────────────────── Submitting                 │
//! │                                                    │ failed             │
//! │                                                    ▼                    │
//! │                                              InSession (entries kept)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Loop
//! One task runs [`Kiosk::run`]. Each turn it handles exactly one of:
//! a poll tick, a worker result, a card scan, a UI command or shutdown.
//! Workers (identification, validation, submission) never see the session;
//! they publish a [`WorkerMessage`] and the loop applies it.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use toole_core::validation::classify_identifier;
use toole_core::{
    CoreError, RawReading, SensorDebouncer, Session, TransactionId, TransactionType,
};

use crate::capture::{CaptureCoordinator, CaptureOutcome, IdentificationOutcome};
use crate::config::KioskConfig;
use crate::error::{StationError, StationResult};
use crate::events::{KioskEvent, KioskEventEmitter, NoOpEmitter};
use crate::hardware::{Camera, CardReader, CardSubscription, SensorSubscription, WeightSensor};
use crate::identify::IdentificationClient;
use crate::images::ImageStore;
use crate::submit::{BatchSubmitter, StorageGateway, SubmitOutcome};
use crate::users::{UserValidator, ValidationOutcome};
use crate::worker::{WorkerMessage, WORKER_CHANNEL_CAPACITY};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// Screens and Status
// =============================================================================

/// Which part of the workflow the kiosk is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Welcome,
    Validating,
    InSession,
    Capture,
    Submitting,
}

impl Screen {
    fn describe(self) -> &'static str {
        match self {
            Screen::Welcome => "no user is logged in",
            Screen::Validating => "a card is being validated",
            Screen::InSession => "outside the capture screen",
            Screen::Capture => "capturing",
            Screen::Submitting => "submitting",
        }
    }
}

/// Snapshot of the kiosk for external queries.
#[derive(Debug, Clone, Serialize)]
pub struct KioskStatus {
    pub screen: Screen,
    pub user_id: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub confirmed: usize,
    pub pending: Option<TransactionId>,
    /// The pending capture has a classifier answer to confirm.
    pub pending_identified: bool,
    pub processing: bool,
    pub submitting: bool,
}

impl Default for KioskStatus {
    fn default() -> Self {
        KioskStatus {
            screen: Screen::Welcome,
            user_id: None,
            transaction_type: None,
            confirmed: 0,
            pending: None,
            pending_identified: false,
            processing: false,
            submitting: false,
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// A user action forwarded from the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum KioskAction {
    CardScanned(String),
    SelectAction(TransactionType),
    SetReturnDate(NaiveDate),
    SetPurpose(Option<String>),
    EnterCapture,
    LeaveCapture,
    Confirm(String),
    ConfirmManual(String),
    Reject,
    RetryIdentification,
    Finalize,
    Cancel,
}

#[derive(Debug)]
struct KioskCommand {
    action: KioskAction,
    reply: oneshot::Sender<StationResult<()>>,
}

// =============================================================================
// Wiring
// =============================================================================

/// Devices the kiosk drives.
pub struct KioskDevices {
    pub sensor: Arc<dyn WeightSensor>,
    pub camera: Arc<dyn Camera>,
    pub card_reader: Arc<dyn CardReader>,
}

/// Remote and storage collaborators.
pub struct KioskServices {
    pub classifier: Arc<dyn IdentificationClient>,
    pub validator: Arc<dyn UserValidator>,
    pub gateway: Arc<dyn StorageGateway>,
    pub images: ImageStore,
}

// =============================================================================
// Kiosk
// =============================================================================

pub struct Kiosk {
    config: Arc<KioskConfig>,
    session: Session,
    screen: Screen,

    debouncer: SensorDebouncer,
    coordinator: CaptureCoordinator,
    submitter: BatchSubmitter,
    validator: Arc<dyn UserValidator>,

    sensor: Arc<dyn WeightSensor>,
    card_reader: Arc<dyn CardReader>,
    /// Held only on the capture screen.
    sensor_sub: Option<SensorSubscription>,
    /// Held only on the welcome screen.
    card_sub: Option<CardSubscription>,

    emitter: Arc<dyn KioskEventEmitter>,
    status: Arc<RwLock<KioskStatus>>,

    worker_tx: mpsc::Sender<WorkerMessage>,
    worker_rx: mpsc::Receiver<WorkerMessage>,
    command_tx: mpsc::Sender<KioskCommand>,
    command_rx: mpsc::Receiver<KioskCommand>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Kiosk {
    /// Creates a kiosk on the welcome screen with the card reader subscribed.
    pub fn new(config: KioskConfig, devices: KioskDevices, services: KioskServices) -> Self {
        Self::with_emitter(config, devices, services, Arc::new(NoOpEmitter))
    }

    /// Creates a kiosk that reports user-visible changes to `emitter`.
    pub fn with_emitter(
        config: KioskConfig,
        devices: KioskDevices,
        services: KioskServices,
        emitter: Arc<dyn KioskEventEmitter>,
    ) -> Self {
        let (worker_tx, worker_rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let coordinator = CaptureCoordinator::new(
            devices.camera,
            services.classifier,
            services.images.clone(),
            config.identify_timeout(),
            worker_tx.clone(),
        );
        let submitter = BatchSubmitter::new(
            services.gateway,
            services.images,
            config.submit_timeout(),
            worker_tx.clone(),
        );
        let card_sub = Some(CardSubscription::open(devices.card_reader.clone()));

        Kiosk {
            debouncer: SensorDebouncer::new(config.sensor.debounce_config()),
            config: Arc::new(config),
            session: Session::new(),
            screen: Screen::Welcome,
            coordinator,
            submitter,
            validator: services.validator,
            sensor: devices.sensor,
            card_reader: devices.card_reader,
            sensor_sub: None,
            card_sub,
            emitter,
            status: Arc::new(RwLock::new(KioskStatus::default())),
            worker_tx,
            worker_rx,
            command_tx,
            command_rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Returns a handle for driving the kiosk once [`Kiosk::run`] owns it.
    pub fn handle(&self) -> KioskHandle {
        KioskHandle {
            command_tx: self.command_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            status: self.status.clone(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn is_processing(&self) -> bool {
        self.coordinator.is_processing()
    }

    pub fn snapshot(&self) -> KioskStatus {
        KioskStatus {
            screen: self.screen,
            user_id: self.session.user_id().map(str::to_string),
            transaction_type: self.session.transaction_type(),
            confirmed: self.session.confirmed().len(),
            pending: self.session.pending().map(|p| p.transaction_id.clone()),
            pending_identified: self
                .session
                .pending()
                .map(|p| p.is_identified())
                .unwrap_or(false),
            processing: self.coordinator.is_processing(),
            submitting: self.submitter.is_submitting(),
        }
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Starts validating a scanned card or typed UCID.
    pub fn card_scanned(&mut self, raw: &str) -> StationResult<()> {
        self.require_screen(Screen::Welcome, "validate a card")?;

        let identifier = match classify_identifier(raw) {
            Ok(identifier) => identifier,
            Err(e) => {
                self.emit(KioskEvent::UserRejected {
                    reason: e.to_string(),
                });
                return Err(CoreError::from(e).into());
            }
        };

        debug!(identifier = identifier.as_str(), "Validating user");
        self.screen = Screen::Validating;

        let validator = self.validator.clone();
        let worker_tx = self.worker_tx.clone();
        tokio::spawn(async move {
            let result = validator.validate(&identifier).await;
            let message = WorkerMessage::UserValidated {
                identifier: identifier.as_str().to_string(),
                result,
            };
            if worker_tx.send(message).await.is_err() {
                debug!("Kiosk loop gone, dropping validation result");
            }
        });
        Ok(())
    }

    // =========================================================================
    // Visit Details
    // =========================================================================

    pub fn select_action(&mut self, kind: TransactionType) -> StationResult<()> {
        self.require_screen(Screen::InSession, "choose borrow or return")?;
        self.session.set_transaction_type(kind)?;
        info!(kind = kind.as_str(), "Transaction type selected");
        Ok(())
    }

    /// Sets the borrow due date. Past dates are refused.
    pub fn set_return_date(&mut self, date: NaiveDate) -> StationResult<()> {
        self.require_visit("set the return date")?;
        self.session
            .set_desired_return_date(date, Local::now().date_naive())?;
        Ok(())
    }

    pub fn set_purpose(&mut self, purpose: Option<String>) -> StationResult<()> {
        self.require_visit("set the purpose")?;
        self.session.set_purpose(purpose)?;
        Ok(())
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// Enters the capture screen and powers the weight sensor up.
    pub fn begin_capture(&mut self) -> StationResult<()> {
        self.require_screen(Screen::InSession, "start capturing")?;
        if self.session.transaction_type().is_none() {
            return Err(StationError::WrongState {
                action: "start capturing",
                state: "no transaction type is selected",
            });
        }

        self.sensor_sub = Some(SensorSubscription::acquire(self.sensor.clone())?);
        self.debouncer.reset();
        self.screen = Screen::Capture;
        info!("Capture screen entered");
        Ok(())
    }

    /// Leaves the capture screen. The sensor is released; an identification
    /// already dispatched keeps running and is matched on arrival.
    pub fn leave_capture(&mut self) {
        if self.sensor_sub.take().is_some() {
            info!("Capture screen left");
        }
        self.debouncer.reset();
        if self.screen == Screen::Capture {
            self.screen = Screen::InSession;
        }
    }

    /// Reads the sensor once and feeds the debouncer. Returns what happened
    /// to a detection, if one fired this tick.
    pub fn poll_sensor(&mut self, now: DateTime<Utc>) -> StationResult<Option<CaptureOutcome>> {
        let reading = match &self.sensor_sub {
            Some(sub) => sub.read(self.config.kiosk.sensor_read_retries),
            None => return Ok(None),
        };

        let event = match reading {
            Ok(raw) => {
                let weight = raw - self.config.sensor.zero_offset;
                self.debouncer.on_reading(RawReading::new(now, weight))
            }
            Err(e) => {
                debug!(error = %e, "Sensor read skipped");
                self.debouncer.on_read_failure();
                None
            }
        };

        let Some(event) = event else {
            return Ok(None);
        };

        let outcome = self.coordinator.on_detection(event, &mut self.session)?;
        match &outcome {
            CaptureOutcome::Started(transaction_id) => self.emit(KioskEvent::ProcessingStarted {
                transaction_id: transaction_id.clone(),
            }),
            CaptureOutcome::Failed(e) => self.emit(KioskEvent::CaptureFailed {
                message: e.to_string(),
            }),
            CaptureOutcome::Ignored(reason) => debug!(?reason, "Detection ignored"),
        }
        Ok(Some(outcome))
    }

    /// Accepts the pending capture as `tool_label`.
    pub fn confirm(&mut self, tool_label: &str) -> StationResult<()> {
        if self.coordinator.is_processing() {
            return Err(StationError::WrongState {
                action: "confirm",
                state: "identification is in progress",
            });
        }
        let entry = self.session.confirm(tool_label)?;
        let event = KioskEvent::EntryConfirmed {
            transaction_id: entry.transaction_id().clone(),
            tool_label: entry.tool_label().to_string(),
        };
        info!(
            transaction_id = %entry.transaction_id(),
            tool = entry.tool_label(),
            correct = ?entry.classification_correct(),
            "Entry confirmed"
        );
        self.emit(event);
        Ok(())
    }

    /// Accepts the pending capture with a manually chosen label. Allowed
    /// while identification is still running; its result then goes stale.
    pub fn confirm_manual(&mut self, tool_label: &str) -> StationResult<()> {
        let entry = self.session.confirm_manual(tool_label)?;
        let event = KioskEvent::EntryConfirmed {
            transaction_id: entry.transaction_id().clone(),
            tool_label: entry.tool_label().to_string(),
        };
        info!(
            transaction_id = %entry.transaction_id(),
            tool = entry.tool_label(),
            "Entry confirmed manually"
        );
        self.emit(event);
        Ok(())
    }

    /// Discards the pending capture.
    pub fn reject(&mut self) -> StationResult<()> {
        let pending = self.session.cancel_pending()?;
        info!(transaction_id = %pending.transaction_id, "Pending capture rejected");
        self.emit(KioskEvent::EntryRejected {
            transaction_id: pending.transaction_id,
        });
        Ok(())
    }

    /// Sends the pending capture's stored image to the classifier again.
    pub fn retry_identification(&mut self) -> StationResult<()> {
        let transaction_id = self.coordinator.retry(&self.session)?;
        self.emit(KioskEvent::ProcessingStarted { transaction_id });
        Ok(())
    }

    // =========================================================================
    // Finish
    // =========================================================================

    /// Submits every confirmed entry as one batch.
    pub fn finalize(&mut self) -> StationResult<()> {
        self.require_visit("finalize")?;
        let entries = self.submitter.submit(&self.session)?;
        self.leave_capture();
        self.screen = Screen::Submitting;
        self.emit(KioskEvent::SubmitStarted { entries });
        Ok(())
    }

    /// Abandons the visit and returns to the welcome screen.
    pub fn cancel(&mut self) -> StationResult<()> {
        if self.submitter.is_submitting() {
            return Err(StationError::WrongState {
                action: "cancel",
                state: Screen::Submitting.describe(),
            });
        }
        if self.session.is_active() {
            info!(
                user_id = self.session.user_id().unwrap_or_default(),
                discarded = self.session.confirmed().len(),
                "Session cancelled"
            );
        }
        self.end_session();
        Ok(())
    }

    // =========================================================================
    // Worker Results
    // =========================================================================

    /// Applies one background result to the session.
    pub fn apply(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::UserValidated { identifier, result } => {
                self.on_user_validated(&identifier, result)
            }

            WorkerMessage::Identified {
                transaction_id,
                result,
            } => {
                let outcome =
                    self.coordinator
                        .on_identification(&transaction_id, result, &mut self.session);
                match outcome {
                    IdentificationOutcome::Ready(identification) => {
                        self.emit(KioskEvent::ProcessingFinished {
                            transaction_id: transaction_id.clone(),
                        });
                        self.emit(KioskEvent::IdentificationReady {
                            transaction_id,
                            identification,
                        });
                    }
                    IdentificationOutcome::Failed(e) => {
                        self.emit(KioskEvent::ProcessingFinished {
                            transaction_id: transaction_id.clone(),
                        });
                        self.emit(KioskEvent::IdentificationFailed {
                            transaction_id,
                            message: e.to_string(),
                        });
                    }
                    IdentificationOutcome::Stale => {
                        if !self.coordinator.is_processing() {
                            self.emit(KioskEvent::ProcessingFinished { transaction_id });
                        }
                    }
                }
            }

            WorkerMessage::Submitted(report) => {
                match self.submitter.on_complete(report, &mut self.session) {
                    SubmitOutcome::Committed(committed) => {
                        self.emit(KioskEvent::SubmitSucceeded { committed });
                        self.end_session();
                    }
                    SubmitOutcome::Rejected(result) => {
                        self.screen = Screen::InSession;
                        self.emit(KioskEvent::SubmitFailed {
                            failure_index: result.failure_index,
                            message: result.error_detail.unwrap_or_default(),
                        });
                    }
                    SubmitOutcome::Failed(e) => {
                        self.screen = Screen::InSession;
                        self.emit(KioskEvent::SubmitFailed {
                            failure_index: None,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    fn on_user_validated(&mut self, identifier: &str, result: StationResult<ValidationOutcome>) {
        if self.screen != Screen::Validating {
            debug!(identifier, "Validation result arrived after leaving the screen");
            return;
        }

        match result {
            Ok(ValidationOutcome::Granted {
                user_id,
                display_name,
            }) => {
                info!(user_id = %user_id, "Session started");
                self.session.begin(user_id.clone());
                self.card_sub = None;
                self.screen = Screen::InSession;
                self.emit(KioskEvent::SessionStarted {
                    user_id,
                    display_name,
                });
            }
            Ok(ValidationOutcome::Denied { reason }) => {
                info!(identifier, reason = %reason, "User denied");
                self.screen = Screen::Welcome;
                self.emit(KioskEvent::UserRejected { reason });
            }
            Err(e) => {
                warn!(identifier, error = %e, "User validation failed");
                self.screen = Screen::Welcome;
                self.emit(KioskEvent::UserRejected {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Waits for the next background result. Mainly for driving the kiosk
    /// step by step without [`Kiosk::run`].
    pub async fn next_worker_message(&mut self) -> Option<WorkerMessage> {
        self.worker_rx.recv().await
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    /// Runs until shutdown. Devices are released on the way out.
    pub async fn run(mut self) -> StationResult<()> {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            kiosk = %self.config.kiosk.name,
            poll_ms = self.config.kiosk.poll_interval_ms,
            "Kiosk loop started"
        );
        self.publish_status().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_sensor(Utc::now()) {
                        warn!(error = %e, "Sensor poll failed");
                    }
                }

                Some(message) = self.worker_rx.recv() => {
                    self.apply(message);
                }

                Some(scan) = next_scan(&mut self.card_sub) => {
                    if let Err(e) = self.card_scanned(&scan) {
                        debug!(error = %e, "Card scan not accepted");
                    }
                }

                Some(command) = self.command_rx.recv() => {
                    let result = self.execute(command.action);
                    if let Err(e) = &result {
                        if e.is_invariant_violation() {
                            warn!(error = %e, "Rejected session operation");
                        } else {
                            debug!(error = %e, "Command refused");
                        }
                    }
                    let _ = command.reply.send(result);
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Kiosk received shutdown");
                    break;
                }
            }

            self.publish_status().await;
        }

        self.sensor_sub = None;
        self.card_sub = None;
        info!("Kiosk loop stopped");
        Ok(())
    }

    fn execute(&mut self, action: KioskAction) -> StationResult<()> {
        match action {
            KioskAction::CardScanned(raw) => self.card_scanned(&raw),
            KioskAction::SelectAction(kind) => self.select_action(kind),
            KioskAction::SetReturnDate(date) => self.set_return_date(date),
            KioskAction::SetPurpose(purpose) => self.set_purpose(purpose),
            KioskAction::EnterCapture => self.begin_capture(),
            KioskAction::LeaveCapture => {
                self.leave_capture();
                Ok(())
            }
            KioskAction::Confirm(label) => self.confirm(&label),
            KioskAction::ConfirmManual(label) => self.confirm_manual(&label),
            KioskAction::Reject => self.reject(),
            KioskAction::RetryIdentification => self.retry_identification(),
            KioskAction::Finalize => self.finalize(),
            KioskAction::Cancel => self.cancel(),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn end_session(&mut self) {
        self.leave_capture();
        self.session.reset();
        self.submitter.reset();
        self.screen = Screen::Welcome;
        if self.card_sub.is_none() {
            self.card_sub = Some(CardSubscription::open(self.card_reader.clone()));
        }
        self.emit(KioskEvent::SessionReset);
    }

    fn require_screen(&self, screen: Screen, action: &'static str) -> StationResult<()> {
        if self.screen == screen {
            Ok(())
        } else {
            Err(StationError::WrongState {
                action,
                state: self.screen.describe(),
            })
        }
    }

    /// A user is logged in and no batch is on its way out.
    fn require_visit(&self, action: &'static str) -> StationResult<()> {
        if matches!(self.screen, Screen::InSession | Screen::Capture) {
            Ok(())
        } else {
            Err(StationError::WrongState {
                action,
                state: self.screen.describe(),
            })
        }
    }

    fn emit(&self, event: KioskEvent) {
        self.emitter.emit(&event);
    }

    async fn publish_status(&self) {
        let snapshot = self.snapshot();
        *self.status.write().await = snapshot;
    }
}

/// Pends forever while no card subscription is held.
async fn next_scan(sub: &mut Option<CardSubscription>) -> Option<String> {
    match sub {
        Some(sub) => sub.next_scan().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Kiosk Handle (for external control)
// =============================================================================

/// Drives a running [`Kiosk`] from a UI task.
#[derive(Clone)]
pub struct KioskHandle {
    command_tx: mpsc::Sender<KioskCommand>,
    shutdown_tx: mpsc::Sender<()>,
    status: Arc<RwLock<KioskStatus>>,
}

impl KioskHandle {
    /// Runs `action` on the loop and waits for its result.
    pub async fn send(&self, action: KioskAction) -> StationResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(KioskCommand { action, reply })
            .await
            .map_err(|_| StationError::ShuttingDown)?;
        rx.await.map_err(|_| StationError::ShuttingDown)?
    }

    pub async fn status(&self) -> KioskStatus {
        self.status.read().await.clone()
    }

    /// Signals the kiosk to shut down.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a Kiosk with options.
pub struct KioskBuilder {
    config: KioskConfig,
    sensor: Option<Arc<dyn WeightSensor>>,
    camera: Option<Arc<dyn Camera>>,
    card_reader: Option<Arc<dyn CardReader>>,
    classifier: Option<Arc<dyn IdentificationClient>>,
    validator: Option<Arc<dyn UserValidator>>,
    gateway: Option<Arc<dyn StorageGateway>>,
    images: Option<ImageStore>,
    emitter: Option<Arc<dyn KioskEventEmitter>>,
}

impl KioskBuilder {
    pub fn new(config: KioskConfig) -> Self {
        KioskBuilder {
            config,
            sensor: None,
            camera: None,
            card_reader: None,
            classifier: None,
            validator: None,
            gateway: None,
            images: None,
            emitter: None,
        }
    }

    pub fn with_sensor(mut self, sensor: Arc<dyn WeightSensor>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn with_camera(mut self, camera: Arc<dyn Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_card_reader(mut self, card_reader: Arc<dyn CardReader>) -> Self {
        self.card_reader = Some(card_reader);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IdentificationClient>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn UserValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn StorageGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Defaults to the configured image root.
    pub fn with_images(mut self, images: ImageStore) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn KioskEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn build(self) -> StationResult<Kiosk> {
        let devices = KioskDevices {
            sensor: self
                .sensor
                .ok_or_else(|| StationError::InvalidConfig("Weight sensor required".into()))?,
            camera: self
                .camera
                .ok_or_else(|| StationError::InvalidConfig("Camera required".into()))?,
            card_reader: self
                .card_reader
                .ok_or_else(|| StationError::InvalidConfig("Card reader required".into()))?,
        };

        let images = self
            .images
            .unwrap_or_else(|| ImageStore::new(self.config.image_root()));
        let services = KioskServices {
            classifier: self
                .classifier
                .ok_or_else(|| StationError::InvalidConfig("Classifier required".into()))?,
            validator: self
                .validator
                .ok_or_else(|| StationError::InvalidConfig("User validator required".into()))?,
            gateway: self
                .gateway
                .ok_or_else(|| StationError::InvalidConfig("Storage gateway required".into()))?,
            images,
        };

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(Kiosk::with_emitter(self.config, devices, services, emitter))
    }
}
