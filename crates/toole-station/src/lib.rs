//! # toole-station: Kiosk Runtime for TOOL-E
//!
//! Everything that has a clock or a socket: the sensor poll, the capture and
//! identification round-trip, user validation and the batch commit.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Kiosk (event loop)                            │
//! │                                                                         │
//! │   poll tick ──► SensorSubscription ──► SensorDebouncer                  │
//! │                                            │ DetectionEvent             │
//! │                                            ▼                            │
//! │                                   CaptureCoordinator ──spawn──┐         │
//! │                                            │                  ▼         │
//! │   card scan ──► UserValidator ──spawn──┐   │        IdentificationClient│
//! │                                        │   │                  │         │
//! │   UI command ──► Session ◄─────────────┴───┴── WorkerMessage ◄┘         │
//! │                     │                                                   │
//! │                 finalize                                                │
//! │                     ▼                                                   │
//! │              BatchSubmitter ──spawn──► ImageStore.relocate              │
//! │                                        StorageGateway.commit_batch      │
//! │                                                                         │
//! │  EVENTS (to the UI via KioskEventEmitter):                             │
//! │  • SessionStarted / UserRejected / SessionReset                        │
//! │  • ProcessingStarted / ProcessingFinished                              │
//! │  • IdentificationReady / IdentificationFailed / CaptureFailed          │
//! │  • SubmitStarted / SubmitSucceeded / SubmitFailed                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`kiosk`] - The `Kiosk` context object, its handle and builder
//! - [`capture`] - Detection to pending entry to identification
//! - [`submit`] - `BatchSubmitter` and the storage gateways
//! - [`identify`] - Classifier client
//! - [`users`] - User validation (server or local directory)
//! - [`images`] - Temp and archived capture files
//! - [`hardware`] - Device traits, subscription guards, simulators
//! - [`config`] - Kiosk configuration
//! - [`events`] - UI event types and emitters
//! - [`error`] - Runtime error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toole_station::{KioskBuilder, KioskConfig};
//!
//! let config = KioskConfig::load_or_default(None);
//! let kiosk = KioskBuilder::new(config)
//!     .with_sensor(sensor)
//!     .with_camera(camera)
//!     .with_card_reader(reader)
//!     .with_classifier(classifier)
//!     .with_validator(validator)
//!     .with_gateway(gateway)
//!     .build()?;
//!
//! let handle = kiosk.handle();
//! tokio::spawn(kiosk.run());
//! handle.send(KioskAction::Cancel).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod hardware;
pub mod identify;
pub mod images;
pub mod kiosk;
pub mod submit;
pub mod users;
pub mod worker;

mod http;

// =============================================================================
// Re-exports
// =============================================================================

pub use capture::{CaptureCoordinator, CaptureOutcome, IdentificationOutcome, IgnoreReason};
pub use config::{KioskConfig, StorageBackend, ValidationSource};
pub use error::{
    CaptureError, IdentificationError, SensorReadError, StationError, StationResult,
    SubmissionError,
};
pub use events::{ChannelEmitter, KioskEvent, KioskEventEmitter, NoOpEmitter};
pub use hardware::{
    Camera, CardReader, CardSubscription, SensorSubscription, SimulatedCamera,
    SimulatedCardReader, SimulatedSensor, WeightSensor,
};
pub use identify::{HttpClassifier, IdentificationClient};
pub use images::{ImageStore, TempReservation};
pub use kiosk::{
    Kiosk, KioskAction, KioskBuilder, KioskDevices, KioskHandle, KioskServices, KioskStatus,
    Screen,
};
pub use submit::{BatchSubmitter, HttpGateway, SqliteGateway, StorageGateway, SubmitOutcome};
pub use users::{DirectoryValidator, HttpUserValidator, UserValidator, ValidationOutcome};
pub use worker::{SubmitReport, WorkerMessage};
