//! # Hardware Boundary
//!
//! The kiosk's three devices, behind traits so the state machine runs the
//! same way against real drivers and the simulators below.
//!
//! ## Subscriptions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Scoped Device Subscriptions                         │
//! │                                                                         │
//! │  welcome screen            capture workflow                            │
//! │  ──────────────            ────────────────                            │
//! │  CardSubscription::open    SensorSubscription::acquire                 │
//! │     reader.subscribe()        sensor.power_up()                        │
//! │          │                          │                                   │
//! │          ▼                          ▼                                   │
//! │     scans → rx              poll every tick                             │
//! │          │                          │                                   │
//! │       drop ─► reader.unsubscribe  drop ─► sensor.power_down            │
//! │                                                                         │
//! │  Drop runs on every exit path: leaving the screen, an error, shutdown. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Real GPIO / camera drivers implement [`WeightSensor`], [`Camera`] and
//! [`CardReader`]; the simulated devices are what ships for development and
//! tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{CaptureError, SensorReadError};

/// Queue depth for card scans between the reader and the loop.
const CARD_CHANNEL_CAPACITY: usize = 8;

// =============================================================================
// Device Traits
// =============================================================================

/// A load cell that returns calibrated readings (zero offset applied).
///
/// `read` must return immediately: `Err(NotReady)` when no sample is ready.
pub trait WeightSensor: Send + Sync {
    fn power_up(&self) -> Result<(), SensorReadError>;
    fn power_down(&self);
    fn read(&self) -> Result<i64, SensorReadError>;
}

/// Single-frame still camera. `capture_frame` returns encoded JPEG bytes.
pub trait Camera: Send + Sync {
    fn capture_frame(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Card / barcode reader. Decoded scans are delivered on the channel handed
/// to `subscribe` until `unsubscribe` is called.
pub trait CardReader: Send + Sync {
    fn subscribe(&self, tx: mpsc::Sender<String>);
    fn unsubscribe(&self);
}

// =============================================================================
// Subscription Handles
// =============================================================================

/// Exclusive use of the weight sensor while the capture workflow is open.
pub struct SensorSubscription {
    sensor: Arc<dyn WeightSensor>,
}

impl SensorSubscription {
    /// Powers the sensor up. The guard powers it down when dropped.
    pub fn acquire(sensor: Arc<dyn WeightSensor>) -> Result<Self, SensorReadError> {
        sensor.power_up()?;
        debug!("Weight sensor acquired");
        Ok(SensorSubscription { sensor })
    }

    /// Reads once, re-reading up to `retries` more times on failure.
    ///
    /// Never waits between attempts; a sensor that stays unready for the
    /// whole burst just costs this tick.
    pub fn read(&self, retries: u32) -> Result<i64, SensorReadError> {
        let mut last = SensorReadError::NotReady;
        for _ in 0..=retries {
            match self.sensor.read() {
                Ok(weight) => return Ok(weight),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

impl Drop for SensorSubscription {
    fn drop(&mut self) {
        self.sensor.power_down();
        debug!("Weight sensor released");
    }
}

/// Card scans routed to the kiosk loop while the welcome screen is up.
pub struct CardSubscription {
    reader: Arc<dyn CardReader>,
    rx: mpsc::Receiver<String>,
}

impl CardSubscription {
    pub fn open(reader: Arc<dyn CardReader>) -> Self {
        let (tx, rx) = mpsc::channel(CARD_CHANNEL_CAPACITY);
        reader.subscribe(tx);
        debug!("Card reader subscribed");
        CardSubscription { reader, rx }
    }

    /// Next scan, or `None` once the reader has gone away.
    pub async fn next_scan(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for CardSubscription {
    fn drop(&mut self) {
        self.reader.unsubscribe();
        debug!("Card reader unsubscribed");
    }
}

// =============================================================================
// Simulated Devices
// =============================================================================

/// Weight sensor that replays a script, then holds a resting weight.
///
/// Script entries of `None` simulate a not-ready sample.
#[derive(Debug)]
pub struct SimulatedSensor {
    script: Mutex<VecDeque<Option<i64>>>,
    resting: Mutex<i64>,
    powered: AtomicBool,
    acquisitions: AtomicUsize,
}

impl SimulatedSensor {
    pub fn new(resting: i64) -> Self {
        SimulatedSensor {
            script: Mutex::new(VecDeque::new()),
            resting: Mutex::new(resting),
            powered: AtomicBool::new(false),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Queues readings to return before falling back to the resting weight.
    pub fn push_readings(&self, readings: impl IntoIterator<Item = Option<i64>>) {
        if let Ok(mut script) = self.script.lock() {
            script.extend(readings);
        }
    }

    /// Changes what the scale reads once the script runs out.
    pub fn set_resting(&self, weight: i64) {
        if let Ok(mut resting) = self.resting.lock() {
            *resting = weight;
        }
    }

    pub fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    /// How many times the sensor was powered up.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl WeightSensor for SimulatedSensor {
    fn power_up(&self) -> Result<(), SensorReadError> {
        self.powered.store(true, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn power_down(&self) {
        self.powered.store(false, Ordering::SeqCst);
    }

    fn read(&self) -> Result<i64, SensorReadError> {
        if !self.is_powered() {
            return Err(SensorReadError::PoweredDown);
        }

        let scripted = self
            .script
            .lock()
            .map_err(|e| SensorReadError::Io(e.to_string()))?
            .pop_front();

        match scripted {
            Some(Some(weight)) => Ok(weight),
            Some(None) => Err(SensorReadError::NotReady),
            None => self
                .resting
                .lock()
                .map(|w| *w)
                .map_err(|e| SensorReadError::Io(e.to_string())),
        }
    }
}

/// Camera that returns a fixed frame, or fails on demand.
#[derive(Debug)]
pub struct SimulatedCamera {
    frame: Vec<u8>,
    failing: AtomicBool,
    captures: AtomicUsize,
}

impl SimulatedCamera {
    pub fn new(frame: Vec<u8>) -> Self {
        SimulatedCamera {
            frame,
            failing: AtomicBool::new(false),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedCamera {
    /// A tiny JPEG-looking frame (SOI/EOI markers only).
    fn default() -> Self {
        SimulatedCamera::new(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }
}

impl Camera for SimulatedCamera {
    fn capture_frame(&self) -> Result<Vec<u8>, CaptureError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CaptureError::Unavailable("simulated camera fault".into()));
        }
        if self.frame.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(self.frame.clone())
    }
}

/// Card reader fed by [`SimulatedCardReader::scan`].
#[derive(Debug, Default)]
pub struct SimulatedCardReader {
    subscriber: Mutex<Option<mpsc::Sender<String>>>,
}

impl SimulatedCardReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a scan. Returns false when nobody is listening.
    pub fn scan(&self, raw: &str) -> bool {
        let subscriber = match self.subscriber.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };

        match subscriber {
            Some(tx) => match tx.try_send(raw.to_string()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Dropping card scan");
                    false
                }
            },
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriber
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl CardReader for SimulatedCardReader {
    fn subscribe(&self, tx: mpsc::Sender<String>) {
        if let Ok(mut guard) = self.subscriber.lock() {
            *guard = Some(tx);
        }
    }

    fn unsubscribe(&self) {
        if let Ok(mut guard) = self.subscriber.lock() {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_released_when_subscription_dropped() {
        let sensor = Arc::new(SimulatedSensor::new(0));
        {
            let sub = SensorSubscription::acquire(sensor.clone()).unwrap();
            assert!(sensor.is_powered());
            assert_eq!(sub.read(0).unwrap(), 0);
        }
        assert!(!sensor.is_powered());
        assert_eq!(sensor.read(), Err(SensorReadError::PoweredDown));
    }

    #[test]
    fn test_read_retries_past_unready_samples() {
        let sensor = Arc::new(SimulatedSensor::new(0));
        sensor.push_readings([None, None, Some(1200)]);
        let sub = SensorSubscription::acquire(sensor.clone()).unwrap();

        assert_eq!(sub.read(2).unwrap(), 1200);

        sensor.push_readings([None, None]);
        assert_eq!(sub.read(1), Err(SensorReadError::NotReady));
    }

    #[test]
    fn test_camera_failure_is_reported() {
        let camera = SimulatedCamera::default();
        assert!(camera.capture_frame().is_ok());
        camera.set_failing(true);
        assert!(matches!(
            camera.capture_frame(),
            Err(CaptureError::Unavailable(_))
        ));
        assert_eq!(camera.captures(), 1);
    }

    #[tokio::test]
    async fn test_card_scans_only_reach_open_subscription() {
        let reader = Arc::new(SimulatedCardReader::new());
        assert!(!reader.scan("ABC123;"));

        let mut sub = CardSubscription::open(reader.clone());
        assert!(reader.scan("ABC123;"));
        assert_eq!(sub.next_scan().await.as_deref(), Some("ABC123;"));

        drop(sub);
        assert!(!reader.is_subscribed());
        assert!(!reader.scan("ABC123;"));
    }
}
