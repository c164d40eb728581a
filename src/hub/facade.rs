//! Hub facades: the public query surface over the worker tasks.
//!
//! Each facade owns the command senders for its workers plus the shared
//! run flag and timestamp offset. Every public method is one
//! command/oneshot round trip; the per-request oneshot responder means a
//! response can only reach the caller that issued it, so concurrent
//! callers can never receive each other's answers.
//!
//! There is no cross-hub consistency: a caller that needs the stage
//! position at the time of a spectrum queries the coordinate hub with
//! the spectrum's own timestamp.

use crate::calibration::{CalibrationParameters, Calibrator, CalibratorActor};
use crate::config::HubConfig;
use crate::core::{Coordinate3, Frame, Sample, Spectrum};
use crate::correction::CorrectionActor;
use crate::error::{AppResult, HubError};
use crate::hardware::capabilities::{ExposureControl, FrameSource, SpectrumSource};
use crate::hardware::CompositeStage;
use crate::hub::messages::{
    CalibrationCommand, CorrectionCommand, CorrectionKind, StoreCommand,
};
use crate::hub::sampling::{CoordinateSampler, SamplingLoop, SpectrumSampler};
use crate::hub::store_actor::StoreActor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 32;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn offset_to_ms(offset_us: &AtomicI64) -> i64 {
    offset_us.load(Ordering::SeqCst) / 1_000
}

fn offset_from_ms(offset_us: &AtomicI64, ms: i64) {
    offset_us.store(ms * 1_000, Ordering::SeqCst);
}

async fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("worker did not stop within the shutdown grace period");
        }
    }
}

/// Spectrometer hub: calibrated measurement store plus calibration
/// management and integration-time control.
pub struct RamanHub {
    store_tx: mpsc::Sender<StoreCommand<Spectrum>>,
    calibration_tx: mpsc::Sender<CalibrationCommand>,
    exposure: Arc<dyn ExposureControl>,
    offset_us: Arc<AtomicI64>,
    run_flag: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl RamanHub {
    /// Spawn the calibrator, store actor and sampling loop, and return
    /// the facade over them.
    pub fn spawn(
        config: &HubConfig,
        spectrometer: Arc<dyn SpectrumSource>,
        exposure: Arc<dyn ExposureControl>,
    ) -> Self {
        let run_flag = Arc::new(AtomicBool::new(true));
        let offset_us = Arc::new(AtomicI64::new(config.sampling.offset_ms * 1_000));

        let (calibration_tx, calibration_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let calibrator =
            CalibratorActor::new(Calibrator::new(CalibrationParameters::default()), calibration_rx);

        let (sample_tx, sample_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (store_tx, store_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let store = StoreActor::new(
            config.store.capacity,
            config.store.wait_timeout,
            sample_rx,
            store_rx,
        );

        let sampler = SpectrumSampler::new(spectrometer, calibration_tx.clone());
        let sampling = SamplingLoop::new(
            sampler,
            sample_tx,
            config.sampling.spectrum_interval,
            config.sampling.retry_backoff,
            run_flag.clone(),
            offset_us.clone(),
        );

        let workers = vec![
            tokio::spawn(calibrator.run()),
            tokio::spawn(store.run()),
            tokio::spawn(sampling.run()),
        ];
        info!("spectrometer hub started");

        Self {
            store_tx,
            calibration_tx,
            exposure,
            offset_us,
            run_flag,
            workers,
        }
    }

    /// Calibrated measurements with timestamps in `[start_us, end_us]`.
    /// With `new_only`, only records no previous `new_only` call has
    /// handed out.
    pub async fn get_measurement(
        &self,
        start_us: i64,
        end_us: Option<i64>,
        new_only: bool,
    ) -> AppResult<Vec<Sample<Spectrum>>> {
        let (cmd, rx) = StoreCommand::range(start_us, end_us, new_only);
        self.store_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Number of calibrated measurements currently stored.
    pub async fn measurement_count(&self) -> AppResult<usize> {
        let (cmd, rx) = StoreCommand::len();
        self.store_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    pub async fn set_calibration(&self, params: CalibrationParameters) -> AppResult<()> {
        let (cmd, rx) = CalibrationCommand::set_parameters(params);
        self.calibration_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    pub async fn get_calibration(&self) -> AppResult<CalibrationParameters> {
        let (cmd, rx) = CalibrationCommand::get_parameters();
        self.calibration_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    pub async fn save_calibration(&self, path: PathBuf) -> AppResult<()> {
        let (cmd, rx) = CalibrationCommand::save_parameters(path);
        self.calibration_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)?
    }

    pub async fn load_calibration(&self, path: PathBuf) -> AppResult<()> {
        let (cmd, rx) = CalibrationCommand::load_parameters(path);
        self.calibration_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)?
    }

    /// Integration time for the next spectrometer exposure.
    pub async fn set_exposure_time_us(&self, micros: u64) -> AppResult<()> {
        self.exposure
            .set_exposure_us(micros)
            .await
            .map_err(|e| HubError::Device(e.to_string()))
    }

    pub async fn get_exposure_time_us(&self) -> AppResult<u64> {
        self.exposure
            .get_exposure_us()
            .await
            .map_err(|e| HubError::Device(e.to_string()))
    }

    /// Logical timestamp bias applied by the sampling loop, in ms.
    pub fn get_measurement_offset_ms(&self) -> i64 {
        offset_to_ms(&self.offset_us)
    }

    /// Takes effect on the next acquisition, no channel round trip.
    pub fn set_measurement_offset_ms(&self, ms: i64) {
        offset_from_ms(&self.offset_us, ms);
    }

    /// Stop the sampling loop and workers, waiting briefly for each.
    pub async fn shutdown(self) {
        self.run_flag.store(false, Ordering::SeqCst);
        drop(self.store_tx);
        drop(self.calibration_tx);
        join_workers(self.workers).await;
        info!("spectrometer hub stopped");
    }
}

/// Stage + camera hub: timestamped coordinate store plus corrected
/// image capture.
pub struct StageCameraHub {
    store_tx: mpsc::Sender<StoreCommand<Coordinate3>>,
    correction_tx: mpsc::Sender<CorrectionCommand>,
    exposure: Arc<dyn ExposureControl>,
    offset_us: Arc<AtomicI64>,
    run_flag: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl StageCameraHub {
    /// Spawn the coordinate store, sampling loop and correction worker.
    pub fn spawn(
        config: &HubConfig,
        stage: CompositeStage,
        camera: Arc<dyn FrameSource>,
        exposure: Arc<dyn ExposureControl>,
    ) -> Self {
        let run_flag = Arc::new(AtomicBool::new(true));
        let offset_us = Arc::new(AtomicI64::new(config.sampling.offset_ms * 1_000));

        let (sample_tx, sample_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (store_tx, store_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let store = StoreActor::new(
            config.store.capacity,
            config.store.wait_timeout,
            sample_rx,
            store_rx,
        );

        let sampling = SamplingLoop::new(
            CoordinateSampler::new(stage),
            sample_tx,
            config.sampling.coordinate_interval,
            config.sampling.retry_backoff,
            run_flag.clone(),
            offset_us.clone(),
        );

        let (correction_tx, correction_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let correction = CorrectionActor::new(camera, config.correction.clone(), correction_rx);

        let workers = vec![
            tokio::spawn(store.run()),
            tokio::spawn(sampling.run()),
            tokio::spawn(correction.run()),
        ];
        info!("stage+camera hub started");

        Self {
            store_tx,
            correction_tx,
            exposure,
            offset_us,
            run_flag,
            workers,
        }
    }

    /// First stage position at or after `timestamp_us`; waits for new
    /// data when queried ahead of the stream, up to the configured
    /// deadline.
    pub async fn get_coordinates_closest(&self, timestamp_us: i64) -> AppResult<Sample<Coordinate3>> {
        let (cmd, rx) = StoreCommand::closest(timestamp_us);
        self.store_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)?
    }

    /// Stage position linearly interpolated at `timestamp_us`; waits
    /// like `get_coordinates_closest` when queried ahead of the stream.
    pub async fn get_coordinates_interpolate(
        &self,
        timestamp_us: i64,
    ) -> AppResult<Sample<Coordinate3>> {
        let (cmd, rx) = StoreCommand::interpolated(timestamp_us);
        self.store_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)?
    }

    /// Number of stage positions currently stored.
    pub async fn coordinate_count(&self) -> AppResult<usize> {
        let (cmd, rx) = StoreCommand::len();
        self.store_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Capture one frame with the requested correction applied.
    pub async fn get_image(&self, kind: CorrectionKind) -> AppResult<Frame> {
        let (cmd, rx) = CorrectionCommand::capture_image(kind);
        self.correction_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)?
    }

    /// Derive and store the flatfield reference map from a reference
    /// illumination frame.
    pub async fn set_flatfield_reference(&self, reference: Frame) -> AppResult<()> {
        let (cmd, rx) = CorrectionCommand::set_flatfield(reference);
        self.correction_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)?
    }

    pub async fn save_flatfield_reference(&self, path: PathBuf) -> AppResult<()> {
        let (cmd, rx) = CorrectionCommand::save_flatfield(path);
        self.correction_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)?
    }

    pub async fn load_flatfield_reference(&self, path: PathBuf) -> AppResult<()> {
        let (cmd, rx) = CorrectionCommand::load_flatfield(path);
        self.correction_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)?
    }

    pub async fn set_flatfield_gain(&self, value: f32) -> AppResult<()> {
        let (cmd, rx) = CorrectionCommand::set_gain(value);
        self.correction_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)?
    }

    pub async fn get_flatfield_gain(&self) -> AppResult<f32> {
        let (cmd, rx) = CorrectionCommand::get_gain();
        self.correction_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)?;
        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Camera exposure for the next capture.
    pub async fn set_exposure_time_us(&self, micros: u64) -> AppResult<()> {
        self.exposure
            .set_exposure_us(micros)
            .await
            .map_err(|e| HubError::Device(e.to_string()))
    }

    pub async fn get_exposure_time_us(&self) -> AppResult<u64> {
        self.exposure
            .get_exposure_us()
            .await
            .map_err(|e| HubError::Device(e.to_string()))
    }

    pub fn get_measurement_offset_ms(&self) -> i64 {
        offset_to_ms(&self.offset_us)
    }

    pub fn set_measurement_offset_ms(&self, ms: i64) {
        offset_from_ms(&self.offset_us, ms);
    }

    /// Stop the sampling loop and workers, waiting briefly for each.
    pub async fn shutdown(self) {
        self.run_flag.store(false, Ordering::SeqCst);
        drop(self.store_tx);
        drop(self.correction_tx);
        join_workers(self.workers).await;
        info!("stage+camera hub stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockCamera, MockSpectrometer, MockStage};

    fn fast_config() -> HubConfig {
        let mut config = HubConfig::default();
        config.sampling.coordinate_interval = Duration::from_millis(2);
        config.sampling.spectrum_interval = Duration::from_millis(2);
        config.sampling.retry_backoff = Duration::from_millis(2);
        config.store.wait_timeout = Duration::from_millis(500);
        config
    }

    fn spawn_stage_hub(config: &HubConfig) -> StageCameraHub {
        let stage = CompositeStage::new(
            Arc::new(MockStage::new(2)),
            Arc::new(MockStage::new(1)),
        );
        let camera = Arc::new(MockCamera::new(16, 12, 1));
        StageCameraHub::spawn(config, stage, camera.clone(), camera)
    }

    #[tokio::test]
    async fn test_coordinates_closest_waits_for_first_sample() {
        let hub = spawn_stage_hub(&fast_config());
        // Queried right at startup: the store may still be empty, so the
        // query parks and is answered by the first acquisition.
        let sample = hub.get_coordinates_closest(0).await.unwrap();
        assert_eq!(sample.payload, Coordinate3::new(0.0, 0.0, 0.0));
        assert!(hub.coordinate_count().await.unwrap() >= 1);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_image_and_gain_surface() {
        let hub = spawn_stage_hub(&fast_config());

        let frame = hub.get_image(CorrectionKind::Raw).await.unwrap();
        assert_eq!((frame.width, frame.height), (16, 12));

        hub.set_flatfield_gain(2.0).await.unwrap();
        assert_eq!(hub.get_flatfield_gain().await.unwrap(), 2.0);

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_offset_round_trip_without_channel() {
        let hub = spawn_stage_hub(&fast_config());
        assert_eq!(hub.get_measurement_offset_ms(), 0);
        hub.set_measurement_offset_ms(-125);
        assert_eq!(hub.get_measurement_offset_ms(), -125);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_raman_hub_measurements_and_calibration() {
        let spectrometer = Arc::new(MockSpectrometer::new(128));
        let hub = RamanHub::spawn(&fast_config(), spectrometer.clone(), spectrometer);

        // Give the sampling loop time to acquire a couple of spectra.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let all = hub.get_measurement(0, None, false).await.unwrap();
        assert!(!all.is_empty());
        assert!(all.windows(2).all(|w| w[0].timestamp_us <= w[1].timestamp_us));
        assert!(hub.measurement_count().await.unwrap() >= all.len());

        let params = hub.get_calibration().await.unwrap();
        assert_eq!(params, CalibrationParameters::default());

        hub.set_exposure_time_us(25_000).await.unwrap();
        assert_eq!(hub.get_exposure_time_us().await.unwrap(), 25_000);

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_only_hands_records_out_once() {
        let spectrometer = Arc::new(MockSpectrometer::new(64));
        let hub = RamanHub::spawn(&fast_config(), spectrometer.clone(), spectrometer);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let first = hub.get_measurement(0, None, true).await.unwrap();
        assert!(!first.is_empty());

        // Immediately asking again returns only records acquired since.
        let second = hub.get_measurement(0, None, true).await.unwrap();
        let seen: Vec<i64> = first.iter().map(|s| s.timestamp_us).collect();
        assert!(second.iter().all(|s| !seen.contains(&s.timestamp_us)));

        hub.shutdown().await;
    }
}
