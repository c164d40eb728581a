//! Background sampling loops.
//!
//! One sampling loop per sensor, each in its own task, feeding the
//! sensor's store actor over an mpsc channel. Failed polls are logged
//! and retried after a backoff; a device hiccup never stops the loop.
//! Stopping is cooperative via a shared run flag, checked once per
//! iteration.

use crate::core::{now_us, Coordinate3, Sample, Spectrum, StorePayload};
use crate::hardware::capabilities::SpectrumSource;
use crate::hardware::CompositeStage;
use crate::hub::messages::CalibrationCommand;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One pollable sensor: each acquisition yields a device-scale
/// timestamp (microseconds since the Unix epoch) and a payload.
#[async_trait]
pub trait SampleSource: Send + Sync + 'static {
    type Payload: StorePayload;

    /// Acquire one sample. `Ok(None)` means this record was skipped
    /// (e.g. it failed post-processing) but the device is healthy, so
    /// the loop continues at the normal cadence. `Err` is a device
    /// fault and triggers the retry backoff.
    async fn acquire(&self) -> Result<Option<(i64, Self::Payload)>>;

    /// Name used in log lines.
    fn name(&self) -> &'static str;
}

/// Stage position sampler; timestamps with the host wall clock at
/// readout time.
pub struct CoordinateSampler {
    stage: CompositeStage,
}

impl CoordinateSampler {
    pub fn new(stage: CompositeStage) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl SampleSource for CoordinateSampler {
    type Payload = Coordinate3;

    async fn acquire(&self) -> Result<Option<(i64, Coordinate3)>> {
        let coordinates = self.stage.get_coordinates().await?;
        Ok(Some((now_us(), coordinates)))
    }

    fn name(&self) -> &'static str {
        "stage"
    }
}

/// Spectrometer sampler; every raw exposure is pushed through the
/// calibrator worker before it reaches the store, so the store only
/// ever holds calibrated spectra. Timestamps come from the device.
pub struct SpectrumSampler {
    spectrometer: Arc<dyn SpectrumSource>,
    calibration_tx: mpsc::Sender<CalibrationCommand>,
}

impl SpectrumSampler {
    pub fn new(
        spectrometer: Arc<dyn SpectrumSource>,
        calibration_tx: mpsc::Sender<CalibrationCommand>,
    ) -> Self {
        Self {
            spectrometer,
            calibration_tx,
        }
    }
}

#[async_trait]
impl SampleSource for SpectrumSampler {
    type Payload = Spectrum;

    async fn acquire(&self) -> Result<Option<(i64, Spectrum)>> {
        let reading = self.spectrometer.measure_spectrum().await?;
        let (cmd, rx) = CalibrationCommand::calibrate(reading.spectrum);
        self.calibration_tx
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("calibrator worker is gone"))?;
        match rx
            .await
            .map_err(|_| anyhow::anyhow!("calibrator dropped the request"))?
        {
            Ok(calibrated) => Ok(Some((reading.timestamp_us, calibrated))),
            Err(e) => {
                // Already logged by the calibrator; the device is fine,
                // only this record is dropped.
                debug!("spectrum skipped after calibration failure: {e}");
                Ok(None)
            }
        }
    }

    fn name(&self) -> &'static str {
        "spectrometer"
    }
}

/// Periodic acquisition loop feeding one store actor.
pub struct SamplingLoop<S: SampleSource> {
    source: S,
    sample_tx: mpsc::Sender<Sample<S::Payload>>,
    interval: Duration,
    retry_backoff: Duration,
    run_flag: Arc<AtomicBool>,
    /// Logical offset added to every timestamp, in microseconds.
    offset_us: Arc<AtomicI64>,
}

impl<S: SampleSource> SamplingLoop<S> {
    pub fn new(
        source: S,
        sample_tx: mpsc::Sender<Sample<S::Payload>>,
        interval: Duration,
        retry_backoff: Duration,
        run_flag: Arc<AtomicBool>,
        offset_us: Arc<AtomicI64>,
    ) -> Self {
        Self {
            source,
            sample_tx,
            interval,
            retry_backoff,
            run_flag,
            offset_us,
        }
    }

    /// Poll until the run flag clears or the store side hangs up.
    pub async fn run(self) {
        debug!(source = self.source.name(), "sampling loop started");
        while self.run_flag.load(Ordering::SeqCst) {
            match self.source.acquire().await {
                Ok(Some((timestamp_us, payload))) => {
                    let offset = self.offset_us.load(Ordering::SeqCst);
                    let sample = Sample::new(timestamp_us + offset, payload);
                    if self.sample_tx.send(sample).await.is_err() {
                        debug!(source = self.source.name(), "store closed, loop exiting");
                        break;
                    }
                    tokio::time::sleep(self.interval).await;
                }
                Ok(None) => {
                    // Record skipped, device healthy: keep the cadence.
                    tokio::time::sleep(self.interval).await;
                }
                Err(e) => {
                    warn!(source = self.source.name(), "poll failed, backing off: {e}");
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
        debug!(source = self.source.name(), "sampling loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        calls: Arc<AtomicI64>,
        fail_first: bool,
    }

    #[async_trait]
    impl SampleSource for Counter {
        type Payload = Coordinate3;

        async fn acquire(&self) -> Result<Option<(i64, Coordinate3)>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                anyhow::bail!("transient device error");
            }
            Ok(Some((1_000 * n, Coordinate3::new(n as f64, 0.0, 0.0))))
        }

        fn name(&self) -> &'static str {
            "counter"
        }
    }

    fn spawn_loop(
        fail_first: bool,
        offset_us: Arc<AtomicI64>,
        run_flag: Arc<AtomicBool>,
    ) -> (mpsc::Receiver<Sample<Coordinate3>>, Arc<AtomicI64>) {
        let calls = Arc::new(AtomicI64::new(0));
        let source = Counter {
            calls: calls.clone(),
            fail_first,
        };
        let (tx, rx) = mpsc::channel(32);
        let sampling = SamplingLoop::new(
            source,
            tx,
            Duration::from_millis(1),
            Duration::from_millis(1),
            run_flag,
            offset_us,
        );
        tokio::spawn(sampling.run());
        (rx, calls)
    }

    #[tokio::test]
    async fn test_loop_emits_samples_and_stops_on_flag() {
        let run_flag = Arc::new(AtomicBool::new(true));
        let (mut rx, _) = spawn_loop(false, Arc::new(AtomicI64::new(0)), run_flag.clone());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload.x, 0.0);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload.x, 1.0);

        run_flag.store(false, Ordering::SeqCst);
        // Channel closes once the loop exits.
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_failed_poll_retries() {
        let run_flag = Arc::new(AtomicBool::new(true));
        let (mut rx, calls) = spawn_loop(true, Arc::new(AtomicI64::new(0)), run_flag.clone());

        // First acquisition fails; the loop still delivers the next one.
        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.payload.x, 1.0);
        assert!(calls.load(Ordering::SeqCst) >= 2);
        run_flag.store(false, Ordering::SeqCst);
    }

    /// Source whose second record is skipped (as after a calibration
    /// failure) while the device itself stays healthy.
    struct SkipsSecond {
        calls: Arc<AtomicI64>,
    }

    #[async_trait]
    impl SampleSource for SkipsSecond {
        type Payload = Coordinate3;

        async fn acquire(&self) -> Result<Option<(i64, Coordinate3)>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                return Ok(None);
            }
            Ok(Some((1_000 * n, Coordinate3::new(n as f64, 0.0, 0.0))))
        }

        fn name(&self) -> &'static str {
            "skips-second"
        }
    }

    #[tokio::test]
    async fn test_skipped_record_does_not_back_off() {
        let run_flag = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::channel(32);
        let sampling = SamplingLoop::new(
            SkipsSecond {
                calls: Arc::new(AtomicI64::new(0)),
            },
            tx,
            Duration::from_millis(1),
            // A backoff long enough that hitting it would fail the
            // timeout below.
            Duration::from_secs(60),
            run_flag.clone(),
            Arc::new(AtomicI64::new(0)),
        );
        tokio::spawn(sampling.run());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload.x, 0.0);

        // The skipped record must not stall the stream; the next good
        // one arrives at the normal cadence.
        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("loop backed off instead of keeping cadence")
            .unwrap();
        assert_eq!(next.payload.x, 2.0);

        run_flag.store(false, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_offset_applied_per_sample() {
        let run_flag = Arc::new(AtomicBool::new(true));
        let offset = Arc::new(AtomicI64::new(7_000));
        let (mut rx, _) = spawn_loop(false, offset.clone(), run_flag.clone());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.timestamp_us, 7_000);

        // Offset changes take effect on the next acquisition.
        offset.store(-2_000, Ordering::SeqCst);
        let mut last = first.timestamp_us;
        for _ in 0..5 {
            last = rx.recv().await.unwrap().timestamp_us;
        }
        assert_eq!(last % 1_000, 0);
        run_flag.store(false, Ordering::SeqCst);
    }
}
