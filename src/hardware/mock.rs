//! Mock hardware implementations.
//!
//! Simulated microscope devices for running and testing without physical
//! hardware. All mocks use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available mocks
//!
//! - `MockStage` - motion controller with configurable axis count
//! - `MockCamera` - camera producing a gradient test pattern with noise
//! - `MockSpectrometer` - spectrometer producing synthetic Raman peaks
//!
//! Readout delays are kept to a few milliseconds so test suites that poll
//! the mocks at tens of hertz stay realistic but fast.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::core::{now_us, Frame, Spectrum};
use crate::hardware::capabilities::{
    ExposureControl, FrameSource, MotionControl, SpectrumReading, SpectrumSource,
};

// =============================================================================
// MockStage - Simulated Motion Controller
// =============================================================================

/// Mock motion controller.
///
/// Simulates a stage controller with:
/// - Configurable number of axes (2 for the XY stage, 1 for Z)
/// - Instant direct moves, velocity tracking for continuous moves
/// - Thread-safe position state
pub struct MockStage {
    positions: Arc<RwLock<Vec<f64>>>,
    velocities: Arc<RwLock<Vec<f64>>>,
}

impl MockStage {
    /// Create a controller with `axes` axes, all at 0.0 mm.
    pub fn new(axes: usize) -> Self {
        Self {
            positions: Arc::new(RwLock::new(vec![0.0; axes])),
            velocities: Arc::new(RwLock::new(vec![0.0; axes])),
        }
    }

    /// Create a controller with explicit starting positions.
    pub fn with_positions(positions: Vec<f64>) -> Self {
        let axes = positions.len();
        Self {
            positions: Arc::new(RwLock::new(positions)),
            velocities: Arc::new(RwLock::new(vec![0.0; axes])),
        }
    }
}

#[async_trait]
impl MotionControl for MockStage {
    async fn position(&self) -> Result<Vec<f64>> {
        // ~1ms readout latency, far below the sampling period
        sleep(Duration::from_millis(1)).await;
        Ok(self.positions.read().await.clone())
    }

    async fn move_direct(&self, target: &[f64]) -> Result<()> {
        let mut positions = self.positions.write().await;
        if target.len() != positions.len() {
            return Err(anyhow!(
                "MockStage: expected {} axis targets, got {}",
                positions.len(),
                target.len()
            ));
        }
        positions.copy_from_slice(target);
        Ok(())
    }

    async fn move_continuous(&self, axis: usize, velocity: f64) -> Result<()> {
        let mut velocities = self.velocities.write().await;
        let slot = velocities
            .get_mut(axis)
            .ok_or_else(|| anyhow!("MockStage: no axis {}", axis))?;
        *slot = velocity;
        Ok(())
    }

    async fn stop_move(&self) -> Result<()> {
        self.velocities.write().await.fill(0.0);
        Ok(())
    }
}

// =============================================================================
// MockCamera - Simulated Brightfield Camera
// =============================================================================

/// Mock camera producing a vignetted gradient with per-frame noise.
///
/// The pattern is deliberately non-uniform so flatfield correction has
/// something to correct.
pub struct MockCamera {
    width: u32,
    height: u32,
    channels: u32,
    exposure_us: Arc<RwLock<u64>>,
    frame_count: AtomicU64,
}

impl MockCamera {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
            exposure_us: Arc::new(RwLock::new(10_000)),
            frame_count: AtomicU64::new(0),
        }
    }

    /// Total frames captured so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for MockCamera {
    async fn capture_frame(&self) -> Result<Frame> {
        // Simulate the exposure, capped so tests stay fast.
        let exposure_us = *self.exposure_us.read().await;
        sleep(Duration::from_micros(exposure_us.min(5_000))).await;

        self.frame_count.fetch_add(1, Ordering::SeqCst);

        let (w, h, c) = (self.width, self.height, self.channels);
        let cx = (w as f32 - 1.0) / 2.0;
        let cy = (h as f32 - 1.0) / 2.0;
        let max_r2 = cx * cx + cy * cy;

        let mut rng = rand::thread_rng();
        let mut data = Vec::with_capacity((w * h * c) as usize);
        for y in 0..h {
            for x in 0..w {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                // Radial falloff toward the corners, like an uneven lamp.
                let vignette = 1.0 - 0.6 * (dx * dx + dy * dy) / max_r2;
                for _ in 0..c {
                    let noise: f32 = rng.gen_range(-10.0..10.0);
                    data.push((1000.0 * vignette + noise).max(0.0));
                }
            }
        }

        Ok(Frame::new(w, h, c, data))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[async_trait]
impl ExposureControl for MockCamera {
    async fn set_exposure_us(&self, micros: u64) -> Result<()> {
        if micros == 0 {
            return Err(anyhow!("MockCamera: exposure must be positive"));
        }
        *self.exposure_us.write().await = micros;
        Ok(())
    }

    async fn get_exposure_us(&self) -> Result<u64> {
        Ok(*self.exposure_us.read().await)
    }
}

// =============================================================================
// MockSpectrometer - Simulated Raman Spectrometer
// =============================================================================

/// Mock spectrometer producing a fluorescence baseline with two Raman
/// peaks and shot noise.
pub struct MockSpectrometer {
    pixels: usize,
    integration_time_us: Arc<RwLock<u64>>,
}

impl MockSpectrometer {
    pub fn new(pixels: usize) -> Self {
        Self {
            pixels,
            integration_time_us: Arc::new(RwLock::new(50_000)),
        }
    }

    fn peak(x: f64, center: f64, width: f64, height: f64) -> f64 {
        let d = (x - center) / width;
        height * (-0.5 * d * d).exp()
    }
}

#[async_trait]
impl SpectrumSource for MockSpectrometer {
    async fn measure_spectrum(&self) -> Result<SpectrumReading> {
        let integration_time_us = *self.integration_time_us.read().await;
        sleep(Duration::from_micros(integration_time_us.min(5_000))).await;

        let timestamp_us = now_us();
        let mut rng = rand::thread_rng();

        let mut wavelength_nm = Vec::with_capacity(self.pixels);
        let mut intensity = Vec::with_capacity(self.pixels);
        for i in 0..self.pixels {
            // Uncalibrated detector axis: 500nm start, 0.1nm/pixel.
            let wl = 500.0 + 0.1 * i as f64;
            let baseline = 80.0 + 0.02 * i as f64;
            let signal = baseline
                + Self::peak(wl, 520.0, 1.5, 400.0)
                + Self::peak(wl, 560.0, 2.5, 250.0)
                + rng.gen_range(-5.0..5.0);
            wavelength_nm.push(wl);
            intensity.push(signal.max(0.0));
        }

        Ok(SpectrumReading {
            spectrum: Spectrum {
                wavelength_nm,
                intensity,
                integration_time_us,
            },
            timestamp_us,
        })
    }
}

#[async_trait]
impl ExposureControl for MockSpectrometer {
    async fn set_exposure_us(&self, micros: u64) -> Result<()> {
        if micros == 0 {
            return Err(anyhow!("MockSpectrometer: integration time must be positive"));
        }
        *self.integration_time_us.write().await = micros;
        Ok(())
    }

    async fn get_exposure_us(&self) -> Result<u64> {
        Ok(*self.integration_time_us.read().await)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
