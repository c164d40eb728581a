//! Atomic hardware capabilities.
//!
//! Fine-grained capability traits the microscope devices implement.
//! Instead of one monolithic `Instrument` trait, each device implements
//! the capabilities it actually supports:
//!
//! - a stage axis implements `MotionControl`
//! - the brightfield camera implements `FrameSource + ExposureControl`
//! - the Raman spectrometer implements `SpectrumSource + ExposureControl`
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Every method may fail on any call; the sampling loops wrap them in
//! log-and-retry, so a single device hiccup never kills a hub.

use crate::core::{Frame, Spectrum};
use anyhow::Result;
use async_trait::async_trait;

/// Capability: motion control for one stage controller.
///
/// # Contract
/// - Positions are in device-native units (mm for the stages here)
/// - A controller drives one or more axes; `position` returns one value
///   per axis in a fixed order
/// - `move_direct` initiates motion and may return before completion
/// - `move_continuous` starts an open-ended move at a velocity;
///   `stop_move` halts it
/// - `terminate` releases the vendor handle; the controller is unusable
///   afterwards
#[async_trait]
pub trait MotionControl: Send + Sync {
    /// Current position, one value per axis.
    async fn position(&self) -> Result<Vec<f64>>;

    /// Move to an absolute target, one value per axis.
    async fn move_direct(&self, target: &[f64]) -> Result<()>;

    /// Start a continuous move of one axis at the given velocity
    /// (units/sec, sign is direction).
    async fn move_continuous(&self, axis: usize, velocity: f64) -> Result<()>;

    /// Stop any motion in progress.
    async fn stop_move(&self) -> Result<()>;

    /// Release the device handle.
    async fn terminate(&self) -> Result<()> {
        Ok(())
    }
}

/// Capability: single-frame capture.
///
/// # Contract
/// - `capture_frame` blocks for one exposure and returns the frame
/// - Pull model: the camera exposes no stream; the correction worker
///   captures exactly one frame per image request
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Capture one frame.
    async fn capture_frame(&self) -> Result<Frame>;

    /// Sensor resolution (width, height).
    fn resolution(&self) -> (u32, u32);
}

/// One spectrometer measurement with its device-side timestamp.
#[derive(Clone, Debug)]
pub struct SpectrumReading {
    pub spectrum: Spectrum,
    /// Device timestamp in microseconds since the Unix epoch.
    pub timestamp_us: i64,
}

/// Capability: spectrum acquisition.
#[async_trait]
pub trait SpectrumSource: Send + Sync {
    /// Expose once and return the raw spectrum with its timestamp.
    async fn measure_spectrum(&self) -> Result<SpectrumReading>;
}

/// Capability: exposure / integration time control.
///
/// # Contract
/// - Times are in microseconds
/// - Setting exposure does not start an acquisition; it applies to the
///   next one
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set exposure/integration time in microseconds.
    async fn set_exposure_us(&self, micros: u64) -> Result<()>;

    /// Get the current exposure setting in microseconds.
    async fn get_exposure_us(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedAxis {
        positions: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl MotionControl for FixedAxis {
        async fn position(&self) -> Result<Vec<f64>> {
            Ok(self.positions.lock().unwrap().clone())
        }

        async fn move_direct(&self, target: &[f64]) -> Result<()> {
            *self.positions.lock().unwrap() = target.to_vec();
            Ok(())
        }

        async fn move_continuous(&self, _axis: usize, _velocity: f64) -> Result<()> {
            Ok(())
        }

        async fn stop_move(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_motion_control_trait() {
        let axis = FixedAxis {
            positions: Mutex::new(vec![0.0, 0.0]),
        };

        axis.move_direct(&[1.5, -2.0]).await.unwrap();
        assert_eq!(axis.position().await.unwrap(), vec![1.5, -2.0]);

        // Default terminate is a no-op.
        axis.terminate().await.unwrap();
    }
}
