//! Hardware seam: capability traits and the drivers behind them.
//!
//! Vendor SDK wrappers live behind the capability traits in
//! [`capabilities`]; the hubs never name a concrete driver. Drivers are
//! selected at startup from [`DriverKind`](crate::config::DriverKind) in
//! the configuration. Only the mock drivers ship with this crate.

pub mod capabilities;
pub mod mock;

pub use capabilities::{
    ExposureControl, FrameSource, MotionControl, SpectrumReading, SpectrumSource,
};

use crate::config::{DriverKind, HardwareConfig};
use crate::core::Coordinate3;
use anyhow::Result;
use std::sync::Arc;

/// The XY stage and the Z focus axis viewed as one coordinate source.
///
/// The two axes are independent vendor controllers; a coordinate sample
/// reads both back-to-back. The pair is treated as simultaneous; stage
/// readout latency is far below the sampling period.
#[derive(Clone)]
pub struct CompositeStage {
    xy: Arc<dyn MotionControl>,
    z: Arc<dyn MotionControl>,
}

impl CompositeStage {
    pub fn new(xy: Arc<dyn MotionControl>, z: Arc<dyn MotionControl>) -> Self {
        Self { xy, z }
    }

    /// Read the full (x, y, z) position in millimetres.
    pub async fn get_coordinates(&self) -> Result<Coordinate3> {
        let xy = self.xy.position().await?;
        let z = self.z.position().await?;
        if xy.len() < 2 || z.is_empty() {
            anyhow::bail!(
                "stage returned {} XY axes and {} Z axes",
                xy.len(),
                z.len()
            );
        }
        Ok(Coordinate3::new(xy[0], xy[1], z[0]))
    }

    /// Access the XY controller, e.g. for direct moves.
    pub fn xy(&self) -> &Arc<dyn MotionControl> {
        &self.xy
    }

    /// Access the Z controller.
    pub fn z(&self) -> &Arc<dyn MotionControl> {
        &self.z
    }
}

/// Build the stage pair selected by configuration.
pub fn stage_from_config(config: &HardwareConfig) -> CompositeStage {
    match config.stage_driver {
        DriverKind::Mock => CompositeStage::new(
            Arc::new(mock::MockStage::new(2)),
            Arc::new(mock::MockStage::new(1)),
        ),
    }
}

/// Build the camera selected by configuration.
pub fn camera_from_config(config: &HardwareConfig) -> Arc<mock::MockCamera> {
    match config.camera_driver {
        DriverKind::Mock => Arc::new(mock::MockCamera::new(64, 48, 1)),
    }
}

/// Build the spectrometer selected by configuration.
pub fn spectrometer_from_config(config: &HardwareConfig) -> Arc<mock::MockSpectrometer> {
    match config.spectrometer_driver {
        DriverKind::Mock => Arc::new(mock::MockSpectrometer::new(1024)),
    }
}
