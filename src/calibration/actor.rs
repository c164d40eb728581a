//! Calibrator worker.
//!
//! The calibrator runs in its own task and is the sole owner of the
//! [`Calibrator`] state. The spectrum updater sends it one raw spectrum
//! at a time; the facade sends parameter updates and file commands over
//! the same channel. Sequential command processing means a parameter
//! update can never interleave with a calibration in progress.

use crate::calibration::Calibrator;
use crate::hub::messages::CalibrationCommand;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Worker loop around a [`Calibrator`].
pub struct CalibratorActor {
    calibrator: Calibrator,
    cmd_rx: mpsc::Receiver<CalibrationCommand>,
}

impl CalibratorActor {
    pub fn new(calibrator: Calibrator, cmd_rx: mpsc::Receiver<CalibrationCommand>) -> Self {
        Self { calibrator, cmd_rx }
    }

    /// Process commands until all senders are dropped.
    pub async fn run(mut self) {
        debug!("calibrator worker started");
        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle(cmd);
        }
        debug!("calibrator worker stopped");
    }

    fn handle(&mut self, cmd: CalibrationCommand) {
        match cmd {
            CalibrationCommand::Calibrate { spectrum, reply } => {
                let result = self.calibrator.calibrate(&spectrum);
                if let Err(e) = &result {
                    // Per-record failure; the stream continues.
                    warn!("calibration failed for one spectrum: {e}");
                }
                let _ = reply.send(result);
            }
            CalibrationCommand::SetParameters { params, reply } => {
                self.calibrator.set_parameters(params);
                info!("calibration parameters updated, pixel cache invalidated");
                let _ = reply.send(());
            }
            CalibrationCommand::GetParameters { reply } => {
                let _ = reply.send(self.calibrator.parameters().clone());
            }
            CalibrationCommand::SaveParameters { path, reply } => {
                let result = self.calibrator.save(&path);
                match &result {
                    Ok(()) => info!("calibration parameters saved to {}", path.display()),
                    Err(e) => warn!("saving calibration to {} failed: {e}", path.display()),
                }
                let _ = reply.send(result);
            }
            CalibrationCommand::LoadParameters { path, reply } => {
                let result = self.calibrator.load(&path);
                match &result {
                    Ok(()) => info!("calibration parameters loaded from {}", path.display()),
                    Err(e) => warn!("loading calibration from {} failed: {e}", path.display()),
                }
                let _ = reply.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationParameters;
    use crate::core::Spectrum;

    fn spawn_actor() -> mpsc::Sender<CalibrationCommand> {
        let (tx, rx) = mpsc::channel(8);
        let actor = CalibratorActor::new(Calibrator::new(CalibrationParameters::default()), rx);
        tokio::spawn(actor.run());
        tx
    }

    fn raw() -> Spectrum {
        Spectrum {
            wavelength_nm: vec![500.0, 501.0],
            intensity: vec![10.0, 20.0],
            integration_time_us: 1000,
        }
    }

    #[tokio::test]
    async fn test_calibrate_round_trip() {
        let tx = spawn_actor();
        let (cmd, rx) = CalibrationCommand::calibrate(raw());
        tx.send(cmd).await.unwrap();
        let out = rx.await.unwrap().unwrap();
        assert_eq!(out.intensity, vec![10.0, 20.0]);
    }

    #[tokio::test]
    async fn test_parameter_update_applies() {
        let tx = spawn_actor();

        let params = CalibrationParameters {
            intensity_poly_coeffs: [3.0, 0.0, 0.0, 0.0],
            ..Default::default()
        };
        let (cmd, rx) = CalibrationCommand::set_parameters(params);
        tx.send(cmd).await.unwrap();
        rx.await.unwrap();

        let (cmd, rx) = CalibrationCommand::calibrate(raw());
        tx.send(cmd).await.unwrap();
        let out = rx.await.unwrap().unwrap();
        assert_eq!(out.intensity, vec![30.0, 60.0]);
    }

    #[tokio::test]
    async fn test_bad_record_does_not_kill_worker() {
        let tx = spawn_actor();

        let bad = Spectrum {
            wavelength_nm: vec![500.0],
            intensity: vec![],
            integration_time_us: 1000,
        };
        let (cmd, rx) = CalibrationCommand::calibrate(bad);
        tx.send(cmd).await.unwrap();
        assert!(rx.await.unwrap().is_err());

        // Worker is still serving requests.
        let (cmd, rx) = CalibrationCommand::calibrate(raw());
        tx.send(cmd).await.unwrap();
        assert!(rx.await.unwrap().is_ok());
    }
}
