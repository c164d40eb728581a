//! Correction worker.
//!
//! Owns the camera handle and the [`CorrectionState`]. Every image
//! request captures exactly one fresh frame, applies the requested
//! correction, and answers on the request's own oneshot. A flatfield
//! request with no stored reference degrades to the raw frame with a
//! warning rather than failing the caller.

use crate::config::CorrectionConfig;
use crate::correction::{apply_flatfield, subtract_background, CorrectionState};
use crate::error::{AppResult, HubError};
use crate::hardware::capabilities::FrameSource;
use crate::hub::messages::{CorrectionCommand, CorrectionKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Worker loop serving image capture and flatfield management.
pub struct CorrectionActor {
    camera: Arc<dyn FrameSource>,
    state: CorrectionState,
    config: CorrectionConfig,
    cmd_rx: mpsc::Receiver<CorrectionCommand>,
}

impl CorrectionActor {
    pub fn new(
        camera: Arc<dyn FrameSource>,
        config: CorrectionConfig,
        cmd_rx: mpsc::Receiver<CorrectionCommand>,
    ) -> Self {
        let state = CorrectionState::new(config.gain);
        Self {
            camera,
            state,
            config,
            cmd_rx,
        }
    }

    /// Process commands until all senders are dropped.
    pub async fn run(mut self) {
        debug!("correction worker started");
        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle(cmd).await;
        }
        debug!("correction worker stopped");
    }

    async fn handle(&mut self, cmd: CorrectionCommand) {
        match cmd {
            CorrectionCommand::CaptureImage { kind, reply } => {
                let result = self.capture(kind).await;
                if let Err(e) = &result {
                    warn!("image capture failed: {e}");
                }
                let _ = reply.send(result);
            }
            CorrectionCommand::SetFlatfield { reference, reply } => {
                let result = self
                    .state
                    .set_reference_from(&reference, self.config.reference_floor);
                if result.is_ok() {
                    info!(
                        width = reference.width,
                        height = reference.height,
                        "flatfield reference updated"
                    );
                }
                let _ = reply.send(result);
            }
            CorrectionCommand::SaveFlatfield { path, reply } => {
                let result = self.state.save_reference(&path);
                match &result {
                    Ok(()) => info!("flatfield reference saved to {}", path.display()),
                    Err(e) => warn!("saving flatfield to {} failed: {e}", path.display()),
                }
                let _ = reply.send(result);
            }
            CorrectionCommand::LoadFlatfield { path, reply } => {
                let result = self.state.load_reference(&path);
                match &result {
                    Ok(()) => info!("flatfield reference loaded from {}", path.display()),
                    Err(e) => warn!("loading flatfield from {} failed: {e}", path.display()),
                }
                let _ = reply.send(result);
            }
            CorrectionCommand::SetGain { value, reply } => {
                let _ = reply.send(self.state.set_gain(value));
            }
            CorrectionCommand::GetGain { reply } => {
                let _ = reply.send(self.state.gain());
            }
        }
    }

    async fn capture(&self, kind: CorrectionKind) -> AppResult<crate::core::Frame> {
        let raw = self
            .camera
            .capture_frame()
            .await
            .map_err(|e| HubError::Device(format!("camera capture failed: {e}")))?;

        match kind {
            CorrectionKind::Raw => Ok(raw),
            CorrectionKind::Flatfield => match self.state.reference() {
                Some(reference) => {
                    apply_flatfield(&raw, reference, self.state.gain(), &self.config)
                }
                None => {
                    // No reference yet: hand back the raw frame so the
                    // caller still gets an image.
                    warn!("flatfield requested without a reference, returning raw frame");
                    Ok(raw)
                }
            },
            CorrectionKind::BackgroundSubtraction => subtract_background(&raw, &self.config),
        }
    }
}
