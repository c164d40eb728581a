//! Message types for worker communication.
//!
//! This module defines the command and response types used for
//! message-passing between the hub facades and their workers. Each
//! request carries its own oneshot responder, so a response can only
//! ever reach the caller that issued the request. This is the
//! single-request-in-flight pairing the facades rely on.

use crate::calibration::CalibrationParameters;
use crate::core::{Frame, Sample, Spectrum, StorePayload};
use crate::error::AppResult;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Commands understood by a store actor.
#[derive(Debug)]
pub enum StoreCommand<T: StorePayload> {
    /// Closest-match query: first record at or after `timestamp_us`.
    /// Waits for new data when queried ahead of the stream, up to the
    /// store's configured deadline.
    Closest {
        timestamp_us: i64,
        reply: oneshot::Sender<AppResult<Sample<T>>>,
    },

    /// Interpolated query between the bracketing records.
    Interpolated {
        timestamp_us: i64,
        reply: oneshot::Sender<AppResult<Sample<T>>>,
    },

    /// All records in `[start_us, end_us]`; `new_only` restricts the
    /// answer to records no previous `new_only` query has handed out.
    Range {
        start_us: i64,
        end_us: Option<i64>,
        new_only: bool,
        reply: oneshot::Sender<Vec<Sample<T>>>,
    },

    /// Number of records currently stored.
    Len { reply: oneshot::Sender<usize> },
}

impl<T: StorePayload> StoreCommand<T> {
    pub fn closest(timestamp_us: i64) -> (Self, oneshot::Receiver<AppResult<Sample<T>>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Closest {
                timestamp_us,
                reply: tx,
            },
            rx,
        )
    }

    pub fn interpolated(timestamp_us: i64) -> (Self, oneshot::Receiver<AppResult<Sample<T>>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Interpolated {
                timestamp_us,
                reply: tx,
            },
            rx,
        )
    }

    pub fn range(
        start_us: i64,
        end_us: Option<i64>,
        new_only: bool,
    ) -> (Self, oneshot::Receiver<Vec<Sample<T>>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Range {
                start_us,
                end_us,
                new_only,
                reply: tx,
            },
            rx,
        )
    }

    pub fn len() -> (Self, oneshot::Receiver<usize>) {
        let (tx, rx) = oneshot::channel();
        (Self::Len { reply: tx }, rx)
    }
}

/// Commands understood by the calibrator actor.
#[derive(Debug)]
pub enum CalibrationCommand {
    /// Apply the current calibration to one raw spectrum.
    Calibrate {
        spectrum: Spectrum,
        reply: oneshot::Sender<AppResult<Spectrum>>,
    },

    /// Replace the calibration parameters (invalidates the pixel cache).
    SetParameters {
        params: CalibrationParameters,
        reply: oneshot::Sender<()>,
    },

    /// Current calibration parameters.
    GetParameters {
        reply: oneshot::Sender<CalibrationParameters>,
    },

    /// Write the parameters to the JSON interchange file.
    SaveParameters {
        path: PathBuf,
        reply: oneshot::Sender<AppResult<()>>,
    },

    /// Load parameters from the JSON interchange file.
    LoadParameters {
        path: PathBuf,
        reply: oneshot::Sender<AppResult<()>>,
    },
}

impl CalibrationCommand {
    pub fn calibrate(spectrum: Spectrum) -> (Self, oneshot::Receiver<AppResult<Spectrum>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Calibrate {
                spectrum,
                reply: tx,
            },
            rx,
        )
    }

    pub fn set_parameters(params: CalibrationParameters) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetParameters { params, reply: tx }, rx)
    }

    pub fn get_parameters() -> (Self, oneshot::Receiver<CalibrationParameters>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetParameters { reply: tx }, rx)
    }

    pub fn save_parameters(path: PathBuf) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SaveParameters { path, reply: tx }, rx)
    }

    pub fn load_parameters(path: PathBuf) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::LoadParameters { path, reply: tx }, rx)
    }
}

/// Correction style for an image request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionKind {
    /// Pass the captured frame through untouched.
    Raw,
    /// Flatfield normalization against the stored reference.
    Flatfield,
    /// Blur-based illumination estimate, divided out per channel.
    BackgroundSubtraction,
}

/// Commands understood by the correction actor.
#[derive(Debug)]
pub enum CorrectionCommand {
    /// Capture one frame from the camera and apply `kind`.
    CaptureImage {
        kind: CorrectionKind,
        reply: oneshot::Sender<AppResult<Frame>>,
    },

    /// Compute and store the normalized flatfield reference from a
    /// reference illumination frame.
    SetFlatfield {
        reference: Frame,
        reply: oneshot::Sender<AppResult<()>>,
    },

    /// Dump the normalized reference tensor to a binary file.
    SaveFlatfield {
        path: PathBuf,
        reply: oneshot::Sender<AppResult<()>>,
    },

    /// Reload a previously dumped reference tensor.
    LoadFlatfield {
        path: PathBuf,
        reply: oneshot::Sender<AppResult<()>>,
    },

    /// Set the flatfield gain (must be non-negative).
    SetGain {
        value: f32,
        reply: oneshot::Sender<AppResult<()>>,
    },

    /// Current flatfield gain.
    GetGain { reply: oneshot::Sender<f32> },
}

impl CorrectionCommand {
    pub fn capture_image(kind: CorrectionKind) -> (Self, oneshot::Receiver<AppResult<Frame>>) {
        let (tx, rx) = oneshot::channel();
        (Self::CaptureImage { kind, reply: tx }, rx)
    }

    pub fn set_flatfield(reference: Frame) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetFlatfield {
                reference,
                reply: tx,
            },
            rx,
        )
    }

    pub fn save_flatfield(path: PathBuf) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SaveFlatfield { path, reply: tx }, rx)
    }

    pub fn load_flatfield(path: PathBuf) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::LoadFlatfield { path, reply: tx }, rx)
    }

    pub fn set_gain(value: f32) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetGain { value, reply: tx }, rx)
    }

    pub fn get_gain() -> (Self, oneshot::Receiver<f32>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetGain { reply: tx }, rx)
    }
}
