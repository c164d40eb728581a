//! Image correction: flatfield normalization and background subtraction.
//!
//! Two correction styles for brightfield frames:
//!
//! - **Flatfield**: divide each pixel by a stored per-pixel reference map
//!   derived from a reference illumination frame, scale by a gain, clamp.
//!   The reference map is the mean-subtracted reference frame, clamped to
//!   a small floor so the later division cannot blow up.
//! - **Background subtraction**: estimate the illumination profile of the
//!   frame itself with a wide Gaussian blur (per color channel),
//!   normalize the estimate to unit mean so flat regions keep their
//!   level, divide, clamp.
//!
//! The math here is pure; ownership and command dispatch live in
//! [`actor::CorrectionActor`].

pub mod actor;

pub use actor::CorrectionActor;

use crate::config::CorrectionConfig;
use crate::core::Frame;
use crate::error::{AppResult, HubError};
use std::path::Path;

/// Compute the normalized flatfield reference map from a reference
/// illumination frame: mean-subtracted, floor-clamped.
pub fn compute_reference(reference_frame: &Frame, floor: f32) -> AppResult<Frame> {
    if reference_frame.data.is_empty() {
        return Err(HubError::MalformedRequest(
            "empty flatfield reference frame".to_string(),
        ));
    }
    let mean = reference_frame.mean();
    let data = reference_frame
        .data
        .iter()
        .map(|&v| (v - mean).max(floor))
        .collect();
    Ok(Frame::new(
        reference_frame.width,
        reference_frame.height,
        reference_frame.channels,
        data,
    ))
}

/// Flatfield correction: `clamp(raw / (reference + epsilon) * gain, 0, max)`.
pub fn apply_flatfield(
    raw: &Frame,
    reference: &Frame,
    gain: f32,
    config: &CorrectionConfig,
) -> AppResult<Frame> {
    if !raw.same_shape(reference) {
        return Err(HubError::MalformedRequest(format!(
            "frame {}x{}x{} does not match reference {}x{}x{}",
            raw.width, raw.height, raw.channels, reference.width, reference.height,
            reference.channels
        )));
    }
    let data = raw
        .data
        .iter()
        .zip(reference.data.iter())
        .map(|(&px, &r)| (px / (r + config.epsilon) * gain).clamp(0.0, config.clamp_max))
        .collect();
    Ok(Frame::new(raw.width, raw.height, raw.channels, data))
}

/// Background subtraction: divide each channel by its blurred, unit-mean
/// illumination estimate.
pub fn subtract_background(raw: &Frame, config: &CorrectionConfig) -> AppResult<Frame> {
    if raw.data.is_empty() {
        return Err(HubError::MalformedRequest("empty frame".to_string()));
    }

    let mut out = raw.clone();
    for channel in 0..raw.channels {
        let plane = extract_channel(raw, channel);
        let blurred = gaussian_blur(&plane, raw.width as usize, raw.height as usize, config.blur_sigma);

        // Normalize the estimate to unit mean so division corrects the
        // shading without amplifying the whole frame.
        let mean: f64 = blurred.iter().map(|&v| v as f64).sum::<f64>() / blurred.len() as f64;
        let mean = mean.max(config.epsilon as f64) as f32;

        for (i, &est) in blurred.iter().enumerate() {
            let norm = (est / mean).max(config.epsilon);
            let idx = i * raw.channels as usize + channel as usize;
            out.data[idx] = (raw.data[idx] / norm).clamp(0.0, config.clamp_max);
        }
    }
    Ok(out)
}

fn extract_channel(frame: &Frame, channel: u32) -> Vec<f32> {
    frame
        .data
        .iter()
        .skip(channel as usize)
        .step_by(frame.channels as usize)
        .copied()
        .collect()
}

/// Separable Gaussian blur with edge clamping.
fn gaussian_blur(plane: &[f32], width: usize, height: usize, sigma: f64) -> Vec<f32> {
    let kernel = gaussian_kernel(sigma);
    let radius = kernel.len() / 2;

    // Horizontal pass
    let mut tmp = vec![0.0f32; plane.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0f64;
            for (k, &w) in kernel.iter().enumerate() {
                let xi = (x as isize + k as isize - radius as isize).clamp(0, width as isize - 1);
                acc += plane[y * width + xi as usize] as f64 * w;
            }
            tmp[y * width + x] = acc as f32;
        }
    }

    // Vertical pass
    let mut out = vec![0.0f32; plane.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0f64;
            for (k, &w) in kernel.iter().enumerate() {
                let yi = (y as isize + k as isize - radius as isize).clamp(0, height as isize - 1);
                acc += tmp[yi as usize * width + x] as f64 * w;
            }
            out[y * width + x] = acc as f32;
        }
    }
    out
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    for i in 0..(2 * radius + 1) {
        let d = i as f64 - radius as f64;
        kernel.push((-0.5 * d * d / (sigma * sigma)).exp());
    }
    let sum: f64 = kernel.iter().sum();
    for w in kernel.iter_mut() {
        *w /= sum;
    }
    kernel
}

/// Correction state owned by the correction worker.
pub struct CorrectionState {
    /// Normalized flatfield reference, absent until set or loaded.
    reference: Option<Frame>,
    gain: f32,
}

impl CorrectionState {
    pub fn new(gain: f32) -> Self {
        Self {
            reference: None,
            gain,
        }
    }

    pub fn reference(&self) -> Option<&Frame> {
        self.reference.as_ref()
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) -> AppResult<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(HubError::MalformedRequest(format!(
                "gain must be non-negative, got {gain}"
            )));
        }
        self.gain = gain;
        Ok(())
    }

    /// Derive and store the reference map from a reference frame.
    pub fn set_reference_from(&mut self, reference_frame: &Frame, floor: f32) -> AppResult<()> {
        self.reference = Some(compute_reference(reference_frame, floor)?);
        Ok(())
    }

    /// Binary dump of the reference tensor.
    pub fn save_reference(&self, path: &Path) -> AppResult<()> {
        let reference = self.reference.as_ref().ok_or(HubError::ReferenceNotSet)?;
        let bytes =
            bincode::serialize(reference).map_err(|e| HubError::Serialization(e.to_string()))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Reload a reference tensor dumped by [`save_reference`](Self::save_reference).
    pub fn load_reference(&mut self, path: &Path) -> AppResult<()> {
        let bytes = std::fs::read(path)?;
        let reference: Frame =
            bincode::deserialize(&bytes).map_err(|e| HubError::Serialization(e.to_string()))?;
        self.reference = Some(reference);
        Ok(())
    }
}
