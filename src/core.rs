//! Core data types shared across the hubs.

use serde::{Deserialize, Serialize};

/// Current wall-clock time in microseconds since the Unix epoch.
///
/// All stored records are keyed by this clock (plus the per-hub logical
/// offset). Device-side timestamps are expected on the same scale.
pub fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// A stage position in millimetres: XY stage plus Z focus axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A single Raman spectrum: equal-length wavelength and intensity arrays
/// plus the integration time the spectrometer used for this exposure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Wavelength axis in nanometres, one entry per detector pixel.
    pub wavelength_nm: Vec<f64>,
    /// Measured intensity in detector counts, parallel to `wavelength_nm`.
    pub intensity: Vec<f64>,
    /// Integration time of this exposure in microseconds.
    pub integration_time_us: u64,
}

impl Spectrum {
    /// Number of detector pixels.
    pub fn len(&self) -> usize {
        self.wavelength_nm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength_nm.is_empty()
    }

    /// True when the wavelength and intensity arrays agree in length.
    pub fn is_well_formed(&self) -> bool {
        self.wavelength_nm.len() == self.intensity.len()
    }
}

/// A camera frame: row-major float pixels, `channels` values per pixel.
///
/// Frames are stored as `f32` so that correction output and the flatfield
/// reference dump share one representation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Pixel data, length `width * height * channels`.
    pub data: Vec<f32>,
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u32, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), (width * height * channels) as usize);
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// Frame filled with a constant value.
    pub fn filled(width: u32, height: u32, channels: u32, value: f32) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![value; (width * height * channels) as usize],
        }
    }

    /// True when `other` has identical dimensions.
    pub fn same_shape(&self, other: &Frame) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.channels == other.channels
    }

    /// Mean over all pixel values.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.data.iter().map(|&v| v as f64).sum();
        (sum / self.data.len() as f64) as f32
    }
}

/// One timestamped record in a hub store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample<T> {
    /// Logical timestamp in microseconds since the Unix epoch.
    pub timestamp_us: i64,
    pub payload: T,
}

impl<T> Sample<T> {
    pub fn new(timestamp_us: i64, payload: T) -> Self {
        Self {
            timestamp_us,
            payload,
        }
    }
}

/// Payload seam for the timestamped stores.
///
/// Every stored payload is cloneable and channel-safe. Payloads that
/// support interpolated queries override [`StorePayload::lerp`]; the
/// default marks the payload as closest-match only, and the store actor
/// answers interpolated queries on such stores with a malformed-request
/// error instead of guessing.
pub trait StorePayload: Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Linear blend between two payloads, `frac` in `[0, 1]`.
    fn lerp(_a: &Self, _b: &Self, _frac: f64) -> Option<Self> {
        None
    }
}

impl StorePayload for Coordinate3 {
    fn lerp(a: &Self, b: &Self, frac: f64) -> Option<Self> {
        // Each axis interpolates independently.
        Some(Self {
            x: a.x + (b.x - a.x) * frac,
            y: a.y + (b.y - a.y) * frac,
            z: a.z + (b.z - a.z) * frac,
        })
    }
}

impl StorePayload for Spectrum {}
