//! Spectral calibration: polynomial wavelength and intensity correction.
//!
//! Calibration parameters are produced externally by a curve fit over
//! reference measurements (points in, coefficients out) and pushed into
//! the calibrator worker. Every raw spectrum is corrected before it is
//! committed to the Raman store:
//!
//! - wavelength axis: `wl'[i] = P_w(wl[i])`, a cubic over the measured
//!   wavelength
//! - intensity: `I'[i] = I[i] * P_i(i)`, a cubic gain curve over the
//!   detector pixel index
//!
//! Both per-pixel transforms are memoized in a cache keyed by the
//! detector axis; the cache is invalidated whenever new parameters
//! arrive, so repeated calibration of the same raw spectrum is
//! bit-identical.

pub mod actor;

pub use actor::CalibratorActor;

use crate::core::Spectrum;
use crate::error::{AppResult, HubError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cubic polynomial coefficients, lowest order first.
pub type PolyCoeffs = [f64; 4];

/// Externally-fitted calibration state.
///
/// The fit points are carried alongside the coefficients so a later
/// refit or inspection does not need the original measurement session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    /// Wavelength correction polynomial over the measured wavelength.
    pub wavelength_poly_coeffs: PolyCoeffs,
    /// Fit points: (measured wavelength, reference wavelength).
    pub wavelength_points: Vec<(f64, f64)>,
    /// Intensity gain polynomial over the detector pixel index.
    pub intensity_poly_coeffs: PolyCoeffs,
    /// Fit points: (pixel index, measured intensity, reference intensity).
    pub intensity_points: Vec<(f64, f64, f64)>,
}

impl Default for CalibrationParameters {
    /// Identity calibration: wavelengths pass through, unit gain.
    fn default() -> Self {
        Self {
            wavelength_poly_coeffs: [0.0, 1.0, 0.0, 0.0],
            wavelength_points: Vec::new(),
            intensity_poly_coeffs: [1.0, 0.0, 0.0, 0.0],
            intensity_points: Vec::new(),
        }
    }
}

/// On-disk calibration file layout (JSON, flat parallel arrays).
///
/// This is the interchange format the fitting tooling writes; field
/// names are fixed. All numeric fields are floats.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    wavelen_poly_coeffs: Vec<f64>,
    wavelen_list_measured: Vec<f64>,
    wavelen_list_reference: Vec<f64>,
    intensity_poly_coeffs: Vec<f64>,
    intensity_list_pixel_idx: Vec<f64>,
    intensity_list_measured: Vec<f64>,
    intensity_list_reference: Vec<f64>,
}

fn coeffs_from_vec(v: &[f64]) -> PolyCoeffs {
    let mut out = [0.0; 4];
    for (slot, &c) in out.iter_mut().zip(v.iter()) {
        *slot = c;
    }
    out
}

impl From<&CalibrationParameters> for CalibrationFile {
    fn from(params: &CalibrationParameters) -> Self {
        Self {
            wavelen_poly_coeffs: params.wavelength_poly_coeffs.to_vec(),
            wavelen_list_measured: params.wavelength_points.iter().map(|p| p.0).collect(),
            wavelen_list_reference: params.wavelength_points.iter().map(|p| p.1).collect(),
            intensity_poly_coeffs: params.intensity_poly_coeffs.to_vec(),
            intensity_list_pixel_idx: params.intensity_points.iter().map(|p| p.0).collect(),
            intensity_list_measured: params.intensity_points.iter().map(|p| p.1).collect(),
            intensity_list_reference: params.intensity_points.iter().map(|p| p.2).collect(),
        }
    }
}

impl From<CalibrationFile> for CalibrationParameters {
    fn from(file: CalibrationFile) -> Self {
        let wavelength_points = file
            .wavelen_list_measured
            .iter()
            .zip(file.wavelen_list_reference.iter())
            .map(|(&m, &r)| (m, r))
            .collect();
        let intensity_points = file
            .intensity_list_pixel_idx
            .iter()
            .zip(file.intensity_list_measured.iter())
            .zip(file.intensity_list_reference.iter())
            .map(|((&p, &m), &r)| (p, m, r))
            .collect();
        Self {
            wavelength_poly_coeffs: coeffs_from_vec(&file.wavelen_poly_coeffs),
            wavelength_points,
            intensity_poly_coeffs: coeffs_from_vec(&file.intensity_poly_coeffs),
            intensity_points,
        }
    }
}

/// Evaluate a cubic polynomial, lowest order first (Horner form).
fn poly(coeffs: &PolyCoeffs, x: f64) -> f64 {
    coeffs[0] + x * (coeffs[1] + x * (coeffs[2] + x * coeffs[3]))
}

/// Per-pixel transform memoized for one detector axis.
struct CalibrationCache {
    /// The raw wavelength axis this cache was computed for.
    source_wavelength: Vec<f64>,
    wavelength: Vec<f64>,
    intensity_scale: Vec<f64>,
}

/// Owns the calibration parameters and the memoized per-pixel transform.
///
/// Exclusively owned by the [`CalibratorActor`]; consumers reach it over
/// the calibration command channel.
pub struct Calibrator {
    params: CalibrationParameters,
    cache: Option<CalibrationCache>,
}

impl Calibrator {
    pub fn new(params: CalibrationParameters) -> Self {
        Self {
            params,
            cache: None,
        }
    }

    pub fn parameters(&self) -> &CalibrationParameters {
        &self.params
    }

    /// Replace the parameters and invalidate the per-pixel cache.
    pub fn set_parameters(&mut self, params: CalibrationParameters) {
        self.params = params;
        self.cache = None;
    }

    fn cache_valid(&self, wavelength_nm: &[f64]) -> bool {
        self.cache
            .as_ref()
            .map_or(false, |c| c.source_wavelength == wavelength_nm)
    }

    fn rebuild_cache(&mut self, wavelength_nm: &[f64]) {
        let wavelength = wavelength_nm
            .iter()
            .map(|&wl| poly(&self.params.wavelength_poly_coeffs, wl))
            .collect();
        let intensity_scale = (0..wavelength_nm.len())
            .map(|i| poly(&self.params.intensity_poly_coeffs, i as f64))
            .collect();
        self.cache = Some(CalibrationCache {
            source_wavelength: wavelength_nm.to_vec(),
            wavelength,
            intensity_scale,
        });
    }

    /// Apply the cached per-pixel transform to one raw spectrum.
    ///
    /// Fails per-record: a malformed or non-finite spectrum yields
    /// [`HubError::CalibrationApply`] and leaves the calibrator state
    /// untouched so the stream can continue with the next record.
    pub fn calibrate(&mut self, raw: &Spectrum) -> AppResult<Spectrum> {
        if !raw.is_well_formed() {
            return Err(HubError::CalibrationApply(format!(
                "wavelength/intensity length mismatch: {} vs {}",
                raw.wavelength_nm.len(),
                raw.intensity.len()
            )));
        }
        if raw.is_empty() {
            return Err(HubError::CalibrationApply("empty spectrum".to_string()));
        }

        if !self.cache_valid(&raw.wavelength_nm) {
            self.rebuild_cache(&raw.wavelength_nm);
        }
        // Cache was just rebuilt if missing.
        let Some(cache) = self.cache.as_ref() else {
            return Err(HubError::CalibrationApply("cache unavailable".to_string()));
        };

        let intensity: Vec<f64> = raw
            .intensity
            .iter()
            .zip(cache.intensity_scale.iter())
            .map(|(&i, &s)| i * s)
            .collect();

        if intensity.iter().any(|v| !v.is_finite())
            || cache.wavelength.iter().any(|v| !v.is_finite())
        {
            return Err(HubError::CalibrationApply(
                "transform produced non-finite values".to_string(),
            ));
        }

        Ok(Spectrum {
            wavelength_nm: cache.wavelength.clone(),
            intensity,
            integration_time_us: raw.integration_time_us,
        })
    }

    /// Save the parameters as the JSON interchange file.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let file = CalibrationFile::from(&self.params);
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| HubError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load parameters from the JSON interchange file, invalidating the
    /// cache.
    pub fn load(&mut self, path: &Path) -> AppResult<()> {
        let json = std::fs::read_to_string(path)?;
        let file: CalibrationFile =
            serde_json::from_str(&json).map_err(|e| HubError::Serialization(e.to_string()))?;
        self.set_parameters(file.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_spectrum() -> Spectrum {
        Spectrum {
            wavelength_nm: vec![500.0, 500.1, 500.2, 500.3],
            intensity: vec![100.0, 200.0, 300.0, 400.0],
            integration_time_us: 50_000,
        }
    }

    #[test]
    fn test_identity_calibration_passes_through() {
        let mut calibrator = Calibrator::new(CalibrationParameters::default());
        let raw = raw_spectrum();
        let out = calibrator.calibrate(&raw).unwrap();
        assert_eq!(out.wavelength_nm, raw.wavelength_nm);
        assert_eq!(out.intensity, raw.intensity);
        assert_eq!(out.integration_time_us, raw.integration_time_us);
    }

    #[test]
    fn test_calibration_idempotent_bit_identical() {
        let params = CalibrationParameters {
            wavelength_poly_coeffs: [1.5, 0.998, 1e-5, 0.0],
            intensity_poly_coeffs: [1.1, 0.01, 0.0, 0.0],
            ..Default::default()
        };
        let mut calibrator = Calibrator::new(params);
        let raw = raw_spectrum();
        let first = calibrator.calibrate(&raw).unwrap();
        let second = calibrator.calibrate(&raw).unwrap();
        // Cache must not drift between applications.
        assert_eq!(first, second);
    }

    #[test]
    fn test_wavelength_polynomial_applied() {
        let params = CalibrationParameters {
            wavelength_poly_coeffs: [10.0, 1.0, 0.0, 0.0], // +10nm shift
            ..Default::default()
        };
        let mut calibrator = Calibrator::new(params);
        let out = calibrator.calibrate(&raw_spectrum()).unwrap();
        assert_eq!(out.wavelength_nm[0], 510.0);
    }

    #[test]
    fn test_intensity_gain_over_pixel_index() {
        let params = CalibrationParameters {
            intensity_poly_coeffs: [1.0, 1.0, 0.0, 0.0], // gain = 1 + pixel
            ..Default::default()
        };
        let mut calibrator = Calibrator::new(params);
        let out = calibrator.calibrate(&raw_spectrum()).unwrap();
        assert_eq!(out.intensity, vec![100.0, 400.0, 900.0, 1600.0]);
    }

    #[test]
    fn test_parameter_update_invalidates_cache() {
        let mut calibrator = Calibrator::new(CalibrationParameters::default());
        let raw = raw_spectrum();
        let before = calibrator.calibrate(&raw).unwrap();

        calibrator.set_parameters(CalibrationParameters {
            intensity_poly_coeffs: [2.0, 0.0, 0.0, 0.0],
            ..Default::default()
        });
        let after = calibrator.calibrate(&raw).unwrap();
        assert_eq!(after.intensity[0], before.intensity[0] * 2.0);
    }

    #[test]
    fn test_malformed_spectrum_rejected() {
        let mut calibrator = Calibrator::new(CalibrationParameters::default());
        let bad = Spectrum {
            wavelength_nm: vec![500.0, 500.1],
            intensity: vec![1.0],
            integration_time_us: 1000,
        };
        assert!(matches!(
            calibrator.calibrate(&bad),
            Err(HubError::CalibrationApply(_))
        ));
    }

    #[test]
    fn test_non_finite_output_rejected() {
        let params = CalibrationParameters {
            intensity_poly_coeffs: [f64::INFINITY, 0.0, 0.0, 0.0],
            ..Default::default()
        };
        let mut calibrator = Calibrator::new(params);
        assert!(matches!(
            calibrator.calibrate(&raw_spectrum()),
            Err(HubError::CalibrationApply(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");

        let params = CalibrationParameters {
            wavelength_poly_coeffs: [1.0, 0.99, 1e-6, 0.0],
            wavelength_points: vec![(500.0, 501.2), (600.0, 601.1)],
            intensity_poly_coeffs: [1.2, 0.0, 0.0, 0.0],
            intensity_points: vec![(0.0, 90.0, 100.0), (512.0, 95.0, 100.0)],
        };

        Calibrator::new(params.clone()).save(&path).unwrap();

        let mut loaded = Calibrator::new(CalibrationParameters::default());
        loaded.load(&path).unwrap();
        assert_eq!(loaded.parameters(), &params);
    }

    #[test]
    fn test_file_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        Calibrator::new(CalibrationParameters::default())
            .save(&path)
            .unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        for field in [
            "wavelen_poly_coeffs",
            "wavelen_list_measured",
            "wavelen_list_reference",
            "intensity_poly_coeffs",
            "intensity_list_pixel_idx",
            "intensity_list_measured",
            "intensity_list_reference",
        ] {
            assert!(json.contains(field), "missing field {field}");
        }
    }

    #[test]
    fn test_load_coerces_integer_literals() {
        // Fitting tools sometimes emit whole numbers as integers.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        std::fs::write(
            &path,
            r#"{
                "wavelen_poly_coeffs": [0, 1, 0, 0],
                "wavelen_list_measured": [500],
                "wavelen_list_reference": [501],
                "intensity_poly_coeffs": [1, 0, 0, 0],
                "intensity_list_pixel_idx": [0],
                "intensity_list_measured": [90],
                "intensity_list_reference": [100]
            }"#,
        )
        .unwrap();

        let mut calibrator = Calibrator::new(CalibrationParameters::default());
        calibrator.load(&path).unwrap();
        assert_eq!(calibrator.parameters().wavelength_points, vec![(500.0, 501.0)]);
    }
}
