//! Core library for the ramanscope application.
//!
//! This library contains the time-synchronized data hubs that drive a
//! Raman microscope: an XY/Z stage pair, a brightfield camera, and a
//! Raman spectrometer. Acquisition runs in dedicated worker tasks;
//! consumers reach the workers only through request/response channels.

pub mod calibration;
pub mod config;
pub mod core;
pub mod correction;
pub mod data;
pub mod error;
pub mod hardware;
pub mod hub;
