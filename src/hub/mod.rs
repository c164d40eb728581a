//! Hub layer: sampling loops, store actors and the public facades.
//!
//! A hub is a facade plus the worker tasks behind it. Two hubs ship:
//! [`RamanHub`] for the spectrometer path and [`StageCameraHub`] for the
//! stage and brightfield camera path. They share the store, sampling and
//! messaging machinery but keep independent stores and timestamp
//! offsets.

pub mod facade;
pub mod messages;
pub mod sampling;
pub mod store_actor;

pub use facade::{RamanHub, StageCameraHub};
pub use messages::CorrectionKind;
