//! Mudra: real-time hand gesture recognition.
//!
//! Frames from a camera are run through a hand landmark detector, the 21 detected hand landmarks
//! are flattened into a 63-element feature vector, and a gesture classification model turns that
//! vector into a gesture label. The [`detector`] module ties all of this together and exposes a
//! small start/stop state machine.
//!
//! # Coordinates
//!
//! Landmarks use normalized image coordinates: X points to the right, Y points *down*, and both
//! are in range 0.0 to 1.0 across the input frame. Z is relative depth with roughly the same scale
//! as X, smaller values being closer to the camera.
//!
//! # Environment Variables
//!
//! Some defaults can be overridden by setting environment variables:
//!
//! * `MUDRA_JPEG_BACKEND`: Configures the JPEG image decoder to use. Allowed values are:
//!   * `zune-jpeg` (the default): uses the [zune-jpeg] crate.
//!   * `jpeg-decoder`: uses the [jpeg-decoder] crate via `image`.
//! * `MUDRA_WEBCAM_NAME`: Forces the device to use for [`Webcam`]s created without an explicit
//!   device name. If unset, the first device that supports a compatible image format will be used.
//! * `MUDRA_MODEL_PATH`, `MUDRA_LABELS_PATH`, `MUDRA_LANDMARK_MODEL`, `MUDRA_BACKEND_URL`,
//!   `MUDRA_THROTTLE_MS`: see [`DetectorOptions::from_env`].
//!
//! [zune-jpeg]: https://github.com/etemesi254/zune-jpeg
//! [jpeg-decoder]: https://github.com/image-rs/jpeg-decoder/
//! [`Webcam`]: video::webcam::Webcam
//! [`DetectorOptions::from_env`]: config::DetectorOptions::from_env

use log::LevelFilter;

pub mod config;
pub mod decode;
pub mod detector;
pub mod hand;
pub mod image;
pub mod labels;
pub mod landmark;
pub mod nn;
pub mod overlay;
pub mod resource;
pub mod throttle;
pub mod timer;
pub mod video;
pub mod worker;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .filter(Some("reqwest"), LevelFilter::Warn)
        .filter(Some("hyper"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and Mudra will log at *debug* level. `tract`, `reqwest` and `hyper` will log
/// at *warn* level. `RUST_LOG` can be used to override these defaults.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
