//! Camera access.
//!
//! Every camera is a [`FrameSource`]. Failing to open a camera produces a [`CameraError`], which
//! keeps "the user has to do something about their camera" apart from other start-up failures.

pub mod httpcam;
pub mod webcam;

use std::{
    io, thread,
    time::{Duration, Instant},
};

use crate::{
    image::{Image, Resolution},
    timer::Timer,
};

/// A source of camera frames.
pub trait FrameSource: Send {
    /// Returns the size of the frames this source currently delivers.
    ///
    /// Sources that only learn their frame size from the stream report a zero-sized resolution
    /// until that happens (see [`Resolution::is_usable`]).
    fn resolution(&self) -> Resolution;

    /// Reads the next frame, blocking until one is available.
    fn read(&mut self) -> anyhow::Result<Image>;

    /// Returns profiling timers for frame access and decoding.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn resolution(&self) -> Resolution {
        (**self).resolution()
    }

    fn read(&mut self) -> anyhow::Result<Image> {
        (**self).read()
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}

/// Errors that prevent a camera from being used.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Access to the camera device was denied.
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    /// No usable camera was found, or it could not be opened.
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    /// The camera was opened, but did not report usable frame dimensions in time.
    #[error("camera did not become ready within {0:?}")]
    NotReady(Duration),
}

impl CameraError {
    /// Classifies an I/O error that occurred while opening a camera.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => CameraError::PermissionDenied(error.to_string()),
            _ => CameraError::Unavailable(error.to_string()),
        }
    }

    /// Classifies an arbitrary error that occurred while opening a camera.
    ///
    /// Errors caused by an [`io::Error`] are classified via [`CameraError::from_io`], everything
    /// else is considered [`CameraError::Unavailable`].
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<io::Error>() {
            Some(io) => Self::from_io(io),
            None => CameraError::Unavailable(format!("{error:#}")),
        }
    }
}

const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Waits until `source` reports usable frame dimensions.
pub fn wait_until_ready<S: FrameSource + ?Sized>(
    source: &S,
    timeout: Duration,
) -> Result<Resolution, CameraError> {
    let start = Instant::now();
    loop {
        let res = source.resolution();
        if res.is_usable() {
            return Ok(res);
        }
        if start.elapsed() >= timeout {
            return Err(CameraError::NotReady(timeout));
        }
        thread::sleep(READY_POLL_INTERVAL);
    }
}
