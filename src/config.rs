//! Detector configuration.

use std::{
    env::{self, VarError},
    net::SocketAddr,
    time::Duration,
};

use anyhow::{anyhow, Context};

use crate::{
    hand::landmark::DEFAULT_PRESENCE_THRESHOLD, image::Resolution, nn::SessionOptions,
    resource::Location, throttle,
};

const ENV_VAR_MODEL_PATH: &str = "MUDRA_MODEL_PATH";
const ENV_VAR_LABELS_PATH: &str = "MUDRA_LABELS_PATH";
const ENV_VAR_LANDMARK_MODEL: &str = "MUDRA_LANDMARK_MODEL";
const ENV_VAR_BACKEND_URL: &str = "MUDRA_BACKEND_URL";
const ENV_VAR_THROTTLE_MS: &str = "MUDRA_THROTTLE_MS";

/// Which camera to capture frames from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraConfig {
    /// A local V4L2 webcam, optionally selected by its device name.
    Webcam { name: Option<String> },
    /// An MJPG stream served over HTTP.
    Http { addr: SocketAddr, path: String },
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig::Webcam { name: None }
    }
}

/// Options controlling a [`Detector`][crate::detector::Detector].
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    throttle_interval: Duration,
    resolution: Resolution,
    fps: u32,
    mirror: bool,
    model: Location,
    labels: Option<Location>,
    landmark_model: Location,
    backend_url: Option<String>,
    camera: CameraConfig,
    session_options: SessionOptions,
    presence_threshold: f32,
    camera_ready_timeout: Duration,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            throttle_interval: throttle::DEFAULT_INTERVAL,
            resolution: Resolution::RES_480P,
            fps: 60,
            mirror: true,
            model: Location::parse("model.onnx"),
            labels: Some(Location::parse("labels.json")),
            landmark_model: Location::parse("hand_landmark_full.onnx"),
            backend_url: None,
            camera: CameraConfig::default(),
            session_options: SessionOptions::default(),
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
            camera_ready_timeout: Duration::from_secs(5),
        }
    }
}

impl DetectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options from the defaults, overridden by the `MUDRA_*` environment variables.
    ///
    /// * `MUDRA_MODEL_PATH`: path or URL of the gesture model.
    /// * `MUDRA_LABELS_PATH`: path or URL of the class label table.
    /// * `MUDRA_LANDMARK_MODEL`: path or URL of the hand landmark model.
    /// * `MUDRA_BACKEND_URL`: base URL of a prediction server to use instead of a local model.
    /// * `MUDRA_THROTTLE_MS`: minimum time between inference attempts, in milliseconds.
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Result<String, VarError>) -> anyhow::Result<Self> {
        let var = |name: &str| match lookup(name) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(s)) => Err(anyhow!(
                "invalid value set for `{name}` variable: {}",
                s.to_string_lossy()
            )),
        };

        let mut options = Self::default();
        if let Some(model) = var(ENV_VAR_MODEL_PATH)? {
            options = options.model(Location::parse(&model));
        }
        if let Some(labels) = var(ENV_VAR_LABELS_PATH)? {
            options = options.labels(Some(Location::parse(&labels)));
        }
        if let Some(model) = var(ENV_VAR_LANDMARK_MODEL)? {
            options = options.landmark_model(Location::parse(&model));
        }
        if let Some(url) = var(ENV_VAR_BACKEND_URL)? {
            options = options.backend_url(Some(url));
        }
        if let Some(ms) = var(ENV_VAR_THROTTLE_MS)? {
            let ms = ms.trim().parse::<u64>().with_context(|| {
                format!("invalid value set for `{ENV_VAR_THROTTLE_MS}` variable: '{ms}'")
            })?;
            options = options.throttle_interval(Duration::from_millis(ms));
        }
        Ok(options)
    }

    /// Sets the minimum time between two inference attempts.
    pub fn throttle_interval(self, throttle_interval: Duration) -> Self {
        Self {
            throttle_interval,
            ..self
        }
    }

    /// Sets the preferred camera resolution.
    pub fn resolution(self, resolution: Resolution) -> Self {
        Self { resolution, ..self }
    }

    /// Sets the rate of the frame loop, in frames per second.
    ///
    /// A rate of zero is raised to 1 FPS.
    pub fn fps(self, fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            ..self
        }
    }

    /// Sets whether the overlay is mirrored horizontally.
    pub fn mirror(self, mirror: bool) -> Self {
        Self { mirror, ..self }
    }

    /// Sets the location of the gesture classification model.
    pub fn model(self, model: Location) -> Self {
        Self { model, ..self }
    }

    /// Sets the location of the class label table, or disables loading it.
    pub fn labels(self, labels: Option<Location>) -> Self {
        Self { labels, ..self }
    }

    /// Sets the location of the hand landmark model.
    pub fn landmark_model(self, landmark_model: Location) -> Self {
        Self {
            landmark_model,
            ..self
        }
    }

    /// Uses a prediction server instead of a local gesture model.
    pub fn backend_url(self, backend_url: Option<String>) -> Self {
        Self {
            backend_url,
            ..self
        }
    }

    pub fn camera(self, camera: CameraConfig) -> Self {
        Self { camera, ..self }
    }

    pub fn session_options(self, session_options: SessionOptions) -> Self {
        Self {
            session_options,
            ..self
        }
    }

    /// Sets the hand presence score below which a frame is considered to contain no hand.
    pub fn presence_threshold(self, presence_threshold: f32) -> Self {
        Self {
            presence_threshold,
            ..self
        }
    }

    /// Sets how long to wait for the camera to deliver frames of a usable size.
    pub fn camera_ready_timeout(self, camera_ready_timeout: Duration) -> Self {
        Self {
            camera_ready_timeout,
            ..self
        }
    }

    pub fn get_throttle_interval(&self) -> Duration {
        self.throttle_interval
    }

    pub fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    /// Returns the time between two iterations of the frame loop.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    pub fn get_fps(&self) -> u32 {
        self.fps
    }

    pub fn get_mirror(&self) -> bool {
        self.mirror
    }

    pub fn get_model(&self) -> &Location {
        &self.model
    }

    pub fn get_labels(&self) -> Option<&Location> {
        self.labels.as_ref()
    }

    pub fn get_landmark_model(&self) -> &Location {
        &self.landmark_model
    }

    pub fn get_backend_url(&self) -> Option<&str> {
        self.backend_url.as_deref()
    }

    pub fn get_camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn get_session_options(&self) -> &SessionOptions {
        &self.session_options
    }

    pub fn get_presence_threshold(&self) -> f32 {
        self.presence_threshold
    }

    pub fn get_camera_ready_timeout(&self) -> Duration {
        self.camera_ready_timeout
    }
}
