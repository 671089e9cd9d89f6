//! The gesture detector.
//!
//! A [`Detector`] owns the camera, the hand landmarker and the gesture classification session
//! while it is running. Each call to [`Detector::step`] processes one camera frame: the frame is
//! run through the landmarker, the overlay is rendered, and the landmarks of the first detected
//! hand are submitted to the inference worker (at most once per throttle interval). Results are
//! picked up at the start of the next step.
//!
//! [`Detector::spawn`] moves a detector onto its own thread, which is controlled through the
//! returned [`DetectorHandle`].

use std::{
    collections::VecDeque,
    fmt, io,
    panic::resume_unwind,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::anyhow;
use crossbeam::channel::{self, Receiver, Sender};

use crate::{
    config::{CameraConfig, DetectorOptions},
    decode,
    hand::landmark::OnnxHandLandmarker,
    image::Image,
    labels::ClassLabelTable,
    landmark::{FeatureVector, LandmarkDetector, FEATURE_LEN},
    nn::{remote::RemoteSession, tensor::Tensor, NeuralNetwork, Session, TensorMap},
    overlay::OverlayRenderer,
    resource::{self, LoadError, ResourceKind},
    throttle::Throttle,
    timer::{FpsCounter, Timer},
    video::{
        self,
        httpcam::HttpStream,
        webcam::{Webcam, WebcamOptions},
        CameraError, FrameSource,
    },
    worker::{promise, Promise, PromiseHandle, Worker},
};

/// Lifecycle state of a [`Detector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing has been started yet.
    Idle,
    /// Resources are being acquired.
    Initializing,
    /// Camera, landmarker and session are ready and frames are being processed.
    Running,
    /// Starting failed. The error message is available via [`Detector::error`].
    Error,
    /// The detector was stopped and all resources have been released.
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Idle => "idle",
            State::Initializing => "initializing",
            State::Running => "running",
            State::Error => "error",
            State::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Commands controlling a [`Detector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Stops the detector and exits its thread.
    Shutdown,
}

/// Errors that can prevent a [`Detector`] from starting.
///
/// The [`Display`][fmt::Display] output is the message shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("failed to create inference session: {0:#}")]
    Session(anyhow::Error),
    #[error("failed to create hand landmarker: {0:#}")]
    Landmarker(anyhow::Error),
}

/// The external pieces a [`Detector`] is assembled from.
///
/// Methods are called in declaration order when the detector starts. The first error aborts the
/// start attempt and everything acquired so far is dropped.
pub trait Collaborators {
    type Camera: FrameSource + 'static;
    type Landmarker: LandmarkDetector + 'static;
    type Session: Session + 'static;

    /// Loads the shared library data needed by the landmarker.
    fn load_bundles(&mut self) -> Result<(), LoadError>;

    /// Opens the camera.
    fn open_camera(&mut self) -> Result<Self::Camera, CameraError>;

    /// Loads the class label table, if one is available.
    ///
    /// A missing or malformed table is not an error: labels fall back to `Gesture {index}`.
    fn load_labels(&mut self) -> Option<ClassLabelTable>;

    /// Fetches the gesture model and creates an inference session for it.
    fn create_session(&mut self) -> Result<Self::Session, StartError>;

    fn create_landmarker(&mut self) -> Result<Self::Landmarker, StartError>;
}

/// The default [`Collaborators`]: webcam or HTTP camera, ONNX hand landmarker, and either a local
/// ONNX gesture model or a remote prediction server.
pub struct Runtime {
    options: DetectorOptions,
    landmark_model: Option<Arc<[u8]>>,
}

impl Runtime {
    pub fn new(options: DetectorOptions) -> Self {
        Self {
            options,
            landmark_model: None,
        }
    }
}

impl Collaborators for Runtime {
    type Camera = Box<dyn FrameSource>;
    type Landmarker = OnnxHandLandmarker;
    type Session = Box<dyn Session>;

    fn load_bundles(&mut self) -> Result<(), LoadError> {
        let data = resource::load_bundle(
            ResourceKind::LandmarkModel,
            self.options.get_landmark_model(),
        )?;
        self.landmark_model = Some(data);
        Ok(())
    }

    fn open_camera(&mut self) -> Result<Self::Camera, CameraError> {
        let camera: Box<dyn FrameSource> = match self.options.get_camera() {
            CameraConfig::Webcam { name } => {
                let mut options = WebcamOptions::default()
                    .resolution(self.options.get_resolution())
                    .fps(self.options.get_fps());
                if let Some(name) = name {
                    options = options.name(name.clone());
                }
                Box::new(Webcam::open(options)?)
            }
            CameraConfig::Http { addr, path } => Box::new(
                HttpStream::connect(*addr, path).map_err(|e| CameraError::from_anyhow(&e))?,
            ),
        };
        Ok(camera)
    }

    fn load_labels(&mut self) -> Option<ClassLabelTable> {
        let location = self.options.get_labels()?;
        let data = match resource::fetch_fresh(ResourceKind::LabelTable, location) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("{e}");
                return None;
            }
        };
        match ClassLabelTable::from_json(&data) {
            Ok(Some(table)) => {
                log::debug!("loaded {} class labels", table.len());
                Some(table)
            }
            Ok(None) => {
                log::debug!("class label table at {location} is empty");
                None
            }
            Err(e) => {
                log::warn!("ignoring class label table at {location}: {e:#}");
                None
            }
        }
    }

    fn create_session(&mut self) -> Result<Self::Session, StartError> {
        if let Some(url) = self.options.get_backend_url() {
            let session = RemoteSession::new(url).map_err(StartError::Session)?;
            log::debug!("using prediction server at {}", session.url());
            return Ok(Box::new(session));
        }

        let data = resource::fetch_fresh(ResourceKind::GestureModel, self.options.get_model())?;
        let nn = NeuralNetwork::from_onnx(&data)
            .with_input_shape(&[1, FEATURE_LEN])
            .with_options(self.options.get_session_options().clone())
            .load()
            .map_err(StartError::Session)?;
        log::debug!(
            "gesture model inputs: {:?}, outputs: {:?}",
            nn.input_names(),
            nn.output_names(),
        );
        Ok(Box::new(nn))
    }

    fn create_landmarker(&mut self) -> Result<Self::Landmarker, StartError> {
        let data = self
            .landmark_model
            .as_ref()
            .ok_or_else(|| StartError::Landmarker(anyhow!("hand landmark model was not loaded")))?;
        let mut landmarker =
            OnnxHandLandmarker::from_onnx(data, self.options.get_session_options().clone())
                .map_err(StartError::Landmarker)?;
        landmarker.set_presence_threshold(self.options.get_presence_threshold());
        Ok(landmarker)
    }
}

type InferenceResult = anyhow::Result<TensorMap>;

struct Inference {
    worker: Option<Worker<(TensorMap, Promise<InferenceResult>)>>,
    input_name: String,
    output_names: Vec<String>,
    t_infer: Arc<Timer>,
}

impl Inference {
    fn spawn<S: Session + 'static>(mut session: S) -> Result<Self, StartError> {
        let input_name = session
            .input_names()
            .first()
            .cloned()
            .ok_or_else(|| StartError::Session(anyhow!("session declares no inputs")))?;
        let output_names = session.output_names().to_vec();
        let t_infer = Arc::new(Timer::new("inference"));

        let timer = t_infer.clone();
        let worker = Worker::builder()
            .name("inference")
            .capacity(1)
            .spawn(move |(inputs, promise): (TensorMap, Promise<InferenceResult>)| {
                if !promise.is_wanted() {
                    return;
                }
                let result = timer.time(|| session.run(inputs));
                promise.fulfill(result);
            })
            .map_err(|e| StartError::Session(e.into()))?;

        Ok(Self {
            worker: Some(worker),
            input_name,
            output_names,
            t_infer,
        })
    }
}

/// A call still running when the detector stops is not waited for. Its result goes nowhere, since
/// the promise handles are dropped first.
impl Drop for Inference {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.detach();
        }
    }
}

/// Everything acquired by a successful start.
///
/// Fields are dropped in order: outstanding results are discarded before the inference worker is
/// detached, and the camera is released last.
struct Active<C: Collaborators> {
    pending: VecDeque<PromiseHandle<InferenceResult>>,
    inference: Inference,
    labels: Option<ClassLabelTable>,
    landmarker: C::Landmarker,
    camera: C::Camera,
}

impl<C: Collaborators> Active<C> {
    /// Returns whether no inference call is in flight.
    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Hands `features` to the inference worker without blocking.
    fn submit(&mut self, features: &FeatureVector) {
        let Some(worker) = &mut self.inference.worker else {
            return;
        };
        let mut inputs = TensorMap::new();
        inputs.insert(
            self.inference.input_name.clone(),
            Tensor::from_features(features),
        );
        let (promise, handle) = promise();
        match worker.try_send((inputs, promise)) {
            Ok(()) => self.pending.push_back(handle),
            Err(_) => log::debug!("inference worker busy, skipping frame"),
        }
    }

    /// Applies finished inference results in submission order.
    ///
    /// Returns the newest decoded label. If `block` is set, waits for all outstanding results.
    fn settle(&mut self, block: bool) -> Option<String> {
        let mut label = None;
        while let Some(handle) = self.pending.pop_front() {
            let result = if block {
                handle.block()
            } else {
                match handle.try_take() {
                    Ok(Some(result)) => Ok(result),
                    Ok(None) => {
                        self.pending.push_front(handle);
                        break;
                    }
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok(Ok(outputs)) => {
                    let decoded = decode::decode(
                        &outputs,
                        &self.inference.output_names,
                        self.labels.as_ref(),
                    );
                    if decoded.is_some() {
                        label = decoded;
                    }
                }
                Ok(Err(e)) => log::error!("inference failed: {e:#}"),
                Err(_) => log::error!("inference worker dropped a request"),
            }
        }
        label
    }
}

/// Receives the output of a running detector.
pub trait Presenter {
    /// Called with the rendered overlay of every processed frame.
    fn present_frame(&mut self, frame: &Image);

    /// Called whenever the detector's state or status text changes.
    fn present_status(&mut self, state: State, status: &str, error: Option<&str>);
}

/// Real-time hand gesture detector.
pub struct Detector<C: Collaborators> {
    collaborators: C,
    state: State,
    error: Option<String>,
    label: Option<String>,
    throttle: Throttle,
    overlay: OverlayRenderer,
    camera_ready_timeout: Duration,
    frame_interval: Duration,
    active: Option<Active<C>>,
    fps: FpsCounter,
    t_landmarks: Timer,
}

impl Detector<Runtime> {
    /// Creates a detector using the default [`Runtime`] collaborators.
    pub fn with_runtime(options: DetectorOptions) -> Self {
        Self::new(Runtime::new(options.clone()), &options)
    }
}

impl<C: Collaborators> Detector<C> {
    /// Creates an idle detector.
    pub fn new(collaborators: C, options: &DetectorOptions) -> Self {
        Self {
            collaborators,
            state: State::Idle,
            error: None,
            label: None,
            throttle: Throttle::new(options.get_throttle_interval()),
            overlay: OverlayRenderer::new(options.get_mirror()),
            camera_ready_timeout: options.get_camera_ready_timeout(),
            frame_interval: options.frame_interval(),
            active: None,
            fps: FpsCounter::new("detector"),
            t_landmarks: Timer::new("landmarks"),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the most recently decoded gesture label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Returns the message of the error that made the last start attempt fail.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns the text describing the detector's current output.
    pub fn status_text(&self) -> String {
        match (&self.label, self.state) {
            (Some(label), _) => format!("Prediction: {label}"),
            (None, State::Initializing | State::Running) => "Show your hand to the camera".into(),
            (None, _) => "Start the detector to initialize the model".into(),
        }
    }

    /// Returns whether the frame loop would process a frame on the next [`Detector::step`].
    pub fn is_loop_scheduled(&self) -> bool {
        self.state == State::Running && self.active.is_some()
    }

    /// Returns the overlay renderer, to configure it.
    pub fn overlay_mut(&mut self) -> &mut OverlayRenderer {
        &mut self.overlay
    }

    pub fn handle(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop | Command::Shutdown => self.stop(),
        }
    }

    /// Acquires all resources and starts processing frames.
    ///
    /// Does nothing if the detector is already running.
    pub fn start(&mut self) {
        if matches!(self.state, State::Running | State::Initializing) {
            log::debug!("start requested while {}, ignoring", self.state);
            return;
        }

        self.error = None;
        self.set_state(State::Initializing);
        match self.init() {
            Ok(active) => {
                self.active = Some(active);
                self.throttle.reset();
                self.set_state(State::Running);
            }
            Err(e) => {
                log::error!("failed to start detector: {e}");
                self.error = Some(e.to_string());
                self.set_state(State::Error);
            }
        }
    }

    fn init(&mut self) -> Result<Active<C>, StartError> {
        self.collaborators.load_bundles()?;

        let camera = self.collaborators.open_camera()?;
        let resolution = video::wait_until_ready(&camera, self.camera_ready_timeout)?;
        log::debug!("camera ready, {resolution}");

        let labels = self.collaborators.load_labels();
        let session = self.collaborators.create_session()?;
        let inference = Inference::spawn(session)?;
        let landmarker = self.collaborators.create_landmarker()?;

        Ok(Active {
            pending: VecDeque::new(),
            inference,
            labels,
            landmarker,
            camera,
        })
    }

    /// Stops processing frames and releases the camera, the landmarker and the session.
    ///
    /// Inferences still in flight are neither waited for nor applied.
    pub fn stop(&mut self) {
        match self.state {
            State::Running | State::Initializing | State::Error => {
                self.active = None;
                self.error = None;
                self.set_state(State::Stopped);
            }
            State::Idle | State::Stopped => {}
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            log::info!("detector {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Runs one iteration of the frame loop and returns the rendered overlay.
    ///
    /// `now` is the time of the iteration, used for inference throttling. Returns [`None`] if the
    /// detector is not running or no frame could be processed.
    pub fn step(&mut self, now: Instant) -> Option<Image> {
        if self.state != State::Running {
            return None;
        }
        let active = self.active.as_mut()?;

        if let Some(label) = active.settle(false) {
            self.label = Some(label);
        }

        if !active.camera.resolution().is_usable() {
            return None;
        }

        let frame = match active.camera.read() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("failed to read camera frame: {e:#}");
                return None;
            }
        };

        let hands = match self.t_landmarks.time(|| active.landmarker.detect(&frame)) {
            Ok(hands) => hands,
            Err(e) => {
                log::warn!("landmark detection failed: {e:#}");
                Vec::new()
            }
        };
        // Only the first hand is tracked.
        let hand = hands.first();

        let overlay = self.overlay.render(
            &frame,
            hand,
            active.landmarker.topology(),
            self.label.as_deref(),
        );

        if let Some(hand) = hand {
            match hand.to_features() {
                // At most one call is in flight, so a slow session never builds up a backlog.
                Ok(features) => {
                    if active.is_idle() && self.throttle.try_acquire(now) {
                        active.submit(&features);
                    }
                }
                Err(e) => log::trace!("skipping inference: {e}"),
            }
        }

        self.fps.tick_with(
            active
                .camera
                .timers()
                .into_iter()
                .chain(active.landmarker.timers())
                .chain([
                    &self.t_landmarks,
                    &*active.inference.t_infer,
                    self.overlay.timer(),
                ]),
        );

        Some(overlay)
    }

    /// Blocks until all submitted inferences have finished and applies their results.
    pub fn wait_for_inference(&mut self) {
        if let Some(active) = &mut self.active {
            if let Some(label) = active.settle(true) {
                self.label = Some(label);
            }
        }
    }
}

impl<C: Collaborators + Send + 'static> Detector<C> {
    /// Moves the detector onto a new thread.
    ///
    /// While running, the thread processes one frame per frame interval and hands the overlay to
    /// `presenter`. The thread exits when the returned handle is dropped or shut down.
    pub fn spawn<P: Presenter + Send + 'static>(self, presenter: P) -> io::Result<DetectorHandle> {
        let (sender, commands) = channel::unbounded();
        let thread = thread::Builder::new()
            .name("detector".into())
            .spawn(move || self.run(commands, presenter))?;
        Ok(DetectorHandle {
            commands: sender,
            thread: Some(thread),
        })
    }

    fn run<P: Presenter>(mut self, commands: Receiver<Command>, mut presenter: P) {
        let mut ticker = None;
        let mut last_status = None;
        loop {
            let status = (self.state, self.status_text(), self.error.clone());
            if last_status.as_ref() != Some(&status) {
                presenter.present_status(status.0, &status.1, status.2.as_deref());
                last_status = Some(status);
            }

            // The ticker only exists while frames are being processed.
            if self.is_loop_scheduled() {
                ticker.get_or_insert_with(|| channel::tick(self.frame_interval));
            } else {
                ticker = None;
            }
            let ticks = ticker.clone().unwrap_or_else(channel::never);

            let mut exit = false;
            channel::select! {
                recv(commands) -> command => match command {
                    Ok(Command::Shutdown) | Err(_) => exit = true,
                    Ok(command) => self.handle(command),
                },
                recv(ticks) -> now => {
                    if let Ok(now) = now {
                        if let Some(frame) = self.step(now) {
                            presenter.present_frame(&frame);
                        }
                    }
                }
            }
            if exit {
                break;
            }
        }

        self.stop();
        log::debug!("detector thread exiting");
    }
}

/// Controls a [`Detector`] running on its own thread.
///
/// Dropping the handle shuts the detector down and joins its thread.
pub struct DetectorHandle {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl DetectorHandle {
    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Stops the detector and waits for its thread to exit.
    pub fn shutdown(self) {
        drop(self);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("detector thread has exited, dropping {command:?}");
        }
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.commands.send(Command::Shutdown).ok();
        if let Some(thread) = self.thread.take() {
            if let Err(payload) = thread.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }
}
