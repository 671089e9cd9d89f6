//! Drives the detector through scripted collaborators.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use mudra::{
    config::DetectorOptions,
    detector::{Collaborators, Detector, Presenter, StartError, State},
    image::{Image, Resolution},
    labels::ClassLabelTable,
    landmark::{LandmarkDetector, LandmarkSet},
    nn::{tensor::Tensor, Session, TensorMap},
    resource::{LoadError, Location, ResourceKind},
    video::{CameraError, FrameSource},
};

#[derive(Default)]
struct Counters {
    bundle_loads: AtomicUsize,
    cameras_opened: AtomicUsize,
    cameras_open: AtomicUsize,
    frames_read: AtomicUsize,
    sessions_created: AtomicUsize,
    inferences: AtomicUsize,
}

impl Counters {
    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

enum Output {
    Index(f32),
    Fail,
}

#[derive(Clone, Copy)]
enum CameraScript {
    Ready,
    NeverReady,
    Denied,
}

struct Script {
    counters: Arc<Counters>,
    hand: Arc<Mutex<Option<LandmarkSet>>>,
    outputs: Arc<Mutex<VecDeque<Output>>>,
    camera: CameraScript,
    fail_bundles: bool,
    labels: Option<ClassLabelTable>,
    session_delay: Duration,
}

impl Script {
    fn new() -> Self {
        Self {
            counters: Arc::default(),
            hand: Arc::new(Mutex::new(Some(hand()))),
            outputs: Arc::default(),
            camera: CameraScript::Ready,
            fail_bundles: false,
            labels: Some(ClassLabelTable::new(["Anjali", "Ardhachandra", "Pataka"])),
            session_delay: Duration::ZERO,
        }
    }
}

fn hand() -> LandmarkSet {
    LandmarkSet::from_positions((0..21).map(|i| [i as f32 / 21.0, 0.5, -0.01 * i as f32]))
}

struct FakeCamera {
    counters: Arc<Counters>,
    resolution: Resolution,
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.counters.cameras_open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FrameSource for FakeCamera {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn read(&mut self) -> anyhow::Result<Image> {
        self.counters.frames_read.fetch_add(1, Ordering::SeqCst);
        Ok(Image::new(self.resolution.width(), self.resolution.height()))
    }
}

struct FakeLandmarker {
    hand: Arc<Mutex<Option<LandmarkSet>>>,
}

impl LandmarkDetector for FakeLandmarker {
    fn detect(&mut self, _frame: &Image) -> anyhow::Result<Vec<LandmarkSet>> {
        Ok(self.hand.lock().unwrap().iter().cloned().collect())
    }

    fn topology(&self) -> Option<&[(usize, usize)]> {
        Some(mudra::hand::CONNECTIVITY)
    }
}

struct FakeSession {
    counters: Arc<Counters>,
    outputs: Arc<Mutex<VecDeque<Output>>>,
    inputs: Vec<String>,
    output_names: Vec<String>,
    delay: Duration,
}

impl Session for FakeSession {
    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(&mut self, inputs: TensorMap) -> anyhow::Result<TensorMap> {
        self.counters.inferences.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        let input = inputs
            .get("features")
            .ok_or_else(|| anyhow!("missing input"))?;
        assert_eq!(input.shape(), &[1, 63]);

        match self.outputs.lock().unwrap().pop_front() {
            Some(Output::Index(index)) => Ok([("class", Tensor::from([index]))]
                .into_iter()
                .collect()),
            Some(Output::Fail) | None => Err(anyhow!("session failure")),
        }
    }
}

impl Collaborators for Script {
    type Camera = FakeCamera;
    type Landmarker = FakeLandmarker;
    type Session = FakeSession;

    fn load_bundles(&mut self) -> Result<(), LoadError> {
        self.counters.bundle_loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_bundles {
            return Err(LoadError::new(
                ResourceKind::LandmarkModel,
                Location::parse("https://cdn.example.com/hands.onnx"),
                "404 Not Found",
            ));
        }
        Ok(())
    }

    fn open_camera(&mut self) -> Result<FakeCamera, CameraError> {
        let resolution = match self.camera {
            CameraScript::Ready => Resolution::new(64, 48),
            CameraScript::NeverReady => Resolution::new(0, 0),
            CameraScript::Denied => {
                return Err(CameraError::PermissionDenied("/dev/video0".into()));
            }
        };
        self.counters.cameras_opened.fetch_add(1, Ordering::SeqCst);
        self.counters.cameras_open.fetch_add(1, Ordering::SeqCst);
        Ok(FakeCamera {
            counters: self.counters.clone(),
            resolution,
        })
    }

    fn load_labels(&mut self) -> Option<ClassLabelTable> {
        self.labels.clone()
    }

    fn create_session(&mut self) -> Result<FakeSession, StartError> {
        self.counters.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            counters: self.counters.clone(),
            outputs: self.outputs.clone(),
            inputs: vec!["features".into()],
            output_names: vec!["class".into()],
            delay: self.session_delay,
        })
    }

    fn create_landmarker(&mut self) -> Result<FakeLandmarker, StartError> {
        Ok(FakeLandmarker {
            hand: self.hand.clone(),
        })
    }
}

fn options() -> DetectorOptions {
    DetectorOptions::new().camera_ready_timeout(Duration::from_millis(50))
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn start_runs() {
    let script = Script::new();
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    assert_eq!(detector.state(), State::Idle);
    assert_eq!(
        detector.status_text(),
        "Start the detector to initialize the model"
    );

    detector.start();
    assert_eq!(detector.state(), State::Running);
    assert!(detector.is_loop_scheduled());
    assert_eq!(detector.error(), None);
    assert_eq!(detector.status_text(), "Show your hand to the camera");
    assert_eq!(Counters::get(&counters.cameras_open), 1);
    assert_eq!(Counters::get(&counters.sessions_created), 1);

    let overlay = detector.step(Instant::now()).unwrap();
    assert_eq!(overlay.resolution(), Resolution::new(64, 48));
}

#[test]
fn start_while_running_is_noop() {
    let script = Script::new();
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();
    detector.start();
    assert_eq!(detector.state(), State::Running);
    assert_eq!(Counters::get(&counters.cameras_opened), 1);
    assert_eq!(Counters::get(&counters.sessions_created), 1);
}

#[test]
fn decodes_label() {
    let script = Script::new();
    script.outputs.lock().unwrap().push_back(Output::Index(2.0));
    let mut detector = Detector::new(script, &options());
    detector.start();

    detector.step(Instant::now()).unwrap();
    detector.wait_for_inference();
    assert_eq!(detector.label(), Some("Pataka"));
    assert_eq!(detector.status_text(), "Prediction: Pataka");
}

#[test]
fn synthetic_label_without_table() {
    let mut script = Script::new();
    script.labels = None;
    script.outputs.lock().unwrap().push_back(Output::Index(5.0));
    let mut detector = Detector::new(script, &options());
    detector.start();

    detector.step(Instant::now()).unwrap();
    detector.wait_for_inference();
    assert_eq!(detector.label(), Some("Gesture 5"));
}

#[test]
fn no_hand_no_inference() {
    let script = Script::new();
    *script.hand.lock().unwrap() = None;
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();

    let t0 = Instant::now();
    for i in 0..5 {
        assert!(detector.step(t0 + ms(200 * i)).is_some());
    }
    detector.wait_for_inference();
    assert_eq!(Counters::get(&counters.frames_read), 5);
    assert_eq!(Counters::get(&counters.inferences), 0);
    assert_eq!(detector.label(), None);
}

#[test]
fn incomplete_hand_no_inference() {
    let script = Script::new();
    *script.hand.lock().unwrap() = Some(LandmarkSet::from_positions([[0.5, 0.5, 0.0]; 20]));
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();

    detector.step(Instant::now()).unwrap();
    detector.wait_for_inference();
    assert_eq!(Counters::get(&counters.inferences), 0);
}

#[test]
fn inference_is_throttled() {
    let script = Script::new();
    script
        .outputs
        .lock()
        .unwrap()
        .extend([Output::Index(0.0), Output::Index(1.0), Output::Index(2.0)]);
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();

    let t0 = Instant::now();
    detector.step(t0);
    detector.wait_for_inference();
    assert_eq!(Counters::get(&counters.inferences), 1);

    detector.step(t0 + ms(50));
    detector.wait_for_inference();
    assert_eq!(Counters::get(&counters.inferences), 1);
    assert_eq!(detector.label(), Some("Anjali"));

    detector.step(t0 + ms(100));
    detector.wait_for_inference();
    assert_eq!(Counters::get(&counters.inferences), 2);
    assert_eq!(detector.label(), Some("Ardhachandra"));
}

#[test]
fn failed_inference_keeps_label() {
    let script = Script::new();
    script
        .outputs
        .lock()
        .unwrap()
        .extend([Output::Index(2.0), Output::Fail]);
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();

    let t0 = Instant::now();
    detector.step(t0);
    detector.wait_for_inference();
    assert_eq!(detector.label(), Some("Pataka"));

    detector.step(t0 + ms(200));
    detector.wait_for_inference();
    assert_eq!(Counters::get(&counters.inferences), 2);
    assert_eq!(detector.label(), Some("Pataka"));
    assert_eq!(detector.state(), State::Running);
    assert_eq!(detector.error(), None);

    // The loop keeps going.
    assert!(detector.step(t0 + ms(400)).is_some());
}

#[test]
fn stop_and_restart() {
    let script = Script::new();
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();
    detector.step(Instant::now()).unwrap();
    assert_eq!(Counters::get(&counters.frames_read), 1);

    detector.stop();
    assert_eq!(detector.state(), State::Stopped);
    assert!(!detector.is_loop_scheduled());
    assert_eq!(Counters::get(&counters.cameras_open), 0);
    assert!(detector.step(Instant::now()).is_none());
    assert_eq!(Counters::get(&counters.frames_read), 1);

    detector.start();
    assert_eq!(detector.state(), State::Running);
    assert_eq!(Counters::get(&counters.cameras_opened), 2);
    assert_eq!(Counters::get(&counters.cameras_open), 1);
    assert!(detector.step(Instant::now()).is_some());
}

#[test]
fn stop_discards_pending_results() {
    let script = Script::new();
    script.outputs.lock().unwrap().push_back(Output::Index(1.0));
    let mut detector = Detector::new(script, &options());
    detector.start();
    detector.step(Instant::now()).unwrap();
    detector.stop();
    detector.wait_for_inference();
    assert_eq!(detector.label(), None);
}

#[test]
fn slow_inference_does_not_stall_loop() {
    let mut script = Script::new();
    script.session_delay = ms(400);
    script
        .outputs
        .lock()
        .unwrap()
        .extend([Output::Index(1.0), Output::Index(2.0)]);
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options().throttle_interval(ms(10)));
    detector.start();

    let t0 = Instant::now();
    for i in 0..5 {
        let started = Instant::now();
        assert!(detector.step(t0 + ms(20 * i)).is_some());
        let elapsed = started.elapsed();
        assert!(elapsed < ms(100), "step took {elapsed:?}");
    }

    // Frames seen while the first call was running were not queued behind it.
    detector.wait_for_inference();
    assert_eq!(Counters::get(&counters.inferences), 1);
    assert_eq!(detector.label(), Some("Ardhachandra"));

    detector.step(t0 + ms(200));
    detector.wait_for_inference();
    assert_eq!(Counters::get(&counters.inferences), 2);
    assert_eq!(detector.label(), Some("Pataka"));
}

#[test]
fn stop_does_not_wait_for_inference() {
    let mut script = Script::new();
    script.session_delay = ms(500);
    script.outputs.lock().unwrap().push_back(Output::Index(1.0));
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();
    detector.step(Instant::now()).unwrap();
    // Give the worker time to pick up the call.
    thread::sleep(ms(20));
    assert_eq!(Counters::get(&counters.inferences), 1);

    let started = Instant::now();
    detector.stop();
    let elapsed = started.elapsed();
    assert!(elapsed < ms(250), "stop took {elapsed:?}");
    assert_eq!(detector.state(), State::Stopped);
    assert_eq!(Counters::get(&counters.cameras_open), 0);
    assert_eq!(detector.label(), None);
}

#[test]
fn camera_denied() {
    let mut script = Script::new();
    script.camera = CameraScript::Denied;
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();

    assert_eq!(detector.state(), State::Error);
    assert!(!detector.is_loop_scheduled());
    let error = detector.error().unwrap();
    assert!(error.contains("camera access denied"), "{error}");
    assert_eq!(Counters::get(&counters.sessions_created), 0);
}

#[test]
fn camera_never_ready() {
    let mut script = Script::new();
    script.camera = CameraScript::NeverReady;
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();

    assert_eq!(detector.state(), State::Error);
    assert!(detector.error().unwrap().contains("did not become ready"));
    assert_eq!(Counters::get(&counters.cameras_open), 0);
    assert_eq!(Counters::get(&counters.sessions_created), 0);
}

#[test]
fn load_failure_is_recoverable() {
    let mut script = Script::new();
    script.fail_bundles = true;
    let counters = script.counters.clone();
    let mut detector = Detector::new(script, &options());
    detector.start();

    assert_eq!(detector.state(), State::Error);
    let error = detector.error().unwrap();
    assert!(error.contains("hand landmark model"), "{error}");
    assert_eq!(Counters::get(&counters.cameras_opened), 0);

    // Retrying is up to the user and fails the same way.
    detector.start();
    assert_eq!(detector.state(), State::Error);
    assert_eq!(Counters::get(&counters.bundle_loads), 2);

    detector.stop();
    assert_eq!(detector.state(), State::Stopped);
    assert_eq!(detector.error(), None);
}

struct ChannelPresenter {
    frames: crossbeam::channel::Sender<Resolution>,
    states: crossbeam::channel::Sender<State>,
}

impl Presenter for ChannelPresenter {
    fn present_frame(&mut self, frame: &Image) {
        self.frames.send(frame.resolution()).ok();
    }

    fn present_status(&mut self, state: State, _status: &str, _error: Option<&str>) {
        self.states.send(state).ok();
    }
}

#[test]
fn spawned_detector() {
    let script = Script::new();
    let counters = script.counters.clone();
    let (frames, frame_recv) = crossbeam::channel::unbounded();
    let (states, state_recv) = crossbeam::channel::unbounded();

    let detector = Detector::new(script, &options().fps(100));
    let handle = detector
        .spawn(ChannelPresenter { frames, states })
        .unwrap();
    assert_eq!(state_recv.recv_timeout(ms(5000)).unwrap(), State::Idle);

    handle.start();
    assert_eq!(state_recv.recv_timeout(ms(5000)).unwrap(), State::Running);
    assert_eq!(
        frame_recv.recv_timeout(ms(5000)).unwrap(),
        Resolution::new(64, 48)
    );

    handle.stop();
    assert_eq!(state_recv.recv_timeout(ms(5000)).unwrap(), State::Stopped);

    handle.shutdown();
    assert_eq!(Counters::get(&counters.cameras_open), 0);
}
