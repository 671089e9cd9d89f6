use std::{
    io::{self, BufRead},
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::Parser;
use mudra::{
    config::{CameraConfig, DetectorOptions},
    detector::{Detector, Presenter, State},
    image::Image,
    resource::Location,
};

/// How often the overlay is written to disk, in frames.
const OVERLAY_SAVE_INTERVAL: u32 = 30;

#[derive(Parser, Debug)]
#[command(name = "mudra", about = "Real-time hand gesture recognition")]
struct Args {
    /// Path or URL of the gesture classification model.
    #[arg(long)]
    model: Option<String>,
    /// Path or URL of the class label table (a JSON array of strings).
    #[arg(long)]
    labels: Option<String>,
    /// Don't load a class label table.
    #[arg(long, conflicts_with = "labels")]
    no_labels: bool,
    /// Path or URL of the hand landmark model.
    #[arg(long)]
    landmark_model: Option<String>,
    /// Base URL of a prediction server to use instead of a local model.
    #[arg(long)]
    backend_url: Option<String>,
    /// Name of the webcam device to open.
    #[arg(long)]
    camera_name: Option<String>,
    /// Read frames from an MJPG stream instead of a webcam, given as `host:port/path`.
    #[arg(long, conflicts_with = "camera_name")]
    http_camera: Option<String>,
    /// Minimum time between two inferences, in milliseconds.
    #[arg(long)]
    throttle_ms: Option<u64>,
    /// Frame loop rate.
    #[arg(long, default_value_t = 60)]
    fps: u32,
    /// Don't mirror the overlay.
    #[arg(long)]
    no_mirror: bool,
    /// Periodically write the rendered overlay to this image file.
    #[arg(long)]
    overlay: Option<PathBuf>,
    /// Start the detector right away instead of waiting for a `start` command.
    #[arg(long)]
    autostart: bool,
}

impl Args {
    fn apply(&self, mut options: DetectorOptions) -> anyhow::Result<DetectorOptions> {
        if self.fps == 0 {
            bail!("frame rate must be greater than zero");
        }
        options = options.fps(self.fps).mirror(!self.no_mirror);
        if let Some(model) = &self.model {
            options = options.model(Location::parse(model));
        }
        if let Some(labels) = &self.labels {
            options = options.labels(Some(Location::parse(labels)));
        }
        if self.no_labels {
            options = options.labels(None);
        }
        if let Some(model) = &self.landmark_model {
            options = options.landmark_model(Location::parse(model));
        }
        if let Some(url) = &self.backend_url {
            options = options.backend_url(Some(url.clone()));
        }
        if let Some(ms) = self.throttle_ms {
            options = options.throttle_interval(Duration::from_millis(ms));
        }
        if let Some(name) = &self.camera_name {
            options = options.camera(CameraConfig::Webcam {
                name: Some(name.clone()),
            });
        }
        if let Some(stream) = &self.http_camera {
            options = options.camera(parse_http_camera(stream)?);
        }
        Ok(options)
    }
}

fn parse_http_camera(s: &str) -> anyhow::Result<CameraConfig> {
    let s = s.strip_prefix("http://").unwrap_or(s);
    let (addr, path) = match s.find('/') {
        Some(i) => s.split_at(i),
        None => (s, "/"),
    };
    let addr = addr
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid camera address '{addr}'"))?;
    Ok(CameraConfig::Http {
        addr,
        path: path.to_string(),
    })
}

struct ConsolePresenter {
    overlay: Option<PathBuf>,
    frames: u32,
}

impl Presenter for ConsolePresenter {
    fn present_frame(&mut self, frame: &Image) {
        let Some(path) = &self.overlay else { return };
        self.frames += 1;
        if self.frames % OVERLAY_SAVE_INTERVAL == 1 {
            if let Err(e) = frame.save(path) {
                log::warn!("failed to save overlay to {}: {e:#}", path.display());
            }
        }
    }

    fn present_status(&mut self, state: State, status: &str, error: Option<&str>) {
        match error {
            Some(error) => println!("[{state}] {error}"),
            None => println!("[{state}] {status}"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    mudra::init_logger!();

    let args = Args::parse();
    let options = args.apply(DetectorOptions::from_env()?)?;

    let detector = Detector::with_runtime(options);
    let handle = detector.spawn(ConsolePresenter {
        overlay: args.overlay.clone(),
        frames: 0,
    })?;
    if args.autostart {
        handle.start();
    }

    println!("commands: start, stop, quit");
    for line in io::stdin().lock().lines() {
        match line?.trim() {
            "start" => handle.start(),
            "stop" => handle.stop(),
            "quit" | "exit" => break,
            "" => {}
            other => println!("unknown command '{other}'"),
        }
    }

    handle.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_camera() {
        assert_eq!(
            parse_http_camera("192.168.0.10:4747/video").unwrap(),
            CameraConfig::Http {
                addr: "192.168.0.10:4747".parse().unwrap(),
                path: "/video".into(),
            }
        );
        assert_eq!(
            parse_http_camera("http://127.0.0.1:8080").unwrap(),
            CameraConfig::Http {
                addr: "127.0.0.1:8080".parse().unwrap(),
                path: "/".into(),
            }
        );
        assert!(parse_http_camera("camera/video").is_err());
    }

    #[test]
    fn args_map_to_options() {
        let args = Args::parse_from(["mudra", "--no-labels", "--throttle-ms", "250", "--no-mirror"]);
        let options = args.apply(DetectorOptions::new()).unwrap();
        assert_eq!(options.get_labels(), None);
        assert_eq!(options.get_throttle_interval(), Duration::from_millis(250));
        assert!(!options.get_mirror());
    }
}
