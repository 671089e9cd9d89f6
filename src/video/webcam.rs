//! V4L2 webcam access.
//!
//! Currently, only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are
//! supported.

use std::{cmp::Reverse, env, io};

use anyhow::bail;
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::image::{Image, Resolution};
use crate::timer::Timer;

use super::{CameraError, FrameSource};

const ENV_VAR_WEBCAM_NAME: &str = "MUDRA_WEBCAM_NAME";

/// Format negotiation options.
#[derive(Debug, Default, Clone)]
pub struct WebcamOptions {
    name: Option<String>,
    resolution: Option<Resolution>,
    fps: Option<u32>,
}

impl WebcamOptions {
    /// Sets the name of the webcam device to open.
    ///
    /// If no webcam with the given name can be found, opening the webcam will result in an error.
    #[inline]
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the preferred image resolution.
    ///
    /// The smallest format of at least this size is chosen. If the webcam has none, the largest
    /// format it supports is used instead.
    #[inline]
    pub fn resolution(self, resolution: Resolution) -> Self {
        Self {
            resolution: Some(resolution),
            ..self
        }
    }

    /// Sets the desired frame rate.
    ///
    /// A lower frame rate might be selected if the webcam cannot deliver it at the preferred
    /// resolution.
    #[inline]
    pub fn fps(self, fps: u32) -> Self {
        Self {
            fps: Some(fps),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

impl FrameFormat {
    fn fps(&self) -> f32 {
        (1.0 / self.frame_interval.as_f32()).round()
    }
}

fn frame_formats(device: &Device, pixel_format: Pixelformat) -> anyhow::Result<Vec<FrameFormat>> {
    let mut formats = Vec::new();
    match device.frame_sizes(pixel_format)? {
        FrameSizes::Discrete(sizes) => {
            for size in sizes {
                let intervals =
                    match device.frame_intervals(pixel_format, size.width(), size.height())? {
                        FrameIntervals::Discrete(intervals) => intervals,
                        FrameIntervals::Stepwise(_) | FrameIntervals::Continuous(_) => {
                            bail!("stepwise or continuous frame rates are not supported")
                        }
                    };
                for rate in intervals {
                    formats.push(FrameFormat {
                        resolution: Resolution::new(size.width(), size.height()),
                        frame_interval: *rate.fract(),
                    });
                }
            }
        }
        FrameSizes::Stepwise(_) | FrameSizes::Continuous(_) => {
            bail!("stepwise or continuous resolutions are not supported");
        }
    }
    Ok(formats)
}

/// Picks the format closest to the preferred resolution and frame rate.
///
/// The frame rate preference is given up first, then the resolution preference.
fn choose_format(formats: &[FrameFormat], options: &WebcamOptions) -> Option<FrameFormat> {
    let large_enough = |fmt: &&FrameFormat| {
        options.resolution.map_or(true, |res| {
            fmt.resolution.width() >= res.width() && fmt.resolution.height() >= res.height()
        })
    };
    let fast_enough =
        |fmt: &&FrameFormat| options.fps.map_or(true, |fps| fmt.fps() >= fps as f32);

    // Smallest sufficient resolution, then highest frame rate.
    let closest = |fmt: &&FrameFormat| (Reverse(fmt.resolution.num_pixels()), Reverse(fmt.frame_interval));

    formats
        .iter()
        .filter(large_enough)
        .filter(fast_enough)
        .max_by_key(closest)
        .or_else(|| {
            log::debug!("no format matches {options:?}, ignoring frame rate");
            formats.iter().filter(large_enough).max_by_key(closest)
        })
        .or_else(|| {
            log::debug!("no format matches {options:?}, ignoring resolution");
            formats
                .iter()
                .max_by_key(|fmt| (fmt.resolution.num_pixels(), Reverse(fmt.frame_interval)))
        })
        .copied()
}

fn negotiate_format(device: &Device, options: &WebcamOptions) -> anyhow::Result<(PixFormat, Fract)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        if format.pixelformat() == Pixelformat::JPEG || format.pixelformat() == Pixelformat::MJPG {
            pixel_format = Some(format.pixelformat());
            break;
        }
    }

    let Some(pixel_format) = pixel_format else {
        bail!("no supported pixel format found");
    };

    let formats = frame_formats(device, pixel_format)?;
    let Some(fmt) = choose_format(&formats, options) else {
        bail!("failed to negotiate a webcam format");
    };

    Ok((
        PixFormat::new(
            fmt.resolution.width(),
            fmt.resolution.height(),
            pixel_format,
        ),
        fmt.frame_interval,
    ))
}

/// A webcam yielding a stream of [`Image`]s.
pub struct Webcam {
    stream: ReadStream,
    resolution: Resolution,
    t_dequeue: Timer,
    t_decode: Timer,
}

impl Webcam {
    /// Opens the first supported webcam found.
    ///
    /// If a device could not be opened because access was denied and no other device was usable,
    /// [`CameraError::PermissionDenied`] is returned.
    ///
    /// This function can block for a significant amount of time while the webcam initializes (on
    /// the order of hundreds of milliseconds).
    pub fn open(options: WebcamOptions) -> Result<Self, CameraError> {
        if let Ok(name) = env::var(ENV_VAR_WEBCAM_NAME) {
            log::debug!("webcam override: `{ENV_VAR_WEBCAM_NAME}` is set to '{name}'");
        }

        let devices = linuxvideo::list().map_err(|e| CameraError::from_io(&e))?;
        let mut denied = None;
        for res in devices {
            match res {
                Ok(dev) => match Self::open_impl(dev, &options) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => {
                        log::debug!("{:#}", e);
                        if let CameraError::PermissionDenied(msg) = CameraError::from_anyhow(&e) {
                            denied = Some(msg);
                        }
                    }
                },
                Err(e) => {
                    log::warn!("{}", e);
                    if e.kind() == io::ErrorKind::PermissionDenied {
                        denied = Some(e.to_string());
                    }
                }
            }
        }

        Err(match denied {
            Some(msg) => CameraError::PermissionDenied(msg),
            None => CameraError::Unavailable("no supported webcam device found".into()),
        })
    }

    fn open_impl(dev: Device, options: &WebcamOptions) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        let cam_name_from_env = env::var(ENV_VAR_WEBCAM_NAME).ok();
        if let Some(name) = options.name.as_deref().or(cam_name_from_env.as_deref()) {
            if caps.card() != name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );

        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixfmt, fract) = negotiate_format(&dev, options)?;
        let capture = dev.video_capture(pixfmt)?;
        let format = capture.format();
        let resolution = Resolution::new(format.width(), format.height());
        let actual = capture.set_frame_interval(fract)?;

        log::info!(
            "opened {} ({}), {} @ {:.1}Hz",
            caps.card(),
            path.display(),
            resolution,
            1.0 / actual.as_f32(),
        );

        let stream = capture.into_stream(2)?;

        Ok(Some(Self {
            stream,
            resolution,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    /// Reads the next frame from the camera.
    ///
    /// If no frame is available, this method will block until one is.
    pub fn read(&mut self) -> anyhow::Result<Image> {
        let resolution = self.resolution;
        let dequeue_guard = self.t_dequeue.start();
        let t_decode = &self.t_decode;
        self.stream
            .dequeue(|buf| {
                drop(dequeue_guard);
                let image = match t_decode.time(|| Image::decode_jpeg(&buf)) {
                    Ok(image) => image,
                    Err(e) => {
                        // Webcams produce the occasional corrupted MJPG frame. A blank frame
                        // contains no hand, so it is cheaper than skipping ahead.
                        log::warn!("webcam decode error: {}", e);
                        Image::new(resolution.width(), resolution.height())
                    }
                };
                Ok(image)
            })
            .map_err(Into::into)
    }
}

impl FrameSource for Webcam {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn read(&mut self) -> anyhow::Result<Image> {
        Webcam::read(self)
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_dequeue, &self.t_decode]
    }
}
