//! IP webcam client for servers offering HTTP MJPG streams.

use std::{
    io::{self, prelude::*, BufRead, BufReader},
    net::{SocketAddr, TcpStream},
};

use anyhow::bail;

use crate::image::{Image, Resolution};
use crate::timer::Timer;

use super::FrameSource;

/// A `multipart/x-mixed-replace` JPEG stream, as served by phone webcam apps.
pub struct HttpStream {
    stream: BufReader<TcpStream>,
    boundary: String,
    resolution: Resolution,
    /// The frame read while connecting, handed out by the first [`HttpStream::read`].
    pending: Option<Image>,
    t_decode: Timer,
}

impl HttpStream {
    /// Connects to the stream at `http://{addr}{path}` and reads the first frame.
    ///
    /// The stream's [`resolution`][FrameSource::resolution] is only known after the first frame
    /// has been decoded, so this blocks until it arrives.
    pub fn connect(addr: SocketAddr, path: &str) -> anyhow::Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        write!(stream, "GET {path} HTTP/1.1\r\nHost: {}\r\n\r\n", addr.ip())?;

        let mut stream = BufReader::new(stream);
        let mut line = String::new();
        stream.read_line(&mut line)?;
        log::trace!("response: {}", line.trim());
        if !line.starts_with("HTTP/1.1 200") && !line.starts_with("HTTP/1.0 200") {
            bail!("received unexpected response: {}", line.trim());
        }

        let mut boundary = None;
        loop {
            line.clear();
            if stream.read_line(&mut line)? == 0 || line.trim().is_empty() {
                break;
            }
            log::trace!("response header: {}", line.trim());
            let Some((name, value)) = line.split_once(':') else {
                bail!("malformed HTTP response");
            };
            if name.eq_ignore_ascii_case("Content-Type") {
                boundary = Some(parse_boundary(value)?);
                break;
            }
        }

        let Some(boundary) = boundary else {
            bail!("missing `Content-Type` header");
        };

        let mut this = Self {
            stream,
            boundary,
            resolution: Resolution::new(0, 0),
            pending: None,
            t_decode: Timer::new("decode"),
        };
        this.read_until_boundary()?;
        let first = this.read_frame()?;
        log::info!("connected to MJPG stream at {addr}{path}, {}", first.resolution());
        this.pending = Some(first);
        Ok(this)
    }

    fn read_frame(&mut self) -> anyhow::Result<Image> {
        let mut length = None;
        let mut line = String::new();
        loop {
            line.clear();
            if self.stream.read_line(&mut line)? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            if line == "\r\n" {
                break;
            }
            log::trace!("multipart header: {}", line.trim());
            let Some((key, value)) = line.split_once(':') else {
                bail!("malformed multipart header");
            };
            if key.eq_ignore_ascii_case("Content-Type") && value.trim() != "image/jpeg" {
                bail!(
                    "unexpected Content-Type: expected image/jpeg, got {}",
                    value.trim()
                );
            }
            if key.eq_ignore_ascii_case("Content-Length") {
                length = Some(value.trim().parse::<u32>()?);
            }
        }

        let Some(length) = length else {
            bail!("missing Content-Length header");
        };
        let mut buf = vec![0; length as usize];
        self.stream.read_exact(&mut buf)?;
        self.read_until_boundary()?;

        let image = self.t_decode.time(|| Image::decode_jpeg(&buf))?;
        self.resolution = image.resolution();
        Ok(image)
    }

    fn read_until_boundary(&mut self) -> io::Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.stream.read_line(&mut line)? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            if line.trim() == self.boundary {
                return Ok(());
            }
        }
    }
}

/// Extracts the part boundary from a `multipart/x-mixed-replace` Content-Type value.
fn parse_boundary(content_type: &str) -> anyhow::Result<String> {
    let Some((mime, params)) = content_type.trim().split_once(';') else {
        bail!("malformed Content-Type header");
    };
    if mime.trim() != "multipart/x-mixed-replace" {
        bail!("malformed Content-Type header: unexpected mime type {mime}");
    }
    let Some(bnd) = params.trim().strip_prefix("boundary=") else {
        bail!("malformed Content-Type header (missing boundary)");
    };
    let bnd = bnd.trim_matches('"');
    // Some servers include the `--` in the boundary parameter already.
    Ok(if bnd.starts_with("--") {
        bnd.to_string()
    } else {
        format!("--{bnd}")
    })
}

impl FrameSource for HttpStream {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn read(&mut self) -> anyhow::Result<Image> {
        match self.pending.take() {
            Some(image) => Ok(image),
            None => self.read_frame(),
        }
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_decode]
    }
}
