use std::env::{self, VarError};

use anyhow::{anyhow, bail};
use image::ImageBuffer;
use once_cell::sync::Lazy;

use super::Image;

const ENV_VAR_JPEG_BACKEND: &str = "MUDRA_JPEG_BACKEND";

/// Webcams hand us Motion JPEG, and there is more than one way to decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JpegBackend {
    /// Uses the `image` crate's `jpeg-decoder` backend, robust but slow.
    JpegDecoder,
    /// Uses the `zune-jpeg` crate, a pure-Rust JPEG decoder somewhat faster than `jpeg-decoder`.
    ZuneJpeg,
}

const DEFAULT_BACKEND: JpegBackend = JpegBackend::ZuneJpeg;

fn parse_backend(value: Result<String, VarError>) -> Result<JpegBackend, String> {
    match value.as_deref() {
        Ok("jpeg-decoder") => Ok(JpegBackend::JpegDecoder),
        Ok("zune-jpeg") => Ok(JpegBackend::ZuneJpeg),
        Ok(invalid) => Err(format!(
            "invalid value set for `{ENV_VAR_JPEG_BACKEND}` variable: '{invalid}'"
        )),
        Err(VarError::NotPresent) => Ok(DEFAULT_BACKEND),
        Err(VarError::NotUnicode(s)) => Err(format!(
            "invalid value set for `{ENV_VAR_JPEG_BACKEND}` variable: {}",
            s.to_string_lossy()
        )),
    }
}

static JPEG_BACKEND: Lazy<Result<JpegBackend, String>> = Lazy::new(|| {
    let backend = parse_backend(env::var(ENV_VAR_JPEG_BACKEND));
    log::debug!("using JPEG decode backend: {:?}", backend);
    backend
});

pub(super) fn decode_jpeg(data: &[u8]) -> anyhow::Result<Image> {
    let backend = match &*JPEG_BACKEND {
        Ok(backend) => *backend,
        Err(msg) => bail!("{msg}"),
    };

    let buf = match backend {
        JpegBackend::JpegDecoder => {
            image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgba8()
        }
        JpegBackend::ZuneJpeg => {
            use zune_jpeg::zune_core::colorspace::ColorSpace;
            use zune_jpeg::zune_core::options::DecoderOptions;

            let mut decomp = zune_jpeg::JpegDecoder::new_with_options(
                DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGBA),
                data,
            );
            decomp.decode_headers()?;
            match decomp.get_output_colorspace() {
                Some(ColorSpace::RGBA) => {}
                other => bail!("unsupported colorspace {other:?} (expected RGBA)"),
            }

            let size = decomp
                .output_buffer_size()
                .ok_or_else(|| anyhow!("JPEG headers not decoded"))?;
            let mut buf = vec![0; size];
            decomp.decode_into(&mut buf)?;
            let (width, height) = decomp
                .dimensions()
                .ok_or_else(|| anyhow!("JPEG headers not decoded"))?;
            ImageBuffer::from_raw(width.into(), height.into(), buf)
                .ok_or_else(|| anyhow!("decoded JPEG buffer does not match its dimensions"))?
        }
    };

    Ok(Image { buf })
}
