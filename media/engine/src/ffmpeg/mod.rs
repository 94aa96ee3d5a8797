/*!
    FFmpeg-backed decode and encode engines.

    Each engine runs FFmpeg on a dedicated thread and talks to the rest of the
    crate through the same sinks, bus and state changes as the built-in engines.
*/

mod decode;
mod encode;

pub use decode::FfmpegDecoder;
pub use encode::FfmpegEncoder;

use ffmpeg_next::{ffi, filter, format};

use media_types::{EngineError, Rational};

pub(crate) fn init() -> Result<(), EngineError> {
    ffmpeg_next::init().map_err(|e| EngineError::init_failed(format!("ffmpeg init: {e}")))
}

pub(crate) fn runtime(context: &str, error: ffmpeg_next::Error) -> EngineError {
    EngineError::runtime(format!("{context}: {error}"))
}

pub(crate) fn to_rational(rational: ffmpeg_next::Rational) -> Option<Rational> {
    (rational.denominator() != 0 && rational.numerator() > 0)
        .then(|| Rational::new(rational.numerator(), rational.denominator()))
}

pub(crate) fn from_rational(rational: Rational) -> ffmpeg_next::Rational {
    ffmpeg_next::Rational::new(rational.num, rational.den)
}

/**
    Build a single-input, single-output video filter graph around `spec`.

    The graph's endpoints are named `in` and `out`.
*/
pub(crate) fn build_filter(
    width: u32,
    height: u32,
    pixel: format::Pixel,
    time_base: Rational,
    spec: &str,
) -> Result<filter::Graph, ffmpeg_next::Error> {
    let mut graph = filter::Graph::new();
    let pixel: ffi::AVPixelFormat = pixel.into();
    let args = format!(
        "video_size={width}x{height}:pix_fmt={}:time_base={}/{}:pixel_aspect=1/1",
        pixel as i32, time_base.num, time_base.den,
    );
    let buffer = filter::find("buffer").ok_or(ffmpeg_next::Error::FilterNotFound)?;
    let buffersink = filter::find("buffersink").ok_or(ffmpeg_next::Error::FilterNotFound)?;
    graph.add(&buffer, "in", &args)?;
    graph.add(&buffersink, "out", "")?;
    graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
    graph.validate()?;
    Ok(graph)
}
