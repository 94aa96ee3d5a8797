/*!
    Shared types for the media bridge crates.

    This crate defines the vocabulary that crosses crate boundaries between the
    engine layer, the ingest and egress adapters, and the playback scheduler. It
    has no dependency on any media engine, so every other crate can depend on it
    without pulling in codec bindings.

    # Timing

    - [`Pts`] and [`MediaDuration`] - Timestamps and durations in fixed ticks
    - [`Rational`] - Frame rates and time bases

    # Media Data

    - [`MediaSample`] - Reference-counted handle to one timed unit of media
    - [`HostFrame`] - Video frame in the form the host pulls and pushes
    - [`SampleCaps`] - What the payload of a sample contains
    - [`PixelFormat`], [`SampleFormat`], [`ChannelLayout`] - Payload layouts
    - [`VideoCodec`], [`AudioCodec`] - Encoder selections

    # Output Format

    - [`VideoFormat`] - Host output format (size, rate, field count)
    - [`Field`] - Which half of an interlaced frame is requested
    - [`ScaleMode`] and [`FrameGeometry`] - Placement of a source inside the output

    # Pipeline State

    - [`StreamMetadata`] - Geometry and duration read back from a source
    - [`PipelineState`] and [`AtomicPipelineState`] - Adapter lifecycle
    - [`EngineError`] and [`Result`] - Error taxonomy

    # Diagnostics

    - [`Diagnostics`] - Write-only diagnostics channel
    - [`Debounce`] - Rate limiting for repeated warnings
    - [`Clock`] and [`WallClock`] - Pacing clocks
*/

mod clock;
mod codec;
mod diagnostics;
mod error;
mod format;
mod frame;
mod rational;
mod sample;
mod state;
mod stream;
mod timestamp;
mod video_format;

pub use clock::{Clock, WallClock};
pub use codec::{AudioCodec, VideoCodec};
pub use diagnostics::{
    Debounce, Diagnostics, RecordingDiagnostics, Severity, SharedDiagnostics, TracingDiagnostics,
};
pub use error::{EngineError, Result};
pub use format::{ChannelLayout, PixelFormat, SampleFormat};
pub use frame::HostFrame;
pub use rational::Rational;
pub use sample::{MediaSample, SampleCaps, SampleKind, WeakSample};
pub use state::{AtomicPipelineState, PipelineState};
pub use stream::{AudioStreamInfo, StreamMetadata, VideoStreamInfo};
pub use timestamp::{MediaDuration, Pts};
pub use video_format::{Field, FrameGeometry, ScaleMode, VideoFormat};
