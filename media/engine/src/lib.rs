/*!
    Media engine layer.

    The ingest and egress adapters treat the media engine as an opaque
    capability: given a source, produce timed samples into two sinks, or given
    timed samples, produce an encoded output. This crate defines that
    capability and the pure configuration-to-topology mapping that selects an
    engine shape.

    # Capability

    - [`DecodeEngine`] and [`EncodeEngine`] - Asynchronous engines driven by state changes
    - [`SampleSink`] and [`DecodeSinks`] - Where decode engines deliver samples
    - [`EventBus`] and [`EngineEvent`] - Status messages posted from engine threads
    - [`EngineFactory`] and [`DefaultEngineFactory`] - Engine construction

    # Topology

    - [`resolve_source`] - Locator to readable source
    - [`DecodeTopology`] - Target layouts, sink depths, buffering
    - [`EncodeTopology`] - Destination, container, codec, bitrates

    # Backends

    - [`SyntheticDecoder`] - `testsrc://` test pattern generator
    - [`NullEncoder`] - `null://` discarding encoder
    - `ffmpeg::FfmpegDecoder` and `ffmpeg::FfmpegEncoder` - behind the `ffmpeg` feature
*/

mod bus;
mod engine;
mod factory;
mod locator;
mod null;
mod synthetic;
mod topology;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

pub use bus::{EngineEvent, EventBus};
pub use engine::{
    DecodeEngine, DecodeSinks, EncodeEngine, EngineFactory, EngineState, SampleSink,
};
pub use factory::DefaultEngineFactory;
pub use locator::{
    MEDIA_EXTENSIONS, ResolvedSource, SUPPORTED_SCHEMES, SourceKind, has_media_extension,
    resolve_source,
};
pub use null::{EncoderStats, NullEncoder};
pub use synthetic::{SyntheticDecoder, SyntheticParams, frame_index};
pub use topology::{
    AUDIO_SINK_CAPACITY, ContainerFormat, DEFAULT_UDP_PORT, DecodeTopology, Destination,
    EncodeRequest, EncodeTopology, NetworkBuffering, SinkSpec, TARGET_SAMPLE_RATE,
    VIDEO_SINK_CAPACITY,
};
