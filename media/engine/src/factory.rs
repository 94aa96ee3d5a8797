use std::sync::Arc;

use media_types::Result;

#[cfg(not(feature = "ffmpeg"))]
use crate::engine::no_engine_for;
use crate::{
    DecodeEngine, DecodeSinks, DecodeTopology, Destination, EncodeEngine, EncodeTopology,
    EncoderStats, EngineFactory, NullEncoder, SourceKind, SyntheticDecoder,
};

/**
    Factory that picks an engine backend from the topology.

    - `testsrc://` sources open the built-in test pattern engine
    - `null://` destinations open the built-in discarding encoder
    - everything else needs the `ffmpeg` feature
*/
#[derive(Clone, Debug, Default)]
pub struct DefaultEngineFactory {
    encoder_stats: Option<Arc<EncoderStats>>,
}

impl DefaultEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Share `stats` with every null encoder this factory opens.
    */
    pub fn with_encoder_stats(mut self, stats: Arc<EncoderStats>) -> Self {
        self.encoder_stats = Some(stats);
        self
    }

    pub fn shared() -> Arc<dyn EngineFactory> {
        Arc::new(Self::new())
    }
}

impl EngineFactory for DefaultEngineFactory {
    fn open_decoder(
        &self,
        topology: &DecodeTopology,
        sinks: DecodeSinks,
    ) -> Result<Arc<dyn DecodeEngine>> {
        match &topology.source.kind {
            SourceKind::Synthetic => Ok(Arc::new(SyntheticDecoder::open(topology, sinks)?)),
            #[cfg(feature = "ffmpeg")]
            _ => Ok(Arc::new(crate::ffmpeg::FfmpegDecoder::open(topology, sinks)?)),
            #[cfg(not(feature = "ffmpeg"))]
            _ => {
                let _ = sinks;
                Err(no_engine_for(&topology.source.locator))
            }
        }
    }

    fn open_encoder(&self, topology: &EncodeTopology) -> Result<Arc<dyn EncodeEngine>> {
        match &topology.destination {
            Destination::Null(uri) => {
                let stats = self.encoder_stats.clone().unwrap_or_default();
                Ok(Arc::new(NullEncoder::open(topology, uri, stats)?))
            }
            #[cfg(feature = "ffmpeg")]
            _ => Ok(Arc::new(crate::ffmpeg::FfmpegEncoder::open(topology)?)),
            #[cfg(not(feature = "ffmpeg"))]
            other => Err(no_engine_for(&other.to_string())),
        }
    }
}
