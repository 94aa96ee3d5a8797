/*!
    Egress side of the media bridge.

    Takes host frames and pushes them into an encode engine on a dedicated
    thread, so the host never waits on the encoder in realtime mode.

    # Types

    - [`EgressAdapter`] - Frame queue, egress thread and encode engine
    - [`EgressConfig`] - Destination, codecs, bitrates and realtime mode
    - [`EgressOptions`] - Parsed `-codec:v x264 -bitrate:v 5000` style option strings
    - [`SampleStamper`] - Host frame to engine sample conversion with synthesized timestamps
*/

mod adapter;
mod config;
mod convert;
mod options;

pub use adapter::EgressAdapter;
pub use config::{BUFFERED_QUEUE_CAPACITY, EgressConfig, REALTIME_QUEUE_CAPACITY};
pub use convert::SampleStamper;
pub use options::{EgressOptions, OptionsError};
