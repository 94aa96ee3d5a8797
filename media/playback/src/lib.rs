/*!
    Playback side of the media bridge.

    Sits between an [`media_ingest::IngestAdapter`] and a host that pulls one
    output field at a time. The host never blocks on the source: when nothing
    new is ready it gets the previous frame again.

    # Types

    - [`PlaybackScheduler`] - Scheduler thread, lookahead buffer and per-field pulls
    - [`FramePull`] - Whether a pull produced a new, held or underflow frame
    - [`PlayWindow`] and [`SeekRequest`] - Lock-free window and seek state
    - [`ProducerParams`] and [`ClipWindow`] - Producer parameter lines and their resolved window
    - [`HostCommand`] - `LOOP`, `IN`, `OUT`, `LENGTH` and `SEEK` host commands
    - [`PlaybackStatus`] - Serializable status snapshot
*/

mod command;
mod config;
mod frame;
mod lookahead;
mod params;
mod scheduler;
mod status;
mod window;

pub use command::{CommandError, HostCommand, SeekAnchor};
pub use config::PlaybackConfig;
pub use frame::FrameFactory;
pub use lookahead::{BufferedFrame, LookaheadBuffer};
pub use params::{ClipWindow, ProducerParams};
pub use scheduler::{FramePull, PlaybackScheduler};
pub use status::{PlaybackStatus, PlayheadState};
pub use window::{PlayWindow, SeekRequest};
