/*!
    Ingest side of the media bridge.

    Owns an asynchronous decode engine and turns its callback-driven output
    into two bounded queues the playback side can poll without blocking.

    # Types

    - [`SampleQueue`] - Bounded FIFO of samples with non-blocking push and pop
    - [`IngestAdapter`] - Engine owner with a monitor thread, seek, loop and EOF control
    - [`IngestConfig`] - Locator resolution and queue depth settings
*/

mod adapter;
mod config;
mod queue;

pub use adapter::IngestAdapter;
pub use config::IngestConfig;
pub use queue::SampleQueue;
