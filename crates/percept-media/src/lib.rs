//! Device capture and playback for the perception pipeline.
//!
//! The capture side runs a dedicated microphone thread feeding a lock-free
//! ring, an async framer that cuts the stream into fixed uplink frames, and
//! a 1 Hz video poller. The playback side schedules decoded response audio
//! gaplessly on an output sink. [`MediaDevices`] is the seam between real
//! hardware and the simulated devices used in tests and `--simulate` runs.

pub mod capture;
pub mod devices;
pub mod frame_reader;
pub mod framer;
pub mod output;
pub mod playback;
pub mod resampler;
pub mod ring_buffer;
pub mod sim;
pub mod video;

pub use capture::*;
pub use devices::*;
pub use frame_reader::*;
pub use framer::*;
pub use output::*;
pub use playback::*;
pub use resampler::*;
pub use ring_buffer::*;
pub use sim::*;
pub use video::*;
