//! Real-time media path for a Bluetooth A2DP/HFP stack.
//!
//! The SBC codec itself stays outside: callers plug in a
//! [`audio::FrameEncoder`] and [`audio::FrameDecoder`]. This crate owns
//! everything around it, from the frame queues and tick scheduling to
//! bitpool selection, rate conversion and mSBC loss concealment.
//!
//! ```no_run
//! use btmedia::configs::Config;
//! use btmedia::media::{MediaIo, MediaTaskScheduler};
//!
//! # fn io() -> MediaIo { unimplemented!() }
//! let config = Config::load()?;
//! btmedia::common::logger::init(config.logging.as_ref()).ok();
//!
//! let scheduler = MediaTaskScheduler::new(config.media);
//! scheduler.start(io())?;
//! // ...
//! scheduler.stop()?;
//! # Ok::<(), btmedia::common::MediaError>(())
//! ```

pub mod audio;
pub mod common;
pub mod configs;
pub mod media;

pub use common::{MediaError, MediaResult};
pub use media::{MediaIo, MediaTaskScheduler};
