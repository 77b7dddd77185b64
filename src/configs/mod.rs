pub mod base;
pub mod logging;
pub mod media;

pub use base::*;
pub use logging::*;
pub use media::*;
