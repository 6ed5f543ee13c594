//! Services shared by the library and the command-line front end

pub mod format;

pub use format::{OutputFormatHandler, DEFAULT_JPEG_QUALITY};
