pub mod annotations;
pub mod config;
pub mod playback;
pub mod render;
pub mod session;
pub mod source;
pub mod stream;
pub mod timeline;
