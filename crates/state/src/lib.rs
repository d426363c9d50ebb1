pub mod playback;
pub mod source;
pub mod tuning;
