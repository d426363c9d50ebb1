pub mod cache;
pub mod error;
pub mod frame;
pub mod mocap;
pub mod probe;
pub mod reader;
pub mod video;

pub use error::MediaError;
pub use frame::Frame;
pub use reader::FrameReader;
