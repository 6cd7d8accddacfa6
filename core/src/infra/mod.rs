//! Infrastructure: image codec boundary and shared-folder I/O

pub mod codec;
pub mod shared_fs;
