//! mpegfs - a FUSE filesystem that transcodes video to MPEG-1 at read time
//!
//! This library crate exposes the filesystem handlers and the FUSE binding
//! for the binary and for integration testing.

pub mod fs;
pub mod fuse;
