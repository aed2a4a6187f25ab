//! Frame-level I/O over tokio streams.
//!
//! A connection splits its stream in two: a [`FrameReader`] owned by the read
//! side and a [`FrameWriter`] shared, behind the frame lock, by everything
//! that writes.

mod framed;

pub use framed::{FrameReader, FrameWriter};
