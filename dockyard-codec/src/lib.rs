//! # dockyard-codec
//!
//! Codec for the engine's multiplexed output streams.
//!
//! This crate provides:
//! - `MuxCodec` - Frame encoder/decoder for interleaved stdout/stderr
//! - `demux` / `copy_output` - Copy a byte stream into output sinks
//!
//! ## Frame Format
//!
//! ```text
//! +----------+------------+----------------+------------------+
//! | Selector | Reserved   | Length (4 BE)  | Payload (N bytes)|
//! | (1 byte) | (3 bytes)  |                |                  |
//! +----------+------------+----------------+------------------+
//! ```
//!
//! The selector names the stream (0 stdin, 1 stdout, 2 stderr). The length
//! is a 32-bit big-endian integer specifying the payload size.

mod demux;
mod frame;

pub use demux::{Sink, copy_output, demux};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, Frame, HEADER_LEN, MuxCodec, StdStream};
