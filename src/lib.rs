//! VP8 intra-frame decoding for WebP still images
//!
//! Copyright (C) 2025 Imazen LLC
//!
//! This program is free software: you can redistribute it and/or modify
//! it under the terms of the GNU Affero General Public License as published
//! by the Free Software Foundation, either version 3 of the License, or
//! (at your option) any later version.
//!
//! For commercial licensing inquiries: support@imazen.io
//!
//! This crate decodes the lossy VP8 payload of a WebP still image: the
//! partitioned boolean-arithmetic bitstream of a single keyframe. The
//! container layer (RIFF parsing, chunk walking, dimension extraction) is
//! deliberately out of scope; callers hand over the frame bytes together
//! with the dimensions the container already parsed, and receive the
//! reconstructed YUV 4:2:0 planes one macroblock row at a time through a
//! [`RowSink`].
//!
//! ```rust,no_run
//! use vp8core::{decode_frame, FrameHeader, PictureInfo, RowSink};
//!
//! struct Collect(Vec<u8>);
//! impl RowSink for Collect {
//!     fn on_row(&mut self, y: &[u8], _u: &[u8], _v: &[u8], _mb_y: usize) {
//!         self.0.extend_from_slice(y);
//!     }
//! }
//!
//! let frame_bytes: &[u8] = &[]; // control partition + residual partitions
//! let picture = PictureInfo::new(160, 120);
//! let header = FrameHeader::keyframe(0, frame_bytes.len() as u32);
//! let mut sink = Collect(Vec::new());
//! decode_frame(frame_bytes, &picture, &header, &mut sink)?;
//! # Ok::<(), vp8core::DecodeError>(())
//! ```
//!
//! Decoding can be cancelled between macroblock rows with an
//! [`enough::Stop`] token via [`decode_frame_with_stop`]; rows emitted
//! before the stop remain valid.
//!
//! # Related Links
//! * [rfc-6386](http://tools.ietf.org/html/rfc6386) - The VP8 Data Format and Decoding Guide

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

extern crate alloc;

// Core modules
pub mod common;
pub mod decoder;

// Slice reader utility (used for the partition length table)
mod slice_reader;

pub use decoder::{
    decode_frame, decode_frame_with_stop, DecodeError, FrameHeader, Limits, PictureInfo, RowSink,
    Vp8Decoder,
};

// Re-export cooperative cancellation types
pub use enough::{Never as Unstoppable, Stop, StopReason};
