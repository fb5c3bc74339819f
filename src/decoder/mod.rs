//! VP8 intra-frame decoder implementation

mod api;
mod bit_reader;
mod limits;
mod loop_filter;
pub(crate) mod vp8;

pub use api::{
    decode_frame, decode_frame_with_stop, DecodeError, FrameHeader, PictureInfo, RowSink,
};
pub use limits::Limits;
pub use vp8::Vp8Decoder;
