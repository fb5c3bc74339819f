//! Public decode surface: errors, frame inputs, the row sink and the
//! convenience entry points.

use thiserror::Error;

use super::vp8::Vp8Decoder;

/// Errors that can occur while decoding a VP8 intra frame.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The frame-tag version byte names a profile outside 0..=3.
    #[error("Unsupported VP8 profile: version {0}")]
    UnsupportedProfile(u8),

    /// A header field carries a semantically impossible value.
    #[error("Invalid frame header: {0}")]
    InvalidHeader(&'static str),

    /// The control partition ends before the headers it must contain.
    ///
    /// Residual partitions shorter than declared are clamped and read as
    /// zeros instead; only the control partition is fatal.
    #[error("Truncated bitstream")]
    TruncatedBitstream,

    /// A working buffer would exceed the configured [`Limits`].
    ///
    /// [`Limits`]: super::Limits
    #[error("Out of memory: decode limits exceeded")]
    OutOfMemory,

    /// A decoder bug: an internal table walk produced an impossible value.
    #[error("Internal invariant violated: {0}")]
    InternalInvariantViolated(&'static str),

    /// Decoding was cancelled via an [`enough::Stop`] token.
    #[error("Decoding cancelled: {0}")]
    Cancelled(enough::StopReason),
}

impl From<enough::StopReason> for DecodeError {
    fn from(reason: enough::StopReason) -> Self {
        Self::Cancelled(reason)
    }
}

/// The frame-tag fields the container has already parsed off the front of
/// the VP8 chunk.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// True for keyframes; inter frames are rejected.
    pub key_frame: bool,
    /// Whether the frame is intended for display.
    pub show_frame: bool,
    /// Profile version from the frame tag, 0..=3.
    pub version: u8,
    /// Byte size of the control (first) partition.
    pub partition_length: u32,
}

impl FrameHeader {
    /// A displayable keyframe header for the given profile version and
    /// control-partition size.
    pub fn keyframe(version: u8, partition_length: u32) -> Self {
        Self {
            key_frame: true,
            show_frame: true,
            version,
            partition_length,
        }
    }
}

/// Picture dimensions and scaling hints from the container's size fields.
#[derive(Debug, Clone, Copy)]
pub struct PictureInfo {
    /// Luma width in pixels (14 bits).
    pub width: u16,
    /// Luma height in pixels (14 bits).
    pub height: u16,
    /// Horizontal upscaling hint (2 bits); display-side only.
    pub x_scale: u8,
    /// Vertical upscaling hint (2 bits); display-side only.
    pub y_scale: u8,
}

impl PictureInfo {
    /// Picture info with no upscaling.
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            x_scale: 0,
            y_scale: 0,
        }
    }
}

/// Receives finished macroblock rows of YUV 4:2:0 output.
///
/// For each macroblock row the decoder delivers 16 luma rows and 8 chroma
/// rows as contiguous row-major planes, cropped to the picture's declared
/// width; the last macroblock row is cropped to the declared height. Rows
/// are final when delivered: the loop filter has already run, and no later
/// macroblock row will touch them again.
pub trait RowSink {
    /// Called once per macroblock row, in increasing `mb_y` order.
    ///
    /// `y` holds `16 * width` bytes (fewer on the last row), `u` and `v`
    /// hold `8 * ((width + 1) / 2)` bytes each (again fewer on the last
    /// row).
    fn on_row(&mut self, y: &[u8], u: &[u8], v: &[u8], mb_y: usize);

    /// Called once per macroblock row as soon as its residuals are known,
    /// before the row's samples arrive through [`on_row`](Self::on_row):
    /// one dither amplitude per macroblock column, 0 for none.
    ///
    /// Chroma dithering itself is output post-processing and left to the
    /// caller; the default implementation ignores the values.
    fn on_row_dither(&mut self, _mb_y: usize, _dither: &[u8]) {}
}

/// Decode a VP8 intra frame, sending reconstructed rows to `sink`.
///
/// `data` is the compressed frame after the container stripped the frame
/// tag, start code and dimensions: the control partition followed by the
/// residual partition blob.
pub fn decode_frame(
    data: &[u8],
    picture: &PictureInfo,
    header: &FrameHeader,
    sink: &mut dyn RowSink,
) -> Result<(), DecodeError> {
    Vp8Decoder::new(data, picture, header)?.decode(sink)
}

/// Like [`decode_frame`], with a cooperative cancellation token checked
/// between macroblock rows. Rows emitted before the stop remain valid.
pub fn decode_frame_with_stop(
    data: &[u8],
    picture: &PictureInfo,
    header: &FrameHeader,
    sink: &mut dyn RowSink,
    stop: Option<&dyn enough::Stop>,
) -> Result<(), DecodeError> {
    let mut decoder = Vp8Decoder::new(data, picture, header)?;
    decoder.set_stop(stop);
    decoder.decode(sink)
}
