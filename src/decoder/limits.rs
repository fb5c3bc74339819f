//! Configurable limits for decoding.
//!
//! These protect against malformed inputs that would otherwise make the
//! decoder allocate excessive working memory.

use super::api::DecodeError;

/// Caps on the resources a decode may claim. `None` means unlimited.
///
/// ```rust
/// use vp8core::Limits;
///
/// let limits = Limits::default().max_dimensions(4096, 4096);
/// let unlimited = Limits::none();
/// ```
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Limits {
    /// Maximum image width in pixels.
    pub max_width: Option<u32>,

    /// Maximum image height in pixels.
    pub max_height: Option<u32>,

    /// Maximum total pixels (width * height).
    pub max_total_pixels: Option<u64>,

    /// Maximum working memory in bytes during decoding.
    pub max_memory: Option<u64>,
}

impl Default for Limits {
    /// Defaults follow the format's own ceiling: 16384 x 16384, and a
    /// working-memory cap generous enough for any conforming frame.
    fn default() -> Self {
        Self {
            max_width: Some(16384),
            max_height: Some(16384),
            max_total_pixels: Some(300_000_000),
            max_memory: Some(256 * 1024 * 1024),
        }
    }
}

impl Limits {
    /// Limits with no restrictions. Only for trusted inputs.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_width: None,
            max_height: None,
            max_total_pixels: None,
            max_memory: None,
        }
    }

    /// Set maximum dimensions.
    #[must_use]
    pub fn max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.max_width = Some(width);
        self.max_height = Some(height);
        self
    }

    /// Set maximum total pixels.
    #[must_use]
    pub fn max_total_pixels(mut self, pixels: u64) -> Self {
        self.max_total_pixels = Some(pixels);
        self
    }

    /// Set the working-memory cap in bytes.
    #[must_use]
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Check frame dimensions against the caps.
    pub(crate) fn check_dimensions(&self, width: u32, height: u32) -> Result<(), DecodeError> {
        if let Some(max_w) = self.max_width {
            if width > max_w {
                return Err(DecodeError::OutOfMemory);
            }
        }
        if let Some(max_h) = self.max_height {
            if height > max_h {
                return Err(DecodeError::OutOfMemory);
            }
        }
        if let Some(max_pixels) = self.max_total_pixels {
            if u64::from(width) * u64::from(height) > max_pixels {
                return Err(DecodeError::OutOfMemory);
            }
        }
        Ok(())
    }

    /// Check a working-memory estimate against the cap.
    pub(crate) fn check_memory(&self, bytes: u64) -> Result<(), DecodeError> {
        if let Some(max) = self.max_memory {
            if bytes > max {
                return Err(DecodeError::OutOfMemory);
            }
        }
        Ok(())
    }
}
