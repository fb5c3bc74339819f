//! The VP8 boolean arithmetic decoder.
//!
//! This is the reference formulation of Section 7.3: `value` holds a
//! 16-bit decode window (the byte being consumed plus one byte of
//! lookahead), `range` stays in `[128, 255]` between reads, and
//! renormalization doubles both while counting consumed bits, fetching
//! the next byte after every eighth. One state machine serves the control
//! partition and every residual partition. Fetching past the end of a
//! partition yields zero bytes and raises the `eof` flag; the reader
//! itself never fails, which is what the format requires of truncated
//! residual partitions.

use crate::common::types::{Prob, TreeNode};

/// Decoder state, separable from the data slice so partitions can park
/// their progress between macroblock rows.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BoolState {
    /// Decode window: the active byte in the high half, lookahead below.
    value: u32,
    /// Coder range, in [128, 255] between reads.
    range: u32,
    /// Bits consumed from the current lookahead byte, 0..=7.
    bit_count: u32,
    /// Next byte to fetch from the partition.
    cursor: usize,
    /// Set once a fetch ran past the end; such bytes read as zero.
    eof: bool,
}

impl BoolState {
    /// Seed the two-byte decode window from the front of `data`.
    fn new(data: &[u8]) -> Self {
        let mut state = Self {
            value: 0,
            range: 255,
            bit_count: 0,
            cursor: 0,
            eof: false,
        };
        let hi = state.fetch_byte(data);
        let lo = state.fetch_byte(data);
        state.value = u32::from(hi) << 8 | u32::from(lo);
        state
    }

    #[inline]
    fn fetch_byte(&mut self, data: &[u8]) -> u8 {
        match data.get(self.cursor) {
            Some(&byte) => {
                self.cursor += 1;
                byte
            }
            None => {
                self.eof = true;
                0
            }
        }
    }

    /// Decode one bit with the given probability.
    #[inline(always)]
    fn next_bit(&mut self, data: &[u8], prob: u8) -> i32 {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        let big_split = split << 8;

        let bit = if self.value >= big_split {
            self.range -= split;
            self.value -= big_split;
            1
        } else {
            self.range = split;
            0
        };

        while self.range < 128 {
            self.value <<= 1;
            self.range <<= 1;
            self.bit_count += 1;
            if self.bit_count == 8 {
                self.bit_count = 0;
                self.value |= u32::from(self.fetch_byte(data));
            }
        }

        bit
    }
}

/// Shared decode operations over a boolean decoder state.
pub(crate) trait BitSource {
    /// Decode one bit with probability `prob` (0..=255); returns 0 or 1.
    fn get_bit(&mut self, prob: Prob) -> i32;

    /// True once reads have gone past the end of the data.
    fn is_eof(&self) -> bool;

    /// Decode one even-odds bit.
    #[inline(always)]
    fn read_flag(&mut self) -> bool {
        self.get_bit(128) != 0
    }

    /// Decode one bit with the given probability, as a bool.
    #[inline(always)]
    fn read_bool(&mut self, prob: Prob) -> bool {
        self.get_bit(prob) != 0
    }

    /// Read an n-bit unsigned literal, MSB first. `n` must be at most 24.
    #[inline]
    fn read_value(&mut self, n: u8) -> u32 {
        debug_assert!(n <= 24);
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | self.get_bit(128) as u32;
        }
        v
    }

    /// Read an n-bit magnitude followed by a sign bit.
    #[inline]
    fn read_signed(&mut self, n: u8) -> i32 {
        let value = self.read_value(n) as i32;
        if self.read_flag() {
            -value
        } else {
            value
        }
    }

    /// Read a presence flag, then a signed n-bit value if present.
    #[inline]
    fn read_optional_signed(&mut self, n: u8) -> i32 {
        if self.read_flag() {
            self.read_signed(n)
        } else {
            0
        }
    }

    /// Walk a probability tree to a leaf value.
    #[inline]
    fn read_with_tree<const N: usize>(&mut self, tree: &[TreeNode; N]) -> i8 {
        let mut node = tree[0];
        loop {
            let b = self.get_bit(node.prob) != 0;
            let i = if b { node.right } else { node.left };
            let Some(next) = tree.get(usize::from(i)) else {
                return TreeNode::value_from_branch(i);
            };
            node = *next;
        }
    }
}

/// Boolean decoder over the control partition; owns its state for the
/// lifetime of the frame.
pub(crate) struct HeaderReader<'a> {
    data: &'a [u8],
    state: BoolState,
}

impl<'a> HeaderReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            state: BoolState::new(data),
        }
    }
}

impl BitSource for HeaderReader<'_> {
    #[inline(always)]
    fn get_bit(&mut self, prob: Prob) -> i32 {
        self.state.next_bit(self.data, prob)
    }

    #[inline]
    fn is_eof(&self) -> bool {
        self.state.eof
    }
}

/// Boolean decoder resumed over one residual partition's bytes; progress
/// is parked in the owning [`Partitions`] when the reader is dropped.
pub(crate) struct PartitionReader<'a> {
    data: &'a [u8],
    state: &'a mut BoolState,
}

impl BitSource for PartitionReader<'_> {
    #[inline(always)]
    fn get_bit(&mut self, prob: Prob) -> i32 {
        self.state.next_bit(self.data, prob)
    }

    #[inline]
    fn is_eof(&self) -> bool {
        self.state.eof
    }
}

/// The residual partitions of a frame: disjoint spans over the residual
/// blob, each with its own parked decoder state. Partition `p` serves the
/// macroblock rows with `mb_y % num_partitions == p`.
pub(crate) struct Partitions<'a> {
    blob: &'a [u8],
    spans: [(usize, usize); 8],
    states: [BoolState; 8],
    count: usize,
}

impl<'a> Partitions<'a> {
    /// Split `blob` into `count` partitions using the declared byte
    /// lengths of all but the last partition, which absorbs the remainder.
    ///
    /// Lengths that overrun the blob are clamped; partitions after the
    /// overrun come out empty and read as zeros.
    pub fn split(blob: &'a [u8], declared: &[usize], count: usize) -> Self {
        debug_assert!((1..=8).contains(&count));
        debug_assert_eq!(declared.len() + 1, count);

        let mut spans = [(0usize, 0usize); 8];
        let mut offset = 0usize;
        for (i, &len) in declared.iter().enumerate() {
            let len = len.min(blob.len() - offset);
            spans[i] = (offset, len);
            offset += len;
        }
        spans[count - 1] = (offset, blob.len() - offset);

        let mut states = [BoolState::new(&[]); 8];
        for (state, &(start, len)) in states.iter_mut().zip(&spans).take(count) {
            *state = BoolState::new(&blob[start..start + len]);
        }

        Self {
            blob,
            spans,
            states,
            count,
        }
    }

    /// Number of partitions.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Byte span of partition `p` within the blob.
    #[cfg(test)]
    pub fn span(&self, p: usize) -> (usize, usize) {
        self.spans[p]
    }

    /// Resume the reader for partition `p`; its progress persists across
    /// calls because the state lives in this set.
    #[inline]
    pub fn reader(&mut self, p: usize) -> PartitionReader<'_> {
        let (start, len) = self.spans[p];
        PartitionReader {
            data: &self.blob[start..start + len],
            state: &mut self.states[p],
        }
    }
}
