//! The VP8 keyframe decoder.
//!
//! Header parsing fills the frame state from the control partition; the
//! row pipeline then walks macroblocks in raster order, one row at a time:
//! intra modes from the control partition, residuals from the row's
//! residual partition, prediction plus inverse transform into a row cache,
//! the in-loop filter over the cache, and finally emission of finished
//! rows to the caller's sink.
//!
//! Residual partition `p` carries the rows with `mb_y % num_partitions ==
//! p`, so each partition's decoder state is parked between rows and
//! resumed when its next row comes up.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use super::api::{DecodeError, FrameHeader, PictureInfo, RowSink};
use super::bit_reader::{BitSource, HeaderReader, PartitionReader, Partitions};
use super::limits::Limits;
use super::loop_filter;
use crate::common::prediction::{
    add_residue, predict_bdcpred, predict_bhdpred, predict_bhepred, predict_bhupred,
    predict_bldpred, predict_brdpred, predict_bvepred, predict_bvlpred, predict_bvrpred,
    predict_dcpred, predict_hpred, predict_tmpred, predict_vpred, set_chroma_border,
    set_luma_border, CHROMA_BLOCK_SIZE, CHROMA_STRIDE, LUMA_BLOCK_SIZE, LUMA_STRIDE,
};
use crate::common::transform;
use crate::common::types::{
    ChromaMode, IntraMode, LumaMode, Plane, Prob, Segment, TokenProbTreeNodes, TreeNode,
    AC_QUANT, COEFF_BANDS, COEFF_PROB_NODES, COEFF_UPDATE_PROBS, DCT_CAT_BASE, DC_QUANT,
    KEYFRAME_BPRED_MODE_NODES, KEYFRAME_UV_MODE_NODES, KEYFRAME_YMODE_NODES, MAX_SEGMENTS,
    NUM_DCT_TOKENS, PROB_DCT_CAT, QUANT_TO_DITHER_AMP, SEGMENT_TREE_NODE_DEFAULTS, ZIGZAG,
};
use crate::slice_reader::SliceReader;

/// Position-indexed probability table for coefficient reading, indexed by
/// `[plane][coeff_position][context]` instead of `[plane][band][context]`.
/// This removes the band lookup from the hot path; position 16 is a
/// sentinel (band 7) so the `n + 1` lookahead never runs off the table.
type TokenProbsByPosition = [[[[TreeNode; NUM_DCT_TOKENS - 1]; 3]; 17]; 4];

/// Everything decoded for one macroblock of the current row: modes from
/// the control partition, dequantized coefficients from the residual
/// partition, and the nonzero bookkeeping the filter and dither need.
#[derive(Clone)]
struct MacroBlockData {
    segment_id: u8,
    skip: bool,
    luma_mode: LumaMode,
    chroma_mode: ChromaMode,
    bpred: [IntraMode; 16],
    /// 24 sub-blocks of 16 coefficients: Y 0..16, U 16..20, V 20..24.
    coeffs: [i32; 384],
    /// 2-bit nonzero codes per luma sub-block, block 0 in the low bits.
    nz_y: u32,
    /// 2-bit nonzero codes per chroma sub-block, U then V.
    nz_uv: u16,
    /// Dither amplitude for this macroblock, reported to the sink per row.
    dither: u8,
}

impl Default for MacroBlockData {
    fn default() -> Self {
        Self {
            segment_id: 0,
            skip: false,
            luma_mode: LumaMode::default(),
            chroma_mode: ChromaMode::default(),
            bpred: [IntraMode::default(); 16],
            coeffs: [0; 384],
            nz_y: 0,
            nz_uv: 0,
            dither: 0,
        }
    }
}

/// Neighbor context carried along the row scan. The `top` array holds one
/// of these per macroblock column (bottom edge of the row above); `left`
/// is a separate field of the decoder, never element 0 of `top`, so the
/// first column cannot alias it.
#[derive(Clone, Copy, Default)]
struct NeighborContext {
    /// Bottom row of sub-block modes, for the BPRED mode contexts.
    bpred: [IntraMode; 4],
    /// Nonzero contexts, laid out y2, y, y, y, y, u, u, v, v.
    nz: [u8; 9],
}

/// Regroups the filter-delayed cache output into whole macroblock rows.
///
/// The loop filter retouches up to `extra` pixel rows above each row's top
/// edge, so the cache releases rows with a lag: short on the first row,
/// long on the last. This buffer collects released rows (already cropped
/// to the picture width) and hands the sink exact 16-row groups whose
/// pixels can no longer change.
struct RowAccumulator {
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
    width: usize,
    uv_width: usize,
    /// Luma rows still to accept before the picture height is reached.
    y_rows_left: usize,
    uv_rows_left: usize,
    next_mb_y: usize,
}

impl RowAccumulator {
    fn new(width: usize, height: usize) -> Self {
        Self {
            y: Vec::new(),
            u: Vec::new(),
            v: Vec::new(),
            width,
            uv_width: width.div_ceil(2),
            y_rows_left: height,
            uv_rows_left: height.div_ceil(2),
            next_mb_y: 0,
        }
    }

    fn push_y_row(&mut self, row: &[u8]) {
        if self.y_rows_left > 0 {
            self.y.extend_from_slice(&row[..self.width]);
            self.y_rows_left -= 1;
        }
    }

    fn push_uv_row(&mut self, u_row: &[u8], v_row: &[u8]) {
        if self.uv_rows_left > 0 {
            self.u.extend_from_slice(&u_row[..self.uv_width]);
            self.v.extend_from_slice(&v_row[..self.uv_width]);
            self.uv_rows_left -= 1;
        }
    }

    /// Emit every complete 16-row group gathered so far.
    fn flush(&mut self, sink: &mut dyn RowSink) {
        while self.y.len() >= 16 * self.width && self.u.len() >= 8 * self.uv_width {
            sink.on_row(
                &self.y[..16 * self.width],
                &self.u[..8 * self.uv_width],
                &self.v[..8 * self.uv_width],
                self.next_mb_y,
            );
            self.y.drain(..16 * self.width);
            self.u.drain(..8 * self.uv_width);
            self.v.drain(..8 * self.uv_width);
            self.next_mb_y += 1;
        }
    }

    /// Emit the height-cropped tail after the last macroblock row.
    fn finish(&mut self, sink: &mut dyn RowSink) {
        self.flush(sink);
        if !self.y.is_empty() || !self.u.is_empty() {
            let y = mem::take(&mut self.y);
            let u = mem::take(&mut self.u);
            let v = mem::take(&mut self.v);
            sink.on_row(&y, &u, &v, self.next_mb_y);
            self.next_mb_y += 1;
        }
    }
}

/// Read one 4x4 coefficient scan (Section 13.3), dequantize, and write
/// the values into `output` in natural order. Returns the scan position
/// one past the last decoded coefficient (`first` if the block is empty).
///
/// The probability table is position-indexed; `ctx` is the 0..=2 nonzero
/// context from the neighbors. Truncated partitions read as zeros here,
/// by construction of the boolean decoder.
fn read_coefficients(
    reader: &mut PartitionReader<'_>,
    output: &mut [i32; 16],
    probs: &[[[TreeNode; NUM_DCT_TOKENS - 1]; 3]; 17],
    first: usize,
    ctx: usize,
    dcq: i16,
    acq: i16,
) -> usize {
    debug_assert!(ctx <= 2);
    debug_assert!(first < 16);

    let mut n = first;
    let mut prob = &probs[n][ctx];

    while n < 16 {
        if reader.get_bit(prob[0].prob) == 0 {
            break; // end of block
        }

        // Zero runs: consume DCT_0 tokens, advancing the band position.
        while reader.get_bit(prob[1].prob) == 0 {
            n += 1;
            if n >= 16 {
                return 16;
            }
            prob = &probs[n][0];
        }

        let v: i32;
        let next_ctx: usize;

        if reader.get_bit(prob[2].prob) == 0 {
            v = 1;
            next_ctx = 1;
        } else {
            if reader.get_bit(prob[3].prob) == 0 {
                if reader.get_bit(prob[4].prob) == 0 {
                    v = 2;
                } else {
                    v = 3 + reader.get_bit(prob[5].prob);
                }
            } else {
                if reader.get_bit(prob[6].prob) == 0 {
                    if reader.get_bit(prob[7].prob) == 0 {
                        // cat1: 5..6
                        v = i32::from(DCT_CAT_BASE[0]) + reader.get_bit(PROB_DCT_CAT[0][0]);
                    } else {
                        // cat2: 7..10
                        v = i32::from(DCT_CAT_BASE[1])
                            + 2 * reader.get_bit(PROB_DCT_CAT[1][0])
                            + reader.get_bit(PROB_DCT_CAT[1][1]);
                    }
                } else {
                    // cat3..cat6, selected by two more bits
                    let bit1 = reader.get_bit(prob[8].prob);
                    let bit0 = reader.get_bit(prob[9 + bit1 as usize].prob);
                    let cat = (2 * bit1 + bit0) as usize;

                    let mut extra = 0i32;
                    for &p in PROB_DCT_CAT[2 + cat].iter() {
                        if p == 0 {
                            break;
                        }
                        extra = extra + extra + reader.get_bit(p);
                    }
                    v = i32::from(DCT_CAT_BASE[2 + cat]) + extra;
                }
            }
            next_ctx = 2;
        }

        let signed_v = if reader.get_bit(128) != 0 { -v } else { v };

        let q = if n > 0 { acq } else { dcq };
        output[ZIGZAG[n] as usize] = signed_v * i32::from(q);

        n += 1;
        if n < 16 {
            prob = &probs[n][next_ctx];
        }
    }

    n
}

/// The 2-bit nonzero code for one sub-block: 3 = has AC, 2 = a lone DC,
/// else whether the WHT handed the block a nonzero DC.
fn nz_code(scan_end: usize, first: usize, dc_nz: bool) -> u32 {
    if scan_end <= first {
        u32::from(dc_nz)
    } else if scan_end > 1 {
        3
    } else {
        2
    }
}

/// The five frame-level quantizer index deltas.
#[derive(Clone, Copy, Default)]
struct QuantDeltas {
    ydc: i32,
    y2dc: i32,
    y2ac: i32,
    uvdc: i32,
    uvac: i32,
}

/// Fill one segment's dequantization factors from its base quantizer
/// index and the frame deltas (Section 14.1). Indices clamp to 0..=127,
/// the chroma DC index to 0..=117 (a table value of 132), and the Y2 AC
/// factor is scaled by 155/100 with a floor of 8.
fn dequant_factors(seg: &mut Segment, base: i32, deltas: &QuantDeltas) {
    fn dc_quant(index: i32) -> i16 {
        DC_QUANT[index.clamp(0, 127) as usize]
    }

    fn ac_quant(index: i32) -> i16 {
        AC_QUANT[index.clamp(0, 127) as usize]
    }

    seg.ydc = dc_quant(base + deltas.ydc);
    seg.yac = ac_quant(base);

    seg.y2dc = dc_quant(base + deltas.y2dc) * 2;
    // The intermediate product can exceed i16, hence i32 math.
    seg.y2ac = ((i32::from(ac_quant(base + deltas.y2ac)) * 155 / 100) as i16).max(8);

    seg.uvdc = DC_QUANT[(base + deltas.uvdc).clamp(0, 117) as usize];
    seg.uvac = ac_quant(base + deltas.uvac);

    // Dither amplitude falls off with the chroma quantizer; coarse
    // quantizers past the table dither not at all.
    seg.uv_quant = (base + deltas.uvac).clamp(0, 127) as u8;
    seg.dither = QUANT_TO_DITHER_AMP
        .get(usize::from(seg.uv_quant))
        .copied()
        .unwrap_or(0);
}

/// Inverse-transform one sub-block and add it onto the prediction.
fn idct_add(ws: &mut [u8], block: &mut [i32; 16], y0: usize, x0: usize, stride: usize) {
    if block[1..].iter().all(|&c| c == 0) {
        transform::idct4x4_dc(block);
    } else {
        transform::idct4x4(block);
    }
    add_residue(ws, block, y0, x0, stride);
}

/// VP8 keyframe decoder for a single frame.
///
/// Construct with [`Vp8Decoder::new`], optionally configure
/// [`Limits`]/cancellation, then call [`Vp8Decoder::decode`] once.
pub struct Vp8Decoder<'a> {
    control: HeaderReader<'a>,
    residual: &'a [u8],

    version: u8,
    width: u16,
    height: u16,
    mb_width: usize,
    mb_height: usize,

    limits: Limits,
    stop: Option<&'a dyn enough::Stop>,

    /// Pixel clamping type from the picture header; both values use the
    /// same saturating reconstruction here.
    #[allow(dead_code)]
    clamp_type: u8,

    segments_enabled: bool,
    segments_update_map: bool,
    segment: [Segment; MAX_SEGMENTS],
    segment_tree_nodes: [TreeNode; 3],

    filter_simple: bool,
    filter_level: u8,
    sharpness_level: u8,
    lf_adjustments: bool,
    ref_delta: [i32; 4],
    mode_delta: [i32; 4],

    token_probs: Box<TokenProbTreeNodes>,
    probs_by_pos: Box<TokenProbsByPosition>,
    prob_skip_false: Option<Prob>,

    // Row-scan state
    mb_data: Vec<MacroBlockData>,
    top: Vec<NeighborContext>,
    left: NeighborContext,
    row_dither: Vec<u8>,

    // Reconstructed samples threaded between macroblocks: a persistent
    // top-row store per plane, plus the previous macroblock's right edge.
    top_border_y: Vec<u8>,
    left_border_y: Vec<u8>,
    top_border_u: Vec<u8>,
    left_border_u: Vec<u8>,
    top_border_v: Vec<u8>,
    left_border_v: Vec<u8>,

    // Row cache: `extra` context rows from the previous row, then the
    // current macroblock row. The filter runs here before rows move out.
    cache_y: Vec<u8>,
    cache_u: Vec<u8>,
    cache_v: Vec<u8>,
    cache_y_stride: usize,
    cache_uv_stride: usize,
    extra_y_rows: usize,

    emitter: RowAccumulator,
}

impl<'a> Vp8Decoder<'a> {
    /// Validate the frame-tag inputs and stage a decoder over `data`
    /// (control partition followed by the residual partitions).
    pub fn new(
        data: &'a [u8],
        picture: &PictureInfo,
        header: &FrameHeader,
    ) -> Result<Self, DecodeError> {
        if header.version > 3 {
            return Err(DecodeError::UnsupportedProfile(header.version));
        }
        if !header.key_frame {
            return Err(DecodeError::InvalidHeader("inter frames are not supported"));
        }
        if picture.width == 0 || picture.height == 0 {
            return Err(DecodeError::InvalidHeader("zero frame dimension"));
        }
        if picture.width >= 1 << 14 || picture.height >= 1 << 14 {
            return Err(DecodeError::InvalidHeader("frame dimension exceeds 14 bits"));
        }

        let partition_length = header.partition_length as usize;
        if partition_length == 0 || partition_length > data.len() {
            return Err(DecodeError::TruncatedBitstream);
        }
        let (control_data, residual) = data.split_at(partition_length);

        let width = picture.width;
        let height = picture.height;
        let mb_width = usize::from(width).div_ceil(16);
        let mb_height = usize::from(height).div_ceil(16);

        Ok(Self {
            control: HeaderReader::new(control_data),
            residual,

            version: header.version,
            width,
            height,
            mb_width,
            mb_height,

            limits: Limits::default(),
            stop: None,

            clamp_type: 0,

            segments_enabled: false,
            segments_update_map: false,
            segment: [Segment::default(); MAX_SEGMENTS],
            segment_tree_nodes: SEGMENT_TREE_NODE_DEFAULTS,

            filter_simple: false,
            filter_level: 0,
            sharpness_level: 0,
            lf_adjustments: false,
            ref_delta: [0; 4],
            mode_delta: [0; 4],

            token_probs: Box::new(COEFF_PROB_NODES),
            probs_by_pos: Box::new([[[[TreeNode::UNINIT; 11]; 3]; 17]; 4]),
            prob_skip_false: None,

            mb_data: Vec::new(),
            top: Vec::new(),
            left: NeighborContext::default(),
            row_dither: Vec::new(),

            top_border_y: Vec::new(),
            left_border_y: Vec::new(),
            top_border_u: Vec::new(),
            left_border_u: Vec::new(),
            top_border_v: Vec::new(),
            left_border_v: Vec::new(),

            cache_y: Vec::new(),
            cache_u: Vec::new(),
            cache_v: Vec::new(),
            cache_y_stride: 0,
            cache_uv_stride: 0,
            extra_y_rows: 0,

            emitter: RowAccumulator::new(usize::from(width), usize::from(height)),
        })
    }

    /// Replace the default decode [`Limits`].
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Install a cancellation token checked between macroblock rows.
    pub fn set_stop(&mut self, stop: Option<&'a dyn enough::Stop>) {
        self.stop = stop;
    }

    /// Decode the frame, emitting finished macroblock rows to `sink`.
    pub fn decode(mut self, sink: &mut dyn RowSink) -> Result<(), DecodeError> {
        let mut partitions = self.read_frame_header()?;
        self.allocate_buffers()?;

        for mb_y in 0..self.mb_height {
            let p = mb_y % partitions.len();
            // Scanline init: left modes to DC, left nonzero bits to 0.
            self.left = NeighborContext::default();

            self.parse_intra_modes_row()?;
            self.parse_residuals_row(&mut partitions, p)?;

            self.row_dither.clear();
            self.row_dither.extend(self.mb_data.iter().map(|mb| mb.dither));
            sink.on_row_dither(mb_y, &self.row_dither);

            self.reconstruct_row(mb_y);
            self.filter_row(mb_y);
            self.output_row(mb_y, sink);

            if let Some(stop) = self.stop {
                stop.check()?;
            }
        }

        self.emitter.finish(sink);
        Ok(())
    }

    // --- header parsing -------------------------------------------------

    fn read_frame_header(&mut self) -> Result<Partitions<'a>, DecodeError> {
        let color_space = self.control.read_value(1) as u8;
        self.clamp_type = self.control.read_value(1) as u8;
        if color_space != 0 {
            return Err(DecodeError::InvalidHeader("color space must be YUV (0)"));
        }

        self.segments_enabled = self.control.read_flag();
        if self.segments_enabled {
            self.read_segment_updates();
        }

        self.filter_simple = self.control.read_flag();
        self.filter_level = self.control.read_value(6) as u8;
        self.sharpness_level = self.control.read_value(3) as u8;

        self.lf_adjustments = self.control.read_flag();
        if self.lf_adjustments {
            if self.control.read_flag() {
                for delta in &mut self.ref_delta {
                    *delta = self.control.read_optional_signed(6);
                }
                for delta in &mut self.mode_delta {
                    *delta = self.control.read_optional_signed(6);
                }
            }
        }

        // The profile overrides the loop filter: version 1 forces the
        // simple filter, versions 2 and 3 run without any filter.
        match self.version {
            1 => self.filter_simple = true,
            2 | 3 => self.filter_level = 0,
            _ => {}
        }

        let num_partitions = 1usize << self.control.read_value(2);
        let partitions = self.split_partitions(num_partitions);

        self.read_quantization_indices();

        // Refresh-entropy bit: still images never persist probabilities.
        let _ = self.control.read_flag();

        self.update_token_probabilities();
        self.populate_probs_by_position();

        self.prob_skip_false = if self.control.read_flag() {
            Some(self.control.read_value(8) as u8)
        } else {
            None
        };

        if self.control.is_eof() {
            return Err(DecodeError::TruncatedBitstream);
        }
        Ok(partitions)
    }

    fn read_segment_updates(&mut self) {
        // Section 9.3
        self.segments_update_map = self.control.read_flag();
        let update_feature_data = self.control.read_flag();

        if update_feature_data {
            let absolute = self.control.read_flag();
            for seg in &mut self.segment {
                seg.delta_values = !absolute;
            }
            for seg in &mut self.segment {
                seg.quantizer_level = self.control.read_optional_signed(7) as i8;
            }
            for seg in &mut self.segment {
                seg.loopfilter_level = self.control.read_optional_signed(6) as i8;
            }
        }
        // With no feature data on a keyframe the segment levels stay at
        // their neutral zero defaults.

        if self.segments_update_map {
            for node in &mut self.segment_tree_nodes {
                node.prob = if self.control.read_flag() {
                    self.control.read_value(8) as u8
                } else {
                    255
                };
            }
        }
    }

    /// Locate the residual partitions: 3-byte little-endian length
    /// prefixes for all but the last, which absorbs the remaining bytes.
    /// A prefix table or length running past the blob is clamped, never
    /// fatal; affected partitions read as zeros.
    fn split_partitions(&mut self, count: usize) -> Partitions<'a> {
        let mut r = SliceReader::new(self.residual);
        let mut declared = Vec::with_capacity(count - 1);
        for _ in 1..count {
            declared.push(r.read_u24_le().unwrap_or(0) as usize);
        }
        Partitions::split(r.take_remaining(), &declared, count)
    }

    fn read_quantization_indices(&mut self) {
        let yac_base = self.control.read_value(7) as i32;
        let deltas = QuantDeltas {
            ydc: self.control.read_optional_signed(4),
            y2dc: self.control.read_optional_signed(4),
            y2ac: self.control.read_optional_signed(4),
            uvdc: self.control.read_optional_signed(4),
            uvac: self.control.read_optional_signed(4),
        };

        // Without segmentation only segment 0 is filled in, and every
        // macroblock resolves to it at lookup time.
        let n = if self.segments_enabled {
            MAX_SEGMENTS
        } else {
            1
        };
        for seg in self.segment.iter_mut().take(n) {
            let base = if self.segments_enabled {
                if seg.delta_values {
                    i32::from(seg.quantizer_level) + yac_base
                } else {
                    i32::from(seg.quantizer_level)
                }
            } else {
                yac_base
            };
            dequant_factors(seg, base, &deltas);
        }
    }

    fn update_token_probabilities(&mut self) {
        for (i, planes) in COEFF_UPDATE_PROBS.iter().enumerate() {
            for (j, bands) in planes.iter().enumerate() {
                for (k, contexts) in bands.iter().enumerate() {
                    for (t, update_prob) in contexts.iter().enumerate().take(NUM_DCT_TOKENS - 1) {
                        if self.control.read_bool(*update_prob) {
                            let prob = self.control.read_value(8) as u8;
                            self.token_probs[i][j][k][t].prob = prob;
                        }
                    }
                }
            }
        }
    }

    /// Materialize the position-indexed view of the token probabilities.
    fn populate_probs_by_position(&mut self) {
        for plane in 0..4 {
            for pos in 0..17 {
                let band = if pos < 16 {
                    usize::from(COEFF_BANDS[pos])
                } else {
                    7
                };
                for ctx in 0..3 {
                    self.probs_by_pos[plane][pos][ctx] = self.token_probs[plane][band][ctx];
                }
            }
        }
    }

    // --- buffers --------------------------------------------------------

    fn allocate_buffers(&mut self) -> Result<(), DecodeError> {
        self.limits
            .check_dimensions(u32::from(self.width), u32::from(self.height))?;

        // Context rows kept above the current row for the loop filter.
        self.extra_y_rows = if self.filter_level == 0 {
            0
        } else if self.filter_simple {
            2
        } else {
            8
        };
        let extra_uv_rows = self.extra_y_rows / 2;

        let luma_w = self.mb_width * 16;
        let chroma_w = self.mb_width * 8;
        self.cache_y_stride = luma_w;
        self.cache_uv_stride = chroma_w;

        let cache_y_len = (self.extra_y_rows + 16) * luma_w;
        let cache_uv_len = (extra_uv_rows + 8) * chroma_w;

        let estimate = self.mb_width
            * (mem::size_of::<MacroBlockData>() + mem::size_of::<NeighborContext>())
            + cache_y_len
            + 2 * cache_uv_len
            + luma_w
            + 2 * chroma_w
            // emitter high-water: one finished group plus one row's output
            + 2 * (16 + self.extra_y_rows) * usize::from(self.width) * 2;
        self.limits.check_memory(estimate as u64)?;

        self.mb_data = vec![MacroBlockData::default(); self.mb_width];
        self.top = vec![NeighborContext::default(); self.mb_width];
        self.row_dither = Vec::with_capacity(self.mb_width);

        self.top_border_y = vec![127u8; luma_w];
        self.left_border_y = vec![129u8; 1 + 16];
        self.top_border_u = vec![127u8; chroma_w];
        self.left_border_u = vec![129u8; 1 + 8];
        self.top_border_v = vec![127u8; chroma_w];
        self.left_border_v = vec![129u8; 1 + 8];

        self.cache_y = vec![0u8; cache_y_len];
        self.cache_u = vec![0u8; cache_uv_len];
        self.cache_v = vec![0u8; cache_uv_len];

        Ok(())
    }

    // --- per-row passes -------------------------------------------------

    /// Pass 1: intra modes for the whole row, from the control partition.
    fn parse_intra_modes_row(&mut self) -> Result<(), DecodeError> {
        for mbx in 0..self.mb_width {
            let segment_id = if self.segments_enabled && self.segments_update_map {
                self.control.read_with_tree(&self.segment_tree_nodes) as u8
            } else {
                0
            };

            let skip = match self.prob_skip_false {
                Some(prob) => self.control.read_bool(prob),
                None => false,
            };

            let luma = self.control.read_with_tree(&KEYFRAME_YMODE_NODES);
            let luma_mode = LumaMode::from_i8(luma)
                .ok_or(DecodeError::InternalInvariantViolated("luma mode tree leaf"))?;

            let mut bpred = [IntraMode::DC; 16];
            match luma_mode.into_intra() {
                // LumaMode::B: each sub-block signals its own mode, with
                // the tree picked by the above and left sub-block modes.
                None => {
                    for y in 0usize..4 {
                        for x in 0usize..4 {
                            let above = self.top[mbx].bpred[x];
                            let left = self.left.bpred[y];
                            let intra = self.control.read_with_tree(
                                &KEYFRAME_BPRED_MODE_NODES[above as usize][left as usize],
                            );
                            let bmode = IntraMode::from_i8(intra).ok_or(
                                DecodeError::InternalInvariantViolated("bpred mode tree leaf"),
                            )?;
                            bpred[x + y * 4] = bmode;

                            self.top[mbx].bpred[x] = bmode;
                            self.left.bpred[y] = bmode;
                        }
                    }
                }
                Some(mode) => {
                    bpred = [mode; 16];
                    self.top[mbx].bpred = [mode; 4];
                    self.left.bpred = [mode; 4];
                }
            }

            let chroma = self.control.read_with_tree(&KEYFRAME_UV_MODE_NODES);
            let chroma_mode = ChromaMode::from_i8(chroma)
                .ok_or(DecodeError::InternalInvariantViolated("chroma mode tree leaf"))?;

            let mb = &mut self.mb_data[mbx];
            mb.segment_id = segment_id;
            mb.skip = skip;
            mb.luma_mode = luma_mode;
            mb.chroma_mode = chroma_mode;
            mb.bpred = bpred;
        }

        // The control partition must be fully present.
        if self.control.is_eof() {
            return Err(DecodeError::TruncatedBitstream);
        }
        Ok(())
    }

    /// Pass 2: residuals for the whole row, from partition `p`.
    fn parse_residuals_row(
        &mut self,
        partitions: &mut Partitions<'_>,
        p: usize,
    ) -> Result<(), DecodeError> {
        let mut reader = partitions.reader(p);

        for mbx in 0..self.mb_width {
            let mb = &mut self.mb_data[mbx];
            let top = &mut self.top[mbx];
            let left = &mut self.left;

            mb.coeffs = [0; 384];
            mb.nz_y = 0;
            mb.nz_uv = 0;

            let seg = &self.segment[if self.segments_enabled {
                mb.segment_id as usize
            } else {
                0
            }];

            if mb.skip {
                // A skipped i4x4 macroblock has no Y2 block, so its Y2
                // context is left untouched for the neighbors.
                if mb.luma_mode != LumaMode::B {
                    left.nz[0] = 0;
                    top.nz[0] = 0;
                }
                for i in 1usize..9 {
                    left.nz[i] = 0;
                    top.nz[i] = 0;
                }
                mb.dither = seg.dither;
                continue;
            }

            let probs = &self.probs_by_pos;

            let (first, luma_plane) = if mb.luma_mode != LumaMode::B {
                // Y2: the 16 luma DCs travel as one WHT-coded block.
                let ctx = usize::from(top.nz[0] + left.nz[0]);
                let mut dc_block = [0i32; 16];
                let end = read_coefficients(
                    &mut reader,
                    &mut dc_block,
                    &probs[Plane::Y2 as usize],
                    0,
                    ctx,
                    seg.y2dc,
                    seg.y2ac,
                );
                let nz = end > 0;
                top.nz[0] = u8::from(nz);
                left.nz[0] = u8::from(nz);

                if nz {
                    transform::iwht4x4(&mut dc_block);
                } else {
                    // An empty scan leaves only a zero DC to broadcast.
                    let dc = (dc_block[0] + 3) >> 3;
                    dc_block.fill(dc);
                }
                for (k, &dc) in dc_block.iter().enumerate() {
                    mb.coeffs[16 * k] = dc;
                }

                (1usize, Plane::YAfterY2)
            } else {
                (0usize, Plane::YWithDc)
            };

            // 16 luma sub-blocks in raster order.
            for y in 0usize..4 {
                let mut l = left.nz[1 + y];
                for x in 0usize..4 {
                    let k = x + y * 4;
                    let ctx = usize::from(top.nz[1 + x] + l);
                    let block: &mut [i32; 16] =
                        (&mut mb.coeffs[k * 16..][..16]).try_into().unwrap();
                    let end = read_coefficients(
                        &mut reader,
                        block,
                        &probs[luma_plane as usize],
                        first,
                        ctx,
                        seg.ydc,
                        seg.yac,
                    );
                    let nz = end > first;
                    let dc_nz = block[0] != 0;
                    mb.nz_y |= nz_code(end, first, dc_nz) << (2 * k);

                    l = u8::from(nz);
                    top.nz[1 + x] = u8::from(nz);
                }
                left.nz[1 + y] = l;
            }

            // 8 chroma sub-blocks: U then V, 2x2 each.
            let chroma_probs = &probs[Plane::Chroma as usize];
            for &j in &[5usize, 7usize] {
                for y in 0usize..2 {
                    let mut l = left.nz[y + j];
                    for x in 0usize..2 {
                        let uv_idx = x + y * 2 + if j == 5 { 0 } else { 4 };
                        let k = 16 + x + y * 2 + if j == 5 { 0 } else { 4 };
                        let ctx = usize::from(top.nz[x + j] + l);
                        let block: &mut [i32; 16] =
                            (&mut mb.coeffs[k * 16..][..16]).try_into().unwrap();
                        let end = read_coefficients(
                            &mut reader,
                            block,
                            chroma_probs,
                            0,
                            ctx,
                            seg.uvdc,
                            seg.uvac,
                        );
                        let nz = end > 0;
                        mb.nz_uv |= (nz_code(end, 0, false) as u16) << (2 * uv_idx);

                        l = u8::from(nz);
                        top.nz[x + j] = u8::from(nz);
                    }
                    left.nz[y + j] = l;
                }
            }

            mb.dither = if mb.nz_uv & 0xAAAA != 0 { 0 } else { seg.dither };
        }

        Ok(())
    }

    /// Pass 3: predict, inverse-transform and add residuals for the whole
    /// row, writing reconstructed samples into the row cache.
    fn reconstruct_row(&mut self, mby: usize) {
        let mbw = self.mb_width;
        let mut ws = [0u8; LUMA_BLOCK_SIZE];
        let mut uws = [0u8; CHROMA_BLOCK_SIZE];
        let mut vws = [0u8; CHROMA_BLOCK_SIZE];

        for mbx in 0..mbw {
            // --- luma ---
            set_luma_border(&mut ws, mbx, mby, mbw, &self.top_border_y, &self.left_border_y);
            let mb = &mut self.mb_data[mbx];
            let stride = LUMA_STRIDE;

            match mb.luma_mode {
                LumaMode::V => predict_vpred(&mut ws, 16, 1, 1, stride),
                LumaMode::H => predict_hpred(&mut ws, 16, 1, 1, stride),
                LumaMode::TM => predict_tmpred(&mut ws, 16, 1, 1, stride),
                LumaMode::DC => predict_dcpred(&mut ws, 16, stride, mby != 0, mbx != 0),
                LumaMode::B => {
                    // Sub-blocks predict from already reconstructed
                    // neighbors, so predict and add per 4x4 in order.
                    for sby in 0usize..4 {
                        for sbx in 0usize..4 {
                            let k = sbx + sby * 4;
                            let y0 = sby * 4 + 1;
                            let x0 = sbx * 4 + 1;

                            match mb.bpred[k] {
                                IntraMode::TM => predict_tmpred(&mut ws, 4, x0, y0, stride),
                                IntraMode::VE => predict_bvepred(&mut ws, x0, y0, stride),
                                IntraMode::HE => predict_bhepred(&mut ws, x0, y0, stride),
                                IntraMode::DC => predict_bdcpred(&mut ws, x0, y0, stride),
                                IntraMode::LD => predict_bldpred(&mut ws, x0, y0, stride),
                                IntraMode::RD => predict_brdpred(&mut ws, x0, y0, stride),
                                IntraMode::VR => predict_bvrpred(&mut ws, x0, y0, stride),
                                IntraMode::VL => predict_bvlpred(&mut ws, x0, y0, stride),
                                IntraMode::HD => predict_bhdpred(&mut ws, x0, y0, stride),
                                IntraMode::HU => predict_bhupred(&mut ws, x0, y0, stride),
                            }

                            let block: &mut [i32; 16] =
                                (&mut mb.coeffs[k * 16..][..16]).try_into().unwrap();
                            idct_add(&mut ws, block, y0, x0, stride);
                        }
                    }
                }
            }

            if mb.luma_mode != LumaMode::B {
                for y in 0usize..4 {
                    for x in 0usize..4 {
                        let k = x + y * 4;
                        let block: &mut [i32; 16] =
                            (&mut mb.coeffs[k * 16..][..16]).try_into().unwrap();
                        idct_add(&mut ws, block, 1 + y * 4, 1 + x * 4, stride);
                    }
                }
            }

            // Right edge becomes the next macroblock's left context; the
            // corner comes from this macroblock's above row.
            self.left_border_y[0] = ws[16];
            for (i, left) in self.left_border_y[1..][..16].iter_mut().enumerate() {
                *left = ws[(i + 1) * stride + 16];
            }
            self.top_border_y[mbx * 16..][..16].copy_from_slice(&ws[16 * stride + 1..][..16]);

            let cache_offset = self.extra_y_rows * self.cache_y_stride;
            for y in 0usize..16 {
                let dst = cache_offset + y * self.cache_y_stride + mbx * 16;
                let src = (1 + y) * stride + 1;
                self.cache_y[dst..][..16].copy_from_slice(&ws[src..][..16]);
            }

            // --- chroma ---
            set_chroma_border(&mut uws, mbx, mby, &self.top_border_u, &self.left_border_u);
            set_chroma_border(&mut vws, mbx, mby, &self.top_border_v, &self.left_border_v);
            let stride = CHROMA_STRIDE;

            match mb.chroma_mode {
                ChromaMode::DC => {
                    predict_dcpred(&mut uws, 8, stride, mby != 0, mbx != 0);
                    predict_dcpred(&mut vws, 8, stride, mby != 0, mbx != 0);
                }
                ChromaMode::V => {
                    predict_vpred(&mut uws, 8, 1, 1, stride);
                    predict_vpred(&mut vws, 8, 1, 1, stride);
                }
                ChromaMode::H => {
                    predict_hpred(&mut uws, 8, 1, 1, stride);
                    predict_hpred(&mut vws, 8, 1, 1, stride);
                }
                ChromaMode::TM => {
                    predict_tmpred(&mut uws, 8, 1, 1, stride);
                    predict_tmpred(&mut vws, 8, 1, 1, stride);
                }
            }

            for y in 0usize..2 {
                for x in 0usize..2 {
                    let i = x + y * 2;
                    let y0 = 1 + y * 4;
                    let x0 = 1 + x * 4;

                    let ublock: &mut [i32; 16] =
                        (&mut mb.coeffs[(16 + i) * 16..][..16]).try_into().unwrap();
                    idct_add(&mut uws, ublock, y0, x0, stride);

                    let vblock: &mut [i32; 16] =
                        (&mut mb.coeffs[(20 + i) * 16..][..16]).try_into().unwrap();
                    idct_add(&mut vws, vblock, y0, x0, stride);
                }
            }

            self.left_border_u[0] = uws[8];
            self.left_border_v[0] = vws[8];
            for i in 0usize..8 {
                self.left_border_u[1 + i] = uws[(i + 1) * stride + 8];
                self.left_border_v[1 + i] = vws[(i + 1) * stride + 8];
            }
            self.top_border_u[mbx * 8..][..8].copy_from_slice(&uws[8 * stride + 1..][..8]);
            self.top_border_v[mbx * 8..][..8].copy_from_slice(&vws[8 * stride + 1..][..8]);

            let extra_uv_rows = self.extra_y_rows / 2;
            let cache_offset = extra_uv_rows * self.cache_uv_stride;
            for y in 0usize..8 {
                let dst = cache_offset + y * self.cache_uv_stride + mbx * 8;
                let src = (1 + y) * stride + 1;
                self.cache_u[dst..][..8].copy_from_slice(&uws[src..][..8]);
                self.cache_v[dst..][..8].copy_from_slice(&vws[src..][..8]);
            }
        }
    }

    /// Per-macroblock filter strength: segment level adjusted by the
    /// reference and mode deltas, clamped to 0..=63, with the interior
    /// limit and high-edge-variance threshold derived from it.
    fn filter_parameters(&self, mb: &MacroBlockData) -> (u8, u8, u8) {
        let mut level = i32::from(self.filter_level);
        if level == 0 {
            return (0, 0, 0);
        }

        if self.segments_enabled {
            let seg = &self.segment[mb.segment_id as usize];
            if seg.delta_values {
                level += i32::from(seg.loopfilter_level);
            } else {
                level = i32::from(seg.loopfilter_level);
            }
            level = level.clamp(0, 63);
        }

        if self.lf_adjustments {
            // Keyframes predict from the current frame only (ref 0).
            level += self.ref_delta[0];
            if mb.luma_mode == LumaMode::B {
                level += self.mode_delta[0];
            }
        }

        let level = level.clamp(0, 63) as u8;

        let mut interior_limit = level;
        if self.sharpness_level > 0 {
            interior_limit >>= if self.sharpness_level > 4 { 2 } else { 1 };
            interior_limit = interior_limit.min(9 - self.sharpness_level);
        }
        if interior_limit == 0 {
            interior_limit = 1;
        }

        let hev_threshold = if level >= 40 {
            2
        } else if level >= 15 {
            1
        } else {
            0
        };

        (level, interior_limit, hev_threshold)
    }

    /// Pass 4: deblock the row in the cache. Macroblock edges always
    /// filter; interior sub-block edges only when the macroblock carries
    /// coefficients or is i4x4. The simple filter touches luma only.
    fn filter_row(&mut self, mby: usize) {
        if self.filter_level == 0 {
            return;
        }

        let y_stride = self.cache_y_stride;
        let uv_stride = self.cache_uv_stride;
        let extra = self.extra_y_rows;
        let extra_uv = extra / 2;

        for mbx in 0..self.mb_width {
            let mb = &self.mb_data[mbx];
            let (level, interior_limit, hev_threshold) = self.filter_parameters(mb);
            if level == 0 {
                continue;
            }

            let mbedge_limit = (level + 2) * 2 + interior_limit;
            let sub_bedge_limit = level * 2 + interior_limit;
            let filter_inner =
                mb.luma_mode == LumaMode::B || mb.nz_y != 0 || mb.nz_uv != 0;

            // Left macroblock edge (vertical edge, filtered along rows).
            if mbx > 0 {
                if self.filter_simple {
                    for y in 0..16 {
                        let row = (extra + y) * y_stride;
                        loop_filter::simple_segment_horizontal(
                            mbedge_limit,
                            &mut self.cache_y[row + mbx * 16 - 4..][..8],
                        );
                    }
                } else {
                    for y in 0..16 {
                        let row = (extra + y) * y_stride;
                        loop_filter::macroblock_filter_horizontal(
                            hev_threshold,
                            interior_limit,
                            mbedge_limit,
                            &mut self.cache_y[row + mbx * 16 - 4..][..8],
                        );
                    }
                    for y in 0..8 {
                        let row = (extra_uv + y) * uv_stride;
                        loop_filter::macroblock_filter_horizontal(
                            hev_threshold,
                            interior_limit,
                            mbedge_limit,
                            &mut self.cache_u[row + mbx * 8 - 4..][..8],
                        );
                        loop_filter::macroblock_filter_horizontal(
                            hev_threshold,
                            interior_limit,
                            mbedge_limit,
                            &mut self.cache_v[row + mbx * 8 - 4..][..8],
                        );
                    }
                }
            }

            // Interior vertical edges at x = 4, 8, 12 (4 for chroma).
            if filter_inner {
                if self.filter_simple {
                    for x in (4..16).step_by(4) {
                        for y in 0..16 {
                            let row = (extra + y) * y_stride;
                            loop_filter::simple_segment_horizontal(
                                sub_bedge_limit,
                                &mut self.cache_y[row + mbx * 16 + x - 4..][..8],
                            );
                        }
                    }
                } else {
                    for x in (4..16).step_by(4) {
                        for y in 0..16 {
                            let row = (extra + y) * y_stride;
                            loop_filter::subblock_filter_horizontal(
                                hev_threshold,
                                interior_limit,
                                sub_bedge_limit,
                                &mut self.cache_y[row + mbx * 16 + x - 4..][..8],
                            );
                        }
                    }
                    for y in 0..8 {
                        let row = (extra_uv + y) * uv_stride;
                        loop_filter::subblock_filter_horizontal(
                            hev_threshold,
                            interior_limit,
                            sub_bedge_limit,
                            &mut self.cache_u[row + mbx * 8..][..8],
                        );
                        loop_filter::subblock_filter_horizontal(
                            hev_threshold,
                            interior_limit,
                            sub_bedge_limit,
                            &mut self.cache_v[row + mbx * 8..][..8],
                        );
                    }
                }
            }

            // Top macroblock edge (horizontal edge, filtered down
            // columns); the edge row is where the current row begins.
            if mby > 0 {
                if self.filter_simple {
                    for x in 0..16 {
                        let point = extra * y_stride + mbx * 16 + x;
                        loop_filter::simple_segment_vertical(
                            mbedge_limit,
                            &mut self.cache_y,
                            point,
                            y_stride,
                        );
                    }
                } else {
                    for x in 0..16 {
                        let point = extra * y_stride + mbx * 16 + x;
                        loop_filter::macroblock_filter_vertical(
                            hev_threshold,
                            interior_limit,
                            mbedge_limit,
                            &mut self.cache_y,
                            point,
                            y_stride,
                        );
                    }
                    for x in 0..8 {
                        let point = extra_uv * uv_stride + mbx * 8 + x;
                        loop_filter::macroblock_filter_vertical(
                            hev_threshold,
                            interior_limit,
                            mbedge_limit,
                            &mut self.cache_u,
                            point,
                            uv_stride,
                        );
                        loop_filter::macroblock_filter_vertical(
                            hev_threshold,
                            interior_limit,
                            mbedge_limit,
                            &mut self.cache_v,
                            point,
                            uv_stride,
                        );
                    }
                }
            }

            // Interior horizontal edges at y = 4, 8, 12 (4 for chroma).
            if filter_inner {
                if self.filter_simple {
                    for y in (4..16).step_by(4) {
                        for x in 0..16 {
                            let point = (extra + y) * y_stride + mbx * 16 + x;
                            loop_filter::simple_segment_vertical(
                                sub_bedge_limit,
                                &mut self.cache_y,
                                point,
                                y_stride,
                            );
                        }
                    }
                } else {
                    for y in (4..16).step_by(4) {
                        for x in 0..16 {
                            let point = (extra + y) * y_stride + mbx * 16 + x;
                            loop_filter::subblock_filter_vertical(
                                hev_threshold,
                                interior_limit,
                                sub_bedge_limit,
                                &mut self.cache_y,
                                point,
                                y_stride,
                            );
                        }
                    }
                    for x in 0..8 {
                        let point = (extra_uv + 4) * uv_stride + mbx * 8 + x;
                        loop_filter::subblock_filter_vertical(
                            hev_threshold,
                            interior_limit,
                            sub_bedge_limit,
                            &mut self.cache_u,
                            point,
                            uv_stride,
                        );
                        loop_filter::subblock_filter_vertical(
                            hev_threshold,
                            interior_limit,
                            sub_bedge_limit,
                            &mut self.cache_v,
                            point,
                            uv_stride,
                        );
                    }
                }
            }
        }
    }

    /// Pass 5: release cache rows whose pixels are final, slide the
    /// filter-context rows up, and emit any completed macroblock rows.
    fn output_row(&mut self, mby: usize, sink: &mut dyn RowSink) {
        let extra = self.extra_y_rows;
        let extra_uv = extra / 2;
        let is_first = mby == 0;
        let is_last = mby == self.mb_height - 1;

        // The bottom `extra` rows of the current macroblock row can still
        // be touched when the next row's top edge filters, so they stay in
        // the cache. The first row therefore releases 16 - extra rows, the
        // middle rows 16 (the previous row's tail plus their own top), and
        // the last row everything left.
        let (src_row, rows) = match (is_first, is_last) {
            (true, true) => (extra, 16),
            (true, false) => (extra, 16 - extra),
            (false, true) => (0, extra + 16),
            (false, false) => (0, 16),
        };
        for y in 0..rows {
            let start = (src_row + y) * self.cache_y_stride;
            self.emitter
                .push_y_row(&self.cache_y[start..start + self.cache_y_stride]);
        }

        let (src_row_uv, uv_rows) = match (is_first, is_last) {
            (true, true) => (extra_uv, 8),
            (true, false) => (extra_uv, 8 - extra_uv),
            (false, true) => (0, extra_uv + 8),
            (false, false) => (0, 8),
        };
        for y in 0..uv_rows {
            let start = (src_row_uv + y) * self.cache_uv_stride;
            let u = &self.cache_u[start..start + self.cache_uv_stride];
            let v = &self.cache_v[start..start + self.cache_uv_stride];
            self.emitter.push_uv_row(u, v);
        }

        self.emitter.flush(sink);

        // Slide the bottom context rows to the top of the cache for the
        // next row's top-edge filtering.
        if extra > 0 && !is_last {
            let src = 16 * self.cache_y_stride;
            let len = extra * self.cache_y_stride;
            self.cache_y.copy_within(src..src + len, 0);

            let src_uv = 8 * self.cache_uv_stride;
            let len_uv = extra_uv * self.cache_uv_stride;
            self.cache_u.copy_within(src_uv..src_uv + len_uv, 0);
            self.cache_v.copy_within(src_uv..src_uv + len_uv, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequant_indices_clamp_for_any_base_and_delta() {
        let mut seg = Segment::default();
        for base in [0i32, 1, 64, 126, 127] {
            for delta in [-15i32, -1, 0, 1, 15] {
                let deltas = QuantDeltas {
                    ydc: delta,
                    y2dc: delta,
                    y2ac: delta,
                    uvdc: delta,
                    uvac: delta,
                };
                dequant_factors(&mut seg, base, &deltas);

                // Every factor must come from the 128-entry tables.
                assert!(DC_QUANT.contains(&seg.ydc));
                assert!(AC_QUANT.contains(&seg.yac));
                assert!(DC_QUANT.contains(&(seg.y2dc / 2)));
                assert!(AC_QUANT.contains(&seg.uvac));
                // The chroma DC index caps at 117.
                assert!(seg.uvdc <= DC_QUANT[117]);
                assert_eq!(seg.uvdc, DC_QUANT[(base + delta).clamp(0, 117) as usize]);
            }
        }
    }

    #[test]
    fn y2_ac_factor_never_drops_below_eight() {
        let mut seg = Segment::default();
        for base in 0..128 {
            dequant_factors(&mut seg, base, &QuantDeltas::default());
            assert!(seg.y2ac >= 8, "base {base}");
        }
        // The smallest quantizers would scale to below 8 without the floor.
        dequant_factors(&mut seg, 0, &QuantDeltas::default());
        assert_eq!(seg.y2ac, 8);
    }

    #[test]
    fn nz_codes_classify_scan_ends() {
        // Empty scan: falls back to the WHT DC bit.
        assert_eq!(nz_code(0, 0, false), 0);
        assert_eq!(nz_code(1, 1, true), 1);
        // A lone DC coefficient.
        assert_eq!(nz_code(1, 0, false), 2);
        // Anything reaching past position 1 has AC.
        assert_eq!(nz_code(5, 0, false), 3);
        assert_eq!(nz_code(16, 1, false), 3);
    }

    #[test]
    fn accumulator_groups_rows_and_crops() {
        struct Rows(Vec<(usize, usize, usize)>);
        impl RowSink for Rows {
            fn on_row(&mut self, y: &[u8], u: &[u8], v: &[u8], mb_y: usize) {
                self.0.push((y.len(), u.len(), mb_y));
                assert_eq!(u.len(), v.len());
            }
        }

        // 20x20 picture: two macroblock rows, the second cropped to 4
        // luma rows and 2 chroma rows.
        let mut acc = RowAccumulator::new(20, 20);
        let mut sink = Rows(Vec::new());
        let y_row = [0u8; 32];
        let uv_row = [0u8; 16];

        for _ in 0..32 {
            acc.push_y_row(&y_row);
        }
        for _ in 0..16 {
            acc.push_uv_row(&uv_row, &uv_row);
        }
        acc.flush(&mut sink);
        acc.finish(&mut sink);

        assert_eq!(sink.0, vec![(16 * 20, 8 * 10, 0), (4 * 20, 2 * 10, 1)]);
    }

    #[test]
    fn accumulator_handles_exact_multiple_heights() {
        struct Count(usize);
        impl RowSink for Count {
            fn on_row(&mut self, y: &[u8], _u: &[u8], _v: &[u8], mb_y: usize) {
                assert_eq!(y.len(), 16 * 16);
                assert_eq!(mb_y, self.0);
                self.0 += 1;
            }
        }

        let mut acc = RowAccumulator::new(16, 32);
        let mut sink = Count(0);
        for _ in 0..32 {
            acc.push_y_row(&[0u8; 16]);
        }
        for _ in 0..16 {
            acc.push_uv_row(&[0u8; 8], &[0u8; 8]);
        }
        acc.finish(&mut sink);
        assert_eq!(sink.0, 2);
    }
}
