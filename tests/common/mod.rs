#![allow(dead_code)]
//! Bitstream authoring helpers for the decode tests.
//!
//! The crate has no encoder, so these tests carry a direct translation of
//! the reference boolean encoder from the format specification, plus a
//! frame builder that writes header fields, prediction modes and residual
//! tokens in exactly the order the decoder consumes them, mirroring its
//! neighbor-context bookkeeping.

use vp8core::common::types::{
    COEFF_BANDS, COEFF_PROBS, COEFF_UPDATE_PROBS, KEYFRAME_BPRED_MODE_PROBS, PROB_DCT_CAT,
};
use vp8core::{FrameHeader, RowSink};

/// RFC 6386 reference boolean encoder.
pub struct BoolWriter {
    out: Vec<u8>,
    bottom: u32,
    range: u32,
    bit_num: i32,
}

impl BoolWriter {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            bottom: 0,
            range: 255,
            bit_num: 24,
        }
    }

    fn add_one_to_output(&mut self) {
        for byte in self.out.iter_mut().rev() {
            if *byte < 255 {
                *byte += 1;
                return;
            }
            *byte = 0;
        }
        self.out.insert(0, 1);
    }

    pub fn write_bool(&mut self, bit: bool, prob: u8) {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        if bit {
            self.bottom += split;
            self.range -= split;
        } else {
            self.range = split;
        }

        while self.range < 128 {
            self.range <<= 1;
            if self.bottom & (1 << 31) != 0 {
                self.add_one_to_output();
            }
            self.bottom <<= 1;
            self.bit_num -= 1;
            if self.bit_num == 0 {
                self.out.push((self.bottom >> 24) as u8);
                self.bottom &= (1 << 24) - 1;
                self.bit_num = 8;
            }
        }
    }

    pub fn write_flag(&mut self, bit: bool) {
        self.write_bool(bit, 128);
    }

    pub fn write_literal(&mut self, n: u8, value: u32) {
        for bit in (0..n).rev() {
            self.write_flag((value >> bit) & 1 != 0);
        }
    }

    pub fn write_optional_signed(&mut self, n: u8, value: Option<i32>) {
        self.write_flag(value.is_some());
        if let Some(v) = value {
            self.write_literal(n, v.unsigned_abs());
            self.write_flag(v < 0);
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        let mut c = self.bit_num;
        let mut v = self.bottom;
        if self.bottom & (1 << (32 - self.bit_num)) != 0 {
            self.add_one_to_output();
        }
        v <<= c & 7;
        c = (c >> 3) - 1;
        while c >= 0 {
            v <<= 8;
            c -= 1;
        }
        for _ in 0..4 {
            self.out.push((v >> 24) as u8);
            v <<= 8;
        }
        self.out
    }
}

// Tree bit paths: (node index, bit) pairs from root to the wanted leaf.
// The node index selects the probability; the trees themselves are the
// fixed keyframe trees of Sections 11.2-11.5.

const YMODE_PROBS: [u8; 4] = [145, 156, 163, 128];
const UV_MODE_PROBS: [u8; 3] = [142, 114, 183];

#[derive(Clone, Copy, PartialEq)]
pub enum Luma {
    Dc,
    V,
    H,
    Tm,
    B,
}

#[derive(Clone, Copy, PartialEq)]
pub enum Uv {
    Dc,
    V,
    H,
    Tm,
}

/// Sub-block modes by their coded index (DC, TM, VE, HE, LD, RD, VR, VL,
/// HD, HU).
pub type BMode = u8;

fn ymode_path(mode: Luma) -> &'static [(usize, bool)] {
    match mode {
        Luma::B => &[(0, false)],
        Luma::Dc => &[(0, true), (1, false), (2, false)],
        Luma::V => &[(0, true), (1, false), (2, true)],
        Luma::H => &[(0, true), (1, true), (3, false)],
        Luma::Tm => &[(0, true), (1, true), (3, true)],
    }
}

fn uv_mode_path(mode: Uv) -> &'static [(usize, bool)] {
    match mode {
        Uv::Dc => &[(0, false)],
        Uv::V => &[(0, true), (1, false)],
        Uv::H => &[(0, true), (1, true), (2, false)],
        Uv::Tm => &[(0, true), (1, true), (2, true)],
    }
}

fn bpred_path(mode: BMode) -> &'static [(usize, bool)] {
    const T: bool = true;
    const F: bool = false;
    match mode {
        0 => &[(0, F)],
        1 => &[(0, T), (1, F)],
        2 => &[(0, T), (1, T), (2, F)],
        3 => &[(0, T), (1, T), (2, T), (3, F), (4, F)],
        5 => &[(0, T), (1, T), (2, T), (3, F), (4, T), (5, F)],
        6 => &[(0, T), (1, T), (2, T), (3, F), (4, T), (5, T)],
        4 => &[(0, T), (1, T), (2, T), (3, T), (6, F)],
        7 => &[(0, T), (1, T), (2, T), (3, T), (6, T), (7, F)],
        8 => &[(0, T), (1, T), (2, T), (3, T), (6, T), (7, T), (8, F)],
        9 => &[(0, T), (1, T), (2, T), (3, T), (6, T), (7, T), (8, T)],
        _ => panic!("bad sub-block mode"),
    }
}

fn write_path(w: &mut BoolWriter, path: &[(usize, bool)], probs: &[u8]) {
    for &(node, bit) in path {
        w.write_bool(bit, probs[node]);
    }
}

/// Segment header settings for [`FrameConfig`].
pub struct SegmentConfig {
    pub update_map: bool,
    pub absolute: bool,
    pub quantizer: [Option<i32>; 4],
    pub filter_strength: [Option<i32>; 4],
    pub tree_probs: [u8; 3],
}

/// Frame-level settings mirroring the control-partition header fields.
pub struct FrameConfig {
    pub width: u16,
    pub height: u16,
    pub version: u8,
    pub filter_simple_bit: bool,
    pub filter_level: u8,
    pub sharpness: u8,
    pub log2_partitions: u8,
    pub yac_base: u8,
    pub segments: Option<SegmentConfig>,
    pub skip_prob: Option<u8>,
}

impl FrameConfig {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            version: 0,
            filter_simple_bit: false,
            filter_level: 0,
            sharpness: 0,
            log2_partitions: 0,
            yac_base: 0,
            segments: None,
            skip_prob: None,
        }
    }
}

/// One macroblock's worth of authored data. Coefficient levels are
/// pre-dequantization magnitudes in scan order.
#[derive(Clone)]
pub struct MbSpec {
    pub segment_id: u8,
    pub skip: bool,
    pub luma: Luma,
    pub bpred: [BMode; 16],
    pub uv: Uv,
    pub y2_levels: [i32; 16],
    pub y_levels: [[i32; 16]; 16],
    pub uv_levels: [[i32; 16]; 8],
}

impl MbSpec {
    pub fn skipped(luma: Luma) -> Self {
        Self {
            segment_id: 0,
            skip: true,
            luma,
            bpred: [0; 16],
            uv: Uv::Dc,
            y2_levels: [0; 16],
            y_levels: [[0; 16]; 16],
            uv_levels: [[0; 16]; 8],
        }
    }

    pub fn dc16(y2_dc: i32) -> Self {
        let mut mb = Self::skipped(Luma::Dc);
        mb.skip = false;
        mb.y2_levels[0] = y2_dc;
        mb
    }
}

/// A built frame, kept in parts so tests can rearrange partitions.
pub struct BuiltFrame {
    pub control: Vec<u8>,
    pub partitions: Vec<Vec<u8>>,
    pub version: u8,
}

impl BuiltFrame {
    /// Control partition, length prefixes, then the partition blob.
    pub fn assemble(&self) -> (Vec<u8>, FrameHeader) {
        let mut data = self.control.clone();
        for part in &self.partitions[..self.partitions.len() - 1] {
            let len = part.len() as u32;
            data.extend_from_slice(&[len as u8, (len >> 8) as u8, (len >> 16) as u8]);
        }
        for part in &self.partitions {
            data.extend_from_slice(part);
        }
        let header = FrameHeader::keyframe(self.version, self.control.len() as u32);
        (data, header)
    }
}

/// Mirror of the decoder's per-block token scan, writing instead of
/// reading. `levels` are scan-order values; positions below `first` are
/// ignored. Returns whether anything was written besides the end marker.
fn write_block(
    w: &mut BoolWriter,
    plane: usize,
    ctx: usize,
    first: usize,
    levels: &[i32; 16],
) -> bool {
    let band = |n: usize| usize::from(COEFF_BANDS[n]);
    let mut n = first;
    let mut prob = &COEFF_PROBS[plane][band(n)][ctx];
    let any = levels[first..].iter().any(|&v| v != 0);

    loop {
        if !levels[n..].iter().any(|&v| v != 0) {
            w.write_bool(false, prob[0]); // end of block
            break;
        }
        w.write_bool(true, prob[0]);

        while levels[n] == 0 {
            w.write_bool(false, prob[1]);
            n += 1;
            prob = &COEFF_PROBS[plane][band(n)][0];
        }
        w.write_bool(true, prob[1]);

        let v = levels[n].unsigned_abs();
        let next_ctx = if v == 1 { 1 } else { 2 };
        write_magnitude(w, v, prob);
        w.write_flag(levels[n] < 0);

        n += 1;
        if n >= 16 {
            break;
        }
        prob = &COEFF_PROBS[plane][band(n)][next_ctx];
    }

    any
}

fn write_magnitude(w: &mut BoolWriter, v: u32, p: &[u8; 11]) {
    assert!((1..=2048).contains(&v));
    if v == 1 {
        w.write_bool(false, p[2]);
        return;
    }
    w.write_bool(true, p[2]);

    if v <= 4 {
        w.write_bool(false, p[3]);
        if v == 2 {
            w.write_bool(false, p[4]);
        } else {
            w.write_bool(true, p[4]);
            w.write_bool(v == 4, p[5]);
        }
        return;
    }
    w.write_bool(true, p[3]);

    if v <= 10 {
        w.write_bool(false, p[6]);
        if v <= 6 {
            w.write_bool(false, p[7]);
            w.write_bool(v == 6, PROB_DCT_CAT[0][0]);
        } else {
            w.write_bool(true, p[7]);
            let x = v - 7;
            w.write_bool(x >> 1 != 0, PROB_DCT_CAT[1][0]);
            w.write_bool(x & 1 != 0, PROB_DCT_CAT[1][1]);
        }
        return;
    }
    w.write_bool(true, p[6]);

    let (cat, bits, base) = match v {
        11..=18 => (0usize, 3u32, 11u32),
        19..=34 => (1, 4, 19),
        35..=66 => (2, 5, 35),
        _ => (3, 11, 67),
    };
    w.write_bool(cat >> 1 != 0, p[8]);
    w.write_bool(cat & 1 != 0, p[9 + (cat >> 1)]);
    let extra = v - base;
    for i in (0..bits).rev() {
        let prob = PROB_DCT_CAT[2 + cat][(bits - 1 - i) as usize];
        w.write_bool((extra >> i) & 1 != 0, prob);
    }
}

/// Author a complete frame. `mbs` is the macroblock grid in raster order.
pub fn build_frame(cfg: &FrameConfig, mbs: &[MbSpec]) -> BuiltFrame {
    let mb_w = usize::from(cfg.width).div_ceil(16);
    let mb_h = usize::from(cfg.height).div_ceil(16);
    assert_eq!(mbs.len(), mb_w * mb_h);

    let mut c = BoolWriter::new();

    // Picture header bits inside the control partition.
    c.write_literal(1, 0); // color space: YUV
    c.write_literal(1, 0); // clamp type

    match &cfg.segments {
        None => c.write_flag(false),
        Some(seg) => {
            c.write_flag(true);
            c.write_flag(seg.update_map);
            let update_data = seg.quantizer.iter().any(Option::is_some)
                || seg.filter_strength.iter().any(Option::is_some);
            c.write_flag(update_data);
            if update_data {
                c.write_flag(seg.absolute);
                for q in seg.quantizer {
                    c.write_optional_signed(7, q);
                }
                for f in seg.filter_strength {
                    c.write_optional_signed(6, f);
                }
            }
            if seg.update_map {
                for prob in seg.tree_probs {
                    c.write_flag(true);
                    c.write_literal(8, u32::from(prob));
                }
            }
        }
    }

    c.write_flag(cfg.filter_simple_bit);
    c.write_literal(6, u32::from(cfg.filter_level));
    c.write_literal(3, u32::from(cfg.sharpness));
    c.write_flag(false); // no loop filter adjustments

    c.write_literal(2, u32::from(cfg.log2_partitions));

    c.write_literal(7, u32::from(cfg.yac_base));
    for _ in 0..5 {
        c.write_flag(false); // no dequant deltas
    }

    c.write_flag(false); // refresh entropy probs

    // No token probability updates.
    for planes in &COEFF_UPDATE_PROBS {
        for bands in planes {
            for contexts in bands {
                for &prob in contexts.iter().take(11) {
                    c.write_bool(false, prob);
                }
            }
        }
    }

    match cfg.skip_prob {
        None => c.write_flag(false),
        Some(prob) => {
            c.write_flag(true);
            c.write_literal(8, u32::from(prob));
        }
    }

    // Per-macroblock modes, with the same neighbor contexts the decoder
    // keeps: bottom sub-block modes per column plus a left column.
    let seg_probs = cfg.segments.as_ref().map(|s| s.tree_probs);
    let write_segment = cfg
        .segments
        .as_ref()
        .map(|s| s.update_map)
        .unwrap_or(false);

    let mut top_modes = vec![[0u8; 4]; mb_w];
    let num_partitions = 1usize << cfg.log2_partitions;
    let mut parts: Vec<BoolWriter> = (0..num_partitions).map(|_| BoolWriter::new()).collect();
    let mut res = ResidualTracker::new(mb_w);

    for mb_y in 0..mb_h {
        let mut left_modes = [0u8; 4];
        res.start_row();
        let part = mb_y % num_partitions;

        for mb_x in 0..mb_w {
            let mb = &mbs[mb_y * mb_w + mb_x];

            if write_segment {
                let probs = seg_probs.unwrap();
                let path: &[(usize, bool)] = match mb.segment_id {
                    0 => &[(0, false), (1, false)],
                    1 => &[(0, false), (1, true)],
                    2 => &[(0, true), (2, false)],
                    _ => &[(0, true), (2, true)],
                };
                write_path(&mut c, path, &probs);
            }

            if cfg.skip_prob.is_some() {
                c.write_bool(mb.skip, cfg.skip_prob.unwrap());
            }

            write_path(&mut c, ymode_path(mb.luma), &YMODE_PROBS);
            match mb.luma {
                Luma::B => {
                    for y in 0..4 {
                        for x in 0..4 {
                            let mode = mb.bpred[y * 4 + x];
                            let above = top_modes[mb_x][x];
                            let left = left_modes[y];
                            let probs =
                                &KEYFRAME_BPRED_MODE_PROBS[above as usize][left as usize];
                            write_path(&mut c, bpred_path(mode), probs);
                            top_modes[mb_x][x] = mode;
                            left_modes[y] = mode;
                        }
                    }
                }
                whole => {
                    // The equivalent sub-block mode feeds the contexts.
                    let b = match whole {
                        Luma::Dc => 0,
                        Luma::Tm => 1,
                        Luma::V => 2,
                        Luma::H => 3,
                        Luma::B => unreachable!(),
                    };
                    top_modes[mb_x] = [b; 4];
                    left_modes = [b; 4];
                }
            }
            write_path(&mut c, uv_mode_path(mb.uv), &UV_MODE_PROBS);

            res.write_mb(&mut parts[part], mb_x, mb);
        }
    }

    BuiltFrame {
        control: c.finish(),
        partitions: parts.into_iter().map(BoolWriter::finish).collect(),
        version: cfg.version,
    }
}

/// Nonzero-context mirror of the decoder's residual pass.
struct ResidualTracker {
    top: Vec<[u8; 9]>,
    left: [u8; 9],
}

impl ResidualTracker {
    fn new(mb_w: usize) -> Self {
        Self {
            top: vec![[0; 9]; mb_w],
            left: [0; 9],
        }
    }

    fn start_row(&mut self) {
        self.left = [0; 9];
    }

    fn write_mb(&mut self, w: &mut BoolWriter, mb_x: usize, mb: &MbSpec) {
        let top = &mut self.top[mb_x];
        let left = &mut self.left;

        if mb.skip {
            if mb.luma != Luma::B {
                left[0] = 0;
                top[0] = 0;
            }
            for i in 1..9 {
                left[i] = 0;
                top[i] = 0;
            }
            return;
        }

        let (first, luma_plane) = if mb.luma != Luma::B {
            let ctx = usize::from(top[0] + left[0]);
            let nz = write_block(w, 1, ctx, 0, &mb.y2_levels);
            top[0] = u8::from(nz);
            left[0] = u8::from(nz);
            (1usize, 0usize)
        } else {
            (0usize, 3usize)
        };

        for y in 0..4 {
            let mut l = left[1 + y];
            for x in 0..4 {
                let ctx = usize::from(top[1 + x] + l);
                let nz = write_block(w, luma_plane, ctx, first, &mb.y_levels[y * 4 + x]);
                l = u8::from(nz);
                top[1 + x] = u8::from(nz);
            }
            left[1 + y] = l;
        }

        for &j in &[5usize, 7usize] {
            for y in 0..2 {
                let mut l = left[y + j];
                for x in 0..2 {
                    let uv_idx = x + y * 2 + if j == 5 { 0 } else { 4 };
                    let ctx = usize::from(top[x + j] + l);
                    let nz = write_block(w, 2, ctx, 0, &mb.uv_levels[uv_idx]);
                    l = u8::from(nz);
                    top[x + j] = u8::from(nz);
                }
                left[y + j] = l;
            }
        }
    }
}

/// Collects emitted rows into whole planes, plus the per-row dither
/// strengths.
#[derive(Default)]
pub struct PlaneSink {
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub mb_rows: Vec<usize>,
    pub dither: Vec<Vec<u8>>,
}

impl RowSink for PlaneSink {
    fn on_row(&mut self, y: &[u8], u: &[u8], v: &[u8], mb_y: usize) {
        self.y.extend_from_slice(y);
        self.u.extend_from_slice(u);
        self.v.extend_from_slice(v);
        self.mb_rows.push(mb_y);
    }

    fn on_row_dither(&mut self, _mb_y: usize, dither: &[u8]) {
        self.dither.push(dither.to_vec());
    }
}
