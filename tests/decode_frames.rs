//! End-to-end decode scenarios over authored bitstreams.

mod common;

use common::{build_frame, FrameConfig, Luma, MbSpec, PlaneSink, SegmentConfig, Uv};
use vp8core::{decode_frame, DecodeError, PictureInfo};

fn decode(data: &[u8], header: &vp8core::FrameHeader, width: u16, height: u16) -> PlaneSink {
    let mut sink = PlaneSink::default();
    decode_frame(data, &PictureInfo::new(width, height), header, &mut sink).unwrap();
    sink
}

/// Smallest frame: one macroblock, no filter (profile 3), every
/// coefficient skipped, whole-block DC prediction. With neither an above
/// row nor a left column, DC prediction settles on 128 for all planes.
#[test]
fn smallest_frame_decodes_to_flat_gray() {
    let mut cfg = FrameConfig::new(16, 16);
    cfg.version = 3;
    cfg.skip_prob = Some(255);

    let built = build_frame(&cfg, &[MbSpec::skipped(Luma::Dc)]);
    let (data, header) = built.assemble();
    let out = decode(&data, &header, 16, 16);

    assert_eq!(out.y.len(), 16 * 16);
    assert_eq!(out.u.len(), 8 * 8);
    assert!(out.y.iter().all(|&p| p == 128));
    assert!(out.u.iter().all(|&p| p == 128));
    assert!(out.v.iter().all(|&p| p == 128));
    assert_eq!(out.mb_rows, vec![0]);
}

/// TrueMotion with zero residual: every sample is
/// clip(top + left - top_left) = clip(127 + 129 - 127) = 129.
#[test]
fn tm_prediction_on_frame_edges() {
    let mut cfg = FrameConfig::new(16, 16);
    cfg.version = 3;
    cfg.skip_prob = Some(255);

    let mut mb = MbSpec::skipped(Luma::Tm);
    mb.uv = Uv::Tm;
    let built = build_frame(&cfg, &[mb]);
    let (data, header) = built.assemble();
    let out = decode(&data, &header, 16, 16);

    assert!(out.y.iter().all(|&p| p == 129));
    assert!(out.u.iter().all(|&p| p == 129));
    assert!(out.v.iter().all(|&p| p == 129));
}

/// Decoding the same bytes twice must produce identical planes.
#[test]
fn decode_is_idempotent() {
    let mut cfg = FrameConfig::new(32, 32);
    cfg.log2_partitions = 1;
    cfg.skip_prob = Some(128);

    let mut mbs = vec![MbSpec::dc16(0); 4];
    mbs[0] = MbSpec::dc16(40);
    mbs[3].y_levels[5][1] = 3; // an AC coefficient in the last macroblock
    let built = build_frame(&cfg, &mbs);
    let (data, header) = built.assemble();

    let a = decode(&data, &header, 32, 32);
    let b = decode(&data, &header, 32, 32);
    assert_eq!(a.y, b.y);
    assert_eq!(a.u, b.u);
    assert_eq!(a.v, b.v);
}

/// Two residual partitions: partition 0 carries row 0, partition 1 row 1.
/// Swapping the partition contents (with rewritten length prefixes) must
/// move the coefficients from row 0 to row 1.
#[test]
fn partition_rotation_assigns_rows() {
    let mut cfg = FrameConfig::new(32, 32);
    cfg.log2_partitions = 1;
    cfg.skip_prob = Some(128);

    // Only the top-left macroblock carries a Y2 DC level of 40: at the
    // base quantizer the WHT hands every sub-block a DC of 40, which the
    // IDCT turns into +5 per pixel.
    let mut mbs = vec![MbSpec::dc16(0); 4];
    mbs[0] = MbSpec::dc16(40);
    let built = build_frame(&cfg, &mbs);

    let (data, header) = built.assemble();
    let baseline = decode(&data, &header, 32, 32);
    // Row 0 starts from the no-neighbor DC of 128, plus the residual.
    assert_eq!(baseline.y[0], 133);
    // Row 1 predicts from row 0's reconstruction.
    assert_eq!(baseline.y[16 * 32], 133);

    // Swap the two partitions' bytes.
    let swapped = common::BuiltFrame {
        control: built.control.clone(),
        partitions: vec![built.partitions[1].clone(), built.partitions[0].clone()],
        version: built.version,
    };
    let (data, header) = swapped.assemble();
    let out = decode(&data, &header, 32, 32);

    // The coefficients now land in macroblock row 1.
    assert_eq!(out.y[0], 128);
    assert_eq!(out.y[16 * 32], 133);
}

/// Two segments with distinct absolute quantizers: the same coefficient
/// level reconstructs differently under each segment's dequantizer.
#[test]
fn segment_quantizers_differ_per_macroblock() {
    let mut cfg = FrameConfig::new(32, 16);
    cfg.skip_prob = Some(128);
    cfg.segments = Some(SegmentConfig {
        update_map: true,
        absolute: true,
        quantizer: [Some(10), Some(40), None, None],
        filter_strength: [None; 4],
        tree_probs: [128, 128, 128],
    });

    let mut mb0 = MbSpec::dc16(4);
    mb0.segment_id = 0;
    let mut mb1 = MbSpec::dc16(4);
    mb1.segment_id = 1;

    let built = build_frame(&cfg, &[mb0, mb1]);
    let (data, header) = built.assemble();
    let out = decode(&data, &header, 32, 16);

    // Segment 0: y2dc = 2 * dc_quant(10) = 26; level 4 -> DC 13 -> +2.
    assert_eq!(out.y[0], 130);
    // Segment 1: y2dc = 2 * dc_quant(40) = 74; level 4 -> DC 37 -> +5,
    // on top of the DC prediction from the left macroblock's edge.
    assert_eq!(out.y[16], 135);
}

/// The same residuals with the simple loop filter off and on: boundary
/// pixels move, interior pixels of whole-block macroblocks do not.
#[test]
fn simple_loop_filter_touches_only_edges() {
    let build = |level: u8| {
        let mut cfg = FrameConfig::new(32, 16);
        cfg.version = 1; // profile 1: simple loop filter
        cfg.filter_level = level;
        cfg.yac_base = 40;
        cfg.skip_prob = Some(128);

        let mb0 = MbSpec::skipped(Luma::Dc);
        let mb1 = MbSpec::dc16(4); // step of +5 across the boundary
        let built = build_frame(&cfg, &[mb0, mb1]);
        built.assemble()
    };

    let (data_off, header_off) = build(0);
    let off = decode(&data_off, &header_off, 32, 16);
    let (data_on, header_on) = build(32);
    let on = decode(&data_on, &header_on, 32, 16);

    for row in 0..16 {
        let r = |plane: &Vec<u8>, col: usize| plane[row * 32 + col];
        // The macroblock boundary sits between columns 15 and 16.
        assert_eq!(r(&off.y, 15), 128);
        assert_eq!(r(&off.y, 16), 133);
        assert_eq!(r(&on.y, 15), 129, "row {row}");
        assert_eq!(r(&on.y, 16), 132, "row {row}");
        // Interior samples are identical with the filter on or off.
        for col in (0..15).chain(17..32) {
            assert_eq!(r(&off.y, col), r(&on.y, col), "row {row} col {col}");
        }
    }
    // The simple filter never touches chroma.
    assert_eq!(off.u, on.u);
    assert_eq!(off.v, on.v);
}

/// Truncating the final partition must not fail the decode, and rows
/// served by intact partitions must be unaffected.
#[test]
fn truncated_final_partition_is_tolerated() {
    let mut cfg = FrameConfig::new(32, 32);
    cfg.log2_partitions = 1;
    cfg.skip_prob = Some(128);

    let mut mbs = vec![MbSpec::dc16(0); 4];
    mbs[0] = MbSpec::dc16(40);
    mbs[2].y_levels[3][2] = 7;
    let built = build_frame(&cfg, &mbs);
    let (data, header) = built.assemble();
    let baseline = decode(&data, &header, 32, 32);

    // Drop the tail of partition 1 (the last partition absorbs the blob's
    // remainder, so shortening the blob shortens it).
    for cut in 1..=6 {
        let mut short = data.clone();
        short.truncate(data.len() - cut);

        let mut sink = PlaneSink::default();
        decode_frame(
            &short,
            &PictureInfo::new(32, 32),
            &vp8core::FrameHeader::keyframe(0, built.control.len() as u32),
            &mut sink,
        )
        .unwrap();

        // Macroblock row 0 came from partition 0 and must match exactly.
        assert_eq!(sink.y[..16 * 32], baseline.y[..16 * 32], "cut {cut}");
        assert_eq!(sink.u[..8 * 16], baseline.u[..8 * 16], "cut {cut}");
    }
}

/// A control partition cut short is fatal, unlike residual truncation.
#[test]
fn truncated_control_partition_fails() {
    let mut cfg = FrameConfig::new(16, 16);
    cfg.version = 3;
    cfg.skip_prob = Some(255);
    let built = build_frame(&cfg, &[MbSpec::skipped(Luma::Dc)]);
    let (data, mut header) = built.assemble();

    header.partition_length = data.len() as u32 + 10;
    let mut sink = PlaneSink::default();
    let err = decode_frame(&data, &PictureInfo::new(16, 16), &header, &mut sink);
    assert!(matches!(err, Err(DecodeError::TruncatedBitstream)));
}

/// Sub-block prediction modes steer through the mode trees: an all-DC
/// i4x4 macroblock and an all-HU one part ways on the very first pixel.
#[test]
fn bpred_modes_reach_their_leaves() {
    let build = |mode: u8| {
        let mut cfg = FrameConfig::new(16, 16);
        cfg.version = 3;
        cfg.skip_prob = Some(255);
        let mut mb = MbSpec::skipped(Luma::B);
        mb.bpred = [mode; 16];
        let built = build_frame(&cfg, &[mb]);
        built.assemble()
    };

    // DC averages the 127 above row and 129 left column to 128.
    let (data, header) = build(0);
    let dc = decode(&data, &header, 16, 16);
    assert_eq!(dc.y[0], 128);

    // HU extrapolates the left column, all 129 on the frame edge.
    let (data, header) = build(9);
    let hu = decode(&data, &header, 16, 16);
    assert_eq!(hu.y[0], 129);

    assert_ne!(dc.y, hu.y);

    // Every mode must decode cleanly, one frame per mode.
    for mode in 0..10u8 {
        let (data, header) = build(mode);
        let out = decode(&data, &header, 16, 16);
        assert_eq!(out.y.len(), 256, "mode {mode}");
    }
}

/// Dither strength follows the chroma quantizer and shuts off as soon as
/// a macroblock carries chroma coefficients.
#[test]
fn dither_strength_follows_quantizer_and_chroma_activity() {
    // Finest quantizer, no chroma coefficients: full amplitude.
    let mut cfg = FrameConfig::new(16, 16);
    cfg.version = 3;
    cfg.skip_prob = Some(255);
    let built = build_frame(&cfg, &[MbSpec::skipped(Luma::Dc)]);
    let (data, header) = built.assemble();
    let out = decode(&data, &header, 16, 16);
    assert_eq!(out.dither, vec![vec![8]]);

    // A chroma coefficient in the macroblock gates its dither off.
    let mut cfg = FrameConfig::new(16, 16);
    cfg.skip_prob = Some(128);
    let mut mb = MbSpec::dc16(0);
    mb.uv_levels[0][1] = 2;
    let built = build_frame(&cfg, &[mb]);
    let (data, header) = built.assemble();
    let out = decode(&data, &header, 16, 16);
    assert_eq!(out.dither, vec![vec![0]]);

    // A coarse chroma quantizer never dithers.
    let mut cfg = FrameConfig::new(16, 16);
    cfg.version = 3;
    cfg.yac_base = 40;
    cfg.skip_prob = Some(255);
    let built = build_frame(&cfg, &[MbSpec::skipped(Luma::Dc)]);
    let (data, header) = built.assemble();
    let out = decode(&data, &header, 16, 16);
    assert_eq!(out.dither, vec![vec![0]]);
}

/// Larger coefficient magnitudes travel through the category trees and
/// come back out: a cat6-range level on a flat block shifts the whole
/// block by level * quantizer worth of DC.
#[test]
fn large_coefficients_round_trip_the_category_trees() {
    let mut cfg = FrameConfig::new(16, 16);
    cfg.skip_prob = Some(128);

    // One macroblock, i4x4 so levels carry their own DC; give the first
    // sub-block DC levels from every magnitude category.
    for level in [1i32, 2, 4, 5, 8, 12, 20, 40, 70, 400, -70, -400] {
        let mut mb = MbSpec::skipped(Luma::B);
        mb.skip = false;
        mb.y_levels[0][0] = level;
        let built = build_frame(&cfg, &[mb]);
        let (data, header) = built.assemble();
        let out = decode(&data, &header, 16, 16);

        // DC quantizer at base 0 is 4; the IDCT adds (4*level + 4) >> 3.
        let expected = (128 + ((4 * level + 4) >> 3)).clamp(0, 255) as u8;
        assert_eq!(out.y[0], expected, "level {level}");
    }
}
