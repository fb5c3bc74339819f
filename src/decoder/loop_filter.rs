//! In-loop deblocking filter kernels (Section 15).
//!
//! Horizontal variants filter a vertical edge and work on an 8-byte window
//! `p3 p2 p1 p0 | q0 q1 q2 q3` taken from one pixel row. Vertical variants
//! filter a horizontal edge through a `(buf, point, stride)` view, where
//! `point` addresses `q0` and the `p` pixels sit above it.

#[inline]
fn c(val: i32) -> i32 {
    val.clamp(-128, 127)
}

// unsigned sample to signed working value
#[inline]
fn u2s(val: u8) -> i32 {
    i32::from(val) - 128
}

// signed working value back to an unsigned sample
#[inline]
fn s2u(val: i32) -> u8 {
    (c(val) + 128) as u8
}

/// Section 15.2: adjust p0/q0 across the edge. Returns the outer delta,
/// which the subblock filter halves for p1/q1.
#[inline]
fn common_adjust(use_outer_taps: bool, p1: &mut u8, p0: &mut u8, q0: &mut u8, q1: &mut u8) -> i32 {
    let ps1 = u2s(*p1);
    let ps0 = u2s(*p0);
    let qs0 = u2s(*q0);
    let qs1 = u2s(*q1);

    let a = c((if use_outer_taps { c(ps1 - qs1) } else { 0 }) + 3 * (qs0 - ps0));
    let f1 = c(a + 4) >> 3;
    let f2 = c(a + 3) >> 3;

    *q0 = s2u(qs0 - f1);
    *p0 = s2u(ps0 + f2);

    f1
}

/// Section 15.1: the simple filter's edge activity test.
#[inline]
fn simple_threshold(edge_limit: u8, p1: u8, p0: u8, q0: u8, q1: u8) -> bool {
    i32::from(p0.abs_diff(q0)) * 2 + i32::from(p1.abs_diff(q1)) / 2 <= i32::from(edge_limit)
}

/// Section 15.3: the normal filter's full activity test over 8 pixels.
#[inline]
#[allow(clippy::too_many_arguments)]
fn should_filter(
    interior_limit: u8,
    edge_limit: u8,
    p3: u8,
    p2: u8,
    p1: u8,
    p0: u8,
    q0: u8,
    q1: u8,
    q2: u8,
    q3: u8,
) -> bool {
    simple_threshold(edge_limit, p1, p0, q0, q1)
        && p3.abs_diff(p2) <= interior_limit
        && p2.abs_diff(p1) <= interior_limit
        && p1.abs_diff(p0) <= interior_limit
        && q3.abs_diff(q2) <= interior_limit
        && q2.abs_diff(q1) <= interior_limit
        && q1.abs_diff(q0) <= interior_limit
}

/// Section 15.3: does the edge look like a real feature rather than
/// quantization noise?
#[inline]
fn high_edge_variance(threshold: u8, p1: u8, p0: u8, q0: u8, q1: u8) -> bool {
    p1.abs_diff(p0) > threshold || q1.abs_diff(q0) > threshold
}

/// Apply the four-pixel filter body shared by the subblock edge filter.
#[inline]
fn subblock_adjust(hev_threshold: u8, p1: &mut u8, p0: &mut u8, q0: &mut u8, q1: &mut u8) {
    let hev = high_edge_variance(hev_threshold, *p1, *p0, *q0, *q1);
    let a = (common_adjust(hev, p1, p0, q0, q1) + 1) >> 1;
    if !hev {
        *q1 = s2u(u2s(*q1) - a);
        *p1 = s2u(u2s(*p1) + a);
    }
}

/// Apply the six-tap macroblock-edge filter body.
#[inline]
#[allow(clippy::too_many_arguments)]
fn mbedge_adjust(
    hev_threshold: u8,
    p2: &mut u8,
    p1: &mut u8,
    p0: &mut u8,
    q0: &mut u8,
    q1: &mut u8,
    q2: &mut u8,
) {
    if high_edge_variance(hev_threshold, *p1, *p0, *q0, *q1) {
        common_adjust(true, p1, p0, q0, q1);
        return;
    }

    let ps2 = u2s(*p2);
    let ps1 = u2s(*p1);
    let ps0 = u2s(*p0);
    let qs0 = u2s(*q0);
    let qs1 = u2s(*q1);
    let qs2 = u2s(*q2);

    let w = c(c(ps1 - qs1) + 3 * (qs0 - ps0));

    let a = c((27 * w + 63) >> 7);
    *q0 = s2u(qs0 - a);
    *p0 = s2u(ps0 + a);

    let a = c((18 * w + 63) >> 7);
    *q1 = s2u(qs1 - a);
    *p1 = s2u(ps1 + a);

    let a = c((9 * w + 63) >> 7);
    *q2 = s2u(qs2 - a);
    *p2 = s2u(ps2 + a);
}

/// Simple filter on a vertical edge: `window` is `p3..q3` of one row.
pub(crate) fn simple_segment_horizontal(edge_limit: u8, window: &mut [u8]) {
    let w: &mut [u8; 8] = (&mut window[..8]).try_into().unwrap();
    let (mut p1, mut p0, mut q0, mut q1) = (w[2], w[3], w[4], w[5]);
    if simple_threshold(edge_limit, p1, p0, q0, q1) {
        common_adjust(true, &mut p1, &mut p0, &mut q0, &mut q1);
        w[3] = p0;
        w[4] = q0;
    }
}

/// Simple filter on a horizontal edge; `point` addresses `q0`.
pub(crate) fn simple_segment_vertical(edge_limit: u8, buf: &mut [u8], point: usize, stride: usize) {
    let mut p1 = buf[point - 2 * stride];
    let mut p0 = buf[point - stride];
    let mut q0 = buf[point];
    let mut q1 = buf[point + stride];

    if simple_threshold(edge_limit, p1, p0, q0, q1) {
        common_adjust(true, &mut p1, &mut p0, &mut q0, &mut q1);
        buf[point - stride] = p0;
        buf[point] = q0;
    }
}

/// Normal filter, interior (subblock) vertical edge, one row window.
pub(crate) fn subblock_filter_horizontal(
    hev_threshold: u8,
    interior_limit: u8,
    edge_limit: u8,
    window: &mut [u8],
) {
    let w: &mut [u8; 8] = (&mut window[..8]).try_into().unwrap();
    if should_filter(
        interior_limit,
        edge_limit,
        w[0],
        w[1],
        w[2],
        w[3],
        w[4],
        w[5],
        w[6],
        w[7],
    ) {
        let (mut p1, mut p0, mut q0, mut q1) = (w[2], w[3], w[4], w[5]);
        subblock_adjust(hev_threshold, &mut p1, &mut p0, &mut q0, &mut q1);
        w[2] = p1;
        w[3] = p0;
        w[4] = q0;
        w[5] = q1;
    }
}

/// Normal filter, interior (subblock) horizontal edge.
pub(crate) fn subblock_filter_vertical(
    hev_threshold: u8,
    interior_limit: u8,
    edge_limit: u8,
    buf: &mut [u8],
    point: usize,
    stride: usize,
) {
    let p3 = buf[point - 4 * stride];
    let p2 = buf[point - 3 * stride];
    let mut p1 = buf[point - 2 * stride];
    let mut p0 = buf[point - stride];
    let mut q0 = buf[point];
    let mut q1 = buf[point + stride];
    let q2 = buf[point + 2 * stride];
    let q3 = buf[point + 3 * stride];

    if should_filter(
        interior_limit,
        edge_limit,
        p3,
        p2,
        p1,
        p0,
        q0,
        q1,
        q2,
        q3,
    ) {
        subblock_adjust(hev_threshold, &mut p1, &mut p0, &mut q0, &mut q1);
        buf[point - 2 * stride] = p1;
        buf[point - stride] = p0;
        buf[point] = q0;
        buf[point + stride] = q1;
    }
}

/// Normal filter, macroblock vertical edge, one row window.
pub(crate) fn macroblock_filter_horizontal(
    hev_threshold: u8,
    interior_limit: u8,
    edge_limit: u8,
    window: &mut [u8],
) {
    let w: &mut [u8; 8] = (&mut window[..8]).try_into().unwrap();
    if should_filter(
        interior_limit,
        edge_limit,
        w[0],
        w[1],
        w[2],
        w[3],
        w[4],
        w[5],
        w[6],
        w[7],
    ) {
        let (mut p2, mut p1, mut p0) = (w[1], w[2], w[3]);
        let (mut q0, mut q1, mut q2) = (w[4], w[5], w[6]);
        mbedge_adjust(
            hev_threshold,
            &mut p2,
            &mut p1,
            &mut p0,
            &mut q0,
            &mut q1,
            &mut q2,
        );
        w[1] = p2;
        w[2] = p1;
        w[3] = p0;
        w[4] = q0;
        w[5] = q1;
        w[6] = q2;
    }
}

/// Normal filter, macroblock horizontal edge.
pub(crate) fn macroblock_filter_vertical(
    hev_threshold: u8,
    interior_limit: u8,
    edge_limit: u8,
    buf: &mut [u8],
    point: usize,
    stride: usize,
) {
    let p3 = buf[point - 4 * stride];
    let mut p2 = buf[point - 3 * stride];
    let mut p1 = buf[point - 2 * stride];
    let mut p0 = buf[point - stride];
    let mut q0 = buf[point];
    let mut q1 = buf[point + stride];
    let mut q2 = buf[point + 2 * stride];
    let q3 = buf[point + 3 * stride];

    if should_filter(
        interior_limit,
        edge_limit,
        p3,
        p2,
        p1,
        p0,
        q0,
        q1,
        q2,
        q3,
    ) {
        mbedge_adjust(
            hev_threshold,
            &mut p2,
            &mut p1,
            &mut p0,
            &mut q0,
            &mut q1,
            &mut q2,
        );
        buf[point - 3 * stride] = p2;
        buf[point - 2 * stride] = p1;
        buf[point - stride] = p0;
        buf[point] = q0;
        buf[point + stride] = q1;
        buf[point + 2 * stride] = q2;
    }
}
