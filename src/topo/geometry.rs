// --- Planar polyline helpers ---
// All coordinates are projected map units; the lon/lat layer is handled by
// whatever produced the input graph. Single-polyline measures go through
// geo's Euclidean operations on LineString.

use geo::{
    Coord, EuclideanDistance, EuclideanLength, LineInterpolatePoint, LineLocatePoint, LineString,
    Point,
};

pub type Pt = [f64; 2];

fn line_string(coords: &[Pt]) -> LineString {
    coords.iter().map(|p| Coord { x: p[0], y: p[1] }).collect()
}

pub fn dist(a: Pt, b: Pt) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

pub fn polyline_length(coords: &[Pt]) -> f64 {
    if coords.len() < 2 {
        return 0.0;
    }
    line_string(coords).euclidean_length()
}

/// Project point to polyline.
/// Returns (distance_along_polyline, distance_from_polyline, projected_point).
pub fn project_point_to_polyline(point: Pt, coords: &[Pt]) -> Option<(f64, f64, Pt)> {
    if coords.len() < 2 {
        if coords.len() == 1 {
            return Some((0.0, dist(point, coords[0]), coords[0]));
        }
        return None;
    }

    let ls = line_string(coords);
    let p = Point::new(point[0], point[1]);

    let fraction = ls.line_locate_point(&p)?;
    let projected = ls.line_interpolate_point(fraction)?;

    let distance_along = fraction * ls.euclidean_length();
    let distance_to_line = p.euclidean_distance(&projected);

    Some((
        distance_along,
        distance_to_line,
        [projected.x(), projected.y()],
    ))
}

/// Point at a fraction of the total arc length.
pub fn interpolate_along_polyline(coords: &[Pt], fraction: f64) -> Pt {
    match coords {
        [] => [0.0, 0.0],
        [p] => *p,
        _ => {
            let ls = line_string(coords);
            match ls.line_interpolate_point(fraction.clamp(0.0, 1.0)) {
                Some(p) => [p.x(), p.y()],
                None => coords[0],
            }
        }
    }
}

fn interpolate_at_dist(coords: &[Pt], target: f64) -> Pt {
    let total = polyline_length(coords);
    if total <= f64::EPSILON {
        return *coords.first().unwrap_or(&[0.0, 0.0]);
    }
    interpolate_along_polyline(coords, target / total)
}

/// Insert points so that no segment exceeds `max_spacing`.
pub fn densify_polyline(coords: &[Pt], max_spacing: f64) -> Vec<Pt> {
    if coords.len() < 2 || max_spacing <= 0.0 {
        return coords.to_vec();
    }
    let mut out = Vec::with_capacity(coords.len() * 2);
    out.push(coords[0]);
    for w in coords.windows(2) {
        let (p1, p2) = (w[0], w[1]);
        let seg_len = dist(p1, p2);
        if seg_len > max_spacing {
            let steps = (seg_len / max_spacing).ceil() as usize;
            for j in 1..steps {
                let t = j as f64 / steps as f64;
                out.push([p1[0] + (p2[0] - p1[0]) * t, p1[1] + (p2[1] - p1[1]) * t]);
            }
        }
        out.push(p2);
    }
    out
}

/// Resample to exactly `n` points at equal arc-length spacing (endpoints
/// preserved). `n` must be >= 2.
pub fn resample_polyline(coords: &[Pt], n: usize) -> Vec<Pt> {
    let total = polyline_length(coords);
    (0..n)
        .map(|i| {
            let target = total * i as f64 / (n - 1) as f64;
            interpolate_at_dist(coords, target)
        })
        .collect()
}

/// Extract the stretch between two arc-length fractions, keeping interior
/// vertices that fall strictly inside the range.
pub fn extract_sub_polyline(coords: &[Pt], start_frac: f64, end_frac: f64) -> Vec<Pt> {
    let start = start_frac.clamp(0.0, 1.0);
    let end = end_frac.clamp(0.0, 1.0);
    if start >= end {
        return vec![interpolate_along_polyline(coords, start)];
    }

    let total = polyline_length(coords);
    let start_dist = total * start;
    let end_dist = total * end;

    let mut result = vec![interpolate_at_dist(coords, start_dist)];
    let mut walked = 0.0;
    for w in coords.windows(2) {
        let next = walked + dist(w[0], w[1]);
        if next > start_dist + 1e-4 && next < end_dist - 1e-4 {
            result.push(w[1]);
        }
        walked = next;
    }
    result.push(interpolate_at_dist(coords, end_dist));
    result
}

/// Mean distance from densified samples of `a` to polyline `b`,
/// symmetrized over both directions.
pub fn mean_polyline_distance(a: &[Pt], b: &[Pt], sample_spacing: f64) -> f64 {
    let directed = |source: &[Pt], target: &[Pt]| -> f64 {
        let dense = densify_polyline(source, sample_spacing);
        let mut sum = 0.0;
        for &p in &dense {
            sum += project_point_to_polyline(p, target)
                .map(|(_, d, _)| d)
                .unwrap_or(f64::INFINITY);
        }
        sum / dense.len() as f64
    };
    0.5 * (directed(a, b) + directed(b, a))
}

/// Fraction of `a`'s length that runs within `threshold` of `b`, plus the
/// arc-length fraction interval of the matched stretch on both polylines.
/// Only the longest contiguous run counts.
pub fn overlap_interval(
    a: &[Pt],
    b: &[Pt],
    threshold: f64,
    sample_spacing: f64,
) -> Option<OverlapInterval> {
    let a_len = polyline_length(a);
    let b_len = polyline_length(b);
    if a_len <= f64::EPSILON || b_len <= f64::EPSILON {
        return None;
    }

    let dense = densify_polyline(a, sample_spacing);
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut run_start: Option<usize> = None;
    let mut b_hits: Vec<Option<f64>> = Vec::with_capacity(dense.len());

    for (i, &p) in dense.iter().enumerate() {
        let hit = project_point_to_polyline(p, b)
            .filter(|(_, d, _)| *d <= threshold)
            .map(|(along, _, _)| along);
        b_hits.push(hit);
        match (hit, run_start) {
            (Some(_), None) => run_start = Some(i),
            (None, Some(s)) => {
                runs.push((s, i - 1));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = run_start {
        runs.push((s, dense.len() - 1));
    }

    let (s, e) = runs
        .into_iter()
        .max_by_key(|(s, e)| e - s)
        .filter(|(s, e)| e > s)?;

    // Arc-length position of each dense sample along a.
    let mut along_a = vec![0.0; dense.len()];
    for i in 1..dense.len() {
        along_a[i] = along_a[i - 1] + dist(dense[i - 1], dense[i]);
    }

    let b_start = b_hits[s].unwrap();
    let b_end = b_hits[e].unwrap();
    Some(OverlapInterval {
        a_range: (along_a[s] / a_len, along_a[e] / a_len),
        b_range: (
            (b_start / b_len).min(b_end / b_len),
            (b_start / b_len).max(b_end / b_len),
        ),
        shared_len: along_a[e] - along_a[s],
        reversed: b_start > b_end,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct OverlapInterval {
    /// Arc-length fraction range of the matched stretch on a.
    pub a_range: (f64, f64),
    /// Arc-length fraction range on b (normalized ascending).
    pub b_range: (f64, f64),
    /// Length of the matched stretch in map units (measured on a).
    pub shared_len: f64,
    /// True if b runs the matched stretch in the opposite direction.
    pub reversed: bool,
}

/// Weighted average centerline of several full-overlap polylines: the
/// longest input is the reference, each sample is the weighted mean of the
/// reference point and its projections onto the others.
pub fn weighted_average_centerline(polylines: &[(&[Pt], f64)], sample_spacing: f64) -> Vec<Pt> {
    if polylines.is_empty() {
        return vec![];
    }
    if polylines.len() == 1 {
        return polylines[0].0.to_vec();
    }

    let ref_idx = polylines
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            polyline_length(a.0)
                .partial_cmp(&polyline_length(b.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap();

    let ref_coords = polylines[ref_idx].0;
    let ref_len = polyline_length(ref_coords);
    let num_samples = ((ref_len / sample_spacing).ceil() as usize).max(1);

    let mut centerline = Vec::with_capacity(num_samples + 1);
    for i in 0..=num_samples {
        let fraction = i as f64 / num_samples as f64;
        let ref_pt = interpolate_along_polyline(ref_coords, fraction);

        let mut sum_x = ref_pt[0] * polylines[ref_idx].1;
        let mut sum_y = ref_pt[1] * polylines[ref_idx].1;
        let mut sum_w = polylines[ref_idx].1;

        for (idx, (coords, w)) in polylines.iter().enumerate() {
            if idx == ref_idx {
                continue;
            }
            if let Some((_, _, proj)) = project_point_to_polyline(ref_pt, coords) {
                sum_x += proj[0] * w;
                sum_y += proj[1] * w;
                sum_w += w;
            }
        }
        centerline.push([sum_x / sum_w, sum_y / sum_w]);
    }
    centerline
}

/// One Chaikin corner-cutting pass with pinned endpoints.
fn chaikin_pass(coords: &[Pt]) -> Vec<Pt> {
    if coords.len() < 3 {
        return coords.to_vec();
    }
    let mut out = Vec::with_capacity(coords.len() * 2);
    out.push(coords[0]);
    for w in coords.windows(2) {
        let (p, q) = (w[0], w[1]);
        out.push([
            0.75 * p[0] + 0.25 * q[0],
            0.75 * p[1] + 0.25 * q[1],
        ]);
        out.push([
            0.25 * p[0] + 0.75 * q[0],
            0.25 * p[1] + 0.75 * q[1],
        ]);
    }
    out.push(*coords.last().unwrap());
    out
}

pub fn chaikin_smooth(coords: &[Pt], iterations: usize) -> Vec<Pt> {
    let mut result = coords.to_vec();
    for _ in 0..iterations {
        result = chaikin_pass(&result);
    }
    result
}

/// Bearing of the segment a -> b in radians, [0, 2π).
pub fn bearing(a: Pt, b: Pt) -> f64 {
    let angle = (b[1] - a[1]).atan2(b[0] - a[0]);
    if angle < 0.0 {
        angle + 2.0 * std::f64::consts::PI
    } else {
        angle
    }
}

/// Smallest absolute difference between two angles in radians.
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let d = (a - b).rem_euclid(two_pi);
    d.min(two_pi - d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_and_interpolation() {
        let line = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]];
        assert!((polyline_length(&line) - 20.0).abs() < 1e-9);
        let mid = interpolate_along_polyline(&line, 0.5);
        assert!(dist(mid, [10.0, 0.0]) < 1e-9);
    }

    #[test]
    fn projection_clamps_to_segment() {
        let line = [[0.0, 0.0], [10.0, 0.0]];
        let (along, d, proj) = project_point_to_polyline([15.0, 3.0], &line).unwrap();
        assert!((along - 10.0).abs() < 1e-9);
        assert!((d - dist([15.0, 3.0], [10.0, 0.0])).abs() < 1e-9);
        assert!(dist(proj, [10.0, 0.0]) < 1e-9);
    }

    #[test]
    fn overlap_of_parallel_lines() {
        let a = [[0.0, 0.0], [100.0, 0.0]];
        let b = [[20.0, 5.0], [80.0, 5.0]];
        let ov = overlap_interval(&a, &b, 10.0, 1.0).unwrap();
        assert!((ov.a_range.0 - 0.2).abs() < 0.02);
        assert!((ov.a_range.1 - 0.8).abs() < 0.02);
        assert!(!ov.reversed);
        assert!((ov.shared_len - 60.0).abs() < 3.0);
    }

    #[test]
    fn overlap_detects_reversal() {
        let a = [[0.0, 0.0], [100.0, 0.0]];
        let b = [[100.0, 4.0], [0.0, 4.0]];
        let ov = overlap_interval(&a, &b, 10.0, 1.0).unwrap();
        assert!(ov.reversed);
    }

    #[test]
    fn chaikin_keeps_endpoints() {
        let line = [[0.0, 0.0], [10.0, 10.0], [20.0, 0.0]];
        let smooth = chaikin_smooth(&line, 2);
        assert_eq!(smooth[0], [0.0, 0.0]);
        assert_eq!(*smooth.last().unwrap(), [20.0, 0.0]);
        assert!(smooth.len() > line.len());
        // corner is cut
        let corner_dist = smooth
            .iter()
            .map(|&p| dist(p, [10.0, 10.0]))
            .fold(f64::INFINITY, f64::min);
        assert!(corner_dist > 0.5);
    }

    #[test]
    fn centerline_of_two_parallels_is_between() {
        let a: &[Pt] = &[[0.0, 0.0], [100.0, 0.0]];
        let b: &[Pt] = &[[0.0, 10.0], [100.0, 10.0]];
        let mid = weighted_average_centerline(&[(a, 1.0), (b, 1.0)], 10.0);
        for p in mid {
            assert!((p[1] - 5.0).abs() < 1e-6);
        }
    }
}
