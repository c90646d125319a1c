//! Multi-level separable CDF 9/7 wavelet transform for 3-D volumes.
//!
//! The transform uses the lifting factorization of the CDF 9/7 filter bank
//! with symmetric boundary extension. One of two 1-D kernels is chosen by
//! the parity of the signal length. After each analysis step the line is
//! de-interleaved so that the approximation (low-pass) samples form a
//! prefix, which is all the next level operates on.

use crate::math::{approx_len, num_xforms, Vec3};

// Filter bank coefficients from Cohen, Daubechies and Feauveau,
// "Biorthogonal Bases of Compactly Supported Wavelets", p. 551.
// The lifting constants below follow the factorization in
// Daubechies and Sweldens, "Factoring Wavelet Transforms into Lifting Steps".
const H: [f64; 5] = [
    0.602949018236, 0.266864118443, -0.078223266529, -0.016864118443, 0.026748757411,
];

const R0: f64 = H[0] - 2.0 * H[4] * H[1] / H[3];
const R1: f64 = H[2] - H[4] - H[4] * H[1] / H[3];
const S0: f64 = H[1] - H[3] - H[3] * R0 / R1;
const T0: f64 = H[0] - 2.0 * (H[2] - H[4]);

const ALPHA: f64 = H[4] / H[3];
const BETA: f64 = H[3] / R1;
const GAMMA: f64 = R1 / S0;
const DELTA: f64 = S0 / T0;
const EPSILON: f64 = std::f64::consts::SQRT_2 * T0;

/// Forward multi-level 3-D transform, in place.
///
/// Applies `min(num_xforms(min(nx,ny)), num_xforms(nz))` combined levels,
/// each transforming X, then Y, then Z on the current approximation box.
/// Leftover levels in the plane or the depth direction are applied
/// XY-only or Z-only afterwards.
pub fn forward_3d(buffer: &mut [f64], dims: Vec3<usize>) {
    debug_assert_eq!(buffer.len(), dims.volume());

    let levels_xy = num_xforms(dims.x().min(dims.y()));
    let levels_z = num_xforms(dims.z());
    let combined = levels_xy.min(levels_z);

    let mut scratch = Scratch::default();

    for level in 0 .. combined {
        let cube = level_box(dims, level, level);
        forward_xy(buffer, dims, cube, &mut scratch);
        forward_z(buffer, dims, cube, &mut scratch);
    }

    for level in combined .. levels_xy {
        let cube = level_box(dims, level, combined);
        forward_xy(buffer, dims, cube, &mut scratch);
    }

    for level in combined .. levels_z {
        let cube = level_box(dims, combined, level);
        forward_z(buffer, dims, cube, &mut scratch);
    }
}

/// Inverse multi-level 3-D transform, in place.
/// Undoes the exact sequence of `forward_3d` in reverse.
pub fn inverse_3d(buffer: &mut [f64], dims: Vec3<usize>) {
    debug_assert_eq!(buffer.len(), dims.volume());

    let levels_xy = num_xforms(dims.x().min(dims.y()));
    let levels_z = num_xforms(dims.z());
    let combined = levels_xy.min(levels_z);

    let mut scratch = Scratch::default();

    for level in (combined .. levels_xy).rev() {
        let cube = level_box(dims, level, combined);
        inverse_xy(buffer, dims, cube, &mut scratch);
    }

    for level in (combined .. levels_z).rev() {
        let cube = level_box(dims, combined, level);
        inverse_z(buffer, dims, cube, &mut scratch);
    }

    for level in (0 .. combined).rev() {
        let cube = level_box(dims, level, level);
        inverse_z(buffer, dims, cube, &mut scratch);
        inverse_xy(buffer, dims, cube, &mut scratch);
    }
}

/// The approximation box after `level_xy` plane halvings and `level_z` depth halvings.
fn level_box(dims: Vec3<usize>, level_xy: usize, level_z: usize) -> Vec3<usize> {
    Vec3(
        approx_len(dims.x(), level_xy),
        approx_len(dims.y(), level_xy),
        approx_len(dims.z(), level_z),
    )
}

#[derive(Default)]
struct Scratch {
    line: Vec<f64>,
    halves: Vec<f64>,
}

/// One level of rows-then-columns transforms on every Z-slice of the box.
fn forward_xy(buffer: &mut [f64], dims: Vec3<usize>, cube: Vec3<usize>, scratch: &mut Scratch) {
    let row_stride = dims.x();
    let slice_stride = dims.x() * dims.y();

    for z in 0 .. cube.z() {
        for y in 0 .. cube.y() {
            let row = z * slice_stride + y * row_stride;
            forward_line(&mut buffer[row .. row + cube.x()], &mut scratch.halves);
        }

        for x in 0 .. cube.x() {
            forward_strided(buffer, z * slice_stride + x, row_stride, cube.y(), scratch);
        }
    }
}

/// One level of transforms along the depth direction of the box.
fn forward_z(buffer: &mut [f64], dims: Vec3<usize>, cube: Vec3<usize>, scratch: &mut Scratch) {
    let row_stride = dims.x();
    let slice_stride = dims.x() * dims.y();

    for y in 0 .. cube.y() {
        for x in 0 .. cube.x() {
            forward_strided(buffer, y * row_stride + x, slice_stride, cube.z(), scratch);
        }
    }
}

fn inverse_xy(buffer: &mut [f64], dims: Vec3<usize>, cube: Vec3<usize>, scratch: &mut Scratch) {
    let row_stride = dims.x();
    let slice_stride = dims.x() * dims.y();

    for z in 0 .. cube.z() {
        for x in 0 .. cube.x() {
            inverse_strided(buffer, z * slice_stride + x, row_stride, cube.y(), scratch);
        }

        for y in 0 .. cube.y() {
            let row = z * slice_stride + y * row_stride;
            inverse_line(&mut buffer[row .. row + cube.x()], &mut scratch.halves);
        }
    }
}

fn inverse_z(buffer: &mut [f64], dims: Vec3<usize>, cube: Vec3<usize>, scratch: &mut Scratch) {
    let row_stride = dims.x();
    let slice_stride = dims.x() * dims.y();

    for y in 0 .. cube.y() {
        for x in 0 .. cube.x() {
            inverse_strided(buffer, y * row_stride + x, slice_stride, cube.z(), scratch);
        }
    }
}

/// Gather a strided line, transform it, scatter it back.
fn forward_strided(buffer: &mut [f64], start: usize, stride: usize, count: usize, scratch: &mut Scratch) {
    scratch.line.clear();
    scratch.line.extend((0 .. count).map(|index| buffer[start + index * stride]));
    forward_line(&mut scratch.line, &mut scratch.halves);
    for (index, &value) in scratch.line.iter().enumerate() {
        buffer[start + index * stride] = value;
    }
}

fn inverse_strided(buffer: &mut [f64], start: usize, stride: usize, count: usize, scratch: &mut Scratch) {
    scratch.line.clear();
    scratch.line.extend((0 .. count).map(|index| buffer[start + index * stride]));
    inverse_line(&mut scratch.line, &mut scratch.halves);
    for (index, &value) in scratch.line.iter().enumerate() {
        buffer[start + index * stride] = value;
    }
}

/// Analyze one line and de-interleave it:
/// even positions (low-pass) to the front, odd positions (high-pass) to the back.
fn forward_line(line: &mut [f64], halves: &mut Vec<f64>) {
    if line.len() % 2 == 0 { analysis_even(line) } else { analysis_odd(line) }

    halves.clear();
    halves.extend(line.iter().step_by(2));
    halves.extend(line.iter().skip(1).step_by(2));
    line.copy_from_slice(halves);
}

/// Re-interleave one line and synthesize it.
fn inverse_line(line: &mut [f64], halves: &mut Vec<f64>) {
    let low_count = (line.len() + 1) / 2;

    halves.resize(line.len(), 0.0);
    for (index, &value) in line[.. low_count].iter().enumerate() {
        halves[index * 2] = value;
    }
    for (index, &value) in line[low_count ..].iter().enumerate() {
        halves[index * 2 + 1] = value;
    }
    line.copy_from_slice(halves);

    if line.len() % 2 == 0 { synthesis_even(line) } else { synthesis_odd(line) }
}

/// Lifting analysis for even-length signals with symmetric extension.
fn analysis_even(signal: &mut [f64]) {
    let len = signal.len();
    debug_assert!(len >= 4 && len % 2 == 0);

    for index in (1 .. len - 2).step_by(2) {
        signal[index] += ALPHA * (signal[index - 1] + signal[index + 1]);
    }
    signal[len - 1] += 2.0 * ALPHA * signal[len - 2];

    signal[0] += 2.0 * BETA * signal[1];
    for index in (2 .. len).step_by(2) {
        signal[index] += BETA * (signal[index + 1] + signal[index - 1]);
    }

    for index in (1 .. len - 2).step_by(2) {
        signal[index] += GAMMA * (signal[index - 1] + signal[index + 1]);
    }
    signal[len - 1] += 2.0 * GAMMA * signal[len - 2];

    signal[0] = EPSILON * (signal[0] + 2.0 * DELTA * signal[1]);
    for index in (2 .. len).step_by(2) {
        signal[index] = EPSILON * (signal[index] + DELTA * (signal[index + 1] + signal[index - 1]));
    }

    for index in (1 .. len).step_by(2) {
        signal[index] /= -EPSILON;
    }
}

/// Lifting synthesis for even-length signals, the exact reverse of `analysis_even`.
fn synthesis_even(signal: &mut [f64]) {
    let len = signal.len();
    debug_assert!(len >= 4 && len % 2 == 0);

    for index in (1 .. len).step_by(2) {
        signal[index] *= -EPSILON;
    }

    signal[0] = signal[0] / EPSILON - 2.0 * DELTA * signal[1];
    for index in (2 .. len).step_by(2) {
        signal[index] = signal[index] / EPSILON - DELTA * (signal[index + 1] + signal[index - 1]);
    }

    for index in (1 .. len - 2).step_by(2) {
        signal[index] -= GAMMA * (signal[index - 1] + signal[index + 1]);
    }
    signal[len - 1] -= 2.0 * GAMMA * signal[len - 2];

    signal[0] -= 2.0 * BETA * signal[1];
    for index in (2 .. len).step_by(2) {
        signal[index] -= BETA * (signal[index + 1] + signal[index - 1]);
    }

    for index in (1 .. len - 2).step_by(2) {
        signal[index] -= ALPHA * (signal[index - 1] + signal[index + 1]);
    }
    signal[len - 1] -= 2.0 * ALPHA * signal[len - 2];
}

/// Lifting analysis for odd-length signals with symmetric extension.
fn analysis_odd(signal: &mut [f64]) {
    let len = signal.len();
    debug_assert!(len >= 3 && len % 2 == 1);

    for index in (1 .. len).step_by(2) {
        signal[index] += ALPHA * (signal[index - 1] + signal[index + 1]);
    }

    signal[0] += 2.0 * BETA * signal[1];
    for index in (2 .. len - 2).step_by(2) {
        signal[index] += BETA * (signal[index + 1] + signal[index - 1]);
    }
    signal[len - 1] += 2.0 * BETA * signal[len - 2];

    for index in (1 .. len).step_by(2) {
        signal[index] += GAMMA * (signal[index - 1] + signal[index + 1]);
    }

    signal[0] = EPSILON * (signal[0] + 2.0 * DELTA * signal[1]);
    for index in (2 .. len - 2).step_by(2) {
        signal[index] = EPSILON * (signal[index] + DELTA * (signal[index + 1] + signal[index - 1]));
    }
    signal[len - 1] = EPSILON * (signal[len - 1] + 2.0 * DELTA * signal[len - 2]);

    for index in (1 .. len).step_by(2) {
        signal[index] /= -EPSILON;
    }
}

/// Lifting synthesis for odd-length signals, the exact reverse of `analysis_odd`.
fn synthesis_odd(signal: &mut [f64]) {
    let len = signal.len();
    debug_assert!(len >= 3 && len % 2 == 1);

    for index in (1 .. len).step_by(2) {
        signal[index] *= -EPSILON;
    }

    signal[0] = signal[0] / EPSILON - 2.0 * DELTA * signal[1];
    for index in (2 .. len - 2).step_by(2) {
        signal[index] = signal[index] / EPSILON - DELTA * (signal[index + 1] + signal[index - 1]);
    }
    signal[len - 1] = signal[len - 1] / EPSILON - 2.0 * DELTA * signal[len - 2];

    for index in (1 .. len).step_by(2) {
        signal[index] -= GAMMA * (signal[index - 1] + signal[index + 1]);
    }

    signal[0] -= 2.0 * BETA * signal[1];
    for index in (2 .. len - 2).step_by(2) {
        signal[index] -= BETA * (signal[index + 1] + signal[index - 1]);
    }
    signal[len - 1] -= 2.0 * BETA * signal[len - 2];

    for index in (1 .. len).step_by(2) {
        signal[index] -= ALPHA * (signal[index - 1] + signal[index + 1]);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn wavy_volume(dims: Vec3<usize>) -> Vec<f64> {
        let mut values = Vec::with_capacity(dims.volume());
        for z in 0 .. dims.z() {
            for y in 0 .. dims.y() {
                for x in 0 .. dims.x() {
                    let v = (x as f64 * 0.7).sin() * 40.0
                        + (y as f64 * 0.4).cos() * 25.0
                        + (z as f64 * 1.3).sin() * 10.0
                        + (x * y + z) as f64 * 0.01;
                    values.push(v);
                }
            }
        }
        values
    }

    fn assert_roundtrip(dims: Vec3<usize>) {
        let original = wavy_volume(dims);
        let mut transformed = original.clone();

        forward_3d(&mut transformed, dims);
        inverse_3d(&mut transformed, dims);

        let scale: f64 = original.iter().fold(0.0, |max, value| max.max(value.abs()));
        for (&before, &after) in original.iter().zip(&transformed) {
            assert!(
                (before - after).abs() <= scale * 1e-10,
                "roundtrip failed for dims {:?}: {} became {}", dims, before, after
            );
        }
    }

    #[test]
    fn roundtrip_even_line() {
        let original: Vec<f64> = (0 .. 16).map(|index| ((index * index) % 23) as f64 - 11.0).collect();
        let mut line = original.clone();
        let mut halves = Vec::new();

        forward_line(&mut line, &mut halves);
        inverse_line(&mut line, &mut halves);

        for (&before, &after) in original.iter().zip(&line) {
            assert!((before - after).abs() < 1e-12);
        }
    }

    #[test]
    fn roundtrip_odd_line() {
        let original: Vec<f64> = (0 .. 17).map(|index| ((index * 7) % 13) as f64 * 1.5 - 9.0).collect();
        let mut line = original.clone();
        let mut halves = Vec::new();

        forward_line(&mut line, &mut halves);
        inverse_line(&mut line, &mut halves);

        for (&before, &after) in original.iter().zip(&line) {
            assert!((before - after).abs() < 1e-12);
        }
    }

    #[test]
    fn low_pass_prefix_after_one_level() {
        // a constant signal stays constant in the low-pass half,
        // and its high-pass half vanishes
        let mut line = vec![3.0; 16];
        let mut halves = Vec::new();
        forward_line(&mut line, &mut halves);

        for &detail in &line[8 ..] {
            assert!(detail.abs() < 1e-12, "detail coefficient {} should vanish", detail);
        }
    }

    #[test]
    fn roundtrip_cubes() {
        assert_roundtrip(Vec3(8, 8, 8));
        assert_roundtrip(Vec3(17, 17, 17));
        assert_roundtrip(Vec3(32, 32, 32));
    }

    #[test]
    fn roundtrip_anisotropic() {
        // more plane levels than depth levels, and the other way around
        assert_roundtrip(Vec3(64, 64, 9));
        assert_roundtrip(Vec3(9, 9, 64));
        assert_roundtrip(Vec3(33, 16, 10));
        assert_roundtrip(Vec3(5, 40, 23));
    }

    #[test]
    fn degenerate_lengths_are_untouched() {
        // lengths below eight support no transform level at all
        let dims = Vec3(4, 4, 4);
        let original = wavy_volume(dims);
        let mut transformed = original.clone();

        forward_3d(&mut transformed, dims);
        assert_eq!(original, transformed);
    }
}
