use crate::core::models::image::ImageStack;
use crate::engine::config::EnhancementConfig;
use nalgebra::DMatrix;
use tracing::{debug, instrument};

const BINS: usize = 256;
const MAX_CLIP_PASSES: usize = 64;

/// Rescales to `[0, 1]`. A constant frame has no contrast to recover and
/// becomes all zeros.
fn normalize(frame: &DMatrix<f64>) -> DMatrix<f64> {
    let (lo, hi) = (frame.min(), frame.max());
    let range = hi - lo;
    if !(range > 0.0) {
        return DMatrix::zeros(frame.nrows(), frame.ncols());
    }
    frame.map(|v| (v - lo) / range)
}

#[inline]
fn bin_of(v: f64) -> usize {
    ((v * (BINS - 1) as f64) as usize).min(BINS - 1)
}

/// Clipped and equalized cumulative histogram of one tile.
fn tile_lut(histogram: &mut [f64; BINS], clip: f64) {
    for _ in 0..MAX_CLIP_PASSES {
        let mut excess = 0.0;
        for h in histogram.iter_mut() {
            if *h > clip {
                excess += *h - clip;
                *h = clip;
            }
        }
        if excess < 1e-5 {
            break;
        }
        let share = excess / BINS as f64;
        histogram.iter_mut().for_each(|h| *h += share);
    }

    let total: f64 = histogram.iter().sum();
    if total <= 0.0 {
        histogram.fill(1.0);
        return;
    }
    let mut running = 0.0;
    for h in histogram.iter_mut() {
        running += *h / total;
        *h = running;
    }
    let floor = histogram[0];
    let span = 1.0 - floor;
    if span > 1e-12 {
        histogram.iter_mut().for_each(|h| *h = (*h - floor) / span);
    } else {
        histogram.fill(1.0);
    }
}

/// Offset towards the neighbouring tile used for interpolation and the
/// distance weight, from a pixel's fractional position inside its tile.
#[inline]
fn neighbour(fraction: f64, tile: usize, tiles: usize) -> (isize, f64) {
    let mut step = if fraction >= 0.5 { 1 } else { -1 };
    if (tile == 0 && step < 0) || (tile + 1 == tiles && step > 0) {
        step = 0;
    }
    (step, (fraction - 0.5).abs())
}

/// Contrast-limited adaptive histogram equalization on a `[0, 1]` frame.
pub fn clahe(frame: &DMatrix<f64>, clip_limit: f64, tile_width: usize, tile_height: usize) -> DMatrix<f64> {
    let (rows, cols) = frame.shape();
    let tiles_x = cols.div_ceil(tile_width);
    let tiles_y = rows.div_ceil(tile_height);
    let clip = clip_limit * (tile_width * tile_height) as f64 / BINS as f64;

    let mut luts = vec![[0.0f64; BINS]; tiles_x * tiles_y];
    for y in 0..rows {
        for x in 0..cols {
            let tile = (y / tile_height) * tiles_x + x / tile_width;
            luts[tile][bin_of(frame[(y, x)])] += 1.0;
        }
    }
    luts.iter_mut().for_each(|h| tile_lut(h, clip));

    DMatrix::from_fn(rows, cols, |y, x| {
        let (tx, ty) = (x / tile_width, y / tile_height);
        let fx = x as f64 / tile_width as f64 - tx as f64;
        let fy = y as f64 / tile_height as f64 - ty as f64;
        let (dx, wx) = neighbour(fx, tx, tiles_x);
        let (dy, wy) = neighbour(fy, ty, tiles_y);

        let bin = bin_of(frame[(y, x)]);
        let tx1 = tx.saturating_add_signed(dx);
        let ty1 = ty.saturating_add_signed(dy);
        let at = |tx: usize, ty: usize| luts[ty * tiles_x + tx][bin];

        let upper = (1.0 - wx) * at(tx, ty) + wx * at(tx1, ty);
        let lower = (1.0 - wx) * at(tx, ty1) + wx * at(tx1, ty1);
        (1.0 - wy) * upper + wy * lower
    })
}

/// Median over a `size × size` window clipped at the frame border.
pub fn median_filter(frame: &DMatrix<f64>, size: usize) -> DMatrix<f64> {
    let radius = size / 2;
    let (rows, cols) = frame.shape();
    let mut window = Vec::with_capacity(size * size);

    DMatrix::from_fn(rows, cols, |y, x| {
        window.clear();
        for yy in y.saturating_sub(radius)..(y + radius + 1).min(rows) {
            for xx in x.saturating_sub(radius)..(x + radius + 1).min(cols) {
                window.push(frame[(yy, xx)]);
            }
        }
        window.sort_by(|a, b| a.total_cmp(b));
        window[window.len() / 2]
    })
}

/// Full pre-alignment treatment of one frame. The result holds 8-bit levels
/// `0..=255` stored as `f64`.
pub fn enhance_frame(frame: &DMatrix<f64>, config: &EnhancementConfig) -> DMatrix<f64> {
    let normalized = normalize(frame);
    let equalized = clahe(
        &normalized,
        config.clip_limit,
        config.tile_width,
        config.tile_height,
    );
    let filtered = if config.median_size > 1 {
        median_filter(&equalized, config.median_size)
    } else {
        equalized
    };
    normalize(&filtered).map(|v| (255.0 * v).round())
}

#[instrument(skip_all, name = "enhance_stack")]
pub fn enhance_stack(stack: &ImageStack, config: &EnhancementConfig) -> ImageStack {
    debug!(
        frames = stack.len(),
        median = config.median_size,
        clip = config.clip_limit,
        "Enhancing frames before alignment"
    );
    stack.map_frames(|f| enhance_frame(f, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_frame_enhances_to_zero() {
        let frame = DMatrix::from_element(10, 10, 42.0);
        let out = enhance_frame(&frame, &EnhancementConfig::default());
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn output_is_quantized_to_eight_bits() {
        let frame = DMatrix::from_fn(40, 50, |y, x| ((x * 7 + y * 13) % 31) as f64 * 3.3);
        let out = enhance_frame(&frame, &EnhancementConfig::default());
        assert!(out.iter().all(|&v| (0.0..=255.0).contains(&v) && v.fract() == 0.0));
        assert_eq!(out.max(), 255.0);
        assert_eq!(out.min(), 0.0);
    }

    #[test]
    fn single_tile_equalization_preserves_order() {
        let ramp = DMatrix::from_fn(16, 16, |_, x| x as f64);
        let config = EnhancementConfig {
            median_size: 0,
            clip_limit: 5.0,
            tile_width: 32,
            tile_height: 32,
        };
        let out = enhance_frame(&ramp, &config);
        for y in 0..16 {
            for x in 1..16 {
                assert!(out[(y, x)] >= out[(y, x - 1)]);
            }
            assert_eq!(out[(y, 0)], 0.0);
            assert_eq!(out[(y, 15)], 255.0);
        }
    }

    #[test]
    fn median_filter_removes_isolated_spikes() {
        let mut frame = DMatrix::from_element(7, 7, 1.0);
        frame[(3, 3)] = 100.0;
        let out = median_filter(&frame, 3);
        assert_eq!(out[(3, 3)], 1.0);
        assert_eq!(out.shape(), (7, 7));
    }

    #[test]
    fn clipped_histogram_is_a_normalized_cdf() {
        let mut h = [0.0; BINS];
        h[10] = 900.0;
        h[200] = 124.0;
        tile_lut(&mut h, 20.0);
        assert_eq!(h[0], 0.0);
        assert!((h[BINS - 1] - 1.0).abs() < 1e-12);
        assert!(h.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn stack_enhancement_keeps_frame_count() {
        let frame = DMatrix::from_fn(8, 8, |y, x| (x + y) as f64);
        let stack = ImageStack::new(vec![frame.clone(), frame]).unwrap();
        let out = enhance_stack(&stack, &EnhancementConfig::default());
        assert_eq!(out.len(), 2);
        assert_eq!(out.frames()[0], out.frames()[1]);
    }
}
