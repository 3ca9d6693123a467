//! Per-pixel HSV chroma key.
//!
//! This is the reference implementation of the math in [`crate::gpu::shaders`]. The
//! two are kept in step: any change here has to be mirrored in the WGSL source.

use rayon::prelude::*;
use tracing::debug;

use crate::{
    error::{KeyerError, Result},
    keying::{ClassifiedFrame, FrameClassifier, KeySettings},
    video::Frame,
};

/// Margin by which the key channel must beat the other two for full dominance
pub const DOMINANCE_MARGIN: f32 = 0.1;

/// Key strength at the centre of the alpha transition
pub const KEY_THRESHOLD: f32 = 0.3;

/// Fraction of the removed spill handed to each of the other two channels
pub const SPILL_REDISTRIBUTION: f32 = 0.2;

/// Result of keying one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelKey {
    /// 1.0 keeps the sample (subject), 0.0 removes it (background)
    pub alpha: f32,
    /// Sample colour with key-colour spill removed
    pub despilled: [f32; 3],
}

/// Cubic Hermite step. Collapsed edges degrade to a hard step at `edge0`.
#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Convert normalized RGB to `[hue_degrees, saturation, value]`
#[inline]
pub fn rgb_to_hsv([r, g, b]: [f32; 3]) -> [f32; 3] {
    let max_c = r.max(g).max(b);
    let min_c = r.min(g).min(b);
    let delta = max_c - min_c;

    let mut h = 0.0;
    if delta > 0.0 {
        h = if max_c == r {
            60.0 * ((g - b) / delta)
        } else if max_c == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        if h < 0.0 {
            h += 360.0;
        }
    }

    let s = if max_c > 0.0 { delta / max_c } else { 0.0 };
    [h, s, max_c]
}

/// Circular distance between two hues, at most 180 degrees
#[inline]
pub fn hue_distance(a: f32, b: f32) -> f32 {
    let diff = (a - b).abs();
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Classify one sample: alpha plus the spill-corrected colour
pub fn key_pixel(rgb: [f32; 3], settings: &KeySettings) -> PixelKey {
    let [h, s, v] = rgb_to_hsv(rgb);
    let [r, g, b] = rgb;

    let hue_diff = hue_distance(h, settings.hue_target);
    let hue_match = 1.0 - smoothstep(settings.hue_range * 0.5, settings.hue_range, hue_diff);
    let sat_match = smoothstep(settings.sat_min * 0.5, settings.sat_min, s);
    // A fully saturated sample at full intensity is screen colour, not a highlight.
    let val_match = if v >= settings.val_min && v <= settings.val_max.max(s) {
        1.0
    } else {
        0.0
    };

    let green_family = settings.is_green_family();
    let (key, other_a, other_b) = if green_family { (g, r, b) } else { (b, r, g) };
    let dominance = smoothstep(0.0, DOMINANCE_MARGIN, key - other_a.max(other_b));

    let strength = hue_match * sat_match * val_match * dominance;
    let alpha = 1.0
        - smoothstep(
            KEY_THRESHOLD - settings.smoothness,
            KEY_THRESHOLD + settings.smoothness,
            strength,
        );

    let excess = (key - (other_a + other_b) * 0.5).max(0.0);
    let removed = excess * settings.spill_suppression * (1.0 - alpha * 0.5);
    let spread = removed * SPILL_REDISTRIBUTION;

    let despilled = if green_family {
        [r + spread, g - removed, b + spread]
    } else {
        [r + spread, g + spread, b - removed]
    };

    PixelKey {
        alpha,
        despilled: despilled.map(|c| c.clamp(0.0, 1.0)),
    }
}

/// Mask output: alpha replicated to grey
pub fn mask_pixel(rgb: [f32; 3], settings: &KeySettings) -> [f32; 3] {
    let keyed = key_pixel(rgb, settings);
    [keyed.alpha; 3]
}

/// Composite output: despilled colour over black
pub fn composite_pixel(rgb: [f32; 3], settings: &KeySettings) -> [f32; 3] {
    let keyed = key_pixel(rgb, settings);
    keyed.despilled.map(|c| c * keyed.alpha)
}

#[inline]
pub fn to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[inline]
fn from_unorm8(value: u8) -> f32 {
    value as f32 / 255.0
}

/// Row-parallel CPU classifier running the reference math.
///
/// Used when GPU acceleration is disabled; behaves like the GPU context, including
/// resampling inputs that do not match its configured size.
pub struct CpuClassifier {
    width: u32,
    height: u32,
    pool: rayon::ThreadPool,
}

impl CpuClassifier {
    pub fn new(width: u32, height: u32, threads: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(KeyerError::generic(format!(
                "Cannot classify frames of size {}x{}",
                width, height
            )));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("cpu-keyer-{i}"))
            .build()
            .map_err(|e| {
                KeyerError::generic(format!("Failed to build classifier thread pool: {}", e))
            })?;

        debug!("CPU classifier ready: {}x{} on {} threads", width, height, threads.max(1));
        Ok(Self { width, height, pool })
    }
}

impl FrameClassifier for CpuClassifier {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn classify(&mut self, frame: &Frame, settings: &KeySettings) -> Result<ClassifiedFrame> {
        let fitted = frame.fit_to(self.width, self.height);
        let source = fitted.as_raw();
        let row_bytes = self.width as usize * 4;

        let mut mask = vec![0u8; source.len()];
        let mut composite = vec![0u8; source.len()];

        self.pool.install(|| {
            mask.par_chunks_mut(row_bytes)
                .zip(composite.par_chunks_mut(row_bytes))
                .zip(source.par_chunks(row_bytes))
                .for_each(|((mask_row, composite_row), source_row)| {
                    for ((m, c), s) in mask_row
                        .chunks_exact_mut(4)
                        .zip(composite_row.chunks_exact_mut(4))
                        .zip(source_row.chunks_exact(4))
                    {
                        let rgb = [from_unorm8(s[0]), from_unorm8(s[1]), from_unorm8(s[2])];
                        let keyed = key_pixel(rgb, settings);

                        let grey = to_unorm8(keyed.alpha);
                        m.copy_from_slice(&[grey, grey, grey, 255]);

                        let [r, g, b] = keyed.despilled.map(|v| to_unorm8(v * keyed.alpha));
                        c.copy_from_slice(&[r, g, b, 255]);
                    }
                });
        });

        Ok(ClassifiedFrame {
            mask: Frame::from_rgba_bytes(self.width, self.height, mask)?,
            composite: Frame::from_rgba_bytes(self.width, self.height, composite)?,
        })
    }

    fn destroy(self: Box<Self>) {
        debug!("CPU classifier released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn rgb8(r: u8, g: u8, b: u8) -> [f32; 3] {
        [from_unorm8(r), from_unorm8(g), from_unorm8(b)]
    }

    fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
        let c = v * s;
        let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
        let m = v - c;
        let (r, g, b) = match (h / 60.0) as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        [r + m, g + m, b + m]
    }

    fn quantize(rgb: [f32; 3]) -> [f32; 3] {
        rgb.map(|c| from_unorm8(to_unorm8(c)))
    }

    #[test]
    fn test_smoothstep_edges() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
        assert!((smoothstep(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
        // Collapsed edges behave as a step
        assert_eq!(smoothstep(0.3, 0.3, 0.29), 0.0);
        assert_eq!(smoothstep(0.3, 0.3, 0.3), 1.0);
    }

    #[test]
    fn test_rgb_to_hsv_primaries() {
        assert_eq!(rgb_to_hsv([1.0, 0.0, 0.0]), [0.0, 1.0, 1.0]);
        assert_eq!(rgb_to_hsv([0.0, 1.0, 0.0]), [120.0, 1.0, 1.0]);
        assert_eq!(rgb_to_hsv([0.0, 0.0, 1.0]), [240.0, 1.0, 1.0]);
        assert_eq!(rgb_to_hsv([0.5, 0.5, 0.5]), [0.0, 0.0, 0.5]);
        assert_eq!(rgb_to_hsv([0.0, 0.0, 0.0]), [0.0, 0.0, 0.0]);

        let [h, _, _] = rgb_to_hsv([1.0, 0.0, 0.5]);
        assert!((h - 330.0).abs() < 1e-3);
    }

    #[test]
    fn test_hue_distance_wraps() {
        assert_eq!(hue_distance(350.0, 10.0), 20.0);
        assert_eq!(hue_distance(120.0, 300.0), 180.0);
        assert_eq!(hue_distance(240.0, 200.0), 40.0);
    }

    #[test]
    fn test_pure_key_colours_removed() {
        let green = key_pixel(rgb8(0, 255, 0), &KeySettings::green_screen());
        assert_eq!(green.alpha, 0.0);
        assert_eq!(composite_pixel(rgb8(0, 255, 0), &KeySettings::green_screen()), [0.0; 3]);

        let blue = key_pixel(rgb8(0, 0, 255), &KeySettings::blue_screen());
        assert_eq!(blue.alpha, 0.0);
    }

    #[test]
    fn test_key_colour_just_above_sat_min_removed() {
        for settings in [KeySettings::green_screen(), KeySettings::blue_screen()] {
            let rgb = quantize(hsv_to_rgb(settings.hue_target, settings.sat_min + 0.01, 0.5));
            assert_eq!(mask_pixel(rgb, &settings), [0.0; 3], "settings {:?}", settings);
            assert_eq!(composite_pixel(rgb, &settings), [0.0; 3]);
        }
    }

    #[test]
    fn test_orthogonal_hue_kept_unchanged() {
        for settings in [KeySettings::green_screen(), KeySettings::blue_screen()] {
            let hue = (settings.hue_target + 90.0) % 360.0;
            let rgb = quantize(hsv_to_rgb(hue, 0.8, 0.7));

            assert_eq!(mask_pixel(rgb, &settings), [1.0; 3]);
            let composite = composite_pixel(rgb, &settings);
            for (out, input) in composite.iter().zip(rgb.iter()) {
                assert!((out - input).abs() < 2.0 / 255.0, "{:?} vs {:?}", composite, rgb);
            }
        }
    }

    #[test]
    fn test_neutral_colours_kept() {
        let settings = KeySettings::green_screen();
        for rgb in [rgb8(255, 255, 255), rgb8(0, 0, 0), rgb8(128, 128, 128), rgb8(200, 30, 40)] {
            assert_eq!(key_pixel(rgb, &settings).alpha, 1.0, "{:?}", rgb);
        }
    }

    #[test]
    fn test_dark_key_colour_kept_by_value_gate() {
        let settings = KeySettings::green_screen();
        // Value 0.05 is below val_min
        assert_eq!(key_pixel(rgb8(0, 13, 0), &settings).alpha, 1.0);
    }

    #[test]
    fn test_bright_washed_out_green_kept() {
        let settings = KeySettings::green_screen();
        // Above val_max and far from fully saturated: a highlight, not screen
        let rgb = rgb8(180, 255, 180);
        assert_eq!(key_pixel(rgb, &settings).alpha, 1.0);
    }

    #[test]
    fn test_warm_skin_not_keyed() {
        let settings = KeySettings::green_screen();
        let keyed = key_pixel(rgb8(224, 172, 105), &settings);
        assert_eq!(keyed.alpha, 1.0);
    }

    #[test]
    fn test_spill_suppressed_on_kept_pixels() {
        let settings = KeySettings::green_screen();
        // Greenish grey edge pixel: green excess but too desaturated to be keyed
        let rgb = rgb8(140, 150, 140);
        let keyed = key_pixel(rgb, &settings);
        assert_eq!(keyed.alpha, 1.0);
        assert!(keyed.despilled[1] < rgb[1]);
        assert!(keyed.despilled[0] > rgb[0]);
        assert!(keyed.despilled[2] > rgb[2]);

        let mut no_spill = settings;
        no_spill.spill_suppression = 0.0;
        assert_eq!(key_pixel(rgb, &no_spill).despilled, rgb);
    }

    #[test]
    fn test_mask_is_always_grey() {
        let mut rng = SmallRng::seed_from_u64(7);
        for settings in [KeySettings::green_screen(), KeySettings::blue_screen()] {
            for _ in 0..5_000 {
                let rgb = rgb8(rng.gen(), rng.gen(), rng.gen());
                let [r, g, b] = mask_pixel(rgb, &settings);
                assert!(r == g && g == b);
                assert!((0.0..=1.0).contains(&r));
            }
        }
    }

    #[test]
    fn test_cpu_classifier_outputs() {
        let settings = KeySettings::green_screen();
        let mut classifier = CpuClassifier::new(4, 3, 2).unwrap();

        let mut frame = Frame::new_filled(4, 3, [0, 255, 0, 255]);
        frame.set_pixel(1, 1, [200, 30, 40, 255]);

        let out = classifier.classify(&frame, &settings).unwrap();
        assert_eq!(out.mask.dimensions(), (4, 3));
        assert_eq!(out.mask.get_pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(out.composite.get_pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(out.mask.get_pixel(1, 1), [255, 255, 255, 255]);
        assert_eq!(out.composite.get_pixel(1, 1)[0], 200);

        Box::new(classifier).destroy();
    }

    #[test]
    fn test_cpu_classifier_resamples_mismatched_input() {
        let mut classifier = CpuClassifier::new(8, 6, 1).unwrap();
        let frame = Frame::new_filled(3, 2, [0, 255, 0, 255]);
        let out = classifier.classify(&frame, &KeySettings::green_screen()).unwrap();
        assert_eq!(out.mask.dimensions(), (8, 6));
        assert_eq!(out.composite.dimensions(), (8, 6));
    }

    #[test]
    fn test_cpu_classifier_is_deterministic() {
        let mut rng = SmallRng::seed_from_u64(42);
        let bytes: Vec<u8> = (0..16 * 16 * 4).map(|_| rng.gen()).collect();
        let frame = Frame::from_rgba_bytes(16, 16, bytes).unwrap();
        let settings = KeySettings::blue_screen();

        let first = CpuClassifier::new(16, 16, 4).unwrap().classify(&frame, &settings).unwrap();
        let second = CpuClassifier::new(16, 16, 1).unwrap().classify(&frame, &settings).unwrap();
        assert_eq!(first.mask.as_raw(), second.mask.as_raw());
        assert_eq!(first.composite.as_raw(), second.composite.as_raw());
    }

    #[test]
    fn test_zero_sized_classifier_rejected() {
        assert!(CpuClassifier::new(0, 10, 1).is_err());
    }
}
