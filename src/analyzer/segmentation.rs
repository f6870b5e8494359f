//! Burn mask detection over Celsius frames.
//!
//! Masks are 8-bit `GrayImage`s holding 0 (unburned) or 255 (burned).

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
    contrast::{otsu_level, threshold},
    region_labelling::{connected_components, Connectivity},
};
use std::collections::HashMap;

pub const LIT: u8 = 255;

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Pixels strictly hotter than `threshold_celsius`
pub fn temperature_mask(celsius: &[f64], width: u32, height: u32, threshold_celsius: f64) -> GrayImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        let value = celsius[(y * width + x) as usize];
        Luma([if value > threshold_celsius { LIT } else { 0 }])
    })
}

/// Min-max normalization of a Celsius frame into 8 bits
pub fn normalize_to_u8(celsius: &[f64], width: u32, height: u32) -> GrayImage {
    let (min, max) = celsius
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if !(max > min) {
        return GrayImage::new(width, height);
    }

    let span = max - min;
    ImageBuffer::from_fn(width, height, |x, y| {
        let value = celsius[(y * width + x) as usize];
        let scaled = ((value - min) / span * 255.0).clamp(0.0, 255.0);
        Luma([scaled as u8])
    })
}

/// Otsu binary threshold over the normalized frame
pub fn adaptive_mask(celsius: &[f64], width: u32, height: u32) -> GrayImage {
    let normalized = normalize_to_u8(celsius, width, height);
    let level = otsu_level(&normalized);
    threshold(&normalized, level)
}

/// Drop 4-connected lit regions smaller than `min_area` pixels
pub fn filter_small_regions(mask: &GrayImage, min_area: u32) -> GrayImage {
    if min_area <= 1 {
        return mask.clone();
    }

    let labels = connected_components(mask, Connectivity::Four, Luma([0u8]));

    let mut areas: HashMap<u32, u32> = HashMap::new();
    for label in labels.pixels() {
        if label[0] > 0 {
            *areas.entry(label[0]).or_insert(0) += 1;
        }
    }

    ImageBuffer::from_fn(mask.width(), mask.height(), |x, y| {
        let label = labels.get_pixel(x, y)[0];
        let keep = label > 0 && areas.get(&label).copied().unwrap_or(0) >= min_area;
        Luma([if keep { LIT } else { 0 }])
    })
}

/// OR `mask` into `cumulative`; returns the number of lit pixels afterwards
pub fn merge_into(cumulative: &mut GrayImage, mask: &GrayImage) -> u64 {
    let mut lit = 0;
    for (acc, cur) in cumulative.pixels_mut().zip(mask.pixels()) {
        if cur[0] > 0 {
            acc[0] = LIT;
        }
        if acc[0] > 0 {
            lit += 1;
        }
    }
    lit
}

pub fn count_lit(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p[0] > 0).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 4.0);
        assert!((percentile(&values, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&values, 25.0) - 1.75).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_temperature_mask_is_strict() {
        let celsius = [99.0, 100.0, 100.5, 300.0];
        let mask = temperature_mask(&celsius, 2, 2, 100.0);
        let lit: Vec<u8> = mask.pixels().map(|p| p[0]).collect();
        assert_eq!(lit, vec![0, 0, LIT, LIT]);
    }

    #[test]
    fn test_small_regions_are_dropped() {
        let mut mask = GrayImage::new(10, 10);
        // 3x3 block: kept at min area 9
        for y in 0..3 {
            for x in 0..3 {
                mask.put_pixel(x, y, Luma([LIT]));
            }
        }
        // Isolated pixel
        mask.put_pixel(8, 8, Luma([LIT]));

        let filtered = filter_small_regions(&mask, 9);
        assert_eq!(count_lit(&filtered), 9);
        assert_eq!(filtered.get_pixel(8, 8)[0], 0);
    }

    #[test]
    fn test_diagonal_pixels_are_separate_regions() {
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(0, 0, Luma([LIT]));
        mask.put_pixel(1, 1, Luma([LIT]));
        mask.put_pixel(2, 2, Luma([LIT]));

        // Each diagonal pixel is its own 4-connected region of area 1
        assert_eq!(count_lit(&filter_small_regions(&mask, 2)), 0);
    }

    #[test]
    fn test_uniform_frame_has_empty_adaptive_mask() {
        let celsius = vec![25.0; 16];
        assert_eq!(count_lit(&adaptive_mask(&celsius, 4, 4)), 0);
    }

    #[test]
    fn test_adaptive_mask_separates_hot_pixels() {
        let mut celsius = vec![20.0; 64];
        for v in celsius.iter_mut().take(16) {
            *v = 400.0;
        }
        let mask = adaptive_mask(&celsius, 8, 8);
        assert_eq!(count_lit(&mask), 16);
    }

    #[test]
    fn test_merge_is_monotonic() {
        let mut cumulative = GrayImage::new(2, 1);
        let mut first = GrayImage::new(2, 1);
        first.put_pixel(0, 0, Luma([LIT]));
        assert_eq!(merge_into(&mut cumulative, &first), 1);

        let mut second = GrayImage::new(2, 1);
        second.put_pixel(1, 0, Luma([LIT]));
        assert_eq!(merge_into(&mut cumulative, &second), 2);

        assert_eq!(merge_into(&mut cumulative, &GrayImage::new(2, 1)), 2);
    }
}
