use anyhow::{bail, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Subsampling step used for the color statistics. Matching statistics on
/// the full grid would be ~100x slower for no change in the classification.
const COLOR_SUBSAMPLE_STEP: usize = 10;

/// Dominant color bucket of a photograph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFamily {
    /// Bright, washed-out facades (fresh render, recent paint).
    Light,
    Dark,
    /// Red-dominant: brick, tile, warm render.
    Warm,
    /// Green-dominant: lawns, trees, overgrown land.
    Vegetation,
    /// Blue-dominant: large sky share.
    Cool,
    Neutral,
}

/// Dominant color classification plus pixel-value variance, computed over
/// a subsampled grid. Variance doubles as an exposure/richness proxy.
#[derive(Debug, Clone, Copy)]
pub struct ColorStats {
    pub family: ColorFamily,
    pub variance: f64,
}

/// Decoded RGB pixel buffer, row-major. Isolates the heuristic math from
/// image codecs so it can be exercised on synthetic grids in tests.
#[derive(Debug, Clone)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 3]>,
}

impl PixelGrid {
    /// Build a grid from a decoded image, normalizing to RGB.
    pub fn from_image(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let pixels = rgb.pixels().map(|p| [p[0], p[1], p[2]]).collect();
        PixelGrid {
            width,
            height,
            pixels,
        }
    }

    /// Build a grid from raw row-major RGB triples. Test entry point.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<[u8; 3]>) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("pixel grid dimensions must be non-zero");
        }
        if pixels.len() != (width as usize) * (height as usize) {
            bail!(
                "pixel buffer length {} does not match {}x{}",
                pixels.len(),
                width,
                height
            );
        }
        Ok(PixelGrid {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn min_dimension(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Width / height. > 1 is landscape, < 1 is portrait.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.pixels[(y as usize) * (self.width as usize) + (x as usize)]
    }

    /// Grayscale value of a pixel: plain channel mean.
    fn luma(&self, x: u32, y: u32) -> f64 {
        let [r, g, b] = self.pixel(x, y);
        (r as f64 + g as f64 + b as f64) / 3.0
    }

    /// Dominant-color classification and channel-value variance over the
    /// subsampled grid.
    pub fn color_stats(&self) -> ColorStats {
        let mut sum = [0.0f64; 3];
        let mut values: Vec<f64> = Vec::new();
        let mut count = 0usize;

        for y in (0..self.height).step_by(COLOR_SUBSAMPLE_STEP) {
            for x in (0..self.width).step_by(COLOR_SUBSAMPLE_STEP) {
                let px = self.pixel(x, y);
                for c in 0..3 {
                    sum[c] += px[c] as f64;
                    values.push(px[c] as f64);
                }
                count += 1;
            }
        }

        let n = count.max(1) as f64;
        let (r, g, b) = (sum[0] / n, sum[1] / n, sum[2] / n);

        let family = if r > 180.0 && g > 180.0 && b > 180.0 {
            ColorFamily::Light
        } else if r < 80.0 && g < 80.0 && b < 80.0 {
            ColorFamily::Dark
        } else if r > g && r > b {
            ColorFamily::Warm
        } else if g > r && g > b {
            ColorFamily::Vegetation
        } else if b > r && b > g {
            ColorFamily::Cool
        } else {
            ColorFamily::Neutral
        };

        ColorStats {
            family,
            variance: population_variance(&values),
        }
    }

    /// Texture score: mean absolute adjacent-pixel gradient magnitude,
    /// horizontal and vertical differencing averaged. Low on flat facades,
    /// high on cluttered or degraded surfaces.
    pub fn texture_score(&self) -> f64 {
        if self.width < 2 || self.height < 2 {
            return 0.0;
        }

        let mut gx_sum = 0.0;
        let mut gx_count = 0usize;
        for y in 0..self.height {
            for x in 0..self.width - 1 {
                gx_sum += (self.luma(x + 1, y) - self.luma(x, y)).abs();
                gx_count += 1;
            }
        }

        let mut gy_sum = 0.0;
        let mut gy_count = 0usize;
        for y in 0..self.height - 1 {
            for x in 0..self.width {
                gy_sum += (self.luma(x, y + 1) - self.luma(x, y)).abs();
                gy_count += 1;
            }
        }

        (gx_sum / gx_count as f64 + gy_sum / gy_count as f64) / 2.0
    }

    /// Candidate horizontal-line positions: rows where the row-sum
    /// difference series exceeds mean + 2*stddev. Floor slabs and window
    /// rows show up as sharp row-sum discontinuities.
    pub fn horizontal_line_candidates(&self) -> Vec<u32> {
        if self.height < 2 {
            return Vec::new();
        }

        let row_sums: Vec<f64> = (0..self.height)
            .map(|y| (0..self.width).map(|x| self.luma(x, y)).sum())
            .collect();

        let diffs: Vec<f64> = row_sums
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .collect();

        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let std = population_variance(&diffs).sqrt();
        let threshold = mean + 2.0 * std;

        diffs
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > threshold)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

/// Coalesce sorted line positions: detections closer than 10% of the
/// image height collapse into the first of the run.
pub fn coalesce_lines(candidates: &[u32], image_height: u32) -> Vec<u32> {
    let min_gap = image_height as f64 / 10.0;
    let mut kept: Vec<u32> = Vec::new();
    for &pos in candidates {
        match kept.last() {
            Some(&last) if (pos as f64 - last as f64) <= min_gap => {}
            _ => kept.push(pos),
        }
    }
    kept
}

fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_grid(width: u32, height: u32, rgb: [u8; 3]) -> PixelGrid {
        let pixels = vec![rgb; (width * height) as usize];
        PixelGrid::from_raw(width, height, pixels).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(PixelGrid::from_raw(10, 10, vec![[0, 0, 0]; 99]).is_err());
        assert!(PixelGrid::from_raw(0, 10, vec![]).is_err());
    }

    #[test]
    fn uniform_image_has_zero_texture_and_variance() {
        let grid = uniform_grid(50, 50, [128, 128, 128]);
        assert_eq!(grid.texture_score(), 0.0);
        let stats = grid.color_stats();
        assert_eq!(stats.variance, 0.0);
        assert_eq!(stats.family, ColorFamily::Neutral);
    }

    #[test]
    fn classifies_dominant_colors() {
        assert_eq!(
            uniform_grid(20, 20, [230, 230, 230]).color_stats().family,
            ColorFamily::Light
        );
        assert_eq!(
            uniform_grid(20, 20, [40, 40, 40]).color_stats().family,
            ColorFamily::Dark
        );
        assert_eq!(
            uniform_grid(20, 20, [170, 90, 60]).color_stats().family,
            ColorFamily::Warm
        );
        assert_eq!(
            uniform_grid(20, 20, [70, 160, 60]).color_stats().family,
            ColorFamily::Vegetation
        );
        assert_eq!(
            uniform_grid(20, 20, [90, 110, 200]).color_stats().family,
            ColorFamily::Cool
        );
    }

    #[test]
    fn checkerboard_has_high_texture() {
        let mut pixels = Vec::new();
        for y in 0..40u32 {
            for x in 0..40u32 {
                let v = if (x + y) % 2 == 0 { 0 } else { 255 };
                pixels.push([v, v, v]);
            }
        }
        let grid = PixelGrid::from_raw(40, 40, pixels).unwrap();
        assert!(grid.texture_score() > 200.0);
    }

    #[test]
    fn detects_sharp_horizontal_bands() {
        // 100 rows: dark band every 25 rows on a light background.
        let mut pixels = Vec::new();
        for y in 0..100u32 {
            let v = if y % 25 == 0 { 10 } else { 220 };
            for _ in 0..100u32 {
                pixels.push([v, v, v]);
            }
        }
        let grid = PixelGrid::from_raw(100, 100, pixels).unwrap();
        let candidates = grid.horizontal_line_candidates();
        assert!(!candidates.is_empty());
        // Band edges cluster around rows 24/25, 49/50, 74/75.
        assert!(candidates.iter().any(|&y| (24..=25).contains(&y)));
    }

    #[test]
    fn coalescing_merges_nearby_detections() {
        // Height 100 -> minimum gap 10 rows.
        let candidates = vec![10, 12, 14, 40, 41, 80];
        let kept = coalesce_lines(&candidates, 100);
        assert_eq!(kept, vec![10, 40, 80]);
    }

    #[test]
    fn coalescing_keeps_well_separated_lines() {
        let candidates = vec![5, 30, 55, 90];
        assert_eq!(coalesce_lines(&candidates, 100), vec![5, 30, 55, 90]);
    }
}
