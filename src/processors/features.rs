//! Feature-detection overlay: outline every detected region with a box.

use image::Rgb;

use super::draw::{self, Region};
use super::{ProcessError, Processor};
use crate::types::Image;

/// Finds regions of interest (faces, eyes, markers, ...) in an image.
pub trait FeatureDetector: Send + Sync + 'static {
    fn detect(&self, image: &Image) -> Result<Vec<Region>, ProcessError>;
}

/// Built-in detector: connected components of pixels brighter than a luma
/// threshold, reported as bounding boxes.
///
/// Components smaller than `min_area` pixels are ignored.
#[derive(Debug, Clone, Copy)]
pub struct LuminanceDetector {
    threshold: u8,
    min_area: u32,
}

impl LuminanceDetector {
    pub fn new(threshold: u8, min_area: u32) -> Self {
        Self { threshold, min_area }
    }
}

fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

impl FeatureDetector for LuminanceDetector {
    fn detect(&self, image: &Image) -> Result<Vec<Region>, ProcessError> {
        let (width, height) = image.dimensions();
        let w = width as usize;
        let mut mask: Vec<bool> = image.pixels().map(|p| luma(p) > self.threshold).collect();
        let mut regions = Vec::new();
        let mut stack = Vec::new();

        for start in 0..mask.len() {
            if !mask[start] {
                continue;
            }
            mask[start] = false;
            stack.push(start);

            let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
            let (mut max_x, mut max_y) = (0u32, 0u32);
            let mut area = 0u32;

            while let Some(idx) = stack.pop() {
                let x = (idx % w) as u32;
                let y = (idx / w) as u32;
                area += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let mut visit = |n: usize| {
                    if mask[n] {
                        mask[n] = false;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < width {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - w);
                }
                if y + 1 < height {
                    visit(idx + w);
                }
            }

            if area >= self.min_area {
                regions.push(Region::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1));
            }
        }

        Ok(regions)
    }
}

/// Draws a box around every region the detector reports.
pub struct FeatureOverlay {
    detector: Box<dyn FeatureDetector>,
    color: Rgb<u8>,
    thickness: u32,
}

impl FeatureOverlay {
    /// Blue, two-pixel boxes
    pub fn new(detector: Box<dyn FeatureDetector>) -> Self {
        Self { detector, color: Rgb([0, 0, 255]), thickness: 2 }
    }

    pub fn with_style(mut self, color: Rgb<u8>, thickness: u32) -> Self {
        self.color = color;
        self.thickness = thickness;
        self
    }
}

impl Processor for FeatureOverlay {
    fn name(&self) -> &'static str {
        "features"
    }

    fn process(&self, image: &Image) -> Result<Image, ProcessError> {
        let regions = self.detector.detect(image)?;
        let mut annotated = image.clone();
        for region in regions {
            draw::draw_rect(&mut annotated, region, self.color, self.thickness);
        }
        Ok(annotated)
    }
}
