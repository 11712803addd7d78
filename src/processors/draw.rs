//! Raster drawing primitives used by the overlays.
//!
//! All primitives clip to the image bounds, so callers may pass coordinates
//! that fall partly or wholly outside the frame.

use image::Rgb;

use crate::types::Image;

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Centre point, rounded down
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

fn put(image: &mut Image, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u64) < image.width() as u64 && (y as u64) < image.height() as u64 {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// Fill a solid rectangle
pub fn fill_rect(image: &mut Image, region: Region, color: Rgb<u8>) {
    let x_end = region.x.saturating_add(region.width).min(image.width());
    let y_end = region.y.saturating_add(region.height).min(image.height());
    for y in region.y..y_end {
        for x in region.x..x_end {
            image.put_pixel(x, y, color);
        }
    }
}

/// Outline a rectangle with a border `thickness` pixels wide, drawn inward
pub fn draw_rect(image: &mut Image, region: Region, color: Rgb<u8>, thickness: u32) {
    if region.width == 0 || region.height == 0 {
        return;
    }
    let t = thickness.max(1);
    let tw = t.min(region.width);
    let th = t.min(region.height);
    let right = region.x + region.width - tw;
    let bottom = region.y + region.height - th;

    fill_rect(image, Region::new(region.x, region.y, region.width, th), color);
    fill_rect(image, Region::new(region.x, bottom, region.width, th), color);
    fill_rect(image, Region::new(region.x, region.y, tw, region.height), color);
    fill_rect(image, Region::new(right, region.y, tw, region.height), color);
}

/// Filled disc
pub fn fill_circle(image: &mut Image, cx: i64, cy: i64, radius: u32, color: Rgb<u8>) {
    let r = radius as i64;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put(image, cx + dx, cy + dy, color);
            }
        }
    }
}

/// Circle outline `thickness` pixels wide
pub fn draw_circle(image: &mut Image, cx: i64, cy: i64, radius: u32, color: Rgb<u8>, thickness: u32) {
    let outer = radius as i64;
    let inner = (radius as i64 - thickness.max(1) as i64).max(0);
    for dy in -outer..=outer {
        for dx in -outer..=outer {
            let d2 = dx * dx + dy * dy;
            if d2 <= outer * outer && d2 > inner * inner {
                put(image, cx + dx, cy + dy, color);
            }
        }
    }
}

/// Line segment (Bresenham), stamped with a disc when `thickness > 1`
pub fn draw_line(
    image: &mut Image,
    from: (i64, i64),
    to: (i64, i64),
    color: Rgb<u8>,
    thickness: u32,
) {
    let (mut x, mut y) = from;
    let (x1, y1) = to;
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = thickness / 2;

    loop {
        if radius == 0 {
            put(image, x, y, color);
        } else {
            fill_circle(image, x, y, radius, color);
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

const BAR_ORIGIN: (u32, u32) = (10, 10);
const BAR_SIZE: (u32, u32) = (160, 12);
const BAR_TRACK: Rgb<u8> = Rgb([40, 40, 40]);
const BAR_FILL: Rgb<u8> = Rgb([255, 255, 255]);

/// Draw a throughput gauge in the top-left corner.
///
/// The bar fills in proportion to `fps / target_fps`, capped at full width.
pub fn throughput_bar(image: &mut Image, fps: f64, target_fps: f64) {
    let (x, y) = BAR_ORIGIN;
    let (width, height) = BAR_SIZE;
    fill_rect(image, Region::new(x, y, width, height), BAR_TRACK);

    if target_fps <= 0.0 || !fps.is_finite() || fps <= 0.0 {
        return;
    }
    let ratio = (fps / target_fps).clamp(0.0, 1.0);
    let filled = (ratio * (width - 2) as f64).round() as u32;
    fill_rect(image, Region::new(x + 1, y + 1, filled, height - 2), BAR_FILL);
}
