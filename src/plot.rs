// This file contains the code for drawing the diagnostic scatter plots that accompany outlier
// detection: the first two feature dimensions of each element, with the confidence region
// (ellipse or circle) that separates kept elements from outliers.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut,
                         draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use std::f64::consts::PI;
use std::path::Path;

use crate::error::Result;


// Some hard-coded settings. Values between 0 and 1 are relative to full image resolution.
static RESOLUTION: u32 = 800;
static BORDER_GAP: f64 = 0.05;
static POINT_RADIUS: f64 = 0.006;
static SHAPE_STEPS: usize = 180;
static BACKGROUND_COLOUR: image::Rgb<u8> = Rgb([255, 255, 255]);  // white
static OUTLINE_COLOUR: image::Rgb<u8> = Rgb([0, 0, 0]);           // black
static REGION_COLOUR: image::Rgb<u8> = Rgb([157, 196, 236]);      // pale blue
static REGION_EDGE_COLOUR: image::Rgb<u8> = Rgb([250, 177, 160]); // salmon
static KEPT_COLOUR: image::Rgb<u8> = Rgb([9, 132, 227]);          // blue
static OUTLIER_COLOUR: image::Rgb<u8> = Rgb([178, 34, 34]);       // firebrick
static CENTROID_COLOUR: image::Rgb<u8> = Rgb([0, 0, 0]);          // black


/// The confidence region drawn around the centroid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Region {
    /// Semi-axis lengths and the rotation (radians) of the first axis from the x axis.
    Ellipse { semi_major: f64, semi_minor: f64, angle: f64 },
    Circle { radius: f64 },
}

impl Region {
    fn outline(&self, centre: (f64, f64)) -> Vec<(f64, f64)> {
        let (a, b, angle) = match *self {
            Region::Ellipse { semi_major, semi_minor, angle } => (semi_major, semi_minor, angle),
            Region::Circle { radius } => (radius, radius, 0.0),
        };
        (0..SHAPE_STEPS).map(|i| {
            let t = 2.0 * PI * i as f64 / SHAPE_STEPS as f64;
            let (x, y) = (a * t.cos(), b * t.sin());
            (centre.0 + x * angle.cos() - y * angle.sin(),
             centre.1 + x * angle.sin() + y * angle.cos())
        }).collect()
    }
}


pub fn scatter_plot(points: &[(f64, f64)], outliers: &[usize], centre: (f64, f64),
                    region: Region, png_filename: &Path) -> Result<()> {
    let outline = region.outline(centre);
    let finite = |p: &&(f64, f64)| p.0.is_finite() && p.1.is_finite();
    let all_points: Vec<(f64, f64)> = points.iter().chain(outline.iter()).chain([&centre])
                                            .filter(finite).copied().collect();
    let bounds = Bounds::new(&all_points);

    let res = RESOLUTION;
    let mut img = ImageBuffer::from_pixel(res, res, BACKGROUND_COLOUR);
    draw_region(&mut img, &outline, &bounds);
    let point_radius = ((POINT_RADIUS * res as f64).round() as i32).max(1);
    for (i, p) in points.iter().enumerate() {
        if !(p.0.is_finite() && p.1.is_finite()) { continue; }
        let colour = if outliers.contains(&i) { OUTLIER_COLOUR } else { KEPT_COLOUR };
        draw_filled_circle_mut(&mut img, bounds.to_pixel(*p, res), point_radius, colour);
    }
    let (cx, cy) = bounds.to_pixel(centre, res);
    draw_line_segment_mut(&mut img, ((cx - 5) as f32, cy as f32), ((cx + 5) as f32, cy as f32),
                          CENTROID_COLOUR);
    draw_line_segment_mut(&mut img, (cx as f32, (cy - 5) as f32), (cx as f32, (cy + 5) as f32),
                          CENTROID_COLOUR);
    let border = (BORDER_GAP * res as f64).round() as i32 / 2;
    let frame_size = res - 2 * border as u32;
    draw_hollow_rect_mut(&mut img, Rect::at(border, border).of_size(frame_size, frame_size),
                         OUTLINE_COLOUR);
    img.save(png_filename)?;
    Ok(())
}


fn draw_region(img: &mut RgbImage, outline: &[(f64, f64)], bounds: &Bounds) {
    let res = img.width();
    let mut pixels: Vec<Point<i32>> = outline.iter()
        .filter(|p| p.0.is_finite() && p.1.is_finite())
        .map(|p| { let (x, y) = bounds.to_pixel(*p, res); Point::new(x, y) }).collect();
    pixels.dedup();
    if pixels.len() > 2 && pixels.first() != pixels.last() {
        draw_polygon_mut(img, &pixels, REGION_COLOUR);
    }
    for pair in pixels.windows(2) {
        draw_line_segment_mut(img, (pair[0].x as f32, pair[0].y as f32),
                              (pair[1].x as f32, pair[1].y as f32), REGION_EDGE_COLOUR);
    }
    if let (Some(first), Some(last)) = (pixels.first(), pixels.last()) {
        draw_line_segment_mut(img, (last.x as f32, last.y as f32),
                              (first.x as f32, first.y as f32), REGION_EDGE_COLOUR);
    }
}


struct Bounds {
    min_x: f64,
    min_y: f64,
    span: f64,
}

impl Bounds {
    fn new(points: &[(f64, f64)]) -> Bounds {
        // A square view, so circles look like circles.
        let min_x = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let max_x = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max_y = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        if !min_x.is_finite() || !min_y.is_finite() {
            return Bounds { min_x: -1.0, min_y: -1.0, span: 2.0 };
        }
        let span = (max_x - min_x).max(max_y - min_y).max(1e-9);
        let pad = span * BORDER_GAP * 2.0;
        Bounds { min_x: min_x - pad, min_y: min_y - pad, span: span + 2.0 * pad }
    }

    fn to_pixel(&self, p: (f64, f64), res: u32) -> (i32, i32) {
        // Image y runs downwards.
        let x = (p.0 - self.min_x) / self.span * (res - 1) as f64;
        let y = (1.0 - (p.1 - self.min_y) / self.span) * (res - 1) as f64;
        (x.round() as i32, y.round() as i32)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_region_outline() {
        let circle = Region::Circle { radius: 2.0 }.outline((1.0, 1.0));
        assert_eq!(circle.len(), SHAPE_STEPS);
        for (x, y) in circle {
            let r = ((x - 1.0).powi(2) + (y - 1.0).powi(2)).sqrt();
            assert!((r - 2.0).abs() < 1e-9);
        }
        let ellipse = Region::Ellipse { semi_major: 3.0, semi_minor: 1.0, angle: PI / 2.0 }
            .outline((0.0, 0.0));
        // Rotated by 90 degrees, so the first point lies on the y axis.
        assert!(ellipse[0].0.abs() < 1e-9);
        assert!((ellipse[0].1 - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounds() {
        let bounds = Bounds::new(&[(0.0, 0.0), (10.0, 5.0)]);
        let (x0, y0) = bounds.to_pixel((0.0, 0.0), 100);
        let (x1, y1) = bounds.to_pixel((10.0, 5.0), 100);
        assert!(x0 < x1);
        assert!(y0 > y1);
    }

    #[test]
    fn test_scatter_plot() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("plot.png");
        let points = vec![(0.0, 0.0), (1.0, 1.0), (0.5, 0.2), (5.0, 5.0)];
        scatter_plot(&points, &[3], (0.5, 0.5), Region::Circle { radius: 1.5 }, &png).unwrap();
        assert!(png.exists());
        let img = image::open(&png).unwrap();
        assert_eq!(img.width(), RESOLUTION);
    }

    #[test]
    fn test_scatter_plot_degenerate() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("plot.png");
        let points = vec![(1.0, 1.0), (1.0, 1.0)];
        let region = Region::Ellipse { semi_major: 0.0, semi_minor: 0.0, angle: 0.0 };
        scatter_plot(&points, &[], (1.0, 1.0), region, &png).unwrap();
        assert!(png.exists());
    }
}
