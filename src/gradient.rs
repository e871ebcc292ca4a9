//! Precomputed gradient field: per-pixel `(magnitude, angle)` of every
//! Gaussian scale, consumed by the orientation and descriptor kernels.

use std::f32::consts::PI;

use crate::image::{Grad, Image};

/// Gradient kernel body for one output row. Border pixels are zero; interior
/// pixels hold half the central difference magnitude and the angle in
/// `[-pi, pi)`.
pub(crate) fn gradient_row(src: &Image<f32>, y: usize, out_row: &mut [Grad]) {
    let w = src.width();
    let h = src.height();
    if y == 0 || y == h - 1 {
        out_row.fill([0.0, 0.0]);
        return;
    }
    out_row[0] = [0.0, 0.0];
    out_row[w - 1] = [0.0, 0.0];
    for x in 1..w - 1 {
        let dx = src.get(x + 1, y) - src.get(x - 1, y);
        let dy = src.get(x, y + 1) - src.get(x, y - 1);
        let mag = 0.5 * (dx * dx + dy * dy).sqrt();
        let mut ang = dy.atan2(dx);
        if ang >= PI {
            ang -= 2.0 * PI;
        }
        out_row[x] = [mag, ang];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(src: &Image<f32>) -> Image<Grad> {
        let mut out = Image::new(src.width(), src.height()).unwrap();
        for y in 0..src.height() {
            let w = src.width();
            let row = &mut out.as_mut_slice()[y * w..(y + 1) * w];
            gradient_row(src, y, row);
        }
        out
    }

    #[test]
    fn horizontal_ramp() {
        let mut img = Image::new(8, 8).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                img.set(x, y, x as f32 * 0.1);
            }
        }
        let field = field_of(&img);
        let [mag, ang] = field.get(4, 4);
        // d/dx = 0.1 per pixel; central difference spans two pixels.
        assert!((mag - 0.1).abs() < 1e-6);
        assert!(ang.abs() < 1e-6);
    }

    #[test]
    fn vertical_ramp_points_down_the_y_axis() {
        let mut img = Image::new(8, 8).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                img.set(x, y, y as f32 * 0.2);
            }
        }
        let field = field_of(&img);
        let [mag, ang] = field.get(3, 3);
        assert!((mag - 0.2).abs() < 1e-6);
        assert!((ang - PI / 2.0).abs() < 1e-6);
    }

    #[test]
    fn borders_are_zero() {
        let mut img = Image::new(6, 6).unwrap();
        for (i, v) in img.as_mut_slice().iter_mut().enumerate() {
            *v = (i % 5) as f32;
        }
        let field = field_of(&img);
        for i in 0..6 {
            assert_eq!(field.get(i, 0), [0.0, 0.0]);
            assert_eq!(field.get(i, 5), [0.0, 0.0]);
            assert_eq!(field.get(0, i), [0.0, 0.0]);
            assert_eq!(field.get(5, i), [0.0, 0.0]);
        }
    }

    #[test]
    fn angle_stays_in_half_open_range() {
        // A leftward gradient lands exactly on the +pi/-pi seam; the field
        // stores it as -pi so angles live in [-pi, pi).
        let mut img = Image::new(5, 5).unwrap();
        for y in 0..5 {
            for x in 0..5 {
                img.set(x, y, -(x as f32));
            }
        }
        let field = field_of(&img);
        let [mag, ang] = field.get(2, 2);
        assert!((mag - 1.0).abs() < 1e-6);
        assert!((-PI..PI).contains(&ang));
        assert!((ang + PI).abs() < 1e-6);
    }
}
