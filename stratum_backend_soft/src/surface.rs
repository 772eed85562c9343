// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An in-memory RGBA8 implementation of [`Surface`].

use stratum_core::rect::Rect;
use stratum_core::surface::{BlendMode, Rgba, Surface};

/// A CPU pixel buffer: non-premultiplied RGBA8, row-major.
///
/// An opaque surface (`has_alpha() == false`) keeps every stored alpha
/// byte at 255; writes that would lower it are clamped back up. That
/// keeps the stored data consistent with the opacity the compositor
/// culls by.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelSurface {
    size: (i32, i32),
    alpha: bool,
    data: Vec<u8>,
}

impl core::fmt::Debug for PixelSurface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PixelSurface")
            .field("size", &self.size)
            .field("alpha", &self.alpha)
            .finish_non_exhaustive()
    }
}

/// `f64::round` narrowed to `i32`; inputs are pixel coordinates.
#[inline]
#[expect(clippy::cast_possible_truncation, reason = "pixel-range values")]
fn round_i32(v: f64) -> i32 {
    v.round() as i32
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "channel arithmetic is bounded by 255"
)]
fn blend_over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    let sa = u32::from(src[3]);
    if sa == 255 {
        return src;
    }
    if sa == 0 {
        return dst;
    }
    let da = u32::from(dst[3]);
    let out_a = sa + da * (255 - sa) / 255;
    if out_a == 0 {
        return [0, 0, 0, 0];
    }
    let mut out = [0_u8; 4];
    for i in 0..3 {
        let s = u32::from(src[i]);
        let d = u32::from(dst[i]);
        // Non-premultiplied over: weight each input by its coverage.
        out[i] = ((s * sa + d * da * (255 - sa) / 255) / out_a) as u8;
    }
    out[3] = out_a as u8;
    out
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "channel arithmetic is bounded by 255"
)]
fn blend_multiply(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    let mut out = [0_u8; 4];
    for i in 0..4 {
        out[i] = ((u32::from(dst[i]) * u32::from(src[i]) + 127) / 255) as u8;
    }
    out
}

impl PixelSurface {
    /// A surface filled with one colour; opaque iff the colour is.
    #[must_use]
    pub fn solid(size: (i32, i32), colour: Rgba) -> Self {
        let mut sfc = Self::new(size, !colour.is_opaque());
        sfc.fill(colour, None);
        sfc
    }

    /// The pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the surface.
    #[must_use]
    pub fn pixel(&self, x: i32, y: i32) -> Rgba {
        assert!(
            x >= 0 && y >= 0 && x < self.size.0 && y < self.size.1,
            "pixel ({x}, {y}) outside {:?}",
            self.size
        );
        let [r, g, b, a] = self.pixels()[self.index(x, y)];
        Rgba::new(r, g, b, a)
    }

    /// The raw pixel bytes, row-major RGBA8.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[expect(clippy::cast_sign_loss, reason = "bounds are checked by callers")]
    fn index(&self, x: i32, y: i32) -> usize {
        (y * self.size.0 + x) as usize
    }

    fn pixels(&self) -> &[[u8; 4]] {
        bytemuck::cast_slice(&self.data)
    }

    fn pixels_mut(&mut self) -> &mut [[u8; 4]] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    fn put(&mut self, x: i32, y: i32, mut px: [u8; 4]) {
        if !self.alpha {
            px[3] = 255;
        }
        let i = self.index(x, y);
        self.pixels_mut()[i] = px;
    }

    /// The rotation reduced to a whole number of quarter turns, if it is
    /// (numerically) one.
    fn quarter_turns(radians: f64) -> Option<i32> {
        let half = radians.rem_euclid(core::f64::consts::FRAC_PI_2);
        if half < 1e-9 || core::f64::consts::FRAC_PI_2 - half < 1e-9 {
            Some(round_i32(radians / core::f64::consts::FRAC_PI_2).rem_euclid(4))
        } else {
            None
        }
    }

    fn rotated_quarter(&self, k: i32) -> Self {
        let (w, h) = self.size;
        let size = if k % 2 == 0 { (w, h) } else { (h, w) };
        let mut out = Self::new(size, self.alpha);
        for y in 0..size.1 {
            for x in 0..size.0 {
                let (sx, sy) = match k {
                    1 => (w - 1 - y, x),
                    2 => (w - 1 - x, h - 1 - y),
                    3 => (y, h - 1 - x),
                    _ => (x, y),
                };
                let px = self.pixels()[self.index(sx, sy)];
                out.put(x, y, px);
            }
        }
        out
    }
}

impl Surface for PixelSurface {
    #[expect(clippy::cast_sign_loss, reason = "negative extents clamp to zero")]
    fn new(size: (i32, i32), alpha: bool) -> Self {
        let (w, h) = (size.0.max(0), size.1.max(0));
        let fill = if alpha { [0, 0, 0, 0] } else { [0, 0, 0, 255] };
        let mut data = Vec::new();
        data.resize((w * h) as usize * 4, 0);
        for px in bytemuck::cast_slice_mut::<u8, [u8; 4]>(&mut data) {
            *px = fill;
        }
        Self {
            size: (w, h),
            alpha,
            data,
        }
    }

    fn size(&self) -> (i32, i32) {
        self.size
    }

    fn has_alpha(&self) -> bool {
        self.alpha
    }

    fn blit(&mut self, src: &Self, dest_pos: (i32, i32), src_rect: Rect, mode: BlendMode) {
        // Out-of-bounds source clips away; the destination corner shifts
        // with it so in-bounds pixels keep their relative placement.
        let clipped = src_rect.clip(&src.rect());
        let mut dx = dest_pos.0 + (clipped.x - src_rect.x);
        let mut dy = dest_pos.1 + (clipped.y - src_rect.y);
        let mut sx = clipped.x;
        let mut sy = clipped.y;
        let mut w = clipped.w;
        let mut h = clipped.h;
        if dx < 0 {
            sx -= dx;
            w += dx;
            dx = 0;
        }
        if dy < 0 {
            sy -= dy;
            h += dy;
            dy = 0;
        }
        w = w.min(self.size.0 - dx);
        h = h.min(self.size.1 - dy);
        if w <= 0 || h <= 0 {
            return;
        }
        for row in 0..h {
            for col in 0..w {
                let s = src.pixels()[src.index(sx + col, sy + row)];
                let out = match mode {
                    BlendMode::Copy => s,
                    BlendMode::SourceOver => {
                        blend_over(self.pixels()[self.index(dx + col, dy + row)], s)
                    }
                    BlendMode::Multiply => {
                        blend_multiply(self.pixels()[self.index(dx + col, dy + row)], s)
                    }
                };
                self.put(dx + col, dy + row, out);
            }
        }
    }

    fn fill(&mut self, colour: Rgba, rect: Option<Rect>) {
        let target = match rect {
            Some(r) => r.clip(&self.rect()),
            None => self.rect(),
        };
        for y in target.y..target.bottom() {
            for x in target.x..target.right() {
                self.put(x, y, [colour.r, colour.g, colour.b, colour.a]);
            }
        }
    }

    fn scaled(&self, size: (i32, i32)) -> Self {
        let mut out = Self::new(size, self.alpha);
        if out.size.0 == 0 || out.size.1 == 0 || self.size.0 == 0 || self.size.1 == 0 {
            return out;
        }
        #[expect(clippy::cast_possible_truncation, reason = "quotient is in pixel range")]
        for y in 0..out.size.1 {
            for x in 0..out.size.0 {
                // Nearest neighbour.
                let sx = (i64::from(x) * i64::from(self.size.0) / i64::from(out.size.0)) as i32;
                let sy = (i64::from(y) * i64::from(self.size.1) / i64::from(out.size.1)) as i32;
                let px = self.pixels()[self.index(sx, sy)];
                out.put(x, y, px);
            }
        }
        out
    }

    fn rotated(&self, radians: f64) -> Self {
        // Quarter turns stay exact (and keep an opaque surface opaque);
        // everything else goes through the float inverse map.
        if let Some(k) = Self::quarter_turns(radians) {
            return self.rotated_quarter(k);
        }
        let (fw, fh) = (f64::from(self.size.0), f64::from(self.size.1));
        let (s, c) = radians.sin_cos();
        let out_w = round_i32(fw * c.abs() + fh * s.abs());
        let out_h = round_i32(fw * s.abs() + fh * c.abs());
        let mut out = Self::new((out_w, out_h), true);
        let (cx_dst, cy_dst) = (f64::from(out_w) / 2.0, f64::from(out_h) / 2.0);
        let (cx_src, cy_src) = (fw / 2.0, fh / 2.0);
        #[expect(clippy::cast_possible_truncation, reason = "floor of pixel coordinate")]
        for y in 0..out_h {
            for x in 0..out_w {
                let dx = f64::from(x) + 0.5 - cx_dst;
                let dy = f64::from(y) + 0.5 - cy_dst;
                // Inverse of a visually-counterclockwise rotation in
                // y-down coordinates.
                let sx = (c * dx - s * dy + cx_src).floor() as i32;
                let sy = (s * dx + c * dy + cy_src).floor() as i32;
                if sx >= 0 && sy >= 0 && sx < self.size.0 && sy < self.size.1 {
                    let px = self.pixels()[self.index(sx, sy)];
                    out.put(x, y, px);
                }
            }
        }
        out
    }

    fn flipped(&self, x: bool, y: bool) -> Self {
        let (w, h) = self.size;
        let mut out = Self::new(self.size, self.alpha);
        for row in 0..h {
            for col in 0..w {
                let sx = if x { w - 1 - col } else { col };
                let sy = if y { h - 1 - row } else { row };
                let px = self.pixels()[self.index(sx, sy)];
                out.put(col, row, px);
            }
        }
        out
    }

    fn to_alpha(&self) -> Self {
        Self {
            alpha: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba = Rgba::rgb(255, 0, 0);
    const GREEN: Rgba = Rgba::rgb(0, 255, 0);
    const BLUE: Rgba = Rgba::rgb(0, 0, 255);

    #[test]
    fn new_opaque_is_black() {
        let sfc = PixelSurface::new((2, 2), false);
        assert!(!sfc.has_alpha());
        assert_eq!(sfc.pixel(0, 0), Rgba::BLACK);
    }

    #[test]
    fn new_alpha_is_transparent() {
        let sfc = PixelSurface::new((2, 2), true);
        assert!(sfc.has_alpha());
        assert_eq!(sfc.pixel(1, 1), Rgba::TRANSPARENT);
    }

    #[test]
    fn fill_rect_clips_to_bounds() {
        let mut sfc = PixelSurface::new((4, 4), false);
        sfc.fill(RED, Some(Rect::new(2, 2, 10, 10)));
        assert_eq!(sfc.pixel(1, 1), Rgba::BLACK);
        assert_eq!(sfc.pixel(2, 2), RED);
        assert_eq!(sfc.pixel(3, 3), RED);
    }

    #[test]
    fn opaque_surface_clamps_alpha() {
        let mut sfc = PixelSurface::new((2, 2), false);
        sfc.fill(RED.with_alpha(10), None);
        assert_eq!(sfc.pixel(0, 0), RED);
    }

    #[test]
    fn copy_blit_replaces_pixels() {
        let mut dst = PixelSurface::solid((4, 4), RED);
        let src = PixelSurface::solid((2, 2), GREEN.with_alpha(0));
        dst.blit(&src, (1, 1), src.rect(), BlendMode::Copy);
        // Copy carries source alpha bytes, but the opaque target clamps.
        assert_eq!(dst.pixel(1, 1), GREEN);
        assert_eq!(dst.pixel(0, 0), RED);
        assert_eq!(dst.pixel(3, 3), RED);
    }

    #[test]
    fn source_over_blends_by_alpha() {
        let mut dst = PixelSurface::solid((1, 1), Rgba::BLACK);
        let src = PixelSurface::solid((1, 1), Rgba::new(255, 0, 0, 128));
        dst.blit(&src, (0, 0), src.rect(), BlendMode::SourceOver);
        let px = dst.pixel(0, 0);
        assert_eq!(px.a, 255);
        // 255 * 128 / 255 = 128.
        assert_eq!(px.r, 128);
        assert_eq!(px.g, 0);
    }

    #[test]
    fn source_over_opaque_src_replaces() {
        let mut dst = PixelSurface::solid((1, 1), BLUE);
        let src = PixelSurface::solid((1, 1), GREEN);
        dst.blit(&src, (0, 0), src.rect(), BlendMode::SourceOver);
        assert_eq!(dst.pixel(0, 0), GREEN);
    }

    #[test]
    fn multiply_blit_scales_channels() {
        let mut dst = PixelSurface::solid((1, 1), Rgba::rgb(200, 100, 0));
        let src = PixelSurface::solid((1, 1), Rgba::rgb(255, 128, 255));
        dst.blit(&src, (0, 0), src.rect(), BlendMode::Multiply);
        let px = dst.pixel(0, 0);
        assert_eq!(px.r, 200);
        // (100 * 128 + 127) / 255 = 50.
        assert_eq!(px.g, 50);
        assert_eq!(px.b, 0);
    }

    #[test]
    fn blit_clips_out_of_bounds_source() {
        let mut dst = PixelSurface::solid((4, 4), Rgba::BLACK);
        let src = PixelSurface::solid((2, 2), RED);
        // Source rect starts above-left of the source; the in-bounds part
        // lands shifted by the clipped amount.
        dst.blit(&src, (1, 1), Rect::new(-1, -1, 3, 3), BlendMode::Copy);
        assert_eq!(dst.pixel(1, 1), Rgba::BLACK);
        assert_eq!(dst.pixel(2, 2), RED);
        assert_eq!(dst.pixel(3, 3), RED);
    }

    #[test]
    fn blit_clips_destination_edges() {
        let mut dst = PixelSurface::solid((2, 2), Rgba::BLACK);
        let src = PixelSurface::solid((4, 4), RED);
        dst.blit(&src, (-2, -2), src.rect(), BlendMode::Copy);
        assert_eq!(dst.pixel(0, 0), RED);
        assert_eq!(dst.pixel(1, 1), RED);
    }

    #[test]
    fn scaled_nearest_neighbour() {
        let mut sfc = PixelSurface::solid((2, 1), RED);
        sfc.fill(GREEN, Some(Rect::new(1, 0, 1, 1)));
        let doubled = sfc.scaled((4, 2));
        assert_eq!(doubled.size(), (4, 2));
        assert_eq!(doubled.pixel(0, 0), RED);
        assert_eq!(doubled.pixel(1, 1), RED);
        assert_eq!(doubled.pixel(2, 0), GREEN);
        assert_eq!(doubled.pixel(3, 1), GREEN);
    }

    #[test]
    fn quarter_turn_is_exact() {
        let mut sfc = PixelSurface::solid((2, 1), RED);
        sfc.fill(GREEN, Some(Rect::new(1, 0, 1, 1)));
        let turned = sfc.rotated(core::f64::consts::FRAC_PI_2);
        assert_eq!(turned.size(), (1, 2));
        assert!(!turned.has_alpha());
        // Counterclockwise: the right pixel ends up on top.
        assert_eq!(turned.pixel(0, 0), GREEN);
        assert_eq!(turned.pixel(0, 1), RED);
    }

    #[test]
    fn half_turn_reverses() {
        let mut sfc = PixelSurface::solid((2, 1), RED);
        sfc.fill(GREEN, Some(Rect::new(1, 0, 1, 1)));
        let turned = sfc.rotated(core::f64::consts::PI);
        assert_eq!(turned.size(), (2, 1));
        assert_eq!(turned.pixel(0, 0), GREEN);
        assert_eq!(turned.pixel(1, 0), RED);
    }

    #[test]
    fn diagonal_rotation_gains_alpha() {
        let sfc = PixelSurface::solid((4, 4), RED);
        let turned = sfc.rotated(core::f64::consts::FRAC_PI_4);
        assert!(turned.has_alpha());
        // Bounding box of a 4x4 under 45 degrees is round(4*sqrt(2)) = 6.
        assert_eq!(turned.size(), (6, 6));
        // Center pixels come from the source, corners are revealed.
        assert_eq!(turned.pixel(3, 3), RED);
        assert_eq!(turned.pixel(0, 0), Rgba::TRANSPARENT);
    }

    #[test]
    fn flip_mirrors_axes() {
        let mut sfc = PixelSurface::solid((2, 2), RED);
        sfc.fill(GREEN, Some(Rect::new(1, 0, 1, 1)));
        let fx = sfc.flipped(true, false);
        assert_eq!(fx.pixel(0, 0), GREEN);
        assert_eq!(fx.pixel(1, 0), RED);
        let fy = sfc.flipped(false, true);
        assert_eq!(fy.pixel(1, 1), GREEN);
        let none = sfc.flipped(false, false);
        assert_eq!(none, sfc);
    }

    #[test]
    fn to_alpha_keeps_pixels() {
        let sfc = PixelSurface::solid((2, 2), RED);
        let a = sfc.to_alpha();
        assert!(a.has_alpha());
        assert_eq!(a.pixel(0, 0), RED);
    }
}
