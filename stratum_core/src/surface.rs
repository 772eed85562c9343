// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Surface contract for pixel backends.
//!
//! `stratum_core` never touches pixels itself. Everything that reads or
//! writes image data goes through the [`Surface`] trait, implemented by
//! backend crates (and by cheap counting doubles in tests). The core
//! tracks geometry, dirt, and stage bookkeeping; the backend supplies
//! blits, fills, and the whole-surface transforms.

use crate::rect::Rect;

/// An RGBA colour with 8 bits per channel, non-premultiplied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgba {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha; 255 is opaque.
    pub a: u8,
}

impl Rgba {
    /// Opaque white. Tinting by this colour is an identity.
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    /// Opaque black.
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);

    /// Creates a colour from all four channels.
    #[inline]
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Creates an opaque colour.
    #[inline]
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    /// This colour with a different alpha.
    #[inline]
    #[must_use]
    pub const fn with_alpha(self, a: u8) -> Self {
        Self::new(self.r, self.g, self.b, a)
    }

    /// Returns `true` if the colour is fully opaque.
    #[inline]
    #[must_use]
    pub const fn is_opaque(&self) -> bool {
        self.a == 255
    }
}

/// How source pixels combine with destination pixels in a blit or fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Standard alpha compositing; the default.
    #[default]
    SourceOver,
    /// Per-channel multiply (including alpha). Used by tinting.
    Multiply,
    /// Source replaces destination, alpha included.
    Copy,
}

/// A 2D pixel buffer the compositing core can draw with.
///
/// Implementations are value types cloned freely by the core, which
/// shares them behind `Rc` and relies on `Rc::make_mut` for in-place
/// partial updates. A surface either carries per-pixel alpha or is
/// opaque; [`Surface::has_alpha`] drives the compositor's
/// opaque-coverage culling, so an implementation must only report
/// `false` when every pixel really is opaque.
pub trait Surface: Clone {
    /// Creates a blank surface. With `alpha` set the surface starts
    /// fully transparent, otherwise fully black and opaque.
    #[must_use]
    fn new(size: (i32, i32), alpha: bool) -> Self;

    /// The `(width, height)` of the surface in pixels.
    fn size(&self) -> (i32, i32);

    /// Whether the surface carries per-pixel alpha.
    fn has_alpha(&self) -> bool;

    /// Copies `src_rect` of `src` onto this surface at `dest_pos`.
    ///
    /// `src_rect` may extend past the bounds of `src`; the out-of-bounds
    /// part is clipped away and `dest_pos` shifts by the same amount, so
    /// in-bounds source pixels keep their relative placement. Writes
    /// outside this surface are clipped.
    fn blit(&mut self, src: &Self, dest_pos: (i32, i32), src_rect: Rect, mode: BlendMode);

    /// Fills `rect` (or the whole surface) with a colour, replacing
    /// pixels rather than blending.
    fn fill(&mut self, colour: Rgba, rect: Option<Rect>);

    /// A copy resampled to the given size.
    #[must_use]
    fn scaled(&self, size: (i32, i32)) -> Self;

    /// A copy rotated counterclockwise by `radians`.
    ///
    /// The result is the bounding box of the rotated image; revealed
    /// corners are transparent (the result always carries alpha unless
    /// the angle is a multiple of a quarter turn).
    #[must_use]
    fn rotated(&self, radians: f64) -> Self;

    /// A copy mirrored across the vertical and/or horizontal axis.
    #[must_use]
    fn flipped(&self, x: bool, y: bool) -> Self;

    /// A copy that carries per-pixel alpha (all pixels opaque if the
    /// source did not).
    #[must_use]
    fn to_alpha(&self) -> Self;

    /// The surface's bounds as a rectangle at the origin.
    #[must_use]
    fn rect(&self) -> Rect {
        let (w, h) = self.size();
        Rect::new(0, 0, w, h)
    }
}
