// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A counting [`Surface`] double for core tests.
//!
//! Tracks size and alpha exactly and counts operations; pixel contents
//! are not modelled. Backend crates test real pixels against their own
//! implementations.

#[cfg(not(feature = "std"))]
use kurbo::common::FloatFuncs as _;

use crate::rect::{Rect, round_i32};
use crate::surface::{BlendMode, Rgba, Surface};

/// Pixel-free surface that records what was asked of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TestSurface {
    size: (i32, i32),
    alpha: bool,
    /// Number of blits received.
    pub(crate) blits: usize,
    /// Number of fills received.
    pub(crate) fills: usize,
    /// Last colour filled with, if any.
    pub(crate) last_fill: Option<Rgba>,
    /// Last blend mode blitted with, if any.
    pub(crate) last_blend: Option<BlendMode>,
}

impl TestSurface {
    /// An opaque surface, as `Surface::new` with `alpha: false`.
    pub(crate) fn opaque(size: (i32, i32)) -> Self {
        Self::new(size, false)
    }
}

impl Surface for TestSurface {
    fn new(size: (i32, i32), alpha: bool) -> Self {
        Self {
            size,
            alpha,
            blits: 0,
            fills: 0,
            last_fill: None,
            last_blend: None,
        }
    }

    fn size(&self) -> (i32, i32) {
        self.size
    }

    fn has_alpha(&self) -> bool {
        self.alpha
    }

    fn blit(&mut self, _src: &Self, _dest_pos: (i32, i32), _src_rect: Rect, mode: BlendMode) {
        self.blits += 1;
        self.last_blend = Some(mode);
    }

    fn fill(&mut self, colour: Rgba, _rect: Option<Rect>) {
        self.fills += 1;
        self.last_fill = Some(colour);
    }

    fn scaled(&self, size: (i32, i32)) -> Self {
        Self {
            size,
            ..self.clone()
        }
    }

    fn rotated(&self, radians: f64) -> Self {
        let (w, h) = (f64::from(self.size.0), f64::from(self.size.1));
        let (s, c) = (radians.sin().abs(), radians.cos().abs());
        let quarter = {
            let half = radians.rem_euclid(core::f64::consts::FRAC_PI_2);
            half < 1e-9 || core::f64::consts::FRAC_PI_2 - half < 1e-9
        };
        Self {
            size: (round_i32(w * c + h * s), round_i32(w * s + h * c)),
            alpha: self.alpha || !quarter,
            ..self.clone()
        }
    }

    fn flipped(&self, _x: bool, _y: bool) -> Self {
        self.clone()
    }

    fn to_alpha(&self) -> Self {
        Self {
            alpha: true,
            ..self.clone()
        }
    }
}
