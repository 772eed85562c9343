// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for compositor draws.
//!
//! [`TraceSink`] has one method per draw event, each defaulting to a
//! no-op, so implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace`
//! feature is **off**, every `Tracer` method compiles to nothing (zero
//! overhead). When **on**, each method performs a single `Option` branch
//! before dispatching.
//!
//! # Crate features
//!
//! - `trace` — enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`) — gates [`DamageRect`] and the
//!   corresponding `TraceSink` method.

use crate::compositor::{GraphicId, LayerKey};

/// Emitted at the start of a compositor draw.
#[derive(Clone, Copy, Debug)]
pub struct DrawBeginEvent {
    /// Monotonic per-compositor draw counter.
    pub draw_index: u64,
    /// Number of graphics in the compositor, overlay included.
    pub graphics: usize,
    /// Number of distinct layers in use.
    pub layers: usize,
}

/// Emitted after a graphic reported its changed areas.
#[derive(Clone, Copy, Debug)]
pub struct GraphicPreparedEvent {
    /// Draw counter.
    pub draw_index: u64,
    /// The graphic that was prepared.
    pub id: GraphicId,
    /// Number of changed screen rects it reported.
    pub dirty_rects: usize,
    /// Whether the graphic is currently visible.
    pub visible: bool,
}

/// Emitted after one layer's graphics were painted.
#[derive(Clone, Copy, Debug)]
pub struct LayerPaintedEvent {
    /// Draw counter.
    pub draw_index: u64,
    /// Which layer was painted.
    pub layer: LayerKey,
    /// Number of disjoint screen rects repainted for this layer.
    pub rects: usize,
}

/// Emitted at the end of a compositor draw.
#[derive(Clone, Copy, Debug)]
pub struct DrawEndEvent {
    /// Draw counter.
    pub draw_index: u64,
    /// Number of disjoint target rects that changed.
    pub changed_rects: usize,
}

/// An axis-aligned damage rectangle.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug)]
pub struct DamageRect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// Receives trace events from compositor draws.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called at the start of a draw.
    fn on_draw_begin(&mut self, e: &DrawBeginEvent) {
        _ = e;
    }

    /// Called after each graphic is prepared.
    fn on_graphic_prepared(&mut self, e: &GraphicPreparedEvent) {
        _ = e;
    }

    /// Called after each layer is painted.
    fn on_layer_painted(&mut self, e: &LayerPaintedEvent) {
        _ = e;
    }

    /// Called at the end of a draw.
    fn on_draw_end(&mut self, e: &DrawEndEvent) {
        _ = e;
    }

    /// Called with the draw's damage rectangles (requires `trace-rich`).
    #[cfg(feature = "trace-rich")]
    fn on_damage_rects(&mut self, draw_index: u64, rects: &[DamageRect]) {
        _ = (draw_index, rects);
    }
}

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to
/// nothing. When **on**, each method checks the inner `Option` (one
/// branch) before dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Emits a [`DrawBeginEvent`].
    #[inline]
    pub fn draw_begin(&mut self, e: &DrawBeginEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_draw_begin(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`GraphicPreparedEvent`].
    #[inline]
    pub fn graphic_prepared(&mut self, e: &GraphicPreparedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_graphic_prepared(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`LayerPaintedEvent`].
    #[inline]
    pub fn layer_painted(&mut self, e: &LayerPaintedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_layer_painted(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`DrawEndEvent`].
    #[inline]
    pub fn draw_end(&mut self, e: &DrawEndEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_draw_end(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits damage rectangles (requires `trace-rich`).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn damage_rects(&mut self, draw_index: u64, rects: &[DamageRect]) {
        if let Some(s) = &mut self.sink {
            s.on_damage_rects(draw_index, rects);
        }
    }
}
