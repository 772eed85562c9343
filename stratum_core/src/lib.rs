// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incremental transform chains and dirty-rectangle compositing.
//!
//! `stratum_core` provides the surface-agnostic core of a 2D compositor:
//! graphics wrap a source image plus an ordered chain of transform
//! stages, and a compositor repaints only the parts of its target that
//! actually changed. It is `no_std` compatible (with `alloc`); pixel
//! work is delegated to a backend through the [`Surface`](surface::Surface)
//! trait.
//!
//! # Architecture
//!
//! Each draw turns accumulated mutations into a minimal repaint:
//!
//! ```text
//!   mutations (move / transform / dirty)
//!       │
//!       ▼
//!   Chain::render() ──► transformed surface + dirty region
//!       │
//!       ▼
//!   Graphic::pre_draw() ──► changed screen rects
//!       │
//!       ▼
//!   Compositor::draw() ──► per-layer culling ──► blits ──► changed rects
//! ```
//!
//! **[`graphic`]** — The [`Graphic`](graphic::Graphic) handle: a source
//! surface, its transform chain, position and visibility, plus change
//! callbacks. Clones share the image; views share the image but not the
//! position.
//!
//! **[`chain`]** — Ordered transform stages (crop, flip, tint, resize,
//! rotate, fill, custom) with cached intermediate surfaces. Rendering
//! re-applies only stages at or after the first change.
//!
//! **[`compositor`]** — Layered drawing with dirty-rectangle culling:
//! areas hidden behind opaque graphics in nearer layers are never
//! painted. Supports an overlay graphic and nesting via
//! [`Drawable`](compositor::Drawable).
//!
//! **[`group`]** — [`GraphicsGroup`](group::GraphicsGroup) for moving
//! and configuring a set of graphics as one unit.
//!
//! **[`rect`]** / **[`region`]** — Integer rect arithmetic, disjoint
//! splitting, and the three-state [`DirtyRegion`](region::DirtyRegion).
//!
//! **[`surface`]** — The [`Surface`](surface::Surface) trait backends
//! implement, with [`Rgba`](surface::Rgba) and
//! [`BlendMode`](surface::BlendMode).
//!
//! **[`trace`]** — [`TraceSink`](trace::TraceSink) trait and event types
//! for draw instrumentation, with zero-overhead
//! [`Tracer`](trace::Tracer) wrapper.
//!
//! **[`error`]** — Recoverable error types.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one
//!   branch per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates
//!   damage-rect events.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod chain;
pub mod compositor;
pub mod error;
pub mod graphic;
pub mod group;
pub mod rect;
pub mod region;
pub mod surface;
pub mod trace;

#[cfg(test)]
pub(crate) mod testsfc;
