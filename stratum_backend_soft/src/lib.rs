// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Software pixel backend for `stratum_core`.
//!
//! [`PixelSurface`] implements the core's
//! [`Surface`](stratum_core::surface::Surface) trait on a plain
//! non-premultiplied RGBA8 buffer, with CPU blits, fills, and the
//! whole-surface transforms (scale, rotate, flip). [`ResourcePool`]
//! shares loaded surfaces by key so many graphics can present one
//! image without copying it.
//!
//! This backend favours exactness over speed: quarter-turn rotations
//! are lossless integer remaps, and everything is deterministic, which
//! makes it the reference implementation the compositor's integration
//! tests run against.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod pool;
mod surface;

pub use pool::ResourcePool;
pub use surface::PixelSurface;
