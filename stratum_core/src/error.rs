// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recoverable error conditions.
//!
//! Contract violations (stale handles, out-of-range indices) panic;
//! conditions a caller can reasonably hit with valid inputs are returned
//! as errors instead.

use core::fmt;

use crate::chain::StageName;

/// Returned when adding a graphic that has no layer key to a compositor.
///
/// A graphic's layer key is cleared when it is installed as the overlay;
/// such a graphic must be given a layer again before it can be added as
/// an ordinary member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidLayerError;

impl fmt::Display for InvalidLayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("graphic has no layer key")
    }
}

impl core::error::Error for InvalidLayerError {}

/// Returned when a positional stage insert names a stage that is not in
/// the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownStageError {
    /// The stage that was named but not found.
    pub stage: StageName,
}

impl fmt::Display for UnknownStageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no such stage in chain: {:?}", self.stage)
    }
}

impl core::error::Error for UnknownStageError {}
