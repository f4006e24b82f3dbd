// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors reported by [`RTree`](crate::RTree).

use thiserror::Error;

/// Failure of a payload-addressed tree operation.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum RTreeError {
    /// The payload was never inserted, or has already been removed.
    #[error("payload is not present in the tree")]
    NotFound,
}
