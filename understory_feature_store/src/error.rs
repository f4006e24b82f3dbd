// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors reported by the store.

use thiserror::Error;

use crate::feature::FeatureHandle;

/// Failure of a store mutation.
///
/// Adding a feature whose id is already taken is not an error: it is skipped
/// and reported through the `Ok(false)` / accepted-count return values.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A feature without an id was added while it is already in the store.
    #[error("feature {0:?} was already added to the store")]
    AlreadyAdded(FeatureHandle),
    /// The feature is not tracked by the store.
    #[error("feature {0:?} is not in the store")]
    NotFound(FeatureHandle),
}

/// Result alias used throughout the store.
pub type Result<T> = core::result::Result<T, StoreError>;
