//! Batch mapping helpers.
//!
//! Detection-core computation is per-image and stateless apart from shared
//! read-only configuration, so a batch maps independently over its images.
//! The `rayon` feature adds a data-parallel variant with identical results;
//! there is no cross-image ordering requirement beyond output position.

use crate::util::DetectResult;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Applies `f` to every image serially, failing on the first error.
pub fn map_images<T, U, F>(items: &[T], f: F) -> DetectResult<Vec<U>>
where
    F: Fn(&T) -> DetectResult<U>,
{
    items.iter().map(f).collect()
}

/// Applies `f` to every image in parallel (rayon).
///
/// Output order matches input order; results are identical to
/// [`map_images`].
#[cfg(feature = "rayon")]
pub fn map_images_par<T, U, F>(items: &[T], f: F) -> DetectResult<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> DetectResult<U> + Sync + Send,
{
    items.par_iter().map(f).collect()
}
