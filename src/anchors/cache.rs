//! Shape-keyed anchor cache.
//!
//! Anchor generation depends only on the feature-pyramid shapes, so a batch
//! of same-sized images shares one `AnchorSet`. Each distinct shape key is
//! populated at most once; concurrent first lookups of the same key compute
//! under the write lock while every later lookup clones an `Arc` under the
//! read lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::anchors::{AnchorGenerator, AnchorSet, FeatureMapShape};
use crate::util::DetectResult;

/// Concurrency-safe cache of generated anchor sets.
pub struct AnchorCache {
    generator: AnchorGenerator,
    entries: RwLock<HashMap<Vec<FeatureMapShape>, Arc<AnchorSet>>>,
}

impl AnchorCache {
    /// Wraps a generator with an empty cache.
    pub fn new(generator: AnchorGenerator) -> Self {
        Self {
            generator,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the anchor set for `shapes`, generating it on first use.
    pub fn anchors(&self, shapes: &[FeatureMapShape]) -> DetectResult<Arc<AnchorSet>> {
        {
            let entries = self.entries.read().expect("anchor cache lock poisoned");
            if let Some(set) = entries.get(shapes) {
                return Ok(Arc::clone(set));
            }
        }

        let mut entries = self.entries.write().expect("anchor cache lock poisoned");
        match entries.entry(shapes.to_vec()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let set = Arc::new(self.generator.generate(shapes)?);
                entry.insert(Arc::clone(&set));
                Ok(set)
            }
        }
    }

    /// Number of distinct shapes cached so far.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("anchor cache lock poisoned")
            .len()
    }

    /// True when nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::AnchorCache;
    use crate::anchors::{AnchorConfig, AnchorGenerator, FeatureMapShape, LevelSpec};
    use std::sync::Arc;

    fn cache() -> AnchorCache {
        let cfg = AnchorConfig {
            levels: vec![LevelSpec {
                stride: 16.0,
                scales: vec![32.0, 64.0],
            }],
            aspect_ratios: vec![0.5, 1.0, 2.0],
        };
        AnchorCache::new(AnchorGenerator::new(cfg).unwrap())
    }

    #[test]
    fn repeated_lookups_share_one_allocation() {
        let cache = cache();
        let shapes = [FeatureMapShape {
            width: 4,
            height: 3,
        }];
        let first = cache.anchors(&shapes).unwrap();
        let second = cache.anchors(&shapes).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_shapes_get_distinct_entries() {
        let cache = cache();
        let a = cache
            .anchors(&[FeatureMapShape {
                width: 4,
                height: 3,
            }])
            .unwrap();
        let b = cache
            .anchors(&[FeatureMapShape {
                width: 2,
                height: 2,
            }])
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn generation_errors_propagate_and_are_not_cached() {
        let cache = cache();
        assert!(cache.anchors(&[]).is_err());
        assert!(cache.is_empty());
    }
}
