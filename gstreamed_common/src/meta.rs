//! Latest tracked objects per source, handed from the per-source GIE probes
//! to the OSD probe running after the tiler.

use std::sync::{Arc, Mutex};

use crate::bbox::Bbox;

#[derive(Debug, Clone, Default)]
pub struct FrameMetaStore {
    objects: Arc<Mutex<Vec<Vec<Bbox>>>>,
}

impl FrameMetaStore {
    pub fn new(source_count: usize) -> Self {
        Self {
            objects: Arc::new(Mutex::new(vec![Vec::new(); source_count])),
        }
    }

    /// Replaces the objects of `source` with the ones found in its latest frame.
    pub fn update(&self, source: usize, bboxes: Vec<Bbox>) {
        let Ok(mut objects) = self.objects.lock() else {
            log::warn!("frame meta store poisoned, dropping update for source {source}");
            return;
        };
        if let Some(slot) = objects.get_mut(source) {
            *slot = bboxes;
        }
    }

    /// Copy of the current objects, indexed by source.
    pub fn snapshot(&self) -> Vec<Vec<Bbox>> {
        self.objects
            .lock()
            .map(|objects| objects.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_replaces_only_given_source() {
        let store = FrameMetaStore::new(2);
        let bbox = Bbox {
            xmin: 1.,
            ymin: 2.,
            xmax: 3.,
            ymax: 4.,
            confidence: 0.5,
            class: 2,
            tracker_id: Some(7),
        };
        store.update(1, vec![bbox.clone()]);
        store.update(5, vec![bbox.clone()]);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].is_empty());
        assert_eq!(snapshot[1], vec![bbox]);
    }
}
