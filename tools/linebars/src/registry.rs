use crate::errors::LinebarsError;
use crate::patterns::PatternTable;
use crate::tracker::{BarStyle, Tracker};
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed, ordered set of trackers addressed by the identity strings they were built from.
#[derive(Debug, Clone)]
pub struct Registry {
    keys: Vec<String>,
    trackers: Vec<Tracker>,
    lookup: HashMap<String, usize>,
    render_cache: Vec<Option<String>>,
}

impl Registry {
    /// Build one tracker per identity, in order. The registry size always equals
    /// `identities.len()`.
    pub fn new<F>(identities: &[String], mut tracker_factory: F) -> Result<Self, LinebarsError>
    where
        F: FnMut(usize, &str) -> Tracker,
    {
        if identities.is_empty() {
            return Err(LinebarsError::Configuration(
                "lookup must contain at least one identity".to_string(),
            ));
        }

        let mut lookup = HashMap::with_capacity(identities.len());
        for (index, identity) in identities.iter().enumerate() {
            if lookup.insert(identity.clone(), index).is_some() {
                return Err(LinebarsError::Configuration(format!(
                    "duplicate identity in lookup: {identity}"
                )));
            }
        }

        let trackers = identities
            .iter()
            .enumerate()
            .map(|(index, identity)| tracker_factory(index, identity))
            .collect::<Vec<_>>();

        Ok(Self {
            keys: identities.to_vec(),
            render_cache: vec![None; trackers.len()],
            trackers,
            lookup,
        })
    }

    pub fn with_style(
        identities: &[String],
        patterns: Arc<PatternTable>,
        style: Arc<BarStyle>,
    ) -> Result<Self, LinebarsError> {
        Self::new(identities, |_, _| {
            Tracker::new(Arc::clone(&patterns), Arc::clone(&style))
        })
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn index_of(&self, identity: &str) -> Option<usize> {
        self.lookup.get(identity).copied()
    }

    /// Identity string the line at `index` was registered under.
    pub fn key(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    pub fn tracker(&self, index: usize) -> Option<&Tracker> {
        self.trackers.get(index)
    }

    pub fn tracker_mut(&mut self, index: usize) -> Option<&mut Tracker> {
        self.trackers.get_mut(index)
    }

    pub fn trackers(&self) -> impl Iterator<Item = &Tracker> {
        self.trackers.iter()
    }

    pub fn all_complete(&self) -> bool {
        self.trackers.iter().all(Tracker::is_complete)
    }

    pub fn complete_all(&mut self) {
        for tracker in &mut self.trackers {
            tracker.force_complete();
        }
    }

    pub fn cached_render(&self, index: usize) -> Option<&str> {
        self.render_cache.get(index).and_then(|entry| entry.as_deref())
    }

    /// Replace the cached rendering for `index`; returns true if it differs from the previous one.
    pub fn store_render(&mut self, index: usize, rendered: String) -> bool {
        match self.render_cache.get_mut(index) {
            Some(slot) => {
                let changed = slot.as_deref() != Some(rendered.as_str());
                *slot = Some(rendered);
                changed
            }
            None => false,
        }
    }
}
