//! The bundle codify produces and consolidation enriches.

use super::{Engram, Meta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A codified exchange: summary-side meta plus the engrams extracted from it.
///
/// Mutated only during the consolidation window; terminal once
/// `ENGRAM_COMPLETE` is emitted for its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Opaque observation id.
    pub id: String,
    /// The id of the response whose processing spawned this observation.
    pub source_id: String,
    /// Summary-side metadata.
    pub meta: Meta,
    /// The engrams extracted from the exchange.
    pub engram_list: Vec<Engram>,
}

impl Observation {
    /// Create an observation with a fresh id.
    pub fn new(source_id: impl Into<String>, meta: Meta, engram_list: Vec<Engram>) -> Self {
        Self {
            id: super::fresh_id(),
            source_id: source_id.into(),
            meta,
            engram_list,
        }
    }

    /// Merge this observation into a new one, keeping only engrams whose
    /// scores clear both floors. Source ids and locations are re-derived
    /// from the surviving engrams; the result carries fresh ids.
    pub fn merge(&self, accuracy_floor: i64, relevancy_floor: i64) -> Observation {
        let surviving: Vec<Engram> = self
            .engram_list
            .iter()
            .filter(|e| e.accuracy > accuracy_floor && e.relevancy > relevancy_floor)
            .cloned()
            .collect();

        let source_ids: BTreeSet<String> =
            surviving.iter().map(|e| e.source_id.clone()).collect();
        let locations: BTreeSet<String> = surviving.iter().map(|e| e.location.clone()).collect();

        let meta = Meta::new(
            locations.into_iter().collect(),
            source_ids.into_iter().collect(),
            self.meta.keywords.clone(),
            self.meta.summary_initial.clone(),
            self.meta.summary_full.clone(),
        );

        Observation::new(self.source_id.clone(), meta, surviving)
    }

    /// Render the observation for logging: the meta block followed by each
    /// engram block.
    pub fn render(&self) -> String {
        let mut out = self.meta.render();
        out.push('\n');
        for engram in &self.engram_list {
            out.push_str(&engram.render());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Summary;

    fn observation_with_scores(scores: &[(i64, i64)]) -> Observation {
        let engrams = scores
            .iter()
            .enumerate()
            .map(|(i, (accuracy, relevancy))| {
                Engram::new(format!("src-{i}"), format!("loc-{i}"), "body", true)
                    .with_scores(*accuracy, *relevancy)
            })
            .collect();
        let meta = Meta::new(
            vec![],
            vec![],
            vec!["kw".to_string()],
            None,
            Summary::new("summary"),
        );
        Observation::new("response-1", meta, engrams)
    }

    #[test]
    fn merge_filters_by_both_floors() {
        let observation = observation_with_scores(&[(5, 5), (5, 1), (1, 5), (1, 1)]);
        let merged = observation.merge(2, 2);
        assert_eq!(merged.engram_list.len(), 1);
        assert_eq!(merged.engram_list[0].accuracy, 5);
        assert_eq!(merged.engram_list[0].relevancy, 5);
    }

    #[test]
    fn merge_rederives_locations_and_source_ids() {
        let observation = observation_with_scores(&[(5, 5), (6, 6)]);
        let merged = observation.merge(0, 0);
        assert_eq!(merged.meta.locations.len(), 2);
        assert_eq!(merged.meta.source_ids.len(), 2);
    }

    #[test]
    fn merge_produces_fresh_ids() {
        let observation = observation_with_scores(&[(5, 5)]);
        let merged = observation.merge(0, 0);
        assert_ne!(merged.id, observation.id);
        assert_ne!(merged.meta.id, observation.meta.id);
        assert_eq!(merged.source_id, observation.source_id);
    }

    #[test]
    fn render_contains_meta_and_engrams() {
        let observation = observation_with_scores(&[(1, 1)]);
        let rendered = observation.render();
        assert!(rendered.contains("[meta]"));
        assert!(rendered.contains("<begin>"));
    }
}
