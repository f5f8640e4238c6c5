//! Left join of tract polygons against attribute rows on the canonical id.

use crate::identifier::{IdentifierError, IdentifierNormalizer};
use crate::types::{
    AttributeRecord, AttributeTable, Attributes, CanonicalId, JoinedTract, RawTract, TractRecord,
};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::{info, warn};

const SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JoinError {
    #[error("duplicate key {id}: attribute rows {rows:?} share it")]
    DuplicateKey { id: CanonicalId, rows: Vec<usize> },
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}

/// How to treat several attribute rows normalizing to the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Drop every row of the key and record a rejection.
    #[default]
    Exclude,
    /// Fail the whole join.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Tract,
    Attribute,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub side: Side,
    /// Zero-based record positions in the source collection.
    pub records: Vec<usize>,
    #[serde(serialize_with = "serialize_display")]
    pub error: JoinError,
}

#[derive(Debug, Clone, Serialize)]
pub struct Truncation {
    pub side: Side,
    pub record: usize,
    pub original: String,
    pub canonical: CanonicalId,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinDiagnostics {
    /// Tract records handed to the join, valid or not.
    pub tract_count: usize,
    /// Attribute rows handed to the join, valid or not.
    pub attribute_count: usize,
    pub matched: usize,
    pub unmatched_tracts: usize,
    pub orphaned_attributes: usize,
    /// Tracts left unmatched because their key was ambiguous.
    pub ambiguous_tracts: usize,
    pub rejections: Vec<Rejection>,
    pub truncations: Vec<Truncation>,
    /// Null count per attribute column across the joined tracts.
    pub null_counts: BTreeMap<String, usize>,
    pub sample_tract_ids: Vec<CanonicalId>,
    pub sample_attribute_ids: Vec<CanonicalId>,
}

impl JoinDiagnostics {
    /// The join went through but nothing lined up, usually a padding problem.
    pub fn is_silent_loss(&self) -> bool {
        self.matched == 0 && self.tract_count > 0
    }

    pub fn log(&self) {
        info!("Sample GEOIDs from tracts: {:?}", self.sample_tract_ids);
        info!("Sample GEOIDs from attributes: {:?}", self.sample_attribute_ids);
        info!(
            "Matched {} of {} tracts ({} attribute rows, {} orphaned)",
            self.matched, self.tract_count, self.attribute_count, self.orphaned_attributes
        );
        if !self.truncations.is_empty() {
            warn!("{} identifiers were truncated to the canonical width", self.truncations.len());
        }
        for rejection in &self.rejections {
            warn!("Rejected {:?} records {:?}: {}", rejection.side, rejection.records, rejection.error);
        }
        for (column, nulls) in &self.null_counts {
            info!("Null values after join in {}: {}", column, nulls);
        }
        if self.is_silent_loss() {
            warn!("No tract matched any attribute row; check identifier padding");
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub tracts: Vec<JoinedTract>,
    pub diagnostics: JoinDiagnostics,
}

/// Normalizes tract ids, excluding invalid ones with a recorded rejection.
pub fn normalize_tracts(
    raw: Vec<RawTract>,
    normalizer: &IdentifierNormalizer,
    diagnostics: &mut JoinDiagnostics,
) -> Vec<TractRecord> {
    diagnostics.tract_count = raw.len();
    let mut tracts = Vec::with_capacity(raw.len());

    for (i, tract) in raw.into_iter().enumerate() {
        match normalizer.normalize(&tract.id) {
            Ok(n) => {
                if let Some(original) = n.truncated {
                    diagnostics.truncations.push(Truncation {
                        side: Side::Tract,
                        record: i,
                        original,
                        canonical: n.id.clone(),
                    });
                }
                tracts.push(TractRecord {
                    id: n.id,
                    geometry: tract.geometry,
                });
            }
            Err(e) => diagnostics.rejections.push(Rejection {
                side: Side::Tract,
                records: vec![i],
                error: e.into(),
            }),
        }
    }

    tracts
}

pub fn join(
    raw_tracts: Vec<RawTract>,
    table: &AttributeTable,
    normalizer: &IdentifierNormalizer,
    policy: DuplicatePolicy,
) -> Result<JoinOutcome, JoinError> {
    let mut diagnostics = JoinDiagnostics::default();
    let tracts = normalize_tracts(raw_tracts, normalizer, &mut diagnostics);

    // 1. Normalize attribute ids, grouping row positions by key
    diagnostics.attribute_count = table.rows.len();
    let mut by_key: BTreeMap<CanonicalId, Vec<usize>> = BTreeMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        match normalizer.normalize(&row.id) {
            Ok(n) => {
                if let Some(original) = n.truncated {
                    diagnostics.truncations.push(Truncation {
                        side: Side::Attribute,
                        record: i,
                        original,
                        canonical: n.id.clone(),
                    });
                }
                if diagnostics.sample_attribute_ids.len() < SAMPLE_SIZE {
                    diagnostics.sample_attribute_ids.push(n.id.clone());
                }
                by_key.entry(n.id).or_default().push(i);
            }
            Err(e) => diagnostics.rejections.push(Rejection {
                side: Side::Attribute,
                records: vec![i],
                error: e.into(),
            }),
        }
    }

    // 2. Split unique keys from ambiguous ones
    let mut index: HashMap<&CanonicalId, &AttributeRecord> = HashMap::with_capacity(by_key.len());
    let mut ambiguous: HashSet<&CanonicalId> = HashSet::new();
    for (id, rows) in &by_key {
        if rows.len() == 1 {
            index.insert(id, &table.rows[rows[0]]);
            continue;
        }
        let error = JoinError::DuplicateKey {
            id: id.clone(),
            rows: rows.clone(),
        };
        match policy {
            DuplicatePolicy::Abort => return Err(error),
            DuplicatePolicy::Exclude => {
                diagnostics.rejections.push(Rejection {
                    side: Side::Attribute,
                    records: rows.clone(),
                    error,
                });
                ambiguous.insert(id);
            }
        }
    }

    // Every valid attribute row whose key names no tract, ambiguous or not
    let tract_keys: HashSet<CanonicalId> = tracts.iter().map(|t| t.id.clone()).collect();
    diagnostics.orphaned_attributes = by_key
        .iter()
        .filter(|(id, _)| !tract_keys.contains(*id))
        .map(|(_, rows)| rows.len())
        .sum();

    // 3. Left join, one output per tract in input order
    let mut joined = Vec::with_capacity(tracts.len());
    for tract in tracts {
        if diagnostics.sample_tract_ids.len() < SAMPLE_SIZE {
            diagnostics.sample_tract_ids.push(tract.id.clone());
        }

        let row = index.get(&tract.id);
        let attributes: Attributes = table
            .columns
            .iter()
            .map(|column| {
                let value = row.and_then(|r| r.values.get(column).cloned().flatten());
                (column.clone(), value)
            })
            .collect();

        if row.is_some() {
            diagnostics.matched += 1;
        } else {
            diagnostics.unmatched_tracts += 1;
            if ambiguous.contains(&tract.id) {
                diagnostics.ambiguous_tracts += 1;
            }
        }

        joined.push(JoinedTract {
            matched: row.is_some(),
            id: tract.id,
            geometry: tract.geometry,
            attributes,
        });
    }

    for column in &table.columns {
        let nulls = joined.iter().filter(|t| t.value(column).is_none()).count();
        diagnostics.null_counts.insert(column.clone(), nulls);
    }

    Ok(JoinOutcome {
        tracts: joined,
        diagnostics,
    })
}

fn serialize_display<S: Serializer>(error: &JoinError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeValue, RawIdentifier};
    use geo::{polygon, MultiPolygon};

    fn square() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]])
    }

    fn tract(id: impl Into<RawIdentifier>) -> RawTract {
        RawTract {
            id: id.into(),
            geometry: square(),
        }
    }

    fn row(id: impl Into<RawIdentifier>, walk: Option<f64>) -> AttributeRecord {
        let mut values = Attributes::new();
        values.insert("NatWalkInd".to_string(), walk.map(AttributeValue::Number));
        AttributeRecord {
            id: id.into(),
            values,
        }
    }

    fn table(rows: Vec<AttributeRecord>) -> AttributeTable {
        AttributeTable {
            columns: vec!["NatWalkInd".to_string()],
            rows,
        }
    }

    #[test]
    fn left_join_keeps_every_tract() {
        let tracts = vec![tract("53001950100"), tract("53001950200")];
        let attrs = table(vec![
            row("53001950100", Some(42.0)),
            row("53099999999", Some(10.0)),
        ]);

        let outcome = join(tracts, &attrs, &IdentifierNormalizer::default(), DuplicatePolicy::Exclude)
            .unwrap();

        assert_eq!(outcome.tracts.len(), 2);
        assert_eq!(outcome.tracts[0].metric("NatWalkInd"), Some(42.0));
        assert!(outcome.tracts[0].matched);
        assert_eq!(outcome.tracts[1].metric("NatWalkInd"), None);
        assert!(!outcome.tracts[1].matched);
        // Explicit null, not a missing key.
        assert_eq!(outcome.tracts[1].attributes.get("NatWalkInd"), Some(&None));

        let d = &outcome.diagnostics;
        assert_eq!(d.matched, 1);
        assert_eq!(d.unmatched_tracts, 1);
        assert_eq!(d.orphaned_attributes, 1);
        assert_eq!(d.tract_count, 2);
        assert_eq!(d.attribute_count, 2);
        assert_eq!(d.null_counts.get("NatWalkInd"), Some(&1));
        assert!(!d.is_silent_loss());
    }

    #[test]
    fn mismatched_encodings_still_join() {
        let tracts = vec![tract("06001400100"), tract(6001400200_i64)];
        let attrs = table(vec![
            row(6001400100_i64, Some(12.5)),
            row("6001400200", Some(3.0)),
        ]);

        let outcome = join(tracts, &attrs, &IdentifierNormalizer::default(), DuplicatePolicy::Exclude)
            .unwrap();

        assert_eq!(outcome.diagnostics.matched, 2);
        assert_eq!(outcome.tracts[1].id.as_str(), "06001400200");
        assert_eq!(outcome.tracts[1].metric("NatWalkInd"), Some(3.0));
    }

    #[test]
    fn duplicate_keys_abort_under_abort_policy() {
        let tracts = vec![tract("53001950100")];
        let attrs = table(vec![
            row("53001950100", Some(1.0)),
            row("153001950100", Some(2.0)),
        ]);

        let err = join(tracts, &attrs, &IdentifierNormalizer::default(), DuplicatePolicy::Abort)
            .unwrap_err();

        match err {
            JoinError::DuplicateKey { id, rows } => {
                assert_eq!(id.as_str(), "53001950100");
                assert_eq!(rows, vec![0, 1]);
            }
            other => panic!("expected DuplicateKey, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_keys_are_excluded_and_recorded() {
        let tracts = vec![tract("53001950100"), tract("53001950200")];
        let attrs = table(vec![
            row("53001950100", Some(1.0)),
            row("53001950100", Some(2.0)),
            row("53001950200", Some(5.0)),
        ]);

        let outcome = join(tracts, &attrs, &IdentifierNormalizer::default(), DuplicatePolicy::Exclude)
            .unwrap();

        assert_eq!(outcome.tracts.len(), 2);
        assert_eq!(outcome.tracts[0].metric("NatWalkInd"), None);
        assert_eq!(outcome.tracts[1].metric("NatWalkInd"), Some(5.0));

        let d = &outcome.diagnostics;
        assert_eq!(d.matched, 1);
        assert_eq!(d.ambiguous_tracts, 1);
        assert_eq!(d.orphaned_attributes, 0);
        assert_eq!(d.rejections.len(), 1);
        assert!(matches!(d.rejections[0].error, JoinError::DuplicateKey { .. }));
        assert_eq!(d.rejections[0].records, vec![0, 1]);
    }

    #[test]
    fn duplicate_rows_without_a_tract_count_as_orphans() {
        let tracts = vec![tract("53001950100")];
        let attrs = table(vec![
            row("53001950100", Some(4.0)),
            row("53099999999", Some(1.0)),
            row("53099999999", Some(2.0)),
        ]);

        let outcome = join(tracts, &attrs, &IdentifierNormalizer::default(), DuplicatePolicy::Exclude)
            .unwrap();

        let d = &outcome.diagnostics;
        assert_eq!(d.matched, 1);
        assert_eq!(d.orphaned_attributes, 2);
        assert_eq!(d.ambiguous_tracts, 0);
        assert_eq!(d.rejections.len(), 1);
    }

    #[test]
    fn invalid_identifiers_are_excluded_with_diagnostics() {
        let tracts = vec![tract("53001950100"), tract(""), tract("53001950200")];
        let attrs = table(vec![row("53001950100", Some(7.0)), row("n/a", Some(9.0))]);

        let outcome = join(tracts, &attrs, &IdentifierNormalizer::default(), DuplicatePolicy::Exclude)
            .unwrap();

        assert_eq!(outcome.tracts.len(), 2);
        let d = &outcome.diagnostics;
        assert_eq!(d.tract_count, 3);
        assert_eq!(d.rejections.len(), 2);
        assert_eq!(d.rejections[0].side, Side::Tract);
        assert_eq!(d.rejections[0].records, vec![1]);
        assert_eq!(d.rejections[1].side, Side::Attribute);
        assert!(matches!(d.rejections[1].error, JoinError::Identifier(_)));
    }

    #[test]
    fn zero_matches_is_flagged_as_silent_loss() {
        let tracts = vec![tract("53001950100")];
        let attrs = table(vec![row("41001950100", Some(1.0))]);

        let outcome = join(tracts, &attrs, &IdentifierNormalizer::default(), DuplicatePolicy::Exclude)
            .unwrap();

        assert_eq!(outcome.tracts.len(), 1);
        assert!(outcome.diagnostics.is_silent_loss());
    }

    #[test]
    fn truncations_are_recorded() {
        let tracts = vec![tract("53001950100")];
        let attrs = table(vec![row("953001950100", Some(1.0))]);

        let outcome = join(tracts, &attrs, &IdentifierNormalizer::default(), DuplicatePolicy::Exclude)
            .unwrap();

        assert_eq!(outcome.diagnostics.matched, 1);
        let t = &outcome.diagnostics.truncations;
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].side, Side::Attribute);
        assert_eq!(t[0].original, "953001950100");
    }

    #[test]
    fn diagnostics_serialize_to_json() {
        let attrs = table(vec![row("x-1", None)]);
        let outcome = join(vec![], &attrs, &IdentifierNormalizer::default(), DuplicatePolicy::Exclude)
            .unwrap();
        let json = serde_json::to_value(&outcome.diagnostics).unwrap();
        assert_eq!(json["rejections"][0]["side"], "attribute");
        assert!(json["rejections"][0]["error"].as_str().unwrap().contains("invalid identifier"));
    }
}
