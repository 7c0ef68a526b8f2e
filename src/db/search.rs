use rusqlite::types::Value;

use super::entries::{RECORD_COLUMNS, record_from_row};
use super::models::ScoredResource;
use super::{Store, serialize_vector};
use crate::error::EngineError;

/// Restricts which entries a search may rank.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchFilter<'a> {
    /// Only entries whose foundation is in this set. `None` searches everything;
    /// an empty set matches nothing.
    pub foundations: Option<&'a [String]>,
}

/// Rows whose distance is undefined (a zero-length vector on either side)
/// map to `None`.
fn map_search_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<ScoredResource>> {
    let Some(distance) = row.get::<_, Option<f64>>(1)? else {
        return Ok(None);
    };
    Ok(Some(ScoredResource {
        entry_id: row.get(0)?,
        record: record_from_row(row, 2)?,
        score: 1.0 - (distance / 2.0),
    }))
}

impl Store {
    /// Rank stored entries by cosine similarity to `query_vector`.
    ///
    /// The filter is applied in the WHERE clause, so excluded entries never
    /// compete for the `top_k` slots. Equal distances are ordered by entry id.
    /// Entries with no defined distance rank after every other entry and are
    /// not returned.
    pub fn search(
        &self,
        query_vector: &[f32],
        filter: &SearchFilter<'_>,
        top_k: usize,
    ) -> Result<Vec<ScoredResource>, EngineError> {
        if top_k == 0 || filter.foundations.is_some_and(<[String]>::is_empty) {
            return Ok(Vec::new());
        }

        let mut query = format!(
            r#"
            SELECT
                r.entry_id,
                vec_distance_cosine(v.embedding, ?) AS distance,
                {RECORD_COLUMNS}
            FROM vec_resources v
            JOIN resources r ON v.rowid = r.id
            "#
        );
        let mut params: Vec<Value> = vec![Value::Blob(serialize_vector(query_vector))];

        if let Some(foundations) = filter.foundations {
            let placeholders = vec!["?"; foundations.len()].join(", ");
            query.push_str(&format!(" WHERE r.foundation_name IN ({placeholders})"));
            params.extend(foundations.iter().map(|f| Value::Text(f.clone())));
        }

        query.push_str(" ORDER BY distance IS NULL, distance ASC, r.entry_id ASC LIMIT ?");
        params.push(Value::Integer(top_k as i64));

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_search_row)?;

        let mut results = Vec::new();
        for row in rows {
            if let Some(hit) = row? {
                results.push(hit);
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingVersion;
    use crate::records::sample_record;

    fn store_with(entries: &[(&str, &str, [f32; 4])]) -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .prepare_generation(&EmbeddingVersion {
                model: "test".to_string(),
                dimensions: 4,
            })
            .unwrap();
        for (foundation, name, vector) in entries {
            let record = sample_record(foundation, "s", name);
            store
                .upsert(&record.entry_id(), vector, &record, "h", "test")
                .unwrap();
        }
        store
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let store = store_with(&[
            ("Foundation 2: Cells", "Mitosis", [1.0, 0.0, 0.0, 0.0]),
            ("Foundation 2: Cells", "Meiosis", [0.7, 0.7, 0.0, 0.0]),
            ("Foundation 2: Cells", "Osmosis", [0.0, 0.0, 1.0, 0.0]),
        ]);

        let results = store
            .search(&[1.0, 0.0, 0.0, 0.0], &SearchFilter::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].record.resource_name, "Mitosis");
        assert!(results[0].score > 0.99);
        assert_eq!(results[1].record.resource_name, "Meiosis");
        // orthogonal vectors sit in the middle of the score range
        assert!((results[2].score - 0.5).abs() < 1e-6);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_filter_applies_before_ranking() {
        // The out-of-scope entries are the closest, but must not take top-k slots
        let store = store_with(&[
            ("Foundation 9: Society", "Close A", [1.0, 0.0, 0.0, 0.0]),
            ("Foundation 9: Society", "Close B", [1.0, 0.01, 0.0, 0.0]),
            ("Foundation 2: Cells", "Far", [0.0, 1.0, 0.0, 0.0]),
        ]);

        let allowed = vec!["Foundation 2: Cells".to_string()];
        let filter = SearchFilter {
            foundations: Some(&allowed),
        };
        let results = store.search(&[1.0, 0.0, 0.0, 0.0], &filter, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.resource_name, "Far");
        assert_eq!(results[0].record.foundation_name, "Foundation 2: Cells");
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let store = store_with(&[("Foundation 2: Cells", "Mitosis", [1.0, 0.0, 0.0, 0.0])]);
        let none: Vec<String> = Vec::new();
        let filter = SearchFilter {
            foundations: Some(&none),
        };
        assert!(store.search(&[1.0, 0.0, 0.0, 0.0], &filter, 5).unwrap().is_empty());
    }

    #[test]
    fn test_ties_break_by_entry_id() {
        let store = store_with(&[
            ("Foundation 2: Cells", "Alpha", [1.0, 0.0, 0.0, 0.0]),
            ("Foundation 2: Cells", "Beta", [1.0, 0.0, 0.0, 0.0]),
            ("Foundation 2: Cells", "Gamma", [1.0, 0.0, 0.0, 0.0]),
        ]);

        let results = store
            .search(&[1.0, 0.0, 0.0, 0.0], &SearchFilter::default(), 10)
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.entry_id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_zero_vector_entry_does_not_break_search() {
        let store = store_with(&[
            ("Foundation 2: Cells", "Blank", [0.0, 0.0, 0.0, 0.0]),
            ("Foundation 2: Cells", "Mitosis", [1.0, 0.0, 0.0, 0.0]),
            ("Foundation 2: Cells", "Osmosis", [0.0, 1.0, 0.0, 0.0]),
        ]);

        let results = store
            .search(&[1.0, 0.0, 0.0, 0.0], &SearchFilter::default(), 2)
            .unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.record.resource_name.as_str()).collect();
        assert_eq!(names, vec!["Mitosis", "Osmosis"]);
    }

    #[test]
    fn test_zero_query_vector_returns_nothing() {
        let store = store_with(&[("Foundation 2: Cells", "Mitosis", [1.0, 0.0, 0.0, 0.0])]);
        let results = store
            .search(&[0.0, 0.0, 0.0, 0.0], &SearchFilter::default(), 5)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_search_empty_store() {
        let store = store_with(&[]);
        let results = store
            .search(&[1.0, 0.0, 0.0, 0.0], &SearchFilter::default(), 5)
            .unwrap();
        assert!(results.is_empty());
    }
}
