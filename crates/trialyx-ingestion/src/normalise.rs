//! Registry row normalisation and union-schema alignment.
//!
//! The three SDQ collections share most of their schema but disagree on
//! identifier and date field names. Normalisation projects each raw row
//! onto the canonical shape; the union variant additionally retains every
//! native field so nothing is silently dropped when merging collections.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::models::SdqCollection;

/// Rows out of the SDQ wire shape `{SDQOutputSet: [{rows: [...]}]}`.
/// Anything non-conforming yields an empty list rather than an error.
pub fn extract_sdq_rows(payload: &Value) -> Vec<Map<String, Value>> {
    payload
        .get("SDQOutputSet")
        .and_then(|v| v.as_array())
        .and_then(|sets| sets.first())
        .and_then(|first| first.get("rows"))
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r.as_object().cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// First present, non-null, non-empty value among `keys`.
fn first_present(row: &Map<String, Value>, keys: &[&str]) -> Value {
    for key in keys {
        match row.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.is_empty() => continue,
            Some(v) => return v.clone(),
        }
    }
    Value::Null
}

/// Project a raw SDQ search-result row onto the canonical trial row shape.
///
/// Field aliasing: the EU register keys trials on `eudractnumber` (falling
/// back to `ctid`); every other collection prefers `ctid`. Dates prefer
/// `date` over `updatedate`, links prefer `id_url` over `link`.
pub fn normalise_sdq_trial_row(
    row: &Map<String, Value>,
    collection: &SdqCollection,
) -> Map<String, Value> {
    let trial_id = match collection {
        SdqCollection::EuRegister => first_present(row, &["eudractnumber", "ctid"]),
        _ => first_present(row, &["ctid", "eudractnumber"]),
    };
    let date = first_present(row, &["date", "updatedate"]);
    let id_url = first_present(row, &["id_url", "link"]);

    let mut out = Map::new();
    out.insert("collection".into(), Value::String(collection.label().to_string()));
    out.insert("collection_code".into(), Value::String(collection.code().to_string()));
    out.insert("id".into(), trial_id);
    out.insert("title".into(), row.get("title").cloned().unwrap_or(Value::Null));
    out.insert("phase".into(), row.get("phase").cloned().unwrap_or(Value::Null));
    out.insert("status".into(), row.get("status").cloned().unwrap_or(Value::Null));
    out.insert("date".into(), date);
    out.insert("id_url".into(), id_url);
    out.insert("cids".into(), row.get("cids").cloned().unwrap_or(Value::Null));
    out
}

/// Canonical projection plus every native field not already projected.
pub fn normalise_sdq_trial_row_union(
    row: &Map<String, Value>,
    collection: &SdqCollection,
) -> Map<String, Value> {
    let mut out = normalise_sdq_trial_row(row, collection);
    for (k, v) in row {
        if !out.contains_key(k) {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Union of all keys across `rows`, ordered with `preferred` keys first
/// (only those that actually occur) and the remainder lexicographic.
/// Stable: the same input set always yields the same header.
pub fn build_union_header(rows: &[Map<String, Value>], preferred: &[&str]) -> Vec<String> {
    let mut keys: BTreeSet<&str> = BTreeSet::new();
    for row in rows {
        keys.extend(row.keys().map(|k| k.as_str()));
    }
    let mut header: Vec<String> = preferred
        .iter()
        .filter(|k| keys.contains(**k))
        .map(|k| k.to_string())
        .collect();
    header.extend(
        keys.iter()
            .filter(|k| !preferred.contains(*k))
            .map(|k| k.to_string()),
    );
    header
}

/// Project every row onto the full union key list, filling absent keys
/// with JSON null. Re-aligning an already-aligned set is the identity.
pub fn align_rows_to_union_schema(
    rows: &[Map<String, Value>],
    preferred: &[&str],
) -> (Vec<Map<String, Value>>, Vec<String>) {
    if rows.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let header = build_union_header(rows, preferred);
    let aligned = rows
        .iter()
        .map(|row| {
            header
                .iter()
                .map(|k| (k.clone(), row.get(k).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    (aligned, header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_normalise_ctgov_row() {
        let row = as_map(json!({
            "ctid": "NCT01561508",
            "updatedate": "2012-12-24",
            "link": "https://clinicaltrials.gov/study/NCT01561508",
        }));
        let out = normalise_sdq_trial_row(&row, &SdqCollection::ClinicalTrials);
        assert_eq!(out["id"], "NCT01561508");
        assert_eq!(out["date"], "2012-12-24");
        assert_eq!(out["id_url"], "https://clinicaltrials.gov/study/NCT01561508");
        assert_eq!(out["collection"], "ClinicalTrials.gov");
        assert_eq!(out["collection_code"], "clinicaltrials");
    }

    #[test]
    fn test_normalise_eu_row_prefers_eudract_number() {
        let row = as_map(json!({
            "eudractnumber": "2011-000801-30",
            "ctid": "NCT01561508",
            "date": "2012-05-10",
        }));
        let out = normalise_sdq_trial_row(&row, &SdqCollection::EuRegister);
        assert_eq!(out["id"], "2011-000801-30");
        assert_eq!(out["collection"], "EU Clinical Trials Register");
    }

    #[test]
    fn test_normalise_prefers_date_over_updatedate() {
        let row = as_map(json!({"ctid": "NCT00000001", "date": "2020-01-01", "updatedate": "2021-01-01"}));
        let out = normalise_sdq_trial_row(&row, &SdqCollection::ClinicalTrials);
        assert_eq!(out["date"], "2020-01-01");
    }

    #[test]
    fn test_union_variant_keeps_native_fields() {
        let row = as_map(json!({"ctid": "NCT00000001", "sponsor": "Acme", "title": "T"}));
        let out = normalise_sdq_trial_row_union(&row, &SdqCollection::ClinicalTrials);
        assert_eq!(out["sponsor"], "Acme");
        // Projected fields are not duplicated under native names
        assert!(out.contains_key("ctid"));
        assert_eq!(out["id"], "NCT00000001");
    }

    #[test]
    fn test_extract_sdq_rows_tolerates_bad_shapes() {
        assert!(extract_sdq_rows(&json!({})).is_empty());
        assert!(extract_sdq_rows(&json!({"SDQOutputSet": "nope"})).is_empty());
        assert!(extract_sdq_rows(&json!({"SDQOutputSet": [{"rows": [1, 2]}]})).is_empty());
        let ok = json!({"SDQOutputSet": [{"rows": [{"ctid": "NCT00000001"}]}]});
        assert_eq!(extract_sdq_rows(&ok).len(), 1);
    }

    #[test]
    fn test_union_header_preferred_first_then_lexicographic() {
        let rows = vec![
            as_map(json!({"cid": 1, "zeta": true})),
            as_map(json!({"id": "a", "alpha": false})),
        ];
        let header = build_union_header(&rows, &["cid", "id", "missing"]);
        assert_eq!(header, vec!["cid", "id", "alpha", "zeta"]);
    }

    #[test]
    fn test_alignment_is_a_fixed_point() {
        let rows = vec![
            as_map(json!({"cid": 1, "title": "A"})),
            as_map(json!({"cid": 2, "status": "Recruiting"})),
        ];
        let (aligned, header) = align_rows_to_union_schema(&rows, &["cid"]);
        assert_eq!(aligned[0]["status"], Value::Null);

        let (again, header2) = align_rows_to_union_schema(&aligned, &["cid"]);
        assert_eq!(aligned, again);
        assert_eq!(header, header2);
    }

    #[test]
    fn test_alignment_of_empty_input() {
        let (rows, header) = align_rows_to_union_schema(&[], &["cid"]);
        assert!(rows.is_empty());
        assert!(header.is_empty());
    }
}
