use crate::value::{canonical_string, kind_of, to_json_value, Kind};
use bson::{Bson, Document};
use itertools::{
    EitherOrBoth::{Both, Left, Right},
    Itertools,
};
use std::collections::{BTreeMap, HashSet};

/// A detected difference between a source and a target document.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    /// Rooted dotted path of the difference, with `[i]` for sequence indices.
    /// The empty (root) path renders as `$`.
    pub path: String,
    pub kind: DiffKind,
    /// Value present on the source side, if any.
    pub source: Option<Bson>,
    /// Value present on the target side, if any.
    pub target: Option<Bson>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiffKind {
    MissingInSource,
    MissingInTarget,
    TypeMismatch,
    ValueMismatch,
}

impl DiffKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffKind::MissingInSource => "missing_in_source",
            DiffKind::MissingInTarget => "missing_in_target",
            DiffKind::TypeMismatch => "type_mismatch",
            DiffKind::ValueMismatch => "value_mismatch",
        }
    }
}

impl serde::Serialize for Diff {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = s.serialize_map(Some(4))?;
        map.serialize_entry("path", &self.path)?;
        map.serialize_entry("kind", self.kind.as_str())?;
        map.serialize_entry("source", &self.source.as_ref().map(to_json_value))?;
        map.serialize_entry("target", &self.target.as_ref().map(to_json_value))?;
        map.end()
    }
}

/// Structurally diff two documents under the given policy.
///
/// `exclude_fields` entries containing a dot match the rooted dotted path of
/// a field; bare entries match a field of that name at any depth. Excluded
/// fields are pruned from both sides before diffing. Array values whose
/// rooted path is in `order_insensitive_paths` compare as multisets.
pub fn diff(
    source: &Document,
    target: &Document,
    exclude_fields: &[String],
    order_insensitive_paths: &[String],
) -> Vec<Diff> {
    let (anywhere, paths): (HashSet<&str>, HashSet<&str>) = exclude_fields
        .iter()
        .map(String::as_str)
        .partition(|f| !f.contains('.'));
    let insensitive: HashSet<&str> = order_insensitive_paths
        .iter()
        .map(String::as_str)
        .collect();

    let source = prune_document(source, &anywhere, &paths, "");
    let target = prune_document(target, &anywhere, &paths, "");

    let mut out = Vec::new();
    diff_documents(&source, &target, "", &insensitive, &mut out);
    out
}

fn prune_document(
    doc: &Document,
    anywhere: &HashSet<&str>,
    paths: &HashSet<&str>,
    path: &str,
) -> Document {
    let mut out = Document::new();
    for (key, value) in doc {
        let child = child_path(path, key);
        if anywhere.contains(key.as_str()) || paths.contains(child.as_str()) {
            continue;
        }
        out.insert(key.clone(), prune_value(value, anywhere, paths, &child));
    }
    out
}

fn prune_value(value: &Bson, anywhere: &HashSet<&str>, paths: &HashSet<&str>, path: &str) -> Bson {
    match value {
        Bson::Document(doc) => Bson::Document(prune_document(doc, anywhere, paths, path)),
        // Sequence elements keep their parent's path: exclusions never index
        // into arrays.
        Bson::Array(items) => Bson::Array(
            items
                .iter()
                .map(|item| prune_value(item, anywhere, paths, path))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn diff_values(
    a: &Bson,
    b: &Bson,
    path: &str,
    insensitive: &HashSet<&str>,
    out: &mut Vec<Diff>,
) {
    let (kind_a, kind_b) = (kind_of(a), kind_of(b));

    if kind_a == Kind::Null && kind_b == Kind::Null {
        return;
    }
    if kind_a != kind_b {
        out.push(Diff {
            path: render_path(path),
            kind: DiffKind::TypeMismatch,
            source: Some(Bson::String(kind_a.as_str().to_string())),
            target: Some(Bson::String(kind_b.as_str().to_string())),
        });
        return;
    }

    match (a, b) {
        (Bson::Document(a), Bson::Document(b)) => diff_documents(a, b, path, insensitive, out),
        (Bson::Array(a), Bson::Array(b)) => {
            if insensitive.contains(path) {
                diff_array_insensitive(a, b, path, out);
            } else {
                diff_array_sensitive(a, b, path, insensitive, out);
            }
        }
        (a, b) => {
            if !scalars_equal(a, b) {
                out.push(Diff {
                    path: render_path(path),
                    kind: DiffKind::ValueMismatch,
                    source: Some(a.clone()),
                    target: Some(b.clone()),
                });
            }
        }
    }
}

fn diff_documents(
    a: &Document,
    b: &Document,
    path: &str,
    insensitive: &HashSet<&str>,
    out: &mut Vec<Diff>,
) {
    let mut a_keys: Vec<&String> = a.keys().collect();
    let mut b_keys: Vec<&String> = b.keys().collect();
    a_keys.sort();
    b_keys.sort();

    for eob in a_keys
        .into_iter()
        .merge_join_by(b_keys, |l, r| l.cmp(r))
    {
        match eob {
            Left(key) => out.push(Diff {
                path: child_path(path, key),
                kind: DiffKind::MissingInTarget,
                source: a.get(key.as_str()).cloned(),
                target: None,
            }),
            Right(key) => out.push(Diff {
                path: child_path(path, key),
                kind: DiffKind::MissingInSource,
                source: None,
                target: b.get(key.as_str()).cloned(),
            }),
            Both(key, _) => {
                let child = child_path(path, key);
                diff_values(
                    a.get(key.as_str()).expect("key came from a"),
                    b.get(key.as_str()).expect("key came from b"),
                    &child,
                    insensitive,
                    out,
                );
            }
        }
    }
}

fn diff_array_sensitive(
    a: &[Bson],
    b: &[Bson],
    path: &str,
    insensitive: &HashSet<&str>,
    out: &mut Vec<Diff>,
) {
    if a.len() != b.len() {
        out.push(Diff {
            path: render_path(path),
            kind: DiffKind::ValueMismatch,
            source: Some(Bson::String(format!("len={}", a.len()))),
            target: Some(Bson::String(format!("len={}", b.len()))),
        });
    }
    for (index, eob) in a.iter().zip_longest(b.iter()).enumerate() {
        let item = item_path(path, index);
        match eob {
            Both(a, b) => diff_values(a, b, &item, insensitive, out),
            Left(a) => out.push(Diff {
                path: item,
                kind: DiffKind::MissingInTarget,
                source: Some(a.clone()),
                target: None,
            }),
            Right(b) => out.push(Diff {
                path: item,
                kind: DiffKind::MissingInSource,
                source: None,
                target: Some(b.clone()),
            }),
        }
    }
}

/// Compare two arrays as multisets of canonical element encodings. On
/// inequality, a single difference carries the two histograms.
fn diff_array_insensitive(a: &[Bson], b: &[Bson], path: &str, out: &mut Vec<Diff>) {
    let histogram = |items: &[Bson]| -> BTreeMap<String, i64> {
        let mut counts = BTreeMap::new();
        for item in items {
            *counts.entry(canonical_string(item)).or_default() += 1;
        }
        counts
    };

    let (ca, cb) = (histogram(a), histogram(b));
    if ca != cb {
        let as_doc = |counts: BTreeMap<String, i64>| {
            Bson::Document(counts.into_iter().map(|(k, n)| (k, Bson::Int64(n))).collect())
        };
        out.push(Diff {
            path: render_path(path),
            kind: DiffKind::ValueMismatch,
            source: Some(as_doc(ca)),
            target: Some(as_doc(cb)),
        });
    }
}

fn scalars_equal(a: &Bson, b: &Bson) -> bool {
    // Kinds already match; integers compare widened so Int32(1) == Int64(1).
    match (widen_int(a), widen_int(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

fn widen_int(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        _ => None,
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn item_path(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

fn render_path(path: &str) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bson::Bson;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        bson::to_document(&value).unwrap()
    }

    fn diff_plain(a: serde_json::Value, b: serde_json::Value) -> Vec<Diff> {
        diff(&doc(a), &doc(b), &[], &[])
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identical_documents_yield_no_diffs() {
        let d = json!({
            "id": 7,
            "name": "ada",
            "nested": {"a": [1, 2, {"b": null}], "c": 1.5},
            "empty": {},
        });
        assert!(diff_plain(d.clone(), d).is_empty());
    }

    #[test]
    fn test_exclude_bare_and_dotted() {
        let a = json!({"_id": 1, "x": {"_id": 2, "v": 1}});
        let b = json!({"_id": 9, "x": {"_id": 10, "v": 1}});

        // A bare exclusion matches the field at any depth.
        assert!(diff(&doc(a.clone()), &doc(b.clone()), &strings(&["_id"]), &[]).is_empty());

        // An unrelated dotted exclusion leaves both mismatches visible.
        let out = diff(&doc(a), &doc(b), &strings(&["meta.etag"]), &[]);
        assert_eq!(
            out,
            vec![
                Diff {
                    path: "_id".to_string(),
                    kind: DiffKind::ValueMismatch,
                    source: Some(Bson::Int64(1)),
                    target: Some(Bson::Int64(9)),
                },
                Diff {
                    path: "x._id".to_string(),
                    kind: DiffKind::ValueMismatch,
                    source: Some(Bson::Int64(2)),
                    target: Some(Bson::Int64(10)),
                },
            ]
        );
    }

    #[test]
    fn test_dotted_exclusion_is_rooted() {
        let a = json!({"meta": {"etag": "a"}, "deep": {"meta": {"etag": "x"}}});
        let b = json!({"meta": {"etag": "b"}, "deep": {"meta": {"etag": "y"}}});

        // Only the rooted `meta.etag` is pruned; the nested one still differs.
        let out = diff(&doc(a), &doc(b), &strings(&["meta.etag"]), &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "deep.meta.etag");
    }

    #[test]
    fn test_nested_path_reporting() {
        let out = diff_plain(json!({"a": {"b": 1}}), json!({"a": {"b": 2}}));
        assert_eq!(
            out,
            vec![Diff {
                path: "a.b".to_string(),
                kind: DiffKind::ValueMismatch,
                source: Some(Bson::Int64(1)),
                target: Some(Bson::Int64(2)),
            }]
        );
    }

    #[test]
    fn test_order_insensitive_arrays() {
        let a = json!({"tags": [1, 2, 2]});
        let b = json!({"tags": [2, 1, 2]});

        assert!(diff(&doc(a.clone()), &doc(b.clone()), &[], &strings(&["tags"])).is_empty());

        // Order-sensitive comparison sees the permutation.
        let out = diff(&doc(a), &doc(b), &[], &[]);
        assert!(!out.is_empty());
        assert!(out.iter().all(|d| d.path.starts_with("tags[")));
    }

    #[test]
    fn test_insensitive_multiset_mismatch_carries_histograms() {
        let out = diff(
            &doc(json!({"tags": [1, 1, 2]})),
            &doc(json!({"tags": [1, 2, 2]})),
            &[],
            &strings(&["tags"]),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, DiffKind::ValueMismatch);
        assert_eq!(
            out[0].source,
            Some(Bson::Document(bson::doc! {"1": 2_i64, "2": 1_i64}))
        );
        assert_eq!(
            out[0].target,
            Some(Bson::Document(bson::doc! {"1": 1_i64, "2": 2_i64}))
        );
    }

    #[test]
    fn test_missing_keys_both_directions() {
        let out = diff_plain(json!({"only_a": 1, "both": 2}), json!({"only_b": 3, "both": 2}));
        assert_eq!(
            out,
            vec![
                Diff {
                    path: "only_a".to_string(),
                    kind: DiffKind::MissingInTarget,
                    source: Some(Bson::Int64(1)),
                    target: None,
                },
                Diff {
                    path: "only_b".to_string(),
                    kind: DiffKind::MissingInSource,
                    source: None,
                    target: Some(Bson::Int64(3)),
                },
            ]
        );
    }

    #[test]
    fn test_null_is_a_value_not_absence() {
        let out = diff_plain(json!({"v": null}), json!({}));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, DiffKind::MissingInTarget);
        assert_eq!(out[0].source, Some(Bson::Null));

        // Null on both sides is equal.
        assert!(diff_plain(json!({"v": null}), json!({"v": null})).is_empty());
    }

    #[test]
    fn test_type_mismatch_carries_kind_names() {
        let out = diff_plain(json!({"v": 1}), json!({"v": "1"}));
        assert_eq!(
            out,
            vec![Diff {
                path: "v".to_string(),
                kind: DiffKind::TypeMismatch,
                source: Some(Bson::String("int".to_string())),
                target: Some(Bson::String("string".to_string())),
            }]
        );
    }

    #[test]
    fn test_int_widths_compare_equal() {
        let a = bson::doc! {"n": Bson::Int32(7)};
        let b = bson::doc! {"n": Bson::Int64(7)};
        assert!(diff(&a, &b, &[], &[]).is_empty());

        // Integer vs double is a type mismatch, not a value comparison.
        let c = bson::doc! {"n": 7.0};
        let out = diff(&a, &c, &[], &[]);
        assert_eq!(out[0].kind, DiffKind::TypeMismatch);
    }

    #[test]
    fn test_length_mismatch_reports_len_then_tail() {
        let out = diff_plain(json!({"xs": [1, 2, 3]}), json!({"xs": [1]}));
        assert_eq!(
            out,
            vec![
                Diff {
                    path: "xs".to_string(),
                    kind: DiffKind::ValueMismatch,
                    source: Some(Bson::String("len=3".to_string())),
                    target: Some(Bson::String("len=1".to_string())),
                },
                Diff {
                    path: "xs[1]".to_string(),
                    kind: DiffKind::MissingInTarget,
                    source: Some(Bson::Int64(2)),
                    target: None,
                },
                Diff {
                    path: "xs[2]".to_string(),
                    kind: DiffKind::MissingInTarget,
                    source: Some(Bson::Int64(3)),
                    target: None,
                },
            ]
        );
    }

    #[test]
    fn test_root_array_type_mismatch_renders_dollar() {
        let mut out = Vec::new();
        diff_values(
            &Bson::Array(vec![]),
            &Bson::Int32(1),
            "",
            &HashSet::new(),
            &mut out,
        );
        assert_eq!(out[0].path, "$");
    }

    #[test]
    fn test_serialized_shape() {
        let out = diff_plain(json!({"v": 1, "gone": "x"}), json!({"v": 2}));
        insta::assert_json_snapshot!(out, @r###"
        [
          {
            "path": "gone",
            "kind": "missing_in_target",
            "source": "x",
            "target": null
          },
          {
            "path": "v",
            "kind": "value_mismatch",
            "source": 1,
            "target": 2
          }
        ]
        "###);
    }
}
