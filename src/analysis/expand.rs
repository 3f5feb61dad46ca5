//! Cartesian expansion of nested results into flat rows
//!
//! A remote record carries to-many relationships as nested lists. Each
//! nested slot adds one multiplicative dimension: the parent row is repeated
//! for every combination of child rows, and an empty child list contributes
//! a single all-null placeholder instead of eliminating the parent.

use crate::analysis::fields::{FieldDefTree, FieldNode};
use crate::error::{Error, Result};
use crate::value::Value;

/// One position of a result row, mirroring a [`FieldNode`]
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Scalar(Value),
    Nested(Vec<ResultRow>),
}

/// A result row shaped like a [`FieldDefTree`]
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub slots: Vec<Slot>,
}

impl ResultRow {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    /// Map a remote JSON record onto the tree's shape. Parent relationship
    /// paths are nested objects; child relationships are `{"records": [...]}`,
    /// a bare array, or null.
    pub fn from_json(tree: &FieldDefTree, record: &serde_json::Value) -> Result<ResultRow> {
        let mut slots = Vec::with_capacity(tree.nodes.len());
        for node in &tree.nodes {
            match node {
                FieldNode::Field(def) => {
                    let json = lookup_path(record, &def.qualified_path);
                    slots.push(Slot::Scalar(
                        json.map(|j| Value::from_json(j, &def.remote_type))
                            .unwrap_or(Value::Null),
                    ));
                }
                FieldNode::Nested(subtree) => {
                    let key = subtree
                        .relationship_name
                        .as_deref()
                        .unwrap_or(&subtree.object_name);
                    let children = match lookup_key(record, key) {
                        None | Some(serde_json::Value::Null) => Vec::new(),
                        Some(serde_json::Value::Array(items)) => items.iter().collect(),
                        Some(object @ serde_json::Value::Object(_)) => {
                            match lookup_key(object, "records") {
                                Some(serde_json::Value::Array(items)) => items.iter().collect(),
                                _ => {
                                    return Err(Error::ShapeMismatch(format!(
                                        "relationship '{}' has no records list",
                                        key
                                    )))
                                }
                            }
                        }
                        Some(other) => {
                            return Err(Error::ShapeMismatch(format!(
                                "relationship '{}' is not a list: {}",
                                key, other
                            )))
                        }
                    };
                    let rows = children
                        .into_iter()
                        .map(|child| ResultRow::from_json(subtree, child))
                        .collect::<Result<Vec<_>>>()?;
                    slots.push(Slot::Nested(rows));
                }
            }
        }
        Ok(ResultRow { slots })
    }
}

/// Look up `key`, falling back to a case-insensitive match
fn lookup_key<'j>(json: &'j serde_json::Value, key: &str) -> Option<&'j serde_json::Value> {
    let object = json.as_object()?;
    object.get(key).or_else(|| {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Follow a dotted path through nested objects; a null parent yields `None`
fn lookup_path<'j>(json: &'j serde_json::Value, path: &str) -> Option<&'j serde_json::Value> {
    path.split('.')
        .try_fold(json, |current, segment| lookup_key(current, segment))
}

/// Expand one row into its flat rows
pub fn expand_row(tree: &FieldDefTree, row: &ResultRow) -> Result<Vec<Vec<Value>>> {
    if row.slots.len() != tree.nodes.len() {
        return Err(Error::ShapeMismatch(format!(
            "row has {} slots, {} has {} fields",
            row.slots.len(),
            tree.object_name,
            tree.nodes.len()
        )));
    }

    let mut partials: Vec<Vec<Value>> = vec![Vec::with_capacity(tree.width())];
    for (node, slot) in tree.nodes.iter().zip(&row.slots) {
        match (node, slot) {
            (FieldNode::Field(_), Slot::Scalar(value)) => {
                for partial in &mut partials {
                    partial.push(value.clone());
                }
            }
            (FieldNode::Nested(subtree), Slot::Nested(children)) => {
                let expansions = if children.is_empty() {
                    vec![vec![Value::Null; subtree.width()]]
                } else {
                    expand_rows(subtree, children)?
                };
                partials = partials
                    .iter()
                    .flat_map(|partial| {
                        expansions.iter().map(move |expansion| {
                            let mut combined = partial.clone();
                            combined.extend(expansion.iter().cloned());
                            combined
                        })
                    })
                    .collect();
            }
            (FieldNode::Field(def), Slot::Nested(_)) => {
                return Err(Error::ShapeMismatch(format!(
                    "field '{}' received a nested list",
                    def.alias
                )))
            }
            (FieldNode::Nested(subtree), Slot::Scalar(_)) => {
                return Err(Error::ShapeMismatch(format!(
                    "relationship '{}' received a scalar",
                    subtree
                        .relationship_name
                        .as_deref()
                        .unwrap_or(&subtree.object_name)
                )))
            }
        }
    }
    Ok(partials)
}

/// Expand rows independently and concatenate, preserving order
pub fn expand_rows(tree: &FieldDefTree, rows: &[ResultRow]) -> Result<Vec<Vec<Value>>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.extend(expand_row(tree, row)?);
    }
    Ok(out)
}
