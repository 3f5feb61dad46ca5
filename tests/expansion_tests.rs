//! Cartesian expansion of nested results

use forcesql::analysis::{expand_row, expand_rows, FieldDef, FieldDefTree, FieldNode, ResultRow, Slot};
use forcesql::{Error, Value};
use pretty_assertions::assert_eq;

fn leaf(name: &str) -> FieldNode {
    FieldNode::Field(FieldDef {
        name: name.to_string(),
        qualified_path: name.to_string(),
        alias: name.to_string(),
        remote_type: "int".to_string(),
    })
}

fn nested(name: &str, nodes: Vec<FieldNode>) -> FieldNode {
    FieldNode::Nested(FieldDefTree {
        object_name: name.to_string(),
        relationship_name: Some(name.to_string()),
        nodes,
    })
}

fn root(nodes: Vec<FieldNode>) -> FieldDefTree {
    FieldDefTree {
        object_name: "Root".to_string(),
        relationship_name: None,
        nodes,
    }
}

fn s(i: i64) -> Slot {
    Slot::Scalar(Value::Integer(i))
}

fn row(slots: Vec<Slot>) -> ResultRow {
    ResultRow::new(slots)
}

fn flat(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Integer(*v)).collect()
}

#[test]
fn test_nested_slot_between_scalars() {
    let shape = root(vec![leaf("a"), nested("Kids", vec![leaf("x"), leaf("y")]), leaf("b")]);
    let data = row(vec![
        s(11),
        Slot::Nested(vec![row(vec![s(1), s(2)]), row(vec![s(3), s(4)])]),
        s(12),
    ]);

    assert_eq!(
        expand_row(&shape, &data).unwrap(),
        vec![flat(&[11, 1, 2, 12]), flat(&[11, 3, 4, 12])]
    );
}

#[test]
fn test_independent_nested_slots_multiply() {
    let shape = root(vec![
        leaf("id"),
        nested("Contacts", vec![leaf("c")]),
        nested("Cases", vec![leaf("k")]),
    ]);
    let data = row(vec![
        s(1),
        Slot::Nested(vec![row(vec![s(10)]), row(vec![s(20)])]),
        Slot::Nested(vec![row(vec![s(7)]), row(vec![s(8)]), row(vec![s(9)])]),
    ]);

    let rows = expand_row(&shape, &data).unwrap();
    assert_eq!(rows.len(), 6);
    assert_eq!(
        rows,
        vec![
            flat(&[1, 10, 7]),
            flat(&[1, 10, 8]),
            flat(&[1, 10, 9]),
            flat(&[1, 20, 7]),
            flat(&[1, 20, 8]),
            flat(&[1, 20, 9]),
        ]
    );
}

#[test]
fn test_empty_slot_contributes_one_null_dimension() {
    let shape = root(vec![
        leaf("id"),
        nested("Contacts", vec![leaf("c1"), leaf("c2")]),
        nested("Cases", vec![leaf("k")]),
    ]);
    let data = row(vec![
        s(1),
        Slot::Nested(Vec::new()),
        Slot::Nested(vec![row(vec![s(7)]), row(vec![s(8)])]),
    ]);

    assert_eq!(
        expand_row(&shape, &data).unwrap(),
        vec![
            vec![Value::Integer(1), Value::Null, Value::Null, Value::Integer(7)],
            vec![Value::Integer(1), Value::Null, Value::Null, Value::Integer(8)],
        ]
    );
}

#[test]
fn test_grandchildren_expand_depth_first() {
    let shape = root(vec![
        leaf("a"),
        nested("Children", vec![leaf("c"), nested("Grandchildren", vec![leaf("g")])]),
    ]);
    let data = row(vec![
        s(1),
        Slot::Nested(vec![
            row(vec![s(2), Slot::Nested(vec![row(vec![s(3)]), row(vec![s(4)])])]),
            row(vec![s(5), Slot::Nested(Vec::new())]),
        ]),
    ]);

    assert_eq!(
        expand_row(&shape, &data).unwrap(),
        vec![
            flat(&[1, 2, 3]),
            flat(&[1, 2, 4]),
            vec![Value::Integer(1), Value::Integer(5), Value::Null],
        ]
    );
}

#[test]
fn test_scalar_rows_expand_one_to_one_in_order() {
    let shape = root(vec![leaf("a"), leaf("b")]);
    let rows: Vec<_> = (0..5).map(|i| row(vec![s(i), s(i * 10)])).collect();
    let expanded = expand_rows(&shape, &rows).unwrap();
    assert_eq!(expanded.len(), 5);
    assert_eq!(expanded[3], flat(&[3, 30]));
}

#[test]
fn test_multiple_top_level_rows_concatenate() {
    let shape = root(vec![leaf("a"), nested("Kids", vec![leaf("x")])]);
    let rows = vec![
        row(vec![s(1), Slot::Nested(vec![row(vec![s(10)]), row(vec![s(11)])])]),
        row(vec![s(2), Slot::Nested(Vec::new())]),
        row(vec![s(3), Slot::Nested(vec![row(vec![s(30)])])]),
    ];
    assert_eq!(
        expand_rows(&shape, &rows).unwrap(),
        vec![
            flat(&[1, 10]),
            flat(&[1, 11]),
            vec![Value::Integer(2), Value::Null],
            flat(&[3, 30]),
        ]
    );
}

#[test]
fn test_child_row_of_wrong_width_is_rejected() {
    let shape = root(vec![leaf("a"), nested("Kids", vec![leaf("x"), leaf("y")])]);
    let data = row(vec![s(1), Slot::Nested(vec![row(vec![s(2)])])]);
    assert!(matches!(
        expand_row(&shape, &data),
        Err(Error::ShapeMismatch(_))
    ));
}
