//! Mutation record-set analysis through the public API

use std::cell::RefCell;

use chrono::NaiveDate;
use forcesql::analysis::{MutationAnalyzer, SubSelectResolver};
use forcesql::{
    parse, DeleteStatement, Error, InsertStatement, Record, Result, Statement, UpdateStatement,
    Value, Warning,
};
use pretty_assertions::assert_eq;

fn insert(text: &str) -> InsertStatement {
    match parse(text).unwrap() {
        Statement::Insert(s) => s,
        other => panic!("expected INSERT, got {:?}", other),
    }
}

fn update(text: &str) -> UpdateStatement {
    match parse(text).unwrap() {
        Statement::Update(s) => s,
        other => panic!("expected UPDATE, got {:?}", other),
    }
}

fn delete(text: &str) -> DeleteStatement {
    match parse(text).unwrap() {
        Statement::Delete(s) => s,
        other => panic!("expected DELETE, got {:?}", other),
    }
}

/// Records every sub-select and answers with fixed rows
struct Recording {
    rows: Vec<Record>,
    calls: RefCell<Vec<(String, Vec<Value>)>>,
}

impl Recording {
    fn new(rows: Vec<Record>) -> Self {
        Self {
            rows,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.borrow().clone()
    }
}

impl SubSelectResolver for Recording {
    fn resolve(&self, query: &str, params: &[Value]) -> Result<Vec<Record>> {
        self.calls
            .borrow_mut()
            .push((query.to_string(), params.to_vec()));
        Ok(self.rows.clone())
    }
}

#[test]
fn test_delete_by_id_skips_round_trip() {
    let resolver = Recording::new(Vec::new());
    let plan = MutationAnalyzer::new(Some(&resolver))
        .analyze_delete(&delete("DELETE FROM Account WHERE Id = '001xx'"), &[])
        .unwrap();

    assert_eq!(plan.object_name, "Account");
    assert_eq!(plan.ids, vec!["001xx"]);
    assert!(resolver.calls().is_empty());
}

#[test]
fn test_delete_by_id_parameter() {
    let resolver = Recording::new(Vec::new());
    let plan = MutationAnalyzer::new(Some(&resolver))
        .analyze_delete(
            &delete("DELETE FROM Account WHERE (Id = ?)"),
            &[Value::from("001p")],
        )
        .unwrap();
    assert_eq!(plan.ids, vec!["001p"]);
    assert!(resolver.calls().is_empty());
}

#[test]
fn test_delete_with_predicate_fetches_ids() {
    let resolver = Recording::new(vec![
        Record::new().with("Id", "001a"),
        Record::new().with("Id", "001b"),
    ]);
    let plan = MutationAnalyzer::new(Some(&resolver))
        .analyze_delete(
            &delete("DELETE FROM Account WHERE Industry = ? AND Rating = 'Hot'"),
            &[Value::from("Energy")],
        )
        .unwrap();

    assert_eq!(plan.ids, vec!["001a", "001b"]);
    assert_eq!(
        resolver.calls(),
        vec![(
            "SELECT Id FROM Account WHERE Industry = ? AND Rating = 'Hot'".to_string(),
            vec![Value::from("Energy")],
        )]
    );
}

#[test]
fn test_update_computes_from_fetched_fields() {
    let resolver = Recording::new(vec![Record::new().with("Id", "005a").with("Name", "Acc1")]);
    let plan = MutationAnalyzer::new(Some(&resolver))
        .analyze_update(
            &update("UPDATE Account SET Name = Name + '-' WHERE Name = 'X'"),
            &[],
        )
        .unwrap();

    assert_eq!(
        resolver.calls(),
        vec![(
            "SELECT Id, Name FROM Account WHERE Name = 'X'".to_string(),
            Vec::new(),
        )]
    );
    assert_eq!(
        plan.records,
        vec![Record::new().with("Id", "005a").with("Name", "Acc1-")]
    );
    assert!(plan.warnings.is_empty());
}

#[test]
fn test_update_constant_by_id_skips_round_trip() {
    let resolver = Recording::new(Vec::new());
    let plan = MutationAnalyzer::new(Some(&resolver))
        .analyze_update(
            &update("UPDATE Account SET Rating = 'Warm', NumberOfEmployees = ? WHERE Id = '001q'"),
            &[Value::Integer(12)],
        )
        .unwrap();

    assert!(resolver.calls().is_empty());
    assert_eq!(
        plan.records,
        vec![Record::new()
            .with("Id", "001q")
            .with("Rating", "Warm")
            .with("NumberOfEmployees", 12i64)]
    );
}

#[test]
fn test_update_failed_evaluation_skips_only_that_record() {
    let resolver = Recording::new(vec![
        Record::new().with("Id", "001a").with("Total", 10i64).with("Units", 2i64),
        Record::new().with("Id", "001b").with("Total", 10i64).with("Units", 0i64),
        Record::new().with("Id", "001c").with("Total", 9i64).with("Units", 3i64),
    ]);
    let plan = MutationAnalyzer::new(Some(&resolver))
        .analyze_update(
            &update("UPDATE Invoice SET UnitPrice = Total / Units WHERE Status = 'Draft'"),
            &[],
        )
        .unwrap();

    let ids: Vec<_> = plan.records.iter().map(|r| r.get("Id").cloned()).collect();
    assert_eq!(ids, vec![Some(Value::from("001a")), Some(Value::from("001c"))]);
    assert_eq!(plan.records[1].get("UnitPrice"), Some(&Value::Integer(3)));
    assert_eq!(plan.warnings.len(), 1);
    assert!(matches!(
        &plan.warnings[0],
        Warning::EvaluationFailed { id, .. } if id == "001b"
    ));
}

#[test]
fn test_update_date_shift_with_fixed_now() {
    let resolver = Recording::new(vec![Record::new().with("Id", "006a")]);
    let now = NaiveDate::from_ymd_opt(2024, 2, 27)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap();
    let plan = MutationAnalyzer::new(Some(&resolver))
        .with_now(now)
        .analyze_update(
            &update("UPDATE Opportunity SET CloseDate = CURRENT_DATE + 3 WHERE StageName = 'Open'"),
            &[],
        )
        .unwrap();

    assert_eq!(
        plan.records[0].get("CloseDate"),
        Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
    );
}

#[test]
fn test_insert_values_rows() {
    let plan = MutationAnalyzer::new(None)
        .analyze_insert(
            &insert("INSERT INTO Account (Name, OwnerId) VALUES ('A', '005x'), ('B', '005y')"),
            &[],
        )
        .unwrap();

    assert_eq!(plan.object_name, "Account");
    assert_eq!(
        plan.records,
        vec![
            Record::new().with("Name", "A").with("OwnerId", "005x"),
            Record::new().with("Name", "B").with("OwnerId", "005y"),
        ]
    );
}

#[test]
fn test_insert_values_with_parameters_and_expressions() {
    let plan = MutationAnalyzer::new(None)
        .analyze_insert(
            &insert("INSERT INTO Task (Subject, Priority) VALUES (? + ' call', 1 + 2)"),
            &[Value::from("Intro")],
        )
        .unwrap();
    assert_eq!(
        plan.records,
        vec![Record::new()
            .with("Subject", "Intro call")
            .with("Priority", 3i64)]
    );
}

#[test]
fn test_insert_select_maps_positionally() {
    let resolver = Recording::new(vec![
        Record::new().with("LastName", "Hopper").with("Company", "Navy"),
        Record::new().with("LastName", "Lamarr").with("Company", "MGM"),
    ]);
    let plan = MutationAnalyzer::new(Some(&resolver))
        .analyze_insert(
            &insert("INSERT INTO Contact (LastName, Department) SELECT LastName, Company FROM Lead WHERE IsConverted = ?"),
            &[Value::Boolean(false)],
        )
        .unwrap();

    assert_eq!(
        resolver.calls(),
        vec![(
            "SELECT LastName, Company FROM Lead WHERE IsConverted = ?".to_string(),
            vec![Value::Boolean(false)],
        )]
    );
    assert_eq!(
        plan.records,
        vec![
            Record::new().with("LastName", "Hopper").with("Department", "Navy"),
            Record::new().with("LastName", "Lamarr").with("Department", "MGM"),
        ]
    );
}

#[test]
fn test_insert_rejects_mismatched_row() {
    let err = MutationAnalyzer::new(None)
        .analyze_insert(&insert("INSERT INTO Account (Name, Site) VALUES ('A')"), &[])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStatement(_)));
}

#[test]
fn test_missing_parameter_is_an_error() {
    let err = MutationAnalyzer::new(None)
        .analyze_insert(&insert("INSERT INTO Account (Name) VALUES (?)"), &[])
        .unwrap_err();
    assert_eq!(err, Error::MissingParameter(1));
}

#[test]
fn test_without_resolver_nothing_is_affected() {
    let analyzer = MutationAnalyzer::new(None);

    let plan = analyzer
        .analyze_update(&update("UPDATE Account SET Rating = 'Cold' WHERE Name = 'X'"), &[])
        .unwrap();
    assert!(plan.records.is_empty());

    let plan = analyzer
        .analyze_delete(&delete("DELETE FROM Account WHERE Name = 'X'"), &[])
        .unwrap();
    assert!(plan.ids.is_empty());
}

#[test]
fn test_resolver_error_propagates() {
    let failing = |_: &str, _: &[Value]| -> Result<Vec<Record>> {
        Err(Error::Remote("INVALID_SESSION_ID".to_string()))
    };
    let err = MutationAnalyzer::new(Some(&failing))
        .analyze_delete(&delete("DELETE FROM Account WHERE Name = 'X'"), &[])
        .unwrap_err();
    assert_eq!(err, Error::Remote("INVALID_SESSION_ID".to_string()));
}

#[test]
fn test_delete_sub_select_keeps_small_doubles_parseable() {
    let resolver = Recording::new(vec![Record::new().with("Id", "006a")]);
    let plan = MutationAnalyzer::new(Some(&resolver))
        .analyze_delete(
            &delete("DELETE FROM Opportunity WHERE Probability < 0.000001 OR Amount > 1e20"),
            &[],
        )
        .unwrap();

    assert_eq!(plan.ids, vec!["006a"]);
    let calls = resolver.calls();
    assert_eq!(
        calls[0].0,
        "SELECT Id FROM Opportunity WHERE Probability < 1e-6 OR Amount > 1e20"
    );
    assert!(parse(&calls[0].0).is_ok());
}

#[test]
fn test_update_with_root_qualified_reference() {
    let resolver = Recording::new(vec![Record::new().with("Id", "001a").with("Name", "Acme")]);
    let plan = MutationAnalyzer::new(Some(&resolver))
        .analyze_update(
            &update("UPDATE Account SET Name = Account.Name + 'x' WHERE Industry = 'Energy'"),
            &[],
        )
        .unwrap();

    assert_eq!(
        resolver.calls()[0].0,
        "SELECT Id, Name FROM Account WHERE Industry = 'Energy'"
    );
    assert!(plan.warnings.is_empty());
    assert_eq!(
        plan.records,
        vec![Record::new().with("Id", "001a").with("Name", "Acmex")]
    );
}
