use forcesql::{
    ChildRelationship, DriverConfig, Execution, FieldDescribe, FieldType, MutationService,
    ObjectDescribe, QueryService, Record, Result, SaveResult, SchemaBuilder, StatementService,
    Value,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Canned remote responses standing in for a live session
struct DemoRemote;

impl QueryService for DemoRemote {
    fn query(&self, text: &str) -> Result<Vec<serde_json::Value>> {
        if text.starts_with("SELECT Id FROM Account") {
            return Ok(vec![json!({"Id": "001A"}), json!({"Id": "001B"})]);
        }
        Ok(vec![
            json!({
                "attributes": {"type": "Account"},
                "Id": "001A",
                "Name": "Acme",
                "Owner": {"Name": "Ada Lovelace"},
                "Contacts": {"totalSize": 2, "done": true, "records": [
                    {"LastName": "Hopper", "Email": "grace@acme.test"},
                    {"LastName": "Turing", "Email": null}
                ]}
            }),
            json!({
                "attributes": {"type": "Account"},
                "Id": "001B",
                "Name": "Globex",
                "Owner": null,
                "Contacts": null
            }),
        ])
    }

    fn search(&self, _text: &str) -> Result<Vec<serde_json::Value>> {
        Ok(vec![json!({"attributes": {"type": "Account"}, "Id": "001A", "Name": "Acme"})])
    }
}

impl MutationService for DemoRemote {
    fn create(&self, _object: &str, records: &[Record]) -> Result<Vec<SaveResult>> {
        Ok(records
            .iter()
            .enumerate()
            .map(|(i, _)| SaveResult::ok(format!("001N{}", i)))
            .collect())
    }

    fn update(&self, _object: &str, records: &[Record]) -> Result<Vec<SaveResult>> {
        Ok(records
            .iter()
            .map(|r| match r.get("Id") {
                Some(Value::String(id)) if id == "001B" => {
                    SaveResult::failed(Some(id.clone()), vec!["ENTITY_IS_LOCKED".to_string()])
                }
                Some(id) => SaveResult::ok(id.to_string()),
                None => SaveResult::failed(None, vec!["MISSING_ID".to_string()]),
            })
            .collect())
    }

    fn delete(&self, ids: &[String]) -> Result<Vec<SaveResult>> {
        Ok(ids.iter().map(SaveResult::ok).collect())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forcesql=info")),
        )
        .init();

    let mut account = ObjectDescribe::new("Account")
        .with_child_relationship(ChildRelationship::new("Contacts", "Contact", "AccountId"));
    SchemaBuilder::add_standard_fields(&mut account);
    let schema = SchemaBuilder::new()
        .with_object(account)
        .with_object(
            ObjectDescribe::new("Contact")
                .with_field(FieldDescribe::new("Id", FieldType::Id))
                .with_field(FieldDescribe::new("LastName", FieldType::String))
                .with_field(FieldDescribe::new("Email", FieldType::Email))
                .with_field(
                    FieldDescribe::new("AccountId", FieldType::Reference)
                        .with_reference("Account")
                        .with_relationship_name("Account"),
                ),
        )
        .with_standard_object("User")
        .build();

    let remote = DemoRemote;
    let service = StatementService::new(&schema, &remote, &remote, DriverConfig::default());

    println!("=== Statement Demo ===\n");

    let statements: &[(&str, Vec<Value>)] = &[
        (
            "SELECT Name, Owner.Name, (SELECT LastName, Email FROM Contacts) FROM Account WHERE Name LIKE ?",
            vec![Value::from("A%")],
        ),
        ("FIND {Acme} RETURNING Account(Id, Name)", vec![]),
        (
            "INSERT INTO Account (Name, OwnerId) VALUES ('A', '005x'), ('B', '005y')",
            vec![],
        ),
        ("UPDATE Account SET Name = 'Renamed' WHERE CreatedDate < CURRENT_DATE", vec![]),
        ("DELETE FROM Account WHERE Id = ?", vec![Value::from("001A")]),
    ];

    for (text, params) in statements {
        println!("--- {} ---", text);
        match service.execute(text, params) {
            Ok(Execution::Rows(rows)) => {
                let labels: Vec<_> = rows.columns.iter().map(|c| c.label.as_str()).collect();
                println!("  columns: {}", labels.join(" | "));
                for row in &rows.rows {
                    let values: Vec<_> = row.iter().map(|v| v.to_string()).collect();
                    println!("  {}", values.join(" | "));
                }
            }
            Ok(Execution::Count(count)) => {
                println!("  affected: {}", count.affected);
                for warning in &count.warnings {
                    println!("  warning: {}", warning);
                }
            }
            Err(e) => eprintln!("  error: {}", e),
        }
        println!();
    }
}
