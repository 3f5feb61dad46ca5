use forcesql::{
    parse, tokenize, BinaryOp, Expression, InsertSource, ParseError, SelectItem, Statement,
    TokenKind, Value,
};

/// Helper to check if parsing succeeds
fn parses_ok(source: &str) -> bool {
    parse(source).is_ok()
}

/// Parse, render, parse again; both trees must match
fn assert_round_trip(source: &str) {
    let first = parse(source).unwrap_or_else(|e| panic!("{}: {}", source, e));
    let rendered = first.to_string();
    let second = parse(&rendered).unwrap_or_else(|e| panic!("{}: {}", rendered, e));
    assert_eq!(first, second, "rendered as {}", rendered);
}

// ==================== Lexer Tests ====================

#[test]
fn test_lexer_ends_with_eof() {
    let tokens = tokenize("SELECT Id FROM Account");
    assert_eq!(tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
}

#[test]
fn test_lexer_escaped_quote_in_string() {
    let tokens = tokenize(r"'O\'Brien'");
    assert_eq!(tokens[0].kind, TokenKind::StringLiteral("O'Brien".to_string()));
}

// ==================== SELECT Tests ====================

#[test]
fn test_select_variants() {
    assert!(parses_ok("SELECT Id FROM Account"));
    assert!(parses_ok("select id from account"));
    assert!(parses_ok("SELECT * FROM Account WHERE Name = 'x'"));
    assert!(parses_ok("SELECT Id, Owner.Manager.Name FROM Account a WHERE a.Name != NULL"));
    assert!(parses_ok("SELECT Id FROM Account WHERE Name LIKE 'Ac%' ORDER BY Name ASC NULLS FIRST"));
    assert!(parses_ok("SELECT Industry, COUNT(Id) n FROM Account GROUP BY Industry HAVING COUNT(Id) > 2"));
    assert!(parses_ok("SELECT Id FROM Account LIMIT 10 OFFSET 20"));
    assert!(parses_ok("SELECT Id FROM Account WHERE Id IN (SELECT AccountId FROM Contact)"));
    assert!(parses_ok("SELECT Id FROM Account WHERE Industry IS NOT NULL"));
    assert!(parses_ok("SELECT Id FROM Account -- trailing comment"));
}

#[test]
fn test_select_errors() {
    assert!(!parses_ok("SELECT FROM Account"));
    assert!(!parses_ok("SELECT Id"));
    assert!(!parses_ok("SELECT Id FROM"));
    assert!(!parses_ok("SELECT Id, FROM Account"));
    assert!(!parses_ok("SELECT Id FROM Account WHERE"));
    assert!(!parses_ok(""));
}

#[test]
fn test_error_reports_position() {
    match parse("SELECT Id FROM Account WHERE = 1").unwrap_err() {
        ParseError::UnexpectedToken { span, .. } => assert_eq!(span.start, 29),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_nested_subqueries() {
    let statement = parse(
        "SELECT Name, (SELECT LastName, (SELECT Subject FROM Cases) FROM Contacts) FROM Account",
    )
    .unwrap();
    let Statement::Select(select) = statement else {
        panic!("expected SELECT");
    };
    let SelectItem::SubQuery(contacts) = &select.items[1] else {
        panic!("expected subquery");
    };
    assert!(matches!(contacts.items[1], SelectItem::SubQuery(_)));
}

#[test]
fn test_arithmetic_precedence() {
    let Statement::Select(select) = parse("SELECT Id FROM T WHERE A + B * 2 > 10").unwrap() else {
        panic!("expected SELECT");
    };
    let Some(Expression::Binary { left, op, .. }) = select.where_clause else {
        panic!("expected comparison");
    };
    assert_eq!(op, BinaryOp::Gt);
    assert!(matches!(
        *left,
        Expression::Binary { op: BinaryOp::Plus, ref right, .. }
            if matches!(**right, Expression::Binary { op: BinaryOp::Multiply, .. })
    ));
}

// ==================== Mutation Tests ====================

#[test]
fn test_insert_values() {
    let Statement::Insert(insert) =
        parse("INSERT INTO Account (Name, NumberOfEmployees) VALUES ('A', 1), ('B', -2)").unwrap()
    else {
        panic!("expected INSERT");
    };
    assert_eq!(insert.table, "Account");
    assert_eq!(insert.columns, vec!["Name", "NumberOfEmployees"]);
    let InsertSource::Values(rows) = insert.source else {
        panic!("expected VALUES");
    };
    assert_eq!(rows.len(), 2);
}

#[test]
fn test_insert_select() {
    let Statement::Insert(insert) =
        parse("INSERT INTO Contact (LastName) SELECT Name FROM Lead WHERE IsConverted = FALSE")
            .unwrap()
    else {
        panic!("expected INSERT");
    };
    assert!(matches!(insert.source, InsertSource::Select(_)));
}

#[test]
fn test_update_and_delete() {
    assert!(parses_ok("UPDATE Account SET Name = 'x', Rating = NULL WHERE Id = '001'"));
    assert!(parses_ok("UPDATE Account SET NumberOfEmployees = NumberOfEmployees + 1"));
    assert!(parses_ok("DELETE FROM Account WHERE Id = ?"));
    assert!(parses_ok("DELETE FROM Account"));
    assert!(!parses_ok("UPDATE Account WHERE Id = '1'"));
    assert!(!parses_ok("DELETE Account WHERE Id = '1'"));
}

// ==================== Search Tests ====================

#[test]
fn test_search_forms() {
    assert!(parses_ok("FIND {Acme}"));
    assert!(parses_ok("FIND 'Acme*' IN ALL FIELDS"));
    assert!(parses_ok("FIND {Acme} RETURNING Account, Contact(Id, Email ORDER BY Email LIMIT 3)"));
    assert!(parses_ok("FIND {Acme} RETURNING Account(Id) LIMIT 20"));
    assert!(!parses_ok("FIND {Acme} IN EVERY FIELDS"));
    assert!(!parses_ok("FIND Acme"));
}

// ==================== Parameters and Rendering ====================

#[test]
fn test_bind_parameters_renders_literals() {
    let statement = parse("SELECT Id FROM Contact WHERE LastName = ? AND Age > ? AND Active = ?").unwrap();
    let bound = statement
        .bind_parameters(&[Value::from("O'Brien"), Value::Integer(30), Value::Boolean(true)])
        .unwrap();
    let rendered = bound.to_string();
    assert!(rendered.ends_with("Age > 30 AND Active = TRUE"), "{}", rendered);
    assert_eq!(parse(&rendered).unwrap(), bound);
}

#[test]
fn test_bind_parameters_missing_value() {
    let statement = parse("DELETE FROM Contact WHERE Id = ? OR Id = ?").unwrap();
    assert!(statement.bind_parameters(&[Value::from("003")]).is_err());
}

#[test]
fn test_round_trips() {
    assert_round_trip("SELECT Name n, (SELECT LastName FROM Contacts ORDER BY LastName DESC) FROM Account a");
    assert_round_trip("SELECT Id FROM Account WHERE NOT (A = 1 OR B = 2) AND C IN (1, 2.5, 'x')");
    assert_round_trip("SELECT Id FROM Account WHERE CreatedDate > TIMESTAMP '2024-01-02T03:04:05'");
    assert_round_trip("INSERT INTO Account (Name, Site) VALUES ('a', ?), ('b', ?)");
    assert_round_trip("UPDATE Account SET Name = Name || '!' WHERE Id = '1'");
    assert_round_trip("DELETE FROM Account WHERE Name LIKE 'x%'");
    assert_round_trip("FIND {Acme} IN NAME FIELDS RETURNING Account(Id WHERE Rating = 'Hot')");
}

#[test]
fn test_round_trip_exponent_doubles() {
    assert_round_trip("SELECT Id FROM Opportunity WHERE Probability < 0.000001");
    assert_round_trip("SELECT Id FROM Opportunity WHERE Amount > 1e20 OR Amount < 1.5e-9");
    let Statement::Select(select) =
        parse("SELECT Id FROM Opportunity WHERE Probability < 0.000001").unwrap()
    else {
        panic!("expected SELECT");
    };
    let rendered = select.to_string();
    assert!(rendered.ends_with("Probability < 1e-6"), "{}", rendered);
}

#[test]
fn test_non_finite_parameter_renders_as_division() {
    let statement = parse("SELECT Id FROM Opportunity WHERE Amount < ? AND Score != ?").unwrap();
    let bound = statement
        .bind_parameters(&[Value::Double(f64::INFINITY), Value::Double(f64::NAN)])
        .unwrap();
    let rendered = bound.to_string();
    assert!(
        rendered.ends_with("Amount < (1.0 / 0.0) AND Score != (0.0 / 0.0)"),
        "{}",
        rendered
    );
    assert!(parses_ok(&rendered));
}
