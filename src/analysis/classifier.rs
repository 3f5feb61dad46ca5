//! Statement classification and wildcard expansion

use tracing::debug;

use crate::ast::{Expression, SelectItem, Statement};
use crate::error::{Error, Result};
use crate::parser::{parse, ParseError};
use crate::schema::SchemaProvider;
use crate::value::Value;

/// Kind of a statement, derived once from its parsed form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Search,
    Undefined,
}

impl StatementKind {
    pub fn of(statement: &Statement) -> Self {
        match statement {
            Statement::Select(_) => StatementKind::Select,
            Statement::Insert(_) => StatementKind::Insert,
            Statement::Update(_) => StatementKind::Update,
            Statement::Delete(_) => StatementKind::Delete,
            Statement::Search(_) => StatementKind::Search,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Search => "SEARCH",
            StatementKind::Undefined => "UNDEFINED",
        };
        f.write_str(name)
    }
}

/// Classify text without raising; unparseable text is `Undefined`
pub fn probe(text: &str) -> StatementKind {
    parse(text)
        .map(|statement| StatementKind::of(&statement))
        .unwrap_or(StatementKind::Undefined)
}

/// Parse text only if it is a statement of `kind`
pub fn parse_as(text: &str, kind: StatementKind) -> Option<Statement> {
    parse(text)
        .ok()
        .filter(|statement| StatementKind::of(statement) == kind)
}

/// A statement after classification and wildcard expansion
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedStatement {
    pub kind: StatementKind,
    statement: Option<Statement>,
    parse_error: Option<ParseError>,
    /// Statement text, regenerated when the select list was rewritten
    pub text: String,
    /// Root object the statement reads or writes
    pub object_name: Option<String>,
    pub wildcard_expanded: bool,
}

impl ClassifiedStatement {
    /// The parsed statement; fails with the parse error for `Undefined`
    pub fn statement(&self) -> Result<&Statement> {
        match (&self.statement, &self.parse_error) {
            (Some(statement), _) => Ok(statement),
            (None, Some(e)) => Err(Error::Parse(e.clone())),
            (None, None) => Err(Error::InvalidStatement(self.text.clone())),
        }
    }

    pub fn into_statement(self) -> Result<Statement> {
        match (self.statement, self.parse_error) {
            (Some(statement), _) => Ok(statement),
            (None, Some(e)) => Err(Error::Parse(e)),
            (None, None) => Err(Error::InvalidStatement(self.text)),
        }
    }
}

/// Parse and classify `text`, expanding a top-level `SELECT *` against the
/// schema. Only schema lookups can fail; bad syntax yields `Undefined`.
pub fn classify(text: &str, schema: &dyn SchemaProvider) -> Result<ClassifiedStatement> {
    let mut statement = match parse(text) {
        Ok(statement) => statement,
        Err(e) => {
            debug!(error = %e, "statement did not parse, classified as undefined");
            return Ok(ClassifiedStatement {
                kind: StatementKind::Undefined,
                statement: None,
                parse_error: Some(e),
                text: text.trim().to_string(),
                object_name: None,
                wildcard_expanded: false,
            });
        }
    };

    let kind = StatementKind::of(&statement);
    let mut wildcard_expanded = false;
    if let Statement::Select(select) = &mut statement {
        if select.is_wildcard() {
            let describe = schema.describe(&select.from.name)?;
            select.items = describe
                .fields()
                .map(|f| SelectItem::Expr {
                    expr: Expression::Column(f.name.clone()),
                    alias: None,
                })
                .collect();
            wildcard_expanded = true;
            debug!(
                object = %describe.name,
                columns = select.items.len(),
                "expanded wildcard select list"
            );
        }
    }

    let text = if wildcard_expanded {
        statement.to_string()
    } else {
        text.trim().to_string()
    };
    let object_name = from_object_name(&statement).map(str::to_string);
    debug!(kind = %kind, object = ?object_name, "classified statement");

    Ok(ClassifiedStatement {
        kind,
        statement: Some(statement),
        parse_error: None,
        text,
        object_name,
        wildcard_expanded,
    })
}

/// Root object a statement targets
pub fn from_object_name(statement: &Statement) -> Option<&str> {
    match statement {
        Statement::Select(select) => Some(&select.from.name),
        Statement::Insert(insert) => Some(&insert.table),
        Statement::Update(update) => Some(&update.table),
        Statement::Delete(delete) => Some(&delete.table),
        Statement::Search(search) => search.returning.first().map(|r| r.object.as_str()),
    }
}

/// Return the record ID when the predicate is exactly `Id = <literal>`,
/// `<literal> = Id`, or either form with a positional parameter
pub fn check_direct_id_where(where_clause: Option<&Expression>, params: &[Value]) -> Option<String> {
    let Expression::Binary { left, op, right } = unwrap_nested(where_clause?) else {
        return None;
    };
    if *op != crate::ast::BinaryOp::Eq {
        return None;
    }
    let (left, right) = (unwrap_nested(left), unwrap_nested(right));
    let id_value = match (left, right) {
        (Expression::Column(name), value) if name.eq_ignore_ascii_case("Id") => value,
        (value, Expression::Column(name)) if name.eq_ignore_ascii_case("Id") => value,
        _ => return None,
    };
    match id_value {
        Expression::String(id) => Some(id.clone()),
        Expression::Parameter(n) => match params.get(n.wrapping_sub(1)) {
            Some(Value::String(id)) => Some(id.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn unwrap_nested(expr: &Expression) -> &Expression {
    match expr {
        Expression::Nested(inner) => unwrap_nested(inner),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescribe, FieldType, ObjectDescribe, SchemaBuilder};

    fn where_of(text: &str) -> Option<Expression> {
        match parse(text).unwrap() {
            Statement::Delete(d) => d.where_clause,
            Statement::Update(u) => u.where_clause,
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_probe() {
        assert_eq!(probe("SELECT Id FROM Account"), StatementKind::Select);
        assert_eq!(probe("insert into Account (Name) values ('x')"), StatementKind::Insert);
        assert_eq!(probe("UPDATE Account SET Name = 'x'"), StatementKind::Update);
        assert_eq!(probe("DELETE FROM Account"), StatementKind::Delete);
        assert_eq!(probe("FIND {Acme} RETURNING Account"), StatementKind::Search);
        assert_eq!(probe("SELEKT nonsense"), StatementKind::Undefined);
        assert_eq!(probe(""), StatementKind::Undefined);
    }

    #[test]
    fn test_parse_as_other_kind_is_not_a_match() {
        assert!(parse_as("DELETE FROM Account", StatementKind::Delete).is_some());
        assert!(parse_as("DELETE FROM Account", StatementKind::Update).is_none());
        assert!(parse_as("DELETE FROM", StatementKind::Delete).is_none());
    }

    #[test]
    fn test_direct_id_literal_both_sides() {
        let params = [];
        assert_eq!(
            check_direct_id_where(where_of("DELETE FROM Account WHERE Id = '001xx'").as_ref(), &params),
            Some("001xx".to_string())
        );
        assert_eq!(
            check_direct_id_where(where_of("DELETE FROM Account WHERE '001xx' = ID").as_ref(), &params),
            Some("001xx".to_string())
        );
        assert_eq!(
            check_direct_id_where(where_of("DELETE FROM Account WHERE (id = '001xx')").as_ref(), &params),
            Some("001xx".to_string())
        );
    }

    #[test]
    fn test_direct_id_parameter() {
        let params = [Value::from("x"), Value::from("001yy")];
        let clause = where_of("UPDATE Account SET Name = ? WHERE Id = ?");
        assert_eq!(
            check_direct_id_where(clause.as_ref(), &params),
            Some("001yy".to_string())
        );
        assert_eq!(check_direct_id_where(clause.as_ref(), &params[..1]), None);
    }

    #[test]
    fn test_direct_id_other_shapes() {
        let params = [];
        for text in [
            "DELETE FROM Account",
            "DELETE FROM Account WHERE Name = 'x'",
            "DELETE FROM Account WHERE Id != '001'",
            "DELETE FROM Account WHERE Id = '001' AND Name = 'x'",
            "DELETE FROM Account WHERE Id IN ('001')",
            "DELETE FROM Account WHERE Account.Id = '001'",
        ] {
            assert_eq!(check_direct_id_where(where_of(text).as_ref(), &params), None, "{}", text);
        }
    }

    #[test]
    fn test_classify_expands_wildcard_in_schema_order() {
        let schema = SchemaBuilder::new()
            .with_object(
                ObjectDescribe::new("Lead")
                    .with_field(FieldDescribe::new("Id", FieldType::Id))
                    .with_field(FieldDescribe::new("Company", FieldType::String))
                    .with_field(FieldDescribe::new("Email", FieldType::Email)),
            )
            .build();

        let classified = classify("SELECT * FROM lead WHERE Company = ?", &schema).unwrap();
        assert_eq!(classified.kind, StatementKind::Select);
        assert!(classified.wildcard_expanded);
        assert_eq!(classified.text, "SELECT Id, Company, Email FROM lead WHERE Company = ?");
        assert_eq!(classified.object_name.as_deref(), Some("lead"));
    }

    #[test]
    fn test_classify_undefined_keeps_parse_error() {
        let schema = SchemaBuilder::new().build();
        let classified = classify("SELECT FROM", &schema).unwrap();
        assert_eq!(classified.kind, StatementKind::Undefined);
        assert!(matches!(classified.statement(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_classify_unknown_object_on_wildcard() {
        let schema = SchemaBuilder::new().build();
        assert_eq!(
            classify("SELECT * FROM Ghost", &schema).unwrap_err(),
            Error::UnknownObject("Ghost".to_string())
        );
    }
}
