//! Statement AST
//!
//! Every node renders back to statement text through `Display`. The rendered
//! form re-parses to an equal tree, which is what wildcard rewriting,
//! generated sub-selects and cache keys rely on.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};
use crate::value::Value;

/// A parsed statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Search(SearchStatement),
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub items: Vec<SelectItem>,
    pub from: FromItem,
    pub where_clause: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

/// The single root object (or relationship, inside a subquery) a SELECT reads from
#[derive(Debug, Clone, PartialEq)]
pub struct FromItem {
    pub name: String,
    pub alias: Option<String>,
}

/// One entry of a SELECT list
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// The `*` marker
    Wildcard,
    /// A column path or function call, optionally aliased
    Expr {
        expr: Expression,
        alias: Option<String>,
    },
    /// A child relationship subquery: `(SELECT ... FROM Contacts)`
    SubQuery(Box<SelectStatement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expression,
    pub ascending: bool,
    pub nulls_first: Option<bool>,
}

/// INSERT statement
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expression>>),
    Select(Box<SelectStatement>),
}

/// UPDATE statement
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expression>,
}

/// `column = value` inside an UPDATE's SET clause
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expression,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub where_clause: Option<Expression>,
}

/// FIND statement of the search dialect
#[derive(Debug, Clone, PartialEq)]
pub struct SearchStatement {
    pub term: String,
    /// Whether the term was written `{...}` rather than quoted
    pub braced: bool,
    pub search_group: Option<SearchGroup>,
    pub returning: Vec<SearchReturning>,
    pub limit: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchGroup {
    AllFields,
    NameFields,
    EmailFields,
    PhoneFields,
    SidebarFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchReturning {
    pub object: String,
    pub fields: Vec<String>,
    pub where_clause: Option<Expression>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<i64>,
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    /// Column reference, possibly a dotted relationship path
    Column(String),
    /// Positional `?` parameter with its 1-based ordinal
    Parameter(usize),
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
    Function {
        name: String,
        args: Vec<Expression>,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expression>,
        subquery: Box<SelectStatement>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    /// Scalar sub-select used as a value
    SubQuery(Box<SelectStatement>),
    /// Parenthesized expression
    Nested(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    Plus,
    Minus,
    Multiply,
    Divide,
    Concat,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Like => "LIKE",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Concat => "||",
        }
    }
}

/// Functions that render without parentheses
const BARE_FUNCTIONS: &[&str] = &["CURRENT_DATE", "CURRENT_TIMESTAMP"];

impl Expression {
    /// Whether this node is a constant literal
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expression::Null
                | Expression::Boolean(_)
                | Expression::Integer(_)
                | Expression::Double(_)
                | Expression::String(_)
                | Expression::Date(_)
                | Expression::Time(_)
                | Expression::Timestamp(_)
        )
    }

    /// Visit every positional parameter ordinal in textual order, including
    /// those inside sub-selects
    pub fn walk_parameters(&self, f: &mut impl FnMut(usize)) {
        match self {
            Expression::Parameter(n) => f(*n),
            Expression::Unary { operand, .. } => operand.walk_parameters(f),
            Expression::Binary { left, right, .. } => {
                left.walk_parameters(f);
                right.walk_parameters(f);
            }
            Expression::Function { args, .. } => {
                args.iter().for_each(|a| a.walk_parameters(f));
            }
            Expression::InList { expr, list, .. } => {
                expr.walk_parameters(f);
                list.iter().for_each(|e| e.walk_parameters(f));
            }
            Expression::InSubquery { expr, subquery, .. } => {
                expr.walk_parameters(f);
                subquery.walk_parameters(f);
            }
            Expression::IsNull { expr, .. } | Expression::Nested(expr) => expr.walk_parameters(f),
            Expression::SubQuery(subquery) => subquery.walk_parameters(f),
            _ => {}
        }
    }

    /// Return a copy with every `?` replaced by the literal for its ordinal
    pub fn bind_parameters(&self, params: &[Value]) -> Result<Expression> {
        let bind_box = |e: &Expression| e.bind_parameters(params).map(Box::new);
        Ok(match self {
            Expression::Parameter(n) => params
                .get(n.wrapping_sub(1))
                .map(Expression::from)
                .ok_or(Error::MissingParameter(*n))?,
            Expression::Unary { op, operand } => Expression::Unary {
                op: *op,
                operand: bind_box(operand)?,
            },
            Expression::Binary { left, op, right } => Expression::Binary {
                left: bind_box(left)?,
                op: *op,
                right: bind_box(right)?,
            },
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| a.bind_parameters(params))
                    .collect::<Result<_>>()?,
            },
            Expression::InList {
                expr,
                list,
                negated,
            } => Expression::InList {
                expr: bind_box(expr)?,
                list: list
                    .iter()
                    .map(|e| e.bind_parameters(params))
                    .collect::<Result<_>>()?,
                negated: *negated,
            },
            Expression::InSubquery {
                expr,
                subquery,
                negated,
            } => Expression::InSubquery {
                expr: bind_box(expr)?,
                subquery: Box::new(subquery.bind_parameters(params)?),
                negated: *negated,
            },
            Expression::IsNull { expr, negated } => Expression::IsNull {
                expr: bind_box(expr)?,
                negated: *negated,
            },
            Expression::SubQuery(subquery) => {
                Expression::SubQuery(Box::new(subquery.bind_parameters(params)?))
            }
            Expression::Nested(inner) => Expression::Nested(bind_box(inner)?),
            other => other.clone(),
        })
    }
}

impl SelectStatement {
    /// A bare `SELECT columns FROM object [WHERE predicate]`
    pub fn simple(object: &str, columns: &[String], where_clause: Option<Expression>) -> Self {
        Self {
            items: columns
                .iter()
                .map(|c| SelectItem::Expr {
                    expr: Expression::Column(c.clone()),
                    alias: None,
                })
                .collect(),
            from: FromItem {
                name: object.to_string(),
                alias: None,
            },
            where_clause,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Whether the select list is exactly the `*` marker
    pub fn is_wildcard(&self) -> bool {
        matches!(self.items.as_slice(), [SelectItem::Wildcard])
    }

    pub fn walk_parameters(&self, f: &mut impl FnMut(usize)) {
        for item in &self.items {
            match item {
                SelectItem::Wildcard => {}
                SelectItem::Expr { expr, .. } => expr.walk_parameters(f),
                SelectItem::SubQuery(subquery) => subquery.walk_parameters(f),
            }
        }
        if let Some(w) = &self.where_clause {
            w.walk_parameters(f);
        }
        self.group_by.iter().for_each(|e| e.walk_parameters(f));
        if let Some(h) = &self.having {
            h.walk_parameters(f);
        }
        self.order_by.iter().for_each(|o| o.expr.walk_parameters(f));
        if let Some(l) = &self.limit {
            l.walk_parameters(f);
        }
        if let Some(o) = &self.offset {
            o.walk_parameters(f);
        }
    }

    pub fn bind_parameters(&self, params: &[Value]) -> Result<SelectStatement> {
        let bind_opt = |e: &Option<Expression>| -> Result<Option<Expression>> {
            e.as_ref().map(|e| e.bind_parameters(params)).transpose()
        };
        let items = self
            .items
            .iter()
            .map(|item| {
                Ok(match item {
                    SelectItem::Wildcard => SelectItem::Wildcard,
                    SelectItem::Expr { expr, alias } => SelectItem::Expr {
                        expr: expr.bind_parameters(params)?,
                        alias: alias.clone(),
                    },
                    SelectItem::SubQuery(subquery) => {
                        SelectItem::SubQuery(Box::new(subquery.bind_parameters(params)?))
                    }
                })
            })
            .collect::<Result<_>>()?;
        Ok(SelectStatement {
            items,
            from: self.from.clone(),
            where_clause: bind_opt(&self.where_clause)?,
            group_by: self
                .group_by
                .iter()
                .map(|e| e.bind_parameters(params))
                .collect::<Result<_>>()?,
            having: bind_opt(&self.having)?,
            order_by: self
                .order_by
                .iter()
                .map(|o| o.bind_parameters(params))
                .collect::<Result<_>>()?,
            limit: bind_opt(&self.limit)?,
            offset: bind_opt(&self.offset)?,
        })
    }
}

impl OrderByItem {
    fn bind_parameters(&self, params: &[Value]) -> Result<OrderByItem> {
        Ok(OrderByItem {
            expr: self.expr.bind_parameters(params)?,
            ascending: self.ascending,
            nulls_first: self.nulls_first,
        })
    }
}

impl SearchStatement {
    pub fn bind_parameters(&self, params: &[Value]) -> Result<SearchStatement> {
        let returning = self
            .returning
            .iter()
            .map(|r| {
                Ok(SearchReturning {
                    object: r.object.clone(),
                    fields: r.fields.clone(),
                    where_clause: r
                        .where_clause
                        .as_ref()
                        .map(|w| w.bind_parameters(params))
                        .transpose()?,
                    order_by: r
                        .order_by
                        .iter()
                        .map(|o| o.bind_parameters(params))
                        .collect::<Result<_>>()?,
                    limit: r.limit,
                })
            })
            .collect::<Result<_>>()?;
        Ok(SearchStatement {
            term: self.term.clone(),
            braced: self.braced,
            search_group: self.search_group,
            returning,
            limit: self
                .limit
                .as_ref()
                .map(|l| l.bind_parameters(params))
                .transpose()?,
        })
    }
}

impl Statement {
    /// Return a copy with every positional parameter bound
    pub fn bind_parameters(&self, params: &[Value]) -> Result<Statement> {
        let bind_opt = |e: &Option<Expression>| -> Result<Option<Expression>> {
            e.as_ref().map(|e| e.bind_parameters(params)).transpose()
        };
        Ok(match self {
            Statement::Select(select) => Statement::Select(select.bind_parameters(params)?),
            Statement::Search(search) => Statement::Search(search.bind_parameters(params)?),
            Statement::Insert(insert) => Statement::Insert(InsertStatement {
                table: insert.table.clone(),
                columns: insert.columns.clone(),
                source: match &insert.source {
                    InsertSource::Values(rows) => InsertSource::Values(
                        rows.iter()
                            .map(|row| {
                                row.iter()
                                    .map(|e| e.bind_parameters(params))
                                    .collect::<Result<Vec<_>>>()
                            })
                            .collect::<Result<_>>()?,
                    ),
                    InsertSource::Select(select) => {
                        InsertSource::Select(Box::new(select.bind_parameters(params)?))
                    }
                },
            }),
            Statement::Update(update) => Statement::Update(UpdateStatement {
                table: update.table.clone(),
                assignments: update
                    .assignments
                    .iter()
                    .map(|a| {
                        Ok(Assignment {
                            column: a.column.clone(),
                            value: a.value.bind_parameters(params)?,
                        })
                    })
                    .collect::<Result<_>>()?,
                where_clause: bind_opt(&update.where_clause)?,
            }),
            Statement::Delete(delete) => Statement::Delete(DeleteStatement {
                table: delete.table.clone(),
                where_clause: bind_opt(&delete.where_clause)?,
            }),
        })
    }
}

// ==================== Rendering ====================

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("'")
}

/// Finite values use the shortest form that lexes back to the same bits.
/// Non-finite values have no literal and render as a division.
fn write_double(f: &mut fmt::Formatter<'_>, d: f64) -> fmt::Result {
    if d.is_nan() {
        f.write_str("(0.0 / 0.0)")
    } else if d.is_infinite() {
        f.write_str(if d > 0.0 { "(1.0 / 0.0)" } else { "(-1.0 / 0.0)" })
    } else {
        write!(f, "{:?}", d)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Null => f.write_str("NULL"),
            Expression::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Expression::Integer(i) => write!(f, "{}", i),
            Expression::Double(d) => write_double(f, *d),
            Expression::String(s) => write_string_literal(f, s),
            Expression::Date(d) => write!(f, "DATE '{}'", d.format("%Y-%m-%d")),
            Expression::Time(t) => write!(f, "TIME '{}'", t.format("%H:%M:%S%.f")),
            Expression::Timestamp(ts) => {
                write!(f, "TIMESTAMP '{}'", ts.format("%Y-%m-%dT%H:%M:%S%.f"))
            }
            Expression::Column(path) => f.write_str(path),
            Expression::Parameter(_) => f.write_str("?"),
            Expression::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {}", operand),
                UnaryOp::Minus => {
                    // "--" would lex as a comment
                    let operand = operand.to_string();
                    let gap = if operand.starts_with('-') { " " } else { "" };
                    write!(f, "-{}{}", gap, operand)
                }
            },
            Expression::Binary { left, op, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Expression::Function { name, args } => {
                if args.is_empty() && BARE_FUNCTIONS.iter().any(|b| b.eq_ignore_ascii_case(name))
                {
                    return f.write_str(name);
                }
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "{} {}IN (", expr, if *negated { "NOT " } else { "" })?;
                write_list(f, list)?;
                f.write_str(")")
            }
            Expression::InSubquery {
                expr,
                subquery,
                negated,
            } => write!(
                f,
                "{} {}IN ({})",
                expr,
                if *negated { "NOT " } else { "" },
                subquery
            ),
            Expression::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expression::SubQuery(subquery) => write!(f, "({})", subquery),
            Expression::Nested(inner) => write!(f, "({})", inner),
        }
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectItem::Wildcard => f.write_str("*"),
            SelectItem::Expr { expr, alias } => {
                write!(f, "{}", expr)?;
                if let Some(alias) = alias {
                    write!(f, " {}", alias)?;
                }
                Ok(())
            }
            SelectItem::SubQuery(subquery) => write!(f, "({})", subquery),
        }
    }
}

impl fmt::Display for OrderByItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if !self.ascending {
            f.write_str(" DESC")?;
        }
        match self.nulls_first {
            Some(true) => f.write_str(" NULLS FIRST"),
            Some(false) => f.write_str(" NULLS LAST"),
            None => Ok(()),
        }
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        write_list(f, &self.items)?;
        write!(f, " FROM {}", self.from.name)?;
        if let Some(alias) = &self.from.alias {
            write!(f, " {}", alias)?;
        }
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {}", w)?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" GROUP BY ")?;
            write_list(f, &self.group_by)?;
        }
        if let Some(h) = &self.having {
            write!(f, " HAVING {}", h)?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            write_list(f, &self.order_by)?;
        }
        if let Some(l) = &self.limit {
            write!(f, " LIMIT {}", l)?;
        }
        if let Some(o) = &self.offset {
            write!(f, " OFFSET {}", o)?;
        }
        Ok(())
    }
}

impl fmt::Display for InsertStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO {} (", self.table)?;
        write_list(f, &self.columns)?;
        f.write_str(") ")?;
        match &self.source {
            InsertSource::Values(rows) => {
                f.write_str("VALUES ")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str("(")?;
                    write_list(f, row)?;
                    f.write_str(")")?;
                }
                Ok(())
            }
            InsertSource::Select(select) => write!(f, "{}", select),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.column, self.value)
    }
}

impl fmt::Display for UpdateStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPDATE {} SET ", self.table)?;
        write_list(f, &self.assignments)?;
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {}", w)?;
        }
        Ok(())
    }
}

impl fmt::Display for DeleteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", self.table)?;
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {}", w)?;
        }
        Ok(())
    }
}

impl fmt::Display for SearchGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchGroup::AllFields => "ALL FIELDS",
            SearchGroup::NameFields => "NAME FIELDS",
            SearchGroup::EmailFields => "EMAIL FIELDS",
            SearchGroup::PhoneFields => "PHONE FIELDS",
            SearchGroup::SidebarFields => "SIDEBAR FIELDS",
        })
    }
}

impl fmt::Display for SearchReturning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object)?;
        if self.fields.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        write_list(f, &self.fields)?;
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {}", w)?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            write_list(f, &self.order_by)?;
        }
        if let Some(l) = self.limit {
            write!(f, " LIMIT {}", l)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for SearchStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.braced {
            write!(f, "FIND {{{}}}", self.term)?;
        } else {
            f.write_str("FIND ")?;
            write_string_literal(f, &self.term)?;
        }
        if let Some(group) = &self.search_group {
            write!(f, " IN {}", group)?;
        }
        if !self.returning.is_empty() {
            f.write_str(" RETURNING ")?;
            write_list(f, &self.returning)?;
        }
        if let Some(l) = &self.limit {
            write!(f, " LIMIT {}", l)?;
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(s) => write!(f, "{}", s),
            Statement::Insert(s) => write!(f, "{}", s),
            Statement::Update(s) => write!(f, "{}", s),
            Statement::Delete(s) => write!(f, "{}", s),
            Statement::Search(s) => write!(f, "{}", s),
        }
    }
}
