//! INSERT / UPDATE / DELETE record-set analysis
//!
//! Each analyzer turns a mutation statement into the records (or IDs) to
//! send to the remote platform. WHERE clauses become a generated
//! `SELECT Id, ... FROM object WHERE ...` executed through a
//! [`SubSelectResolver`], unless the predicate names a single record ID and
//! no SET value needs fetched data.

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::analysis::classifier::check_direct_id_where;
use crate::analysis::evaluator::{unqualified, Evaluator};
use crate::ast::{
    DeleteStatement, Expression, InsertSource, InsertStatement, SelectStatement, UpdateStatement,
};
use crate::error::{Error, Result, Warning};
use crate::value::{Record, Value};

/// Executes a generated SELECT and returns its rows as ordered field maps
pub trait SubSelectResolver {
    fn resolve(&self, query: &str, params: &[Value]) -> Result<Vec<Record>>;
}

impl<F> SubSelectResolver for F
where
    F: Fn(&str, &[Value]) -> Result<Vec<Record>>,
{
    fn resolve(&self, query: &str, params: &[Value]) -> Result<Vec<Record>> {
        self(query, params)
    }
}

/// Records to create
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub object_name: String,
    pub records: Vec<Record>,
}

/// Records to update, each carrying its `Id`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub object_name: String,
    pub records: Vec<Record>,
    /// Records left out because a SET value could not be computed
    pub warnings: Vec<Warning>,
}

/// Record IDs to delete
#[derive(Debug, Clone, PartialEq)]
pub struct DeletePlan {
    pub object_name: String,
    pub ids: Vec<String>,
}

/// How a SET or VALUES expression gets its value
enum ValueSource<'e> {
    /// Known before any record is looked at; `None` means "leave unset"
    Constant(Option<Value>),
    /// Computed per record from fetched fields
    Computed(&'e Expression),
}

pub struct MutationAnalyzer<'a> {
    resolver: Option<&'a dyn SubSelectResolver>,
    now: Option<NaiveDateTime>,
}

impl<'a> MutationAnalyzer<'a> {
    pub fn new(resolver: Option<&'a dyn SubSelectResolver>) -> Self {
        Self {
            resolver,
            now: None,
        }
    }

    /// Fix the instant date functions evaluate to
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn analyze_insert(&self, insert: &InsertStatement, params: &[Value]) -> Result<InsertPlan> {
        if insert.columns.is_empty() {
            return Err(Error::InvalidStatement(format!(
                "INSERT INTO {} needs an explicit column list",
                insert.table
            )));
        }

        let records = match &insert.source {
            InsertSource::Values(rows) => {
                let mut records = Vec::with_capacity(rows.len());
                for (index, row) in rows.iter().enumerate() {
                    if row.len() != insert.columns.len() {
                        return Err(Error::InvalidStatement(format!(
                            "VALUES row {} has {} values for {} columns",
                            index + 1,
                            row.len(),
                            insert.columns.len()
                        )));
                    }
                    let empty = Record::new();
                    let mut record = Record::new();
                    for (column, expr) in insert.columns.iter().zip(row) {
                        let value = match self.value_source(expr, params)? {
                            ValueSource::Constant(value) => value,
                            ValueSource::Computed(expr) => {
                                Some(self.evaluator(&empty, params).evaluate(expr)?)
                            }
                        };
                        if let Some(value) = value {
                            record.insert(column.clone(), value);
                        }
                    }
                    records.push(record);
                }
                records
            }
            InsertSource::Select(select) => {
                let Some(rows) = self.run_sub_select(select, params)? else {
                    return Ok(InsertPlan {
                        object_name: insert.table.clone(),
                        records: Vec::new(),
                    });
                };
                rows.into_iter()
                    .map(|row| {
                        if row.len() != insert.columns.len() {
                            debug!(
                                returned = row.len(),
                                declared = insert.columns.len(),
                                "INSERT ... SELECT column count differs, extra values dropped"
                            );
                        }
                        insert
                            .columns
                            .iter()
                            .cloned()
                            .zip(row.values().cloned())
                            .collect::<Record>()
                    })
                    .collect()
            }
        };

        debug!(object = %insert.table, records = records.len(), "analyzed INSERT");
        Ok(InsertPlan {
            object_name: insert.table.clone(),
            records,
        })
    }

    pub fn analyze_update(&self, update: &UpdateStatement, params: &[Value]) -> Result<UpdatePlan> {
        let mut referenced = Vec::new();
        let mut needs_fetch = false;
        for assignment in &update.assignments {
            needs_fetch |= collect_references(&assignment.value, &update.table, &mut referenced);
        }

        let direct_id = check_direct_id_where(update.where_clause.as_ref(), params);
        let rows = match direct_id {
            Some(id) if !needs_fetch => {
                debug!(id = %id, "UPDATE targets a single record by ID");
                vec![Record::new().with("Id", id)]
            }
            _ => {
                let mut columns = vec!["Id".to_string()];
                for column in referenced {
                    if !columns.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
                        columns.push(column);
                    }
                }
                let select =
                    SelectStatement::simple(&update.table, &columns, update.where_clause.clone());
                match self.run_sub_select(&select, params)? {
                    Some(rows) => rows,
                    None => {
                        return Ok(UpdatePlan {
                            object_name: update.table.clone(),
                            records: Vec::new(),
                            warnings: Vec::new(),
                        })
                    }
                }
            }
        };

        let sources = update
            .assignments
            .iter()
            .map(|a| self.value_source(&a.value, params))
            .collect::<Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        let mut warnings = Vec::new();
        'rows: for row in rows {
            let id = match row.get("Id") {
                Some(Value::String(id)) => id.clone(),
                Some(other) if !other.is_null() => other.to_string(),
                _ => {
                    return Err(Error::Remote(
                        "sub-select row is missing its Id".to_string(),
                    ))
                }
            };
            let mut record = Record::new().with("Id", id.clone());
            for (assignment, source) in update.assignments.iter().zip(&sources) {
                let value = match source {
                    ValueSource::Constant(value) => value.clone(),
                    ValueSource::Computed(expr) => match self
                        .evaluator(&row, params)
                        .with_root(&update.table)
                        .evaluate(expr)
                    {
                        Ok(value) => Some(value),
                        Err(e) => {
                            warn!(id = %id, error = %e, "SET value failed, record skipped");
                            warnings.push(Warning::EvaluationFailed {
                                id,
                                message: e.to_string(),
                            });
                            continue 'rows;
                        }
                    },
                };
                if let Some(value) = value {
                    record.insert(assignment.column.clone(), value);
                }
            }
            records.push(record);
        }

        debug!(object = %update.table, records = records.len(), "analyzed UPDATE");
        Ok(UpdatePlan {
            object_name: update.table.clone(),
            records,
            warnings,
        })
    }

    pub fn analyze_delete(&self, delete: &DeleteStatement, params: &[Value]) -> Result<DeletePlan> {
        let ids = match check_direct_id_where(delete.where_clause.as_ref(), params) {
            Some(id) => vec![id],
            None => {
                let select = SelectStatement::simple(
                    &delete.table,
                    &["Id".to_string()],
                    delete.where_clause.clone(),
                );
                self.run_sub_select(&select, params)?
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|row| match row.get("Id") {
                        Some(Value::String(id)) => Some(id.clone()),
                        Some(Value::Null) | None => None,
                        Some(other) => Some(other.to_string()),
                    })
                    .collect()
            }
        };

        debug!(object = %delete.table, ids = ids.len(), "analyzed DELETE");
        Ok(DeletePlan {
            object_name: delete.table.clone(),
            ids,
        })
    }

    fn evaluator<'r>(&self, record: &'r Record, params: &'r [Value]) -> Evaluator<'r> {
        let evaluator = Evaluator::new(record, params);
        match self.now {
            Some(now) => evaluator.with_now(now),
            None => evaluator,
        }
    }

    /// Classify a value expression, resolving everything that does not depend
    /// on the record
    fn value_source<'e>(&self, expr: &'e Expression, params: &[Value]) -> Result<ValueSource<'e>> {
        if let Some(value) = literal_value(expr) {
            return Ok(ValueSource::Constant(Some(value)));
        }
        match expr {
            Expression::Parameter(n) => params
                .get(n.wrapping_sub(1))
                .cloned()
                .map(|v| ValueSource::Constant(Some(v)))
                .ok_or(Error::MissingParameter(*n)),
            Expression::SubQuery(select) => {
                let rows = self.run_sub_select(select, params)?.unwrap_or_default();
                match rows.as_slice() {
                    [row] if row.len() == 1 => {
                        Ok(ValueSource::Constant(row.values().next().cloned()))
                    }
                    _ => {
                        debug!(rows = rows.len(), "scalar sub-select did not return one value");
                        Ok(ValueSource::Constant(None))
                    }
                }
            }
            other => Ok(ValueSource::Computed(other)),
        }
    }

    /// Run a generated SELECT, passing only the parameters it references.
    /// `None` means no resolver was supplied.
    fn run_sub_select(
        &self,
        select: &SelectStatement,
        params: &[Value],
    ) -> Result<Option<Vec<Record>>> {
        let text = select.to_string();
        let Some(resolver) = self.resolver else {
            warn!(query = %text, "no sub-select resolver available, no records affected");
            return Ok(None);
        };

        let mut ordinals = Vec::new();
        select.walk_parameters(&mut |n| ordinals.push(n));
        let sub_params = ordinals
            .into_iter()
            .map(|n| {
                params
                    .get(n.wrapping_sub(1))
                    .cloned()
                    .ok_or(Error::MissingParameter(n))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(query = %text, params = sub_params.len(), "running sub-select");
        resolver.resolve(&text, &sub_params).map(Some)
    }
}

/// Literal expression to value
fn literal_value(expr: &Expression) -> Option<Value> {
    Some(match expr {
        Expression::Null => Value::Null,
        Expression::Boolean(b) => Value::Boolean(*b),
        Expression::Integer(i) => Value::Integer(*i),
        Expression::Double(d) => Value::Double(*d),
        Expression::String(s) => Value::String(s.clone()),
        Expression::Date(d) => Value::Date(*d),
        Expression::Time(t) => Value::Time(*t),
        Expression::Timestamp(ts) => Value::Timestamp(*ts),
        _ => return None,
    })
}

/// Collect plain column references outside sub-selects. Returns whether the
/// expression needs fetched record data (any column reference or function call).
fn collect_references(expr: &Expression, root: &str, columns: &mut Vec<String>) -> bool {
    match expr {
        Expression::Column(path) => {
            columns.push(unqualified(path, root).to_string());
            true
        }
        Expression::Function { args, .. } => {
            for arg in args {
                collect_references(arg, root, columns);
            }
            true
        }
        Expression::Unary { operand, .. } => collect_references(operand, root, columns),
        Expression::Binary { left, right, .. } => {
            let l = collect_references(left, root, columns);
            let r = collect_references(right, root, columns);
            l || r
        }
        Expression::InList { expr, list, .. } => {
            let mut found = collect_references(expr, root, columns);
            for item in list {
                found |= collect_references(item, root, columns);
            }
            found
        }
        Expression::InSubquery { expr, .. } => collect_references(expr, root, columns),
        Expression::IsNull { expr, .. } | Expression::Nested(expr) => {
            collect_references(expr, root, columns)
        }
        _ => false,
    }
}
