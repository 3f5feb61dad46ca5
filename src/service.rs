//! Statement execution against the remote platform
//!
//! [`StatementService`] connects the analysis pipeline to the remote
//! collaborators: it classifies statement text, resolves field trees, sends
//! queries and record batches, flattens nested results and routes cacheable
//! reads through the result cache.

use std::cell::Cell;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::{
    classify, expand_row, FieldResolver, MutationAnalyzer, ResultRow, StatementKind,
    SubSelectResolver,
};
use crate::ast::{SearchStatement, SelectStatement, Statement};
use crate::cache::{cache_key, normalize_statement, strip_cache_hint, Cache, CacheScope, CacheWeight};
use crate::config::DriverConfig;
use crate::error::{Error, Result, Warning};
use crate::schema::SchemaProvider;
use crate::value::{Record, Value};

/// Largest record batch sent in one create/update/delete call
pub const MAX_BATCH_SIZE: usize = 200;

/// Read side of the remote API
pub trait QueryService {
    /// Run a query and return its records, relationship results nested
    fn query(&self, text: &str) -> Result<Vec<serde_json::Value>>;
    /// Run a search and return the matched records; each carries `attributes.type`
    fn search(&self, text: &str) -> Result<Vec<serde_json::Value>>;
}

/// Write side of the remote API. Results are per record, in input order.
pub trait MutationService {
    fn create(&self, object: &str, records: &[Record]) -> Result<Vec<SaveResult>>;
    fn update(&self, object: &str, records: &[Record]) -> Result<Vec<SaveResult>>;
    fn delete(&self, ids: &[String]) -> Result<Vec<SaveResult>>;
}

/// Outcome of one record of a mutation batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    pub success: bool,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SaveResult {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            errors: Vec::new(),
        }
    }

    pub fn failed(id: Option<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            id,
            errors,
        }
    }
}

/// Result column as exposed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub label: String,
    pub remote_type: String,
}

/// Flat tabular result
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Rows as records keyed by column label
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| c.label.clone())
                    .zip(row.iter().cloned())
                    .collect::<Record>()
            })
            .collect()
    }

    /// Position of a column by label (case-insensitive)
    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.label.eq_ignore_ascii_case(label))
    }
}

impl CacheWeight for ResultSet {
    fn weight(&self) -> usize {
        let columns: usize = self
            .columns
            .iter()
            .map(|c| c.name.len() + c.label.len() + c.remote_type.len())
            .sum();
        let values: usize = self
            .rows
            .iter()
            .flat_map(|row| row.iter())
            .map(Value::approximate_size)
            .sum();
        std::mem::size_of::<ResultSet>() + columns + values
    }
}

/// Outcome of a mutation statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateCount {
    /// Records the remote platform reported as saved
    pub affected: usize,
    pub warnings: Vec<Warning>,
}

/// Outcome of [`StatementService::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Rows(Arc<ResultSet>),
    Count(UpdateCount),
}

impl Execution {
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            Execution::Rows(rows) => Some(rows),
            Execution::Count(_) => None,
        }
    }

    pub fn count(&self) -> Option<&UpdateCount> {
        match self {
            Execution::Count(count) => Some(count),
            Execution::Rows(_) => None,
        }
    }
}

/// Executes statement text against the remote collaborators
pub struct StatementService<'a> {
    schema: &'a dyn SchemaProvider,
    queries: &'a dyn QueryService,
    mutations: &'a dyn MutationService,
    cache: Option<&'a Cache<Arc<ResultSet>>>,
    config: DriverConfig,
    /// Nested sub-select calls currently in progress
    depth: Cell<u8>,
}

impl<'a> StatementService<'a> {
    pub fn new(
        schema: &'a dyn SchemaProvider,
        queries: &'a dyn QueryService,
        mutations: &'a dyn MutationService,
        config: DriverConfig,
    ) -> Self {
        Self {
            schema,
            queries,
            mutations,
            cache: None,
            config,
            depth: Cell::new(0),
        }
    }

    /// Share a result cache; statements opt in with a `CACHE` hint
    pub fn with_cache(mut self, cache: &'a Cache<Arc<ResultSet>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Execute one statement with its positional parameters
    pub fn execute(&self, text: &str, params: &[Value]) -> Result<Execution> {
        let (scope, text) = strip_cache_hint(text);
        let classified = classify(text, self.schema)?;
        let kind = classified.kind;
        let statement = classified.into_statement()?;

        match &statement {
            Statement::Select(select) => {
                let rows = self.cached(scope, &statement, params, || {
                    self.select_rows(select, params)
                })?;
                Ok(Execution::Rows(rows))
            }
            Statement::Search(search) => {
                let rows = self.cached(scope, &statement, params, || {
                    self.search_rows(search, params)
                })?;
                Ok(Execution::Rows(rows))
            }
            Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_) => {
                let mut count = self.apply(&statement, params)?;
                if scope.is_some() {
                    warn!(kind = %kind, "cache hint ignored on mutation");
                    count.warnings.push(Warning::CacheHintIgnored(kind.to_string()));
                }
                Ok(Execution::Count(count))
            }
        }
    }

    /// Execute a statement that must return rows
    pub fn query(&self, text: &str, params: &[Value]) -> Result<Arc<ResultSet>> {
        match self.execute(text, params)? {
            Execution::Rows(rows) => Ok(rows),
            Execution::Count(_) => Err(Error::InvalidStatement(format!(
                "statement does not return rows: {}",
                text.trim()
            ))),
        }
    }

    fn cached<F>(
        &self,
        scope: Option<CacheScope>,
        statement: &Statement,
        params: &[Value],
        compute: F,
    ) -> Result<Arc<ResultSet>>
    where
        F: FnOnce() -> Result<ResultSet>,
    {
        let (Some(scope), Some(cache)) = (scope, self.cache) else {
            if scope.is_some() {
                debug!("cache hint given but no result cache configured");
            }
            return compute().map(Arc::new);
        };
        let bound = statement.bind_parameters(params)?.to_string();
        let key = cache_key(scope, &self.config.session_id, &normalize_statement(&bound));
        cache.get_or_compute(&key, || compute().map(Arc::new))
    }

    fn select_rows(&self, select: &SelectStatement, params: &[Value]) -> Result<ResultSet> {
        let resolved = FieldResolver::new(self.schema, self.config.max_nesting_depth)
            .resolve(select)?;
        let text = resolved.statement.bind_parameters(params)?.to_string();
        debug!(query = %text, "sending query");
        let records = self.queries.query(&text)?;

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let row = ResultRow::from_json(&resolved.tree, record)?;
            rows.extend(expand_row(&resolved.tree, &row)?);
        }
        let columns = resolved
            .tree
            .flatten()
            .into_iter()
            .map(|def| ColumnDescriptor {
                name: def.name.clone(),
                label: def.alias.clone(),
                remote_type: def.remote_type.clone(),
            })
            .collect();
        debug!(records = records.len(), rows = rows.len(), "query returned");
        Ok(ResultSet { columns, rows })
    }

    fn search_rows(&self, search: &SearchStatement, params: &[Value]) -> Result<ResultSet> {
        let resolver = FieldResolver::new(self.schema, self.config.max_nesting_depth);

        // One column block per RETURNING object
        let mut blocks = Vec::with_capacity(search.returning.len());
        let mut columns = Vec::new();
        for returning in &search.returning {
            let fields = if returning.fields.is_empty() {
                vec!["Id".to_string()]
            } else {
                returning.fields.clone()
            };
            let resolved = resolver.resolve(&SelectStatement::simple(&returning.object, &fields, None))?;
            let offset = columns.len();
            for def in resolved.tree.flatten() {
                columns.push(ColumnDescriptor {
                    name: def.name.clone(),
                    label: format!("{}.{}", returning.object, def.alias),
                    remote_type: def.remote_type.clone(),
                });
            }
            blocks.push((returning.object.as_str(), offset, resolved.tree));
        }
        if columns.is_empty() {
            columns.push(ColumnDescriptor {
                name: "Id".to_string(),
                label: "Id".to_string(),
                remote_type: "id".to_string(),
            });
        }

        let text = search.bind_parameters(params)?.to_string();
        debug!(search = %text, "sending search");
        let records = self.queries.search(&text)?;

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let mut row = vec![Value::Null; columns.len()];
            if blocks.is_empty() {
                row[0] = record
                    .get("Id")
                    .map(|id| Value::from_json(id, "id"))
                    .unwrap_or(Value::Null);
                rows.push(row);
                continue;
            }
            let object_type = record
                .pointer("/attributes/type")
                .and_then(|t| t.as_str())
                .unwrap_or_default();
            let Some((_, offset, tree)) = blocks
                .iter()
                .find(|(object, _, _)| object.eq_ignore_ascii_case(object_type))
            else {
                debug!(object = %object_type, "search record of an unrequested object skipped");
                continue;
            };
            let flat = expand_row(tree, &ResultRow::from_json(tree, record)?)?;
            if let Some(values) = flat.into_iter().next() {
                for (i, value) in values.into_iter().enumerate() {
                    row[offset + i] = value;
                }
            }
            rows.push(row);
        }
        Ok(ResultSet { columns, rows })
    }

    fn apply(&self, statement: &Statement, params: &[Value]) -> Result<UpdateCount> {
        let analyzer = MutationAnalyzer::new(Some(self));
        let mut count = UpdateCount::default();
        match statement {
            Statement::Insert(insert) => {
                let plan = analyzer.analyze_insert(insert, params)?;
                for (batch, chunk) in plan.records.chunks(MAX_BATCH_SIZE).enumerate() {
                    let results = self.mutations.create(&plan.object_name, chunk)?;
                    tally(&mut count, batch * MAX_BATCH_SIZE, results, |_| None);
                }
            }
            Statement::Update(update) => {
                let plan = analyzer.analyze_update(update, params)?;
                count.warnings.extend(plan.warnings);
                for (batch, chunk) in plan.records.chunks(MAX_BATCH_SIZE).enumerate() {
                    let results = self.mutations.update(&plan.object_name, chunk)?;
                    tally(&mut count, batch * MAX_BATCH_SIZE, results, |i| {
                        chunk.get(i).and_then(|r| r.get("Id")).map(|id| id.to_string())
                    });
                }
            }
            Statement::Delete(delete) => {
                let plan = analyzer.analyze_delete(delete, params)?;
                for (batch, chunk) in plan.ids.chunks(MAX_BATCH_SIZE).enumerate() {
                    let results = self.mutations.delete(chunk)?;
                    tally(&mut count, batch * MAX_BATCH_SIZE, results, |i| chunk.get(i).cloned());
                }
            }
            other => {
                return Err(Error::InvalidStatement(format!(
                    "not a mutation: {}",
                    StatementKind::of(other)
                )))
            }
        }
        debug!(affected = count.affected, warnings = count.warnings.len(), "mutation applied");
        Ok(count)
    }

    fn resolve_nested(&self, query: &str, params: &[Value]) -> Result<Vec<Record>> {
        let classified = classify(query, self.schema)?;
        match classified.statement()? {
            Statement::Select(select) => Ok(self.select_rows(select, params)?.records()),
            _ => Err(Error::InvalidStatement(format!(
                "sub-select must be a SELECT: {}",
                query
            ))),
        }
    }
}

impl SubSelectResolver for StatementService<'_> {
    fn resolve(&self, query: &str, params: &[Value]) -> Result<Vec<Record>> {
        let depth = self.depth.get();
        if depth >= self.config.max_nesting_depth {
            return Err(Error::NestingTooDeep {
                max: self.config.max_nesting_depth,
            });
        }
        self.depth.set(depth + 1);
        let result = self.resolve_nested(query, params);
        self.depth.set(depth);
        result
    }
}

/// Count successes; every failure becomes a warning and processing continues
fn tally(
    count: &mut UpdateCount,
    offset: usize,
    results: Vec<SaveResult>,
    id_of: impl Fn(usize) -> Option<String>,
) {
    for (i, result) in results.into_iter().enumerate() {
        if result.success {
            count.affected += 1;
            continue;
        }
        let id = result.id.or_else(|| id_of(i));
        warn!(index = offset + i, id = ?id, errors = ?result.errors, "record failed");
        count.warnings.push(Warning::RecordFailed {
            index: offset + i,
            id,
            errors: result.errors,
        });
    }
}
