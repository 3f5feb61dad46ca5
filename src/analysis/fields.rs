//! Field definition resolution
//!
//! Builds an ordered, possibly nested tree of field descriptors for a SELECT.
//! Plain columns walk their relationship prefix through the schema; child
//! relationship subqueries resolve against the parent's declared child
//! relationships and become nested trees.

use std::sync::Arc;

use tracing::debug;

use crate::ast::{Expression, OrderByItem, SelectItem, SelectStatement};
use crate::error::{Error, Result};
use crate::schema::{ObjectDescribe, SchemaProvider};

/// Functions whose result is always an integer, whatever their argument
pub const INTEGER_FUNCTIONS: &[&str] = &[
    "COUNT",
    "COUNT_DISTINCT",
    "CALENDAR_MONTH",
    "CALENDAR_QUARTER",
    "CALENDAR_YEAR",
    "DAY_IN_MONTH",
    "DAY_IN_WEEK",
    "DAY_IN_YEAR",
    "DAY_ONLY",
    "FISCAL_MONTH",
    "FISCAL_QUARTER",
    "FISCAL_YEAR",
    "HOUR_IN_DAY",
    "WEEK_IN_MONTH",
    "WEEK_IN_YEAR",
];

/// One resolved select column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Leaf field name as declared remotely (the function name for function items)
    pub name: String,
    /// Where the value sits in a remote record, relative to the tree's object:
    /// relationship prefix plus name, or the result key of a function item
    pub qualified_path: String,
    /// Result column label
    pub alias: String,
    /// Declared remote type name
    pub remote_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldNode {
    Field(FieldDef),
    /// A to-many relationship subquery
    Nested(FieldDefTree),
}

/// Ordered field descriptors for one SELECT level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefTree {
    /// Object the fields were resolved against
    pub object_name: String,
    /// Child relationship name, for nested trees
    pub relationship_name: Option<String>,
    pub nodes: Vec<FieldNode>,
}

impl FieldDefTree {
    /// Depth-first, left-to-right leaf descriptors
    pub fn flatten(&self) -> Vec<&FieldDef> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'t>(&'t self, out: &mut Vec<&'t FieldDef>) {
        for node in &self.nodes {
            match node {
                FieldNode::Field(def) => out.push(def),
                FieldNode::Nested(tree) => tree.collect_leaves(out),
            }
        }
    }

    /// Number of flat columns this tree produces
    pub fn width(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| match node {
                FieldNode::Field(_) => 1,
                FieldNode::Nested(tree) => tree.width(),
            })
            .sum()
    }
}

/// A SELECT ready to send remotely, with its field tree
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSelect {
    /// The statement with ORDER BY alias references rewritten
    pub statement: SelectStatement,
    pub tree: FieldDefTree,
}

pub struct FieldResolver<'a> {
    schema: &'a dyn SchemaProvider,
    max_depth: u8,
}

impl<'a> FieldResolver<'a> {
    pub fn new(schema: &'a dyn SchemaProvider, max_depth: u8) -> Self {
        Self { schema, max_depth }
    }

    pub fn resolve(&self, select: &SelectStatement) -> Result<ResolvedSelect> {
        let root = self.schema.describe(&select.from.name)?;
        let mut statement = select.clone();
        let tree = self.resolve_level(&mut statement, &root, None, 0)?;
        rewrite_order_by_aliases(&mut statement);
        Ok(ResolvedSelect { statement, tree })
    }

    fn resolve_level(
        &self,
        select: &mut SelectStatement,
        object: &ObjectDescribe,
        relationship_name: Option<String>,
        depth: u8,
    ) -> Result<FieldDefTree> {
        if depth > self.max_depth {
            return Err(Error::NestingTooDeep {
                max: self.max_depth,
            });
        }

        // A subquery may still carry `*`; the remote dialect needs explicit columns
        if select.is_wildcard() {
            select.items = object
                .fields()
                .map(|f| SelectItem::Expr {
                    expr: Expression::Column(f.name.clone()),
                    alias: None,
                })
                .collect();
        }

        let root_alias = select.from.alias.clone();
        let mut nodes = Vec::with_capacity(select.items.len());
        let mut unnamed_functions = 0;
        for item in &mut select.items {
            match item {
                SelectItem::Wildcard => {
                    return Err(Error::InvalidStatement(
                        "'*' must be the only select item".to_string(),
                    ))
                }
                SelectItem::Expr { expr, alias } => {
                    let def = match expr {
                        Expression::Column(path) => self.resolve_column(
                            object,
                            root_alias.as_deref(),
                            path,
                            alias.as_deref(),
                        )?,
                        Expression::Function { name, args } => {
                            let result_key = match alias {
                                Some(alias) => alias.clone(),
                                None => {
                                    let key = format!("expr{}", unnamed_functions);
                                    unnamed_functions += 1;
                                    key
                                }
                            };
                            self.resolve_function(
                                object,
                                root_alias.as_deref(),
                                name,
                                args,
                                alias.as_deref(),
                                result_key,
                            )?
                        }
                        other => {
                            return Err(Error::InvalidStatement(format!(
                                "unsupported select item: {}",
                                other
                            )))
                        }
                    };
                    nodes.push(FieldNode::Field(def));
                }
                SelectItem::SubQuery(subquery) => {
                    let child = object
                        .get_child_relationship(&subquery.from.name)
                        .ok_or_else(|| Error::UnresolvedRelationship {
                            subquery: subquery.to_string(),
                        })?;
                    let child_object = self.schema.describe(&child.child_object)?;
                    debug!(
                        relationship = %child.relationship_name,
                        object = %child_object.name,
                        "resolved child relationship subquery"
                    );
                    let tree = self.resolve_level(
                        subquery,
                        &child_object,
                        Some(child.relationship_name.clone()),
                        depth + 1,
                    )?;
                    rewrite_order_by_aliases(subquery);
                    nodes.push(FieldNode::Nested(tree));
                }
            }
        }

        Ok(FieldDefTree {
            object_name: object.name.clone(),
            relationship_name,
            nodes,
        })
    }

    /// Resolve a dotted column path against `object`
    fn resolve_column(
        &self,
        object: &ObjectDescribe,
        root_alias: Option<&str>,
        path: &str,
        alias: Option<&str>,
    ) -> Result<FieldDef> {
        let mut segments: Vec<&str> = path.split('.').collect();
        if segments.len() > 1
            && (segments[0].eq_ignore_ascii_case(&object.name)
                || root_alias
                    .map(|a| segments[0].eq_ignore_ascii_case(a))
                    .unwrap_or(false))
        {
            segments.remove(0);
        }
        let Some((leaf, prefix)) = segments.split_last() else {
            return Err(Error::UnknownField {
                field: path.to_string(),
                object: object.name.clone(),
            });
        };

        let mut current: Option<Arc<ObjectDescribe>> = None;
        for segment in prefix {
            let describing = current.as_deref().unwrap_or(object);
            let field = describing.get_relationship_field(segment).ok_or_else(|| {
                Error::UnknownField {
                    field: segment.to_string(),
                    object: describing.name.clone(),
                }
            })?;
            let target = field
                .reference_to
                .first()
                .ok_or_else(|| Error::UnknownField {
                    field: segment.to_string(),
                    object: describing.name.clone(),
                })?;
            current = Some(self.schema.describe(target)?);
        }

        let owner = current.as_deref().unwrap_or(object);
        let field = owner.get_field(leaf).ok_or_else(|| Error::UnknownField {
            field: leaf.to_string(),
            object: owner.name.clone(),
        })?;

        let qualified_path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", prefix.join("."), field.name)
        };
        let alias = match alias {
            Some(alias) => alias.to_string(),
            None => qualified_path.clone(),
        };
        Ok(FieldDef {
            name: field.name.clone(),
            qualified_path,
            alias,
            remote_type: field.remote_type().to_string(),
        })
    }

    fn resolve_function(
        &self,
        object: &ObjectDescribe,
        root_alias: Option<&str>,
        name: &str,
        args: &[Expression],
        alias: Option<&str>,
        result_key: String,
    ) -> Result<FieldDef> {
        let remote_type = if INTEGER_FUNCTIONS.iter().any(|f| f.eq_ignore_ascii_case(name)) {
            "int".to_string()
        } else {
            match args {
                [Expression::Column(path)] => {
                    self.resolve_column(object, root_alias, path, None)?
                        .remote_type
                }
                [Expression::Function {
                    name: inner,
                    args: inner_args,
                }] => {
                    self.resolve_function(
                        object,
                        root_alias,
                        inner,
                        inner_args,
                        None,
                        String::new(),
                    )?
                    .remote_type
                }
                _ => "anyType".to_string(),
            }
        };
        Ok(FieldDef {
            name: name.to_string(),
            qualified_path: result_key,
            alias: alias.unwrap_or(name).to_string(),
            remote_type,
        })
    }
}

/// Replace ORDER BY references to select-list aliases with the aliased expression
fn rewrite_order_by_aliases(select: &mut SelectStatement) {
    let aliases: Vec<(String, Expression)> = select
        .items
        .iter()
        .filter_map(|item| match item {
            SelectItem::Expr {
                expr,
                alias: Some(alias),
            } => Some((alias.clone(), expr.clone())),
            _ => None,
        })
        .collect();
    if aliases.is_empty() {
        return;
    }

    for OrderByItem { expr, .. } in &mut select.order_by {
        let Expression::Column(name) = expr else {
            continue;
        };
        if let Some((alias, target)) = aliases.iter().find(|(a, _)| a.eq_ignore_ascii_case(name)) {
            debug!(alias = %alias, target = %target, "rewrote ORDER BY alias");
            *expr = target.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Statement;
    use crate::parser::parse;
    use crate::schema::{ChildRelationship, FieldDescribe, FieldType, InMemorySchema, SchemaBuilder};

    fn schema() -> InMemorySchema {
        SchemaBuilder::new()
            .with_object(
                ObjectDescribe::new("Account")
                    .with_field(FieldDescribe::new("Id", FieldType::Id))
                    .with_field(FieldDescribe::new("Name", FieldType::String))
                    .with_field(FieldDescribe::new("CreatedDate", FieldType::DateTime)),
            )
            .with_object(
                ObjectDescribe::new("Contact")
                    .with_field(FieldDescribe::new("Id", FieldType::Id))
                    .with_field(FieldDescribe::new("LastName", FieldType::String))
                    .with_field(
                        FieldDescribe::new("AccountId", FieldType::Reference)
                            .with_reference("Account")
                            .with_relationship_name("Account"),
                    ),
            )
            .build()
    }

    fn select(text: &str) -> SelectStatement {
        match parse(text).unwrap() {
            Statement::Select(s) => s,
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_function_types() {
        let schema = schema();
        let resolver = FieldResolver::new(&schema, 5);
        let resolved = resolver
            .resolve(&select("SELECT COUNT(Id), MAX(CreatedDate) latest FROM Account"))
            .unwrap();
        let leaves = resolved.tree.flatten();
        assert_eq!(leaves[0].remote_type, "int");
        assert_eq!(leaves[0].alias, "COUNT");
        assert_eq!(leaves[0].qualified_path, "expr0");
        assert_eq!(leaves[1].remote_type, "datetime");
        assert_eq!(leaves[1].alias, "latest");
        assert_eq!(leaves[1].qualified_path, "latest");
    }

    #[test]
    fn test_root_prefix_is_dropped() {
        let schema = schema();
        let resolver = FieldResolver::new(&schema, 5);
        let resolved = resolver
            .resolve(&select("SELECT Contact.LastName, c.Account.Name FROM Contact c"))
            .unwrap();
        let leaves = resolved.tree.flatten();
        assert_eq!(leaves[0].alias, "LastName");
        assert_eq!(leaves[1].alias, "Account.Name");
        assert_eq!(leaves[1].qualified_path, "Account.Name");
    }

    #[test]
    fn test_unknown_relationship_segment() {
        let schema = schema();
        let resolver = FieldResolver::new(&schema, 5);
        let err = resolver
            .resolve(&select("SELECT Owner.Name FROM Contact"))
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnknownField {
                field: "Owner".to_string(),
                object: "Contact".to_string()
            }
        );
    }

    #[test]
    fn test_nesting_limit() {
        let schema = SchemaBuilder::new()
            .with_object(
                ObjectDescribe::new("Node")
                    .with_field(FieldDescribe::new("Id", FieldType::Id))
                    .with_child_relationship(ChildRelationship::new("Children", "Node", "ParentId")),
            )
            .build();
        let resolver = FieldResolver::new(&schema, 1);
        assert!(resolver
            .resolve(&select("SELECT Id, (SELECT Id FROM Children) FROM Node"))
            .is_ok());
        assert_eq!(
            resolver
                .resolve(&select(
                    "SELECT Id, (SELECT Id, (SELECT Id FROM Children) FROM Children) FROM Node"
                ))
                .unwrap_err(),
            Error::NestingTooDeep { max: 1 }
        );
    }
}
