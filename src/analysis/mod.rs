//! Statement analysis
//!
//! Turns parsed statements into what the remote platform understands:
//!
//! 1. [`classifier`] derives the statement kind and expands `SELECT *`
//! 2. [`fields`] resolves select lists into an ordered field tree
//! 3. [`mutation`] turns INSERT/UPDATE/DELETE into record sets, using
//!    [`evaluator`] for computed SET values
//! 4. [`expand`] flattens nested results into tabular rows
//!
//! # Example
//!
//! ```rust
//! use forcesql::analysis::{classify, FieldResolver, StatementKind};
//! use forcesql::schema::{FieldDescribe, FieldType, ObjectDescribe, SchemaBuilder};
//! use forcesql::Statement;
//!
//! let schema = SchemaBuilder::new()
//!     .with_object(
//!         ObjectDescribe::new("Account")
//!             .with_field(FieldDescribe::new("Id", FieldType::Id))
//!             .with_field(FieldDescribe::new("Name", FieldType::String)),
//!     )
//!     .build();
//!
//! let classified = classify("SELECT * FROM Account", &schema).unwrap();
//! assert_eq!(classified.kind, StatementKind::Select);
//! assert_eq!(classified.text, "SELECT Id, Name FROM Account");
//!
//! let Ok(Statement::Select(select)) = classified.statement() else { unreachable!() };
//! let resolved = FieldResolver::new(&schema, 5).resolve(select).unwrap();
//! assert_eq!(resolved.tree.flatten().len(), 2);
//! ```

pub mod classifier;
pub mod evaluator;
pub mod expand;
pub mod fields;
pub mod mutation;

pub use classifier::{
    check_direct_id_where, classify, from_object_name, parse_as, probe, ClassifiedStatement,
    StatementKind,
};
pub use evaluator::{evaluate, Evaluator};
pub use expand::{expand_row, expand_rows, ResultRow, Slot};
pub use fields::{FieldDef, FieldDefTree, FieldNode, FieldResolver, ResolvedSelect};
pub use mutation::{DeletePlan, InsertPlan, MutationAnalyzer, SubSelectResolver, UpdatePlan};
