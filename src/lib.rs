//! Relational statements over a schema-described remote object platform
//!
//! SELECT/INSERT/UPDATE/DELETE and a search dialect are parsed, resolved
//! against remote object descriptions, turned into remote queries or record
//! batches, and their nested results flattened into tabular rows.

pub mod analysis;
pub mod ast;
pub mod cache;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod schema;
pub mod service;
pub mod value;

pub use ast::*;
pub use cache::{Cache, CacheScope, Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DriverConfig};
pub use error::{Error, Result, Warning};
pub use lexer::{tokenize, Lexer, Span, Token, TokenKind};
pub use parser::{parse, ParseError, ParseResult, Parser};
pub use schema::{
    CachingSchemaProvider, ChildRelationship, FieldDescribe, FieldType, InMemorySchema,
    ObjectDescribe, SchemaBuilder, SchemaProvider,
};
pub use service::{
    ColumnDescriptor, Execution, MutationService, QueryService, ResultSet, SaveResult,
    StatementService, UpdateCount,
};
pub use value::{Record, Value};
