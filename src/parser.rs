use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

use crate::ast::*;
use crate::lexer::{Lexer, Span, Token, TokenKind};
use crate::value::parse_timestamp;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token: expected {expected}, found {found} at {span:?}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Invalid {kind} literal '{text}' at {span:?}")]
    InvalidLiteral {
        kind: String,
        text: String,
        span: Span,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    /// Ordinal handed to the next `?`
    next_parameter: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            next_parameter: 1,
        }
    }

    /// Parse exactly one statement, optionally terminated by `;`
    pub fn parse_statement(&mut self) -> ParseResult<Statement> {
        let statement = match &self.current.kind {
            TokenKind::Select => Statement::Select(self.parse_select()?),
            TokenKind::Insert => Statement::Insert(self.parse_insert()?),
            TokenKind::Update => Statement::Update(self.parse_update()?),
            TokenKind::Delete => Statement::Delete(self.parse_delete()?),
            TokenKind::Find => Statement::Search(self.parse_search()?),
            _ => return Err(self.unexpected("SELECT, INSERT, UPDATE, DELETE or FIND")),
        };
        self.match_token(&TokenKind::Semicolon);
        if !self.is_at_end() {
            return Err(self.unexpected("end of statement"));
        }
        Ok(statement)
    }

    // ==================== Helper Methods ====================

    fn is_at_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        std::mem::replace(&mut self.current, self.lexer.next_token())
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    fn consume(&mut self, kind: &TokenKind, expected: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        if self.is_at_end() {
            return ParseError::UnexpectedEof;
        }
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.current.kind.to_string(),
            span: self.current.span,
        }
    }

    fn current_identifier_is(&self, word: &str) -> bool {
        matches!(&self.current.kind, TokenKind::Identifier(s) if s.eq_ignore_ascii_case(word))
    }

    /// Parse a name, where a few clause keywords are also legal object or
    /// field names
    fn parse_identifier(&mut self) -> ParseResult<String> {
        let name = match &self.current.kind {
            TokenKind::Identifier(name) => name.clone(),
            TokenKind::Order => "Order".to_string(),
            TokenKind::Group => "Group".to_string(),
            TokenKind::Limit => "Limit".to_string(),
            TokenKind::Offset => "Offset".to_string(),
            TokenKind::First => "First".to_string(),
            TokenKind::Last => "Last".to_string(),
            TokenKind::Nulls => "Nulls".to_string(),
            _ => return Err(self.unexpected("identifier")),
        };
        self.advance();
        Ok(name)
    }

    /// Parse a dotted path like `Name` or `Account.Owner.Name`
    fn parse_path(&mut self) -> ParseResult<String> {
        let mut path = self.parse_identifier()?;
        while self.match_token(&TokenKind::Dot) {
            path.push('.');
            path.push_str(&self.parse_identifier()?);
        }
        Ok(path)
    }

    /// Optional alias after a select item or FROM object: `AS x` or a bare name
    fn parse_optional_alias(&mut self) -> ParseResult<Option<String>> {
        if self.match_token(&TokenKind::As) {
            return self.parse_identifier().map(Some);
        }
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            return Ok(Some(name));
        }
        Ok(None)
    }

    // ==================== Statements ====================

    fn parse_select(&mut self) -> ParseResult<SelectStatement> {
        self.consume(&TokenKind::Select, "SELECT")?;
        let items = self.parse_select_items()?;

        self.consume(&TokenKind::From, "FROM")?;
        let name = self.parse_identifier()?;
        let alias = self.parse_optional_alias()?;

        let where_clause = if self.match_token(&TokenKind::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let group_by = if self.match_token(&TokenKind::Group) {
            self.consume(&TokenKind::By, "BY")?;
            self.parse_expression_list()?
        } else {
            Vec::new()
        };

        let having = if self.match_token(&TokenKind::Having) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let order_by = if self.match_token(&TokenKind::Order) {
            self.consume(&TokenKind::By, "BY")?;
            self.parse_order_by_items()?
        } else {
            Vec::new()
        };

        let limit = if self.match_token(&TokenKind::Limit) {
            Some(self.parse_additive()?)
        } else {
            None
        };

        let offset = if self.match_token(&TokenKind::Offset) {
            Some(self.parse_additive()?)
        } else {
            None
        };

        Ok(SelectStatement {
            items,
            from: FromItem { name, alias },
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_select_items(&mut self) -> ParseResult<Vec<SelectItem>> {
        let mut items = Vec::new();
        loop {
            if self.match_token(&TokenKind::Star) {
                items.push(SelectItem::Wildcard);
            } else if self.check(&TokenKind::LParen)
                && matches!(self.lexer.peek().kind, TokenKind::Select)
            {
                // Child relationship subquery
                self.advance();
                let subquery = self.parse_select()?;
                self.consume(&TokenKind::RParen, ")")?;
                items.push(SelectItem::SubQuery(Box::new(subquery)));
            } else {
                let expr = self.parse_expression()?;
                let alias = self.parse_optional_alias()?;
                items.push(SelectItem::Expr { expr, alias });
            }

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_order_by_items(&mut self) -> ParseResult<Vec<OrderByItem>> {
        let mut items = Vec::new();
        loop {
            let expr = self.parse_expression()?;
            let ascending = if self.match_token(&TokenKind::Desc) {
                false
            } else {
                self.match_token(&TokenKind::Asc);
                true
            };

            let nulls_first = if self.match_token(&TokenKind::Nulls) {
                if self.match_token(&TokenKind::First) {
                    Some(true)
                } else if self.match_token(&TokenKind::Last) {
                    Some(false)
                } else {
                    return Err(self.unexpected("FIRST or LAST"));
                }
            } else {
                None
            };

            items.push(OrderByItem {
                expr,
                ascending,
                nulls_first,
            });

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_insert(&mut self) -> ParseResult<InsertStatement> {
        self.consume(&TokenKind::Insert, "INSERT")?;
        self.consume(&TokenKind::Into, "INTO")?;
        let table = self.parse_identifier()?;

        let mut columns = Vec::new();
        if self.match_token(&TokenKind::LParen) {
            loop {
                columns.push(self.parse_path()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            self.consume(&TokenKind::RParen, ")")?;
        }

        let source = if self.match_token(&TokenKind::Values) {
            let mut rows = Vec::new();
            loop {
                self.consume(&TokenKind::LParen, "(")?;
                rows.push(self.parse_expression_list()?);
                self.consume(&TokenKind::RParen, ")")?;
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else if self.check(&TokenKind::Select) {
            InsertSource::Select(Box::new(self.parse_select()?))
        } else if self.match_token(&TokenKind::LParen) {
            let select = self.parse_select()?;
            self.consume(&TokenKind::RParen, ")")?;
            InsertSource::Select(Box::new(select))
        } else {
            return Err(self.unexpected("VALUES or SELECT"));
        };

        Ok(InsertStatement {
            table,
            columns,
            source,
        })
    }

    fn parse_update(&mut self) -> ParseResult<UpdateStatement> {
        self.consume(&TokenKind::Update, "UPDATE")?;
        let table = self.parse_identifier()?;
        self.consume(&TokenKind::Set, "SET")?;

        let mut assignments = Vec::new();
        loop {
            let column = self.parse_path()?;
            self.consume(&TokenKind::Eq, "=")?;
            let value = self.parse_expression()?;
            assignments.push(Assignment { column, value });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        let where_clause = if self.match_token(&TokenKind::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(UpdateStatement {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> ParseResult<DeleteStatement> {
        self.consume(&TokenKind::Delete, "DELETE")?;
        self.consume(&TokenKind::From, "FROM")?;
        let table = self.parse_identifier()?;
        let where_clause = if self.match_token(&TokenKind::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(DeleteStatement {
            table,
            where_clause,
        })
    }

    // ==================== Search ====================

    fn parse_search(&mut self) -> ParseResult<SearchStatement> {
        self.consume(&TokenKind::Find, "FIND")?;

        let (term, braced) = match &self.current.kind {
            TokenKind::SearchTerm(s) => (s.clone(), true),
            TokenKind::StringLiteral(s) => (s.clone(), false),
            _ => return Err(self.unexpected("search term")),
        };
        self.advance();

        let search_group = if self.match_token(&TokenKind::In) {
            Some(self.parse_search_group()?)
        } else {
            None
        };

        let returning = if self.match_token(&TokenKind::Returning) {
            self.parse_search_returning()?
        } else {
            Vec::new()
        };

        let limit = if self.match_token(&TokenKind::Limit) {
            Some(self.parse_additive()?)
        } else {
            None
        };

        Ok(SearchStatement {
            term,
            braced,
            search_group,
            returning,
            limit,
        })
    }

    fn parse_search_group(&mut self) -> ParseResult<SearchGroup> {
        let group = match &self.current.kind {
            TokenKind::Identifier(s) => match s.to_ascii_lowercase().as_str() {
                "all" => SearchGroup::AllFields,
                "name" => SearchGroup::NameFields,
                "email" => SearchGroup::EmailFields,
                "phone" => SearchGroup::PhoneFields,
                "sidebar" => SearchGroup::SidebarFields,
                _ => return Err(self.unexpected("ALL, NAME, EMAIL, PHONE or SIDEBAR")),
            },
            _ => return Err(self.unexpected("search group")),
        };
        self.advance();
        if !self.current_identifier_is("fields") {
            return Err(self.unexpected("FIELDS"));
        }
        self.advance();
        Ok(group)
    }

    fn parse_search_returning(&mut self) -> ParseResult<Vec<SearchReturning>> {
        let mut returning = Vec::new();
        loop {
            let object = self.parse_identifier()?;
            let mut fields = Vec::new();
            let mut where_clause = None;
            let mut order_by = Vec::new();
            let mut limit = None;

            if self.match_token(&TokenKind::LParen) {
                loop {
                    fields.push(self.parse_path()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                if self.match_token(&TokenKind::Where) {
                    where_clause = Some(self.parse_expression()?);
                }
                if self.match_token(&TokenKind::Order) {
                    self.consume(&TokenKind::By, "BY")?;
                    order_by = self.parse_order_by_items()?;
                }
                if self.match_token(&TokenKind::Limit) {
                    match self.current.kind {
                        TokenKind::IntegerLiteral(n) => {
                            self.advance();
                            limit = Some(n);
                        }
                        _ => return Err(self.unexpected("integer")),
                    }
                }
                self.consume(&TokenKind::RParen, ")")?;
            }

            returning.push(SearchReturning {
                object,
                fields,
                where_clause,
                order_by,
                limit,
            });

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(returning)
    }

    // ==================== Expressions ====================

    fn parse_expression_list(&mut self) -> ParseResult<Vec<Expression>> {
        let mut list = Vec::new();
        loop {
            list.push(self.parse_expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(list)
    }

    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_and()?;
        while self.match_token(&TokenKind::Or) {
            let right = self.parse_and()?;
            left = binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_not()?;
        while self.match_token(&TokenKind::And) {
            let right = self.parse_not()?;
            left = binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expression> {
        if self.match_token(&TokenKind::Not) {
            let operand = self.parse_not()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let left = self.parse_additive()?;

        let op = match self.current.kind {
            TokenKind::Eq => Some(BinaryOp::Eq),
            TokenKind::NotEq | TokenKind::LtGt => Some(BinaryOp::NotEq),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::LtEq => Some(BinaryOp::LtEq),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::GtEq => Some(BinaryOp::GtEq),
            TokenKind::Like => Some(BinaryOp::Like),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(binary(left, op, right));
        }

        if self.match_token(&TokenKind::Is) {
            let negated = self.match_token(&TokenKind::Not);
            self.consume(&TokenKind::Null, "NULL")?;
            return Ok(Expression::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = if self.check(&TokenKind::Not) && matches!(self.lexer.peek().kind, TokenKind::In)
        {
            self.advance();
            true
        } else {
            false
        };
        if self.match_token(&TokenKind::In) {
            self.consume(&TokenKind::LParen, "(")?;
            let expr = if self.check(&TokenKind::Select) {
                let subquery = self.parse_select()?;
                Expression::InSubquery {
                    expr: Box::new(left),
                    subquery: Box::new(subquery),
                    negated,
                }
            } else {
                Expression::InList {
                    expr: Box::new(left),
                    list: self.parse_expression_list()?,
                    negated,
                }
            };
            self.consume(&TokenKind::RParen, ")")?;
            return Ok(expr);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinaryOp::Plus,
                TokenKind::Minus => BinaryOp::Minus,
                TokenKind::Concat => BinaryOp::Concat,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        if self.match_token(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Minus,
                operand: Box::new(operand),
            });
        }
        if self.match_token(&TokenKind::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let span = self.current.span;
        let next_is_string = matches!(self.lexer.peek().kind, TokenKind::StringLiteral(_));
        match &self.current.kind {
            TokenKind::Null => {
                self.advance();
                Ok(Expression::Null)
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::Boolean(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::Boolean(false))
            }
            TokenKind::IntegerLiteral(n) => {
                let n = *n;
                self.advance();
                Ok(Expression::Integer(n))
            }
            TokenKind::DoubleLiteral(d) => {
                let d = *d;
                self.advance();
                Ok(Expression::Double(d))
            }
            TokenKind::StringLiteral(s) => {
                let s = s.clone();
                self.advance();
                Ok(Expression::String(s))
            }
            TokenKind::Question => {
                self.advance();
                let ordinal = self.next_parameter;
                self.next_parameter += 1;
                Ok(Expression::Parameter(ordinal))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = if self.check(&TokenKind::Select) {
                    Expression::SubQuery(Box::new(self.parse_select()?))
                } else {
                    Expression::Nested(Box::new(self.parse_expression()?))
                };
                self.consume(&TokenKind::RParen, ")")?;
                Ok(expr)
            }
            TokenKind::Identifier(word) if next_is_string && is_typed_literal_keyword(word) => {
                let kind = word.to_ascii_uppercase();
                self.advance();
                let text = match self.advance().kind {
                    TokenKind::StringLiteral(text) => text,
                    other => {
                        return Err(ParseError::UnexpectedToken {
                            expected: "string literal".to_string(),
                            found: other.to_string(),
                            span,
                        })
                    }
                };
                typed_literal(&kind, &text, span)
            }
            _ => self.parse_column_or_call(),
        }
    }

    fn parse_column_or_call(&mut self) -> ParseResult<Expression> {
        let name = self.parse_identifier()?;

        if self.match_token(&TokenKind::LParen) {
            let args = if self.check(&TokenKind::RParen) {
                Vec::new()
            } else {
                self.parse_expression_list()?
            };
            self.consume(&TokenKind::RParen, ")")?;
            return Ok(Expression::Function { name, args });
        }

        if !self.check(&TokenKind::Dot)
            && (name.eq_ignore_ascii_case("current_date")
                || name.eq_ignore_ascii_case("current_timestamp"))
        {
            return Ok(Expression::Function {
                name: name.to_ascii_uppercase(),
                args: Vec::new(),
            });
        }

        let mut path = name;
        while self.match_token(&TokenKind::Dot) {
            path.push('.');
            path.push_str(&self.parse_identifier()?);
        }
        Ok(Expression::Column(path))
    }
}

fn binary(left: Expression, op: BinaryOp, right: Expression) -> Expression {
    Expression::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

fn is_typed_literal_keyword(word: &str) -> bool {
    ["date", "time", "timestamp"]
        .iter()
        .any(|k| word.eq_ignore_ascii_case(k))
}

fn typed_literal(kind: &str, text: &str, span: Span) -> ParseResult<Expression> {
    let parsed = match kind {
        "DATE" => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(Expression::Date),
        "TIME" => NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .ok()
            .map(Expression::Time),
        _ => parse_timestamp(text).map(Expression::Timestamp),
    };
    parsed.ok_or_else(|| ParseError::InvalidLiteral {
        kind: kind.to_string(),
        text: text.to_string(),
        span,
    })
}

/// Parse statement text into a single statement
pub fn parse(source: &str) -> ParseResult<Statement> {
    let mut parser = Parser::new(source);
    parser.parse_statement()
}
