//! OData `$filter` expression tree, serializer, and parser.
//!
//! Filters are built as a list of [`FilterClause`]s rather than by string
//! concatenation. [`render`] is the only place that turns the tree into
//! wire text, so literal escaping and operator spelling live in one spot.
//!
//! [`parse_filter`] reads the same subset back. It is used to validate
//! caller-supplied raw filter expressions against the known fields of an
//! entity set before anything is sent upstream.
//!
//! # Structure
//!
//! A clause sequence renders as `c0 <comb0> c1 <comb1> c2 ...`; the
//! combinator on the final clause is unused and kept at [`Combinator::And`].
//! The builder only emits sequences whose combinators are uniform, and
//! mixed `and`/`or` input is parsed into explicit groups, so
//! `parse_filter(render(x)) == x` for every tree the builder produces.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{CatalogError, Result};
use crate::models::EntitySet;

/// Comparison operators supported by the catalog service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Contains => "contains",
        }
    }

    /// Infix operator keyword as written in a filter expression.
    fn from_infix(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "eq" => Some(Operator::Eq),
            "ne" => Some(Operator::Ne),
            "gt" => Some(Operator::Gt),
            "ge" => Some(Operator::Ge),
            "lt" => Some(Operator::Lt),
            "le" => Some(Operator::Le),
            _ => None,
        }
    }

    /// Map a tool-level version comparator onto an OData operator.
    ///
    /// `eq→eq`, `gte→ge`, `gt→gt`, `lte→le`, `lt→lt`. The OData spellings
    /// `ge` and `le` are accepted as aliases.
    pub fn from_comparator(comparator: &str) -> Result<Self> {
        match comparator.trim().to_ascii_lowercase().as_str() {
            "eq" => Ok(Operator::Eq),
            "gte" | "ge" => Ok(Operator::Ge),
            "gt" => Ok(Operator::Gt),
            "lte" | "le" => Ok(Operator::Le),
            "lt" => Ok(Operator::Lt),
            other => Err(CatalogError::validation(format!(
                "unknown comparator '{}': use eq, gte, gt, lte, or lt",
                other
            ))),
        }
    }
}

/// How a clause joins the clause after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    fn as_str(&self) -> &'static str {
        match self {
            Combinator::And => "and",
            Combinator::Or => "or",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// Rendered quoted, with embedded quotes doubled.
    Text(String),
    /// Rendered as an unquoted `datetimeoffset` literal.
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Compare {
        field: String,
        operator: Operator,
        value: Literal,
    },
    /// A parenthesized sub-sequence.
    Group(Vec<FilterClause>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterClause {
    pub predicate: Predicate,
    pub combinator: Combinator,
}

impl FilterClause {
    pub fn compare(field: impl Into<String>, operator: Operator, value: Literal) -> Self {
        Self {
            predicate: Predicate::Compare {
                field: field.into(),
                operator,
                value,
            },
            combinator: Combinator::And,
        }
    }

    /// `field eq 'value'`
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, Operator::Eq, Literal::Text(value.into()))
    }

    /// `contains(field,'value')`
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, Operator::Contains, Literal::Text(value.into()))
    }

    pub fn group(clauses: Vec<FilterClause>) -> Self {
        Self {
            predicate: Predicate::Group(clauses),
            combinator: Combinator::And,
        }
    }
}

/// Join predicates with a single combinator, producing a canonical sequence.
pub fn join(predicates: Vec<Predicate>, combinator: Combinator) -> Vec<FilterClause> {
    let last = predicates.len().saturating_sub(1);
    predicates
        .into_iter()
        .enumerate()
        .map(|(i, predicate)| FilterClause {
            predicate,
            combinator: if i == last {
                Combinator::And
            } else {
                combinator
            },
        })
        .collect()
}

/// Double embedded single quotes so the value is read as one literal.
///
/// `O'Brien` becomes `O''Brien`.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Serialize a clause sequence to `$filter` text.
pub fn render(clauses: &[FilterClause]) -> String {
    let mut out = String::new();
    render_into(clauses, &mut out);
    out
}

fn render_into(clauses: &[FilterClause], out: &mut String) {
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            out.push(' ');
            out.push_str(clauses[i - 1].combinator.as_str());
            out.push(' ');
        }
        match &clause.predicate {
            Predicate::Compare {
                field,
                operator: Operator::Contains,
                value,
            } => {
                out.push_str("contains(");
                out.push_str(field);
                out.push(',');
                render_literal(value, out);
                out.push(')');
            }
            Predicate::Compare {
                field,
                operator,
                value,
            } => {
                out.push_str(field);
                out.push(' ');
                out.push_str(operator.as_str());
                out.push(' ');
                render_literal(value, out);
            }
            Predicate::Group(inner) => {
                out.push('(');
                render_into(inner, out);
                out.push(')');
            }
        }
    }
}

fn render_literal(value: &Literal, out: &mut String) {
    match value {
        Literal::Text(text) => {
            out.push('\'');
            out.push_str(&escape_literal(text));
            out.push('\'');
        }
        Literal::Timestamp(ts) => out.push_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    }
}

// ============ Parser ============

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    Word(String),
    Text(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            text.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => text.push(ch),
                        None => {
                            return Err(CatalogError::validation(
                                "unterminated string literal in filter",
                            ))
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | ',' | '\'') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    entity_set: EntitySet,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            _ => Err(CatalogError::validation(format!(
                "malformed filter: expected {}",
                what
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Vec<FilterClause>> {
        let mut terms = vec![self.parse_and()?];
        while self.peek_keyword("or") {
            self.next();
            terms.push(self.parse_and()?);
        }
        if terms.len() == 1 {
            return Ok(terms.remove(0));
        }
        let predicates = terms
            .into_iter()
            .map(|mut term| {
                if term.len() == 1 {
                    term.remove(0).predicate
                } else {
                    Predicate::Group(term)
                }
            })
            .collect();
        Ok(join(predicates, Combinator::Or))
    }

    fn parse_and(&mut self) -> Result<Vec<FilterClause>> {
        let mut predicates = vec![self.parse_primary()?];
        while self.peek_keyword("and") {
            self.next();
            predicates.push(self.parse_primary()?);
        }
        Ok(join(predicates, Combinator::And))
    }

    fn parse_primary(&mut self) -> Result<Predicate> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Predicate::Group(inner))
            }
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("contains") => {
                self.expect(Token::LParen, "'(' after contains")?;
                let field = self.parse_field()?;
                self.expect(Token::Comma, "',' in contains()")?;
                let value = self.parse_literal()?;
                self.expect(Token::RParen, "')' closing contains()")?;
                Ok(Predicate::Compare {
                    field,
                    operator: Operator::Contains,
                    value,
                })
            }
            Some(Token::Word(word)) => {
                let field = self.check_field(word)?;
                let operator = match self.next() {
                    Some(Token::Word(op)) => Operator::from_infix(&op).ok_or_else(|| {
                        CatalogError::validation(format!("unknown operator '{}'", op))
                    })?,
                    _ => {
                        return Err(CatalogError::validation(format!(
                            "malformed filter: expected an operator after '{}'",
                            field
                        )))
                    }
                };
                let value = self.parse_literal()?;
                Ok(Predicate::Compare {
                    field,
                    operator,
                    value,
                })
            }
            _ => Err(CatalogError::validation(
                "malformed filter: expected a comparison or '('",
            )),
        }
    }

    fn parse_field(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Word(word)) => self.check_field(word),
            _ => Err(CatalogError::validation(
                "malformed filter: expected a field name",
            )),
        }
    }

    fn check_field(&self, field: String) -> Result<String> {
        if self.entity_set.has_field(&field) {
            Ok(field)
        } else {
            Err(CatalogError::validation(format!(
                "unknown field '{}' for {}",
                field, self.entity_set
            )))
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        match self.next() {
            Some(Token::Text(text)) => Ok(Literal::Text(text)),
            Some(Token::Word(word)) => DateTime::parse_from_rfc3339(&word)
                .map(|dt| Literal::Timestamp(dt.with_timezone(&Utc)))
                .map_err(|_| {
                    CatalogError::validation(format!("unsupported literal '{}' in filter", word))
                }),
            _ => Err(CatalogError::validation(
                "malformed filter: expected a literal value",
            )),
        }
    }
}

/// Parse a `$filter` expression into clauses, validating every field name
/// against `entity_set`.
///
/// Supports `eq`, `ne`, `gt`, `ge`, `lt`, `le`, `contains(...)`, `and`,
/// `or`, and parentheses. Anything else is a [`CatalogError::Validation`].
pub fn parse_filter(input: &str, entity_set: EntitySet) -> Result<Vec<FilterClause>> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(CatalogError::validation("filter expression is empty"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        entity_set,
    };
    let clauses = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(CatalogError::validation(
            "malformed filter: unexpected trailing input",
        ));
    }
    Ok(clauses)
}
