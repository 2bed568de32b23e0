//! # Query Module
//!
//! The item filter language.
//!
//! ```text
//! Expr   := Term (('&' | '|') Term)*
//! Term   := Lookup | '(' Expr ')'
//! Lookup := Key Comparator Value        Comparator: = < > <= >=
//! ```
//!
//! - Operators have no precedence: `A & B | C` is `(A & B) | C` and
//!   `A | B & C` is `(A | B) & C`, folded left as they appear
//! - `\` escapes the next character; unescaped whitespace around keys and
//!   values is trimmed
//! - The key ends at the first unescaped comparator; the value may contain
//!   further comparator characters
//! - A value that parses as a number only matches number attributes,
//!   anything else is a string lookup

use crate::primitives::{MAX_QUERY_LENGTH, MAX_QUERY_NESTING};
use crate::store::CatalogStore;
use crate::values::ValueStore;
use crate::{CatalogError, Comparator, ItemId, Scalar, ScalarKind};
use serde::Serialize;
use std::collections::BTreeSet;

// =============================================================================
// SYNTAX TREE
// =============================================================================

/// One `key <comparator> value` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub key: String,
    pub comparator: Comparator,
    pub value: Scalar,
}

/// Combinator between two terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `&`: intersection
    And,
    /// `|`: union
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Lookup(Lookup),
    Group(Box<Expr>),
}

/// A term followed by operator/term pairs, evaluated left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub first: Term,
    pub rest: Vec<(Operator, Term)>,
}

/// A parsed filter. The empty filter matches every item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    expr: Option<Expr>,
}

/// Items matched by a filter, plus the attribute keys it referenced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterResult {
    pub items: BTreeSet<ItemId>,
    pub used_keys: BTreeSet<String>,
}

// =============================================================================
// PARSER
// =============================================================================

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn error(offset: usize, message: &str) -> CatalogError {
        CatalogError::QuerySyntax {
            offset,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, CatalogError> {
        let first = self.parse_term()?;
        let mut rest = Vec::new();

        loop {
            self.skip_whitespace();
            let operator = match self.peek() {
                None if self.depth > 0 => return Err(Self::error(self.pos, "missing ')'")),
                None => break,
                Some(')') if self.depth == 0 => return Err(Self::error(self.pos, "unexpected ')'")),
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                Some('&') => Operator::And,
                Some('|') => Operator::Or,
                Some(_) => return Err(Self::error(self.pos, "expected '&', '|' or ')'")),
            };
            self.pos += 1;
            rest.push((operator, self.parse_term()?));
        }

        Ok(Expr { first, rest })
    }

    fn parse_term(&mut self) -> Result<Term, CatalogError> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                self.depth += 1;
                if self.depth > MAX_QUERY_NESTING {
                    return Err(Self::error(self.pos - 1, "brackets nested too deeply"));
                }
                self.skip_whitespace();
                if self.peek() == Some(')') {
                    return Err(Self::error(self.pos, "empty brackets"));
                }
                let expr = self.parse_expr()?;
                self.depth -= 1;
                Ok(Term::Group(Box::new(expr)))
            }
            None | Some('&' | '|' | ')') => Err(Self::error(self.pos, "expected a lookup")),
            Some(_) => self.parse_lookup().map(Term::Lookup),
        }
    }

    fn parse_lookup(&mut self) -> Result<Lookup, CatalogError> {
        let start = self.pos;
        // (character, escaped)
        let mut token: Vec<(char, bool)> = Vec::new();

        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.pos += 1;
                    let Some(escaped) = self.peek() else {
                        return Err(Self::error(self.pos - 1, "dangling '\\'"));
                    };
                    token.push((escaped, true));
                }
                '&' | '|' | ')' => break,
                '(' => return Err(Self::error(self.pos, "unexpected '('")),
                c => token.push((c, false)),
            }
            self.pos += 1;
        }

        let is_comparator = |(c, escaped): &(char, bool)| !escaped && matches!(c, '<' | '>' | '=');
        let Some(at) = token.iter().position(is_comparator) else {
            return Err(Self::error(start, "missing comparator"));
        };
        let followed_by_eq = matches!(token.get(at + 1), Some(('=', false)));
        let (comparator, width) = match token[at].0 {
            '<' if followed_by_eq => (Comparator::Le, 2),
            '>' if followed_by_eq => (Comparator::Ge, 2),
            '<' => (Comparator::Lt, 1),
            '>' => (Comparator::Gt, 1),
            _ => (Comparator::Eq, 1),
        };

        let key = trimmed(&token[..at]);
        if key.is_empty() {
            return Err(Self::error(start, "missing key"));
        }
        let value = trimmed(&token[at + width..]);
        if value.is_empty() {
            return Err(Self::error(self.pos, "missing value"));
        }

        let value = ValueStore::convert(ScalarKind::Number, &value)
            .unwrap_or_else(|_| Scalar::Str(value));
        Ok(Lookup {
            key,
            comparator,
            value,
        })
    }
}

/// Collect a token, dropping unescaped whitespace at both ends.
fn trimmed(token: &[(char, bool)]) -> String {
    let is_space = |(c, escaped): &(char, bool)| !escaped && c.is_whitespace();
    let start = token.iter().position(|t| !is_space(t)).unwrap_or(token.len());
    let end = token.iter().rposition(|t| !is_space(t)).map_or(start, |i| i + 1);
    token[start..end].iter().map(|(c, _)| *c).collect()
}

// =============================================================================
// EVALUATION
// =============================================================================

fn evaluate_expr<S: CatalogStore + ?Sized>(
    store: &S,
    expr: &Expr,
) -> Result<BTreeSet<ItemId>, CatalogError> {
    let mut matched = evaluate_term(store, &expr.first)?;
    for (operator, term) in &expr.rest {
        let next = evaluate_term(store, term)?;
        matched = match operator {
            Operator::And => matched.intersection(&next).copied().collect(),
            Operator::Or => {
                matched.extend(next);
                matched
            }
        };
    }
    Ok(matched)
}

fn evaluate_term<S: CatalogStore + ?Sized>(
    store: &S,
    term: &Term,
) -> Result<BTreeSet<ItemId>, CatalogError> {
    match term {
        Term::Lookup(lookup) => {
            ValueStore::lookup(store, &lookup.key, lookup.comparator, &lookup.value)
        }
        Term::Group(expr) => evaluate_expr(store, expr),
    }
}

fn collect_keys(expr: &Expr, keys: &mut BTreeSet<String>) {
    for term in std::iter::once(&expr.first).chain(expr.rest.iter().map(|(_, t)| t)) {
        match term {
            Term::Lookup(lookup) => {
                keys.insert(lookup.key.clone());
            }
            Term::Group(inner) => collect_keys(inner, keys),
        }
    }
}

impl Query {
    /// Parse a filter expression.
    pub fn parse(input: &str) -> Result<Self, CatalogError> {
        let chars: Vec<char> = input.chars().collect();
        if chars.len() > MAX_QUERY_LENGTH {
            return Err(CatalogError::InvalidArgument(format!(
                "queries are limited to {} characters",
                MAX_QUERY_LENGTH
            )));
        }
        if chars.iter().all(|c| c.is_whitespace()) {
            return Ok(Self::default());
        }

        let mut parser = Parser {
            chars,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_expr()?;
        Ok(Self { expr: Some(expr) })
    }

    /// Whether this filter matches every item.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.expr.is_none()
    }

    /// The syntax tree, `None` for the empty filter.
    #[must_use]
    pub const fn expr(&self) -> Option<&Expr> {
        self.expr.as_ref()
    }

    /// Every attribute key referenced anywhere in the filter.
    #[must_use]
    pub fn used_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        if let Some(expr) = &self.expr {
            collect_keys(expr, &mut keys);
        }
        keys
    }

    /// Ids of the matching items.
    pub fn evaluate<S: CatalogStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<BTreeSet<ItemId>, CatalogError> {
        match &self.expr {
            None => Ok(store.items()?.into_iter().map(|item| item.id).collect()),
            Some(expr) => evaluate_expr(store, expr),
        }
    }

    /// Matching items plus the referenced keys.
    pub fn filter<S: CatalogStore + ?Sized>(&self, store: &S) -> Result<FilterResult, CatalogError> {
        Ok(FilterResult {
            items: self.evaluate(store)?,
            used_keys: self.used_keys(),
        })
    }
}

/// Parse `input` and filter the items of `store` with it.
pub fn filter_items<S: CatalogStore + ?Sized>(
    store: &S,
    input: &str,
) -> Result<FilterResult, CatalogError> {
    Query::parse(input)?.filter(store)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn single(input: &str) -> Lookup {
        let query = Query::parse(input).expect("parse");
        let Some(Expr { first: Term::Lookup(lookup), rest }) = query.expr().cloned() else {
            panic!("expected a single lookup in {input:?}");
        };
        assert!(rest.is_empty());
        lookup
    }

    fn syntax_error(input: &str) -> usize {
        match Query::parse(input) {
            Err(CatalogError::QuerySyntax { offset, .. }) => offset,
            other => panic!("expected a syntax error for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn number_and_string_values() {
        let lookup = single("resistance=220");
        assert_eq!(lookup.key, "resistance");
        assert_eq!(lookup.comparator, Comparator::Eq);
        assert_eq!(lookup.value, Scalar::number(220.0).expect("finite"));

        let lookup = single("package = SMD 0805 ");
        assert_eq!(lookup.key, "package");
        assert_eq!(lookup.value, Scalar::string("SMD 0805"));
    }

    #[test]
    fn two_character_comparators() {
        assert_eq!(single("a<=1").comparator, Comparator::Le);
        assert_eq!(single("a>=1").comparator, Comparator::Ge);
        assert_eq!(single("a<1").comparator, Comparator::Lt);
        assert_eq!(single("a>1").comparator, Comparator::Gt);
    }

    #[test]
    fn value_keeps_later_comparators() {
        let lookup = single("formula=a<b");
        assert_eq!(lookup.key, "formula");
        assert_eq!(lookup.value, Scalar::string("a<b"));
    }

    #[test]
    fn escapes() {
        let lookup = single(r"k\=v=1");
        assert_eq!(lookup.key, "k=v");
        assert_eq!(lookup.value, Scalar::number(1.0).expect("finite"));

        let lookup = single(r"name=a\&b\|c\(d\)");
        assert_eq!(lookup.value, Scalar::string("a&b|c(d)"));

        // Escaped whitespace survives trimming.
        let lookup = single(r"name=\ x\ ");
        assert_eq!(lookup.value, Scalar::string(" x "));
    }

    #[test]
    fn commas_are_plain_text() {
        let lookup = single("note=a, b");
        assert_eq!(lookup.value, Scalar::string("a, b"));
    }

    #[test]
    fn empty_query() {
        assert!(Query::parse("").expect("parse").is_empty());
        assert!(Query::parse("   ").expect("parse").is_empty());
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(syntax_error("resistance"), 0);
        assert_eq!(syntax_error("=1"), 0);
        syntax_error("a=");
        syntax_error("a=1&");
        syntax_error("a=1|");
        syntax_error("&a=1");
        syntax_error("()");
        assert_eq!(syntax_error("(a=1"), 4);
        assert_eq!(syntax_error("a=1)"), 3);
        syntax_error("(a=1) b=2");
        syntax_error("a=1 (b=2)");
        syntax_error(r"a=1\");
    }

    #[test]
    fn nesting_limit() {
        let deep = format!("{}a=1{}", "(".repeat(65), ")".repeat(65));
        syntax_error(&deep);
        let ok = format!("{}a=1{}", "(".repeat(64), ")".repeat(64));
        assert!(Query::parse(&ok).is_ok());
    }

    #[test]
    fn length_limit() {
        let long = format!("a={}", "x".repeat(MAX_QUERY_LENGTH));
        assert!(matches!(
            Query::parse(&long),
            Err(CatalogError::InvalidArgument(_))
        ));
    }

    #[test]
    fn used_keys_cover_groups() {
        let query = Query::parse("(a=1|b=2)&c=x").expect("parse");
        let keys: Vec<String> = query.used_keys().into_iter().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn operators_fold_left() {
        let query = Query::parse("a=1|b=2&c=3").expect("parse");
        let expr = query.expr().expect("expr");
        assert!(matches!(expr.first, Term::Lookup(_)));
        let ops: Vec<Operator> = expr.rest.iter().map(|(op, _)| *op).collect();
        assert_eq!(ops, vec![Operator::Or, Operator::And]);
    }
}
