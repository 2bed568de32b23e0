//! # Name Formats
//!
//! The label format of templates: literal text with `{field}` placeholders.
//!
//! - `{{` and `}}` are literal braces
//! - `{field:.N}` renders a number field with `N` decimals
//! - any other format spec is rejected

use crate::{CatalogError, Scalar, ScalarKind};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field {
        name: String,
        precision: Option<usize>,
    },
}

/// A parsed name format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFormat {
    segments: Vec<Segment>,
}

fn malformed(format: &str, message: &str) -> CatalogError {
    CatalogError::InvalidOperation(format!("malformed name format {:?}: {}", format, message))
}

impl NameFormat {
    /// Parse a format string.
    pub fn parse(format: &str) -> Result<Self, CatalogError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = format.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(malformed(format, "single '}'")),
                '{' => {
                    let mut placeholder = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(malformed(format, "nested '{'")),
                            Some(c) => placeholder.push(c),
                            None => return Err(malformed(format, "unclosed '{'")),
                        }
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Self::parse_placeholder(format, &placeholder)?);
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    fn parse_placeholder(format: &str, placeholder: &str) -> Result<Segment, CatalogError> {
        let (name, spec) = match placeholder.split_once(':') {
            Some((name, spec)) => (name, Some(spec)),
            None => (placeholder, None),
        };
        if name.is_empty() {
            return Err(malformed(format, "empty placeholder"));
        }
        if name.contains(['.', '[', ']', '!']) {
            return Err(malformed(format, "placeholders name a field directly"));
        }

        let precision = match spec {
            None => None,
            Some(spec) => {
                let digits = spec
                    .strip_prefix('.')
                    .filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()))
                    .ok_or_else(|| malformed(format, "only '.N' precision is supported"))?;
                Some(
                    digits
                        .parse::<usize>()
                        .map_err(|_| malformed(format, "precision out of range"))?,
                )
            }
        };

        Ok(Segment::Field {
            name: name.to_string(),
            precision,
        })
    }

    /// Field names referenced by the format, in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Check every placeholder against a resolved field schema.
    ///
    /// Undefined fields fail with `InvalidOperation`; unit fields, and
    /// precision on anything but numbers, fail with `TypeMismatch`.
    pub fn check(&self, fields: &BTreeMap<String, ScalarKind>) -> Result<(), CatalogError> {
        for segment in &self.segments {
            let Segment::Field { name, precision } = segment else {
                continue;
            };
            let kind = fields.get(name).ok_or_else(|| {
                CatalogError::InvalidOperation(format!(
                    "name format references undefined field {{{}}}",
                    name
                ))
            })?;
            if !kind.is_formattable() {
                return Err(CatalogError::TypeMismatch(format!(
                    "{} fields cannot appear in a name format: {{{}}}",
                    kind, name
                )));
            }
            if precision.is_some() && *kind != ScalarKind::Number {
                return Err(CatalogError::TypeMismatch(format!(
                    "precision needs a number field, {{{}}} is {}",
                    name, kind
                )));
            }
        }
        Ok(())
    }

    /// Render with a record's attributes.
    pub fn render(&self, attributes: &BTreeMap<String, Scalar>) -> Result<String, CatalogError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { name, precision } => {
                    let value = attributes
                        .get(name)
                        .ok_or_else(|| CatalogError::KeyNotFound(name.clone()))?;
                    match (value, precision) {
                        (Scalar::Num(n), Some(p)) => out.push_str(&format!("{:.*}", *p, n.get())),
                        (_, Some(_)) => {
                            return Err(CatalogError::TypeMismatch(format!(
                                "precision needs a number, {} is {}",
                                name,
                                value.kind()
                            )));
                        }
                        (value, None) => out.push_str(&value.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }
}
