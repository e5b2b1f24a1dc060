//! Per-row value expressions.
//!
//! A column's configured value is either a JSON literal or a string that may
//! contain `{{ ... }}` templates. Supported expressions are `$json` followed by
//! an optional path (`$json.user.name`, `$json.items[0]`, `$json["first name"]`)
//! and `$index`, the zero-based row index.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::items::InputItem;
use crate::statement::PreparedStatement;

/// A segment in a `$json` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// A named field (e.g. `user`, `first name`)
    Field(String),
    /// An array index (e.g. `[0]`)
    Index(usize),
}

/// Path into an item's JSON, parsed from the text after `$json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub raw: String,
    pub segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parse the path that follows `$json`, e.g. `.user.tags[1]`
    pub fn parse(path: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let chars: Vec<char> = path.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
                        end += 1;
                    }
                    if end == start {
                        return Err(format!("Empty field name in path '{}'", path));
                    }
                    segments.push(PathSegment::Field(chars[start..end].iter().collect()));
                    i = end;
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|&c| c == ']')
                        .map(|p| p + i)
                        .ok_or_else(|| format!("Unclosed '[' in path '{}'", path))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    segments.push(parse_bracket(&inner, path)?);
                    i = close + 1;
                }
                c => {
                    return Err(format!("Unexpected '{}' in path '{}'", c, path));
                }
            }
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    /// Follow the path through a JSON value
    pub fn lookup<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.segments
            .iter()
            .try_fold(root, |current, segment| match segment {
                PathSegment::Field(name) => current.get(name.as_str()),
                PathSegment::Index(idx) => current.get(*idx),
            })
    }
}

fn parse_bracket(inner: &str, path: &str) -> Result<PathSegment, String> {
    let inner = inner.trim();
    if let Ok(index) = inner.parse::<usize>() {
        return Ok(PathSegment::Index(index));
    }
    for quote in ['"', '\''] {
        if inner.len() >= 2 && inner.starts_with(quote) && inner.ends_with(quote) {
            return Ok(PathSegment::Field(inner[1..inner.len() - 1].to_string()));
        }
    }
    Err(format!("Invalid bracket segment '[{}]' in path '{}'", inner, path))
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$json{}", self.raw)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Json(FieldPath),
    Index,
}

impl Expr {
    fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text == "$index" {
            return Ok(Expr::Index);
        }
        match text.strip_prefix("$json") {
            Some(rest) => Ok(Expr::Json(FieldPath::parse(rest)?)),
            None => Err(format!("Unsupported expression '{}'", text)),
        }
    }

    fn evaluate(&self, item: &Value, row: usize) -> Value {
        match self {
            Expr::Json(path) => path.lookup(item).cloned().unwrap_or(Value::Null),
            Expr::Index => Value::from(row),
        }
    }
}

enum Part<'a> {
    Text(&'a str),
    Expr(&'a str),
}

fn split_template(template: &str) -> Result<Vec<Part<'_>>, String> {
    let mut parts = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            parts.push(Part::Text(&rest[..open]));
        }
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| format!("Unclosed '{{{{' in '{}'", template))?;
        parts.push(Part::Expr(&after[..close]));
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        parts.push(Part::Text(rest));
    }

    Ok(parts)
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Configured value source for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueExpression(Value);

impl ValueExpression {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Check the expression syntax without evaluating it
    pub fn validate(&self) -> Result<(), String> {
        if let Value::String(s) = &self.0 {
            for part in split_template(s.strip_prefix('=').unwrap_or(s))? {
                if let Part::Expr(e) = part {
                    Expr::parse(e)?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate against one item's JSON
    pub fn evaluate(&self, item: &Value, row: usize) -> Result<Value, String> {
        let template = match &self.0 {
            Value::String(s) => s.strip_prefix('=').unwrap_or(s),
            literal => return Ok(literal.clone()),
        };

        let parts = split_template(template)?;
        match parts.as_slice() {
            [Part::Expr(e)] => Ok(Expr::parse(e)?.evaluate(item, row)),
            _ if parts.iter().all(|p| matches!(p, Part::Text(_))) => {
                Ok(Value::String(template.to_string()))
            }
            _ => {
                let mut out = String::new();
                for part in &parts {
                    match part {
                        Part::Text(t) => out.push_str(t),
                        Part::Expr(e) => {
                            out.push_str(&render(&Expr::parse(e)?.evaluate(item, row)))
                        }
                    }
                }
                Ok(Value::String(out))
            }
        }
    }
}

impl From<Value> for ValueExpression {
    fn from(raw: Value) -> Self {
        Self(raw)
    }
}

/// Source of the value for "column i, row j".
///
/// Closures of the right shape implement this directly, which keeps test
/// fixtures short.
pub trait ValueResolver {
    fn resolve(&self, column: usize, row: usize) -> Result<Value, String>;
}

impl<F> ValueResolver for F
where
    F: Fn(usize, usize) -> Result<Value, String>,
{
    fn resolve(&self, column: usize, row: usize) -> Result<Value, String> {
        self(column, row)
    }
}

/// Evaluates each column's [`ValueExpression`] against the input items
pub struct ItemResolver<'a> {
    expressions: Vec<&'a ValueExpression>,
    items: &'a [InputItem],
}

impl<'a> ItemResolver<'a> {
    pub fn new(statement: &'a PreparedStatement, items: &'a [InputItem]) -> Self {
        Self {
            expressions: statement.params().iter().map(|p| &p.column.value).collect(),
            items,
        }
    }
}

impl ValueResolver for ItemResolver<'_> {
    fn resolve(&self, column: usize, row: usize) -> Result<Value, String> {
        let expression = self
            .expressions
            .get(column)
            .ok_or_else(|| format!("No column at position {}", column))?;
        let item = self
            .items
            .get(row)
            .ok_or_else(|| format!("No input item at position {}", row))?;
        expression.evaluate(&item.json, row)
    }
}
