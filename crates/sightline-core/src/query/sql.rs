//! Parameterized SQL fragments
//!
//! A [`Sql`] is a sequence of literal text and bound values. Fragments are
//! composed freely and only numbered (`$1`, `$2`, ...) when rendered, so a
//! predicate can be built once and embedded anywhere in a larger query.
//! Values never become part of the SQL text.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::{Query, QueryScalar};
use sqlx::Postgres;
use uuid::Uuid;

/// A value bound to a placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// `text`
    Text(String),
    /// `text[]`
    TextArray(Vec<String>),
    /// `bigint`
    Int(i64),
    /// `bigint[]`
    IntArray(Vec<i64>),
    /// `double precision`
    Float(f64),
    /// `double precision[]`
    FloatArray(Vec<f64>),
    /// `boolean`
    Bool(bool),
    /// `uuid`
    Uuid(Uuid),
    /// `timestamptz`
    Timestamp(DateTime<Utc>),
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<Vec<String>> for Param {
    fn from(v: Vec<String>) -> Self {
        Param::TextArray(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<Vec<i64>> for Param {
    fn from(v: Vec<i64>) -> Self {
        Param::IntArray(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<Vec<f64>> for Param {
    fn from(v: Vec<f64>) -> Self {
        Param::FloatArray(v)
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<Uuid> for Param {
    fn from(v: Uuid) -> Self {
        Param::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Param {
    fn from(v: DateTime<Utc>) -> Self {
        Param::Timestamp(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Bind(Param),
}

/// A composable SQL fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sql {
    pieces: Vec<Piece>,
}

impl Sql {
    /// Empty fragment
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragment holding literal SQL text
    pub fn raw(text: impl Into<String>) -> Self {
        let mut sql = Self::new();
        sql.push(text);
        sql
    }

    /// Fragment holding a single placeholder
    pub fn bind(value: impl Into<Param>) -> Self {
        let mut sql = Self::new();
        sql.push_bind(value);
        sql
    }

    /// Append literal SQL text
    pub fn push(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if text.is_empty() {
            return self;
        }
        match self.pieces.last_mut() {
            Some(Piece::Text(last)) => last.push_str(&text),
            _ => self.pieces.push(Piece::Text(text)),
        }
        self
    }

    /// Append a placeholder for `value`
    pub fn push_bind(&mut self, value: impl Into<Param>) -> &mut Self {
        self.pieces.push(Piece::Bind(value.into()));
        self
    }

    /// Append another fragment
    pub fn append(&mut self, other: &Sql) -> &mut Self {
        for piece in &other.pieces {
            match piece {
                Piece::Text(text) => {
                    self.push(text.clone());
                }
                Piece::Bind(param) => {
                    self.pieces.push(Piece::Bind(param.clone()));
                }
            }
        }
        self
    }

    /// Append fragments separated by `sep`
    pub fn append_joined<'a>(&mut self, parts: impl IntoIterator<Item = &'a Sql>, sep: &str) -> &mut Self {
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            self.append(part);
        }
        self
    }

    /// Wrap the fragment in parentheses
    pub fn wrapped(&self) -> Sql {
        let mut sql = Sql::raw("(");
        sql.append(self);
        sql.push(")");
        sql
    }

    /// True when nothing has been pushed
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Number of placeholders in the fragment
    pub fn param_count(&self) -> usize {
        self.pieces
            .iter()
            .filter(|p| matches!(p, Piece::Bind(_)))
            .count()
    }

    /// Render to numbered SQL text plus the values in placeholder order
    pub fn render(&self) -> (String, Vec<Param>) {
        let mut text = String::new();
        let mut params = Vec::with_capacity(self.param_count());
        for piece in &self.pieces {
            match piece {
                Piece::Text(t) => text.push_str(t),
                Piece::Bind(p) => {
                    params.push(p.clone());
                    text.push('$');
                    text.push_str(&params.len().to_string());
                }
            }
        }
        (text, params)
    }
}

/// A rendered statement ready for execution
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `$n` placeholders
    pub sql: String,
    /// Values in placeholder order
    pub params: Vec<Param>,
}

impl From<&Sql> for Statement {
    fn from(sql: &Sql) -> Self {
        let (sql, params) = sql.render();
        Self { sql, params }
    }
}

impl Statement {
    /// Build a sqlx query with every parameter bound in order
    pub fn query(&self) -> Query<'_, Postgres, PgArguments> {
        let mut query = sqlx::query(&self.sql);
        for param in &self.params {
            query = match param.clone() {
                Param::Text(v) => query.bind(v),
                Param::TextArray(v) => query.bind(v),
                Param::Int(v) => query.bind(v),
                Param::IntArray(v) => query.bind(v),
                Param::Float(v) => query.bind(v),
                Param::FloatArray(v) => query.bind(v),
                Param::Bool(v) => query.bind(v),
                Param::Uuid(v) => query.bind(v),
                Param::Timestamp(v) => query.bind(v),
            };
        }
        query
    }

    /// Same as [`Statement::query`] for single-column results
    pub fn query_scalar<O>(&self) -> QueryScalar<'_, Postgres, O, PgArguments>
    where
        (O,): for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow>,
    {
        let mut query = sqlx::query_scalar(&self.sql);
        for param in &self.params {
            query = match param.clone() {
                Param::Text(v) => query.bind(v),
                Param::TextArray(v) => query.bind(v),
                Param::Int(v) => query.bind(v),
                Param::IntArray(v) => query.bind(v),
                Param::Float(v) => query.bind(v),
                Param::FloatArray(v) => query.bind(v),
                Param::Bool(v) => query.bind(v),
                Param::Uuid(v) => query.bind(v),
                Param::Timestamp(v) => query.bind(v),
            };
        }
        query
    }
}

/// Quote an identifier for use in SQL text
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Escape `%`, `_` and `\` so user text matches literally inside ILIKE
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
