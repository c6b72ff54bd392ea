//! Guarded SQL construction for dataset queries.
//!
//! Requests describe a query with a small JSON grammar (filters, group by, order by,
//! limit, offset). Values are always sent as bound parameters. Identifiers cannot be
//! bound, so every table and column name must match `^[a-zA-Z_][a-zA-Z0-9_]*$`
//! before it is quoted into the statement. That allow-list is the only thing standing
//! between a request and arbitrary SQL, so nothing is interpolated without it.
//!
//! # Clause Order
//!
//! ```text
//! SELECT … FROM "table" [WHERE a AND b …] [GROUP BY "g"] [ORDER BY "c" ASC|DESC] LIMIT n [OFFSET m]
//! ```

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::AppError;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("identifier pattern is valid")
});

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("placeholder pattern is valid"));

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    TextList(Vec<String>),
}

impl SqlParam {
    /// Literal form used by [`BuiltQuery::to_inline_sql`].
    fn to_literal(&self) -> String {
        match self {
            SqlParam::Text(s) => quote_literal(s),
            SqlParam::Int(n) => n.to_string(),
            SqlParam::Float(f) => f.to_string(),
            SqlParam::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            SqlParam::TextList(items) => {
                let literals: Vec<String> = items.iter().map(|s| quote_literal(s)).collect();
                format!("ARRAY[{}]", literals.join(", "))
            }
        }
    }
}

/// Sort direction of `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Validated `ORDER BY` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    /// Parse `"column"` or `"column ASC|DESC"`.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let mut parts = raw.split_whitespace();
        let column = parts
            .next()
            .ok_or_else(|| AppError::Validation("orderBy must name a column".to_string()))?;
        validate_identifier(column)?;

        let direction = match parts.next() {
            None => SortDirection::Asc,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(dir) => {
                return Err(AppError::Validation(format!(
                    "Invalid sort direction '{dir}'. Use ASC or DESC"
                )));
            }
        };

        if parts.next().is_some() {
            return Err(AppError::Validation(format!("Invalid orderBy '{raw}'")));
        }

        Ok(Self {
            column: column.to_string(),
            direction,
        })
    }
}

/// Everything a query may ask for beyond the table name.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: Map<String, Value>,
    pub group_by: Option<String>,
    pub order_by: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/// A statement ready to execute, with its bound values.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub table: String,
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub limit: u32,
    pub offset: u32,
}

impl BuiltQuery {
    /// The statement with parameters substituted as escaped literals.
    ///
    /// For logging only; execution always binds `params`.
    pub fn to_inline_sql(&self) -> String {
        // One pass over the statement, so text inside substituted literals is never rescanned
        PLACEHOLDER
            .replace_all(&self.sql, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|index| self.params.get(index))
                    .map(SqlParam::to_literal)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Check a table or column name against the identifier allow-list.
pub fn validate_identifier(identifier: &str) -> Result<(), AppError> {
    if IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Invalid identifier '{identifier}'. Only letters, digits and underscores are allowed, and it must not start with a digit"
        )))
    }
}

/// Double-quote a validated identifier.
pub fn quote_identifier(identifier: &str) -> Result<String, AppError> {
    validate_identifier(identifier)?;
    Ok(format!("\"{identifier}\""))
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Build a guarded `SELECT` against `table`.
///
/// # Errors
///
/// `AppError::Validation` when any identifier fails the allow-list, the sort
/// direction is unknown, or a filter value is an object, a nested array or an
/// empty array.
pub fn build_query(table: &str, options: &QueryOptions) -> Result<BuiltQuery, AppError> {
    let table_sql = quote_identifier(table)?;
    let mut params: Vec<SqlParam> = Vec::new();

    let group_by = options
        .group_by
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(quote_identifier)
        .transpose()?;

    let order_by = options
        .order_by
        .as_deref()
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(OrderBy::parse)
        .transpose()?;

    let mut conditions = Vec::with_capacity(options.filters.len());
    for (column, value) in &options.filters {
        let column_sql = quote_identifier(column)?;
        conditions.push(filter_condition(&column_sql, column, value, &mut params)?);
    }

    let projection = match &group_by {
        Some(column) => format!("{column}, COUNT(*) AS \"count\""),
        None => "*".to_string(),
    };

    let mut sql = format!("SELECT {projection} FROM {table_sql}");

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if let Some(column) = &group_by {
        sql.push_str(&format!(" GROUP BY {column}"));
    }

    if let Some(order) = &order_by {
        sql.push_str(&format!(
            " ORDER BY \"{}\" {}",
            order.column,
            order.direction.as_sql()
        ));
    }

    sql.push_str(&format!(" LIMIT {}", options.limit));

    if options.offset > 0 {
        sql.push_str(&format!(" OFFSET {}", options.offset));
    }

    Ok(BuiltQuery {
        table: table.to_string(),
        sql,
        params,
        limit: options.limit,
        offset: options.offset,
    })
}

fn filter_condition(
    column_sql: &str,
    column: &str,
    value: &Value,
    params: &mut Vec<SqlParam>,
) -> Result<String, AppError> {
    let condition = match value {
        Value::Null => return Ok(format!("{column_sql} IS NULL")),
        Value::String(s) => {
            params.push(SqlParam::Text(s.clone()));
            format!("{column_sql}::text = ${}", params.len())
        }
        Value::Number(n) => {
            let param = match n.as_i64() {
                Some(i) => SqlParam::Int(i),
                None => SqlParam::Float(n.as_f64().ok_or_else(|| {
                    AppError::Validation(format!("Filter '{column}' has an unsupported number"))
                })?),
            };
            params.push(param);
            format!("{column_sql} = ${}", params.len())
        }
        Value::Bool(b) => {
            params.push(SqlParam::Bool(*b));
            format!("{column_sql} = ${}", params.len())
        }
        Value::Array(items) => {
            if items.is_empty() {
                return Err(AppError::Validation(format!(
                    "Filter '{column}' must not be an empty list"
                )));
            }
            let texts = items
                .iter()
                .map(|item| scalar_text(column, item))
                .collect::<Result<Vec<_>, _>>()?;
            params.push(SqlParam::TextList(texts));
            format!("{column_sql}::text = ANY(${})", params.len())
        }
        Value::Object(_) => {
            return Err(AppError::Validation(format!(
                "Filter '{column}' must be a string, number, boolean, null or list"
            )));
        }
    };
    Ok(condition)
}

fn scalar_text(column: &str, item: &Value) -> Result<String, AppError> {
    match item {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(AppError::Validation(format!(
            "List filter '{column}' may only contain strings, numbers or booleans"
        ))),
    }
}
