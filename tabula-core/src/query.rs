//! Row query compiler.
//!
//! Turns list parameters (`page`, `limit`, `offset`, `sort`, `order`,
//! `search` and `<column>[__<op>]` filters) into a count statement and a
//! page statement sharing one WHERE clause. Values are always bound; only
//! validated identifiers reach the SQL text.
//!
//! Filters are permissive: a key naming no declared column, an unknown
//! operator suffix or a value that does not fit the column type is skipped
//! and reported in [`CompiledQuery::ignored_filters`].

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::column::TableDescriptor;
use crate::dialect::Dialect;
use crate::dml::{Projection, Statement};
use crate::error::{IdentifierKind, ValidationError};
use crate::value::{Row, Value};

pub const DEFAULT_LIMIT: u64 = 25;
pub const MAX_LIMIT: u64 = 100;
/// Largest offset an engine accepts as a bound integer.
pub const MAX_OFFSET: u64 = i64::MAX as u64;

/// Separates a column name from its operator in a filter key.
pub const OPERATOR_DELIMITER: &str = "__";

// ============================================================================
// REQUEST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Anything other than `desc` (any case) sorts ascending.
    pub fn parse_lenient(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Comparison applied by a filter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    IContains,
}

impl FilterOperator {
    /// Resolve a key suffix. The bare column name means equality.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "" | "eq" => Some(FilterOperator::Eq),
            "ne" => Some(FilterOperator::Ne),
            "gt" => Some(FilterOperator::Gt),
            "lt" => Some(FilterOperator::Lt),
            "gte" => Some(FilterOperator::Gte),
            "lte" => Some(FilterOperator::Lte),
            "contains" => Some(FilterOperator::Contains),
            "icontains" => Some(FilterOperator::IContains),
            _ => None,
        }
    }

    fn comparison(&self) -> Option<&'static str> {
        match self {
            FilterOperator::Eq => Some("="),
            FilterOperator::Ne => Some("<>"),
            FilterOperator::Gt => Some(">"),
            FilterOperator::Lt => Some("<"),
            FilterOperator::Gte => Some(">="),
            FilterOperator::Lte => Some("<="),
            FilterOperator::Contains | FilterOperator::IContains => None,
        }
    }
}

impl FromStr for FilterOperator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterOperator::from_suffix(s).ok_or_else(|| ValidationError::InvalidValue {
            field: "operator".to_string(),
            reason: format!("unknown filter operator '{}'", s),
        })
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Gt => "gt",
            FilterOperator::Lt => "lt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lte => "lte",
            FilterOperator::Contains => "contains",
            FilterOperator::IContains => "icontains",
        };
        f.write_str(name)
    }
}

/// A list request, already clamped to its valid ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub page: u64,
    pub limit: u64,
    /// Explicit row offset. Overrides `page` when present.
    pub offset: Option<u64>,
    pub sort: Option<String>,
    pub order: SortOrder,
    pub search: Option<String>,
    /// Unrecognised keys, in request order, as `(key, value)`.
    pub filters: Vec<(String, String)>,
}

impl Default for RowQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
            offset: None,
            sort: None,
            order: SortOrder::Asc,
            search: None,
            filters: Vec::new(),
        }
    }
}

impl RowQuery {
    /// Build from raw query-string pairs.
    ///
    /// `limit` wins over `page_size` when both are given. Unparseable
    /// numbers fall back to their defaults rather than failing the request.
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = RowQuery::default();
        let mut limit = None;
        let mut page_size = None;

        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "page" => query.page = parse_number(value).unwrap_or(1).max(1) as u64,
                "limit" => limit = parse_number(value),
                "page_size" => page_size = parse_number(value),
                "offset" => query.offset = parse_number(value).map(|o| o.max(0) as u64),
                "sort" => {
                    query.sort = Some(value.trim().to_string()).filter(|s| !s.is_empty())
                }
                "order" => query.order = SortOrder::parse_lenient(value),
                "search" => {
                    query.search = Some(value.trim().to_string()).filter(|s| !s.is_empty())
                }
                _ => query.filters.push((key.to_string(), value.to_string())),
            }
        }

        query.limit = limit
            .or(page_size)
            .map(|l| l.clamp(1, MAX_LIMIT as i64) as u64)
            .unwrap_or(DEFAULT_LIMIT);
        query
    }

    pub fn effective_offset(&self) -> u64 {
        self.offset
            .unwrap_or_else(|| (self.page - 1).saturating_mul(self.limit))
            .min(MAX_OFFSET)
    }

    /// Page number reported back, derived from an explicit offset if any.
    pub fn effective_page(&self) -> u64 {
        match self.offset {
            Some(offset) => offset / self.limit + 1,
            None => self.page,
        }
    }
}

fn parse_number(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

// ============================================================================
// COMPILATION
// ============================================================================

/// Count and page statements for one list request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub count: Statement,
    pub select: Statement,
    pub projection: Projection,
    pub page: u64,
    pub limit: u64,
    pub offset: u64,
    /// Filter keys that did not filter anything.
    pub ignored_filters: Vec<String>,
}

struct WhereBuilder<'a> {
    dialect: &'a dyn Dialect,
    predicates: Vec<String>,
    params: Vec<Value>,
}

impl<'a> WhereBuilder<'a> {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    fn like_operator(&self, case_insensitive: bool) -> &'static str {
        if case_insensitive {
            self.dialect
                .capabilities()
                .case_insensitive_like
                .unwrap_or("LIKE")
        } else {
            "LIKE"
        }
    }

    fn clause(&self) -> String {
        if self.predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.predicates.join(" AND "))
        }
    }
}

/// Escape character used by search patterns.
const LIKE_ESCAPE: char = '\\';

/// Make `%` and `_` in free text match themselves.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Wrap a substring pattern in wildcards unless the caller supplied some.
fn contains_pattern(value: &str) -> String {
    if value.contains('%') {
        value.to_string()
    } else {
        format!("%{}%", value)
    }
}

/// Compile a list request against a table's live column list.
pub fn compile(
    dialect: &dyn Dialect,
    table: &TableDescriptor,
    query: &RowQuery,
) -> Result<CompiledQuery, ValidationError> {
    let physical = dialect.quote(IdentifierKind::Physical, &table.physical_name)?;
    let (columns, projection) = Projection::for_table(dialect, table)?;

    let mut builder = WhereBuilder {
        dialect,
        predicates: Vec::new(),
        params: Vec::new(),
    };

    // One bound pattern, referenced by every column of the OR group.
    if let Some(search) = &query.search {
        let placeholder = builder.bind(Value::Text(format!("%{}%", escape_like(search))));
        let like = builder.like_operator(true);
        let mut alternatives = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let quoted = dialect.quote(IdentifierKind::Column, &column.name)?;
            alternatives.push(format!(
                "{} {} {} ESCAPE '{}'",
                dialect.text_cast(&quoted),
                like,
                placeholder,
                LIKE_ESCAPE
            ));
        }
        builder.predicates.push(format!("({})", alternatives.join(" OR ")));
    }

    let mut ignored_filters = Vec::new();
    for (key, raw) in &query.filters {
        let resolved = match table.column(key) {
            Some(column) => Some((column, FilterOperator::Eq)),
            None => key
                .rsplit_once(OPERATOR_DELIMITER)
                .and_then(|(name, suffix)| {
                    table.column(name).zip(FilterOperator::from_suffix(suffix))
                }),
        };
        let Some((column, operator)) = resolved else {
            ignored_filters.push(key.clone());
            continue;
        };
        if raw.is_empty() {
            ignored_filters.push(key.clone());
            continue;
        }

        let quoted = dialect.quote(IdentifierKind::Column, &column.name)?;
        let predicate = match operator.comparison() {
            Some(comparison) => match Value::from_text(column.column_type, &column.name, raw) {
                Ok(value) => {
                    let placeholder = builder.bind(value);
                    format!("{} {} {}", quoted, comparison, placeholder)
                }
                Err(_) => {
                    ignored_filters.push(key.clone());
                    continue;
                }
            },
            None => {
                let like = builder.like_operator(operator == FilterOperator::IContains);
                let placeholder = builder.bind(Value::Text(contains_pattern(raw)));
                format!("{} {} {}", dialect.text_cast(&quoted), like, placeholder)
            }
        };
        builder.predicates.push(predicate);
    }

    let order_by = match query.sort.as_deref().and_then(|sort| table.column(sort)) {
        Some(column) => format!(
            " ORDER BY {} {}",
            dialect.quote(IdentifierKind::Column, &column.name)?,
            query.order.as_sql()
        ),
        None => String::new(),
    };

    let where_clause = builder.clause();
    let count = Statement::with_params(
        format!("SELECT COUNT(*) FROM {}{}", physical, where_clause),
        builder.params.clone(),
    );

    let offset = query.effective_offset();
    let limit_placeholder = builder.bind(Value::Integer(query.limit as i64));
    let offset_placeholder =
        builder.bind(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
    let select = Statement::with_params(
        format!(
            "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
            columns, physical, where_clause, order_by, limit_placeholder, offset_placeholder
        ),
        builder.params,
    );

    Ok(CompiledQuery {
        count,
        select,
        projection,
        page: query.effective_page(),
        limit: query.limit,
        offset,
        ignored_filters,
    })
}

// ============================================================================
// RESULT
// ============================================================================

/// One page of rows plus the figures needed to render pagination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowPage {
    pub rows: Vec<Row>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl RowPage {
    pub fn new(rows: Vec<Row>, total: u64, page: u64, limit: u64) -> Self {
        Self {
            rows,
            total,
            page,
            limit,
            total_pages: total_pages(total, limit),
        }
    }
}

pub fn total_pages(total: u64, limit: u64) -> u64 {
    if limit == 0 {
        0
    } else {
        total.div_ceil(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnDescriptor, ColumnType};
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::principal::OwnerId;
    use chrono::Utc;

    fn items() -> TableDescriptor {
        TableDescriptor::new(
            OwnerId(1),
            "items",
            vec![
                ColumnDescriptor::new("a", ColumnType::Integer),
                ColumnDescriptor::new("name", ColumnType::Text),
            ],
            Utc::now(),
        )
        .expect("valid table")
    }

    fn params(pairs: &[(&str, &str)]) -> RowQuery {
        RowQuery::from_params(pairs.iter().copied())
    }

    #[test]
    fn test_defaults_and_clamping() {
        let query = params(&[]);
        assert_eq!((query.page, query.limit, query.offset), (1, 25, None));

        let query = params(&[("limit", "500"), ("page", "0")]);
        assert_eq!((query.page, query.limit), (1, 100));

        let query = params(&[("limit", "-3"), ("page", "abc")]);
        assert_eq!((query.page, query.limit), (1, 1));
    }

    #[test]
    fn test_limit_wins_over_page_size() {
        let query = params(&[("page_size", "10"), ("limit", "40")]);
        assert_eq!(query.limit, 40);
        let query = params(&[("page_size", "10")]);
        assert_eq!(query.limit, 10);
    }

    #[test]
    fn test_order_is_lenient() {
        assert_eq!(params(&[("order", "DESC")]).order, SortOrder::Desc);
        assert_eq!(params(&[("order", "sideways")]).order, SortOrder::Asc);
    }

    #[test]
    fn test_explicit_offset_overrides_page() {
        let query = params(&[("page", "3"), ("limit", "10"), ("offset", "5")]);
        assert_eq!(query.effective_offset(), 5);
        assert_eq!(query.effective_page(), 1);
        assert_eq!(params(&[("page", "3"), ("limit", "10")]).effective_offset(), 20);
    }

    #[test]
    fn test_plain_listing_sql() -> Result<(), ValidationError> {
        let compiled = compile(&SqliteDialect, &items(), &params(&[]))?;
        assert_eq!(compiled.count.sql, "SELECT COUNT(*) FROM \"u1_items\"");
        assert_eq!(
            compiled.select.sql,
            "SELECT \"a\", \"name\", rowid FROM \"u1_items\" LIMIT ?1 OFFSET ?2"
        );
        assert_eq!(compiled.select.params, vec![Value::Integer(25), Value::Integer(0)]);
        Ok(())
    }

    #[test]
    fn test_comparison_filters_bind_typed_values() -> Result<(), ValidationError> {
        let compiled = compile(&SqliteDialect, &items(), &params(&[("a__gt", "1"), ("a__lte", "3")]))?;
        assert_eq!(
            compiled.count.sql,
            "SELECT COUNT(*) FROM \"u1_items\" WHERE \"a\" > ?1 AND \"a\" <= ?2"
        );
        assert_eq!(compiled.count.params, vec![Value::Integer(1), Value::Integer(3)]);
        assert!(compiled.select.sql.ends_with("LIMIT ?3 OFFSET ?4"));
        Ok(())
    }

    #[test]
    fn test_search_reuses_one_placeholder() -> Result<(), ValidationError> {
        let compiled = compile(&PostgresDialect, &items(), &params(&[("search", "pen")]))?;
        assert_eq!(
            compiled.count.sql,
            "SELECT COUNT(*) FROM \"u1_items\" WHERE (CAST(\"a\" AS TEXT) ILIKE $1 ESCAPE '\\' OR CAST(\"name\" AS TEXT) ILIKE $1 ESCAPE '\\')"
        );
        assert_eq!(compiled.count.params, vec![Value::Text("%pen%".to_string())]);
        Ok(())
    }

    #[test]
    fn test_search_escapes_wildcards() -> Result<(), ValidationError> {
        let compiled = compile(&SqliteDialect, &items(), &params(&[("search", "a_b%c\\d")]))?;
        assert_eq!(
            compiled.count.params,
            vec![Value::Text("%a\\_b\\%c\\\\d%".to_string())]
        );
        Ok(())
    }

    #[test]
    fn test_huge_page_offset_stays_positive() -> Result<(), ValidationError> {
        let query = params(&[("page", "100000000000000000"), ("limit", "100")]);
        assert_eq!(query.effective_offset(), MAX_OFFSET);

        let compiled = compile(&PostgresDialect, &items(), &query)?;
        assert_eq!(compiled.select.params.last(), Some(&Value::Integer(i64::MAX)));
        assert_eq!(compiled.page, 100_000_000_000_000_000);
        Ok(())
    }

    #[test]
    fn test_icontains_degrades_to_like() -> Result<(), ValidationError> {
        let compiled = compile(&SqliteDialect, &items(), &params(&[("name__icontains", "Pe")]))?;
        assert!(compiled.count.sql.contains("CAST(\"name\" AS TEXT) LIKE ?1"));
        assert_eq!(compiled.count.params, vec![Value::Text("%Pe%".to_string())]);

        let compiled = compile(&SqliteDialect, &items(), &params(&[("name__contains", "p%n")]))?;
        assert_eq!(compiled.count.params, vec![Value::Text("p%n".to_string())]);
        Ok(())
    }

    #[test]
    fn test_unknown_filters_are_ignored() -> Result<(), ValidationError> {
        let compiled = compile(
            &SqliteDialect,
            &items(),
            &params(&[("colour", "red"), ("a__between", "1"), ("a__gt", "many"), ("name", "pen")]),
        )?;
        assert_eq!(compiled.ignored_filters, vec!["colour", "a__between", "a__gt"]);
        assert_eq!(
            compiled.count.sql,
            "SELECT COUNT(*) FROM \"u1_items\" WHERE \"name\" = ?1"
        );
        Ok(())
    }

    #[test]
    fn test_sort_must_name_a_column() -> Result<(), ValidationError> {
        let compiled = compile(&SqliteDialect, &items(), &params(&[("sort", "a"), ("order", "desc")]))?;
        assert!(compiled.select.sql.contains("ORDER BY \"a\" DESC LIMIT"));

        let compiled = compile(&SqliteDialect, &items(), &params(&[("sort", "a; DROP TABLE x")]))?;
        assert!(!compiled.select.sql.contains("ORDER BY"));
        Ok(())
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 25), 0);
        assert_eq!(total_pages(25, 25), 1);
        assert_eq!(total_pages(26, 25), 2);
        let page = RowPage::new(Vec::new(), 7, 1, 3);
        assert_eq!(page.total_pages, 3);
    }
}
