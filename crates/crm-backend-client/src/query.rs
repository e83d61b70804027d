//! Table query builder.
//!
//! A [`Query`] carries the column list, filters, ordering, and limit for a
//! table read. [`Query::to_pairs`] renders it in the REST dialect the
//! backend speaks:
//!
//! | Builder | Query parameter |
//! |---------|-----------------|
//! | `select("id,name")` | `select=id,name` |
//! | `eq("id", x)` | `id=eq.x` |
//! | `eq("role", Value::Null)` | `role=is.null` |
//! | `contains("name", "ac")` | `name=ilike.*ac*` |
//! | `in_list("id", [a, b])` | `id=in.("a","b")` |
//! | `gte("due_date", d)` / `lt(..)` | `due_date=gte.d` / `due_date=lt.d` |
//! | `any_of([..])` | `or=(name.ilike."*ac*",email.eq."x")` |
//! | `order_by("created_at", Desc)` | `order=created_at.desc` |
//! | `limit(5)` | `limit=5` |
//!
//! The same query can be evaluated against JSON rows in memory with
//! [`Query::matches`] and [`Query::apply`], following the backend's
//! semantics: case-insensitive substring for `contains`, NULLs sorting last
//! in ascending order and first in descending order.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// A single row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    /// Case-insensitive substring match.
    Contains(String, String),
    In(String, Vec<Value>),
    Gte(String, Value),
    Lt(String, Value),
    /// At least one of the inner filters holds.
    Or(Vec<Filter>),
}

impl Filter {
    fn columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Eq(c, _) | Self::Contains(c, _) | Self::In(c, _) | Self::Gte(c, _) | Self::Lt(c, _) => {
                out.push(c)
            }
            Self::Or(inner) => inner.iter().for_each(|f| f.columns(out)),
        }
    }

    /// `col=op.value` form used at the top level.
    fn to_pair(&self) -> (String, String) {
        match self {
            Self::Eq(c, Value::Null) => (c.clone(), "is.null".into()),
            Self::Eq(c, v) => (c.clone(), format!("eq.{}", value_text(v))),
            Self::Contains(c, s) => (c.clone(), format!("ilike.*{}*", s)),
            Self::In(c, vs) => (
                c.clone(),
                format!(
                    "in.({})",
                    vs.iter().map(|v| quote(&value_text(v))).collect::<Vec<_>>().join(",")
                ),
            ),
            Self::Gte(c, v) => (c.clone(), format!("gte.{}", value_text(v))),
            Self::Lt(c, v) => (c.clone(), format!("lt.{}", value_text(v))),
            Self::Or(inner) => ("or".into(), format!("({})", render_tree(inner))),
        }
    }

    /// `col.op."value"` form used inside logic trees.
    fn to_tree_item(&self) -> String {
        match self {
            Self::Eq(c, Value::Null) => format!("{c}.is.null"),
            Self::Eq(c, v) => format!("{c}.eq.{}", quote(&value_text(v))),
            Self::Contains(c, s) => format!("{c}.ilike.{}", quote(&format!("*{s}*"))),
            Self::In(c, vs) => format!(
                "{c}.in.({})",
                vs.iter().map(|v| quote(&value_text(v))).collect::<Vec<_>>().join(",")
            ),
            Self::Gte(c, v) => format!("{c}.gte.{}", quote(&value_text(v))),
            Self::Lt(c, v) => format!("{c}.lt.{}", quote(&value_text(v))),
            Self::Or(inner) => format!("or({})", render_tree(inner)),
        }
    }

    /// Evaluate against a JSON row.
    pub fn matches(&self, row: &Value) -> bool {
        let field = |c: &str| row.get(c).unwrap_or(&Value::Null);
        match self {
            Self::Eq(c, Value::Null) => field(c).is_null(),
            Self::Eq(c, v) => loose_eq(field(c), v),
            Self::Contains(c, s) => field(c)
                .as_str()
                .is_some_and(|text| text.to_lowercase().contains(&s.to_lowercase())),
            Self::In(c, vs) => vs.iter().any(|v| loose_eq(field(c), v)),
            Self::Gte(c, v) => {
                !field(c).is_null() && compare_values(field(c), v) != Ordering::Less
            }
            Self::Lt(c, v) => !field(c).is_null() && compare_values(field(c), v) == Ordering::Less,
            Self::Or(inner) => inner.iter().any(|f| f.matches(row)),
        }
    }
}

fn render_tree(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::to_tree_item)
        .collect::<Vec<_>>()
        .join(",")
}

/// Double-quote a value for use inside a logic tree or `in` list.
fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Null, _) | (_, Value::Null) => false,
        _ => value_text(a) == value_text(b),
    }
}

/// Order two column values: numbers numerically, timestamps and dates
/// chronologically, everything else by text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    let (ta, tb) = (value_text(a), value_text(b));
    if let (Ok(x), Ok(y)) = (
        DateTime::parse_from_rfc3339(&ta),
        DateTime::parse_from_rfc3339(&tb),
    ) {
        return x.cmp(&y);
    }
    if let (Ok(x), Ok(y)) = (
        NaiveDate::parse_from_str(&ta, "%Y-%m-%d"),
        NaiveDate::parse_from_str(&tb, "%Y-%m-%d"),
    ) {
        return x.cmp(&y);
    }
    ta.cmp(&tb)
}

/// Read query against one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    columns: Option<String>,
    filters: Vec<Filter>,
    order: Option<(String, Order)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `Query::new().eq("id", id)`.
    pub fn by_id(id: uuid::Uuid) -> Self {
        Self::new().eq("id", id.to_string())
    }

    /// True when the only filter is `id = <value>`.
    pub fn targets_single_id(&self) -> bool {
        matches!(self.filters.as_slice(), [Filter::Eq(column, _)] if column == "id")
    }

    /// Restrict the returned columns (comma separated).
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = Some(columns.to_string());
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    /// Case-insensitive substring match on a text column.
    pub fn contains(mut self, column: &str, needle: &str) -> Self {
        self.filters
            .push(Filter::Contains(column.into(), sanitize_pattern(needle)));
        self
    }

    pub fn in_list<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column.into(), value.into()));
        self
    }

    pub fn lt(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lt(column.into(), value.into()));
        self
    }

    /// Add a disjunction of filters. An empty list adds nothing.
    pub fn any_of(mut self, filters: Vec<Filter>) -> Self {
        if !filters.is_empty() {
            self.filters.push(Filter::Or(filters));
        }
        self
    }

    /// Case-insensitive substring match on any of `columns`.
    pub fn search(self, columns: &[&str], needle: &str) -> Self {
        let needle = sanitize_pattern(needle);
        if needle.is_empty() {
            return self;
        }
        self.any_of(
            columns
                .iter()
                .map(|c| Filter::Contains((*c).to_string(), needle.clone()))
                .collect(),
        )
    }

    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order = Some((column.to_string(), order));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Selected columns, `None` for all of them.
    pub fn columns(&self) -> Option<Vec<&str>> {
        let columns = self.columns.as_deref()?.trim();
        if columns == "*" {
            return None;
        }
        Some(
            columns
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect(),
        )
    }

    pub fn ordering(&self) -> Option<(&str, Order)> {
        self.order.as_ref().map(|(c, o)| (c.as_str(), *o))
    }

    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Every column the query names, in select, filters, and ordering.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .columns
            .as_deref()
            .map(|c| c.split(',').map(str::trim).filter(|c| !c.is_empty() && *c != "*").collect())
            .unwrap_or_default();
        for f in &self.filters {
            f.columns(&mut out);
        }
        if let Some((c, _)) = &self.order {
            out.push(c);
        }
        out
    }

    /// Render as query-string pairs.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![(
            "select".to_string(),
            self.columns.clone().unwrap_or_else(|| "*".into()),
        )];
        pairs.extend(self.filters.iter().map(Filter::to_pair));
        if let Some((c, o)) = &self.order {
            pairs.push(("order".into(), format!("{c}.{}", o.as_str())));
        }
        if let Some(n) = self.limit {
            pairs.push(("limit".into(), n.to_string()));
        }
        pairs
    }

    /// Render only the filters, for update/delete/count requests.
    pub fn filter_pairs(&self) -> Vec<(String, String)> {
        self.filters.iter().map(Filter::to_pair).collect()
    }

    /// Whether `row` satisfies every filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Filter, order, limit, and project `rows` in memory.
    pub fn apply(&self, rows: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut out: Vec<Value> = rows.into_iter().filter(|r| self.matches(r)).collect();
        if let Some((column, order)) = &self.order {
            out.sort_by(|a, b| {
                let (x, y) = (
                    a.get(column).unwrap_or(&Value::Null),
                    b.get(column).unwrap_or(&Value::Null),
                );
                // NULLs sort as the largest value.
                let ord = match (x.is_null(), y.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => compare_values(x, y),
                };
                match order {
                    Order::Asc => ord,
                    Order::Desc => ord.reverse(),
                }
            });
        }
        if let Some(n) = self.limit {
            out.truncate(n);
        }
        if let Some(keep) = self.columns() {
            for row in &mut out {
                if let Value::Object(map) = row {
                    map.retain(|k, _| keep.contains(&k.as_str()));
                }
            }
        }
        out
    }
}

/// Strip characters that act as wildcards or separators in patterns.
fn sanitize_pattern(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '*' | '%' | ',' | '(' | ')'))
        .collect()
}
