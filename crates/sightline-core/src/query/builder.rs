//! Aggregation and list statements
//!
//! An aggregation is a `base` CTE with one row per (record, group value)
//! and, for stage calculations, per stage. The outer query groups it and
//! computes every statistic, so the mapper never needs to know which
//! calculation ran.

use crate::error::{Error, Result};
use crate::models::{Across, Interval};
use crate::query::compiler::{Compiler, Predicates};
use crate::query::sql::{Sql, Statement};
use crate::query::trend::bucket_key;
use crate::query::{Domain, Fallback, Keyed, Metric, Scope, Shape, Stat};

/// How the grouping columns of an aggregation are to be read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Dimension shape; `None` for `across = none`
    pub shape: Option<Shape>,
    /// Label for the empty group
    pub fallback: Fallback,
    /// Interval for time dimensions
    pub interval: Option<Interval>,
    /// Rows carry a stage
    pub staged: bool,
}

impl Layout {
    /// True when keys are user ids
    pub fn is_user(&self) -> bool {
        self.shape.is_some_and(Shape::is_user)
    }
}

/// A built aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPlan {
    /// Statement to run
    pub statement: Statement,
    /// How to read its rows
    pub layout: Layout,
}

/// A built list call
#[derive(Debug, Clone, PartialEq)]
pub struct ListPlan {
    /// `COUNT(*)` over the filtered records
    pub count: Statement,
    /// One page of records
    pub rows: Statement,
}

struct Dimension {
    name: &'static str,
    shape: Shape,
    fallback: Fallback,
    interval: Option<Interval>,
    key: Sql,
    additional_key: Option<Sql>,
    key_num: Option<Sql>,
    join: Option<Sql>,
}

fn dimension<D: Domain>(compiler: &Compiler<'_, D>, across: &Across<D::Field>) -> Result<Option<Dimension>> {
    let Some(field) = compiler.filter().field_ref(across, false)? else {
        return Ok(None);
    };
    let spec = compiler.resolve(&field)?;
    // history fields group on the stage column of the history join
    let expr = match spec.scope {
        Scope::History if compiler.metric().is_staged() => Sql::raw("s.stage"),
        Scope::History => {
            return Err(Error::configuration(format!(
                "grouping by '{across}' needs a stage calculation"
            )))
        }
        Scope::Record => spec.expr.wrapped(),
    };
    let mut dim = Dimension {
        name: across.name(),
        shape: spec.shape,
        fallback: spec.fallback,
        interval: None,
        key: Sql::new(),
        additional_key: None,
        key_num: None,
        join: None,
    };

    match spec.shape {
        Shape::Text => {
            dim.key.push("NULLIF(").append(&expr).push("::text, '')");
        }
        Shape::User => {
            dim.key.push("NULLIF(").append(&expr).push("::text, '')");
            dim.additional_key = spec.display.clone();
        }
        Shape::TextArray => {
            let mut join = Sql::raw(" LEFT JOIN LATERAL unnest(");
            join.append(&expr).push(") AS d(v) ON true");
            dim.join = Some(join);
            dim.key.push("NULLIF(d.v, '')");
        }
        Shape::UserArray => {
            let display = spec.display.clone().unwrap_or_else(|| spec.expr.clone());
            let mut join = Sql::raw(" LEFT JOIN LATERAL unnest(");
            join.append(&expr)
                .push(", ")
                .append(&display.wrapped())
                .push(") AS d(id, name) ON true");
            dim.join = Some(join);
            dim.key.push("NULLIF(d.id, '')");
            dim.additional_key = Some(Sql::raw("d.name"));
        }
        Shape::Number => {
            dim.key.append(&expr).push("::text");
            let mut num = expr.clone();
            num.push("::double precision");
            dim.key_num = Some(num);
        }
        Shape::Timestamp => {
            let interval = compiler.interval();
            let bucket = bucket_key(interval, &spec.expr).wrapped();
            dim.key.append(&bucket).push("::text");
            let mut num = bucket;
            num.push("::double precision");
            dim.key_num = Some(num);
            dim.interval = Some(interval);
        }
    }

    Ok(Some(dim))
}

fn history_join<D: Domain>(compiler: &Compiler<'_, D>, predicates: &Predicates) -> Result<Option<Sql>> {
    let metric = compiler.metric();
    if !metric.uses_history() {
        return Ok(None);
    }
    let history = D::history().ok_or_else(|| {
        Error::configuration(format!(
            "'{}' needs a lifecycle history that {} records do not have",
            compiler.calculation(),
            D::NAME
        ))
    })?;
    let tenant = compiler.filter().tenant.as_str();
    let (table, rec, stage, start, end) = (
        history.table,
        history.record_column,
        history.stage_column,
        history.start_column,
        history.end_column,
    );

    let mut sql = Sql::new();
    match metric {
        Metric::StageBounces | Metric::StageTimes => {
            if *metric == Metric::StageBounces && !compiler.has_stage_filter() {
                return Err(Error::configuration(format!(
                    "'{}' requires a stage filter",
                    compiler.calculation()
                )));
            }
            let value = if *metric == Metric::StageBounces {
                "COUNT(*)::double precision".to_string()
            } else {
                format!("SUM(EXTRACT(EPOCH FROM (COALESCE(h.{end}, NOW()) - h.{start})))::double precision")
            };
            sql.push(format!(
                " JOIN (SELECT h.{rec} AS record_id, h.{stage} AS stage, {value} AS value \
                 FROM {table} h WHERE h.tenant_id = "
            ))
            .push_bind(tenant)
            .append(&predicates.history_clause())
            .push(format!(" GROUP BY h.{rec}, h.{stage}) s ON s.record_id = t.id"));
        }
        Metric::StateTransition => {
            let filter = compiler.filter();
            let (Some(from), Some(to)) = (
                filter.from_state.as_deref().filter(|s| !s.trim().is_empty()),
                filter.to_state.as_deref().filter(|s| !s.trim().is_empty()),
            ) else {
                return Err(Error::configuration(format!(
                    "'{}' requires from_state and to_state",
                    compiler.calculation()
                )));
            };
            sql.push(format!(
                " JOIN (SELECT f.{rec} AS record_id, \
                 EXTRACT(EPOCH FROM (MAX(e.{start}) - MIN(f.{start})))::double precision AS value \
                 FROM {table} f JOIN {table} e ON e.{rec} = f.{rec} AND e.tenant_id = f.tenant_id \
                 WHERE f.tenant_id = "
            ))
            .push_bind(tenant)
            .push(format!(" AND upper(f.{stage}) = upper("))
            .push_bind(from.trim())
            .push(format!(") AND upper(e.{stage}) = upper("))
            .push_bind(to.trim())
            .push(format!(")) GROUP BY f.{rec}) s ON s.record_id = t.id"));
        }
        Metric::Count | Metric::Stats { .. } | Metric::Collect(_) => return Ok(None),
    }
    Ok(Some(sql))
}

fn order_by<D: Domain>(
    compiler: &Compiler<'_, D>,
    across: &Across<D::Field>,
    dim: Option<&Dimension>,
) -> Result<Vec<String>> {
    let key_column = |dim: &Dimension| if dim.key_num.is_some() { "key_num" } else { "key" };
    let metric_column = compiler.metric().sort_stat().column();
    let mut order = Vec::new();

    for sort in &compiler.filter().sort {
        let dir = if sort.descending { "DESC" } else { "ASC" };
        let field = sort.field.trim();
        let column = match dim {
            Some(dim) if field.eq_ignore_ascii_case(dim.name) => key_column(dim),
            _ if field.eq_ignore_ascii_case(compiler.calculation().as_str()) => metric_column,
            _ => match field.parse::<Stat>() {
                Ok(stat) => stat.column(),
                Err(_) => {
                    return Err(Error::configuration(format!(
                        "cannot sort by '{field}' when grouping by '{across}'"
                    )))
                }
            },
        };
        order.push(format!("{column} {dir}"));
    }

    if order.is_empty() {
        match dim {
            Some(dim) if dim.interval.is_some() => order.push("key_num ASC".to_string()),
            Some(_) => order.push(format!("{metric_column} DESC")),
            None => {}
        }
    }

    // ties take the direction of the first sort key
    let tie = match compiler.filter().sort.first() {
        Some(sort) if sort.descending => "DESC",
        _ => "ASC",
    };
    if dim.is_some_and(|d| d.key_num.is_some()) && !order.iter().any(|o| o.starts_with("key_num ")) {
        order.push(format!("key_num {tie}"));
    }
    order.extend(["key", "additional_key", "stage"].map(|column| format!("{column} {tie}")));
    Ok(order)
}

/// Build the aggregation for the filter's `across`
pub fn aggregation<D: Domain>(compiler: &Compiler<'_, D>) -> Result<AggregationPlan> {
    let filter = compiler.filter();
    let across = filter.across;
    let predicates = compiler.predicates()?;
    let dim = dimension(compiler, &across)?;
    let history = history_join(compiler, &predicates)?;
    let metric = compiler.metric();

    let null_text = || Sql::raw("NULL::text");
    let null_num = || Sql::raw("NULL::double precision");

    let mut base = Sql::raw("SELECT t.id AS record_id, ");
    match &dim {
        Some(d) => {
            base.append(&d.key)
                .push(" AS key, ")
                .append(&d.additional_key.clone().map_or_else(null_text, |s| s.wrapped()))
                .push(" AS additional_key, ")
                .append(d.key_num.as_ref().unwrap_or(&null_num()))
                .push(" AS key_num, ");
        }
        None => {
            base.push("NULL::text AS key, NULL::text AS additional_key, NULL::double precision AS key_num, ");
        }
    }

    base.push(if metric.is_staged() { "s.stage" } else { "NULL::text" })
        .push(" AS stage, ");

    match metric {
        Metric::Stats { value, .. } => {
            base.append(&value.wrapped()).push("::double precision AS value, ");
        }
        Metric::StageTimes | Metric::StageBounces | Metric::StateTransition => {
            base.push("s.value AS value, ");
        }
        Metric::Count | Metric::Collect(_) => {
            base.push("NULL::double precision AS value, ");
        }
    }

    match D::story_points() {
        Some(points) => base.push(format!("({points})::double precision AS story_points, ")),
        None => base.push("NULL::double precision AS story_points, "),
    };

    match metric {
        Metric::Collect(expr) => base.append(&expr.wrapped()).push("::text AS collected"),
        _ => base.push("NULL::text AS collected"),
    };

    base.push(format!(" FROM {}", D::SOURCE));
    if let Some(join) = dim.as_ref().and_then(|d| d.join.as_ref()) {
        base.append(join);
    }
    if let Some(join) = &history {
        base.append(join);
    }
    base.push(" WHERE ").append(&predicates.record_clause());

    let mut sql = Sql::raw("WITH base AS (");
    sql.append(&base).push(
        ") SELECT key, additional_key, key_num, stage, \
         COUNT(*) AS row_count, \
         COUNT(DISTINCT record_id) AS total_tickets, \
         MIN(value) AS min_value, \
         MAX(value) AS max_value, \
         AVG(value) AS mean_value, \
         SUM(value) AS sum_value, \
         PERCENTILE_DISC(0.5) WITHIN GROUP (ORDER BY value) AS median_value, \
         PERCENTILE_CONT(0.9) WITHIN GROUP (ORDER BY value) AS p90_value, \
         SUM(story_points) AS total_story_points, \
         COALESCE(array_agg(DISTINCT collected) FILTER (WHERE collected IS NOT NULL), '{}') AS collected_values \
         FROM base GROUP BY key, additional_key, key_num, stage",
    );

    let order = order_by(compiler, &across, dim.as_ref())?;
    sql.push(" ORDER BY ").push(order.join(", "));

    if filter.across_limit > 0 {
        sql.push(" LIMIT ").push_bind(i64::from(filter.across_limit));
    }

    Ok(AggregationPlan {
        statement: Statement::from(&sql),
        layout: Layout {
            shape: dim.as_ref().map(|d| d.shape),
            fallback: dim.as_ref().map_or(Fallback::Unknown, |d| d.fallback),
            interval: dim.as_ref().and_then(|d| d.interval),
            staged: metric.is_staged(),
        },
    })
}

/// Build a list call for one page
pub fn list<D: Domain>(compiler: &Compiler<'_, D>, page: u32, page_size: u32) -> Result<ListPlan> {
    let predicates = compiler.record_predicates()?;
    let clause = predicates.record_clause();

    let mut count = Sql::raw(format!("SELECT COUNT(*) FROM {} WHERE ", D::SOURCE));
    count.append(&clause);

    let mut order = Vec::new();
    for sort in &compiler.filter().sort {
        let field: D::Field = sort
            .field
            .trim()
            .parse()
            .map_err(|_| Error::configuration(format!("cannot sort {} records by '{}'", D::NAME, sort.field)))?;
        let spec = D::field(field, compiler.context());
        if spec.shape.is_array() || spec.scope == Scope::History {
            return Err(Error::configuration(format!("cannot sort {} records by '{field}'", D::NAME)));
        }
        let mut expr = if spec.shape == Shape::User {
            spec.display.unwrap_or(spec.expr).wrapped()
        } else {
            spec.expr.wrapped()
        };
        expr.push(if sort.descending { " DESC" } else { " ASC" });
        order.push(expr);
    }
    if order.is_empty() {
        let mut expr = D::field(D::DEFAULT_LIST_SORT, compiler.context()).expr.wrapped();
        expr.push(" DESC");
        order.push(expr);
    }
    order.push(Sql::raw("t.id ASC"));

    let mut rows = Sql::raw(format!("SELECT {} FROM {} WHERE ", D::LIST_COLUMNS, D::SOURCE));
    rows.append(&clause).push(" ORDER BY ");
    rows.append_joined(&order, ", ");
    rows.push(" LIMIT ")
        .push_bind(i64::from(page_size))
        .push(" OFFSET ")
        .push_bind(i64::from(page) * i64::from(page_size));

    Ok(ListPlan {
        count: Statement::from(&count),
        rows: Statement::from(&rows),
    })
}
