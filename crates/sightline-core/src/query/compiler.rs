//! Filter to predicate compilation
//!
//! Every predicate is parameterized. Dynamic keys are checked against the
//! tenant's [`FieldCatalog`] and then bound like any other value, so no
//! request string ever reaches the SQL text.

use crate::error::{Error, Result};
use crate::models::{effective_values, FieldRef, Interval, PartialMatch, Range};
use crate::query::sql::{escape_like, Sql};
use crate::query::trend::bucket_key;
use crate::query::{Domain, DomainFilter, FieldContext, FieldSpec, Keyed, Metric, Scope, Shape};
use crate::registry::{DynamicKind, FieldCatalog, FieldType};

/// Compiled predicates, ANDed by the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicates {
    /// Predicates over the record row `t`, tenant scope first
    pub record: Vec<Sql>,
    /// Predicates over history rows `h`, used by stage calculations
    pub history: Vec<Sql>,
}

impl Predicates {
    /// `record` joined with AND
    pub fn record_clause(&self) -> Sql {
        and(&self.record)
    }

    /// `history` joined with AND, prefixed with AND when non-empty
    pub fn history_clause(&self) -> Sql {
        let mut sql = Sql::new();
        for p in &self.history {
            sql.push(" AND ").append(p);
        }
        sql
    }
}

fn and(parts: &[Sql]) -> Sql {
    let mut sql = Sql::new();
    sql.append_joined(parts, " AND ");
    sql
}

/// Compiles one filter against one domain
pub struct Compiler<'a, D: Domain> {
    filter: &'a DomainFilter<D>,
    catalog: &'a FieldCatalog,
    ctx: FieldContext,
    calculation: D::Calculation,
    metric: Metric,
}

impl<'a, D: Domain> Compiler<'a, D> {
    /// Validate the filter and resolve request-scoped settings
    pub fn new(filter: &'a DomainFilter<D>, catalog: &'a FieldCatalog) -> Result<Self> {
        filter.validate()?;
        if catalog.tenant() != filter.tenant {
            return Err(Error::configuration(format!(
                "field catalog for '{}' used with tenant '{}'",
                catalog.tenant(),
                filter.tenant
            )));
        }
        let calculation = filter.calculation.unwrap_or(D::DEFAULT_CALCULATION);
        Ok(Self {
            filter,
            catalog,
            ctx: FieldContext::from_classification(&filter.classification)?,
            calculation,
            metric: D::metric(calculation),
        })
    }

    /// Filter being compiled
    pub fn filter(&self) -> &DomainFilter<D> {
        self.filter
    }

    /// Effective calculation
    pub fn calculation(&self) -> D::Calculation {
        self.calculation
    }

    /// Metric of the effective calculation
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Interval for time buckets
    pub fn interval(&self) -> Interval {
        self.filter.interval.unwrap_or_default()
    }

    /// Request-scoped field inputs
    pub fn context(&self) -> &FieldContext {
        &self.ctx
    }

    /// SQL behind a field reference, checking dynamic keys
    pub fn resolve(&self, field: &FieldRef<D::Field>) -> Result<FieldSpec> {
        match field {
            FieldRef::Field(f) => Ok(D::field(*f, &self.ctx)),
            FieldRef::Dynamic(kind, key) => self.resolve_dynamic(*kind, key),
        }
    }

    fn resolve_dynamic(&self, kind: DynamicKind, key: &str) -> Result<FieldSpec> {
        let column = D::dynamic_column(kind)
            .ok_or_else(|| Error::configuration(format!("{} records have no {kind} fields", D::NAME)))?;
        let definition = self.catalog.resolve(kind, key)?;

        let mut text = Sql::raw(format!("({column} ->> "));
        text.push_bind(definition.key.as_str()).push(")");

        Ok(match definition.field_type {
            FieldType::String => FieldSpec::derived(text),
            FieldType::Array => {
                let mut node = Sql::raw(format!("({column} -> "));
                node.push_bind(definition.key.as_str()).push(")");
                let mut expr = Sql::raw("ARRAY(SELECT jsonb_array_elements_text(CASE WHEN jsonb_typeof(");
                expr.append(&node)
                    .push(") = 'array' THEN ")
                    .append(&node)
                    .push(" ELSE '[]'::jsonb END))");
                FieldSpec {
                    shape: Shape::TextArray,
                    ..FieldSpec::derived(expr)
                }
            }
            FieldType::Number => {
                let mut expr = Sql::raw("(CASE WHEN ");
                expr.append(&text)
                    .push(r" ~ '^-?[0-9]+(\.[0-9]+)?$' THEN ")
                    .append(&text)
                    .push("::double precision END)");
                FieldSpec {
                    shape: Shape::Number,
                    ..FieldSpec::derived(expr)
                }
            }
        })
    }

    /// Compile every predicate of the filter for an aggregation.
    ///
    /// Stage calculations receive history-scoped predicates separately so
    /// they restrict stage rows instead of records.
    pub fn predicates(&self) -> Result<Predicates> {
        self.predicates_for(self.metric.is_staged())
    }

    /// Compile every predicate with history-scoped ones as record-level
    /// `EXISTS` checks, as list calls need
    pub fn record_predicates(&self) -> Result<Predicates> {
        self.predicates_for(false)
    }

    fn predicates_for(&self, staged: bool) -> Result<Predicates> {
        let mut out = Predicates::default();
        let mut tenant = Sql::raw("t.tenant_id = ");
        tenant.push_bind(self.filter.tenant.as_str());
        out.record.push(tenant);

        if let Some(snapshot) = D::snapshot() {
            if !self.filter.names_field(snapshot.field) {
                out.record.push(Sql::raw(snapshot.latest));
            }
        }

        for (field, values) in &self.filter.strict {
            let spec = D::field(*field, &self.ctx);
            if let Some(p) = self.match_values(&spec, values)? {
                self.route(&mut out, &spec, p, false, staged);
            }
        }
        for (field, values) in &self.filter.exclude {
            let spec = D::field(*field, &self.ctx);
            if let Some(p) = self.match_values(&spec, values)? {
                self.route(&mut out, &spec, p, true, staged);
            }
        }
        for (field, matcher) in &self.filter.partial {
            let spec = D::field(*field, &self.ctx);
            if let Some(p) = partial(&spec, field.as_str(), matcher)? {
                self.route(&mut out, &spec, p, false, staged);
            }
        }
        for (field, range) in &self.filter.ranges {
            let spec = D::field(*field, &self.ctx);
            if let Some(p) = range_predicate(&spec, field.as_str(), range)? {
                self.route(&mut out, &spec, p, false, staged);
            }
        }
        for (field, missing) in &self.filter.missing {
            let spec = D::field(*field, &self.ctx);
            let (p, negate) = (is_empty(&spec), !*missing);
            self.route(&mut out, &spec, p, negate, staged);
        }

        for kind in DynamicKind::ALL {
            let dynamic = self.filter.dynamic(*kind);
            for (key, values) in &dynamic.strict {
                let spec = self.resolve_dynamic(*kind, key)?;
                if let Some(p) = self.match_values(&spec, values)? {
                    out.record.push(p);
                }
            }
            for (key, values) in &dynamic.exclude {
                let spec = self.resolve_dynamic(*kind, key)?;
                if let Some(p) = self.match_values(&spec, values)? {
                    out.record.push(negated(&p));
                }
            }
            for (key, matcher) in &dynamic.partial {
                let spec = self.resolve_dynamic(*kind, key)?;
                if let Some(p) = partial(&spec, key, matcher)? {
                    out.record.push(p);
                }
            }
            for (key, range) in &dynamic.ranges {
                let spec = self.resolve_dynamic(*kind, key)?;
                if let Some(p) = range_predicate(&spec, key, range)? {
                    out.record.push(p);
                }
            }
            for (key, missing) in &dynamic.missing {
                let spec = self.resolve_dynamic(*kind, key)?;
                let p = is_empty(&spec);
                out.record.push(if *missing { p } else { negated(&p) });
            }
        }

        for pin in &self.filter.pinned {
            let spec = self.resolve(&pin.field)?;
            if let Some(p) = self.match_values(&spec, std::slice::from_ref(&pin.value))? {
                self.route(&mut out, &spec, p, false, staged);
            }
        }

        Ok(out)
    }

    /// Whether the filter restricts any history-scoped field by value
    pub fn has_stage_filter(&self) -> bool {
        let restricts = |field: &D::Field, values: &Vec<String>| {
            D::field(*field, &self.ctx).scope == Scope::History && !effective_values(values).is_empty()
        };
        self.filter.strict.iter().any(|(f, v)| restricts(f, v))
            || self.filter.exclude.iter().any(|(f, v)| restricts(f, v))
    }

    fn route(&self, out: &mut Predicates, spec: &FieldSpec, predicate: Sql, negate: bool, staged: bool) {
        match spec.scope {
            Scope::Record => out.record.push(if negate { negated(&predicate) } else { predicate }),
            Scope::History if staged => {
                out.history.push(if negate { negated(&predicate) } else { predicate });
            }
            Scope::History => {
                let exists = self.history_exists(&predicate);
                out.record.push(if negate {
                    let mut sql = Sql::raw("NOT ");
                    sql.append(&exists);
                    sql
                } else {
                    exists
                });
            }
        }
    }

    fn history_exists(&self, predicate: &Sql) -> Sql {
        match D::history() {
            Some(history) => {
                let mut sql = Sql::raw(format!(
                    "EXISTS (SELECT 1 FROM {table} h WHERE h.tenant_id = t.tenant_id AND h.{record} = t.id AND ",
                    table = history.table,
                    record = history.record_column,
                ));
                sql.append(predicate).push(")");
                sql
            }
            None => Sql::raw("false"),
        }
    }

    /// Predicate true when the field holds one of `values`.
    ///
    /// Blank values are ignored and an empty list is no restriction. The
    /// field's fallback label matches the empty group.
    pub fn match_values(&self, spec: &FieldSpec, values: &[String]) -> Result<Option<Sql>> {
        let values = effective_values(values);
        if values.is_empty() {
            return Ok(None);
        }
        let (fallback, values): (Vec<String>, Vec<String>) =
            values.into_iter().partition(|v| v == spec.fallback.as_str());

        let mut parts = Vec::with_capacity(2);
        if !values.is_empty() {
            parts.push(self.value_match(spec, values)?);
        }
        if !fallback.is_empty() {
            parts.push(is_empty(spec));
        }

        let mut sql = Sql::new();
        sql.append_joined(&parts, " OR ");
        Ok(Some(sql.wrapped()))
    }

    fn value_match(&self, spec: &FieldSpec, values: Vec<String>) -> Result<Sql> {
        let expr = spec.expr.wrapped();
        let mut sql = Sql::new();
        match spec.shape {
            Shape::Text => {
                sql.append(&expr).push(" = ANY(").push_bind(values).push(")");
            }
            Shape::TextArray => {
                sql.append(&expr).push(" && ").push_bind(values).push("::text[]");
            }
            Shape::User | Shape::UserArray => {
                let display = spec.display.clone().unwrap_or_else(|| spec.expr.clone()).wrapped();
                let op = if spec.shape == Shape::User { " = ANY(" } else { " && (" };
                sql.push("(")
                    .append(&expr)
                    .push(op)
                    .push_bind(values.clone())
                    .push("::text[]) OR ")
                    .append(&display)
                    .push(op)
                    .push_bind(values)
                    .push("::text[]))");
            }
            Shape::Number => {
                sql.append(&expr).push("::text = ANY(").push_bind(values).push(")");
            }
            Shape::Timestamp => {
                let keys = values
                    .iter()
                    .map(|v| {
                        v.trim().parse::<i64>().map_err(|_| {
                            Error::configuration(format!("'{v}' is not a time bucket key"))
                        })
                    })
                    .collect::<Result<Vec<i64>>>()?;
                sql.append(&bucket_key(self.interval(), &spec.expr))
                    .push(" = ANY(")
                    .push_bind(keys)
                    .push(")");
            }
        }
        Ok(sql)
    }
}

/// `NOT COALESCE(p, false)`: rows where `p` is NULL are kept
fn negated(predicate: &Sql) -> Sql {
    let mut sql = Sql::raw("NOT COALESCE(");
    sql.append(predicate).push(", false)");
    sql
}

/// Predicate true when the field is absent
pub fn is_empty(spec: &FieldSpec) -> Sql {
    let expr = spec.expr.wrapped();
    let mut sql = Sql::new();
    match spec.shape {
        Shape::Text | Shape::User => {
            sql.push("NULLIF(").append(&expr).push("::text, '') IS NULL");
        }
        Shape::TextArray | Shape::UserArray => {
            sql.push("COALESCE(cardinality(").append(&expr).push("), 0) = 0");
        }
        Shape::Number | Shape::Timestamp => {
            sql.append(&expr).push(" IS NULL");
        }
    }
    sql.wrapped()
}

fn partial(spec: &FieldSpec, name: &str, matcher: &PartialMatch) -> Result<Option<Sql>> {
    let patterns: Vec<String> = [
        matcher.begins.as_deref().map(|v| format!("{}%", escape_like(v))),
        matcher.ends.as_deref().map(|v| format!("%{}", escape_like(v))),
        matcher.contains.as_deref().map(|v| format!("%{}%", escape_like(v))),
    ]
    .into_iter()
    .flatten()
    .filter(|p| !p.trim_matches('%').is_empty())
    .collect();
    if patterns.is_empty() {
        return Ok(None);
    }

    let target = match spec.shape {
        Shape::Text | Shape::TextArray => spec.expr.wrapped(),
        Shape::User | Shape::UserArray => spec.display.clone().unwrap_or_else(|| spec.expr.clone()).wrapped(),
        Shape::Number | Shape::Timestamp => {
            return Err(Error::configuration(format!("'{name}' does not support partial match")));
        }
    };

    let parts: Vec<Sql> = patterns
        .into_iter()
        .map(|pattern| {
            let mut sql = Sql::new();
            if spec.shape.is_array() {
                sql.push("EXISTS (SELECT 1 FROM unnest(")
                    .append(&target)
                    .push(") AS p(v) WHERE p.v ILIKE ")
                    .push_bind(pattern)
                    .push(")");
            } else {
                sql.append(&target).push(" ILIKE ").push_bind(pattern);
            }
            sql
        })
        .collect();
    Ok(Some(and(&parts).wrapped()))
}

fn range_predicate(spec: &FieldSpec, name: &str, range: &Range) -> Result<Option<Sql>> {
    if range.is_unbounded() {
        return Ok(None);
    }
    let bound = |value: f64| -> Sql {
        match spec.shape {
            Shape::Timestamp => {
                let mut sql = Sql::raw("to_timestamp(");
                sql.push_bind(value).push(")");
                sql
            }
            _ => Sql::bind(value),
        }
    };
    if !matches!(spec.shape, Shape::Number | Shape::Timestamp) {
        return Err(Error::configuration(format!("'{name}' does not support range filters")));
    }

    let expr = spec.expr.wrapped();
    let mut parts = Vec::with_capacity(2);
    if let Some(low) = range.low {
        let mut sql = expr.clone();
        sql.push(" >= ").append(&bound(low));
        parts.push(sql);
    }
    if let Some(high) = range.high {
        let mut sql = expr.clone();
        sql.push(" <= ").append(&bound(high));
        parts.push(sql);
    }
    Ok(Some(and(&parts).wrapped()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::issues::{IssueField, Issues};
    use crate::models::{Across, Filter, Pin};
    use crate::query::sql::{Param, Statement};
    use crate::registry::FieldDefinition;
    use pretty_assertions::assert_eq;

    fn catalog() -> FieldCatalog {
        FieldCatalog::new(
            "acme",
            [
                FieldDefinition {
                    kind: DynamicKind::CustomField,
                    key: "customfield_10020".to_string(),
                    name: "Sprint".to_string(),
                    field_type: FieldType::String,
                },
                FieldDefinition {
                    kind: DynamicKind::Attribute,
                    key: "teams".to_string(),
                    name: "Teams".to_string(),
                    field_type: FieldType::Array,
                },
            ],
        )
    }

    fn compile(filter: &DomainFilter<Issues>) -> Result<Statement> {
        let catalog = catalog();
        let compiler = Compiler::<Issues>::new(filter, &catalog)?;
        let predicates = compiler.predicates()?;
        Ok(Statement::from(&predicates.record_clause()))
    }

    /// Tenant scope and latest-snapshot restriction, then `rest`
    fn scoped(rest: &str) -> String {
        let latest = Issues::snapshot().unwrap().latest;
        if rest.is_empty() {
            format!("t.tenant_id = $1 AND {latest}")
        } else {
            format!("t.tenant_id = $1 AND {latest} AND {rest}")
        }
    }

    #[test]
    fn test_tenant_is_first_parameter() {
        let stmt = compile(&Filter::new("acme")).unwrap();
        assert_eq!(stmt.sql, scoped(""));
        assert_eq!(stmt.params, vec![Param::Text("acme".into())]);
    }

    #[test]
    fn test_blank_strict_values_are_no_restriction() {
        let stmt = compile(&Filter::new("acme").strict(IssueField::Assignee, [""])).unwrap();
        assert_eq!(stmt.sql, scoped(""));

        let stmt = compile(&Filter::new("acme").strict(IssueField::Status, Vec::<String>::new())).unwrap();
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn test_strict_text_uses_any() {
        let stmt = compile(&Filter::new("acme").strict(IssueField::Status, ["OPEN", "DONE"])).unwrap();
        assert_eq!(stmt.sql, scoped("((t.status) = ANY($2))"));
        assert_eq!(stmt.params[1], Param::TextArray(vec!["OPEN".into(), "DONE".into()]));
    }

    #[test]
    fn test_exclude_keeps_null_rows() {
        let stmt = compile(&Filter::new("acme").exclude(IssueField::Status, ["DONE"])).unwrap();
        assert_eq!(
            stmt.sql,
            scoped("NOT COALESCE(((t.status) = ANY($2)), false)")
        );
    }

    #[test]
    fn test_fallback_label_matches_empty() {
        let stmt = compile(&Filter::new("acme").strict(IssueField::Priority, ["_UNPRIORITIZED_", "HIGH"])).unwrap();
        assert_eq!(
            stmt.sql,
            scoped("((t.priority) = ANY($2) OR (NULLIF((t.priority)::text, '') IS NULL))")
        );
        assert_eq!(stmt.params[1], Param::TextArray(vec!["HIGH".into()]));
    }

    #[test]
    fn test_user_field_matches_id_or_name() {
        let stmt = compile(&Filter::new("acme").strict(IssueField::Assignee, ["alice"])).unwrap();
        assert!(stmt.sql.contains("((t.assignee_id) = ANY($2::text[]) OR (t.assignee) = ANY($3::text[]))"));
    }

    #[test]
    fn test_partial_operators_are_anded_and_escaped() {
        let matcher = PartialMatch {
            begins: Some("PLAT".into()),
            contains: Some("50%".into()),
            ends: None,
        };
        let stmt = compile(&Filter::new("acme").partial(IssueField::Project, matcher)).unwrap();
        assert_eq!(
            stmt.sql,
            scoped("((t.project) ILIKE $2 AND (t.project) ILIKE $3)")
        );
        assert_eq!(stmt.params[1], Param::Text("PLAT%".into()));
        assert_eq!(stmt.params[2], Param::Text("%50\\%%".into()));
    }

    #[test]
    fn test_partial_on_number_is_configuration_error() {
        let err = compile(&Filter::new("acme").partial(IssueField::StoryPoints, PartialMatch::begins("1"))).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_range_is_inclusive_and_open_ended() {
        let filter = Filter::new("acme").range(IssueField::IssueCreated, Range { low: Some(100.0), high: None });
        let stmt = compile(&filter).unwrap();
        assert_eq!(
            stmt.sql,
            scoped("((t.issue_created_at) >= to_timestamp($2))")
        );

        let filter = Filter::new("acme").range(IssueField::StoryPoints, Range::between(1.0, 5.0));
        let stmt = compile(&filter).unwrap();
        assert!(stmt.sql.ends_with("((t.story_points) >= $2 AND (t.story_points) <= $3)"));
    }

    #[test]
    fn test_dynamic_key_is_bound_not_interpolated() {
        let stmt = compile(&Filter::new("acme").custom_field("customfield_10020", ["Sprint 4"])).unwrap();
        assert!(!stmt.sql.contains("customfield_10020"));
        assert_eq!(stmt.params[1], Param::Text("customfield_10020".into()));
    }

    #[test]
    fn test_unregistered_dynamic_key_fails_closed() {
        let err = compile(&Filter::new("acme").custom_field("customfield_99999", ["x"])).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));

        let err = compile(&Filter::new("acme").attribute("x'); DROP TABLE issues; --", ["x"])).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));
    }

    #[test]
    fn test_stage_filter_outside_stage_reports_uses_exists() {
        let stmt = compile(&Filter::new("acme").strict(IssueField::Stage, ["Closed"])).unwrap();
        assert!(stmt.sql.contains(
            "EXISTS (SELECT 1 FROM issue_status_history h WHERE h.tenant_id = t.tenant_id AND h.issue_id = t.id AND ((h.status) = ANY($2)))"
        ));
    }

    #[test]
    fn test_time_bucket_pin() {
        let mut filter = Filter::new("acme").interval(Interval::Month);
        filter.pinned.push(Pin {
            field: FieldRef::Field(IssueField::IssueCreated),
            value: "1622505600".into(),
        });
        let stmt = compile(&filter).unwrap();
        assert!(stmt.sql.contains("date_trunc('month'"));
        assert_eq!(stmt.params[1], Param::IntArray(vec![1_622_505_600]));

        filter.pinned[0].value = "June".into();
        assert!(matches!(compile(&filter), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_snapshot_restriction_dropped_when_named() {
        let stmt = compile(&Filter::new("acme").strict(IssueField::IngestedAt, ["1700000000"])).unwrap();
        assert_eq!(stmt.sql, "t.tenant_id = $1 AND ((t.ingested_at)::text = ANY($2))");

        let filter = Filter::new("acme").range(IssueField::IngestedAt, Range::between(1.0, 2.0));
        assert!(!compile(&filter).unwrap().sql.contains("MAX(v.ingested_at)"));

        let filter = Filter::new("acme").across(Across::Field(IssueField::IngestedAt));
        assert!(!compile(&filter).unwrap().sql.contains("MAX(v.ingested_at)"));

        // a blank value names nothing
        let stmt = compile(&Filter::new("acme").strict(IssueField::IngestedAt, [""])).unwrap();
        assert_eq!(stmt.sql, scoped(""));
    }

    #[test]
    fn test_catalog_for_other_tenant_rejected() {
        let filter: DomainFilter<Issues> = Filter::new("globex");
        let catalog = catalog();
        assert!(Compiler::<Issues>::new(&filter, &catalog).is_err());
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let filter = Filter::new("acme")
            .strict(IssueField::Status, ["OPEN"])
            .exclude(IssueField::Label, ["wontfix"])
            .attribute("teams", ["core"]);
        assert_eq!(compile(&filter).unwrap(), compile(&filter).unwrap());
    }
}
