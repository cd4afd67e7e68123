//! Declarative aggregation and list requests

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::{BucketConfig, ChangeUnit};
use crate::error::{Error, Result};
use crate::macros::keyed_enum;
use crate::models::AggregationRecord;
use crate::query::{FieldSet, Keyed};
use crate::registry::DynamicKind;

keyed_enum! {
    /// Time bucket used for trend and timestamp dimensions
    pub enum Interval {
        Day => "day",
        Week => "week",
        Month => "month",
        Quarter => "quarter",
        Year => "year",
        /// Weekday, independent of date
        DayOfWeek => "day_of_week",
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::Day
    }
}

/// Primary or stack grouping dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Across<F> {
    /// One bucket holding everything
    #[default]
    None,
    /// Time buckets over the domain's trend timestamp
    Trend,
    /// A registered custom field, named by the companion key
    CustomField,
    /// A registered attribute, named by the companion key
    Attribute,
    /// A fixed domain field
    Field(F),
}

impl<F: Keyed> Across<F> {
    /// Name used in requests and sort keys
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Trend => "trend",
            Self::CustomField => DynamicKind::CustomField.as_str(),
            Self::Attribute => DynamicKind::Attribute.as_str(),
            Self::Field(f) => f.as_str(),
        }
    }
}

impl<F: Keyed> fmt::Display for Across<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<F: Keyed> FromStr for Across<F> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "trend" => Ok(Self::Trend),
            "custom_field" => Ok(Self::CustomField),
            "attribute" => Ok(Self::Attribute),
            _ => s
                .parse::<F>()
                .map(Self::Field)
                .map_err(|_| Error::configuration(format!("unknown across '{s}'"))),
        }
    }
}

impl<F: Keyed> Serialize for Across<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de, F: Keyed> Deserialize<'de> for Across<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A concrete field reference: a domain field or a dynamic key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldRef<F> {
    /// Fixed domain field
    Field(F),
    /// Dynamic key in one of the JSONB columns
    Dynamic(DynamicKind, String),
}

impl<F: Keyed> fmt::Display for FieldRef<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(field) => f.write_str(field.as_str()),
            Self::Dynamic(kind, key) => write!(f, "{kind}:{key}"),
        }
    }
}

impl<F: Keyed> FromStr for FieldRef<F> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((kind, key)) => Ok(Self::Dynamic(kind.parse()?, key.to_string())),
            None => Ok(Self::Field(s.parse()?)),
        }
    }
}

impl<F: Keyed> Serialize for FieldRef<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, F: Keyed> Deserialize<'de> for FieldRef<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Substring match operators; several operators on one field are ANDed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMatch {
    /// Value starts with
    #[serde(rename = "$begins", default, skip_serializing_if = "Option::is_none")]
    pub begins: Option<String>,
    /// Value ends with
    #[serde(rename = "$ends", default, skip_serializing_if = "Option::is_none")]
    pub ends: Option<String>,
    /// Value contains
    #[serde(rename = "$contains", default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
}

impl PartialMatch {
    /// Match a prefix
    pub fn begins(value: impl Into<String>) -> Self {
        Self {
            begins: Some(value.into()),
            ..Self::default()
        }
    }

    /// Match a suffix
    pub fn ends(value: impl Into<String>) -> Self {
        Self {
            ends: Some(value.into()),
            ..Self::default()
        }
    }

    /// Match a substring
    pub fn contains(value: impl Into<String>) -> Self {
        Self {
            contains: Some(value.into()),
            ..Self::default()
        }
    }

    /// True when no operator is set
    pub fn is_empty(&self) -> bool {
        self.begins.is_none() && self.ends.is_none() && self.contains.is_none()
    }
}

/// Inclusive range; timestamps are epoch seconds. A missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// Lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    /// Upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
}

impl Range {
    /// Range with both bounds
    pub fn between(low: f64, high: f64) -> Self {
        Self {
            low: Some(low),
            high: Some(high),
        }
    }

    /// True when neither side is bounded
    pub fn is_unbounded(&self) -> bool {
        self.low.is_none() && self.high.is_none()
    }
}

/// Sort configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortConfig {
    /// Across name, calculation name or statistic name
    pub field: String,
    /// Sort direction
    #[serde(default)]
    pub descending: bool,
}

impl SortConfig {
    /// Ascending sort on a field
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Descending sort on a field
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Predicates on dynamic keys of one JSONB column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicFilters {
    /// key -> accepted values
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub strict: BTreeMap<String, Vec<String>>,
    /// key -> rejected values
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub exclude: BTreeMap<String, Vec<String>>,
    /// key -> substring match
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub partial: BTreeMap<String, PartialMatch>,
    /// key -> numeric range
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ranges: BTreeMap<String, Range>,
    /// key -> true for absent, false for present
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub missing: BTreeMap<String, bool>,
}

impl DynamicFilters {
    /// True when no predicate is set
    pub fn is_empty(&self) -> bool {
        self.strict.is_empty()
            && self.exclude.is_empty()
            && self.partial.is_empty()
            && self.ranges.is_empty()
            && self.missing.is_empty()
    }

    /// Every key referenced by a predicate
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.strict
            .keys()
            .chain(self.exclude.keys())
            .chain(self.partial.keys())
            .chain(self.ranges.keys())
            .chain(self.missing.keys())
    }
}

/// Thresholds for derived labels, supplied per request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Classification {
    /// Unit the code change bucket measures
    pub code_change_unit: ChangeUnit,
    /// `small` / `medium` upper bounds
    #[serde(skip_serializing_if = "is_empty_config")]
    pub code_change_size_config: BucketConfig,
    /// `shallow` / `good` upper bounds
    #[serde(skip_serializing_if = "is_empty_config")]
    pub comment_density_size_config: BucketConfig,
}

fn is_empty_config(config: &BucketConfig) -> bool {
    config.0.is_empty()
}

/// A single-bucket restriction added by drilldown and stacking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "F: Keyed", deserialize = "F: Keyed"))]
pub struct Pin<F> {
    /// Field the bucket was grouped on
    pub field: FieldRef<F>,
    /// Bucket key, or the fallback label for the empty bucket
    pub value: String,
}

/// An aggregation or list request.
///
/// Built per request and never mutated after it is handed to a service;
/// the builder methods consume and return the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "F: Keyed, C: Keyed", deserialize = "F: Keyed, C: Keyed"))]
pub struct Filter<F, C> {
    /// Tenant every predicate is scoped to
    pub tenant: String,

    /// Primary grouping dimension
    #[serde(default)]
    pub across: Across<F>,
    /// Key for `across = custom_field`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_across: Option<String>,
    /// Key for `across = attribute`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_across: Option<String>,

    /// Nested grouping dimensions, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<Across<F>>,
    /// Key for a `custom_field` stack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_stack: Option<String>,
    /// Key for an `attribute` stack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_stack: Option<String>,

    /// Metric computed per bucket; the domain default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<C>,
    /// Time bucket for trend and timestamp dimensions
    #[serde(default, alias = "agg_interval", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,

    /// field -> accepted values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub strict: BTreeMap<F, Vec<String>>,
    /// field -> rejected values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exclude: BTreeMap<F, Vec<String>>,
    /// field -> substring match
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partial: BTreeMap<F, PartialMatch>,
    /// field -> inclusive range
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ranges: BTreeMap<F, Range>,
    /// field -> true for absent, false for present
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub missing: BTreeMap<F, bool>,
    /// Predicates on custom fields
    #[serde(default, skip_serializing_if = "DynamicFilters::is_empty")]
    pub custom_fields: DynamicFilters,
    /// Predicates on attributes
    #[serde(default, skip_serializing_if = "DynamicFilters::is_empty")]
    pub attributes: DynamicFilters,
    /// Bucket restrictions, ANDed with everything else
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pinned: Vec<Pin<F>>,

    /// Start state for state transition time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_state: Option<String>,
    /// End state for state transition time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_state: Option<String>,

    /// Sort keys, most significant first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortConfig>,
    /// Maximum number of buckets; 0 means unlimited
    #[serde(default)]
    pub across_limit: u32,
    /// Zero-based page for list requests
    #[serde(default)]
    pub page: u32,
    /// Page size for list requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,

    /// Thresholds for derived labels
    #[serde(default)]
    pub classification: Classification,
}

impl<F: FieldSet, C: Keyed> Filter<F, C> {
    /// Empty filter for a tenant
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            across: Across::None,
            custom_across: None,
            attribute_across: None,
            stacks: Vec::new(),
            custom_stack: None,
            attribute_stack: None,
            calculation: None,
            interval: None,
            strict: BTreeMap::new(),
            exclude: BTreeMap::new(),
            partial: BTreeMap::new(),
            ranges: BTreeMap::new(),
            missing: BTreeMap::new(),
            custom_fields: DynamicFilters::default(),
            attributes: DynamicFilters::default(),
            pinned: Vec::new(),
            from_state: None,
            to_state: None,
            sort: Vec::new(),
            across_limit: 0,
            page: 0,
            page_size: None,
            classification: Classification::default(),
        }
    }

    /// Parse a filter from JSON; malformed input is a configuration error
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::configuration(format!("invalid filter: {e}")))
    }

    /// Set the primary dimension
    #[must_use]
    pub fn across(mut self, across: Across<F>) -> Self {
        self.across = across;
        self
    }

    /// Group by a registered custom field
    #[must_use]
    pub fn across_custom_field(mut self, key: impl Into<String>) -> Self {
        self.across = Across::CustomField;
        self.custom_across = Some(key.into());
        self
    }

    /// Group by a registered attribute
    #[must_use]
    pub fn across_attribute(mut self, key: impl Into<String>) -> Self {
        self.across = Across::Attribute;
        self.attribute_across = Some(key.into());
        self
    }

    /// Add a stack dimension
    #[must_use]
    pub fn stack(mut self, stack: Across<F>) -> Self {
        self.stacks.push(stack);
        self
    }

    /// Set the calculation
    #[must_use]
    pub fn calculation(mut self, calculation: C) -> Self {
        self.calculation = Some(calculation);
        self
    }

    /// Set the time bucket
    #[must_use]
    pub fn interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Accept only these values of a field
    #[must_use]
    pub fn strict<I, S>(mut self, field: F, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strict.insert(field, values.into_iter().map(Into::into).collect());
        self
    }

    /// Reject these values of a field
    #[must_use]
    pub fn exclude<I, S>(mut self, field: F, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.insert(field, values.into_iter().map(Into::into).collect());
        self
    }

    /// Substring match on a field
    #[must_use]
    pub fn partial(mut self, field: F, matcher: PartialMatch) -> Self {
        self.partial.insert(field, matcher);
        self
    }

    /// Inclusive range on a field
    #[must_use]
    pub fn range(mut self, field: F, range: Range) -> Self {
        self.ranges.insert(field, range);
        self
    }

    /// Require a field to be absent (`true`) or present (`false`)
    #[must_use]
    pub fn missing(mut self, field: F, missing: bool) -> Self {
        self.missing.insert(field, missing);
        self
    }

    /// Accept only these values of a custom field
    #[must_use]
    pub fn custom_field<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_fields
            .strict
            .insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Accept only these values of an attribute
    #[must_use]
    pub fn attribute<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .strict
            .insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// States for state transition time
    #[must_use]
    pub fn transition(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_state = Some(from.into());
        self.to_state = Some(to.into());
        self
    }

    /// Add a sort key
    #[must_use]
    pub fn sort(mut self, sort: SortConfig) -> Self {
        self.sort.push(sort);
        self
    }

    /// Cap the number of buckets; 0 means unlimited
    #[must_use]
    pub fn across_limit(mut self, limit: u32) -> Self {
        self.across_limit = limit;
        self
    }

    /// Page through list results
    #[must_use]
    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = Some(page_size);
        self
    }

    /// Set classification thresholds
    #[must_use]
    pub fn classification(mut self, classification: Classification) -> Self {
        self.classification = classification;
        self
    }

    /// Predicates for one dynamic column
    pub fn dynamic(&self, kind: DynamicKind) -> &DynamicFilters {
        match kind {
            DynamicKind::CustomField => &self.custom_fields,
            DynamicKind::Attribute => &self.attributes,
        }
    }

    /// True when a matcher, dimension or pin refers to `field`
    pub fn names_field(&self, field: F) -> bool {
        has_values(self.strict.get(&field))
            || has_values(self.exclude.get(&field))
            || self.partial.contains_key(&field)
            || self.ranges.get(&field).is_some_and(|r| !r.is_unbounded())
            || self.missing.contains_key(&field)
            || self.across == Across::Field(field)
            || self.stacks.contains(&Across::Field(field))
            || self.pinned.iter().any(|p| p.field == FieldRef::Field(field))
    }

    /// Concrete field for a dimension, reading the companion key.
    ///
    /// `None` for `across = none`. Trend resolves to the domain's trend
    /// timestamp.
    pub fn field_ref(&self, across: &Across<F>, stacked: bool) -> Result<Option<FieldRef<F>>> {
        let (custom, attribute) = if stacked {
            (&self.custom_stack, &self.attribute_stack)
        } else {
            (&self.custom_across, &self.attribute_across)
        };
        let companion = |key: &Option<String>, kind: DynamicKind| match key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(FieldRef::Dynamic(kind, key.to_string())),
            _ => Err(Error::configuration(format!(
                "{} '{kind}' requires a {kind} key",
                if stacked { "stack" } else { "across" }
            ))),
        };

        match across {
            Across::None => Ok(None),
            Across::Trend => Ok(Some(FieldRef::Field(F::TREND))),
            Across::Field(f) => Ok(Some(FieldRef::Field(*f))),
            Across::CustomField => companion(custom, DynamicKind::CustomField).map(Some),
            Across::Attribute => companion(attribute, DynamicKind::Attribute).map(Some),
        }
    }

    /// Narrow the filter to one bucket of `across`.
    ///
    /// The result lists exactly the records counted in that bucket.
    pub fn pinned_to(&self, across: &Across<F>, stacked: bool, bucket: &AggregationRecord) -> Result<Self> {
        let mut pinned = self.clone();
        if let Some(field) = self.field_ref(across, stacked)? {
            let value = bucket
                .key
                .clone()
                .or_else(|| bucket.additional_key.clone())
                .ok_or_else(|| Error::configuration("bucket has neither key nor additional key"))?;
            pinned.pinned.push(Pin { field, value });
        }
        if let (Some(stage), Some(field)) = (&bucket.stage, F::STAGE) {
            pinned.pinned.push(Pin {
                field: FieldRef::Field(field),
                value: stage.clone(),
            });
        }
        if stacked {
            pinned.custom_across = self.custom_stack.clone();
            pinned.attribute_across = self.attribute_stack.clone();
        }
        pinned.across = *across;
        pinned.across_limit = 0;
        Ok(pinned)
    }

    /// Canonical JSON digest; equal filters hash equally
    pub fn cache_hash(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }

    /// Reject combinations that have no defined meaning
    pub fn validate(&self) -> Result<()> {
        if self.tenant.trim().is_empty() {
            return Err(Error::configuration("tenant is required"));
        }
        for field in self.strict.keys() {
            if has_values(self.strict.get(field)) && has_values(self.exclude.get(field)) {
                return Err(Error::configuration(format!(
                    "'{field}' has both strict and exclude values"
                )));
            }
        }
        for kind in DynamicKind::ALL {
            let filters = self.dynamic(*kind);
            for key in filters.strict.keys() {
                if has_values(filters.strict.get(key)) && has_values(filters.exclude.get(key)) {
                    return Err(Error::configuration(format!(
                        "{kind} '{key}' has both strict and exclude values"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Values after dropping blanks; an empty result means "no restriction"
pub fn effective_values(values: &[String]) -> Vec<String> {
    values
        .iter()
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .collect()
}

fn has_values(values: Option<&Vec<String>>) -> bool {
    values.is_some_and(|v| !effective_values(v).is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::issues::{IssueCalculation, IssueField};
    use pretty_assertions::assert_eq;

    type IssueFilter = Filter<IssueField, IssueCalculation>;

    #[test]
    fn test_filter_json_shape() {
        let filter = IssueFilter::from_json(
            r#"{
                "tenant": "acme",
                "across": "custom_field",
                "custom_across": "customfield_10020",
                "calculation": "ticket_count",
                "agg_interval": "quarter",
                "strict": {"status": ["OPEN", "DONE"]},
                "partial": {"project": {"$begins": "PLAT"}},
                "ranges": {"issue_created": {"low": 1600000000}},
                "sort": [{"field": "ticket_count", "descending": true}],
                "across_limit": 5
            }"#,
        )
        .unwrap();

        assert_eq!(filter.across, Across::CustomField);
        assert_eq!(filter.interval, Some(Interval::Quarter));
        assert_eq!(filter.strict[&IssueField::Status], vec!["OPEN", "DONE"]);
        assert_eq!(filter.partial[&IssueField::Project], PartialMatch::begins("PLAT"));
        assert_eq!(filter.ranges[&IssueField::IssueCreated].high, None);
        assert_eq!(filter.across_limit, 5);
    }

    #[test]
    fn test_unknown_across_is_configuration_error() {
        let err = IssueFilter::from_json(r#"{"tenant": "acme", "across": "planet"}"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_calculation_is_configuration_error() {
        let err = IssueFilter::from_json(r#"{"tenant": "acme", "calculation": "vibes"}"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_missing_companion_key() {
        let filter = IssueFilter::new("acme").across(Across::CustomField);
        let err = filter.field_ref(&filter.across, false).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let filter = IssueFilter::new("acme").across_attribute("team");
        assert_eq!(
            filter.field_ref(&filter.across, false).unwrap(),
            Some(FieldRef::Dynamic(DynamicKind::Attribute, "team".to_string()))
        );
    }

    #[test]
    fn test_strict_and_exclude_on_same_field_rejected() {
        let filter = IssueFilter::new("acme")
            .strict(IssueField::Status, ["OPEN"])
            .exclude(IssueField::Status, ["DONE"]);
        assert!(matches!(filter.validate(), Err(Error::Configuration(_))));

        // blank values do not count as a restriction
        let filter = IssueFilter::new("acme")
            .strict(IssueField::Status, [""])
            .exclude(IssueField::Status, ["DONE"]);
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn test_cache_hash_is_stable() {
        let a = IssueFilter::new("acme")
            .strict(IssueField::Status, ["OPEN"])
            .strict(IssueField::Priority, ["HIGH"]);
        let b = IssueFilter::new("acme")
            .strict(IssueField::Priority, ["HIGH"])
            .strict(IssueField::Status, ["OPEN"]);
        let c = a.clone().across_limit(3);

        assert_eq!(a.cache_hash().unwrap(), b.cache_hash().unwrap());
        assert_ne!(a.cache_hash().unwrap(), c.cache_hash().unwrap());
        assert_eq!(a.cache_hash().unwrap().len(), 64);
    }

    #[test]
    fn test_pinned_to_uses_additional_key_for_unassigned_users() {
        let filter = IssueFilter::new("acme").across(Across::Field(IssueField::Assignee));
        let bucket = AggregationRecord {
            additional_key: Some("_UNASSIGNED_".to_string()),
            ..AggregationRecord::default()
        };
        let pinned = filter.pinned_to(&filter.across, false, &bucket).unwrap();
        assert_eq!(
            pinned.pinned,
            vec![Pin {
                field: FieldRef::Field(IssueField::Assignee),
                value: "_UNASSIGNED_".to_string(),
            }]
        );
    }

    #[test]
    fn test_trend_pins_to_trend_field() {
        let filter = IssueFilter::new("acme").across(Across::Trend).across_limit(2);
        let bucket = AggregationRecord {
            key: Some("1622505600".to_string()),
            ..AggregationRecord::default()
        };
        let pinned = filter.pinned_to(&filter.across, false, &bucket).unwrap();
        assert_eq!(pinned.pinned[0].field, FieldRef::Field(IssueField::TREND));
        assert_eq!(pinned.across_limit, 0);
    }

    #[test]
    fn test_field_ref_round_trips_through_json() {
        let pin: Pin<IssueField> =
            serde_json::from_str(r#"{"field": "custom_field:customfield_1", "value": "x"}"#).unwrap();
        assert_eq!(
            pin.field,
            FieldRef::Dynamic(DynamicKind::CustomField, "customfield_1".to_string())
        );
        assert_eq!(
            serde_json::to_string(&pin).unwrap(),
            r#"{"field":"custom_field:customfield_1","value":"x"}"#
        );
    }
}
