//! Flat filter chains over list fields.
//!
//! Conditions are joined left to right by their `logicalOperator`. There is
//! no grouping and no precedence: `a OR b AND c` means `(a OR b) AND c`.

use crate::error::CrmError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Select,
    Date,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Contains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Before,
    After,
    Between,
}

impl Operator {
    pub fn for_type(field_type: FieldType) -> &'static [Operator] {
        match field_type {
            FieldType::Text => &[
                Operator::Contains,
                Operator::Equals,
                Operator::NotEquals,
                Operator::StartsWith,
                Operator::EndsWith,
            ],
            FieldType::Select => &[
                Operator::Equals,
                Operator::NotEquals,
                Operator::In,
                Operator::NotIn,
            ],
            FieldType::Date => &[
                Operator::Equals,
                Operator::Before,
                Operator::After,
                Operator::Between,
            ],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Operator::Contains => "contains",
            Operator::Equals => "equals",
            Operator::NotEquals => "does not equal",
            Operator::StartsWith => "starts with",
            Operator::EndsWith => "ends with",
            Operator::In => "is one of",
            Operator::NotIn => "is not one of",
            Operator::Before => "is before",
            Operator::After => "is after",
            Operator::Between => "is between",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// A filterable field of a list view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub options: Vec<String>,
}

impl FieldDef {
    pub fn text(name: &str, label: &str) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type: FieldType::Text,
            options: Vec::new(),
        }
    }

    pub fn select(name: &str, label: &str, options: &[&str]) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type: FieldType::Select,
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    pub fn date(name: &str, label: &str) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type: FieldType::Date,
            options: Vec::new(),
        }
    }
}

pub fn contact_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::text("firstName", "First name"),
        FieldDef::text("lastName", "Last name"),
        FieldDef::text("email", "Email"),
        FieldDef::text("company", "Company"),
        FieldDef::select("status", "Status", &["lead", "prospect", "customer", "churned"]),
        FieldDef::text("tags", "Tags"),
        FieldDef::date("createdAt", "Created"),
    ]
}

pub fn deal_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::text("title", "Title"),
        FieldDef::select(
            "stage",
            "Stage",
            &["new", "contacted", "proposal", "closed_won", "closed_lost"],
        ),
        FieldDef::text("tags", "Tags"),
        FieldDef::date("lastActivityAt", "Last activity"),
        FieldDef::date("createdAt", "Created"),
    ]
}

pub fn task_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::text("title", "Title"),
        FieldDef::select("completed", "Completed", &["true", "false"]),
        FieldDef::date("dueAt", "Due"),
    ]
}

pub fn campaign_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::text("name", "Name"),
        FieldDef::select("channel", "Channel", &["email", "sms"]),
        FieldDef::select(
            "status",
            "Status",
            &["draft", "scheduled", "sending", "sent", "paused"],
        ),
        FieldDef::date("scheduledAt", "Scheduled"),
    ]
}

/// A row of the builder as the user is editing it. Any part may be blank.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub operator: Option<Operator>,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
}

impl FilterCondition {
    /// Field, operator and value are all filled in.
    pub fn is_active(&self) -> bool {
        !self.field.trim().is_empty() && self.operator.is_some() && !self.value.trim().is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub field: String,
    pub operator: Operator,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
}

/// The emitted filter: active conditions only, in input order. The first
/// criterion never carries a logical operator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    pub conditions: Vec<Criterion>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterBuilder {
    fields: Vec<FieldDef>,
    conditions: Vec<FilterCondition>,
}

impl FilterBuilder {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            fields,
            conditions: Vec::new(),
        }
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn conditions(&self) -> &[FilterCondition] {
        &self.conditions
    }

    /// Operators offered for the condition at `index`, based on its field.
    pub fn operators_for(&self, index: usize) -> &'static [Operator] {
        self.conditions
            .get(index)
            .and_then(|c| self.field(&c.field))
            .map(|f| Operator::for_type(f.field_type))
            .unwrap_or(&[])
    }

    /// Append a blank condition. Every condition after the first is joined
    /// with AND until the user picks otherwise.
    pub fn add_condition(&mut self) -> usize {
        let logical_operator = if self.conditions.is_empty() {
            None
        } else {
            Some(LogicalOperator::And)
        };
        self.conditions.push(FilterCondition {
            logical_operator,
            ..FilterCondition::default()
        });
        self.conditions.len() - 1
    }

    /// Replace all conditions, e.g. when restoring a saved view. Operators
    /// that do not fit their field are dropped, and the first condition loses
    /// its logical operator.
    pub fn load(&mut self, conditions: Vec<FilterCondition>) {
        self.conditions = conditions
            .into_iter()
            .map(|mut c| {
                let valid = self
                    .field(&c.field)
                    .zip(c.operator)
                    .map(|(f, op)| Operator::for_type(f.field_type).contains(&op))
                    .unwrap_or(false);
                if !valid {
                    c.operator = None;
                }
                c
            })
            .collect();
        self.normalize_head();
        for c in self.conditions.iter_mut().skip(1) {
            c.logical_operator.get_or_insert(LogicalOperator::And);
        }
    }

    /// Picking a new field resets an operator that does not apply to it.
    pub fn set_field(&mut self, index: usize, field: &str) -> Result<(), CrmError> {
        let field_type = self
            .field(field)
            .map(|f| f.field_type)
            .ok_or_else(|| CrmError::Filter(format!("unknown field '{field}'")))?;
        let condition = self.condition_mut(index)?;
        if condition.field != field {
            condition.field = field.to_string();
            condition.value.clear();
        }
        if let Some(op) = condition.operator {
            if !Operator::for_type(field_type).contains(&op) {
                condition.operator = None;
            }
        }
        Ok(())
    }

    pub fn set_operator(&mut self, index: usize, operator: Operator) -> Result<(), CrmError> {
        let allowed = self.operators_for(index);
        if self.conditions.get(index).is_some_and(|c| !c.field.is_empty())
            && !allowed.contains(&operator)
        {
            return Err(CrmError::Filter(format!(
                "operator '{}' does not apply to this field",
                operator.label()
            )));
        }
        self.condition_mut(index)?.operator = Some(operator);
        Ok(())
    }

    pub fn set_value(&mut self, index: usize, value: impl Into<String>) -> Result<(), CrmError> {
        self.condition_mut(index)?.value = value.into();
        Ok(())
    }

    /// The first condition has nothing to its left, so setting its logical
    /// operator is ignored.
    pub fn set_logical_operator(
        &mut self,
        index: usize,
        operator: LogicalOperator,
    ) -> Result<(), CrmError> {
        let condition = self.condition_mut(index)?;
        if index > 0 {
            condition.logical_operator = Some(operator);
        }
        Ok(())
    }

    pub fn remove_condition(&mut self, index: usize) -> Option<FilterCondition> {
        if index >= self.conditions.len() {
            return None;
        }
        let removed = self.conditions.remove(index);
        self.normalize_head();
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.conditions.clear();
    }

    pub fn active_count(&self) -> usize {
        self.conditions.iter().filter(|c| c.is_active()).count()
    }

    pub fn build(&self) -> Filter {
        let mut conditions: Vec<Criterion> = self
            .conditions
            .iter()
            .filter(|c| c.is_active())
            .filter_map(|c| {
                Some(Criterion {
                    field: c.field.trim().to_string(),
                    operator: c.operator?,
                    value: c.value.trim().to_string(),
                    logical_operator: c.logical_operator,
                })
            })
            .collect();
        if let Some(first) = conditions.first_mut() {
            first.logical_operator = None;
        }
        for criterion in conditions.iter_mut().skip(1) {
            criterion.logical_operator.get_or_insert(LogicalOperator::And);
        }
        Filter { conditions }
    }

    fn condition_mut(&mut self, index: usize) -> Result<&mut FilterCondition, CrmError> {
        self.conditions
            .get_mut(index)
            .ok_or_else(|| CrmError::Filter(format!("no condition at position {index}")))
    }

    fn normalize_head(&mut self) {
        if let Some(first) = self.conditions.first_mut() {
            first.logical_operator = None;
        }
    }
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Evaluate against a record serialized to JSON, strictly left to right.
    /// An empty filter matches everything.
    pub fn matches(&self, record: &serde_json::Value) -> bool {
        let mut criteria = self.conditions.iter();
        let Some(first) = criteria.next() else {
            return true;
        };
        let mut acc = first.matches(record);
        for criterion in criteria {
            acc = match criterion.logical_operator.unwrap_or(LogicalOperator::And) {
                LogicalOperator::And => acc && criterion.matches(record),
                LogicalOperator::Or => acc || criterion.matches(record),
            };
        }
        acc
    }

    /// Keep the records that match, in their original order.
    pub fn apply<R: Serialize + Clone>(&self, records: &[R]) -> Vec<R> {
        records
            .iter()
            .filter(|r| {
                serde_json::to_value(r)
                    .map(|v| self.matches(&v))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

impl Criterion {
    pub fn matches(&self, record: &serde_json::Value) -> bool {
        let field = record.get(&self.field).unwrap_or(&serde_json::Value::Null);
        let values = field_values(field);

        match self.operator {
            Operator::NotEquals => !values.iter().any(|v| text_eq(v, &self.value)),
            Operator::NotIn => {
                let options = split_list(&self.value);
                !values
                    .iter()
                    .any(|v| options.iter().any(|o| text_eq(v, o)))
            }
            Operator::Contains => values.iter().any(|v| lower(v).contains(&lower(&self.value))),
            Operator::Equals => match (parse_date(&self.value), values.first()) {
                (Some(wanted), Some(v)) if parse_date(v).is_some() => parse_date(v) == Some(wanted),
                _ => values.iter().any(|v| text_eq(v, &self.value)),
            },
            Operator::StartsWith => values
                .iter()
                .any(|v| lower(v).starts_with(&lower(&self.value))),
            Operator::EndsWith => values
                .iter()
                .any(|v| lower(v).ends_with(&lower(&self.value))),
            Operator::In => {
                let options = split_list(&self.value);
                values.iter().any(|v| options.iter().any(|o| text_eq(v, o)))
            }
            Operator::Before => date_cmp(&values, &self.value, |d, bound| d < bound),
            Operator::After => date_cmp(&values, &self.value, |d, bound| d > bound),
            Operator::Between => {
                let bounds = split_list(&self.value);
                let (Some(start), Some(end)) = (
                    bounds.first().and_then(|s| parse_date(s)),
                    bounds.get(1).and_then(|s| parse_date(s)),
                ) else {
                    return false;
                };
                values
                    .iter()
                    .filter_map(|v| parse_date(v))
                    .any(|d| d >= start && d <= end)
            }
        }
    }
}

/// Scalar fields become one value, arrays one per element, null none.
fn field_values(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items.iter().flat_map(field_values).collect(),
        other => vec![other.to_string()],
    }
}

fn lower(value: &str) -> String {
    value.trim().to_lowercase()
}

fn text_eq(a: &str, b: &str) -> bool {
    lower(a) == lower(b)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Day granularity: RFC 3339 timestamps and plain `YYYY-MM-DD` both work.
fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn date_cmp(values: &[String], bound: &str, cmp: impl Fn(NaiveDate, NaiveDate) -> bool) -> bool {
    let Some(bound) = parse_date(bound) else {
        return false;
    };
    values
        .iter()
        .filter_map(|v| parse_date(v))
        .any(|d| cmp(d, bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder_with(rows: &[(&str, Operator, &str, Option<LogicalOperator>)]) -> FilterBuilder {
        let mut builder = FilterBuilder::new(contact_fields());
        for (field, op, value, logical) in rows {
            let i = builder.add_condition();
            builder.set_field(i, field).expect("field");
            builder.set_operator(i, *op).expect("operator");
            builder.set_value(i, *value).expect("value");
            if let Some(logical) = logical {
                builder.set_logical_operator(i, *logical).expect("logical");
            }
        }
        builder
    }

    #[test]
    fn operators_depend_on_field_type() {
        assert!(Operator::for_type(FieldType::Text).contains(&Operator::StartsWith));
        assert!(!Operator::for_type(FieldType::Select).contains(&Operator::Contains));
        assert!(Operator::for_type(FieldType::Date).contains(&Operator::Between));
    }

    #[test]
    fn partial_conditions_are_not_active() {
        let mut builder = FilterBuilder::new(contact_fields());
        let a = builder.add_condition();
        builder.set_field(a, "status").expect("field");
        builder.set_operator(a, Operator::Equals).expect("op");
        let b = builder.add_condition();
        builder.set_field(b, "email").expect("field");
        builder.set_operator(b, Operator::Contains).expect("op");
        builder.set_value(b, "example.com").expect("value");

        assert_eq!(builder.active_count(), 1);
        let filter = builder.build();
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.conditions[0].field, "email");
        assert_eq!(filter.conditions[0].logical_operator, None);
    }

    #[test]
    fn builds_in_input_order_and_drops_dangling_operator() {
        let mut builder = builder_with(&[
            ("status", Operator::Equals, "lead", None),
            ("tags", Operator::Contains, "vip", Some(LogicalOperator::And)),
        ]);
        let filter = builder.build();
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.conditions[0].field, "status");
        assert_eq!(filter.conditions[1].field, "tags");
        assert_eq!(
            filter.conditions[1].logical_operator,
            Some(LogicalOperator::And)
        );

        builder.remove_condition(0);
        let filter = builder.build();
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.conditions[0].field, "tags");
        assert_eq!(filter.conditions[0].logical_operator, None);
        assert_eq!(builder.conditions()[0].logical_operator, None);
    }

    #[test]
    fn emitted_filter_uses_wire_names() {
        let builder = builder_with(&[
            ("status", Operator::Equals, "lead", None),
            ("tags", Operator::Contains, "vip", Some(LogicalOperator::Or)),
        ]);
        let value = serde_json::to_value(builder.build()).expect("json");
        assert_eq!(
            value,
            json!([
                {"field": "status", "operator": "equals", "value": "lead"},
                {"field": "tags", "operator": "contains", "value": "vip", "logicalOperator": "OR"}
            ])
        );
    }

    #[test]
    fn rejects_operator_that_does_not_fit_field() {
        let mut builder = FilterBuilder::new(contact_fields());
        let i = builder.add_condition();
        builder.set_field(i, "status").expect("field");
        assert!(builder.set_operator(i, Operator::StartsWith).is_err());
    }

    #[test]
    fn changing_field_resets_incompatible_operator() {
        let mut builder = FilterBuilder::new(contact_fields());
        let i = builder.add_condition();
        builder.set_field(i, "email").expect("field");
        builder.set_operator(i, Operator::Contains).expect("op");
        builder.set_value(i, "acme").expect("value");
        builder.set_field(i, "status").expect("field");
        assert_eq!(builder.conditions()[i].operator, None);
        assert!(builder.conditions()[i].value.is_empty());
    }

    #[test]
    fn evaluates_left_to_right_without_precedence() {
        // status = customer OR status = lead AND tags contains vip
        // conventional precedence would match the customer without vip;
        // left-to-right evaluation does not.
        let builder = builder_with(&[
            ("status", Operator::Equals, "customer", None),
            ("status", Operator::Equals, "lead", Some(LogicalOperator::Or)),
            ("tags", Operator::Contains, "vip", Some(LogicalOperator::And)),
        ]);
        let filter = builder.build();

        let customer = json!({"status": "customer", "tags": []});
        let vip_lead = json!({"status": "lead", "tags": ["vip"]});
        assert!(!filter.matches(&customer));
        assert!(filter.matches(&vip_lead));
    }

    #[test]
    fn text_and_array_matching_is_case_insensitive() {
        let builder = builder_with(&[("tags", Operator::Contains, "VIP", None)]);
        let filter = builder.build();
        assert!(filter.matches(&json!({"tags": ["beta", "vip"]})));
        assert!(!filter.matches(&json!({"tags": []})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn in_and_not_in_take_comma_lists() {
        let builder = builder_with(&[("status", Operator::In, "lead, prospect", None)]);
        let filter = builder.build();
        assert!(filter.matches(&json!({"status": "prospect"})));
        assert!(!filter.matches(&json!({"status": "customer"})));

        let builder = builder_with(&[("status", Operator::NotIn, "lead,prospect", None)]);
        assert!(builder.build().matches(&json!({"status": "customer"})));
    }

    #[test]
    fn date_operators_compare_by_day() {
        let record = json!({"createdAt": "2024-03-15T18:30:00Z"});
        let eq = builder_with(&[("createdAt", Operator::Equals, "2024-03-15", None)]);
        let before = builder_with(&[("createdAt", Operator::Before, "2024-04-01", None)]);
        let after = builder_with(&[("createdAt", Operator::After, "2024-03-15", None)]);
        let between = builder_with(&[(
            "createdAt",
            Operator::Between,
            "2024-03-01,2024-03-15",
            None,
        )]);
        assert!(eq.build().matches(&record));
        assert!(before.build().matches(&record));
        assert!(!after.build().matches(&record));
        assert!(between.build().matches(&record));
    }

    #[test]
    fn load_normalizes_saved_conditions() {
        let mut builder = FilterBuilder::new(contact_fields());
        builder.load(vec![
            FilterCondition {
                field: "status".into(),
                operator: Some(Operator::Contains),
                value: "lead".into(),
                logical_operator: Some(LogicalOperator::Or),
            },
            FilterCondition {
                field: "email".into(),
                operator: Some(Operator::EndsWith),
                value: ".io".into(),
                logical_operator: None,
            },
        ]);
        assert_eq!(builder.conditions()[0].operator, None);
        assert_eq!(builder.conditions()[0].logical_operator, None);
        assert_eq!(
            builder.conditions()[1].logical_operator,
            Some(LogicalOperator::And)
        );
        assert_eq!(builder.active_count(), 1);
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::default().matches(&json!({"status": "lead"})));
    }
}
