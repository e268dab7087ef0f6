//! Validation layer
//!
//! Every specialist output passes through here before execution.
//! Deterministic: fuzzy category matching, temporal phrase resolution,
//! type coercion and schema defaults. `ValidatedInvocation` can only be
//! built by this module.

pub mod dates;
pub mod matcher;

use crate::config::MatcherConfig;
use crate::error::PipelineError;
use crate::models::{ArgValue, QueryContext, ToolInvocation};
use crate::tools::{CalendarSlots, DateRules, ParamRole, ParamType, ToolDefinition, ToolKind};
use crate::Result;
use chrono::Datelike;
use dates::TemporalValue;
use matcher::{CategoryMatcher, FuzzyCategoryMatcher, MatchOutcome, Vocabulary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A tool call whose every argument has passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedInvocation {
    tool: ToolKind,
    arguments: BTreeMap<String, ArgValue>,
    #[serde(skip)]
    corrections: Vec<String>,
}

impl ValidatedInvocation {
    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    pub fn arguments(&self) -> &BTreeMap<String, ArgValue> {
        &self.arguments
    }

    /// Human-readable notes about values that were changed.
    pub fn corrections(&self) -> &[String] {
        &self.corrections
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(ArgValue::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.arguments.get(name).and_then(ArgValue::as_i64)
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.get_i64(name).and_then(|v| i32::try_from(v).ok())
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get_i64(name).and_then(|v| u32::try_from(v).ok())
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.arguments.get(name).and_then(ArgValue::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.arguments.get(name).and_then(ArgValue::as_bool)
    }
}

impl fmt::Display for ValidatedInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let invocation = ToolInvocation {
            tool: self.tool,
            arguments: self.arguments.clone(),
        };
        write!(f, "{}", invocation)
    }
}

/// Validation engine with a pluggable category matcher.
pub struct Validator {
    matcher: Arc<dyn CategoryMatcher>,
}

impl Validator {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            matcher: Arc::new(FuzzyCategoryMatcher::new(config)),
        }
    }

    pub fn with_matcher(matcher: Arc<dyn CategoryMatcher>) -> Self {
        Self { matcher }
    }

    pub fn validate(
        &self,
        invocation: ToolInvocation,
        context: &QueryContext,
    ) -> Result<ValidatedInvocation> {
        let definition = invocation.tool.definition();
        check_known_keys(definition, invocation.arguments.keys())?;

        let mut corrections = Vec::new();
        let mut arguments: BTreeMap<String, ArgValue> = BTreeMap::new();
        let mut temporal = TemporalArgs::default();

        for param in definition.parameters {
            let Some(value) = invocation.arguments.get(param.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            match param.role {
                ParamRole::Category => {
                    if let Some(category) =
                        self.match_category(param.name, value, context, &mut corrections)?
                    {
                        arguments.insert(param.name.to_string(), ArgValue::Str(category));
                    }
                }
                ParamRole::Remarks => {
                    let text = clean_text(&scalar_text(value));
                    if !text.is_empty() {
                        arguments.insert(param.name.to_string(), ArgValue::Str(text));
                    }
                }
                ParamRole::Year | ParamRole::Month | ParamRole::Day | ParamRole::RecentMonths => {
                    temporal.collect(param.name, param.role, value)?;
                }
                ParamRole::Count | ParamRole::Amount | ParamRole::Flag => {
                    arguments.insert(param.name.to_string(), coerce(param.name, param.ty, value)?);
                }
            }
        }

        let rules = &definition.date_rules;
        let slots = temporal.resolve(definition, context, &mut corrections)?;
        let slots = salvage_mixed_filters(rules, slots, &mut corrections);
        let slots = check_temporal(rules, slots, context, &mut corrections)?;
        arguments.extend(slots);

        apply_defaults(definition, &mut arguments)?;

        info!(
            tool = %definition.name,
            corrections = corrections.len(),
            "Invocation validated"
        );

        Ok(ValidatedInvocation {
            tool: invocation.tool,
            arguments,
            corrections,
        })
    }

    fn match_category(
        &self,
        name: &str,
        value: &ArgValue,
        context: &QueryContext,
        corrections: &mut Vec<String>,
    ) -> Result<Option<String>> {
        let raw = scalar_text(value);
        let cleaned = clean_text(&raw);
        if cleaned.is_empty() {
            return Ok(None);
        }

        // Nothing to match against; filters simply find no rows.
        if context.known_categories.is_empty() {
            return Ok(Some(cleaned));
        }

        let vocabulary = Vocabulary {
            names: &context.known_categories,
            groups: &context.groups,
        };

        match self.matcher.find(&cleaned, &vocabulary) {
            MatchOutcome::Matched {
                canonical,
                score,
                method,
            } => {
                if !canonical.eq_ignore_ascii_case(&cleaned) {
                    debug!(input = %cleaned, matched = %canonical, score, ?method, "Category corrected");
                    corrections.push(format!("corrected '{}' to '{}'", cleaned, canonical));
                }
                Ok(Some(canonical))
            }
            MatchOutcome::Ambiguous(candidates) => Err(PipelineError::ValidationFailure {
                argument: name.to_string(),
                reason: format!("'{}' matches several categories equally well", cleaned),
                candidates,
            }),
            MatchOutcome::NoMatch(candidates) => Err(PipelineError::ValidationFailure {
                argument: name.to_string(),
                reason: format!("'{}' is not a known category", cleaned),
                candidates,
            }),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

/// Schema-only validation for calls arriving over the wire (compute service).
/// Types, ranges and defaults are enforced; categories are not matched.
pub fn validate_schema(
    tool_name: &str,
    raw: BTreeMap<String, ArgValue>,
) -> Result<ValidatedInvocation> {
    let tool = ToolKind::from_name(tool_name).ok_or_else(|| PipelineError::ValidationFailure {
        argument: "tool_name".to_string(),
        reason: format!("'{}' is not a registered tool", tool_name),
        candidates: ToolKind::ALL.iter().map(|k| k.name().to_string()).collect(),
    })?;
    let definition = tool.definition();
    check_known_keys(definition, raw.keys())?;

    let mut arguments = BTreeMap::new();
    for param in definition.parameters {
        match raw.get(param.name) {
            Some(value) if !value.is_null() => {
                let value = match param.ty {
                    ParamType::String => ArgValue::Str(clean_text(&scalar_text(value))),
                    ty => coerce(param.name, ty, value)?,
                };
                arguments.insert(param.name.to_string(), value);
            }
            _ => {}
        }
    }

    for group in definition.date_rules.calendar {
        check_calendar_group(group, &arguments)?;
    }
    apply_defaults(definition, &mut arguments)?;

    Ok(ValidatedInvocation {
        tool,
        arguments,
        corrections: Vec::new(),
    })
}

//
// ================= Temporal Arguments =================
//

#[derive(Default)]
struct TemporalArgs {
    numbers: BTreeMap<String, i64>,
    phrases: Vec<(String, String)>,
}

impl TemporalArgs {
    fn collect(&mut self, name: &str, role: ParamRole, value: &ArgValue) -> Result<()> {
        if let Some(n) = value.as_i64() {
            self.numbers.insert(name.to_string(), n);
            return Ok(());
        }

        match value {
            ArgValue::Str(s) => {
                let text = clean_text(s);
                if let Ok(n) = text.parse::<i64>() {
                    self.numbers.insert(name.to_string(), n);
                } else if let (ParamRole::Month, Some(m)) = (role, dates::month_number(&text)) {
                    self.numbers.insert(name.to_string(), i64::from(m));
                } else if !text.is_empty() {
                    self.phrases.push((name.to_string(), text));
                }
                Ok(())
            }
            other => Err(PipelineError::validation(
                name,
                format!("expected a number or a date phrase, got {}", other),
            )),
        }
    }

    /// Write phrase values into the tool's declared slots; phrases win over numbers.
    fn resolve(
        self,
        definition: &ToolDefinition,
        context: &QueryContext,
        corrections: &mut Vec<String>,
    ) -> Result<BTreeMap<String, i64>> {
        let mut slots = self.numbers;

        for (slot, phrase) in self.phrases {
            let value = dates::parse_phrase(&phrase, context.current_date).ok_or_else(|| {
                PipelineError::validation(&slot, format!("could not understand the date '{}'", phrase))
            })?;

            let written = assign(definition, &slot, value, &mut slots)
                .map_err(|reason| PipelineError::validation(&slot, reason))?;

            if !written.is_empty() {
                corrections.push(format!("resolved '{}' to {}", phrase, written.join(", ")));
            }
        }

        Ok(slots)
    }
}

fn assign(
    definition: &ToolDefinition,
    slot: &str,
    value: TemporalValue,
    slots: &mut BTreeMap<String, i64>,
) -> std::result::Result<Vec<String>, String> {
    let rules = &definition.date_rules;
    let mut written = Vec::new();
    let mut set = |slots: &mut BTreeMap<String, i64>, name: &str, v: i64| {
        slots.insert(name.to_string(), v);
        written.push(format!("{}={}", name, v));
    };

    match value {
        TemporalValue::Calendar { year, month, day } => {
            let group = rules
                .calendar_group(slot)
                .or_else(|| rules.calendar.first())
                .ok_or_else(|| format!("{} has no calendar date filter", definition.name))?;

            if month.is_some() && group.month.is_none() {
                return Err(format!("{} does not filter by month", definition.name));
            }
            if day.is_some() && group.day.is_none() {
                return Err(format!("{} does not filter by day", definition.name));
            }

            if !group.names().any(|n| n == slot) {
                slots.remove(slot);
            }
            set(slots, group.year, i64::from(year));
            if let (Some(m), Some(name)) = (month, group.month) {
                set(slots, name, i64::from(m));
            }
            if let (Some(d), Some(name)) = (day, group.day) {
                set(slots, name, i64::from(d));
            }
        }
        TemporalValue::Month(m) => {
            let month_slot = rules
                .calendar_group(slot)
                .and_then(|g| g.month)
                .ok_or_else(|| format!("a month name is not a valid value for {}", slot))?;
            if month_slot != slot {
                slots.remove(slot);
            }
            set(slots, month_slot, i64::from(m));
        }
        TemporalValue::YearRange { start, end } => {
            let (start_slot, end_slot) = match (rules.year_range, rules.calendar) {
                (Some(range), _) => range,
                (None, [first, second]) => (first.year, second.year),
                _ => return Err(format!("{} does not accept a year range", definition.name)),
            };
            if start_slot != slot && end_slot != slot {
                slots.remove(slot);
            }
            set(slots, start_slot, i64::from(start));
            set(slots, end_slot, i64::from(end));
        }
        TemporalValue::RecentMonths(n) => {
            let months_slot = rules.recent_months.ok_or_else(|| {
                format!("{} does not accept a relative window of months", definition.name)
            })?;
            if months_slot != slot {
                slots.remove(slot);
            }
            set(slots, months_slot, i64::from(n));
        }
    }

    Ok(written)
}

/// Keep only the highest-priority time filter: calendar, then range, then months.
fn salvage_mixed_filters(
    rules: &DateRules,
    mut slots: BTreeMap<String, i64>,
    corrections: &mut Vec<String>,
) -> BTreeMap<String, i64> {
    if rules.is_period_comparison() {
        return slots;
    }

    let mut filters: Vec<Vec<&'static str>> = Vec::new();
    filters.extend(rules.calendar.iter().map(|g| g.names().collect()));
    if let Some((start, end)) = rules.year_range {
        filters.push(vec![start, end]);
    }
    if let Some(months) = rules.recent_months {
        filters.push(vec![months]);
    }

    let present: Vec<&Vec<&'static str>> = filters
        .iter()
        .filter(|names| names.iter().any(|n| slots.contains_key(*n)))
        .collect();

    if present.len() > 1 {
        let dropped: Vec<&str> = present[1..]
            .iter()
            .flat_map(|names| names.iter().copied())
            .filter(|n| slots.remove(*n).is_some())
            .collect();
        corrections.push(format!(
            "dropped {} because only one time filter applies",
            dropped.join(", ")
        ));
    }

    slots
}

fn check_temporal(
    rules: &DateRules,
    mut slots: BTreeMap<String, i64>,
    context: &QueryContext,
    corrections: &mut Vec<String>,
) -> Result<BTreeMap<String, ArgValue>> {
    let (min_year, max_year) = match context.date_bounds {
        Some(bounds) => (bounds.earliest.year(), bounds.latest.year()),
        None => (1970, context.current_date.year() + 1),
    };

    let check_year = |name: &str, year: i64| -> Result<()> {
        if year < i64::from(min_year) || year > i64::from(max_year) {
            return Err(PipelineError::validation(
                name,
                format!("year {} is outside the data range {}-{}", year, min_year, max_year),
            ));
        }
        Ok(())
    };

    let as_args = |slots: &BTreeMap<String, i64>| -> BTreeMap<String, ArgValue> {
        slots
            .iter()
            .map(|(k, v)| (k.clone(), ArgValue::Int(*v)))
            .collect()
    };

    for group in rules.calendar {
        check_calendar_group(group, &as_args(&slots))?;
        if let Some(year) = slots.get(group.year) {
            check_year(group.year, *year)?;
        }
    }

    if let Some((start, end)) = rules.year_range {
        if let (Some(&a), Some(&b)) = (slots.get(start), slots.get(end)) {
            if a > b {
                slots.insert(start.to_string(), b);
                slots.insert(end.to_string(), a);
                corrections.push(format!("swapped {} and {}", start, end));
            }
        }
        for name in [start, end] {
            if let Some(year) = slots.get(name) {
                check_year(name, *year)?;
            }
        }
    }

    if let Some(name) = rules.recent_months {
        if let Some(&n) = slots.get(name) {
            if n < 1 {
                return Err(PipelineError::validation(name, "must be at least 1 month"));
            }
        }
    }

    Ok(as_args(&slots))
}

fn check_calendar_group(group: &CalendarSlots, args: &BTreeMap<String, ArgValue>) -> Result<()> {
    let year = args.get(group.year).and_then(ArgValue::as_i64);
    let month = group.month.and_then(|m| args.get(m)).and_then(ArgValue::as_i64);
    let day = group.day.and_then(|d| args.get(d)).and_then(ArgValue::as_i64);

    if let (Some(name), Some(m)) = (group.month, month) {
        if !(1..=12).contains(&m) {
            return Err(PipelineError::validation(name, format!("month {} is not between 1 and 12", m)));
        }
        if year.is_none() {
            return Err(PipelineError::validation(
                name,
                format!("a month needs a year ({} is missing)", group.year),
            ));
        }
    }

    if let (Some(name), Some(d)) = (group.day, day) {
        let Some(m) = month else {
            return Err(PipelineError::validation(name, "a day needs a month"));
        };
        let valid = match (year.and_then(|y| i32::try_from(y).ok()), u32::try_from(m), u32::try_from(d)) {
            (Some(y), Ok(m), Ok(d)) => dates::is_valid_day(y, m, d),
            _ => false,
        };
        if !valid {
            return Err(PipelineError::validation(
                name,
                format!("day {} does not exist in month {}", d, m),
            ));
        }
    }

    Ok(())
}

//
// ================= Helpers =================
//

fn check_known_keys<'a>(
    definition: &ToolDefinition,
    keys: impl Iterator<Item = &'a String>,
) -> Result<()> {
    for key in keys {
        if definition.parameter(key).is_none() {
            return Err(PipelineError::ValidationFailure {
                argument: key.clone(),
                reason: format!("{} has no parameter '{}'", definition.name, key),
                candidates: definition
                    .parameter_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            });
        }
    }
    Ok(())
}

fn apply_defaults(definition: &ToolDefinition, arguments: &mut BTreeMap<String, ArgValue>) -> Result<()> {
    for param in definition.parameters {
        if arguments.contains_key(param.name) {
            continue;
        }
        match (&param.default, param.required) {
            (Some(default), _) => {
                arguments.insert(param.name.to_string(), default.clone());
            }
            (None, true) => {
                return Err(PipelineError::validation(param.name, "required argument is missing"));
            }
            (None, false) => {}
        }
    }
    Ok(())
}

fn scalar_text(value: &ArgValue) -> String {
    match value {
        ArgValue::Str(s) => s.clone(),
        ArgValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn clean_text(s: &str) -> String {
    s.trim()
        .trim_matches(|c| c == '`' || c == '\'' || c == '"')
        .trim()
        .to_string()
}

fn coerce(name: &str, ty: ParamType, value: &ArgValue) -> Result<ArgValue> {
    let text = clean_text(&scalar_text(value));
    let invalid = |kind: &str| PipelineError::validation(name, format!("expected {}, got {}", kind, value));

    let coerced = match ty {
        ParamType::String => ArgValue::Str(text),
        ParamType::Integer => match value.as_i64() {
            Some(n) => ArgValue::Int(n),
            None => {
                let parsed = text.replace([',', '_'], "").parse::<f64>().map_err(|_| invalid("an integer"))?;
                if parsed.fract() != 0.0 {
                    return Err(invalid("an integer"));
                }
                ArgValue::Int(parsed as i64)
            }
        },
        ParamType::Number => match value.as_f64() {
            Some(n) => ArgValue::Float(n),
            None => ArgValue::Float(
                text.replace([',', '_'], "")
                    .parse::<f64>()
                    .map_err(|_| invalid("a number"))?,
            ),
        },
        ParamType::Boolean => match (value, text.to_lowercase().as_str()) {
            (ArgValue::Bool(b), _) => ArgValue::Bool(*b),
            (_, "true" | "yes" | "1") => ArgValue::Bool(true),
            (_, "false" | "no" | "0") => ArgValue::Bool(false),
            _ => return Err(invalid("True or False")),
        },
    };

    match (name, &coerced) {
        ("n", ArgValue::Int(n)) if *n < 1 => Err(PipelineError::validation(name, "must be at least 1")),
        (_, ArgValue::Float(v)) if *v < 0.0 || !v.is_finite() => {
            Err(PipelineError::validation(name, "must be a non-negative amount"))
        }
        _ => Ok(coerced),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dataset, Transaction};
    use chrono::NaiveDate;

    fn tx(date: &str, amount: f64, category: &str) -> Transaction {
        Transaction {
            date: date.parse().unwrap(),
            amount,
            category: category.to_string(),
            major_category: None,
            remarks: None,
        }
    }

    fn context() -> QueryContext {
        let mut groups = BTreeMap::new();
        groups.insert("grocery".to_string(), "Food".to_string());
        groups.insert("dining".to_string(), "Food".to_string());

        let dataset = Dataset::new(vec![
            tx("2024-03-02", 900.0, "dining"),
            tx("2025-01-05", 1200.0, "grocery"),
            tx("2026-01-10", 1500.0, "grocery"),
            tx("2025-06-01", 3000.0, "futsal game"),
        ])
        .with_groups(groups);

        let today = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        QueryContext::from_dataset("q", &dataset, today, "JPY")
    }

    fn call(tool: ToolKind, args: &[(&str, ArgValue)]) -> ToolInvocation {
        args.iter()
            .fold(ToolInvocation::new(tool), |inv, (k, v)| inv.with_arg(k, v.clone()))
    }

    fn s(v: &str) -> ArgValue {
        ArgValue::Str(v.to_string())
    }

    #[test]
    fn test_comparison_arguments_pass_unchanged() {
        let invocation = call(
            ToolKind::PlotComparisonBars,
            &[
                ("category", s("grocery")),
                ("y1", ArgValue::Int(2025)),
                ("m1", ArgValue::Int(1)),
                ("y2", ArgValue::Int(2026)),
                ("m2", ArgValue::Int(1)),
            ],
        );

        let validated = Validator::default().validate(invocation.clone(), &context()).unwrap();
        assert_eq!(validated.arguments(), &invocation.arguments);
        assert!(validated.corrections().is_empty());
    }

    #[test]
    fn test_category_is_corrected_and_noted() {
        let invocation = call(
            ToolKind::CalculateTotal,
            &[("category", s("groceries")), ("year", s("2025"))],
        );

        let validated = Validator::default().validate(invocation, &context()).unwrap();
        assert_eq!(validated.get_str("category"), Some("grocery"));
        assert_eq!(validated.get_i64("year"), Some(2025));
        assert_eq!(validated.corrections(), ["corrected 'groceries' to 'grocery'"]);
    }

    #[test]
    fn test_unknown_category_lists_candidates() {
        let invocation = call(ToolKind::CalculateTotal, &[("category", s("electricity"))]);
        let err = Validator::default().validate(invocation, &context()).unwrap_err();

        assert_eq!(err.kind(), "validation_failure");
        assert!(!err.candidates().is_empty());
    }

    #[test]
    fn test_unknown_key_lists_valid_names() {
        let invocation = call(ToolKind::PlotDistribution, &[("months", ArgValue::Int(6))]);
        let err = Validator::default().validate(invocation, &context()).unwrap_err();

        assert!(err.candidates().contains(&"year".to_string()));
        assert!(err.to_string().contains("'months'"));
    }

    #[test]
    fn test_phrases_fill_temporal_slots() {
        let validator = Validator::default();

        let validated = validator
            .validate(
                call(ToolKind::PlotTimeSeries, &[("months", s("past 6 months"))]),
                &context(),
            )
            .unwrap();
        assert_eq!(validated.get_i64("months"), Some(6));

        let validated = validator
            .validate(call(ToolKind::CalculateTotal, &[("year", s("Jan 2025"))]), &context())
            .unwrap();
        assert_eq!(validated.get_i64("year"), Some(2025));
        assert_eq!(validated.get_i64("month"), Some(1));

        let validated = validator
            .validate(call(ToolKind::CalculateTotal, &[("start_year", s("2024 to 2026"))]), &context())
            .unwrap();
        assert_eq!(validated.get_i64("start_year"), Some(2024));
        assert_eq!(validated.get_i64("end_year"), Some(2026));

        let validated = validator
            .validate(
                call(
                    ToolKind::PlotDistribution,
                    &[("year", ArgValue::Int(2025)), ("month", s("March"))],
                ),
                &context(),
            )
            .unwrap();
        assert_eq!(validated.get_i64("month"), Some(3));
    }

    #[test]
    fn test_invalid_dates_fail() {
        let validator = Validator::default();
        let cases = [
            call(ToolKind::CalculateTotal, &[("month", ArgValue::Int(3))]),
            call(ToolKind::CalculateTotal, &[("year", ArgValue::Int(2025)), ("month", ArgValue::Int(13))]),
            call(
                ToolKind::CalculateTotal,
                &[("year", ArgValue::Int(2025)), ("month", ArgValue::Int(2)), ("day", ArgValue::Int(30))],
            ),
            call(ToolKind::CalculateTotal, &[("year", ArgValue::Int(2025)), ("day", ArgValue::Int(3))]),
            call(ToolKind::CalculateTotal, &[("year", ArgValue::Int(2019))]),
            call(ToolKind::PlotDistribution, &[("year", s("past 6 months"))]),
            call(ToolKind::CalculateTotal, &[("year", s("someday"))]),
            call(ToolKind::PlotTimeSeries, &[("months", s("past 400000000 years"))]),
        ];

        for invocation in cases {
            let shown = invocation.to_string();
            let err = validator.validate(invocation, &context()).unwrap_err();
            assert_eq!(err.kind(), "validation_failure", "{}", shown);
        }
    }

    #[test]
    fn test_mixed_filters_keep_calendar() {
        let invocation = call(
            ToolKind::PlotTimeSeries,
            &[("months", ArgValue::Int(6)), ("year", ArgValue::Int(2025))],
        );
        let validated = Validator::default().validate(invocation, &context()).unwrap();

        assert_eq!(validated.get_i64("year"), Some(2025));
        assert_eq!(validated.get_i64("months"), None);
        assert!(validated.corrections()[0].contains("months"));
    }

    #[test]
    fn test_coercion_and_defaults() {
        let invocation = call(
            ToolKind::GetTopExpenses,
            &[("min_amount", s("1,000")), ("category", s("'Food'"))],
        );
        let validated = Validator::default().validate(invocation, &context()).unwrap();
        assert_eq!(validated.get_i64("n"), Some(10));
        assert_eq!(validated.get_f64("min_amount"), Some(1000.0));
        assert_eq!(validated.get_str("category"), Some("Food"));

        let invocation = call(ToolKind::CalculateStatistics, &[("compare", s("yes")), ("y1", ArgValue::Int(2024))]);
        let validated = Validator::default().validate(invocation, &context()).unwrap();
        assert_eq!(validated.get_bool("compare"), Some(true));

        let invocation = call(ToolKind::GetTopExpenses, &[("n", s("ten"))]);
        assert!(Validator::default().validate(invocation, &context()).is_err());
    }

    #[test]
    fn test_missing_required_argument() {
        let invocation = call(ToolKind::PlotComparisonBars, &[("y1", ArgValue::Int(2025))]);
        let err = Validator::default().validate(invocation, &context()).unwrap_err();
        assert!(err.to_string().contains("'y2'"));
    }

    #[test]
    fn test_empty_dataset_accepts_categories_and_recent_years() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let context = QueryContext::from_dataset("q", &Dataset::default(), today, "JPY");
        let invocation = call(
            ToolKind::PlotComparisonBars,
            &[
                ("category", s("groceries")),
                ("y1", ArgValue::Int(2025)),
                ("m1", ArgValue::Int(1)),
                ("y2", ArgValue::Int(2026)),
                ("m2", ArgValue::Int(1)),
            ],
        );

        let validated = Validator::default().validate(invocation, &context).unwrap();
        assert_eq!(validated.get_str("category"), Some("groceries"));

        let too_late = call(ToolKind::CalculateTotal, &[("year", ArgValue::Int(2028))]);
        assert!(Validator::default().validate(too_late, &context).is_err());
    }

    #[test]
    fn test_schema_validation_for_wire_calls() {
        let mut raw = BTreeMap::new();
        raw.insert("y1".to_string(), ArgValue::Int(2025));
        raw.insert("y2".to_string(), ArgValue::Str("2026".to_string()));
        let validated = validate_schema("plot_comparison_bars", raw).unwrap();
        assert_eq!(validated.get_i64("y2"), Some(2026));

        assert!(validate_schema("drop_table", BTreeMap::new()).is_err());
    }
}
