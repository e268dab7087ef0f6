//! Core data models for the query pipeline

use crate::analysis::chart::ChartSpec;
use crate::tools::ToolKind;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::Write;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Router,
    Specialist,
    Executing,
    Summarizing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionSource {
    Remote,
    Embedded,
}

//
// ================= Dataset =================
//

/// One expense row, as handed over by the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub date: NaiveDate,
    pub amount: f64,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

/// The caller-owned transaction history plus its category taxonomy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub transactions: Vec<Transaction>,
    /// category (lowercase) → broad group, e.g. "grocery" → "Food"
    #[serde(default)]
    pub category_groups: BTreeMap<String, String>,
}

impl Dataset {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self {
            transactions,
            category_groups: BTreeMap::new(),
        }
    }

    pub fn with_groups(mut self, groups: BTreeMap<String, String>) -> Self {
        self.category_groups = groups
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Broad group for a transaction: explicit value first, then the taxonomy.
    pub fn major_category_of<'a>(&'a self, tx: &'a Transaction) -> Option<&'a str> {
        tx.major_category
            .as_deref()
            .or_else(|| {
                self.category_groups
                    .get(&tx.category.trim().to_lowercase())
                    .map(String::as_str)
            })
            .filter(|s| !s.trim().is_empty())
    }

    pub fn date_bounds(&self) -> Option<DateBounds> {
        let earliest = self.transactions.iter().map(|t| t.date).min()?;
        let latest = self.transactions.iter().map(|t| t.date).max()?;
        Some(DateBounds { earliest, latest })
    }

    /// SHA-256 of the dataset's JSON form, used as the remote dataset reference.
    pub fn fingerprint(&self) -> crate::Result<String> {
        json_digest(self)
    }
}

/// Streams the JSON serialization straight into the hasher.
fn json_digest<T: Serialize>(value: &T) -> crate::Result<String> {
    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut HashWriter(&mut hasher), value)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateBounds {
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
}

impl DateBounds {
    pub fn contains_year(&self, year: i32) -> bool {
        year >= self.earliest.year() && year <= self.latest.year()
    }
}

//
// ================= Query Context =================
//

/// Everything the agents and the validator may know about one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    pub raw_question: String,
    /// Categories and broad groups in their canonical casing
    pub known_categories: BTreeSet<String>,
    /// Subset of `known_categories` that are broad groups
    pub groups: BTreeSet<String>,
    pub date_bounds: Option<DateBounds>,
    pub current_date: NaiveDate,
    pub currency: String,
}

impl QueryContext {
    pub fn from_dataset(
        question: &str,
        dataset: &Dataset,
        current_date: NaiveDate,
        currency: &str,
    ) -> Self {
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut group_keys: BTreeSet<String> = BTreeSet::new();

        for tx in &dataset.transactions {
            let group = dataset.major_category_of(tx);
            let names = std::iter::once(tx.category.as_str()).chain(group);
            for name in names {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    continue;
                }
                // First spelling wins as the canonical form.
                seen.entry(trimmed.to_lowercase())
                    .or_insert_with(|| trimmed.to_string());
            }
            if let Some(group) = group {
                group_keys.insert(group.trim().to_lowercase());
            }
        }

        let groups = group_keys
            .iter()
            .filter_map(|key| seen.get(key).cloned())
            .collect();

        Self {
            raw_question: question.trim().to_string(),
            known_categories: seen.into_values().collect(),
            groups,
            date_bounds: dataset.date_bounds(),
            current_date,
            currency: currency.to_string(),
        }
    }

    /// Compact metadata block injected into specialist prompts.
    pub fn metadata_block(&self) -> String {
        let categories = if self.known_categories.is_empty() {
            "(none)".to_string()
        } else {
            self.known_categories
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        };

        let range = match self.date_bounds {
            Some(bounds) => format!("{} to {}", bounds.earliest, bounds.latest),
            None => "no transactions".to_string(),
        };

        format!(
            "Categories: {}\nData range: {}\nCurrency: {}\nToday: {}",
            categories, range, self.currency, self.current_date
        )
    }
}

//
// ================= Invocation =================
//

/// A single argument value as written by the specialist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            ArgValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Int(v) => Some(*v as f64),
            ArgValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(true) => write!(f, "True"),
            ArgValue::Bool(false) => write!(f, "False"),
            ArgValue::Int(v) => write!(f, "{}", v),
            ArgValue::Float(v) => write!(f, "{}", v),
            ArgValue::Str(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            ArgValue::Null => write!(f, "None"),
        }
    }
}

/// Tool call extracted by the specialist (unvalidated).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub tool: ToolKind,
    pub arguments: BTreeMap<String, ArgValue>,
}

impl ToolInvocation {
    pub fn new(tool: ToolKind) -> Self {
        Self {
            tool,
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, name: &str, value: ArgValue) -> Self {
        self.arguments.insert(name.to_string(), value);
        self
    }
}

impl fmt::Display for ToolInvocation {
    /// Renders in invocation-grammar form, arguments in schema order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let definition = self.tool.definition();
        let mut parts: Vec<String> = definition
            .parameters
            .iter()
            .filter_map(|p| self.arguments.get(p.name).map(|v| format!("{}={}", p.name, v)))
            .collect();

        // Keys outside the schema are still shown (only possible before validation).
        for (key, value) in &self.arguments {
            if definition.parameter(key).is_none() {
                parts.push(format!("{}={}", key, value));
            }
        }

        write!(f, "{}({})", self.tool.name(), parts.join(", "))
    }
}

//
// ================= Execution =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_spec: Option<ChartSpec>,
    pub source: ExecutionSource,
}

//
// ================= Pipeline Run =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChosenProvider {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_ms: u64,
}

/// Book-keeping for one request; owned by the orchestrator until it terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub events: Vec<StageEvent>,
    pub chosen_providers: BTreeMap<Stage, ChosenProvider>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            events: Vec::new(),
            chosen_providers: BTreeMap::new(),
            status: RunStatus::Running,
            started_at: Utc::now(),
        }
    }

    /// Append an event, clamping its timestamp so the log never goes backwards.
    pub fn push_event(&mut self, mut event: StageEvent) -> &StageEvent {
        if let Some(last) = self.events.last() {
            if event.timestamp < last.timestamp {
                event.timestamp = last.timestamp;
            }
        }
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }

    /// Elapsed time per stage, from consecutive event timestamps.
    pub fn stage_timings(&self, finished_at: DateTime<Utc>) -> Vec<StageTiming> {
        self.events
            .iter()
            .enumerate()
            .map(|(i, event)| {
                let end = self
                    .events
                    .get(i + 1)
                    .map(|next| next.timestamp)
                    .unwrap_or(finished_at);
                StageTiming {
                    stage: event.stage,
                    elapsed_ms: (end - event.timestamp).num_milliseconds().max(0) as u64,
                }
            })
            .collect()
    }
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineAnswer {
    pub run_id: Uuid,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ExecutionSource>,
    pub stage_timings: Vec<StageTiming>,
    #[serde(default)]
    pub corrections: Vec<String>,
    pub chosen_providers: BTreeMap<Stage, ChosenProvider>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(run_id: Option<Uuid>, err: &crate::error::PipelineError) -> Self {
        Self {
            run_id,
            kind: err.kind().to_string(),
            message: err.to_string(),
            raw_output: err.raw_output().map(str::to_string),
            candidates: err.candidates().to_vec(),
        }
    }
}

/// What the caller sees on the event channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineEvent {
    Status(StageEvent),
    Result(PipelineAnswer),
    Error(ErrorReport),
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Status(_) => "status",
            PipelineEvent::Result(_) => "result",
            PipelineEvent::Error(_) => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Router => "router",
            Stage::Specialist => "specialist",
            Stage::Executing => "executing",
            Stage::Summarizing => "summarizing",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ExecutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionSource::Remote => "remote",
            ExecutionSource::Embedded => "embedded",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tx(date: &str, amount: f64, category: &str) -> Transaction {
        Transaction {
            date: date.parse().unwrap(),
            amount,
            category: category.to_string(),
            major_category: None,
            remarks: None,
        }
    }

    #[test]
    fn test_context_collects_categories_and_groups() {
        let mut groups = BTreeMap::new();
        groups.insert("grocery".to_string(), "Food".to_string());

        let dataset = Dataset::new(vec![
            tx("2025-01-03", 1200.0, "grocery"),
            tx("2025-02-10", 800.0, "Grocery"),
            tx("2024-12-31", 5000.0, "gym"),
        ])
        .with_groups(groups);

        let today = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let ctx = QueryContext::from_dataset("  total groceries? ", &dataset, today, "JPY");

        assert_eq!(ctx.raw_question, "total groceries?");
        assert!(ctx.known_categories.contains("grocery"));
        assert!(ctx.known_categories.contains("Food"));
        assert!(ctx.known_categories.contains("gym"));
        assert_eq!(ctx.known_categories.len(), 3);
        assert!(ctx.groups.contains("Food"));
        assert_eq!(ctx.groups.len(), 1);

        let bounds = ctx.date_bounds.unwrap();
        assert_eq!(bounds.earliest.to_string(), "2024-12-31");
        assert_eq!(bounds.latest.to_string(), "2025-02-10");
    }

    #[test]
    fn test_empty_dataset_has_no_bounds() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let ctx = QueryContext::from_dataset("q", &Dataset::default(), today, "JPY");
        assert!(ctx.date_bounds.is_none());
        assert!(ctx.metadata_block().contains("no transactions"));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = Dataset::new(vec![tx("2025-01-03", 1200.0, "grocery")]);
        let b = Dataset::new(vec![tx("2025-01-03", 1200.0, "grocery")]);
        let c = Dataset::new(vec![tx("2025-01-03", 1300.0, "grocery")]);

        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);
    }

    #[test]
    fn test_digest_reports_serialization_failure() {
        struct Broken;

        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("not serializable"))
            }
        }

        let err = json_digest(&Broken).unwrap_err();
        assert_eq!(err.kind(), "serialization_error");
    }

    #[test]
    fn test_invocation_display_uses_schema_order() {
        let invocation = ToolInvocation::new(ToolKind::CalculateTotal)
            .with_arg("month", ArgValue::Int(1))
            .with_arg("category", ArgValue::Str("grocery".into()))
            .with_arg("year", ArgValue::Int(2025));

        assert_eq!(
            invocation.to_string(),
            "calculate_total(category=\"grocery\", year=2025, month=1)"
        );
    }

    #[test]
    fn test_stage_timings_from_events() {
        let mut run = PipelineRun::new();
        let t0 = Utc::now();

        for (i, stage) in [Stage::Router, Stage::Specialist, Stage::Executing]
            .into_iter()
            .enumerate()
        {
            run.push_event(StageEvent {
                stage,
                message: String::new(),
                model: None,
                provider: None,
                tool: None,
                timestamp: t0 + Duration::milliseconds(100 * i as i64),
            });
        }

        let timings = run.stage_timings(t0 + Duration::milliseconds(350));
        let elapsed: Vec<u64> = timings.iter().map(|t| t.elapsed_ms).collect();
        assert_eq!(elapsed, vec![100, 100, 150]);
    }

    #[test]
    fn test_events_never_go_backwards() {
        let mut run = PipelineRun::new();
        let now = Utc::now();
        run.push_event(StageEvent {
            stage: Stage::Router,
            message: String::new(),
            model: None,
            provider: None,
            tool: None,
            timestamp: now,
        });
        let pushed = run.push_event(StageEvent {
            stage: Stage::Specialist,
            message: String::new(),
            model: None,
            provider: None,
            tool: None,
            timestamp: now - Duration::seconds(5),
        });
        assert_eq!(pushed.timestamp, now);
    }
}
