//! Analytical tool implementations
//!
//! Shared by the embedded interpreter and the compute service endpoint.
//! Every tool filters the dataset by one time period and one subject
//! (category, major category or remarks substring), then aggregates.

pub mod chart;
pub mod stats;

use crate::error::PipelineError;
use crate::models::{Dataset, ExecutionResult, ExecutionSource, Transaction};
use crate::tools::ToolKind;
use crate::validation::ValidatedInvocation;
use crate::Result;
use chart::{ChartKind, ChartSpec};
use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const SIGNIFICANCE: f64 = 0.05;
const BAR_CHART_LIMIT: usize = 100;
const WEEKLY_SPAN_DAYS: i64 = 90;
const MAX_REMARK_SLICES: usize = 10;
const MAX_SLICES: usize = 12;
const MIN_SLICE_SHARE: f64 = 0.03;

/// Output of one tool call, before the execution source is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_spec: Option<ChartSpec>,
}

impl AnalysisOutput {
    fn text(value: String, scalar: Option<f64>) -> Self {
        Self {
            value,
            scalar,
            chart_spec: None,
        }
    }

    pub fn into_result(self, source: ExecutionSource) -> ExecutionResult {
        ExecutionResult {
            value: self.value,
            scalar: self.scalar,
            chart_spec: self.chart_spec,
            source,
        }
    }
}

/// Clock and currency the tools run against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub today: NaiveDate,
    pub currency: String,
}

/// Run one validated tool call against a dataset.
pub fn run(
    invocation: &ValidatedInvocation,
    dataset: &Dataset,
    options: &AnalysisOptions,
) -> Result<AnalysisOutput> {
    debug!(tool = %invocation.tool(), rows = dataset.transactions.len(), "Running analysis");

    let analyst = Analyst {
        dataset,
        options,
        money: Money::new(&options.currency),
    };

    match invocation.tool() {
        ToolKind::CalculateTotal => analyst.calculate_total(invocation),
        ToolKind::CalculateStatistics => analyst.calculate_statistics(invocation),
        ToolKind::GetTopExpenses => analyst.get_top_expenses(invocation),
        ToolKind::PlotTimeSeries => analyst.plot_time_series(invocation),
        ToolKind::PlotDistribution => analyst.plot_distribution(invocation),
        ToolKind::PlotComparisonBars => analyst.plot_comparison_bars(invocation),
    }
}

//
// ================= Money Formatting =================
//

struct Money {
    prefix: String,
    decimals: usize,
}

impl Money {
    fn new(currency: &str) -> Self {
        let code = currency.trim().to_uppercase();
        let prefix = match code.as_str() {
            "JPY" | "CNY" => "¥".to_string(),
            "USD" => "$".to_string(),
            "EUR" => "€".to_string(),
            "GBP" => "£".to_string(),
            "KRW" => "₩".to_string(),
            "" => String::new(),
            other => format!("{} ", other),
        };
        let decimals = if matches!(code.as_str(), "JPY" | "KRW") { 0 } else { 2 };
        Self { prefix, decimals }
    }

    fn format(&self, amount: f64) -> String {
        let grouped = group_thousands(amount, self.decimals);
        match grouped.strip_prefix('-') {
            Some(magnitude) => format!("-{}{}", self.prefix, magnitude),
            None => format!("{}{}", self.prefix, grouped),
        }
    }
}

/// `1234567.8` → `"1,234,568"` (0 decimals) or `"1,234,567.80"` (2 decimals).
fn group_thousands(amount: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, amount.abs());
    let (whole, fraction) = match fixed.split_once('.') {
        Some((w, f)) => (w.to_string(), Some(f.to_string())),
        None => (fixed, None),
    };

    let mut grouped = String::new();
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if amount < 0.0 && fixed_is_nonzero(&whole, fraction.as_deref()) {
        "-"
    } else {
        ""
    };
    match fraction {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

fn fixed_is_nonzero(whole: &str, fraction: Option<&str>) -> bool {
    whole.chars().chain(fraction.unwrap_or("").chars()).any(|c| c != '0')
}

//
// ================= Periods & Subjects =================
//

#[derive(Debug, Clone, Copy, PartialEq)]
enum Period {
    All,
    Day(NaiveDate),
    Month { year: i32, month: u32 },
    Year(i32),
    Years { start: i32, end: i32 },
    Since(NaiveDate),
}

impl Period {
    fn calendar(year: Option<i32>, month: Option<u32>, day: Option<u32>) -> Result<Option<Self>> {
        let period = match (year, month, day) {
            (Some(y), Some(m), Some(d)) => Some(Period::Day(
                NaiveDate::from_ymd_opt(y, m, d)
                    .ok_or_else(|| PipelineError::ExecutionError(format!("{}-{:02}-{:02} is not a date", y, m, d)))?,
            )),
            (Some(year), Some(month), None) => Some(Period::Month { year, month }),
            (Some(y), None, _) => Some(Period::Year(y)),
            _ => None,
        };
        Ok(period)
    }

    fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            Period::All => true,
            Period::Day(day) => date == day,
            Period::Month { year, month } => date.year() == year && date.month() == month,
            Period::Year(year) => date.year() == year,
            Period::Years { start, end } => (start..=end).contains(&date.year()),
            Period::Since(cutoff) => date >= cutoff,
        }
    }

    fn label(&self) -> String {
        match *self {
            Period::All => "all time".to_string(),
            Period::Day(day) => day.format("%Y-%m-%d").to_string(),
            Period::Month { year, month } => format!("{}-{:02}", year, month),
            Period::Year(year) => year.to_string(),
            Period::Years { start, end } => format!("{}-{}", start, end),
            Period::Since(cutoff) => format!("since {}", cutoff.format("%Y-%m-%d")),
        }
    }

    /// First day covered, for ordering compared periods.
    fn first_day(&self) -> NaiveDate {
        match *self {
            Period::Day(day) | Period::Since(day) => day,
            Period::Month { year, month } => {
                NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
            }
            Period::Year(year) | Period::Years { start: year, .. } => {
                NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN)
            }
            Period::All => NaiveDate::MIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Subject<'a> {
    Category(&'a str),
    Remarks(&'a str),
    Everything,
}

impl<'a> Subject<'a> {
    fn from_invocation(invocation: &'a ValidatedInvocation) -> Self {
        if let Some(category) = invocation.get_str("category").filter(|s| !s.is_empty()) {
            Subject::Category(category)
        } else if let Some(remarks) = invocation.get_str("remarks").filter(|s| !s.is_empty()) {
            Subject::Remarks(remarks)
        } else {
            Subject::Everything
        }
    }

    fn label(&self, everything: &str) -> String {
        match self {
            Subject::Category(category) => category.to_string(),
            Subject::Remarks(remarks) => format!("'{}'", remarks),
            Subject::Everything => everything.to_string(),
        }
    }

    fn matches(&self, dataset: &Dataset, tx: &Transaction) -> bool {
        match self {
            Subject::Category(category) => {
                tx.category.trim().eq_ignore_ascii_case(category.trim())
                    || dataset
                        .major_category_of(tx)
                        .is_some_and(|major| major.trim().eq_ignore_ascii_case(category.trim()))
            }
            Subject::Remarks(needle) => tx
                .remarks
                .as_deref()
                .is_some_and(|r| r.to_lowercase().contains(&needle.to_lowercase())),
            Subject::Everything => true,
        }
    }
}

//
// ================= Tools =================
//

struct Analyst<'a> {
    dataset: &'a Dataset,
    options: &'a AnalysisOptions,
    money: Money,
}

impl<'a> Analyst<'a> {
    fn select(&self, period: Period, subject: Subject<'_>) -> Vec<&'a Transaction> {
        let dataset = self.dataset;
        dataset
            .transactions
            .iter()
            .filter(|tx| period.contains(tx.date) && subject.matches(dataset, tx))
            .collect()
    }

    /// Calendar slot first, then year range, then recent months.
    fn period(
        &self,
        invocation: &ValidatedInvocation,
        year: &str,
        month: &str,
        day: Option<&str>,
    ) -> Result<Period> {
        let calendar = Period::calendar(
            invocation.get_i32(year),
            invocation.get_u32(month),
            day.and_then(|d| invocation.get_u32(d)),
        )?;
        if let Some(period) = calendar {
            return Ok(period);
        }

        let start = invocation.get_i32("start_year");
        let end = invocation.get_i32("end_year");
        let earliest = self.dataset.date_bounds().map(|b| b.earliest.year());
        match (start, end) {
            (Some(start), Some(end)) => return Ok(Period::Years { start, end }),
            (Some(start), None) => {
                return Ok(Period::Years {
                    start,
                    end: self.options.today.year(),
                })
            }
            (None, Some(end)) => {
                return Ok(Period::Years {
                    start: earliest.unwrap_or(end).min(end),
                    end,
                })
            }
            (None, None) => {}
        }

        if let Some(months) = invocation.get_u32("months") {
            let cutoff = self
                .options
                .today
                .checked_sub_months(Months::new(months))
                .ok_or_else(|| PipelineError::ExecutionError(format!("months={} reaches before the calendar", months)))?;
            return Ok(Period::Since(cutoff));
        }

        Ok(Period::All)
    }

    fn calculate_total(&self, invocation: &ValidatedInvocation) -> Result<AnalysisOutput> {
        let period = self.period(invocation, "year", "month", Some("day"))?;
        let subject = Subject::from_invocation(invocation);
        let label = subject.label("Total");
        let rows = self.select(period, subject);

        if rows.is_empty() {
            return Ok(AnalysisOutput::text(
                format!("No transactions found for {} in {}.", label, period.label()),
                Some(0.0),
            ));
        }

        let total: f64 = rows.iter().map(|t| t.amount).sum();
        let average = total / rows.len() as f64;
        Ok(AnalysisOutput::text(
            format!(
                "{} in {}: {} (n={}, avg {})",
                label,
                period.label(),
                self.money.format(total),
                rows.len(),
                self.money.format(average)
            ),
            Some(total),
        ))
    }

    fn calculate_statistics(&self, invocation: &ValidatedInvocation) -> Result<AnalysisOutput> {
        let subject = Subject::from_invocation(invocation);
        let label = subject.label("Total");

        if invocation.get_bool("compare").unwrap_or(false) {
            return self.compare_statistics(invocation, subject, &label);
        }

        let period = self.period(invocation, "y1", "m1", None)?;
        let amounts: Vec<f64> = self.select(period, subject).iter().map(|t| t.amount).collect();

        let (Some(mean), Some(median)) = (stats::mean(&amounts), stats::median(&amounts)) else {
            return Err(PipelineError::ExecutionError(format!(
                "No transactions found for {} in {}; statistics need at least one value.",
                label,
                period.label()
            )));
        };
        let std_dev = stats::sample_std(&amounts)
            .map(|s| self.money.format(s))
            .unwrap_or_else(|| "n/a".to_string());

        Ok(AnalysisOutput::text(
            format!(
                "{} in {}: Mean {}, Median {}, Std Dev {} (n={})",
                label,
                period.label(),
                self.money.format(mean),
                self.money.format(median),
                std_dev,
                amounts.len()
            ),
            Some(mean),
        ))
    }

    fn compare_statistics(
        &self,
        invocation: &ValidatedInvocation,
        subject: Subject<'_>,
        label: &str,
    ) -> Result<AnalysisOutput> {
        let first = Period::calendar(invocation.get_i32("y1"), invocation.get_u32("m1"), None)?;
        let second = Period::calendar(invocation.get_i32("y2"), invocation.get_u32("m2"), None)?;
        let (Some(first), Some(second)) = (first, second) else {
            return Err(PipelineError::ExecutionError(
                "compare=True needs both y1 and y2".to_string(),
            ));
        };

        let a: Vec<f64> = self.select(first, subject).iter().map(|t| t.amount).collect();
        let b: Vec<f64> = self.select(second, subject).iter().map(|t| t.amount).collect();

        let insufficient = || {
            PipelineError::ExecutionError(format!(
                "Insufficient data for statistical comparison of {}: need at least 2 transactions per period ({}: {}, {}: {}).",
                label,
                first.label(),
                a.len(),
                second.label(),
                b.len()
            ))
        };
        let test = stats::welch_t_test(&a, &b).ok_or_else(insufficient)?;
        let d = stats::cohens_d(&a, &b).ok_or_else(insufficient)?;
        let (mean_a, mean_b) = (
            stats::mean(&a).ok_or_else(insufficient)?,
            stats::mean(&b).ok_or_else(insufficient)?,
        );

        let significance = if test.p_value < SIGNIFICANCE {
            "statistically significant"
        } else {
            "not statistically significant"
        };
        let effect = match d.abs() {
            x if x > 0.8 => "large",
            x if x > 0.5 => "medium",
            _ => "small",
        };

        Ok(AnalysisOutput::text(
            format!(
                "{} - {}: mean {} (n={}), {}: mean {} (n={}) | Difference is {} (p={:.4}), effect size: {} (d={:.3})",
                label,
                first.label(),
                self.money.format(mean_a),
                a.len(),
                second.label(),
                self.money.format(mean_b),
                b.len(),
                significance,
                test.p_value,
                effect,
                d
            ),
            Some(mean_b - mean_a),
        ))
    }

    fn get_top_expenses(&self, invocation: &ValidatedInvocation) -> Result<AnalysisOutput> {
        let n = invocation.get_i64("n").unwrap_or(10);
        if n < 1 {
            return Err(PipelineError::ExecutionError(format!("n must be at least 1, got {}", n)));
        }
        let min_amount = invocation.get_f64("min_amount");

        let period = self.period(invocation, "year", "month", None)?;
        let subject = Subject::from_invocation(invocation);
        let label = subject.label("all expenses");

        let mut rows: Vec<&Transaction> = self
            .select(period, subject)
            .into_iter()
            .filter(|t| min_amount.map_or(true, |min| t.amount >= min))
            .collect();

        if rows.is_empty() {
            return Ok(AnalysisOutput::text(
                format!("No expenses found for {} in {}.", label, period.label()),
                None,
            ));
        }

        rows.sort_by(|a, b| b.amount.total_cmp(&a.amount).then_with(|| a.date.cmp(&b.date)));
        rows.truncate(n as usize);

        let mut lines = vec![format!(
            "Top {} expenses for {} in {}:",
            rows.len(),
            label,
            period.label()
        )];
        let mut table = Vec::with_capacity(rows.len());
        for tx in &rows {
            let remarks = tx.remarks.as_deref().map(str::trim).filter(|r| !r.is_empty());
            lines.push(format!(
                "• {}: {} ({}){}",
                tx.date.format("%Y-%m-%d"),
                self.money.format(tx.amount),
                tx.category,
                remarks.map(|r| format!(" - {}", r)).unwrap_or_default()
            ));
            table.push(vec![
                tx.date.format("%Y-%m-%d").to_string(),
                self.money.format(tx.amount),
                tx.category.clone(),
                remarks.unwrap_or("").to_string(),
            ]);
        }

        let chart = ChartSpec::new(ChartKind::Table, format!("Top expenses: {}", label))
            .table(&["Date", "Amount", "Category", "Remarks"], table);

        Ok(AnalysisOutput {
            value: lines.join("\n"),
            scalar: rows.first().map(|t| t.amount),
            chart_spec: Some(chart),
        })
    }

    fn plot_time_series(&self, invocation: &ValidatedInvocation) -> Result<AnalysisOutput> {
        let period = self.period(invocation, "year", "month", None)?;
        let subject = Subject::from_invocation(invocation);
        let label = subject.label("Total");

        let mut rows = self.select(period, subject);
        if rows.is_empty() {
            return Ok(AnalysisOutput::text(
                format!("No spending data found for {} in the specified period.", label),
                Some(0.0),
            ));
        }
        rows.sort_by_key(|t| t.date);

        let amounts: Vec<f64> = rows.iter().map(|t| t.amount).collect();
        let total: f64 = amounts.iter().sum();
        let average = total / amounts.len() as f64;
        let max = amounts.iter().copied().fold(f64::MIN, f64::max);

        let daily = bucket_totals(&rows, |d| d);
        let (first, last) = match (daily.keys().next(), daily.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(PipelineError::ExecutionError("empty time series".to_string())),
        };
        let span_days = (last - first).num_days();

        let title = format!("Spending over time: {}", label);
        let chart = if rows.len() < BAR_CHART_LIMIT {
            let (labels, values) = split_buckets(&daily);
            ChartSpec::new(ChartKind::Bar, title)
                .labels(labels)
                .series("amount", values)
        } else {
            let (buckets, window, unit) = if span_days > WEEKLY_SPAN_DAYS {
                (fill_gaps(bucket_totals(&rows, week_start), 7), 4, "4-week average")
            } else {
                (fill_gaps(daily, 1), 7, "7-day average")
            };
            let (labels, values) = split_buckets(&buckets);
            let smoothed = moving_average(&values, window);
            ChartSpec::new(ChartKind::Line, title)
                .labels(labels)
                .series("amount", values)
                .series(unit, smoothed)
        };

        Ok(AnalysisOutput {
            value: format!(
                "Time-series for {}: {} (n={}) | Avg: {} | Max: {}",
                label,
                self.money.format(total),
                amounts.len(),
                self.money.format(average),
                self.money.format(max)
            ),
            scalar: Some(total),
            chart_spec: Some(
                chart
                    .axes("Date", &format!("Amount ({})", self.options.currency))
                    .reference(average),
            ),
        })
    }

    fn plot_distribution(&self, invocation: &ValidatedInvocation) -> Result<AnalysisOutput> {
        let period = self.period(invocation, "year", "month", None)?;
        let subject = Subject::from_invocation(invocation);
        let filter_label = subject.label("All Categories");
        let rows = self.select(period, subject);

        if rows.is_empty() {
            return Ok(AnalysisOutput::text(
                format!("No data found for {} in {}.", filter_label, period.label()),
                Some(0.0),
            ));
        }

        let grouping = self.distribution_grouping(subject, &rows);
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for tx in &rows {
            *totals.entry(grouping.key(self.dataset, tx)).or_default() += tx.amount;
        }
        let total: f64 = totals.values().sum();

        let mut slices: Vec<(String, f64)> = totals.into_iter().collect();
        slices.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let slices = if grouping == Grouping::Remarks {
            fold_tail(slices, MAX_REMARK_SLICES)
        } else if slices.len() > MAX_SLICES {
            fold_small(slices, total)
        } else {
            slices
        };

        let (labels, values): (Vec<String>, Vec<f64>) = slices.into_iter().unzip();
        let items = labels.len();
        let chart = ChartSpec::new(
            ChartKind::Pie,
            format!("Distribution: {} ({})", filter_label, period.label()),
        )
        .labels(labels)
        .series("amount", values);

        Ok(AnalysisOutput {
            value: format!(
                "Distribution for {}: {} (n={} across {} items)",
                filter_label,
                self.money.format(total),
                rows.len(),
                items
            ),
            scalar: Some(total),
            chart_spec: Some(chart),
        })
    }

    fn distribution_grouping(&self, subject: Subject<'_>, rows: &[&Transaction]) -> Grouping {
        match subject {
            Subject::Everything => Grouping::MajorCategory,
            Subject::Remarks(_) => Grouping::Category,
            Subject::Category(category) => {
                let is_group = rows.iter().any(|tx| {
                    !tx.category.trim().eq_ignore_ascii_case(category.trim())
                        && self
                            .dataset
                            .major_category_of(tx)
                            .is_some_and(|m| m.trim().eq_ignore_ascii_case(category.trim()))
                });
                let has_remarks = rows
                    .iter()
                    .any(|tx| tx.remarks.as_deref().is_some_and(|r| !r.trim().is_empty()));
                if !is_group && has_remarks {
                    Grouping::Remarks
                } else {
                    Grouping::Category
                }
            }
        }
    }

    fn plot_comparison_bars(&self, invocation: &ValidatedInvocation) -> Result<AnalysisOutput> {
        let (first, second) = comparison_periods(invocation)?;
        let subject = Subject::from_invocation(invocation);
        let grouping = match subject {
            Subject::Everything => Grouping::MajorCategory,
            _ => Grouping::Category,
        };

        let group = |rows: &[&Transaction]| {
            let mut totals: BTreeMap<String, f64> = BTreeMap::new();
            for tx in rows {
                *totals.entry(grouping.key(self.dataset, tx)).or_default() += tx.amount;
            }
            totals
        };
        let rows_first = self.select(first, subject);
        let rows_second = self.select(second, subject);
        let groups_first = group(&rows_first);
        let groups_second = group(&rows_second);

        let total_first: f64 = groups_first.values().sum();
        let total_second: f64 = groups_second.values().sum();
        let change = percent_change(total_first, total_second);
        let direction = if change > 0.0 {
            "increase"
        } else if change < 0.0 {
            "decrease"
        } else {
            "no change"
        };

        let mut labels: Vec<String> = groups_first.keys().chain(groups_second.keys()).cloned().collect();
        labels.sort();
        labels.dedup();
        labels.sort_by(|a, b| {
            let combined = |k: &String| groups_first.get(k).unwrap_or(&0.0) + groups_second.get(k).unwrap_or(&0.0);
            combined(b).total_cmp(&combined(a))
        });
        let values = |groups: &BTreeMap<String, f64>| -> Vec<f64> {
            labels.iter().map(|l| groups.get(l).copied().unwrap_or(0.0)).collect()
        };

        let chart = ChartSpec::new(
            ChartKind::GroupedBar,
            format!("{}: {} vs {}", subject.label("All Categories"), first.label(), second.label()),
        )
        .axes("Category", &format!("Amount ({})", self.options.currency))
        .series(&first.label(), values(&groups_first))
        .series(&second.label(), values(&groups_second))
        .labels(labels);

        Ok(AnalysisOutput {
            value: format!(
                "Comparison: {} ({}) vs {} ({}) | Change: {:.1}% {}",
                first.label(),
                self.money.format(total_first),
                second.label(),
                self.money.format(total_second),
                change.abs(),
                direction
            ),
            scalar: Some(change),
            chart_spec: Some(chart),
        })
    }
}

//
// ================= Helpers =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grouping {
    MajorCategory,
    Category,
    Remarks,
}

impl Grouping {
    fn key(&self, dataset: &Dataset, tx: &Transaction) -> String {
        match self {
            Grouping::MajorCategory => dataset
                .major_category_of(tx)
                .unwrap_or("Uncategorized")
                .to_string(),
            Grouping::Category => tx.category.clone(),
            Grouping::Remarks => tx
                .remarks
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or("(no remarks)")
                .to_string(),
        }
    }
}

/// Day, month or year periods, earlier one first.
fn comparison_periods(invocation: &ValidatedInvocation) -> Result<(Period, Period)> {
    let (Some(y1), Some(y2)) = (invocation.get_i32("y1"), invocation.get_i32("y2")) else {
        return Err(PipelineError::ExecutionError("comparison needs y1 and y2".to_string()));
    };
    let (m1, m2) = (invocation.get_u32("m1"), invocation.get_u32("m2"));
    let (d1, d2) = (invocation.get_u32("d1"), invocation.get_u32("d2"));

    let (first, second) = if d1.is_some() && d2.is_some() && m1.is_some() && m2.is_some() {
        (Period::calendar(Some(y1), m1, d1)?, Period::calendar(Some(y2), m2, d2)?)
    } else if m1.is_some() && m2.is_some() {
        (Period::calendar(Some(y1), m1, None)?, Period::calendar(Some(y2), m2, None)?)
    } else {
        (Some(Period::Year(y1)), Some(Period::Year(y2)))
    };

    let (Some(first), Some(second)) = (first, second) else {
        return Err(PipelineError::ExecutionError("comparison needs two calendar periods".to_string()));
    };

    if second.first_day() < first.first_day() {
        Ok((second, first))
    } else {
        Ok((first, second))
    }
}

fn percent_change(before: f64, after: f64) -> f64 {
    if before == 0.0 {
        if after > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (after - before) / before * 100.0
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn bucket_totals(rows: &[&Transaction], key: impl Fn(NaiveDate) -> NaiveDate) -> BTreeMap<NaiveDate, f64> {
    let mut buckets = BTreeMap::new();
    for tx in rows {
        *buckets.entry(key(tx.date)).or_insert(0.0) += tx.amount;
    }
    buckets
}

/// Insert zero buckets every `step_days` between the first and last key.
fn fill_gaps(mut buckets: BTreeMap<NaiveDate, f64>, step_days: i64) -> BTreeMap<NaiveDate, f64> {
    let (Some(first), Some(last)) = (buckets.keys().next().copied(), buckets.keys().next_back().copied()) else {
        return buckets;
    };
    let mut cursor = first;
    while cursor < last {
        buckets.entry(cursor).or_insert(0.0);
        cursor += Duration::days(step_days);
    }
    buckets
}

fn split_buckets(buckets: &BTreeMap<NaiveDate, f64>) -> (Vec<String>, Vec<f64>) {
    buckets
        .iter()
        .map(|(date, total)| (date.format("%Y-%m-%d").to_string(), *total))
        .unzip()
}

/// Trailing mean over at most `window` values.
fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Keep the `keep` largest slices, merge the rest into "Others".
fn fold_tail(mut slices: Vec<(String, f64)>, keep: usize) -> Vec<(String, f64)> {
    if slices.len() <= keep {
        return slices;
    }
    let rest: f64 = slices.split_off(keep).iter().map(|(_, v)| v).sum();
    slices.push(("Others".to_string(), rest));
    slices
}

/// Merge slices under the minimum share into "Others".
fn fold_small(slices: Vec<(String, f64)>, total: f64) -> Vec<(String, f64)> {
    if total <= 0.0 {
        return slices;
    }
    let (mut kept, small): (Vec<_>, Vec<_>) = slices
        .into_iter()
        .partition(|(_, v)| v / total >= MIN_SLICE_SHARE);
    if !small.is_empty() {
        kept.push(("Others".to_string(), small.iter().map(|(_, v)| v).sum()));
    }
    kept
}
