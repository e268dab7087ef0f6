//! Tool registry
//!
//! The analytical tool set is closed: every tool the pipeline can run is a
//! `ToolKind` variant with a static schema, date rules and prompt contract.
//! Nothing is ever dispatched on an unchecked string.

pub mod prompts;

use crate::models::ArgValue;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    PlotTimeSeries,
    PlotDistribution,
    PlotComparisonBars,
    CalculateTotal,
    CalculateStatistics,
    GetTopExpenses,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::PlotTimeSeries,
        ToolKind::PlotDistribution,
        ToolKind::PlotComparisonBars,
        ToolKind::CalculateTotal,
        ToolKind::CalculateStatistics,
        ToolKind::GetTopExpenses,
    ];

    pub fn name(&self) -> &'static str {
        self.definition().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn definition(&self) -> &'static ToolDefinition {
        let index = match self {
            ToolKind::PlotTimeSeries => 0,
            ToolKind::PlotDistribution => 1,
            ToolKind::PlotComparisonBars => 2,
            ToolKind::CalculateTotal => 3,
            ToolKind::CalculateStatistics => 4,
            ToolKind::GetTopExpenses => 5,
        };
        &DEFINITIONS[index]
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

//
// ================= Schema =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

/// What a parameter means to the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    Category,
    Remarks,
    Year,
    Month,
    Day,
    RecentMonths,
    Count,
    Amount,
    Flag,
}

impl ParamRole {
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ParamRole::Year | ParamRole::Month | ParamRole::Day | ParamRole::RecentMonths
        )
    }
}

#[derive(Debug)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub role: ParamRole,
    pub required: bool,
    pub default: Option<ArgValue>,
}

const fn param(name: &'static str, ty: ParamType, role: ParamRole) -> ParameterSpec {
    ParameterSpec {
        name,
        ty,
        role,
        required: false,
        default: None,
    }
}

const fn required(name: &'static str, ty: ParamType, role: ParamRole) -> ParameterSpec {
    ParameterSpec {
        name,
        ty,
        role,
        required: true,
        default: None,
    }
}

const fn with_default(
    name: &'static str,
    ty: ParamType,
    role: ParamRole,
    default: ArgValue,
) -> ParameterSpec {
    ParameterSpec {
        name,
        ty,
        role,
        required: true,
        default: Some(default),
    }
}

/// A `year` slot together with the `month`/`day` slots that refine it.
#[derive(Debug, Clone, Copy)]
pub struct CalendarSlots {
    pub year: &'static str,
    pub month: Option<&'static str>,
    pub day: Option<&'static str>,
}

impl CalendarSlots {
    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.year).chain(self.month).chain(self.day)
    }
}

/// How temporal phrases map onto a tool's arguments.
///
/// Filters are listed in priority order: calendar slots, then the year range,
/// then the relative month window. Tools with two calendar groups compare
/// periods, so both groups may be filled at once.
#[derive(Debug)]
pub struct DateRules {
    pub calendar: &'static [CalendarSlots],
    pub year_range: Option<(&'static str, &'static str)>,
    pub recent_months: Option<&'static str>,
}

impl DateRules {
    pub fn is_period_comparison(&self) -> bool {
        self.calendar.len() > 1
    }

    /// Calendar group containing the named slot, if any.
    pub fn calendar_group(&self, slot: &str) -> Option<&'static CalendarSlots> {
        self.calendar.iter().find(|group| group.names().any(|n| n == slot))
    }

    pub fn in_year_range(&self, slot: &str) -> bool {
        self.year_range
            .map(|(start, end)| start == slot || end == slot)
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub struct ToolDefinition {
    pub kind: ToolKind,
    pub name: &'static str,
    /// One-line purpose, shown to the router.
    pub description: &'static str,
    pub parameters: &'static [ParameterSpec],
    pub date_rules: DateRules,
    /// Tool-specific prompt text (usage notes), shown to the specialist.
    pub usage: &'static str,
    pub examples: &'static [(&'static str, &'static str)],
    pub produces_chart: bool,
}

impl ToolDefinition {
    pub fn parameter(&self, name: &str) -> Option<&'static ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn parameter_names(&self) -> Vec<&'static str> {
        self.parameters.iter().map(|p| p.name).collect()
    }

    /// Python-like signature used in prompts, e.g. `calculate_total(category=None, ...)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| match (&p.default, p.required) {
                (Some(default), _) => format!("{}={}", p.name, default),
                (None, true) => p.name.to_string(),
                (None, false) => format!("{}=None", p.name),
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

//
// ================= Registry =================
//

/// Lookup over the closed tool set.
pub struct ToolRegistry {
    tools: &'static [ToolDefinition],
}

impl ToolRegistry {
    pub fn get(&self, name: &str) -> Option<&'static ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn list(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }

    pub fn definitions(&self) -> &'static [ToolDefinition] {
        self.tools
    }
}

static REGISTRY: ToolRegistry = ToolRegistry {
    tools: &DEFINITIONS,
};

pub fn registry() -> &'static ToolRegistry {
    &REGISTRY
}

use ParamRole as R;
use ParamType as T;

static DEFINITIONS: [ToolDefinition; 6] = [
    ToolDefinition {
        kind: ToolKind::PlotTimeSeries,
        name: "plot_time_series",
        description: "trends and spending over time, recent months or year ranges",
        parameters: &[
            param("category", T::String, R::Category),
            param("remarks", T::String, R::Remarks),
            param("year", T::Integer, R::Year),
            param("month", T::Integer, R::Month),
            param("start_year", T::Integer, R::Year),
            param("end_year", T::Integer, R::Year),
            param("months", T::Integer, R::RecentMonths),
        ],
        date_rules: DateRules {
            calendar: &[CalendarSlots {
                year: "year",
                month: Some("month"),
                day: None,
            }],
            year_range: Some(("start_year", "end_year")),
            recent_months: Some("months"),
        },
        usage: "Use when the user asks about trends, spending over time, or date ranges.\n\
                - `months=N`: last N months from today\n\
                - `year=YYYY`: full calendar year\n\
                - `year=YYYY, month=M`: a single month (always pass both)\n\
                - `start_year=YYYY, end_year=YYYY`: year range",
        examples: &[
            (
                "How much did I spend on futsal for the past 6 months?",
                "plot_time_series(category=\"futsal game\", months=6)",
            ),
            (
                "Show me food spending from 2023 to 2025",
                "plot_time_series(category=\"Food\", start_year=2023, end_year=2025)",
            ),
            (
                "Gym expenses in 2024?",
                "plot_time_series(category=\"gym\", year=2024)",
            ),
        ],
        produces_chart: true,
    },
    ToolDefinition {
        kind: ToolKind::PlotDistribution,
        name: "plot_distribution",
        description: "breakdown or distribution of spending, pie charts",
        parameters: &[
            param("category", T::String, R::Category),
            param("remarks", T::String, R::Remarks),
            param("year", T::Integer, R::Year),
            param("month", T::Integer, R::Month),
        ],
        date_rules: DateRules {
            calendar: &[CalendarSlots {
                year: "year",
                month: Some("month"),
                day: None,
            }],
            year_range: None,
            recent_months: None,
        },
        usage: "Use when the user asks for a breakdown, distribution, or pie chart.\n\
                - `year=YYYY, month=M`: specific month\n\
                - `year=YYYY`: full year\n\
                - no time filter: all time",
        examples: &[
            (
                "Show me a breakdown of my food expenses in 2024",
                "plot_distribution(category=\"Food\", year=2024)",
            ),
            (
                "Pie chart of all expenses in Jan 2025",
                "plot_distribution(year=2025, month=1)",
            ),
        ],
        produces_chart: true,
    },
    ToolDefinition {
        kind: ToolKind::PlotComparisonBars,
        name: "plot_comparison_bars",
        description: "comparing spending between two specific periods",
        parameters: &[
            param("category", T::String, R::Category),
            param("remarks", T::String, R::Remarks),
            required("y1", T::Integer, R::Year),
            param("m1", T::Integer, R::Month),
            param("d1", T::Integer, R::Day),
            required("y2", T::Integer, R::Year),
            param("m2", T::Integer, R::Month),
            param("d2", T::Integer, R::Day),
        ],
        date_rules: DateRules {
            calendar: &[
                CalendarSlots {
                    year: "y1",
                    month: Some("m1"),
                    day: Some("d1"),
                },
                CalendarSlots {
                    year: "y2",
                    month: Some("m2"),
                    day: Some("d2"),
                },
            ],
            year_range: None,
            recent_months: None,
        },
        usage: "Use when comparing two specific periods.\n\
                - two years: `y1=2024, y2=2025`\n\
                - two months: `y1=2024, m1=12, y2=2025, m2=12`\n\
                - two dates: `y1=2024, m1=7, d1=21, y2=2025, m2=7, d2=21`",
        examples: &[
            (
                "Compare food spending in 2024 vs 2025",
                "plot_comparison_bars(category=\"Food\", y1=2024, y2=2025)",
            ),
            (
                "Compare dining Jan 2024 vs Jan 2025",
                "plot_comparison_bars(category=\"dining\", y1=2024, m1=1, y2=2025, m2=1)",
            ),
        ],
        produces_chart: true,
    },
    ToolDefinition {
        kind: ToolKind::CalculateTotal,
        name: "calculate_total",
        description: "total amount spent, sums for a category, period or date",
        parameters: &[
            param("category", T::String, R::Category),
            param("remarks", T::String, R::Remarks),
            param("year", T::Integer, R::Year),
            param("month", T::Integer, R::Month),
            param("day", T::Integer, R::Day),
            param("start_year", T::Integer, R::Year),
            param("end_year", T::Integer, R::Year),
        ],
        date_rules: DateRules {
            calendar: &[CalendarSlots {
                year: "year",
                month: Some("month"),
                day: Some("day"),
            }],
            year_range: Some(("start_year", "end_year")),
            recent_months: None,
        },
        usage: "Use when the user asks for a total sum.\n\
                - `year, month, day`: specific date\n\
                - `year, month`: specific month\n\
                - `year`: full year\n\
                - `start_year, end_year`: year range",
        examples: &[
            (
                "How much did I spend on groceries in Dec 2024?",
                "calculate_total(category=\"groceries\", year=2024, month=12)",
            ),
            (
                "Total spending 2023 to 2025?",
                "calculate_total(start_year=2023, end_year=2025)",
            ),
        ],
        produces_chart: false,
    },
    ToolDefinition {
        kind: ToolKind::CalculateStatistics,
        name: "calculate_statistics",
        description: "averages, mean, median, or statistical comparison of two periods",
        parameters: &[
            param("category", T::String, R::Category),
            param("remarks", T::String, R::Remarks),
            param("y1", T::Integer, R::Year),
            param("m1", T::Integer, R::Month),
            param("y2", T::Integer, R::Year),
            param("m2", T::Integer, R::Month),
            with_default("compare", T::Boolean, R::Flag, ArgValue::Bool(false)),
        ],
        date_rules: DateRules {
            calendar: &[
                CalendarSlots {
                    year: "y1",
                    month: Some("m1"),
                    day: None,
                },
                CalendarSlots {
                    year: "y2",
                    month: Some("m2"),
                    day: None,
                },
            ],
            year_range: None,
            recent_months: None,
        },
        usage: "Use when the user asks for averages, mean, median, or a statistical comparison.\n\
                - single period: `y1=YYYY` (optionally `m1=M`)\n\
                - comparison: `y1=YYYY, y2=YYYY, compare=True`",
        examples: &[
            (
                "Average dining expense in 2024?",
                "calculate_statistics(category=\"dining\", y1=2024)",
            ),
            (
                "Did I spend more on food in 2025 than 2024?",
                "calculate_statistics(category=\"Food\", y1=2024, y2=2025, compare=True)",
            ),
        ],
        produces_chart: false,
    },
    ToolDefinition {
        kind: ToolKind::GetTopExpenses,
        name: "get_top_expenses",
        description: "biggest or largest individual expenses",
        parameters: &[
            with_default("n", T::Integer, R::Count, ArgValue::Int(10)),
            param("category", T::String, R::Category),
            param("remarks", T::String, R::Remarks),
            param("year", T::Integer, R::Year),
            param("month", T::Integer, R::Month),
            param("min_amount", T::Number, R::Amount),
        ],
        date_rules: DateRules {
            calendar: &[CalendarSlots {
                year: "year",
                month: Some("month"),
                day: None,
            }],
            year_range: None,
            recent_months: None,
        },
        usage: "Use when the user asks for the biggest or largest expenses.\n\
                - `n`: how many to return (default 10)\n\
                - `min_amount`: only include expenses above this value",
        examples: &[
            (
                "What were my biggest expenses in Dec 2024?",
                "get_top_expenses(n=10, year=2024, month=12)",
            ),
            (
                "Show top 5 food purchases in 2025",
                "get_top_expenses(n=5, category=\"Food\", year=2025)",
            ),
        ],
        produces_chart: false,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_is_closed() {
        let registry = registry();
        assert_eq!(registry.list().len(), 6);
        assert!(registry.get("calculate_total").is_some());
        assert!(registry.get("calculate_sum").is_none());
        assert!(registry.get("Calculate_Total").is_none());
    }

    #[test]
    fn test_kind_and_definition_agree() {
        for kind in ToolKind::ALL {
            let definition = kind.definition();
            assert_eq!(definition.kind, kind);
            assert_eq!(ToolKind::from_name(definition.name), Some(kind));
        }
    }

    #[test]
    fn test_signature_shows_defaults() {
        let signature = ToolKind::GetTopExpenses.definition().signature();
        assert!(signature.starts_with("get_top_expenses(n=10, category=None"));

        let signature = ToolKind::PlotComparisonBars.definition().signature();
        assert!(signature.contains("y1, m1=None"));
    }

    #[test]
    fn test_examples_only_use_declared_parameters() {
        for definition in registry().definitions() {
            for (_, call) in definition.examples {
                let invocation = crate::invocation::parse(call).unwrap();
                assert_eq!(invocation.name, definition.name);
                for (key, _) in &invocation.arguments {
                    assert!(
                        definition.parameter(key).is_some(),
                        "{} has no parameter {}",
                        definition.name,
                        key
                    );
                }
            }
        }
    }

    #[test]
    fn test_date_rules_groups() {
        let rules = &ToolKind::PlotComparisonBars.definition().date_rules;
        assert!(rules.is_period_comparison());
        assert_eq!(rules.calendar_group("m2").map(|g| g.year), Some("y2"));
        assert!(rules.calendar_group("year").is_none());

        let rules = &ToolKind::CalculateTotal.definition().date_rules;
        assert!(rules.in_year_range("end_year"));
        assert!(!rules.is_period_comparison());
    }
}
