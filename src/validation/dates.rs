//! Temporal phrase resolution
//!
//! Pure functions of the phrase and the current date.

use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalValue {
    /// A year, optionally narrowed to a month and day.
    Calendar {
        year: i32,
        month: Option<u32>,
        day: Option<u32>,
    },
    /// A month name with no year attached.
    Month(u32),
    YearRange { start: i32, end: i32 },
    /// The last N months counted back from today.
    RecentMonths(u32),
}

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

const FILLERS: [&str; 8] = ["in", "during", "for", "from", "between", "the", "of", "over"];

const RANGE_JOINERS: [&str; 6] = ["to", "-", "and", "through", "until", "till"];

/// `"jan"`, `"January"`, `"sept"` → 1-based month number.
pub fn month_number(token: &str) -> Option<u32> {
    let token = token.trim().trim_end_matches('.').to_lowercase();
    if token.len() < 3 {
        return None;
    }
    if token == "sept" {
        return Some(9);
    }
    MONTHS
        .iter()
        .position(|name| *name == token || (token.len() == 3 && name.starts_with(&token)))
        .map(|i| i as u32 + 1)
}

fn number_word(token: &str) -> Option<u32> {
    let words = [
        "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "eleven",
        "twelve",
    ];
    token
        .parse()
        .ok()
        .or_else(|| words.iter().position(|w| *w == token).map(|i| i as u32 + 1))
}

fn year(token: &str) -> Option<i32> {
    (token.len() == 4 && token.chars().all(|c| c.is_ascii_digit()))
        .then(|| token.parse().ok())
        .flatten()
}

fn previous_month(today: NaiveDate) -> (i32, u32) {
    if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    }
}

/// ISO-like forms: `2025`, `2025-01`, `2025/01/15`, `2023-2025`.
fn parse_numeric(text: &str) -> Option<TemporalValue> {
    let parts: Vec<&str> = text.split(['-', '/']).map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }

    match parts.as_slice() {
        [y] => Some(TemporalValue::Calendar {
            year: year(y)?,
            month: None,
            day: None,
        }),
        [a, b] if year(a).is_some() && year(b).is_some() => Some(TemporalValue::YearRange {
            start: year(a)?,
            end: year(b)?,
        }),
        [y, m] => Some(TemporalValue::Calendar {
            year: year(y)?,
            month: Some(m.parse().ok()?),
            day: None,
        }),
        [y, m, d] => Some(TemporalValue::Calendar {
            year: year(y)?,
            month: Some(m.parse().ok()?),
            day: Some(d.parse().ok()?),
        }),
        _ => None,
    }
}

/// Resolve a free-form temporal phrase. `None` when the phrase is not understood.
pub fn parse_phrase(phrase: &str, today: NaiveDate) -> Option<TemporalValue> {
    let text = phrase
        .trim()
        .trim_matches(|c| c == '`' || c == '\'' || c == '"')
        .to_lowercase()
        .replace(',', " ");

    if let Some(value) = parse_numeric(text.trim()) {
        return Some(value);
    }

    let spaced = text.replace(" - ", " to ");
    let tokens: Vec<&str> = spaced
        .split_whitespace()
        .skip_while(|t| FILLERS.contains(t))
        .collect();

    match tokens.as_slice() {
        ["this" | "current", "year"] => Some(TemporalValue::Calendar {
            year: today.year(),
            month: None,
            day: None,
        }),
        ["last" | "previous", "year"] => Some(TemporalValue::Calendar {
            year: today.year() - 1,
            month: None,
            day: None,
        }),
        ["this" | "current", "month"] => Some(TemporalValue::Calendar {
            year: today.year(),
            month: Some(today.month()),
            day: None,
        }),
        ["last" | "previous", "month"] => {
            let (year, month) = previous_month(today);
            Some(TemporalValue::Calendar {
                year,
                month: Some(month),
                day: None,
            })
        }
        ["past" | "recent", "year"] => Some(TemporalValue::RecentMonths(12)),
        ["past" | "last" | "previous" | "recent", n, unit] | [n, unit] => {
            match (number_word(n), *unit) {
                (Some(n), "month" | "months") => Some(TemporalValue::RecentMonths(n)),
                (Some(n), "year" | "years") => n.checked_mul(12).map(TemporalValue::RecentMonths),
                _ => year_and_month(tokens.as_slice()),
            }
        }
        [a, joiner, b] if RANGE_JOINERS.contains(joiner) => Some(TemporalValue::YearRange {
            start: year(a)?,
            end: year(b)?,
        }),
        _ => year_and_month(tokens.as_slice()),
    }
}

/// `jan 2025`, `2025 march`, `march 3 2025`, `3 march 2025`, `march`.
fn year_and_month(tokens: &[&str]) -> Option<TemporalValue> {
    match tokens {
        [m] => month_number(m).map(TemporalValue::Month),
        [a, b] => {
            let (m, y) = match (month_number(a), month_number(b)) {
                (Some(m), None) => (m, year(b)?),
                (None, Some(m)) => (m, year(a)?),
                _ => return None,
            };
            Some(TemporalValue::Calendar {
                year: y,
                month: Some(m),
                day: None,
            })
        }
        [a, b, c] => {
            let y = year(c)?;
            let (m, d) = match (month_number(a), month_number(b)) {
                (Some(m), None) => (m, day(b)?),
                (None, Some(m)) => (m, day(a)?),
                _ => return None,
            };
            Some(TemporalValue::Calendar {
                year: y,
                month: Some(m),
                day: Some(d),
            })
        }
        _ => None,
    }
}

fn day(token: &str) -> Option<u32> {
    token
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

/// True when the (year, month, day) triple names a real date.
pub fn is_valid_day(year: i32, month: u32, day: u32) -> bool {
    NaiveDate::from_ymd_opt(year, month, day).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
    }

    fn calendar(year: i32, month: Option<u32>, day: Option<u32>) -> Option<TemporalValue> {
        Some(TemporalValue::Calendar { year, month, day })
    }

    #[test]
    fn test_relative_phrases() {
        assert_eq!(parse_phrase("past 6 months", today()), Some(TemporalValue::RecentMonths(6)));
        assert_eq!(parse_phrase("the last six months", today()), Some(TemporalValue::RecentMonths(6)));
        assert_eq!(parse_phrase("this year", today()), calendar(2026, None, None));
        assert_eq!(parse_phrase("last year", today()), calendar(2025, None, None));
        assert_eq!(parse_phrase("last month", today()), calendar(2025, Some(12), None));
        assert_eq!(parse_phrase("past 2 years", today()), Some(TemporalValue::RecentMonths(24)));
        assert_eq!(parse_phrase("past 400000000 years", today()), None);
    }

    #[test]
    fn test_absolute_phrases() {
        assert_eq!(parse_phrase("Jan 2025", today()), calendar(2025, Some(1), None));
        assert_eq!(parse_phrase("March 2024", today()), calendar(2024, Some(3), None));
        assert_eq!(parse_phrase("in December, 2024", today()), calendar(2024, Some(12), None));
        assert_eq!(parse_phrase("2025-01", today()), calendar(2025, Some(1), None));
        assert_eq!(parse_phrase("2024/07/21", today()), calendar(2024, Some(7), Some(21)));
        assert_eq!(parse_phrase("July 21st 2024", today()), calendar(2024, Some(7), Some(21)));
        assert_eq!(parse_phrase("'2024'", today()), calendar(2024, None, None));
        assert_eq!(parse_phrase("march", today()), Some(TemporalValue::Month(3)));
    }

    #[test]
    fn test_year_ranges() {
        let range = Some(TemporalValue::YearRange { start: 2023, end: 2025 });
        assert_eq!(parse_phrase("2023 to 2025", today()), range);
        assert_eq!(parse_phrase("from 2023 to 2025", today()), range);
        assert_eq!(parse_phrase("2023-2025", today()), range);
        assert_eq!(parse_phrase("between 2023 and 2025", today()), range);
    }

    #[test]
    fn test_unrecognised_phrases() {
        assert_eq!(parse_phrase("whenever", today()), None);
        assert_eq!(parse_phrase("recently-ish", today()), None);
        assert_eq!(parse_phrase("25", today()), None);
    }

    #[test]
    fn test_month_names_and_days() {
        assert_eq!(month_number("Sept"), Some(9));
        assert_eq!(month_number("dec."), Some(12));
        assert_eq!(month_number("ma"), None);
        assert!(is_valid_day(2024, 2, 29));
        assert!(!is_valid_day(2025, 2, 29));
    }
}
