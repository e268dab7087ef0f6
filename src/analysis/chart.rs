//! Declarative chart specs
//!
//! Rendering is the caller's concern; tools only describe what to draw.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    GroupedBar,
    Table,
}

/// One named sequence of values aligned with `ChartSpec::labels`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_label: Option<String>,
    /// X-axis categories, pie slice names or table row keys.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub series: Vec<Series>,
    /// Horizontal reference line (e.g. the average).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<String>>,
}

impl ChartSpec {
    pub fn new(kind: ChartKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            x_label: None,
            y_label: None,
            labels: Vec::new(),
            series: Vec::new(),
            reference: None,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn axes(mut self, x: &str, y: &str) -> Self {
        self.x_label = Some(x.to_string());
        self.y_label = Some(y.to_string());
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn series(mut self, name: &str, values: Vec<f64>) -> Self {
        self.series.push(Series {
            name: name.to_string(),
            values,
        });
        self
    }

    pub fn reference(mut self, value: f64) -> Self {
        self.reference = Some(value);
        self
    }

    pub fn table(mut self, columns: &[&str], rows: Vec<Vec<String>>) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self.rows = rows;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_without_empty_table_fields() {
        let spec = ChartSpec::new(ChartKind::Pie, "Distribution")
            .labels(vec!["Food".into(), "Transport".into()])
            .series("amount", vec![120.0, 80.0]);

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "pie");
        assert!(json.get("rows").is_none());
        assert!(json.get("reference").is_none());

        let back: ChartSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
