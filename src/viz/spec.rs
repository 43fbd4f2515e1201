//! Visualization spec model.
//!
//! The spec is a tagged chart description plus field encodings, optional
//! transforms, and a pointer at the tool result holding the data. Validation
//! errors are worded for the generation agent's feedback loop.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pattern a data-source file handle must match.
pub fn result_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^result_[A-Za-z0-9._-]+\.json$").expect("valid result file regex")
    })
}

/// How a field is interpreted by the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Category,
    #[default]
    Number,
    Time,
}

/// A field reference with its interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldEncoding {
    pub field: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
}

impl FieldEncoding {
    pub fn new(field: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            field: field.into(),
            field_type,
        }
    }
}

/// Shared rendering options.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChartOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

/// x/y(/series) encoding shared by bar, line, and scatter charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct XyEncoding {
    pub x: FieldEncoding,
    pub y: FieldEncoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<FieldEncoding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarOrientation {
    #[default]
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarMode {
    #[default]
    Grouped,
    Stacked,
}

/// Boxplot field configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoxplotConfig {
    pub label_field: String,
    pub value_field: String,
}

/// Histogram field configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistogramConfig {
    pub field: String,
    #[serde(default = "default_bins")]
    pub bins: u32,
}

fn default_bins() -> u32 {
    20
}

/// The tagged chart description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChartSpec {
    Bar {
        encoding: XyEncoding,
        #[serde(default)]
        orientation: BarOrientation,
        #[serde(default)]
        mode: BarMode,
        #[serde(default)]
        options: ChartOptions,
    },
    Line {
        encoding: XyEncoding,
        #[serde(default)]
        options: ChartOptions,
    },
    Scatter {
        encoding: XyEncoding,
        #[serde(default)]
        options: ChartOptions,
    },
    Boxplot {
        boxplot: BoxplotConfig,
        #[serde(default)]
        options: ChartOptions,
    },
    Histogram {
        histogram: HistogramConfig,
        #[serde(default)]
        options: ChartOptions,
    },
}

impl ChartSpec {
    /// The chart type's discriminator string.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bar { .. } => "bar",
            Self::Line { .. } => "line",
            Self::Scatter { .. } => "scatter",
            Self::Boxplot { .. } => "boxplot",
            Self::Histogram { .. } => "histogram",
        }
    }

    fn options(&self) -> &ChartOptions {
        match self {
            Self::Bar { options, .. }
            | Self::Line { options, .. }
            | Self::Scatter { options, .. }
            | Self::Boxplot { options, .. }
            | Self::Histogram { options, .. } => options,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortItem {
    pub field: String,
    #[serde(default)]
    pub dir: SortDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// Filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

/// One filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// A data transform applied before rendering, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Transform {
    Sort { sort: Vec<SortItem> },
    Limit { limit: u64 },
    Filter { filter: FilterConfig },
}

/// Pointer at the stored tool result the chart reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSource {
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub source: DataSource,
}

/// A complete, validated visualization spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VizSpec {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data: DataConfig,
    pub chart: ChartSpec,
    #[serde(default)]
    pub transform: Vec<Transform>,
}

fn default_version() -> String {
    "1".to_string()
}

impl VizSpec {
    /// Validates a JSON value against the spec schema, including the range
    /// and pattern constraints serde alone cannot express. Error messages are
    /// fed back to the generation agent, so they name the offending field.
    pub fn validate(value: &Value) -> std::result::Result<VizSpec, String> {
        let spec: VizSpec =
            serde_json::from_value(value.clone()).map_err(|e| format!("Invalid spec: {e}"))?;

        if spec.version != "1" {
            return Err(format!(
                "Unsupported spec version '{}'; expected \"1\"",
                spec.version
            ));
        }

        if !result_file_pattern().is_match(&spec.data.source.file) {
            return Err(format!(
                "data.source.file '{}' must match result_<tool_call_id>.json",
                spec.data.source.file
            ));
        }

        let options = spec.chart.options();
        if let Some(width) = options.width {
            if !(20..=200).contains(&width) {
                return Err(format!("options.width {width} must be between 20 and 200"));
            }
        }
        if let Some(height) = options.height {
            if !(10..=100).contains(&height) {
                return Err(format!("options.height {height} must be between 10 and 100"));
            }
        }

        if let ChartSpec::Histogram { histogram, .. } = &spec.chart {
            if !(2..=100).contains(&histogram.bins) {
                return Err(format!(
                    "histogram.bins {} must be between 2 and 100",
                    histogram.bins
                ));
            }
        }

        for transform in &spec.transform {
            match transform {
                Transform::Limit { limit } if *limit == 0 => {
                    return Err("limit must be at least 1".to_string());
                }
                Transform::Sort { sort } if sort.is_empty() => {
                    return Err("sort must name at least one field".to_string());
                }
                _ => {}
            }
        }

        Ok(spec)
    }
}
