//! Template builders for visualization specs.
//!
//! Templates are generated from the typed spec models so they cannot drift
//! from the schema. Placeholder field names mark what the generation agent
//! must fill in.

use std::str::FromStr;

use serde_json::{json, Value};

use crate::error::SaberError;
use crate::viz::spec::{
    BarMode, BarOrientation, BoxplotConfig, ChartOptions, ChartSpec, DataConfig, DataSource,
    FieldEncoding, FieldType, HistogramConfig, VizSpec, XyEncoding,
};

const CATEGORY_PLACEHOLDER: &str = "<category_column>";
const NUMBER_PLACEHOLDER: &str = "<number_column>";
const TIME_PLACEHOLDER: &str = "<time_column>";
const LABEL_PLACEHOLDER: &str = "<label_column>";
const VALUE_PLACEHOLDER: &str = "<value_column>";

/// Supported chart types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartType {
    Bar,
    Line,
    Scatter,
    Boxplot,
    Histogram,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Scatter => "scatter",
            Self::Boxplot => "boxplot",
            Self::Histogram => "histogram",
        }
    }

    /// All chart types, in display order.
    pub fn all() -> [ChartType; 5] {
        [
            Self::Bar,
            Self::Line,
            Self::Scatter,
            Self::Boxplot,
            Self::Histogram,
        ]
    }
}

impl FromStr for ChartType {
    type Err = SaberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bar" => Ok(Self::Bar),
            "line" => Ok(Self::Line),
            "scatter" => Ok(Self::Scatter),
            "boxplot" => Ok(Self::Boxplot),
            "histogram" => Ok(Self::Histogram),
            other => Err(SaberError::validation(format!("Unknown chart type: {other}"))),
        }
    }
}

fn build_chart(chart_type: ChartType) -> ChartSpec {
    match chart_type {
        ChartType::Bar => ChartSpec::Bar {
            encoding: XyEncoding {
                x: FieldEncoding::new(CATEGORY_PLACEHOLDER, FieldType::Category),
                y: FieldEncoding::new(NUMBER_PLACEHOLDER, FieldType::Number),
                series: None,
            },
            orientation: BarOrientation::Vertical,
            mode: BarMode::Grouped,
            options: ChartOptions::default(),
        },
        ChartType::Line => ChartSpec::Line {
            encoding: XyEncoding {
                x: FieldEncoding::new(TIME_PLACEHOLDER, FieldType::Time),
                y: FieldEncoding::new(NUMBER_PLACEHOLDER, FieldType::Number),
                series: None,
            },
            options: ChartOptions::default(),
        },
        ChartType::Scatter => ChartSpec::Scatter {
            encoding: XyEncoding {
                x: FieldEncoding::new(NUMBER_PLACEHOLDER, FieldType::Number),
                y: FieldEncoding::new(NUMBER_PLACEHOLDER, FieldType::Number),
                series: None,
            },
            options: ChartOptions::default(),
        },
        ChartType::Boxplot => ChartSpec::Boxplot {
            boxplot: BoxplotConfig {
                label_field: LABEL_PLACEHOLDER.to_string(),
                value_field: VALUE_PLACEHOLDER.to_string(),
            },
            options: ChartOptions::default(),
        },
        ChartType::Histogram => ChartSpec::Histogram {
            histogram: HistogramConfig {
                field: NUMBER_PLACEHOLDER.to_string(),
                bins: 20,
            },
            options: ChartOptions::default(),
        },
    }
}

/// Returns a complete spec template for a chart type with placeholder fields.
pub fn vizspec_template(chart_type: ChartType, file: &str) -> Value {
    let spec = VizSpec {
        version: "1".to_string(),
        title: None,
        description: None,
        data: DataConfig {
            source: DataSource {
                file: file.to_string(),
            },
        },
        chart: build_chart(chart_type),
        transform: Vec::new(),
    };
    serde_json::to_value(spec).unwrap_or(Value::Null)
}

/// Lists available chart types with descriptions and use cases.
pub fn list_chart_types() -> Value {
    json!([
        {
            "type": "bar",
            "description": "Compare values across categories",
            "use_when": "Comparing totals or counts per category; add encoding.series to compare groups"
        },
        {
            "type": "line",
            "description": "Show a trend over an ordered axis",
            "use_when": "Values over time or another continuous dimension"
        },
        {
            "type": "scatter",
            "description": "Show the relationship between two numeric fields",
            "use_when": "Looking for correlation or clusters"
        },
        {
            "type": "boxplot",
            "description": "Compare distributions across groups",
            "use_when": "Spread and outliers of one value per label"
        },
        {
            "type": "histogram",
            "description": "Show the distribution of one numeric field",
            "use_when": "Frequency of values in bins"
        }
    ])
}
