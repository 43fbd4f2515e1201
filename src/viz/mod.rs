//! Visualization sub-agent.
//!
//! Turns a free-text request plus a data summary into a validated chart
//! spec, with validation errors fed back to the generating model for
//! self-correction.

pub mod agent;
pub mod data;
pub mod spec;
pub mod templates;
pub mod transforms;

pub use agent::{parse_spec_json, SpecAgent, MAX_RETRIES};
pub use data::{extract_data_summary, infer_column_type, ColumnSummary, DataSummary};
pub use spec::{
    result_file_pattern, ChartSpec, FilterConfig, FilterOp, SortDir, SortItem, Transform, VizSpec,
};
pub use templates::{list_chart_types, vizspec_template, ChartType};
pub use transforms::{apply_filter, apply_sort, apply_transforms};
