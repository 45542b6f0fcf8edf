use error_stack::Report;
use error_stack::ResultExt;

use super::ClusterReport;
use super::RenderError;
use super::ReportRenderer;

/// Pretty-printed JSON record of the whole report.
pub struct JsonRenderer;

impl ReportRenderer for JsonRenderer {
    fn render(&self, report: &ClusterReport) -> Result<String, Report<RenderError>> {
        let mut rendered = serde_json::to_string_pretty(report)
            .change_context(RenderError::Serialize { format: "json" })?;
        rendered.push('\n');
        Ok(rendered)
    }
}
