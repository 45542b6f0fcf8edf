use error_stack::Report;
use error_stack::ResultExt;

use super::ClusterReport;
use super::RenderError;
use super::ReportRenderer;

pub struct YamlRenderer;

impl ReportRenderer for YamlRenderer {
    fn render(&self, report: &ClusterReport) -> Result<String, Report<RenderError>> {
        serde_yaml::to_string(report).change_context(RenderError::Serialize { format: "yaml" })
    }
}
