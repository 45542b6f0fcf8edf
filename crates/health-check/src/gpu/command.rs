use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use tokio::process::Command;

use super::parse_nvidia_smi_csv;
use super::GpuProbe;
use super::ProbeError;
use crate::model::GpuSample;

/// Placeholder substituted with the node name in each argument.
pub const NODE_PLACEHOLDER: &str = "{node}";

/// Runs an external command per node and parses its `nvidia-smi` CSV output.
///
/// The command template is split on whitespace; quoting is not supported.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    /// # Errors
    ///
    /// - [`ProbeError::CommandFailed`] if the template is empty
    pub fn from_template(template: &str) -> Result<Self, Report<ProbeError>> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            Report::new(ProbeError::CommandFailed {
                message: "empty GPU query command".to_string(),
            })
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn command_for(&self, node: &str) -> (String, Vec<String>) {
        (
            self.program.replace(NODE_PLACEHOLDER, node),
            self.args
                .iter()
                .map(|arg| arg.replace(NODE_PLACEHOLDER, node))
                .collect(),
        )
    }
}

#[async_trait]
impl GpuProbe for CommandProbe {
    #[tracing::instrument(skip(self))]
    async fn probe(&self, node: &str) -> Result<Vec<GpuSample>, Report<ProbeError>> {
        let (program, args) = self.command_for(node);
        tracing::debug!(%program, ?args, "running GPU query command");

        // the child must not outlive a timed-out or cancelled probe
        let output = Command::new(&program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .change_context_lazy(|| ProbeError::CommandFailed {
                message: format!("failed to spawn {program}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Report::new(ProbeError::CommandFailed {
                message: format!("{program} exited with {}: {}", output.status, stderr.trim()),
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_nvidia_smi_csv(&stdout).attach_printable_lazy(|| format!("node {node}"))
    }
}
