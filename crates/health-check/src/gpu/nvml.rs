use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use nvml_wrapper::Nvml;

use super::GpuProbe;
use super::ProbeError;
use crate::model::GpuSample;

const MIB: u64 = 1024 * 1024;

/// Reads the GPUs of the machine the tool runs on; covers that node only.
pub struct NvmlProbe {
    nvml: Arc<Nvml>,
    local_node: String,
}

impl NvmlProbe {
    /// # Errors
    ///
    /// - [`ProbeError::Nvml`] if the NVML library cannot be loaded
    pub fn init(local_node: impl Into<String>) -> Result<Self, Report<ProbeError>> {
        let nvml = match Nvml::init() {
            Ok(nvml) => nvml,
            Err(e) => {
                tracing::warn!("Standard NVML init failed ({e}), trying with explicit library path");
                Nvml::builder()
                    .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                    .init()
                    .change_context(ProbeError::Nvml {
                        message: "failed to initialize NVML".to_string(),
                    })?
            }
        };
        Ok(Self {
            nvml: Arc::new(nvml),
            local_node: local_node.into(),
        })
    }

    fn read_samples(nvml: &Nvml) -> Result<Vec<GpuSample>, Report<ProbeError>> {
        let nvml_error = |what: &str| ProbeError::Nvml {
            message: format!("failed to read {what}"),
        };

        let count = nvml
            .device_count()
            .change_context_lazy(|| nvml_error("device count"))?;

        let mut samples = Vec::with_capacity(count as usize);
        for index in 0..count {
            let device = nvml
                .device_by_index(index)
                .change_context_lazy(|| nvml_error("device handle"))
                .attach_printable_lazy(|| format!("device {index}"))?;
            let utilization = device
                .utilization_rates()
                .change_context_lazy(|| nvml_error("utilization"))
                .attach_printable_lazy(|| format!("device {index}"))?;
            let memory = device
                .memory_info()
                .change_context_lazy(|| nvml_error("memory info"))
                .attach_printable_lazy(|| format!("device {index}"))?;

            samples.push(GpuSample {
                index,
                uuid: device.uuid().ok(),
                utilization_percent: utilization.gpu,
                memory_used_mib: memory.used / MIB,
                memory_total_mib: memory.total / MIB,
            });
        }
        Ok(samples)
    }
}

#[async_trait]
impl GpuProbe for NvmlProbe {
    fn covers(&self, node: &str) -> bool {
        node == self.local_node
    }

    #[tracing::instrument(skip(self))]
    async fn probe(&self, node: &str) -> Result<Vec<GpuSample>, Report<ProbeError>> {
        let nvml = self.nvml.clone();
        tokio::task::spawn_blocking(move || Self::read_samples(&nvml))
            .await
            .change_context(ProbeError::Nvml {
                message: "NVML query task failed".to_string(),
            })?
    }
}
