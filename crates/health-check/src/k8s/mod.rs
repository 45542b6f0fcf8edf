pub mod client;
pub mod nodes;
pub mod source;
pub mod types;
pub mod workloads;

pub use client::*;
pub use nodes::NodeInfo;
pub use source::*;
pub use types::*;
pub use workloads::TemplateKeys;
pub use workloads::WorkloadInfo;
