//! Concrete pipeline stages

pub mod analysis;
pub mod monitor;
pub mod narrative;
pub mod optimization;
pub mod reporting;

pub use analysis::{AnalysisStage, PlatformStats, TrendAnalysis};
pub use monitor::MonitorStage;
pub use narrative::{Narrative, NarrativeWriter};
pub use optimization::OptimizationStage;
pub use reporting::ReportingStage;
