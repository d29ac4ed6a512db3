pub mod family;
pub mod ledger;
pub mod lock;
pub mod processor;
pub mod scanner;
pub mod subscription;
pub mod watermark;

pub use processor::{PipelineSettings, RenderSettings, ScanPipeline, TickReport};
pub use scanner::{MilestoneScanner, ScanWindow};
