// src/drivers/mod.rs
// 扫描核心: 分段、聚合、设备接口、流程驱动
pub mod aggregator;
pub mod error;
pub mod pipeline;
pub mod plot;
pub mod source;
pub mod tiler;
// 公开导出这些模块里的结构体，方便外部调用
pub use aggregator::ScanResult;
pub use error::ScanError;
pub use pipeline::{CancelToken, PipelineSettings, ScanPipeline};
pub use plot::{render_scan_png, PlotStyle};
pub use source::{DeviceModel, ManualDevice, SpectrumDevice};
pub use tiler::{tile, tile_count, SubRange};
