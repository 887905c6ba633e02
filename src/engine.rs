// src/engine.rs
// 一次完整扫描: 校验 -> 分段 -> 连接设备 -> 扫描 -> 合并 -> 写文件
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::ScanConfig;
use crate::drivers::{
    render_scan_png, tile, tile_count, CancelToken, ManualDevice, PlotStyle, ScanError, ScanPipeline,
    ScanResult, SpectrumDevice, SubRange,
};
use crate::recorder::write_csv;
use crate::rfexplorer::{detect_port, RfExplorer};

/// What a finished run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanSummary {
    pub tiles: usize,
    pub sweeps: usize,
    pub bins: usize,
    pub output: PathBuf,
}

#[derive(Serialize)]
struct ReportBin {
    frequency_mhz: f64,
    amplitude_dbm: f64,
    samples: usize,
}

#[derive(Serialize)]
struct ScanReport<'a> {
    config: &'a ScanConfig,
    tiles: &'a [SubRange],
    sweeps: usize,
    bins: Vec<ReportBin>,
}

/// Runs one scan end to end.
///
/// The CSV is written even when scanning fails part way, holding every bin
/// collected before the failure. The first error encountered is returned.
pub fn run(config: &ScanConfig, cancel: CancelToken) -> Result<ScanSummary, ScanError> {
    let tiles = tile(&config.ranges, config.rbw_mhz)?;
    info!(
        "{} sub-range(s) over {} range(s), RBW {} MHz, {:.1} s per sub-range",
        tiles.len(),
        config.ranges.len(),
        config.rbw_mhz,
        config.dwell.as_secs_f64()
    );
    for range in &config.ranges {
        debug!("{range}: {} sub-range(s)", tile_count(range, config.rbw_mhz)?);
    }
    if tiles.is_empty() {
        warn!("No sub-range fits inside the requested ranges, nothing to scan");
        return finish(config, &tiles, 0, ScanResult::default(), Ok(()));
    }
    if config.simulate {
        info!("Using simulated analyzer");
        return scan_with(ManualDevice::simulated(), config, &tiles, cancel);
    }
    let port = match &config.port {
        Some(port) => port.clone(),
        None => detect_port()?,
    };
    let device = RfExplorer::connect(&port, config.baud_rate)?;
    scan_with(device, config, &tiles, cancel)
}

/// Scans `tiles` on an already connected device, then releases it.
pub fn scan_with<D: SpectrumDevice>(
    device: D,
    config: &ScanConfig,
    tiles: &[SubRange],
    cancel: CancelToken,
) -> Result<ScanSummary, ScanError> {
    let mut pipeline = ScanPipeline::new(device, config.pipeline_settings(), cancel);
    let scanned = pipeline.initialize().and_then(|()| {
        if let Some(model) = pipeline.device().model() {
            info!("Analyzer model {}", model.name());
        }
        pipeline.run(tiles)
    });
    if let Err(err) = &scanned {
        error!("Scan stopped: {err}");
    }
    let sweeps = pipeline.sweeps_folded();
    let (mut device, bins) = pipeline.into_parts();
    let released = device.disconnect();
    if let Err(err) = &released {
        warn!("Failed to release device: {err}");
    }
    let result = bins.reduce(config.method);
    finish(config, tiles, sweeps, result, scanned.and(released))
}

fn finish(
    config: &ScanConfig,
    tiles: &[SubRange],
    sweeps: usize,
    result: ScanResult,
    scanned: Result<(), ScanError>,
) -> Result<ScanSummary, ScanError> {
    let written = write_outputs(config, tiles, sweeps, &result);
    // only the scan error is returned, so report the write failure here
    if let (Err(_), Err(err)) = (&scanned, &written) {
        error!("Failed to write results: {err}");
    }
    scanned.and(written)?;
    Ok(ScanSummary {
        tiles: tiles.len(),
        sweeps,
        bins: result.len(),
        output: config.output.clone(),
    })
}

fn write_outputs(
    config: &ScanConfig,
    tiles: &[SubRange],
    sweeps: usize,
    result: &ScanResult,
) -> Result<(), ScanError> {
    write_csv(&config.output, result)?;
    if let Some(path) = &config.plot {
        if result.is_empty() {
            warn!("Nothing to plot, {} not written", path.display());
        } else {
            let png = render_scan_png(result, PlotStyle::default())?;
            std::fs::write(path, png)?;
            info!("Plot written to {}", path.display());
        }
    }
    if let Some(path) = &config.report {
        write_report(path, config, tiles, sweeps, result)?;
    }
    Ok(())
}

fn write_report(
    path: &Path,
    config: &ScanConfig,
    tiles: &[SubRange],
    sweeps: usize,
    result: &ScanResult,
) -> Result<(), ScanError> {
    let report = ScanReport {
        config,
        tiles,
        sweeps,
        bins: result
            .iter_with_counts()
            .map(|(frequency_mhz, amplitude_dbm, samples)| ReportBin {
                frequency_mhz,
                amplitude_dbm,
                samples,
            })
            .collect(),
    };
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut w, &report)?;
    w.flush()?;
    info!("Report written to {}", path.display());
    Ok(())
}
