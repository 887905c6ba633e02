// src/config.rs
// 命令行参数 -> 一次扫描的完整配置

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use serde::Serialize;

use crate::drivers::tiler::validate_rbw;
use crate::drivers::{PipelineSettings, ScanError};
use crate::recorder::check_writable;
use crate::types::{
    ranges_from_pairs, FrequencyRange, ReductionMethod, DEFAULT_BAUD_RATE, DEFAULT_DWELL,
    DEFAULT_RBW_MHZ,
};

const HARDWARE_SETTLE: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "rfe-scan", version, about = "Sweep frequency ranges with an RF Explorer and save the spectrum as CSV")]
pub struct Cli {
    /// Start and stop frequencies in MHz, given in pairs
    #[arg(value_name = "FREQ", required = true, num_args = 1..)]
    pub freqs: Vec<f64>,
    /// Resolution bandwidth in MHz. Larger is faster but less accurate
    #[arg(long, default_value_t = DEFAULT_RBW_MHZ)]
    pub rbw: f64,
    /// Seconds to collect sweeps in each sub-range
    #[arg(short = 't', long = "time", default_value_t = DEFAULT_DWELL.as_secs_f64(), allow_negative_numbers = true)]
    pub time: f64,
    /// Output CSV file [default: Scan_<YYYY-MM-DDTHH-MM>.csv]
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// How repeated samples of one frequency are combined: MAX or AVG
    #[arg(short, long, default_value = "MAX")]
    pub calculator: String,
    /// Serial port of the analyzer; detected automatically when omitted
    #[arg(short, long)]
    pub port: Option<String>,
    /// Serial baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Seconds to wait for the device to confirm a new sweep range
    #[arg(long, default_value_t = 10.0)]
    pub confirm_timeout: f64,
    /// Seconds to wait for the device to identify itself after reset
    #[arg(long, default_value_t = 10.0)]
    pub handshake_timeout: f64,
    /// Also render the scan as a PNG chart
    #[arg(long, value_name = "FILE")]
    pub plot: Option<PathBuf>,
    /// Also write a JSON report with per-bin sample counts
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
    /// Use a built-in simulated analyzer instead of hardware
    #[arg(long)]
    pub simulate: bool,
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

/// Everything one run needs. No global state is consulted after this is built.
#[derive(Clone, Debug, Serialize)]
pub struct ScanConfig {
    pub ranges: Vec<FrequencyRange>,
    pub rbw_mhz: f64,
    pub dwell: Duration,
    pub output: PathBuf,
    pub method: ReductionMethod,
    pub port: Option<String>,
    pub baud_rate: u32,
    pub confirm_timeout: Duration,
    pub handshake_timeout: Duration,
    pub settle: Duration,
    pub plot: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub simulate: bool,
}

fn seconds(name: &str, value: f64, allow_zero: bool) -> Result<Duration, ScanError> {
    if !value.is_finite() || value < 0.0 || (!allow_zero && value == 0.0) {
        return Err(ScanError::usage(format!("{name} must be a positive number of seconds, got {value}")));
    }
    Ok(Duration::from_secs_f64(value))
}

/// `Scan_2024-05-01T13-37.csv`; `:` is avoided so the name is valid everywhere.
pub fn default_output_name(now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("Scan_{}.csv", now.format("%Y-%m-%dT%H-%M")))
}

impl ScanConfig {
    /// Validates the command line. Runs before any device is opened.
    pub fn from_cli(cli: &Cli) -> Result<Self, ScanError> {
        let ranges = ranges_from_pairs(&cli.freqs)?;
        let method: ReductionMethod = cli.calculator.parse()?;
        validate_rbw(cli.rbw)?;
        let output = cli
            .output
            .clone()
            .unwrap_or_else(|| default_output_name(Local::now()));
        for path in std::iter::once(&output)
            .chain(cli.plot.as_ref())
            .chain(cli.report.as_ref())
        {
            check_writable(path)?;
        }
        Ok(Self {
            ranges,
            rbw_mhz: cli.rbw,
            dwell: seconds("dwell time", cli.time, true)?,
            output,
            method,
            port: cli.port.clone(),
            baud_rate: cli.baud,
            confirm_timeout: seconds("confirm timeout", cli.confirm_timeout, false)?,
            handshake_timeout: seconds("handshake timeout", cli.handshake_timeout, false)?,
            settle: if cli.simulate { Duration::ZERO } else { HARDWARE_SETTLE },
            plot: cli.plot.clone(),
            report: cli.report.clone(),
            simulate: cli.simulate,
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            rbw_mhz: self.rbw_mhz,
            dwell: self.dwell,
            settle: self.settle,
            confirm_timeout: self.confirm_timeout,
            handshake_timeout: self.handshake_timeout,
        }
    }
}
