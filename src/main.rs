// src/main.rs
mod config;
mod drivers;
mod engine;
mod recorder;
mod rfexplorer;
mod types;
use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use config::{Cli, ScanConfig};
use drivers::{CancelToken, ScanError};
// 日志: 默认 info，-v 提升一级，RUST_LOG 优先
fn init_logging(level: log::LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .format_timestamp_millis()
        .init();
}
// Ctrl-C 只置取消标志，扫描在下一个检查点停下并写出已有数据
fn install_interrupt_handler(cancel: CancelToken) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            return;
        }
        warn!("Interrupted, finishing current step");
        cancel.cancel();
    })
    .context("failed to install Ctrl-C handler")
}
fn run(cli: &Cli) -> Result<(), ScanError> {
    let config = ScanConfig::from_cli(cli)?;
    let cancel = CancelToken::new();
    if let Err(err) = install_interrupt_handler(cancel.clone()) {
        warn!("{err:#}");
    }
    let summary = engine::run(&config, cancel)?;
    info!(
        "Scan finished: {} sub-range(s), {} sweep(s), {} bin(s) in {}",
        summary.tiles,
        summary.sweeps,
        summary.bins,
        summary.output.display()
    );
    Ok(())
}
// 入口函数
fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose.log_level_filter());
    if let Err(err) = run(&cli) {
        error!("{err}");
        eprintln!("Error: {err}");
        std::process::exit(err.exit_code());
    }
}
