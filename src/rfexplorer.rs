use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use log::{debug, info, trace, warn};
use serialport::SerialPortType;

use crate::drivers::{DeviceModel, ScanError, SpectrumDevice};
use crate::types::{FrequencyRange, Sweep};

const READ_TIMEOUT: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 4096;
// A text line longer than this means we lost framing.
const MAX_PENDING_TEXT: usize = 8192;
const SILICON_LABS_VID: u16 = 0x10C4;

/// Byte stream the analyzer is reached through; a serial port in practice.
trait Link: Read + Write + Send {}
impl<T: Read + Write + Send + ?Sized> Link for T {}
const MODE_SPECTRUM_ANALYZER: u16 = 0;
const MODEL_NONE: u16 = 255;
const DEFAULT_AMP_TOP_DBM: i32 = -10;
const DEFAULT_AMP_BOTTOM_DBM: i32 = -120;

/// Last `#C2-F:` configuration reported by the analyzer.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    pub start_mhz: f64,
    pub step_mhz: f64,
    pub amp_top_dbm: i32,
    pub amp_bottom_dbm: i32,
    pub sweep_points: usize,
    pub mode: u16,
    pub min_freq_mhz: Option<f64>,
    pub max_freq_mhz: Option<f64>,
    pub max_span_mhz: Option<f64>,
    pub rbw_khz: Option<f64>,
}

impl DeviceConfig {
    pub fn stop_mhz(&self) -> f64 {
        self.start_mhz + self.step_mhz * self.sweep_points.saturating_sub(1) as f64
    }
}

#[derive(Debug, PartialEq)]
enum Message {
    Config(DeviceConfig),
    Model { main: u16, expansion: u16, firmware: String },
    Sweep(Vec<f64>),
    Other(String),
}

/// Frames an outgoing command: `#`, total length, ASCII payload.
fn encode_command(cmd: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(cmd.len() + 2);
    out.push(b'#');
    out.push((cmd.len() + 2) as u8);
    out.extend_from_slice(cmd.as_bytes());
    out
}

fn sweep_range_command(range: &FrequencyRange, top: i32, bottom: i32) -> String {
    let start_khz = (range.start * 1000.0).round() as i64;
    let stop_khz = (range.stop * 1000.0).round() as i64;
    format!("C2-F:{start_khz:07},{stop_khz:07},{top:03},{bottom:03}")
}

fn field<T: std::str::FromStr>(fields: &[&str], idx: usize) -> Option<T> {
    fields.get(idx).and_then(|f| f.trim().parse().ok())
}

fn parse_config(body: &str) -> Result<DeviceConfig, ScanError> {
    let fields: Vec<&str> = body.split(',').collect();
    let bad = || ScanError::device(format!("malformed configuration message '{body}'"));
    let start_khz: f64 = field(&fields, 0).ok_or_else(bad)?;
    let step_hz: f64 = field(&fields, 1).ok_or_else(bad)?;
    Ok(DeviceConfig {
        start_mhz: start_khz / 1000.0,
        step_mhz: step_hz / 1_000_000.0,
        amp_top_dbm: field(&fields, 2).ok_or_else(bad)?,
        amp_bottom_dbm: field(&fields, 3).ok_or_else(bad)?,
        sweep_points: field(&fields, 4).ok_or_else(bad)?,
        mode: field(&fields, 6).ok_or_else(bad)?,
        min_freq_mhz: field::<f64>(&fields, 7).map(|khz| khz / 1000.0),
        max_freq_mhz: field::<f64>(&fields, 8).map(|khz| khz / 1000.0),
        max_span_mhz: field::<f64>(&fields, 9).map(|khz| khz / 1000.0),
        rbw_khz: field(&fields, 10),
    })
}

fn parse_text(line: &str) -> Result<Message, ScanError> {
    if let Some(body) = line.strip_prefix("#C2-F:") {
        return Ok(Message::Config(parse_config(body)?));
    }
    if let Some(body) = line.strip_prefix("#C2-M:") {
        let fields: Vec<&str> = body.split(',').collect();
        let main = field(&fields, 0)
            .ok_or_else(|| ScanError::device(format!("malformed model message '{line}'")))?;
        return Ok(Message::Model {
            main,
            expansion: field(&fields, 1).unwrap_or(MODEL_NONE),
            firmware: fields.get(2).map(|f| f.trim().to_string()).unwrap_or_default(),
        });
    }
    Ok(Message::Other(line.to_string()))
}

/// Pops one complete message off the front of `buf`, or `None` when more
/// bytes are needed.
fn decode_next(buf: &mut Vec<u8>) -> Result<Option<Message>, ScanError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] == b'$' && buf.len() >= 2 && matches!(buf[1], b'S' | b's' | b'z') {
        let (header, count) = match buf[1] {
            b'S' if buf.len() >= 3 => (3, buf[2] as usize),
            b's' if buf.len() >= 3 => (3, (buf[2] as usize + 1) * 16),
            b'z' if buf.len() >= 4 => (4, u16::from_be_bytes([buf[2], buf[3]]) as usize),
            _ => return Ok(None),
        };
        let end = header + count;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        let amplitudes = buf[header..end]
            .iter()
            .map(|&b| -(b as f64) / 2.0)
            .collect();
        let consumed = if &buf[end..end + 2] == b"\r\n" { end + 2 } else { end };
        buf.drain(..consumed);
        return Ok(Some(Message::Sweep(amplitudes)));
    }
    if buf[0] == b'$' && buf.len() < 2 {
        return Ok(None);
    }
    match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            parse_text(text.trim_end_matches(['\r', '\n'])).map(Some)
        }
        None => {
            if buf.len() > MAX_PENDING_TEXT {
                warn!("dropping {} bytes of unframed device output", buf.len());
                buf.clear();
            }
            Ok(None)
        }
    }
}

/// Picks the first USB serial port, preferring the CP210x bridge RF Explorer ships with.
pub fn detect_port() -> Result<String, ScanError> {
    let ports = serialport::available_ports()?;
    let usb: Vec<_> = ports
        .iter()
        .filter_map(|p| match &p.port_type {
            SerialPortType::UsbPort(info) => Some((p.port_name.clone(), info.vid)),
            _ => None,
        })
        .collect();
    usb.iter()
        .find(|(_, vid)| *vid == SILICON_LABS_VID)
        .or_else(|| usb.first())
        .map(|(name, _)| name.clone())
        .ok_or_else(|| ScanError::device("no USB serial port found, pass --port explicitly"))
}

/// RF Explorer handheld analyzer on a serial port.
///
/// The port is released on `disconnect` or when the value is dropped.
pub struct RfExplorer {
    port_name: String,
    port: Option<Box<dyn Link>>,
    rx: Vec<u8>,
    config: Option<DeviceConfig>,
    model: Option<DeviceModel>,
    sweeps: Vec<Sweep>,
}

impl RfExplorer {
    pub fn connect(port_name: &str, baud_rate: u32) -> Result<Self, ScanError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        info!("Connected to {port_name} at {baud_rate} baud");
        let mut device = Self::detached(port_name);
        device.port = Some(Box::new(port));
        Ok(device)
    }

    fn detached(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            port: None,
            rx: Vec::with_capacity(READ_CHUNK),
            config: None,
            model: None,
            sweeps: Vec::new(),
        }
    }

    #[cfg(test)]
    fn config(&self) -> Option<&DeviceConfig> {
        self.config.as_ref()
    }

    fn port(&mut self) -> Result<&mut Box<dyn Link>, ScanError> {
        self.port
            .as_mut()
            .ok_or_else(|| ScanError::device("device is disconnected"))
    }

    fn send_command(&mut self, cmd: &str) -> Result<(), ScanError> {
        trace!("-> {cmd}");
        let frame = encode_command(cmd);
        let port = self.port()?;
        port.write_all(&frame)?;
        port.flush()?;
        Ok(())
    }

    /// Appends raw bytes and handles every complete message.
    fn ingest(&mut self, bytes: &[u8]) -> Result<bool, ScanError> {
        self.rx.extend_from_slice(bytes);
        let mut handled = false;
        while let Some(msg) = decode_next(&mut self.rx)? {
            handled = true;
            self.handle(msg)?;
        }
        Ok(handled)
    }

    fn handle(&mut self, msg: Message) -> Result<(), ScanError> {
        match msg {
            Message::Config(config) => {
                debug!(
                    "config: {:.3}-{:.3} MHz, {} points, mode {}, rbw {:?} kHz, max span {:?} MHz",
                    config.start_mhz,
                    config.stop_mhz(),
                    config.sweep_points,
                    config.mode,
                    config.rbw_khz,
                    config.max_span_mhz
                );
                // sweeps buffered so far were taken with the previous settings
                self.sweeps.clear();
                self.config = Some(config);
            }
            Message::Model {
                main,
                expansion,
                firmware,
            } => {
                let model = DeviceModel::from_code(main).ok_or(ScanError::UnknownModel(main))?;
                info!(
                    "Device model {} (expansion {}), firmware {}",
                    model.name(),
                    DeviceModel::from_code(expansion).map_or("none", |m| m.name()),
                    firmware
                );
                self.model = Some(model);
            }
            Message::Sweep(amplitudes) => match &self.config {
                Some(config) => self.sweeps.push(Sweep {
                    start_mhz: config.start_mhz,
                    step_mhz: config.step_mhz,
                    amplitudes,
                }),
                None => debug!("sweep received before configuration, ignored"),
            },
            Message::Other(line) => {
                if !line.is_empty() {
                    trace!("<- {line}");
                }
            }
        }
        Ok(())
    }
}

impl SpectrumDevice for RfExplorer {
    fn reset(&mut self) -> Result<(), ScanError> {
        self.send_command("r")?;
        self.model = None;
        self.config = None;
        self.sweeps.clear();
        self.rx.clear();
        Ok(())
    }

    fn request_config(&mut self) -> Result<(), ScanError> {
        self.send_command("C0")
    }

    fn model(&self) -> Option<DeviceModel> {
        self.model
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    fn is_analyzer_mode(&self) -> bool {
        self.config
            .as_ref()
            .is_some_and(|c| c.mode == MODE_SPECTRUM_ANALYZER)
    }

    fn set_sweep_range(&mut self, range: FrequencyRange) -> Result<(), ScanError> {
        if let Some(c) = &self.config {
            let below = c.min_freq_mhz.is_some_and(|min| range.start < min);
            let above = c.max_freq_mhz.is_some_and(|max| range.stop > max);
            if below || above {
                warn!("{range} is outside the analyzer's frequency limits");
            }
        }
        let (top, bottom) = self
            .config
            .as_ref()
            .map_or((DEFAULT_AMP_TOP_DBM, DEFAULT_AMP_BOTTOM_DBM), |c| {
                (c.amp_top_dbm, c.amp_bottom_dbm)
            });
        self.send_command(&sweep_range_command(&range, top, bottom))
    }

    fn active_range(&self) -> Option<FrequencyRange> {
        self.config.as_ref().map(|c| FrequencyRange {
            start: c.start_mhz,
            stop: c.stop_mhz(),
        })
    }

    fn poll_incoming(&mut self) -> Result<bool, ScanError> {
        let mut chunk = [0u8; READ_CHUNK];
        let read = match self.port()?.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };
        self.ingest(&chunk[..read])
    }

    fn sweeps(&self) -> &[Sweep] {
        &self.sweeps
    }

    fn clear_sweeps(&mut self) {
        self.sweeps.clear();
    }

    fn disconnect(&mut self) -> Result<(), ScanError> {
        if let Some(mut port) = self.port.take() {
            port.flush()?;
            info!("Disconnected from {}", self.port_name);
        }
        Ok(())
    }
}

impl Drop for RfExplorer {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{CancelToken, PipelineSettings, ScanPipeline};
    use crate::types::ReductionMethod;

    const CONFIG_LINE: &[u8] =
        b"#C2-F:0500000,0025225,-010,-120,0112,0,000,0240000,0960000,0100000,00025,0000,000\r\n";

    #[test]
    fn commands_are_length_prefixed() {
        assert_eq!(encode_command("C0"), vec![b'#', 4, b'C', b'0']);
        assert_eq!(encode_command("r"), vec![b'#', 3, b'r']);
    }

    #[test]
    fn sweep_range_command_uses_khz_fields() {
        let range = FrequencyRange::new(502.825, 505.625).unwrap();
        assert_eq!(
            sweep_range_command(&range, -10, -120),
            "C2-F:0502825,0505625,-10,-120"
        );
        let range = FrequencyRange::new(88.0, 90.8).unwrap();
        assert_eq!(sweep_range_command(&range, 0, -110), "C2-F:0088000,0090800,000,-110");
    }

    #[test]
    fn config_message_sets_active_range_and_mode() {
        let mut dev = RfExplorer::detached("test");
        assert!(dev.ingest(CONFIG_LINE).unwrap());
        let config = dev.config().unwrap();
        assert_eq!(config.sweep_points, 112);
        assert_eq!(config.amp_top_dbm, -10);
        assert_eq!(config.max_span_mhz, Some(100.0));
        assert!(dev.is_analyzer_mode());
        let active = dev.active_range().unwrap();
        assert!((active.start - 500.0).abs() < 1e-9);
        assert!((active.stop - (500.0 + 0.025225 * 111.0)).abs() < 1e-9);
    }

    #[test]
    fn non_analyzer_mode_is_reported() {
        let mut dev = RfExplorer::detached("test");
        dev.ingest(b"#C2-F:0500000,0025225,-010,-120,0112,0,001,0240000,0960000,0100000\r\n")
            .unwrap();
        assert!(!dev.is_analyzer_mode());
    }

    #[test]
    fn sweeps_split_across_reads_are_reassembled() {
        let mut dev = RfExplorer::detached("test");
        dev.ingest(CONFIG_LINE).unwrap();
        let mut frame = vec![b'$', b'S', 3, 80, 81, 40];
        frame.extend_from_slice(b"\r\n");
        assert!(!dev.ingest(&frame[..4]).unwrap());
        assert!(dev.ingest(&frame[4..]).unwrap());
        assert_eq!(dev.sweeps().len(), 1);
        let sweep = &dev.sweeps()[0];
        assert_eq!(sweep.amplitudes, vec![-40.0, -40.5, -20.0]);
        assert!((sweep.frequency_at(1) - 500.025225).abs() < 1e-9);
        dev.clear_sweeps();
        assert!(dev.sweeps().is_empty());
    }

    #[test]
    fn large_sweep_frames_are_decoded() {
        let mut buf = vec![b'$', b'z', 0x01, 0x00];
        buf.extend(std::iter::repeat(200u8).take(256));
        buf.extend_from_slice(b"\r\n$s");
        buf.push(0);
        buf.extend(std::iter::repeat(10u8).take(16));
        buf.extend_from_slice(b"\r\n");
        match decode_next(&mut buf).unwrap() {
            Some(Message::Sweep(a)) => {
                assert_eq!(a.len(), 256);
                assert_eq!(a[0], -100.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        match decode_next(&mut buf).unwrap() {
            Some(Message::Sweep(a)) => assert_eq!(a, vec![-5.0; 16]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn sweeps_before_config_are_dropped() {
        let mut dev = RfExplorer::detached("test");
        assert!(dev.ingest(b"$S\x02\x10\x10\r\n").unwrap());
        assert!(dev.sweeps().is_empty());
    }

    #[test]
    fn model_message_is_parsed_and_unknown_models_fail() {
        let mut dev = RfExplorer::detached("test");
        dev.ingest(b"(C) Ari Mahler 2011-2019\r\n#C2-M:006,255,01.33\r\n")
            .unwrap();
        assert_eq!(dev.model(), Some(DeviceModel::Rfe6G));

        let mut dev = RfExplorer::detached("test");
        let err = dev.ingest(b"#C2-M:042,255,01.33\r\n").unwrap_err();
        assert!(matches!(err, ScanError::UnknownModel(42)));
    }

    /// Hands out one scripted chunk per read, then times out like an idle port.
    struct ScriptedLink {
        chunks: std::collections::VecDeque<Vec<u8>>,
    }

    impl Read for ScriptedLink {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Err(std::io::Error::new(ErrorKind::TimedOut, "idle")),
            }
        }
    }

    impl Write for ScriptedLink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted(chunks: Vec<Vec<u8>>) -> RfExplorer {
        let mut dev = RfExplorer::detached("scripted");
        dev.port = Some(Box::new(ScriptedLink {
            chunks: chunks.into(),
        }));
        dev
    }

    fn sweep_frame(levels: &[u8]) -> Vec<u8> {
        let mut frame = vec![b'$', b'S', levels.len() as u8];
        frame.extend_from_slice(levels);
        frame.extend_from_slice(b"\r\n");
        frame
    }

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            rbw_mhz: 0.025,
            dwell: Duration::ZERO,
            settle: Duration::ZERO,
            confirm_timeout: Duration::from_millis(50),
            handshake_timeout: Duration::from_millis(50),
        }
    }

    const TILE: FrequencyRange = FrequencyRange { start: 500.0, stop: 502.8 };

    #[test]
    fn handshake_waits_for_config_after_model() {
        let dev = scripted(vec![
            b"#C2-M:006,255,01.33\r\n".to_vec(),
            CONFIG_LINE.to_vec(),
            sweep_frame(&[80, 81, 40, 90]),
        ]);
        let mut pipeline = ScanPipeline::new(dev, fast_settings(), CancelToken::new());
        pipeline.initialize().unwrap();
        assert!(pipeline.device().is_analyzer_mode());
        pipeline.run(&[TILE]).unwrap();
        assert_eq!(pipeline.sweeps_folded(), 1);
        let result = pipeline.bins().reduce(ReductionMethod::Max);
        assert_eq!(result.len(), 4);
        assert_eq!(result.get(500.0), Some(-40.0));
    }

    #[test]
    fn sweeps_read_with_the_confirming_config_are_kept() {
        let mut confirm = CONFIG_LINE.to_vec();
        confirm.extend(sweep_frame(&[60, 70]));
        let mut handshake = b"#C2-M:006,255,01.33\r\n".to_vec();
        handshake.extend_from_slice(b"#C2-F:0400000,0025225,-010,-120,0112,0,000\r\n");
        handshake.extend(sweep_frame(&[10, 10]));
        let dev = scripted(vec![handshake, confirm]);
        let mut pipeline = ScanPipeline::new(dev, fast_settings(), CancelToken::new());
        pipeline.initialize().unwrap();
        pipeline.run(&[TILE]).unwrap();
        assert_eq!(pipeline.sweeps_folded(), 1);
        let result = pipeline.bins().reduce(ReductionMethod::Max);
        assert_eq!(result.get(500.0), Some(-30.0));
        assert_eq!(result.get(400.0), None);
    }

    #[test]
    fn new_config_discards_older_sweeps() {
        let mut dev = RfExplorer::detached("test");
        dev.ingest(CONFIG_LINE).unwrap();
        dev.ingest(&sweep_frame(&[20])).unwrap();
        assert_eq!(dev.sweeps().len(), 1);
        dev.ingest(CONFIG_LINE).unwrap();
        assert!(dev.sweeps().is_empty());
    }

    #[test]
    fn disconnected_device_cannot_send() {
        let mut dev = RfExplorer::detached("test");
        assert!(matches!(dev.request_config(), Err(ScanError::Device(_))));
        assert!(dev.disconnect().is_ok());
    }
}
