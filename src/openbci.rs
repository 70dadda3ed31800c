// src/openbci.rs
use anyhow::{anyhow, bail, Context, Result};
use libloading::Library;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serialport::SerialPortType;
use std::collections::VecDeque;
use std::ffi::CString;
#[cfg(target_os = "linux")]
use std::fs;
use std::path::{Path, PathBuf};
#[cfg(target_os = "linux")]
use std::process::Command;
use std::os::raw::{c_char, c_double, c_int};

use crate::dsp::{Sample, SampleSource, SourcePoll};
use crate::error::AcquisitionError;

const BOARD_ID_CYTON_DAISY: c_int = 2;
const PRESET_DEFAULT: c_int = 0;
const STREAM_RINGBUF_PACKETS: c_int = 450_000;
/// FTDI FT231X, the chip on the OpenBCI USB dongle.
const DONGLE_VID: u16 = 0x0403;
const DONGLE_PID: u16 = 0x6015;

#[cfg(target_os = "windows")]
const BOARD_CONTROLLER_LIB: &str = "BoardController.dll";
#[cfg(target_os = "macos")]
const BOARD_CONTROLLER_LIB: &str = "libBoardController.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const BOARD_CONTROLLER_LIB: &str = "libBoardController.so";

/// First serial port that looks like the OpenBCI dongle.
pub fn find_dongle_port() -> Result<String> {
    let ports = serialport::available_ports().context("failed to enumerate serial ports")?;
    ports
        .into_iter()
        .find_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) if usb.vid == DONGLE_VID && usb.pid == DONGLE_PID => {
                Some(port.port_name)
            }
            _ => None,
        })
        .ok_or_else(|| anyhow!("no OpenBCI dongle (VID {DONGLE_VID:#06x}, PID {DONGLE_PID:#06x}) found"))
}

/// sysfs knob holding the FTDI latency timer in milliseconds for a port
/// such as `/dev/ttyUSB0`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn latency_timer_path(port_name: &str) -> Option<PathBuf> {
    let device = Path::new(port_name).file_name()?.to_str()?;
    Some(
        Path::new("/sys/bus/usb-serial/devices")
            .join(device)
            .join("latency_timer"),
    )
}

/// Switches the dongle's serial line to low latency with `setserial` and
/// returns the resulting FTDI latency timer. The default 16 ms timer batches
/// packets and makes the stream arrive in bursts.
#[cfg(target_os = "linux")]
pub fn set_low_latency(port_name: &str) -> Result<u32> {
    let status = Command::new("setserial")
        .arg(port_name)
        .arg("low_latency")
        .status()
        .context("failed to run setserial")?;
    if !status.success() {
        bail!("setserial {port_name} low_latency exited with {status}");
    }
    let timer = latency_timer_path(port_name)
        .with_context(|| format!("cannot derive a device name from {port_name}"))?;
    let text = fs::read_to_string(&timer)
        .with_context(|| format!("failed to read {}", timer.display()))?;
    let millis = text
        .trim()
        .parse()
        .with_context(|| format!("unexpected latency timer value {text:?}"))?;
    info!("{port_name} latency timer is {millis} ms");
    Ok(millis)
}

#[cfg(not(target_os = "linux"))]
pub fn set_low_latency(port_name: &str) -> Result<u32> {
    bail!("low-latency tuning of {port_name} is only supported on Linux")
}

#[derive(Serialize)]
struct BrainFlowInputParams {
    serial_port: String,
    mac_address: String,
    ip_address: String,
    ip_address_aux: String,
    ip_address_anc: String,
    ip_port: i32,
    ip_port_aux: i32,
    ip_port_anc: i32,
    ip_protocol: i32,
    other_info: String,
    timeout: i32,
    serial_number: String,
    file: String,
    file_aux: String,
    file_anc: String,
    master_board: i32,
}

impl BrainFlowInputParams {
    fn for_serial(port: &str) -> Self {
        Self {
            serial_port: port.to_string(),
            mac_address: String::new(),
            ip_address: String::new(),
            ip_address_aux: String::new(),
            ip_address_anc: String::new(),
            ip_port: 0,
            ip_port_aux: 0,
            ip_port_anc: 0,
            ip_protocol: 0,
            other_info: String::new(),
            timeout: 0,
            serial_number: String::new(),
            file: String::new(),
            file_aux: String::new(),
            file_anc: String::new(),
            master_board: -100, // NO_BOARD
        }
    }
}

struct BrainFlowApi {
    #[allow(dead_code)]
    lib: Library,
    prepare_session: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    start_stream: unsafe extern "C" fn(c_int, *const c_char, c_int, *const c_char) -> c_int,
    stop_stream: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    release_session: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    get_sampling_rate: unsafe extern "C" fn(c_int, c_int, *mut c_int) -> c_int,
    get_num_rows: unsafe extern "C" fn(c_int, c_int, *mut c_int) -> c_int,
    get_eeg_channels: unsafe extern "C" fn(c_int, c_int, *mut c_int, *mut c_int) -> c_int,
    get_board_data_count: unsafe extern "C" fn(c_int, *mut c_int, c_int, *const c_char) -> c_int,
    get_board_data: unsafe extern "C" fn(c_int, c_int, *mut c_double, c_int, *const c_char) -> c_int,
}

impl BrainFlowApi {
    fn load() -> Result<Self> {
        let lib = unsafe { Library::new(BOARD_CONTROLLER_LIB) }
            .with_context(|| format!("{BOARD_CONTROLLER_LIB} not found on the library path"))?;
        // Safety: signatures follow the BrainFlow board controller C API.
        unsafe {
            Ok(Self {
                prepare_session: *lib.get(b"prepare_session\0")?,
                start_stream: *lib.get(b"start_stream\0")?,
                stop_stream: *lib.get(b"stop_stream\0")?,
                release_session: *lib.get(b"release_session\0")?,
                get_sampling_rate: *lib.get(b"get_sampling_rate\0")?,
                get_num_rows: *lib.get(b"get_num_rows\0")?,
                get_eeg_channels: *lib.get(b"get_eeg_channels\0")?,
                get_board_data_count: *lib.get(b"get_board_data_count\0")?,
                get_board_data: *lib.get(b"get_board_data\0")?,
                lib,
            })
        }
    }

    fn instance() -> Result<&'static BrainFlowApi> {
        static API: OnceCell<BrainFlowApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }

    fn check(code: c_int, ctx: &str) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(anyhow!("{ctx} failed (BrainFlow code {code})"))
        }
    }

    fn prepare(&self, input: &CString) -> Result<()> {
        Self::check(
            unsafe { (self.prepare_session)(BOARD_ID_CYTON_DAISY, input.as_ptr()) },
            "prepare_session",
        )
    }

    fn start_stream(&self, input: &CString) -> Result<()> {
        Self::check(
            unsafe {
                (self.start_stream)(
                    STREAM_RINGBUF_PACKETS,
                    std::ptr::null(),
                    BOARD_ID_CYTON_DAISY,
                    input.as_ptr(),
                )
            },
            "start_stream",
        )
    }

    fn stop_stream(&self, input: &CString) -> Result<()> {
        Self::check(
            unsafe { (self.stop_stream)(BOARD_ID_CYTON_DAISY, input.as_ptr()) },
            "stop_stream",
        )
    }

    fn release(&self, input: &CString) -> Result<()> {
        Self::check(
            unsafe { (self.release_session)(BOARD_ID_CYTON_DAISY, input.as_ptr()) },
            "release_session",
        )
    }

    fn sampling_rate(&self) -> Result<c_int> {
        let mut rate: c_int = 0;
        Self::check(
            unsafe { (self.get_sampling_rate)(BOARD_ID_CYTON_DAISY, PRESET_DEFAULT, &mut rate) },
            "get_sampling_rate",
        )?;
        Ok(rate)
    }

    fn num_rows(&self) -> Result<c_int> {
        let mut rows: c_int = 0;
        Self::check(
            unsafe { (self.get_num_rows)(BOARD_ID_CYTON_DAISY, PRESET_DEFAULT, &mut rows) },
            "get_num_rows",
        )?;
        Ok(rows)
    }

    fn eeg_channels(&self, max_channels: usize) -> Result<Vec<c_int>> {
        let mut out_len: c_int = 0;
        let mut buf = vec![0 as c_int; max_channels.max(32)];
        Self::check(
            unsafe {
                (self.get_eeg_channels)(
                    BOARD_ID_CYTON_DAISY,
                    PRESET_DEFAULT,
                    buf.as_mut_ptr(),
                    &mut out_len,
                )
            },
            "get_eeg_channels",
        )?;
        buf.truncate(out_len.max(0) as usize);
        Ok(buf)
    }

    fn data_count(&self, input: &CString) -> Result<usize> {
        let mut count: c_int = 0;
        Self::check(
            unsafe {
                (self.get_board_data_count)(
                    PRESET_DEFAULT,
                    &mut count,
                    BOARD_ID_CYTON_DAISY,
                    input.as_ptr(),
                )
            },
            "get_board_data_count",
        )?;
        Ok(count.max(0) as usize)
    }

    /// Removes `count` samples from BrainFlow's ring buffer into `buffer`,
    /// laid out row by row.
    fn take_data(&self, input: &CString, count: usize, buffer: &mut [f64]) -> Result<()> {
        Self::check(
            unsafe {
                (self.get_board_data)(
                    count as c_int,
                    PRESET_DEFAULT,
                    buffer.as_mut_ptr(),
                    BOARD_ID_CYTON_DAISY,
                    input.as_ptr(),
                )
            },
            "get_board_data",
        )
    }
}

/// BrainFlow-backed Cyton + Daisy stream through the USB dongle.
///
/// Every sample BrainFlow buffers is handed out exactly once and in order;
/// nothing is skipped to catch up.
pub struct OpenBciSession {
    port_name: String,
    api: &'static BrainFlowApi,
    input_json: CString,
    eeg_channels: Vec<c_int>,
    num_rows: usize,
    sample_rate_hz: f64,
    pending: VecDeque<Sample>,
    is_streaming: bool,
    released: bool,
}

impl OpenBciSession {
    /// Prepares a session on `port_name`, or on the detected dongle when
    /// `None`.
    pub fn connect(port_name: Option<&str>) -> Result<Self> {
        let port_name = match port_name {
            Some(port) => port.to_string(),
            None => find_dongle_port()?,
        };
        let api = BrainFlowApi::instance()?;
        let json = serde_json::to_string(&BrainFlowInputParams::for_serial(&port_name))?;
        let input_json =
            CString::new(json).context("failed to encode BrainFlow input params to C string")?;
        api.prepare(&input_json)?;
        let sample_rate_hz = f64::from(api.sampling_rate()?);
        let num_rows = api.num_rows()?.max(0) as usize;
        let eeg_channels = api.eeg_channels(num_rows)?;
        info!(
            "OpenBCI session prepared on {port_name}: {} EEG channels at {sample_rate_hz} Hz",
            eeg_channels.len()
        );
        Ok(Self {
            port_name,
            api,
            input_json,
            eeg_channels,
            num_rows,
            sample_rate_hz,
            pending: VecDeque::new(),
            is_streaming: false,
            released: false,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn eeg_channel_count(&self) -> usize {
        self.eeg_channels.len()
    }

    pub fn start_stream(&mut self) -> Result<()> {
        if self.released {
            bail!("session on {} was already released", self.port_name);
        }
        if !self.is_streaming {
            self.api.start_stream(&self.input_json)?;
            self.is_streaming = true;
        }
        Ok(())
    }

    /// Stops streaming and releases the board. Safe to call more than once.
    pub fn stop_stream(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            if self.is_streaming {
                self.is_streaming = false;
                if let Err(err) = self.api.stop_stream(&self.input_json) {
                    warn!("{err:#}");
                }
            }
            self.api.release(&self.input_json)?;
            debug!("released OpenBCI session on {}", self.port_name);
        }
        Ok(())
    }

    fn refill(&mut self, channel_count: usize) -> Result<()> {
        let available = self.api.data_count(&self.input_json)?;
        if available == 0 {
            return Ok(());
        }
        let mut buf = vec![0.0f64; self.num_rows * available];
        self.api.take_data(&self.input_json, available, &mut buf)?;
        for column in 0..available {
            let sample: Sample = self
                .eeg_channels
                .iter()
                .take(channel_count)
                .map(|&row| buf[row.max(0) as usize * available + column])
                .collect();
            self.pending.push_back(sample);
        }
        Ok(())
    }
}

impl SampleSource for OpenBciSession {
    fn next_sample(&mut self, channel_count: usize) -> Result<SourcePoll, AcquisitionError> {
        if self.released {
            return Err(AcquisitionError::Fatal(format!(
                "session on {} was released",
                self.port_name
            )));
        }
        if self.eeg_channels.len() < channel_count {
            return Err(AcquisitionError::Fatal(format!(
                "board streams {} EEG channels, session expects {channel_count}",
                self.eeg_channels.len()
            )));
        }
        if self.eeg_channels.iter().any(|&row| row < 0 || row as usize >= self.num_rows) {
            return Err(AcquisitionError::Fatal("BrainFlow reported an EEG row outside the data layout".into()));
        }
        if !self.is_streaming {
            self.start_stream()
                .map_err(|err| AcquisitionError::Fatal(format!("{err:#}")))?;
        }
        if self.pending.is_empty() {
            self.refill(channel_count)
                .map_err(|err| AcquisitionError::Transient(format!("{err:#}")))?;
        }
        Ok(self
            .pending
            .pop_front()
            .map_or(SourcePoll::NoDataYet, SourcePoll::Sample))
    }

    fn release(&mut self) -> Result<(), AcquisitionError> {
        self.stop_stream()
            .map_err(|err| AcquisitionError::Transient(format!("{err:#}")))
    }
}

impl Drop for OpenBciSession {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}
