//! Serial port handling
//!
//! RS-232 access to balances via `tokio-serial`, plus port discovery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use super::{read_with_timeout, ReadOutcome, Transport, TransportError, TransportKind};

/// Baud rates offered for balances
pub const BAUD_RATES: [u32; 7] = [1200, 2400, 4800, 9600, 19200, 38400, 57600];

/// Default baud rate (Precisa 321 LX factory setting)
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
    /// Parity bit always 1
    Mark,
    /// Parity bit always 0
    Space,
}

/// Flow control setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    /// No flow control
    #[serde(rename = "NONE")]
    None,
    /// Software XON/XOFF
    #[serde(rename = "XON/XOFF")]
    XonXoff,
    /// RTS/CTS
    #[serde(rename = "HARDWARE")]
    Hardware,
}

/// Serial line parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (7 or 8)
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Flow control
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 7,
            parity: Parity::Odd,
            stop_bits: 1,
            flow_control: FlowControl::None,
        }
    }
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits, TransportError> {
    match bits {
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(TransportError::Unsupported(format!("{other} data bits"))),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits, TransportError> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(TransportError::Unsupported(format!("{other} stop bits"))),
    }
}

fn parity(parity: Parity) -> Result<tokio_serial::Parity, TransportError> {
    match parity {
        Parity::None => Ok(tokio_serial::Parity::None),
        Parity::Even => Ok(tokio_serial::Parity::Even),
        Parity::Odd => Ok(tokio_serial::Parity::Odd),
        // The serialport backend only exposes none/odd/even
        Parity::Mark | Parity::Space => Err(TransportError::Unsupported(format!(
            "{parity:?} parity is not supported by the serial driver"
        ))),
    }
}

fn flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::XonXoff => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}

/// Open serial connection to a balance
pub struct SerialTransport {
    port_name: String,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    /// Open the port with the configured line settings
    pub fn open(config: &SerialConfig) -> Result<Self, TransportError> {
        if config.port_name.is_empty() {
            return Err(TransportError::PortNotFound("no port selected".into()));
        }

        let stream = tokio_serial::new(&config.port_name, config.baud_rate)
            .data_bits(data_bits(config.data_bits)?)
            .parity(parity(config.parity)?)
            .stop_bits(stop_bits(config.stop_bits)?)
            .flow_control(flow_control(config.flow_control))
            .timeout(Duration::from_millis(super::DEFAULT_POLL_MS))
            .open_native_async()
            .map_err(|e| TransportError::from_serial(&config.port_name, e))?;

        debug!(
            port = %config.port_name,
            baud = config.baud_rate,
            data_bits = config.data_bits,
            parity = ?config.parity,
            stop_bits = config.stop_bits,
            flow = ?config.flow_control,
            "serial port opened"
        );

        Ok(Self {
            port_name: config.port_name.clone(),
            stream: Some(stream),
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn describe(&self) -> String {
        self.port_name.clone()
    }

    async fn read_available(&mut self, timeout: Duration) -> Result<ReadOutcome, TransportError> {
        match self.stream.as_mut() {
            Some(stream) => read_with_timeout(stream, timeout).await,
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Information about an available serial port
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key so USB adapters come first: ttyACM*, then ttyUSB*, then the rest
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // USB-serial adapters the enumeration API sometimes misses
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic on this host
        for port in list_ports() {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_line_setting_mapping() {
        assert_eq!(data_bits(7).unwrap(), tokio_serial::DataBits::Seven);
        assert_eq!(stop_bits(2).unwrap(), tokio_serial::StopBits::Two);
        assert_eq!(parity(Parity::Odd).unwrap(), tokio_serial::Parity::Odd);
        assert_eq!(
            flow_control(FlowControl::XonXoff),
            tokio_serial::FlowControl::Software
        );
        assert!(data_bits(6).is_err());
        assert!(matches!(
            parity(Parity::Mark),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[test]
    fn test_flow_control_serde_names() {
        let json = serde_json::to_string(&FlowControl::XonXoff).unwrap();
        assert_eq!(json, "\"XON/XOFF\"");
        let parity: Parity = serde_json::from_str("\"SPACE\"").unwrap();
        assert_eq!(parity, Parity::Space);
    }

    #[tokio::test]
    async fn test_open_without_port_fails() {
        let result = SerialTransport::open(&SerialConfig::default());
        assert!(matches!(result, Err(TransportError::PortNotFound(_))));
    }
}
