//! Serial (USB CDC) transport for the CCD board.
//!
//! The board streams at 1 Mbaud, 8N1, no flow control. Frames are delimited by
//! a single frame-start byte and every pixel travels in a 4-byte envelope, see
//! [`record`] for the wire layout and [`decoder`] for the state machine.

pub mod decoder;
pub mod record;

pub use decoder::{DecoderState, SerialFrameDecoder};
pub use record::{encode_frame, FrameMarkers, RECORD_LEN};

use serialport::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType,
    StopBits,
};
use tracing::{debug, info};

use crate::config::SerialConfig;

/// Open and configure the port described by `config`.
///
/// The read timeout doubles as the receiver's stop-signal polling interval.
/// Both directions are purged after opening so decoding starts on fresh bytes.
pub fn open_port(config: &SerialConfig) -> serialport::Result<Box<dyn SerialPort>> {
    let port = serialport::new(&config.port, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(config.read_timeout())
        .open()?;
    port.clear(ClearBuffer::All)?;
    info!("Opened {} @ {} baud", config.port, config.baud_rate);
    Ok(port)
}

/// All serial ports visible to the OS.
pub fn available_ports() -> serialport::Result<Vec<SerialPortInfo>> {
    serialport::available_ports()
}

/// One-line description of a port for listings.
pub fn describe_port(info: &SerialPortInfo) -> String {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => format!(
            "{} (USB {:04x}:{:04x} {} {})",
            info.port_name,
            usb.vid,
            usb.pid,
            usb.manufacturer.as_deref().unwrap_or("-"),
            usb.product.as_deref().unwrap_or("-"),
        ),
        SerialPortType::PciPort => format!("{} (PCI)", info.port_name),
        SerialPortType::BluetoothPort => format!("{} (Bluetooth)", info.port_name),
        SerialPortType::Unknown => info.port_name.clone(),
    }
}

/// Whether a USB manufacturer/product string looks like the CCD board's
/// STM32 CDC bridge.
fn looks_like_ccd(text: &str) -> bool {
    text.contains("STM") || text.contains("USB Serial")
}

fn is_ccd_port(info: &SerialPortInfo) -> bool {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => [usb.manufacturer.as_deref(), usb.product.as_deref()]
            .into_iter()
            .flatten()
            .any(looks_like_ccd),
        _ => false,
    }
}

/// Pick the port most likely to be the CCD board: an STM32/USB-serial port if
/// present, otherwise the first port listed.
pub fn pick_port(ports: &[SerialPortInfo]) -> Option<String> {
    ports
        .iter()
        .find(|info| is_ccd_port(info))
        .or_else(|| ports.first())
        .map(|info| info.port_name.clone())
}

/// [`pick_port`] over the ports currently attached.
pub fn find_ccd_port() -> Option<String> {
    let ports = available_ports().ok()?;
    debug!("Found {} serial ports", ports.len());
    pick_port(&ports)
}
