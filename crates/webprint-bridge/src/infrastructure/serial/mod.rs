//! Serial port infrastructure backed by the `serialport` crate.
//!
//! # Line settings support
//!
//! `serialport` exposes the line settings common to Windows, Linux and
//! macOS.  Mark and space parity and 1.5 stop bits are not among them; asking
//! for those fails with a serial error rather than silently picking
//! something else.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use webprint_core::{DataBits, FlowControl, LineSettings, Parity, ResponseFrame, StopBits};

use crate::application::devices::DeviceError;
use crate::application::serial_session::{SerialBackend, SerialLink};

pub mod mock;

/// How long one read waits before checking the overall deadline again.
const READ_SLICE: Duration = Duration::from_millis(50);

/// [`SerialBackend`] for the ports of this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerialBackend;

impl SerialBackend for SystemSerialBackend {
    fn list_ports(&self) -> Result<Vec<String>, DeviceError> {
        let ports = serialport::available_ports().map_err(|e| DeviceError::Serial(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, port: &str, settings: &LineSettings) -> Result<Box<dyn SerialLink>, DeviceError> {
        let line = LineConfig::try_from(settings)?;
        let handle = serialport::new(port, settings.baud)
            .data_bits(line.data_bits)
            .stop_bits(line.stop_bits)
            .parity(line.parity)
            .flow_control(line.flow_control)
            .timeout(READ_SLICE)
            .open()
            .map_err(|e| DeviceError::Serial(format!("{port}: {e}")))?;
        Ok(Box::new(SystemSerialLink {
            name: port.to_string(),
            handle,
        }))
    }
}

struct SystemSerialLink {
    name: String,
    handle: Box<dyn SerialPort>,
}

impl SystemSerialLink {
    fn serial_error(&self, e: impl std::fmt::Display) -> DeviceError {
        DeviceError::Serial(format!("{}: {e}", self.name))
    }
}

impl SerialLink for SystemSerialLink {
    fn apply(&mut self, settings: &LineSettings) -> Result<(), DeviceError> {
        let line = LineConfig::try_from(settings)?;
        self.handle.set_baud_rate(settings.baud).map_err(|e| self.serial_error(e))?;
        self.handle.set_data_bits(line.data_bits).map_err(|e| self.serial_error(e))?;
        self.handle.set_stop_bits(line.stop_bits).map_err(|e| self.serial_error(e))?;
        self.handle.set_parity(line.parity).map_err(|e| self.serial_error(e))?;
        self.handle
            .set_flow_control(line.flow_control)
            .map_err(|e| self.serial_error(e))?;
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        self.handle.write_all(bytes).map_err(|e| self.serial_error(e))?;
        self.handle.flush().map_err(|e| self.serial_error(e))
    }

    fn read_available(&mut self, timeout: Duration, frame: &ResponseFrame) -> Result<Vec<u8>, DeviceError> {
        let deadline = Instant::now() + timeout;
        let mut received = Vec::new();
        let mut chunk = [0u8; 256];

        // Without an end marker, stop once the device has been quiet for one
        // slice after answering.  The deadline bounds both cases.
        while Instant::now() < deadline {
            match self.handle.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    received.extend_from_slice(&chunk[..n]);
                    if frame.is_complete(&received) {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    if frame.end.is_empty() && !received.is_empty() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(self.serial_error(e)),
            }
        }
        Ok(received)
    }
}

/// `serialport` equivalents of [`LineSettings`].
struct LineConfig {
    data_bits: serialport::DataBits,
    stop_bits: serialport::StopBits,
    parity: serialport::Parity,
    flow_control: serialport::FlowControl,
}

impl TryFrom<&LineSettings> for LineConfig {
    type Error = DeviceError;

    fn try_from(settings: &LineSettings) -> Result<Self, Self::Error> {
        let data_bits = match settings.data_bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        };
        let stop_bits = match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => {
                return Err(DeviceError::Serial("1.5 stop bits are not supported".to_string()))
            }
        };
        let parity = match settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
            Parity::Mark | Parity::Space => {
                return Err(DeviceError::Serial(format!(
                    "{:?} parity is not supported",
                    settings.parity
                )))
            }
        };
        let flow_control = match settings.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::RtsCts => serialport::FlowControl::Hardware,
            FlowControl::XonXoff => serialport::FlowControl::Software,
        };
        Ok(Self {
            data_bits,
            stop_bits,
            parity,
            flow_control,
        })
    }
}
