use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::SerialConfig;
use crate::error::TransmissionError;

/// Destination for encoded frames.
///
/// Writes are best-effort: a failure is returned to the caller and the frame
/// is dropped. The next edit or session change sends a fresh one.
pub trait FrameSink: Send {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransmissionError>;
    fn is_open(&self) -> bool;
    fn close(&mut self);
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransmissionError> {
        (**self).write(frame)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Live serial port, written with a bounded timeout.
pub struct SerialSink {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    timeout: Duration,
}

impl SerialSink {
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.write_timeout_ms);
        let mut port = serialport::new(&config.port, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .context(format!("Failed to open serial port {}", config.port))?;

        // Bounds every write; a hung device surfaces as TimedOut.
        port.set_timeout(timeout)
            .context("Failed to set serial port timeout")?;

        // Arduino-style boards expect DTR asserted
        if let Err(e) = port.write_data_terminal_ready(true) {
            warn!("Failed to set DTR on {}: {}", config.port, e);
        }

        // Allow device to reset after the port opens
        thread::sleep(Duration::from_millis(100));

        info!("Connected to {} @ {} baud", config.port, config.baud_rate);

        Ok(SerialSink {
            name: config.port.clone(),
            port: Some(port),
            timeout,
        })
    }
}

impl FrameSink for SerialSink {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransmissionError> {
        let Some(port) = self.port.as_mut() else {
            warn!("Serial {} not open; cannot send matrix", self.name);
            return Err(TransmissionError::Closed);
        };

        debug!(
            "[{}] Sending frame: {} bytes: {}",
            self.name,
            frame.len(),
            String::from_utf8_lossy(frame)
        );

        match port.write_all(frame).and_then(|_| port.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                error!("Serial write to {} timed out after {:?}", self.name, self.timeout);
                Err(TransmissionError::TimedOut(self.timeout))
            }
            Err(e) => {
                error!("Serial error on {}: {}", self.name, e);
                error!("Output {} is now disconnected", self.name);
                self.port = None;
                Err(TransmissionError::Io(e))
            }
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed {}", self.name);
        }
    }
}

/// Stand-in for a device: logs what would have been sent.
pub struct SimulatedSink {
    open: bool,
}

impl SimulatedSink {
    pub fn new() -> Self {
        info!("[SIM] simulation mode active");
        SimulatedSink { open: true }
    }
}

impl Default for SimulatedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for SimulatedSink {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransmissionError> {
        if !self.open {
            return Err(TransmissionError::Closed);
        }
        info!("[SIM] -> {}", String::from_utf8_lossy(frame).trim());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            info!("[SIM] sink closed");
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    frames: Vec<Vec<u8>>,
    open: bool,
    failing: bool,
}

/// Captures frames in memory. Clones share the same buffer, so one copy can
/// be handed to the controller while another is inspected.
#[derive(Debug, Clone)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            state: Arc::new(Mutex::new(MemoryState {
                open: true,
                ..MemoryState::default()
            })),
        }
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.lock().frames.last().cloned()
    }

    pub fn frame_count(&self) -> usize {
        self.lock().frames.len()
    }

    /// Make every following write fail with an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for MemorySink {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransmissionError> {
        let mut state = self.lock();
        if !state.open {
            return Err(TransmissionError::Closed);
        }
        if state.failing {
            return Err(TransmissionError::Io(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "capture sink set to fail",
            )));
        }
        state.frames.push(frame.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn close(&mut self) {
        self.lock().open = false;
    }
}

/// Detected serial ports as `(device, description)`.
pub fn list_ports() -> Result<Vec<(String, String)>> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .or(usb.manufacturer)
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::Unknown => "n/a".to_string(),
            };
            (p.port_name, description)
        })
        .collect())
}
