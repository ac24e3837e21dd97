//! Memory-mapped peripherals and simulator-only I/O ports.
//!
//! Two kinds of hardware hang off the bus besides plain memory:
//! - **Peripherals** ([`Peripheral`]): devices mapped into the 64 KiB window
//!   above the peripheral base register (MBAR). Timers, UARTs, and the like
//!   implement this trait; the engine only knows the generic read/write
//!   contract and polls each device once per retired instruction.
//! - **Simulator ports** ([`SimIo`]): a fixed 4 KiB window of ports that exist
//!   only in simulation, used to talk to the host (console bytes in/out).
//!
//! Interrupts are requested through [`InterruptLines`], which peripherals
//! receive a handle to during their per-instruction update.

use crossbeam_channel as cbc;

use crate::ast::Size;

/// The size of the peripheral window above MBAR, in bytes.
pub const MBAR_WINDOW: u32 = 0x1_0000;
/// The size of the simulator-I/O window, in bytes.
pub const SIM_IO_WINDOW: u32 = 0x1000;

/// A memory-mapped peripheral living in the MBAR window.
///
/// All calls are synchronous. `read` returning `None` and `write` returning
/// `false` both surface to the program as a bus fault at that address.
pub trait Peripheral: Send {
    /// The device's name, for diagnostics.
    fn name(&self) -> &str;

    /// The half-open offset range `[start, end)` this device claims within
    /// the peripheral window.
    fn range(&self) -> (u16, u16);

    /// Reads a value from the given offset (relative to the window base).
    fn read(&mut self, offset: u16, size: Size) -> Option<u32>;

    /// Writes a value to the given offset (relative to the window base).
    /// Returns whether the device accepted the write.
    fn write(&mut self, offset: u16, size: Size, value: u32) -> bool;

    /// Called once per retired instruction. The device may advance its own
    /// state and raise or drop interrupt requests here.
    fn update(&mut self, intc: &mut InterruptLines);

    /// Resets the device to its power-on state.
    fn reset(&mut self);
}

/// One pending interrupt request.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
struct IntRequest {
    source: u8,
    level: u8,
    vector: u8,
}

/// The interrupt lines between peripherals and the CPU core.
///
/// A peripheral asserts a request with a source id (so it can later clear its
/// own request without disturbing others), a priority level 1–7, and the
/// vector number the CPU should take. Level 7 is non-maskable.
#[derive(Debug, Default)]
pub struct InterruptLines {
    requests: Vec<IntRequest>,
}

impl InterruptLines {
    /// Asserts an interrupt request. A repeated assert from the same source
    /// replaces the previous one.
    pub fn assert_request(&mut self, source: u8, level: u8, vector: u8) {
        debug_assert!((1..=7).contains(&level), "interrupt level must be 1-7");
        self.clear(source);
        self.requests.push(IntRequest { source, level, vector });
    }

    /// Drops the request from the given source, if any.
    pub fn clear(&mut self, source: u8) {
        self.requests.retain(|r| r.source != source);
    }

    /// The highest-priority request that would be taken at the given
    /// interrupt mask level, as `(level, vector)`.
    ///
    /// A request is taken when its level exceeds the mask, or when it is
    /// level 7 (non-maskable).
    pub fn pending(&self, ipl: u8) -> Option<(u8, u8)> {
        self.requests
            .iter()
            .filter(|r| r.level > ipl || r.level == 7)
            .max_by_key(|r| r.level)
            .map(|r| (r.level, r.vector))
    }

    /// Drops every request.
    pub fn reset(&mut self) {
        self.requests.clear();
    }
}

/// Routes accesses inside the peripheral window to registered devices and
/// carries the interrupt lines they share.
#[derive(Default)]
pub struct DeviceHandler {
    devices: Vec<Box<dyn Peripheral>>,
    /// The interrupt lines shared by every registered device.
    pub intc: InterruptLines,
}

impl DeviceHandler {
    /// Creates a handler with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device.
    ///
    /// Fails if the device's claimed range overlaps an already-registered
    /// device or does not fit in the peripheral window.
    pub fn add_device(&mut self, dev: Box<dyn Peripheral>) -> Result<(), DeviceConflict> {
        let (start, end) = dev.range();
        if start >= end || u32::from(end) > MBAR_WINDOW {
            return Err(DeviceConflict { name: dev.name().to_string(), other: None });
        }
        for other in &self.devices {
            let (os, oe) = other.range();
            if start < oe && os < end {
                return Err(DeviceConflict {
                    name: dev.name().to_string(),
                    other: Some(other.name().to_string()),
                });
            }
        }
        self.devices.push(dev);
        Ok(())
    }

    fn find(&mut self, offset: u16) -> Option<&mut Box<dyn Peripheral>> {
        self.devices.iter_mut().find(|d| {
            let (s, e) = d.range();
            (s..e).contains(&offset)
        })
    }

    /// Reads from a window offset. `None` if no device claims the offset or
    /// the claiming device rejected the access.
    pub fn read(&mut self, offset: u16, size: Size) -> Option<u32> {
        self.find(offset)?.read(offset, size)
    }

    /// Writes to a window offset. Returns whether a device accepted it.
    pub fn write(&mut self, offset: u16, size: Size, value: u32) -> bool {
        match self.find(offset) {
            Some(dev) => dev.write(offset, size, value),
            None => false,
        }
    }

    /// Gives every device its per-instruction update.
    pub fn update_all(&mut self) {
        for dev in &mut self.devices {
            dev.update(&mut self.intc);
        }
    }

    /// Resets every device and drops all interrupt requests.
    pub fn reset_all(&mut self) {
        for dev in &mut self.devices {
            dev.reset();
        }
        self.intc.reset();
    }
}

/// Error from registering a device whose range is out of bounds or collides
/// with another device.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceConflict {
    /// The device that could not be registered.
    pub name: String,
    /// The already-registered device it collided with, if any.
    pub other: Option<String>,
}
impl std::fmt::Display for DeviceConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.other {
            Some(other) => write!(f, "device {} overlaps device {}", self.name, other),
            None => write!(f, "device {} does not fit in the peripheral window", self.name),
        }
    }
}
impl std::error::Error for DeviceConflict {}

/// Port offsets within the simulator-I/O window.
pub mod sim_ports {
    /// Write a byte to the host console.
    pub const TX_DATA: u32 = 0x000;
    /// Read a byte from the host console (consumes it; 0 when none ready).
    pub const RX_DATA: u32 = 0x004;
    /// Status: bit 0 = receive ready, bit 1 = transmit ready.
    pub const STATUS: u32 = 0x008;
    /// Instruction counter (read-only, low 32 bits).
    pub const INSTR_COUNT: u32 = 0x00C;
}

/// The simulator-side ends of the console channels.
///
/// The host holds this half: bytes sent on `tx` appear on the console input
/// port, and bytes the program writes to the output port arrive on `rx`.
pub struct IoHooks {
    /// Send bytes to the simulated program's console input.
    pub tx: cbc::Sender<u8>,
    /// Receive bytes the simulated program wrote to its console output.
    pub rx: cbc::Receiver<u8>,
}

/// State backing the simulator-I/O window.
///
/// Console traffic goes over a pair of channels so a host frontend (or a
/// test) can feed input and collect output from another thread without
/// touching simulator state.
pub struct SimIo {
    input: Option<cbc::Receiver<u8>>,
    output: Option<cbc::Sender<u8>>,
    /// A received byte held until the program reads the data port.
    pending: Option<u8>,
    /// Mirror of the instruction counter for the read-only count port.
    pub(crate) instr_count: u32,
}

impl SimIo {
    /// Creates a window with no console attached. Reads return 0 and writes
    /// are discarded.
    pub fn detached() -> Self {
        Self { input: None, output: None, pending: None, instr_count: 0 }
    }

    /// Creates a window with console channels and hands back the host ends.
    pub fn piped() -> (Self, IoHooks) {
        let (in_tx, in_rx) = cbc::unbounded();
        let (out_tx, out_rx) = cbc::unbounded();
        let io = Self {
            input: Some(in_rx),
            output: Some(out_tx),
            pending: None,
            instr_count: 0,
        };
        (io, IoHooks { tx: in_tx, rx: out_rx })
    }

    fn poll_input(&mut self) {
        if self.pending.is_none() {
            if let Some(rx) = &self.input {
                self.pending = rx.try_recv().ok();
            }
        }
    }

    /// Reads a simulator port. Unknown offsets read as `None` (a bus fault).
    pub fn read(&mut self, offset: u32) -> Option<u32> {
        match offset {
            sim_ports::TX_DATA => Some(0),
            sim_ports::RX_DATA => {
                self.poll_input();
                Some(u32::from(self.pending.take().unwrap_or(0)))
            }
            sim_ports::STATUS => {
                self.poll_input();
                let rx_ready = u32::from(self.pending.is_some());
                Some(rx_ready | 0b10)
            }
            sim_ports::INSTR_COUNT => Some(self.instr_count),
            _ => None,
        }
    }

    /// Writes a simulator port. Returns whether the port accepted the write.
    pub fn write(&mut self, offset: u32, value: u32) -> bool {
        match offset {
            sim_ports::TX_DATA => {
                if let Some(tx) = &self.output {
                    // the host dropping its end is not a program-visible fault
                    let _ = tx.send(value as u8);
                }
                true
            }
            sim_ports::RX_DATA | sim_ports::STATUS | sim_ports::INSTR_COUNT => false,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_priority_and_masking() {
        let mut intc = InterruptLines::default();
        intc.assert_request(0, 3, 0x40);
        intc.assert_request(1, 5, 0x41);
        assert_eq!(intc.pending(0), Some((5, 0x41)));
        assert_eq!(intc.pending(5), None);
        intc.assert_request(2, 7, 0x42);
        // level 7 punches through any mask
        assert_eq!(intc.pending(7), Some((7, 0x42)));
        intc.clear(2);
        intc.clear(1);
        assert_eq!(intc.pending(0), Some((3, 0x40)));
    }

    #[test]
    fn console_round_trip() {
        let (mut io, hooks) = SimIo::piped();
        hooks.tx.send(b'x').unwrap();
        assert_eq!(io.read(sim_ports::STATUS), Some(0b11));
        assert_eq!(io.read(sim_ports::RX_DATA), Some(u32::from(b'x')));
        // consumed: status drops receive-ready, data reads as 0
        assert_eq!(io.read(sim_ports::STATUS), Some(0b10));
        assert_eq!(io.read(sim_ports::RX_DATA), Some(0));

        assert!(io.write(sim_ports::TX_DATA, u32::from(b'y')));
        assert_eq!(hooks.rx.try_recv(), Ok(b'y'));
    }

    struct Stub(u16, u16);
    impl Peripheral for Stub {
        fn name(&self) -> &str {
            "stub"
        }
        fn range(&self) -> (u16, u16) {
            (self.0, self.1)
        }
        fn read(&mut self, _: u16, _: Size) -> Option<u32> {
            Some(0)
        }
        fn write(&mut self, _: u16, _: Size, _: u32) -> bool {
            true
        }
        fn update(&mut self, _: &mut InterruptLines) {}
        fn reset(&mut self) {}
    }

    #[test]
    fn device_ranges_must_not_overlap() {
        let mut dh = DeviceHandler::new();
        dh.add_device(Box::new(Stub(0x000, 0x100))).unwrap();
        assert!(dh.add_device(Box::new(Stub(0x0FF, 0x200))).is_err());
        dh.add_device(Box::new(Stub(0x100, 0x200))).unwrap();
    }
}
