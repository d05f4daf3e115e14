//! The RISC-V target control surface.

use tracing::debug;

use crate::communication_interface::{
    RiscvCommunicationInterface, RiscvError, DBUS_DATA_HALTNOT,
};
use crate::probe::JtagAccess;
use crate::registers::{Dcsr, DCSR, DPC, DSCRATCH};
use crate::triggers::{self, Breakwatch, BreakwatchKind};

/// Number of bytes in the GDB register file (x0..x31 and pc).
pub const REGISTER_FILE_SIZE: usize = 33 * 4;

/// GDB target description for a 32-bit hart.
pub const TARGET_DESCRIPTION: &str = r#"<?xml version="1.0"?>
<!DOCTYPE target SYSTEM "gdb-target.dtd">
<target>
  <architecture>riscv:rv32</architecture>
</target>"#;

/// The status of the core.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum CoreStatus {
    /// The core is currently running.
    Running,
    /// The core is halted, with the reason as payload.
    Halted(HaltReason),
}

/// The reason why a core was halted.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum HaltReason {
    /// An `ebreak` was hit or a hardware trigger fired.
    Breakpoint,
    /// The core halted because the debugger requested it.
    Request,
    /// A single step completed.
    Step,
    /// The hart reports a halt cause this driver does not know.
    Error,
}

/// A 32-bit RISC-V hart reached through its version 0 DTM.
#[derive(Debug)]
pub struct Riscv32 {
    interface: RiscvCommunicationInterface,

    /// Set between a halt request and the following resume. HALTNOT can lag
    /// the request by several transactions, so this flag is authoritative
    /// for the initial transition.
    halt_requested: bool,
}

impl Riscv32 {
    /// Name reported to the upper target layer.
    pub const NAME: &'static str = "RISC-V";

    /// Scan the DTM behind `probe` and construct a target if the hart
    /// reports a debug implementation this driver supports.
    pub fn new(probe: Box<dyn JtagAccess>) -> Result<Self, RiscvError> {
        let interface = RiscvCommunicationInterface::new(probe)?;

        Ok(Self {
            interface,
            halt_requested: false,
        })
    }

    /// Attach the debugger: request a halt without waiting for it.
    pub fn attach(&mut self) -> Result<(), RiscvError> {
        self.halt_request()
    }

    /// Detach the debugger and let the hart run.
    pub fn detach(&mut self) -> Result<(), RiscvError> {
        self.halt_resume(false)
    }

    /// Ask the hart to enter debug mode.
    pub fn halt_request(&mut self) -> Result<(), RiscvError> {
        self.interface.halt()?;
        self.halt_requested = true;

        Ok(())
    }

    /// Resume execution, optionally for a single instruction.
    pub fn halt_resume(&mut self, step: bool) -> Result<(), RiscvError> {
        self.interface.resume(step)?;
        self.halt_requested = false;

        Ok(())
    }

    /// Poll the halt state of the hart.
    pub fn halt_poll(&mut self) -> Result<CoreStatus, RiscvError> {
        let dmcontrol = self.interface.read_dmcontrol()?;
        if !self.halt_requested && dmcontrol & DBUS_DATA_HALTNOT == 0 {
            return Ok(CoreStatus::Running);
        }

        let dcsr = Dcsr(self.interface.csr_read(DCSR)?);
        debug!("dcsr: {:?}", dcsr);

        Ok(match dcsr.cause() {
            0 => CoreStatus::Running,
            1 | 2 => CoreStatus::Halted(HaltReason::Breakpoint),
            3 | 5 => CoreStatus::Halted(HaltReason::Request),
            4 => CoreStatus::Halted(HaltReason::Step),
            _ => CoreStatus::Halted(HaltReason::Error),
        })
    }

    /// Reset the hart by asserting `dcsr.ndreset` with a single write.
    pub fn reset(&mut self) -> Result<(), RiscvError> {
        let mut dcsr = Dcsr(0);
        dcsr.set_ndreset(true);

        self.interface.csr_write(DCSR, dcsr.0)
    }

    /// Report and clear a latched debug bus error.
    pub fn check_error(&mut self) -> Result<bool, RiscvError> {
        self.interface.check_error()
    }

    /// Read a register by its GDB number.
    ///
    /// `s0` and `s1` are shadowed by the debug ROM while the hart sits in
    /// debug mode, so they are fetched from `dscratch` and the last Debug
    /// RAM word instead of the register file.
    pub fn read_register(&mut self, index: u32) -> Result<u32, RiscvError> {
        match index {
            0 => Ok(0),
            8 => self.interface.csr_read(DSCRATCH),
            9 => {
                let shadow = self.interface.dramsize();
                self.interface.read_debug_ram(shadow)
            }
            1..=31 => self.interface.gpreg_read(index),
            32 => self.interface.csr_read(DPC),
            65..=4160 => self.interface.csr_read(index - 65),
            _ => Err(RiscvError::UnknownRegister(index)),
        }
    }

    /// Write a register by its GDB number. Writes to `x0` are ignored.
    pub fn write_register(&mut self, index: u32, value: u32) -> Result<(), RiscvError> {
        match index {
            0 => Ok(()),
            8 => self.interface.csr_write(DSCRATCH, value),
            9 => {
                let shadow = self.interface.dramsize();
                self.interface.write_debug_ram(shadow, value)
            }
            1..=31 => self.interface.gpreg_write(index, value),
            32 => self.interface.csr_write(DPC, value),
            65..=4160 => self.interface.csr_write(index - 65, value),
            _ => Err(RiscvError::UnknownRegister(index)),
        }
    }

    /// Read words of target memory. `address` must be word aligned.
    pub fn read_32(&mut self, address: u32, data: &mut [u32]) -> Result<(), RiscvError> {
        assert_eq!(address % 4, 0, "memory reads must be word aligned");

        for (i, word) in data.iter_mut().enumerate() {
            *word = self.interface.mem_read32(address + 4 * i as u32)?;
        }

        Ok(())
    }

    /// Write words of target memory. `address` must be word aligned.
    pub fn write_32(&mut self, address: u32, data: &[u32]) -> Result<(), RiscvError> {
        assert_eq!(address % 4, 0, "memory writes must be word aligned");

        for (i, word) in data.iter().enumerate() {
            self.interface.mem_write32(address + 4 * i as u32, *word)?;
        }

        Ok(())
    }

    /// Install a hardware breakpoint or watchpoint.
    pub fn set_breakwatch(
        &mut self,
        kind: BreakwatchKind,
        address: u32,
    ) -> Result<Breakwatch, RiscvError> {
        triggers::set(&mut self.interface, kind, address)
    }

    /// Remove a previously installed breakpoint or watchpoint.
    pub fn clear_breakwatch(&mut self, breakwatch: Breakwatch) -> Result<(), RiscvError> {
        triggers::clear(&mut self.interface, &breakwatch)
    }

    /// IDCODE of the TAP this target sits behind.
    pub fn read_idcode(&mut self) -> Result<u32, RiscvError> {
        self.interface.read_idcode()
    }
}
