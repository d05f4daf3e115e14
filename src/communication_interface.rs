//! Debug Module communication
//!
//! This module implements communication with a Debug Module as described in
//! the RISC-V debug specification draft v0.11. All debug primitives are
//! synthesized by staging short instruction stubs in the hart's Debug RAM
//! and running them to completion over the debug bus.

use bitfield::bitfield;
use thiserror::Error;
use tracing::{debug, trace};

use crate::assembly::{self, S0, S1, ZERO};
use crate::dtm::JtagDtm;
use crate::probe::{DebugProbeError, JtagAccess};
use crate::registers::{DCSR, DCSR_HALT, DCSR_STEP};
use crate::triggers::BreakwatchKind;

/// `dbus` address of `dmcontrol`.
const DMCONTROL: u32 = 0x10;
/// `dbus` address of `dminfo`.
const DMINFO: u32 = 0x11;

/// Interrupt flag in the 34-bit `dbus` data field. Written to a Debug RAM
/// word it starts stub execution; it reads back set until the stub has
/// reached the resume vector.
pub(crate) const DBUS_DATA_INTERRUPT: u64 = 1 << 33;
/// Halt-notification flag in the 34-bit `dbus` data field.
pub(crate) const DBUS_DATA_HALTNOT: u64 = 1 << 32;

/// The Debug RAM geometry the stub layout is written against. Harts
/// advertising a different `dminfo.dramsize` are refused at attach.
const EXPECTED_DRAMSIZE: u8 = 16;

#[derive(Error, Debug)]
pub enum RiscvError {
    #[error("Debug Probe Error")]
    DebugProbe(#[from] DebugProbeError),
    #[error("The version '{0}' of the debug transport module is currently not supported.")]
    UnsupportedDebugTransportModuleVersion(u8),
    #[error("The version '{0}' of the debug module is currently not supported.")]
    UnsupportedDebugModuleVersion(u8),
    #[error("The debug module requires authentication before it can be used.")]
    NotAuthenticated,
    #[error("The hart reports {0}+1 words of debug RAM, which the stub layout does not support.")]
    UnsupportedDebugRamSize(u8),
    #[error("No hardware trigger slot is free for the requested breakpoint or watchpoint.")]
    TriggerUnavailable,
    #[error("Breakwatches of kind {0:?} are not supported by this driver.")]
    UnsupportedBreakwatchKind(BreakwatchKind),
    #[error("Register {0} does not exist on this target.")]
    UnknownRegister(u32),
}

bitfield! {
    /// The read-only `dminfo` register of a version 0.11 debug module.
    pub struct Dminfo(u32);
    impl Debug;

    pub abussize, _: 31, 25;
    pub serialcount, _: 24, 21;
    pub access128, _: 20;
    pub access64, _: 19;
    pub access32, _: 18;
    pub access16, _: 17;
    pub access8, _: 16;
    pub dramsize, _: 15, 10;
    pub haltsum, _: 9;
    pub hiversion, _: 7, 6;
    pub authenticated, _: 5;
    pub authbusy, _: 4;
    pub authtype, _: 3, 2;
    pub loversion, _: 1, 0;
}

impl Dminfo {
    /// Debug module version, split across two fields.
    pub fn version(&self) -> u8 {
        (self.hiversion() << 2 | self.loversion()) as u8
    }
}

/// Communication with the debug module of one hart, built on Debug RAM
/// execution.
#[derive(Debug)]
pub struct RiscvCommunicationInterface {
    dtm: JtagDtm,

    /// Words of Debug RAM minus one. The word at this index doubles as the
    /// completion/return slot and the `s1` shadow.
    dramsize: u8,
}

impl RiscvCommunicationInterface {
    /// Probe the debug module behind `probe` and refuse any hart this
    /// driver cannot drive.
    pub(crate) fn new(probe: Box<dyn JtagAccess>) -> Result<Self, RiscvError> {
        let mut dtm = JtagDtm::new(probe)?;

        let dmcontrol = dtm.read(DMCONTROL)?;
        debug!("dmcontrol = {:#x}", dmcontrol);

        let dminfo = Dminfo(dtm.read(DMINFO)? as u32);
        debug!("dminfo: {:?}", dminfo);

        if dminfo.version() != 1 {
            return Err(RiscvError::UnsupportedDebugModuleVersion(dminfo.version()));
        }

        if !dminfo.authenticated() {
            return Err(RiscvError::NotAuthenticated);
        }

        let dramsize = dminfo.dramsize() as u8;
        debug!("debug RAM: {} bytes", (dramsize as u32 + 1) * 4);
        if dramsize != EXPECTED_DRAMSIZE {
            return Err(RiscvError::UnsupportedDebugRamSize(dramsize));
        }

        Ok(Self { dtm, dramsize })
    }

    /// Words of Debug RAM minus one.
    pub(crate) fn dramsize(&self) -> u8 {
        self.dramsize
    }

    /// Run a stub to completion and return the word in the completion slot.
    ///
    /// The final word is written with the interrupt flag, which starts
    /// execution at the Debug RAM base; the hart clears the flag when the
    /// stub jumps back to the resume vector. A latched bus error makes the
    /// suppressed reads return zero, so the poll terminates.
    pub(crate) fn run_debug_ram(&mut self, program: &[u32]) -> Result<u32, RiscvError> {
        let (last, head) = program.split_last().expect("empty debug RAM stub");

        for (i, word) in head.iter().enumerate() {
            self.dtm.write(i as u32, *word as u64)?;
        }
        self.dtm
            .write(head.len() as u32, *last as u64 | DBUS_DATA_INTERRUPT)?;

        loop {
            let completion = self.dtm.read(program.len() as u32)?;
            if completion & DBUS_DATA_INTERRUPT == 0 {
                return Ok(completion as u32);
            }
            trace!("debug RAM stub still running");
        }
    }

    /// Read a general purpose register.
    pub(crate) fn gpreg_read(&mut self, reg: u32) -> Result<u32, RiscvError> {
        // 400: sw xN, 0x408(zero)    register patched into rs2
        // 404: j <resume>
        // 408: <result>
        let program = [
            assembly::sw(0x408, ZERO, reg),
            assembly::resume_jump(1),
        ];

        self.run_debug_ram(&program)
    }

    /// Write a general purpose register from the stub's tail word.
    pub(crate) fn gpreg_write(&mut self, reg: u32, value: u32) -> Result<(), RiscvError> {
        // 400: transfer 0x408(zero) into xN    register patched into bits 11:7
        // 404: j <resume>
        // 408: <value>
        let program = [
            assembly::sw(0x408, ZERO, ZERO) | reg << 7,
            assembly::resume_jump(1),
            value,
        ];

        self.run_debug_ram(&program)?;

        Ok(())
    }

    /// Read a CSR.
    pub(crate) fn csr_read(&mut self, csr: u32) -> Result<u32, RiscvError> {
        // 400: csrr s0, <csr>
        // 404: sw s0, 0x40c(zero)
        // 408: j <resume>
        // 40c: <result>
        let program = [
            assembly::csrrs(S0, csr, ZERO),
            assembly::sw(0x40c, ZERO, S0),
            assembly::resume_jump(2),
        ];

        self.run_debug_ram(&program)
    }

    /// Write a CSR from the stub's tail word.
    pub(crate) fn csr_write(&mut self, csr: u32, value: u32) -> Result<(), RiscvError> {
        // 400: lw s0, 0x40c(zero)
        // 404: csrw <csr>, s0
        // 408: j <resume>
        // 40c: <value>
        let program = [
            assembly::lw(0x40c, ZERO, S0),
            assembly::csrrw(ZERO, csr, S0),
            assembly::resume_jump(2),
            value,
        ];

        self.run_debug_ram(&program)?;

        Ok(())
    }

    /// Read one word of target memory.
    pub(crate) fn mem_read32(&mut self, address: u32) -> Result<u32, RiscvError> {
        // 400: lw s0, 0x410(zero)
        // 404: lw s1, 0(s0)
        // 408: sw s1, 0x414(zero)
        // 40c: j <resume>
        // 410: <address>
        // 414: <result>
        let program = [
            assembly::lw(0x410, ZERO, S0),
            assembly::lw(0, S0, S1),
            assembly::sw(0x414, ZERO, S1),
            assembly::resume_jump(3),
            address,
        ];

        self.run_debug_ram(&program)
    }

    /// Write one word of target memory.
    pub(crate) fn mem_write32(&mut self, address: u32, value: u32) -> Result<(), RiscvError> {
        // 400: lw s0, 0x410(zero)
        // 404: lw s1, 0x414(zero)
        // 408: sw s1, 0(s0)
        // 40c: j <resume>
        // 410: <address>
        // 414: <value>
        let program = [
            assembly::lw(0x410, ZERO, S0),
            assembly::lw(0x414, ZERO, S1),
            assembly::sw(0, S0, S1),
            assembly::resume_jump(3),
            address,
            value,
        ];

        self.run_debug_ram(&program)?;

        Ok(())
    }

    /// Ask the hart to enter debug mode.
    pub(crate) fn halt(&mut self) -> Result<(), RiscvError> {
        // 400: csrsi dcsr, HALT
        // 404: j <resume>
        let program = [
            assembly::csrrsi(ZERO, DCSR, DCSR_HALT),
            assembly::resume_jump(1),
        ];

        self.run_debug_ram(&program)?;

        Ok(())
    }

    /// Leave debug mode, optionally arming a single step first.
    pub(crate) fn resume(&mut self, step: bool) -> Result<(), RiscvError> {
        // 400: csrsi dcsr, <set>
        // 404: csrci dcsr, <clear>
        // 408: j <resume>
        let (set, clear) = if step {
            (DCSR_STEP, DCSR_HALT)
        } else {
            (0, DCSR_HALT | DCSR_STEP)
        };
        let program = [
            assembly::csrrsi(ZERO, DCSR, set),
            assembly::csrrci(ZERO, DCSR, clear),
            assembly::resume_jump(2),
        ];

        self.run_debug_ram(&program)?;

        Ok(())
    }

    /// Raw `dmcontrol`, with INTERRUPT and HALTNOT in bits 33 and 32.
    pub(crate) fn read_dmcontrol(&mut self) -> Result<u64, RiscvError> {
        Ok(self.dtm.read(DMCONTROL)?)
    }

    /// Read a raw Debug RAM word.
    pub(crate) fn read_debug_ram(&mut self, word: u8) -> Result<u32, RiscvError> {
        Ok(self.dtm.read(word as u32)? as u32)
    }

    /// Write a raw Debug RAM word.
    pub(crate) fn write_debug_ram(&mut self, word: u8, value: u32) -> Result<(), RiscvError> {
        Ok(self.dtm.write(word as u32, value as u64)?)
    }

    /// Report and clear a latched debug bus error.
    pub(crate) fn check_error(&mut self) -> Result<bool, RiscvError> {
        Ok(self.dtm.check_error()?)
    }

    /// IDCODE of the TAP this hart sits behind.
    pub(crate) fn read_idcode(&mut self) -> Result<u32, RiscvError> {
        Ok(self.dtm.read_idcode()?)
    }
}
