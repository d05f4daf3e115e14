//! Driver for the Debug Transport Module (DTM) of 32-bit RISC-V harts
//! implementing the external debug support specification, draft 0.11
//! (Nov 12, 2016).
//!
//! On these harts every debug primitive (register access, memory access,
//! halting, stepping, hardware triggers) is synthesized by encoding short
//! RISC-V instruction sequences at run time, staging them in the on-target
//! Debug RAM through the serial debug bus, and running them to completion.
//! [`Riscv32`] is the control surface a debug server drives; the probe
//! hardware underneath is abstracted as [`JtagAccess`].
//!
//! ```no_run
//! use riscv_dtm::{JtagAccess, Riscv32, RiscvError};
//!
//! fn scan(probe: Box<dyn JtagAccess>) -> Result<(), RiscvError> {
//!     let mut target = Riscv32::new(probe)?;
//!     target.attach()?;
//!
//!     let sp = target.read_register(2)?;
//!     println!("sp = {:#010x}", sp);
//!     Ok(())
//! }
//! ```
//!
//! The driver refuses harts that do not report DTM version 0, debug module
//! version 1 and an already authenticated debug module; authentication
//! challenges and the 0.13+ abstract command interface are out of scope.

pub mod assembly;
pub mod communication_interface;
mod core;
pub mod dtm;
#[cfg(test)]
pub(crate) mod mock;
pub mod probe;
pub mod registers;
pub mod triggers;

pub use crate::communication_interface::{Dminfo, RiscvError};
pub use crate::core::{
    CoreStatus, HaltReason, Riscv32, REGISTER_FILE_SIZE, TARGET_DESCRIPTION,
};
pub use crate::dtm::{Dtmcontrol, IR_BYPASS, IR_DBUS, IR_DTMCONTROL, IR_IDCODE};
pub use crate::probe::{DebugProbeError, JtagAccess};
pub use crate::triggers::{Breakwatch, BreakwatchKind};
