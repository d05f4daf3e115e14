//! Probe access used by the DTM.
//!
//! The driver does not drive TCK/TMS/TDI itself. It talks to the attached
//! JTAG probe through [`JtagAccess`], which selects IR registers and shifts
//! DR bits on its behalf.

use bitvec::vec::BitVec;
use thiserror::Error;

/// Errors reported by a [`JtagAccess`] implementation.
#[derive(Error, Debug)]
pub enum DebugProbeError {
    /// An error which is specific to the probe in use occurred.
    #[error("an error specific to the probe occurred")]
    ProbeSpecific(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The probe does not implement the requested functionality.
    #[error("the functionality '{function_name}' is not implemented by this probe")]
    NotImplemented {
        /// Name of the unimplemented function.
        function_name: &'static str,
    },
}

/// Low-level JTAG access as required by the DTM.
///
/// An implementation sits on top of the actual TAP state machine. It must
/// track the currently selected IR value so that consecutive accesses to the
/// same register only shift the DR, and it must clock the configured number
/// of run-test/idle cycles after every DR shift.
pub trait JtagAccess: std::fmt::Debug {
    /// Read a JTAG register.
    ///
    /// This function emulates a read by performing a write with all zeros to
    /// the DR.
    fn read_register(&mut self, address: u32, len: u32) -> Result<BitVec, DebugProbeError> {
        let data = vec![0u8; len.div_ceil(8) as usize];

        self.write_register(address, &data, len)
    }

    /// Write to a JTAG register.
    ///
    /// This will perform a write to the IR register, if necessary, to select
    /// the correct register, and then to the DR register, to transmit the
    /// data. The data shifted out of the DR register will be returned.
    fn write_register(
        &mut self,
        address: u32,
        data: &[u8],
        len: u32,
    ) -> Result<BitVec, DebugProbeError>;

    /// Configure the number of run-test/idle cycles the probe clocks after
    /// each access to the DR register.
    fn set_idle_cycles(&mut self, idle_cycles: u8) -> Result<(), DebugProbeError>;

    /// Return the currently configured idle cycles.
    fn idle_cycles(&self) -> u8;
}
