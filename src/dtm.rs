//! Debug Transport Module (DTM) handling
//!
//! The DTM is the JTAG-visible front door to the hart's debug subsystem. A
//! transaction on its serial debug bus (`dbus`) is one DR shift of
//! `abits + 36` bits carrying an address, 34 bits of data and a 2-bit
//! opcode; the bits shifted back out carry the result of the previous
//! transaction and a 2-bit completion status.

use bitfield::bitfield;
use bitvec::field::BitField;
use tracing::{debug, trace, warn};

use crate::communication_interface::RiscvError;
use crate::probe::{DebugProbeError, JtagAccess};

/// IR value of the identification code register.
pub const IR_IDCODE: u32 = 0x01;
/// IR value of the `dtmcontrol` register.
pub const IR_DTMCONTROL: u32 = 0x10;
/// IR value of the `dbus` register.
pub const IR_DBUS: u32 = 0x11;
/// IR value of the bypass register.
pub const IR_BYPASS: u32 = 0x1f;

/// Width of the `dtmcontrol` DR.
const DTMCONTROL_WIDTH: u32 = 32;

/// Offset of the address field in a `dbus` shift.
const DBUS_ADDRESS_BIT_OFFSET: u32 = 36;
/// Offset of the data field in a `dbus` shift.
const DBUS_VALUE_BIT_OFFSET: u32 = 2;

const DBUS_OP_MASK: u128 = 0x3;

/// Mask of the 34-bit data field of a `dbus` shift.
pub const DBUS_DATA_MASK: u64 = 0x3_ffff_ffff;

bitfield! {
    /// The `dtmcontrol` register of a version 0 DTM.
    pub struct Dtmcontrol(u32);
    impl Debug;

    pub _, set_dbusreset: 16;
    pub abits_high, _: 14, 13;
    pub idle, _: 12, 10;
    pub dbusstat, _: 9, 8;
    pub abits_low, _: 7, 4;
    pub version, _: 3, 0;
}

impl Dtmcontrol {
    /// Number of address bits in a `dbus` shift, split across two fields.
    pub fn abits(&self) -> u32 {
        self.abits_high() << 4 | self.abits_low()
    }
}

/// Opcode field of a `dbus` shift.
#[derive(Copy, Clone, Debug)]
pub enum DbusOperation {
    Nop = 0,
    Read = 1,
    Write = 2,
}

/// Possible values of the status field of a `dbus` response.
#[derive(Debug, PartialEq, Eq)]
pub enum DbusOperationStatus {
    Ok = 0,
    Reserved = 1,
    Failed = 2,
    Busy = 3,
}

impl DbusOperationStatus {
    fn parse(value: u8) -> Option<Self> {
        let status = match value {
            0 => Self::Ok,
            1 => Self::Reserved,
            2 => Self::Failed,
            3 => Self::Busy,
            _ => return None,
        };

        Some(status)
    }
}

/// Serial debug bus master.
///
/// Owns the probe for the duration of the attachment and performs all
/// `dbus` traffic, including sticky-error bookkeeping and busy recovery.
#[derive(Debug)]
pub struct JtagDtm {
    probe: Box<dyn JtagAccess>,

    /// Number of address bits in a `dbus` shift.
    abits: u32,

    /// Run-test/idle cycles required between shifts.
    idle: u8,

    /// The most recently committed `dbus` payload, replayed after a busy
    /// recovery.
    last_dbus: u128,

    /// Latched failure. While set, all `dbus` traffic is suppressed.
    error: bool,
}

impl JtagDtm {
    /// Scan the DTM through `dtmcontrol` and prepare the `dbus` for traffic.
    ///
    /// Refuses DTMs reporting a version other than 0.
    pub(crate) fn new(mut probe: Box<dyn JtagAccess>) -> Result<Self, RiscvError> {
        let dtmcontrol_raw = probe.read_register(IR_DTMCONTROL, DTMCONTROL_WIDTH)?;
        let dtmcontrol = Dtmcontrol(dtmcontrol_raw.load_le::<u32>());

        debug!("dtmcontrol: {:?}", dtmcontrol);

        if dtmcontrol.version() != 0 {
            return Err(RiscvError::UnsupportedDebugTransportModuleVersion(
                dtmcontrol.version() as u8,
            ));
        }

        let abits = dtmcontrol.abits();
        let idle = dtmcontrol.idle() as u8;
        debug!(
            "abits = {}, idle = {}, dbusstat = {}",
            abits,
            idle,
            dtmcontrol.dbusstat()
        );

        // The probe inserts the idle cycles after every DR shift from here
        // on.
        probe.set_idle_cycles(idle)?;

        let mut dtm = Self {
            probe,
            abits,
            idle,
            last_dbus: 0,
            error: false,
        };

        dtm.dbus_reset()?;

        Ok(dtm)
    }

    /// Number of address bits in a `dbus` shift.
    pub fn abits(&self) -> u32 {
        self.abits
    }

    /// Run-test/idle cycles the DTM requires between shifts.
    pub fn idle(&self) -> u8 {
        self.idle
    }

    /// Shift `dtmcontrol` with DBUSRESET set, aborting any outstanding
    /// transaction and clearing the error latch on the hart side.
    fn dbus_reset(&mut self) -> Result<(), DebugProbeError> {
        let mut dtmcontrol = Dtmcontrol(0);
        dtmcontrol.set_dbusreset(true);

        let Dtmcontrol(reg_value) = dtmcontrol;
        let bytes = reg_value.to_le_bytes();

        let response = self
            .probe
            .write_register(IR_DTMCONTROL, &bytes, DTMCONTROL_WIDTH)?;
        trace!("after dbusreset: dtmcontrol = {:#010x}", response.load_le::<u32>());

        Ok(())
    }

    /// One DR shift through the `dbus` register.
    fn shift_dbus(&mut self, payload: u128) -> Result<u128, DebugProbeError> {
        let bytes = payload.to_le_bytes();
        let bit_size = self.abits + DBUS_ADDRESS_BIT_OFFSET;

        let response = self.probe.write_register(IR_DBUS, &bytes, bit_size)?;

        Ok(response.load_le::<u128>())
    }

    /// One `dbus` transaction, with busy recovery.
    ///
    /// A busy status aborts the shifted transaction on the hart side, so the
    /// recovery resets the bus and replays `last_dbus` before the current
    /// payload is issued again. A failed status latches the sticky error
    /// flag; once latched, all traffic is suppressed and reads as zero until
    /// [`JtagDtm::check_error`] runs.
    fn dbus_access(&mut self, dbus: u128) -> Result<u64, DebugProbeError> {
        if self.error {
            return Ok(0);
        }

        loop {
            let response = self.shift_dbus(dbus)?;

            let status = DbusOperationStatus::parse((response & DBUS_OP_MASK) as u8)
                .expect("status is a 2-bit field");

            match status {
                DbusOperationStatus::Ok => {
                    self.last_dbus = dbus;
                    return Ok((response >> DBUS_VALUE_BIT_OFFSET) as u64 & DBUS_DATA_MASK);
                }
                DbusOperationStatus::Busy => {
                    warn!("dbus busy, replaying {:#x}", self.last_dbus);
                    self.dbus_reset()?;
                    self.shift_dbus(self.last_dbus)?;
                }
                DbusOperationStatus::Failed | DbusOperationStatus::Reserved => {
                    warn!("dbus access failed (status {:?})", status);
                    self.error = true;
                    return Ok(0);
                }
            }
        }
    }

    /// Write 34 bits of data to `address` on the debug bus.
    pub(crate) fn write(&mut self, address: u32, value: u64) -> Result<(), DebugProbeError> {
        let dbus = (address as u128) << DBUS_ADDRESS_BIT_OFFSET
            | ((value & DBUS_DATA_MASK) as u128) << DBUS_VALUE_BIT_OFFSET
            | DbusOperation::Write as u128;

        self.dbus_access(dbus)?;

        Ok(())
    }

    /// Read 34 bits of data from `address` on the debug bus.
    ///
    /// A read is pipelined over two shifts: the first arms the access, a
    /// following nop collects the captured data.
    pub(crate) fn read(&mut self, address: u32) -> Result<u64, DebugProbeError> {
        let dbus =
            (address as u128) << DBUS_ADDRESS_BIT_OFFSET | DbusOperation::Read as u128;

        self.dbus_access(dbus)?;
        self.dbus_access(DbusOperation::Nop as u128)
    }

    /// Report and clear a latched bus error.
    ///
    /// Resets the debug bus first so that the next transaction starts from a
    /// clean slate.
    pub(crate) fn check_error(&mut self) -> Result<bool, DebugProbeError> {
        if !self.error {
            return Ok(false);
        }

        self.dbus_reset()?;
        self.error = false;

        Ok(true)
    }

    /// Read the identification code through IR 0x01.
    pub(crate) fn read_idcode(&mut self) -> Result<u32, DebugProbeError> {
        let value = self.probe.read_register(IR_IDCODE, 32)?;

        Ok(value.load_le::<u32>())
    }
}
