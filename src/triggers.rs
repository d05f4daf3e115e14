//! Hardware trigger (breakpoint and watchpoint) provisioning.
//!
//! The trigger module is reached entirely through CSRs: a slot is selected
//! with `tselect`, probed through `tdata1` (read as `mcontrol` for address
//! match triggers) and armed by writing `mcontrol` and the match address in
//! `tdata2`.

use tracing::debug;

use crate::communication_interface::{RiscvCommunicationInterface, RiscvError};
use crate::registers::{Mcontrol, MCONTROL, TDATA2, TSELECT};

/// Trigger type reported by `tdata1[31:28]` for address match triggers.
const TRIGGER_TYPE_MATCH: u32 = 2;
/// `mcontrol.action` value that enters debug mode instead of raising a
/// breakpoint exception.
const ACTION_DEBUG_MODE: u32 = 1;

/// Kind of breakpoint or watchpoint requested by the generic debug layer.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BreakwatchKind {
    /// A software breakpoint. Not handled by this driver.
    Software,
    /// Hardware breakpoint on instruction execution.
    Execute,
    /// Watchpoint on loads.
    Load,
    /// Watchpoint on stores.
    Store,
    /// Watchpoint on any data access.
    Access,
}

impl BreakwatchKind {
    /// The (execute, store, load) match bits for this kind.
    fn match_bits(self) -> Result<(bool, bool, bool), RiscvError> {
        match self {
            BreakwatchKind::Execute => Ok((true, false, false)),
            BreakwatchKind::Store => Ok((false, true, false)),
            BreakwatchKind::Load => Ok((false, false, true)),
            BreakwatchKind::Access => Ok((false, true, true)),
            BreakwatchKind::Software => {
                Err(RiscvError::UnsupportedBreakwatchKind(self))
            }
        }
    }
}

/// An installed trigger, remembering the slot it occupies.
#[derive(Debug)]
pub struct Breakwatch {
    /// The matched address.
    pub address: u32,
    /// The kind the trigger was armed for.
    pub kind: BreakwatchKind,
    /// The `tselect` index holding the trigger.
    slot: u32,
}

/// Install a trigger for `kind` at `address`, leaving `tselect` as it was.
pub(crate) fn set(
    interface: &mut RiscvCommunicationInterface,
    kind: BreakwatchKind,
    address: u32,
) -> Result<Breakwatch, RiscvError> {
    let (execute, store, load) = kind.match_bits()?;

    let saved = interface.csr_read(TSELECT)?;
    let result = install(interface, kind, address, execute, store, load);
    interface.csr_write(TSELECT, saved)?;

    result
}

/// Remove a previously installed trigger, leaving `tselect` as it was.
pub(crate) fn clear(
    interface: &mut RiscvCommunicationInterface,
    breakwatch: &Breakwatch,
) -> Result<(), RiscvError> {
    let saved = interface.csr_read(TSELECT)?;
    let result = disarm(interface, breakwatch.slot);
    interface.csr_write(TSELECT, saved)?;

    result
}

fn install(
    interface: &mut RiscvCommunicationInterface,
    kind: BreakwatchKind,
    address: u32,
    execute: bool,
    store: bool,
    load: bool,
) -> Result<Breakwatch, RiscvError> {
    let slot = allocate(interface)?;

    let mut mcontrol = Mcontrol(0);
    mcontrol.set_dmode(true);
    mcontrol.set_action(ACTION_DEBUG_MODE);
    mcontrol.set_m(true);
    mcontrol.set_h(true);
    mcontrol.set_s(true);
    mcontrol.set_u(true);
    mcontrol.set_execute(execute);
    mcontrol.set_store(store);
    mcontrol.set_load(load);

    debug!(
        "arming trigger slot {} at {:#010x} with mcontrol {:#010x}",
        slot, address, mcontrol.0
    );
    interface.csr_write(MCONTROL, mcontrol.0)?;
    interface.csr_write(TDATA2, address)?;

    Ok(Breakwatch {
        address,
        kind,
        slot,
    })
}

fn disarm(interface: &mut RiscvCommunicationInterface, slot: u32) -> Result<(), RiscvError> {
    interface.csr_write(TSELECT, slot)?;
    interface.csr_write(MCONTROL, 0)
}

/// Walk `tselect` upwards until a free address match slot appears.
fn allocate(interface: &mut RiscvCommunicationInterface) -> Result<u32, RiscvError> {
    for slot in 0.. {
        interface.csr_write(TSELECT, slot)?;
        if interface.csr_read(TSELECT)? != slot {
            // Ran off the end of the implemented slots.
            return Err(RiscvError::TriggerUnavailable);
        }

        let tdata1 = Mcontrol(interface.csr_read(MCONTROL)?);
        if tdata1.trigger_type() == 0 {
            return Err(RiscvError::TriggerUnavailable);
        }
        if tdata1.trigger_type() == TRIGGER_TYPE_MATCH && !tdata1.enabled() {
            debug!("trigger slot {} is free", slot);
            return Ok(slot);
        }
    }

    unreachable!()
}
