//! CSR addresses and register layouts of the debug and trigger modules.

use bitfield::bitfield;

/// Debug control and status register.
pub const DCSR: u32 = 0x7b0;
/// Debug program counter.
pub const DPC: u32 = 0x7b1;
/// Debug scratch register, shadows `s0` while the hart is in debug mode.
pub const DSCRATCH: u32 = 0x7b2;
/// Trigger select register.
pub const TSELECT: u32 = 0x7a0;
/// First trigger data register, reads as `mcontrol` for address match
/// triggers.
pub const MCONTROL: u32 = 0x7a1;
/// Second trigger data register, holds the match address.
pub const TDATA2: u32 = 0x7a2;

/// `dcsr.halt`, requests and acknowledges debug mode. Usable as a `csrsi`
/// immediate.
pub(crate) const DCSR_HALT: u32 = 1 << 3;
/// `dcsr.step`, arms a single step on the next resume. Usable as a `csrsi`
/// immediate.
pub(crate) const DCSR_STEP: u32 = 1 << 2;

bitfield! {
    /// The `dcsr` register.
    pub struct Dcsr(u32);
    impl Debug;

    pub xdebugver, _: 31, 30;
    pub _, set_ndreset: 29;
    pub _, set_fullreset: 28;
    pub ebreakm, set_ebreakm: 15;
    pub ebreakh, set_ebreakh: 14;
    pub ebreaks, set_ebreaks: 13;
    pub ebreaku, set_ebreaku: 12;
    pub cause, _: 8, 6;
    pub debugint, _: 5;
    pub halt, set_halt: 3;
    pub step, set_step: 2;
    pub prv, set_prv: 1, 0;
}

bitfield! {
    /// The `mcontrol` view of `tdata1` for address match triggers.
    pub struct Mcontrol(u32);
    impl Debug;

    pub trigger_type, _: 31, 28;
    pub dmode, set_dmode: 27;
    pub action, set_action: 15, 12;
    pub chain, set_chain: 11;
    pub match_kind, set_match_kind: 10, 7;
    pub m, set_m: 6;
    pub h, set_h: 5;
    pub s, set_s: 4;
    pub u, set_u: 3;
    pub execute, set_execute: 2;
    pub store, set_store: 1;
    pub load, set_load: 0;
}

impl Mcontrol {
    /// Whether the trigger fires in any privilege mode.
    pub fn enabled(&self) -> bool {
        self.m() || self.h() || self.s() || self.u()
    }
}
