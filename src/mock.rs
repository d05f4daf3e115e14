//! A software model of a version 0 DTM and its hart, for the unit tests.
//!
//! The model mirrors the hardware the driver was written against: 17 words
//! of Debug RAM at 0x400, a debug ROM resume vector at 0x804, and a `dbus`
//! whose shifts return the result of the previous transaction together with
//! the live INTERRUPT/HALTNOT flags. Writing a Debug RAM word with the
//! interrupt flag runs the staged stub through a small RV32I interpreter.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bitvec::field::BitField;
use bitvec::vec::BitVec;

use crate::dtm::{IR_DBUS, IR_DTMCONTROL, IR_IDCODE};
use crate::probe::{DebugProbeError, JtagAccess};
use crate::registers::{DCSR, DCSR_HALT, MCONTROL, TDATA2, TSELECT};

#[derive(Debug)]
pub(crate) struct MockState {
    /// Value returned for `dtmcontrol` shifts.
    pub dtmcontrol: u32,
    /// Value returned for `dbus` reads of `dminfo`.
    pub dminfo: u32,
    /// Value returned for IDCODE shifts.
    pub idcode: u32,

    /// Debug RAM words, `dbus` addresses 0..=16.
    pub dram: [u32; 17],
    /// Set while a staged stub has not reached the resume vector.
    pub interrupt: bool,
    /// The hart-is-halted flag reported in bit 32 of every response.
    pub haltnot: bool,
    /// Whether writing `dcsr.halt` raises HALTNOT immediately. Cleared to
    /// model the lag between a halt request and the flag.
    pub haltnot_tracks_halt: bool,

    /// General purpose registers of the modeled hart.
    pub regs: [u32; 32],
    /// CSRs of the modeled hart.
    pub csrs: HashMap<u32, u32>,
    /// Word-addressed system memory.
    pub memory: HashMap<u32, u32>,

    /// Currently selected trigger slot.
    pub tselect: u32,
    /// Implemented trigger slots as (`mcontrol`, `tdata2`) pairs.
    pub triggers: Vec<(u32, u32)>,

    /// Statuses injected into upcoming `dbus` shifts; 0 entries and an
    /// empty queue mean normal processing.
    pub status_script: VecDeque<u8>,

    /// Every DR shift observed, as (IR, payload).
    pub shifts: Vec<(u32, u128)>,
    /// Number of DBUSRESET writes observed.
    pub dbus_resets: usize,
    /// Idle cycles most recently configured by the driver.
    pub idle_cycles: u8,

    /// Response captured by the previous `dbus` transaction.
    pending: u64,
}

impl MockState {
    fn new() -> Self {
        Self {
            // version 0, abits = 6, idle = 5
            dtmcontrol: 0x1460,
            // loversion = 1, authenticated, dramsize = 16
            dminfo: 16 << 10 | 1 << 5 | 1,
            idcode: 0x2000_0913,
            dram: [0; 17],
            interrupt: false,
            haltnot: false,
            haltnot_tracks_halt: true,
            regs: [0; 32],
            csrs: HashMap::new(),
            memory: HashMap::new(),
            tselect: 0,
            // Two address match slots, disarmed.
            triggers: vec![(2 << 28, 0), (2 << 28, 0)],
            status_script: VecDeque::new(),
            shifts: Vec::new(),
            dbus_resets: 0,
            idle_cycles: 0,
            pending: 0,
        }
    }

    fn flags(&self) -> u64 {
        (self.interrupt as u64) << 33 | (self.haltnot as u64) << 32
    }

    fn bus_value(&self, address: u32) -> u32 {
        match address {
            0..=16 => self.dram[address as usize],
            0x11 => self.dminfo,
            _ => 0,
        }
    }

    fn dbus_shift(&mut self, payload: u128) -> u128 {
        if let Some(status) = self.status_script.pop_front() {
            if status != 0 {
                return status as u128;
            }
        }

        let response = (self.pending as u128) << 2;
        self.pending = 0;

        let op = (payload & 3) as u8;
        let address = (payload >> 36) as u32;
        let data = (payload >> 2) as u64 & 0x3_ffff_ffff;

        match op {
            // A read captures its data for the following shift.
            1 => self.pending = self.flags() | self.bus_value(address) as u64,
            2 => {
                if let 0..=16 = address {
                    self.dram[address as usize] = data as u32;
                    if data & 1 << 33 != 0 {
                        self.interrupt = true;
                        self.run();
                    }
                }
            }
            _ => {}
        }

        response
    }

    /// Execute the staged stub until it jumps back to the resume vector.
    fn run(&mut self) {
        let mut pc: u32 = 0x400;

        for _ in 0..64 {
            let insn = self.load(pc);
            match insn & 0x7f {
                // lw
                0x03 => {
                    let rd = (insn >> 7 & 0x1f) as usize;
                    let base = (insn >> 15 & 0x1f) as usize;
                    let offset = insn >> 20;
                    let value = self.load(self.regs[base].wrapping_add(offset));
                    if rd != 0 {
                        self.regs[rd] = value;
                    }
                    pc += 4;
                }
                // sw
                0x23 => {
                    let base = (insn >> 15 & 0x1f) as usize;
                    let source = (insn >> 20 & 0x1f) as usize;
                    let offset = (insn >> 25) << 5 | insn >> 7 & 0x1f;
                    let address = self.regs[base].wrapping_add(offset);
                    let value = self.regs[source];
                    self.store(address, value);
                    pc += 4;
                }
                // csr operations
                0x73 => {
                    let rd = (insn >> 7 & 0x1f) as usize;
                    let function = insn >> 12 & 0x7;
                    let source = insn >> 15 & 0x1f;
                    let csr = insn >> 20;
                    let old = self.csr_value(csr);
                    let new = match function {
                        0b001 => Some(self.regs[source as usize]),
                        0b010 => (source != 0).then(|| old | self.regs[source as usize]),
                        0b011 => (source != 0).then(|| old & !self.regs[source as usize]),
                        0b101 => Some(source),
                        0b110 => (source != 0).then(|| old | source),
                        0b111 => (source != 0).then(|| old & !source),
                        _ => panic!("unhandled csr function {}", function),
                    };
                    if let Some(new) = new {
                        self.csr_set(csr, new);
                    }
                    if rd != 0 {
                        self.regs[rd] = old;
                    }
                    pc += 4;
                }
                // jal; the stubs only ever jump home
                0x6f => {
                    let target = pc.wrapping_add(jal_offset(insn));
                    assert_eq!(target, 0x804, "stub jumped somewhere unexpected");
                    self.interrupt = false;
                    return;
                }
                _ => panic!("unhandled instruction {:#010x} at {:#x}", insn, pc),
            }
        }

        panic!("runaway debug RAM stub");
    }

    fn load(&self, address: u32) -> u32 {
        if (0x400..0x444).contains(&address) {
            self.dram[((address - 0x400) / 4) as usize]
        } else {
            self.memory.get(&address).copied().unwrap_or(0)
        }
    }

    fn store(&mut self, address: u32, value: u32) {
        if (0x400..0x444).contains(&address) {
            self.dram[((address - 0x400) / 4) as usize] = value;
        } else {
            self.memory.insert(address, value);
        }
    }

    fn csr_value(&self, csr: u32) -> u32 {
        match csr {
            TSELECT => self.tselect,
            MCONTROL => self
                .triggers
                .get(self.tselect as usize)
                .map(|t| t.0)
                .unwrap_or(0),
            TDATA2 => self
                .triggers
                .get(self.tselect as usize)
                .map(|t| t.1)
                .unwrap_or(0),
            _ => self.csrs.get(&csr).copied().unwrap_or(0),
        }
    }

    fn csr_set(&mut self, csr: u32, value: u32) {
        match csr {
            TSELECT => {
                // Writes beyond the implemented slots leave the selection
                // clamped to the last one.
                let limit = self.triggers.len() as u32;
                self.tselect = if value < limit {
                    value
                } else {
                    limit.saturating_sub(1)
                };
            }
            MCONTROL => {
                if let Some(trigger) = self.triggers.get_mut(self.tselect as usize) {
                    trigger.0 = value;
                }
            }
            TDATA2 => {
                if let Some(trigger) = self.triggers.get_mut(self.tselect as usize) {
                    trigger.1 = value;
                }
            }
            DCSR => {
                let old = self.csrs.get(&DCSR).copied().unwrap_or(0);
                if value & DCSR_HALT != 0 && self.haltnot_tracks_halt {
                    self.haltnot = true;
                }
                if old & DCSR_HALT != 0 && value & DCSR_HALT == 0 {
                    self.haltnot = false;
                }
                self.csrs.insert(DCSR, value);
            }
            _ => {
                self.csrs.insert(csr, value);
            }
        }
    }
}

fn jal_offset(insn: u32) -> u32 {
    (insn >> 31 & 1) << 20
        | (insn >> 12 & 0xff) << 12
        | (insn >> 20 & 1) << 11
        | (insn >> 21 & 0x3ff) << 1
}

/// Mock probe handed to the driver. Clones share the same [`MockState`] so
/// that tests can inspect and prime the model while the driver owns a copy.
#[derive(Debug, Clone)]
pub(crate) struct MockJtag {
    pub state: Rc<RefCell<MockState>>,
}

impl MockJtag {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::new())),
        }
    }
}

impl JtagAccess for MockJtag {
    fn write_register(
        &mut self,
        address: u32,
        data: &[u8],
        len: u32,
    ) -> Result<BitVec, DebugProbeError> {
        let mut state = self.state.borrow_mut();

        let mut payload = 0u128;
        for (i, byte) in data.iter().enumerate().take(16) {
            payload |= (*byte as u128) << (8 * i);
        }
        if len < 128 {
            payload &= (1u128 << len) - 1;
        }
        state.shifts.push((address, payload));

        let response = match address {
            IR_IDCODE => state.idcode as u128,
            IR_DTMCONTROL => {
                if payload & 1 << 16 != 0 {
                    state.dbus_resets += 1;
                }
                state.dtmcontrol as u128
            }
            IR_DBUS => state.dbus_shift(payload),
            _ => 0,
        };

        let mut bits = BitVec::repeat(false, len as usize);
        bits.store_le(response);
        Ok(bits)
    }

    fn set_idle_cycles(&mut self, idle_cycles: u8) -> Result<(), DebugProbeError> {
        self.state.borrow_mut().idle_cycles = idle_cycles;
        Ok(())
    }

    fn idle_cycles(&self) -> u8 {
        self.state.borrow().idle_cycles
    }
}
