//! The register model (§4.3): four general-purpose registers plus three
//! special-purpose ones. `Registers` is the "teaching allocator" §9 asks
//! to keep simple — a bitset, `find-free` scanning from register 0 up, no
//! graph coloring.

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Reg {
    X0,
    X1,
    X2,
    X3,
    /// Return-address register.
    Ra,
    /// Result register: binary ops and function returns land here.
    Xr,
    /// Stack pointer.
    Sp,
}

impl Reg {
    pub fn nibble(self) -> u8 {
        match self {
            Reg::X0 => 0,
            Reg::X1 => 1,
            Reg::X2 => 2,
            Reg::X3 => 3,
            Reg::Ra => 4,
            Reg::Xr => 5,
            Reg::Sp => 6,
        }
    }

    pub fn from_nibble(n: u8) -> Option<Reg> {
        Some(match n {
            0 => Reg::X0,
            1 => Reg::X1,
            2 => Reg::X2,
            3 => Reg::X3,
            4 => Reg::Ra,
            5 => Reg::Xr,
            6 => Reg::Sp,
            _ => return None,
        })
    }

    /// The four general-purpose registers, in allocation order.
    pub const GENERAL_PURPOSE: [Reg; 4] = [Reg::X0, Reg::X1, Reg::X2, Reg::X3];
}

bitflags! {
    /// Which general-purpose registers are currently allocated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegSet: u8 {
        const X0 = 0b0001;
        const X1 = 0b0010;
        const X2 = 0b0100;
        const X3 = 0b1000;
    }
}

impl RegSet {
    fn bit_for(reg: Reg) -> Option<RegSet> {
        match reg {
            Reg::X0 => Some(RegSet::X0),
            Reg::X1 => Some(RegSet::X1),
            Reg::X2 => Some(RegSet::X2),
            Reg::X3 => Some(RegSet::X3),
            _ => None,
        }
    }
}

/// Tracks which general-purpose registers are in use during emission of one
/// expression (§4.3's "Register allocation").
#[derive(Debug, Default, Clone, Copy)]
pub struct Registers {
    used: RegSet,
}

impl Registers {
    pub fn new() -> Registers { Registers { used: RegSet::empty() } }

    /// Scans from `X0` upward for a free register, marking it used. Returns
    /// `None` if all four are occupied — callers treat this as a hard
    /// internal error (the language has no expression complex enough to
    /// exhaust all four in its own right; it would indicate an emitter bug).
    pub fn alloc(&mut self) -> Option<Reg> {
        for &r in Reg::GENERAL_PURPOSE.iter() {
            let bit = RegSet::bit_for(r).unwrap();
            if !self.used.contains(bit) {
                self.used.insert(bit);
                return Some(r);
            }
        }
        None
    }

    pub fn free(&mut self, reg: Reg) {
        if let Some(bit) = RegSet::bit_for(reg) {
            self.used.remove(bit);
        }
    }

    pub fn is_free(&self, reg: Reg) -> bool {
        RegSet::bit_for(reg).map(|b| !self.used.contains(b)).unwrap_or(true)
    }
}
