//! Resource allocation plan.
//!
//! Every semantic quantity the kernel keeps in a register has a fixed slot.
//! Per-thread state lives in register file A; values every thread computes
//! identically (counts, increments, strides) live in register file B so the
//! two read ports can serve one of each per instruction.
//!
//! Two placement rules are hardware constraints:
//!
//! - unpack only applies to file-A reads, so any role read through an unpack
//!   (the coordinate pair, the colour sample) must be in A;
//! - the B read port doubles as the small-immediate field, so a broadcast
//!   value multiplied against an immediate in one instruction is pinned to A.

use serde::{Deserialize, Serialize};

use crate::asm::{Bank, Dst, Src};
use crate::error::PlanError;

/// How a role's value relates across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sharing {
    /// Differs per thread.
    PerThread,
    /// Identical in every thread.
    Broadcast,
    /// Identical in every thread but pinned to file A.
    PinnedBroadcast,
}

/// Register slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    /// Register file.
    pub bank: Bank,
    /// Register number.
    pub index: u8,
}

impl Slot {
    const fn a(index: u8) -> Self {
        Self {
            bank: Bank::A,
            index,
        }
    }

    const fn b(index: u8) -> Self {
        Self {
            bank: Bank::B,
            index,
        }
    }
}

/// Semantic register roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Thread index 0..N.
    ThreadIndex,
    /// Address of the texture-configuration words in this thread's uniforms.
    TextureConfigAddr,
    /// Next displacement-map fetch address (per lane).
    MapAddr,
    /// Output address of the Y plane.
    YAddr,
    /// Output address of the U plane.
    UAddr,
    /// Output address of the V plane.
    VAddr,
    /// Tile-column loop counter.
    TileColCounter,
    /// Tile-row loop counter.
    TileRowCounter,
    /// Fetched fixed-point coordinate pair.
    Coord,
    /// Luma working vector.
    Luma,
    /// Chroma-U accumulator.
    ChromaU,
    /// Chroma-V accumulator.
    ChromaV,
    /// Fetched colour sample.
    Sample,
    /// Luma scratch write setup of this thread.
    LumaWriteSetup,
    /// Chroma scratch write setup of this thread.
    ChromaWriteSetup,
    /// 1/65535 as f32.
    Reciprocal,
    /// Tile-column count.
    TileColCount,
    /// Tile-row count.
    TileRowCount,
    /// Map address step per fetch.
    MapIncrement,
    /// Y address step per half-tile.
    LumaColIncrement,
    /// U/V address step per half-tile.
    ChromaColIncrement,
    /// Y address step per tile row.
    LumaRowIncrement,
    /// U/V address step per tile row.
    ChromaRowIncrement,
    /// Y store stride.
    LumaStoreStride,
    /// U/V store stride.
    ChromaStoreStride,
}

impl Role {
    /// Every role, in slot order.
    pub const ALL: [Self; 25] = [
        Self::ThreadIndex,
        Self::TextureConfigAddr,
        Self::MapAddr,
        Self::YAddr,
        Self::UAddr,
        Self::VAddr,
        Self::TileColCounter,
        Self::TileRowCounter,
        Self::Coord,
        Self::Luma,
        Self::ChromaU,
        Self::ChromaV,
        Self::Sample,
        Self::LumaWriteSetup,
        Self::ChromaWriteSetup,
        Self::Reciprocal,
        Self::TileColCount,
        Self::TileRowCount,
        Self::MapIncrement,
        Self::LumaColIncrement,
        Self::ChromaColIncrement,
        Self::LumaRowIncrement,
        Self::ChromaRowIncrement,
        Self::LumaStoreStride,
        Self::ChromaStoreStride,
    ];

    /// Fixed slot of this role.
    #[must_use]
    pub const fn slot(self) -> Slot {
        match self {
            Self::ThreadIndex => Slot::a(1),
            Self::TextureConfigAddr => Slot::a(2),
            Self::MapAddr => Slot::a(3),
            Self::YAddr => Slot::a(4),
            Self::UAddr => Slot::a(5),
            Self::VAddr => Slot::a(6),
            Self::TileColCounter => Slot::a(7),
            Self::TileRowCounter => Slot::a(8),
            Self::Coord => Slot::a(9),
            Self::Luma => Slot::a(10),
            Self::ChromaU => Slot::a(11),
            Self::ChromaV => Slot::a(12),
            Self::Sample => Slot::a(15),
            Self::LumaWriteSetup => Slot::a(16),
            Self::ChromaWriteSetup => Slot::a(17),
            Self::Reciprocal => Slot::a(18),
            Self::TileColCount => Slot::b(7),
            Self::TileRowCount => Slot::b(8),
            Self::MapIncrement => Slot::b(9),
            Self::LumaColIncrement => Slot::b(10),
            Self::ChromaColIncrement => Slot::b(11),
            Self::LumaRowIncrement => Slot::b(12),
            Self::ChromaRowIncrement => Slot::b(13),
            Self::LumaStoreStride => Slot::b(14),
            Self::ChromaStoreStride => Slot::b(15),
        }
    }

    /// Cross-thread sharing of this role.
    #[must_use]
    pub const fn sharing(self) -> Sharing {
        match self {
            Self::Reciprocal => Sharing::PinnedBroadcast,
            Self::TileColCount
            | Self::TileRowCount
            | Self::MapIncrement
            | Self::LumaColIncrement
            | Self::ChromaColIncrement
            | Self::LumaRowIncrement
            | Self::ChromaRowIncrement
            | Self::LumaStoreStride
            | Self::ChromaStoreStride => Sharing::Broadcast,
            _ => Sharing::PerThread,
        }
    }

    /// True when the kernel reads this role through an unpack.
    #[must_use]
    pub const fn read_unpacked(self) -> bool {
        matches!(self, Self::Coord | Self::Sample)
    }

    /// Read operand.
    #[must_use]
    pub const fn src(self) -> Src {
        let slot = self.slot();
        Src::Reg(slot.bank, slot.index)
    }

    /// Write operand.
    #[must_use]
    pub const fn dst(self) -> Dst {
        let slot = self.slot();
        Dst::Reg(slot.bank, slot.index)
    }

    /// Read and write operands, for loop counters.
    #[must_use]
    pub const fn rw(self) -> (Dst, Src) {
        (self.dst(), self.src())
    }
}

/// One row of the plan table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Role.
    pub role: Role,
    /// Slot.
    pub slot: Slot,
    /// Sharing.
    pub sharing: Sharing,
}

/// Register allocation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPlan {
    /// Assignments in slot order.
    pub assignments: Vec<Assignment>,
}

impl RegisterPlan {
    /// The kernel's fixed plan.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            assignments: Role::ALL
                .iter()
                .map(|&role| Assignment {
                    role,
                    slot: role.slot(),
                    sharing: role.sharing(),
                })
                .collect(),
        }
    }

    /// Slot assigned to `role`, if present.
    #[must_use]
    pub fn slot_of(&self, role: Role) -> Option<Slot> {
        self.assignments
            .iter()
            .find(|a| a.role == role)
            .map(|a| a.slot)
    }

    /// Checks the placement rules.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), PlanError> {
        for (i, a) in self.assignments.iter().enumerate() {
            if a.slot.index >= crate::asm::isa::REGFILE_SIZE {
                return Err(PlanError::SlotOutOfRange(a.role));
            }
            if let Some(b) = self.assignments[..i].iter().find(|b| b.slot == a.slot) {
                return Err(PlanError::SharedSlot {
                    first: b.role,
                    second: a.role,
                });
            }
            let wants_a = a.sharing != Sharing::Broadcast || a.role.read_unpacked();
            if wants_a && a.slot.bank != Bank::A {
                return Err(PlanError::WrongBank {
                    role: a.role,
                    expected: Bank::A,
                });
            }
            if !wants_a && a.slot.bank != Bank::B {
                return Err(PlanError::WrongBank {
                    role: a.role,
                    expected: Bank::B,
                });
            }
        }
        Ok(())
    }
}

impl Default for RegisterPlan {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_plan_is_valid() {
        assert_eq!(RegisterPlan::standard().validate(), Ok(()));
    }

    #[test]
    fn shared_slot_is_rejected() {
        let mut plan = RegisterPlan::standard();
        plan.assignments[2].slot = plan.assignments[1].slot;
        assert_eq!(
            plan.validate(),
            Err(PlanError::SharedSlot {
                first: Role::TextureConfigAddr,
                second: Role::MapAddr,
            })
        );
    }

    #[test]
    fn unpacked_role_must_stay_in_bank_a() {
        let mut plan = RegisterPlan::standard();
        let coord = plan
            .assignments
            .iter_mut()
            .find(|a| a.role == Role::Coord)
            .map(|a| {
                a.slot = Slot::b(20);
                a.role
            });
        assert_eq!(coord, Some(Role::Coord));
        assert_eq!(
            plan.validate(),
            Err(PlanError::WrongBank {
                role: Role::Coord,
                expected: Bank::A,
            })
        );
    }

    #[test]
    fn broadcast_role_belongs_in_bank_b() {
        let mut plan = RegisterPlan::standard();
        if let Some(a) = plan
            .assignments
            .iter_mut()
            .find(|a| a.role == Role::MapIncrement)
        {
            a.slot = Slot::a(25);
        }
        assert!(matches!(
            plan.validate(),
            Err(PlanError::WrongBank {
                role: Role::MapIncrement,
                ..
            })
        ));
    }

    #[test]
    fn reciprocal_is_pinned_to_a() {
        assert_eq!(Role::Reciprocal.slot().bank, Bank::A);
        assert_eq!(Role::Reciprocal.sharing(), Sharing::PinnedBroadcast);
    }

    #[test]
    fn plan_serializes_roles() {
        let json = serde_json::to_string(&RegisterPlan::standard()).unwrap_or_default();
        assert!(json.contains("\"ThreadIndex\""));
        assert!(json.contains("\"PinnedBroadcast\""));
    }
}
