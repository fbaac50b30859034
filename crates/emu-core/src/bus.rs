//! Memory and I/O bus interface.

/// Size of a single bus transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
}

impl AccessWidth {
    /// Transfer size in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
        }
    }
}

/// Whether an access continues from the previous address.
///
/// Slow memories charge different wait states for the first access of a
/// burst (non-sequential) and for the accesses that follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    NonSequential,
    Sequential,
}

/// Result of a bus read: the data and the cycles the access took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusResult {
    /// Value read, zero-extended to 32 bits.
    pub data: u32,
    /// Cycles the access consumed, including wait states.
    pub cycles: u32,
}

impl BusResult {
    #[must_use]
    pub const fn new(data: u32, cycles: u32) -> Self {
        Self { data, cycles }
    }
}

/// Memory and I/O bus interface.
///
/// Components access memory and peripherals through this trait. The bus
/// handles address decoding, routing to the appropriate device and the wait
/// states of each region. Every access reports its cost so the caller can
/// account for it.
pub trait Bus {
    /// Read `width` bytes at `address`.
    fn read(&mut self, address: u32, width: AccessWidth, kind: AccessKind) -> BusResult;

    /// Write `width` bytes at `address`. Returns the cycles consumed.
    fn write(&mut self, address: u32, width: AccessWidth, kind: AccessKind, value: u32) -> u32;

    /// Instruction fetch. Buses that latch the last opcode (for open-bus
    /// reads) override this; the default is a plain read.
    fn fetch(&mut self, address: u32, width: AccessWidth, kind: AccessKind) -> BusResult {
        self.read(address, width, kind)
    }

    /// One internal cycle with no memory transfer. Returns the cycles consumed.
    fn idle(&mut self) -> u32 {
        1
    }
}
