use crate::index::Index;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error to represent invalid configuration of a block exchange, a broken
/// message protocol between blocks, or an out-of-range block address.
/// Configuration and protocol errors are not recovered from locally: they
/// are propagated to the executor, which abandons the run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("array coordinate ({0} {1} {2}) out of range (maximum {3})")]
    IndexOutOfRange(u32, u32, u32, u32),

    #[error("refinement level {0} exceeds the maximum tree depth {1}")]
    LevelOutOfRange(u32, u32),

    #[error("odd ghost depth {0:?} not implemented: prolong needs padding")]
    OddGhostProlong([usize; 3]),

    #[error("unsupported precision: {0}")]
    UnsupportedPrecision(String),

    #[error("buffer size must be > 0, maybe the field list is empty?")]
    EmptyFieldList,

    #[error("unknown field {0}")]
    UnknownField(usize),

    #[error("accumulate is not implemented for {0} refresh")]
    NotImplemented(&'static str),

    #[error("region {start:?} + {count:?} exceeds field dimensions {dims:?}")]
    RegionOutOfBounds {
        start: [i64; 3],
        count: [i64; 3],
        dims: [usize; 3],
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("buffer has size {actual} but expecting size {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("a pending message is already registered for block {0}")]
    DuplicatePending(Index),

    #[error("no pending message for block {0}")]
    MissingPending(Index),

    #[error("message addressed to unknown block {0}")]
    UnknownBlock(String),

    #[error("block {0} received a second restriction from child {1:?}")]
    DuplicateChild(Index, [u8; 3]),

    #[error("block {0} received a message for octant {1:?}, which is not one of its own")]
    InvalidOctant(Index, [u8; 3]),

    #[error("block {0} cannot handle {1} while {2}")]
    UnexpectedMessage(Index, &'static str, &'static str),

    #[error("block {0} contributed twice to the {1} reduction")]
    DuplicateContribution(String, String),

    #[error("execution stalled with {0} unfinished blocks")]
    Stalled(usize),

    #[error("wire encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("wire decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
