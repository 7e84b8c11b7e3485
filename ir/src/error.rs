use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// An operand is used before its definition.
    #[snafu(display("use of a value before its definition, near {op}"))]
    DominanceViolation { op: String },

    /// An operand refers to the result of an erased operation.
    #[snafu(display("operand of {op} refers to an erased operation"))]
    StaleOperand { op: String },

    /// A block still lists an erased operation.
    #[snafu(display("erased operation {op} is still attached to a block"))]
    ErasedAttached { op: String },

    /// A terminator is followed by further operations.
    #[snafu(display("terminator {op} is not the last operation in its block"))]
    MisplacedTerminator { op: String },

    /// Conversion finished rewriting but illegal operations remain.
    #[snafu(display("conversion left {count} illegal operation(s), first: {first}"))]
    ConversionIncomplete { count: usize, first: String },

    /// The greedy driver kept finding matches past its sweep limit.
    #[snafu(display("rewriting did not reach a fixed point within {sweeps} sweeps"))]
    NoFixedPoint { sweeps: usize },
}
