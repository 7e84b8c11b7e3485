use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A rewrite driver failed: the conversion left illegal operations
    /// behind, or rewriting never settled.
    #[snafu(display("rewriting failed in function {func}: {source}"))]
    Rewrite { func: String, source: air_ir::Error },

    /// A call names a function the module does not contain.
    #[snafu(display("callee {name} not found in module"))]
    MissingCallee { name: String },

    /// Only functions with bodies can be inlined.
    #[snafu(display("callee {name} is a declaration and cannot be inlined"))]
    CalleeIsDeclaration { name: String },

    /// Call arity differs from the callee signature.
    #[snafu(display("call to {name} passes {args} argument(s), callee takes {params}"))]
    InlineArityMismatch { name: String, args: usize, params: usize },

    /// An operation scheduled for rewriting is not inside a block.
    #[snafu(display("operation {op} is detached from any block"))]
    DetachedOp { op: &'static str },

    /// Inlining was asked to expand something that is not a call.
    #[snafu(display("expected a call operation, found {op}"))]
    NotACall { op: &'static str },
}
