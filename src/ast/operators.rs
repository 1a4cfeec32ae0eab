/// Binary combinators for computed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineOp {
    // Arithmetic
    /// Addition (`+`)
    Add,
    /// Subtraction (`-`)
    Subtract,
    /// Multiplication (`*`)
    Multiply,
    /// Division (`/`)
    Divide,
    /// Modulo (`%`)
    Modulo,
    /// Power (`^`)
    Power,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    /// Left shift, as multiplication by a power of two.
    BitLeftShift,
    /// Right shift, as floored division by a power of two.
    BitRightShift,
}

impl CombineOp {
    /// Aggregation operator for the combinators that map onto one directly.
    pub fn operator(&self) -> Option<&'static str> {
        match self {
            CombineOp::Add => Some("$add"),
            CombineOp::Subtract => Some("$subtract"),
            CombineOp::Multiply => Some("$multiply"),
            CombineOp::Divide => Some("$divide"),
            CombineOp::Modulo => Some("$mod"),
            CombineOp::Power => Some("$pow"),
            CombineOp::BitAnd => Some("$bitAnd"),
            CombineOp::BitOr => Some("$bitOr"),
            CombineOp::BitXor => Some("$bitXor"),
            CombineOp::BitLeftShift | CombineOp::BitRightShift => None,
        }
    }
}
