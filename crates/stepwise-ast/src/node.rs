// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Tree nodes.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::Ty;

static NEXT_VAR: AtomicU32 = AtomicU32::new(1);
static NEXT_LABEL: AtomicU32 = AtomicU32::new(1);

/// Process-unique variable identity.
///
/// Parent and nested machines share ids, so a closed-over variable is the
/// same `VarId` on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

/// Process-unique label identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// A variable declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub id: VarId,
    pub name: String,
    pub ty: Ty,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            id: VarId(NEXT_VAR.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            ty,
        }
    }
}

/// A jump target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub id: LabelId,
    pub name: Option<String>,
}

impl Label {
    pub fn new() -> Self {
        Self {
            id: LabelId(NEXT_LABEL.fetch_add(1, Ordering::Relaxed)),
            name: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}#{}", name, self.id.0),
            None => write!(f, "L{}", self.id.0),
        }
    }
}

/// Literal constant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn ty(&self) -> Ty {
        match self {
            Literal::Unit => Ty::Unit,
            Literal::Bool(_) => Ty::Bool,
            Literal::Int(_) => Ty::Int,
            Literal::Float(_) => Ty::Float,
            Literal::Str(_) => Ty::Str,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Unit => write!(f, "()"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(n) => write!(f, "{}", n),
            Literal::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// True for operators whose result is `bool` regardless of operand type.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sym = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        write!(f, "{}", sym)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UnaryOp {
    Neg,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}

/// Which kind of resumable unit a body compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MachineKind {
    /// Suspends on `Await`, completes a future.
    Async,
    /// Suspends on `Yield`, produces a stream of items.
    Generator,
}

/// A node in the input tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub ty: Ty,
}

/// The kind of node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Literal(Literal),
    Var(Var),
    Assign {
        var: Var,
        value: Box<Node>,
    },
    Binary {
        op: BinOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    /// Call to a host function registered with the environment.
    Call {
        func: String,
        args: Vec<Node>,
    },
    /// Sequence with its own variable scope. Its value is the last child's.
    Block {
        vars: Vec<Var>,
        body: Vec<Node>,
    },
    If {
        test: Box<Node>,
        if_true: Box<Node>,
        if_false: Option<Box<Node>>,
    },
    /// Infinite loop; exits only through `break_label` (or return/throw).
    Loop {
        body: Box<Node>,
        break_label: Option<Label>,
        continue_label: Option<Label>,
    },
    Switch {
        value: Box<Node>,
        cases: Vec<SwitchCase>,
        default: Option<Box<Node>>,
    },
    Try {
        body: Box<Node>,
        handlers: Vec<CatchBlock>,
        finally: Option<Box<Node>>,
    },
    /// Suspend until `target` completes; evaluates to its result.
    Await {
        target: Box<Node>,
        /// Resume on the host's resume context rather than inline.
        configure_await: bool,
    },
    /// Produce an item from a generator and suspend.
    Yield {
        value: Box<Node>,
    },
    Goto {
        label: Label,
    },
    Label {
        label: Label,
    },
    Return {
        value: Option<Box<Node>>,
    },
    /// Raise a failure. `None` rethrows the failure caught by the enclosing
    /// catch handler.
    Throw {
        value: Option<Box<Node>>,
    },
    /// A nested resumable body, compiled into its own machine.
    Async(Arc<AsyncBlock>),
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// Case values. Each is evaluated and compared for equality, in order.
    pub tests: Vec<Node>,
    pub body: Node,
}

/// Which failures a catch handler accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultFilter {
    Any,
    Kind(String),
}

impl FaultFilter {
    pub fn matches(&self, kind: &str) -> bool {
        match self {
            FaultFilter::Any => true,
            FaultFilter::Kind(k) => k == kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatchBlock {
    pub filter: FaultFilter,
    /// Receives the caught failure.
    pub var: Option<Var>,
    pub body: Node,
}

/// Body of a nested machine.
#[derive(Debug, Clone)]
pub struct AsyncBlock {
    pub name: String,
    pub kind: MachineKind,
    pub result_ty: Ty,
    pub vars: Vec<Var>,
    pub body: Vec<Node>,
}
