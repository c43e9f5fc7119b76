// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Constructors for building trees by hand.
//!
//! Types follow the obvious rule for each construct (a block has its last
//! child's type, a comparison is `bool`, ...). Callers that need a different
//! static type use [`Node::with_ty`].

use std::sync::Arc;

use crate::node::*;
use crate::Ty;

impl Node {
    pub fn new(kind: NodeKind, ty: Ty) -> Self {
        Self { kind, ty }
    }

    pub fn with_ty(mut self, ty: Ty) -> Self {
        self.ty = ty;
        self
    }

    pub fn unit() -> Self {
        Self::new(NodeKind::Literal(Literal::Unit), Ty::Unit)
    }

    pub fn int(n: i64) -> Self {
        Self::new(NodeKind::Literal(Literal::Int(n)), Ty::Int)
    }

    pub fn float(n: f64) -> Self {
        Self::new(NodeKind::Literal(Literal::Float(n)), Ty::Float)
    }

    pub fn bool(b: bool) -> Self {
        Self::new(NodeKind::Literal(Literal::Bool(b)), Ty::Bool)
    }

    pub fn str(s: impl Into<String>) -> Self {
        Self::new(NodeKind::Literal(Literal::Str(s.into())), Ty::Str)
    }

    pub fn var(var: &Var) -> Self {
        Self::new(NodeKind::Var(var.clone()), var.ty.clone())
    }

    pub fn assign(var: &Var, value: Node) -> Self {
        Self::new(
            NodeKind::Assign {
                var: var.clone(),
                value: Box::new(value),
            },
            var.ty.clone(),
        )
    }

    pub fn binary(op: BinOp, left: Node, right: Node) -> Self {
        let ty = if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) {
            Ty::Bool
        } else {
            left.ty.clone()
        };
        Self::new(
            NodeKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        )
    }

    pub fn add(left: Node, right: Node) -> Self {
        Self::binary(BinOp::Add, left, right)
    }

    pub fn unary(op: UnaryOp, operand: Node) -> Self {
        let ty = match op {
            UnaryOp::Not => Ty::Bool,
            UnaryOp::Neg => operand.ty.clone(),
        };
        Self::new(
            NodeKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
        )
    }

    pub fn call(func: impl Into<String>, args: Vec<Node>, ty: Ty) -> Self {
        Self::new(
            NodeKind::Call {
                func: func.into(),
                args,
            },
            ty,
        )
    }

    pub fn block(vars: Vec<Var>, body: Vec<Node>) -> Self {
        let ty = body.last().map(|n| n.ty.clone()).unwrap_or(Ty::Unit);
        Self::new(NodeKind::Block { vars, body }, ty)
    }

    pub fn seq(body: Vec<Node>) -> Self {
        Self::block(Vec::new(), body)
    }

    pub fn if_then(test: Node, if_true: Node) -> Self {
        Self::new(
            NodeKind::If {
                test: Box::new(test),
                if_true: Box::new(if_true),
                if_false: None,
            },
            Ty::Unit,
        )
    }

    pub fn if_else(test: Node, if_true: Node, if_false: Node) -> Self {
        let ty = if if_true.ty == if_false.ty {
            if_true.ty.clone()
        } else {
            Ty::Unit
        };
        Self::new(
            NodeKind::If {
                test: Box::new(test),
                if_true: Box::new(if_true),
                if_false: Some(Box::new(if_false)),
            },
            ty,
        )
    }

    pub fn loop_(body: Node, break_label: Option<Label>, continue_label: Option<Label>) -> Self {
        Self::new(
            NodeKind::Loop {
                body: Box::new(body),
                break_label,
                continue_label,
            },
            Ty::Unit,
        )
    }

    pub fn switch(value: Node, cases: Vec<SwitchCase>, default: Option<Node>) -> Self {
        let ty = cases
            .first()
            .map(|c| c.body.ty.clone())
            .filter(|ty| {
                cases.iter().all(|c| &c.body.ty == ty)
                    && default.as_ref().map_or(true, |d| &d.ty == ty)
            })
            .unwrap_or(Ty::Unit);
        Self::new(
            NodeKind::Switch {
                value: Box::new(value),
                cases,
                default: default.map(Box::new),
            },
            ty,
        )
    }

    pub fn try_catch(body: Node, handlers: Vec<CatchBlock>, finally: Option<Node>) -> Self {
        let ty = body.ty.clone();
        Self::new(
            NodeKind::Try {
                body: Box::new(body),
                handlers,
                finally: finally.map(Box::new),
            },
            ty,
        )
    }

    /// Await `target`. The node type is the target's result type.
    pub fn await_(target: Node) -> Self {
        let ty = match &target.ty {
            Ty::Future(inner) => (**inner).clone(),
            Ty::Task => Ty::Unit,
            _ => Ty::Any,
        };
        Self::new(
            NodeKind::Await {
                target: Box::new(target),
                configure_await: false,
            },
            ty,
        )
    }

    /// Await that resumes on the host's resume context.
    pub fn await_on_context(target: Node) -> Self {
        let mut node = Self::await_(target);
        if let NodeKind::Await { configure_await, .. } = &mut node.kind {
            *configure_await = true;
        }
        node
    }

    pub fn yield_(value: Node) -> Self {
        Self::new(
            NodeKind::Yield {
                value: Box::new(value),
            },
            Ty::Unit,
        )
    }

    pub fn goto(label: &Label) -> Self {
        Self::new(
            NodeKind::Goto {
                label: label.clone(),
            },
            Ty::Unit,
        )
    }

    pub fn label(label: &Label) -> Self {
        Self::new(
            NodeKind::Label {
                label: label.clone(),
            },
            Ty::Unit,
        )
    }

    pub fn ret(value: Option<Node>) -> Self {
        Self::new(
            NodeKind::Return {
                value: value.map(Box::new),
            },
            Ty::Unit,
        )
    }

    pub fn throw(value: Node) -> Self {
        Self::new(
            NodeKind::Throw {
                value: Some(Box::new(value)),
            },
            Ty::Unit,
        )
    }

    pub fn rethrow() -> Self {
        Self::new(NodeKind::Throw { value: None }, Ty::Unit)
    }

    pub fn async_block(block: AsyncBlock) -> Self {
        let ty = match block.kind {
            MachineKind::Async => Ty::future(block.result_ty.clone()),
            MachineKind::Generator => Ty::stream(block.result_ty.clone()),
        };
        Self::new(NodeKind::Async(Arc::new(block)), ty)
    }
}

impl SwitchCase {
    pub fn new(tests: Vec<Node>, body: Node) -> Self {
        Self { tests, body }
    }
}

impl CatchBlock {
    pub fn any(var: Option<Var>, body: Node) -> Self {
        Self {
            filter: FaultFilter::Any,
            var,
            body,
        }
    }

    pub fn kind(kind: impl Into<String>, var: Option<Var>, body: Node) -> Self {
        Self {
            filter: FaultFilter::Kind(kind.into()),
            var,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_takes_last_child_type() {
        let node = Node::seq(vec![Node::unit(), Node::int(4)]);
        assert_eq!(node.ty, Ty::Int);
        assert_eq!(Node::seq(vec![]).ty, Ty::Unit);
    }

    #[test]
    fn await_unwraps_future_type() {
        let x = Var::new("f", Ty::future(Ty::Str));
        assert_eq!(Node::await_(Node::var(&x)).ty, Ty::Str);
        let t = Var::new("t", Ty::Task);
        assert_eq!(Node::await_(Node::var(&t)).ty, Ty::Unit);
    }

    #[test]
    fn comparison_is_bool() {
        let n = Node::binary(BinOp::Lt, Node::int(1), Node::int(2));
        assert_eq!(n.ty, Ty::Bool);
    }

    #[test]
    fn variables_get_distinct_ids() {
        let a = Var::new("a", Ty::Int);
        let b = Var::new("a", Ty::Int);
        assert_ne!(a.id, b.id);
    }
}
