// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Read-only traversal helpers.
//!
//! Traversals stop at `Async` nodes: a nested body belongs to its own machine.

use crate::node::{Label, LabelId, Node, NodeKind};

impl Node {
    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Literal(_)
            | NodeKind::Var(_)
            | NodeKind::Goto { .. }
            | NodeKind::Label { .. }
            | NodeKind::Async(_) => Vec::new(),
            NodeKind::Assign { value, .. } => vec![&**value],
            NodeKind::Binary { left, right, .. } => vec![&**left, &**right],
            NodeKind::Unary { operand, .. } => vec![&**operand],
            NodeKind::Call { args, .. } => args.iter().collect(),
            NodeKind::Block { body, .. } => body.iter().collect(),
            NodeKind::If {
                test,
                if_true,
                if_false,
            } => {
                let mut out: Vec<&Node> = vec![&**test, &**if_true];
                if let Some(f) = if_false {
                    out.push(&**f);
                }
                out
            }
            NodeKind::Loop { body, .. } => vec![&**body],
            NodeKind::Switch {
                value,
                cases,
                default,
            } => {
                let mut out: Vec<&Node> = vec![&**value];
                for case in cases {
                    out.extend(case.tests.iter());
                    out.push(&case.body);
                }
                if let Some(d) = default {
                    out.push(&**d);
                }
                out
            }
            NodeKind::Try {
                body,
                handlers,
                finally,
            } => {
                let mut out: Vec<&Node> = vec![&**body];
                out.extend(handlers.iter().map(|h| &h.body));
                if let Some(f) = finally {
                    out.push(&**f);
                }
                out
            }
            NodeKind::Await { target, .. } => vec![&**target],
            NodeKind::Yield { value } => vec![&**value],
            NodeKind::Return { value } | NodeKind::Throw { value } => {
                value.iter().map(|v| &**v).collect()
            }
        }
    }

    /// True if `pred` holds for this node or any descendant.
    pub fn any(&self, pred: &impl Fn(&Node) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }

    /// True if this subtree contains an `Await` or `Yield`.
    pub fn contains_suspension(&self) -> bool {
        self.any(&|n| matches!(n.kind, NodeKind::Await { .. } | NodeKind::Yield { .. }))
    }

    /// True if this subtree contains a `Return`.
    pub fn contains_return(&self) -> bool {
        self.any(&|n| matches!(n.kind, NodeKind::Return { .. }))
    }

    /// Labels this subtree can jump to.
    pub fn goto_targets(&self, out: &mut Vec<Label>) {
        if let NodeKind::Goto { label } = &self.kind {
            out.push(label.clone());
        }
        for child in self.children() {
            child.goto_targets(out);
        }
    }

    /// Labels this subtree defines: `Label` nodes and loop break/continue labels.
    pub fn defined_labels(&self, out: &mut Vec<LabelId>) {
        match &self.kind {
            NodeKind::Label { label } => out.push(label.id),
            NodeKind::Loop {
                break_label,
                continue_label,
                ..
            } => {
                out.extend(break_label.iter().map(|l| l.id));
                out.extend(continue_label.iter().map(|l| l.id));
            }
            _ => {}
        }
        for child in self.children() {
            child.defined_labels(out);
        }
    }
}
