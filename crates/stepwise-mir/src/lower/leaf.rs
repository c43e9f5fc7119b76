// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Leaf conversion: subtrees that run inside a single state.

use std::sync::Arc;

use stepwise_ast::{AsyncBlock, Node, NodeKind, Ty, Var};

use super::Lowerer;
use crate::error::LoweringError;
use crate::expr::{Expr, HostCall, LeafCatch};

impl<'a> Lowerer<'a> {
    /// Convert a subtree with no suspension point into one leaf expression.
    pub(super) fn leaf(&mut self, node: &Node) -> Result<Expr, LoweringError> {
        let mut jumps = Vec::new();
        node.goto_targets(&mut jumps);
        if !jumps.is_empty() {
            let mut defined = Vec::new();
            node.defined_labels(&mut defined);
            for label in jumps.into_iter().filter(|l| !defined.contains(&l.id)) {
                let state = self.label_state(&label);
                if !self.leaf_targets.contains(&state) {
                    self.leaf_targets.push(state);
                }
            }
        }
        if node.contains_return() {
            self.return_state();
        }
        self.convert(node)
    }

    fn convert(&mut self, node: &Node) -> Result<Expr, LoweringError> {
        let expr = match &node.kind {
            NodeKind::Literal(lit) => Expr::Const(lit.clone()),
            NodeKind::Var(var) => Expr::Load(self.resolve(var)?),
            NodeKind::Assign { var, value } => {
                let value = self.convert(value)?;
                Expr::Store {
                    var: self.resolve(var)?,
                    value: Box::new(value),
                }
            }
            NodeKind::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(self.convert(left)?),
                right: Box::new(self.convert(right)?),
            },
            NodeKind::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(self.convert(operand)?),
            },
            NodeKind::Call { func, args } => {
                let call = self.host_call(func)?;
                let args = args
                    .iter()
                    .map(|a| self.convert(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Expr::Call { call, args }
            }
            NodeKind::Block { vars, body } => {
                let body = self.with_scope(vars, false, |lw| {
                    body.iter().map(|n| lw.convert(n)).collect::<Result<Vec<_>, _>>()
                })?;
                Expr::Block {
                    locals: vars.iter().map(|v| (v.id, v.ty.clone())).collect(),
                    body,
                }
            }
            NodeKind::If {
                test,
                if_true,
                if_false,
            } => Expr::If {
                test: Box::new(self.convert(test)?),
                if_true: Box::new(self.convert(if_true)?),
                if_false: match if_false {
                    Some(f) => Some(Box::new(self.convert(f)?)),
                    None => None,
                },
            },
            NodeKind::Loop {
                body,
                break_label,
                continue_label,
            } => Expr::Loop {
                body: Box::new(self.convert(body)?),
                break_label: break_label.as_ref().map(|l| l.id),
                continue_label: continue_label.as_ref().map(|l| l.id),
            },
            NodeKind::Switch {
                value,
                cases,
                default,
            } => {
                let value = self.convert(value)?;
                let mut arms = Vec::with_capacity(cases.len());
                for case in cases {
                    let tests = case
                        .tests
                        .iter()
                        .map(|t| self.convert(t))
                        .collect::<Result<Vec<_>, _>>()?;
                    arms.push((tests, self.convert(&case.body)?));
                }
                Expr::Switch {
                    value: Box::new(value),
                    cases: arms,
                    default: match default {
                        Some(d) => Some(Box::new(self.convert(d)?)),
                        None => None,
                    },
                }
            }
            NodeKind::Try {
                body,
                handlers,
                finally,
            } => {
                let body = self.convert(body)?;
                let mut catches = Vec::with_capacity(handlers.len());
                for handler in handlers {
                    let var = match &handler.var {
                        Some(v) => v.id,
                        None => self.resolver.local_temp("caught", Ty::Fault),
                    };
                    let vars: Vec<Var> = handler.var.iter().cloned().collect();
                    let body = self.with_handler(var, |lw| {
                        lw.with_scope(&vars, false, |lw| lw.convert(&handler.body))
                    })?;
                    catches.push(LeafCatch {
                        filter: handler.filter.clone(),
                        var,
                        body,
                    });
                }
                Expr::Try {
                    body: Box::new(body),
                    handlers: catches,
                    finally: match finally {
                        Some(f) => Some(Box::new(self.convert(f)?)),
                        None => None,
                    },
                }
            }
            NodeKind::Goto { label } => Expr::Goto(label.id),
            NodeKind::Return { value } => {
                let value = match value {
                    Some(v) => Some(self.convert(v)?),
                    None => None,
                };
                Expr::Return(value.map(|v| match self.final_var {
                    Some(var) => {
                        self.explicit_final = true;
                        Box::new(Expr::Store {
                            var,
                            value: Box::new(v),
                        })
                    }
                    None => Box::new(v),
                }))
            }
            NodeKind::Throw { value: Some(value) } => {
                Expr::Throw(Box::new(self.convert(value)?))
            }
            NodeKind::Throw { value: None } => match self.handlers.last() {
                Some(exception) => Expr::Throw(Box::new(Expr::Load(*exception))),
                None => return Err(LoweringError::RethrowOutsideCatch),
            },
            NodeKind::Async(block) => self.nested(block)?,
            // Only reachable through `lower`, which splits these.
            NodeKind::Await { .. } | NodeKind::Yield { .. } | NodeKind::Label { .. } => {
                self.lower(node)?
            }
        };
        Ok(expr)
    }

    pub(super) fn host_call(&self, name: &str) -> Result<HostCall, LoweringError> {
        match self.env.function(name) {
            Some(func) => Ok(HostCall {
                name: name.to_string(),
                func: func.clone(),
            }),
            None => Err(LoweringError::UnknownFunction {
                name: name.to_string(),
            }),
        }
    }

    /// Compile a nested body into its own machine. It sees every variable
    /// live here; the ones it uses are shared with it through storage.
    fn nested(&mut self, block: &Arc<AsyncBlock>) -> Result<Expr, LoweringError> {
        let live = self.resolver.live_vars();
        let options = self.options.nested();
        let machine = crate::transform(block, &live, self.env.clone(), &options).map_err(|e| {
            LoweringError::Nested {
                name: block.name.clone(),
                source: Box::new(e),
            }
        })?;
        let captures: Vec<_> = machine.lowering().externs().map(|v| v.var.id).collect();
        for id in &captures {
            self.resolver.capture(*id, self.current);
        }
        Ok(Expr::Spawn {
            machine: machine.definition().clone(),
            captures,
        })
    }
}
