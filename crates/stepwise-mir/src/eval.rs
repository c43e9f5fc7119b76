// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Leaf evaluator.
//!
//! Runs the synchronous code inside one state. Hoisted variables are read
//! and written through the instance's storage cells; everything else lives
//! in a frame that is dropped when the state's leaves finish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stepwise_ast::{BinOp, LabelId, UnaryOp, VarId};
use stepwise_rt::{lock, Fault, Value};

use crate::expr::Expr;

/// How control left a leaf other than by producing a value.
#[derive(Debug)]
pub enum Flow {
    /// Jump to a label's state.
    Goto(LabelId),
    /// Jump to the return state. The final value is already stored.
    Return,
    Fault(Fault),
}

impl From<Fault> for Flow {
    fn from(fault: Fault) -> Self {
        Flow::Fault(fault)
    }
}

pub type Cell = Arc<Mutex<Value>>;

pub struct Evaluator<'a> {
    slots: &'a [Cell],
    slot_of: &'a HashMap<VarId, usize>,
    frame: HashMap<VarId, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(slots: &'a [Cell], slot_of: &'a HashMap<VarId, usize>) -> Self {
        Self {
            slots,
            slot_of,
            frame: HashMap::new(),
        }
    }

    /// Storage cell of a hoisted variable.
    pub fn cell(&self, var: VarId) -> Option<&'a Cell> {
        let slots = self.slots;
        self.slot_of.get(&var).map(|i| &slots[*i])
    }

    pub fn read(&self, var: VarId) -> Result<Value, Fault> {
        if let Some(cell) = self.cell(var) {
            return Ok(lock(cell).clone());
        }
        self.frame
            .get(&var)
            .cloned()
            .ok_or_else(|| Fault::invalid_state(format!("read of unbound variable _{}", var.0)))
    }

    pub fn write(&mut self, var: VarId, value: Value) {
        match self.cell(var) {
            Some(cell) => *lock(cell) = value,
            None => {
                self.frame.insert(var, value);
            }
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, Flow> {
        match expr {
            Expr::Const(lit) => Ok(Value::from(lit)),
            Expr::Load(var) => Ok(self.read(*var)?),
            Expr::Store { var, value } => {
                let value = self.eval(value)?;
                self.write(*var, value.clone());
                Ok(value)
            }
            Expr::Init { var, ty } => {
                self.write(*var, Value::default_for(ty));
                Ok(Value::Unit)
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                Ok(unary(*op, v)?)
            }
            Expr::Call { call, args } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((call.func)(&args)?)
            }
            Expr::Block { locals, body } => {
                for (var, ty) in locals {
                    self.write(*var, Value::default_for(ty));
                }
                let mut last = Ok(Value::Unit);
                for e in body {
                    last = self.eval(e);
                    if last.is_err() {
                        break;
                    }
                }
                for (var, _) in locals {
                    self.frame.remove(var);
                }
                last
            }
            Expr::If {
                test,
                if_true,
                if_false,
            } => {
                if self.eval(test)?.as_bool()? {
                    self.eval(if_true)
                } else if let Some(f) = if_false {
                    self.eval(f)
                } else {
                    Ok(Value::Unit)
                }
            }
            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => loop {
                match self.eval(body) {
                    Ok(_) => {}
                    Err(Flow::Goto(l)) if Some(l) == *break_label => return Ok(Value::Unit),
                    Err(Flow::Goto(l)) if Some(l) == *continue_label => {}
                    Err(flow) => return Err(flow),
                }
            },
            Expr::Switch {
                value,
                cases,
                default,
            } => {
                let value = self.eval(value)?;
                for (tests, body) in cases {
                    for test in tests {
                        if self.eval(test)? == value {
                            return self.eval(body);
                        }
                    }
                }
                match default {
                    Some(d) => self.eval(d),
                    None => Ok(Value::Unit),
                }
            }
            Expr::Try {
                body,
                handlers,
                finally,
            } => {
                let outcome = match self.eval(body) {
                    Err(Flow::Fault(fault)) => {
                        match handlers.iter().find(|h| h.filter.matches(&fault.kind)) {
                            Some(handler) => {
                                self.write(handler.var, Value::Fault(fault));
                                self.eval(&handler.body)
                            }
                            None => Err(Flow::Fault(fault)),
                        }
                    }
                    other => other,
                };
                // A jump or failure out of the finally replaces the outcome.
                if let Some(f) = finally {
                    self.eval(f)?;
                }
                outcome
            }
            Expr::Goto(label) => Err(Flow::Goto(*label)),
            Expr::Return(value) => {
                if let Some(v) = value {
                    self.eval(v)?;
                }
                Err(Flow::Return)
            }
            Expr::Throw(value) => {
                let v = self.eval(value)?;
                Err(Flow::Fault(Fault::thrown(v)))
            }
            Expr::Spawn { machine, captures } => {
                let cells = captures
                    .iter()
                    .filter_map(|id| self.cell(*id).map(|c| (*id, c.clone())))
                    .collect();
                Ok(crate::exec::spawn(machine, cells))
            }
        }
    }

    fn eval_binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Result<Value, Flow> {
        match op {
            BinOp::And => {
                if !self.eval(left)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(right)?.as_bool()?))
            }
            BinOp::Or => {
                if self.eval(left)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(right)?.as_bool()?))
            }
            _ => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                Ok(binary(op, l, r)?)
            }
        }
    }
}

/// Apply a strict binary operator.
pub fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, Fault> {
    match (op, &l, &r) {
        (BinOp::Add, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))),
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))),
        (BinOp::Div, Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(Fault::divide_by_zero());
            }
            Ok(Value::Int(a.wrapping_div(*b)))
        }
        (BinOp::Rem, Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(Fault::divide_by_zero());
            }
            Ok(Value::Int(a.wrapping_rem(*b)))
        }
        (BinOp::Add, Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (BinOp::Sub, Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
        (BinOp::Mul, Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
        (BinOp::Div, Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        (BinOp::Rem, Value::Float(a), Value::Float(b)) => Ok(Value::Float(a % b)),
        (_, Value::Int(a), Value::Float(_)) if !op.is_comparison() => {
            binary(op, Value::Float(*a as f64), r.clone())
        }
        (_, Value::Float(_), Value::Int(b)) if !op.is_comparison() => {
            binary(op, l.clone(), Value::Float(*b as f64))
        }
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::str(&format!("{}{}", a, b))),
        (BinOp::Eq, _, _) => Ok(Value::Bool(l == r)),
        (BinOp::Ne, _, _) => Ok(Value::Bool(l != r)),
        (BinOp::Lt, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Le, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Gt, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Ge, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a >= b)),
        (BinOp::Lt, Value::Float(a), Value::Float(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Le, Value::Float(a), Value::Float(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Gt, Value::Float(a), Value::Float(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Ge, Value::Float(a), Value::Float(b)) => Ok(Value::Bool(a >= b)),
        (BinOp::Lt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Le, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Gt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Ge, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a >= b)),
        _ => Err(Fault::type_error(format!(
            "unsupported binary op {} on {} and {}",
            op,
            l.type_name(),
            r.type_name()
        ))),
    }
}

pub fn unary(op: UnaryOp, v: Value) -> Result<Value, Fault> {
    match (op, &v) {
        (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(n.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        _ => Err(Fault::type_error(format!(
            "unsupported unary op {} on {}",
            op,
            v.type_name()
        ))),
    }
}
