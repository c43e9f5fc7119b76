// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Display implementations for the state graph.

use std::fmt;

use crate::expr::Expr;
use crate::state::{LoweringResult, Scope};
use crate::transition::Transition;

fn list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(lit) => write!(f, "{}", lit),
            Expr::Load(var) => write!(f, "_{}", var.0),
            Expr::Store { var, value } => write!(f, "_{} = {}", var.0, value),
            Expr::Init { var, ty } => write!(f, "init _{}: {}", var.0, ty),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Unary { op, operand } => write!(f, "{}{}", op, operand),
            Expr::Call { call, args } => {
                write!(f, "{}(", call.name)?;
                list(f, args)?;
                write!(f, ")")
            }
            Expr::Block { locals, body } => {
                write!(f, "{{ ")?;
                for (var, ty) in locals {
                    write!(f, "let _{}: {}; ", var.0, ty)?;
                }
                for e in body {
                    write!(f, "{}; ", e)?;
                }
                write!(f, "}}")
            }
            Expr::If {
                test,
                if_true,
                if_false: Some(if_false),
            } => write!(f, "if {} {{ {} }} else {{ {} }}", test, if_true, if_false),
            Expr::If {
                test,
                if_true,
                if_false: None,
            } => write!(f, "if {} {{ {} }}", test, if_true),
            Expr::Loop { body, .. } => write!(f, "loop {{ {} }}", body),
            Expr::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "switch {} [", value)?;
                for (i, (tests, body)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    list(f, tests)?;
                    write!(f, ": {}", body)?;
                }
                if let Some(d) = default {
                    write!(f, ", default: {}", d)?;
                }
                write!(f, "]")
            }
            Expr::Try {
                body,
                handlers,
                finally,
            } => {
                write!(f, "try {{ {} }}", body)?;
                for h in handlers {
                    write!(f, " catch _{} {{ {} }}", h.var.0, h.body)?;
                }
                if let Some(fin) = finally {
                    write!(f, " finally {{ {} }}", fin)?;
                }
                Ok(())
            }
            Expr::Goto(label) => write!(f, "goto L{}", label.0),
            Expr::Return(Some(v)) => write!(f, "return {}", v),
            Expr::Return(None) => write!(f, "return"),
            Expr::Throw(v) => write!(f, "throw {}", v),
            Expr::Spawn { machine, captures } => {
                write!(f, "spawn {}(", machine.name())?;
                for (i, c) in captures.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "_{}", c.0)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Goto { target } => write!(f, "goto {}", target),
            Transition::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "if {} then {} else {}", test, if_true, if_false),
            Transition::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "switch {} [", value)?;
                for (i, (tests, target)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    list(f, tests)?;
                    write!(f, ": {}", target)?;
                }
                write!(f, ", default: {}]", default)
            }
            Transition::TryCatch {
                try_state,
                catches,
                finally,
                scope,
                ..
            } => {
                write!(f, "try {} in {}", try_state, scope)?;
                for c in catches {
                    write!(f, " catch#{} {}", c.index, c.state)?;
                }
                if let Some(fin) = finally {
                    write!(f, " finally {}", fin)?;
                }
                Ok(())
            }
            Transition::Loop {
                body,
                break_target,
                ..
            } => {
                write!(f, "loop {}", body)?;
                if let Some(b) = break_target {
                    write!(f, " break {}", b)?;
                }
                Ok(())
            }
            Transition::Suspend {
                target,
                awaiter,
                completion,
                configure_await,
                key,
                ..
            } => {
                write!(
                    f,
                    "suspend {} -> _{} [key {}] then {}",
                    target, awaiter.0, key, completion
                )?;
                if *configure_await {
                    write!(f, " on context")?;
                }
                Ok(())
            }
            Transition::SuspendResume {
                target,
                awaiter,
                result,
                ..
            } => write!(f, "_{} = result(_{}); goto {}", result.0, awaiter.0, target),
            Transition::Yield { value, resume, key } => {
                write!(f, "yield {} [key {}] then {}", value, key, resume)
            }
            Transition::EndFinally { region, join } => {
                write!(f, "end_finally region{} join {}", region.0, join)
            }
            Transition::Final => write!(f, "final"),
        }
    }
}

impl LoweringResult {
    fn fmt_scope(&self, f: &mut fmt::Formatter<'_>, scope: &Scope, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        writeln!(f, "{}{} {{", pad, scope.id)?;
        for case in &scope.jump_cases {
            writeln!(
                f,
                "{}  case {} => {} (continue {})",
                pad, case.key, case.resume, case.continue_
            )?;
        }
        for id in &scope.states {
            let state = self.state(*id);
            writeln!(f, "{}  {}:", pad, id)?;
            for leaf in &state.leaves {
                writeln!(f, "{}    {};", pad, leaf)?;
            }
            if let (Some(var), Some(value)) = (state.result.variable, &state.result.value) {
                writeln!(f, "{}    _{} = {};", pad, var.0, value)?;
            }
            match &state.transition {
                Some(t) => writeln!(f, "{}    {}", pad, t)?,
                None => writeln!(f, "{}    <open>", pad)?,
            }
        }
        for child in self.child_scopes(scope.id) {
            self.fmt_scope(f, child, depth + 1)?;
        }
        writeln!(f, "{}}}", pad)
    }
}

impl fmt::Display for LoweringResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "machine {} ({:?}) -> {}", self.name, self.kind, self.result_ty)?;
        for info in self.variables.values().filter(|v| v.hoisted) {
            writeln!(f, "  field {}: {} = _{}", info.field, info.var.ty, info.var.id.0)?;
        }
        self.fmt_scope(f, self.root_scope(), 0)
    }
}
