// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Lowering - CPS conversion of a body into a state graph.
//!
//! Subtrees with no suspension point are converted to leaf expressions and
//! run inside one state. Everything else is split: each branching construct
//! opens a group with a join state, each suspension becomes a pair of states
//! (suspend, completion) plus a jump case on the enclosing scope.

mod leaf;
mod resolve;
mod states;

pub use resolve::VariableResolver;
pub use states::GraphBuilder;

use std::collections::HashMap;
use std::sync::Arc;

use stepwise_ast::{
    AsyncBlock, BinOp, CatchBlock, Label, LabelId, MachineKind, Node, NodeKind, SwitchCase,
    Ty, Var, VarId,
};
use stepwise_rt::HostEnv;

use crate::error::LoweringError;
use crate::expr::Expr;
use crate::options::TransformOptions;
use crate::state::{
    CatchTarget, Guard, GuardId, GuardPhase, GroupId, JumpCase, LoweringResult, RegionId,
    ResultDescriptor, ScopeId, StateId, TryRegion, VarKind,
};
use crate::transition::Transition;

struct LabelSlot {
    state: StateId,
    placed: bool,
    name: String,
}

pub struct Lowerer<'a> {
    name: String,
    kind: MachineKind,
    result_ty: Ty,
    env: &'a Arc<HostEnv>,
    options: &'a TransformOptions,
    graph: GraphBuilder,
    resolver: VariableResolver,
    current: StateId,
    scope: ScopeId,
    guard: Option<GuardId>,
    /// Exception variables of the enclosing catch handlers, innermost last.
    handlers: Vec<VarId>,
    labels: HashMap<LabelId, LabelSlot>,
    return_state: Option<StateId>,
    final_var: Option<VarId>,
    explicit_final: bool,
    suspensions: usize,
    leaf_targets: Vec<StateId>,
}

/// Lower `block` into a state graph. `externs` are the variables an
/// enclosing machine makes available.
pub fn lower(
    block: &AsyncBlock,
    externs: &[Var],
    env: &Arc<HostEnv>,
    options: &TransformOptions,
) -> Result<LoweringResult, LoweringError> {
    let name = options.name.clone().unwrap_or_else(|| block.name.clone());
    let mut graph = GraphBuilder::new();
    let entry = graph.new_state(ScopeId(0), GroupId(0), None);
    let mut resolver = VariableResolver::new(externs);
    let final_var = match block.kind {
        MachineKind::Async if !block.result_ty.is_unit() => {
            Some(resolver.temp("final", block.result_ty.clone(), VarKind::Final))
        }
        _ => None,
    };

    let mut lw = Lowerer {
        name,
        kind: block.kind,
        result_ty: block.result_ty.clone(),
        env,
        options,
        graph,
        resolver,
        current: entry,
        scope: ScopeId(0),
        guard: None,
        handlers: Vec::new(),
        labels: HashMap::new(),
        return_state: None,
        final_var,
        explicit_final: false,
        suspensions: 0,
        leaf_targets: Vec::new(),
    };

    let value = lw.with_scope(&block.vars, true, |lw| {
        for var in &block.vars {
            lw.init(var);
        }
        lw.lower_sequence(&block.body)
    })?;

    let ends_in_return = matches!(
        block.body.last().map(|n| &n.kind),
        Some(NodeKind::Return { .. })
    );
    let tail = lw.current;
    match lw.final_var {
        Some(var) if !ends_in_return => {
            lw.graph.state_mut(tail).result = ResultDescriptor {
                variable: Some(var),
                value: Some(value),
            };
        }
        _ => lw.emit_effect(value),
    }
    match lw.return_state {
        Some(ret) => {
            lw.graph.close(tail, Transition::Goto { target: ret });
            lw.graph.close(ret, Transition::Final);
        }
        None => lw.graph.close(tail, Transition::Final),
    }

    lw.finish(entry)
}

impl<'a> Lowerer<'a> {
    fn finish(self, entry: StateId) -> Result<LoweringResult, LoweringError> {
        if let Some(slot) = self.labels.values().find(|s| !s.placed) {
            return Err(LoweringError::UndefinedLabel {
                label: slot.name.clone(),
            });
        }
        let labels = self.labels.iter().map(|(id, s)| (*id, s.state)).collect();
        let result = LoweringResult {
            name: self.name,
            kind: self.kind,
            result_ty: self.result_ty,
            states: self.graph.states,
            scopes: self.graph.scopes,
            regions: self.graph.regions,
            guards: self.graph.guards,
            variables: self.resolver.into_variables(),
            suspension_count: self.suspensions,
            final_result_has_explicit_assignment: self.explicit_final,
            final_var: self.final_var,
            entry,
            return_state: self.return_state,
            labels,
            leaf_targets: self.leaf_targets,
        };
        tracing::debug!(
            target: "stepwise::lower",
            machine = %result.name,
            states = result.states.len(),
            scopes = result.scopes.len(),
            suspensions = result.suspension_count,
            hoisted = result.hoisted().count(),
            externs = result.externs().count(),
            "lowered"
        );
        Ok(result)
    }

    // ── Context helpers ─────────────────────────────────────────────

    /// Run `f` with `vars` in scope. The scope is popped on every path.
    fn with_scope<R>(
        &mut self,
        vars: &[Var],
        hoisted: bool,
        f: impl FnOnce(&mut Self) -> Result<R, LoweringError>,
    ) -> Result<R, LoweringError> {
        let depth = self.resolver.depth();
        self.resolver.push_scope(vars, hoisted);
        let out = f(self);
        self.resolver.restore(depth);
        out
    }

    /// Run `f` with `exception` as the failure a rethrow re-raises.
    fn with_handler<R>(&mut self, exception: VarId, f: impl FnOnce(&mut Self) -> R) -> R {
        self.handlers.push(exception);
        let out = f(self);
        self.handlers.pop();
        out
    }

    /// Run `f` placing new states in `scope` under `guard`.
    fn in_region<R>(
        &mut self,
        scope: ScopeId,
        guard: Option<GuardId>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let saved = (self.scope, self.guard);
        self.scope = scope;
        self.guard = guard;
        let out = f(self);
        self.scope = saved.0;
        self.guard = saved.1;
        out
    }

    fn new_state(&mut self, group: GroupId) -> StateId {
        self.graph.new_state(self.scope, group, self.guard)
    }

    fn current_group(&self) -> GroupId {
        self.graph.state(self.current).group
    }

    /// Open a group: a fresh group id and its join state.
    fn enter_group(&mut self) -> (StateId, GroupId) {
        let group = self.graph.new_group();
        let join = self.new_state(group);
        (join, group)
    }

    /// Lower `node` into a new branch of `group`. The branch's value goes
    /// to `result` and its tail falls through to `join`.
    fn lower_branch(
        &mut self,
        node: &Node,
        join: StateId,
        group: GroupId,
        result: Option<VarId>,
        prelude: Vec<Expr>,
    ) -> Result<StateId, LoweringError> {
        let entry = self.new_state(group);
        let saved = self.current;
        self.current = entry;
        for leaf in prelude {
            self.graph.push_leaf(entry, leaf);
        }
        let out = self.lower(node);
        let tail = self.current;
        self.current = saved;
        let value = out?;

        match result {
            Some(var) => {
                self.graph.state_mut(tail).result = ResultDescriptor {
                    variable: Some(var),
                    value: Some(value),
                };
            }
            None if !value.is_pure() => self.graph.push_leaf(tail, value),
            None => {}
        }
        self.graph.close(tail, Transition::Goto { target: join });
        Ok(entry)
    }

    fn emit_effect(&mut self, value: Expr) {
        if !value.is_pure() {
            self.graph.push_leaf(self.current, value);
        }
    }

    /// Evaluate `value` now into a hoisted temp, so later effects cannot
    /// change it.
    fn spill(&mut self, value: Expr, ty: &Ty) -> Expr {
        if value.is_const() {
            return value;
        }
        let temp = self.resolver.temp("spill", ty.clone(), VarKind::Temp);
        self.graph.push_leaf(
            self.current,
            Expr::Store {
                var: temp,
                value: Box::new(value),
            },
        );
        Expr::Load(temp)
    }

    fn init(&mut self, var: &Var) {
        self.graph.push_leaf(
            self.current,
            Expr::Init {
                var: var.id,
                ty: var.ty.clone(),
            },
        );
    }

    fn resolve(&mut self, var: &Var) -> Result<VarId, LoweringError> {
        self.resolver.resolve(var, self.current)
    }

    fn needs_lowering(&self, node: &Node) -> bool {
        node.contains_suspension() || node.any(&|n| matches!(n.kind, NodeKind::Label { .. }))
    }

    fn return_state(&mut self) -> StateId {
        match self.return_state {
            Some(s) => s,
            None => {
                let s = self.graph.new_state(ScopeId(0), GroupId(0), None);
                self.return_state = Some(s);
                s
            }
        }
    }

    fn label_state(&mut self, label: &Label) -> StateId {
        if let Some(slot) = self.labels.get(&label.id) {
            return slot.state;
        }
        let group = self.current_group();
        let state = self.new_state(group);
        self.labels.insert(
            label.id,
            LabelSlot {
                state,
                placed: false,
                name: label.to_string(),
            },
        );
        state
    }

    /// Bind `label` to `state`. A state created earlier by a forward jump
    /// forwards to it.
    fn place_label(&mut self, label: &Label, state: StateId) {
        if let Some(slot) = self.labels.get_mut(&label.id) {
            let earlier = slot.state;
            slot.state = state;
            slot.placed = true;
            self.graph.close(earlier, Transition::Goto { target: state });
            return;
        }
        self.labels.insert(
            label.id,
            LabelSlot {
                state,
                placed: true,
                name: label.to_string(),
            },
        );
    }

    // ── Node lowering ───────────────────────────────────────────────

    /// Lower `node` in the current state and return its value. The value
    /// is valid in whatever state is current afterwards.
    pub fn lower(&mut self, node: &Node) -> Result<Expr, LoweringError> {
        match &node.kind {
            NodeKind::Goto { label } => return self.lower_goto(label),
            NodeKind::Label { label } => return self.lower_label(label),
            NodeKind::Return { value } => return self.lower_return(value.as_deref()),
            _ => {}
        }
        if !self.needs_lowering(node) {
            return self.leaf(node);
        }

        match &node.kind {
            NodeKind::Block { vars, body } => self.with_scope(vars, true, |lw| {
                for var in vars {
                    lw.init(var);
                }
                lw.lower_sequence(body)
            }),
            NodeKind::Assign { var, value } => {
                let value = self.lower(value)?;
                let var = self.resolve(var)?;
                Ok(Expr::Store {
                    var,
                    value: Box::new(value),
                })
            }
            NodeKind::Binary { op, left, right } => self.lower_binary(*op, left, right),
            NodeKind::Unary { op, operand } => Ok(Expr::Unary {
                op: *op,
                operand: Box::new(self.lower(operand)?),
            }),
            NodeKind::Call { func, args } => self.lower_call(func, args),
            NodeKind::If {
                test,
                if_true,
                if_false,
            } => self.lower_if(test, if_true, if_false.as_deref(), &node.ty),
            NodeKind::Loop {
                body,
                break_label,
                continue_label,
            } => self.lower_loop(body, break_label.as_ref(), continue_label.as_ref()),
            NodeKind::Switch {
                value,
                cases,
                default,
            } => self.lower_switch(value, cases, default.as_deref(), &node.ty),
            NodeKind::Try {
                body,
                handlers,
                finally,
            } => self.lower_try(body, handlers, finally.as_deref(), &node.ty),
            NodeKind::Await {
                target,
                configure_await,
            } => self.lower_await(target, *configure_await),
            NodeKind::Yield { value } => self.lower_yield(value),
            NodeKind::Throw { value: Some(value) } => {
                Ok(Expr::Throw(Box::new(self.lower(value)?)))
            }
            _ => self.leaf(node),
        }
    }

    fn lower_sequence(&mut self, body: &[Node]) -> Result<Expr, LoweringError> {
        let mut last = Expr::unit();
        for (i, child) in body.iter().enumerate() {
            let value = self.lower(child)?;
            if i + 1 == body.len() {
                last = value;
            } else {
                self.emit_effect(value);
            }
        }
        Ok(last)
    }

    fn lower_binary(&mut self, op: BinOp, left: &Node, right: &Node) -> Result<Expr, LoweringError> {
        if matches!(op, BinOp::And | BinOp::Or) && self.needs_lowering(right) {
            // Short-circuit across a suspension is a branch.
            let branch = match op {
                BinOp::And => Node::if_else(left.clone(), right.clone(), Node::bool(false)),
                _ => Node::if_else(left.clone(), Node::bool(true), right.clone()),
            };
            return self.lower(&branch.with_ty(Ty::Bool));
        }
        let mut l = self.lower(left)?;
        if self.needs_lowering(right) {
            l = self.spill(l, &left.ty);
        }
        let r = self.lower(right)?;
        Ok(Expr::Binary {
            op,
            left: Box::new(l),
            right: Box::new(r),
        })
    }

    fn lower_call(&mut self, func: &str, args: &[Node]) -> Result<Expr, LoweringError> {
        let call = self.host_call(func)?;
        let last = args.iter().rposition(|a| self.needs_lowering(a));
        let mut lowered = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let mut value = self.lower(arg)?;
            if last.map_or(false, |l| i < l) {
                value = self.spill(value, &arg.ty);
            }
            lowered.push(value);
        }
        Ok(Expr::Call {
            call,
            args: lowered,
        })
    }

    fn lower_if(
        &mut self,
        test: &Node,
        if_true: &Node,
        if_false: Option<&Node>,
        ty: &Ty,
    ) -> Result<Expr, LoweringError> {
        let test = self.lower(test)?;
        let split = self.needs_lowering(if_true) || if_false.map_or(false, |f| self.needs_lowering(f));
        if !split {
            let t = self.leaf(if_true)?;
            let f = if_false.map(|f| self.leaf(f)).transpose()?;
            return Ok(Expr::If {
                test: Box::new(test),
                if_true: Box::new(t),
                if_false: f.map(Box::new),
            });
        }

        let result = match if_false {
            Some(_) if !ty.is_unit() => Some(self.resolver.temp("if", ty.clone(), VarKind::Temp)),
            _ => None,
        };
        let (join, group) = self.enter_group();
        let t = self.lower_branch(if_true, join, group, result, Vec::new())?;
        let f = match if_false {
            Some(f) => self.lower_branch(f, join, group, result, Vec::new())?,
            None => join,
        };
        self.graph.close(
            self.current,
            Transition::Conditional {
                test,
                if_true: t,
                if_false: f,
            },
        );
        self.current = join;
        Ok(result.map_or_else(Expr::unit, Expr::Load))
    }

    fn lower_loop(
        &mut self,
        body: &Node,
        break_label: Option<&Label>,
        continue_label: Option<&Label>,
    ) -> Result<Expr, LoweringError> {
        let (join, group) = self.enter_group();
        let entry = self.new_state(group);
        if let Some(label) = break_label {
            self.place_label(label, join);
        }
        if let Some(label) = continue_label {
            self.place_label(label, entry);
        }
        self.graph.close(
            self.current,
            Transition::Loop {
                body: entry,
                continue_target: Some(entry),
                break_target: break_label.map(|_| join),
            },
        );

        self.current = entry;
        let value = self.lower(body)?;
        self.emit_effect(value);
        // Falling off the body goes back to its own head, not the join.
        self.graph.close(self.current, Transition::Goto { target: entry });
        self.current = join;
        Ok(Expr::unit())
    }

    fn lower_switch(
        &mut self,
        value: &Node,
        cases: &[SwitchCase],
        default: Option<&Node>,
        ty: &Ty,
    ) -> Result<Expr, LoweringError> {
        if cases
            .iter()
            .any(|c| c.tests.iter().any(|t| t.contains_suspension()))
        {
            return Err(LoweringError::SuspendInCaseTest);
        }
        let value = self.lower(value)?;
        let mut tests = Vec::with_capacity(cases.len());
        for case in cases {
            let mut row = Vec::with_capacity(case.tests.len());
            for test in &case.tests {
                row.push(self.leaf(test)?);
            }
            tests.push(row);
        }

        let split = cases.iter().any(|c| self.needs_lowering(&c.body))
            || default.map_or(false, |d| self.needs_lowering(d));
        if !split {
            let mut leaf_cases = Vec::with_capacity(cases.len());
            for (row, case) in tests.into_iter().zip(cases) {
                leaf_cases.push((row, self.leaf(&case.body)?));
            }
            let default = default.map(|d| self.leaf(d)).transpose()?;
            return Ok(Expr::Switch {
                value: Box::new(value),
                cases: leaf_cases,
                default: default.map(Box::new),
            });
        }

        let result = (!ty.is_unit()).then(|| self.resolver.temp("switch", ty.clone(), VarKind::Temp));
        let (join, group) = self.enter_group();
        let mut targets = Vec::with_capacity(cases.len());
        for (row, case) in tests.into_iter().zip(cases) {
            let state = self.lower_branch(&case.body, join, group, result, Vec::new())?;
            targets.push((row, state));
        }
        let default = match default {
            Some(d) => self.lower_branch(d, join, group, result, Vec::new())?,
            None => join,
        };
        self.graph.close(
            self.current,
            Transition::Switch {
                value,
                cases: targets,
                default,
            },
        );
        self.current = join;
        Ok(result.map_or_else(Expr::unit, Expr::Load))
    }

    fn lower_try(
        &mut self,
        body: &Node,
        handlers: &[CatchBlock],
        finally: Option<&Node>,
        ty: &Ty,
    ) -> Result<Expr, LoweringError> {
        let outer = self.guard;
        let region = RegionId(self.graph.regions.len() as u32);
        let try_state_var = self.resolver.temp("try_state", Ty::Int, VarKind::Region);
        let exception_var = self.resolver.temp("exception", Ty::Fault, VarKind::Region);
        let pending_fault_var = self.resolver.temp("pending_fault", Ty::Any, VarKind::Region);
        let pending_jump_var = self.resolver.temp("pending_jump", Ty::Any, VarKind::Region);
        let body_guard = self.graph.new_guard(Guard {
            region,
            phase: GuardPhase::Body,
        });
        let handler_guard = self.graph.new_guard(Guard {
            region,
            phase: GuardPhase::Handler,
        });

        let result = (!ty.is_unit()).then(|| self.resolver.temp("try", ty.clone(), VarKind::Temp));
        let (join, group) = self.enter_group();
        // The finally runs under the guard that encloses the whole try.
        let finally_state = finally.map(|_| self.new_state(group));
        self.graph.regions.push(TryRegion {
            id: region,
            try_state_var,
            exception_var,
            pending_fault_var,
            pending_jump_var,
            catches: Vec::new(),
            finally: finally_state,
            join,
            parent_guard: outer,
        });
        let exit = finally_state.unwrap_or(join);

        let body_scope = self.graph.new_scope(self.scope);
        let try_entry = self.in_region(body_scope, Some(body_guard), |lw| {
            lw.lower_branch(body, exit, group, result, Vec::new())
        })?;

        let mut catches = Vec::with_capacity(handlers.len());
        for (i, handler) in handlers.iter().enumerate() {
            let vars: Vec<Var> = handler.var.iter().cloned().collect();
            let prelude = handler
                .var
                .iter()
                .map(|v| Expr::Store {
                    var: v.id,
                    value: Box::new(Expr::Load(exception_var)),
                })
                .collect();
            let scope = self.scope;
            let state = self.in_region(scope, Some(handler_guard), |lw| {
                lw.with_handler(exception_var, |lw| {
                    lw.with_scope(&vars, true, |lw| {
                        lw.lower_branch(&handler.body, exit, group, result, prelude)
                    })
                })
            })?;
            catches.push(CatchTarget {
                filter: handler.filter.clone(),
                state,
                index: i as u32 + 1,
            });
        }

        if let (Some(state), Some(node)) = (finally_state, finally) {
            let saved = self.current;
            self.current = state;
            let value = self.lower(node)?;
            self.emit_effect(value);
            self.graph
                .close(self.current, Transition::EndFinally { region, join });
            self.current = saved;
        }

        self.graph.regions[region.0 as usize].catches = catches.clone();
        self.graph.close(
            self.current,
            Transition::TryCatch {
                try_state: try_entry,
                catches,
                finally: finally_state,
                scope: body_scope,
                region,
            },
        );
        self.current = join;
        Ok(result.map_or_else(Expr::unit, Expr::Load))
    }

    fn lower_await(&mut self, target: &Node, configure_await: bool) -> Result<Expr, LoweringError> {
        if self.kind == MachineKind::Generator {
            return Err(LoweringError::AwaitInGenerator {
                machine: self.name.clone(),
            });
        }
        let value = self.lower(target)?;
        let binding = self.env.awaiters().resolve(&target.ty)?;
        let awaiter = self
            .resolver
            .temp("awaiter", binding.awaiter.clone(), VarKind::Awaiter);
        let result = self
            .resolver
            .temp("result", binding.result.clone(), VarKind::Temp);

        let source = self.current;
        let key = i64::from(source.0);
        let (join, group) = self.enter_group();
        let completion = self.new_state(group);
        self.graph.set_transition(
            source,
            Transition::Suspend {
                target: value,
                awaiter,
                completion,
                binding: binding.clone(),
                configure_await,
                key,
            },
        );
        self.graph.set_transition(
            completion,
            Transition::SuspendResume {
                target: join,
                awaiter,
                result,
                binding,
            },
        );
        let parent_scope = self.graph.scopes[self.scope.0 as usize].parent;
        self.graph.add_jump_case(
            self.scope,
            JumpCase {
                resume: completion,
                continue_: join,
                key,
                parent_scope,
            },
        );
        self.suspensions += 1;
        self.current = join;
        Ok(Expr::Load(result))
    }

    fn lower_yield(&mut self, value: &Node) -> Result<Expr, LoweringError> {
        if self.kind != MachineKind::Generator {
            return Err(LoweringError::YieldOutsideGenerator {
                machine: self.name.clone(),
            });
        }
        let value = self.lower(value)?;
        let source = self.current;
        let key = i64::from(source.0);
        let group = self.graph.new_group();
        let resume = self.new_state(group);
        self.graph.set_transition(source, Transition::Yield { value, resume, key });
        let parent_scope = self.graph.scopes[self.scope.0 as usize].parent;
        self.graph.add_jump_case(
            self.scope,
            JumpCase {
                resume,
                continue_: resume,
                key,
                parent_scope,
            },
        );
        self.suspensions += 1;
        self.current = resume;
        Ok(Expr::unit())
    }

    fn lower_goto(&mut self, label: &Label) -> Result<Expr, LoweringError> {
        let target = self.label_state(label);
        self.graph.close(self.current, Transition::Goto { target });
        // Anything after the jump lands in a state nothing reaches.
        let group = self.current_group();
        self.current = self.new_state(group);
        Ok(Expr::unit())
    }

    fn lower_label(&mut self, label: &Label) -> Result<Expr, LoweringError> {
        let group = self.current_group();
        let state = match self.labels.get_mut(&label.id) {
            Some(slot) => {
                slot.placed = true;
                let state = slot.state;
                self.graph.relocate(state, self.scope, group, self.guard);
                state
            }
            None => {
                let state = self.new_state(group);
                self.labels.insert(
                    label.id,
                    LabelSlot {
                        state,
                        placed: true,
                        name: label.to_string(),
                    },
                );
                state
            }
        };
        self.graph.close(self.current, Transition::Goto { target: state });
        self.current = state;
        Ok(Expr::unit())
    }

    fn lower_return(&mut self, value: Option<&Node>) -> Result<Expr, LoweringError> {
        if let Some(node) = value {
            let value = self.lower_value(node)?;
            match self.final_var {
                Some(var) => {
                    self.graph.push_leaf(
                        self.current,
                        Expr::Store {
                            var,
                            value: Box::new(value),
                        },
                    );
                    self.explicit_final = true;
                }
                None => self.emit_effect(value),
            }
        }
        let target = self.return_state();
        self.graph.close(self.current, Transition::Goto { target });
        let group = self.current_group();
        self.current = self.new_state(group);
        Ok(Expr::unit())
    }

    /// Lower `node` whether or not it needs splitting.
    fn lower_value(&mut self, node: &Node) -> Result<Expr, LoweringError> {
        if self.needs_lowering(node) {
            self.lower(node)
        } else {
            self.leaf(node)
        }
    }
}
