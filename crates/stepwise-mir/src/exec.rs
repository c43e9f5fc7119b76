// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Step function.
//!
//! An instance is one run of a synthesized machine: its storage cells, the
//! state field and the completion source. `step` dispatches on the state
//! field, then runs states until the machine suspends, yields, completes or
//! fails. Resumption comes from the waker registered with the awaited
//! operation, never from the machine itself.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::task::{Wake, Waker};

use stepwise_ast::{MachineKind, VarId};
use stepwise_rt::{lock, AwaiterBinding, CompletionSource, Fault, Task, Value};

use crate::eval::{Cell, Evaluator, Flow};
use crate::jump_table::{STATE_DONE, STATE_RUNNING, STATE_START};
use crate::state::{GuardPhase, StateId};
use crate::synth::MachineDefinition;
use crate::transition::Transition;

/// Start an async machine and return its task.
pub(crate) fn start(def: &Arc<MachineDefinition>, shared: HashMap<VarId, Cell>) -> Task {
    let source = CompletionSource::new();
    let task = source.task();
    let instance = Arc::new(Instance::new(def.clone(), shared, Some(source)));
    instance.resume();
    task
}

pub(crate) fn iterate(def: &Arc<MachineDefinition>, shared: HashMap<VarId, Cell>) -> GeneratorHandle {
    GeneratorHandle {
        instance: Arc::new(Instance::new(def.clone(), shared, None)),
        done: false,
    }
}

/// Value a nested machine expression evaluates to: the task of an async
/// body, or a `Stream` object wrapping a generator.
pub(crate) fn spawn(def: &Arc<MachineDefinition>, shared: HashMap<VarId, Cell>) -> Value {
    match def.kind() {
        MachineKind::Async => Value::Task(start(def, shared)),
        MachineKind::Generator => Value::object("Stream", Mutex::new(iterate(def, shared))),
    }
}

struct Core {
    tag: i64,
    source: Option<CompletionSource>,
}

enum Outcome {
    Suspended {
        at: StateId,
        awaiter: Value,
        binding: Arc<AwaiterBinding>,
        configure_await: bool,
    },
    Yielded(Value),
    Completed(Value),
    Failed(Fault),
    /// Running elsewhere or already finished.
    Idle,
}

/// Where a state hands control.
enum Next {
    Goto(StateId),
    Suspend {
        key: i64,
        awaiter: Value,
        binding: Arc<AwaiterBinding>,
        configure_await: bool,
    },
    Yield {
        key: i64,
        value: Value,
    },
    Final(Value),
}

pub(crate) struct Instance {
    def: Arc<MachineDefinition>,
    slots: Vec<Cell>,
    core: Mutex<Core>,
}

macro_rules! eval_or_escape {
    ($self:ident, $at:expr, $ev:expr, $expr:expr) => {
        match $ev.eval($expr) {
            Ok(v) => v,
            Err(flow) => return $self.escape($at, flow),
        }
    };
}

impl Instance {
    fn new(
        def: Arc<MachineDefinition>,
        mut shared: HashMap<VarId, Cell>,
        source: Option<CompletionSource>,
    ) -> Self {
        let mut slots: Vec<Cell> = def
            .slot_types
            .iter()
            .map(|ty| Arc::new(Mutex::new(Value::default_for(ty))))
            .collect();
        for (var, slot) in &def.slot_of {
            if let Some(cell) = shared.remove(var) {
                slots[*slot] = cell;
            }
        }
        Self {
            def,
            slots,
            core: Mutex::new(Core {
                tag: STATE_START,
                source,
            }),
        }
    }

    /// Drive an async machine until it suspends or finishes.
    fn resume(self: &Arc<Self>) {
        let mut injected = None;
        loop {
            match self.step_guarded(injected.take()) {
                Outcome::Suspended {
                    at,
                    awaiter,
                    binding,
                    configure_await,
                } => {
                    tracing::debug!(
                        target: "stepwise::exec",
                        machine = %self.def.name(),
                        state = %at,
                        "suspended"
                    );
                    let waker = Waker::from(Arc::new(Resumer {
                        instance: Arc::clone(self),
                        on_context: configure_await,
                    }));
                    match binding.on_completed(&awaiter, waker) {
                        Ok(()) => return,
                        Err(fault) => injected = Some((at, fault)),
                    }
                }
                Outcome::Completed(value) => {
                    tracing::debug!(target: "stepwise::exec", machine = %self.def.name(), "completed");
                    self.finish(Ok(value));
                    return;
                }
                Outcome::Failed(fault) => {
                    tracing::debug!(
                        target: "stepwise::exec",
                        machine = %self.def.name(),
                        kind = %fault.kind,
                        "failed"
                    );
                    self.finish(Err(fault));
                    return;
                }
                Outcome::Yielded(_) | Outcome::Idle => return,
            }
        }
    }

    fn finish(&self, outcome: Result<Value, Fault>) {
        // Complete outside the lock: continuations may run inline.
        let source = lock(&self.core).source.take();
        if let Some(source) = source {
            source.complete(outcome);
        }
    }

    /// One invocation of the step function, inside the failure boundary.
    fn step_guarded(&self, injected: Option<(StateId, Fault)>) -> Outcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut core = lock(&self.core);
            self.step(&mut core, injected)
        }));
        match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let fault = Fault::from_panic(payload);
                tracing::warn!(
                    target: "stepwise::exec",
                    machine = %self.def.name(),
                    message = %fault.message,
                    "panic in step function"
                );
                lock(&self.core).tag = STATE_DONE;
                Outcome::Failed(fault)
            }
        }
    }

    fn step(&self, core: &mut Core, injected: Option<(StateId, Fault)>) -> Outcome {
        let mut at = match injected {
            Some((at, fault)) => {
                core.tag = STATE_RUNNING;
                match self.route_fault(at, fault) {
                    Ok(next) => next,
                    Err(fault) => {
                        core.tag = STATE_DONE;
                        return Outcome::Failed(fault);
                    }
                }
            }
            None => match core.tag {
                STATE_START => self.def.lowering.entry,
                STATE_RUNNING | STATE_DONE => return Outcome::Idle,
                key => match self.def.resume_target(key) {
                    Some(case) => {
                        tracing::debug!(
                            target: "stepwise::exec",
                            machine = %self.def.name(),
                            key,
                            state = %case.target,
                            scope_depth = case.route.len(),
                            "resumed"
                        );
                        case.target
                    }
                    None => {
                        core.tag = STATE_DONE;
                        return Outcome::Failed(Fault::invalid_state(format!(
                            "no resume point for state {}",
                            key
                        )));
                    }
                },
            },
        };
        core.tag = STATE_RUNNING;

        loop {
            tracing::trace!(target: "stepwise::exec", state = %at, "enter");
            let next = match self.run_state(at) {
                Ok(next) => next,
                Err(fault) => match self.route_fault(at, fault) {
                    Ok(handler) => Next::Goto(handler),
                    Err(fault) => {
                        core.tag = STATE_DONE;
                        return Outcome::Failed(fault);
                    }
                },
            };
            match next {
                Next::Goto(target) => at = target,
                Next::Suspend {
                    key,
                    awaiter,
                    binding,
                    configure_await,
                } => {
                    core.tag = key;
                    return Outcome::Suspended {
                        at,
                        awaiter,
                        binding,
                        configure_await,
                    };
                }
                Next::Yield { key, value } => {
                    core.tag = key;
                    return Outcome::Yielded(value);
                }
                Next::Final(value) => {
                    core.tag = STATE_DONE;
                    return Outcome::Completed(value);
                }
            }
        }
    }

    fn run_state(&self, id: StateId) -> Result<Next, Fault> {
        let lowering = &self.def.lowering;
        let state = lowering.state(id);
        let mut ev = Evaluator::new(&self.slots, &self.def.slot_of);

        for leaf in &state.leaves {
            eval_or_escape!(self, id, ev, leaf);
        }
        if let (Some(var), Some(value)) = (state.result.variable, &state.result.value) {
            let v = eval_or_escape!(self, id, ev, value);
            ev.write(var, v);
        }

        let transition = match &state.transition {
            Some(t) => t,
            None => {
                return Err(Fault::invalid_state(format!(
                    "state {} has no transition",
                    id
                )))
            }
        };
        match transition {
            Transition::Goto { target } => self.transfer(id, *target),
            Transition::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let taken = eval_or_escape!(self, id, ev, test);
                Ok(Next::Goto(if taken.as_bool()? { *if_true } else { *if_false }))
            }
            Transition::Switch {
                value,
                cases,
                default,
            } => {
                let value = eval_or_escape!(self, id, ev, value);
                for (tests, target) in cases {
                    for test in tests {
                        let candidate = eval_or_escape!(self, id, ev, test);
                        if candidate == value {
                            return Ok(Next::Goto(*target));
                        }
                    }
                }
                Ok(Next::Goto(*default))
            }
            Transition::TryCatch {
                try_state, region, ..
            } => {
                let r = lowering.region(*region);
                ev.write(r.try_state_var, Value::Int(0));
                ev.write(r.exception_var, Value::Unit);
                ev.write(r.pending_fault_var, Value::Unit);
                ev.write(r.pending_jump_var, Value::Unit);
                Ok(Next::Goto(*try_state))
            }
            Transition::Loop { body, .. } => Ok(Next::Goto(*body)),
            Transition::Suspend {
                target,
                awaiter,
                completion,
                binding,
                configure_await,
                key,
            } => {
                let awaitable = eval_or_escape!(self, id, ev, target);
                let handle = binding.get_awaiter(&awaitable)?;
                ev.write(*awaiter, handle.clone());
                if binding.is_completed(&handle)? {
                    return Ok(Next::Goto(*completion));
                }
                Ok(Next::Suspend {
                    key: *key,
                    awaiter: handle,
                    binding: binding.clone(),
                    configure_await: *configure_await,
                })
            }
            Transition::SuspendResume {
                target,
                awaiter,
                result,
                binding,
            } => {
                let handle = self.take(*awaiter);
                let value = binding.get_result(&handle)?;
                ev.write(*result, value);
                Ok(Next::Goto(*target))
            }
            Transition::Yield { value, key, .. } => {
                let value = eval_or_escape!(self, id, ev, value);
                Ok(Next::Yield { key: *key, value })
            }
            Transition::EndFinally { region, join } => {
                let r = lowering.region(*region);
                if let Value::Fault(fault) = self.take(r.pending_fault_var) {
                    return Err(fault);
                }
                match self.take(r.pending_jump_var) {
                    Value::Int(target) => self.transfer(id, StateId(target as u32)),
                    _ => self.transfer(id, *join),
                }
            }
            Transition::Final => {
                let value = match lowering.final_var {
                    Some(var) => ev.read(var)?,
                    None => Value::Unit,
                };
                Ok(Next::Final(value))
            }
        }
    }

    /// Leave a leaf early.
    fn escape(&self, at: StateId, flow: Flow) -> Result<Next, Fault> {
        let lowering = &self.def.lowering;
        match flow {
            Flow::Fault(fault) => Err(fault),
            Flow::Goto(label) => match lowering.labels.get(&label) {
                Some(target) => self.transfer(at, *target),
                None => Err(Fault::invalid_state(format!(
                    "jump to unplaced label L{}",
                    label.0
                ))),
            },
            Flow::Return => match lowering.return_state {
                Some(target) => self.transfer(at, target),
                None => Err(Fault::invalid_state("return without a return state")),
            },
        }
    }

    /// Move from `from` to `to`, detouring through the finally of every
    /// region the move leaves. Only the innermost detour is taken now; its
    /// `EndFinally` continues the move.
    fn transfer(&self, from: StateId, to: StateId) -> Result<Next, Fault> {
        let lowering = &self.def.lowering;
        let mut guard = lowering.state(from).guard;
        while let Some(g) = guard {
            let region = lowering.region(lowering.guard(g).region);
            if let Some(finally) = region.finally {
                if to != finally && !lowering.guarded_by(to, region.id) {
                    self.put(region.pending_jump_var, Value::Int(i64::from(to.0)));
                    return Ok(Next::Goto(finally));
                }
            }
            guard = region.parent_guard;
        }
        Ok(Next::Goto(to))
    }

    /// Find the handler for a failure raised in `at`.
    fn route_fault(&self, at: StateId, fault: Fault) -> Result<StateId, Fault> {
        let lowering = &self.def.lowering;
        let mut guard = lowering.state(at).guard;
        while let Some(g) = guard {
            let g = lowering.guard(g);
            let region = lowering.region(g.region);
            if g.phase == GuardPhase::Body {
                if let Some(c) = region.catches.iter().find(|c| c.filter.matches(&fault.kind)) {
                    tracing::trace!(
                        target: "stepwise::exec",
                        state = %at,
                        handler = %c.state,
                        kind = %fault.kind,
                        "caught"
                    );
                    self.put(region.exception_var, Value::Fault(fault));
                    self.put(region.try_state_var, Value::Int(i64::from(c.index)));
                    return Ok(c.state);
                }
            }
            if let Some(finally) = region.finally {
                self.put(region.pending_fault_var, Value::Fault(fault));
                return Ok(finally);
            }
            guard = region.parent_guard;
        }
        Err(fault)
    }

    fn put(&self, var: VarId, value: Value) {
        if let Some(slot) = self.def.slot_of.get(&var) {
            *lock(&self.slots[*slot]) = value;
        }
    }

    fn take(&self, var: VarId) -> Value {
        match self.def.slot_of.get(&var) {
            Some(slot) => std::mem::take(&mut *lock(&self.slots[*slot])),
            None => Value::Unit,
        }
    }
}

/// Continuation handed to the awaited operation.
struct Resumer {
    instance: Arc<Instance>,
    on_context: bool,
}

impl Wake for Resumer {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let context = if self.on_context {
            self.instance.def.env.resume_context().cloned()
        } else {
            None
        };
        match context {
            Some(context) => {
                let instance = self.instance.clone();
                context.post(Box::new(move || instance.resume()));
            }
            None => self.instance.resume(),
        }
    }
}

/// Iterator over a generator machine's items.
pub struct GeneratorHandle {
    instance: Arc<Instance>,
    done: bool,
}

impl Iterator for GeneratorHandle {
    type Item = Result<Value, Fault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.instance.step_guarded(None) {
            Outcome::Yielded(value) => Some(Ok(value)),
            Outcome::Completed(_) | Outcome::Idle => {
                self.done = true;
                None
            }
            Outcome::Failed(fault) => {
                self.done = true;
                Some(Err(fault))
            }
            Outcome::Suspended { .. } => {
                self.done = true;
                Some(Err(Fault::invalid_state("generator suspended on an await")))
            }
        }
    }
}

impl std::fmt::Debug for GeneratorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorHandle")
            .field("machine", &self.instance.def.name())
            .field("done", &self.done)
            .finish()
    }
}
