// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Whole-pipeline tests: lower, optimize, synthesize, then run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stepwise_ast::{AsyncBlock, BinOp, CatchBlock, Label, MachineKind, Node, SwitchCase, Ty, Var};
use stepwise_mir::{transform, CompiledMachine, FieldKind, LoweringError, Transition, TransformOptions};
use stepwise_rt::{CompletionSource, Fault, HostEnv, HostEnvBuilder, JobQueue, Returns, Task, Value};

fn async_block(result_ty: Ty, vars: Vec<Var>, body: Vec<Node>) -> AsyncBlock {
    AsyncBlock {
        name: "body".into(),
        kind: MachineKind::Async,
        result_ty,
        vars,
        body,
    }
}

fn compile(block: &AsyncBlock, externs: &[Var], env: Arc<HostEnv>) -> CompiledMachine {
    transform(block, externs, env, &TransformOptions::default()).unwrap()
}

fn future_int(name: &str) -> Var {
    Var::new(name, Ty::future(Ty::Int))
}

fn counter(env: HostEnvBuilder, name: &str, hits: &Arc<AtomicUsize>) -> HostEnvBuilder {
    let hits = hits.clone();
    env.function(name, move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Unit)
    })
}

mod sequential {
    use super::*;

    fn sum_of_two() -> (AsyncBlock, Var, Var) {
        let a = future_int("a");
        let b = future_int("b");
        let x = Var::new("x", Ty::Int);
        let y = Var::new("y", Ty::Int);
        let block = async_block(
            Ty::Int,
            vec![x.clone(), y.clone()],
            vec![
                Node::assign(&x, Node::await_(Node::var(&a))),
                Node::assign(&y, Node::await_(Node::var(&b))),
                Node::ret(Some(Node::add(Node::var(&x), Node::var(&y)))),
            ],
        );
        (block, a, b)
    }

    #[test]
    fn ready_tasks_complete_synchronously() {
        let (block, a, b) = sum_of_two();
        let m = compile(&block, &[a.clone(), b.clone()], HostEnv::empty());
        let task = m.start(&[
            (&a, Value::Task(Task::ready(Value::Int(1)))),
            (&b, Value::Task(Task::ready(Value::Int(2)))),
        ]);
        assert!(task.is_complete());
        assert_eq!(task.wait().unwrap(), Value::Int(3));
    }

    #[test]
    fn pending_tasks_resume_in_order() {
        let (block, a, b) = sum_of_two();
        let m = compile(&block, &[a.clone(), b.clone()], HostEnv::empty());
        let first = CompletionSource::new();
        let second = CompletionSource::new();
        let task = m.start(&[
            (&a, Value::Task(first.task())),
            (&b, Value::Task(second.task())),
        ]);
        assert!(!task.is_complete());
        first.set_result(Value::Int(1));
        assert!(!task.is_complete());
        second.set_result(Value::Int(2));
        assert_eq!(task.wait().unwrap(), Value::Int(3));
    }

    #[test]
    fn first_completion_flows_into_second_suspension() {
        let (block, a, b) = sum_of_two();
        let m = compile(&block, &[a, b], HostEnv::empty());
        let r = m.lowering();
        assert_eq!(r.suspension_count, 2);
        assert_eq!(r.jump_case_count(), 2);
        let completion = r
            .states
            .iter()
            .find_map(|s| match &s.transition {
                Some(Transition::SuspendResume { target, .. }) => Some(*target),
                _ => None,
            })
            .unwrap();
        let suspends: Vec<_> = r
            .root_scope()
            .states
            .iter()
            .filter(|id| matches!(r.state(**id).transition, Some(Transition::Suspend { .. })))
            .copied()
            .collect();
        assert_eq!(suspends.len(), 2);
        assert!(suspends.contains(&completion));
        assert!(r.final_result_has_explicit_assignment);
    }

    #[test]
    fn unoptimized_machine_behaves_the_same() {
        let (block, a, b) = sum_of_two();
        let options = TransformOptions::default().without_optimization();
        let m = transform(&block, &[a.clone(), b.clone()], HostEnv::empty(), &options).unwrap();
        let task = m.start(&[
            (&a, Value::Task(Task::ready(Value::Int(20)))),
            (&b, Value::Task(Task::ready(Value::Int(22)))),
        ]);
        assert_eq!(task.wait().unwrap(), Value::Int(42));
    }
}

mod branching {
    use super::*;

    fn switch_block(f: &Var, sel: &Var) -> AsyncBlock {
        let case = |n: i64, body: i64| {
            SwitchCase::new(
                vec![Node::int(n)],
                Node::add(Node::await_(Node::var(f)), Node::int(body)),
            )
        };
        async_block(
            Ty::Int,
            vec![],
            vec![Node::switch(
                Node::var(sel),
                vec![case(1, 1), case(2, 2), case(3, 3)],
                Some(Node::int(0)),
            )],
        )
    }

    #[test]
    fn switch_branches_share_one_group_with_the_join() {
        let f = future_int("f");
        let sel = Var::new("sel", Ty::Int);
        let block = async_block(
            Ty::Unit,
            vec![],
            vec![Node::switch(
                Node::var(&sel),
                (1..=3)
                    .map(|n| {
                        SwitchCase::new(
                            vec![Node::int(n)],
                            Node::seq(vec![Node::await_(Node::var(&f)), Node::unit()]),
                        )
                    })
                    .collect(),
                None,
            )],
        );
        let r = stepwise_mir::lower::lower(
            &block,
            &[f, sel],
            &HostEnv::empty(),
            &TransformOptions::default(),
        )
        .unwrap();
        let default = r
            .states
            .iter()
            .find_map(|s| match &s.transition {
                Some(Transition::Switch { default, .. }) => Some(*default),
                _ => None,
            })
            .unwrap();
        let group = r.state(default).group;
        assert_eq!(r.states.iter().filter(|s| s.group == group).count(), 4);
    }

    #[test]
    fn switch_default_adds_one_branch_state() {
        let f = future_int("f");
        let sel = Var::new("sel", Ty::Int);
        let case = |n: i64| {
            SwitchCase::new(vec![Node::int(n)], Node::await_(Node::var(&f)))
        };
        let block = async_block(
            Ty::Int,
            vec![],
            vec![Node::switch(
                Node::var(&sel),
                vec![case(1), case(2)],
                Some(Node::int(0)),
            )],
        );
        let r = stepwise_mir::lower::lower(
            &block,
            &[f.clone(), sel],
            &HostEnv::empty(),
            &TransformOptions::default(),
        )
        .unwrap();
        let (cases, default) = r
            .states
            .iter()
            .find_map(|s| match &s.transition {
                Some(Transition::Switch { cases, default, .. }) => Some((cases.clone(), *default)),
                _ => None,
            })
            .unwrap();
        let group = r.state(default).group;
        assert!(cases.iter().all(|(_, target)| r.state(*target).group == group));
        // Two cases, the default, and the join.
        assert_eq!(r.states.iter().filter(|s| s.group == group).count(), 2 + 1 + 1);
    }

    #[test]
    fn switch_value_selects_the_suspending_branch() {
        let f = future_int("f");
        let sel = Var::new("sel", Ty::Int);
        let block = switch_block(&f, &sel);
        let m = compile(&block, &[f.clone(), sel.clone()], HostEnv::empty());
        for (choice, expected) in [(1, 11), (2, 12), (3, 13), (9, 0)] {
            let source = CompletionSource::new();
            let task = m.start(&[(&f, Value::Task(source.task())), (&sel, Value::Int(choice))]);
            source.set_result(Value::Int(10));
            assert_eq!(task.wait().unwrap(), Value::Int(expected), "sel = {}", choice);
        }
    }

    #[test]
    fn conditional_with_awaits_in_both_arms() {
        let f = future_int("f");
        let g = future_int("g");
        let flag = Var::new("flag", Ty::Bool);
        let block = async_block(
            Ty::Int,
            vec![],
            vec![Node::if_else(
                Node::var(&flag),
                Node::await_(Node::var(&f)),
                Node::await_(Node::var(&g)),
            )],
        );
        let m = compile(&block, &[f.clone(), g.clone(), flag.clone()], HostEnv::empty());
        for (choice, expected) in [(true, 1), (false, 2)] {
            let task = m.start(&[
                (&f, Value::Task(Task::ready(Value::Int(1)))),
                (&g, Value::Task(Task::ready(Value::Int(2)))),
                (&flag, Value::Bool(choice)),
            ]);
            assert_eq!(task.wait().unwrap(), Value::Int(expected));
        }
    }

    #[test]
    fn continue_label_restarts_the_body() {
        let f = future_int("f");
        let i = Var::new("i", Ty::Int);
        let odd = Var::new("odd", Ty::Int);
        let next = Label::named("next");
        let done = Label::named("done");
        let block = async_block(
            Ty::Int,
            vec![i.clone(), odd.clone()],
            vec![
                Node::loop_(
                    Node::seq(vec![
                        Node::assign(&i, Node::add(Node::var(&i), Node::await_(Node::var(&f)))),
                        Node::if_then(
                            Node::binary(BinOp::Gt, Node::var(&i), Node::int(6)),
                            Node::goto(&done),
                        ),
                        Node::if_then(
                            Node::binary(
                                BinOp::Eq,
                                Node::binary(BinOp::Rem, Node::var(&i), Node::int(2)),
                                Node::int(0),
                            ),
                            Node::goto(&next),
                        ),
                        Node::assign(&odd, Node::add(Node::var(&odd), Node::int(1))),
                    ]),
                    Some(done.clone()),
                    Some(next.clone()),
                ),
                Node::var(&odd),
            ],
        );
        let m = compile(&block, &[f.clone()], HostEnv::empty());
        let r = m.lowering();
        let body = r
            .states
            .iter()
            .find_map(|s| match &s.transition {
                Some(Transition::Loop { body, .. }) => Some(*body),
                _ => None,
            })
            .unwrap();
        assert_eq!(r.labels[&next.id], body);

        let task = m.start(&[(&f, Value::Task(Task::ready(Value::Int(1))))]);
        // i = 1, 3, 5 are counted; 2, 4, 6 continue; 7 breaks.
        assert_eq!(task.wait().unwrap(), Value::Int(3));
    }

    #[test]
    fn loop_with_await_runs_until_break() {
        let f = future_int("f");
        let total = Var::new("total", Ty::Int);
        let done = Label::named("done");
        let block = async_block(
            Ty::Int,
            vec![total.clone()],
            vec![
                Node::loop_(
                    Node::seq(vec![
                        Node::if_then(
                            Node::binary(BinOp::Ge, Node::var(&total), Node::int(10)),
                            Node::goto(&done),
                        ),
                        Node::assign(
                            &total,
                            Node::add(Node::var(&total), Node::await_(Node::var(&f))),
                        ),
                    ]),
                    Some(done.clone()),
                    None,
                ),
                Node::var(&total),
            ],
        );
        let m = compile(&block, &[f.clone()], HostEnv::empty());
        let task = m.start(&[(&f, Value::Task(Task::ready(Value::Int(4))))]);
        assert_eq!(task.wait().unwrap(), Value::Int(12));
    }
}

mod faults {
    use super::*;

    struct Counters {
        caught: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
    }

    fn env_with_counters() -> (Arc<HostEnv>, Counters) {
        let counters = Counters {
            caught: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        };
        let env = HostEnv::builder().function("fail", |_| Err(Fault::new("io", "nope")));
        let env = counter(env, "on_catch", &counters.caught);
        let env = counter(env, "on_finally", &counters.finished);
        (env.build(), counters)
    }

    #[test]
    fn fault_after_resume_is_caught_and_finally_runs_once() {
        let (env, counters) = env_with_counters();
        let f = future_int("f");
        let block = async_block(
            Ty::Unit,
            vec![],
            vec![Node::try_catch(
                Node::seq(vec![
                    Node::await_(Node::var(&f)),
                    Node::call("fail", vec![], Ty::Unit),
                ]),
                vec![CatchBlock::kind(
                    "io",
                    None,
                    Node::call("on_catch", vec![], Ty::Unit),
                )],
                Some(Node::call("on_finally", vec![], Ty::Unit)),
            )],
        );
        let m = compile(&block, &[f.clone()], env);
        let source = CompletionSource::new();
        let task = m.start(&[(&f, Value::Task(source.task()))]);
        assert_eq!(counters.finished.load(Ordering::SeqCst), 0);
        source.set_result(Value::Int(0));
        assert_eq!(task.wait().unwrap(), Value::Unit);
        assert_eq!(counters.caught.load(Ordering::SeqCst), 1);
        assert_eq!(counters.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_the_first_matching_handler_runs() {
        let timeout = Arc::new(AtomicUsize::new(0));
        let io = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));
        let env = HostEnv::builder().function("fail", |_| Err(Fault::new("io", "nope")));
        let env = counter(env, "on_timeout", &timeout);
        let env = counter(env, "on_io", &io);
        let env = counter(env, "on_any", &any).build();
        let f = future_int("f");
        let block = async_block(
            Ty::Unit,
            vec![],
            vec![Node::try_catch(
                Node::seq(vec![
                    Node::await_(Node::var(&f)),
                    Node::call("fail", vec![], Ty::Unit),
                ]),
                vec![
                    CatchBlock::kind("timeout", None, Node::call("on_timeout", vec![], Ty::Unit)),
                    CatchBlock::kind("io", None, Node::call("on_io", vec![], Ty::Unit)),
                    CatchBlock::any(None, Node::call("on_any", vec![], Ty::Unit)),
                ],
                None,
            )],
        );
        let m = compile(&block, &[f.clone()], env);
        let indices: Vec<u32> = m.lowering().regions[0].catches.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);

        let source = CompletionSource::new();
        let task = m.start(&[(&f, Value::Task(source.task()))]);
        source.set_result(Value::Int(0));
        assert_eq!(task.wait().unwrap(), Value::Unit);
        assert_eq!(timeout.load(Ordering::SeqCst), 0);
        assert_eq!(io.load(Ordering::SeqCst), 1);
        assert_eq!(any.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unmatched_fault_runs_finally_then_fails_the_task() {
        let (env, counters) = env_with_counters();
        let f = future_int("f");
        let block = async_block(
            Ty::Unit,
            vec![],
            vec![Node::try_catch(
                Node::seq(vec![
                    Node::await_(Node::var(&f)),
                    Node::call("fail", vec![], Ty::Unit),
                ]),
                vec![CatchBlock::kind(
                    "timeout",
                    None,
                    Node::call("on_catch", vec![], Ty::Unit),
                )],
                Some(Node::call("on_finally", vec![], Ty::Unit)),
            )],
        );
        let m = compile(&block, &[f.clone()], env);
        let task = m.start(&[(&f, Value::Task(Task::ready(Value::Int(0))))]);
        assert_eq!(task.wait().unwrap_err(), Fault::new("io", "nope"));
        assert_eq!(counters.caught.load(Ordering::SeqCst), 0);
        assert_eq!(counters.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_await_is_caught_with_its_fault_bound() {
        let f = future_int("f");
        let e = Var::new("e", Ty::Any);
        let out = Var::new("out", Ty::Int);
        let block = async_block(
            Ty::Int,
            vec![out.clone()],
            vec![
                Node::try_catch(
                    Node::assign(&out, Node::await_(Node::var(&f))),
                    vec![CatchBlock::any(Some(e.clone()), Node::assign(&out, Node::int(-1)))],
                    None,
                ),
                Node::var(&out),
            ],
        );
        let m = compile(&block, &[f.clone()], HostEnv::empty());
        let task = m.start(&[(&f, Value::Task(Task::failed(Fault::new("io", "gone"))))]);
        assert_eq!(task.wait().unwrap(), Value::Int(-1));
    }

    #[test]
    fn return_inside_try_detours_through_finally() {
        let (env, counters) = env_with_counters();
        let f = future_int("f");
        let block = async_block(
            Ty::Int,
            vec![],
            vec![
                Node::try_catch(
                    Node::seq(vec![
                        Node::await_(Node::var(&f)),
                        Node::ret(Some(Node::int(5))),
                    ]),
                    vec![],
                    Some(Node::call("on_finally", vec![], Ty::Unit)),
                ),
                Node::int(7),
            ],
        );
        let m = compile(&block, &[f.clone()], env);
        let task = m.start(&[(&f, Value::Task(Task::ready(Value::Int(0))))]);
        assert_eq!(task.wait().unwrap(), Value::Int(5));
        assert_eq!(counters.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn break_out_of_try_in_loop_runs_finally_once() {
        let (env, counters) = env_with_counters();
        let f = future_int("f");
        let out = Label::named("out");
        let block = async_block(
            Ty::Unit,
            vec![],
            vec![Node::loop_(
                Node::try_catch(
                    Node::seq(vec![Node::await_(Node::var(&f)), Node::goto(&out)]),
                    vec![],
                    Some(Node::call("on_finally", vec![], Ty::Unit)),
                ),
                Some(out.clone()),
                None,
            )],
        );
        let m = compile(&block, &[f.clone()], env);
        let task = m.start(&[(&f, Value::Task(Task::ready(Value::Int(0))))]);
        assert_eq!(task.wait().unwrap(), Value::Unit);
        assert_eq!(counters.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thrown_value_reaches_the_task() {
        let f = future_int("f");
        let block = async_block(
            Ty::Unit,
            vec![],
            vec![Node::await_(Node::var(&f)), Node::throw(Node::str("bad input"))],
        );
        let m = compile(&block, &[f.clone()], HostEnv::empty());
        let task = m.start(&[(&f, Value::Task(Task::ready(Value::Int(0))))]);
        let fault = task.wait().unwrap_err();
        assert_eq!(fault.kind, "error");
        assert_eq!(fault.message, "bad input");
    }

    #[test]
    fn panic_in_host_code_fails_the_machine() {
        let env = HostEnv::builder()
            .function("boom", |_| panic!("host exploded"))
            .build();
        let f = future_int("f");
        let block = async_block(
            Ty::Unit,
            vec![],
            vec![
                Node::await_(Node::var(&f)),
                Node::try_catch(
                    Node::call("boom", vec![], Ty::Unit),
                    vec![CatchBlock::any(None, Node::unit())],
                    None,
                ),
            ],
        );
        let m = compile(&block, &[f.clone()], env);
        let task = m.start(&[(&f, Value::Task(Task::ready(Value::Int(0))))]);
        let fault = task.wait().unwrap_err();
        assert_eq!(fault.kind, "panic");
        assert_eq!(fault.message, "host exploded");
    }

    #[test]
    fn awaiting_a_plain_value_is_a_lowering_error() {
        let block = async_block(Ty::Unit, vec![], vec![Node::await_(Node::int(1))]);
        let err = transform(&block, &[], HostEnv::empty(), &TransformOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, LoweringError::Binding(_)));
    }
}

mod awaiters {
    use super::*;

    fn task_of(value: &Value) -> Result<Task, Fault> {
        match value {
            Value::Object(obj) => obj
                .downcast::<Task>()
                .cloned()
                .ok_or_else(|| Fault::type_error("expected a timer")),
            other => Err(Fault::type_error(format!("expected a timer, got {}", other.type_name()))),
        }
    }

    fn timer_env() -> Arc<HostEnv> {
        HostEnv::builder()
            .instance_method(
                "Timer",
                "get_awaiter",
                Returns::Value(Ty::object("TimerAwaiter")),
                |this, _| Ok(Value::object("TimerAwaiter", task_of(this)?)),
            )
            .instance_method(
                "TimerAwaiter",
                "is_completed",
                Returns::Value(Ty::Bool),
                |this, _| Ok(Value::Bool(task_of(this)?.is_complete())),
            )
            .extension_method(
                "TimerAwaiter",
                "get_result",
                Returns::Value(Ty::Int),
                |args| match task_of(&args[0])?.outcome() {
                    Some(outcome) => outcome,
                    None => Err(Fault::invalid_state("timer has not fired")),
                },
            )
            .instance_method(
                "TimerAwaiter",
                "on_completed",
                Returns::Void,
                |this, args| match args.first() {
                    Some(Value::Continuation(waker)) => {
                        task_of(this)?.on_complete(waker.clone());
                        Ok(Value::Unit)
                    }
                    _ => Err(Fault::type_error("expected a continuation")),
                },
            )
            .build()
    }

    #[test]
    fn custom_awaitable_suspends_and_resumes() {
        let env = timer_env();
        let timer = Var::new("timer", Ty::object("Timer"));
        let block = async_block(
            Ty::Int,
            vec![],
            vec![Node::add(Node::await_(Node::var(&timer)), Node::int(1))],
        );
        let m = compile(&block, &[timer.clone()], env);
        let source = CompletionSource::new();
        let task = m.start(&[(&timer, Value::object("Timer", source.task()))]);
        assert!(!task.is_complete());
        source.set_result(Value::Int(99));
        assert_eq!(task.wait().unwrap(), Value::Int(100));
    }

    #[test]
    fn bindings_are_discovered_once_per_type() {
        let env = HostEnv::empty();
        let f = future_int("f");
        let block = async_block(
            Ty::Int,
            vec![],
            vec![Node::add(
                Node::await_(Node::var(&f)),
                Node::await_(Node::var(&f)),
            )],
        );
        let _m = compile(&block, &[f.clone()], env.clone());
        let resolver = env.awaiters();
        assert_eq!(resolver.discovery_count(), 1);
        let a = resolver.resolve(&Ty::future(Ty::Int)).unwrap();
        let b = resolver.resolve(&Ty::future(Ty::Int)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(resolver.discovery_count(), 1);
    }

    #[test]
    fn configured_await_resumes_on_the_context() {
        let queue = Arc::new(JobQueue::new());
        let env = HostEnv::builder().resume_context(queue.clone()).build();
        let f = future_int("f");
        let block = async_block(
            Ty::Int,
            vec![],
            vec![Node::await_on_context(Node::var(&f))],
        );
        let m = compile(&block, &[f.clone()], env);
        let source = CompletionSource::new();
        let task = m.start(&[(&f, Value::Task(source.task()))]);
        source.set_result(Value::Int(8));
        assert!(!task.is_complete());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(task.wait().unwrap(), Value::Int(8));
    }

    #[test]
    fn plain_await_ignores_the_context() {
        let queue = Arc::new(JobQueue::new());
        let env = HostEnv::builder().resume_context(queue.clone()).build();
        let f = future_int("f");
        let block = async_block(Ty::Int, vec![], vec![Node::await_(Node::var(&f))]);
        let m = compile(&block, &[f.clone()], env);
        let source = CompletionSource::new();
        let task = m.start(&[(&f, Value::Task(source.task()))]);
        source.set_result(Value::Int(8));
        assert!(queue.is_empty());
        assert_eq!(task.wait().unwrap(), Value::Int(8));
    }
}

mod nesting {
    use super::*;

    #[test]
    fn nested_machine_shares_captured_variables() {
        let f = future_int("f");
        let x = Var::new("x", Ty::Int);
        let inner = AsyncBlock {
            name: "inner".into(),
            kind: MachineKind::Async,
            result_ty: Ty::Unit,
            vars: vec![],
            body: vec![
                Node::await_(Node::var(&f)),
                Node::assign(&x, Node::add(Node::var(&x), Node::int(10))),
            ],
        };
        let outer = async_block(
            Ty::Int,
            vec![x.clone()],
            vec![
                Node::assign(&x, Node::int(1)),
                Node::await_(Node::async_block(inner)),
                Node::var(&x),
            ],
        );
        let m = compile(&outer, &[f.clone()], HostEnv::empty());
        let x_field = m
            .layout()
            .fields
            .iter()
            .find(|field| field.var == Some(x.id))
            .unwrap();
        assert_eq!(x_field.kind, FieldKind::Hoisted);

        let source = CompletionSource::new();
        let task = m.start(&[(&f, Value::Task(source.task()))]);
        assert!(!task.is_complete());
        source.set_result(Value::Int(0));
        assert_eq!(task.wait().unwrap(), Value::Int(11));
    }

    #[test]
    fn generator_items_follow_the_loop() {
        let i = Var::new("i", Ty::Int);
        let stop = Label::named("stop");
        let block = AsyncBlock {
            name: "range".into(),
            kind: MachineKind::Generator,
            result_ty: Ty::Int,
            vars: vec![i.clone()],
            body: vec![Node::loop_(
                Node::seq(vec![
                    Node::if_then(
                        Node::binary(BinOp::Eq, Node::var(&i), Node::int(3)),
                        Node::goto(&stop),
                    ),
                    Node::yield_(Node::var(&i)),
                    Node::assign(&i, Node::add(Node::var(&i), Node::int(1))),
                ]),
                Some(stop.clone()),
                None,
            )],
        };
        let m = compile(&block, &[], HostEnv::empty());
        let items: Result<Vec<Value>, Fault> = m.iterate(&[]).collect();
        assert_eq!(
            items.unwrap(),
            vec![Value::Int(0), Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn each_start_gets_fresh_storage() {
        let f = future_int("f");
        let acc = Var::new("acc", Ty::Int);
        let block = async_block(
            Ty::Int,
            vec![acc.clone()],
            vec![
                Node::assign(
                    &acc,
                    Node::add(Node::var(&acc), Node::await_(Node::var(&f))),
                ),
                Node::var(&acc),
            ],
        );
        let m = compile(&block, &[f.clone()], HostEnv::empty());
        let results: Vec<Value> = (0..3)
            .map(|_| {
                m.start(&[(&f, Value::Task(Task::ready(Value::Int(5))))])
                    .wait()
                    .unwrap()
            })
            .collect();
        assert_eq!(results, vec![Value::Int(5); 3]);
    }
}
