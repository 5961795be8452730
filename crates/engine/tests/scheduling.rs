//! Scheduler behaviour observed through full engine runs.

mod common;

use std::sync::{Arc, Mutex};

use tessera_engine::scope::Scope;
use tessera_engine::{
    Consistency, Engine, EngineConfig, EngineError, EngineState, FailureSource, Priority,
    SchedulerPolicy, Value,
};

use common::{engine, program, program_at, ring};

fn isolated(workers: usize, policy: SchedulerPolicy, n: i64) -> Engine<i64, ()> {
    let mut e = Engine::new(EngineConfig {
        worker_threads: workers,
        scheduler: policy,
        ..EngineConfig::default()
    })
    .unwrap();
    for id in 0..n {
        e.add_vertex(id, 0).unwrap();
    }
    e
}

/// Run `schedule` on a single worker and return the execution order.
fn execution_order(policy: SchedulerPolicy, schedule: &[(i64, f64)]) -> Vec<u32> {
    let mut e = isolated(1, policy, 5);
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    let record = program("record", move |s: &mut Scope<'_, i64, ()>| {
        seen.lock().unwrap().push(s.vertex());
        Ok(())
    });
    for &(id, priority) in schedule {
        e.schedule(id, record.clone(), priority).unwrap();
    }
    e.start().unwrap();
    let order = order.lock().unwrap().clone();
    order
}

// ── End to end ───────────────────────────────────────────────────────

#[test]
fn test_path_increment_and_reschedule_once() {
    let mut e = engine::<i64, ()>(3);
    for id in 0..3 {
        e.add_vertex(id, 0).unwrap();
    }
    e.add_edge(0, 1, ()).unwrap();
    e.add_edge(1, 2, ()).unwrap();

    let p = program("increment", |s: &mut Scope<'_, i64, ()>| {
        let now = s.with_data_mut(|d| {
            *d += 1;
            *d
        });
        if now == 1 {
            s.schedule_neighbors(1.0);
        }
        Ok(())
    });
    e.schedule_all(p, 1.0).unwrap();
    let elapsed = e.start().unwrap();

    assert!(e.last_update_count().unwrap() >= 3);
    let g = e.graph().unwrap();
    for id in 0..3 {
        assert!(g.vertex_data(id).unwrap() >= 1, "vertex {id} never updated");
    }
    assert!(e.last_failures().unwrap().is_empty());
    assert!(elapsed.as_secs() < 30);
    assert_eq!(e.pending_tasks().unwrap(), 0);
}

#[test]
fn test_self_rescheduling_coalesces() {
    let mut e = ring::<i64, ()>(4, 8, 0, ());
    let p = program("count_to_ten", |s: &mut Scope<'_, i64, ()>| {
        let now = s.with_data_mut(|d| {
            *d += 1;
            *d
        });
        if now < 10 {
            let me = s.vertex();
            s.schedule(me, 1.0)?;
            s.schedule(me, 2.0)?;
        }
        Ok(())
    });
    e.schedule_all(p, 1.0).unwrap();
    e.start().unwrap();

    assert_eq!(e.last_update_count().unwrap(), 80);
    let g = e.graph().unwrap();
    for id in 0..8 {
        assert_eq!(g.vertex_data(id).unwrap(), 10);
    }
    let metrics = e.metrics().unwrap();
    assert_eq!(metrics.updates_executed["count_to_ten"], 80);
    assert_eq!(metrics.last_update_count, 80);
}

// ── Coalescing and ordering ──────────────────────────────────────────

#[test]
fn test_double_schedule_keeps_one_task_with_max_priority() {
    let mut e = isolated(2, SchedulerPolicy::Priority, 3);
    let a = program("a", |_s: &mut Scope<'_, i64, ()>| Ok(()));
    let b = program("b", |s: &mut Scope<'_, i64, ()>| {
        s.set_data(-1);
        Ok(())
    });
    e.schedule(1, a, 2.0).unwrap();
    e.schedule(1, b.clone(), 7.0).unwrap();
    e.schedule(2, b, 1.0).unwrap();

    assert_eq!(e.pending_tasks().unwrap(), 2);
    assert_eq!(e.pending_priority(1).unwrap(), Some(Priority(7.0)));
    assert_eq!(e.pending_priority(0).unwrap(), None);

    e.start().unwrap();
    assert_eq!(e.last_update_count().unwrap(), 2);
    // The first program scheduled on a vertex is the one that runs.
    assert_eq!(e.graph().unwrap().vertex_data(1).unwrap(), 0);
    assert_eq!(e.graph().unwrap().vertex_data(2).unwrap(), -1);
}

#[test]
fn test_priority_order_with_fifo_tie_break() {
    let order = execution_order(
        SchedulerPolicy::Priority,
        &[(0, 1.0), (1, 5.0), (2, 3.0), (3, 5.0), (4, 0.0)],
    );
    assert_eq!(order, vec![1, 3, 2, 0, 4]);
}

#[test]
fn test_raised_priority_moves_task_forward() {
    let order = execution_order(
        SchedulerPolicy::Priority,
        &[(0, 1.0), (1, 2.0), (2, 3.0), (0, 9.0)],
    );
    assert_eq!(order, vec![0, 2, 1]);
}

#[test]
fn test_fifo_ignores_priority() {
    let order = execution_order(
        SchedulerPolicy::Fifo,
        &[(3, 1.0), (1, 5.0), (4, 3.0), (0, 9.0), (3, 100.0)],
    );
    assert_eq!(order, vec![3, 1, 4, 0]);
}

#[test]
fn test_round_robin_runs_every_task_once() {
    let mut e = isolated(3, SchedulerPolicy::RoundRobin, 30);
    let p = program("bump", |s: &mut Scope<'_, i64, ()>| {
        s.with_data_mut(|d| *d += 1);
        Ok(())
    });
    e.schedule_all(p, 1.0).unwrap();
    e.start().unwrap();

    assert_eq!(e.last_update_count().unwrap(), 30);
    let g = e.graph().unwrap();
    for id in 0..30 {
        assert_eq!(g.vertex_data(id).unwrap(), 1, "vertex {id}");
    }
}

// ── Failures ─────────────────────────────────────────────────────────

#[test]
fn test_failed_update_is_recorded_and_run_continues() {
    let mut e = ring::<i64, ()>(2, 5, 0, ());
    let p = program("flaky", |s: &mut Scope<'_, i64, ()>| {
        if s.vertex() == 1 {
            // Requests from a failed update are discarded.
            s.schedule_neighbors(1.0);
            anyhow::bail!("bad vertex");
        }
        s.with_data_mut(|d| *d += 1);
        Ok(())
    });
    e.schedule_all(p, 1.0).unwrap();
    e.start().unwrap();

    assert_eq!(e.state(), EngineState::Completed);
    assert_eq!(e.last_update_count().unwrap(), 5);
    let failures = e.last_failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].source,
        FailureSource::Update {
            vertex: 1,
            program: "flaky".into()
        }
    );
    assert!(failures[0].message.contains("bad vertex"));

    let g = e.graph().unwrap();
    assert_eq!(g.vertex_data(0).unwrap(), 1);
    assert_eq!(g.vertex_data(2).unwrap(), 1);
    assert_eq!(g.vertex_data(1).unwrap(), 0);
    assert_eq!(e.metrics().unwrap().failures, 1);
}

#[test]
fn test_panicking_update_releases_scope() {
    let mut e = ring::<i64, ()>(3, 6, 0, ());
    let p = program_at("boom", Consistency::Full, |s: &mut Scope<'_, i64, ()>| {
        if s.vertex() == 2 {
            panic!("boom");
        }
        s.with_data_mut(|d| *d += 1);
        Ok(())
    });
    e.schedule_all(p, 1.0).unwrap();
    e.start().unwrap();

    // Neighbours 1 and 3 still got their full-consistency scopes.
    let g = e.graph().unwrap();
    for id in [0, 1, 3, 4, 5] {
        assert_eq!(g.vertex_data(id).unwrap(), 1, "vertex {id}");
    }
    let failures = e.last_failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("boom"), "{}", failures[0].message);
}

#[test]
fn test_abort_on_error_stops_run() {
    let mut e: Engine<i64, ()> = Engine::new(EngineConfig {
        worker_threads: 1,
        abort_on_error: true,
        ..EngineConfig::default()
    })
    .unwrap();
    for id in 0..10 {
        e.add_vertex(id, 0).unwrap();
    }
    let p = program("fails_at_three", |s: &mut Scope<'_, i64, ()>| {
        anyhow::ensure!(s.vertex() != 3, "vertex three");
        s.set_data(1);
        Ok(())
    });
    e.schedule_all(p, 1.0).unwrap();

    let err = e.start().unwrap_err();
    assert!(matches!(err, EngineError::Execution(ref m) if m.contains("vertex three")));
    assert_eq!(e.state(), EngineState::Completed);
    assert_eq!(e.last_update_count().unwrap(), 4);
    assert_eq!(e.pending_tasks().unwrap(), 0);
    assert_eq!(e.last_failures().unwrap().len(), 1);
    assert_eq!(e.graph().unwrap().vertex_data(9).unwrap(), 0);
}

// ── Globals inside programs ──────────────────────────────────────────

#[test]
fn test_programs_share_globals() {
    let mut e = ring::<i64, ()>(4, 12, 0, ());
    e.add_global_const("step", 5i64).unwrap();
    e.add_global("visits", 0i64).unwrap();
    let p = program("visit", |s: &mut Scope<'_, i64, ()>| {
        let step: i64 = s.globals().get("step")?;
        s.with_data_mut(|d| *d += step);
        s.globals().update("visits", |v| {
            if let Value::Integer(n) = v {
                *n += 1;
            }
        })?;
        Ok(())
    });
    e.schedule_all(p, 1.0).unwrap();
    e.start().unwrap();

    assert_eq!(e.get_global::<i64>("visits").unwrap(), 12);
    assert_eq!(e.graph().unwrap().vertex_data(7).unwrap(), 5);
}
