//! Unit tests for the block interpreter.
//!
//! This module contains tests for the interpreter's execution model, verifying:
//! - Loop timing (one iteration per tick, warp procedures, the warp budget)
//! - Timed waits, wait-until and broadcast-and-wait suspension
//! - Procedure arguments and `stop this script`
//! - List index rules and host arithmetic
//! - Limits and error reporting

use crate::{
    emulation::{EmulationConfig, EmulationError, Runtime, TraceEvent},
    ir::{builder::*, Project, StoreRef, Value},
    Error,
};

use super::handlers::{js_mod, js_round, mathop};

fn run(project: Project) -> Runtime {
    let mut runtime = Runtime::new(project, EmulationConfig::default());
    runtime.green_flag().unwrap();
    runtime.run().unwrap();
    runtime
}

fn number(runtime: &Runtime, target: &str, name: &str) -> f64 {
    runtime.variable(target, name).unwrap().to_number()
}

#[test]
fn test_loops_yield_once_per_iteration() {
    let mut project = Project::new();
    let x = project.targets[0].add_variable("x", 0.0);
    project.targets[0].add_script(
        when_flag_clicked(),
        vec![repeat(3.0, vec![change_var(&x, 1.0).into()]).into()],
    );

    let mut runtime = Runtime::new(project, EmulationConfig::default());
    runtime.green_flag().unwrap();
    for expected in 1..=3 {
        runtime.tick().unwrap();
        assert_eq!(number(&runtime, "Stage", "x"), f64::from(expected));
    }
    assert!(!runtime.is_idle());
    assert_eq!(runtime.run().unwrap(), 1);
    assert!(runtime.is_idle());
}

#[test]
fn test_repeat_count_rounds_up() {
    let mut project = Project::new();
    let x = project.targets[0].add_variable("x", 0.0);
    project.targets[0].add_script(
        when_flag_clicked(),
        vec![repeat(2.5, vec![change_var(&x, 1.0).into()]).into()],
    );

    let runtime = run(project);
    assert_eq!(number(&runtime, "Stage", "x"), 3.0);
}

#[test]
fn test_warp_procedure_runs_loop_in_one_tick() {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    let x = target.add_variable("x", 0.0);
    target.add_procedure(
        "fill",
        &[],
        true,
        vec![repeat(5.0, vec![change_var(&x, 1.0).into()]).into()],
    );
    let prototype = target.prototype("fill").unwrap().clone();
    target.add_script(when_flag_clicked(), vec![call(&prototype, vec![]).into()]);

    let mut runtime = Runtime::new(project, EmulationConfig::default());
    runtime.green_flag().unwrap();
    runtime.tick().unwrap();
    assert_eq!(number(&runtime, "Cat", "x"), 5.0);
    assert!(runtime.is_idle());
}

#[test]
fn test_warp_budget_forces_a_yield() {
    let mut project = Project::new();
    let x = project.targets[0].add_variable("x", 0.0);
    project.targets[0].add_procedure(
        "spin",
        &[],
        true,
        vec![forever(vec![change_var(&x, 1.0).into()]).into()],
    );
    let prototype = project.targets[0].prototype("spin").unwrap().clone();
    project.targets[0].add_script(when_flag_clicked(), vec![call(&prototype, vec![]).into()]);

    let config = EmulationConfig {
        warp_budget: 3,
        ..EmulationConfig::default()
    };
    let mut runtime = Runtime::new(project, config);
    runtime.green_flag().unwrap();
    runtime.tick().unwrap();
    assert_eq!(number(&runtime, "Stage", "x"), 3.0);
    runtime.tick().unwrap();
    assert_eq!(number(&runtime, "Stage", "x"), 6.0);
}

#[test]
fn test_procedure_arguments_are_bound_by_name() {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    target.add_procedure(
        "greet %s",
        &["who".to_string()],
        false,
        vec![say(join("hi ", argument("who"))).into()],
    );
    let prototype = target.prototype("greet %s").unwrap().clone();
    target.add_script(
        when_flag_clicked(),
        vec![call(&prototype, vec!["bob".into()]).into()],
    );

    let runtime = run(project);
    assert_eq!(runtime.trace().said_by("Cat"), vec!["hi bob"]);
}

#[test]
fn test_stop_this_script_returns_from_procedure() {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    target.add_procedure(
        "early",
        &[],
        false,
        vec![
            say("a").into(),
            stop("this script").into(),
            say("b").into(),
        ],
    );
    let prototype = target.prototype("early").unwrap().clone();
    target.add_script(
        when_flag_clicked(),
        vec![call(&prototype, vec![]).into(), say("c").into()],
    );

    let runtime = run(project);
    assert_eq!(runtime.trace().said_by("Cat"), vec!["a", "c"]);
}

#[test]
fn test_wait_suspends_for_simulated_time() {
    let mut project = Project::new();
    let x = project.targets[0].add_variable("x", 0.0);
    project.targets[0].add_script(
        when_flag_clicked(),
        vec![wait(0.1).into(), set_var(&x, 1.0).into()],
    );

    let mut runtime = Runtime::new(project, EmulationConfig::default());
    runtime.green_flag().unwrap();
    runtime.run_for(3).unwrap();
    assert_eq!(number(&runtime, "Stage", "x"), 0.0);

    assert_eq!(runtime.run().unwrap(), 1);
    assert_eq!(number(&runtime, "Stage", "x"), 1.0);
    assert!(runtime.time() >= 0.1 - 1e-9);
}

#[test]
fn test_wait_until_polls_every_tick() {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    let x = target.add_variable("x", 0.0);
    target.add_script(
        when_flag_clicked(),
        vec![wait_until(gt(var(&x), 2.0)).into(), say("done").into()],
    );
    target.add_script(
        when_flag_clicked(),
        vec![repeat(3.0, vec![change_var(&x, 1.0).into()]).into()],
    );

    let runtime = run(project);
    assert_eq!(runtime.trace().said_by("Cat"), vec!["done"]);
}

#[test]
fn test_broadcast_and_wait_resumes_after_receivers() {
    let mut project = Project::new();
    let go = project.targets[0].add_broadcast("go");
    project.targets[0].add_script(
        when_received(&go),
        vec![repeat(2.0, vec![say("tick").into()]).into()],
    );
    let cat = project.add_sprite("Cat");
    project.targets[cat].add_script(
        when_flag_clicked(),
        vec![broadcast_and_wait(channel(&go)).into(), say("after").into()],
    );

    let runtime = run(project);
    let events: Vec<&TraceEvent> = runtime.trace().events().collect();
    assert_eq!(
        events[0],
        &TraceEvent::Broadcast {
            channel: "go".to_string()
        }
    );
    let said: Vec<String> = runtime
        .trace()
        .events()
        .filter_map(|event| match event {
            TraceEvent::Say { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(said, vec!["tick", "tick", "after"]);
}

#[test]
fn test_list_index_rules() {
    let mut project = Project::new();
    let l = project.targets[0].add_list("l", vec![]);
    project.targets[0].add_script(
        when_flag_clicked(),
        vec![
            add_to_list(&l, "a").into(),
            add_to_list(&l, "b").into(),
            add_to_list(&l, "c").into(),
            delete_of_list(&l, "last").into(),
            insert_at_list(&l, 1.0, "z").into(),
            replace_item(&l, 2.0, "y").into(),
            delete_of_list(&l, 7.0).into(),
            add_to_list(&l, item_num(&l, "B")).into(),
        ],
    );

    let runtime = run(project);
    assert_eq!(
        runtime.list("Stage", "l").unwrap(),
        &[
            Value::from("z"),
            Value::from("y"),
            Value::from("b"),
            Value::Number(3.0)
        ]
    );
    let changes = runtime
        .trace()
        .events()
        .filter(|event| matches!(event, TraceEvent::ListChanged { .. }))
        .count();
    assert_eq!(changes, 7);
}

#[test]
fn test_for_each_counts_from_one() {
    let mut project = Project::new();
    let i = project.targets[0].add_variable("i", 0.0);
    let l = project.targets[0].add_list("l", vec![]);
    project.targets[0].add_script(
        when_flag_clicked(),
        vec![for_each(&i, 3.0, vec![add_to_list(&l, var(&i)).into()]).into()],
    );

    let runtime = run(project);
    assert_eq!(
        runtime.list("Stage", "l").unwrap(),
        &[Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]
    );
}

#[test]
fn test_host_arithmetic() {
    assert_eq!(js_mod(-1.0, 3.0), 2.0);
    assert_eq!(js_mod(5.0, -3.0), -1.0);
    assert_eq!(js_round(2.5), 3.0);
    assert_eq!(js_round(-2.5), -2.0);
    assert_eq!(mathop("sin", 180.0), 0.0);
    assert_eq!(mathop("ceiling", 2.1), 3.0);
    assert_eq!(mathop("tan", 90.0), f64::INFINITY);
    assert_eq!(mathop("tan", -90.0), f64::NEG_INFINITY);
}

#[test]
fn test_random_is_seeded_and_integral() {
    let build = || {
        let mut project = Project::new();
        let l = project.targets[0].add_list("l", vec![]);
        project.targets[0].add_script(
            when_flag_clicked(),
            vec![repeat(20.0, vec![add_to_list(&l, random(1.0, 10.0)).into()]).into()],
        );
        project
    };

    let first = run(build());
    let second = run(build());
    let items = first.list("Stage", "l").unwrap();
    assert_eq!(items, second.list("Stage", "l").unwrap());
    assert!(items.iter().all(|item| {
        let n = item.to_number();
        item.is_integer() && (1.0..=10.0).contains(&n)
    }));
}

#[test]
fn test_stop_all_ends_every_thread() {
    let mut project = Project::new();
    let x = project.targets[0].add_variable("x", 0.0);
    let y = project.targets[0].add_variable("y", 0.0);
    project.targets[0].add_script(
        when_flag_clicked(),
        vec![forever(vec![change_var(&x, 1.0).into()]).into()],
    );
    project.targets[0].add_script(
        when_flag_clicked(),
        vec![change_var(&y, 1.0).into(), stop("all").into()],
    );

    let runtime = run(project);
    assert_eq!(number(&runtime, "Stage", "x"), 1.0);
    assert_eq!(number(&runtime, "Stage", "y"), 1.0);
    assert_eq!(runtime.ticks(), 1);
}

#[test]
fn test_tick_limit() {
    let mut project = Project::new();
    let x = project.targets[0].add_variable("x", 0.0);
    project.targets[0].add_script(
        when_flag_clicked(),
        vec![forever(vec![change_var(&x, 1.0).into()]).into()],
    );

    let mut runtime = Runtime::new(project, EmulationConfig::default().with_max_ticks(10));
    runtime.green_flag().unwrap();
    assert!(matches!(
        runtime.run(),
        Err(Error::Emulation(EmulationError::TickLimit(10)))
    ));
    assert_eq!(number(&runtime, "Stage", "x"), 10.0);
}

#[test]
fn test_unknown_variable_is_reported() {
    let mut project = Project::new();
    let missing = StoreRef::new("missing", "missing");
    project.targets[0].add_script(when_flag_clicked(), vec![set_var(&missing, 1.0).into()]);

    let mut runtime = Runtime::new(project, EmulationConfig::default());
    runtime.green_flag().unwrap();
    assert!(matches!(
        runtime.run(),
        Err(Error::Emulation(EmulationError::UnknownVariable(_)))
    ));
}
