//! Re-entrancy of flattened scripts.
//!
//! A flattened script keeps its program counter and loop counters in the actor's
//! registry, keyed by a token drawn per activation. These tests start the same script
//! several times at once and check that the activations neither share counters nor
//! leave rows behind.

use tangle::{
    ir::{builder::*, Mutation},
    prelude::*,
};

fn run_both(project: &Project, seed: u64) -> Result<(Runtime, Runtime, ObfuscationReport)> {
    let mut original = Runtime::new(project.clone(), EmulationConfig::default());
    original.green_flag()?;
    original.run()?;

    let mut obfuscated = project.clone();
    let report = Obfuscator::new(ObfuscatorConfig::seeded(seed)).process(&mut obfuscated)?;
    let mut transformed = Runtime::new(obfuscated, EmulationConfig::default());
    transformed.hide_stores(report.internal_stores.iter().cloned());
    transformed.hide_broadcasts(&report.internal_broadcasts);
    transformed.green_flag()?;
    transformed.run()?;

    Ok((original, transformed, report))
}

fn registry_rows(runtime: &Runtime, report: &ObfuscationReport, target: usize) -> usize {
    let Some(registry) = report.registry(target) else {
        return 0;
    };
    let lists = &runtime.project().targets[target].lists;
    [&registry.tokens, &registry.pcs, &registry.kv_keys, &registry.kv_vals]
        .into_iter()
        .filter_map(|store| lists.get(&store.id))
        .map(|list| list.items.len())
        .sum()
}

#[test]
fn test_one_procedure_called_from_two_scripts() -> Result<()> {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    let x = target.add_variable("x", 0.0);
    target.add_procedure(
        "count",
        &[],
        false,
        vec![repeat(3.0, vec![change_var(&x, 1.0).into()]).into()],
    );
    let prototype = target.prototype("count")?.clone();
    target.add_script(when_flag_clicked(), vec![call(&prototype, vec![]).into()]);
    target.add_script(when_flag_clicked(), vec![call(&prototype, vec![]).into()]);

    let (original, transformed, report) = run_both(&project, 21)?;
    assert_eq!(original.variable("Cat", "x"), Some(&Value::Number(6.0)));
    assert_eq!(transformed.variable("Cat", "x"), Some(&Value::Number(6.0)));
    assert_eq!(registry_rows(&transformed, &report, cat), 0);
    Ok(())
}

#[test]
fn test_receiver_started_twice_in_one_tick() -> Result<()> {
    let mut project = Project::new();
    let go = project.targets[0].add_broadcast("go");
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    let y = target.add_variable("y", 0.0);
    target.add_script(
        when_received(&go),
        vec![repeat(2.0, vec![change_var(&y, 1.0).into()]).into()],
    );
    target.add_script(
        when_flag_clicked(),
        vec![broadcast(channel(&go)).into(), broadcast(channel(&go)).into()],
    );

    let (original, transformed, report) = run_both(&project, 22)?;
    assert_eq!(original.variable("Cat", "y"), Some(&Value::Number(4.0)));
    assert_eq!(transformed.variable("Cat", "y"), Some(&Value::Number(4.0)));
    assert_eq!(registry_rows(&transformed, &report, cat), 0);
    Ok(())
}

#[test]
fn test_interleaving_matches_the_original() -> Result<()> {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    let log = target.add_list("log", vec![]);
    target.add_script(
        when_flag_clicked(),
        vec![repeat(3.0, vec![add_to_list(&log, "a").into()]).into()],
    );
    target.add_script(
        when_flag_clicked(),
        vec![repeat(3.0, vec![add_to_list(&log, "b").into()]).into()],
    );

    let (original, transformed, report) = run_both(&project, 23)?;
    let expected: Vec<Value> = ["a", "b", "a", "b", "a", "b"]
        .into_iter()
        .map(Value::from)
        .collect();
    assert_eq!(original.list("Cat", "log"), Some(expected.as_slice()));
    assert_eq!(transformed.list("Cat", "log"), Some(expected.as_slice()));
    assert_eq!(registry_rows(&transformed, &report, cat), 0);
    Ok(())
}

#[test]
fn test_parallel_waits_each_get_a_handler() -> Result<()> {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    for name in ["first", "second", "third"] {
        target.add_script(
            when_flag_clicked(),
            vec![wait(0.1).into(), say(name).into()],
        );
    }

    let (original, transformed, report) = run_both(&project, 24)?;
    let mut expected = original.trace().said_by("Cat");
    let mut actual = transformed.trace().said_by("Cat");
    expected.sort();
    actual.sort();
    assert_eq!(expected, actual);
    assert_eq!(actual.len(), 3);
    assert_eq!(registry_rows(&transformed, &report, cat), 0);

    let registry = report.registry(cat).expect("actor was flattened");
    let queue = &transformed.project().targets[cat].lists[&registry.queue.id];
    assert!(queue.items.is_empty());
    Ok(())
}

#[test]
fn test_recursive_procedure_keeps_one_row_per_activation() -> Result<()> {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    let trail = target.add_list("trail", vec![]);
    let params = ["n".to_string()];
    let prototype = Mutation::prototype("down %s", &params, false);
    target.add_procedure(
        "down %s",
        &params,
        false,
        vec![
            add_to_list(&trail, argument("n")).into(),
            if_then(
                gt(argument("n"), 0.0),
                vec![call(&prototype, vec![sub(argument("n"), 1.0).into()]).into()],
            )
            .into(),
        ],
    );
    target.add_script(
        when_flag_clicked(),
        vec![call(&prototype, vec![3.0.into()]).into()],
    );

    let (original, transformed, report) = run_both(&project, 25)?;
    let expected: Vec<Value> = [3.0, 2.0, 1.0, 0.0].into_iter().map(Value::from).collect();
    assert_eq!(original.list("Cat", "trail"), Some(expected.as_slice()));
    assert_eq!(transformed.list("Cat", "trail"), Some(expected.as_slice()));
    assert_eq!(registry_rows(&transformed, &report, cat), 0);
    Ok(())
}
