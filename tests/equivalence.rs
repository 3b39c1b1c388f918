//! Differential property tests.
//!
//! Random structured scripts are generated, obfuscated with random seeds and run next to
//! their originals. With the registry and bridge hidden, the two traces must be
//! identical event for event.
//!
//! Every program also runs a clock script that counts ticks. Condition loops and
//! `wait until` also test the clock, so every generated program terminates.

use proptest::prelude::*;
use tangle::{ir::builder::*, prelude::*};

const VARIABLES: usize = 3;
const CLOCK_TICKS: f64 = 12.0;

#[derive(Debug, Clone)]
enum Cond {
    Above(usize, i32),
    Below(usize, i32),
    Equals(usize, i32),
}

#[derive(Debug, Clone)]
enum Op {
    Set(usize, i32),
    Change(usize, i32),
    Say(usize),
    Push(usize),
    DropFirst,
    Stop,
    If(Cond, Vec<Op>),
    IfElse(Cond, Vec<Op>, Vec<Op>),
    Repeat(u8, Vec<Op>),
    ForEach(u8, Vec<Op>),
    RepeatUntil(u8, Cond, Vec<Op>),
    While(u8, Cond, Vec<Op>),
    WaitUntil(u8),
}

/// Stores of the generated actor.
struct Stores {
    variables: Vec<StoreRef>,
    counter: StoreRef,
    list: StoreRef,
    clock: StoreRef,
}

impl Stores {
    fn declare(target: &mut Target) -> Self {
        Self {
            variables: (0..VARIABLES)
                .map(|index| target.add_variable(&format!("v{index}"), 0.0))
                .collect(),
            counter: target.add_variable("i", 0.0),
            list: target.add_list("l", vec![]),
            clock: target.add_variable("clock", 0.0),
        }
    }

    fn clock_after(&self, tick: u8) -> BlockBuilder {
        gt(var(&self.clock), f64::from(tick))
    }

    fn condition(&self, cond: &Cond) -> BlockBuilder {
        match cond {
            Cond::Above(v, n) => gt(var(&self.variables[*v]), f64::from(*n)),
            Cond::Below(v, n) => lt(var(&self.variables[*v]), f64::from(*n)),
            Cond::Equals(v, n) => eq(var(&self.variables[*v]), f64::from(*n)),
        }
    }

    fn body(&self, ops: &[Op]) -> Vec<Stmt> {
        ops.iter().map(|op| self.statement(op).into()).collect()
    }

    fn statement(&self, op: &Op) -> BlockBuilder {
        match op {
            Op::Set(v, n) => set_var(&self.variables[*v], f64::from(*n)),
            Op::Change(v, n) => change_var(&self.variables[*v], f64::from(*n)),
            Op::Say(v) => say(join("v", var(&self.variables[*v]))),
            Op::Push(v) => add_to_list(&self.list, var(&self.variables[*v])),
            Op::DropFirst => delete_of_list(&self.list, 1.0),
            Op::Stop => stop("this script"),
            Op::If(cond, then) => if_then(self.condition(cond), self.body(then)),
            Op::IfElse(cond, then, otherwise) => {
                if_else(self.condition(cond), self.body(then), self.body(otherwise))
            }
            Op::Repeat(times, body) => repeat(f64::from(*times), self.body(body)),
            Op::ForEach(bound, body) => {
                for_each(&self.counter, f64::from(*bound), self.body(body))
            }
            Op::RepeatUntil(tick, cond, body) => repeat_until(
                or(self.clock_after(*tick), self.condition(cond)),
                self.body(body),
            ),
            Op::While(tick, cond, body) => while_loop(
                and(not(self.clock_after(*tick)), self.condition(cond)),
                self.body(body),
            ),
            Op::WaitUntil(tick) => wait_until(self.clock_after(*tick)),
        }
    }
}

fn cond() -> impl Strategy<Value = Cond> {
    prop_oneof![
        (0..VARIABLES, -3i32..6).prop_map(|(v, n)| Cond::Above(v, n)),
        (0..VARIABLES, -3i32..6).prop_map(|(v, n)| Cond::Below(v, n)),
        (0..VARIABLES, -3i32..6).prop_map(|(v, n)| Cond::Equals(v, n)),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    let leaf = prop_oneof![
        4 => (0..VARIABLES, -5i32..10).prop_map(|(v, n)| Op::Set(v, n)),
        4 => (0..VARIABLES, -3i32..4).prop_map(|(v, n)| Op::Change(v, n)),
        3 => (0..VARIABLES).prop_map(Op::Say),
        2 => (0..VARIABLES).prop_map(Op::Push),
        1 => Just(Op::DropFirst),
        1 => Just(Op::Stop),
        1 => (0u8..6).prop_map(Op::WaitUntil),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        let body = prop::collection::vec(inner, 0..4);
        prop_oneof![
            (cond(), body.clone()).prop_map(|(c, then)| Op::If(c, then)),
            (cond(), body.clone(), body.clone())
                .prop_map(|(c, then, otherwise)| Op::IfElse(c, then, otherwise)),
            (0u8..4, body.clone()).prop_map(|(times, body)| Op::Repeat(times, body)),
            (0u8..4, body.clone()).prop_map(|(bound, body)| Op::ForEach(bound, body)),
            (0u8..8, cond(), body.clone())
                .prop_map(|(tick, c, body)| Op::RepeatUntil(tick, c, body)),
            (0u8..8, cond(), body).prop_map(|(tick, c, body)| Op::While(tick, c, body)),
        ]
    })
}

fn program() -> impl Strategy<Value = Vec<Vec<Op>>> {
    prop::collection::vec(prop::collection::vec(op(), 1..6), 1..3)
}

fn build(scripts: &[Vec<Op>]) -> Project {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    let stores = Stores::declare(target);
    for script in scripts {
        target.add_script(when_flag_clicked(), stores.body(script));
    }
    target.add_script(
        when_flag_clicked(),
        vec![repeat(CLOCK_TICKS, vec![change_var(&stores.clock, 1.0).into()]).into()],
    );
    project
}

fn trace(project: Project, report: Option<&ObfuscationReport>) -> Vec<(u64, TraceEvent)> {
    let mut runtime = Runtime::new(project, EmulationConfig::default());
    if let Some(report) = report {
        runtime.hide_stores(report.internal_stores.iter().cloned());
        runtime.hide_broadcasts(&report.internal_broadcasts);
    }
    runtime.green_flag().unwrap();
    runtime.run().unwrap();
    runtime.trace().entries().to_vec()
}

fn dispatch() -> impl Strategy<Value = DispatchStyle> {
    prop_oneof![Just(DispatchStyle::Tree), Just(DispatchStyle::Chain)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn flattened_scripts_behave_like_the_original(
        scripts in program(),
        seed in any::<u64>(),
        dispatch in dispatch(),
        obfuscate_transitions in any::<bool>(),
    ) {
        let project = build(&scripts);
        let expected = trace(project.clone(), None);

        let mut config = ObfuscatorConfig::seeded(seed);
        config.flatten.dispatch = dispatch;
        config.flatten.obfuscate_transitions = obfuscate_transitions;
        let mut obfuscated = project;
        let report = Obfuscator::new(config).process(&mut obfuscated).unwrap();
        let actual = trace(obfuscated, Some(&report));

        prop_assert_eq!(expected, actual);
    }

    #[test]
    fn aggressive_settings_behave_like_the_original(
        scripts in program(),
        seed in any::<u64>(),
    ) {
        let project = build(&scripts);
        let expected: Vec<TraceEvent> = trace(project.clone(), None)
            .into_iter()
            .map(|(_, event)| event)
            .collect();

        let mut obfuscated = project;
        let report = Obfuscator::new(ObfuscatorConfig::aggressive().with_seed(seed))
            .process(&mut obfuscated)
            .unwrap();
        let actual: Vec<TraceEvent> = trace(obfuscated, Some(&report))
            .into_iter()
            .map(|(_, event)| event)
            .collect();

        prop_assert_eq!(expected, actual);
    }
}
