//! Numeric constant obfuscation pass.
//!
//! Replaces integral numeric literals with an arithmetic expression evaluating to the
//! same number:
//!
//! ```text
//! set x to 42   →   set x to ((40 + 2))      (n - k) + k
//! set x to 42   →   set x to ((549 - 507))   (n + k) - k
//! ```
//!
//! Both halves stay integral and well inside 2^53, so the host's floating point
//! arithmetic reproduces `n` exactly.
//!
//! # Program counters
//!
//! Blocks generated by the flattening pass that carry program-counter literals or
//! comparisons are recorded in [`PassContext::pc_literals`]. Their literals are left
//! untouched: the counters are exact-equality tokens and the dispatcher's pivots are
//! part of the state machine's layout.

use rand::Rng;

use crate::{
    ir::{
        builder::{add, sub},
        Input, NodeId, Primitive, Target,
    },
    obfuscation::{ConstantConfig, EventKind, Pass, PassContext, MAX_CONSTANT_MAGNITUDE},
    Result,
};

/// Largest split offset.
const MAX_SPLIT: i64 = 1000;

/// Numeric literal rewriting pass.
pub struct ConstantsPass {
    config: ConstantConfig,
}

impl Default for ConstantsPass {
    fn default() -> Self {
        Self::new(ConstantConfig::default())
    }
}

/// A literal input selected for rewriting.
#[derive(Debug)]
struct Candidate {
    /// Block holding the literal.
    block: NodeId,
    /// Name of the input.
    input: String,
    /// The literal value.
    value: f64,
}

impl ConstantsPass {
    /// Creates the pass.
    #[must_use]
    pub fn new(config: ConstantConfig) -> Self {
        Self { config }
    }

    fn limit(&self) -> f64 {
        self.config.max_magnitude.clamp(0.0, MAX_CONSTANT_MAGNITUDE)
    }

    fn collect(&self, target: &Target, index: usize, ctx: &PassContext) -> Vec<Candidate> {
        let limit = self.limit();
        target
            .blocks
            .blocks()
            .filter(|(id, block)| !block.is_shadow() && !ctx.is_pc_literal(index, *id))
            .flat_map(|(id, block)| {
                block.inputs.iter().filter_map(move |(name, input)| match input {
                    Input::Literal(Primitive::Number(n))
                        if n.is_finite() && n.fract() == 0.0 && n.abs() <= limit =>
                    {
                        Some(Candidate {
                            block: id,
                            input: name.clone(),
                            value: *n,
                        })
                    }
                    _ => None,
                })
            })
            .collect()
    }
}

impl Pass for ConstantsPass {
    fn name(&self) -> &'static str {
        "constants"
    }

    fn should_run(&self, target: &Target, _ctx: &PassContext) -> bool {
        !target.blocks.is_empty()
    }

    #[allow(clippy::cast_precision_loss)]
    fn run_on_target(&self, target: &mut Target, index: usize, ctx: &PassContext) -> Result<bool> {
        let candidates = self.collect(target, index, ctx);
        if candidates.is_empty() {
            return Ok(false);
        }

        let mut rng = ctx.rng(index, self.name());
        for candidate in &candidates {
            let k = rng.gen_range(1..=MAX_SPLIT) as f64;
            let n = candidate.value;
            let expression = if rng.gen_bool(0.5) {
                add(n - k, k)
            } else {
                sub(n + k, k)
            };

            let replacement = expression.build(&mut target.blocks);
            target.blocks.set_parent(replacement, Some(candidate.block));
            target
                .blocks
                .block_mut(candidate.block)?
                .inputs
                .insert(candidate.input.clone(), Input::Node(replacement));

            ctx.events
                .record(EventKind::ConstantObfuscated)
                .at(target.name.clone(), candidate.block)
                .pass(self.name())
                .message(format!("{n} in {}", candidate.input));
        }

        Ok(true)
    }

    fn description(&self) -> &'static str {
        "Replaces integral numeric literals with equivalent arithmetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{builder::*, BlockFlags, Project};

    fn literal(target: &Target, block: NodeId, input: &str) -> Option<f64> {
        match target.blocks.block(block).unwrap().input(input) {
            Some(Input::Literal(Primitive::Number(n))) => Some(*n),
            _ => None,
        }
    }

    #[test]
    fn test_rewrites_integral_literals() {
        let mut project = Project::new();
        let cat = project.add_sprite("Cat");
        let target = &mut project.targets[cat];
        let x = target.add_variable("x", 0.0);
        let hat = target.add_script(
            when_flag_clicked(),
            vec![set_var(&x, 42.0).into(), set_var(&x, 0.5).into()],
        );
        let chain = target.blocks.chain(Some(hat));

        let ctx = PassContext::new(9);
        let pass = ConstantsPass::default();
        assert!(pass.run_on_target(target, cat, &ctx).unwrap());

        assert_eq!(literal(target, chain[1], "VALUE"), None);
        assert_eq!(literal(target, chain[2], "VALUE"), Some(0.5));
        assert_eq!(ctx.events.count_kind(EventKind::ConstantObfuscated), 1);

        let replacement = target.blocks.block(chain[1]).unwrap().input_node("VALUE").unwrap();
        let block = target.blocks.block(replacement).unwrap();
        assert_eq!(block.parent, Some(chain[1]));
        let a = literal(target, replacement, "NUM1").unwrap();
        let b = literal(target, replacement, "NUM2").unwrap();
        assert!((a + b - 42.0).abs() < f64::EPSILON || (a - b - 42.0).abs() < f64::EPSILON);
        assert!(!block.flags.contains(BlockFlags::SHADOW));
    }

    #[test]
    fn test_skips_pc_literals() {
        let mut target = Target::new("Cat", false);
        let pcs = target.add_list("pcs", vec![]);
        let mut marks = Vec::new();
        let marked = add_to_list(&pcs, 123_456.0)
            .marks_pc()
            .build_marked(&mut target.blocks, &mut marks);

        let ctx = PassContext::new(1);
        ctx.mark_pc_literals(0, marks);
        let pass = ConstantsPass::default();
        assert!(!pass.run_on_target(&mut target, 0, &ctx).unwrap());
        assert_eq!(literal(&target, marked, "ITEM"), Some(123_456.0));
    }

    #[test]
    fn test_respects_magnitude_limit() {
        let mut target = Target::new("Cat", false);
        let x = target.add_variable("x", 0.0);
        let big = set_var(&x, 1e12).build(&mut target.blocks);

        let ctx = PassContext::new(1);
        let pass = ConstantsPass::new(ConstantConfig {
            enabled: true,
            max_magnitude: 1e15,
        });
        assert!(!pass.run_on_target(&mut target, 0, &ctx).unwrap());
        assert_eq!(literal(&target, big, "VALUE"), Some(1e12));
    }
}
