//! End-to-end verification through a real fixpoint solver
//!
//! Every test returns early when no `z4`/`z3` binary is on PATH, the same
//! gating the unit suites use.

use hornvc::{FixedpointVcGen, VcConfig, VcMode, VerificationOutcome};
use hornvc_program::{
    Block, Command, Implementation, Procedure, Program, SpecClause, Transfer, Variable,
};
use hornvc_solver::SpacerSolver;
use hornvc_term::Sort;
use std::time::Duration;

fn solver() -> SpacerSolver {
    SpacerSolver::new().with_timeout(Duration::from_secs(20))
}

/// counter := 0; while (counter < 11) counter++; assert counter < 10.
/// The assertion is reachable only after eleven iterations.
fn counter_program(with_loop: bool) -> Program {
    let blocks = if with_loop {
        vec![
            Block::new(
                "entry",
                vec![Command::assign("counter", "0")],
                Transfer::Goto(vec![1]),
            ),
            Block::new("head", vec![], Transfer::Goto(vec![2, 3])),
            Block::new(
                "body",
                vec![
                    Command::assume("(< counter 11)"),
                    Command::assign("counter", "(+ counter 1)"),
                ],
                Transfer::Goto(vec![1]),
            ),
            Block::new(
                "exit",
                vec![
                    Command::assume("(>= counter 11)"),
                    Command::assert("(< counter 10)"),
                ],
                Transfer::Return,
            ),
        ]
    } else {
        vec![Block::new(
            "entry",
            vec![
                Command::assign("counter", "0"),
                Command::assert("(< counter 10)"),
            ],
            Transfer::Return,
        )]
    };
    Program::new().with_procedure(
        Procedure::new("main")
            .entrypoint()
            .with_body(Implementation {
                locals: vec![Variable::new("counter", Sort::Int)],
                blocks,
                entry: 0,
            }),
    )
}

#[test]
fn test_counter_loop_violation_found_in_summary_mode() {
    if !SpacerSolver::available() {
        return;
    }
    let mut gen = FixedpointVcGen::new(
        counter_program(true),
        VcConfig::new().with_mode(VcMode::SummaryHorn),
    )
    .unwrap();
    gen.generate().unwrap();
    let result = gen.check(&solver()).unwrap();
    assert!(
        matches!(
            result.overall(),
            VerificationOutcome::CounterexampleFound(_)
        ),
        "expected a counterexample, got {result}"
    );
}

#[test]
fn test_counter_without_loop_is_correct() {
    if !SpacerSolver::available() {
        return;
    }
    let mut gen = FixedpointVcGen::new(
        counter_program(false),
        VcConfig::new().with_mode(VcMode::SummaryHorn),
    )
    .unwrap();
    gen.generate().unwrap();
    let result = gen.check(&solver()).unwrap();
    assert!(result.is_correct(), "expected correct, got {result}");
}

#[test]
fn test_counter_loop_violation_found_in_flat_mode() {
    if !SpacerSolver::available() {
        return;
    }
    let mut gen = FixedpointVcGen::new(
        counter_program(true),
        VcConfig::new().with_mode(VcMode::LegacyFlat),
    )
    .unwrap();
    gen.generate().unwrap();
    let result = gen.check(&solver()).unwrap();
    assert!(
        matches!(
            result.overall(),
            VerificationOutcome::CounterexampleFound(_)
        ),
        "expected a counterexample, got {result}"
    );
}

/// A bounded loop whose assertion holds: the solver must find the
/// inductive invariant.
#[test]
fn test_bounded_counter_is_correct() {
    if !SpacerSolver::available() {
        return;
    }
    let program = Program::new().with_procedure(
        Procedure::new("main")
            .entrypoint()
            .with_body(Implementation {
                locals: vec![Variable::new("i", Sort::Int)],
                blocks: vec![
                    Block::new(
                        "entry",
                        vec![Command::assign("i", "0")],
                        Transfer::Goto(vec![1]),
                    ),
                    Block::new("head", vec![], Transfer::Goto(vec![2, 3])),
                    Block::new(
                        "body",
                        vec![
                            Command::assume("(< i 10)"),
                            Command::assign("i", "(+ i 1)"),
                        ],
                        Transfer::Goto(vec![1]),
                    ),
                    Block::new(
                        "exit",
                        vec![
                            Command::assume("(>= i 10)"),
                            Command::assert("(<= i 10)"),
                        ],
                        Transfer::Return,
                    ),
                ],
                entry: 0,
            }),
    );
    let mut gen = FixedpointVcGen::new(
        program,
        VcConfig::new().with_mode(VcMode::SummaryHorn),
    )
    .unwrap();
    gen.generate().unwrap();
    let result = gen.check(&solver()).unwrap();
    assert!(result.is_correct(), "expected correct, got {result}");
}

/// requires x > 0; ensures r > 0; called only with positive arguments.
fn positive_contract_program() -> Program {
    Program::new()
        .with_procedure(
            Procedure::new("main")
                .entrypoint()
                .with_body(Implementation {
                    locals: vec![Variable::new("y", Sort::Int)],
                    blocks: vec![Block::new(
                        "start",
                        vec![
                            Command::call("pos", vec!["5".to_string()], vec!["y".to_string()]),
                            Command::assert("(> y 0)"),
                        ],
                        Transfer::Return,
                    )],
                    entry: 0,
                }),
        )
        .with_procedure(
            Procedure::new("pos")
                .with_in_param("x", Sort::Int)
                .with_out_param("r", Sort::Int)
                .with_requires(SpecClause::checked("(> x 0)"))
                .with_ensures(SpecClause::checked("(> r 0)"))
                .with_body(Implementation {
                    locals: vec![],
                    blocks: vec![Block::new(
                        "entry",
                        vec![Command::assign("r", "x")],
                        Transfer::Return,
                    )],
                    entry: 0,
                }),
        )
}

#[test]
fn test_contracted_call_is_correct_in_summary_mode() {
    if !SpacerSolver::available() {
        return;
    }
    let mut gen = FixedpointVcGen::new(
        positive_contract_program(),
        VcConfig::new().with_mode(VcMode::SummaryHorn),
    )
    .unwrap();
    gen.generate().unwrap();
    let result = gen.check(&solver()).unwrap();
    assert!(result.is_correct(), "expected correct, got {result}");
}

#[test]
fn test_contracted_call_is_correct_in_plain_mode() {
    if !SpacerSolver::available() {
        return;
    }
    let mut gen = FixedpointVcGen::new(
        positive_contract_program(),
        VcConfig::new().with_mode(VcMode::Plain),
    )
    .unwrap();
    gen.generate().unwrap();
    let result = gen.check(&solver()).unwrap();
    // One unit per procedure, each correct.
    assert_eq!(result.reports.len(), 2);
    assert!(result.is_correct(), "expected correct, got {result}");
}

#[test]
fn test_violated_precondition_found() {
    if !SpacerSolver::available() {
        return;
    }
    let mut program = positive_contract_program();
    // Call pos with a non-positive argument.
    let body = program
        .procedure_mut("main")
        .unwrap()
        .body
        .as_mut()
        .unwrap();
    body.blocks[0].cmds[0] =
        Command::call("pos", vec!["0".to_string()], vec!["y".to_string()]);
    let mut gen = FixedpointVcGen::new(
        program,
        VcConfig::new().with_mode(VcMode::SummaryHorn),
    )
    .unwrap();
    gen.generate().unwrap();
    let result = gen.check(&solver()).unwrap();
    assert!(
        matches!(
            result.overall(),
            VerificationOutcome::CounterexampleFound(_)
        ),
        "expected a counterexample, got {result}"
    );
}

#[test]
fn test_flat_mode_inlined_program_is_correct() {
    if !SpacerSolver::available() {
        return;
    }
    let mut gen = FixedpointVcGen::new(
        positive_contract_program(),
        VcConfig::new().with_mode(VcMode::LegacyFlat),
    )
    .unwrap();
    gen.generate().unwrap();
    let result = gen.check(&solver()).unwrap();
    assert!(result.is_correct(), "expected correct, got {result}");
}
