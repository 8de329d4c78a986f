use std::f64::consts::PI;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use treemg::automaton::{Automaton, Delivery, Outgoing};
use treemg::config::SolverConfig;
use treemg::error::Error;
use treemg::field_face::ExchangeMessage;
use treemg::hierarchy::{Hierarchy, MeshConfig, SolverFields};
use treemg::metrics::Metrics;
use treemg::multigrid::{MgBlock, Msg, Multigrid, Phase, ReduceKind, Report, Stage, Status};
use treemg::operator::{Boundary, Operator};
use treemg::smoother::Smoother;

const DIRICHLET: Operator = Operator::Poisson { boundary: Boundary::Dirichlet };
const PERIODIC: Operator = Operator::Poisson { boundary: Boundary::Periodic };

fn small_mesh() -> MeshConfig {
    MeshConfig {
        block_size: [4, 4, 4],
        ghost_depth: [2, 2, 2],
        ..Default::default()
    }
}

fn solve(mesh: MeshConfig, config: SolverConfig, operator: Operator, delivery: Delivery, rhs: fn([f64; 3]) -> f64) -> (Vec<Report>, SolverFields, Vec<f64>, Arc<Metrics>) {
    let mut hierarchy = Hierarchy::build(mesh, config.rank, config.min_level, config.max_level).unwrap();
    hierarchy.set_rhs(rhs).unwrap();
    let fields = hierarchy.fields();
    let metrics = Metrics::new();
    let solver = Multigrid::new(config, operator, fields, metrics.clone()).unwrap();
    let solved = solver.solve(hierarchy.into_blocks(), delivery).unwrap();
    let leaf_rhs_sums = solved
        .iter()
        .filter(|s| s.block.is_leaf())
        .map(|s| s.block.field(fields.b).unwrap().interior_sum())
        .collect();
    (solved.into_iter().map(|s| s.report).collect(), fields, leaf_rhs_sums, metrics)
}

fn sines(x: [f64; 3]) -> f64 {
    (PI * x[0]).sin() * (PI * x[1]).sin() * (PI * x[2]).sin()
}

fn offset_sines(x: [f64; 3]) -> f64 {
    1.0 + (2.0 * PI * x[0]).sin() * (2.0 * PI * x[1]).cos()
}

fn ones(_: [f64; 3]) -> f64 {
    1.0
}

#[test]
fn single_level_solve_converges_monotonically() {
    let (reports, _, _, metrics) = solve(MeshConfig::default(), SolverConfig::default(), DIRICHLET, Delivery::Fifo, sines);
    let report = &reports[0];

    assert_eq!(reports.len(), 1);
    assert_eq!(report.status, Status::Converged);
    assert!(report.iterations < 50);
    assert_eq!(report.history.len(), report.iterations);
    assert_eq!(report.history[0], report.rr0);
    assert!(report.rr / report.rr0 < 1e-8);

    for pair in report.history.windows(2) {
        assert!(pair[1] <= pair[0], "{:?}", report.history);
    }
    assert_eq!(metrics.snapshot().faces_live, 0);
}

#[test]
fn solve_stops_as_diverged_after_iter_max_cycles() {
    let config = SolverConfig {
        iter_max: 2,
        smooth_last: Some(Smoother::GaussSeidel { sweeps: 1 }),
        ..Default::default()
    };
    let (reports, _, _, _) = solve(MeshConfig::default(), config, DIRICHLET, Delivery::Fifo, sines);

    assert_eq!(reports[0].status, Status::Diverged);
    assert_eq!(reports[0].iterations, 2);
    assert_eq!(reports[0].history.len(), 2);
}

#[test]
fn singular_right_hand_side_is_shifted_to_zero_mean() {
    let config = SolverConfig {
        iter_max: 1,
        ..Default::default()
    };
    let (_, _, sums, _) = solve(MeshConfig::default(), config, PERIODIC, Delivery::Fifo, offset_sines);
    assert_eq!(sums.len(), 1);
    assert!(sums[0].abs() < 1e-9, "{}", sums[0]);
}

#[test]
fn singular_shift_spans_every_leaf_of_a_refined_mesh() {
    let config = SolverConfig {
        max_level: 1,
        iter_max: 2,
        ..Default::default()
    };
    let (reports, _, sums, _) = solve(small_mesh(), config, PERIODIC, Delivery::Shuffled { seed: 3 }, offset_sines);
    assert_eq!(sums.len(), 8);
    assert!(sums.iter().sum::<f64>().abs() < 1e-9);
    assert!(reports.iter().all(|r| r.iterations == 2));
}

#[test]
fn delivery_order_does_not_change_the_residual_history() {
    let config = SolverConfig {
        max_level: 1,
        iter_max: 4,
        ..Default::default()
    };
    let deliveries = [Delivery::Fifo, Delivery::Shuffled { seed: 11 }, Delivery::Shuffled { seed: 12 }, Delivery::Parallel];
    let runs: Vec<_> = deliveries
        .iter()
        .map(|&delivery| solve(small_mesh(), config.clone(), DIRICHLET, delivery, sines))
        .collect();

    let (first, _, _, first_metrics) = &runs[0];
    assert_eq!(first.len(), 9);

    for report in first {
        assert_eq!(report.history.len(), report.iterations);
        assert_eq!(report.history, first[0].history);
        assert_eq!(report.status, first[0].status);
    }
    for (reports, _, _, metrics) in &runs[1..] {
        assert_eq!(reports, first);
        assert_eq!(metrics.snapshot(), first_metrics.snapshot());
    }
    assert_eq!(first_metrics.snapshot().faces_live, 0);
    assert!(first_metrics.snapshot().faces_created > 0);
}




// ============================================================================
fn fan_in_setup() -> (MgBlock, Vec<ExchangeMessage>, SolverFields) {
    let (parent, _, messages, fields) = fan_in_setup_at(small_mesh(), 3);
    (parent, messages, fields)
}

fn fan_in_setup_at(mesh: MeshConfig, rank: usize) -> (MgBlock, Vec<MgBlock>, Vec<ExchangeMessage>, SolverFields) {
    let mut hierarchy = Hierarchy::build(mesh, rank, 0, 1).unwrap();
    hierarchy.set_rhs(ones).unwrap();
    let fields = hierarchy.fields();
    let config = SolverConfig {
        rank,
        max_level: 1,
        smooth_pre: None,
        ..Default::default()
    };
    let solver = Multigrid::new(config, DIRICHLET, fields, Metrics::new()).unwrap();
    let mut automata = solver.automata(hierarchy.into_blocks()).unwrap();
    let parent_slot = automata.iter().position(|a| a.block().level() == 0).unwrap();
    let mut parent = automata.remove(parent_slot);
    let parent_index = parent.key();
    let mut messages = Vec::new();

    assert!(parent.start().unwrap().is_empty());
    assert_eq!(parent.phase(), Phase::RestrictSent);

    for child in &mut automata {
        for effect in child.start().unwrap() {
            if let Outgoing::Send(to, Msg::Restrict(message)) = effect {
                assert_eq!(to, parent_index);
                messages.push(message);
            }
        }
        assert_eq!(child.phase(), Phase::CoarseBarrier);
    }
    assert_eq!(messages.len(), 1 << rank);
    (parent, automata, messages, fields)
}

#[test]
fn parent_waits_for_every_child_in_any_order() {
    for seed in 0..20 {
        let (mut parent, mut messages, fields) = fan_in_setup();
        messages.shuffle(&mut StdRng::seed_from_u64(seed));

        for (n, message) in messages.into_iter().enumerate() {
            let effects = parent.receive(Msg::Restrict(message)).unwrap();
            let rhs = parent.block().field(fields.b).unwrap().interior_sum();

            // Each child fills one 2x2x2 octant of the parent with ones.
            assert_eq!(rhs, 8.0 * (n + 1) as f64);

            if n < 7 {
                assert!(effects.is_empty());
                assert_eq!(parent.phase(), Phase::RestrictSent);
            } else {
                assert_eq!(effects.len(), 1);
                assert!(matches!(&effects[0], Outgoing::Contribute(ReduceKind::Barrier, v) if v == &vec![0.0]));
                assert_eq!(parent.phase(), Phase::CoarseBarrier);
            }
        }
    }
}

#[test]
fn repeated_restriction_from_one_child_is_rejected() {
    let (mut parent, messages, _) = fan_in_setup();
    let message = messages[3].clone();
    let bits = message.octant_bits();

    parent.receive(Msg::Restrict(message.clone())).unwrap();
    assert!(matches!(
        parent.receive(Msg::Restrict(message)),
        Err(Error::DuplicateChild(_, b)) if b == bits
    ));
}

#[test]
fn messages_out_of_protocol_order_are_errors() {
    let hierarchy = Hierarchy::build(MeshConfig::default(), 3, 0, 0).unwrap();
    let solver = Multigrid::new(SolverConfig::default(), DIRICHLET, hierarchy.fields(), Metrics::new()).unwrap();
    let mut block = solver.automata(hierarchy.into_blocks()).unwrap().remove(0);

    let effects = block.start().unwrap();
    assert_eq!(effects.len(), 1);
    assert_eq!(block.phase(), Phase::CoarseBarrier);

    assert!(matches!(block.receive(Msg::Done(Stage::PostSmooth)), Err(Error::UnexpectedMessage(..))));
    assert!(matches!(
        block.receive(Msg::Prolong(ExchangeMessage::new([0, 0, 0], vec![]))),
        Err(Error::UnexpectedMessage(..))
    ));
    assert!(matches!(
        block.receive(Msg::Reduced(ReduceKind::ShiftRhs, vec![0.0, 1.0])),
        Err(Error::UnexpectedMessage(..))
    ));
    assert!(matches!(block.start(), Err(Error::UnexpectedMessage(..))));
}

#[test]
fn blocks_outside_the_solver_levels_are_rejected() {
    let hierarchy = Hierarchy::build(small_mesh(), 3, 0, 1).unwrap();
    let solver = Multigrid::new(SolverConfig::default(), DIRICHLET, hierarchy.fields(), Metrics::new()).unwrap();
    assert!(matches!(solver.automata(hierarchy.into_blocks()), Err(Error::InvalidConfig(_))));
}

#[test]
fn restriction_from_a_malformed_octant_is_rejected() {
    let (mut parent, messages, _) = fan_in_setup();
    let payload = messages[0].payload().to_vec();

    assert!(matches!(
        parent.receive(Msg::Restrict(ExchangeMessage::new([2, 0, 0], payload))),
        Err(Error::InvalidOctant(_, [2, 0, 0]))
    ));
    assert_eq!(parent.phase(), Phase::RestrictSent);
}

#[test]
fn octant_on_an_inactive_axis_does_not_count_toward_fan_in() {
    let mesh = MeshConfig {
        block_size: [4, 4, 1],
        ghost_depth: [2, 2, 0],
        ..Default::default()
    };
    let (mut parent, _, messages, fields) = fan_in_setup_at(mesh, 2);

    for message in &messages {
        let [i, j, _] = message.octant();
        let forged = ExchangeMessage::new([i, j, 1], message.payload().to_vec());
        assert!(matches!(parent.receive(Msg::Restrict(forged)), Err(Error::InvalidOctant(..))));
    }
    assert_eq!(parent.block().field(fields.b).unwrap().interior_sum(), 0.0);

    for (n, message) in messages.into_iter().enumerate() {
        parent.receive(Msg::Restrict(message)).unwrap();
        let expected = if n < 3 { Phase::RestrictSent } else { Phase::CoarseBarrier };
        assert_eq!(parent.phase(), expected);
    }
}

#[test]
fn prolongation_for_another_octant_is_rejected() {
    let (_, mut children, _, _) = fan_in_setup_at(small_mesh(), 3);
    let child = &mut children[0];
    let own = child.block().child_octant();
    let sibling = [1 - own[0], own[1], own[2]];

    for octant in [[2, 0, 0], sibling] {
        assert!(matches!(
            child.receive(Msg::Prolong(ExchangeMessage::new(octant, vec![]))),
            Err(Error::InvalidOctant(..))
        ));
    }
    assert_eq!(child.phase(), Phase::CoarseBarrier);
}

#[test]
fn coarse_correction_reduces_the_residual_on_a_refined_mesh() {
    let config = SolverConfig {
        max_level: 1,
        ..Default::default()
    };
    let (reports, _, _, _) = solve(small_mesh(), config, DIRICHLET, Delivery::Fifo, sines);
    let report = &reports[0];

    assert_eq!(report.status, Status::Converged);
    assert!(report.rr / report.rr0 < 1e-8);

    for pair in report.history.windows(2) {
        assert!(pair[1] <= pair[0], "{:?}", report.history);
    }
}
