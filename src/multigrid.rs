//! A geometric multigrid V-cycle run as a message-driven state machine on
//! every block of a refinement hierarchy.
//!
//! Blocks talk only to their parent and their children. A cycle descends
//! by restricting residuals to parents (fan-in: a parent waits for all of
//! its children), synchronizes every block in a global barrier, solves on
//! the coarsest level, and ascends by prolonging corrections to children
//! (fan-out: a child waits for both its own barrier signal and the
//! parent's correction, in whichever order they arrive). The squared
//! residual of the finest level is summed in the barrier reduction and
//! drives the convergence test.

use std::ops::RangeInclusive;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::automaton::{self, Automaton, Delivery, Outgoing};
use crate::block::Block;
use crate::config::SolverConfig;
use crate::error::{Error, Result};
use crate::field_face::{ExchangeMessage, FieldFace, Refresh};
use crate::hierarchy::SolverFields;
use crate::index::{octants, Index};
use crate::metrics::Metrics;
use crate::operator::Operator;

/// Global reductions used by the solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReduceKind {
    /// `[sum(b), count]` over the finest level, for singular operators.
    ShiftRhs,
    /// `[sum(r^2)]` over the finest level; gates the coarse solve.
    Barrier,
}

/// A smoothing or solving step whose completion a block signals to itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    PreSmooth,
    CoarseSolve,
    PostSmooth,
    LastSmooth,
}

/// Messages exchanged between solver blocks.
#[derive(Debug)]
pub enum Msg {
    Reduced(ReduceKind, Vec<f64>),
    /// A child's restricted residual, for the parent's right-hand side.
    Restrict(ExchangeMessage),
    /// A parent's solution, prolonged into the child's correction.
    Prolong(ExchangeMessage),
    Done(Stage),
}

impl Msg {
    fn name(&self) -> &'static str {
        match self {
            Msg::Reduced(ReduceKind::ShiftRhs, _) => "shift reduction",
            Msg::Reduced(ReduceKind::Barrier, _) => "barrier reduction",
            Msg::Restrict(_) => "restriction",
            Msg::Prolong(_) => "prolongation",
            Msg::Done(Stage::PreSmooth) => "pre-smoothing completion",
            Msg::Done(Stage::CoarseSolve) => "coarse solve completion",
            Msg::Done(Stage::PostSmooth) => "post-smoothing completion",
            Msg::Done(Stage::LastSmooth) => "final smoothing completion",
        }
    }
}

/// Where a block is in the V-cycle. Every phase except the two terminal
/// ones is waiting for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Entering,
    /// Waiting for the right-hand side sum (singular operators only).
    ShiftRhsPending,
    PreSmoothing,
    /// Waiting for a restriction from every child.
    RestrictSent,
    /// Waiting for the global barrier that precedes the coarse solve.
    CoarseBarrier,
    /// Coarsest level: the coarse solver is running.
    CoarseSolving,
    /// Waiting for the parent's correction and the barrier signal.
    ProlongPending,
    PostSmoothing,
    FinalSmoothing,
    Converged,
    Diverged,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Entering => "entering",
            Phase::ShiftRhsPending => "waiting for the shift",
            Phase::PreSmoothing => "pre-smoothing",
            Phase::RestrictSent => "waiting for children",
            Phase::CoarseBarrier => "waiting for the barrier",
            Phase::CoarseSolving => "coarse solving",
            Phase::ProlongPending => "waiting for the parent",
            Phase::PostSmoothing => "post-smoothing",
            Phase::FinalSmoothing => "final smoothing",
            Phase::Converged => "converged",
            Phase::Diverged => "diverged",
        }
    }
}

/// Terminal outcome of a solve. Divergence is a normal outcome, not an
/// error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Converged,
    Diverged,
}

/// What every block reports when the solve ends. All blocks of one solve
/// report the same numbers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub index: Index,
    pub status: Status,
    pub iterations: usize,
    pub rr0: f64,
    pub rr: f64,
    /// The global squared residual norm measured in each cycle.
    pub history: Vec<f64>,
}

/// A block and its report, yielded when the solve ends.
pub struct Solved {
    pub block: Block,
    pub report: Report,
}

/// Counts signals toward an expected total, re-arming itself when the
/// total is reached.
#[derive(Clone, Copy, Debug)]
pub struct Counter {
    count: usize,
    expected: usize,
}

impl Counter {
    pub fn new(expected: usize) -> Self {
        Self { count: 0, expected }
    }

    /// Record one signal, returning whether it completed the count.
    pub fn next(&mut self) -> bool {
        self.count += 1;

        if self.count == self.expected {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Per-block solver state. Everything mutable during a solve lives here or
/// in the block's fields.
#[derive(Debug)]
pub struct SolverState {
    phase: Phase,
    iter: usize,
    fan_in: Counter,
    fan_out: Counter,
    children_seen: u8,
    rr_local: f64,
    rr: f64,
    rr0: f64,
    pending: Option<ExchangeMessage>,
    shift_received: bool,
    status: Option<Status>,
    history: Vec<f64>,
}

impl SolverState {
    fn new(num_children: usize) -> Self {
        Self {
            phase: Phase::Entering,
            iter: 0,
            fan_in: Counter::new(num_children),
            fan_out: Counter::new(2),
            children_seen: 0,
            rr_local: 0.0,
            rr: 0.0,
            rr0: 0.0,
            pending: None,
            shift_received: false,
            status: None,
            history: Vec::new(),
        }
    }
}




/**
 * The shared, read-only part of a solve: configuration, operator, the
 * field layout of every block, and the metrics collector the run reports
 * to.
 */
pub struct Multigrid {
    config: SolverConfig,
    operator: Operator,
    fields: SolverFields,
    metrics: Arc<Metrics>,
}




// ============================================================================
impl Multigrid {


    pub fn new(config: SolverConfig, operator: Operator, fields: SolverFields, metrics: Arc<Metrics>) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            operator,
            fields,
            metrics,
        }))
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }


    /**
     * Wrap blocks in solver state machines. Every block must have the
     * configured rank and lie between the configured levels.
     */
    pub fn automata(self: &Arc<Self>, blocks: Vec<Block>) -> Result<Vec<MgBlock>> {
        let levels = self.levels();

        blocks
            .into_iter()
            .map(|block| {
                if block.rank() != self.config.rank || !levels.contains(&block.level()) {
                    return Err(Error::InvalidConfig(format!(
                        "block {} (rank {}) does not fit a rank {} solve over levels {:?}",
                        block.index(),
                        block.rank(),
                        self.config.rank,
                        levels
                    )));
                }
                Ok(MgBlock {
                    state: SolverState::new(block.num_children()),
                    block,
                    solver: Arc::clone(self),
                })
            })
            .collect()
    }


    /**
     * Solve on every block, delivering messages in the given order.
     * Returns the blocks, with their solutions, in index order.
     */
    pub fn solve(self: &Arc<Self>, blocks: Vec<Block>, delivery: Delivery) -> Result<Vec<Solved>> {
        automaton::execute(self.automata(blocks)?, delivery, &self.metrics)
    }

    fn levels(&self) -> RangeInclusive<u32> {
        self.config.min_level..=self.config.max_level
    }
}




/**
 * One block's solver: a state machine advanced by messages from its
 * parent, its children, itself, and the global reductions.
 */
pub struct MgBlock {
    block: Block,
    state: SolverState,
    solver: Arc<Multigrid>,
}

type Effects = Vec<Outgoing<Index, Msg, ReduceKind>>;




// ============================================================================
impl MgBlock {


    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn iterations(&self) -> usize {
        self.state.iter
    }

    fn require_phase(&self, phases: &[Phase], message: &Msg) -> Result<()> {
        if phases.contains(&self.state.phase) {
            Ok(())
        } else {
            Err(Error::UnexpectedMessage(self.block.index(), message.name(), self.state.phase.name()))
        }
    }

    fn to_self(&self, stage: Stage, out: &mut Effects) {
        out.push(Outgoing::Send(self.block.index(), Msg::Done(stage)))
    }

    fn is_min_level(&self) -> bool {
        self.block.level() == self.solver.config.min_level
    }

    fn is_max_level(&self) -> bool {
        self.block.level() == self.solver.config.max_level
    }

    fn restrict_face(&self, octant: [u32; 3]) -> FieldFace {
        let f = self.solver.fields;
        FieldFace::new(Refresh::Coarse)
            .with_child(octant)
            .with_field_map(vec![f.r], vec![f.b])
            .with_restrict(self.solver.config.restrict)
            .tracked(&self.solver.metrics)
    }

    fn prolong_face(&self, octant: [u32; 3]) -> FieldFace {
        let f = self.solver.fields;
        FieldFace::new(Refresh::Fine)
            .with_ghost([true; 3])
            .with_child(octant)
            .with_field_map(vec![f.x], vec![f.c])
            .with_prolong(self.solver.config.prolong)
            .tracked(&self.solver.metrics)
    }

    fn enter(&mut self, out: &mut Effects) -> Result<()> {
        let f = self.solver.fields;

        for id in [f.x, f.r, f.c] {
            self.block.field_mut(id)?.fill(0.0)
        }

        if self.solver.operator.is_singular() {
            let (sum, count) = if self.block.is_leaf() {
                let b = self.block.field(f.b)?;
                (b.interior_sum(), b.interior().len() as f64)
            } else {
                (0.0, 0.0)
            };
            out.push(Outgoing::Contribute(ReduceKind::ShiftRhs, vec![sum, count]));
            self.state.phase = if self.block.is_leaf() {
                Phase::ShiftRhsPending
            } else {
                Phase::RestrictSent
            };
            Ok(())
        } else if self.block.is_leaf() {
            self.begin_cycle(out)
        } else {
            self.state.phase = Phase::RestrictSent;
            Ok(())
        }
    }

    fn shift_rhs(&mut self, values: &[f64], message: &Msg, out: &mut Effects) -> Result<()> {
        if self.state.shift_received || !self.solver.operator.is_singular() {
            return Err(Error::UnexpectedMessage(self.block.index(), message.name(), self.state.phase.name()));
        }
        self.state.shift_received = true;

        if self.is_max_level() && values[1] > 0.0 {
            let shift = -values[0] / values[1];
            let b = self.block.field_mut(self.solver.fields.b)?;
            let dims = b.dims();

            for n in b.interior().iter_offsets(dims) {
                b.set(n, b.get(n) + shift)
            }
            debug!("{} shifted rhs by {:e}", self.block.index(), shift);
        }
        // Refined blocks are already waiting on their children.
        if self.state.phase == Phase::ShiftRhsPending {
            self.begin_cycle(out)?;
        }
        Ok(())
    }

    fn begin_cycle(&mut self, out: &mut Effects) -> Result<()> {
        let f = self.solver.fields;

        if self.is_min_level() {
            if self.block.is_leaf() {
                self.solver.operator.residual(&mut self.block, f.r, f.b, f.x)?;
                self.state.rr_local += self.block.field(f.r)?.interior_sum_squares();
            } else {
                self.block.field_mut(f.x)?.fill(0.0);
            }
            out.push(Outgoing::Contribute(ReduceKind::Barrier, vec![self.state.rr_local]));
            self.state.phase = Phase::CoarseBarrier;
            return Ok(());
        }
        if !self.block.is_leaf() && !self.is_max_level() {
            self.block.field_mut(f.x)?.fill(0.0);
        }
        match self.solver.config.smooth_pre {
            Some(smoother) => {
                let levels = self.solver.levels();
                smoother.apply(&self.solver.operator, &mut self.block, f.x, f.b, &levels)?;
                self.state.phase = Phase::PreSmoothing;
                self.to_self(Stage::PreSmooth, out);
                Ok(())
            }
            None => self.restrict_send(out),
        }
    }

    fn restrict_send(&mut self, out: &mut Effects) -> Result<()> {
        let f = self.solver.fields;
        self.solver.operator.residual(&mut self.block, f.r, f.b, f.x)?;

        if self.block.is_leaf() {
            self.state.rr_local += self.block.field(f.r)?.interior_sum_squares();
        }
        let octant = self.block.child_octant();
        let payload = self.restrict_face(octant).pack(&self.block)?;
        let parent = self.block.index_parent(self.solver.config.min_level);

        debug!("{} restricts to {}", self.block.index(), parent);
        out.push(Outgoing::Send(parent, Msg::Restrict(ExchangeMessage::new(octant, payload))));
        out.push(Outgoing::Contribute(ReduceKind::Barrier, vec![self.state.rr_local]));
        self.state.phase = Phase::CoarseBarrier;
        Ok(())
    }

    /// An octant must address a child that exists at this rank.
    fn check_octant(&self, message: &ExchangeMessage) -> Result<()> {
        let octant = message.octant();
        let valid = (0..3).all(|a| octant[a] < 2 && (a < self.block.rank() || octant[a] == 0));

        if valid {
            Ok(())
        } else {
            Err(Error::InvalidOctant(self.block.index(), message.octant_bits()))
        }
    }

    fn restrict_recv(&mut self, message: ExchangeMessage, out: &mut Effects) -> Result<()> {
        self.check_octant(&message)?;
        let [i, j, k] = message.octant();
        let bit = 1u8 << (i + 2 * j + 4 * k);

        if self.state.children_seen & bit != 0 {
            return Err(Error::DuplicateChild(self.block.index(), message.octant_bits()));
        }
        self.state.children_seen |= bit;
        self.restrict_face(message.octant()).unpack(message.payload(), &mut self.block)?;

        if self.state.fan_in.next() {
            debug!("{} received all children", self.block.index());
            self.state.children_seen = 0;
            self.begin_cycle(out)?;
        }
        Ok(())
    }

    fn barrier(&mut self, values: &[f64], out: &mut Effects) -> Result<()> {
        self.state.rr = values[0];
        self.state.rr_local = 0.0;

        if self.state.iter == 0 {
            self.state.rr0 = self.state.rr;
        }
        self.state.history.push(self.state.rr);
        self.monitor(false);

        if self.is_min_level() {
            let f = self.solver.fields;
            let levels = self.solver.config.min_level..=self.solver.config.min_level;
            self.solver.config.solve_coarse.apply(&self.solver.operator, &mut self.block, f.x, f.b, &levels)?;
            self.state.phase = Phase::CoarseSolving;
            self.to_self(Stage::CoarseSolve, out);
            Ok(())
        } else {
            self.state.phase = Phase::ProlongPending;
            self.prolong_signal(out)
        }
    }

    fn prolong_send(&mut self, out: &mut Effects) -> Result<()> {
        let f = self.solver.fields;
        self.solver.operator.fill_ghosts(&mut self.block, f.x)?;

        for octant in octants(self.block.rank()) {
            let child = self.block.index_child(octant, self.solver.config.min_level)?;
            let payload = self.prolong_face(octant).pack(&self.block)?;
            out.push(Outgoing::Send(child, Msg::Prolong(ExchangeMessage::new(octant, payload))));
        }
        Ok(())
    }

    fn prolong_pending(&mut self, message: ExchangeMessage, out: &mut Effects) -> Result<()> {
        self.check_octant(&message)?;

        if message.octant() != self.block.child_octant() {
            return Err(Error::InvalidOctant(self.block.index(), message.octant_bits()));
        }
        if self.state.pending.is_some() {
            return Err(Error::DuplicatePending(self.block.index()));
        }
        self.state.pending = Some(message);
        self.prolong_signal(out)
    }

    fn prolong_signal(&mut self, out: &mut Effects) -> Result<()> {
        if !self.state.fan_out.next() {
            return Ok(());
        }
        let message = self.state.pending.take().ok_or_else(|| Error::MissingPending(self.block.index()))?;
        let f = self.solver.fields;

        self.prolong_face(message.octant()).unpack(message.payload(), &mut self.block)?;

        let c = self.block.field(f.c)?.to_vec_f64();
        let x = self.block.field_mut(f.x)?;
        let mut xs = x.to_vec_f64();

        for n in x.interior().iter_offsets(x.dims()) {
            xs[n] += c[n];
        }
        x.assign_f64(&xs);

        match self.solver.config.smooth_post {
            Some(smoother) => {
                let levels = self.solver.levels();
                smoother.apply(&self.solver.operator, &mut self.block, f.x, f.b, &levels)?;
                self.state.phase = Phase::PostSmoothing;
                self.to_self(Stage::PostSmooth, out);
                Ok(())
            }
            None => self.post_smoothed(out),
        }
    }

    fn post_smoothed(&mut self, out: &mut Effects) -> Result<()> {
        if !self.block.is_leaf() && !self.is_max_level() {
            self.prolong_send(out)?;
        }
        self.end_cycle(out)
    }

    fn end_cycle(&mut self, out: &mut Effects) -> Result<()> {
        let config = &self.solver.config;
        let state = &mut self.state;
        state.iter += 1;

        let converged = state.rr == 0.0 || (state.rr0 > 0.0 && state.rr / state.rr0 < config.res_tol);
        let diverged = state.iter >= config.iter_max;

        if converged || diverged {
            let status = if converged { Status::Converged } else { Status::Diverged };
            state.status = Some(status);
            self.monitor(true);

            match self.solver.config.smooth_last {
                Some(smoother) if self.block.is_leaf() => {
                    let f = self.solver.fields;
                    let levels = self.solver.levels();
                    smoother.apply(&self.solver.operator, &mut self.block, f.x, f.b, &levels)?;
                    self.state.phase = Phase::FinalSmoothing;
                    self.to_self(Stage::LastSmooth, out);
                }
                _ => self.finish(),
            }
            Ok(())
        } else if self.block.is_leaf() || self.is_max_level() {
            self.begin_cycle(out)
        } else {
            self.state.phase = Phase::RestrictSent;
            Ok(())
        }
    }

    fn finish(&mut self) {
        self.state.phase = match self.state.status {
            Some(Status::Converged) => Phase::Converged,
            _ => Phase::Diverged,
        };
        debug!("{} finished after {} cycles: {}", self.block.index(), self.state.iter, self.state.phase.name());
    }

    fn monitor(&self, last: bool) {
        if !(self.block.index().is_zero() && self.is_max_level()) {
            return;
        }
        let state = &self.state;
        let every = self.solver.config.monitor_iter;

        if last || state.iter == 0 || (every > 0 && state.iter % every == 0) {
            let ratio = if state.rr0 > 0.0 { state.rr / state.rr0 } else { 0.0 };
            let status = match state.status {
                Some(Status::Converged) => "converged",
                Some(Status::Diverged) => "diverged",
                None => "",
            };
            info!(
                "mg iter {:4} rr0 {:.6e} rr {:.6e} rr/rr0 {:.6e} {}",
                state.iter, state.rr0, state.rr, ratio, status
            );
        }
    }
}

impl Automaton for MgBlock {
    type Key = Index;
    type Message = Msg;
    type Tag = ReduceKind;
    type Value = Solved;

    fn key(&self) -> Index {
        self.block.index()
    }

    fn start(&mut self) -> Result<Effects> {
        if self.state.phase != Phase::Entering {
            return Err(Error::UnexpectedMessage(self.block.index(), "start", self.state.phase.name()));
        }
        let mut out = Vec::new();
        self.enter(&mut out)?;
        Ok(out)
    }

    fn receive(&mut self, message: Msg) -> Result<Effects> {
        let mut out = Vec::new();

        match message {
            Msg::Reduced(ReduceKind::ShiftRhs, ref values) => {
                self.shift_rhs(values, &message, &mut out)?;
            }
            Msg::Reduced(ReduceKind::Barrier, ref values) => {
                self.require_phase(&[Phase::CoarseBarrier], &message)?;
                self.barrier(values, &mut out)?;
            }
            Msg::Restrict(_) => {
                self.require_phase(&[Phase::RestrictSent], &message)?;
                if let Msg::Restrict(m) = message {
                    self.restrict_recv(m, &mut out)?;
                }
            }
            Msg::Prolong(_) => {
                if self.is_min_level() {
                    return Err(Error::UnexpectedMessage(self.block.index(), message.name(), self.state.phase.name()));
                }
                self.require_phase(&[Phase::CoarseBarrier, Phase::ProlongPending], &message)?;
                if let Msg::Prolong(m) = message {
                    self.prolong_pending(m, &mut out)?;
                }
            }
            Msg::Done(stage) => match stage {
                Stage::PreSmooth => {
                    self.require_phase(&[Phase::PreSmoothing], &message)?;
                    self.restrict_send(&mut out)?;
                }
                Stage::CoarseSolve => {
                    self.require_phase(&[Phase::CoarseSolving], &message)?;
                    if !self.block.is_leaf() {
                        self.prolong_send(&mut out)?;
                    }
                    self.end_cycle(&mut out)?;
                }
                Stage::PostSmooth => {
                    self.require_phase(&[Phase::PostSmoothing], &message)?;
                    self.post_smoothed(&mut out)?;
                }
                Stage::LastSmooth => {
                    self.require_phase(&[Phase::FinalSmoothing], &message)?;
                    self.finish();
                }
            },
        }
        Ok(out)
    }

    fn reduced(tag: ReduceKind, values: &[f64]) -> Msg {
        Msg::Reduced(tag, values.to_vec())
    }

    fn is_finished(&self) -> bool {
        matches!(self.state.phase, Phase::Converged | Phase::Diverged)
    }

    fn value(self) -> Solved {
        let state = self.state;
        Solved {
            report: Report {
                index: self.block.index(),
                status: state.status.unwrap_or(Status::Diverged),
                iterations: state.iter,
                rr0: state.rr0,
                rr: state.rr,
                history: state.history,
            },
            block: self.block,
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn counter_rearms_after_completing() {
        let mut counter = Counter::new(2);
        assert!(!counter.next());
        assert_eq!(counter.count(), 1);
        assert!(counter.next());
        assert_eq!(counter.count(), 0);
        assert!(!counter.next());
    }

    #[test]
    fn phase_and_message_names_are_distinct() {
        let phases = [
            Phase::Entering,
            Phase::ShiftRhsPending,
            Phase::PreSmoothing,
            Phase::RestrictSent,
            Phase::CoarseBarrier,
            Phase::CoarseSolving,
            Phase::ProlongPending,
            Phase::PostSmoothing,
            Phase::FinalSmoothing,
            Phase::Converged,
            Phase::Diverged,
        ];
        let mut names: Vec<_> = phases.iter().map(Phase::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), phases.len());
        assert_ne!(Msg::Done(Stage::PreSmooth).name(), Msg::Done(Stage::PostSmooth).name());
    }
}
