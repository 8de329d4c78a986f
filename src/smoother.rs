use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::Result;
use crate::field::FieldId;
use crate::operator::Operator;

/// An iterative method applied to one block's `A x = b`, used both as the
/// pre-, post- and final smoother of the V-cycle and as its coarse solver.
/// Smoothers hold only their parameters; all state lives in the block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Smoother {
    /// Weighted Jacobi: `x += weight * (b - A x) / D`, repeated `sweeps`
    /// times.
    Jacobi { weight: f64, sweeps: usize },
    /// Red-black Gauss-Seidel: each sweep relaxes the even cells, then the
    /// odd cells with the even ones already updated.
    GaussSeidel { sweeps: usize },
}




// ============================================================================
impl Smoother {


    /**
     * Smooth `A x = b` on `block` when its level lies within `levels`.
     * Returns whether the block was smoothed. The caller signals completion
     * to the next stage of its own protocol; blocks outside the range
     * complete immediately.
     */
    pub fn apply(
        &self,
        op: &Operator,
        block: &mut Block,
        x: FieldId,
        b: FieldId,
        levels: &RangeInclusive<u32>,
    ) -> Result<bool> {
        if !levels.contains(&block.level()) {
            return Ok(false);
        }
        match *self {
            Smoother::Jacobi { weight, sweeps } => jacobi(op, block, x, b, weight, sweeps)?,
            Smoother::GaussSeidel { sweeps } => gauss_seidel(op, block, x, b, sweeps)?,
        }
        Ok(true)
    }

    pub fn sweeps(&self) -> usize {
        match self {
            Smoother::Jacobi { sweeps, .. } => *sweeps,
            Smoother::GaussSeidel { sweeps } => *sweeps,
        }
    }
}

fn jacobi(op: &Operator, block: &mut Block, x: FieldId, b: FieldId, weight: f64, sweeps: usize) -> Result<()> {
    let scale = weight / op.diagonal(block);

    for _ in 0..sweeps {
        op.fill_ghosts(block, x)?;
        let r = op.residual_values(block, b, x)?;
        let field = block.field_mut(x)?;
        let mut xs = field.to_vec_f64();

        for n in field.interior().iter_offsets(field.dims()) {
            xs[n] += scale * r[n];
        }
        field.assign_f64(&xs);
    }
    op.fill_ghosts(block, x)
}

fn gauss_seidel(op: &Operator, block: &mut Block, x: FieldId, b: FieldId, sweeps: usize) -> Result<()> {
    let stencil = op.stencil(block, x)?;
    let inverse_diagonal = 1.0 / stencil.diagonal();
    let bs = block.field(b)?.to_vec_f64();
    let field = block.field_mut(x)?;
    let mut xs = field.to_vec_f64();
    let interior = stencil.interior();
    let start = interior.start();

    for _ in 0..sweeps {
        for color in 0..2 {
            stencil.fill_ghosts(&mut xs);

            for (local, n) in interior.iter().zip(interior.iter_offsets(stencil.dims)) {
                let parity = (start[0] + local[0] + start[1] + local[1] + start[2] + local[2]) % 2;
                if parity == color {
                    xs[n] += (bs[n] - stencil.apply(&xs, n)) * inverse_diagonal;
                }
            }
        }
    }
    stencil.fill_ghosts(&mut xs);
    field.assign_f64(&xs);
    Ok(())
}
