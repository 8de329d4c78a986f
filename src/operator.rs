use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::{Error, Result};
use crate::field::FieldId;
use crate::index_space::{linear_offset, Region};

/// Boundary condition applied at the edges of every block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Boundary {
    /// Homogeneous Dirichlet: ghost cells mirror the interior with opposite
    /// sign, so the solution vanishes on the block faces.
    Dirichlet,
    /// Ghost cells wrap around to the opposite side of the block.
    Periodic,
}

/// The matrix operator of the linear system `A x = b`. Operators hold no
/// per-block state and are shared by every block of a solve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operator {
    /// `A = -∇²` with the second-order cell-centred stencil.
    Poisson { boundary: Boundary },
    /// `A = -∇² + kappa`.
    Helmholtz { boundary: Boundary, kappa: f64 },
}




// ============================================================================
impl Operator {


    pub fn boundary(&self) -> Boundary {
        match self {
            Operator::Poisson { boundary } => *boundary,
            Operator::Helmholtz { boundary, .. } => *boundary,
        }
    }

    fn kappa(&self) -> f64 {
        match self {
            Operator::Poisson { .. } => 0.0,
            Operator::Helmholtz { kappa, .. } => *kappa,
        }
    }


    /**
     * Whether the operator has a null space. A periodic Laplacian maps
     * constants to zero, so a right-hand side must have zero mean to be in
     * its range.
     */
    pub fn is_singular(&self) -> bool {
        self.boundary() == Boundary::Periodic && self.kappa() == 0.0
    }


    /**
     * Return the (constant) diagonal of the operator on `block`.
     */
    pub fn diagonal(&self, block: &Block) -> f64 {
        let h = block.cell_width();
        (0..block.rank()).map(|a| 2.0 / (h[a] * h[a])).sum::<f64>() + self.kappa()
    }


    /**
     * Fill the ghost zones of field `id` from its own interior according to
     * the boundary condition.
     */
    pub fn fill_ghosts(&self, block: &mut Block, id: FieldId) -> Result<()> {
        let stencil = self.stencil(block, id)?;
        let field = block.field_mut(id)?;
        let mut values = field.to_vec_f64();
        stencil.fill_ghosts(&mut values);
        field.assign_f64(&values);
        Ok(())
    }


    /**
     * Compute `r = b - A x` on the interior of `block`, with the ghost zones
     * of `r` set to zero. The ghost zones of `x` are refreshed first.
     */
    pub fn residual(&self, block: &mut Block, r: FieldId, b: FieldId, x: FieldId) -> Result<()> {
        self.fill_ghosts(block, x)?;
        let values = self.residual_values(block, b, x)?;
        block.field_mut(r)?.assign_f64(&values);
        Ok(())
    }


    /**
     * Return `b - A x` over the whole array of `x` (zero in the ghost
     * zones), assuming the ghost zones of `x` are current.
     */
    pub fn residual_values(&self, block: &Block, b: FieldId, x: FieldId) -> Result<Vec<f64>> {
        let stencil = self.stencil(block, x)?;
        let xs = block.field(x)?.to_vec_f64();
        let bs = block.field(b)?.to_vec_f64();

        if xs.len() != bs.len() {
            return Err(Error::SizeMismatch { expected: xs.len(), actual: bs.len() });
        }
        let mut r = vec![0.0; xs.len()];

        for n in stencil.interior().iter_offsets(stencil.dims) {
            r[n] = bs[n] - stencil.apply(&xs, n);
        }
        Ok(r)
    }

    pub(crate) fn stencil(&self, block: &Block, id: FieldId) -> Result<Stencil> {
        let field = block.field(id)?;
        let dims = field.dims();
        let ghost = field.ghost_depth();
        let size = field.size();
        let h = block.cell_width();
        let mut active = [false; 3];
        let mut inv_h2 = [0.0; 3];

        for a in 0..block.rank() {
            if ghost[a] == 0 || size[a] < ghost[a] {
                return Err(Error::InvalidConfig(format!(
                    "axis {} of field {} needs a ghost depth between 1 and its size {}",
                    a, field.name(), size[a]
                )));
            }
            active[a] = true;
            inv_h2[a] = 1.0 / (h[a] * h[a]);
        }
        Ok(Stencil {
            dims,
            ghost,
            strides: [1, dims[0], dims[0] * dims[1]],
            inv_h2,
            active,
            kappa: self.kappa(),
            boundary: self.boundary(),
        })
    }
}




/**
 * The operator laid over one field's array.
 */
pub(crate) struct Stencil {
    pub dims: [usize; 3],
    ghost: [usize; 3],
    strides: [usize; 3],
    inv_h2: [f64; 3],
    active: [bool; 3],
    kappa: f64,
    boundary: Boundary,
}

impl Stencil {
    pub fn interior(&self) -> Region {
        let g = self.ghost;
        let d = self.dims;
        Region::new(g, [d[0] - 2 * g[0], d[1] - 2 * g[1], d[2] - 2 * g[2]])
    }

    pub fn diagonal(&self) -> f64 {
        (0..3).filter(|&a| self.active[a]).map(|a| 2.0 * self.inv_h2[a]).sum::<f64>() + self.kappa
    }

    /// `(A x)` at the interior cell with offset `n`.
    pub fn apply(&self, x: &[f64], n: usize) -> f64 {
        let mut y = self.kappa * x[n];

        for a in 0..3 {
            if self.active[a] {
                let s = self.strides[a];
                y += (2.0 * x[n] - x[n - s] - x[n + s]) * self.inv_h2[a];
            }
        }
        y
    }

    /// Fill ghost zones axis by axis, over the full extent of the other
    /// axes, so edges and corners are filled too.
    pub fn fill_ghosts(&self, x: &mut [f64]) {
        for a in 0..3 {
            if !self.active[a] {
                continue;
            }
            let g = self.ghost[a];
            let s = self.dims[a] - 2 * g;

            for index in Region::whole(self.dims).iter() {
                let i = index[a];
                let source = if i < g {
                    match self.boundary {
                        Boundary::Dirichlet => 2 * g - 1 - i,
                        Boundary::Periodic => i + s,
                    }
                } else if i >= g + s {
                    match self.boundary {
                        Boundary::Dirichlet => 2 * (g + s) - 1 - i,
                        Boundary::Periodic => i - s,
                    }
                } else {
                    continue;
                };
                let mut from = index;
                from[a] = source;
                let value = x[linear_offset(self.dims, from)];

                x[linear_offset(self.dims, index)] = match self.boundary {
                    Boundary::Dirichlet => -value,
                    Boundary::Periodic => value,
                };
            }
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::field::{Field, Precision};
    use crate::index::Index;

    fn block(size: [usize; 3], ghost: [usize; 3], rank: usize) -> (Block, FieldId, FieldId, FieldId) {
        let mut block = Block::new(Index::default(), rank, true, [0.5; 3]);
        let x = block.insert_field(Field::new("x", size, ghost, Precision::Double).unwrap());
        let b = block.insert_field(Field::new("b", size, ghost, Precision::Double).unwrap());
        let r = block.insert_field(Field::new("r", size, ghost, Precision::Double).unwrap());
        (block, x, b, r)
    }

    #[test]
    fn periodic_laplacian_is_singular_and_annihilates_constants() {
        let op = Operator::Poisson { boundary: Boundary::Periodic };
        assert!(op.is_singular());
        assert!(!Operator::Helmholtz { boundary: Boundary::Periodic, kappa: 1.0 }.is_singular());
        assert!(!Operator::Poisson { boundary: Boundary::Dirichlet }.is_singular());

        let (mut block, x, b, r) = block([4, 4, 4], [1, 1, 1], 3);
        block.field_mut(x).unwrap().fill(7.0);
        op.residual(&mut block, r, b, x).unwrap();
        assert_eq!(block.field(r).unwrap().interior_sum_squares(), 0.0);
    }

    #[test]
    fn dirichlet_ghosts_mirror_with_opposite_sign() {
        let op = Operator::Poisson { boundary: Boundary::Dirichlet };
        let (mut block, x, _, _) = block([4, 1, 1], [2, 0, 0], 1);
        let field = block.field_mut(x).unwrap();
        for i in 0..4 {
            field.set(2 + i, (i + 1) as f64);
        }
        op.fill_ghosts(&mut block, x).unwrap();
        let values = block.field(x).unwrap().to_vec_f64();
        assert_eq!(values, vec![-2.0, -1.0, 1.0, 2.0, 3.0, 4.0, -4.0, -3.0]);
    }

    #[test]
    fn periodic_ghosts_wrap_around() {
        let op = Operator::Poisson { boundary: Boundary::Periodic };
        let (mut block, x, _, _) = block([4, 1, 1], [2, 0, 0], 1);
        let field = block.field_mut(x).unwrap();
        for i in 0..4 {
            field.set(2 + i, (i + 1) as f64);
        }
        op.fill_ghosts(&mut block, x).unwrap();
        let values = block.field(x).unwrap().to_vec_f64();
        assert_eq!(values, vec![3.0, 4.0, 1.0, 2.0, 3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn residual_of_a_quadratic_matches_the_second_derivative() {
        // x = i^2 everywhere, ghosts included, so A x = -2 / h^2.
        let op = Operator::Poisson { boundary: Boundary::Dirichlet };
        let (mut block, x, b, r) = block([6, 1, 1], [1, 0, 0], 1);
        for i in 0..8 {
            block.field_mut(x).unwrap().set(i, (i * i) as f64);
        }
        let values = op.residual_values(&block, b, x).unwrap();
        for n in 2..6 {
            assert!((values[n] - 2.0 / 0.25).abs() < 1e-12);
        }
        op.residual(&mut block, r, b, x).unwrap();
        assert_eq!(block.field(r).unwrap().get(0), 0.0);
    }

    #[test]
    fn diagonal_counts_active_axes() {
        let op = Operator::Helmholtz { boundary: Boundary::Dirichlet, kappa: 1.0 };
        let (block2, ..) = block([4, 4, 1], [1, 1, 0], 2);
        assert_eq!(op.diagonal(&block2), 2.0 * 8.0 + 1.0);
        assert_eq!(op.stencil(&block2, 0).unwrap().diagonal(), op.diagonal(&block2));
    }

    #[test]
    fn active_axis_without_ghosts_is_rejected() {
        let op = Operator::Poisson { boundary: Boundary::Dirichlet };
        let (block, x, _, _) = block([4, 4, 4], [1, 1, 0], 3);
        assert!(matches!(op.stencil(&block, x), Err(Error::InvalidConfig(_))));
    }
}
