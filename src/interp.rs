use serde::{Deserialize, Serialize};

use crate::field::Scalar;
use crate::index_space::Region;

/// Operator used to downsample fine cells onto a coarse grid. Each coarse
/// cell covers up to two fine cells per axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Restrict {
    /// Volume average over the covered fine cells.
    Average,
    /// Take the lowest covered fine cell.
    Inject,
}

/// Operator used to interpolate coarse cells onto a fine grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prolong {
    /// Piecewise constant: every fine cell takes its covering coarse value.
    Inject,
    /// Cell-centred multilinear interpolation, extrapolated linearly at the
    /// edges of the coarse region.
    Linear,
}

impl Default for Restrict {
    fn default() -> Self {
        Restrict::Average
    }
}

impl Default for Prolong {
    fn default() -> Self {
        Prolong::Linear
    }
}

/// Number of coarse cells covering `n` fine cells on each axis.
pub fn coarse_count(n: [usize; 3]) -> [usize; 3] {
    [(n[0] + 1) / 2, (n[1] + 1) / 2, (n[2] + 1) / 2]
}




// ============================================================================
impl Restrict {

    /// Restrict the `src_region` of `src` into the `dst_region` of `dst`.
    /// The destination region must hold `coarse_count` of the source
    /// region's count.
    pub fn apply<T: Scalar>(
        &self,
        dst: &mut [T],
        dst_dims: [usize; 3],
        dst_region: Region,
        src: &[T],
        src_dims: [usize; 3],
        src_region: Region,
    ) {
        let ns = src_region.count();
        assert_eq!(dst_region.count(), coarse_count(ns), "restrict region mismatch");

        for c in dst_region.iter() {
            let value = match self {
                Restrict::Inject => src[src_region.offset_of(src_dims, [2 * c[0], 2 * c[1], 2 * c[2]])],
                Restrict::Average => {
                    let mut sum = T::default();
                    let mut num = 0;

                    for dz in 0..2 {
                        for dy in 0..2 {
                            for dx in 0..2 {
                                let f = [2 * c[0] + dx, 2 * c[1] + dy, 2 * c[2] + dz];
                                if f[0] < ns[0] && f[1] < ns[1] && f[2] < ns[2] {
                                    sum += src[src_region.offset_of(src_dims, f)];
                                    num += 1;
                                }
                            }
                        }
                    }
                    sum / T::from_f64(num as f64)
                }
            };
            dst[dst_region.offset_of(dst_dims, c)] = value;
        }
    }
}




// ============================================================================
impl Prolong {

    /// Prolong the `src_region` of `src` into the `dst_region` of `dst`. The
    /// source region must hold `coarse_count` of the destination region's
    /// count, and is aligned so that fine cells `2c` and `2c + 1` lie inside
    /// coarse cell `c`. With `accumulate` the interpolated values are added
    /// to the destination instead of overwriting it.
    #[allow(clippy::too_many_arguments)]
    pub fn apply<T: Scalar>(
        &self,
        dst: &mut [T],
        dst_dims: [usize; 3],
        dst_region: Region,
        src: &[T],
        src_dims: [usize; 3],
        src_region: Region,
        accumulate: bool,
    ) {
        let nc = src_region.count();
        assert_eq!(nc, coarse_count(dst_region.count()), "prolong region mismatch");

        for f in dst_region.iter() {
            let value = match self {
                Prolong::Inject => {
                    let c = [
                        (f[0] / 2).min(nc[0] - 1),
                        (f[1] / 2).min(nc[1] - 1),
                        (f[2] / 2).min(nc[2] - 1),
                    ];
                    src[src_region.offset_of(src_dims, c)]
                }
                Prolong::Linear => {
                    let sx = linear_stencil(f[0], nc[0]);
                    let sy = linear_stencil(f[1], nc[1]);
                    let sz = linear_stencil(f[2], nc[2]);
                    let mut sum = T::default();

                    for &(k, wz) in &sz {
                        for &(j, wy) in &sy {
                            for &(i, wx) in &sx {
                                let w = wx * wy * wz;
                                if w != 0.0 {
                                    sum += src[src_region.offset_of(src_dims, [i, j, k])] * T::from_f64(w);
                                }
                            }
                        }
                    }
                    sum
                }
            };
            let n = dst_region.offset_of(dst_dims, f);

            if accumulate {
                dst[n] += value
            } else {
                dst[n] = value
            }
        }
    }
}

/// Return the two coarse cells and weights used to interpolate fine cell
/// `f` on an axis with `nc` coarse cells. Fine cell centres sit at coarse
/// coordinate `(f + 0.5) / 2 - 0.5`.
fn linear_stencil(f: usize, nc: usize) -> [(usize, f64); 2] {
    if nc == 1 {
        return [(0, 1.0), (0, 0.0)];
    }
    let x = (f as f64 + 0.5) / 2.0 - 0.5;
    let i0 = (x.floor().max(0.0) as usize).min(nc - 2);
    let t = x - i0 as f64;
    [(i0, 1.0 - t), (i0 + 1, t)]
}
