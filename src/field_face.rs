use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::{Error, Result};
use crate::field::{Field, FieldId, Scalar, Values};
use crate::index_space::Region;
use crate::interp::{coarse_count, Prolong, Restrict};
use crate::metrics::{Live, MetricEvent, Metrics};

/// Relation between the sending and the receiving block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Refresh {
    /// Both blocks are on the same level: a plain copy.
    Same,
    /// The receiver is the parent: the sender restricts.
    Coarse,
    /// The receiver is a child: the receiver prolongs.
    Fine,
}

/// Side of an exchange a region is computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Load,
    Store,
}




/**
 * Compute the sub-array of a field read (`Op::Load`) or written
 * (`Op::Store`) by one exchange.
 *
 * `face` selects the -1/0/+1 side on each axis; the all-zero face is a
 * whole-block transfer between levels. `ghost` includes the ghost zones on
 * an axis with face 0. `child` is the octant the fine block occupies within
 * the coarse one, and offsets coarse-side regions by half the interior.
 * `dims` are the field's dimensions including `ghost_depth` on each side.
 *
 * Every count is at least one. Accumulating same-level transfers extend
 * face regions by one cell toward the interior; accumulating restriction
 * or prolongation is rejected.
 */
#[allow(clippy::too_many_arguments)]
pub fn compute_bounds(
    face: [i32; 3],
    ghost: [bool; 3],
    child: [u32; 3],
    refresh: Refresh,
    op: Op,
    accumulate: bool,
    dims: [usize; 3],
    ghost_depth: [usize; 3],
) -> Result<Region> {
    if accumulate {
        match refresh {
            Refresh::Same => {}
            Refresh::Coarse => return Err(Error::NotImplemented("coarse")),
            Refresh::Fine => return Err(Error::NotImplemented("fine")),
        }
    }
    let full_block = face == [0, 0, 0];
    let mut im = [0i64; 3];
    let mut n = [0i64; 3];

    for axis in 0..3 {
        let (i, m) = axis_limits(
            face[axis],
            ghost[axis],
            child[axis],
            refresh,
            op,
            full_block,
            dims[axis] as i64,
            ghost_depth[axis] as i64,
        );
        im[axis] = i;
        n[axis] = m.max(1);
    }

    if accumulate {
        for axis in 0..3 {
            if !ghost[axis] {
                if (op == Op::Load && face[axis] == -1) || (op == Op::Store && face[axis] == 1) {
                    im[axis] -= 1;
                }
                if face[axis] != 0 {
                    n[axis] += 1;
                }
            }
        }
    }

    let in_range = (0..3).all(|a| im[a] >= 0 && im[a] + n[a] <= dims[a] as i64);

    if !in_range {
        return Err(Error::RegionOutOfBounds { start: im, count: n, dims });
    }
    Ok(Region::new(
        [im[0] as usize, im[1] as usize, im[2] as usize],
        [n[0] as usize, n[1] as usize, n[2] as usize],
    ))
}

#[allow(clippy::too_many_arguments)]
fn axis_limits(face: i32, ghost: bool, child: u32, refresh: Refresh, op: Op, full_block: bool, nd: i64, ng: i64) -> (i64, i64) {
    let co = child as i64 * (nd - 2 * ng) / 2;
    let child = child as i64;

    match (refresh, face.cmp(&0), op) {
        (Refresh::Same, Ordering::Equal, _) if ghost => (0, nd),
        (Refresh::Same, Ordering::Equal, _) => (ng, nd - 2 * ng),
        (Refresh::Same, Ordering::Less, Op::Load) => (ng, ng),
        (Refresh::Same, Ordering::Less, Op::Store) => (0, ng),
        (Refresh::Same, Ordering::Greater, Op::Load) => (nd - 2 * ng, ng),
        (Refresh::Same, Ordering::Greater, Op::Store) => (nd - ng, ng),

        // Fine blocks on an oblique coarse/fine interface need the coarse
        // ghost data too, so face-0 regions widen by half a ghost layer on
        // the coarse side (a full layer on the fine side).
        (Refresh::Fine, Ordering::Equal, Op::Load) if ghost => (ng / 2 + co, nd / 2),
        (Refresh::Fine, Ordering::Equal, Op::Load) if full_block => (ng + co, (nd - 2 * ng) / 2),
        (Refresh::Fine, Ordering::Equal, Op::Load) => (ng + co - child * (ng / 2), (nd - 2 * ng) / 2 + ng / 2),
        (Refresh::Fine, Ordering::Equal, Op::Store) if ghost => (0, nd),
        (Refresh::Fine, Ordering::Equal, Op::Store) if full_block => (ng, nd - 2 * ng),
        (Refresh::Fine, Ordering::Equal, Op::Store) => (ng - child * ng, nd - ng),
        (Refresh::Fine, Ordering::Less, Op::Load) => (ng, ng / 2),
        (Refresh::Fine, Ordering::Less, Op::Store) => (0, ng),
        (Refresh::Fine, Ordering::Greater, Op::Load) => (nd - 3 * ng / 2, ng / 2),
        (Refresh::Fine, Ordering::Greater, Op::Store) => (nd - ng, ng),

        (Refresh::Coarse, Ordering::Equal, Op::Load) if ghost => (0, nd),
        (Refresh::Coarse, Ordering::Equal, Op::Load) => (ng, nd - 2 * ng),
        (Refresh::Coarse, Ordering::Equal, Op::Store) if ghost => (ng / 2 + co, nd / 2),
        (Refresh::Coarse, Ordering::Equal, Op::Store) => (ng + co, (nd - 2 * ng) / 2),
        (Refresh::Coarse, Ordering::Less, Op::Load) => (ng, 2 * ng),
        (Refresh::Coarse, Ordering::Less, Op::Store) => (0, ng),
        (Refresh::Coarse, Ordering::Greater, Op::Load) => (nd - 3 * ng, 2 * ng),
        (Refresh::Coarse, Ordering::Greater, Op::Store) => (nd - ng, ng),
    }
}




/**
 * Describes one exchange of field data between two blocks: which face,
 * which octant, which fields, and how the levels relate. A descriptor is
 * built for one exchange and dropped when it completes. When created with
 * `tracked`, the descriptor counts itself against a metrics collector for
 * as long as it lives.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldFace {
    face: [i32; 3],
    ghost: [bool; 3],
    child: [u32; 3],
    refresh: Refresh,
    accumulate: bool,
    field_list_src: Vec<FieldId>,
    field_list_dst: Vec<FieldId>,
    restrict: Restrict,
    prolong: Prolong,
    #[serde(skip)]
    live: Option<Live>,
}




// ============================================================================
impl FieldFace {


    pub fn new(refresh: Refresh) -> Self {
        Self {
            face: [0, 0, 0],
            ghost: [false, false, false],
            child: [0, 0, 0],
            refresh,
            accumulate: false,
            field_list_src: Vec::new(),
            field_list_dst: Vec::new(),
            restrict: Restrict::default(),
            prolong: Prolong::default(),
            live: None,
        }
    }

    pub fn with_face(mut self, face: [i32; 3]) -> Self {
        assert!(face.iter().all(|f| (-1..=1).contains(f)), "face components must be -1, 0, or 1");
        self.face = face;
        self
    }

    pub fn with_ghost(mut self, ghost: [bool; 3]) -> Self {
        self.ghost = ghost;
        self
    }

    pub fn with_child(mut self, child: [u32; 3]) -> Self {
        assert!(child.iter().all(|&c| c < 2), "child octant components must be 0 or 1");
        self.child = child;
        self
    }

    pub fn with_accumulate(mut self, accumulate: bool) -> Self {
        self.accumulate = accumulate;
        self
    }

    /// Transfer the same fields on both sides.
    pub fn with_fields(mut self, fields: Vec<FieldId>) -> Self {
        self.field_list_dst = fields.clone();
        self.field_list_src = fields;
        self
    }

    /// Transfer field `src[i]` of the sender into field `dst[i]` of the
    /// receiver.
    pub fn with_field_map(mut self, src: Vec<FieldId>, dst: Vec<FieldId>) -> Self {
        assert_eq!(src.len(), dst.len(), "source and destination field lists differ in length");
        self.field_list_src = src;
        self.field_list_dst = dst;
        self
    }

    pub fn with_restrict(mut self, restrict: Restrict) -> Self {
        self.restrict = restrict;
        self
    }

    pub fn with_prolong(mut self, prolong: Prolong) -> Self {
        self.prolong = prolong;
        self
    }

    pub fn tracked(mut self, metrics: &Arc<Metrics>) -> Self {
        self.live = Some(Live::new(metrics));
        self
    }

    pub fn face(&self) -> [i32; 3] {
        self.face
    }

    pub fn ghost(&self) -> [bool; 3] {
        self.ghost
    }

    pub fn child(&self) -> [u32; 3] {
        self.child
    }

    pub fn refresh(&self) -> Refresh {
        self.refresh
    }

    pub fn accumulate(&self) -> bool {
        self.accumulate
    }

    pub fn field_list_src(&self) -> &[FieldId] {
        &self.field_list_src
    }

    pub fn field_list_dst(&self) -> &[FieldId] {
        &self.field_list_dst
    }

    /// Mirror the face around the block centre, turning a sender's
    /// descriptor into the receiver's.
    pub fn invert_face(&mut self) {
        self.face = [-self.face[0], -self.face[1], -self.face[2]];
    }

    /// Number of bytes this descriptor occupies on the wire.
    pub fn data_size(&self) -> Result<usize> {
        Ok(rmp_serde::encode::to_vec(self)?.len())
    }

    /// The region of `field` this descriptor reads or writes.
    pub fn bounds(&self, op: Op, field: &Field) -> Result<Region> {
        compute_bounds(
            self.face,
            self.ghost,
            self.child,
            self.refresh,
            op,
            self.accumulate,
            field.dims(),
            field.ghost_depth(),
        )
    }


    /**
     * Byte length of the buffer exchanged for `fields` of `block`. The
     * buffer always holds coarse-resolution data, so the load region is
     * measured when prolonging and the store region otherwise. Zero means
     * the field list is empty, which is a caller error.
     */
    pub fn buffer_size(&self, block: &Block, fields: &[FieldId]) -> Result<usize> {
        let op = match self.refresh {
            Refresh::Fine => Op::Load,
            _ => Op::Store,
        };
        let mut size = 0;

        for &id in fields {
            let field = block.field(id)?;
            size += self.bounds(op, field)?.len() * field.precision().size_of();
        }
        if size == 0 {
            return Err(Error::EmptyFieldList);
        }
        Ok(size)
    }


    /**
     * Serialize the source fields of `block` into a flat buffer, restricting
     * them first when sending to a coarser block.
     */
    pub fn pack(&self, block: &Block) -> Result<Vec<u8>> {
        let expected = self.buffer_size(block, &self.field_list_src)?;
        let mut array = Vec::with_capacity(expected);

        for &id in &self.field_list_src {
            let field = block.field(id)?;
            let region = self.bounds(Op::Load, field)?;
            let dims = field.dims();

            match field.values() {
                Values::Single(v) => self.load(v, dims, region, &mut array),
                Values::Double(v) => self.load(v, dims, region, &mut array),
            }
        }
        if array.len() != expected {
            return Err(Error::SizeMismatch { expected, actual: array.len() });
        }
        if let Some(live) = &self.live {
            live.metrics().record(MetricEvent::Packed(array.len()))
        }
        Ok(array)
    }


    /**
     * Write a buffer produced by `pack` into the destination fields of
     * `block`, prolonging it when receiving from a coarser block. The
     * buffer length must match `buffer_size` exactly.
     */
    pub fn unpack(&self, array: &[u8], block: &mut Block) -> Result<()> {
        if self.refresh == Refresh::Fine {
            for &id in &self.field_list_dst {
                check_even_ghosts(block.field(id)?)?;
            }
        }
        let expected = self.buffer_size(block, &self.field_list_dst)?;

        if array.len() != expected {
            return Err(Error::SizeMismatch { expected, actual: array.len() });
        }
        let mut cursor = 0;

        for &id in &self.field_list_dst {
            let field = block.field_mut(id)?;
            let region = self.bounds(Op::Store, field)?;
            let dims = field.dims();

            cursor += match field.values_mut() {
                Values::Single(v) => self.store(v, dims, region, &array[cursor..])?,
                Values::Double(v) => self.store(v, dims, region, &array[cursor..])?,
            };
        }
        Ok(())
    }


    /**
     * Move data from `src` into `dst` without an intermediate buffer. The
     * source region is computed with this descriptor's face and the
     * destination region with the face inverted, so data crosses the shared
     * face.
     */
    pub fn transfer_direct(&self, src: &Block, dst: &mut Block) -> Result<()> {
        let mut inverted = self.clone();
        inverted.invert_face();

        for (&is, &id) in self.field_list_src.iter().zip(&self.field_list_dst) {
            let fs = src.field(is)?;

            if self.refresh == Refresh::Fine {
                check_even_ghosts(fs)?;
            }
            let rs = self.bounds(Op::Load, fs)?;
            let fd = dst.field_mut(id)?;
            let rd = inverted.bounds(Op::Store, fd)?;
            let (ds, dd) = (fs.dims(), fd.dims());

            if fs.precision() != fd.precision() {
                return Err(Error::UnsupportedPrecision(format!(
                    "transfer from {:?} field {} into {:?} field {}",
                    fs.precision(), fs.name(), fd.precision(), fd.name()
                )));
            }
            match (fs.values(), fd.values_mut()) {
                (Values::Single(s), Values::Single(d)) => self.copy(d, dd, rd, s, ds, rs)?,
                (Values::Double(s), Values::Double(d)) => self.copy(d, dd, rd, s, ds, rs)?,
                _ => unreachable!(),
            }
        }
        Ok(())
    }

    fn load<T: Scalar>(&self, values: &[T], dims: [usize; 3], region: Region, array: &mut Vec<u8>) {
        if self.refresh == Refresh::Coarse {
            let nc = coarse_count(region.count());
            let mut coarse = vec![T::default(); nc.iter().product()];
            self.restrict.apply(&mut coarse, nc, Region::whole(nc), values, dims, region);
            coarse.into_iter().for_each(|x| x.write_le(array))
        } else {
            region.iter_offsets(dims).for_each(|n| values[n].write_le(array))
        }
    }

    fn store<T: Scalar>(&self, values: &mut [T], dims: [usize; 3], region: Region, array: &[u8]) -> Result<usize> {
        let count = match self.refresh {
            Refresh::Fine => coarse_count(region.count()),
            _ => region.count(),
        };
        let needed = count.iter().product::<usize>() * T::BYTES;

        if array.len() < needed {
            return Err(Error::SizeMismatch { expected: needed, actual: array.len() });
        }
        let mut data = array[..needed].chunks_exact(T::BYTES).map(T::read_le);

        if self.refresh == Refresh::Fine {
            let coarse: Vec<T> = data.collect();
            self.prolong.apply(values, dims, region, &coarse, count, Region::whole(count), false);
        } else {
            for (n, x) in region.iter_offsets(dims).zip(&mut data) {
                if self.accumulate {
                    values[n] += x
                } else {
                    values[n] = x
                }
            }
        }
        Ok(needed)
    }

    fn copy<T: Scalar>(
        &self,
        dst: &mut [T],
        dst_dims: [usize; 3],
        dst_region: Region,
        src: &[T],
        src_dims: [usize; 3],
        src_region: Region,
    ) -> Result<()> {
        let consistent = match self.refresh {
            Refresh::Same => src_region.count() == dst_region.count(),
            Refresh::Coarse => coarse_count(src_region.count()) == dst_region.count(),
            Refresh::Fine => src_region.count() == coarse_count(dst_region.count()),
        };
        if !consistent {
            return Err(Error::SizeMismatch {
                expected: src_region.len(),
                actual: dst_region.len(),
            });
        }

        match self.refresh {
            Refresh::Fine => {
                self.prolong.apply(dst, dst_dims, dst_region, src, src_dims, src_region, false)
            }
            Refresh::Coarse => {
                self.restrict.apply(dst, dst_dims, dst_region, src, src_dims, src_region)
            }
            Refresh::Same => {
                for (d, s) in dst_region.iter_offsets(dst_dims).zip(src_region.iter_offsets(src_dims)) {
                    if self.accumulate {
                        dst[d] += src[s]
                    } else {
                        dst[d] = src[s]
                    }
                }
            }
        }
        Ok(())
    }
}

impl PartialEq for FieldFace {
    fn eq(&self, other: &Self) -> bool {
        self.face == other.face
            && self.ghost == other.ghost
            && self.child == other.child
            && self.refresh == other.refresh
            && self.accumulate == other.accumulate
            && self.field_list_src == other.field_list_src
            && self.field_list_dst == other.field_list_dst
    }
}

fn check_even_ghosts(field: &Field) -> Result<()> {
    let ng = field.ghost_depth();

    if ng.iter().any(|g| g % 2 == 1) {
        Err(Error::OddGhostProlong(ng))
    } else {
        Ok(())
    }
}




/**
 * Wire payload of a transfer between levels: the octant of the child block
 * that sent (restriction) or receives (prolongation) the data, and the
 * buffer produced by `FieldFace::pack`.
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeMessage {
    octant: [u8; 3],
    payload: Vec<u8>,
}




// ============================================================================
impl ExchangeMessage {


    /// Components too large for the wire saturate, so they stay invalid
    /// rather than wrapping onto a real octant.
    pub fn new(octant: [u32; 3], payload: Vec<u8>) -> Self {
        let bits = |c: u32| u8::try_from(c).unwrap_or(u8::MAX);
        Self {
            octant: [bits(octant[0]), bits(octant[1]), bits(octant[2])],
            payload,
        }
    }

    pub fn octant(&self) -> [u32; 3] {
        [self.octant[0] as u32, self.octant[1] as u32, self.octant[2] as u32]
    }

    pub fn octant_bits(&self) -> [u8; 3] {
        self.octant
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::encode::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::decode::from_slice(bytes)?)
    }
}
