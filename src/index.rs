use core::fmt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of bits per axis word used for the root-array coordinate.
pub const ARRAY_BITS: u32 = 10;

/// Exclusive upper bound on a root-array coordinate.
pub const MAX_ARRAY_INDEX: u32 = 1 << ARRAY_BITS;

/// Number of bits per axis word used for the tree path; this is also the
/// deepest refinement level an index can address.
pub const TREE_BITS: u32 = 20;

/// Number of bits per axis word holding one part of the level counter.
pub const LEVEL_AXIS_BITS: u32 = 2;

/// Range of values held by one part of the level counter.
pub const LEVEL_AXIS_RANGE: u32 = 1 << LEVEL_AXIS_BITS;

/// Deepest level an index can address.
pub const MAX_LEVEL: u32 = TREE_BITS;

const TREE_SHIFT: u32 = ARRAY_BITS;
const LEVEL_SHIFT: u32 = ARRAY_BITS + TREE_BITS;
const ARRAY_MASK: u32 = (1 << ARRAY_BITS) - 1;
const TREE_MASK: u32 = ((1 << TREE_BITS) - 1) << TREE_SHIFT;
const LEVEL_MASK: u32 = (LEVEL_AXIS_RANGE - 1) << LEVEL_SHIFT;




/**
 * Address of a block in a forest of octrees. Each axis owns one 32-bit word
 * laid out (least significant bit first) as
 *
 * ```text
 * [AAAAAAAAAA TTTTTTTTTTTTTTTTTTTT LL]
 *   array      tree path           level part
 * ```
 *
 * The array part is the coordinate of the root block, the tree part holds
 * one branch decision per refinement level (bit `L - 1` records the branch
 * taken from level `L - 1` to level `L`), and the level counter is spread
 * two bits at a time across the three words. Tree bits above the current
 * level are always zero; every operation that changes the level cleans them.
 *
 * Equality and hashing use the raw words, so two indexes are equal exactly
 * when they address the same block.
 */
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Index {
    words: [u32; 3],
}




// ============================================================================
impl Index {


    /**
     * Create the index of a root block at the given array coordinate.
     */
    pub fn new(ix: u32, iy: u32, iz: u32) -> Result<Self> {
        let mut index = Self::default();
        index.set_array(ix, iy, iz)?;
        Ok(index)
    }


    /**
     * Reconstruct an index from its raw encoded words.
     */
    pub fn from_values(words: [u32; 3]) -> Self {
        Self { words }
    }


    /**
     * Return the raw encoded words.
     */
    pub fn values(&self) -> [u32; 3] {
        self.words
    }


    /**
     * Return the root-array coordinate on the given axis.
     */
    pub fn array(&self, axis: usize) -> u32 {
        self.words[axis] & ARRAY_MASK
    }


    /**
     * Return the tree path bits on the given axis.
     */
    pub fn tree(&self, axis: usize) -> u32 {
        (self.words[axis] & TREE_MASK) >> TREE_SHIFT
    }


    /**
     * Return the refinement level, decoded from the three level parts.
     */
    pub fn level(&self) -> u32 {
        let part = |axis: usize| (self.words[axis] & LEVEL_MASK) >> LEVEL_SHIFT;
        part(0) + LEVEL_AXIS_RANGE * (part(1) + LEVEL_AXIS_RANGE * part(2))
    }


    /**
     * Set the root-array coordinate. A coordinate outside the addressable
     * range is reported and the index is left unchanged; with the
     * `strict-bounds` feature the violation is fatal.
     */
    pub fn set_array(&mut self, ix: u32, iy: u32, iz: u32) -> Result<()> {
        if ix >= MAX_ARRAY_INDEX || iy >= MAX_ARRAY_INDEX || iz >= MAX_ARRAY_INDEX {
            let error = Error::IndexOutOfRange(ix, iy, iz, MAX_ARRAY_INDEX);

            if cfg!(feature = "strict-bounds") {
                panic!("{}", error);
            }
            log::warn!("{}", error);
            return Err(error);
        }
        for (word, a) in self.words.iter_mut().zip([ix, iy, iz]) {
            *word = (*word & !ARRAY_MASK) | a;
        }
        Ok(())
    }


    /**
     * Set the level counter. Tree bits are not touched; call `clean` when
     * the level decreases.
     */
    pub fn set_level(&mut self, level: u32) -> Result<()> {
        if level > MAX_LEVEL {
            return Err(Error::LevelOutOfRange(level, MAX_LEVEL));
        }
        for (axis, word) in self.words.iter_mut().enumerate() {
            let part = (level >> (axis as u32 * LEVEL_AXIS_BITS)) & (LEVEL_AXIS_RANGE - 1);
            *word = (*word & !LEVEL_MASK) | (part << LEVEL_SHIFT);
        }
        Ok(())
    }


    /**
     * Record the branch decision taken to reach `level` from its parent:
     * 0 selects the lower half and 1 the upper half of each axis.
     */
    pub fn set_tree_bit(&mut self, level: u32, child: [u32; 3]) -> Result<()> {
        if level == 0 || level > MAX_LEVEL {
            return Err(Error::LevelOutOfRange(level, MAX_LEVEL));
        }
        let bit = 1 << (TREE_SHIFT + level - 1);

        for (word, c) in self.words.iter_mut().zip(child) {
            *word &= !bit;
            if c & 1 == 1 {
                *word |= bit;
            }
        }
        Ok(())
    }


    /**
     * Return the branch decision recorded for `level`. Level zero has no
     * parent, so its branch is always the zero octant.
     */
    pub fn child_bits(&self, level: u32) -> [u32; 3] {
        if level == 0 || level > MAX_LEVEL {
            return [0, 0, 0];
        }
        let shift = level - 1;
        [
            (self.tree(0) >> shift) & 1,
            (self.tree(1) >> shift) & 1,
            (self.tree(2) >> shift) & 1,
        ]
    }


    /**
     * Return the octant this block occupies within its parent.
     */
    pub fn child_octant(&self) -> [u32; 3] {
        self.child_bits(self.level())
    }


    /**
     * Zero the tree bits of all levels deeper than the current one.
     */
    pub fn clean(&mut self) {
        let keep = ((1u32 << self.level()) - 1) << TREE_SHIFT;

        for word in &mut self.words {
            *word &= !TREE_MASK | keep;
        }
    }


    /**
     * Return the index of the parent block. The level is clamped at
     * `min_level`: asking for the parent of a block at or above that level
     * returns the block itself.
     */
    pub fn index_parent(&self, min_level: u32) -> Self {
        let level = self.level();

        if level <= min_level || level == 0 {
            return *self;
        }
        let mut parent = *self;
        parent.words.iter_mut().for_each(|w| *w &= !(1 << (TREE_SHIFT + level - 1)));
        parent.write_level(level - 1);
        parent
    }


    /**
     * Return the index of the child block in the given octant.
     */
    pub fn index_child(&self, child: [u32; 3], min_level: u32) -> Result<Self> {
        let level = self.level();
        debug_assert!(level >= min_level, "index_child called below min_level");

        let mut index = *self;
        index.set_level(level + 1)?;
        index.set_tree_bit(level + 1, child)?;
        Ok(index)
    }


    /**
     * Whether the array coordinate and the tree path are both zero; at a
     * given level this identifies the first block.
     */
    pub fn is_zero(&self) -> bool {
        self.words.iter().all(|w| w & (ARRAY_MASK | TREE_MASK) == 0)
    }


    /**
     * Whether this is a root block (level zero).
     */
    pub fn is_root(&self) -> bool {
        self.level() == 0
    }

    fn write_level(&mut self, level: u32) {
        // Levels passed here are always in range.
        let _ = self.set_level(level);
        self.clean();
    }
}




// ============================================================================
impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "L [ {} ] T [ {:x} {:x} {:x} ] A [ {} {} {} ]",
            self.level(),
            self.tree(0),
            self.tree(1),
            self.tree(2),
            self.array(0),
            self.array(1),
            self.array(2)
        )
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Index({:08x} {:08x} {:08x})", self.words[0], self.words[1], self.words[2])
    }
}




/**
 * Iterate over the child octants of a block in a space of the given rank,
 * lowest octant first. Axes beyond the rank always take branch 0.
 */
pub fn octants(rank: usize) -> impl Iterator<Item = [u32; 3]> {
    let nz = if rank > 2 { 2 } else { 1 };
    let ny = if rank > 1 { 2 } else { 1 };
    let nx = 2;
    (0..nz).flat_map(move |k| (0..ny).flat_map(move |j| (0..nx).map(move |i| [i, j, k])))
}
