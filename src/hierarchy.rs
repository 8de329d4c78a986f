use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::{Error, Result};
use crate::field::{Field, FieldId, Precision};
use crate::index::{octants, Index};

/// Shape of the mesh: a rectangular array of root blocks covering
/// `[0, domain)` on each axis, every block holding `block_size` interior
/// cells and `ghost_depth` ghost cells on each side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    pub root_blocks: [u32; 3],
    pub block_size: [usize; 3],
    pub ghost_depth: [usize; 3],
    pub domain: [f64; 3],
    pub precision: Precision,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            root_blocks: [1, 1, 1],
            block_size: [8, 8, 8],
            ghost_depth: [2, 2, 2],
            domain: [1.0, 1.0, 1.0],
            precision: Precision::Double,
        }
    }
}

/// Identifiers of the four fields every solver block carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverFields {
    /// Solution.
    pub x: FieldId,
    /// Right-hand side.
    pub b: FieldId,
    /// Residual.
    pub r: FieldId,
    /// Correction prolonged from the parent.
    pub c: FieldId,
}




/**
 * A fully refined tree of blocks: every root block is refined uniformly,
 * and every level from `min_level` to `max_level` is present. Blocks on
 * `max_level` are the leaves.
 */
pub struct Hierarchy {
    mesh: MeshConfig,
    rank: usize,
    min_level: u32,
    max_level: u32,
    fields: SolverFields,
    blocks: Vec<Block>,
}




// ============================================================================
impl Hierarchy {


    pub fn build(mesh: MeshConfig, rank: usize, min_level: u32, max_level: u32) -> Result<Self> {
        if !(1..=3).contains(&rank) {
            return Err(Error::InvalidConfig(format!("rank must be 1, 2, or 3 (got {})", rank)));
        }
        for a in rank..3 {
            if mesh.root_blocks[a] != 1 || mesh.block_size[a] != 1 || mesh.ghost_depth[a] != 0 {
                return Err(Error::InvalidConfig(format!(
                    "axis {} is inactive at rank {}: it needs one root block of one cell and no ghosts",
                    a, rank
                )));
            }
        }
        if min_level > max_level {
            return Err(Error::InvalidConfig(format!("min_level {} exceeds max_level {}", min_level, max_level)));
        }
        let mut indexes = Vec::new();

        for k in 0..mesh.root_blocks[2] {
            for j in 0..mesh.root_blocks[1] {
                for i in 0..mesh.root_blocks[0] {
                    indexes.push(Index::new(i, j, k)?);
                }
            }
        }
        let mut blocks = Vec::new();
        let mut fields = None;

        for level in 0..=max_level {
            if level >= min_level {
                for &index in &indexes {
                    let mut block = Block::new(index, rank, level == max_level, Self::cell_width_of(&mesh, level));
                    fields = Some(Self::insert_fields(&mesh, &mut block)?);
                    blocks.push(block);
                }
            }
            if level < max_level {
                let mut next = Vec::with_capacity(indexes.len() << rank);
                for index in &indexes {
                    for octant in octants(rank) {
                        next.push(index.index_child(octant, 0)?);
                    }
                }
                indexes = next;
            }
        }
        let fields = fields.ok_or_else(|| Error::InvalidConfig("mesh has no root blocks".into()))?;

        Ok(Self {
            mesh,
            rank,
            min_level,
            max_level,
            fields,
            blocks,
        })
    }

    fn cell_width_of(mesh: &MeshConfig, level: u32) -> [f64; 3] {
        let scale = (1u64 << level) as f64;
        let mut dx = [1.0; 3];

        for a in 0..3 {
            dx[a] = mesh.domain[a] / (mesh.root_blocks[a] as f64 * mesh.block_size[a] as f64 * scale);
        }
        dx
    }

    fn insert_fields(mesh: &MeshConfig, block: &mut Block) -> Result<SolverFields> {
        let mut field = |name: &str| -> Result<FieldId> {
            Ok(block.insert_field(Field::new(name, mesh.block_size, mesh.ghost_depth, mesh.precision)?))
        };
        Ok(SolverFields {
            x: field("x")?,
            b: field("b")?,
            r: field("r")?,
            c: field("c")?,
        })
    }

    pub fn mesh(&self) -> &MeshConfig {
        &self.mesh
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn fields(&self) -> SolverFields {
        self.fields
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.is_leaf())
    }


    /**
     * Return the position of the centre of interior cell `local` of
     * `block`, measured from the domain origin.
     */
    pub fn cell_centre(&self, block: &Block, local: [usize; 3]) -> [f64; 3] {
        let index = block.index();
        let level = index.level();
        let dx = block.cell_width();
        let mut x = [0.0; 3];

        for a in 0..self.rank {
            let tree = index.tree(a);
            let path = (1..=level).fold(index.array(a) as u64, |p, l| 2 * p + ((tree >> (l - 1)) & 1) as u64);
            let cell = path as f64 * self.mesh.block_size[a] as f64 + local[a] as f64 + 0.5;
            x[a] = cell * dx[a];
        }
        x
    }


    /**
     * Set the right-hand side of every leaf block from a function of
     * position.
     */
    pub fn set_rhs<F: Fn([f64; 3]) -> f64>(&mut self, f: F) -> Result<()> {
        let b = self.fields.b;

        for n in 0..self.blocks.len() {
            if !self.blocks[n].is_leaf() {
                continue;
            }
            let field = self.blocks[n].field(b)?;
            let (interior, dims) = (field.interior(), field.dims());
            let values: Vec<_> = interior
                .iter()
                .map(|local| (interior.offset_of(dims, local), f(self.cell_centre(&self.blocks[n], local))))
                .collect();
            let field = self.blocks[n].field_mut(b)?;

            for (offset, value) in values {
                field.set(offset, value)
            }
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn full_tree_has_every_level() {
        let hierarchy = Hierarchy::build(MeshConfig::default(), 3, 0, 2).unwrap();
        assert_eq!(hierarchy.blocks().len(), 1 + 8 + 64);
        assert_eq!(hierarchy.leaves().count(), 64);
        assert!(hierarchy.leaves().all(|b| b.level() == 2));
        assert_eq!(hierarchy.blocks()[0].cell_width(), [0.125; 3]);
        assert_eq!(hierarchy.blocks()[1].cell_width(), [0.0625; 3]);
    }

    #[test]
    fn levels_below_min_level_are_skipped() {
        let mesh = MeshConfig {
            block_size: [4, 4, 1],
            ghost_depth: [2, 2, 0],
            ..Default::default()
        };
        let hierarchy = Hierarchy::build(mesh, 2, 1, 2).unwrap();
        assert_eq!(hierarchy.blocks().len(), 4 + 16);
        assert!(hierarchy.blocks().iter().all(|b| b.level() >= 1));
    }

    #[test]
    fn inactive_axes_must_be_flat() {
        assert!(matches!(
            Hierarchy::build(MeshConfig::default(), 2, 0, 1),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn leaf_cell_centres_tile_the_domain() {
        let mesh = MeshConfig {
            root_blocks: [2, 1, 1],
            block_size: [4, 1, 1],
            ghost_depth: [2, 0, 0],
            domain: [1.0, 1.0, 1.0],
            precision: Precision::Double,
        };
        let hierarchy = Hierarchy::build(mesh, 1, 0, 1).unwrap();
        let h = &hierarchy;
        let mut centres: Vec<f64> = h
            .leaves()
            .flat_map(|b| (0..4).map(move |i| h.cell_centre(b, [i, 0, 0])[0]))
            .collect();
        centres.sort_by(|a, b| a.partial_cmp(b).unwrap());

        for (n, x) in centres.iter().enumerate() {
            assert!((x - (n as f64 + 0.5) / 16.0).abs() < 1e-12);
        }
    }

    #[test]
    fn right_hand_side_is_set_on_leaves_only() {
        let mut hierarchy = Hierarchy::build(MeshConfig::default(), 3, 0, 1).unwrap();
        hierarchy.set_rhs(|_| 1.0).unwrap();
        let b = hierarchy.fields().b;
        for block in hierarchy.blocks() {
            let expected = if block.is_leaf() { 512.0 } else { 0.0 };
            assert_eq!(block.field(b).unwrap().interior_sum(), expected);
        }
    }
}
