use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::{Field, FieldId};
use crate::index::Index;




/**
 * A mesh block: one patch of the refinement hierarchy, owning its field
 * arrays. A block never holds references to its neighbors; parent and child
 * addresses are derived from its index on demand.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    index: Index,
    rank: usize,
    is_leaf: bool,
    cell_width: [f64; 3],
    fields: Vec<Field>,
}




// ============================================================================
impl Block {


    pub fn new(index: Index, rank: usize, is_leaf: bool, cell_width: [f64; 3]) -> Self {
        assert!((1..=3).contains(&rank), "block rank must be 1, 2, or 3");
        Self {
            index,
            rank,
            is_leaf,
            cell_width,
            fields: Vec::new(),
        }
    }


    /**
     * Append a field, returning its identifier. All fields of a block are
     * expected to share dimensions and ghost depth.
     */
    pub fn insert_field(&mut self, field: Field) -> FieldId {
        self.fields.push(field);
        self.fields.len() - 1
    }

    pub fn field(&self, id: FieldId) -> Result<&Field> {
        self.fields.get(id).ok_or(Error::UnknownField(id))
    }

    pub fn field_mut(&mut self, id: FieldId) -> Result<&mut Field> {
        self.fields.get_mut(id).ok_or(Error::UnknownField(id))
    }

    /// Look up a field by name.
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn index(&self) -> Index {
        self.index
    }

    pub fn level(&self) -> u32 {
        self.index.level()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn cell_width(&self) -> [f64; 3] {
        self.cell_width
    }

    /// Number of children of a refined block: `2^rank`.
    pub fn num_children(&self) -> usize {
        1 << self.rank
    }

    pub fn index_parent(&self, min_level: u32) -> Index {
        self.index.index_parent(min_level)
    }

    pub fn index_child(&self, octant: [u32; 3], min_level: u32) -> Result<Index> {
        self.index.index_child(octant, min_level)
    }

    /// Octant this block occupies within its parent.
    pub fn child_octant(&self) -> [u32; 3] {
        self.index.child_octant()
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::field::Precision;

    #[test]
    fn fields_are_found_by_id_and_name() {
        let mut block = Block::new(Index::default(), 3, true, [1.0; 3]);
        let x = block.insert_field(Field::new("x", [4, 4, 4], [1, 1, 1], Precision::Double).unwrap());
        let b = block.insert_field(Field::new("b", [4, 4, 4], [1, 1, 1], Precision::Double).unwrap());
        assert_eq!(block.field_id("b"), Some(b));
        assert_eq!(block.field(x).unwrap().name(), "x");
        assert!(matches!(block.field(7), Err(Error::UnknownField(7))));
    }

    #[test]
    fn children_per_rank() {
        assert_eq!(Block::new(Index::default(), 1, true, [1.0; 3]).num_children(), 2);
        assert_eq!(Block::new(Index::default(), 2, true, [1.0; 3]).num_children(), 4);
        assert_eq!(Block::new(Index::default(), 3, true, [1.0; 3]).num_children(), 8);
    }
}
