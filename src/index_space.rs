use serde::{Deserialize, Serialize};




/**
 * Return the linear offset of a cell in a buffer with the given dimensions.
 * Buffers are laid out with the first axis increasing fastest.
 */
pub fn linear_offset(dims: [usize; 3], index: [usize; 3]) -> usize {
    index[0] + dims[0] * (index[1] + dims[1] * index[2])
}




/**
 * A rectangular sub-array of a 3D buffer: the first cell selected on each
 * axis and the number of cells selected. Regions are what the exchange
 * layer computes from a face descriptor; the buffer dimensions they select
 * from are supplied separately when the region is traversed.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    start: [usize; 3],
    count: [usize; 3],
}




// ============================================================================
impl Region {


    pub fn new(start: [usize; 3], count: [usize; 3]) -> Self {
        Self { start, count }
    }


    /**
     * The region covering an entire buffer of the given dimensions.
     */
    pub fn whole(dims: [usize; 3]) -> Self {
        Self::new([0, 0, 0], dims)
    }


    /**
     * Return the first selected index (inclusive).
     */
    pub fn start(&self) -> [usize; 3] {
        self.start
    }


    /**
     * Return the number of selected indexes on each axis.
     */
    pub fn count(&self) -> [usize; 3] {
        self.count
    }


    /**
     * Return the last selected index (exclusive).
     */
    pub fn end(&self) -> [usize; 3] {
        [
            self.start[0] + self.count[0],
            self.start[1] + self.count[1],
            self.start[2] + self.count[2],
        ]
    }


    /**
     * Return the number of cells in this region.
     */
    pub fn len(&self) -> usize {
        self.count.iter().product()
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Determine whether this region lies inside a buffer of the given
     * dimensions.
     */
    pub fn fits_in(&self, dims: [usize; 3]) -> bool {
        self.end().iter().zip(&dims).all(|(e, d)| e <= d)
    }


    /**
     * Return the linear offset in a buffer with dimensions `dims` of the
     * cell at `local`, measured from the start of this region.
     */
    pub fn offset_of(&self, dims: [usize; 3], local: [usize; 3]) -> usize {
        linear_offset(dims, [
            self.start[0] + local[0],
            self.start[1] + local[1],
            self.start[2] + local[2],
        ])
    }


    /**
     * Return an iterator over the local indexes of this region, first axis
     * fastest.
     */
    pub fn iter(&self) -> impl Iterator<Item = [usize; 3]> {
        let [nx, ny, nz] = self.count;
        (0..nz).flat_map(move |k| (0..ny).flat_map(move |j| (0..nx).map(move |i| [i, j, k])))
    }


    /**
     * Return an iterator over the linear offsets, in a buffer with the given
     * dimensions, of the cells in this region. Offsets are visited in the
     * same order as `iter`.
     */
    pub fn iter_offsets(&self, dims: [usize; 3]) -> impl Iterator<Item = usize> + '_ {
        assert!(self.fits_in(dims), "region {:?} exceeds buffer {:?}", self, dims);
        self.iter().map(move |local| self.offset_of(dims, local))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn traversal_visits_every_cell_once() {
        let region = Region::new([2, 3, 1], [4, 2, 3]);
        let offsets: Vec<_> = region.iter_offsets([10, 10, 10]).collect();
        assert_eq!(offsets.len(), 24);

        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 24);
    }

    #[test]
    fn traversal_is_first_axis_fastest() {
        let region = Region::new([1, 1, 1], [2, 2, 1]);
        let offsets: Vec<_> = region.iter_offsets([4, 4, 4]).collect();
        assert_eq!(offsets, vec![21, 22, 25, 26]);
    }

    #[test]
    fn whole_region_fits_and_larger_does_not() {
        assert!(Region::whole([8, 8, 1]).fits_in([8, 8, 1]));
        assert!(!Region::new([1, 0, 0], [8, 8, 1]).fits_in([8, 8, 1]));
        assert_eq!(Region::whole([3, 4, 5]).len(), 60);
    }
}
