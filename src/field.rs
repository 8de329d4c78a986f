use core::ops::{Add, AddAssign, Div, Mul, Sub};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index_space::Region;

/// Identifies a field within a block's field list.
pub type FieldId = usize;

/// Numeric precision of a field's values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    Single,
    Double,
    Extended,
}

impl Precision {
    /// Number of bytes per value.
    pub fn size_of(&self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
            Precision::Extended => 16,
        }
    }
}

/// Floating point types a field can be stored in. The byte encoding is
/// little-endian so buffers produced on one host decode on any other.
pub trait Scalar:
    Copy
    + Default
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + AddAssign
    + Send
    + Sync
    + 'static
{
    const BYTES: usize;

    fn from_f64(x: f64) -> Self;

    fn to_f64(self) -> f64;

    fn write_le(self, out: &mut Vec<u8>);

    fn read_le(bytes: &[u8]) -> Self;
}

impl Scalar for f32 {
    const BYTES: usize = 4;

    fn from_f64(x: f64) -> Self {
        x as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes())
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut word = [0; 4];
        word.copy_from_slice(&bytes[..4]);
        f32::from_le_bytes(word)
    }
}

impl Scalar for f64 {
    const BYTES: usize = 8;

    fn from_f64(x: f64) -> Self {
        x
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes())
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut word = [0; 8];
        word.copy_from_slice(&bytes[..8]);
        f64::from_le_bytes(word)
    }
}

/// Backing storage of a field, tagged with its precision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Values {
    Single(Vec<f32>),
    Double(Vec<f64>),
}




/**
 * A block's array of values for one field: the interior cells plus a ghost
 * layer on each side of each axis. Axes with zero ghost depth and a single
 * cell are inactive (a 2D problem has an inactive third axis).
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Field {
    name: String,
    dims: [usize; 3],
    ghost: [usize; 3],
    values: Values,
}




// ============================================================================
impl Field {


    /**
     * Allocate a zero-valued field with the given interior size and ghost
     * depth. Extended precision has no native representation here and is
     * rejected.
     */
    pub fn new(name: &str, size: [usize; 3], ghost: [usize; 3], precision: Precision) -> Result<Self> {
        let dims = [
            size[0] + 2 * ghost[0],
            size[1] + 2 * ghost[1],
            size[2] + 2 * ghost[2],
        ];
        let len = dims.iter().product();
        let values = match precision {
            Precision::Single => Values::Single(vec![0.0; len]),
            Precision::Double => Values::Double(vec![0.0; len]),
            Precision::Extended => {
                return Err(Error::UnsupportedPrecision(format!("{:?} for field {}", precision, name)))
            }
        };
        Ok(Self {
            name: name.to_string(),
            dims,
            ghost,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Array dimensions, ghost zones included.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn ghost_depth(&self) -> [usize; 3] {
        self.ghost
    }

    /// Interior dimensions, ghost zones excluded.
    pub fn size(&self) -> [usize; 3] {
        [
            self.dims[0] - 2 * self.ghost[0],
            self.dims[1] - 2 * self.ghost[1],
            self.dims[2] - 2 * self.ghost[2],
        ]
    }

    pub fn precision(&self) -> Precision {
        match self.values {
            Values::Single(_) => Precision::Single,
            Values::Double(_) => Precision::Double,
        }
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Values {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The region of interior cells.
    pub fn interior(&self) -> Region {
        Region::new(self.ghost, self.size())
    }

    pub fn get(&self, offset: usize) -> f64 {
        match &self.values {
            Values::Single(v) => v[offset] as f64,
            Values::Double(v) => v[offset],
        }
    }

    pub fn set(&mut self, offset: usize, x: f64) {
        match &mut self.values {
            Values::Single(v) => v[offset] = x as f32,
            Values::Double(v) => v[offset] = x,
        }
    }

    /// Set every value, ghost zones included.
    pub fn fill(&mut self, x: f64) {
        match &mut self.values {
            Values::Single(v) => v.iter_mut().for_each(|y| *y = x as f32),
            Values::Double(v) => v.iter_mut().for_each(|y| *y = x),
        }
    }

    /// Copy the values out as double precision.
    pub fn to_vec_f64(&self) -> Vec<f64> {
        match &self.values {
            Values::Single(v) => v.iter().map(|&x| x as f64).collect(),
            Values::Double(v) => v.clone(),
        }
    }

    /// Overwrite the values from a double precision buffer of the same
    /// length.
    pub fn assign_f64(&mut self, data: &[f64]) {
        assert_eq!(data.len(), self.len(), "field {} assigned a buffer of the wrong length", self.name);
        match &mut self.values {
            Values::Single(v) => v.iter_mut().zip(data).for_each(|(y, &x)| *y = x as f32),
            Values::Double(v) => v.copy_from_slice(data),
        }
    }

    /// Sum of the interior values.
    pub fn interior_sum(&self) -> f64 {
        let dims = self.dims;
        self.interior().iter_offsets(dims).map(|n| self.get(n)).sum()
    }

    /// Sum of the squared interior values.
    pub fn interior_sum_squares(&self) -> f64 {
        let dims = self.dims;
        self.interior().iter_offsets(dims).map(|n| self.get(n).powi(2)).sum()
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn dimensions_include_ghost_zones() {
        let field = Field::new("x", [8, 8, 1], [2, 2, 0], Precision::Double).unwrap();
        assert_eq!(field.dims(), [12, 12, 1]);
        assert_eq!(field.size(), [8, 8, 1]);
        assert_eq!(field.len(), 144);
        assert_eq!(field.interior().len(), 64);
    }

    #[test]
    fn extended_precision_is_rejected() {
        assert!(matches!(
            Field::new("x", [4, 4, 4], [1, 1, 1], Precision::Extended),
            Err(Error::UnsupportedPrecision(_))
        ));
    }

    #[test]
    fn interior_sum_skips_ghost_zones() {
        let mut field = Field::new("b", [4, 4, 4], [1, 1, 1], Precision::Single).unwrap();
        field.fill(1.0);
        assert_eq!(field.interior_sum(), 64.0);
        assert_eq!(field.interior_sum_squares(), 64.0);
        assert_eq!(field.precision(), Precision::Single);
    }

    #[test]
    fn scalar_byte_encoding_is_little_endian() {
        let mut bytes = Vec::new();
        1.5f64.write_le(&mut bytes);
        (-2.25f32).write_le(&mut bytes);
        assert_eq!(bytes.len(), 12);
        assert_eq!(f64::read_le(&bytes[..8]), 1.5);
        assert_eq!(f32::read_le(&bytes[8..]), -2.25);
    }
}
