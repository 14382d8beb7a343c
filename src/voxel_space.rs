// 3D dense scalar grid (Hounsfield values, or density in tests) plus its
// world-space geometry.

use crate::coordinate::Coordinate;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoxelSpace {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub delta_x: f64,
    pub delta_y: f64,
    pub delta_z: f64,
    /// Center of voxel (0, 0, 0), the "corner" voxel.
    pub pos: Coordinate,
    data: Vec<f64>,
}

impl VoxelSpace {
    pub fn new(
        nx: usize,
        ny: usize,
        nz: usize,
        delta_x: f64,
        delta_y: f64,
        delta_z: f64,
        pos: Coordinate,
    ) -> Result<Self> {
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(Error::InvalidArgument(
                "voxel space shape must be strictly positive".to_string(),
            ));
        }
        if delta_x <= 0.0 || delta_y <= 0.0 || delta_z <= 0.0 {
            return Err(Error::InvalidArgument(
                "voxel spacing must be strictly positive".to_string(),
            ));
        }
        if !pos.is_finite() {
            return Err(Error::InvalidArgument(
                "voxel space origin must be finite".to_string(),
            ));
        }
        Ok(VoxelSpace {
            nx,
            ny,
            nz,
            delta_x,
            delta_y,
            delta_z,
            pos,
            data: vec![0.0; nx * ny * nz],
        })
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `flat = nx*ny*k + nx*j + i` — the only index mapping the `Ray`
    /// contract relies on.
    pub fn flat_index(&self, i: usize, j: usize, k: usize) -> usize {
        self.nx * self.ny * k + self.nx * j + i
    }

    fn check_bounds(&self, i: i64, j: i64, k: i64) -> Result<()> {
        if i < 0
            || j < 0
            || k < 0
            || i as usize >= self.nx
            || j as usize >= self.ny
            || k as usize >= self.nz
        {
            return Err(Error::OutOfRange {
                i,
                j,
                k,
                nx: self.nx,
                ny: self.ny,
                nz: self.nz,
            });
        }
        Ok(())
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Result<f64> {
        self.check_bounds(i as i64, j as i64, k as i64)?;
        Ok(self.data[self.flat_index(i, j, k)])
    }

    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) -> Result<()> {
        self.check_bounds(i as i64, j as i64, k as i64)?;
        let idx = self.flat_index(i, j, k);
        self.data[idx] = value;
        Ok(())
    }

    /// Unchecked flat-index read used by the Siddon hot loop in `Ray`, which
    /// has already proven the index is in bounds via the traversal
    /// invariant before calling this.
    pub fn get_flat_unchecked(&self, flat: usize) -> f64 {
        self.data[flat]
    }

    pub fn get_flat(&self, flat: usize) -> Result<f64> {
        if flat >= self.data.len() {
            return Err(Error::OutOfRange {
                i: -1,
                j: -1,
                k: -1,
                nx: self.nx,
                ny: self.ny,
                nz: self.nz,
            });
        }
        Ok(self.data[flat])
    }

    pub fn set_flat(&mut self, flat: usize, value: f64) -> Result<()> {
        if flat >= self.data.len() {
            return Err(Error::OutOfRange {
                i: -1,
                j: -1,
                k: -1,
                nx: self.nx,
                ny: self.ny,
                nz: self.nz,
            });
        }
        self.data[flat] = value;
        Ok(())
    }
}

impl PartialEq for VoxelSpace {
    fn eq(&self, other: &Self) -> bool {
        self.nx == other.nx
            && self.ny == other.ny
            && self.nz == other.nz
            && self.delta_x == other.delta_x
            && self.delta_y == other.delta_y
            && self.delta_z == other.delta_z
            && self.pos == other.pos
            && self.data == other.data
    }
}

// Hashing uses geometry only — the scalar array can be large and contents
// aren't part of the identity we need a hash for.
impl Hash for VoxelSpace {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nx.hash(state);
        self.ny.hash(state);
        self.nz.hash(state);
        self.delta_x.to_bits().hash(state);
        self.delta_y.to_bits().hash(state);
        self.delta_z.to_bits().hash(state);
        self.pos.x.to_bits().hash(state);
        self.pos.y.to_bits().hash(state);
        self.pos.z.to_bits().hash(state);
    }
}
