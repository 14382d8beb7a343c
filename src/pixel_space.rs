// 2D dense scalar grid plus plane geometry (pos + 6 direction cosines).
// Generic over storage: `PixelSpace<f64>` is the float accumulation buffer
// `create_drr` writes into; `PixelSpace<i32>` is the final 12-bit DRR.

use crate::coordinate::Coordinate;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelSpace<T> {
    pub columns: usize,
    pub rows: usize,
    pub delta_col: f64,
    pub delta_row: f64,
    /// Center of pixel (0, 0).
    pub pos: Coordinate,
    /// `[cx1, cy1, cz1, cx2, cy2, cz2]`: column direction, then row direction.
    pub cosines: [f64; 6],
    data: Vec<T>,
}

impl<T: Copy + Default> PixelSpace<T> {
    pub fn create(
        columns: usize,
        rows: usize,
        delta_col: f64,
        delta_row: f64,
        pos: Coordinate,
        cosines: &[f64],
    ) -> Result<Self> {
        if cosines.len() != 6 {
            return Err(Error::InvalidArgument(format!(
                "cosines must have exactly 6 entries, got {}",
                cosines.len()
            )));
        }
        if columns == 0 || rows == 0 {
            return Err(Error::InvalidArgument(
                "pixel space shape must be strictly positive".to_string(),
            ));
        }
        if delta_col <= 0.0 || delta_row <= 0.0 {
            return Err(Error::InvalidArgument(
                "pixel spacing must be strictly positive".to_string(),
            ));
        }
        let mut c = [0.0; 6];
        c.copy_from_slice(cosines);
        Ok(PixelSpace {
            columns,
            rows,
            delta_col,
            delta_row,
            pos,
            cosines: c,
            data: vec![T::default(); columns * rows],
        })
    }

    /// Derives `pos`/`cosines` from the beam geometry: a detector centered
    /// on the beam axis at the given gantry angle and source-to-detector
    /// distance.
    #[allow(clippy::too_many_arguments)]
    pub fn setup(
        columns: usize,
        rows: usize,
        delta_col: f64,
        delta_row: f64,
        gantry_angle_deg: f64,
        sdd: f64,
        isocenter: Coordinate,
    ) -> Result<Self> {
        if sdd <= 0.0 {
            return Err(Error::InvalidArgument(
                "source-to-detector distance must be strictly positive".to_string(),
            ));
        }
        let theta = gantry_angle_deg.to_radians();
        let (sin_t, cos_t) = (theta.sin(), theta.cos());

        let cosines = [cos_t, sin_t, 0.0, 0.0, 0.0, -1.0];

        // Note: the odd branch is an integer (floor) division, not a real
        // one — it is what keeps both branches centered on (n-1)/2.
        let row_offset = if rows % 2 == 1 {
            delta_row * (rows / 2) as f64
        } else {
            delta_row * (rows as f64 / 2.0 - 0.5)
        };
        let col_offset = if columns % 2 == 1 {
            delta_col * (columns / 2) as f64
        } else {
            delta_col * (columns as f64 / 2.0 - 0.5)
        };

        let img_offset_x = -0.5 * sdd * sin_t;
        let img_offset_y = 0.5 * sdd * cos_t;

        let pos = Coordinate::new(
            isocenter.x - cos_t * col_offset + img_offset_x,
            isocenter.y - sin_t * col_offset + img_offset_y,
            isocenter.z + row_offset,
        )
        .rounded(14);

        Self::create(columns, rows, delta_col, delta_row, pos, &cosines)
    }

    /// Builds a `PixelSpace` from already-computed row-major data, reusing
    /// `self`'s geometry. Used by `BeamGeometry::create_drr` to hand back
    /// the float accumulation buffer and the scaled integer result without
    /// a redundant fill-then-overwrite pass.
    pub(crate) fn with_data<U: Copy + Default>(&self, data: Vec<U>) -> PixelSpace<U> {
        debug_assert_eq!(data.len(), self.columns * self.rows);
        PixelSpace {
            columns: self.columns,
            rows: self.rows,
            delta_col: self.delta_col,
            delta_row: self.delta_row,
            pos: self.pos,
            cosines: self.cosines,
            data,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.columns, self.rows)
    }

    fn flat_index(&self, i: usize, j: usize) -> usize {
        self.columns * j + i
    }

    fn check_bounds(&self, i: usize, j: usize) -> Result<()> {
        if i >= self.columns || j >= self.rows {
            return Err(Error::OutOfRange {
                i: i as i64,
                j: j as i64,
                k: 0,
                nx: self.columns,
                ny: self.rows,
                nz: 1,
            });
        }
        Ok(())
    }

    pub fn get(&self, i: usize, j: usize) -> Result<T> {
        self.check_bounds(i, j)?;
        Ok(self.data[self.flat_index(i, j)])
    }

    pub fn set(&mut self, i: usize, j: usize, value: T) -> Result<()> {
        self.check_bounds(i, j)?;
        let idx = self.flat_index(i, j);
        self.data[idx] = value;
        Ok(())
    }

    /// `world(i,j) = pos + i*delta_col*(cx1,cy1,cz1) + j*delta_row*(cx2,cy2,cz2)`.
    pub fn world(&self, i: usize, j: usize) -> Coordinate {
        let col_dir = Coordinate::new(self.cosines[0], self.cosines[1], self.cosines[2]);
        let row_dir = Coordinate::new(self.cosines[3], self.cosines[4], self.cosines[5]);
        self.pos + col_dir * (i as f64 * self.delta_col) + row_dir * (j as f64 * self.delta_row)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity_cosines() -> [f64; 6] {
        [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
    }

    #[test]
    fn create_rejects_malformed_cosines() {
        let err = PixelSpace::<f64>::create(
            4,
            4,
            1.0,
            1.0,
            Coordinate::default(),
            &[1.0, 0.0, 0.0],
        );
        assert!(err.is_err());
    }

    #[test]
    fn world_uses_column_then_row_direction() {
        let ps = PixelSpace::<f64>::create(
            4,
            4,
            2.0,
            3.0,
            Coordinate::new(10.0, 0.0, 0.0),
            &identity_cosines(),
        )
        .unwrap();
        let w = ps.world(2, 1);
        assert_relative_eq!(w.x, 10.0 + 2.0 * 2.0);
        assert_relative_eq!(w.y, 3.0);
        assert_relative_eq!(w.z, 0.0);
    }

    #[test]
    fn setup_rejects_non_positive_sdd() {
        assert!(PixelSpace::<f64>::setup(
            10,
            10,
            1.0,
            1.0,
            0.0,
            0.0,
            Coordinate::default(),
        )
        .is_err());
    }

    #[test]
    fn setup_centers_odd_shape_on_isocenter_ray() {
        // For odd nx/ny, world(nx/2, ny/2) should land on the detector
        // center directly "in front of" the isocenter along the beam axis.
        let iso = Coordinate::new(0.0, 0.0, 0.0);
        let ps = PixelSpace::<f64>::setup(101, 101, 1.0, 1.0, 0.0, 1000.0, iso).unwrap();
        let center = ps.world(50, 50);
        // gantry 0: column axis is +X, row axis is -Z, detector offset
        // in Y is +0.5*sdd (img_offset_y with cos(0)=1, sin(0)=0).
        assert_relative_eq!(center.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(center.y, 500.0, epsilon = 1e-6);
        assert_relative_eq!(center.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn get_set_round_trip_and_bounds() {
        let mut ps = PixelSpace::<i32>::create(
            3,
            2,
            1.0,
            1.0,
            Coordinate::default(),
            &identity_cosines(),
        )
        .unwrap();
        ps.set(2, 1, 7).unwrap();
        assert_eq!(ps.get(2, 1).unwrap(), 7);
        assert!(ps.get(3, 0).is_err());
    }
}
