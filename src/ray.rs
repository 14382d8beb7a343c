// Siddon-style ray/voxel intersection (Siddon 1985, with the Jacobs et al.
// 1998 incremental optimization). This is the numerical heart of the crate —
// read the invariants in the doc comments before touching the stepping loop,
// they are load-bearing.

use crate::coordinate::Coordinate;
use crate::error::{Error, Result};
use crate::voxel_space::VoxelSpace;
use smallvec::SmallVec;

const ROUND_PLACES: f64 = 1e8;

fn round8(x: f64) -> f64 {
    (x * ROUND_PLACES).round() / ROUND_PLACES
}

fn in_bounds(i: i64, j: i64, k: i64, nx: usize, ny: usize, nz: usize) -> bool {
    // Each axis is checked against its own extent. A non-cubic volume
    // (ny != nz) would silently mis-accept or mis-reject indices near the
    // seam if one axis' bound were swapped for another's, so this gets its
    // own named helper and a dedicated non-cubic-volume test.
    i >= 0 && (i as usize) < nx && j >= 0 && (j as usize) < ny && k >= 0 && (k as usize) < nz
}

/// One axis' entry/exit bookkeeping: the low/high parametric crossing of the
/// whole slab `[plane 0, plane n]`, and whether the ray even has a direction
/// component on this axis.
struct AxisBounds {
    alpha_min: f64,
    alpha_max: f64,
}

fn axis_bounds(p1: f64, d: f64, b: f64, delta: f64, n: usize) -> AxisBounds {
    if d != 0.0 {
        let a0 = (b - p1) / d;
        let a1 = (b + n as f64 * delta - p1) / d;
        AxisBounds {
            alpha_min: a0.min(a1),
            alpha_max: a0.max(a1),
        }
    } else if p1 >= b && p1 <= b + n as f64 * delta {
        // Ray doesn't move along this axis but starts within its slab: the
        // axis doesn't constrain alpha at all.
        AxisBounds {
            alpha_min: f64::NEG_INFINITY,
            alpha_max: f64::INFINITY,
        }
    } else {
        // Outside the slab and never moving into it: no intersection,
        // forces the overall alpha_min/alpha_max to be empty.
        AxisBounds {
            alpha_min: f64::INFINITY,
            alpha_max: f64::NEG_INFINITY,
        }
    }
}

/// Smallest plane index strictly greater than `x` (used when stepping in the
/// increasing direction).
fn next_plane_above(x: f64) -> i64 {
    let snapped = round8(x);
    snapped.floor() as i64 + 1
}

/// Largest plane index strictly less than `x` (decreasing direction).
fn next_plane_below(x: f64) -> i64 {
    let snapped = round8(x);
    snapped.ceil() as i64 - 1
}

/// A short-lived per-thread computation: given a source `p1`, a target `p2`,
/// and a `VoxelSpace`, enumerates `(flat voxel index, path length mm)` pairs
/// along the intersection, and the path-length-weighted sum of the volume's
/// scalar values.
///
/// `Ray` borrows its `VoxelSpace` for the duration of a trace; it holds no
/// back-pointer into the volume beyond that borrow. It is not
/// `Send`/`Sync`-shared across threads — each concurrent trace in
/// `BeamGeometry::create_drr` owns its own `Ray`.
pub struct Ray<'a> {
    pub p1: Coordinate,
    pub p2: Coordinate,
    vs: &'a VoxelSpace,
    pub indices: SmallVec<[usize; 64]>,
    pub lengths: SmallVec<[f64; 64]>,
    pub d: f64,
}

impl<'a> Ray<'a> {
    pub fn new(p1: Coordinate, p2: Coordinate, vs: &'a VoxelSpace) -> Self {
        Ray {
            p1,
            p2,
            vs,
            indices: SmallVec::new(),
            lengths: SmallVec::new(),
            d: 0.0,
        }
    }

    /// Rewires this ray to a new source/target/volume and clears its
    /// outputs, so one `Ray` can be reused across many traces within a
    /// single thread instead of allocating a fresh one per pixel.
    pub fn reset(&mut self, p1: Coordinate, p2: Coordinate, vs: &'a VoxelSpace) {
        self.p1 = p1;
        self.p2 = p2;
        self.vs = vs;
        self.indices.clear();
        self.lengths.clear();
        self.d = 0.0;
    }

    /// Runs the Siddon traversal, populating `indices`/`lengths`/`d`.
    ///
    /// A miss (ray doesn't intersect the volume, or `p1 == p2`) is not an
    /// error: it leaves `indices`/`lengths` empty and `d == 0.0`. The only
    /// error this can return is `Error::InternalInvariant`, and only if the
    /// per-step axis dispatch is unreachable — a correctly functioning
    /// traversal can never hit it.
    pub fn trace(&mut self) -> Result<()> {
        self.indices.clear();
        self.lengths.clear();
        self.d = 0.0;
        for (flat, len) in self.trace_iter()? {
            self.d += len * self.vs.get_flat_unchecked(flat);
            self.indices.push(flat);
            self.lengths.push(len);
        }
        Ok(())
    }

    /// Lazy variant of [`Ray::trace`]: yields `(flat_index, length_mm)`
    /// pairs without materializing `indices`/`lengths`. `trace` is
    /// implemented directly in terms of this iterator, so the two views of
    /// a traversal cannot diverge from each other.
    pub fn trace_iter(&self) -> Result<RayTraversal> {
        RayTraversal::new(self.p1, self.p2, self.vs)
    }
}

/// The lazy Siddon walk. Not restartable; finite.
pub struct RayTraversal<'a> {
    vs: &'a VoxelSpace,
    ray_length: f64,
    alpha_hi: f64,
    alpha_current: f64,
    alpha_x: f64,
    alpha_y: f64,
    alpha_z: f64,
    delta_alpha_x: f64,
    delta_alpha_y: f64,
    delta_alpha_z: f64,
    step_i: i64,
    step_j: i64,
    step_k: i64,
    i: i64,
    j: i64,
    k: i64,
    done: bool,
}

impl<'a> RayTraversal<'a> {
    fn empty(vs: &'a VoxelSpace) -> Result<Self> {
        Ok(RayTraversal {
            vs,
            ray_length: 0.0,
            alpha_hi: 0.0,
            alpha_current: 0.0,
            alpha_x: f64::INFINITY,
            alpha_y: f64::INFINITY,
            alpha_z: f64::INFINITY,
            delta_alpha_x: 0.0,
            delta_alpha_y: 0.0,
            delta_alpha_z: 0.0,
            step_i: 0,
            step_j: 0,
            step_k: 0,
            i: 0,
            j: 0,
            k: 0,
            done: true,
        })
    }

    fn new(p1: Coordinate, p2: Coordinate, vs: &'a VoxelSpace) -> Result<Self> {
        if p1 == p2 {
            return Self::empty(vs);
        }

        let dx = p2.x - p1.x;
        let dy = p2.y - p1.y;
        let dz = p2.z - p1.z;

        // Plane 0 bounds the low edge of voxel 0.
        let bx = vs.pos.x - 0.5 * vs.delta_x;
        let by = vs.pos.y - 0.5 * vs.delta_y;
        let bz = vs.pos.z - 0.5 * vs.delta_z;

        let ax = axis_bounds(p1.x, dx, bx, vs.delta_x, vs.nx);
        let ay = axis_bounds(p1.y, dy, by, vs.delta_y, vs.ny);
        let az = axis_bounds(p1.z, dz, bz, vs.delta_z, vs.nz);

        let alpha_min = ax.alpha_min.max(ay.alpha_min).max(az.alpha_min);
        let alpha_max = ax.alpha_max.min(ay.alpha_max).min(az.alpha_max);

        if alpha_max <= 0.0 || alpha_min >= 1.0 || alpha_min >= alpha_max {
            return Self::empty(vs);
        }

        let alpha_lo = alpha_min.max(0.0);
        let alpha_hi = alpha_max.min(1.0);
        if round8(alpha_lo) >= round8(alpha_hi) {
            return Self::empty(vs);
        }

        // First interior plane crossing on each axis strictly ahead of
        // alpha_lo, the clamped, physical entry into the traversal. Using
        // the raw, possibly negative alpha_min here would pick a plane
        // behind a source point that starts inside the volume. Also derives
        // the incremental alpha step taken each time this axis is crossed.
        let (alpha_x, delta_alpha_x, step_i) = if dx > 0.0 {
            let plane = next_plane_above((p1.x + alpha_lo * dx - bx) / vs.delta_x);
            ((bx + plane as f64 * vs.delta_x - p1.x) / dx, vs.delta_x / dx.abs(), 1)
        } else if dx < 0.0 {
            let plane = next_plane_below((p1.x + alpha_lo * dx - bx) / vs.delta_x);
            ((bx + plane as f64 * vs.delta_x - p1.x) / dx, vs.delta_x / dx.abs(), -1)
        } else {
            (f64::INFINITY, 0.0, 0)
        };
        let (alpha_y, delta_alpha_y, step_j) = if dy > 0.0 {
            let plane = next_plane_above((p1.y + alpha_lo * dy - by) / vs.delta_y);
            ((by + plane as f64 * vs.delta_y - p1.y) / dy, vs.delta_y / dy.abs(), 1)
        } else if dy < 0.0 {
            let plane = next_plane_below((p1.y + alpha_lo * dy - by) / vs.delta_y);
            ((by + plane as f64 * vs.delta_y - p1.y) / dy, vs.delta_y / dy.abs(), -1)
        } else {
            (f64::INFINITY, 0.0, 0)
        };
        let (alpha_z, delta_alpha_z, step_k) = if dz > 0.0 {
            let plane = next_plane_above((p1.z + alpha_lo * dz - bz) / vs.delta_z);
            ((bz + plane as f64 * vs.delta_z - p1.z) / dz, vs.delta_z / dz.abs(), 1)
        } else if dz < 0.0 {
            let plane = next_plane_below((p1.z + alpha_lo * dz - bz) / vs.delta_z);
            ((bz + plane as f64 * vs.delta_z - p1.z) / dz, vs.delta_z / dz.abs(), -1)
        } else {
            (f64::INFINITY, 0.0, 0)
        };

        // Initial voxel: try each candidate crossing in ascending order,
        // evaluate alpha_mean against alpha_lo, and accept the first whose
        // midpoint indices land inside the grid.
        let mut candidates = [alpha_x, alpha_y, alpha_z];
        candidates.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let phi = |alpha: f64, p1c: f64, dc: f64, bc: f64, deltac: f64| -> i64 {
            ((p1c + alpha * dc - bc) / deltac).floor() as i64
        };

        let mut initial = None;
        for &candidate in candidates.iter() {
            if !candidate.is_finite() {
                continue;
            }
            let alpha_mean = (candidate + alpha_lo) / 2.0;
            let i0 = phi(alpha_mean, p1.x, dx, bx, vs.delta_x);
            let j0 = phi(alpha_mean, p1.y, dy, by, vs.delta_y);
            let k0 = phi(alpha_mean, p1.z, dz, bz, vs.delta_z);
            if in_bounds(i0, j0, k0, vs.nx, vs.ny, vs.nz) {
                initial = Some((i0, j0, k0));
                break;
            }
        }
        let (i0, j0, k0) = match initial {
            Some(v) => v,
            None => return Self::empty(vs),
        };

        let ray_length = p1.distance(&p2);

        Ok(RayTraversal {
            vs,
            ray_length,
            alpha_hi,
            alpha_current: alpha_lo,
            alpha_x,
            alpha_y,
            alpha_z,
            delta_alpha_x,
            delta_alpha_y,
            delta_alpha_z,
            step_i,
            step_j,
            step_k,
            i: i0,
            j: j0,
            k: k0,
            done: false,
        })
    }
}

impl<'a> Iterator for RayTraversal<'a> {
    type Item = Result<(usize, f64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if round8(self.alpha_current) >= round8(self.alpha_hi) {
            self.done = true;
            return None;
        }
        if !in_bounds(self.i, self.j, self.k, self.vs.nx, self.vs.ny, self.vs.nz) {
            self.done = true;
            return None;
        }

        let alpha_next = self.alpha_x.min(self.alpha_y).min(self.alpha_z);
        let clipped = alpha_next.min(self.alpha_hi);
        let step_length = (clipped - self.alpha_current) * self.ray_length;

        let flat = self.vs.flat_index(self.i as usize, self.j as usize, self.k as usize);

        let advance_past_target = round8(clipped) >= round8(self.alpha_hi) && clipped < alpha_next;
        if advance_past_target {
            // We stopped because we reached the target point (p2 is inside
            // the volume), not because we crossed a plane: don't step the
            // voxel index, just end the walk after this segment.
            self.alpha_current = clipped;
            self.done = true;
        } else if self.alpha_x == alpha_next {
            self.i += self.step_i;
            self.alpha_current = alpha_next;
            self.alpha_x += self.delta_alpha_x;
        } else if self.alpha_y == alpha_next {
            self.j += self.step_j;
            self.alpha_current = alpha_next;
            self.alpha_y += self.delta_alpha_y;
        } else if self.alpha_z == alpha_next {
            self.k += self.step_k;
            self.alpha_current = alpha_next;
            self.alpha_z += self.delta_alpha_z;
        } else {
            self.done = true;
            return Some(Err(Error::InternalInvariant(
                "alpha_next matched none of alpha_x/alpha_y/alpha_z".to_string(),
            )));
        }

        if step_length <= 0.0 {
            // A zero-length tie at the boundary; skip without emitting, the
            // caller's loop (the `for` in `Ray::trace`, or a manual
            // `trace_iter` consumer) simply sees the iterator continue.
            return self.next();
        }

        Some(Ok((flat, step_length)))
    }
}


// Property tests over randomly generated (but bounded) voxel shapes/spacings
// and source/target pairs: `len(indices) == len(lengths)`, all
// indices/lengths valid, the path-length sum never exceeds the Euclidean
// source-target distance, and the materialized/streaming APIs agree
// pairwise.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn coord_strategy() -> impl Strategy<Value = Coordinate> {
        (-20.0..20.0f64, -20.0..20.0f64, -20.0..20.0f64)
            .prop_map(|(x, y, z)| Coordinate::new(x, y, z))
    }

    fn voxel_space_strategy() -> impl Strategy<Value = VoxelSpace> {
        (
            1usize..6,
            1usize..6,
            1usize..6,
            0.1f64..3.0,
            0.1f64..3.0,
            0.1f64..3.0,
            -5.0f64..5.0,
            -5.0f64..5.0,
            -5.0f64..5.0,
        )
            .prop_map(|(nx, ny, nz, dx, dy, dz, px, py, pz)| {
                VoxelSpace::new(nx, ny, nz, dx, dy, dz, Coordinate::new(px, py, pz)).unwrap()
            })
    }

    proptest! {
        #[test]
        fn indices_and_lengths_stay_in_bounds(
            vs in voxel_space_strategy(),
            p1 in coord_strategy(),
            p2 in coord_strategy(),
        ) {
            let mut ray = Ray::new(p1, p2, &vs);
            ray.trace().unwrap();
            prop_assert_eq!(ray.indices.len(), ray.lengths.len());
            for (&idx, &len) in ray.indices.iter().zip(ray.lengths.iter()) {
                prop_assert!(idx < vs.nx * vs.ny * vs.nz);
                prop_assert!(len > 0.0);
            }
        }

        #[test]
        fn sum_of_lengths_never_exceeds_distance(
            vs in voxel_space_strategy(),
            p1 in coord_strategy(),
            p2 in coord_strategy(),
        ) {
            let mut ray = Ray::new(p1, p2, &vs);
            ray.trace().unwrap();
            let total: f64 = ray.lengths.iter().sum();
            prop_assert!(total <= p1.distance(&p2) + 1e-6);
        }

        #[test]
        fn identical_source_and_target_is_always_empty(
            vs in voxel_space_strategy(),
            p in coord_strategy(),
        ) {
            let mut ray = Ray::new(p, p, &vs);
            ray.trace().unwrap();
            prop_assert!(ray.indices.is_empty());
            prop_assert!(ray.lengths.is_empty());
            prop_assert_eq!(ray.d, 0.0);
        }

        #[test]
        fn streaming_and_materialized_apis_agree(
            vs in voxel_space_strategy(),
            p1 in coord_strategy(),
            p2 in coord_strategy(),
        ) {
            let mut ray = Ray::new(p1, p2, &vs);
            ray.trace().unwrap();
            let streamed: Vec<(usize, f64)> = ray
                .trace_iter()
                .unwrap()
                .map(|r| r.unwrap())
                .collect();
            prop_assert_eq!(streamed.len(), ray.indices.len());
            for (k, &idx) in ray.indices.iter().enumerate() {
                prop_assert_eq!(streamed[k].0, idx);
                prop_assert!((streamed[k].1 - ray.lengths[k]).abs() < 1e-9);
            }
        }
    }
}
