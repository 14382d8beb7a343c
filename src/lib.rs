//! Digitally reconstructed radiograph (DRR) generation: Siddon ray tracing
//! of a synthetic 2D projection image through a Hounsfield-unit voxel volume.
//!
//! The pipeline is a DAG of plain value types: a [`VoxelSpace`]
//! (the HU volume) and a [`PixelSpace`] (the detector grid) each carry their
//! own world-space geometry; [`beam_geometry::BeamGeometry`] places a point
//! source relative to both and, for every detector pixel, traces a
//! [`Ray`](ray::Ray) from the source through the volume to that pixel,
//! accumulating [`Attenuation`] along the way. Nothing here owns a logger or
//! a thread pool beyond what `rayon`'s global pool gives it for free — the
//! `drr_cli` binary is the only thing that touches process-wide state
//! (args, logging, file I/O).

#[macro_use]
extern crate impl_ops;
#[macro_use]
extern crate serde;

pub mod attenuation;
pub mod beam_geometry;
pub mod coordinate;
pub mod error;
pub mod pixel_space;
pub mod ray;
pub mod voxel_space;

pub use attenuation::Attenuation;
pub use beam_geometry::BeamGeometry;
pub use coordinate::Coordinate;
pub use error::{Error, Result};
pub use pixel_space::PixelSpace;
pub use ray::Ray;
pub use voxel_space::VoxelSpace;
