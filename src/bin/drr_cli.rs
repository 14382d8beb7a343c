// Thin outer surface around `drr_core`: loads a raw little-endian HU volume
// (header-then-payload, see `load_volume`), places a beam, traces a DRR,
// writes a 16-bit grayscale PNG. None of this belongs to the library's own
// contract — it exists to exercise `drr_core` from the command line.

use byteorder::{LittleEndian, ReadBytesExt};
use drr_core::{Attenuation, BeamGeometry, Coordinate, PixelSpace, VoxelSpace};
use image::{ImageBuffer, Luma};
use log::info;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use structopt::StructOpt;

/// Geometry parameters as a JSON sidecar, an alternative to spelling every
/// beam/detector flag on the command line.
#[derive(Debug, Deserialize)]
struct BeamParams {
    gantry_angle: f64,
    sid: f64,
    sdd: f64,
    energy: f64,
    isocenter_x: f64,
    isocenter_y: f64,
    isocenter_z: f64,
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "drr_cli",
    about = "Trace a digitally reconstructed radiograph through a raw HU volume"
)]
struct Opt {
    /// Raw volume file: a header (three little-endian u32 dimensions
    /// nx/ny/nz, three little-endian f64 voxel spacings delta_x/delta_y/
    /// delta_z, three little-endian f64 components of the volume's corner
    /// position — the center of voxel (0,0,0)) followed by nx*ny*nz
    /// little-endian f64 Hounsfield values in flat (x fastest) order.
    #[structopt(long, parse(from_os_str))]
    volume: PathBuf,

    /// Isocenter, mm — the point the gantry rotates about. Independent of
    /// the volume's own corner position, which comes from the volume file's
    /// header.
    #[structopt(long, default_value = "0.0")]
    isocenter_x: f64,
    #[structopt(long, default_value = "0.0")]
    isocenter_y: f64,
    #[structopt(long, default_value = "0.0")]
    isocenter_z: f64,

    /// Gantry angle, degrees.
    #[structopt(long, default_value = "0.0")]
    gantry_angle: f64,
    /// Source-to-isocenter distance, mm.
    #[structopt(long)]
    sid: f64,
    /// Source-to-detector distance, mm.
    #[structopt(long)]
    sdd: f64,
    /// Photon energy, MeV.
    #[structopt(long, default_value = "0.05")]
    energy: f64,

    #[structopt(long, default_value = "512")]
    columns: usize,
    #[structopt(long, default_value = "512")]
    rows: usize,
    #[structopt(long, default_value = "1.0")]
    delta_col: f64,
    #[structopt(long, default_value = "1.0")]
    delta_row: f64,

    #[structopt(long, parse(from_os_str), default_value = "drr.png")]
    output: PathBuf,

    /// JSON file of beam/detector parameters, overriding the flags above.
    #[structopt(long, parse(from_os_str))]
    params: Option<PathBuf>,
}

fn apply_params(opt: &mut Opt) -> io::Result<()> {
    let path = match &opt.params {
        Some(p) => p.clone(),
        None => return Ok(()),
    };
    let file = File::open(&path)?;
    let params: BeamParams = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    opt.gantry_angle = params.gantry_angle;
    opt.sid = params.sid;
    opt.sdd = params.sdd;
    opt.energy = params.energy;
    opt.isocenter_x = params.isocenter_x;
    opt.isocenter_y = params.isocenter_y;
    opt.isocenter_z = params.isocenter_z;
    Ok(())
}

/// Reads the header-then-payload raw volume format described on
/// `Opt::volume`: three `u32` dimensions, three `f64` spacings, three `f64`
/// corner-position components, then the flat HU payload. The volume's own
/// corner position is a property of the scanned data, not of where the beam
/// happens to be aimed, so it is read from the file rather than taken from
/// `--isocenter-*`.
fn load_volume(path: &PathBuf) -> io::Result<VoxelSpace> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let nx = reader.read_u32::<LittleEndian>()? as usize;
    let ny = reader.read_u32::<LittleEndian>()? as usize;
    let nz = reader.read_u32::<LittleEndian>()? as usize;

    let delta_x = reader.read_f64::<LittleEndian>()?;
    let delta_y = reader.read_f64::<LittleEndian>()?;
    let delta_z = reader.read_f64::<LittleEndian>()?;

    let pos_x = reader.read_f64::<LittleEndian>()?;
    let pos_y = reader.read_f64::<LittleEndian>()?;
    let pos_z = reader.read_f64::<LittleEndian>()?;
    let pos = Coordinate::new(pos_x, pos_y, pos_z);

    let mut vs = VoxelSpace::new(nx, ny, nz, delta_x, delta_y, delta_z, pos)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let hu = reader.read_f64::<LittleEndian>()?;
                vs.set(i, j, k, hu)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            }
        }
    }
    Ok(vs)
}

fn write_png(drr: &PixelSpace<i32>, path: &PathBuf) -> io::Result<()> {
    let (columns, rows) = drr.shape();
    let mut img: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::new(columns as u32, rows as u32);
    for j in 0..rows {
        for i in 0..columns {
            let value = drr.get(i, j).unwrap_or(0).clamp(0, 4095) as u16;
            // 12-bit -> 16-bit full-range scaling for a viewable grayscale PNG.
            img.put_pixel(i as u32, j as u32, Luma([value * 16]));
        }
    }
    img.save(path)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

fn main() -> io::Result<()> {
    env_logger::init();
    let mut opt = Opt::from_args();
    apply_params(&mut opt)?;

    info!("loading volume {:?}", opt.volume);
    let voxel_space = load_volume(&opt.volume)?;
    info!("volume shape {:?}", voxel_space.shape());

    let isocenter = Coordinate::new(opt.isocenter_x, opt.isocenter_y, opt.isocenter_z);
    let attenuation = Attenuation::new(opt.energy)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let beam = BeamGeometry::setup(opt.gantry_angle, opt.sid, isocenter, voxel_space, attenuation)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let detector = PixelSpace::<f64>::setup(
        opt.columns,
        opt.rows,
        opt.delta_col,
        opt.delta_row,
        opt.gantry_angle,
        opt.sdd,
        isocenter,
    )
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let drr = beam
        .create_drr(&detector)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    write_png(&drr, &opt.output)?;
    info!("wrote {:?}", opt.output);
    Ok(())
}
