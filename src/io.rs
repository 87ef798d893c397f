//! Input-file ingestion and the `points.txt` output sink.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use lin_alg::f64::Vec3;

use crate::{error::SimError, octant::Octant, particle::Particle};

/// Parses the plain-text initial-conditions format: line 1 is an integer N,
/// lines 2..N+1 each hold six whitespace-separated floats `X Y Z VX VY VZ`.
/// Any malformed line aborts the run with [`SimError::Parse`].
pub fn read_particles(path: &Path) -> Result<Vec<Particle>, SimError> {
    let file = File::open(path)?;
    let mut lines = BufReader::new(file).lines();

    let count_line = lines
        .next()
        .ok_or_else(|| SimError::Parse("input file is empty".to_string()))??;
    let n: usize = count_line
        .trim()
        .parse()
        .map_err(|_| SimError::Parse(format!("expected particle count, got {count_line:?}")))?;
    if n == 0 {
        return Err(SimError::Argument("input file declares 0 particles".to_string()));
    }

    let mut particles = Vec::with_capacity(n);
    for _ in 0..n {
        let line = lines
            .next()
            .ok_or_else(|| SimError::Parse("fewer particle lines than declared count".to_string()))??;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(SimError::Parse(format!(
                "expected 6 fields per particle, got {} in {line:?}",
                fields.len()
            )));
        }
        let mut vals = [0f64; 6];
        for (i, field) in fields.iter().enumerate() {
            vals[i] = field
                .parse()
                .map_err(|_| SimError::Parse(format!("not a float: {field:?}")))?;
        }
        particles.push(Particle::new(
            Vec3::new(vals[0], vals[1], vals[2]),
            Vec3::new(vals[3], vals[4], vals[5]),
        ));
    }

    Ok(particles)
}

/// An append-only sink for `points.txt`. Truncated on creation; each call to
/// [`PointSink::write_positions`] appends one `"%f,%f,%f\n"` line per particle
/// in index order, matching the reference tool's output format exactly: no
/// header, no trailing whitespace beyond the newline.
pub struct PointSink {
    writer: BufWriter<File>,
}

impl PointSink {
    pub fn create(path: &Path) -> Result<Self, SimError> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_positions(&mut self, particles: &[Particle]) -> Result<(), SimError> {
        for p in particles {
            writeln!(self.writer, "{:.6},{:.6},{:.6}", p.pos.x, p.pos.y, p.pos.z)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SimError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// The enclosing axis-aligned box of a non-empty particle set. Undefined for
/// an empty slice; callers never invoke this when N = 0 (the scheduler is
/// never called for an empty population).
pub fn bounds(particles: &[Particle]) -> Octant {
    Octant::from_particles(particles)
}
