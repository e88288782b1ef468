//! Evolve-and-record helpers writing CSV.
//!
//! Each helper walks a schedule of times, evolves to each one and writes a
//! row. Rows are flushed as soon as they are written, so an interrupted run
//! loses at most the row in flight. Write errors propagate.

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::{
    diffusion::DiffusionTimeCdf,
    error::SimResult,
    numeric::Quad,
    types::Time,
};

/// Row-flushed CSV output.
pub struct CsvRecorder {
    out: csv::Writer<File>,
}

impl CsvRecorder {
    /// `append = false` starts a fresh file; `append = true` continues an
    /// existing one and the caller skips the header.
    pub fn open(path: &Path, append: bool) -> SimResult<Self> {
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            File::create(path)?
        };
        Ok(Self { out: csv::Writer::from_writer(file) })
    }

    pub fn write_row<I, S>(&mut self, fields: I) -> SimResult<()>
    where
        I: IntoIterator<Item = S>,
        S: std::fmt::Display,
    {
        let record: Vec<String> = fields.into_iter().map(|f| f.to_string()).collect();
        self.out.write_record(&record)?;
        self.out.flush()?;
        Ok(())
    }
}

impl DiffusionTimeCdf {
    /// Rows of `time, <position per N>, <variance per N>`.
    pub fn evolve_and_get_variance(
        &mut self,
        times: &[Time],
        n_particles: &[f64],
        path: &Path,
        append: bool,
    ) -> SimResult<()> {
        let mut csv = CsvRecorder::open(path, append)?;
        if !append {
            let header = std::iter::once("time".to_string())
                .chain(n_particles.iter().map(|n| n.to_string()))
                .chain(n_particles.iter().map(|n| format!("var{n}")));
            csv.write_row(header)?;
        }

        let as_quantiles: Vec<Quad> = n_particles.iter().map(|&n| Quad::from(n)).collect();
        for &t in times {
            self.evolve_to_time(t)?;
            let positions = self.find_quantiles(&as_quantiles, false)?;
            let variances = self.gumbel_variances(n_particles)?;
            let row = std::iter::once(self.time().to_string())
                .chain(positions.iter().map(|p| p.to_string()))
                .chain(variances.iter().map(|v| v.to_string()));
            csv.write_row(row)?;
            log::debug!("recorded variance row at time {}", self.time());
        }
        Ok(())
    }

    /// Rows of `time, <position per quantile>`.
    pub fn evolve_and_save_quantile(
        &mut self,
        times: &[Time],
        quantiles: &[Quad],
        path: &Path,
        append: bool,
    ) -> SimResult<()> {
        let mut csv = CsvRecorder::open(path, append)?;
        if !append {
            let header = std::iter::once("time".to_string())
                .chain(quantiles.iter().map(|q| q.to_string()));
            csv.write_row(header)?;
        }

        for &t in times {
            self.evolve_to_time(t)?;
            let positions = self.find_quantiles(quantiles, false)?;
            let row = std::iter::once(self.time().to_string())
                .chain(positions.iter().map(|p| p.to_string()));
            csv.write_row(row)?;
            log::debug!("recorded quantile row at time {}", self.time());
        }
        Ok(())
    }

    /// Rows of `time, prob, v` for a single quantile.
    pub fn evolve_and_get_prob_and_v(
        &mut self,
        quantile: Quad,
        times: &[Time],
        path: &Path,
        append: bool,
    ) -> SimResult<()> {
        crate::quantile::check_quantile(quantile)?;
        let mut csv = CsvRecorder::open(path, append)?;
        if !append {
            csv.write_row(["time", "prob", "v"])?;
        }

        for &t in times {
            self.evolve_to_time(t)?;
            let pv = self.prob_and_v(quantile)?;
            csv.write_row([
                self.time().to_string(),
                pv.probability.to_string(),
                pv.velocity.to_string(),
            ])?;
        }
        Ok(())
    }
}
