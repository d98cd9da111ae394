//! # Harness - Freezer Lookup Latency
//!
//! Samples sequence numbers uniformly over an inclusive range, looks each
//! one up through [`FreezerReader::get_timed`], and accumulates the time
//! spent in every lookup phase (index, seek, read, decompress).
//!
//! Every `report_every` lookups a [`WindowReport`] is logged and handed to
//! the caller, and the window counters reset. The final [`BenchReport`]
//! carries the cumulative phase totals plus the end-to-end latency
//! distribution from an HDR histogram.
//!
//! The harness only reads: it never touches the archive files.

use anyhow::{bail, Context, Result};
use codec::Codec;
use config::BenchConfig;
use freezer::{meta_path, FreezerReader, PhaseTimings};
use hdrhistogram::Histogram;
use log::info;
use quanta::Clock;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::Duration;

/// Phase totals of one report window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReport {
    /// 1-based window number.
    pub window: u64,
    pub lookups: u64,
    pub phases: PhaseTimings,
}

impl WindowReport {
    /// Mean end-to-end lookup time within the window.
    pub fn mean(&self) -> Duration {
        per_lookup(self.phases.total(), self.lookups)
    }
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "window {}: {} lookups, index {:?}, seek {:?}, read {:?}, decompress {:?} (mean {:?})",
            self.window,
            self.lookups,
            self.phases.index,
            self.phases.seek,
            self.phases.read,
            self.phases.decompress,
            self.mean()
        )
    }
}

/// Totals of a complete run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchReport {
    pub min_seq: u64,
    pub max_seq: u64,
    pub lookups: u64,
    /// Decompressed bytes returned across all lookups.
    pub bytes: u64,
    /// Cumulative per-phase time over the whole run.
    pub phases: PhaseTimings,
    /// Completed report windows.
    pub windows: u64,
    pub p50: Duration,
    pub p99: Duration,
    pub max: Duration,
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn mean(&self) -> Duration {
        per_lookup(self.phases.total(), self.lookups)
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} lookups over [{}, {}] in {:?} ({} bytes)",
            self.lookups, self.min_seq, self.max_seq, self.elapsed, self.bytes
        )?;
        writeln!(
            f,
            "phases: index {:?}, seek {:?}, read {:?}, decompress {:?}",
            self.phases.index, self.phases.seek, self.phases.read, self.phases.decompress
        )?;
        write!(
            f,
            "latency: mean {:?}, p50 {:?}, p99 {:?}, max {:?}",
            self.mean(),
            self.p50,
            self.p99,
            self.max
        )
    }
}

fn per_lookup(total: Duration, lookups: u64) -> Duration {
    if lookups == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((total.as_nanos() / u128::from(lookups)) as u64)
}

/// Randomized point-lookup benchmark over a sealed archive.
pub struct LatencyBench<C: Codec> {
    reader: FreezerReader<C>,
    min_seq: u64,
    max_seq: u64,
    iterations: u64,
    report_every: u64,
    seed: Option<u64>,
}

impl<C: Codec> fmt::Debug for LatencyBench<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyBench")
            .field("collection", &self.reader.collection())
            .field("min_seq", &self.min_seq)
            .field("max_seq", &self.max_seq)
            .field("iterations", &self.iterations)
            .field("report_every", &self.report_every)
            .finish()
    }
}

impl LatencyBench<Box<dyn Codec>> {
    /// Opens the archive described by `config`.
    ///
    /// The reader's `min` comes from the `.cmeta` sidecar when one exists;
    /// otherwise `config.min_seq` must name the archive's first sequence
    /// number.
    pub fn open(config: &BenchConfig) -> Result<Self> {
        let codec = config.codec.build();
        let dir = &config.archive_dir;
        let reader = if meta_path(dir, &config.collection).exists() {
            FreezerReader::open_with_meta(dir, &config.collection, codec, config.max_open_segments)?
        } else {
            let Some(min) = config.min_seq else {
                bail!(
                    "no metadata for '{}' in {} and no minimum sequence number configured",
                    config.collection,
                    dir.display()
                );
            };
            FreezerReader::open_with_capacity(
                dir,
                &config.collection,
                min,
                codec,
                config.max_open_segments,
            )?
        };
        Self::new(reader, config)
    }
}

impl<C: Codec> LatencyBench<C> {
    /// Wraps an open reader. Unset range bounds default to the reader's
    /// coverage.
    ///
    /// # Errors
    ///
    /// Fails if the archive is empty or the range reaches outside it.
    pub fn new(reader: FreezerReader<C>, config: &BenchConfig) -> Result<Self> {
        config.validate()?;
        let Some(archive_max) = reader.max_seq() else {
            bail!("archive '{}' is empty", reader.collection());
        };
        let min_seq = config.min_seq.unwrap_or(reader.min_seq());
        let max_seq = config.max_seq.unwrap_or(archive_max);
        if min_seq > max_seq || min_seq < reader.min_seq() || max_seq > archive_max {
            bail!(
                "benchmark range [{}, {}] is outside archive range [{}, {}]",
                min_seq,
                max_seq,
                reader.min_seq(),
                archive_max
            );
        }
        Ok(Self {
            reader,
            min_seq,
            max_seq,
            iterations: config.iterations,
            report_every: config.report_every,
            seed: config.seed,
        })
    }

    pub fn reader(&self) -> &FreezerReader<C> {
        &self.reader
    }

    pub fn range(&self) -> (u64, u64) {
        (self.min_seq, self.max_seq)
    }

    pub fn run(&self) -> Result<BenchReport> {
        self.run_with(|_| {})
    }

    /// Runs the benchmark, calling `on_window` after every full window.
    /// The first failed lookup aborts the run.
    pub fn run_with<F>(&self, mut on_window: F) -> Result<BenchReport>
    where
        F: FnMut(&WindowReport),
    {
        let clock = Clock::new();
        let mut rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let mut histogram = Histogram::<u64>::new(3)?;

        let mut total = PhaseTimings::default();
        let mut window = PhaseTimings::default();
        let mut window_lookups = 0u64;
        let mut windows = 0u64;
        let mut bytes = 0u64;

        let started = clock.now();
        for _ in 0..self.iterations {
            let seq = rng.gen_range(self.min_seq..=self.max_seq);

            let t0 = clock.now();
            let record = self
                .reader
                .get_timed(seq, &clock, &mut window)
                .with_context(|| format!("lookup of sequence number {}", seq))?;
            let nanos = clock.now().duration_since(t0).as_nanos();
            histogram.saturating_record(u64::try_from(nanos).unwrap_or(u64::MAX));

            bytes += record.len() as u64;
            window_lookups += 1;

            if window_lookups == self.report_every {
                windows += 1;
                let report = WindowReport {
                    window: windows,
                    lookups: window_lookups,
                    phases: window,
                };
                info!("{}", report);
                on_window(&report);
                total.add(&window);
                window.reset();
                window_lookups = 0;
            }
        }
        total.add(&window);

        let report = BenchReport {
            min_seq: self.min_seq,
            max_seq: self.max_seq,
            lookups: self.iterations,
            bytes,
            phases: total,
            windows,
            p50: Duration::from_nanos(histogram.value_at_quantile(0.5)),
            p99: Duration::from_nanos(histogram.value_at_quantile(0.99)),
            max: Duration::from_nanos(histogram.max()),
            elapsed: clock.now().duration_since(started),
        };
        info!(
            "bench '{}' done: {} lookups, p50 {:?}, p99 {:?}, max {:?}",
            self.reader.collection(),
            report.lookups,
            report.p50,
            report.p99,
            report.max
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests;
