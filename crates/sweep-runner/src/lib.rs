//! Parameter sweeps over an external learning-benchmark runner.
//!
//! Every combination of framework, noise kind, noise level, size bound and
//! target model is run `repeats` times; the repeated results are folded into
//! one aggregate per combination and handed to a [`RecordSink`].

mod config;
mod error;
mod invoke;
mod progress;
mod schema;
mod sink;

pub use config::{SizeBound, SweepConfig, DEFAULT_COMPATIBILITY_FLAGS};
pub use error::{InvocationError, SweepError};
pub use invoke::{Launcher, ProcessLauncher, RunnerCommand};
pub use progress::{BarProgress, CountingProgress, Progress};
pub use schema::{aggregate, AggregateResult, Aggregator, ResultSchema, RunResult};
pub use sink::{JsonlSink, RecordSink, SweepRecord};

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Algorithms the runner accepts. Anything else is still passed through.
pub const KNOWN_ALGORITHMS: [&str; 4] = ["LSTAR", "KV", "TTT", "LSHARP"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepPoint {
    pub framework: String,
    pub noise_kind: String,
    pub noise_level: String,
    pub size_bound: SizeBound,
    pub target: PathBuf,
}

impl fmt::Display for SweepPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "framework={} noise={} noise_level={} size_bound={} target={}",
            self.framework,
            self.noise_kind,
            self.noise_level,
            self.size_bound,
            self.target.display()
        )
    }
}

/// The five parameter sets whose Cartesian product is swept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepPlan {
    pub frameworks: Vec<String>,
    pub noise_kinds: Vec<String>,
    pub noise_levels: Vec<String>,
    pub size_bounds: Vec<SizeBound>,
    pub targets: Vec<PathBuf>,
}

impl SweepPlan {
    /// Target discovery is skipped when any other dimension is empty: the
    /// sweep has no points either way.
    pub fn from_config(config: &SweepConfig) -> Result<Self, SweepError> {
        let degenerate = config.frameworks.is_empty()
            || config.noise_kinds.is_empty()
            || config.noise_levels.is_empty()
            || config.size_bounds.is_empty();
        let targets = if degenerate {
            Vec::new()
        } else {
            config.resolve_targets()?
        };
        Ok(Self {
            frameworks: config.frameworks.clone(),
            noise_kinds: config.noise_kinds.clone(),
            noise_levels: config.noise_levels.clone(),
            size_bounds: config.size_bounds.clone(),
            targets,
        })
    }

    pub fn point_count(&self) -> usize {
        self.frameworks.len()
            * self.noise_kinds.len()
            * self.noise_levels.len()
            * self.size_bounds.len()
            * self.targets.len()
    }

    /// Framework outermost, target innermost.
    pub fn points(&self) -> impl Iterator<Item = SweepPoint> + '_ {
        self.frameworks.iter().flat_map(move |framework| {
            self.noise_kinds.iter().flat_map(move |noise_kind| {
                self.noise_levels.iter().flat_map(move |noise_level| {
                    self.size_bounds.iter().flat_map(move |size_bound| {
                        self.targets.iter().map(move |target| SweepPoint {
                            framework: framework.clone(),
                            noise_kind: noise_kind.clone(),
                            noise_level: noise_level.clone(),
                            size_bound: *size_bound,
                            target: target.clone(),
                        })
                    })
                })
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub points: usize,
    pub invocations: u64,
}

pub struct SweepRunner<'a, L, P> {
    config: &'a SweepConfig,
    algorithm: String,
    launcher: L,
    progress: P,
    invocations: u64,
}

impl<'a, L: Launcher, P: Progress> SweepRunner<'a, L, P> {
    pub fn new(config: &'a SweepConfig, algorithm: &str, launcher: L, progress: P) -> Self {
        if !KNOWN_ALGORITHMS.contains(&algorithm) {
            warn!(
                algorithm,
                "algorithm is not one of {:?}; passing it to the runner as-is", KNOWN_ALGORITHMS
            );
        }
        Self {
            config,
            algorithm: algorithm.to_string(),
            launcher,
            progress,
            invocations: 0,
        }
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub fn into_parts(self) -> (L, P) {
        (self.launcher, self.progress)
    }

    /// Runs `point` `repeats` times and folds the results. Any failed run
    /// aborts the point; no partial aggregate is returned.
    pub fn run_sweep_point(
        &mut self,
        point: &SweepPoint,
        repeats: usize,
    ) -> Result<AggregateResult, SweepError> {
        let schema = self.config.result_schema;
        let mut runs = Vec::with_capacity(repeats);
        for repeat in 0..repeats {
            let seed = self
                .config
                .base_seed
                .map(|base| base.wrapping_add(repeat as u64));
            let command = RunnerCommand::build(self.config, &self.algorithm, point, seed);
            debug!(repeat, command = %command.render(), "launching runner");
            let fail = |source: InvocationError| SweepError::PointFailed {
                point: Box::new(point.clone()),
                repeat,
                repeats,
                source,
            };
            let stdout = self.launcher.launch(&command).map_err(fail)?;
            self.invocations += 1;
            self.progress.tick();
            runs.push(RunResult::parse(schema, &stdout).map_err(fail)?);
        }
        let folded = aggregate(schema, &runs)
            .map_err(|source| SweepError::PointFailed {
                point: Box::new(point.clone()),
                repeat: 0,
                repeats,
                source,
            })?
            .ok_or_else(|| SweepError::Config("repeats must be at least 1".to_string()))?;
        Ok(folded)
    }

    /// Runs every point of `plan` in order and hands each aggregate to `sink`.
    pub fn run_sweep<S: RecordSink + ?Sized>(
        &mut self,
        plan: &SweepPlan,
        sink: &mut S,
    ) -> Result<SweepSummary, SweepError> {
        let repeats = self.config.repeats;
        let points = plan.point_count();
        let total = points as u64 * repeats as u64;
        let digest = self.config.digest()?;
        info!(
            algorithm = %self.algorithm,
            points,
            repeats,
            invocations = total,
            "starting sweep"
        );
        if points == 0 {
            info!("sweep has no points (size_bounds or targets empty); nothing to run");
        }
        self.progress.start(total);
        let outcome = self.run_points(plan, sink, repeats, &digest);
        self.progress.finish();
        outcome?;
        info!(points, invocations = self.invocations, "sweep finished");
        Ok(SweepSummary {
            points,
            invocations: self.invocations,
        })
    }

    fn run_points<S: RecordSink + ?Sized>(
        &mut self,
        plan: &SweepPlan,
        sink: &mut S,
        repeats: usize,
        digest: &str,
    ) -> Result<(), SweepError> {
        let points = plan.point_count();
        for (idx, point) in plan.points().enumerate() {
            let result = self.run_sweep_point(&point, repeats)?;
            info!(index = idx + 1, of = points, %point, "sweep point complete");
            sink.accept(SweepRecord {
                point,
                algorithm: self.algorithm.clone(),
                repeats,
                config_digest: digest.to_string(),
                completed_at: Utc::now().to_rfc3339(),
                result: result.into_value(),
            })?;
        }
        Ok(())
    }
}
