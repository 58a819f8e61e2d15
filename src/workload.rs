//! Observations, datasets and random query workloads.
//!
//! A histogram is trained on `(region, true count)` pairs. [`WorkloadGenerator`] draws such pairs
//! from a [`Dataset`]: each query gets a uniform centre inside the data's bounding box and a random
//! width per attribute, scaled so that on average it covers a chosen fraction of the box.

use rand::Rng;
use tracing::debug;

use crate::error::HistogramError;
use crate::metrics::RefineMetrics;
use crate::region::Region;
use crate::tree::BucketTree;

/// A query region and the number of tuples it really contains.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Observation {
    pub region: Vec<[f64; 2]>,
    pub count: f64,
}

impl From<(Vec<[f64; 2]>, f64)> for Observation {
    fn from((region, count): (Vec<[f64; 2]>, f64)) -> Self {
        Self { region, count }
    }
}

/// Points stored row-major with a fixed number of attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    dims: usize,
    values: Vec<f64>,
}

impl Dataset {
    pub fn new(dims: usize) -> Result<Self, HistogramError> {
        if dims == 0 {
            return Err(HistogramError::NoAttributes);
        }
        Ok(Self {
            dims,
            values: Vec::new(),
        })
    }

    /// Collects `points`, each with one value per attribute.
    pub fn from_points<P: AsRef<[f64]>>(
        dims: usize,
        points: impl IntoIterator<Item = P>,
    ) -> Result<Self, HistogramError> {
        let mut dataset = Self::new(dims)?;
        for point in points {
            dataset.push(point.as_ref())?;
        }
        Ok(dataset)
    }

    pub fn push(&mut self, point: &[f64]) -> Result<(), HistogramError> {
        if point.len() != self.dims {
            return Err(HistogramError::DimensionMismatch {
                expected: self.dims,
                found: point.len(),
            });
        }
        if let Some(&value) = point.iter().find(|value| !value.is_finite()) {
            return Err(HistogramError::InvalidPoint {
                row: self.len(),
                value,
            });
        }
        self.values.extend_from_slice(point);
        Ok(())
    }

    #[inline]
    pub fn dims(&self) -> usize {
        self.dims
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len() / self.dims
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.dims)
    }

    /// `[min, max]` of every attribute, or `None` for an empty dataset.
    pub fn bounds(&self) -> Option<Vec<[f64; 2]>> {
        let mut points = self.points();
        let mut bounds: Vec<[f64; 2]> = points.next()?.iter().map(|&v| [v, v]).collect();
        for point in points {
            for (range, &value) in bounds.iter_mut().zip(point) {
                range[0] = range[0].min(value);
                range[1] = range[1].max(value);
            }
        }
        Some(bounds)
    }

    /// Points inside the closed `region`.
    pub fn count_in(&self, region: &Region) -> usize {
        self.points()
            .filter(|point| region.contains_point(point))
            .count()
    }
}

/// A query over a subset of attributes, see [`WorkloadGenerator::projected_queries`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedQuery {
    pub attributes: Vec<String>,
    pub region: Vec<[f64; 2]>,
    pub count: f64,
}

/// Draws random range queries over a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkloadGenerator {
    volume_fraction: f64,
}

impl Default for WorkloadGenerator {
    fn default() -> Self {
        Self {
            volume_fraction: 0.01,
        }
    }
}

impl WorkloadGenerator {
    /// `volume_fraction` is the largest share of the data's bounding box a query can cover.
    pub fn new(volume_fraction: f64) -> Result<Self, HistogramError> {
        if !(volume_fraction > 0.0 && volume_fraction <= 1.0) {
            return Err(HistogramError::InvalidVolumeFraction(volume_fraction));
        }
        Ok(Self { volume_fraction })
    }

    #[inline]
    pub fn volume_fraction(&self) -> f64 {
        self.volume_fraction
    }

    /// `queries` random observations with their exact counts in `dataset`.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        dataset: &Dataset,
        queries: usize,
        rng: &mut R,
    ) -> Vec<Observation> {
        let Some(bounds) = dataset.bounds() else {
            return Vec::new();
        };
        (0..queries)
            .map(|_| {
                let centre: Vec<f64> = bounds
                    .iter()
                    .map(|&[low, high]| rng.gen_range(low..=high))
                    .collect();
                self.observe_around(dataset, &bounds, &centre, rng)
            })
            .collect()
    }

    /// Like [`WorkloadGenerator::generate`], then adds a query centred on every point that no
    /// earlier query covers, so every tuple is seen at least once.
    pub fn generate_covering<R: Rng + ?Sized>(
        &self,
        dataset: &Dataset,
        queries: usize,
        rng: &mut R,
    ) -> Vec<Observation> {
        let mut workload = self.generate(dataset, queries, rng);
        let Some(bounds) = dataset.bounds() else {
            return workload;
        };
        let mut covering: Vec<Region> = workload.iter().filter_map(region_of).collect();
        let generated = workload.len();

        for point in dataset.points() {
            if covering.iter().any(|region| region.contains_point(point)) {
                continue;
            }
            let observation = self.observe_around(dataset, &bounds, point, rng);
            if let Some(region) = region_of(&observation) {
                covering.push(region);
            }
            workload.push(observation);
        }
        debug!(
            generated,
            covering = workload.len() - generated,
            "generated covering workload"
        );
        workload
    }

    /// Queries over random non-empty attribute subsets, with counts taken over the unnamed
    /// attributes' full range.
    pub fn projected_queries<R: Rng + ?Sized>(
        &self,
        dataset: &Dataset,
        attributes: &[String],
        queries: usize,
        rng: &mut R,
    ) -> Vec<ProjectedQuery> {
        let Some(bounds) = dataset.bounds() else {
            return Vec::new();
        };
        if attributes.len() != dataset.dims() {
            return Vec::new();
        }

        let mut projected = Vec::with_capacity(queries);
        for observation in self.generate(dataset, queries, rng) {
            let mut kept: Vec<usize> = (0..attributes.len()).filter(|_| rng.gen_bool(0.5)).collect();
            if kept.is_empty() {
                kept.push(rng.gen_range(0..attributes.len()));
            }

            let mut full = bounds.clone();
            for &dim in &kept {
                full[dim] = observation.region[dim];
            }
            let count = Region::new(full).map_or(0, |region| dataset.count_in(&region));
            projected.push(ProjectedQuery {
                attributes: kept.iter().map(|&dim| attributes[dim].clone()).collect(),
                region: kept.iter().map(|&dim| observation.region[dim]).collect(),
                count: count as f64,
            });
        }
        projected
    }

    fn observe_around<R: Rng + ?Sized>(
        &self,
        dataset: &Dataset,
        bounds: &[[f64; 2]],
        centre: &[f64],
        rng: &mut R,
    ) -> Observation {
        let scale = self.volume_fraction.powf(1.0 / bounds.len() as f64);
        let region: Vec<[f64; 2]> = bounds
            .iter()
            .zip(centre)
            .map(|(&[low, high], &centre)| {
                let half = rng.gen::<f64>() * (high - low) * scale / 2.0;
                [centre - half, centre + half]
            })
            .collect();
        let count = Region::new(region.clone()).map_or(0, |region| dataset.count_in(&region));
        Observation {
            region,
            count: count as f64,
        }
    }
}

fn region_of(observation: &Observation) -> Option<Region> {
    Region::new(observation.region.clone()).ok()
}

impl BucketTree {
    /// Refines the tree with a covering workload of `queries` random queries over `dataset`.
    pub fn train<R: Rng + ?Sized>(
        &mut self,
        dataset: &Dataset,
        queries: usize,
        generator: &WorkloadGenerator,
        rng: &mut R,
    ) -> Result<RefineMetrics, HistogramError> {
        if dataset.dims() != self.config().dims() {
            return Err(HistogramError::DimensionMismatch {
                expected: self.config().dims(),
                found: dataset.dims(),
            });
        }
        let workload = generator.generate_covering(dataset, queries, rng);
        debug!(observations = workload.len(), points = dataset.len(), "training");
        self.refine(workload)
    }
}

/// Mean of `|estimate - count|` over `observations`; zero for an empty slice.
pub fn mean_absolute_error(
    tree: &BucketTree,
    observations: &[Observation],
) -> Result<f64, HistogramError> {
    if observations.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0;
    for observation in observations {
        total += (tree.estimate_region(&observation.region)? - observation.count).abs();
    }
    Ok(total / observations.len() as f64)
}
