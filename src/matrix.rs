//! Labelled residue-interaction matrices.
//!
//! Row 0 and column 0 carry residue labels (0-based matrix numbering); every
//! other cell is the interaction strength between the residues named by its
//! row and column label. Cell `[0, 0]` is the label marker.
use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Which residues survive [`InteractionMatrix::filter_residues`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResidueSelection {
    All,
    /// 0-based matrix labels to keep, in the order requested.
    Labels(Vec<f64>),
}

impl ResidueSelection {
    /// Labels to keep with the label marker prepended.
    fn with_marker(labels: &[f64]) -> Vec<f64> {
        let mut keep = Vec::with_capacity(labels.len() + 1);
        keep.push(0.0);
        keep.extend_from_slice(labels);
        keep
    }
}

/// Bounds derived for [`InteractionMatrix::threshold_filter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdBounds {
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ThresholdBounds {
    fn is_outside(&self, value: f64) -> bool {
        value > self.upper || value < self.lower
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    data: Array2<f64>,
}

impl InteractionMatrix {
    pub fn new(data: Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![1, 1],
                actual: data.shape().to_vec(),
            });
        }
        Ok(Self { data })
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn into_array(self) -> Array2<f64> {
        self.data
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn row_labels(&self) -> ArrayView1<'_, f64> {
        self.data.column(0)
    }

    pub fn col_labels(&self) -> ArrayView1<'_, f64> {
        self.data.row(0)
    }

    /// Interaction cells without the label row and column.
    pub fn cells(&self) -> ArrayView2<'_, f64> {
        self.data.slice(s![1.., 1..])
    }

    /// Keep the label marker plus every row and column whose label is in the
    /// selection, preserving their original order.
    pub fn filter_residues(&self, selection: &ResidueSelection) -> Self {
        let labels = match selection {
            ResidueSelection::All => return self.clone(),
            ResidueSelection::Labels(labels) => ResidueSelection::with_marker(labels),
        };

        let rows = matching_indices(self.row_labels(), &labels);
        let cols = matching_indices(self.col_labels(), &labels);
        let data = self.data.select(Axis(0), &rows).select(Axis(1), &cols);

        Self { data }
    }

    /// `other - self` over the interaction cells; the label axes are taken
    /// from `other` unchanged.
    pub fn difference(&self, other: &Self) -> Result<Self> {
        if self.dim() != other.dim() {
            return Err(Error::ShapeMismatch {
                expected: self.data.shape().to_vec(),
                actual: other.data.shape().to_vec(),
            });
        }
        if self.row_labels() != other.row_labels() || self.col_labels() != other.col_labels() {
            warn!("label axes differ between matrices; difference is not residue-aligned");
        }

        let mut data = other.data.clone();
        let delta = &other.cells() - &self.cells();
        data.slice_mut(s![1.., 1..]).assign(&delta);

        Ok(Self { data })
    }

    /// Statistics over the interaction cells and the band outside of which a
    /// value counts as significant.
    ///
    /// With an explicit `threshold` the band is `[-threshold, threshold]`.
    /// Otherwise it is derived from the data as
    /// `[median + min / 2, median + max / 2]`.
    pub fn threshold_bounds(&self, threshold: Option<f64>) -> ThresholdBounds {
        let mut values: Vec<f64> = self.cells().iter().copied().collect();
        let median = median(&mut values);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let (lower, upper) = match threshold {
            Some(t) => (-t, t),
            None => (median + 0.5 * min, median + 0.5 * max),
        };

        ThresholdBounds {
            median,
            min,
            max,
            lower,
            upper,
        }
    }

    /// Keep the label axes plus every row and column holding at least one
    /// interaction outside the bounds from [`Self::threshold_bounds`].
    pub fn threshold_filter(&self, threshold: Option<f64>) -> (Self, ThresholdBounds) {
        let bounds = self.threshold_bounds(threshold);
        info!(
            median = bounds.median,
            min = bounds.min,
            max = bounds.max,
            lower = bounds.lower,
            upper = bounds.upper,
            explicit = threshold.is_some(),
            "threshold bounds"
        );

        let cells = self.cells();
        let significant = |lane: ArrayView1<f64>| lane.iter().any(|&v| bounds.is_outside(v));

        let rows: Vec<usize> = std::iter::once(0)
            .chain(
                cells
                    .axis_iter(Axis(0))
                    .enumerate()
                    .filter(|(_, row)| significant(row.view()))
                    .map(|(i, _)| i + 1),
            )
            .collect();
        let cols: Vec<usize> = std::iter::once(0)
            .chain(
                cells
                    .axis_iter(Axis(1))
                    .enumerate()
                    .filter(|(_, col)| significant(col.view()))
                    .map(|(j, _)| j + 1),
            )
            .collect();

        info!(
            kept_rows = rows.len() - 1,
            kept_cols = cols.len() - 1,
            "threshold filter applied"
        );

        let data = self.data.select(Axis(0), &rows).select(Axis(1), &cols);
        (Self { data }, bounds)
    }
}

fn matching_indices(labels: ArrayView1<f64>, keep: &[f64]) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter(|(_, label)| keep.contains(label))
        .map(|(i, _)| i)
        .collect()
}

/// Median with the mean of the two middle values for even counts. NaN for an
/// empty slice. Sorts `values` in place.
fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
