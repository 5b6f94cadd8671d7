//! Shaping per-frame matrices into feature vectors and normalizing them.
use ndarray::{s, Array2, Array3, ArrayViewMut1, Axis};
use serde::Deserialize;
use tracing::{debug, warn};

/// How each frame's feature vector is scaled before clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Divide by the frame's standard deviation.
    Whiten,
    /// Subtract the frame's mean, then divide by its standard deviation.
    Zscore,
}

impl Normalization {
    /// Cluster count used when none is configured.
    pub fn default_clusters(self) -> usize {
        match self {
            Normalization::Whiten => 8,
            Normalization::Zscore => 2,
        }
    }

    /// Whether all-zero feature columns are removed before scaling when
    /// nothing else is configured. Z-scoring sees the full frame, zeros
    /// included.
    pub fn drops_zero_columns(self) -> bool {
        matches!(self, Normalization::Whiten)
    }

    /// Normalize every row of `frames` in place.
    pub fn apply(self, frames: &mut Array2<f64>) {
        let degenerate = frames
            .axis_iter_mut(Axis(0))
            .map(|frame| match self {
                Normalization::Whiten => whiten(frame),
                Normalization::Zscore => zscore(frame),
            })
            .filter(|&scaled| !scaled)
            .count();

        if degenerate > 0 {
            warn!(
                frames = degenerate,
                strategy = ?self,
                "frames with zero standard deviation were left unscaled"
            );
        }
    }
}

impl std::fmt::Display for Normalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Normalization::Whiten => write!(f, "whiten"),
            Normalization::Zscore => write!(f, "zscore"),
        }
    }
}

/// Population standard deviation, replaced by 1.0 when it is zero (or the
/// frame is empty) so constant frames are not divided by zero. The flag is
/// false when the replacement happened.
fn scale(frame: &ArrayViewMut1<f64>) -> (f64, bool) {
    if frame.is_empty() {
        return (1.0, false);
    }
    let std = frame.std(0.0);
    if std == 0.0 {
        (1.0, false)
    } else {
        (std, true)
    }
}

fn whiten(mut frame: ArrayViewMut1<f64>) -> bool {
    let (std, scaled) = scale(&frame);
    frame.mapv_inplace(|v| v / std);
    scaled
}

fn zscore(mut frame: ArrayViewMut1<f64>) -> bool {
    let mean = frame.mean().unwrap_or(0.0);
    let (std, scaled) = scale(&frame);
    frame.mapv_inplace(|v| (v - mean) / std);
    scaled
}

/// Flatten a `frames x rows x cols` stack into `frames x (rows * cols)`,
/// row-major within each frame.
pub fn flatten_frames(frames: &Array3<f64>) -> Array2<f64> {
    let (n, rows, cols) = frames.dim();
    let values: Vec<f64> = frames.iter().copied().collect();
    // iter() walks in logical order, so the length always matches
    Array2::from_shape_vec((n, rows * cols), values).unwrap_or_else(|_| Array2::zeros((n, 0)))
}

/// Drop the label row and column from every frame.
pub fn strip_labels(frames: &Array3<f64>) -> Array3<f64> {
    frames.slice(s![.., 1.., 1..]).to_owned()
}

/// Remove the feature columns that are zero in every frame. Returns the
/// reduced matrix and the indices of the columns that were kept.
pub fn drop_zero_columns(frames: &Array2<f64>) -> (Array2<f64>, Vec<usize>) {
    let kept: Vec<usize> = frames
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, column)| column.iter().any(|&v| v != 0.0))
        .map(|(j, _)| j)
        .collect();

    debug!(
        kept = kept.len(),
        dropped = frames.ncols() - kept.len(),
        "removed all-zero feature columns"
    );

    (frames.select(Axis(1), &kept), kept)
}
