//! The end-to-end stages: pairing two interaction datasets for comparison and
//! turning a replicate/frame stack into normalized feature matrices ready for
//! k-means.
use ndarray::{Array2, Array3, Axis};
use tracing::{debug, info};

use crate::clustering::{self, ClusterTable, ClusteringConfig};
use crate::error::{Error, Result};
use crate::matrix::{InteractionMatrix, ResidueSelection};
use crate::normalize::{self, Normalization};

/// Two datasets restricted to the same residues, and their difference.
#[derive(Debug, Clone)]
pub struct FilteredPair {
    pub first: InteractionMatrix,
    pub second: InteractionMatrix,
    pub difference: InteractionMatrix,
}

impl FilteredPair {
    pub fn new(
        first: &InteractionMatrix,
        second: &InteractionMatrix,
        selection: &ResidueSelection,
    ) -> Result<Self> {
        let first = first.filter_residues(selection);
        let second = second.filter_residues(selection);
        let difference = first.difference(&second)?;

        debug!(shape = ?difference.dim(), "computed filtered difference");
        Ok(Self {
            first,
            second,
            difference,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Frames carry the residue label row and column.
    pub labeled: bool,
    /// Only honoured for labelled frames.
    pub selection: ResidueSelection,
    pub drop_zero_columns: bool,
    pub normalization: Normalization,
}

impl PrepareOptions {
    /// Unlabelled frames, every residue, and the zero-column handling that
    /// goes with `normalization`.
    pub fn new(normalization: Normalization) -> Self {
        Self {
            labeled: false,
            selection: ResidueSelection::All,
            drop_zero_columns: normalization.drops_zero_columns(),
            normalization,
        }
    }
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self::new(Normalization::Zscore)
    }
}

/// Shape one replicate (`frames x rows x cols`) into a normalized
/// `frames x features` matrix.
pub fn prepare_replicate(frames: &Array3<f64>, options: &PrepareOptions) -> Result<Array2<f64>> {
    let frames = if options.labeled {
        let filtered = filter_frames(frames, &options.selection)?;
        normalize::strip_labels(&filtered)
    } else {
        if options.selection != ResidueSelection::All {
            return Err(Error::Selection(
                "residue filtering requires frames with label axes".into(),
            ));
        }
        frames.clone()
    };

    let mut features = normalize::flatten_frames(&frames);
    if options.drop_zero_columns {
        features = normalize::drop_zero_columns(&features).0;
    }
    options.normalization.apply(&mut features);

    Ok(features)
}

fn filter_frames(frames: &Array3<f64>, selection: &ResidueSelection) -> Result<Array3<f64>> {
    if *selection == ResidueSelection::All {
        return Ok(frames.clone());
    }

    let filtered = frames
        .axis_iter(Axis(0))
        .map(|frame| {
            let matrix = InteractionMatrix::new(frame.to_owned())?;
            Ok(matrix.filter_residues(selection).into_array())
        })
        .collect::<Result<Vec<Array2<f64>>>>()?;

    let views: Vec<_> = filtered.iter().map(|frame| frame.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

pub fn prepare_replicates(
    replicates: &[Array3<f64>],
    options: &PrepareOptions,
) -> Result<Vec<Array2<f64>>> {
    replicates
        .iter()
        .enumerate()
        .map(|(index, frames)| {
            let features = prepare_replicate(frames, options)?;
            debug!(
                replicate = index,
                frames = features.nrows(),
                features = features.ncols(),
                "prepared replicate"
            );
            Ok(features)
        })
        .collect()
}

/// Prepare and cluster every replicate.
pub fn cluster(
    replicates: &[Array3<f64>],
    options: &PrepareOptions,
    config: &ClusteringConfig,
) -> Result<Vec<ClusterTable>> {
    info!(
        replicates = replicates.len(),
        normalization = %options.normalization,
        clusters = config.clusters,
        "clustering replicates"
    );
    let prepared = prepare_replicates(replicates, options)?;
    clustering::cluster_replicates(&prepared, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    fn labelled_frame(a: f64, b: f64) -> Array2<f64> {
        array![
            [0.0, 1.0, 2.0, 3.0],
            [1.0, 0.0, a, 0.0],
            [2.0, a, 0.0, b],
            [3.0, 0.0, b, 0.0],
        ]
    }

    fn labelled_replicate() -> Array3<f64> {
        let frames = [
            labelled_frame(1.0, 0.0),
            labelled_frame(1.1, 0.0),
            labelled_frame(0.0, 2.0),
            labelled_frame(0.0, 2.1),
        ];
        let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
        ndarray::stack(Axis(0), &views).unwrap()
    }

    #[test]
    fn test_filtered_pair() {
        let first = InteractionMatrix::new(labelled_frame(1.0, 2.0)).unwrap();
        let second = InteractionMatrix::new(labelled_frame(1.5, 1.0)).unwrap();

        let pair = FilteredPair::new(&first, &second, &ResidueSelection::Labels(vec![2.0, 3.0]))
            .unwrap();

        assert_eq!(pair.first.dim(), (3, 3));
        let expected = array![[0.0, 2.0, 3.0], [2.0, 0.0, -1.0], [3.0, -1.0, 0.0]];
        assert_eq!(pair.difference.as_array(), &expected);
    }

    #[test]
    fn test_prepare_labelled_replicate() {
        let options = PrepareOptions {
            labeled: true,
            ..PrepareOptions::new(Normalization::Whiten)
        };

        let features = prepare_replicate(&labelled_replicate(), &options).unwrap();

        // 3x3 cells, diagonal plus the (1,3)/(3,1) pair are always zero
        assert_eq!(features.dim(), (4, 4));
    }

    #[test]
    fn test_whiten_keeps_zero_columns_when_asked() {
        let options = PrepareOptions {
            labeled: true,
            drop_zero_columns: false,
            ..PrepareOptions::new(Normalization::Whiten)
        };

        let features = prepare_replicate(&labelled_replicate(), &options).unwrap();
        assert_eq!(features.dim(), (4, 9));
    }

    #[test]
    fn test_zscore_keeps_zero_columns_by_default() {
        let frames = Array3::from_shape_vec((2, 1, 3), vec![0.0, 1.0, 2.0, 0.0, 3.0, 5.0]).unwrap();

        let features = prepare_replicate(&frames, &PrepareOptions::default()).unwrap();

        assert_eq!(features.dim(), (2, 3));
        let expected = [-1.5f64.sqrt(), 0.0, 1.5f64.sqrt()];
        for (value, expected) in features.row(0).iter().zip(expected) {
            assert!((value - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zscore_drops_zero_columns_when_asked() {
        let frames = Array3::from_shape_vec((2, 1, 3), vec![0.0, 1.0, 2.0, 0.0, 3.0, 5.0]).unwrap();
        let options = PrepareOptions {
            drop_zero_columns: true,
            ..PrepareOptions::default()
        };

        let features = prepare_replicate(&frames, &options).unwrap();

        assert_eq!(features.dim(), (2, 2));
        assert_eq!(features.row(0).to_vec(), vec![-1.0, 1.0]);
    }

    #[test]
    fn test_prepare_filters_labelled_frames() {
        let options = PrepareOptions {
            labeled: true,
            selection: ResidueSelection::Labels(vec![1.0, 2.0]),
            drop_zero_columns: false,
            ..Default::default()
        };

        let features = prepare_replicate(&labelled_replicate(), &options).unwrap();
        assert_eq!(features.dim(), (4, 4));
    }

    #[test]
    fn test_selection_on_unlabelled_frames_is_rejected() {
        let options = PrepareOptions {
            selection: ResidueSelection::Labels(vec![1.0]),
            ..Default::default()
        };

        let frames = Array3::<f64>::zeros((2, 2, 2));
        assert!(matches!(
            prepare_replicate(&frames, &options),
            Err(Error::Selection(_))
        ));
    }

    #[test]
    fn test_cluster_finds_two_states() {
        let options = PrepareOptions {
            labeled: true,
            ..Default::default()
        };
        let config = ClusteringConfig {
            clusters: 2,
            seed: Some(3),
            ..Default::default()
        };

        let replicates = vec![labelled_replicate(), labelled_replicate()];
        let tables = cluster(&replicates, &options, &config).unwrap();

        assert_eq!(tables.len(), 2);
        for table in tables {
            let a = table.assignments[0];
            let b = table.assignments[2];
            assert_ne!(a, b);
            assert_eq!(table.assignments, vec![a, a, b, b]);
        }
    }
}
