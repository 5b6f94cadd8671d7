use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim, WriterBuilder};
use ndarray::{Array1, Array2, Array3, ArrayD, Axis, Ix2, Ix3, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpyExt, WriteNpyExt};
use tracing::debug;

use crate::clustering::ClusterTable;
use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;

/// Something that can be turned into a dense matrix: either a sparse matrix
/// already in memory or a file on disk.
#[derive(Debug, Clone)]
pub enum MatrixSource {
    Sparse(CsrMatrix),
    Path(PathBuf),
}

impl From<CsrMatrix> for MatrixSource {
    fn from(matrix: CsrMatrix) -> Self {
        MatrixSource::Sparse(matrix)
    }
}

impl From<PathBuf> for MatrixSource {
    fn from(path: PathBuf) -> Self {
        MatrixSource::Path(path)
    }
}

impl From<&Path> for MatrixSource {
    fn from(path: &Path) -> Self {
        MatrixSource::Path(path.to_path_buf())
    }
}

pub fn load(source: impl Into<MatrixSource>) -> Result<Array2<f64>> {
    match source.into() {
        MatrixSource::Sparse(matrix) => Ok(matrix.to_dense()),
        MatrixSource::Path(path) => load_matrix(path),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Npy,
    Npz,
    Text(u8),
}

fn format_of(path: &Path) -> Result<Format> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("npy") => Ok(Format::Npy),
        Some("npz") => Ok(Format::Npz),
        Some("csv") => Ok(Format::Text(b',')),
        Some("txt") | Some("dat") => Ok(Format::Text(b' ')),
        _ => Err(Error::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::io(path, e))
}

fn create(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| Error::io(path, e))
}

/// Load a dense 2-D matrix. `.npz` archives holding a SciPy CSR matrix are
/// densified.
pub fn load_matrix<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let matrix = match format_of(path)? {
        Format::Npy => into_2d(path, read_npy_widened(path)?)?,
        Format::Npz => {
            let mut npz = NpzReader::new(open(path)?)?;
            let names = npz.names()?;
            if is_sparse_archive(&names) {
                load(read_sparse(path, &mut npz, &names)?)?
            } else {
                let first = names.first().ok_or_else(|| Error::MissingEntry {
                    path: path.to_path_buf(),
                    name: "<any>".into(),
                })?;
                into_2d(path, npz_widened(&mut npz, first)?)?
            }
        }
        Format::Text(delimiter) => read_text(path, delimiter)?,
    };

    debug!(path = %path.display(), shape = ?matrix.dim(), "loaded matrix");
    Ok(matrix)
}

/// Load a replicate/frame stack. A 4-D `.npy` holds (replicate, frame, row,
/// col); a 3-D one is a single replicate. A `.npz` archive holds one 3-D
/// array per replicate.
pub fn load_replicates<P: AsRef<Path>>(path: P) -> Result<Vec<Array3<f64>>> {
    let path = path.as_ref();
    let replicates = match format_of(path)? {
        Format::Npy => {
            let array = read_npy_widened(path)?;
            match array.ndim() {
                3 => vec![array.into_dimensionality::<Ix3>()?],
                4 => array
                    .axis_iter(Axis(0))
                    .map(|replicate| Ok(replicate.to_owned().into_dimensionality::<Ix3>()?))
                    .collect::<Result<Vec<_>>>()?,
                ndim => {
                    return Err(Error::Dimensionality {
                        path: path.to_path_buf(),
                        expected: "3-D or 4-D",
                        ndim,
                    })
                }
            }
        }
        Format::Npz => {
            let mut npz = NpzReader::new(open(path)?)?;
            let names = npz.names()?;
            names
                .iter()
                .map(|name| {
                    let array = npz_widened(&mut npz, name)?;
                    into_3d(path, array)
                })
                .collect::<Result<Vec<_>>>()?
        }
        Format::Text(_) => {
            return Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    };

    debug!(
        path = %path.display(),
        replicates = replicates.len(),
        "loaded replicate stack"
    );
    Ok(replicates)
}

/// Write a dense matrix, choosing the format from the extension.
pub fn write_matrix<P: AsRef<Path>>(path: P, matrix: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    match format_of(path)? {
        Format::Npy => {
            let writer = BufWriter::new(create(path)?);
            matrix.write_npy(writer)?;
        }
        Format::Text(delimiter) => write_text(path, delimiter, matrix)?,
        Format::Npz => {
            let mut npz = NpzWriter::new(create(path)?);
            npz.add_array("matrix", matrix)?;
            npz.finish()?;
        }
    }
    debug!(path = %path.display(), shape = ?matrix.dim(), "wrote matrix");
    Ok(())
}

fn into_2d(path: &Path, array: ArrayD<f64>) -> Result<Array2<f64>> {
    let ndim = array.ndim();
    array
        .into_dimensionality::<Ix2>()
        .map_err(|_| Error::Dimensionality {
            path: path.to_path_buf(),
            expected: "2-D",
            ndim,
        })
}

fn into_3d(path: &Path, array: ArrayD<f64>) -> Result<Array3<f64>> {
    let ndim = array.ndim();
    array
        .into_dimensionality::<Ix3>()
        .map_err(|_| Error::Dimensionality {
            path: path.to_path_buf(),
            expected: "3-D",
            ndim,
        })
}

/// Read an `.npy` file of any supported numeric type as `f64`.
fn read_npy_widened(path: &Path) -> Result<ArrayD<f64>> {
    let mut bytes = Vec::new();
    BufReader::new(open(path)?)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::io(path, e))?;

    let first_err = match ArrayD::<f64>::read_npy(&bytes[..]) {
        Ok(array) => return Ok(array),
        Err(err) => err,
    };
    if let Ok(array) = ArrayD::<f32>::read_npy(&bytes[..]) {
        return Ok(array.mapv(f64::from));
    }
    if let Ok(array) = ArrayD::<i64>::read_npy(&bytes[..]) {
        return Ok(array.mapv(|v| v as f64));
    }
    if let Ok(array) = ArrayD::<i32>::read_npy(&bytes[..]) {
        return Ok(array.mapv(f64::from));
    }
    Err(first_err.into())
}

/// Read an `.npz` entry of any supported numeric type as `f64`.
fn npz_widened<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> Result<ArrayD<f64>> {
    let first_err = match npz.by_name::<OwnedRepr<f64>, IxDyn>(name) {
        Ok(array) => return Ok(array),
        Err(err) => err,
    };
    if let Ok(array) = npz.by_name::<OwnedRepr<f32>, IxDyn>(name) {
        return Ok(array.mapv(f64::from));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i64>, IxDyn>(name) {
        return Ok(array.mapv(|v| v as f64));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i32>, IxDyn>(name) {
        return Ok(array.mapv(f64::from));
    }
    Err(first_err.into())
}

/// Archive entry called `stem`, with or without the `.npy` suffix.
fn entry<'a>(names: &'a [String], stem: &str) -> Option<&'a str> {
    names
        .iter()
        .find(|name| name.as_str() == stem || name.strip_suffix(".npy") == Some(stem))
        .map(String::as_str)
}

fn is_sparse_archive(names: &[String]) -> bool {
    ["indptr", "indices", "data", "shape"]
        .iter()
        .all(|stem| entry(names, stem).is_some())
}

fn read_sparse<R: Read + Seek>(
    path: &Path,
    npz: &mut NpzReader<R>,
    names: &[String],
) -> Result<CsrMatrix> {
    let mut array = |stem: &str| -> Result<Vec<f64>> {
        let name = entry(names, stem).ok_or_else(|| Error::MissingEntry {
            path: path.to_path_buf(),
            name: stem.to_string(),
        })?;
        Ok(npz_widened(&mut *npz, name)?.iter().copied().collect())
    };

    let shape = array("shape")?;
    let indptr = array("indptr")?;
    let indices = array("indices")?;
    let data = array("data")?;

    if shape.len() != 2 {
        return Err(Error::Sparse(format!("expected a 2-D shape, got {shape:?}")));
    }
    let to_usize =
        |values: Vec<f64>| -> Vec<usize> { values.into_iter().map(|v| v as usize).collect() };

    let matrix = CsrMatrix::new(
        (shape[0] as usize, shape[1] as usize),
        to_usize(indptr),
        to_usize(indices),
        data,
    )?;
    debug!(shape = ?matrix.shape(), nnz = matrix.nnz(), "read sparse matrix");
    Ok(matrix)
}

/// One text record: 1-based line number and its non-empty fields.
type Record = (usize, Vec<String>);

fn csv_records(path: &Path, delimiter: u8) -> Result<Vec<Record>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(BufReader::new(open(path)?));

    rdr.records()
        .enumerate()
        .map(|(line, result)| -> Result<Record> {
            let record = result?;
            let fields = record
                .iter()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            Ok((line + 1, fields))
        })
        .collect()
}

/// Space- or tab-separated values as written by `numpy.savetxt`; `#` starts
/// a comment anywhere on the line.
fn whitespace_records(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(content
        .lines()
        .enumerate()
        .map(|(line, text)| {
            let data = text.split('#').next().unwrap_or_default();
            (line + 1, data.split_whitespace().map(str::to_string).collect())
        })
        .collect())
}

fn read_text(path: &Path, delimiter: u8) -> Result<Array2<f64>> {
    let records = if delimiter == b' ' {
        whitespace_records(path)?
    } else {
        csv_records(path, delimiter)?
    };

    let mut rows: Vec<Vec<f64>> = vec![];

    for (line, fields) in records {
        let row = fields
            .iter()
            .map(|s| {
                s.parse::<f64>().map_err(|e| Error::Parse {
                    path: path.to_path_buf(),
                    line,
                    message: format!("{s:?}: {e}"),
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        if row.is_empty() {
            continue;
        }
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(Error::Parse {
                    path: path.to_path_buf(),
                    line,
                    message: format!("expected {} values, found {}", first.len(), row.len()),
                });
            }
        }
        rows.push(row);
    }

    let ncols = rows.first().map_or(0, Vec::len);
    let nrows = rows.len();
    Ok(Array2::from_shape_vec(
        (nrows, ncols),
        rows.into_iter().flatten().collect(),
    )?)
}

fn write_text(path: &Path, delimiter: u8, matrix: &Array2<f64>) -> Result<()> {
    let file = create(path)?;
    let mut wtr = WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(BufWriter::new(file));

    for row in matrix.rows() {
        wtr.write_record(row.iter().map(|v| v.to_string()))?;
    }

    wtr.flush().map_err(|e| Error::io(path, e))?;
    Ok(())
}

fn table_entry(replicate: usize, field: &str) -> String {
    format!("replicate_{replicate}_{field}")
}

/// Save one cluster table per replicate into an `.npz` archive.
pub fn save_cluster_tables<P: AsRef<Path>>(path: P, tables: &[ClusterTable]) -> Result<()> {
    let path = path.as_ref();
    let mut npz = NpzWriter::new(create(path)?);

    for (replicate, table) in tables.iter().enumerate() {
        let assignments: Array1<i64> = table.assignments.iter().map(|&l| l as i64).collect();
        npz.add_array(table_entry(replicate, "centroids"), &table.to_array())?;
        npz.add_array(table_entry(replicate, "labels"), &assignments)?;
        npz.add_array(
            table_entry(replicate, "distortion"),
            &Array1::from_elem(1, table.distortion),
        )?;
    }
    npz.finish()?;

    debug!(path = %path.display(), replicates = tables.len(), "saved cluster tables");
    Ok(())
}

/// Load the tables written by [`save_cluster_tables`].
pub fn load_cluster_tables<P: AsRef<Path>>(path: P) -> Result<Vec<ClusterTable>> {
    let path = path.as_ref();
    let mut npz = NpzReader::new(open(path)?)?;
    let names = npz.names()?;

    let mut tables = Vec::new();
    for replicate in 0.. {
        let stem = |field: &str| table_entry(replicate, field);
        let Some(centroids) = entry(&names, &stem("centroids")).map(str::to_string) else {
            break;
        };
        let missing = |field: &str| Error::MissingEntry {
            path: path.to_path_buf(),
            name: stem(field),
        };
        let labels = entry(&names, &stem("labels"))
            .map(str::to_string)
            .ok_or_else(|| missing("labels"))?;
        let distortion = entry(&names, &stem("distortion"))
            .map(str::to_string)
            .ok_or_else(|| missing("distortion"))?;

        let table: Array2<f64> = npz.by_name(&centroids)?;
        let assignments: Array1<i64> = npz.by_name(&labels)?;
        let distortion: Array1<f64> = npz.by_name(&distortion)?;

        tables.push(ClusterTable::from_array(
            table,
            assignments.iter().map(|&l| l as usize).collect(),
            distortion.first().copied().unwrap_or(f64::NAN),
        )?);
    }

    Ok(tables)
}
