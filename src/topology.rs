//! Residue topologies used to translate biological residue numbers into the
//! 0-based labels carried by interaction matrices.
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::matrix::ResidueSelection;

#[derive(Debug, Clone, PartialEq)]
pub struct Residue {
    pub name: String,
    pub seq: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub residues: Vec<Residue>,
}

impl Topology {
    /// Load a topology from a `.pdb` or AMBER `.prmtop`/`.parm7` file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let topology = match extension.as_deref() {
            Some("pdb") | Some("ent") => parse_pdb(path, &content)?,
            Some("prmtop") | Some("parm7") | Some("top") => parse_prmtop(path, &content)?,
            _ => {
                return Err(Error::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        debug!(path = %path.display(), residues = topology.residues.len(), "loaded topology");
        Ok(topology)
    }

    /// Matrix labels for the requested 1-based residue numbers: the `seq` of
    /// every residue whose `seq + 1` was requested, in topology order.
    pub fn labels_for(&self, residues: &[i64]) -> Vec<f64> {
        self.residues
            .iter()
            .filter(|residue| residues.contains(&(residue.seq + 1)))
            .map(|residue| {
                debug!(name = %residue.name, seq = residue.seq, "selected residue");
                residue.seq as f64
            })
            .collect()
    }
}

/// Build a selection from 1-based residue numbers. Without a topology the
/// numbers are shifted down by one.
pub fn selection_for(residues: &[i64], topology: Option<&Topology>) -> ResidueSelection {
    let labels = match topology {
        Some(topology) => topology.labels_for(residues),
        None => residues.iter().map(|&r| (r - 1) as f64).collect(),
    };
    ResidueSelection::Labels(labels)
}

fn parse_pdb(path: &Path, content: &str) -> Result<Topology> {
    let mut residues = Vec::new();
    let mut last_key: Option<(char, i64, char)> = None;

    for (index, line) in content.lines().enumerate() {
        if !line.starts_with("ATOM") && !line.starts_with("HETATM") {
            continue;
        }

        let name = line.get(17..20).unwrap_or("").trim();
        let chain = line.get(21..22).and_then(|c| c.chars().next()).unwrap_or(' ');
        let insertion = line.get(26..27).and_then(|c| c.chars().next()).unwrap_or(' ');
        let seq: i64 = line
            .get(22..26)
            .map(str::trim)
            .unwrap_or("")
            .parse()
            .map_err(|_| parse_error(path, index, "invalid residue sequence number"))?;

        let key = (chain, seq, insertion);
        if last_key != Some(key) {
            residues.push(Residue {
                name: name.to_string(),
                seq,
            });
            last_key = Some(key);
        }
    }

    Ok(Topology { residues })
}

fn parse_prmtop(path: &Path, content: &str) -> Result<Topology> {
    let mut lines = content.lines().enumerate();

    let start = lines
        .by_ref()
        .find(|(_, line)| line.trim_end() == "%FLAG RESIDUE_LABEL")
        .map(|(index, _)| index)
        .ok_or_else(|| parse_error(path, 0, "missing %FLAG RESIDUE_LABEL section"))?;

    let mut names = Vec::new();
    for (_, line) in lines {
        if line.starts_with("%FLAG") {
            break;
        }
        if line.starts_with("%FORMAT") || line.starts_with("%COMMENT") {
            continue;
        }
        names.extend(line.split_whitespace().map(str::to_string));
    }

    if names.is_empty() {
        return Err(parse_error(path, start, "RESIDUE_LABEL section is empty"));
    }

    let residues = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| Residue {
            name,
            seq: i as i64 + 1,
        })
        .collect();

    Ok(Topology { residues })
}

fn parse_error(path: &Path, index: usize, message: &str) -> Error {
    Error::Parse {
        path: PathBuf::from(path),
        line: index + 1,
        message: message.to_string(),
    }
}
