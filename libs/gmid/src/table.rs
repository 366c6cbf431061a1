//! Technology lookup tables.
//!
//! A [`TechTable`] holds device parameters sampled over channel length,
//! gate-source voltage and drain-source voltage. Each parameter is a
//! three-dimensional [`Grid`] sharing the same axes.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::{Axis, Grid, Interpolation, SNAP_RTOL};

/// Transconductance efficiency, gm/ID [1/V].
pub const GM_ID: &str = "gm_id";
/// Intrinsic gain, gm/gds.
pub const GM_GDS: &str = "gm_gds";
/// Drain current density, ID/W [A/m].
pub const JDS: &str = "jds";
/// Output conductance per unit drain current, gds/ID [1/V].
pub const GDS_ID: &str = "gds_id";

const AXIS_NAMES: [&str; 3] = ["L", "VGS", "VDS"];

/// A bias point of a single device.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    /// Channel length [m].
    pub l: f64,
    /// Gate-source voltage [V].
    pub vgs: f64,
    /// Drain-source voltage [V].
    pub vds: f64,
}

impl OperatingPoint {
    #[inline]
    fn coords(&self) -> [f64; 3] {
        [self.l, self.vgs, self.vds]
    }
}

impl Display for OperatingPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L={:e}, VGS={}, VDS={}", self.l, self.vgs, self.vds)
    }
}

/// Device parameters sampled over (L, VGS, VDS).
///
/// Tables are immutable once loaded and are passed by reference to the
/// sizing routines, so a single table may serve any number of concurrent
/// solves.
#[derive(Clone, Debug, PartialEq)]
pub struct TechTable {
    name: ArcStr,
    axes: [Axis; 3],
    params: IndexMap<ArcStr, Grid>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Delimiter {
    Comma,
    Whitespace,
}

impl Delimiter {
    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        match self {
            Self::Comma => line.split(',').map(str::trim).collect(),
            Self::Whitespace => line.split_whitespace().collect(),
        }
    }
}

impl FromStr for TechTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse("table", s)
    }
}

impl TechTable {
    /// Loads a table from a file.
    ///
    /// The table is named after the file stem.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("reading technology table: {:?}", path);
        let s = std::fs::read_to_string(path).map_err(|err| Error::FailedToRead {
            path: path.into(),
            err,
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(name, &s)
    }

    /// Parses a table from text.
    ///
    /// The first non-comment line is a header naming the columns. `L`,
    /// `VGS` and `VDS` are required (case-insensitive; `length` is accepted
    /// for `L`). All other columns are device parameters. Fields are
    /// comma-separated if the header contains a comma and
    /// whitespace-separated otherwise. Lines starting with `#` or `*` are
    /// comments.
    ///
    /// Missing `gm_id`, `gm_gds`, `jds` and `gds_id` columns are derived
    /// from `gm`, `gds`, `id` and `w` when those are present.
    pub fn parse(name: impl Into<ArcStr>, input: &str) -> Result<Self> {
        let name = name.into();
        let mut lines = input
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| {
                !line.is_empty() && !line.starts_with('#') && !line.starts_with('*')
            });

        let (header_line, header) = lines
            .next()
            .ok_or_else(|| Error::malformed(None, "table is empty"))?;
        let delimiter = if header.contains(',') {
            Delimiter::Comma
        } else {
            Delimiter::Whitespace
        };
        let columns: Vec<ArcStr> = delimiter
            .split(header)
            .into_iter()
            .map(|col| ArcStr::from(col.to_ascii_lowercase()))
            .collect();
        for (i, col) in columns.iter().enumerate() {
            if col.is_empty() {
                return Err(Error::malformed(
                    Some(header_line),
                    format!("column {} has no name", i + 1),
                ));
            }
            if columns[..i].contains(col) {
                return Err(Error::malformed(
                    Some(header_line),
                    format!("duplicate column `{col}`"),
                ));
            }
        }

        let find = |aliases: &[&str], axis: &str| {
            columns
                .iter()
                .position(|col| aliases.contains(&col.as_str()))
                .ok_or_else(|| {
                    Error::malformed(Some(header_line), format!("missing column `{axis}`"))
                })
        };
        let axis_cols = [
            find(&["l", "length"], "L")?,
            find(&["vgs"], "VGS")?,
            find(&["vds"], "VDS")?,
        ];
        let param_cols: Vec<usize> = (0..columns.len())
            .filter(|i| !axis_cols.contains(i))
            .collect();
        if param_cols.is_empty() {
            return Err(Error::malformed(Some(header_line), "no device parameter columns"));
        }

        let mut rows = Vec::new();
        for (line, text) in lines {
            let fields = delimiter.split(text);
            if fields.len() != columns.len() {
                return Err(Error::malformed(
                    Some(line),
                    format!("expected {} fields, found {}", columns.len(), fields.len()),
                ));
            }
            let values = fields
                .iter()
                .zip(&columns)
                .map(|(field, col)| {
                    field
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| {
                            Error::malformed(
                                Some(line),
                                format!("non-numeric value `{field}` in column `{col}`"),
                            )
                        })
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push((line, values));
        }
        if rows.is_empty() {
            return Err(Error::malformed(None, "table has no data rows"));
        }

        let axes = [0, 1, 2].map(|i| {
            let samples = distinct(rows.iter().map(|(_, row)| row[axis_cols[i]]));
            Axis::new(AXIS_NAMES[i], samples)
        });
        let [l_axis, vgs_axis, vds_axis] = axes;
        let axes = [l_axis?, vgs_axis?, vds_axis?];

        let shape = [axes[0].len(), axes[1].len(), axes[2].len()];
        let total = shape.iter().product::<usize>();
        let mut filled = vec![false; total];
        let mut values: IndexMap<ArcStr, Vec<f64>> = param_cols
            .iter()
            .map(|&col| (columns[col].clone(), vec![0.0; total]))
            .collect();

        for (line, row) in &rows {
            let mut flat = 0;
            for (axis, &col) in axes.iter().zip(&axis_cols) {
                let i = axis.index_of(row[col]).ok_or_else(|| {
                    Error::malformed(
                        Some(*line),
                        format!("{} = {} does not match a grid sample", axis.name(), row[col]),
                    )
                })?;
                flat = flat * axis.len() + i;
            }
            if filled[flat] {
                return Err(Error::malformed(
                    Some(*line),
                    format!("duplicate sample at {}", point_at(&axes, flat)),
                ));
            }
            filled[flat] = true;
            for &col in &param_cols {
                values[&columns[col]][flat] = row[col];
            }
        }
        if let Some(flat) = filled.iter().position(|f| !f) {
            return Err(Error::malformed(
                None,
                format!("incomplete grid: no sample at {}", point_at(&axes, flat)),
            ));
        }

        for (target, num, den) in [
            (GM_ID, "gm", "id"),
            (GM_GDS, "gm", "gds"),
            (JDS, "id", "w"),
            (GDS_ID, "gds", "id"),
        ] {
            if values.contains_key(target) {
                continue;
            }
            let derived = match (values.get(num), values.get(den)) {
                (Some(num_values), Some(den_values)) => {
                    derive_ratio(&axes, num_values, den_values).map_err(|flat| {
                        Error::malformed(
                            None,
                            format!(
                                "cannot derive `{target}`: `{den}` is zero at {}",
                                point_at(&axes, flat)
                            ),
                        )
                    })?
                }
                _ => continue,
            };
            tracing::debug!("derived `{target}` from `{num}` / `{den}`");
            values.insert(ArcStr::from(target), derived);
        }

        let params = values
            .into_iter()
            .map(|(param, data)| Ok((param, Grid::new(axes.to_vec(), data)?)))
            .collect::<Result<IndexMap<_, _>>>()?;

        tracing::debug!(
            table = %name,
            lengths = shape[0],
            vgs = shape[1],
            vds = shape[2],
            params = params.len(),
            "loaded technology table"
        );

        Ok(Self { name, axes, params })
    }

    /// The name of the table.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The channel-length axis.
    #[inline]
    pub fn lengths(&self) -> &Axis {
        &self.axes[0]
    }

    /// The gate-source voltage axis.
    #[inline]
    pub fn vgs(&self) -> &Axis {
        &self.axes[1]
    }

    /// The drain-source voltage axis.
    #[inline]
    pub fn vds(&self) -> &Axis {
        &self.axes[2]
    }

    /// The names of the parameters in the table, in column order.
    pub fn params(&self) -> impl Iterator<Item = &ArcStr> {
        self.params.keys()
    }

    /// Returns `true` if the table has a parameter named `param`.
    #[inline]
    pub fn has_param(&self, param: &str) -> bool {
        self.params.contains_key(param)
    }

    /// The grid of the given parameter.
    pub fn grid(&self, param: &str) -> Result<&Grid> {
        self.params.get(param).ok_or_else(|| {
            Error::malformed(
                None,
                format!("table `{}` has no `{param}` column", self.name),
            )
        })
    }

    /// The smallest and largest sampled values of a parameter.
    pub fn range(&self, param: &str) -> Result<(f64, f64)> {
        Ok(self.grid(param)?.min_max())
    }

    /// Interpolates `param` at the given operating point.
    pub fn interpolate(
        &self,
        param: &str,
        point: OperatingPoint,
        method: Interpolation,
    ) -> Result<f64> {
        self.grid(param)?.interpolate(&point.coords(), method)
    }

    /// Returns `true` if some sampled (L, VDS) pair spans `target` in `param`
    /// over its VGS samples.
    pub fn spans(&self, param: &str, target: f64) -> Result<bool> {
        let grid = self.grid(param)?;
        for i in 0..self.lengths().len() {
            for k in 0..self.vds().len() {
                let (lo, hi) = (0..self.vgs().len())
                    .filter_map(|j| grid.get(&[i, j, k]))
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v), hi.max(v))
                    });
                if lo <= target && target <= hi {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Finds a VGS at which `param` equals `target` for the given L and VDS.
    ///
    /// VGS cells are scanned from the lowest sample upward and the first
    /// crossing wins, so the answer is deterministic even when the data is
    /// not monotonic. With [`Interpolation::Linear`] the crossing is placed
    /// linearly within its cell. With [`Interpolation::Nearest`] the result
    /// is always a VGS sample: whichever end of the crossing cell lies closer
    /// to `target`, the lower one on a tie.
    ///
    /// Returns `Ok(None)` if `param` never reaches `target`, and
    /// [`Error::OutOfRange`] if L or VDS is outside the table.
    pub fn solve_vgs(
        &self,
        param: &str,
        l: f64,
        vds: f64,
        target: f64,
        method: Interpolation,
    ) -> Result<Option<f64>> {
        let grid = self.grid(param)?;
        let mut prev: Option<(f64, f64)> = None;
        for &vgs in self.vgs().samples() {
            let y = grid.interpolate(&[l, vgs, vds], method)?;
            if y == target {
                return Ok(Some(vgs));
            }
            if let Some((vgs0, y0)) = prev {
                if (y0 < target) != (y < target) {
                    let vgs = match method {
                        Interpolation::Linear => {
                            let frac = (target - y0) / (y - y0);
                            vgs0 + frac * (vgs - vgs0)
                        }
                        Interpolation::Nearest if (y - target).abs() < (y0 - target).abs() => vgs,
                        Interpolation::Nearest => vgs0,
                    };
                    return Ok(Some(vgs));
                }
            }
            prev = Some((vgs, y));
        }
        Ok(None)
    }

    /// Looks up `param` as a function of gm/ID at a fixed L and VDS.
    ///
    /// Fails with [`Error::InfeasibleConstraint`] if `gmid` is not reached.
    pub fn lookup_at_gmid(
        &self,
        param: &str,
        l: f64,
        vds: f64,
        gmid: f64,
        method: Interpolation,
    ) -> Result<f64> {
        let vgs = self
            .solve_vgs(GM_ID, l, vds, gmid, method)?
            .ok_or_else(|| Error::InfeasibleConstraint {
                reason: format!("gm/ID = {gmid} is not reached at L = {l:e}, VDS = {vds}"),
                rejected: Vec::new(),
            })?;
        self.interpolate(param, OperatingPoint { l, vgs, vds }, method)
    }
}

/// Sorted distinct values, merging values within [`SNAP_RTOL`] of each other.
fn distinct(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(f64::total_cmp);
    let span = match (values.first(), values.last()) {
        (Some(first), Some(last)) => last - first,
        _ => return values,
    };
    let slack = SNAP_RTOL * span;
    let mut out: Vec<f64> = Vec::with_capacity(values.len());
    for v in values {
        match out.last() {
            Some(&last) if v - last <= slack => {}
            _ => out.push(v),
        }
    }
    out
}

fn point_at(axes: &[Axis; 3], flat: usize) -> OperatingPoint {
    let k = flat % axes[2].len();
    let j = (flat / axes[2].len()) % axes[1].len();
    let i = flat / (axes[2].len() * axes[1].len());
    OperatingPoint {
        l: axes[0].samples()[i],
        vgs: axes[1].samples()[j],
        vds: axes[2].samples()[k],
    }
}

/// Element-wise `num / den`.
///
/// A zero denominator borrows the ratio from the next VDS sample of the same
/// (L, VGS) row. On failure, returns the flat index that could not be filled.
fn derive_ratio(
    axes: &[Axis; 3],
    num: &[f64],
    den: &[f64],
) -> std::result::Result<Vec<f64>, usize> {
    let n_vds = axes[2].len();
    (0..num.len())
        .map(|flat| {
            if den[flat] != 0.0 {
                return Ok(num[flat] / den[flat]);
            }
            let next = flat + 1;
            if next % n_vds != 0 && den[next] != 0.0 {
                Ok(num[next] / den[next])
            } else {
                Err(flat)
            }
        })
        .collect()
}
