//! N-dimensional rectilinear grids with bounds-checked interpolation.
//!
//! A [`Grid`] stores one value per point of the Cartesian product of its
//! [`Axis`] samples. Values are laid out in row-major order: the last axis
//! varies fastest.
//!
//! Queries are never extrapolated. A coordinate outside an axis's sampled
//! range produces [`Error::OutOfRange`].

use std::cmp::Ordering;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Relative slack used when matching a coordinate to an axis sample.
///
/// A coordinate within `SNAP_RTOL` times the axis span of a sample is
/// treated as that sample. This absorbs decimal round-off in table files
/// and constraint documents; it is not a clamping tolerance.
pub const SNAP_RTOL: f64 = 1e-9;

/// The interpolation order used between grid samples.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Multilinear interpolation between the corners of the enclosing cell.
    ///
    /// Selected by default.
    #[default]
    Linear,
    /// The value of the nearest sample.
    ///
    /// A coordinate within [`SNAP_RTOL`] of a cell midpoint counts as a tie
    /// and resolves to the lower sample.
    Nearest,
}

/// A named, strictly increasing sequence of sample coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Axis {
    name: ArcStr,
    samples: Vec<f64>,
}

/// The position of a coordinate along an [`Axis`].
///
/// The coordinate lies `frac` of the way from sample `lo` to sample `lo + 1`.
/// A `frac` of exactly zero means the coordinate is sample `lo`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bracket {
    /// Index of the sample at or below the coordinate.
    pub lo: usize,
    /// Fractional position within the cell, in `[0, 1)`.
    pub frac: f64,
}

impl Axis {
    /// Creates a new axis.
    ///
    /// Returns [`Error::InvalidGrid`] if `samples` is empty, contains a
    /// non-finite value, or is not strictly increasing.
    pub fn new(name: impl Into<ArcStr>, samples: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if samples.is_empty() {
            return Err(Error::InvalidGrid(format!("axis `{name}` has no samples")));
        }
        if let Some(x) = samples.iter().find(|x| !x.is_finite()) {
            return Err(Error::InvalidGrid(format!(
                "axis `{name}` has a non-finite sample {x}"
            )));
        }
        if let Some(pair) = samples.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(Error::InvalidGrid(format!(
                "axis `{name}` is not strictly increasing at {} -> {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { name, samples })
    }

    /// The name of the axis.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The sample coordinates, in increasing order.
    #[inline]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// The number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always `false`; axes have at least one sample.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The smallest sample.
    #[inline]
    pub fn min(&self) -> f64 {
        self.samples[0]
    }

    /// The largest sample.
    #[inline]
    pub fn max(&self) -> f64 {
        self.samples[self.samples.len() - 1]
    }

    fn slack(&self) -> f64 {
        let span = self.max() - self.min();
        if span > 0.0 {
            SNAP_RTOL * span
        } else {
            SNAP_RTOL * self.min().abs()
        }
    }

    /// Returns `true` if `x` lies within the sampled range.
    pub fn contains(&self, x: f64) -> bool {
        let slack = self.slack();
        x.is_finite() && x >= self.min() - slack && x <= self.max() + slack
    }

    /// Returns the index of the sample matching `x`, if any.
    pub fn index_of(&self, x: f64) -> Option<usize> {
        let slack = self.slack();
        let hi = self.samples.partition_point(|&s| s < x);
        [hi.checked_sub(1), Some(hi)]
            .into_iter()
            .flatten()
            .filter(|&i| i < self.samples.len())
            .map(|i| (i, (self.samples[i] - x).abs()))
            .filter(|&(_, dist)| dist <= slack)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Locates `x` within the axis.
    ///
    /// Returns [`Error::OutOfRange`] if `x` is not finite or lies outside
    /// the sampled range.
    pub fn locate(&self, x: f64) -> Result<Bracket> {
        if !self.contains(x) {
            return Err(self.out_of_range(x));
        }
        if let Some(lo) = self.index_of(x) {
            return Ok(Bracket { lo, frac: 0.0 });
        }
        // `x` is strictly between two samples, so 1 <= hi < len.
        let hi = self.samples.partition_point(|&s| s < x);
        let lo = hi - 1;
        let frac = (x - self.samples[lo]) / (self.samples[hi] - self.samples[lo]);
        Ok(Bracket { lo, frac })
    }

    pub(crate) fn out_of_range(&self, x: f64) -> Error {
        Error::OutOfRange {
            axis: self.name.clone(),
            value: x,
            min: self.min(),
            max: self.max(),
        }
    }
}

/// Values sampled on the Cartesian product of a set of axes.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    axes: Vec<Axis>,
    strides: Vec<usize>,
    values: Vec<f64>,
}

impl Grid {
    /// Creates a grid from its axes and row-major values.
    ///
    /// Returns [`Error::InvalidGrid`] if there are no axes or if the number
    /// of values does not match the product of the axis lengths.
    pub fn new(axes: Vec<Axis>, values: Vec<f64>) -> Result<Self> {
        if axes.is_empty() {
            return Err(Error::InvalidGrid("a grid needs at least one axis".into()));
        }
        let expected: usize = axes.iter().map(Axis::len).product();
        if values.len() != expected {
            return Err(Error::InvalidGrid(format!(
                "expected {expected} values for axes {}, found {}",
                axes.iter()
                    .map(|axis| format!("{}[{}]", axis.name(), axis.len()))
                    .collect::<Vec<_>>()
                    .join(" x "),
                values.len()
            )));
        }
        let mut strides = vec![1; axes.len()];
        for i in (0..axes.len() - 1).rev() {
            strides[i] = strides[i + 1] * axes[i + 1].len();
        }
        Ok(Self {
            axes,
            strides,
            values,
        })
    }

    /// Creates a grid by evaluating `f` at every grid point.
    pub fn from_fn(axes: Vec<Axis>, mut f: impl FnMut(&[f64]) -> f64) -> Result<Self> {
        let total: usize = axes.iter().map(Axis::len).product();
        let mut values = Vec::with_capacity(total);
        let mut point = vec![0.0; axes.len()];
        for flat in 0..total {
            let mut rem = flat;
            for (i, axis) in axes.iter().enumerate().rev() {
                point[i] = axis.samples()[rem % axis.len()];
                rem /= axis.len();
            }
            values.push(f(&point));
        }
        Self::new(axes, values)
    }

    /// The axes of the grid.
    #[inline]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// The number of axes.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    /// The row-major sample values.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The value stored at the given sample indices.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.ndim() {
            return None;
        }
        let mut flat = 0;
        for ((&i, axis), stride) in index.iter().zip(&self.axes).zip(&self.strides) {
            if i >= axis.len() {
                return None;
            }
            flat += i * stride;
        }
        Some(self.values[flat])
    }

    /// The smallest and largest stored values.
    pub fn min_max(&self) -> (f64, f64) {
        self.values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Interpolates the grid at `point`.
    ///
    /// Sample points are returned exactly under either method. Any
    /// coordinate outside its axis fails with [`Error::OutOfRange`].
    pub fn interpolate(&self, point: &[f64], method: Interpolation) -> Result<f64> {
        if point.len() != self.ndim() {
            return Err(Error::InvalidGrid(format!(
                "expected {} coordinates, found {}",
                self.ndim(),
                point.len()
            )));
        }
        let brackets = self
            .axes
            .iter()
            .zip(point)
            .map(|(axis, &x)| axis.locate(x))
            .collect::<Result<Vec<_>>>()?;

        let value = match method {
            Interpolation::Linear => self.multilinear(&brackets),
            Interpolation::Nearest => {
                let flat = brackets
                    .iter()
                    .zip(&self.strides)
                    .map(|(b, stride)| {
                        let i = match b.frac.partial_cmp(&(0.5 + SNAP_RTOL)) {
                            Some(Ordering::Greater) => b.lo + 1,
                            _ => b.lo,
                        };
                        i * stride
                    })
                    .sum::<usize>();
                self.values[flat]
            }
        };
        Ok(value)
    }

    fn multilinear(&self, brackets: &[Bracket]) -> f64 {
        let base: usize = brackets
            .iter()
            .zip(&self.strides)
            .map(|(b, stride)| b.lo * stride)
            .sum();
        // Axes where the coordinate sits on a sample contribute a single corner.
        let active: Vec<usize> = brackets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.frac != 0.0)
            .map(|(i, _)| i)
            .collect();

        let mut acc = 0.0;
        for mask in 0..(1usize << active.len()) {
            let mut weight = 1.0;
            let mut flat = base;
            for (bit, &axis) in active.iter().enumerate() {
                let frac = brackets[axis].frac;
                if mask & (1 << bit) != 0 {
                    weight *= frac;
                    flat += self.strides[axis];
                } else {
                    weight *= 1.0 - frac;
                }
            }
            acc += weight * self.values[flat];
        }
        acc
    }
}
