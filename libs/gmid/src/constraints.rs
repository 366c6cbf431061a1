//! Design constraints for a sizing run.

use std::path::Path;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::Interpolation;

/// The electrical requirements of a single device.
///
/// Deserialized from TOML. All quantities are in SI units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesignConstraints {
    /// A label used in reports.
    #[serde(default)]
    pub name: Option<ArcStr>,
    /// The required transconductance efficiency gm/ID [1/V].
    pub target_gmid: f64,
    /// The required intrinsic gain gm/gds [dB].
    ///
    /// Channel lengths whose intrinsic gain at the target gm/ID falls short
    /// of this (scaled by [`gain_margin`](Self::gain_margin)) are rejected.
    #[serde(default)]
    pub target_gain_db: Option<f64>,
    /// A multiplier applied to the linear target gain.
    #[serde(default = "default_gain_margin")]
    pub gain_margin: f64,
    /// The initial drain current budget [A].
    pub bias_current: f64,
    /// The drain-source bias [V].
    pub vds: f64,
    /// The external load capacitance [F].
    #[serde(alias = "load_cap_F")]
    pub load_cap: f64,
    /// The required gain-bandwidth product [Hz].
    ///
    /// If unset, no parasitic refinement is performed and the bias current
    /// is used as given.
    #[serde(default, alias = "gbw_target_Hz")]
    pub gbw_target: Option<f64>,
    /// Permissible channel lengths [m], shortest first.
    pub candidate_lengths: Vec<f64>,
    /// The refinement iteration budget.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// The permitted relative GBW error.
    #[serde(default = "default_bandwidth_tolerance")]
    pub bandwidth_tolerance: f64,
    /// Parasitic capacitance per unit gate area [F/m^2].
    #[serde(default)]
    pub cap_per_area: f64,
    /// A table column holding parasitic capacitance per unit width [F/m].
    ///
    /// Takes precedence over [`cap_per_area`](Self::cap_per_area).
    #[serde(default)]
    pub cap_column: Option<ArcStr>,
    /// The interpolation order used for table lookups.
    #[serde(default)]
    pub interpolation: Interpolation,
}

fn default_gain_margin() -> f64 {
    1.0
}

fn default_max_iterations() -> usize {
    50
}

fn default_bandwidth_tolerance() -> f64 {
    0.05
}

impl DesignConstraints {
    /// Creates constraints with no gain or GBW requirement and default
    /// refinement settings.
    pub fn new(
        target_gmid: f64,
        bias_current: f64,
        vds: f64,
        load_cap: f64,
        candidate_lengths: impl Into<Vec<f64>>,
    ) -> Self {
        Self {
            name: None,
            target_gmid,
            target_gain_db: None,
            gain_margin: default_gain_margin(),
            bias_current,
            vds,
            load_cap,
            gbw_target: None,
            candidate_lengths: candidate_lengths.into(),
            max_iterations: default_max_iterations(),
            bandwidth_tolerance: default_bandwidth_tolerance(),
            cap_per_area: 0.0,
            cap_column: None,
            interpolation: Interpolation::default(),
        }
    }

    /// Parses a single design from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let constraints: Self = toml::from_str(s)?;
        constraints.validate()?;
        Ok(constraints)
    }

    /// The minimum acceptable intrinsic gain gm/gds, if a gain is required.
    pub fn min_intrinsic_gain(&self) -> Option<f64> {
        self.target_gain_db
            .map(|db| self.gain_margin * 10f64.powf(db / 20.0))
    }

    /// Checks that the constraints are physically meaningful.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidConstraints(format!(
                    "`{name}` must be positive and finite, found {value}"
                )))
            }
        }

        positive("target_gmid", self.target_gmid)?;
        positive("bias_current", self.bias_current)?;
        positive("gain_margin", self.gain_margin)?;
        positive("bandwidth_tolerance", self.bandwidth_tolerance)?;
        if let Some(gbw) = self.gbw_target {
            positive("gbw_target", gbw)?;
            positive("load_cap", self.load_cap)?;
        } else if !(self.load_cap.is_finite() && self.load_cap >= 0.0) {
            return Err(Error::InvalidConstraints(format!(
                "`load_cap` must be non-negative and finite, found {}",
                self.load_cap
            )));
        }
        if let Some(db) = self.target_gain_db {
            if !db.is_finite() {
                return Err(Error::InvalidConstraints(format!(
                    "`target_gain_db` must be finite, found {db}"
                )));
            }
        }
        if !self.vds.is_finite() {
            return Err(Error::InvalidConstraints(format!(
                "`vds` must be finite, found {}",
                self.vds
            )));
        }
        if !(self.cap_per_area.is_finite() && self.cap_per_area >= 0.0) {
            return Err(Error::InvalidConstraints(format!(
                "`cap_per_area` must be non-negative and finite, found {}",
                self.cap_per_area
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConstraints(
                "`max_iterations` must be at least 1".into(),
            ));
        }
        if self.candidate_lengths.is_empty() {
            return Err(Error::InvalidConstraints(
                "`candidate_lengths` must not be empty".into(),
            ));
        }
        for &l in &self.candidate_lengths {
            positive("candidate_lengths", l)?;
        }
        if self.candidate_lengths.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(Error::InvalidConstraints(
                "`candidate_lengths` must be strictly increasing".into(),
            ));
        }
        Ok(())
    }
}

/// One or more designs read from a constraints file.
///
/// A file holds either a single design at the top level or an array of
/// `[[design]]` tables.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstraintSet {
    designs: Vec<DesignConstraints>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchFile {
    design: Vec<DesignConstraints>,
}

impl ConstraintSet {
    /// Loads and validates a constraints file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("reading design constraints: {:?}", path);
        let s = std::fs::read_to_string(path).map_err(|err| Error::FailedToRead {
            path: path.into(),
            err,
        })?;
        Self::from_toml_str(&s)
    }

    /// Parses and validates a constraints document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let table: toml::Table = s.parse()?;
        let designs = if table.contains_key("design") {
            let batch = toml::Value::Table(table).try_into::<BatchFile>()?;
            batch.design
        } else {
            vec![toml::Value::Table(table).try_into::<DesignConstraints>()?]
        };
        for (i, design) in designs.iter().enumerate() {
            design.validate().map_err(|err| match err {
                Error::InvalidConstraints(msg) => Error::InvalidConstraints(format!(
                    "design {} ({}): {msg}",
                    i + 1,
                    design.name.as_deref().unwrap_or("unnamed")
                )),
                err => err,
            })?;
        }
        Ok(Self { designs })
    }

    /// The designs in file order.
    #[inline]
    pub fn designs(&self) -> &[DesignConstraints] {
        &self.designs
    }

    /// The number of designs.
    #[inline]
    pub fn len(&self) -> usize {
        self.designs.len()
    }

    /// Returns `true` if the set holds no designs.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.designs.is_empty()
    }
}

impl From<Vec<DesignConstraints>> for ConstraintSet {
    fn from(designs: Vec<DesignConstraints>) -> Self {
        Self { designs }
    }
}
