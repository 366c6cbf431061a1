//! gm/ID sizing of a single device.
//!
//! Sizing proceeds in three steps:
//!
//! 1. **Length selection.** Candidate channel lengths are tried shortest
//!    first. For each, the VGS achieving the target gm/ID at the requested
//!    VDS is found by inverse interpolation. Lengths whose intrinsic gain at
//!    that point is below the required minimum, or whose current density is
//!    not positive, are rejected.
//! 2. **Width.** The width follows from the current density:
//!    `W = ID / JDS(L, VGS, VDS)`.
//! 3. **Refinement.** The parasitic capacitance of the device is added to the
//!    load and the resulting gain-bandwidth product `gm / (2π C)` is compared
//!    to the target. The current budget is rescaled and the width recomputed
//!    until the error is within tolerance or the iteration budget runs out.

use std::f64::consts::PI;
use std::fmt::Display;

use arcstr::ArcStr;
use serde::Serialize;

use crate::constraints::DesignConstraints;
use crate::error::{Error, Result};
use crate::table::{OperatingPoint, TechTable, GM_GDS, GM_ID, JDS};

/// The sized device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SizingResult {
    /// The name of the design, if one was given.
    pub name: Option<ArcStr>,
    /// Channel length [m].
    pub l: f64,
    /// Channel width [m].
    pub w: f64,
    /// Drain current [A].
    pub id: f64,
    /// Gate-source voltage [V].
    pub vgs: f64,
    /// Drain-source voltage [V].
    pub vds: f64,
    /// Transconductance [S].
    pub gm: f64,
    /// Output conductance [S].
    pub gds: f64,
    /// Intrinsic gain gm/gds.
    pub intrinsic_gain: f64,
    /// The gm/ID of the device at its operating point [1/V].
    pub gmid_achieved: f64,
    /// Drain current density [A/m].
    pub jds: f64,
    /// Parasitic capacitance of the device [F].
    pub parasitic_cap: f64,
    /// Gain-bandwidth product into the load and parasitic capacitance [Hz].
    pub gbw: f64,
    /// The number of refinement iterations performed.
    pub iterations: usize,
}

/// The outcome of the parasitic-aware refinement loop.
#[derive(Clone, Debug, PartialEq)]
pub enum Refinement {
    /// The GBW error reached the configured tolerance.
    Converged(SizingResult),
    /// The iteration budget was exhausted first.
    MaxIterationsExceeded {
        /// The number of iterations performed.
        iterations: usize,
        /// The signed relative GBW error of the last iteration.
        gbw_error: f64,
    },
}

/// A device bias point chosen by length selection.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct DevicePoint {
    /// The operating point.
    pub op: OperatingPoint,
    /// gm/ID at the operating point [1/V].
    pub gmid: f64,
    /// Intrinsic gain gm/gds at the operating point.
    pub gm_gds: f64,
    /// Drain current density at the operating point [A/m].
    pub jds: f64,
}

/// A candidate channel length that was ruled out.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    /// The candidate length [m].
    pub length: f64,
    /// Why it was ruled out.
    pub reason: RejectReason,
}

/// Why a candidate channel length was ruled out.
#[derive(Clone, Debug, PartialEq)]
pub enum RejectReason {
    /// No sampled VGS reaches the target gm/ID.
    GmIdNotReached,
    /// The intrinsic gain at the target gm/ID is too low.
    InsufficientGain {
        /// gm/gds at the target gm/ID.
        gain: f64,
        /// The required minimum gm/gds.
        required: f64,
    },
    /// The device carries no current at the target gm/ID.
    NonPositiveCurrentDensity {
        /// The interpolated current density [A/m].
        jds: f64,
    },
}

impl Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L = {:e}: ", self.length)?;
        match self.reason {
            RejectReason::GmIdNotReached => write!(f, "target gm/ID is not reached"),
            RejectReason::InsufficientGain { gain, required } => {
                write!(f, "intrinsic gain {gain:.2} is below {required:.2}")
            }
            RejectReason::NonPositiveCurrentDensity { jds } => {
                write!(f, "current density {jds:e} A/m is not positive")
            }
        }
    }
}

/// Sizes one device against a borrowed technology table.
#[derive(Copy, Clone, Debug)]
pub struct Sizer<'a> {
    table: &'a TechTable,
    constraints: &'a DesignConstraints,
}

impl<'a> Sizer<'a> {
    /// Creates a sizer, checking that the constraints are valid and that the
    /// table has the columns sizing needs.
    pub fn new(table: &'a TechTable, constraints: &'a DesignConstraints) -> Result<Self> {
        constraints.validate()?;
        for param in [GM_ID, GM_GDS, JDS] {
            table.grid(param)?;
        }
        if let Some(col) = &constraints.cap_column {
            table.grid(col)?;
        }
        Ok(Self { table, constraints })
    }

    /// Checks that the requested operating region is inside the table and
    /// that the target gm/ID is reachable for some sampled (L, VDS).
    pub fn check_feasible(&self) -> Result<()> {
        let c = self.constraints;
        self.table.vds().locate(c.vds)?;
        for &l in &c.candidate_lengths {
            self.table.lengths().locate(l)?;
        }
        if !self.table.spans(GM_ID, c.target_gmid)? {
            let (min, max) = self.table.range(GM_ID)?;
            return Err(Error::InfeasibleConstraint {
                reason: format!(
                    "target gm/ID {} is outside the tabulated range [{min}, {max}] of `{}`",
                    c.target_gmid,
                    self.table.name()
                ),
                rejected: Vec::new(),
            });
        }
        Ok(())
    }

    /// Picks the shortest candidate length that reaches the target gm/ID
    /// with sufficient intrinsic gain.
    pub fn select_length(&self) -> Result<DevicePoint> {
        let c = self.constraints;
        let method = c.interpolation;
        let min_gain = c.min_intrinsic_gain();
        let mut rejected = Vec::new();

        for &l in &c.candidate_lengths {
            let Some(vgs) = self
                .table
                .solve_vgs(GM_ID, l, c.vds, c.target_gmid, method)?
            else {
                tracing::warn!(length = l, "rejecting channel length: target gm/ID not reached");
                rejected.push(Rejection {
                    length: l,
                    reason: RejectReason::GmIdNotReached,
                });
                continue;
            };
            let op = OperatingPoint { l, vgs, vds: c.vds };
            let gm_gds = self.table.interpolate(GM_GDS, op, method)?;
            if let Some(required) = min_gain {
                if gm_gds < required {
                    tracing::warn!(
                        length = l,
                        gain = gm_gds,
                        required,
                        "rejecting channel length: insufficient intrinsic gain"
                    );
                    rejected.push(Rejection {
                        length: l,
                        reason: RejectReason::InsufficientGain {
                            gain: gm_gds,
                            required,
                        },
                    });
                    continue;
                }
            }
            let jds = self.table.interpolate(JDS, op, method)?;
            if jds <= 0.0 {
                tracing::warn!(length = l, jds, "rejecting channel length: no drain current");
                rejected.push(Rejection {
                    length: l,
                    reason: RejectReason::NonPositiveCurrentDensity { jds },
                });
                continue;
            }
            let gmid = self.table.interpolate(GM_ID, op, method)?;
            tracing::debug!(%op, gmid, gm_gds, jds, "selected channel length");
            return Ok(DevicePoint {
                op,
                gmid,
                gm_gds,
                jds,
            });
        }

        Err(Error::InfeasibleConstraint {
            reason: format!(
                "no candidate channel length reaches gm/ID = {} at VDS = {}{}",
                c.target_gmid,
                c.vds,
                min_gain
                    .map(|g| format!(" with gm/gds >= {g:.2}"))
                    .unwrap_or_default()
            ),
            rejected,
        })
    }

    /// Sizes the device at `point` for drain current `id`.
    pub fn evaluate(
        &self,
        point: &DevicePoint,
        id: f64,
        iterations: usize,
    ) -> Result<SizingResult> {
        let c = self.constraints;
        let w = id / point.jds;
        let parasitic_cap = match &c.cap_column {
            Some(col) => w * self.table.interpolate(col, point.op, c.interpolation)?,
            None => c.cap_per_area * w * point.op.l,
        };
        let gm = point.gmid * id;
        let gbw = gm / (2. * PI * (c.load_cap + parasitic_cap));
        Ok(SizingResult {
            name: c.name.clone(),
            l: point.op.l,
            w,
            id,
            vgs: point.op.vgs,
            vds: point.op.vds,
            gm,
            gds: gm / point.gm_gds,
            intrinsic_gain: point.gm_gds,
            gmid_achieved: point.gmid,
            jds: point.jds,
            parasitic_cap,
            gbw,
            iterations,
        })
    }

    /// Runs the parasitic-aware refinement loop at `point`.
    ///
    /// Without a GBW target the bias current is used as given and the loop
    /// converges immediately.
    pub fn refine(&self, point: &DevicePoint) -> Result<Refinement> {
        let c = self.constraints;
        let mut id = c.bias_current;
        let Some(target) = c.gbw_target else {
            return Ok(Refinement::Converged(self.evaluate(point, id, 1)?));
        };

        let mut gbw_error = f64::INFINITY;
        for iteration in 1..=c.max_iterations {
            let result = self.evaluate(point, id, iteration)?;
            gbw_error = (result.gbw - target) / target;
            tracing::debug!(
                iteration,
                id,
                w = result.w,
                parasitic_cap = result.parasitic_cap,
                gbw = result.gbw,
                gbw_error,
                "refinement step"
            );
            if gbw_error.abs() <= c.bandwidth_tolerance {
                return Ok(Refinement::Converged(result));
            }
            // gm scales with ID at fixed gm/ID.
            id *= target / result.gbw;
        }

        Ok(Refinement::MaxIterationsExceeded {
            iterations: c.max_iterations,
            gbw_error,
        })
    }

    /// Sizes the device.
    pub fn solve(&self) -> Result<SizingResult> {
        self.check_feasible()?;
        let point = self.select_length()?;
        match self.refine(&point)? {
            Refinement::Converged(result) => {
                tracing::info!(
                    name = ?result.name,
                    l = result.l,
                    w = result.w,
                    id = result.id,
                    iterations = result.iterations,
                    "sizing converged"
                );
                Ok(result)
            }
            Refinement::MaxIterationsExceeded {
                iterations,
                gbw_error,
            } => Err(Error::Convergence {
                iterations,
                gbw_error,
            }),
        }
    }
}

/// Sizes one device.
pub fn size(table: &TechTable, constraints: &DesignConstraints) -> Result<SizingResult> {
    Sizer::new(table, constraints)?.solve()
}

/// Sizes each design independently against the same table.
///
/// A failing design does not affect the others.
pub fn size_all<'a>(
    table: &TechTable,
    designs: impl IntoIterator<Item = &'a DesignConstraints>,
) -> Vec<Result<SizingResult>> {
    designs
        .into_iter()
        .map(|constraints| size(table, constraints))
        .collect()
}
