//! Transistor sizing with the gm/ID methodology.
//!
//! Device characteristics are read from a precomputed [`TechTable`] that
//! samples transconductance efficiency (gm/ID), intrinsic gain (gm/gds) and
//! drain current density (ID/W) over channel length, gate-source voltage and
//! drain-source voltage. Given a set of [`DesignConstraints`], a [`Sizer`]
//! picks the shortest channel length that meets the gm/ID and gain targets,
//! derives the width from the current density, and iterates on the bias
//! current until the gain-bandwidth product with the device's own parasitic
//! capacitance meets its target.
//!
//! ```no_run
//! use gmid::{ConstraintSet, TechTable};
//!
//! # fn main() -> gmid::Result<()> {
//! let table = TechTable::from_file("nmos.csv")?;
//! let set = ConstraintSet::from_file("ota.toml")?;
//! for result in gmid::size_all(&table, set.designs()) {
//!     let device = result?;
//!     println!("W = {:e} m, L = {:e} m", device.w, device.l);
//! }
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

pub mod constraints;
pub mod error;
pub mod grid;
pub mod sizing;
pub mod table;


pub use constraints::{ConstraintSet, DesignConstraints};
pub use error::{Error, Result};
pub use grid::{Axis, Grid, Interpolation};
pub use sizing::{
    size, size_all, DevicePoint, RejectReason, Refinement, Rejection, Sizer, SizingResult,
};
pub use table::{OperatingPoint, TechTable, GDS_ID, GM_GDS, GM_ID, JDS};
