//! Driver for staged dnf upgrade transactions running inside an
//! isolated execution root.

// SPDX-License-Identifier: Apache-2.0 OR MIT

mod cmdutils;
pub use self::cmdutils::*;
pub mod config;
pub use self::config::DriverConfig;
mod driver;
pub use self::driver::*;
mod errors;
pub use self::errors::*;
mod fsutil;
mod guards;
pub use self::guards::*;
mod nspawn;
pub use self::nspawn::*;
mod overlay;
pub use self::overlay::OverlayRoot;
mod plugin_data;
pub use self::plugin_data::*;
pub mod report;
mod transaction;
pub use self::transaction::*;

#[cfg(test)]
pub(crate) mod testutils;
