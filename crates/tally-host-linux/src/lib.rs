//! Linux host capabilities for tally
//!
//! Provides:
//! - Process snapshots via `sysinfo` (threads folded into their process)
//! - Installed-software inventory from the dpkg status database and XDG
//!   desktop entries, each directory an independent source
//! - Current user and machine name resolution

mod identity;
mod inventory;
mod process;

pub use identity::*;
pub use inventory::*;
pub use process::*;
