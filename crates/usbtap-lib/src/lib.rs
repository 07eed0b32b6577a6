//! usbtap: scan, select, open and poll a USB device, always closing it again.

pub mod config;
pub mod error;
pub mod finalizer;
pub mod native;
pub mod read_loop;
pub mod record;
pub mod ring;
pub mod runner;
pub mod select;
pub mod session;
pub mod status;
pub mod transport;

pub use error::UsbtapError;
