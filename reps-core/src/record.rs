//! Key-value records of training metrics.
//!
//! An agent returns a [`Record`] from every learning phase. It holds scalar
//! diagnostics (e.g. the final temperature) and per-step loss traces, and is
//! consumed by logging code outside of the library.
//!
//! ```rust
//! use reps_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("eta", RecordValue::Scalar(0.8));
//! record.insert("dual_loss", RecordValue::Array1(vec![1.2, 1.1, 1.0]));
//! assert_eq!(record.get_scalar("eta").unwrap(), 0.8);
//! ```
mod base;
pub use base::{Record, RecordValue};
