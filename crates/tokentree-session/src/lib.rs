//! Scan session orchestration for tokentree.
//!
//! A [`ScanSession`] owns the shared caches, the rule resolver, the scanner
//! and the single change watcher. Hosts talk to it instead of wiring the
//! lower crates together themselves.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use tokentree_session::{IgnoreMode, ScanSession, ScanStatus};
//!
//! # async fn run() -> Result<(), tokentree_session::ScanError> {
//! let session = ScanSession::with_defaults();
//! let outcome = session.scan(Path::new("."), IgnoreMode::Automatic, &[]).await?;
//!
//! if outcome.status == ScanStatus::Completed {
//!     println!("{} tokens", outcome.total_tokens());
//! }
//! # Ok(())
//! # }
//! ```

mod outcome;
mod session;

pub use outcome::{ScanOutcome, ScanStatus};
pub use session::ScanSession;

pub use tokentree_core::{FileRecord, IgnoreMode, ScanConfig, ScanError, TokenCounter};
pub use tokentree_scan::{IgnoreFilter, RuleOrigin, ScanProgress};
pub use tokentree_watch::WatchEvent;
