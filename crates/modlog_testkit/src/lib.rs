//! # modlog Testkit
//!
//! Test utilities for modlog.
//!
//! This crate provides:
//! - Fixtures: CRM-like schemas and fully wired in-memory nodes
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use modlog_testkit::prelude::*;
//!
//! #[test]
//! fn creates_contact() {
//!     let node = TestNode::new();
//!     let ada = node.create_contact("Ada");
//!     assert_eq!(ada.seq().as_u64(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
