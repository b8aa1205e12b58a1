//! Access control for sandboxed filesystem tools.
//!
//! Every filesystem-touching request passes through
//! [`AccessPolicy::authorize`], which resolves the untrusted path to its
//! canonical, symlink-free form, requires it to lie inside one of the allowed
//! directories configured at startup, and rejects it if a gitignore-style
//! ignore rule matches. Only the resulting [`AuthorizedPath`] may be handed
//! to the I/O layer ([`GuardedFs`]).

pub mod config;
pub mod error;
pub mod operation;
pub mod ops;
pub mod pattern;
pub mod policy;
pub mod resolve;
pub mod roots;

pub use config::PolicyConfig;
pub use error::{ConfigError, Denial, DenialReason, OpError};
pub use operation::OperationKind;
pub use ops::GuardedFs;
pub use pattern::IgnoreMatcher;
pub use policy::{AccessPolicy, AuthorizedPath};
pub use resolve::PathResolver;
pub use roots::{AllowedRoot, RootRegistry};
