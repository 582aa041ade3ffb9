//! Flow Module
//!
//! Declarative step ordering and the traversal logic that turns it into
//! eligible work.
//!
//! - [`model`]: The immutable [`Flow`] tree (atom, sequence, concurrence)
//! - [`cursor`]: Arena-backed traversal state mirroring a flow
//! - [`manager`]: [`FlowManager`], the per-plan, per-phase driver

pub mod cursor;
pub mod manager;
pub mod model;

pub use cursor::CursorTree;
pub use manager::FlowManager;
pub use model::Flow;
