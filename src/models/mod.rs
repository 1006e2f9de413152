//! Domain model module declarations.

pub mod launch;
pub mod runtime;
pub mod session;
pub mod tool;
