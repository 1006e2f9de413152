//! Process orchestration: runtime detection, launch, lifecycle, registry.

pub mod deployer;
pub mod launcher;
pub mod process;
pub mod registry;
pub mod resolver;
