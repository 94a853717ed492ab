#[macro_use]
extern crate failure;

#[macro_use]
extern crate log;

pub mod agent;
pub mod cache;
pub mod config;
pub mod container;
pub mod descriptor;
pub mod error;
pub mod handler;
pub mod namespace;
pub mod overlay;
pub mod path;
pub mod policy;
pub mod resources;

pub use config::Config;
pub use container::{Container, ContainerDirectory, ContainerId, InMemoryContainerDirectory};
pub use error::OverlayError;
pub use overlay::Overlay;
