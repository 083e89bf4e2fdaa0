pub mod config;
pub mod forge;
pub mod matcher;
pub mod models;
pub mod pipeline;

pub use forge::{Forge, ForgeError, ForgeSession};
pub use pipeline::{Error, Outcome};
