pub mod archive;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod error;
pub mod monitor;
pub mod runner;
pub mod stage;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
