//! Docker/Podman engine backend.
//!
//! Talks to the daemon through bollard. Compiled with the `docker` feature
//! (on by default) and registered with the loader under the name `docker`.
//!
//! ## Components
//!
//! - [`ContainerClient`]: daemon connection with Podman fallback and
//!   container queries
//! - [`ContainerConfig`]: fluent container configuration
//! - [`ExecConfig`]: commands executed in running containers
//! - [`NetworkManager`]: project networks
//! - [`DockerEngine`]: the [`Engine`](crate::engine::Engine) implementation

mod client;
mod config;
mod engine;
mod executor;
mod image;
mod interactive;
mod network;

pub use client::{ContainerClient, ContainerState};
pub use config::{ContainerConfig, ContainerConfigBuilder};
pub use engine::DockerEngine;
pub use executor::{ExecConfig, ExecConfigBuilder, ExecOutput, execute};
pub use image::{PullOutcome, ensure_image, pull, pull_all, split_reference};
pub use network::NetworkManager;
