//! Reconciles DNS records at a hosted provider against locally running containers.
//!
//! For usage, run the `sherpa-dns` binary; see its `--help` for flags, or
//! `sherpa-dns.yaml` style config files for the full set of keys in [`config`].
//!
//! Data flows leaf to root: [`label`] and [`source`] turn a container inventory
//! into [`endpoint::Endpoint`]s, [`registry`] overlays ownership on top of a
//! [`provider::Provider`], [`plan`] diffs desired against owned, [`scheduler`]
//! defers deletes, and [`controller`] drives the loop that ties them together.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod controller;
pub mod domain;
pub mod endpoint;
pub mod health;
pub mod label;
pub mod plan;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod source;
