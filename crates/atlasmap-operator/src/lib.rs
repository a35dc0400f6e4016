//! atlasmap-operator: Kubernetes controller that deploys and reconciles AtlasMap

pub mod actions;
pub mod capability;
pub mod client;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod health;
pub mod leader;
pub mod naming;
pub mod openshift;
pub mod resources;
pub mod templates;

pub use crd::{AtlasMap, AtlasMapPhase, AtlasMapSpec, AtlasMapStatus};
