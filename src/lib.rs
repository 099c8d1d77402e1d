//! # Map Orchestrator
//!
//! Tool-call orchestration for a voice or chat assistant that controls a 3D
//! map. A language model emits function calls; this crate validates and
//! dispatches them, resolves map-grounded search results into geocoded
//! markers, keeps a reactive map state, and frames the camera over terrain
//! while respecting UI overlays.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │  model  │──▶│  session /  │──▶│  MapStore  │──▶│ MapSync  │──▶ map surface
//! │ (calls) │   │   tools     │   │  (watch)   │   │ + framing│
//! └─────────┘   └──────┬──────┘   └─────▲──────┘   └──────────┘
//!                      │ spawn          │
//!                      ▼                │
//!               ┌─────────────┐         │
//!               │  grounding  │─────────┘
//!               │ (places)    │
//!               └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Geographic and map-state value types |
//! | [`store`] | Reactive map state with generation tickets |
//! | [`framing`] | Terrain- and padding-aware camera framing |
//! | [`capabilities`] | Traits for places, elevation, grounded search, map surface |
//! | [`google`] | HTTP implementations for Google Maps Platform and Gemini |
//! | [`memory`] | In-memory capabilities for offline runs and tests |
//! | [`controller`] | Map controller and the store → map sync loop |
//! | [`grounding`] | Grounded responses and marker resolution |
//! | [`catalog`] | Community and project catalog |
//! | [`tools`] | Tool declarations, validation, dispatch |
//! | [`session`] | Batches of model function calls → function responses |
//! | [`config`] | TOML configuration |
//! | [`error`] | Dispatch error types |

pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod framing;
pub mod google;
pub mod grounding;
pub mod memory;
pub mod models;
pub mod session;
pub mod store;
pub mod tools;
