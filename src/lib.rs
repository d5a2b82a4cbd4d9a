//! Course Registry: course catalog and enrollment service in Rust
//!
//! Service side: sled document store with transactional enrollment, an
//! identity service (bcrypt + JWT) and an Axum REST API. Client side: a
//! session gate driven by identity-change notifications, enrollment, admin
//! and profile actions over a `RemoteGateway`, and pure text rendering.

pub mod config;
pub mod error;
pub mod models;
pub mod telemetry;

// Service: documents, identities, access rules, REST surface
pub mod access;
pub mod auth;
pub mod report;
pub mod rest;
pub mod storage;

// Client core over the gateway seam (in-process or HTTP)
pub mod admin;
pub mod client;
pub mod enrollment;
pub mod filter;
pub mod gateway;
pub mod profile;
pub mod render;
pub mod session;
