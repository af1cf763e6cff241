//! webprint-bridge library crate.
//!
//! A loopback HTTP service that lets web pages, once the user has agreed,
//! send raw commands to local printers, serial devices and network printers.
//!
//! # Architecture
//!
//! ```text
//! Web page ── postMessage ──► /printwindow relay ── POST JSON ──►
//! [webprint-bridge]
//!   ├── domain/           BridgeConfig, ConsentMode
//!   ├── application/      access control, serial session, dispatcher
//!   └── infrastructure/
//!         ├── http_server   axum router and server lifecycle
//!         ├── storage       data directory, settings, bind address, grants
//!         ├── printing      CUPS spooler, raw TCP printing
//!         ├── serial        serialport backend
//!         └── consent       terminal / command / deny prompts
//! ```
//!
//! `domain` and `application` never touch the OS directly; every device is
//! reached through a trait so the whole request path can be tested with the
//! mocks in `infrastructure::*::mock`.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: the request path and its state.
pub mod application;

/// Infrastructure layer: HTTP, files and devices.
pub mod infrastructure;
