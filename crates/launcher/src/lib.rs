//! Launcher device registry and lifecycle manager
//!
//! Tracks a changing set of hot-pluggable USB launchers. A background thread
//! periodically enumerates the bus and reconciles what it finds with the
//! registry; client threads hold counted references to launchers, claim them
//! and send commands, all concurrently with that reconciliation.
//!
//! # Architecture
//!
//! ```text
//! Controller
//!   ├─> PollingLoop ──(every poll interval)──> Bus::enumerate
//!   │                                              │
//!   │                                              v
//!   ├─> Registry <───────────── reconcile(devices) ┘
//!   │     └─> Arc<Launcher> ──> reference / dereference / claim / fire
//!   └─> broadcast::Sender<LauncherEvent>
//! ```
//!
//! A launcher stays in the registry while it is connected or referenced.
//! Once it is both disconnected and unreferenced it is removed and its raw
//! device is handed back to the bus, exactly once.
//!
//! # Example
//!
//! ```
//! use launcher::bus::MockBus;
//! use launcher::{Controller, ControllerOptions};
//! use std::sync::Arc;
//!
//! let bus = Arc::new(MockBus::new());
//! bus.plug_launcher();
//!
//! let controller = Controller::init(bus.clone(), ControllerOptions::default()).unwrap();
//! controller.refresh().unwrap();
//!
//! let launchers = controller.launchers().unwrap();
//! assert_eq!(launchers.len(), 1);
//! launchers.free().unwrap();
//! controller.cleanup().unwrap();
//! ```

pub mod array;
pub mod bus;
pub mod classify;
pub mod command;
pub mod controller;
pub mod launcher;
pub mod library;
pub mod poll_rate;
pub mod polling;
pub mod registry;

pub use array::LauncherArray;
pub use bus::{Bus, DeviceKey};
pub use classify::{LauncherKind, classify};
pub use command::{Direction, LauncherCommand, ParseDirectionError};
pub use controller::{Controller, ControllerOptions};
pub use launcher::Launcher;
pub use library::Library;
pub use poll_rate::{DEFAULT_POLL_RATE, MAX_POLL_RATE, MIN_POLL_RATE, PollRateRegulator};
pub use polling::{PollState, PollingLoop};
pub use registry::{LauncherEvent, ReconcileReport, Registry};

pub use common::{Error, ErrorCode, Result, error_to_str};
