//! vpsman - lifecycle manager for QEMU-backed virtual private servers.
//!
//! The crate provisions instances from a catalog of cloud images, runs them
//! as daemonized hypervisor processes, and keeps a durable registry of what
//! exists. [`LifecycleManager`] is the entry point; the CLI and the optional
//! HTTP surface ([`api`]) are thin layers over it.
//!
//! # Example
//!
//! ```no_run
//! use vpsman::config::ManagerConfig;
//! use vpsman::LifecycleManager;
//! use vpsman_protocol::CreateInstanceRequest;
//!
//! # async fn demo() -> vpsman::Result<()> {
//! let manager = LifecycleManager::open(ManagerConfig::load(None)?).await?;
//! let summary = manager
//!     .create(&CreateInstanceRequest {
//!         owner_id: "alice".into(),
//!         memory_mb: 1024,
//!         cpu_count: 2,
//!         disk_size: "20G".into(),
//!         os_type: Some("ubuntu22".into()),
//!         gui_mode: false,
//!         port_forwards: vec![],
//!         hostname: None,
//!     })
//!     .await?;
//! manager.start(&summary.id).await?;
//! println!("{}", summary.ssh_command);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod host;
pub mod image;
pub mod instance;
pub mod locks;
pub mod logs;
pub mod manager;
pub mod network;
pub mod process;
pub mod seed;
pub mod supervisor;
pub mod sweeper;

pub use error::{Error, Result};
pub use manager::LifecycleManager;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
