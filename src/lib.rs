//! # Wildlife Console Core Library
//!
//! Client-side reconciliation engine for a remote wildlife camera. The camera
//! switches between a live HLS stream and motion-triggered stills, reports
//! temperature, humidity and pressure, and is reached over a flaky network. This
//! crate keeps a single view-facing [`ConsoleState`] consistent with the device
//! while the loops below keep polling, retrying and tearing media down.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-layered `ConsoleConfig` (defaults, TOML, environment).
//! - **`connection`**: Endpoint validation and request URL construction.
//! - **`error`**: The `ConsoleError` enum and crate `Result` alias.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`mode`**: The `Mode` the backend reports and the wire response.
//! - **`state`**: `ConsoleState`, `ErrorNotice` and the watch-backed `StateStore`.
//! - **`lifecycle`**: Teardown latch and the periodic loop runner.
//! - **`backend`**: The `Backend` trait and its `reqwest` implementation.
//! - **`telemetry`**: Sensor polling and bounded chart history.
//! - **`image`**: Cache-busted still image references.
//! - **`watcher`**: Periodic mode watcher and the `online` flag.
//! - **`media`**: Display sink and transport seams, fault policy, attachment manager.
//! - **`stream`**: Stream probe retries with generation-token supersession.
//! - **`transition`**: The mode toggle state machine.
//! - **`capture`**: One-shot capture with delayed image refresh.
//! - **`console`**: Facade wiring everything together.
//! - **`headless`**: Logging sink used by the CLI.
//! - **`mock`**: In-memory backend, sink and transport for tests.

pub mod backend;
pub mod capture;
pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod headless;
pub mod image;
pub mod lifecycle;
pub mod logging;
pub mod media;
pub mod mock;
pub mod mode;
pub mod state;
pub mod stream;
pub mod telemetry;
pub mod transition;
pub mod watcher;

pub use config::ConsoleConfig;
pub use console::Console;
pub use error::{ConsoleError, Result};
pub use mode::Mode;
pub use state::{ConsoleState, ErrorNotice, StateStore};
