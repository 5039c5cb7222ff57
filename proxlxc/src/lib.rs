//! proxlxc - LXC template builder for Proxmox VE
//!
//! Creates a throwaway container from a base template, hands it to a
//! provisioning hook, then backs it up with `vzdump` and downloads the
//! archive as a reusable template.
//!
//! ## Architecture
//!
//! ```text
//! Builder ─▶ Sequencer ─▶ Steps ─┬─▶ ProxmoxApi   (REST, ticket auth, task polling)
//!                                ├─▶ GuestConnector (SSH into the container)
//!                                ├─▶ NodeFiles    (SFTP to the node's dump directory)
//!                                └─▶ HttpServer   (scratch files for provisioning)
//! ```
//!
//! - `config`: decoding, defaults and validation of the build configuration
//! - `pipeline`: interruptible sequencer with reverse-order cleanup
//! - `builder`: build state, steps and the resulting artifact
//! - `proxmox`, `transfer`, `communicator`: the remote seams
//! - `ui`, `secrets`: operator output with credential redaction

pub mod builder;
pub mod communicator;
pub mod config;
pub mod hook;
pub mod http_server;
pub mod pipeline;
pub mod proxmox;
pub mod secrets;
pub mod transfer;
pub mod ui;

pub use builder::{Artifact, Backends, BuildPhase, Builder};
pub use config::{Config, prepare};
pub use hook::{GeneratedData, Hook, NoopHook, ShellHook};
pub use ui::{ConsoleUi, Ui};

pub use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
