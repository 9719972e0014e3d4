//! CLI command implementations.
//!
//! | Module   | Commands handled           |
//! |----------|----------------------------|
//! | `status` | `Status`, `Gate`, `Prompt` |
//! | `files`  | `Files`                    |
//! | `config` | `Config`                   |

pub mod config;
pub mod files;
pub mod status;

pub use config::cmd_config;
pub use files::cmd_files;
pub use status::{cmd_gate, cmd_prompt, cmd_status};
