//! Configuration.
//!
//! Sources, lowest to highest priority:
//! 1. **Defaults** - compiled in
//! 2. **Project** - `./taskdeck/config.yaml`
//! 3. **User** - `~/.taskdeck/config.yaml`
//! 4. **Explicit** - the file named by `TASKDECK_CONFIG_PATH` (or `--config`)
//! 5. **Environment** - `TASKDECK_DB_PATH`, `TASKDECK_MAX_FILE_BYTES`, `TASKDECK_USER`
//!
//! Command-line flags are applied by the binary on top of the result.

mod loader;
mod types;

pub use loader::{
    ConfigLoader, ConfigPaths, ConfigTier, ENV_CONFIG_PATH, ENV_DB_PATH, ENV_MAX_FILE_BYTES,
    ENV_USER, deep_merge,
};
pub use types::*;
