//! Configuration for the relic compiler cache.
//!
//! Settings are layered: built-in defaults, then `<cache_dir>/ccache.conf`
//! (plain `key = value` lines), then `CCACHE_*` environment variables.

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{
    format_human_readable_size, format_parsable_size, get_string_value, load,
    parse_size_with_suffix, set_value, set_value_in_file, LoadedConfig, Origin, KNOWN_KEYS,
};
pub use types::{Config, Sloppiness};
