// Build-time package metadata

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line description, shown by `GET /version` and `--help`.
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
