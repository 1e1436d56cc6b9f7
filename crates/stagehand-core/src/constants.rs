//! Package-level constants.

/// Current version of the Stagehand server (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "stagehand";

/// Newest protocol revision this server speaks. Advertised in `Hello`.
pub const LATEST_RPC_VERSION: u8 = 1;

/// Every protocol revision a client may negotiate with `Identify`.
pub const SUPPORTED_RPC_VERSIONS: &[u8] = &[1];

/// Whether `version` can be negotiated.
pub fn is_supported_rpc_version(version: u64) -> bool {
    SUPPORTED_RPC_VERSIONS
        .iter()
        .any(|supported| u64::from(*supported) == version)
}
