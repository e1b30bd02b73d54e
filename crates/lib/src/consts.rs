//! Crate-wide constants.

/// Application name, used for directory names and environment prefixes.
pub const APP_NAME: &str = "strata";

/// Length of the truncated hash used for image identifiers.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default recipe file name looked up in a build context.
pub const RECIPE_FILENAME: &str = "strata.json";

/// Reference of the built-in empty base image.
pub const SCRATCH_IMAGE: &str = "scratch";

/// Value of `SOURCE_DATE_EPOCH` inside the sandbox (1980-01-01T00:00:00Z, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
