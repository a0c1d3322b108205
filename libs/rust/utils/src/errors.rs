//env
pub const INDEXER_ENDPOINT_NOT_SET: &str = "INDEXER_ENDPOINT not set!";
pub const CONFIG_ALREADY_INITIALIZED: &str = "Reconciler config already initialized";

//cache
pub const CACHE_RESTORE_FAILED: &str = "Failed to restore pending cache";
pub const CACHE_DIR_CREATE_FAILED: &str = "Failed to create pending cache directory";

//server
pub const BIND_FAILED: &str = "Failed to bind HTTP listener";
pub const SERVER_FAILED: &str = "HTTP server error";
