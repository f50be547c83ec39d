// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable name constants
//!
//! Every variable read by the data plane is declared here so the names stay
//! consistent between the configuration loader, the logging setup and the
//! CloudEvent encoder.
//!
//! ## Organization
//!
//! - **Logging**: log level, filter file, output format
//! - **Server**: figment-backed [`crate::config::ServerConfig`] overrides
//! - **CloudEvents**: attributes of outgoing inference events

/// Logging and tracing environment variables
pub mod logging {
    /// Log level filter in `EnvFilter` syntax (e.g. "debug", "kserve_dataplane=trace")
    pub const KSERVE_LOG: &str = "KSERVE_LOG";

    /// Path to a TOML logging configuration file
    pub const KSERVE_LOGGING_CONFIG_PATH: &str = "KSERVE_LOGGING_CONFIG_PATH";

    /// Enable JSONL logging format
    pub const KSERVE_LOGGING_JSONL: &str = "KSERVE_LOGGING_JSONL";

    /// Disable ANSI terminal colors in logs
    pub const KSERVE_DISABLE_ANSI_LOGGING: &str = "KSERVE_DISABLE_ANSI_LOGGING";

    /// Use local timezone for logging timestamps (default is UTC)
    pub const KSERVE_LOG_USE_LOCAL_TZ: &str = "KSERVE_LOG_USE_LOCAL_TZ";
}

/// Server configuration environment variables
///
/// Any `ServerConfig` field can be overridden with `KSERVE_<FIELD>`; the most
/// commonly used ones are listed here.
pub mod server {
    /// Prefix shared by all server overrides
    pub const PREFIX: &str = "KSERVE_";

    /// Optional TOML file merged over `/opt/kserve/etc/server.toml`
    pub const KSERVE_CONFIG_PATH: &str = "KSERVE_CONFIG_PATH";

    pub const KSERVE_HTTP_HOST: &str = "KSERVE_HTTP_HOST";
    pub const KSERVE_HTTP_PORT: &str = "KSERVE_HTTP_PORT";
    pub const KSERVE_GRPC_HOST: &str = "KSERVE_GRPC_HOST";
    pub const KSERVE_GRPC_PORT: &str = "KSERVE_GRPC_PORT";

    /// Remote predictor the server forwards to when running as a transformer
    pub mod predictor {
        pub const KSERVE_PREDICTOR_HOST: &str = "KSERVE_PREDICTOR_HOST";

        /// One of `v1`, `v2`, `grpc-v2`
        pub const KSERVE_PREDICTOR_PROTOCOL: &str = "KSERVE_PREDICTOR_PROTOCOL";

        pub const KSERVE_PREDICTOR_USE_SSL: &str = "KSERVE_PREDICTOR_USE_SSL";

        pub const KSERVE_PREDICTOR_REQUEST_TIMEOUT_SECS: &str =
            "KSERVE_PREDICTOR_REQUEST_TIMEOUT_SECS";

        pub const KSERVE_ENABLE_PREDICTOR_HEALTH_CHECK: &str =
            "KSERVE_ENABLE_PREDICTOR_HEALTH_CHECK";
    }

    /// Directory scanned by the model repository on startup
    pub const KSERVE_MODEL_DIR: &str = "KSERVE_MODEL_DIR";
}

/// CloudEvent response attributes
pub mod cloudevent {
    /// Overrides the `source` attribute of response events
    pub const CE_SOURCE: &str = "CE_SOURCE";

    /// Overrides the `type` attribute of response events
    pub const CE_TYPE: &str = "CE_TYPE";

    /// When truthy, request event attributes are merged into the response event
    pub const CE_MERGE: &str = "CE_MERGE";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicate_env_var_names() {
        use std::collections::HashSet;

        let mut seen = HashSet::new();
        let vars = [
            // Logging
            logging::KSERVE_LOG,
            logging::KSERVE_LOGGING_CONFIG_PATH,
            logging::KSERVE_LOGGING_JSONL,
            logging::KSERVE_DISABLE_ANSI_LOGGING,
            logging::KSERVE_LOG_USE_LOCAL_TZ,
            // Server
            server::KSERVE_CONFIG_PATH,
            server::KSERVE_HTTP_HOST,
            server::KSERVE_HTTP_PORT,
            server::KSERVE_GRPC_HOST,
            server::KSERVE_GRPC_PORT,
            server::predictor::KSERVE_PREDICTOR_HOST,
            server::predictor::KSERVE_PREDICTOR_PROTOCOL,
            server::predictor::KSERVE_PREDICTOR_USE_SSL,
            server::predictor::KSERVE_PREDICTOR_REQUEST_TIMEOUT_SECS,
            server::predictor::KSERVE_ENABLE_PREDICTOR_HEALTH_CHECK,
            server::KSERVE_MODEL_DIR,
            // CloudEvents
            cloudevent::CE_SOURCE,
            cloudevent::CE_TYPE,
            cloudevent::CE_MERGE,
        ];

        for var in &vars {
            if !seen.insert(var) {
                panic!("Duplicate environment variable name: {}", var);
            }
        }
    }

    #[test]
    fn test_naming_conventions() {
        assert!(logging::KSERVE_LOG.starts_with(server::PREFIX));
        assert!(server::KSERVE_HTTP_PORT.starts_with(server::PREFIX));
        assert!(server::predictor::KSERVE_PREDICTOR_HOST.starts_with(server::PREFIX));
        assert!(cloudevent::CE_MERGE.starts_with("CE_"));
    }
}
