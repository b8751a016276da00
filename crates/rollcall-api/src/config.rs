// Server configuration
//
// Everything comes from the environment; .env is loaded by main before this runs.

use std::env;

/// HTTP server and storage settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// PostgreSQL URL; None runs on in-memory storage
    pub database_url: Option<String>,

    /// Maximum pooled database connections
    pub max_connections: u32,

    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Prefix nested in front of every /v1 route (e.g. "/api")
    pub api_prefix: String,

    /// Origins allowed for cross-origin requests; empty means same-origin only
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `DATABASE_URL`: PostgreSQL connection string (default: unset, in-memory storage)
    /// - `ROLLCALL_DB_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `ROLLCALL_BIND_ADDR`: listen address (default: 0.0.0.0:9000)
    /// - `API_PREFIX`: route prefix (default: empty)
    /// - `CORS_ALLOWED_ORIGINS`: comma-separated origins (default: empty)
    pub fn from_env() -> Self {
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let max_connections = env::var("ROLLCALL_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let bind_addr =
            env::var("ROLLCALL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9000".to_string());

        let api_prefix = env::var("API_PREFIX").unwrap_or_default();

        let cors_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|s| parse_origins(&s))
            .unwrap_or_default();

        Self {
            database_url,
            max_connections,
            bind_addr,
            api_prefix,
            cors_origins,
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins("https://a.example.com, https://b.example.com,"),
            vec!["https://a.example.com", "https://b.example.com"]
        );
        assert!(parse_origins("").is_empty());
    }
}
