use clap::Parser;
use std::path::PathBuf;

/// Server configuration, read from flags or the environment (`.env` included).
#[derive(Parser, Debug, Clone)]
#[command(name = "open-music")]
#[command(about = "OpenMusic catalog API server", long_about = None)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// SQLite database url
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:openmusic.db")]
    pub database_url: String,

    /// Secret used to sign access tokens
    #[arg(long, env = "ACCESS_TOKEN_KEY", hide_env_values = true)]
    pub access_token_key: String,

    /// Secret used to sign refresh tokens
    #[arg(long, env = "REFRESH_TOKEN_KEY", hide_env_values = true)]
    pub refresh_token_key: String,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_AGE", default_value = "1800")]
    pub access_token_age: u64,

    /// Redis server for the likes cache and the export queue
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Directory receiving uploaded album covers
    #[arg(long, env = "UPLOADS_DIR", default_value = "uploads")]
    pub uploads_dir: PathBuf,

    /// Base url used when building cover urls
    #[arg(long, env = "PUBLIC_URL")]
    pub public_url: Option<String>,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base url for links handed back to clients, without a trailing slash.
    pub fn public_base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec![
            "open-music",
            "--access-token-key",
            "access",
            "--refresh-token-key",
            "refresh",
        ];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_public_url_defaults_to_bind_address() {
        let config = parse(&["--host", "localhost", "--port", "5000"]);
        assert_eq!(config.bind_address(), "localhost:5000");
        assert_eq!(config.public_base_url(), "http://localhost:5000");
    }

    #[test]
    fn test_public_url_override_strips_slash() {
        let config = parse(&["--public-url", "https://music.example.com/"]);
        assert_eq!(config.public_base_url(), "https://music.example.com");
    }
}
