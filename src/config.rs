use anyhow::Result;
use std::env;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub secret_key: String,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let secret_key = env::var("SECRET_KEY")
            .map_err(|_| anyhow::anyhow!("SECRET_KEY environment variable is required"))?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:codetrace.db".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| anyhow::anyhow!("Invalid BIND_ADDR: {}", err))?;

        Ok(Config {
            database_url,
            bind_addr,
            secret_key,
            jwt_secret,
        })
    }
}
