//! Server configuration from flags and environment

use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser, Debug, Clone)]
#[command(name = "trasferte")]
#[command(about = "Travel request workflow server - mission approval, reconciliation and reimbursement")]
#[command(version)]
pub struct ServerConfig {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:trasferte.db")]
    pub database_url: String,

    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: SocketAddr,

    /// Maximum pooled database connections
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Email of a superuser account to create at startup if missing
    #[arg(long, env = "SUPERUSER_EMAIL")]
    pub superuser_email: Option<String>,

    /// Display name for the seeded superuser
    #[arg(long, env = "SUPERUSER_NAME", default_value = "Superuser")]
    pub superuser_name: String,
}
