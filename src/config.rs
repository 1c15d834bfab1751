//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_STORAGE_DIR: &str = "./webdav-root";
pub const DEFAULT_AUTH_USER: &str = "dav";
pub const DEFAULT_AUTH_PASS: &str = "dav";
pub const DEFAULT_PORT: u16 = 8080;
pub const AUTH_REALM: &str = r#"Basic realm="WebDAV""#;
/// Timeout advertised for advisory lock tokens (one week).
pub const LOCK_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "plaindav", version = VERSION_INFO, about = "Plain WebDAV file server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "PLAINDAV_STORAGE_DIR",
        default_value = DEFAULT_STORAGE_DIR,
        help = "Directory exposed as the WebDAV root"
    )]
    pub storage_dir: String,
    #[arg(
        long,
        env = "PLAINDAV_AUTH_USER",
        default_value = DEFAULT_AUTH_USER,
        help = "Basic auth username"
    )]
    pub auth_user: String,
    #[arg(
        long,
        env = "PLAINDAV_AUTH_PASS",
        default_value = DEFAULT_AUTH_PASS,
        help = "Basic auth password"
    )]
    pub auth_pass: String,
    #[arg(
        short = 'b',
        long,
        env = "PLAINDAV_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PLAINDAV_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
}
