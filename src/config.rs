use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(name = "server")]
#[command(about = "Document tracking service", long_about = None)]
pub struct Config {
    #[arg(long, env = "DOCVAULT_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    #[arg(long, env = "DOCVAULT_DATA_DIR", default_value = "data", help = "Directory holding the JSON record files")]
    pub data_dir: PathBuf,

    #[arg(long, env = "DOCVAULT_UPLOAD_DIR", default_value = "uploads", help = "Directory uploaded files are written to")]
    pub upload_dir: PathBuf,

    #[arg(long, env = "DOCVAULT_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    #[arg(
        long,
        env = "DOCVAULT_EXPIRING_WINDOW_DAYS",
        default_value_t = 30,
        help = "Days before expiry a document counts as expiring soon"
    )]
    pub expiring_window_days: i64,

    #[arg(
        long = "admin",
        env = "DOCVAULT_ADMIN_USERS",
        value_delimiter = ',',
        help = "Usernames granted the admin role when they register"
    )]
    pub admin_users: Vec<String>,

    #[arg(long, env = "DOCVAULT_PASSWORD_HASH_COST", default_value_t = bcrypt::DEFAULT_COST)]
    pub password_hash_cost: u32,

    #[arg(
        long,
        env = "DOCVAULT_SESSION_TTL_HOURS",
        default_value_t = 168,
        value_parser = clap::value_parser!(i64).range(1..),
        help = "Hours a login token stays valid"
    )]
    pub session_ttl_hours: i64,
}

impl Config {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }

    pub fn is_admin_username(&self, username: &str) -> bool {
        self.admin_users
            .iter()
            .any(|admin| admin.trim().eq_ignore_ascii_case(username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = Config::parse_from(["server"]);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.expiring_window_days, 30);
        assert!(config.admin_users.is_empty());
        assert_eq!(config.session_ttl(), chrono::Duration::days(7));
    }

    #[test]
    fn session_ttl_must_be_positive() {
        assert!(Config::try_parse_from(["server", "--session-ttl-hours", "0"]).is_err());
        let config = Config::parse_from(["server", "--session-ttl-hours", "2"]);
        assert_eq!(config.session_ttl(), chrono::Duration::hours(2));
    }

    #[test]
    fn admin_list_is_comma_separated() {
        let config = Config::parse_from(["server", "--admin", "root,Ops"]);
        assert!(config.is_admin_username("ops"));
        assert!(config.is_admin_username("root"));
        assert!(!config.is_admin_username("alice"));
    }
}
