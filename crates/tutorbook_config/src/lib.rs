use config::{Config, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
pub mod models;
pub use models::*;

/// Loads the layered configuration: `config/default`, then `config/{RUN_ENV}`,
/// then `TUTORBOOK__SECTION__KEY` environment variables.
///
/// The config directory is `CONFIG_DIR` when set, otherwise `./config`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    ensure_dotenv_loaded();

    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| "development".to_string());
    let config_dir = env::var("CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    load_config_from(&config_dir, &run_env)
}

/// Same as [`load_config`] with an explicit directory and environment name.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, ConfigError> {
    let prefix = env::var("PREFIX").unwrap_or_else(|_| "TUTORBOOK".to_string());

    let default_path = config_dir.join("default");
    let env_path = config_dir.join(run_env);
    debug!(
        "Loading config from {} and {}",
        default_path.display(),
        env_path.display()
    );

    let builder = Config::builder()
        .set_default("environment", run_env)?
        .add_source(File::with_name(&default_path.to_string_lossy()).required(false))
        .add_source(File::with_name(&env_path.to_string_lossy()).required(false))
        .add_source(Environment::with_prefix(&prefix).separator("__"));

    let raw_config: AppConfig = builder.build()?.try_deserialize()?;
    apply_env_overrides_from_marker(raw_config)
}

/// Recursively replaces all "secret_from_env" string values with environment variable values.
/// `stripe.secret_key` is read from `STRIPE_SECRET_KEY`.
fn inject_env_secrets(value: &mut Value) {
    fn walk(path: Vec<String>, obj: &mut Value) {
        match obj {
            Value::Object(map) => {
                for (k, v) in map.iter_mut() {
                    let mut new_path = path.clone();
                    new_path.push(k.to_string());
                    walk(new_path, v);
                }
            }
            Value::String(s) if s == SECRET_FROM_ENV => {
                let env_key = path.join("_").to_uppercase();
                match std::env::var(&env_key) {
                    Ok(env_val) => *obj = Value::String(env_val),
                    Err(_) => {
                        warn!("env var {} not found for secret_from_env", env_key);
                        *obj = Value::Null;
                    }
                }
            }
            _ => {}
        }
    }

    walk(vec![], value);
}

/// Applies environment overrides based on "secret_from_env" markers in serialized config.
/// Markers without a matching variable become `None`.
pub fn apply_env_overrides_from_marker(config: AppConfig) -> Result<AppConfig, ConfigError> {
    let mut json = serde_json::to_value(&config)
        .map_err(|e| ConfigError::Message(format!("config is not serializable: {e}")))?;
    inject_env_secrets(&mut json);
    serde_json::from_value(json)
        .map_err(|e| ConfigError::Message(format!("config after secret injection is invalid: {e}")))
}

static INIT_DOTENV: OnceCell<()> = OnceCell::new();

/// Loads the dotenv file once per process.
///
/// `DOTENV_OVERRIDE` wins, then a first command line argument starting with
/// `.env`, then `.env` in the working directory. Returns the path used.
pub fn ensure_dotenv_loaded() -> String {
    let dotenv_path_override = std::env::var("DOTENV_OVERRIDE").ok();
    let dotenv_path_arg = env::args().nth(1).filter(|s| s.starts_with(".env"));

    let dotenv_path = dotenv_path_override
        .or(dotenv_path_arg)
        .unwrap_or_else(|| ".env".to_string());

    INIT_DOTENV.get_or_init(|| {
        dotenv::from_filename(&dotenv_path).ok();
    });

    dotenv_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn layered_files_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("default.toml"),
            r#"
            [server]
            host = "127.0.0.1"
            port = 8080

            [booking]
            lesson_price = 2500
            use_webhook_confirmation = true
            "#,
        )
        .expect("write default");
        fs::write(
            dir.path().join("staging.toml"),
            r#"
            [booking]
            use_webhook_confirmation = false
            allow_simulated_payments = true
            "#,
        )
        .expect("write staging");

        let config = load_config_from(dir.path(), "staging").expect("config loads");

        assert_eq!(config.environment, "staging");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.booking.lesson_price, 2500);
        assert!(!config.booking.use_webhook_confirmation);
        assert!(config.simulated_payments_permitted());
        // untouched keys keep their defaults
        assert_eq!(config.booking.payment_poll_attempts, 15);
        assert_eq!(config.booking.email_retry_attempts, 6);
    }

    #[test]
    fn production_never_permits_simulated_payments() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("default.toml"),
            r#"
            [server]
            host = "0.0.0.0"
            port = 80
            [booking]
            allow_simulated_payments = true
            "#,
        )
        .expect("write default");

        let config = load_config_from(dir.path(), "production").expect("config loads");
        assert!(config.is_production());
        assert!(!config.simulated_payments_permitted());
    }

    #[test]
    fn unresolved_secret_markers_become_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("default.toml"),
            r#"
            [server]
            host = "0.0.0.0"
            port = 80
            [admin]
            shared_secret = "secret_from_env"
            "#,
        )
        .expect("write default");

        // ADMIN_SHARED_SECRET is not set by the test harness
        if std::env::var("ADMIN_SHARED_SECRET").is_err() {
            let config = load_config_from(dir.path(), "test").expect("config loads");
            assert_eq!(config.admin_secret(), None);
        }
    }
}
