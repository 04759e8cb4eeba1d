use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CACHE_TTL_HOURS: u32 = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub schema: u8,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([(
        APP_JSON,
        serde_json::json!({
            "schema": 1,
            "appName": "Gaveltime",
            "apiBaseUrl": DEFAULT_API_BASE_URL,
            "cacheTtlHours": DEFAULT_CACHE_TTL_HOURS
        }),
    )])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<serde_json::Value, InfraError> {
    read_config(&config_dir.join(APP_JSON))
}

pub fn read_api_base_url(config_dir: &Path) -> Result<String, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let base_url = app
        .get("apiBaseUrl")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_API_BASE_URL);
    Ok(base_url.to_string())
}

pub fn read_cache_ttl_hours(config_dir: &Path) -> Result<u32, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let Some(value) = app.get("cacheTtlHours") else {
        return Ok(DEFAULT_CACHE_TTL_HOURS);
    };
    let ttl = value.as_u64().ok_or_else(|| {
        InfraError::InvalidConfig("cacheTtlHours must be a non-negative integer".to_string())
    })?;
    if ttl == 0 || ttl > u64::from(u32::MAX) {
        return Err(InfraError::InvalidConfig(format!(
            "cacheTtlHours out of range: {ttl}"
        )));
    }
    Ok(ttl as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static WORKSPACE_COUNTER: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        root: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let unique = WORKSPACE_COUNTER.fetch_add(1, Ordering::SeqCst);
            let root = std::env::temp_dir().join(format!(
                "gaveltime-config-{}-{unique}",
                std::process::id()
            ));
            fs::create_dir_all(&root).expect("create temp config dir");
            Self { root }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn defaults_are_written_once_and_valid() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.root).expect("write defaults");

        assert_eq!(
            read_api_base_url(&dir.root).expect("read base url"),
            DEFAULT_API_BASE_URL
        );
        assert_eq!(
            read_cache_ttl_hours(&dir.root).expect("read ttl"),
            DEFAULT_CACHE_TTL_HOURS
        );

        // A user-edited file must survive a second ensure pass.
        let path = dir.root.join(APP_JSON);
        fs::write(
            &path,
            "{\"schema\":1,\"apiBaseUrl\":\"https://club.example\",\"cacheTtlHours\":48}\n",
        )
        .expect("overwrite config");
        ensure_default_configs(&dir.root).expect("second ensure");
        assert_eq!(
            read_api_base_url(&dir.root).expect("read base url"),
            "https://club.example"
        );
        assert_eq!(read_cache_ttl_hours(&dir.root).expect("read ttl"), 48);
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        fs::write(dir.root.join(APP_JSON), "{\"schema\":2}\n").expect("write config");
        assert!(read_api_base_url(&dir.root).is_err());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let dir = TempConfigDir::new();
        fs::write(
            dir.root.join(APP_JSON),
            "{\"schema\":1,\"cacheTtlHours\":0}\n",
        )
        .expect("write config");
        assert!(read_cache_ttl_hours(&dir.root).is_err());
    }

    #[test]
    fn missing_ttl_falls_back_to_default() {
        let dir = TempConfigDir::new();
        fs::write(dir.root.join(APP_JSON), "{\"schema\":1}\n").expect("write config");
        assert_eq!(
            read_cache_ttl_hours(&dir.root).expect("read ttl"),
            DEFAULT_CACHE_TTL_HOURS
        );
    }
}
