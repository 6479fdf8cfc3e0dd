use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use keyring::Entry;
use serde::Deserialize;
use std::fs;
use url::Url;

pub const KEYRING_SERVICE: &str = "strato-api-key";
pub const KEYRING_USER: &str = "Strato";

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    default_account: Option<String>,
    strato_base_url: Option<Url>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    default_account: Option<String>,
    strato_base_url: Option<Url>,
    strato_api_key: Option<String>,
}

pub struct Config {
    pub default_account: Option<String>,
    pub strato_base_url: Url,
    pub strato_api_key: String,
}

fn merge_config(base: ConfigFile, override_config: ConfigEnv) -> Result<Config> {
    let default_account = override_config.default_account.or(base.default_account);

    let strato_base_url = override_config
        .strato_base_url
        .or(base.strato_base_url)
        .ok_or(anyhow!("No Strato base URL provided"))?;

    let strato_api_key = if let Some(api_key) = override_config.strato_api_key {
        api_key
    } else {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
        let api_key = entry
            .get_secret()
            .context("API key not specified via environment variable nor present in OS keyring")?;
        String::from_utf8(api_key)?
    };

    Ok(Config {
        default_account,
        strato_base_url,
        strato_api_key,
    })
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::from_env::<ConfigEnv>().unwrap_or_default();

    let project_dirs = directories::ProjectDirs::from("io", "strato-cloud", "strato")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    let config_file = project_dirs.config_dir().join("config.toml");
    let file_config = if let Ok(config) = fs::read_to_string(config_file) {
        toml::from_str(&config)?
    } else {
        ConfigFile::default()
    };

    merge_config(file_config, env_config)
}

pub fn set_api_key_keyring(api_key: String) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    entry.set_secret(api_key.as_bytes())?;
    println!("API key set for use with strato");
    Ok(())
}
