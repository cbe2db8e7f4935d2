use std::{collections::HashMap, fs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub server_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/linernote.db".into(),
            server_url: "http://127.0.0.1:8343".into(),
        }
    }
}

/// Defaults, then `linernote.toml` in the working directory, then
/// `LINERNOTE_*` environment variables. Later layers win.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("linernote.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("server_url") {
                settings.server_url = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("LINERNOTE_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("LINERNOTE_SERVER_URL") {
        settings.server_url = v;
    }

    settings
}
