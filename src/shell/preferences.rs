//! Preference-file loading.
//!
//! `$USER_CONFIG_DIR/msql/config` holds `key=value` lines with `#`
//! comments, full-line or trailing. Unknown keys are reported at INFO
//! and skipped.

use tracing::{error, info};

pub struct Preferences {
    pub history_file: String,
    pub password_file: String,
    pub prompt: String,
    pub timing: bool,
}

const DEFAULT_PROMPT: &str = "${host}@${database} => ";

pub fn load() -> Preferences {
    let Some(config_root) = dirs_next::config_dir() else {
        error!(context = "failed to load config dir", "no user configuration directory");
        return Preferences {
            history_file: String::new(),
            password_file: String::new(),
            prompt: DEFAULT_PROMPT.to_string(),
            timing: false,
        };
    };

    let config_dir = config_root.join("msql");
    let _ = std::fs::create_dir_all(&config_dir);
    let config_file = config_dir.join("config");

    let mut preferences = Preferences {
        history_file: config_dir.join("history").to_string_lossy().into_owned(),
        password_file: config_dir.join(".pass").to_string_lossy().into_owned(),
        prompt: DEFAULT_PROMPT.to_string(),
        timing: false,
    };

    match std::fs::read_to_string(&config_file) {
        Ok(data) => parse_into(&mut preferences, &data),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %config_file.display(), "no preference file");
        }
        Err(err) => {
            error!(context = "read preference file", path = %config_file.display(), "{err}");
        }
    }
    preferences
}

fn parse_into(preferences: &mut Preferences, data: &str) {
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            info!(line, "invalid property");
            continue;
        };

        let value = strip_comment(value);
        match key {
            "historyFile" => preferences.history_file = value.to_string(),
            "passwordFile" => preferences.password_file = value.to_string(),
            "timing" => {
                let value = value.to_lowercase();
                preferences.timing = value == "on" || value == "1" || value == "true";
            }
            "prompt" => preferences.prompt = value.trim_matches('"').to_string(),
            key => info!(key, "unknown preference key"),
        }
    }
}

fn strip_comment(source: &str) -> &str {
    match source.find('#') {
        Some(cut) => source[..cut].trim_end(),
        None => source,
    }
}
