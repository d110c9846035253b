use crate::error::{Error, Result};
use crate::http::{parse_proxy_list, RequestSettings};
use crate::portal::ServerSet;
use crate::types::{Credentials, Fleet};
use crate::watcher::QuietHours;
use chrono::NaiveTime;
use log::info;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORTAL_URL: &str = "http://wd.soz.in.ua";
const DEFAULT_SERVERS: &str = "303,296";
const DEFAULT_FLEETS: &str = "Jet,Fly,Magdack,898,Allo";
const DEFAULT_TELEGRAM_URL: &str = "https://api.telegram.org";
const DEFAULT_POLICE_URL: &str = "https://baza-gai.com.ua/search";

/// Not `Debug`: carries the portal password and bot tokens.
#[derive(Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub portal_url: String,
    pub servers: ServerSet,
    pub work_history: bool,
    pub fleets: Vec<Fleet>,
    pub telegram_url: String,
    pub telegram_token: String,
    /// Bot token and chat for operator alerts.
    pub alert_bot: Option<(String, String)>,
    pub notify_delay: Duration,
    pub requests: RequestSettings,
    pub poll_interval: Duration,
    pub session_max_cycles: u32,
    pub alert_threshold: u32,
    pub quiet_hours: QuietHours,
    pub parallel_fleets: bool,
    pub ledger_path: PathBuf,
    pub police_url: String,
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Config> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let vars = Vars(&lookup);
        let requests = RequestSettings {
            delay: vars.seconds("REQUEST_DELAY", 2.0)?,
            timeout: vars.seconds("REQUEST_TIMEOUT", 10.0)?,
            retries: vars.parse("REQUEST_RETRIES", 3)?,
            backoff_base: Duration::from_secs(1),
            proxies: parse_proxy_list(&vars.optional("PROXY_LIST").unwrap_or_default()),
        };
        let fleets = vars
            .optional("FLEETS")
            .unwrap_or_else(|| DEFAULT_FLEETS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| vars.fleet(key))
            .collect::<Result<Vec<_>>>()?;
        let alert_bot = match (
            vars.optional("TELEGRAM_ERROR_BOT_TOKEN"),
            vars.optional("TELEGRAM_ERROR_CHAT_ID"),
        ) {
            (Some(token), Some(chat)) => Some((token, chat)),
            _ => None,
        };

        Ok(Config {
            credentials: Credentials {
                login: vars.required("WD_LOGIN")?,
                password: vars.required("WD_PASSWORD")?,
            },
            portal_url: vars
                .optional("WD_URL")
                .unwrap_or_else(|| DEFAULT_PORTAL_URL.to_string()),
            servers: parse_servers(&vars.optional("WD_SERVERS").unwrap_or_else(|| DEFAULT_SERVERS.to_string()))?,
            work_history: vars.flag("WORK_HISTORY", false)?,
            fleets,
            telegram_url: vars
                .optional("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_URL.to_string()),
            telegram_token: vars.required("TELEGRAM_BOT_TOKEN")?,
            alert_bot,
            notify_delay: vars.seconds("NOTIFY_DELAY", 5.0)?,
            requests,
            poll_interval: vars.seconds("POLL_INTERVAL", 3600.0)?,
            session_max_cycles: vars.parse("SESSION_MAX_CYCLES", 6)?,
            alert_threshold: vars.parse("ALERT_THRESHOLD", 3)?,
            quiet_hours: QuietHours {
                start: vars.time("QUIET_HOURS_START", "20:30")?,
                end: vars.time("QUIET_HOURS_END", "09:10")?,
            },
            parallel_fleets: vars.flag("PARALLEL_FLEETS", false)?,
            ledger_path: vars
                .optional("LEDGER_PATH")
                .unwrap_or_else(|| "processed_cars.db".to_string())
                .into(),
            police_url: vars
                .optional("POLICE_URL")
                .unwrap_or_else(|| DEFAULT_POLICE_URL.to_string()),
        })
    }
}

/// `303,296` gives bare ids; `Комфорт=303,Стандарт=296` gives named servers.
fn parse_servers(raw: &str) -> Result<ServerSet> {
    let entries: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();
    let invalid = || Error::InvalidVar {
        key: "WD_SERVERS".to_string(),
        value: raw.to_string(),
    };
    if entries.is_empty() {
        return Err(invalid());
    }
    if entries.iter().any(|entry| entry.contains('=')) {
        entries
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((name, id)) if !name.trim().is_empty() && !id.trim().is_empty() => {
                    Ok((name.trim().to_string(), id.trim().to_string()))
                }
                _ => Err(invalid()),
            })
            .collect::<Result<Vec<_>>>()
            .map(ServerSet::Named)
    } else {
        Ok(ServerSet::Ids(entries.iter().map(|id| id.to_string()).collect()))
    }
}

/// Environment prefix of a fleet key; keys starting with a digit get `TAXI`.
fn fleet_prefix(key: &str) -> String {
    let upper = key.to_uppercase();
    if upper.starts_with(|c: char| c.is_ascii_digit()) {
        format!("TAXI{}", upper)
    } else {
        upper
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| Error::MissingVar(key.to_string()))
    }

    fn invalid(&self, key: &str, value: &str) -> Error {
        Error::InvalidVar {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            Some(value) => value.parse().map_err(|_| self.invalid(key, &value)),
            None => Ok(default),
        }
    }

    fn seconds(&self, key: &str, default: f64) -> Result<Duration> {
        let secs: f64 = self.parse(key, default)?;
        Duration::try_from_secs_f64(secs).map_err(|_| self.invalid(key, &secs.to_string()))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.optional(key).map(|value| value.to_lowercase()) {
            None => Ok(default),
            Some(value) => match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(self.invalid(key, &value)),
            },
        }
    }

    fn time(&self, key: &str, default: &str) -> Result<NaiveTime> {
        let value = self.optional(key).unwrap_or_else(|| default.to_string());
        NaiveTime::parse_from_str(&value, "%H:%M").map_err(|_| self.invalid(key, &value))
    }

    fn fleet(&self, key: &str) -> Result<Fleet> {
        let prefix = fleet_prefix(key);
        let chat_key = format!("{}_CHAT_ID", prefix);
        let chat = self.required(&chat_key)?;
        Ok(Fleet {
            key: key.to_string(),
            host: self.required(&format!("{}_HOST", prefix))?,
            database: self.required(&format!("{}_DB", prefix))?,
            name: self.required(&format!("{}_NAME", prefix))?,
            chat_id: chat.parse().map_err(|_| self.invalid(&chat_key, &chat))?,
        })
    }
}
