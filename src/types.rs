use std::collections::HashMap;
use std::fmt;

/// One taxi company: its roster database and the chat its matches go to.
#[derive(Debug, Clone)]
pub struct Fleet {
    /// Ledger key, e.g. `Jet` or `898`.
    pub key: String,
    pub host: String,
    pub database: String,
    /// Display name used on the dispatch portal.
    pub name: String,
    pub chat_id: i64,
}

/// A vehicle currently assigned to a driver in a fleet roster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vehicle {
    pub signal: String,
    pub make: String,
    pub year: String,
    pub color: String,
    /// Raw assignment open time as the roster database renders it.
    pub open_time: Option<String>,
    pub balance: f64,
    pub surname: Option<String>,
    pub first_name: Option<String>,
    pub patronymic: Option<String>,
    pub phones: Vec<Option<String>>,
}

/// Plate -> vehicle.
pub type Roster = HashMap<String, Vehicle>;

/// Plate -> block reason.
pub type Blacklist = HashMap<String, String>;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}
