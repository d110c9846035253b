use crate::error::Result;
use crate::http::{Method, RequestOptions, ResilientClient, Session};
use crate::types::Blacklist;
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

const BLACKLIST_PATH: &str = "/CarInfoBlackByGroup/SearchData/";
const GROUPS_PATH: &str = "/TaxiGroup/SelectByGroup";
const ORDERS_PATH: &str = "/Order/SearchData";
/// A month of orders on a busy server takes a while to render.
const ORDERS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Server groups to poll, in order. Later servers win when a plate appears
/// on more than one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSet {
    Ids(Vec<String>),
    /// (display name, id); names are stripped from firm names in work
    /// history.
    Named(Vec<(String, String)>),
}

impl ServerSet {
    pub fn ids(&self) -> Vec<&str> {
        match self {
            ServerSet::Ids(ids) => ids.iter().map(String::as_str).collect(),
            ServerSet::Named(pairs) => pairs.iter().map(|(_, id)| id.as_str()).collect(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            ServerSet::Ids(_) => Vec::new(),
            ServerSet::Named(pairs) => pairs.iter().map(|(name, _)| name.as_str()).collect(),
        }
    }
}

/// jqGrid search response.
#[derive(Debug, Deserialize)]
struct Grid {
    #[serde(default)]
    rows: Vec<GridRow>,
}

#[derive(Debug, Deserialize)]
struct GridRow {
    #[serde(default)]
    cell: Vec<Value>,
}

impl GridRow {
    fn text(&self, index: usize) -> Option<&str> {
        self.cell.get(index).and_then(Value::as_str).map(str::trim)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkHistory {
    pub callsign: String,
    pub firms: Vec<String>,
}

/// Grid endpoints only answer XHR-style requests.
fn grid_query<'a>(session: &Session, form: impl IntoIterator<Item = (&'a str, &'a str)>) -> RequestOptions {
    session
        .options()
        .form(form)
        .header("X-Requested-With", "XMLHttpRequest")
}

/// Search endpoints of the dispatch portal.
pub struct Portal {
    client: Arc<ResilientClient>,
    base_url: String,
}

impl Portal {
    pub fn new(client: Arc<ResilientClient>, base_url: &str) -> Portal {
        Portal {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Blacklisted plates across all servers. A server that errors or sends
    /// malformed JSON contributes nothing; the rest still count.
    pub async fn fetch_blacklist(&self, session: &Session, servers: &ServerSet) -> Blacklist {
        let mut blacklist = Blacklist::new();
        for server_id in servers.ids() {
            info!("Downloading blacklist for server {}", server_id);
            match self.fetch_server(session, server_id).await {
                Ok(entries) => {
                    debug!("Server {} lists {} plates", server_id, entries.len());
                    blacklist.extend(entries);
                }
                Err(e) => warn!("Dropping blacklist of server {}: {}", server_id, e),
            }
        }
        blacklist
    }

    async fn fetch_server(&self, session: &Session, server_id: &str) -> Result<Vec<(String, String)>> {
        let url = format!("{}{}", self.base_url, BLACKLIST_PATH);
        let form = [
            ("Group.Id", server_id),
            ("_search", "true"),
            ("rows", "5000"),
            ("page", "1"),
            ("sidx", "Id"),
            ("sord", "asc"),
            ("User.FullName", "СОЗ"),
        ];
        let grid: Grid = self
            .client
            .request(Method::Get, &url, Some(session), grid_query(session, form))
            .await?
            .json()
            .await?;
        Ok(grid
            .rows
            .iter()
            .filter_map(|row| match (row.text(0), row.text(1)) {
                (Some(plate), reason) if !plate.is_empty() => {
                    Some((plate.to_string(), reason.unwrap_or_default().to_string()))
                }
                _ => None,
            })
            .collect())
    }

    /// Id the portal gives `taxi_name` inside a server group. Several groups
    /// can carry the name; the first one in the response wins.
    pub async fn resolve_taxi_id(
        &self,
        session: &Session,
        server_id: &str,
        taxi_name: &str,
    ) -> Result<Option<String>> {
        let url = format!("{}{}", self.base_url, GROUPS_PATH);
        let groups: Map<String, Value> = self
            .client
            .request(
                Method::Get,
                &url,
                Some(session),
                session.options().query([("group", server_id)]),
            )
            .await?
            .json()
            .await?;
        Ok(groups
            .into_iter()
            .find(|(_, name)| name.as_str().is_some_and(|name| name.contains(taxi_name)))
            .map(|(id, _)| id))
    }

    /// Orders of the last 30 days for `plate` that came through `taxi_name`.
    /// Returns the callsign used with us and every firm the car worked for,
    /// or `None` if the car never worked for us or the portal failed.
    pub async fn work_history(
        &self,
        session: &Session,
        servers: &ServerSet,
        plate: &str,
        taxi_name: &str,
        today: NaiveDate,
    ) -> Option<WorkHistory> {
        let period = format!(
            "{}+-+{}",
            (today - Duration::days(30)).format("%d.%m.%Y"),
            today.format("%d.%m.%Y")
        );
        let mut callsign = None;
        let mut firms = Vec::new();

        for server_id in servers.ids() {
            let taxi_id = match self.resolve_taxi_id(session, server_id, taxi_name).await {
                Ok(id) => id,
                Err(e) => {
                    warn!("Cannot resolve {} on server {}: {}", taxi_name, server_id, e);
                    None
                }
            };
            let rows = match self
                .fetch_orders(session, server_id, &period, taxi_id.as_deref(), plate)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Order history of {} on server {} failed: {}", plate, server_id, e);
                    continue;
                }
            };
            for row in &rows {
                let Some(car_taxi) = row.text(11) else {
                    continue;
                };
                if car_taxi.contains(taxi_name) {
                    if let Some(signal) = row.text(14) {
                        callsign = Some(signal.to_string());
                    }
                }
                firms.push(car_taxi.to_string());
            }
        }

        let callsign = callsign?;
        let server_names = servers.names();
        let mut firms: Vec<String> = firms
            .into_iter()
            .map(|firm| {
                server_names
                    .iter()
                    .fold(firm, |firm, name| firm.replace(&format!(" {}", name), ""))
            })
            .collect();
        firms.sort();
        firms.dedup();
        Some(WorkHistory { callsign, firms })
    }

    async fn fetch_orders(
        &self,
        session: &Session,
        server_id: &str,
        period: &str,
        taxi_id: Option<&str>,
        plate: &str,
    ) -> Result<Vec<GridRow>> {
        let url = format!("{}{}", self.base_url, ORDERS_PATH);
        let mut form = vec![
            ("group", server_id),
            ("_search", "true"),
            ("rows", "10000"),
            ("page", "1"),
            ("sidx", "ReqStartTime"),
            ("ReqStartTime", period),
        ];
        if let Some(taxi_id) = taxi_id {
            form.push(("TaxiIdFrom", taxi_id));
        }
        form.push(("CarNo", plate));
        let grid: Grid = self
            .client
            .request(
                Method::Get,
                &url,
                Some(session),
                grid_query(session, form).timeout(ORDERS_TIMEOUT),
            )
            .await?
            .json()
            .await?;
        Ok(grid.rows)
    }
}
