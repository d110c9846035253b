use crate::db::Ledger;
use crate::http::Session;
use crate::message::{compose, PoliceReport};
use crate::notify::{Alerter, Notifier, Severity};
use crate::police::PoliceRegistry;
use crate::portal::{Portal, ServerSet};
use crate::roster::RosterSource;
use crate::session::SessionManager;
use crate::types::{Blacklist, Credentials, Fleet, Roster, Vehicle};
use chrono::{Local, NaiveTime};
use futures::future::join_all;
use log::{error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Daily window, boundaries included, in which nothing is polled. A window
/// whose start is after its end wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= now && now <= self.end
        } else {
            now >= self.start || now <= self.end
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetReport {
    pub fleet: String,
    pub matches: usize,
    pub notified: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fleets: Vec<FleetReport>,
    /// Fleets whose roster could not be fetched.
    pub skipped: Vec<String>,
}

impl CycleReport {
    pub fn notified(&self) -> usize {
        self.fleets.iter().map(|fleet| fleet.notified).sum()
    }
}

/// Blacklisted plates present in the roster and not yet reported for
/// `taxi`, sorted.
pub fn find_matches(roster: &Roster, blacklist: &Blacklist, ledger: &Ledger, taxi: &str) -> Vec<String> {
    let mut matches: Vec<String> = blacklist
        .keys()
        .filter(|plate| roster.contains_key(*plate))
        .filter(|plate| match ledger.exists(plate, taxi) {
            Ok(reported) => !reported,
            Err(e) => {
                error!("Ledger lookup for {} in {} failed: {}", plate, taxi, e);
                false
            }
        })
        .cloned()
        .collect();
    matches.sort();
    matches
}

pub struct Watcher {
    pub fleets: Vec<Fleet>,
    pub roster: Arc<dyn RosterSource>,
    pub police: Arc<dyn PoliceRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub ledger: Arc<Ledger>,
    pub alerter: Arc<Alerter>,
    pub portal: Portal,
    pub servers: ServerSet,
    pub work_history: bool,
    pub parallel: bool,
    pub interval: Duration,
    pub quiet_hours: QuietHours,
}

impl Watcher {
    /// Polls until `shutdown` resolves. Shutdown is only noticed while
    /// sleeping between cycles.
    pub async fn run(
        &self,
        sessions: &mut SessionManager,
        credentials: &Credentials,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        loop {
            if let Some(report) = self
                .poll_once(sessions, credentials, Local::now().time())
                .await
            {
                info!(
                    "Cycle done: {} notifications, {} fleets skipped",
                    report.notified(),
                    report.skipped.len()
                );
            }
            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, leaving poll loop");
                    break;
                }
            }
        }
    }

    /// One full cycle at wall-clock time `now`. `None` means nothing was
    /// polled: quiet hours, no session or an empty blacklist.
    pub async fn poll_once(
        &self,
        sessions: &mut SessionManager,
        credentials: &Credentials,
        now: NaiveTime,
    ) -> Option<CycleReport> {
        if self.quiet_hours.contains(now) {
            info!("Quiet hours ({}), skipping cycle", now.format("%H:%M"));
            return None;
        }
        let Some(session) = sessions.session_for_cycle(credentials).await else {
            warn!("No portal session, skipping cycle");
            return None;
        };
        let blacklist = self.portal.fetch_blacklist(&session, &self.servers).await;
        if blacklist.is_empty() {
            warn!("Blacklist is empty, dropping session");
            sessions.invalidate();
            return None;
        }
        info!("Blacklist has {} plates", blacklist.len());
        Some(self.run_cycle(Some(&session), &blacklist).await)
    }

    /// Fetch, match and notify for every fleet. A fleet whose roster fails
    /// is skipped; the others still run.
    pub async fn run_cycle(&self, session: Option<&Session>, blacklist: &Blacklist) -> CycleReport {
        let results = if self.parallel {
            join_all(
                self.fleets
                    .iter()
                    .map(|fleet| self.process_fleet(fleet, session, blacklist)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(self.fleets.len());
            for fleet in &self.fleets {
                results.push(self.process_fleet(fleet, session, blacklist).await);
            }
            results
        };

        let mut report = CycleReport::default();
        for (fleet, result) in self.fleets.iter().zip(results) {
            match result {
                Some(fleet_report) => report.fleets.push(fleet_report),
                None => report.skipped.push(fleet.key.clone()),
            }
        }
        report
    }

    async fn process_fleet(
        &self,
        fleet: &Fleet,
        session: Option<&Session>,
        blacklist: &Blacklist,
    ) -> Option<FleetReport> {
        info!("Searching blocked drivers in {}", fleet.key);
        let source = format!("roster:{}", fleet.key);
        let roster = match self.roster.fetch_roster(fleet).await {
            Ok(roster) => {
                self.alerter.success(&source);
                roster
            }
            Err(e) => {
                error!("Skipping fleet {}: {}", fleet.key, e);
                self.alerter
                    .failure(&source, Severity::Warning, "Fleet roster unavailable", &e.to_string())
                    .await;
                return None;
            }
        };

        let matches = find_matches(&roster, blacklist, &self.ledger, &fleet.key);
        let mut report = FleetReport {
            fleet: fleet.key.clone(),
            matches: matches.len(),
            notified: 0,
        };
        for plate in &matches {
            let (Some(vehicle), Some(reason)) = (roster.get(plate), blacklist.get(plate)) else {
                continue;
            };
            if self.notify(fleet, session, plate, vehicle, reason).await {
                report.notified += 1;
            }
        }
        Some(report)
    }

    /// Enriches, records and sends one match. The ledger row is written
    /// before sending, so a failed send is not retried later.
    async fn notify(
        &self,
        fleet: &Fleet,
        session: Option<&Session>,
        plate: &str,
        vehicle: &Vehicle,
        reason: &str,
    ) -> bool {
        let police = PoliceReport {
            source: self.police.source().to_string(),
            info: self.police.lookup(plate).await,
        };
        let history = match (self.work_history, session) {
            (true, Some(session)) => {
                self.portal
                    .work_history(session, &self.servers, plate, &fleet.name, Local::now().date_naive())
                    .await
            }
            _ => None,
        };
        let text = compose(plate, vehicle, reason, &police, history.as_ref());

        match self.ledger.claim(&fleet.key, plate) {
            Ok(true) => {}
            Ok(false) => {
                info!("{} in {} was already reported", plate, fleet.key);
                return false;
            }
            Err(e) => {
                error!("Cannot record {} for {}, not sending: {}", plate, fleet.key, e);
                return false;
            }
        }
        info!("{} ||| {}", fleet.key, text);

        match self.notifier.send(&fleet.chat_id.to_string(), &text, false).await {
            Ok(()) => {
                self.alerter.success("dispatch");
                true
            }
            Err(e) => {
                error!("Failed to notify {} about {}: {}", fleet.key, plate, e);
                self.alerter
                    .failure("dispatch", Severity::Error, "Notification delivery failed", &e.to_string())
                    .await;
                false
            }
        }
    }
}
