//! Lease-based leader election
//!
//! Several operator replicas may run; only the holder of the Lease
//! reconciles. Standby replicas wait in [`LeaderElection::acquire`]. Once
//! leading, [`LeaderElection::spawn_renewal_task`] keeps the Lease and its
//! handle resolves when leadership ends, which `main` treats as fatal.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use k8s_openapi::api::coordination::v1::Lease;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

/// Lease name used when `LEADER_ELECTION_LEASE_NAME` is unset or empty
pub const DEFAULT_LEASE_NAME: &str = "atlasmap-operator-leader";

const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive renewal failures tolerated before giving up the Lease
const MAX_RENEWAL_FAILURES: u32 = 3;

/// Settings for an enabled leader election
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub namespace: String,
    /// Identity written into the Lease, normally the pod name
    pub holder_id: String,
    pub lease_duration: Duration,
    pub renew_interval: Duration,
}

impl LeaderElectionConfig {
    /// Read leader election settings from the environment.
    ///
    /// Returns `None` unless `LEADER_ELECTION_ENABLED` is `true`.
    ///
    /// Environment variables:
    /// - `LEADER_ELECTION_ENABLED`: `true` to enable (default: disabled)
    /// - `LEADER_ELECTION_LEASE_NAME`: Lease name (default: `atlasmap-operator-leader`)
    /// - `POD_NAMESPACE`: namespace of the Lease (required when enabled)
    /// - `POD_NAME`: holder identity (required when enabled)
    /// - `LEADER_ELECTION_LEASE_DURATION`: Lease TTL in seconds (default: 15)
    /// - `LEADER_ELECTION_RENEW_INTERVAL`: renewal period in seconds (default: 5)
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let enabled = var("LEADER_ELECTION_ENABLED")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        if !enabled {
            return Ok(None);
        }

        let seconds = |name: &str, default: Duration| match var(name) {
            None => default,
            Some(raw) => raw.trim().parse().map(Duration::from_secs).unwrap_or_else(|e| {
                warn!(
                    env_var = name,
                    value = %raw,
                    error = %e,
                    default_secs = default.as_secs(),
                    "Invalid duration, using default"
                );
                default
            }),
        };

        let config = Self {
            lease_name: var("LEADER_ELECTION_LEASE_NAME")
                .unwrap_or_else(|| DEFAULT_LEASE_NAME.to_string()),
            namespace: var("POD_NAMESPACE")
                .context("POD_NAMESPACE must be set when leader election is enabled")?,
            holder_id: var("POD_NAME")
                .context("POD_NAME must be set when leader election is enabled")?,
            lease_duration: seconds("LEADER_ELECTION_LEASE_DURATION", DEFAULT_LEASE_DURATION),
            renew_interval: seconds("LEADER_ELECTION_RENEW_INTERVAL", DEFAULT_RENEW_INTERVAL),
        };
        config.validate()?;
        Ok(Some(config))
    }

    /// The Lease must be renewed well inside its TTL
    pub fn validate(&self) -> Result<()> {
        if self.renew_interval >= self.lease_duration {
            bail!(
                "renew interval ({}s) must be shorter than lease duration ({}s)",
                self.renew_interval.as_secs(),
                self.lease_duration.as_secs()
            );
        }
        Ok(())
    }
}

/// Why a leader stopped leading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipLost {
    /// Another replica holds the Lease now
    TakenBy(String),
    /// Renewal kept failing; the Lease may expire under us
    RenewalFailed { attempts: u32, last_error: String },
}

impl fmt::Display for LeadershipLost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TakenBy(holder) => write!(f, "lease taken by {holder}"),
            Self::RenewalFailed {
                attempts,
                last_error,
            } => write!(f, "lease renewal failed {attempts} times: {last_error}"),
        }
    }
}

/// Outcome of one renewal attempt
enum Renewal {
    Held,
    Lost { holder: String },
    Failed(String),
}

/// Consecutive-failure bookkeeping for the renewal loop
#[derive(Debug, Default)]
struct RenewalState {
    failures: u32,
}

impl RenewalState {
    fn observe(&mut self, renewal: Renewal) -> Option<LeadershipLost> {
        match renewal {
            Renewal::Held => {
                if self.failures > 0 {
                    info!(previous_failures = self.failures, "Lease renewed again");
                }
                self.failures = 0;
                trace!("Lease renewed");
                None
            }
            Renewal::Lost { holder } => Some(LeadershipLost::TakenBy(holder)),
            Renewal::Failed(error) => {
                self.failures += 1;
                if self.failures >= MAX_RENEWAL_FAILURES {
                    return Some(LeadershipLost::RenewalFailed {
                        attempts: self.failures,
                        last_error: error,
                    });
                }
                warn!(
                    error = %error,
                    attempt = self.failures,
                    max_attempts = MAX_RENEWAL_FAILURES,
                    "Lease renewal failed, will retry"
                );
                None
            }
        }
    }
}

fn holder_of(lease: Option<&Lease>) -> String {
    lease
        .and_then(|l| l.spec.as_ref())
        .and_then(|s| s.holder_identity.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Holder of the operator Lease
pub struct LeaderElection {
    lock: LeaseLock,
    renew_interval: Duration,
}

impl LeaderElection {
    pub fn new(client: Client, config: &LeaderElectionConfig) -> Self {
        let lock = LeaseLock::new(
            client,
            &config.namespace,
            LeaseLockParams {
                holder_id: config.holder_id.clone(),
                lease_name: config.lease_name.clone(),
                lease_ttl: config.lease_duration,
            },
        );
        Self {
            lock,
            renew_interval: config.renew_interval,
        }
    }

    async fn try_renew(&self) -> Renewal {
        match self.lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => Renewal::Held,
            Ok(result) => Renewal::Lost {
                holder: holder_of(result.lease.as_ref()),
            },
            Err(e) => Renewal::Failed(e.to_string()),
        }
    }

    /// Wait until this replica holds the Lease
    pub async fn acquire(&self) {
        info!("Waiting for leadership");
        loop {
            match self.try_renew().await {
                Renewal::Held => {
                    info!("Leadership acquired");
                    return;
                }
                Renewal::Lost { holder } => {
                    info!(current_holder = %holder, "Standing by, another replica leads")
                }
                Renewal::Failed(error) => warn!(error = %error, "Lease check failed, retrying"),
            }
            tokio::time::sleep(self.renew_interval).await;
        }
    }

    /// Keep renewing the Lease; the task ends when leadership is lost
    pub fn spawn_renewal_task(self) -> JoinHandle<LeadershipLost> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.renew_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut state = RenewalState::default();

            loop {
                interval.tick().await;
                if let Some(lost) = state.observe(self.try_renew().await) {
                    return lost;
                }
            }
        })
    }
}
