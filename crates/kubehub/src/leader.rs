//! Single-active-replica guard over a `coordination.k8s.io/v1` Lease.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::StoreError;

pub struct LeaderLease {
    api: Api<Lease>,
    name: String,
    identity: String,
    duration: Duration,
}

/// True when the current holder has not renewed within its lease duration.
pub fn lease_expired(spec: &LeaseSpec, now: DateTime<Utc>) -> bool {
    let Some(MicroTime(renewed)) = spec.renew_time.as_ref() else { return true };
    let secs = i64::from(spec.lease_duration_seconds.unwrap_or(0));
    *renewed + chrono::Duration::seconds(secs) < now
}

impl LeaderLease {
    pub fn new(client: Client, namespace: &str, name: &str, duration: Duration) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            identity: format!("lograft-{}", uuid::Uuid::new_v4()),
            duration,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn spec_for(&self, prev: Option<&LeaseSpec>, now: DateTime<Utc>) -> LeaseSpec {
        let ours = prev.and_then(|p| p.holder_identity.as_deref()) == Some(self.identity.as_str());
        let transitions = prev.and_then(|p| p.lease_transitions).unwrap_or(0);
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.duration.as_secs().min(i32::MAX as u64) as i32),
            acquire_time: if ours { prev.and_then(|p| p.acquire_time.clone()) } else { Some(MicroTime(now)) },
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(if ours || prev.is_none() { transitions } else { transitions + 1 }),
            ..LeaseSpec::default()
        }
    }

    /// Take the lease if it is free, expired or already ours. `Ok(false)` means someone else leads.
    pub async fn try_acquire_or_renew(&self) -> Result<bool, StoreError> {
        let now = Utc::now();
        let current = self.api.get_opt(&self.name).await.map_err(|e| StoreError::Transport(e.to_string()))?;
        match current {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta { name: Some(self.name.clone()), ..ObjectMeta::default() },
                    spec: Some(self.spec_for(None, now)),
                };
                match self.api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
                    Err(e) => Err(StoreError::Transport(e.to_string())),
                }
            }
            Some(mut lease) => {
                let prev = lease.spec.clone().unwrap_or_default();
                let holder = prev.holder_identity.as_deref();
                let free = holder.is_none() || holder == Some(self.identity.as_str()) || lease_expired(&prev, now);
                if !free {
                    return Ok(false);
                }
                lease.spec = Some(self.spec_for(Some(&prev), now));
                match self.api.replace(&self.name, &PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
                    Err(e) => Err(StoreError::Transport(e.to_string())),
                }
            }
        }
    }

    /// Wait until leadership is won, then keep renewing in the background.
    ///
    /// The returned receiver resolves once leadership is lost.
    pub async fn hold(self) -> oneshot::Receiver<()> {
        let retry = (self.duration / 3).max(Duration::from_secs(1));
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "leader lease acquire failed"),
            }
            tokio::time::sleep(retry).await;
        }
        info!(identity = %self.identity, lease = %self.name, "acquired leadership");
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut last_ok = tokio::time::Instant::now();
            loop {
                tokio::time::sleep(retry).await;
                match self.try_acquire_or_renew().await {
                    Ok(true) => last_ok = tokio::time::Instant::now(),
                    Ok(false) => {
                        warn!(identity = %self.identity, "leadership taken over");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "leader lease renew failed");
                        if last_ok.elapsed() >= self.duration {
                            break;
                        }
                    }
                }
            }
            let _ = tx.send(());
        });
        rx
    }
}
