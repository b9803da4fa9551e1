// src/core/cluster/orchestrator.rs

//! Microservice orchestration: each tick decides whether scheduling and TSO
//! run locally or have been handed off to discovered external services.

use tracing::{info, warn};

use super::RaftCluster;
use crate::core::services::{SCHEDULING_SERVICE, TSO_SERVICE};

impl RaftCluster {
    /// One scheduling-service check. Local scheduling jobs stop only when
    /// keyspace groups are enabled, at least one scheduling instance is
    /// discovered, and local fallback is disabled; every other combination
    /// runs (or resumes) scheduling locally.
    pub async fn check_scheduling_service(&self) {
        if !self.is_running() {
            return;
        }
        let config = self.config.read().clone();

        if config.microservice.enable_keyspace_groups {
            match self.discovery.discover(SCHEDULING_SERVICE).await {
                Ok(servers)
                    if !servers.is_empty()
                        && !config.microservice.scheduling_fallback_enabled =>
                {
                    if !self.is_service_independent(SCHEDULING_SERVICE) {
                        info!(
                            instances = servers.len(),
                            "Scheduling microservice discovered; stopping local scheduling jobs."
                        );
                    }
                    self.scheduling.stop();
                    self.independent_services
                        .insert(SCHEDULING_SERVICE.to_string(), ());
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Scheduling service discovery failed; keeping local scheduling.");
                }
            }
        }

        if self.is_service_independent(SCHEDULING_SERVICE) {
            info!("No scheduling microservice available; resuming local scheduling jobs.");
        }
        self.independent_services.remove(SCHEDULING_SERVICE);
        if !config.schedule.halt_scheduling {
            self.scheduling.start();
        }
    }

    /// One TSO-service check. The local allocator yields only when keyspace
    /// groups and dynamic switching are both enabled and a TSO instance is
    /// discovered; otherwise the local allocator is kept initialized.
    pub async fn check_tso_service_tick(&self) {
        if !self.is_running() {
            return;
        }
        let config = self.config.read().clone();

        if config.microservice.enable_keyspace_groups
            && config.microservice.tso_dynamic_switching_enabled
        {
            match self.discovery.discover(TSO_SERVICE).await {
                Ok(servers) if !servers.is_empty() => {
                    if self.tso.is_initialized() {
                        info!(
                            instances = servers.len(),
                            "TSO microservice discovered; resetting the local allocator."
                        );
                        self.tso.reset(false);
                    }
                    self.independent_services.insert(TSO_SERVICE.to_string(), ());
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "TSO service discovery failed; keeping the local allocator.");
                }
            }
        }

        if self.is_service_independent(TSO_SERVICE) {
            info!("No TSO microservice available; restarting the local allocator.");
        }
        self.independent_services.remove(TSO_SERVICE);
        if let Err(e) = self.start_tso_jobs().await {
            warn!(error = %e, "Failed to start the local TSO allocator.");
        }
    }
}
