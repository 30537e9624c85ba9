//! Per-tenant admission control.
//!
//! Each tenant gets a semaphore sized to `chat.max_inflight_per_tenant`;
//! a chat request that cannot take a permit immediately is rejected
//! with RATE_LIMITED rather than queued.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use ms_domain::error::Error;

pub struct TenantGate {
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_inflight: usize,
}

impl TenantGate {
    pub fn new(max_inflight: usize) -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            max_inflight: max_inflight.max(1),
        }
    }

    pub fn try_acquire(&self, tenant_id: &str) -> Result<OwnedSemaphorePermit, Error> {
        let gate = {
            let mut gates = self.gates.lock();
            gates
                .entry(tenant_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_inflight)))
                .clone()
        };
        gate.try_acquire_owned().map_err(|_| {
            Error::RateLimited(format!(
                "tenant {tenant_id} already has {} requests in flight",
                self.max_inflight
            ))
        })
    }

    /// Drop gates that are back at full capacity (cleanup).
    pub fn prune_idle(&self) {
        let mut gates = self.gates.lock();
        gates.retain(|_, g| g.available_permits() < self.max_inflight);
    }

    pub fn tenant_count(&self) -> usize {
        self.gates.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_per_tenant_ceiling() {
        let gate = TenantGate::new(2);
        let _a = gate.try_acquire("t1").unwrap();
        let _b = gate.try_acquire("t1").unwrap();
        assert!(matches!(
            gate.try_acquire("t1"),
            Err(Error::RateLimited(_))
        ));
        // A different tenant has its own budget.
        assert!(gate.try_acquire("t2").is_ok());
    }

    #[test]
    fn releasing_a_permit_frees_a_slot() {
        let gate = TenantGate::new(1);
        let permit = gate.try_acquire("t1").unwrap();
        assert!(gate.try_acquire("t1").is_err());
        drop(permit);
        assert!(gate.try_acquire("t1").is_ok());
    }

    #[test]
    fn prune_drops_quiet_tenants() {
        let gate = TenantGate::new(1);
        {
            let _p = gate.try_acquire("t1").unwrap();
            gate.prune_idle();
            assert_eq!(gate.tenant_count(), 1);
        }
        gate.prune_idle();
        assert_eq!(gate.tenant_count(), 0);
    }
}
