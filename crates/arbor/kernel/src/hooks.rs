//! Collaborator traits injected into the kernel.
//!
//! The kernel decides; adjacent subsystems observe, approve, or veto.
//! Observers are fire-and-forget: a sink that panics or drops events never
//! changes a decision.

use std::sync::Mutex;

use arbor_types::{AgentId, KernelEvent, ProposalId};

/// Receives audit events at every decision point. Called synchronously;
/// implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: KernelEvent);
}

/// Discards every event. The default sink.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: KernelEvent) {}
}

/// Collects events in memory. For tests and diagnostics.
pub struct MemorySink {
    events: Mutex<Vec<KernelEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<KernelEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// The stable names of every recorded event, in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(KernelEvent::name).collect()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: KernelEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Opens an approval proposal when a capability demands human sign-off.
/// The workflow itself (voting, timeouts, resolution) is external.
pub trait EscalationHook: Send + Sync {
    fn propose(
        &self,
        principal: &AgentId,
        resource_uri: &str,
        action: Option<&str>,
    ) -> Option<ProposalId>;
}

/// Veto independent of capability validity: a frozen principal is denied
/// even with a perfectly valid capability.
pub trait TrustMonitor: Send + Sync {
    fn is_frozen(&self, principal: &AgentId) -> bool;
}
