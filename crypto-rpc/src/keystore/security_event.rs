//! The security-event reporter (§4.9): emits exactly one event per denied key-storage
//! access. Acquisition and delivery are best-effort — a missing or unreachable reporter
//! must never turn a denial into a success, it only loses the telemetry.

use crate::keystore::slot::Uuid;

/// Context attached to a denied key-storage access (§3, §4.9).
#[derive(Debug, Clone, Copy)]
pub struct ContextData {
    pub user_id: u32,
    pub slot_uuid: Uuid,
}

/// Reports security-relevant denials from the key-storage provider. Implementations
/// must not block the caller meaningfully or propagate failures: the access violation
/// that triggered the report has already been decided independently of whether the
/// report succeeds.
pub trait SecurityEventReporter {
    fn report_key_access_denied(&self, ctx: ContextData);
}

/// Default reporter used when `Server.idsmReporting` is disabled (§6): drops every
/// event. The denial still fails the call; only the telemetry is absent.
#[derive(Debug, Default)]
pub struct NoopSecurityEventReporter;

impl SecurityEventReporter for NoopSecurityEventReporter {
    fn report_key_access_denied(&self, _ctx: ContextData) {}
}

/// A reporter that forwards to an external IDS-manager endpoint. The endpoint is
/// represented abstractly here (a Non-goal collaborator, §1); only the "best effort,
/// never block" contract is implemented in the core.
pub struct IdsmSecurityEventReporter {
    sink: Box<dyn Fn(ContextData)>,
}

impl IdsmSecurityEventReporter {
    pub fn new(sink: impl Fn(ContextData) + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }
}

impl SecurityEventReporter for IdsmSecurityEventReporter {
    fn report_key_access_denied(&self, ctx: ContextData) {
        (self.sink)(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc};

    #[test]
    fn idsm_reporter_forwards_exactly_once() {
        let count = Rc::new(Cell::new(0));
        let c2 = count.clone();
        let reporter = IdsmSecurityEventReporter::new(move |_ctx| c2.set(c2.get() + 1));
        reporter.report_key_access_denied(ContextData {
            user_id: 42,
            slot_uuid: Uuid::from_u128(7),
        });
        assert_eq!(count.get(), 1);
    }
}
