//! Host context injection
//!
//! Thread-local storage for the host currently being updated, so that every
//! log entry emitted while a router runs carries the host address.

use std::cell::RefCell;

use ferry_core::HostAddress;
use uuid::Uuid;

/// Host context data stored in thread-local storage
#[derive(Debug, Clone)]
pub struct HostContextData {
    /// Address of the host
    pub host: HostAddress,
    /// Virtual time the scope was entered at
    pub sim_time: f64,
    /// Identifier of the simulation run
    pub run_id: Uuid,
}

thread_local! {
    static HOST_CONTEXT: RefCell<Option<HostContextData>> = const { RefCell::new(None) };
    static RUN_ID: RefCell<Option<Uuid>> = const { RefCell::new(None) };
}

/// Identifier of the current run, created on first use
pub fn run_id() -> Uuid {
    RUN_ID.with(|id| *id.borrow_mut().get_or_insert_with(Uuid::new_v4))
}

/// RAII guard for host context
///
/// Sets the host context for the current thread and restores the previous
/// one when dropped.
///
/// ```ignore
/// let _guard = HostContextGuard::new(HostAddress(3), world.now());
/// tracing::debug!("Router update"); // carries host = 3
/// ```
pub struct HostContextGuard {
    previous: Option<HostContextData>,
}

impl HostContextGuard {
    pub fn new(host: HostAddress, sim_time: f64) -> Self {
        Self::with_run_id(host, sim_time, run_id())
    }

    /// Guard with an explicit run identifier
    pub fn with_run_id(host: HostAddress, sim_time: f64, run_id: Uuid) -> Self {
        let previous = HOST_CONTEXT.with(|ctx| ctx.borrow().clone());
        let data = HostContextData {
            host,
            sim_time,
            run_id,
        };
        HOST_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(data));
        Self { previous }
    }

    pub fn current() -> Option<HostContextData> {
        HOST_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_host() -> Option<HostAddress> {
        Self::current().map(|ctx| ctx.host)
    }
}

impl Drop for HostContextGuard {
    fn drop(&mut self) {
        HOST_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with the given host context
///
/// ```ignore
/// with_host_context!(HostAddress(1), now, {
///     tracing::info!("Link up");
/// });
/// ```
#[macro_export]
macro_rules! with_host_context {
    ($host:expr, $now:expr, $body:block) => {{
        let _guard = $crate::context::HostContextGuard::new($host, $now);
        $body
    }};
}
