//! Process-wide agent state.
//!
//! The session is created on a successful handshake: the agent opens the
//! fabric arenas, validates them, and only then allows hooks to fire. A
//! failed open leaves the process untouched: the agent counts the failure,
//! logs, and every handler becomes a no-op because no session is installed.

use crate::handshake::{self, Handshake};
use ada_trace::{ExcludeSet, Fabric, FabricError, MarkingPolicy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<AgentSession> = OnceLock::new();
static INIT_FAILURES: AtomicU64 = AtomicU64::new(0);
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Gate for hooking Swift symbols: `ADA_HOOK_SWIFT=1` keeps them in.
pub const ENV_HOOK_SWIFT: &str = "ADA_HOOK_SWIFT";

/// The agent's view of one tracing session.
#[derive(Debug)]
pub struct AgentSession {
    token: u64,
    fabric: Arc<Fabric>,
    marking: MarkingPolicy,
    excludes: ExcludeSet,
    hook_swift: bool,
}

impl AgentSession {
    /// Resolves the handshake and opens the named fabric.
    pub fn attach(payload: Option<&str>, marking: MarkingPolicy) -> Result<Self, FabricError> {
        let hs = match handshake::resolve(payload) {
            Ok(hs) => hs,
            Err(err) => {
                INIT_FAILURES.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %err, "agent declining to initialize");
                return Err(err);
            }
        };
        let fabric = match Fabric::open_named(hs.host_pid, hs.session_id) {
            Ok(fabric) => fabric,
            Err(err) => {
                INIT_FAILURES.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    host_pid = hs.host_pid,
                    session_id = format_args!("{:x}", hs.session_id),
                    error = %err,
                    "agent failed to map session arenas"
                );
                return Err(err);
            }
        };
        tracing::info!(
            host_pid = hs.host_pid,
            session_id = format_args!("{:x}", hs.session_id),
            "agent attached to session"
        );
        Ok(Self::with_fabric_internal(Arc::new(fabric), marking, Some(hs)))
    }

    /// Builds a session over an already-mapped fabric. Used when agent and
    /// controller share a process (tests, embedded capture).
    pub fn with_fabric(fabric: Arc<Fabric>, marking: MarkingPolicy) -> Self {
        Self::with_fabric_internal(fabric, marking, None)
    }

    fn with_fabric_internal(
        fabric: Arc<Fabric>,
        marking: MarkingPolicy,
        _hs: Option<Handshake>,
    ) -> Self {
        let hook_swift = std::env::var(ENV_HOOK_SWIFT).is_ok_and(|v| v.trim() == "1");
        Self {
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            fabric,
            marking,
            excludes: ExcludeSet::with_defaults(),
            hook_swift,
        }
    }

    /// Installs this session as the process-wide one the TLS fast path and
    /// thread-exit hooks consult. Fails if one is already installed.
    pub fn install(self) -> Result<&'static AgentSession, FabricError> {
        let token = self.token;
        let installed = GLOBAL.get_or_init(|| self);
        if installed.token == token {
            Ok(installed)
        } else {
            Err(FabricError::RegistrationRejected("agent already initialized"))
        }
    }

    /// The installed session, if any.
    pub fn global() -> Option<&'static AgentSession> {
        GLOBAL.get()
    }

    /// Handshake/open failures since process start.
    pub fn initialization_failures() -> u64 {
        INIT_FAILURES.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    #[inline]
    pub fn marking(&self) -> &MarkingPolicy {
        &self.marking
    }

    #[inline]
    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    /// Planning-time filter: should this symbol be hooked at all?
    pub fn should_hook(&self, symbol: &str) -> bool {
        if self.excludes.contains(symbol) {
            return false;
        }
        if !self.hook_swift && ada_trace::is_swift_symbol(symbol) {
            return false;
        }
        true
    }
}
