//! ada-agent: the in-process side of the tracing pipeline.
//!
//! The agent is loaded into the target process, resolves its session
//! identity from the loader handshake (or the environment), maps the shared
//! fabric the controller built, and services interceptor callbacks on every
//! hooked function. Handlers are entirely non-blocking: the only work on
//! the hot path is a TLS lookup, event construction on the stack, and an
//! SPSC ring write.
//!
//! A process hosts at most one installed session. If the handshake or the
//! arena mapping fails, nothing is installed and every handler no-ops; the
//! failure is counted and logged, and the target runs untouched.

mod handshake;
mod hot_path;
mod session;
mod stack_capture;
mod tls;

pub use handshake::{resolve as resolve_handshake, Handshake, ENV_HOST_PID, ENV_SESSION_ID};
pub use hot_path::HookContext;
pub use session::{AgentSession, ENV_HOOK_SWIFT};
pub use stack_capture::{capture_stack, StackBounds};
pub use tls::{current_thread_id, unregister_current_thread};
