//! The `(reason, source, optional error)` tuple that accompanies every VM status change.

use serde::{Deserialize, Serialize};

/// The minimum required source tag for a lifecycle transition, per the transition
/// table in the orchestration kernel's lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionSource {
    SchedulerPickNode,
    SchedulerNoCapacity,
    CommandBusCreateSent,
    NodeAckCreateOk,
    NodeAckFail,
    CommandBusTimeout,
    UserStop,
    UserDelete,
    HealthLost,
    AttestationFailedFatal,
    NodeAckStopOk,
    UserStart,
    NodeAckDeleteOk,
    /// A queued delete settling on a VM that never reached a node (e.g. it
    /// errored out of `Scheduling` with no placement) — there is nothing to
    /// send a `DeleteVm` command to, so `Deleting -> Deleted` fires with no
    /// ack to wait for.
    DeleteNoop,
}

impl TransitionSource {
    /// Dotted identifier form used in spec text and log messages, e.g. `scheduler.pick-node`.
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::SchedulerPickNode => "scheduler.pick-node",
            Self::SchedulerNoCapacity => "scheduler.no-capacity",
            Self::CommandBusCreateSent => "command-bus.create-sent",
            Self::NodeAckCreateOk => "node.ack-create-ok",
            Self::NodeAckFail => "node.ack-fail",
            Self::CommandBusTimeout => "command-bus.timeout",
            Self::UserStop => "user.stop",
            Self::UserDelete => "user.delete",
            Self::HealthLost => "health.lost",
            Self::AttestationFailedFatal => "attestation.failed-fatal",
            Self::NodeAckStopOk => "node.ack-stop-ok",
            Self::UserStart => "user.start",
            Self::NodeAckDeleteOk => "node.ack-delete-ok",
            Self::DeleteNoop => "delete.noop",
        }
    }
}

impl std::fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionContext {
    pub source: TransitionSource,
    pub reason: Option<String>,
    pub error: Option<String>,
}

impl TransitionContext {
    pub fn new(source: TransitionSource) -> Self {
        Self { source, reason: None, error: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Shorthand for the command-bus-timeout context attached to `spec.md` §4.4/§4.8.
    pub fn timeout(command_type: &str, message: impl Into<String>) -> Self {
        Self::new(TransitionSource::CommandBusTimeout)
            .with_reason(format!("{command_type} timed out"))
            .with_error(message.into())
    }
}
