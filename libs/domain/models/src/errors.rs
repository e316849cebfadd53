use thiserror::Error;

use crate::vm::VmStatus;

#[derive(Debug, Error)]
#[error("invalid transition: {current:?} -> {requested:?} (source: {source})")]
pub struct InvalidTransition {
    pub current: VmStatus,
    pub requested: VmStatus,
    pub source: crate::transition::TransitionSource,
}
