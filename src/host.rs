// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Host platform state refresh primitive.

use derive_more::Constructor;
use log::debug;
use tokio::sync::mpsc;

/// Request the host platform to re-fetch and re-render the state of an entity.
///
/// Device handles may invoke entity update handlers from their own threads. Implementations
/// are responsible to marshal the request onto the host event loop.
pub trait StateRefresh: Send + Sync {
    fn request_state_refresh(&self, unique_id: &str, force_refresh: bool);
}

/// Entity state refresh request delivered to the host event loop.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct RefreshRequest {
    pub unique_id: String,
    pub force_refresh: bool,
}

/// Forwards refresh requests over an unbounded channel to the task running the host loop.
///
/// Sending never blocks and works from any thread.
#[derive(Debug, Clone)]
pub struct EventLoopRefresher {
    tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl EventLoopRefresher {
    /// Create a refresher and the receiving end for the host loop.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RefreshRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StateRefresh for EventLoopRefresher {
    fn request_state_refresh(&self, unique_id: &str, force_refresh: bool) {
        if self
            .tx
            .send(RefreshRequest::new(unique_id.to_string(), force_refresh))
            .is_err()
        {
            debug!("[{unique_id}] Host loop closed, dropping state refresh request");
        }
    }
}
