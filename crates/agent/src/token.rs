// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session token fan-out.
//!
//! The token is produced by the connector and consumed by the request
//! client, the push client, and the IPC server. Rather than sharing a
//! mutable field, consumers register as sinks on a handle; publishing a
//! new token notifies every sink.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use cms_core::SessionToken;

/// Consumer notified whenever the live session token changes.
pub trait TokenSink: Send + Sync {
    fn token_updated(&self, token: &SessionToken);
}

#[derive(Default)]
struct HandleInner {
    current: RwLock<Option<SessionToken>>,
    sinks: Mutex<Vec<Arc<dyn TokenSink>>>,
}

/// Shared handle over the live session token.
#[derive(Clone, Default)]
pub struct SessionTokenHandle {
    inner: Arc<HandleInner>,
}

impl SessionTokenHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink; it immediately observes the current token, if any.
    pub fn register(&self, sink: Arc<dyn TokenSink>) {
        if let Some(token) = self.inner.current.read().clone() {
            sink.token_updated(&token);
        }
        self.inner.sinks.lock().push(sink);
    }

    /// Publish a new token to every registered sink.
    pub fn publish(&self, token: SessionToken) {
        *self.inner.current.write() = Some(token.clone());
        for sink in self.inner.sinks.lock().iter() {
            sink.token_updated(&token);
        }
    }

    pub fn current(&self) -> Option<SessionToken> {
        self.inner.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<String>>);

    impl TokenSink for Recorder {
        fn token_updated(&self, token: &SessionToken) {
            self.0.lock().push(token.as_str().to_string());
        }
    }

    #[test]
    fn publish_fans_out_to_all_sinks() {
        let handle = SessionTokenHandle::new();
        let a = Arc::new(Recorder(Mutex::new(Vec::new())));
        let b = Arc::new(Recorder(Mutex::new(Vec::new())));
        handle.register(Arc::clone(&a) as Arc<dyn TokenSink>);
        handle.register(Arc::clone(&b) as Arc<dyn TokenSink>);

        handle.publish(SessionToken("T1".into()));
        assert_eq!(a.0.lock().as_slice(), ["T1"]);
        assert_eq!(b.0.lock().as_slice(), ["T1"]);
        assert_eq!(handle.current(), Some(SessionToken("T1".into())));
    }

    #[test]
    fn late_sink_sees_current_token_on_registration() {
        let handle = SessionTokenHandle::new();
        handle.publish(SessionToken("T2".into()));

        let late = Arc::new(Recorder(Mutex::new(Vec::new())));
        handle.register(Arc::clone(&late) as Arc<dyn TokenSink>);
        assert_eq!(late.0.lock().as_slice(), ["T2"]);
    }
}
