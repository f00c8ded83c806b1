// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Outbound frame filtering.
//!
//! A [`SendFilter`] sits between frame construction and the socket.
//! Production endpoints run permissive; tests install drop rules to
//! simulate lossy links without touching the kernel.

use std::net::SocketAddr;
use std::sync::Arc;

use super::frame::Frame;

/// Decides whether an outbound frame reaches the wire.
pub trait SendFilter: Send + Sync {
    /// Return false to silently drop the frame (it still counts as
    /// "sent" for retry bookkeeping - exactly like real loss).
    fn allow(&self, frame: &Frame, remote: SocketAddr) -> bool;
}

/// Filter from a plain closure.
pub struct FnFilter<F>(pub F);

impl<F> SendFilter for FnFilter<F>
where
    F: Fn(&Frame, SocketAddr) -> bool + Send + Sync,
{
    fn allow(&self, frame: &Frame, remote: SocketAddr) -> bool {
        (self.0)(frame, remote)
    }
}

/// Convenience constructor for a boxed closure filter.
pub fn from_fn<F>(f: F) -> Arc<dyn SendFilter>
where
    F: Fn(&Frame, SocketAddr) -> bool + Send + Sync + 'static,
{
    Arc::new(FnFilter(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::FrameType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fn_filter_drops_matching_frames() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dropped);
        let filter = from_fn(move |frame, _| {
            if frame.sequence == 1 {
                counter.fetch_add(1, Ordering::AcqRel);
                false
            } else {
                true
            }
        });

        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let keep = Frame::data(1, 2, 3, 0, vec![1]);
        let drop = Frame::data(1, 2, 3, 1, vec![2]);
        let ctrl = Frame::control(1, 2, FrameType::Ping, vec![]);

        assert!(filter.allow(&keep, remote));
        assert!(!filter.allow(&drop, remote));
        assert!(filter.allow(&ctrl, remote));
        assert_eq!(dropped.load(Ordering::Acquire), 1);
    }
}
