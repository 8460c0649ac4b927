// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for concurrent progress reporting
//!
//! Many reporter tasks drive one AgentProgress at once, the way inbound
//! agent messages do, while a poller watches the verdict predicates.

use bro_orchestrator_core::domain::progress::{AgentProgress, Progress};
use std::sync::Arc;

const FRAGMENTS: usize = 200;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fragment_reports_reach_verdict() {
    let tracker = Arc::new(AgentProgress::new());
    for i in 0..FRAGMENTS {
        tracker.handle_new_fragment(&format!("fragment-{}", i));
    }

    let reporters: Vec<_> = (0..FRAGMENTS)
        .map(|i| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker.set_fragment_progress(&format!("fragment-{}", i), Progress::Successful);
            })
        })
        .collect();

    for reporter in reporters {
        reporter.await.unwrap();
    }

    assert!(!tracker.did_finish());
    tracker.set_progress(Progress::Successful);
    assert!(tracker.did_finish());
    assert!(tracker.did_succeed());
    assert_eq!(tracker.fragment_count(), FRAGMENTS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_failed_fragment_among_many() {
    let tracker = Arc::new(AgentProgress::new());

    let reporters: Vec<_> = (0..FRAGMENTS)
        .map(|i| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                let id = format!("fragment-{}", i);
                tracker.handle_new_fragment(&id);
                let progress = if i == FRAGMENTS / 2 {
                    Progress::Failed
                } else {
                    Progress::Successful
                };
                tracker.set_fragment_progress(&id, progress);
            })
        })
        .collect();

    for reporter in reporters {
        reporter.await.unwrap();
    }
    tracker.set_progress(Progress::Successful);

    assert!(tracker.did_finish());
    assert!(!tracker.did_succeed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_while_reporting() {
    let tracker = Arc::new(AgentProgress::new());
    for i in 0..FRAGMENTS {
        tracker.handle_new_fragment(&format!("fragment-{}", i));
    }

    let reporters: Vec<_> = (0..FRAGMENTS / 2)
        .map(|i| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker.set_fragment_progress(&format!("fragment-{}", i), Progress::Successful);
            })
        })
        .collect();
    for reporter in reporters {
        reporter.await.unwrap();
    }

    let failed = tracker.fail_waiting_fragments();
    tracker.set_progress(Progress::Disconnected);

    assert_eq!(failed, FRAGMENTS / 2);
    assert!(tracker.did_finish());
    assert!(!tracker.did_succeed());
    assert!(!tracker.is_connected());
    assert_eq!(
        tracker.fragment_progress("fragment-0"),
        Some(Progress::Successful)
    );
}
