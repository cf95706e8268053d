// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;

use super::*;

const ALL: [UploadStatus; 5] = [
    UploadStatus::Pending,
    UploadStatus::Uploading,
    UploadStatus::Confirming,
    UploadStatus::Completed,
    UploadStatus::Error,
];

#[yare::parameterized(
    pending_to_uploading = { UploadStatus::Pending, UploadStatus::Uploading, true },
    uploading_to_confirming = { UploadStatus::Uploading, UploadStatus::Confirming, true },
    confirming_to_completed = { UploadStatus::Confirming, UploadStatus::Completed, true },
    pending_to_error = { UploadStatus::Pending, UploadStatus::Error, true },
    confirming_to_error = { UploadStatus::Confirming, UploadStatus::Error, true },
    skip_ahead = { UploadStatus::Pending, UploadStatus::Confirming, false },
    backwards = { UploadStatus::Confirming, UploadStatus::Uploading, false },
    same_state = { UploadStatus::Uploading, UploadStatus::Uploading, false },
    completed_is_terminal = { UploadStatus::Completed, UploadStatus::Error, false },
    error_is_terminal = { UploadStatus::Error, UploadStatus::Pending, false },
)]
fn transitions(from: UploadStatus, to: UploadStatus, allowed: bool) {
    assert_eq!(from.can_advance_to(to), allowed);
}

#[yare::parameterized(
    empty = { 0, 0, 100 },
    start = { 0, 200, 0 },
    half = { 100, 200, 50 },
    rounds_up = { 1, 200, 1 },
    rounds_down = { 1, 300, 0 },
    done = { 200, 200, 100 },
    overshoot = { 500, 200, 100 },
)]
fn percent_of_total(sent: u64, total: u64, expected: u8) {
    assert_eq!(percent(sent, total), expected);
}

#[test]
fn batch_messages() {
    let report = BatchReport { file_ids: vec!["a".into(), "b".into()], failed: vec!["c.png".into()] };
    assert_eq!(report.success_message().as_deref(), Some("Successfully uploaded 2 file(s)"));
    assert_eq!(report.failure_message().as_deref(), Some("Failed to upload 1 file(s): c.png"));
    assert_eq!(BatchReport::default().failure_message(), None);
}

#[test]
fn transfer_error_messages() {
    assert_eq!(TransferError::Status(503).to_string(), "upload failed with status 503");
    assert_eq!(TransferError::TimedOut.to_string(), "upload timed out");
}

#[test]
fn event_serializes_tagged() -> anyhow::Result<()> {
    let event = UploadEvent::Progress { id: "u1".into(), progress: 40, status: UploadStatus::Uploading };
    let value = serde_json::to_value(&event)?;
    assert_eq!(value["event"], "progress");
    assert_eq!(value["status"], "uploading");
    Ok(())
}

proptest! {
    /// Applying any sequence of requested transitions through the guard
    /// yields a forward-only path in which `error` can only come last.
    #[test]
    fn guarded_paths_are_monotonic(requests in prop::collection::vec(0usize..ALL.len(), 0..32)) {
        let mut current = UploadStatus::Pending;
        let mut path = vec![current];
        for index in requests {
            let next = ALL[index];
            if current.can_advance_to(next) {
                current = next;
                path.push(next);
            }
        }

        for pair in path.windows(2) {
            prop_assert!(pair[0] != UploadStatus::Error);
            if pair[1] != UploadStatus::Error {
                prop_assert_eq!(pair[1].rank(), pair[0].rank() + 1);
            }
        }
        prop_assert!(path.len() <= 4);
    }
}
