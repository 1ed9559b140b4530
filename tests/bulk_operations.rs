//! Bulk runner over many cases

mod helpers;

use tokio::sync::watch;
use uuid::Uuid;

use helpers::{clerk, section_officer, Harness};
use transfer_workflow::case::ClearanceStatus;
use transfer_workflow::workflow::{BulkItemResult, BulkOperation, BulkRunner};

fn clearance(section: &str, status: ClearanceStatus) -> BulkOperation {
    BulkOperation::RecordClearance {
        section: section.to_string(),
        status,
        remarks: Some("batch decision".to_string()),
        actor: section_officer(section),
        auto_transition: None,
    }
}

async fn cases_in_sections(h: &Harness, count: usize) -> Vec<Uuid> {
    let mut case_ids = Vec::with_capacity(count);
    for i in 0..count {
        case_ids.push(h.case_with_sections(&format!("PT-BULK-{}", i)).await);
    }
    case_ids
}

#[tokio::test]
async fn test_unknown_case_fails_alone() {
    let h = Harness::new();
    let mut case_ids = cases_in_sections(&h, 4).await;
    let missing = Uuid::new_v4();
    case_ids.insert(2, missing);

    let runner = BulkRunner::new(h.orchestrator.clone());
    let summary = runner
        .apply_to_many(&case_ids, &clearance("BCA", ClearanceStatus::Clear), None)
        .await;

    assert_eq!(summary.total, 5);
    assert_eq!(summary.successful.len() + summary.failed.len(), summary.total);
    assert_eq!(summary.successful.len(), 4);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].case_id, missing);
    assert_eq!(summary.failed[0].code, "CASE_NOT_FOUND");
    assert!(!summary.all_succeeded());

    let expected: Vec<Uuid> = case_ids.iter().copied().filter(|id| *id != missing).collect();
    let succeeded: Vec<Uuid> = summary.successful.iter().map(|s| s.case_id).collect();
    assert_eq!(succeeded, expected);
}

#[tokio::test]
async fn test_bulk_clearance_unlocks_auto_transition() {
    let h = Harness::new();
    let case_ids = cases_in_sections(&h, 3).await;
    let runner = BulkRunner::new(h.orchestrator.clone()).with_concurrency(2);

    let first = runner
        .apply_to_many(&case_ids, &clearance("BCA", ClearanceStatus::Clear), None)
        .await;
    assert!(first.all_succeeded());

    let second = runner
        .apply_to_many(&case_ids, &clearance("HOUSING", ClearanceStatus::Clear), None)
        .await;
    assert!(second.all_succeeded());

    for success in &second.successful {
        match &success.result {
            BulkItemResult::Recorded { outcome } => {
                assert_eq!(outcome.chained.len(), 1);
                assert_eq!(outcome.chained[0].to_stage, "SECTIONS_CLEARED");
            }
            other => panic!("expected a recorded clearance, got {:?}", other),
        }
        assert_eq!(h.stage(success.case_id).await, "SECTIONS_CLEARED");
    }
    assert_eq!(h.documents.document_types().await.len(), 3);
}

#[tokio::test]
async fn test_bulk_transition_reports_blocked_items() {
    let h = Harness::new();
    let ready = h.open_case("PT-BULK-READY").await;
    h.attach(ready, &helpers::REQUIRED_DOCUMENTS).await;
    let incomplete = h.open_case("PT-BULK-INCOMPLETE").await;
    h.attach(incomplete, &helpers::REQUIRED_DOCUMENTS[..3]).await;

    let op = BulkOperation::Transition {
        to_stage: "UNDER_SCRUTINY".to_string(),
        actor: clerk(),
        remarks: None,
    };
    let summary = BulkRunner::new(h.orchestrator.clone())
        .apply_to_many(&[ready, incomplete], &op, None)
        .await;

    assert_eq!(summary.successful.len(), 1);
    assert_eq!(summary.successful[0].case_id, ready);
    assert_eq!(summary.failed[0].case_id, incomplete);
    assert_eq!(summary.failed[0].code, "TRANSITION_BLOCKED");
    assert!(summary.failed[0].error.contains("Missing required attachment: PHOTOGRAPHS"));
    assert_eq!(h.stage(incomplete).await, "SUBMITTED");
}

#[tokio::test]
async fn test_duplicate_case_ids_run_in_order() {
    let h = Harness::new();
    let case_id = h.open_case("PT-BULK-DUP").await;
    h.attach(case_id, &helpers::REQUIRED_DOCUMENTS).await;

    let op = BulkOperation::Transition {
        to_stage: "UNDER_SCRUTINY".to_string(),
        actor: clerk(),
        remarks: Some("batch intake".to_string()),
    };
    let summary = BulkRunner::new(h.orchestrator.clone())
        .apply_to_many(&[case_id, case_id], &op, None)
        .await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.successful.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].code, "INVALID_EDGE");
    assert_eq!(h.orchestrator.stage_history(case_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_touches_nothing() {
    let h = Harness::new();
    let case_ids = cases_in_sections(&h, 3).await;
    let logs_before: Vec<usize> = {
        let mut lens = Vec::new();
        for case_id in &case_ids {
            lens.push(h.orchestrator.audit_log(*case_id).await.unwrap().len());
        }
        lens
    };

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let summary = BulkRunner::new(h.orchestrator.clone())
        .apply_to_many(&case_ids, &clearance("BCA", ClearanceStatus::Clear), Some(rx))
        .await;

    assert_eq!(summary.total, 3);
    assert!(summary.successful.is_empty());
    assert!(summary.failed.iter().all(|f| f.is_cancelled()));
    assert!(summary
        .failed
        .iter()
        .all(|f| f.error == "cancelled before processing"));

    for (case_id, before) in case_ids.iter().zip(logs_before) {
        assert_eq!(h.orchestrator.audit_log(*case_id).await.unwrap().len(), before);
    }
}

#[tokio::test]
async fn test_empty_input() {
    let h = Harness::new();
    let summary = BulkRunner::new(h.orchestrator.clone())
        .apply_to_many(&[], &clearance("BCA", ClearanceStatus::Clear), None)
        .await;

    assert_eq!(summary.total, 0);
    assert!(summary.all_succeeded());
}
