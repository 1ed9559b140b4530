//! End-to-end behaviour of the transition engine against the shipped catalog
//!
//! Uses the in-memory store and a recording document service.

mod helpers;

use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use helpers::{approver, clerk, scrutiny_officer, section_officer, Harness, RecordingDocuments};
use transfer_workflow::case::{AuditAction, ClearanceStatus, FeeLine};
use transfer_workflow::config::EngineConfig;
use transfer_workflow::workflow::{
    AutoTransitionOutcome, BlockerType, ClearanceInput, HookOutcome, ReviewInput,
    TransitionRequest, WorkflowError,
};

fn without_auto_chain() -> EngineConfig {
    EngineConfig {
        max_auto_chain: 0,
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_missing_attachment_blocks_until_added() {
    let h = Harness::new();
    let case_id = h.open_case("PT-1001").await;
    h.attach(case_id, &helpers::REQUIRED_DOCUMENTS[..6]).await;

    let check = h
        .orchestrator
        .check(case_id, "UNDER_SCRUTINY", &clerk())
        .await
        .unwrap();
    assert!(!check.can_transition);
    assert_eq!(check.reason, "Missing required attachment: UNDERTAKING");
    assert!(matches!(
        &check.blockers[0].blocker_type,
        BlockerType::MissingAttachment { document_type } if document_type == "UNDERTAKING"
    ));

    let log_before = h.orchestrator.audit_log(case_id).await.unwrap();
    let err = h
        .orchestrator
        .commit(TransitionRequest::new(case_id, "UNDER_SCRUTINY", clerk()))
        .await
        .unwrap_err();
    match err {
        WorkflowError::TransitionBlocked { from, to, result } => {
            assert_eq!(from, "SUBMITTED");
            assert_eq!(to, "UNDER_SCRUTINY");
            assert_eq!(result, check);
        }
        other => panic!("expected TransitionBlocked, got {:?}", other),
    }
    assert_eq!(h.stage(case_id).await, "SUBMITTED");
    assert_eq!(h.orchestrator.audit_log(case_id).await.unwrap(), log_before);

    h.attach(case_id, &["UNDERTAKING"]).await;
    let outcome = h
        .orchestrator
        .commit(
            TransitionRequest::new(case_id, "UNDER_SCRUTINY", clerk())
                .with_remarks("file complete"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.from_stage, "SUBMITTED");
    assert_eq!(outcome.to_stage, "UNDER_SCRUTINY");
    assert!(outcome.chained.is_empty());

    let log = h.orchestrator.audit_log(case_id).await.unwrap();
    let transitions: Vec<_> = log
        .iter()
        .filter(|e| e.action == AuditAction::StageTransition)
        .collect();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].entry_id, outcome.audit_entry_id);
    assert_eq!(transitions[0].from_stage.as_deref(), Some("SUBMITTED"));
    assert_eq!(transitions[0].to_stage.as_deref(), Some("UNDER_SCRUTINY"));
    assert_eq!(
        transitions[0].details,
        "Stage changed from SUBMITTED to UNDER_SCRUTINY. Remarks: file complete"
    );
}

#[tokio::test]
async fn test_objection_blocks_then_clearance_fires_hook() {
    let h = Harness::with(without_auto_chain(), RecordingDocuments::default());
    let case_id = h.case_with_sections("PT-1002").await;

    for (section, status) in [("BCA", ClearanceStatus::Clear), ("HOUSING", ClearanceStatus::Objection)] {
        h.orchestrator
            .record_clearance(ClearanceInput::new(case_id, section, status, section_officer(section)))
            .await
            .unwrap();
    }

    let blocked = h
        .orchestrator
        .check(case_id, "SECTIONS_CLEARED", &scrutiny_officer())
        .await
        .unwrap();
    assert!(!blocked.can_transition);
    assert!(!blocked.is_invalid_edge());
    assert_eq!(blocked.reason, "HOUSING clearance is OBJECTION");

    h.orchestrator
        .record_clearance(
            ClearanceInput::new(case_id, "HOUSING", ClearanceStatus::Clear, section_officer("HOUSING"))
                .with_remarks("dues settled"),
        )
        .await
        .unwrap();
    assert!(h
        .orchestrator
        .check(case_id, "SECTIONS_CLEARED", &scrutiny_officer())
        .await
        .unwrap()
        .can_transition);

    let outcome = h
        .orchestrator
        .commit(TransitionRequest::new(case_id, "SECTIONS_CLEARED", scrutiny_officer()))
        .await
        .unwrap();
    assert_eq!(
        outcome.hooks,
        vec![HookOutcome::Generated {
            document_type: "SECTION_CLEARANCE_SUMMARY".into(),
            document_id: "DOC-SECTION_CLEARANCE_SUMMARY".into(),
        }]
    );

    let requests = h.documents.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].template_data["clearances"]["HOUSING"], "CLEAR");
    assert_eq!(requests[0].template_data["reference"], "PT-1002");
}

#[tokio::test]
async fn test_transition_is_audited_before_hook_outcome() {
    let h = Harness::with(without_auto_chain(), RecordingDocuments::default());
    let case_id = h.case_with_sections("PT-1003").await;
    for section in ["BCA", "HOUSING"] {
        h.orchestrator
            .record_clearance(ClearanceInput::new(
                case_id,
                section,
                ClearanceStatus::Clear,
                section_officer(section),
            ))
            .await
            .unwrap();
    }

    h.orchestrator
        .commit(TransitionRequest::new(case_id, "SECTIONS_CLEARED", scrutiny_officer()))
        .await
        .unwrap();

    let actions: Vec<AuditAction> = h
        .orchestrator
        .audit_log(case_id)
        .await
        .unwrap()
        .iter()
        .rev()
        .take(2)
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![AuditAction::DocumentGenerated, AuditAction::StageTransition]
    );
}

#[tokio::test]
async fn test_hook_failure_does_not_unwind_commit() {
    let h = Harness::with(without_auto_chain(), RecordingDocuments::failing());
    let case_id = h.case_with_sections("PT-1004").await;
    for section in ["BCA", "HOUSING"] {
        h.orchestrator
            .record_clearance(ClearanceInput::new(
                case_id,
                section,
                ClearanceStatus::Clear,
                section_officer(section),
            ))
            .await
            .unwrap();
    }

    let outcome = h
        .orchestrator
        .commit(TransitionRequest::new(case_id, "SECTIONS_CLEARED", scrutiny_officer()))
        .await
        .unwrap();

    assert!(outcome.hooks[0].is_failure());
    assert_eq!(h.stage(case_id).await, "SECTIONS_CLEARED");

    let last = h.orchestrator.audit_log(case_id).await.unwrap().pop().unwrap();
    assert_eq!(last.action, AuditAction::HookFailed);
    assert!(last.details.contains("template missing"));
    assert_eq!(last.to_stage.as_deref(), Some("SECTIONS_CLEARED"));
}

#[tokio::test]
async fn test_detached_hooks_run_after_commit_returns() {
    let config = EngineConfig::default().with_hooks_detached(true);
    let h = Harness::with(config, RecordingDocuments::default());
    let case_id = h.case_with_sections("PT-1005").await;

    h.orchestrator
        .record_clearance(ClearanceInput::new(
            case_id,
            "BCA",
            ClearanceStatus::Clear,
            section_officer("BCA"),
        ))
        .await
        .unwrap();
    let recorded = h
        .orchestrator
        .record_clearance(ClearanceInput::new(
            case_id,
            "HOUSING",
            ClearanceStatus::Clear,
            section_officer("HOUSING"),
        ))
        .await
        .unwrap();

    assert_eq!(recorded.chained.len(), 1);
    assert!(recorded.chained[0].hooks.is_empty());

    let mut generated = Vec::new();
    for _ in 0..100 {
        generated = h.documents.document_types().await;
        if !generated.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(generated, vec!["SECTION_CLEARANCE_SUMMARY".to_string()]);
}

#[tokio::test]
async fn test_dry_run_matches_check_for_every_edge() {
    let h = Harness::new();
    let case_id = h.open_case("PT-1006").await;
    h.attach(case_id, &helpers::REQUIRED_DOCUMENTS).await;
    h.orchestrator
        .commit(TransitionRequest::new(case_id, "UNDER_SCRUTINY", clerk()))
        .await
        .unwrap();

    for actor in [clerk(), scrutiny_officer()] {
        let options = h.orchestrator.dry_run(case_id, &actor).await.unwrap();
        let targets: Vec<&str> = options.iter().map(|o| o.to_stage.as_str()).collect();
        assert_eq!(targets, vec!["SENT_TO_SECTIONS", "RETURNED"]);

        for option in &options {
            let checked = h
                .orchestrator
                .check(case_id, &option.to_stage, &actor)
                .await
                .unwrap();
            assert_eq!(checked, option.result);
        }
    }
}

#[tokio::test]
async fn test_role_guard_and_invalid_edge() {
    let h = Harness::new();
    let case_id = h.open_case("PT-1007").await;
    h.attach(case_id, &helpers::REQUIRED_DOCUMENTS).await;
    h.orchestrator
        .commit(TransitionRequest::new(case_id, "UNDER_SCRUTINY", clerk()))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .commit(TransitionRequest::new(case_id, "SENT_TO_SECTIONS", clerk()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TRANSITION_BLOCKED");

    let err = h
        .orchestrator
        .commit(TransitionRequest::new(case_id, "APPROVED", approver()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidEdge { ref from, ref to } if from == "UNDER_SCRUTINY" && to == "APPROVED"
    ));
}

#[tokio::test]
async fn test_objection_auto_transitions_and_recovers() {
    let h = Harness::new();
    let case_id = h.case_with_sections("PT-1008").await;

    let outcome = h
        .orchestrator
        .record_clearance(ClearanceInput::new(
            case_id,
            "HOUSING",
            ClearanceStatus::Objection,
            section_officer("HOUSING"),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.chained.len(), 1);
    assert_eq!(outcome.chained[0].to_stage, "OBJECTION_RAISED");
    assert_eq!(h.stage(case_id).await, "OBJECTION_RAISED");

    h.orchestrator
        .record_clearance(ClearanceInput::new(
            case_id,
            "HOUSING",
            ClearanceStatus::Clear,
            section_officer("HOUSING"),
        ))
        .await
        .unwrap();
    // Still OBJECTION_RAISED: the auto edges leave SENT_TO_SECTIONS only
    assert_eq!(h.stage(case_id).await, "OBJECTION_RAISED");

    h.orchestrator
        .record_clearance(ClearanceInput::new(
            case_id,
            "BCA",
            ClearanceStatus::Clear,
            section_officer("BCA"),
        ))
        .await
        .unwrap();

    let outcome = h
        .orchestrator
        .commit(TransitionRequest::new(case_id, "SENT_TO_SECTIONS", scrutiny_officer()))
        .await
        .unwrap();
    assert_eq!(outcome.final_stage(), "SECTIONS_CLEARED");
    assert_eq!(outcome.chained[0].from_stage, "SENT_TO_SECTIONS");
    assert!(outcome.chained[0].hooks.iter().all(|hook| !hook.is_failure()));

    let history = h.orchestrator.stage_history(case_id).await.unwrap();
    let stages: Vec<&str> = history.iter().map(|c| c.to_stage.as_str()).collect();
    assert_eq!(
        stages,
        vec![
            "UNDER_SCRUTINY",
            "SENT_TO_SECTIONS",
            "OBJECTION_RAISED",
            "SENT_TO_SECTIONS",
            "SECTIONS_CLEARED"
        ]
    );
    assert!(history[2].actor.is_system());
}

#[tokio::test]
async fn test_full_lifecycle_to_completion() {
    let h = Harness::new();
    let case_id = h.case_with_sections("PT-1009").await;

    for section in ["BCA", "HOUSING"] {
        h.orchestrator
            .record_clearance(ClearanceInput::new(
                case_id,
                section,
                ClearanceStatus::Clear,
                section_officer(section),
            ))
            .await
            .unwrap();
    }
    assert_eq!(h.stage(case_id).await, "SECTIONS_CLEARED");

    let reviewed = h
        .orchestrator
        .record_review(
            ReviewInput::new(case_id, "primary", true, scrutiny_officer())
                .then_transition("ACCOUNTS_PENDING"),
        )
        .await
        .unwrap();
    assert!(matches!(
        reviewed.auto_transition,
        Some(AutoTransitionOutcome::Committed { .. })
    ));

    let accounts = section_officer("ACCOUNTS");
    h.orchestrator
        .set_accounts(
            case_id,
            vec![
                FeeLine::new("TRANSFER_FEE", Decimal::new(25_000, 0)),
                FeeLine::new("STAMP_DUTY", Decimal::new(7_500, 0)),
            ],
            &accounts,
        )
        .await
        .unwrap();
    h.orchestrator
        .record_payment(case_id, "CHQ-88", Decimal::new(32_500, 0), &accounts)
        .await
        .unwrap();

    let premature = h
        .orchestrator
        .check(case_id, "PAYMENT_CONFIRMED", &accounts)
        .await
        .unwrap();
    assert_eq!(premature.reason, "No decision recorded for section ACCOUNTS");

    let recorded = h
        .orchestrator
        .record_clearance(
            ClearanceInput::new(case_id, "ACCOUNTS", ClearanceStatus::Clear, accounts.clone())
                .then_transition("PAYMENT_CONFIRMED"),
        )
        .await
        .unwrap();
    match recorded.auto_transition {
        Some(AutoTransitionOutcome::Committed { commit }) => {
            assert_eq!(commit.final_stage(), "READY_FOR_APPROVAL");
            assert_eq!(commit.chained[0].hooks.len(), 1);
        }
        other => panic!("expected committed transition, got {:?}", other),
    }

    h.orchestrator
        .commit(TransitionRequest::new(case_id, "APPROVED", approver()))
        .await
        .unwrap();

    let blocked = h
        .orchestrator
        .check(case_id, "TRANSFER_COMPLETED", &clerk())
        .await
        .unwrap();
    assert_eq!(blocked.reason, "Transfer deed not recorded");

    h.orchestrator
        .record_deed(
            case_id,
            "DEED-2024-118",
            NaiveDate::from_ymd_opt(2024, 5, 14).unwrap(),
            vec!["witness-a".into(), "witness-b".into()],
            &clerk(),
        )
        .await
        .unwrap();
    let completed = h
        .orchestrator
        .commit(TransitionRequest::new(case_id, "TRANSFER_COMPLETED", clerk()))
        .await
        .unwrap();
    assert_eq!(completed.to_stage, "TRANSFER_COMPLETED");
    assert!(h.orchestrator.graph().is_terminal("TRANSFER_COMPLETED"));

    assert_eq!(
        h.documents.document_types().await,
        vec![
            "SECTION_CLEARANCE_SUMMARY",
            "DISPATCH_MEMO",
            "TRANSFER_LETTER",
            "COMPLETION_CERTIFICATE"
        ]
    );

    let history = h.orchestrator.stage_history(case_id).await.unwrap();
    assert_eq!(history.len(), 8);
    assert_eq!(history.last().unwrap().to_stage, "TRANSFER_COMPLETED");
}

#[tokio::test]
async fn test_rejected_accounts_leave_no_trace() {
    let h = Harness::new();
    let case_id = h.open_case("PT-1010").await;
    let before = h.orchestrator.audit_log(case_id).await.unwrap().len();

    let err = h
        .orchestrator
        .set_accounts(
            case_id,
            vec![
                FeeLine::new("TRANSFER_FEE", Decimal::new(100, 0)),
                FeeLine::new("TRANSFER_FEE", Decimal::new(100, 0)),
            ],
            &clerk(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PRECONDITION_FAILED");
    assert_eq!(h.orchestrator.audit_log(case_id).await.unwrap().len(), before);
}

#[tokio::test]
async fn test_confirmed_review_cannot_pass_over_new_objection() {
    let h = Harness::new();
    let case_id = h.case_with_sections("PT-1011").await;
    for section in ["BCA", "HOUSING"] {
        h.orchestrator
            .record_clearance(ClearanceInput::new(
                case_id,
                section,
                ClearanceStatus::Clear,
                section_officer(section),
            ))
            .await
            .unwrap();
    }
    assert_eq!(h.stage(case_id).await, "SECTIONS_CLEARED");

    // No auto edge leaves SECTIONS_CLEARED, so the objection only changes state
    h.orchestrator
        .record_clearance(ClearanceInput::new(
            case_id,
            "HOUSING",
            ClearanceStatus::Objection,
            section_officer("HOUSING"),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;

    let reviewed = h
        .orchestrator
        .record_review(
            ReviewInput::new(case_id, "primary", true, scrutiny_officer())
                .then_transition("ACCOUNTS_PENDING"),
        )
        .await
        .unwrap();
    match reviewed.auto_transition {
        Some(AutoTransitionOutcome::NotCommitted { code, reason }) => {
            assert_eq!(code, "TRANSITION_BLOCKED");
            assert!(reason.contains("HOUSING clearance is OBJECTION"));
        }
        other => panic!("expected blocked transition, got {:?}", other),
    }

    let check = h
        .orchestrator
        .check(case_id, "ACCOUNTS_PENDING", &scrutiny_officer())
        .await
        .unwrap();
    assert!(!check.can_transition);
    assert!(check.blockers.iter().all(|b| !matches!(
        b.blocker_type,
        BlockerType::ReviewStale { .. }
    )));
    assert_eq!(h.stage(case_id).await, "SECTIONS_CLEARED");
}

#[tokio::test]
async fn test_blocked_requested_transition_still_fires_auto_edges() {
    let h = Harness::new();
    let case_id = h.case_with_sections("PT-1012").await;

    let outcome = h
        .orchestrator
        .record_clearance(
            ClearanceInput::new(
                case_id,
                "HOUSING",
                ClearanceStatus::Objection,
                section_officer("HOUSING"),
            )
            .then_transition("SECTIONS_CLEARED"),
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome.auto_transition,
        Some(AutoTransitionOutcome::NotCommitted { ref code, .. }) if code == "TRANSITION_BLOCKED"
    ));
    assert_eq!(outcome.chained.len(), 1);
    assert_eq!(outcome.chained[0].to_stage, "OBJECTION_RAISED");
    assert_eq!(outcome.chained[0].from_stage, "SENT_TO_SECTIONS");
    assert_eq!(h.stage(case_id).await, "OBJECTION_RAISED");
}
