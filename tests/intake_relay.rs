mod common;

use anyhow::anyhow;
use common::{seed, RecordingNotifier};
use docrelay::{
    collab::SubmitRequest,
    config::Config,
    correlation::{CallbackOutcome, CorrelationEngine, IgnoreReason},
    callback::CallbackEvent,
    error::{LedgerError, SubmissionError},
    intake::Intake,
    ledger::{Ledger, SubmissionHandle, SubmissionStatus},
    maintenance,
    relay::{InboundDocument, InboundMessage, Relay, RelayOutcome},
    util::now_unix,
};
use std::cell::RefCell;

fn pdf(from: &str) -> InboundMessage {
    InboundMessage {
        from: from.into(),
        document: Some(InboundDocument {
            media_ref: "media:77".into(),
            filename: "essay.pdf".into(),
            mime_type: "application/pdf".into(),
        }),
    }
}

#[test]
fn intake_then_callback_end_to_end() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let notifier = RecordingNotifier::default();
    let seen = RefCell::new(Vec::<SubmitRequest>::new());
    let scanner = |req: &SubmitRequest| -> anyhow::Result<String> {
        seen.borrow_mut().push(req.clone());
        Ok("J1".to_string())
    };

    let job_id = Intake::new(&ledger, &cfg.scan)
        .submit("u1", "doc.pdf", "doc.pdf", &scanner)
        .unwrap();
    assert_eq!(job_id, "J1");
    assert_eq!(seen.borrow()[0].input_ref, "doc.pdf");

    let sub = ledger.find_by_job_id("J1").unwrap().unwrap();
    assert_eq!(sub.user_ref, "u1");
    assert_eq!(sub.status, SubmissionStatus::Submitted);

    let engine = CorrelationEngine::new(&cfg, &ledger, &notifier);
    let ev = CallbackEvent {
        job_id: "J1".into(),
        status: "completed".into(),
        report_ref: Some("R1".into()),
    };
    assert_eq!(engine.handle_callback(&ev).unwrap(), CallbackOutcome::Delivered);
    assert_eq!(engine.handle_callback(&ev).unwrap(), CallbackOutcome::Duplicate {
        current: SubmissionStatus::Delivered
    });
    assert_eq!(notifier.documents().len(), 1);
}

#[test]
fn scanner_failure_abandons_the_record() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let scanner = |_: &SubmitRequest| -> anyhow::Result<String> { Err(anyhow!("503 from scanner")) };

    let err = Intake::new(&ledger, &cfg.scan)
        .submit("u1", "doc.pdf", "doc.pdf", &scanner)
        .unwrap_err();
    assert!(matches!(err, SubmissionError::External(_)));

    let sub = ledger.get(SubmissionHandle(1)).unwrap().unwrap();
    assert_eq!(sub.status, SubmissionStatus::Abandoned);
    assert!(sub.job_id.is_none());
    assert!(sub.last_error.unwrap().contains("503"));
}

#[test]
fn blank_job_id_counts_as_external_failure() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let scanner = |_: &SubmitRequest| -> anyhow::Result<String> { Ok("  ".to_string()) };

    let err = Intake::new(&ledger, &cfg.scan)
        .submit("u1", "doc.pdf", "doc.pdf", &scanner)
        .unwrap_err();
    assert!(matches!(err, SubmissionError::External(_)));
    assert_eq!(ledger.counts().unwrap()["ABANDONED"], 1);
}

#[test]
fn reused_job_id_is_a_correlation_error() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let first = seed(&ledger, "u1", "J1");
    let scanner = |_: &SubmitRequest| -> anyhow::Result<String> { Ok("J1".to_string()) };

    let err = Intake::new(&ledger, &cfg.scan)
        .submit("u2", "b.pdf", "b.pdf", &scanner)
        .unwrap_err();
    assert!(matches!(
        err,
        SubmissionError::Correlation(LedgerError::DuplicateJobId { .. })
    ));

    // The original mapping is untouched; the new record is abandoned.
    let owner = ledger.find_by_job_id("J1").unwrap().unwrap();
    assert_eq!(owner.handle, first);
    assert_eq!(owner.user_ref, "u1");
    assert_eq!(ledger.counts().unwrap()["ABANDONED"], 1);
}

#[test]
fn sweep_during_scanner_call_fails_the_submission() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let notifier = RecordingNotifier::default();
    // The sweep lands while the scanner call is in flight.
    let scanner = |_: &SubmitRequest| -> anyhow::Result<String> {
        let swept = maintenance::sweep_stale(&ledger, 0, now_unix() + 1)?;
        assert_eq!(swept.abandoned.len(), 1);
        Ok("J1".to_string())
    };

    let outcome = Relay::new(&cfg, &ledger, &scanner, &notifier).on_message(&pdf("u1"));
    assert!(matches!(outcome, RelayOutcome::Failed { .. }));
    assert_eq!(
        notifier.texts_to("u1"),
        vec![
            cfg.messages.received.clone(),
            cfg.messages.submission_failed.clone()
        ]
    );

    let sub = ledger.get(SubmissionHandle(1)).unwrap().unwrap();
    assert_eq!(sub.status, SubmissionStatus::Abandoned);
    assert!(sub.job_id.is_none());

    let late = CorrelationEngine::new(&cfg, &ledger, &notifier)
        .handle_callback(&CallbackEvent {
            job_id: "J1".into(),
            status: "completed".into(),
            report_ref: Some("R1".into()),
        })
        .unwrap();
    assert_eq!(
        late,
        CallbackOutcome::Ignored {
            reason: IgnoreReason::UnknownJob
        }
    );
}

#[test]
fn swept_record_refuses_a_late_job_id() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let scanner = |_: &SubmitRequest| -> anyhow::Result<String> {
        maintenance::sweep_stale(&ledger, 0, now_unix() + 1)?;
        Ok("J1".to_string())
    };

    let err = Intake::new(&ledger, &cfg.scan)
        .submit("u1", "doc.pdf", "doc.pdf", &scanner)
        .unwrap_err();
    assert!(matches!(
        err,
        SubmissionError::Ledger(LedgerError::NotAttachable {
            current: SubmissionStatus::Abandoned,
            ..
        })
    ));
    assert!(ledger.find_by_job_id("J1").unwrap().is_none());
}

#[test]
fn relay_acknowledges_and_submits_pdf() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let notifier = RecordingNotifier::default();
    let scanner = |_: &SubmitRequest| -> anyhow::Result<String> { Ok("4821".to_string()) };

    let outcome = Relay::new(&cfg, &ledger, &scanner, &notifier).on_message(&pdf("u1"));
    assert_eq!(
        outcome,
        RelayOutcome::Submitted {
            job_id: "4821".into()
        }
    );
    assert_eq!(
        notifier.texts_to("u1"),
        vec![cfg.messages.received.clone(), cfg.messages.submitted.clone()]
    );
    assert_eq!(ledger.find_by_job_id("4821").unwrap().unwrap().filename, "essay.pdf");
}

#[test]
fn relay_prompts_for_non_pdf() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let notifier = RecordingNotifier::default();
    let scanner = |_: &SubmitRequest| -> anyhow::Result<String> { panic!("must not submit") };

    let mut msg = pdf("u1");
    msg.document.as_mut().unwrap().mime_type = "image/png".into();
    let relay = Relay::new(&cfg, &ledger, &scanner, &notifier);
    assert_eq!(relay.on_message(&msg), RelayOutcome::Prompted);

    let text_only = InboundMessage {
        from: "u1".into(),
        document: None,
    };
    assert_eq!(relay.on_message(&text_only), RelayOutcome::Prompted);

    assert_eq!(
        notifier.texts_to("u1"),
        vec![cfg.messages.send_a_document.clone(); 2]
    );
    assert_eq!(ledger.counts().unwrap().values().sum::<u64>(), 0);
}

#[test]
fn relay_reports_submission_failure_to_user() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let notifier = RecordingNotifier::default();
    let scanner = |_: &SubmitRequest| -> anyhow::Result<String> { Err(anyhow!("timeout")) };

    let outcome = Relay::new(&cfg, &ledger, &scanner, &notifier).on_message(&pdf("u1"));
    assert!(matches!(outcome, RelayOutcome::Failed { .. }));
    assert_eq!(
        notifier.texts_to("u1"),
        vec![
            cfg.messages.received.clone(),
            cfg.messages.submission_failed.clone()
        ]
    );
}

#[test]
fn relay_survives_a_dead_text_channel() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let notifier = RecordingNotifier {
        fail_texts: true,
        ..RecordingNotifier::default()
    };
    let scanner = |_: &SubmitRequest| -> anyhow::Result<String> { Ok("J5".to_string()) };

    let outcome = Relay::new(&cfg, &ledger, &scanner, &notifier).on_message(&pdf("u1"));
    assert_eq!(outcome, RelayOutcome::Submitted { job_id: "J5".into() });
    assert!(ledger.find_by_job_id("J5").unwrap().is_some());
}

#[test]
fn sweep_abandons_only_stale_unassigned_records() {
    let ledger = Ledger::in_memory().unwrap();
    let orphan = ledger.create("u1", "a.pdf", "a.pdf").unwrap();
    seed(&ledger, "u2", "J2");

    let fresh = maintenance::sweep_stale(&ledger, 3_600, now_unix()).unwrap();
    assert!(fresh.abandoned.is_empty());

    let later = maintenance::sweep_stale(&ledger, 3_600, now_unix() + 7_200).unwrap();
    assert_eq!(later.abandoned, vec![orphan]);
    assert_eq!(
        ledger.get(orphan).unwrap().unwrap().status,
        SubmissionStatus::Abandoned
    );
    assert_eq!(
        ledger.find_by_job_id("J2").unwrap().unwrap().status,
        SubmissionStatus::Submitted
    );
}

#[test]
fn purge_removes_finished_records_only() {
    let cfg = Config::default();
    let ledger = Ledger::in_memory().unwrap();
    let notifier = RecordingNotifier::default();
    seed(&ledger, "u1", "J1");
    seed(&ledger, "u2", "J2");
    let orphan = ledger.create("u3", "c.pdf", "c.pdf").unwrap();
    ledger.abandon(orphan, "test").unwrap();

    CorrelationEngine::new(&cfg, &ledger, &notifier)
        .handle_callback(&CallbackEvent {
            job_id: "J1".into(),
            status: "completed".into(),
            report_ref: Some("R1".into()),
        })
        .unwrap();

    let disabled = maintenance::purge(&ledger, 0, now_unix() + 10).unwrap();
    assert!(!disabled.enabled);
    assert_eq!(disabled.deleted, 0);

    let report = maintenance::purge(&ledger, 1, now_unix() + 10).unwrap();
    assert_eq!(report.deleted, 2);
    assert!(ledger.find_by_job_id("J1").unwrap().is_none());
    assert!(ledger.get(orphan).unwrap().is_none());
    assert!(ledger.find_by_job_id("J2").unwrap().is_some());
}
