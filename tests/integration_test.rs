//! Integration tests for the complete triage workflow
//!
//! These tests drive a full session against the in-memory backend:
//! polling, selection, commits, report capture and the event table.

use alert_triage::{
    Result,
    backend::{Endpoint, InMemoryBackend},
    config::Config,
    engine::{
        CommitOutcome, NoticeLevel, PageLink, ReportDraft, ReportSubmission, TriageSession,
        TriageTab,
    },
    types::{AnalystAction, GroupStatus, Verdict},
};
use std::sync::Arc;
use std::time::Duration;

fn seeded_backend() -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.inject_scenario("s-brute", "brute_force", "Credential Access", "Brute Force", 4);
    backend.inject_scenario("s-exfil", "dns_tunnel", "Exfiltration", "Data Exfiltration", 3);
    backend.inject_scenario("s-scan", "false_alarm_scan", "Discovery", "False Positive", 2);
    for i in 0..30 {
        backend.push_normal_event(&format!("n{i}"), &format!("Routine login from host-{i}"));
    }
    backend
}

fn report_for_brute_force() -> ReportDraft {
    ReportDraft {
        title: "Credential stuffing against VPN".to_string(),
        description: "Burst of failed logins followed by one success".to_string(),
        severity: "High".to_string(),
        threat_category: "Brute Force".to_string(),
        affected_hosts: "vpn-gw-01".to_string(),
        mitigation: "Locked account, enforced MFA".to_string(),
        ..ReportDraft::new()
    }
}

#[tokio::test]
async fn test_complete_triage_workflow() -> Result<()> {
    println!("🛡️ Testing complete triage workflow...");

    let backend = seeded_backend();
    let session = TriageSession::new(Config::for_testing(), backend.clone())?;
    let mut notices = session.subscribe_notices();

    // Step 1: Start polling
    session.start().await?;
    tokio::time::sleep(Duration::from_millis(80)).await;
    let controller = session.controller();
    assert_eq!(controller.groups_in_tab(TriageTab::Active).await.len(), 3);
    println!("✅ Step 1: Groups and events polled");

    // Step 2: Dismiss the false positive
    assert!(controller.select_action("s-scan", AnalystAction::Resolve).await);
    let outcome = controller.commit("s-scan").await?;
    assert!(matches!(outcome, CommitOutcome::Committed { status: GroupStatus::Resolved, .. }));
    assert_eq!(notices.recv().await.unwrap().level, NoticeLevel::Success);
    println!("✅ Step 2: False positive resolved");

    // Step 3: Escalate the exfiltration
    controller.select_action("s-exfil", AnalystAction::Escalate).await;
    controller.commit("s-exfil").await?;
    println!("✅ Step 3: Exfiltration escalated");

    // Step 4: Investigate the brute force with a report
    let CommitOutcome::ReportRequired(form) = controller.commit("s-brute").await? else {
        panic!("investigation must open a report form");
    };
    assert_eq!(form.label, "brute_force");
    let submission = controller.submit_report("s-brute", report_for_brute_force()).await?;
    assert!(matches!(submission, ReportSubmission::Submitted(_)));
    println!("✅ Step 4: Report submitted");

    // Step 5: Polls agree with the local view
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(controller.groups_in_tab(TriageTab::Active).await.is_empty());
    let history = controller.groups_in_tab(TriageTab::History).await;
    assert_eq!(history.len(), 3);
    for group in &history {
        match group.scenario_id.as_str() {
            "s-scan" => assert_eq!(group.verdict(), Verdict::FalsePositive),
            "s-exfil" => assert_eq!(group.verdict(), Verdict::Confirmed("Data Exfiltration".into())),
            "s-brute" => assert_eq!(group.verdict(), Verdict::Triage),
            other => panic!("unexpected group {other}"),
        }
    }
    assert_eq!(session.reports().reports().await.len(), 1);
    println!("✅ Step 5: History reflects every decision");

    // Step 6: Score
    let (card, grade) = session.analytics().report_card().await?;
    assert_eq!(card.total_actions, 3);
    assert_eq!(card.accuracy, 100.0);
    assert_eq!(grade.letter(), 'A');
    println!("✅ Step 6: Report card graded {}", grade.letter());

    session.stop();
    println!("🎉 Complete triage workflow verified!");
    Ok(())
}

#[tokio::test]
async fn test_single_flight_commit() -> Result<()> {
    println!("🔒 Testing single-flight commits...");

    let backend = seeded_backend();
    let session = Arc::new(TriageSession::new(Config::for_testing(), backend.clone())?);
    session.groups().refresh().await?;
    session
        .controller()
        .select_action("s-exfil", AnalystAction::Escalate)
        .await;

    backend.hold(Endpoint::CommitAction);
    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.controller().commit("s-exfil").await })
    };
    while backend.calls(Endpoint::CommitAction) == 0 {
        tokio::task::yield_now().await;
    }

    // Rapid repeats while the first is in flight
    for _ in 0..5 {
        let outcome = session.controller().commit("s-exfil").await?;
        assert_eq!(outcome, CommitOutcome::AlreadyInFlight);
    }
    assert!(!session.controller().select_action("s-exfil", AnalystAction::Resolve).await);

    backend.release(Endpoint::CommitAction, 1);
    let outcome = first.await.expect("commit task panicked")?;
    assert!(matches!(outcome, CommitOutcome::Committed { .. }));
    assert_eq!(backend.calls(Endpoint::CommitAction), 1);
    assert_eq!(backend.recorded_actions().len(), 1);
    println!("✅ Exactly one request reached the backend");

    Ok(())
}

#[tokio::test]
async fn test_selection_survives_polling() -> Result<()> {
    println!("🔄 Testing selection across polls...");

    let backend = seeded_backend();
    let session = TriageSession::new(Config::for_testing(), backend.clone())?;
    session.start().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    session
        .controller()
        .select_action("s-brute", AnalystAction::Escalate)
        .await;
    backend.inject_scenario("s-new", "ransom_note", "Impact", "Malware", 1);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = session.groups().snapshot().await;
    assert_eq!(snapshot.len(), 4);
    assert_eq!(snapshot.get("s-brute").unwrap().selected_action, AnalystAction::Escalate);
    println!("✅ Selection kept while a new group arrived");

    // The server closes a scenario on its own
    backend.remove_scenario("s-brute");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.groups().get("s-brute").await.is_none());
    println!("✅ Stale group dropped with its selection");

    session.stop();
    Ok(())
}

#[tokio::test]
async fn test_event_table_workflow() -> Result<()> {
    println!("📋 Testing event table filtering and paging...");

    let backend = seeded_backend();
    let session = TriageSession::new(Config::for_testing(), backend.clone())?;
    session.events().refresh().await?;
    let table = session.event_table();

    // 39 events at 20 per page
    let page = table.current_page().await;
    assert_eq!(page.total_events, 39);
    assert_eq!(page.total_pages, 2);
    assert!(page.rows.iter().all(|r| r.is_new));
    assert!(table.next_page().await);
    assert_eq!(table.current_page().await.rows.len(), 19);
    println!("✅ Paging works");

    table.set_filter("HOST-1")?;
    let page = table.current_page().await;
    assert_eq!(page.page, 1);
    // host-1 and host-10 .. host-19
    assert_eq!(page.total_matches, 11);
    assert_eq!(page.links, vec![PageLink::Page { number: 1, current: true }]);
    println!("✅ Filter resets to page 1");

    // New events arrive while a page is open
    table.set_filter("")?;
    table.go_to_page(2).await;
    backend.push_normal_event("late", "Late arrival");
    session.events().refresh().await?;
    let page = table.current_page().await;
    assert_eq!(page.page, 2);
    assert_eq!(page.total_events, 40);
    println!("✅ Polls keep the current page");

    session.events().force_refresh().await?;
    assert_eq!(table.current_page_number(), 1);
    let first = table.current_page().await;
    assert_eq!(first.rows[0].event.id, "late");
    assert!(!first.rows[0].is_new);
    println!("✅ Forced refresh goes back to page 1");

    Ok(())
}
