use std::sync::Arc;
use std::thread;

use interaction_ledger::{Interaction, InteractionLedger, Session, DEFAULT_MIN_ATTEMPTS};
use mender_core_types::{ElementDescriptor, Fingerprint, Outcome};
use tempfile::TempDir;

fn search_input() -> ElementDescriptor {
    ElementDescriptor::new("input")
        .with_attr("name", "q")
        .with_attr("placeholder", "Search products")
}

#[test]
fn test_ledger_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("ledger.db");

    let session = Session::new("https://shop.example.com", vec!["Type shoes into search".into()]);
    {
        let ledger = InteractionLedger::open(&path).unwrap();
        ledger.create_session(&session).unwrap();
        let record = Interaction::new(
            &search_input(),
            "placeholder=\"Search products\"",
            "Type shoes into search",
            Outcome::Success,
        )
        .with_action("fill", Some("shoes".into()))
        .with_strategy("placeholder");
        ledger.record_interaction(&record, Some(&session.id)).unwrap();
    }

    let reopened = InteractionLedger::open(&path).unwrap();
    let interactions = reopened.get_session_interactions(&session.id).unwrap();
    assert_eq!(interactions.len(), 1);
    assert_eq!(interactions[0].action_value.as_deref(), Some("shoes"));
    assert_eq!(interactions[0].fingerprint, Fingerprint::of(&search_input()));
    assert_eq!(reopened.list_sessions(10).unwrap().len(), 1);
}

#[test]
fn test_concurrent_writers_do_not_lose_increments() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.db");
    // Create the schema before the writers race.
    InteractionLedger::open(&path).unwrap();

    let writers = 4;
    let per_writer = 10;
    let handles: Vec<_> = (0..writers)
        .map(|worker| {
            let path = path.clone();
            thread::spawn(move || {
                let ledger = InteractionLedger::open(&path).unwrap();
                for i in 0..per_writer {
                    let outcome = if (worker + i) % 2 == 0 {
                        Outcome::Success
                    } else {
                        Outcome::Failure
                    };
                    let record = Interaction::new(&search_input(), "[name=\"q\"]", "search", outcome);
                    ledger.record_interaction(&record, None).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ledger = InteractionLedger::open(&path).unwrap();
    let stat = ledger
        .best_selector(&Fingerprint::of(&search_input()), DEFAULT_MIN_ATTEMPTS)
        .unwrap()
        .unwrap();
    assert_eq!(stat.attempts, (writers * per_writer) as u32);
    assert_eq!(stat.successes, 20);
    assert!((stat.success_rate - 0.5).abs() < 1e-9);
}

#[test]
fn test_shared_ledger_between_threads() {
    let ledger = Arc::new(InteractionLedger::in_memory().unwrap());
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let record =
                    Interaction::new(&search_input(), "#search", "search", Outcome::Success);
                ledger.record_interaction(&record, None).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let history = ledger.selector_history(&Fingerprint::of(&search_input())).unwrap();
    assert_eq!(history[0].attempts, 3);
    assert!((history[0].success_rate - 1.0).abs() < 1e-9);
}
