use std::time::Duration;

use fog_cache::{AwaitError, Cache, EntryState, GetOptions, Staleness};

use crate::{RecordingFetch, User, direct_users, fetch_user, setup, user};

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_fetch_once() {
    setup();

    let recorder = RecordingFetch::new().with_delay(Duration::from_millis(50));
    let users = direct_users(&recorder);
    let get = |id: u32| {
        let users = users.clone();
        async move { users.get(&id).data().await }
    };

    let (first, second, third) = futures::join!(get(1), get(1), get(2));

    assert_eq!(first, Ok(user(1)));
    assert_eq!(second, Ok(user(1)));
    assert_eq!(third, Ok(user(2)));
    assert_eq!(recorder.take_calls(), [1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_across_threads() {
    setup();

    let recorder = RecordingFetch::new().with_delay(Duration::from_millis(20));
    let users = direct_users(&recorder);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let users = users.clone();
            tokio::spawn(async move { users.get(&7).data().await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok(user(7)));
    }
    assert_eq!(recorder.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_settled_entries_are_reused() {
    setup();

    let recorder = RecordingFetch::new();
    let users = direct_users(&recorder);

    assert_eq!(users.get(&1).data().await, Ok(user(1)));
    assert_eq!(users.get(&1).data().await, Ok(user(1)));
    assert_eq!(recorder.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_errors_are_refetched() {
    setup();

    let recorder = RecordingFetch::new();
    let users = direct_users(&recorder);

    let failed = users.get(&0).data().await;
    assert_eq!(failed, Err(AwaitError::Failed("no user 0".to_owned())));

    // an entry without data is fetched again on the next get
    let _ = users.get(&0).data().await;
    assert_eq!(recorder.take_calls(), [0, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_stale_data_is_served_while_refetching() {
    setup();

    let recorder = RecordingFetch::new().with_delay(Duration::from_millis(100));
    let users = direct_users(&recorder);
    users.get(&1).data().await.unwrap();

    let stale = GetOptions {
        staleness: Some(Staleness::After(Duration::from_secs(60))),
        alias: None,
    };

    tokio::time::sleep(Duration::from_secs(30)).await;
    let entry = users.get_with(&1, stale.clone());
    assert!(!entry.is_loading());

    tokio::time::sleep(Duration::from_secs(31)).await;
    let entry = users.get_with(&1, stale);
    let snapshot = entry.snapshot();
    assert!(snapshot.loading);
    assert_eq!(snapshot.data, Some(user(1)));

    assert_eq!(entry.data().await, Ok(user(1)));
    assert_eq!(recorder.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_request_refetches_and_remove_forgets() {
    setup();

    let recorder = RecordingFetch::new();
    let users = direct_users(&recorder);
    users.get(&3).data().await.unwrap();

    users.request(&3).data().await.unwrap();
    assert_eq!(recorder.calls(), 2);

    users.remove(&3);
    assert!(!users.read(&3).has_data());
    users.get(&3).data().await.unwrap();
    assert_eq!(recorder.take_calls(), [3, 3, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_manual_outcomes() {
    setup();

    // without a strategy, the caller drives the fetches
    let users = Cache::<u32, User, String>::builder("manual").build();
    let mut requests = users.subscribe_requests();

    let entry = users.get(&4);
    requests.changed().await.unwrap();
    let request = requests.borrow_and_update().clone().unwrap();
    assert_eq!(request.args, 4);

    users.receive(fog_cache::Received::from_result(
        request.args,
        fetch_user(request.args),
    ));
    assert_eq!(entry.data().await, Ok(user(4)));
}
