use std::time::Duration;

use fog_cache::{AwaitError, BatchOptions};

use crate::{RecordingFetch, batched_users, setup, user};

#[tokio::test(start_paused = true)]
async fn test_gets_are_batched() {
    setup();

    let recorder = RecordingFetch::new();
    let users = batched_users(&recorder, BatchOptions::default());

    let entries = users.get_many(&[1, 2, 3]);
    // nothing is fetched before the window closes
    assert_eq!(recorder.calls(), 0);

    for (entry, id) in entries.iter().zip(1..) {
        assert_eq!(entry.data().await, Ok(user(id)));
    }
    assert_eq!(recorder.take_calls(), [vec![1, 2, 3]]);
}

#[tokio::test(start_paused = true)]
async fn test_batched_gets_are_deduplicated() {
    setup();

    let recorder = RecordingFetch::new();
    let users = batched_users(&recorder, BatchOptions::default());

    let get = |id: u32| {
        let users = users.clone();
        async move { users.get(&id).data().await }
    };
    let (first, second, third) = futures::join!(get(5), get(6), get(5));

    assert_eq!(first, Ok(user(5)));
    assert_eq!(second, Ok(user(6)));
    assert_eq!(third, Ok(user(5)));
    assert_eq!(recorder.take_calls(), [vec![5, 6]]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_users() {
    setup();

    let recorder = RecordingFetch::new();
    let users = batched_users(&recorder, BatchOptions::default());

    let known = users.get(&1);
    let unknown = users.get(&0);

    assert_eq!(known.data().await, Ok(user(1)));
    assert_eq!(
        unknown.data().await,
        Err(AwaitError::Failed("user 0 not found".to_owned()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch() {
    setup();

    let recorder = RecordingFetch::new();
    let users = batched_users(&recorder, BatchOptions::default());

    let entries = users.get_many(&[1, 2000]);
    for entry in entries {
        assert_eq!(
            entry.data().await,
            Err(AwaitError::Failed("backend down (2 users)".to_owned()))
        );
    }

    // the next batch is unaffected
    assert_eq!(users.get(&3).data().await, Ok(user(3)));
    assert_eq!(recorder.take_calls(), [vec![1, 2000], vec![3]]);
}

#[tokio::test(start_paused = true)]
async fn test_windows_follow_options() {
    setup();

    let recorder = RecordingFetch::new().with_delay(Duration::from_millis(30));
    let options = BatchOptions {
        buffer_time: Duration::from_millis(50),
        max_batch_size: 2,
    };
    let users = batched_users(&recorder, options);

    // a full batch goes out right away
    let entries = users.get_many(&[1, 2, 3]);
    assert_eq!(recorder.take_calls(), [vec![1, 2]]);

    tokio::time::sleep(Duration::from_millis(45)).await;
    assert_eq!(recorder.calls(), 0);
    assert!(entries[0].snapshot().has_data);
    assert!(entries[2].snapshot().loading);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(recorder.take_calls(), [vec![3]]);
    assert_eq!(entries[2].data().await, Ok(user(3)));
}
