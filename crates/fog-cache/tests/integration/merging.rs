use std::time::Duration;

use fog_cache::{AwaitError, Cache, EntryState, Merged, PriorityExpr, Status};

use crate::{RecordingFetch, User, direct_users, setup, user};

fn manual_users() -> Cache<u32, User, String> {
    Cache::builder("users").build()
}

#[tokio::test(start_paused = true)]
async fn test_get_merged() {
    setup();

    let recorder = RecordingFetch::new().with_delay(Duration::from_millis(10));
    let users = direct_users(&recorder);

    let merged = users.get_merged(&[1, 2]);
    assert_eq!(merged.status(), Status::Loading);

    assert_eq!(
        merged.data_settled().await,
        Ok(vec![Some(user(1)), Some(user(2))])
    );
    assert_eq!(merged.status(), Status::Data);
}

#[tokio::test(start_paused = true)]
async fn test_get_merged_with_error() {
    setup();

    let recorder = RecordingFetch::new().with_delay(Duration::from_millis(10));
    let users = direct_users(&recorder);

    let merged = users.get_merged(&[1, 0]);
    assert_eq!(
        merged.data_settled().await,
        Err(AwaitError::Failed(vec![None, Some("no user 0".to_owned())]))
    );
}

#[test]
fn test_default_priorities() {
    let users = manual_users();
    let merged = users.get_merged(&[1, 2]);
    assert!(merged.loading());

    // one entry with data is not enough
    users.set_data(&1, Some(user(1)));
    assert!(merged.loading());

    users.set_data(&2, Some(user(2)));
    assert!(merged.has_data());

    // errors win once nothing is loading anymore
    users.request(&1);
    users.set_error(&2, "gone".to_owned());
    assert!(merged.loading());
    users.set_data(&1, Some(user(1)));
    assert!(merged.has_error());
}

#[test]
fn test_partial_data() {
    let users = manual_users();
    let merged = users
        .get_merged(&[1, 2])
        .with_expression(PriorityExpr::parse("dl").unwrap());

    users.set_data(&1, Some(user(1)));
    assert_eq!(merged.status(), Status::Data);
    assert_eq!(merged.data(), [Some(user(1)), None]);
}

#[test]
fn test_custom_combinators() {
    let users = manual_users();
    let merged = Merged::new(
        users.get_many(&[1, 2, 3]),
        |entries| {
            entries
                .iter()
                .filter_map(|entry| entry.data.as_ref())
                .map(|user| user.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        },
        |entries| entries.iter().filter(|entry| entry.has_error).count(),
    )
    .with_expression(PriorityExpr::parse("edf").unwrap());

    users.set_data(&1, Some(user(1)));
    users.set_data(&3, Some(user(3)));
    users.set_error(&2, "gone".to_owned());

    let snapshot = merged.snapshot();
    assert!(snapshot.has_error);
    assert_eq!(snapshot.data.as_deref(), Some("user 1, user 3"));
    assert_eq!(snapshot.error, Some(1));
}

#[test]
fn test_merged_views_nest() {
    let users = manual_users();
    let merged = users.get_merged(&[1]);
    let outer = users.read(&2);

    // merged views classify alongside plain entries
    let entries: [&dyn EntryState; 2] = [&merged, &outer];
    let status = fog_cache::priority::evaluate(&entries, "l").unwrap();
    assert_eq!(status, Status::Loading);

    users.set_data(&1, Some(user(1)));
    let status = fog_cache::priority::evaluate(&entries, "D").unwrap();
    assert_eq!(status, Status::None);
}

#[tokio::test]
async fn test_merged_changes() {
    let users = manual_users();
    let mut merged = users.get_merged(&[1, 2]);

    let waiter = tokio::spawn({
        let merged = merged.clone();
        async move { merged.data_settled().await }
    });

    users.set_data(&1, Some(user(1)));
    assert!(merged.changed().await);
    users.set_data(&2, Some(user(2)));

    assert_eq!(
        waiter.await.unwrap(),
        Ok(vec![Some(user(1)), Some(user(2))])
    );
}
