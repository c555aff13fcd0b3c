use std::time::Duration;

use fog_cache::config::{CacheConfig, Config};
use fog_cache::{BatchOptions, Batched, Cache, Staleness};

use crate::{RecordingFetch, User, fetch_users, setup, user};

fn configured_users(
    config: &Config,
    recorder: &RecordingFetch<Vec<u32>>,
) -> Cache<u32, User, String> {
    let strategy = Batched::new(
        recorder.fetch(fetch_users),
        |user: &User| user.id,
        |id: &u32| format!("user {id} not found"),
        |error: String, _ids: &[u32]| error,
    )
    .with_options(config.batch_options("users"));

    Cache::builder("users")
        .options(config.cache_options("users"))
        .build_with(strategy)
}

#[tokio::test(start_paused = true)]
async fn test_cache_from_config() {
    setup();

    let mut config = Config::get(None).unwrap();
    config.caches.insert(
        "users".to_owned(),
        CacheConfig {
            staleness: Some(Staleness::After(Duration::from_secs(5))),
            batch: Some(BatchOptions {
                buffer_time: Duration::from_millis(1),
                max_batch_size: 2,
            }),
        },
    );

    let recorder = RecordingFetch::new();
    let users = configured_users(&config, &recorder);

    let entries = users.get_many(&[1, 2, 3]);
    for (entry, id) in entries.iter().zip(1..) {
        assert_eq!(entry.data().await, Ok(user(id)));
    }
    assert_eq!(recorder.take_calls(), [vec![1, 2], vec![3]]);

    // fresh for five seconds, stale afterwards
    tokio::time::sleep(Duration::from_secs(4)).await;
    users.get(&1);
    assert_eq!(recorder.calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(users.get(&1).data().await, Ok(user(1)));
    assert_eq!(recorder.take_calls(), [vec![1]]);
}
