use fog_cache::{BatchOptions, Batched, Cache, Direct};

pub use fog_cache_test::{RecordingFetch, User, setup, user};

pub type UserCache = Cache<u32, User, String>;

/// Looks up a single user. There is no user `0`.
pub fn fetch_user(id: u32) -> Result<User, String> {
    match id {
        0 => Err("no user 0".to_owned()),
        id => Ok(user(id)),
    }
}

/// Looks up many users, silently skipping unknown ids. Any id above `1000` brings the whole
/// backend down.
pub fn fetch_users(ids: Vec<u32>) -> Result<Vec<User>, String> {
    if ids.iter().any(|id| *id > 1000) {
        return Err("backend down".to_owned());
    }
    Ok(ids.into_iter().filter(|id| *id != 0).map(user).collect())
}

/// A user cache fetching every user on its own through `recorder`.
pub fn direct_users(recorder: &RecordingFetch<u32>) -> UserCache {
    Cache::builder("users").build_with(Direct::new(recorder.fetch(fetch_user)))
}

/// A user cache fetching users in batches through `recorder`.
pub fn batched_users(recorder: &RecordingFetch<Vec<u32>>, options: BatchOptions) -> UserCache {
    let strategy = Batched::new(
        recorder.fetch(fetch_users),
        |user: &User| user.id,
        |id: &u32| format!("user {id} not found"),
        |error: String, ids: &[u32]| format!("{error} ({} users)", ids.len()),
    )
    .with_options(options);

    Cache::builder("users").build_with(strategy)
}
