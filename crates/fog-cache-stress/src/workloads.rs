use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fog_cache::config::Config;
use fog_cache::driver::pipeline;
use fog_cache::{Batched, Cache, Direct, Pipeline};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// Size of the key space the workload draws from.
    pub keys: u32,
    /// Simulated latency of every physical fetch.
    #[serde(with = "humantime_serde", default)]
    pub latency: Duration,
    /// Probability of a single key failing to load.
    #[serde(default)]
    pub error_rate: f64,
    pub strategy: StrategyKind,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Direct,
    Batched,
    Pipeline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: u32,
}

pub type ItemCache = Cache<u32, Item, String>;

/// A workload with its cache, ready to be run.
pub struct PreparedWorkload {
    pub concurrency: usize,
    pub strategy: StrategyKind,
    keys: u32,
    cache: ItemCache,
    fetches: Arc<AtomicUsize>,
}

impl PreparedWorkload {
    /// The number of physical fetches issued so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

/// The simulated backend, shared by every fetch of one workload.
#[derive(Clone)]
struct Backend {
    latency: Duration,
    error_rate: f64,
    fetches: Arc<AtomicUsize>,
}

impl Backend {
    fn fails(&self) -> bool {
        self.error_rate > 0.0 && rand::rng().random_bool(self.error_rate.min(1.0))
    }

    async fn fetch_one(self, key: u32) -> Result<Item, String> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let fails = self.fails();
        tokio::time::sleep(self.latency).await;
        if fails {
            Err(format!("failed to load {key}"))
        } else {
            Ok(Item { key })
        }
    }

    async fn fetch_many(self, keys: Vec<u32>) -> Result<Vec<Item>, String> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let items: Vec<_> = keys
            .into_iter()
            .filter(|_| !self.fails())
            .map(|key| Item { key })
            .collect();
        tokio::time::sleep(self.latency).await;
        Ok(items)
    }
}

pub fn prepare_workload(index: usize, config: &Config, workload: Workload) -> PreparedWorkload {
    let name = format!("workload_{index}");
    let fetches = Arc::new(AtomicUsize::new(0));
    let backend = Backend {
        latency: workload.latency,
        error_rate: workload.error_rate,
        fetches: Arc::clone(&fetches),
    };

    let builder = Cache::builder(name.as_str()).options(config.cache_options(&name));
    let cache: ItemCache = match workload.strategy {
        StrategyKind::Direct => {
            builder.build_with(Direct::new(move |key: u32| backend.clone().fetch_one(key)))
        }
        StrategyKind::Pipeline => {
            let stage = pipeline::each(workload.concurrency, move |key: u32| {
                backend.clone().fetch_one(key)
            });
            builder.build_with(Pipeline::new(stage))
        }
        StrategyKind::Batched => {
            let strategy = Batched::new(
                move |keys: Vec<u32>| backend.clone().fetch_many(keys),
                |item: &Item| item.key,
                |key: &u32| format!("failed to load {key}"),
                |error: String, _keys: &[u32]| error,
            )
            .with_options(config.batch_options(&name));
            builder.build_with(strategy)
        }
    };

    PreparedWorkload {
        concurrency: workload.concurrency,
        strategy: workload.strategy,
        keys: workload.keys.max(1),
        cache,
        fetches,
    }
}

/// Loads one random key of the workload, returning whether it loaded successfully.
pub async fn process_workload(workload: &PreparedWorkload) -> bool {
    let key = rand::rng().random_range(0..workload.keys);
    workload.cache.get(&key).data().await.is_ok()
}
