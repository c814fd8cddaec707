//! In-memory adapters and engine wiring shared by the behaviour tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tickguard_core::{
    Clock, Engine, EngineConfig, FetchFuture, ManualClock, ProviderId, RateLimitConfig, RawQuote,
    SourceAdapter, SourceError, SourceErrorKind, Symbol,
};

/// What a scripted adapter answers for one `fetch`.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A candidate for the requested symbol.
    Price { price: f64, currency: &'static str },
    /// A candidate with an explicit change percent.
    Moved {
        price: f64,
        currency: &'static str,
        change_percent: f64,
    },
    Fail(SourceErrorKind),
    /// Sleeps on tokio time before answering with a price.
    Slow { after: Duration, price: f64 },
    /// Sleeps on tokio time before failing.
    SlowFail { after: Duration, kind: SourceErrorKind },
    /// Never completes.
    Hang,
}

impl Reply {
    pub fn usd(price: f64) -> Self {
        Self::Price {
            price,
            currency: "USD",
        }
    }

    pub fn network_error() -> Self {
        Self::Fail(SourceErrorKind::Network)
    }
}

/// Adapter that replays queued replies, then repeats its default, and
/// counts every `fetch` call.
#[derive(Debug)]
pub struct ScriptedAdapter {
    id: ProviderId,
    queued: Mutex<VecDeque<Reply>>,
    default: Mutex<Reply>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(id: ProviderId, default: Reply) -> Arc<Self> {
        Arc::new(Self {
            id,
            queued: Mutex::new(VecDeque::new()),
            default: Mutex::new(default),
            calls: AtomicUsize::new(0),
        })
    }

    /// Queues a one-off reply ahead of the default.
    pub fn then(&self, reply: Reply) {
        self.queued.lock().unwrap().push_back(reply);
    }

    pub fn set_default(&self, reply: Reply) {
        *self.default.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Reply {
        self.queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.lock().unwrap().clone())
    }
}

impl SourceAdapter for ScriptedAdapter {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply();
        let id = self.id;
        Box::pin(async move {
            match reply {
                Reply::Price { price, currency } => {
                    Ok(RawQuote::priced(id, symbol.as_str(), price, currency))
                }
                Reply::Moved {
                    price,
                    currency,
                    change_percent,
                } => Ok(RawQuote {
                    change_percent: Some(change_percent),
                    ..RawQuote::priced(id, symbol.as_str(), price, currency)
                }),
                Reply::Fail(kind) => Err(SourceError::new(kind, format!("{id} scripted failure"))),
                Reply::Slow { after, price } => {
                    tokio::time::sleep(after).await;
                    Ok(RawQuote::priced(id, symbol.as_str(), price, "USD"))
                }
                Reply::SlowFail { after, kind } => {
                    tokio::time::sleep(after).await;
                    Err(SourceError::new(kind, format!("{id} scripted failure")))
                }
                Reply::Hang => std::future::pending().await,
            }
        })
    }
}

/// Default configuration with call spacing small enough to ignore.
pub fn config(order: &[ProviderId]) -> EngineConfig {
    let rate_limits: BTreeMap<ProviderId, RateLimitConfig> = ProviderId::ALL
        .into_iter()
        .map(|id| (id, RateLimitConfig::new(1000, Duration::from_secs(1))))
        .collect();
    EngineConfig {
        adapter_priority_order: order.to_vec(),
        rate_limits,
        ..EngineConfig::default()
    }
}

pub fn engine(
    config: EngineConfig,
    adapters: &[Arc<ScriptedAdapter>],
    clock: Arc<dyn Clock>,
) -> Engine {
    adapters
        .iter()
        .fold(Engine::builder(config), |builder, adapter| {
            builder.with_adapter(adapter.clone())
        })
        .with_clock(clock)
        .build()
        .expect("engine configuration is valid")
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new())
}
