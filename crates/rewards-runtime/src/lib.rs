//! Rewards runtime: routes engine callbacks, sequences reward flows.
//!
//! A [`RewardsService`] owns the engine link, timers, in-flight fetches and
//! flow state on a single task. Hosts talk to it through a cloneable
//! [`RewardsHandle`] and listen through [`RewardsObserver`]s.

pub mod engine;
pub mod fetch;
pub mod flows;
pub mod handle;
pub mod notifications;
pub mod observer;
pub mod service;
pub mod timers;
pub mod types;
mod worker;

pub use engine::{engine_channel, EngineCallback, EngineChannel, EngineGateway, EnginePeer, EngineRequest, TimerNamespace};
pub use fetch::{create_fetcher, FetchCorrelator, ReqwestFetcher, UrlFetcher};
pub use handle::RewardsHandle;
pub use notifications::{NotificationPolicy, NotificationPrefs};
pub use observer::{ObserverList, RewardsObserver, ALL_EXCLUDED_SITES};
pub use service::{start, RewardsService};
pub use timers::TimerRegistry;
pub use types::*;
