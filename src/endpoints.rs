//! Pool of discovered internal API endpoints.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use url::Url;

struct EndpointState {
    endpoints: Vec<Url>,
    generation: u64,
}

/// Live endpoint URIs, replaced wholesale on every discovery round.
pub struct EndpointPool {
    state: RwLock<EndpointState>,
    rng: Mutex<StdRng>,
}

impl EndpointPool {
    /// Creates an empty pool.
    pub fn new(rng: StdRng) -> Self {
        Self {
            state: RwLock::new(EndpointState {
                endpoints: Vec::new(),
                generation: 0,
            }),
            rng: Mutex::new(rng),
        }
    }

    /// Swaps in a new set of endpoints and returns the new generation.
    pub async fn replace(&self, endpoints: Vec<Url>) -> u64 {
        let mut state = self.state.write().await;
        state.endpoints = endpoints;
        state.generation += 1;
        state.generation
    }

    /// Picks an endpoint uniformly at random.
    pub async fn choose(&self) -> Option<Url> {
        let state = self.state.read().await;
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        state.endpoints.choose(&mut *rng).cloned()
    }

    /// Number of cached endpoints.
    pub async fn len(&self) -> usize {
        self.state.read().await.endpoints.len()
    }

    /// Whether no endpoints are cached.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.endpoints.is_empty()
    }

    /// Number of replacements performed so far.
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }
}
