//! Source aggregators and the transport seam they share.
//!
//! Each aggregator owns and constructs its record type, walking the
//! fallback tiers of [`fallback`] until something usable comes back. All
//! network I/O goes through the [`Provider`] trait so the fallback policy
//! is testable with scripted providers.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;

pub mod energy;
pub mod fallback;
pub mod market;
pub mod parcel;

pub use energy::EnergySource;
pub use market::MarketSource;
pub use parcel::ParcelSource;

/// Abstract GET-and-parse transport. A call either yields a JSON payload
/// or an error; timeouts and non-2xx statuses are errors, which the
/// aggregators treat identically to an empty result set.
pub trait Provider: Send + Sync {
    fn get_json(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> impl Future<Output = Result<Value>> + Send;
}

/// reqwest-backed provider with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpProvider { client })
    }
}

impl Provider for HttpProvider {
    fn get_json(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> impl Future<Output = Result<Value>> + Send {
        let request = self.client.get(url).query(params);
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                bail!("provider returned status {}", response.status());
            }
            Ok(response.json().await?)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// Provider that replays a fixed script of responses and records the
    /// URLs it was asked for.
    pub struct ScriptedProvider {
        responses: Mutex<std::collections::VecDeque<Result<Value>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        pub fn new(responses: Vec<Result<Value>>) -> Self {
            ScriptedProvider {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Provider whose every call fails, for exercising the default tier.
        pub fn always_failing() -> Self {
            ScriptedProvider::new(Vec::new())
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Provider for ScriptedProvider {
        fn get_json(
            &self,
            url: &str,
            _params: &[(String, String)],
        ) -> impl Future<Output = Result<Value>> + Send {
            self.calls.lock().unwrap().push(url.to_string());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted response left")));
            async move { next }
        }
    }
}
