//! Most Gosling load tests only need the types re-exported here.
//!
//! ```rust
//! use gosling::prelude::*;
//! ```

pub use crate::client::{HttpExecutor, RequestOutcome, ReqwestExecutor, TransportFailure};
pub use crate::config::GoslingConfiguration;
pub use crate::engine::{LoadEngine, RunHandle};
pub use crate::metrics::{MetricSample, RunSummary};
pub use crate::profile::{LoadProfile, ProfileConfig, ProfilePoint};
pub use crate::request::{Auth, BodyKind, KeyValue, Method, RequestSpec, RequestTemplate};
pub use crate::{GoslingError, RunState};
