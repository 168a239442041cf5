//! OpenAI-compatible provider support for the blockflow engine: a
//! [`OpenAiDriver`] implementing the engine's driver capability set and an
//! [`HttpTransport`] that delivers payloads over HTTPS.
//!
//! ```no_run
//! use std::sync::Arc;
//! use blockflow_core::ProviderRegistry;
//! use blockflow_openai::{HttpTransport, OpenAiConfig, OpenAiDriver, OPENAI_PROVIDER};
//!
//! let registry = ProviderRegistry::builder()
//!     .register_driver(Arc::new(OpenAiDriver::new()))
//!     .map_model("gpt-4o", OPENAI_PROVIDER)
//!     .default_provider(OPENAI_PROVIDER)
//!     .transport(Arc::new(HttpTransport::new(OpenAiConfig::new()).unwrap()))
//!     .build()
//!     .unwrap();
//! ```

mod config;
mod driver;
mod transport;

pub use config::OpenAiConfig;
pub use driver::{OPENAI_PROVIDER, OpenAiDriver};
pub use transport::HttpTransport;
