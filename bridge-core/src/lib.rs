//! Pure translation core between the Anthropic Messages API and an
//! OpenAI-compatible Chat Completions API. No I/O, no async runtime: every
//! public function here is a plain data transformation, so it can be
//! exercised from a synchronous CLI just as easily as from the gateway's
//! hyper server.

pub mod anthropic;
pub mod error;
pub mod framer;
pub mod openai;
pub mod request_transform;
pub mod response_transform;
pub mod transducer;
pub mod validate;

pub use error::BridgeError;
pub use framer::{Frame, Framer};
pub use request_transform::{request_xform, requires_cache_beta_header};
pub use response_transform::response_xform;
pub use transducer::Transducer;
pub use validate::validate;
