//! Upstream proxying: request composition, the upstream client, challenge
//! recognition and the streaming relay.

pub mod challenge;
pub mod compose;
pub mod correlation;
pub mod relay;
pub mod sse;
pub mod upstream;
