//! `hred-sampler` - Token selection for free-running decoding.

pub mod greedy;
pub mod sampler;
pub mod temperature;
pub mod top_k;
pub mod top_p;

pub use greedy::{DistSampler, GreedySampler};
pub use sampler::{Sampler, SamplerChain, TokenLogit};
pub use temperature::TemperatureSampler;
pub use top_k::TopKSampler;
pub use top_p::TopPSampler;
