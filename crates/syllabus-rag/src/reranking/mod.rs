pub mod mmr;

pub use mmr::{cosine_similarity, maximal_marginal_relevance};
