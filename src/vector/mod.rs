// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vector format and retrieval backends

pub mod local_store;
pub mod mock;
pub mod remote;
pub mod retriever;
pub mod similarity;

pub use local_store::LocalPassageStore;
pub use mock::InMemoryVectorBackend;
pub use remote::{
    build_remote_backend, HttpVectorBackend, RemoteBackendConfig, RemoteBackendError,
    RemoteMatch, RemoteVectorBackend, VectorBackend,
};
pub use retriever::{
    apply_floor, RemoteThenLocal, RetrievalConfig, RetrievalOutcome, VectorRetriever,
};
pub use similarity::{
    cosine_similarity, decode_vector, encode_vector, l2_norm, QueryVector, VectorError,
    NORM_TOLERANCE,
};
