//! Outbound HTTP: the single-flight upstream client and its failure classes.

pub mod client;

pub use client::{
    decode_body_value, is_forwardable_header, CallFailure, UpstreamCall, UpstreamClient,
    UpstreamResponse,
};
