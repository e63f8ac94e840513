//! Optional connection-info extractor.
//!
//! axum 0.8 no longer provides a blanket `FromRequestParts` impl for
//! `Option<ConnectInfo<T>>` (it now requires the crate-private
//! `OptionalFromRequestParts` trait, which external types can't implement
//! due to orphan rules). This mirrors the old behavior: `Some(addr)` when
//! the server recorded connection info, `None` otherwise, never a
//! rejection.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

pub struct OptionalConnectInfo(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for OptionalConnectInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0),
        ))
    }
}
