//! Request extractors.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRef, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    Json,
};
use domains::{CallerContext, SessionToken};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Reverse proxies allowed to speak for the client through
/// `X-Forwarded-For`.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Arc<Vec<IpAddr>>);

impl TrustedProxies {
    pub fn new(proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(Arc::new(proxies.into_iter().collect()))
    }

    fn contains(&self, ip: IpAddr) -> bool {
        self.0.contains(&ip)
    }
}

/// Who is asking: client IP plus an optional bearer session.
///
/// The IP is the socket peer. When the peer is a trusted proxy, the
/// forwarded chain is walked from the right and the first hop that is not
/// itself a trusted proxy is the client. Requests served without connect
/// info are attributed to `unknown`.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerContext);

impl<S> FromRequestParts<S> for Caller
where
    TrustedProxies: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let proxies = TrustedProxies::from_ref(state);
        let ip = peer
            .map(|peer| client_ip(peer, &parts.headers, &proxies).to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let session = bearer_token(&parts.headers)?.map(SessionToken);
        Ok(Caller(CallerContext { ip, session }))
    }
}

fn client_ip(peer: IpAddr, headers: &HeaderMap, proxies: &TrustedProxies) -> IpAddr {
    let mut client = peer;
    if !proxies.contains(peer) {
        return client;
    }
    for hop in forwarded_hops(headers).into_iter().rev() {
        let Ok(ip) = hop.parse::<IpAddr>() else {
            break;
        };
        client = ip;
        if !proxies.contains(ip) {
            break;
        }
    }
    client
}

/// Every `X-Forwarded-For` entry, leftmost first, across repeated headers.
fn forwarded_hops(headers: &HeaderMap) -> Vec<&str> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn bearer_token(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("malformed Authorization header".into()))?;
    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
        _ => Err(ApiError::BadRequest(
            "Authorization header must be a bearer token".into(),
        )),
    }
}

/// `Json` whose rejection uses the API error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn ip(raw: &str) -> IpAddr {
        raw.parse().unwrap()
    }

    fn forwarded(chain: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(chain));
        headers
    }

    #[test]
    fn untrusted_peer_cannot_choose_its_address() {
        let headers = forwarded("10.9.9.9, 198.51.100.1");
        let proxies = TrustedProxies::default();
        assert_eq!(client_ip(ip("203.0.113.5"), &headers, &proxies), ip("203.0.113.5"));
    }

    #[test]
    fn trusted_proxy_yields_rightmost_untrusted_hop() {
        let proxies = TrustedProxies::new([ip("10.0.0.2"), ip("10.0.0.3")]);
        let headers = forwarded("10.9.9.9, 203.0.113.5, 10.0.0.3");
        assert_eq!(client_ip(ip("10.0.0.2"), &headers, &proxies), ip("203.0.113.5"));
    }

    #[test]
    fn garbage_in_the_chain_stops_the_walk() {
        let proxies = TrustedProxies::new([ip("10.0.0.2")]);
        let headers = forwarded("203.0.113.5, not-an-ip");
        assert_eq!(client_ip(ip("10.0.0.2"), &headers, &proxies), ip("10.0.0.2"));

        assert_eq!(
            client_ip(ip("10.0.0.2"), &HeaderMap::new(), &proxies),
            ip("10.0.0.2")
        );
    }

    #[test]
    fn bearer_token_is_optional_but_must_be_well_formed() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers).unwrap(), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap().as_deref(), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert!(bearer_token(&headers).is_err());
    }
}
