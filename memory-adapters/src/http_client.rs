use std::sync::Arc;
use std::time::Duration;

use hyper::body::{to_bytes, Bytes};
use hyper::client::HttpConnector;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Client, Request, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use serde::Serialize;
use tokio::time::timeout;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::error::{AdapterError, AdapterResult};

pub(crate) type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

pub(crate) fn build_https_client() -> HyperClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let connector = HttpsConnector::from((http, Arc::new(config)));
    Client::builder().build::<_, Body>(connector)
}

/// Validates a base URL and normalises it to end with `/`.
pub(crate) fn sanitize_base_url(input: &str, provider: &str) -> AdapterResult<String> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(AdapterError::configuration(format!(
            "{provider} base URL must start with http:// or https://"
        )));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>().map_err(|err| {
        AdapterError::configuration(format!("invalid {provider} base URL: {err}"))
    })?;
    Ok(base)
}

pub(crate) fn endpoint(base_url: &str, path: &str, provider: &str) -> AdapterResult<Uri> {
    format!("{base_url}{path}")
        .parse::<Uri>()
        .map_err(|err| AdapterError::configuration(format!("invalid {provider} endpoint: {err}")))
}

/// One JSON POST call with a deadline; returns the body of a 2xx response.
pub(crate) struct JsonPost<'a> {
    pub(crate) client: &'a HyperClient,
    pub(crate) endpoint: &'a Uri,
    pub(crate) bearer: Option<&'a str>,
    pub(crate) timeout: Duration,
    pub(crate) provider: &'static str,
}

impl JsonPost<'_> {
    pub(crate) async fn send<T: Serialize>(&self, payload: &T) -> AdapterResult<Bytes> {
        let provider = self.provider;
        let body = serde_json::to_vec(payload).map_err(|err| {
            AdapterError::transport(format!("failed to encode {provider} request: {err}"))
        })?;

        let mut builder = Request::post(self.endpoint.clone()).header(CONTENT_TYPE, "application/json");
        if let Some(key) = self.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        let request = builder.body(Body::from(body)).map_err(|err| {
            AdapterError::transport(format!("failed to build {provider} request: {err}"))
        })?;

        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| AdapterError::transport(format!("{provider} request timed out")))?
            .map_err(|err| AdapterError::transport(format!("{provider} request failed: {err}")))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.map_err(|err| {
            AdapterError::transport(format!("failed to read {provider} response: {err}"))
        })?;

        if !status.is_success() {
            let reason = String::from_utf8_lossy(&bytes);
            return Err(AdapterError::response(format!(
                "{provider} returned {status}: {reason}"
            )));
        }
        Ok(bytes)
    }
}
