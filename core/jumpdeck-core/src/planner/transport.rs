//! HTTP seam for the planner client.
//!
//! Production uses [`HttpTransport`] (blocking reqwest). Tests script
//! replies through their own [`PlannerTransport`] implementation.

use std::time::Duration;

use serde_json::Value;

use crate::error::PlannerError;

pub type Headers = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, PlannerError> {
        serde_json::from_str(&self.body)
            .map_err(|e| PlannerError::Protocol(format!("invalid JSON body: {e}")))
    }
}

pub trait PlannerTransport: Send + Sync {
    /// POST `application/x-www-form-urlencoded`; repeated keys stay repeated.
    fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
        headers: &Headers,
    ) -> Result<HttpReply, PlannerError>;

    fn post_json(&self, url: &str, body: &Value, headers: &Headers)
        -> Result<HttpReply, PlannerError>;

    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &Headers,
    ) -> Result<HttpReply, PlannerError>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, PlannerError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlannerError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<HttpReply, PlannerError> {
        let response = request.send().map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(map_reqwest_error)?;
        Ok(HttpReply { status, body })
    }
}

fn with_headers(
    mut request: reqwest::blocking::RequestBuilder,
    headers: &Headers,
) -> reqwest::blocking::RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

fn map_reqwest_error(err: reqwest::Error) -> PlannerError {
    if err.is_timeout() {
        PlannerError::Timeout(err.to_string())
    } else {
        PlannerError::Transport(err.to_string())
    }
}

impl PlannerTransport for HttpTransport {
    fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
        headers: &Headers,
    ) -> Result<HttpReply, PlannerError> {
        self.send(with_headers(self.client.post(url), headers).form(fields))
    }

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &Headers,
    ) -> Result<HttpReply, PlannerError> {
        self.send(with_headers(self.client.post(url), headers).json(body))
    }

    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &Headers,
    ) -> Result<HttpReply, PlannerError> {
        self.send(with_headers(self.client.get(url), headers).query(query))
    }
}
