//! Authenticated access to the analytics endpoints.
//!
//! The endpoints themselves are opaque to this crate; this client only makes
//! sure every call carries the session credentials and that a rejected
//! session is torn down.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::manager::SessionManager;

#[derive(Clone)]
pub struct ApiClient {
    manager: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let request = self.manager.request(Method::GET, path)?;
        let response = self.manager.send(request).await?;
        Ok(response.json().await?)
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let request = self.manager.request(Method::POST, path)?.json(body);
        let response = self.manager.send(request).await?;
        Ok(response.json().await?)
    }
}
