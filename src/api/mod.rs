// SeriesRelay - catalog mirroring and scheduled republishing
// Copyright (C) 2025 SeriesRelay contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Remote collaborators
//!
//! Each remote system sits behind an async trait so the pipeline can be
//! driven by fakes in tests:
//! - [`catalog::CatalogClient`] and [`catalog::StreamResolver`] for the source catalog
//! - [`hosting::HostingClient`] for the destination platform
//!
//! The HTTP implementations share the response handling below.

pub mod catalog;
pub mod hosting;

// Re-export commonly used types
pub use catalog::{CatalogClient, CollectionDetail, HttpCatalogClient, HttpStreamResolver, StreamResolver};
pub use hosting::{DailymotionClient, HostingClient, UploadDestination};

use crate::error::{RelayError, Result};
use reqwest::Response;
use serde::de::DeserializeOwned;

/// Decode a JSON body, turning non-2xx responses into `ApiRequestFailed`
pub(crate) async fn parse_json_response<T>(response: Response) -> Result<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let endpoint = response.url().path().to_string();

    let body = response.text().await.map_err(|e| RelayError::ApiRequestFailed {
        message: format!("Failed to read response body: {}", e),
        status_code: Some(status.as_u16()),
        endpoint: Some(endpoint.clone()),
    })?;

    if !status.is_success() {
        return Err(RelayError::api_failed(
            format!("API request failed: {}", truncate_body(&body)),
            Some(status.as_u16()),
            Some(endpoint),
        ));
    }

    serde_json::from_str::<T>(&body).map_err(|e| {
        RelayError::InvalidApiResponse(format!(
            "Parse error at {}: {} (body: {})",
            endpoint,
            e,
            truncate_body(&body)
        ))
    })
}

/// Map a transport error, flagging the ones worth retrying
pub(crate) fn transport_error(context: &str, error: reqwest::Error) -> RelayError {
    let transient = error.is_timeout() || error.is_connect() || error.is_request();
    RelayError::network_error(format!("{}: {}", context, error), transient)
}

fn truncate_body(body: &str) -> &str {
    const MAX: usize = 400;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");
        let long = "ü".repeat(300);
        assert!(truncate_body(&long).len() <= 400);
    }
}
