//! Adapter families
//!
//! - `page`: fetch an HTML document and pull fields or table rows out of it
//! - `rest`: call a JSON endpoint (optionally page by page) and walk a key
//!   path to the record list
//! - `command`: pick a container and run a command inside it

pub mod command;
pub mod page;
pub mod rest;

pub use command::{CommandExecAdapter, ContainerRuntime, DockerCli, ExecOutput, ExecTarget, MatchRule};
pub use page::{FieldExtractor, FieldSelector, PageExtractor, PageScrapeAdapter, TableExtractor};
pub use rest::{Paging, RestAdapter};

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::error::FetchError;

/// Build the shared HTTP client.
pub fn build_http_client(timeout: Duration, user_agent: &str) -> Result<Client, FetchError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()?)
}

/// GET `url` and return the body, treating non-2xx as an error.
pub(crate) async fn fetch_text(
    client: &Client,
    url: &str,
    query: &[(String, String)],
    headers: &[(String, String)],
) -> Result<String, FetchError> {
    debug!(url, "Fetching");
    let request = headers
        .iter()
        .fold(client.get(url).query(query), |request, (name, value)| {
            request.header(name.as_str(), value.as_str())
        });
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response.text().await?)
}
