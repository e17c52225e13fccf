use std::time::Duration;

use reqwest::{Client, Error};

const USER_AGENT: &str = concat!("nada/", env!("CARGO_PKG_VERSION"));

pub struct HttpClient;

impl HttpClient {
  pub fn user_agent() -> String {
    USER_AGENT.to_string()
  }

  /// Client for short metadata requests (thumbnails, lookups).
  pub fn new() -> Result<Client, Error> {
    Client::builder()
      .user_agent(Self::user_agent())
      .timeout(Duration::from_secs(10))
      .build()
  }

  /// Client for streaming generation responses. No overall timeout; the
  /// pipeline bounds the time-to-first-byte itself.
  pub fn new_streaming() -> Result<Client, Error> {
    Client::builder()
      .user_agent(Self::user_agent())
      .connect_timeout(Duration::from_secs(10))
      .build()
  }
}
