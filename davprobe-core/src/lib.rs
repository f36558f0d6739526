mod client;

pub use client::{DavClient, DavError, DavResponse};
pub use reqwest::StatusCode;
