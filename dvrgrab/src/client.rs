use crate::device::Device;
use anyhow::Result;
use clap::ValueEnum;
use std::io::Read;

/// Username the device's embedded web server expects; the media access key
/// is the password.
const DOWNLOAD_USER: &str = "tivo";

/// Response header carrying the device's transfer size estimate.
const ESTIMATED_SIZE_HEADER: &str = "TiVo-Estimated-Size";

/// Container the device is asked to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportFormat {
    /// Transport-stream compatibility format.
    Ts,
    /// The device's native program-stream container.
    Ps,
}

/// A started transfer: the device's size estimate plus the byte stream.
pub struct Transfer {
    pub declared_size: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

pub enum FetchOutcome {
    Success(Transfer),
    /// Non-success HTTP status; retry material.
    Status(u16),
}

/// The HTTP side of an archive, narrow enough for tests to script.
pub trait Fetcher: Send + Sync {
    /// Establishes the device's session cookie before the real transfer.
    fn prime(&self, url: &str) -> Result<()>;

    /// Opens the transfer. Transport errors are `Err`; an HTTP-level
    /// refusal is an `Ok` outcome so callers can tell them apart.
    fn fetch(&self, url: &str) -> Result<FetchOutcome>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    mak: String,
}

impl HttpFetcher {
    pub fn new(mak: &str) -> Result<Self> {
        // cookie store keeps the session cookie from the priming request;
        // certificate checks are off for the device's self-signed cert
        let client = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(true)
            .timeout(None)
            .build()?;

        Ok(Self {
            client,
            mak: mak.to_owned(),
        })
    }
}

impl Fetcher for HttpFetcher {
    fn prime(&self, url: &str) -> Result<()> {
        self.client
            .get(url)
            .basic_auth(DOWNLOAD_USER, Some(&self.mak))
            .send()?;
        Ok(())
    }

    fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        let response = self
            .client
            .get(url)
            .basic_auth(DOWNLOAD_USER, Some(&self.mak))
            .send()?;

        let status = response.status();

        if !status.is_success() {
            return Ok(FetchOutcome::Status(status.as_u16()));
        }

        let declared_size = response
            .headers()
            .get(ESTIMATED_SIZE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Ok(FetchOutcome::Success(Transfer {
            declared_size,
            body: Box::new(response),
        }))
    }
}

/// Builds the authenticated download URL from the object identifier
/// resolved over RPC; the numeric tail of the identifier keys the download.
pub fn download_url(
    device: &Device,
    file_stem: &str,
    object_id: &str,
    format: TransportFormat,
) -> String {
    let id = object_id.rsplit('.').next().unwrap_or(object_id);
    let mut url = format!(
        "http://{}:{}/download/{}.TiVo?Container=%2FNowPlaying&id={}",
        device.host, device.http_port, file_stem, id
    );

    if format == TransportFormat::Ts {
        url.push_str("&Format=video/x-tivo-mpeg-ts");
    }

    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device {
            host: "10.0.0.20".to_owned(),
            rpc_port: 1413,
            http_port: 80,
            tsn: "848000190".to_owned(),
            mak: "1234567890".to_owned(),
        }
    }

    #[test]
    fn url_keys_download_by_the_identifier_tail() {
        let url = download_url(&device(), "Evening_News", "mfs:rc.4242", TransportFormat::Ts);

        assert_eq!(
            url,
            "http://10.0.0.20:80/download/Evening_News.TiVo?Container=%2FNowPlaying&id=4242&Format=video/x-tivo-mpeg-ts"
        );
    }

    #[test]
    fn native_format_omits_the_format_query() {
        let url = download_url(&device(), "x", "mfs:rc.7", TransportFormat::Ps);

        assert!(!url.contains("Format="));
    }
}
