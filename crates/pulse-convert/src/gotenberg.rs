//! Gotenberg LibreOffice route client producing PDF/A output.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart;
use tracing::{debug, instrument};

use pulse_core::defaults::{CONVERTED_SUFFIX, PDFA_CONFORMANCE};
use pulse_core::{DocumentConverter, Error, Result};

/// Converts office documents to PDF/A through Gotenberg.
///
/// The client carries no request timeout of its own: callers bound each call
/// with their attempt deadline.
pub struct GotenbergConverter {
    base_url: String,
    client: reqwest::Client,
}

impl GotenbergConverter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn convert_url(&self) -> String {
        format!("{}/forms/libreoffice/convert", self.base_url)
    }
}

/// Path the converted document is written to.
pub fn output_path_for(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(CONVERTED_SUFFIX);
    PathBuf::from(name)
}

#[async_trait]
impl DocumentConverter for GotenbergConverter {
    #[instrument(skip(self), fields(subsystem = "convert", component = "gotenberg"))]
    async fn convert(&self, input: &Path, source_type: &str) -> Result<PathBuf> {
        let start = Instant::now();
        let data = tokio::fs::read(input)
            .await
            .map_err(|e| Error::Conversion(format!("failed to open input file: {e}")))?;

        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("document.{source_type}"));

        let form = multipart::Form::new()
            .part("files", multipart::Part::bytes(data).file_name(file_name))
            .text("pdfa", PDFA_CONFORMANCE);

        let response = self
            .client
            .post(self.convert_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Conversion(format!("gotenberg request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Conversion(format!(
                "gotenberg returned status {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Conversion(format!("failed to read converted file: {e}")))?;

        let output = output_path_for(input);
        tokio::fs::write(&output, &bytes)
            .await
            .map_err(|e| Error::Conversion(format!("failed to save converted file: {e}")))?;

        debug!(
            output = %output.display(),
            size = bytes.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Document converted"
        );
        Ok(output)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "gotenberg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn write_input(dir: &tempfile::TempDir) -> PathBuf {
        let input = dir.path().join("abc-123.docx");
        std::fs::write(&input, b"dummy office document").unwrap();
        input
    }

    #[test]
    fn test_output_path_for() {
        assert_eq!(
            output_path_for(Path::new("/tmp/conversions/abc.docx")),
            PathBuf::from("/tmp/conversions/abc.docx.converted.pdf")
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let converter = GotenbergConverter::new("http://gotenberg:3000/");
        assert_eq!(converter.base_url(), "http://gotenberg:3000");
        assert_eq!(
            converter.convert_url(),
            "http://gotenberg:3000/forms/libreoffice/convert"
        );
        assert_eq!(converter.name(), "gotenberg");
    }

    #[tokio::test]
    async fn test_convert_requests_pdfa_2b() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/forms/libreoffice/convert"))
            .and(body_string_contains("name=\"pdfa\""))
            .and(body_string_contains(PDFA_CONFORMANCE))
            .and(body_string_contains("filename=\"abc-123.docx\""))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4\n%EOF\n".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir);
        let converter = GotenbergConverter::new(server.uri());

        let output = converter.convert(&input, "docx").await.unwrap();
        assert_eq!(output, output_path_for(&input));
        let data = std::fs::read(&output).unwrap();
        assert!(data.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_convert_non_success_is_conversion_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/forms/libreoffice/convert"))
            .respond_with(ResponseTemplate::new(500).set_body_string("LibreOffice crashed"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir);
        let converter = GotenbergConverter::new(server.uri());

        let err = converter.convert(&input, "docx").await.unwrap_err();
        match err {
            Error::Conversion(msg) => {
                assert!(msg.contains("500"), "got: {msg}");
                assert!(msg.contains("LibreOffice crashed"), "got: {msg}");
            }
            other => panic!("Expected Conversion error, got {other:?}"),
        }
        assert!(!output_path_for(&input).exists());
    }

    #[tokio::test]
    async fn test_convert_missing_input() {
        let converter = GotenbergConverter::new("http://127.0.0.1:9");
        let err = converter
            .convert(Path::new("/nonexistent/input.docx"), "docx")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }

    #[tokio::test]
    async fn test_convert_transport_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir);
        // Port 9 (discard) is not listening on test hosts.
        let converter = GotenbergConverter::new("http://127.0.0.1:9");
        let err = converter.convert(&input, "docx").await.unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(GotenbergConverter::new(server.uri())
            .health_check()
            .await
            .unwrap());
        assert!(!GotenbergConverter::new("http://127.0.0.1:9")
            .health_check()
            .await
            .unwrap());
    }
}
