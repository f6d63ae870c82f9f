//! S3 REST client

use std::path::Path;

use chrono::Utc;
use futures::StreamExt;
use reqwest::{Client, Method, Response, Url};
use tokio::io::AsyncWriteExt;

use super::sigv4::{self, Credentials, SigningRequest, EMPTY_PAYLOAD_SHA256};
use super::{ObjectStore, StorageError, StorageResult};
use crate::config::AwsConfig;

/// S3 client using virtual-hosted addressing, or path-style when an
/// explicit endpoint (MinIO, LocalStack) is configured
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    credentials: Credentials,
    endpoint: Option<Url>,
}

impl S3Client {
    pub fn new(config: &AwsConfig) -> Result<Self, StorageError> {
        let endpoint = config
            .endpoint_url
            .as_deref()
            .map(|url| Url::parse(url).map_err(|e| StorageError::InvalidEndpoint(format!("{}: {}", url, e))))
            .transpose()?;

        Ok(Self {
            client: Client::new(),
            credentials: Credentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
                region: config.region.clone(),
            },
            endpoint,
        })
    }

    /// Host header and request path for an object
    fn locate(&self, bucket: &str, key: &str) -> StorageResult<(String, String, String)> {
        let key = key.trim_start_matches('/');
        match &self.endpoint {
            Some(endpoint) => {
                let host = endpoint
                    .host_str()
                    .ok_or_else(|| StorageError::InvalidEndpoint(endpoint.to_string()))?;
                let host = match endpoint.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                let path = format!("/{}/{}", bucket, key);
                Ok((format!("{}://{}", endpoint.scheme(), host), host, path))
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", bucket, self.credentials.region);
                Ok((format!("https://{}", host), host, format!("/{}", key)))
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        query: &[(String, String)],
        body: Option<(Vec<u8>, &str)>,
    ) -> StorageResult<Response> {
        let (origin, host, path) = self.locate(bucket, key)?;
        let payload_sha256 = match &body {
            Some((data, _)) => sigv4::sha256_hex(data),
            None => EMPTY_PAYLOAD_SHA256.to_string(),
        };

        let signed = sigv4::sign(
            &self.credentials,
            &SigningRequest {
                method: method.as_str(),
                host: &host,
                path: &path,
                query,
                headers: &[],
                payload_sha256: &payload_sha256,
            },
            Utc::now(),
        );

        let mut url = format!("{}{}", origin, sigv4::uri_encode(&path, false));
        if !query.is_empty() {
            url.push('?');
            url.push_str(&sigv4::canonical_query(query));
        }

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256);

        if let Some((data, content_type)) = body {
            request = request.header("Content-Type", content_type).body(data);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            404 => StorageError::NotFound(format!("{}/{}", bucket, key)),
            401 | 403 => StorageError::AccessDenied(xml_tag(&message, "Message").unwrap_or(message)),
            status => StorageError::Api { status, message },
        })
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Client {
    async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> StorageResult<()> {
        let response = self.send(Method::GET, bucket, key, &[], None).await?;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::Network(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        tracing::debug!("Downloaded s3://{}/{} ({} bytes) to {:?}", bucket, key, written, destination);
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let size = data.len();
        self.send(Method::PUT, bucket, key, &[], Some((data, content_type)))
            .await?;

        tracing::info!("Uploaded s3://{}/{} ({} bytes)", bucket, key, size);
        Ok(())
    }

    async fn count(&self, bucket: &str, prefix: &str) -> StorageResult<u64> {
        let mut total = 0u64;
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), prefix.to_string()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let body = self
                .send(Method::GET, bucket, "", &query, None)
                .await?
                .text()
                .await
                .map_err(|e| StorageError::Network(e.to_string()))?;

            let page = parse_list_page(&body)?;
            total += page.key_count;

            match page.next_token {
                Some(token) if page.truncated => continuation = Some(token),
                _ => break,
            }
        }

        Ok(total)
    }
}

#[derive(Debug, PartialEq)]
struct ListPage {
    key_count: u64,
    truncated: bool,
    next_token: Option<String>,
}

fn parse_list_page(body: &str) -> StorageResult<ListPage> {
    let key_count: u64 = xml_tag(body, "KeyCount")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| StorageError::Api {
            status: 200,
            message: "ListObjectsV2 response without KeyCount".to_string(),
        })?;

    Ok(ListPage {
        key_count,
        truncated: xml_tag(body, "IsTruncated").as_deref() == Some("true"),
        next_token: xml_tag(body, "NextContinuationToken"),
    })
}

/// Text of the first `<tag>...</tag>` element
fn xml_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: Option<&str>) -> AwsConfig {
        AwsConfig {
            access_key_id: "AKID".to_string(),
            secret_access_key: "secret".to_string(),
            bucket: "one-piece-store".to_string(),
            region: "us-east-2".to_string(),
            endpoint_url: endpoint.map(str::to_string),
        }
    }

    #[test]
    fn test_virtual_hosted_location() {
        let client = S3Client::new(&config(None)).unwrap();
        let (origin, host, path) = client.locate("one-piece-store", "user42/complaint.wav").unwrap();
        assert_eq!(host, "one-piece-store.s3.us-east-2.amazonaws.com");
        assert_eq!(origin, "https://one-piece-store.s3.us-east-2.amazonaws.com");
        assert_eq!(path, "/user42/complaint.wav");
    }

    #[test]
    fn test_path_style_location_with_endpoint() {
        let client = S3Client::new(&config(Some("http://localhost:9000"))).unwrap();
        let (origin, host, path) = client.locate("bucket", "/a/b.wav").unwrap();
        assert_eq!(origin, "http://localhost:9000");
        assert_eq!(host, "localhost:9000");
        assert_eq!(path, "/bucket/a/b.wav");
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        assert!(matches!(
            S3Client::new(&config(Some("not a url"))),
            Err(StorageError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_parse_list_page() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
            <ListBucketResult>
                <Name>one-piece-store</Name>
                <KeyCount>2</KeyCount>
                <IsTruncated>true</IsTruncated>
                <NextContinuationToken>abc=</NextContinuationToken>
                <Contents><Key>1/a.wav</Key></Contents>
                <Contents><Key>1/b.wav</Key></Contents>
            </ListBucketResult>"#;

        assert_eq!(
            parse_list_page(body).unwrap(),
            ListPage { key_count: 2, truncated: true, next_token: Some("abc=".to_string()) }
        );
    }

    #[test]
    fn test_parse_list_page_missing_count() {
        assert!(parse_list_page("<ListBucketResult></ListBucketResult>").is_err());
    }

    #[test]
    fn test_xml_tag() {
        let body = "<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>";
        assert_eq!(xml_tag(body, "Code").as_deref(), Some("AccessDenied"));
        assert_eq!(xml_tag(body, "Message").as_deref(), Some("Access Denied"));
        assert_eq!(xml_tag(body, "RequestId"), None);
    }
}
