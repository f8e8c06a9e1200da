//! S3 backend configuration and SDK client creation

use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::TransferError;

/// Connection settings of one S3-compatible storage account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Storage account the events are attributed to.
    pub app_name: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

/// Configuration as it arrives from the host.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfigInput {
    pub provider: String,
    pub account_id: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: Option<String>,
    pub endpoint_scheme: Option<String>,
    pub endpoint_host: Option<String>,
    pub force_path_style: Option<bool>,
}

fn endpoint_url(scheme: Option<&str>, host: Option<&str>) -> Option<String> {
    let host = host?.trim();
    if host.is_empty() {
        return None;
    }
    Some(format!("{}://{}", scheme.unwrap_or("https"), host))
}

pub fn build_storage_config(input: &StorageConfigInput) -> Result<S3Config, TransferError> {
    let base = |region: String, endpoint_url: Option<String>, force_path_style: bool| S3Config {
        app_name: input.account_id.clone(),
        bucket: input.bucket.clone(),
        access_key_id: input.access_key_id.clone(),
        secret_access_key: input.secret_access_key.clone(),
        region,
        endpoint_url,
        force_path_style,
    };

    match input.provider.as_str() {
        "aws" => {
            let region = input
                .region
                .as_ref()
                .ok_or_else(|| TransferError::Config("AWS region is required".to_string()))?
                .to_string();
            Ok(base(
                region,
                endpoint_url(
                    input.endpoint_scheme.as_deref(),
                    input.endpoint_host.as_deref(),
                ),
                input.force_path_style.unwrap_or(false),
            ))
        }
        "minio" => {
            let endpoint = endpoint_url(
                input.endpoint_scheme.as_deref(),
                input.endpoint_host.as_deref(),
            )
            .ok_or_else(|| TransferError::Config("MinIO endpoint host is required".to_string()))?;
            Ok(base(
                input
                    .region
                    .clone()
                    .unwrap_or_else(|| "us-east-1".to_string()),
                Some(endpoint),
                input.force_path_style.unwrap_or(true),
            ))
        }
        "r2" => {
            if input.account_id.trim().is_empty() {
                return Err(TransferError::Config(
                    "R2 account id is required".to_string(),
                ));
            }
            Ok(base(
                "auto".to_string(),
                Some(format!(
                    "https://{}.r2.cloudflarestorage.com",
                    input.account_id
                )),
                true,
            ))
        }
        _ => Err(TransferError::Config(format!(
            "Unsupported provider: {}",
            input.provider
        ))),
    }
}

/// Create an SDK client whose operations give up after `operation_timeout`,
/// retries included.
pub(crate) fn create_s3_client(config: &S3Config, operation_timeout: Duration) -> Client {
    let credentials = Credentials::new(
        &config.access_key_id,
        &config.secret_access_key,
        None,
        None,
        "transfer-bridge",
    );

    let timeouts = TimeoutConfig::builder()
        .operation_timeout(operation_timeout)
        .build();

    let mut builder = S3ConfigBuilder::new()
        .credentials_provider(credentials)
        .region(Region::new(config.region.clone()))
        .timeout_config(timeouts);

    if let Some(endpoint_url) = &config.endpoint_url {
        builder = builder.endpoint_url(endpoint_url);
    }

    if config.force_path_style {
        builder = builder.force_path_style(true);
    }

    Client::from_conf(builder.build())
}
