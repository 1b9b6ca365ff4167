use crate::config::{StorageBackend, StorageSettings};
use crate::services::storage::{LocalObjectStore, ObjectStore, S3ObjectStore};
use aws_sdk_s3::config::Region;
use std::sync::Arc;
use tracing::info;

/// Builds the configured object store and makes sure `buckets` exist
pub async fn setup_storage(
    settings: &StorageSettings,
    buckets: &[&str],
) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match settings.backend {
        StorageBackend::Local => {
            info!("📁 Local Storage: {}", settings.local_root.display());
            for bucket in buckets {
                tokio::fs::create_dir_all(settings.local_root.join(bucket)).await?;
            }
            Ok(Arc::new(LocalObjectStore::new(
                settings.local_root.clone(),
                &settings.locator_scheme,
            )))
        }
        StorageBackend::S3 => {
            let client = setup_s3_client(settings).await;
            for bucket in buckets {
                ensure_bucket(&client, bucket).await;
            }
            Ok(Arc::new(S3ObjectStore::new(
                client,
                settings.locator_scheme.clone(),
            )))
        }
    }
}

async fn setup_s3_client(settings: &StorageSettings) -> aws_sdk_s3::Client {
    info!(
        "☁️  S3 Storage: {} (Region: {})",
        settings.endpoint.as_deref().unwrap_or("default endpoint"),
        settings.region
    );

    let mut loader = aws_config::from_env().region(Region::new(settings.region.clone()));
    if let Some(endpoint) = &settings.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key) {
        loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            "static",
        ));
    }
    let aws_config = loader.load().await;

    // Custom endpoints (MinIO, GCS interop) expect path-style addressing
    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(settings.endpoint.is_some())
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}

async fn ensure_bucket(client: &aws_sdk_s3::Client, bucket: &str) {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => info!("✅ Bucket '{}' is ready", bucket),
        Err(_) => {
            info!("🪣 Bucket '{}' not found, creating...", bucket);
            if let Err(e) = client.create_bucket().bucket(bucket).send().await {
                tracing::error!("❌ Failed to create bucket '{}': {}", bucket, e);
            } else {
                info!("✅ Bucket '{}' created successfully", bucket);
            }
        }
    }
}
