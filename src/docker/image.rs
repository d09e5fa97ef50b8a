//! Image pulling with progress reporting.

use super::client::ContainerClient;
use crate::engine::{EngineError, Result, UpdateFn};
use futures::stream::StreamExt;
use tracing::{debug, info, warn};

/// Outcome of pulling one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Pulled,
    /// The registry does not know the image
    NotFound(String),
}

/// Split an image reference into repository and tag, defaulting to `latest`.
///
/// Digest references keep the whole reference as repository and no tag.
pub fn split_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn is_not_found_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["not found", "manifest unknown", "does not exist", "pull access denied"]
        .iter()
        .any(|m| message.contains(m))
}

/// Pull `image`, forwarding status lines to `progress` without line breaks.
///
/// A missing image yields [`PullOutcome::NotFound`]; other failures are errors.
pub async fn pull(
    client: &ContainerClient,
    image: &str,
    progress: &(dyn Fn(&str) + Send + Sync),
) -> Result<PullOutcome> {
    let (from_image, tag) = split_reference(image);
    info!("Pulling image: {}", image);

    let mut stream = client.docker().create_image(
        Some(bollard::image::CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        }),
        None,
        None,
    );

    while let Some(result) = stream.next().await {
        match result {
            Ok(info) => {
                if let Some(error) = info.error {
                    if is_not_found_message(&error) {
                        return Ok(PullOutcome::NotFound(error));
                    }
                    return Err(EngineError::Backend(format!(
                        "Pull of {} failed: {}",
                        image, error
                    )));
                }
                if let Some(status) = info.status {
                    debug!("Pull status: {}", status);
                    match info.progress {
                        Some(bar) => progress(&format!("{} {}", status, bar)),
                        None => progress(&status),
                    }
                }
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            }) => return Ok(PullOutcome::NotFound(message)),
            Err(bollard::errors::Error::DockerStreamError { error })
                if is_not_found_message(&error) =>
            {
                return Ok(PullOutcome::NotFound(error));
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Successfully pulled image: {}", image);
    Ok(PullOutcome::Pulled)
}

/// Pull every labelled image, reporting through `update_func`.
///
/// Missing images become warning lines; the remaining images are still pulled.
pub async fn pull_all(
    client: &ContainerClient,
    images: &[(String, String)],
    line_reset: &str,
    update_func: UpdateFn<'_>,
) -> Result<()> {
    for (label, image) in images {
        update_func(&format!("Pulling {} ({})...", image, label));
        let redraw =
            |status: &str| update_func(&format!("{}{} ({}): {}", line_reset, image, label, status));
        match pull(client, image, &redraw).await? {
            PullOutcome::Pulled => {
                update_func(&format!("{}Pulled {} ({})\n", line_reset, image, label));
            }
            PullOutcome::NotFound(reason) => {
                warn!("Image {} not found: {}", image, reason);
                update_func(&format!(
                    "{}Warning: image {} ({}) not found, skipped\n",
                    line_reset, image, label
                ));
            }
        }
    }
    Ok(())
}

/// Pull `image` unless it is present locally.
pub async fn ensure_image(client: &ContainerClient, image: &str) -> Result<()> {
    if client.image_exists(image).await? {
        return Ok(());
    }
    match pull(client, image, &|_: &str| {}).await? {
        PullOutcome::Pulled => Ok(()),
        PullOutcome::NotFound(reason) => {
            Err(EngineError::Backend(format!("Image {} not found: {}", image, reason)))
        }
    }
}
